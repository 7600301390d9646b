//! Messaging transport boundary.

/// Offer code: no subscriber is connected.
pub const NOT_CONNECTED: i64 = -1;
/// Offer code: the destination cannot accept more data right now.
pub const BACK_PRESSURED: i64 = -2;
/// Offer code: the transport is doing internal housekeeping.
pub const ADMIN_ACTION: i64 = -3;
/// Offer code: the publication is closed.
pub const PUBLICATION_CLOSED: i64 = -4;
/// Offer code: the stream has reached its maximum position.
pub const MAX_POSITION_EXCEEDED: i64 = -5;

/// Result of a single non-blocking offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResult {
    /// Accepted; carries the new stream position.
    Success(i64),
    /// No subscriber is connected.
    NotConnected,
    /// The subscriber is behind; retry shortly.
    BackPressured,
    /// Internal housekeeping; retry immediately.
    AdminAction,
    /// The publication is closed.
    Closed,
    /// The stream hit its maximum position.
    MaxPositionExceeded,
    /// Any negative code not listed above.
    Unrecognized(i64),
}

impl OfferResult {
    /// Classifies a raw offer code.
    pub fn from_code(code: i64) -> Self {
        match code {
            c if c >= 0 => OfferResult::Success(c),
            NOT_CONNECTED => OfferResult::NotConnected,
            BACK_PRESSURED => OfferResult::BackPressured,
            ADMIN_ACTION => OfferResult::AdminAction,
            PUBLICATION_CLOSED => OfferResult::Closed,
            MAX_POSITION_EXCEEDED => OfferResult::MaxPositionExceeded,
            other => OfferResult::Unrecognized(other),
        }
    }

    /// Returns the raw offer code.
    pub fn code(self) -> i64 {
        match self {
            OfferResult::Success(position) => position,
            OfferResult::NotConnected => NOT_CONNECTED,
            OfferResult::BackPressured => BACK_PRESSURED,
            OfferResult::AdminAction => ADMIN_ACTION,
            OfferResult::Closed => PUBLICATION_CLOSED,
            OfferResult::MaxPositionExceeded => MAX_POSITION_EXCEEDED,
            OfferResult::Unrecognized(code) => code,
        }
    }

    /// True for outcomes worth retrying within the deadline.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            OfferResult::NotConnected | OfferResult::BackPressured | OfferResult::AdminAction
        )
    }
}

/// A non-blocking publication endpoint.
///
/// `offer` publishes `header` and `payload` as one message made of two
/// contiguous segments. It must never block; implementations report
/// congestion through [`OfferResult`] instead. The caller only borrows
/// both segments for the duration of the call.
pub trait Transport: Send + Sync {
    /// Offers one message without blocking.
    fn offer(&self, header: &[u8], payload: &[u8]) -> OfferResult;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn offer(&self, header: &[u8], payload: &[u8]) -> OfferResult {
        (**self).offer(header, payload)
    }
}

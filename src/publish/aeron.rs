//! Publication over an Aeron media driver.
//!
//! The header and pixel segments are gathered into one reused scratch
//! buffer and offered as a single message, so subscribers see exactly
//! what the in-process stream delivers. Offer errors are mapped onto the
//! standard offer codes and classified by [`OfferResult::from_code`].

use super::transport::{
    OfferResult, Transport, ADMIN_ACTION, BACK_PRESSURED, MAX_POSITION_EXCEEDED, NOT_CONNECTED,
    PUBLICATION_CLOSED,
};
use aeron_rs::aeron::Aeron;
use aeron_rs::concurrent::atomic_buffer::AtomicBuffer;
use aeron_rs::context::Context;
use aeron_rs::publication::Publication;
use aeron_rs::utils::errors::AeronError;
use aeron_rs::utils::types::Index;
use std::ffi::CString;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Code reported for client errors that carry no offer code.
const CLIENT_ERROR: i64 = i64::MIN;

/// Errors raised while connecting to the media driver.
#[derive(Debug, Error)]
pub enum AeronTransportError {
    /// The client could not attach to the media driver.
    #[error("failed to connect to media driver: {0}")]
    Connect(String),
    /// The channel URI is not a valid C string.
    #[error("invalid channel {0:?}")]
    Channel(String),
    /// The driver refused the publication.
    #[error("failed to add publication on {channel}: {detail}")]
    AddPublication {
        /// Requested channel.
        channel: String,
        /// What the client reported.
        detail: String,
    },
    /// The publication did not register in time.
    #[error("publication on {channel} not ready after {waited:?}")]
    Timeout {
        /// Requested channel.
        channel: String,
        /// Time spent waiting.
        waited: Duration,
    },
}

struct Session {
    // Owns the conductor; dropping it closes the publication.
    _client: Aeron,
    publication: Arc<Mutex<Publication>>,
    scratch: Vec<u8>,
}

/// Publishing end of an Aeron stream.
pub struct AeronPublication {
    session: Mutex<Session>,
    channel: String,
    stream_id: i32,
}

// SAFETY: every client handle lives in `session` and is only touched while
// its mutex is held. The raw pointers inside the client refer to log
// buffers the client maps and owns for its whole lifetime.
unsafe impl Send for AeronPublication {}
// SAFETY: as above; shared access goes through the mutex.
unsafe impl Sync for AeronPublication {}

impl AeronPublication {
    /// Connects to the media driver and waits up to `timeout` for the
    /// publication to register.
    pub fn connect(
        channel: &str,
        stream_id: i32,
        aeron_dir: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, AeronTransportError> {
        let mut context = Context::new();
        if let Some(dir) = aeron_dir {
            context.set_aeron_dir(dir.to_string());
        }
        let mut client =
            Aeron::new(context).map_err(|e| AeronTransportError::Connect(format!("{e:?}")))?;

        let uri = CString::new(channel)
            .map_err(|_| AeronTransportError::Channel(channel.to_string()))?;
        let registration = client.add_publication(uri, stream_id).map_err(|e| {
            AeronTransportError::AddPublication {
                channel: channel.to_string(),
                detail: format!("{e:?}"),
            }
        })?;

        let start = Instant::now();
        let publication = loop {
            match client.find_publication(registration) {
                Ok(publication) => break publication,
                Err(_) if start.elapsed() < timeout => thread::sleep(Duration::from_millis(1)),
                Err(_) => {
                    return Err(AeronTransportError::Timeout {
                        channel: channel.to_string(),
                        waited: start.elapsed(),
                    })
                }
            }
        };

        tracing::info!(channel, stream_id, "Aeron publication ready");
        Ok(Self {
            session: Mutex::new(Session {
                _client: client,
                publication,
                scratch: Vec::new(),
            }),
            channel: channel.to_string(),
            stream_id,
        })
    }

    /// Channel URI given at connection.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stream id given at connection.
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }
}

impl Transport for AeronPublication {
    fn offer(&self, header: &[u8], payload: &[u8]) -> OfferResult {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let Session {
            publication,
            scratch,
            ..
        } = &mut *session;

        gather(scratch, header, payload);
        let Ok(length) = Index::try_from(scratch.len()) else {
            return OfferResult::from_code(MAX_POSITION_EXCEEDED);
        };
        let buffer = AtomicBuffer::new(scratch.as_mut_ptr(), length);
        let result = publication
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offer_part(buffer, 0, length);

        OfferResult::from_code(offer_code(&result))
    }
}

/// Writes both segments back to back into `scratch`, reusing its capacity.
fn gather(scratch: &mut Vec<u8>, header: &[u8], payload: &[u8]) {
    scratch.clear();
    scratch.reserve(header.len() + payload.len());
    scratch.extend_from_slice(header);
    scratch.extend_from_slice(payload);
}

/// Maps a client offer result onto an offer code.
fn offer_code(result: &Result<u64, AeronError>) -> i64 {
    match result {
        Ok(position) => i64::try_from(*position).unwrap_or(i64::MAX),
        Err(AeronError::NotConnected) => NOT_CONNECTED,
        Err(AeronError::BackPressured) => BACK_PRESSURED,
        Err(AeronError::AdminAction) => ADMIN_ACTION,
        Err(AeronError::PublicationClosed) => PUBLICATION_CLOSED,
        Err(AeronError::MaxPositionExceeded) => MAX_POSITION_EXCEEDED,
        Err(other) => {
            tracing::error!(error = ?other, "Aeron offer failed");
            CLIENT_ERROR
        }
    }
}

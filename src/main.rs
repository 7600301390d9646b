//! FLI Camera Publisher CLI
//!
//! Runs the camera pipeline until interrupted. Frames go to an Aeron
//! media driver when built with the `aeron` feature and the endpoint is an
//! Aeron channel. Otherwise they go to an in-process stream that a
//! subscriber thread monitors.

use clap::Parser;
use flicam_publisher::{
    camera::{
        CameraController, CameraError, ConfigError, ControllerState, DriverHandle, FileConfig,
    },
    header::{ByteOrder, FrameHeader},
    metrics::{MetricsError, MetricsRegistry},
    publish::{IpcPublication, IpcSubscription, OfferResult, Transport},
};
#[cfg(feature = "aeron")]
use flicam_publisher::publish::{AeronPublication, AeronTransportError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "flicam-publisher")]
#[command(about = "Publishes FLI camera frames with a self-describing binary header")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, help = "Path to TOML configuration file")]
    config: Option<PathBuf>,

    /// Override the camera serial number
    #[arg(long)]
    serial: Option<String>,

    /// Override the transport endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Override the transport stream id
    #[arg(long)]
    stream_id: Option<i32>,

    /// Override the simulated frame rate
    #[arg(long)]
    frame_rate: Option<f64>,

    /// Seconds between statistics reports
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[cfg(feature = "aeron")]
    #[error(transparent)]
    Aeron(#[from] AeronTransportError),
}

/// Where frames are published.
enum Output {
    Ipc(IpcPublication),
    #[cfg(feature = "aeron")]
    Aeron(AeronPublication),
}

impl Output {
    fn close(&self) {
        match self {
            Output::Ipc(publication) => publication.close(),
            #[cfg(feature = "aeron")]
            Output::Aeron(_) => {}
        }
    }
}

impl Transport for Output {
    fn offer(&self, header: &[u8], payload: &[u8]) -> OfferResult {
        match self {
            Output::Ipc(publication) => publication.offer(header, payload),
            #[cfg(feature = "aeron")]
            Output::Aeron(publication) => publication.offer(header, payload),
        }
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<FileConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => {
            let config = FileConfig::from_file(path)?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        None => FileConfig::default(),
    };

    if let Some(serial) = &args.serial {
        config.camera.serial_number = serial.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        config.transport.endpoint = endpoint.clone();
    }
    if let Some(stream_id) = args.stream_id {
        config.transport.stream_id = stream_id;
    }
    if let Some(frame_rate) = args.frame_rate {
        config.simulation.frame_rate = frame_rate;
    }

    config.camera.validate()?;
    Ok(config)
}

#[cfg(not(feature = "flisdk"))]
fn build_driver(config: &FileConfig) -> flicam_publisher::camera::SimulatedDriver {
    info!(
        cameras = ?config.simulation.cameras,
        frame_rate = config.simulation.frame_rate,
        "Using simulated camera SDK"
    );
    flicam_publisher::camera::SimulatedDriver::new(
        config.simulation.cameras.clone(),
        config.camera.sensor_width,
        config.camera.sensor_height,
    )
    .with_frame_rate(config.simulation.frame_rate)
}

#[cfg(feature = "flisdk")]
fn build_driver(_config: &FileConfig) -> flicam_publisher::camera::FliSdkDriver {
    info!("Using FLI SDK");
    flicam_publisher::camera::FliSdkDriver::new()
}

fn run(args: Args) -> Result<(), AppError> {
    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("FLI Camera Publisher v{}", flicam_publisher::VERSION);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            cancel.cancel();
        })?;
    }

    let (output, monitor) = open_output(&config)?;
    let publication = Arc::new(output);
    info!(
        endpoint = %config.transport.endpoint,
        stream_id = config.transport.stream_id,
        "Publication ready"
    );

    let driver = build_driver(&config);
    let mut controller = CameraController::new(
        config.camera.clone(),
        driver,
        Arc::clone(&publication),
        cancel.clone(),
    )?
    .with_byte_order(config.transport.byte_order)
    .with_deadline(config.publisher.deadline());

    let result = stream(&mut controller, &cancel, Duration::from_secs(args.stats_interval));

    if controller.state() == ControllerState::Started {
        if let Err(e) = controller.stop() {
            warn!("{}", e);
        }
    }
    controller.shutdown();
    publication.close();

    match monitor.map(JoinHandle::join) {
        Some(Ok(summary)) => info!(
            frames = summary.frames,
            malformed = summary.malformed,
            max_gap_us = summary.max_gap_ns / 1_000,
            "Subscriber finished"
        ),
        Some(Err(_)) => error!("Monitor thread panicked"),
        None => {}
    }

    let registry = MetricsRegistry::new()?;
    registry.update(&controller.stats().snapshot());
    debug!("Final metrics:\n{}", registry.encode()?);

    result
}

type Monitor = Option<JoinHandle<MonitorSummary>>;

#[cfg(feature = "aeron")]
fn open_output(config: &FileConfig) -> Result<(Output, Monitor), AppError> {
    if !config.transport.is_aeron() {
        return open_ipc(config);
    }
    let publication = AeronPublication::connect(
        &config.transport.endpoint,
        config.transport.stream_id,
        config.transport.aeron_dir.as_deref(),
        config.transport.connect_timeout(),
    )?;
    Ok((Output::Aeron(publication), None))
}

#[cfg(not(feature = "aeron"))]
fn open_output(config: &FileConfig) -> Result<(Output, Monitor), AppError> {
    if config.transport.is_aeron() {
        info!("Built without the aeron feature; publishing in-process");
    }
    open_ipc(config)
}

fn open_ipc(config: &FileConfig) -> Result<(Output, Monitor), AppError> {
    let publication = IpcPublication::new(
        config.transport.endpoint.clone(),
        config.transport.stream_id,
        config.transport.queue_depth,
    );
    let monitor = spawn_monitor(publication.subscribe(), config.transport.byte_order)?;
    Ok((Output::Ipc(publication), Some(monitor)))
}

fn stream<D: DriverHandle, T: Transport>(
    controller: &mut CameraController<D, T>,
    cancel: &CancellationToken,
    interval: Duration,
) -> Result<(), AppError> {
    controller.initialize()?;
    if let Some(header) = controller.header() {
        info!(
            width = header.size_x,
            height = header.size_y,
            format = ?header.format,
            image_bytes = header.image_buffer_length,
            "Frame header negotiated"
        );
    }
    controller.start()?;

    let stats = controller.stats();
    let mut last_report = Instant::now();
    let mut previous = stats.snapshot();

    while !cancel.is_cancelled() {
        thread::sleep(Duration::from_millis(10));
        if last_report.elapsed() < interval {
            continue;
        }

        let snapshot = stats.snapshot();
        let elapsed = last_report.elapsed().as_secs_f64();
        let published = snapshot.frames_published - previous.frames_published;
        info!(
            published = snapshot.frames_published,
            dropped = snapshot.frames_dropped(),
            rate = %format!("{:.1}", published as f64 / elapsed),
            "Publishing"
        );
        if snapshot.frames_dropped() > previous.frames_dropped() {
            warn!(
                deadline = snapshot.dropped_deadline,
                terminal = snapshot.dropped_terminal,
                "Frames dropped since last report"
            );
        }

        previous = snapshot;
        last_report = Instant::now();
    }

    Ok(())
}

#[derive(Debug, Default)]
struct MonitorSummary {
    frames: u64,
    malformed: u64,
    max_gap_ns: i64,
}

/// Drains the stream until the publication closes, checking every header.
fn spawn_monitor(
    subscription: IpcSubscription,
    order: ByteOrder,
) -> std::io::Result<JoinHandle<MonitorSummary>> {
    thread::Builder::new()
        .name("subscriber".to_string())
        .spawn(move || {
            let mut summary = MonitorSummary::default();
            let mut last_timestamp: Option<i64> = None;

            loop {
                let delivered = subscription.poll(
                    |message| match FrameHeader::decode(message, order) {
                        Ok((header, consumed)) => {
                            let payload = message.len() - consumed;
                            if payload as i64 != i64::from(header.image_buffer_length) {
                                summary.malformed += 1;
                                return;
                            }
                            if let Some(previous) = last_timestamp {
                                summary.max_gap_ns =
                                    summary.max_gap_ns.max(header.timestamp_ns - previous);
                            }
                            last_timestamp = Some(header.timestamp_ns);
                            summary.frames += 1;
                        }
                        Err(e) => {
                            debug!("Undecodable message: {}", e);
                            summary.malformed += 1;
                        }
                    },
                    16,
                );

                if delivered == 0 {
                    if subscription.is_closed() {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }

            summary
        })
}

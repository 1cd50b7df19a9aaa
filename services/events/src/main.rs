//! Hangar Event Service
//!
//! Reads per-frame detections for each configured camera, derives hangar
//! events and publishes them to the broker.
//!
//! # Architecture
//!
//! ```text
//! replay file -> CameraSession (EventState + EventMessage) -> DeliveryChannel -> broker
//! ```
//!
//! # Modes
//!
//! - `run` (default): process every camera until its replay is exhausted or
//!   Ctrl+C is pressed
//! - `tail`: consume the event and liveness queues and log every message
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with HANGAR_)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::{bail, Context, Result};
use hangar_events::config::LoggingConfig;
use hangar_events::{
    CameraSession, Detection, EventMessage, LabelVocabulary, ServiceConfig, SessionStats,
};
use hangar_pipeline::prelude::*;
use hangar_pipeline::{build_broker, BrokerBackend, DeliveryStats};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "hangar-events",
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.pipeline.broker.endpoint(),
        backend = config.pipeline.broker.backend.as_str(),
        cameras = config.cameras.len(),
        "Starting hangar event service"
    );

    // Validate configuration
    config.validate()?;

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    match mode {
        "run" => run_service(config).await?,
        "tail" => run_tail(config).await?,
        _ => print_usage(),
    }

    Ok(())
}

fn print_usage() {
    println!("Usage: hangar-events [run|tail]");
    println!();
    println!("Modes:");
    println!("  run  - Process camera detections and publish events (default)");
    println!("  tail - Log every message on the event and liveness queues");
    println!();
    println!("Environment variables:");
    println!("  RUN_MODE       - Selects config/{{RUN_MODE}}.toml (default: production)");
    println!("  HANGAR_*       - Overrides, e.g. HANGAR_PIPELINE__BROKER__HOST");
    println!("  AMQP_HOST      - Broker host when no config file is found");
}

/// Load configuration, falling back to the environment.
fn load_config() -> Result<ServiceConfig> {
    let config = ServiceConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        ServiceConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("hangar_events={}", level).parse()?)
        .add_directive(format!("hangar_pipeline={}", level).parse()?)
        .add_directive("lapin=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Process every configured camera until replays end or Ctrl+C.
async fn run_service(config: ServiceConfig) -> Result<()> {
    let vocabulary = LabelVocabulary::load(&config.labels.path);
    if !vocabulary.is_empty() {
        let missing = vocabulary.missing_known_labels();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Detector vocabulary lacks labels the event state reacts to");
        }
    }

    if config.cameras.is_empty() {
        warn!("No cameras configured");
    }

    if config.pipeline.broker.backend == BrokerBackend::Memory {
        warn!(
            backend = "memory",
            "Events are recorded in-process and never reach RabbitMQ"
        );
    }

    let broker = build_broker(&config.pipeline.broker);
    let delivery = Arc::new(DeliveryChannel::new(broker, config.pipeline.delivery.clone()));

    // Connect eagerly so a broker outage shows up at startup; publishing
    // reconnects on its own later
    if let Err(e) = delivery.ensure_connected().await {
        warn!(error = %e, "Broker not reachable at startup");
    }

    let probe = if config.pipeline.liveness.enabled {
        Some(delivery.start_liveness(&config.pipeline.queues.liveness, &config.pipeline.liveness))
    } else {
        None
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut readers = JoinSet::new();
    let mut sessions: Vec<(String, JoinHandle<SessionStats>)> = Vec::new();

    for camera in &config.cameras {
        let (frames_tx, frames_rx) = mpsc::channel(camera.frame_buffer);

        let session = CameraSession::new(
            camera.camera_id.clone(),
            camera.kind,
            config.detection.clone(),
            delivery.clone(),
            config.pipeline.queues.events.clone(),
        );
        sessions.push((camera.camera_id.clone(), tokio::spawn(session.run(frames_rx))));

        let camera_id = camera.camera_id.clone();
        let source = camera.source.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        readers.spawn(async move {
            let result = replay_frames(&camera_id, &source, frames_tx, shutdown_rx).await;
            (camera_id, result)
        });
    }

    let mut shutdown_requested = false;
    loop {
        tokio::select! {
            joined = readers.join_next() => match joined {
                Some(Ok((camera_id, Ok(frames)))) => {
                    info!(camera_id = %camera_id, frames = frames, "Replay finished");
                }
                Some(Ok((camera_id, Err(e)))) => {
                    error!(camera_id = %camera_id, error = %e, "Replay failed");
                }
                Some(Err(e)) => {
                    error!(error = %e, "Replay task panicked");
                }
                None => break,
            },
            result = signal::ctrl_c(), if !shutdown_requested => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Initiating graceful shutdown...");
                shutdown_requested = true;
                let _ = shutdown_tx.send(());
            }
        }
    }

    // Sessions end once their replay side hangs up
    let mut session_stats = Vec::with_capacity(sessions.len());
    for (camera_id, handle) in sessions {
        match handle.await {
            Ok(stats) => session_stats.push((camera_id, stats)),
            Err(e) => error!(camera_id = %camera_id, error = %e, "Camera session failed"),
        }
    }

    if let Some(probe) = probe {
        let sent = probe.stop().await;
        info!(sent = sent, "Liveness probe stopped");
    }

    delivery.close().await;

    log_final_stats(&delivery.stats(), &session_stats);

    info!("Shutdown complete");
    Ok(())
}

/// Feed one camera's replay file into its session, one frame per line.
async fn replay_frames(
    camera_id: &str,
    source: &Path,
    frames: mpsc::Sender<Vec<Detection>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<u64> {
    let file = File::open(source)
        .await
        .with_context(|| format!("Failed to open replay {}", source.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_number = 0u64;
    let mut sent = 0u64;

    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        line_number += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let detections: Vec<Detection> = match serde_json::from_str(line) {
            Ok(detections) => detections,
            Err(e) => {
                warn!(
                    camera_id = %camera_id,
                    line = line_number,
                    error = %e,
                    "Skipping malformed replay line"
                );
                continue;
            }
        };

        if frames.send(detections).await.is_err() {
            break;
        }
        sent += 1;
    }

    Ok(sent)
}

/// Logs every message seen on the watched queues
struct TailHandler {
    liveness_queue: String,
}

#[async_trait]
impl MessageHandler for TailHandler {
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError> {
        if message.queue == self.liveness_queue {
            info!(queue = %message.queue, payload = %message.payload_str(), "Liveness message");
            return Ok(());
        }

        let event = EventMessage::from_json(&message.payload_str())
            .map_err(|e| ConsumerError::DeserializationError(e.to_string()))?;
        let header = event.header();

        info!(
            queue = %message.queue,
            camera_id = %header.camera_id,
            kind = event.kind().as_str(),
            message_time = %header.message_time,
            payload = %message.payload_str(),
            "Event message"
        );
        Ok(())
    }
}

/// Watch the event and liveness queues until Ctrl+C.
async fn run_tail(config: ServiceConfig) -> Result<()> {
    if config.pipeline.broker.backend != BrokerBackend::Amqp {
        bail!("tail mode requires the amqp broker backend");
    }

    let consumer = Arc::new(QueueConsumer::connect(&config.pipeline.broker).await?);
    let handler = Arc::new(TailHandler {
        liveness_queue: config.pipeline.queues.liveness.clone(),
    });

    // Set up graceful shutdown
    let shutdown_consumer = consumer.clone();
    tokio::spawn(async move {
        signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down...");
        shutdown_consumer.shutdown();
    });

    let queues = [
        config.pipeline.queues.events.as_str(),
        config.pipeline.queues.liveness.as_str(),
    ];
    consumer.run(&queues, handler).await?;

    info!("Tail finished");
    Ok(())
}

/// Log final statistics on shutdown.
fn log_final_stats(delivery: &DeliveryStats, sessions: &[(String, SessionStats)]) {
    info!("=== Final Statistics ===");

    for (camera_id, stats) in sessions {
        info!(
            camera_id = %camera_id,
            frames_processed = stats.frames_processed,
            events_published = stats.events_published,
            publish_failures = stats.publish_failures,
            ambiguous_frames = stats.ambiguous_frames,
            serialization_failures = stats.serialization_failures,
            "Camera final stats"
        );
    }

    info!(
        published = delivery.published,
        failed = delivery.failed,
        retries = delivery.retries,
        connections_opened = delivery.connections_opened,
        connect_failures = delivery.connect_failures,
        "Delivery final stats"
    );
}

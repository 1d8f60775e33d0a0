//! `birdnetd`: wires sources, classifier, processor pipeline, and action
//! sinks together behind the three CLI subcommands named in the core's
//! configuration schema.
//!
//! The classifier is not part of `AppConfig` — it is an external process
//! boundary, so it is constructed from CLI flags instead of the config
//! file (see `birdnet_core::classifier::ExternalProcessClassifier`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use birdnet_core::actions::{
    BirdWeatherUploader, ClipWriter, InMemoryPersistence, MqttPublisher, Notifier,
};
use birdnet_core::classifier::{Classifier, ExternalProcessClassifier};
use birdnet_core::clock::{Clock, SystemClock};
use birdnet_core::config::{AppConfig, RtspTransport, SourceConfig, SourceKind};
use birdnet_core::event_bus::{EventBus, OverflowPolicy, TOPIC_DETECTION};
use birdnet_core::source::{RtspSource, Source, SoundcardSource};
use birdnet_core::supervisor::Supervisor;

#[cfg(feature = "sse")]
use birdnet_core::actions::SseBroadcaster;

/// Detections a sink's queue may hold before its overflow policy kicks in.
const ACTION_QUEUE_DEPTH: usize = 256;
/// How long a blocking sink gets to drain room before a detection is dropped.
const ACTION_BLOCK_DEADLINE: std::time::Duration = std::time::Duration::from_secs(2);
const CLIP_QUEUE_DEPTH: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "birdnetd", about = "Real-time bioacoustic detection daemon")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "birdnet.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the detection pipeline and block until shutdown.
    Run {
        /// Classifier process to launch (e.g. a BirdNET TFLite server script).
        #[arg(long)]
        classifier_cmd: String,
        /// Argument passed to the classifier process; repeatable.
        #[arg(long = "classifier-arg")]
        classifier_args: Vec<String>,
        #[arg(long, default_value_t = 48_000)]
        classifier_sample_rate: u32,
        #[arg(long, default_value_t = 3000)]
        classifier_window_ms: u32,
        #[arg(long, default_value_t = 1500)]
        classifier_hop_ms: u32,
        #[arg(long, default_value = "unknown")]
        classifier_model_version: String,
    },
    /// Strictly load and validate the configuration file.
    ValidateConfig,
    /// Print the default configuration, either to stdout or a file.
    DumpDefaultConfig {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt::try_init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(70)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::ValidateConfig => run_validate_config(&cli.config),
        Commands::DumpDefaultConfig { output } => run_dump_default_config(output),
        Commands::Run {
            classifier_cmd,
            classifier_args,
            classifier_sample_rate,
            classifier_window_ms,
            classifier_hop_ms,
            classifier_model_version,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(run_daemon(
                &cli.config,
                classifier_cmd,
                classifier_args,
                classifier_sample_rate,
                classifier_window_ms,
                classifier_hop_ms,
                classifier_model_version,
            ))
        }
    }
}

fn run_validate_config(path: &PathBuf) -> Result<ExitCode> {
    match AppConfig::load_strict(path) {
        Ok(_) => {
            println!("ok");
            Ok(ExitCode::from(0))
        }
        Err(err) => {
            println!("{err}");
            Ok(ExitCode::from(64))
        }
    }
}

fn run_dump_default_config(output: Option<PathBuf>) -> Result<ExitCode> {
    let json = serde_json::to_string_pretty(&AppConfig::default()).context("serializing default config")?;
    match output {
        Some(path) => {
            std::fs::write(&path, &json).with_context(|| format!("writing {}", path.display()))?;
        }
        None => println!("{json}"),
    }
    Ok(ExitCode::from(0))
}

#[allow(clippy::too_many_arguments)]
async fn run_daemon(
    config_path: &PathBuf,
    classifier_cmd: String,
    classifier_args: Vec<String>,
    classifier_sample_rate: u32,
    classifier_window_ms: u32,
    classifier_hop_ms: u32,
    classifier_model_version: String,
) -> Result<ExitCode> {
    let config = AppConfig::load_from_file(config_path);

    let classifier: Arc<dyn Classifier> = match ExternalProcessClassifier::spawn(
        &classifier_cmd,
        &classifier_args,
        classifier_sample_rate,
        classifier_window_ms,
        classifier_hop_ms,
        classifier_model_version.clone(),
    ) {
        Ok(classifier) => Arc::new(classifier),
        Err(err) => {
            eprintln!("Error: classifier process unavailable: {err}");
            return Ok(ExitCode::from(69));
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let event_bus = Arc::new(EventBus::new());
    let cancel = CancellationToken::new();

    let (clip_tx, clip_rx) = mpsc::channel(CLIP_QUEUE_DEPTH);
    let clip_writer = ClipWriter::new(config.clip.directory.clone());
    let clip_cancel = cancel.clone();
    let mut join_handles = vec![tokio::spawn(async move { clip_writer.run(clip_rx, clip_cancel).await })];

    spawn_actions(&config, &event_bus, &cancel, &mut join_handles)?;

    for source_config in &config.sources {
        let source: Arc<dyn Source> = build_source(source_config)?;
        let supervisor = Supervisor::new(
            source_config.id.clone(),
            source,
            Arc::clone(&classifier),
            Arc::clone(&clock),
            Arc::clone(&event_bus),
            clip_tx.clone(),
            config.window.clone(),
            config.thresholds.clone(),
            config.filters.clone(),
            config.clip.clone(),
            config.supervisor.clone(),
            classifier_model_version.clone(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        let supervisor_cancel = cancel.clone();
        join_handles.push(tokio::spawn(async move { supervisor.run(supervisor_cancel).await }));
    }
    drop(clip_tx);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("installing ctrl-c handler")?;
            log::info!(target: "birdnetd", "shutdown requested, cancelling {} tasks", join_handles.len());
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    let drain = std::time::Duration::from_millis(config.supervisor.shutdown_drain_ms);
    let _ = tokio::time::timeout(drain, futures::future::join_all(join_handles)).await;

    Ok(ExitCode::from(130))
}

fn build_source(source_config: &SourceConfig) -> Result<Arc<dyn Source>> {
    match source_config.kind {
        SourceKind::Soundcard => {
            let device_name = if source_config.device_or_url.is_empty() || source_config.device_or_url == "default" {
                None
            } else {
                Some(source_config.device_or_url.clone())
            };
            Ok(Arc::new(SoundcardSource::new(source_config.id.clone(), device_name)))
        }
        SourceKind::Rtsp => {
            let transport = match source_config.transport {
                Some(RtspTransport::Udp) => "udp",
                _ => "tcp",
            };
            Ok(Arc::new(RtspSource::new(
                source_config.id.clone(),
                source_config.device_or_url.clone(),
                transport,
                source_config.sample_rate,
            )))
        }
    }
}

/// Subscribes every enabled action to the detection topic and spawns its
/// run loop. Durable sinks (mqtt/birdweather/notifier/persistence) block
/// briefly for queue room rather than dropping; SSE is fan-out to
/// possibly-many slow web clients and always drops newest instead.
fn spawn_actions(
    config: &AppConfig,
    event_bus: &Arc<EventBus>,
    cancel: &CancellationToken,
    join_handles: &mut Vec<tokio::task::JoinHandle<()>>,
) -> Result<()> {
    let persistence = Arc::new(InMemoryPersistence::new());
    let persistence_sub = event_bus.subscribe(TOPIC_DETECTION, ACTION_QUEUE_DEPTH, OverflowPolicy::BlockWithDeadline(ACTION_BLOCK_DEADLINE));
    let persistence_cancel = cancel.clone();
    join_handles.push(tokio::spawn(async move {
        birdnet_core::actions::run_persistence(persistence.as_ref(), persistence_sub.receiver, persistence_cancel).await
    }));

    if config.actions.mqtt.enabled {
        let (publisher, mut event_loop) = MqttPublisher::connect("birdnetd", &config.actions.mqtt.broker_url, config.actions.mqtt.topic_prefix.clone());
        join_handles.push(tokio::spawn(async move {
            loop {
                if event_loop.poll().await.is_err() {
                    break;
                }
            }
        }));
        let sub = event_bus.subscribe(TOPIC_DETECTION, ACTION_QUEUE_DEPTH, OverflowPolicy::BlockWithDeadline(ACTION_BLOCK_DEADLINE));
        let mqtt_cancel = cancel.clone();
        join_handles.push(tokio::spawn(async move { publisher.run(sub.receiver, mqtt_cancel).await }));
    }

    if config.actions.birdweather.enabled {
        let uploader = BirdWeatherUploader::new(
            config.actions.birdweather.endpoint.clone(),
            config.actions.birdweather.station_id.clone(),
            config.actions.birdweather.include_clip,
            (config.filters.location.lat, config.filters.location.lon),
        );
        let sub = event_bus.subscribe(TOPIC_DETECTION, ACTION_QUEUE_DEPTH, OverflowPolicy::BlockWithDeadline(ACTION_BLOCK_DEADLINE));
        let bw_cancel = cancel.clone();
        join_handles.push(tokio::spawn(async move { uploader.run(sub.receiver, bw_cancel).await }));
    }

    if config.actions.notifier.enabled {
        let notifier = Notifier::new(config.actions.notifier.webhook_url.clone());
        let sub = event_bus.subscribe(TOPIC_DETECTION, ACTION_QUEUE_DEPTH, OverflowPolicy::BlockWithDeadline(ACTION_BLOCK_DEADLINE));
        let notifier_cancel = cancel.clone();
        join_handles.push(tokio::spawn(async move { notifier.run(sub.receiver, notifier_cancel).await }));
    }

    #[cfg(feature = "sse")]
    if config.actions.sse.enabled {
        let broadcaster = Arc::new(SseBroadcaster::new(Arc::clone(event_bus), ACTION_QUEUE_DEPTH));
        let bind_addr = config.actions.sse.bind_addr.clone();
        let sse_cancel = cancel.clone();
        join_handles.push(tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/detections",
                axum::routing::get(move || {
                    let broadcaster = Arc::clone(&broadcaster);
                    async move { broadcaster.stream() }
                }),
            );
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    log::error!(target: "actions::sse", "failed to bind {bind_addr}: {err}");
                    return;
                }
            };
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move { sse_cancel.cancelled().await });
            if let Err(err) = serve.await {
                log::error!(target: "actions::sse", "server error: {err}");
            }
        }));
    }

    Ok(())
}

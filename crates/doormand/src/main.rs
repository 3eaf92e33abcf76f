use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod engine;
mod frames;

use dbus_interface::{DoormanService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("doormand starting");

    let config = config::Config::load()?;
    tracing::info!(
        frame_dir = %config.frame_dir.display(),
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        "config loaded"
    );

    let store = doorman_store::SqliteGallery::open(&config.db_path)
        .with_context(|| format!("opening gallery at {}", config.db_path.display()))?;

    let detector_path = config.detector_model_path();
    let detector = doorman_core::OnnxDetector::load(&detector_path)?;
    tracing::info!(path = %detector_path, "BlazeFace detector loaded");

    let embedder_path = config.embedder_model_path();
    let embedder = doorman_core::OnnxEmbedder::load(&embedder_path)?;
    tracing::info!(path = %embedder_path, "FaceNet embedder loaded");

    let frames = frames::DirectorySource::open(&config.frame_dir)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let engine = engine::spawn_engine(
        engine::EngineParts {
            detector: Box::new(detector),
            embedder: Box::new(embedder),
            frames: Box::new(frames),
            store: Arc::new(store),
            config: config.pipeline_config(),
            tick: config.tick_interval(),
        },
        events_tx,
    )?;

    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, DoormanService::new(engine.handle()))?
        .build()
        .await
        .context("registering D-Bus service")?;

    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?;
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            tracing::info!(%event, "publishing event");
            if let Err(err) = DoormanService::emit(&emitter, &event).await {
                tracing::warn!(error = %err, "failed to emit signal");
            }
        }
    });

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "doormand ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("doormand shutting down");

    engine.shutdown().await;
    // The tick loop owned the last event sender; the forwarder drains and exits.
    let _ = forwarder.await;
    drop(conn);

    Ok(())
}

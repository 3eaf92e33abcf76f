use crate::frames::FrameSource;
use doorman_core::pipeline::{classify_frame, enroll_face};
use doorman_core::{
    Detector, Embedder, Event, GalleryError, GalleryStore, Identity, Phase, PipelineConfig, PipelineError,
    Stabilizer,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("{0}")]
    Store(#[from] GalleryError),
    #[error("failed to read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("engine stopped")]
    Stopped,
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything the engine takes ownership of at startup.
pub struct EngineParts {
    pub detector: Box<dyn Detector>,
    pub embedder: Box<dyn Embedder>,
    pub frames: Box<dyn FrameSource>,
    pub store: Arc<dyn GalleryStore>,
    pub config: PipelineConfig,
    pub tick: Duration,
}

struct Models {
    detector: Box<dyn Detector>,
    embedder: Box<dyn Embedder>,
}

/// State shared by the tick loop and the handle. Iterations, resume and
/// enrollment are serialized through the session lock.
struct Session {
    /// `None` once the engine has shut down.
    models: Option<Models>,
    frames: Box<dyn FrameSource>,
    gallery: Vec<Identity>,
    stabilizer: Stabilizer,
    config: PipelineConfig,
    frames_processed: u64,
}

/// Snapshot returned by `EngineHandle::status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub running: bool,
    pub phase: Phase,
    pub window: Vec<String>,
    pub no_face_frames: u32,
    pub gallery_size: usize,
    pub frames_processed: u64,
    pub frame_source: String,
}

/// Clone-safe handle to the running engine.
#[derive(Clone)]
pub struct EngineHandle {
    session: Arc<Mutex<Session>>,
    store: Arc<dyn GalleryStore>,
}

/// Owner of the tick loop. Dropping it without `shutdown` also ends the
/// loop (the stop channel closes), but the models are only released once
/// every `EngineHandle` is gone.
pub struct Engine {
    handle: EngineHandle,
    stop: oneshot::Sender<()>,
    ticker: JoinHandle<()>,
}

/// Load the gallery, then start the tick loop.
///
/// Must be called from within a Tokio runtime. Gallery load failure is fatal.
pub fn spawn_engine(parts: EngineParts, events: mpsc::UnboundedSender<Event>) -> Result<Engine, EngineError> {
    let gallery = parts.store.load_all()?;
    tracing::info!(identities = gallery.len(), "gallery loaded");
    warn_if_empty(&gallery);

    let session = Arc::new(Mutex::new(Session {
        models: Some(Models {
            detector: parts.detector,
            embedder: parts.embedder,
        }),
        frames: parts.frames,
        gallery,
        stabilizer: Stabilizer::new(parts.config.stabilizer),
        config: parts.config,
        frames_processed: 0,
    }));

    let (stop_tx, stop_rx) = oneshot::channel();
    let ticker = tokio::spawn(tick_loop(Arc::clone(&session), events, parts.tick, stop_rx));
    tracing::info!(tick_ms = parts.tick.as_millis() as u64, "engine started");

    Ok(Engine {
        handle: EngineHandle {
            session,
            store: parts.store,
        },
        stop: stop_tx,
        ticker,
    })
}

impl Engine {
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the tick loop, wait for any in-flight iteration, then release the
    /// models. Later handle requests fail with `EngineError::Stopped`.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.ticker.await {
            tracing::warn!(error = %err, "tick loop ended abnormally");
        }

        let mut session = self.handle.session.lock().await;
        if let Some(models) = session.models.take() {
            drop(models);
            tracing::info!(frames = session.frames_processed, "engine stopped; models released");
        }
    }
}

/// Returns whether the gallery is empty, warning if so.
fn warn_if_empty(gallery: &[Identity]) -> bool {
    if gallery.is_empty() {
        tracing::warn!("no users in the gallery; every face will be reported unknown until someone is enrolled");
        return true;
    }
    false
}

async fn tick_loop(
    session: Arc<Mutex<Session>>,
    events: mpsc::UnboundedSender<Event>,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                try_start_iteration(&session, &events);
            }
        }
    }
    tracing::debug!("tick loop exited");
}

/// Start one iteration unless one is already in flight. Returns whether an
/// iteration was started.
fn try_start_iteration(session: &Arc<Mutex<Session>>, events: &mpsc::UnboundedSender<Event>) -> bool {
    let guard = match Arc::clone(session).try_lock_owned() {
        Ok(guard) => guard,
        Err(_) => {
            tracing::trace!("iteration in flight; tick dropped");
            return false;
        }
    };
    if guard.stabilizer.is_paused() {
        return false;
    }

    let events = events.clone();
    tokio::task::spawn_blocking(move || {
        let mut session: OwnedMutexGuard<Session> = guard;
        if let Some(event) = run_iteration(&mut session) {
            if events.send(event).is_err() {
                tracing::debug!("event receiver gone; event dropped");
            }
        }
    });
    true
}

/// Pull one frame, classify it and feed the stabilizer. Returns the event
/// to publish, if any.
fn run_iteration(session: &mut Session) -> Option<Event> {
    if session.stabilizer.is_paused() {
        return None;
    }
    let models = session.models.as_mut()?;

    let frame = match session.frames.next_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            tracing::debug!("camera not ready; no frame available");
            return None;
        }
        Err(err) => {
            tracing::warn!(error = %err, "frame read failed; skipping tick");
            return None;
        }
    };

    let verdict = match classify_frame(
        models.detector.as_mut(),
        models.embedder.as_mut(),
        &frame,
        &session.gallery,
        &session.config,
    ) {
        Ok(verdict) => verdict,
        Err(err) => {
            tracing::warn!(error = %err, "inference failed; frame dropped");
            return None;
        }
    };
    session.frames_processed += 1;

    match session.stabilizer.observe(&verdict) {
        Event::Continue => None,
        event => Some(event),
    }
}

impl EngineHandle {
    /// Leave the paused phase. On success the gallery snapshot is reloaded
    /// for the new session; if that fails the previous snapshot is kept.
    pub async fn resume(&self) -> Result<bool, EngineError> {
        let mut session = self.session.lock().await;
        if session.models.is_none() {
            return Err(EngineError::Stopped);
        }
        if !session.stabilizer.resume() {
            return Ok(false);
        }

        match self.blocking_store(|store| store.load_all()).await {
            Ok(gallery) => {
                tracing::info!(identities = gallery.len(), "resumed; gallery reloaded");
                warn_if_empty(&gallery);
                session.gallery = gallery;
            }
            Err(err) => {
                tracing::warn!(error = %err, "gallery reload failed; keeping previous snapshot");
            }
        }
        Ok(true)
    }

    /// Detect, embed and store the largest face in the image at `image_path`.
    /// Returns the new identity id.
    pub async fn enroll(&self, name: &str, image_path: &str) -> Result<String, EngineError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::InvalidName(name));
        }

        let mut session = Arc::clone(&self.session).lock_owned().await;
        if session.models.is_none() {
            return Err(EngineError::Stopped);
        }

        let store = Arc::clone(&self.store);
        let image_path = image_path.to_string();
        tokio::task::spawn_blocking(move || -> Result<String, EngineError> {
            let image = image::open(&image_path)?.to_rgb8();
            let config = session.config;
            let models = session.models.as_mut().ok_or(EngineError::Stopped)?;
            let embedding = enroll_face(models.detector.as_mut(), models.embedder.as_mut(), &image, &config)?;

            let identity = doorman_store::new_identity(&name, embedding, &image_path);
            store.append(&identity)?;
            tracing::info!(name = %name, id = %identity.id, "enrolled");
            Ok(identity.id)
        })
        .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let session = self.session.lock().await;
        let state = session.stabilizer.state();
        Ok(EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            running: session.models.is_some(),
            phase: state.phase(),
            window: state.labels().map(|l| l.to_string()).collect(),
            no_face_frames: state.no_face_frames(),
            gallery_size: session.gallery.len(),
            frames_processed: session.frames_processed,
            frame_source: session.frames.describe(),
        })
    }

    pub async fn count_by_name(&self, name: &str) -> Result<usize, EngineError> {
        let name = name.trim().to_string();
        self.blocking_store(move |store| store.count_by_name(&name)).await
    }

    pub async fn list_identities(&self) -> Result<Vec<(String, usize)>, EngineError> {
        self.blocking_store(|store| store.list_names()).await
    }

    /// Remove every stored identity and empty the current gallery snapshot.
    pub async fn clear_gallery(&self) -> Result<usize, EngineError> {
        let mut session = self.session.lock().await;
        let removed = self.blocking_store(|store| store.clear()).await?;
        session.gallery.clear();
        Ok(removed)
    }

    async fn blocking_store<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn GalleryStore) -> Result<T, GalleryError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(store.as_ref())).await??)
    }
}

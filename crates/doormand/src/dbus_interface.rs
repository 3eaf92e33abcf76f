use crate::engine::{EngineError, EngineHandle};
use doorman_core::Event;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.freedesktop.Doorman1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Doorman1";

/// D-Bus interface for the Doorman recognition daemon.
///
/// Bus name: org.freedesktop.Doorman1
/// Object path: /org/freedesktop/Doorman1
pub struct DoormanService {
    engine: EngineHandle,
}

impl DoormanService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    /// Publish a stabilizer event as the matching signal.
    pub async fn emit(emitter: &SignalEmitter<'_>, event: &Event) -> zbus::Result<()> {
        match event {
            Event::Continue => Ok(()),
            Event::StatusUpdate(status) => Self::status_update(emitter, &status.to_string()).await,
            Event::NoFaceAlert => Self::no_face_alert(emitter).await,
            Event::KnownUserConfirmed(name) => Self::known_user_confirmed(emitter, name).await,
            Event::UnknownUserConfirmed => Self::unknown_user_confirmed(emitter).await,
        }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::InvalidName(_) | EngineError::Image(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.freedesktop.Doorman1")]
impl DoormanService {
    /// Leave the paused state after the user dismissed the result. Returns
    /// false if recognition was not paused.
    async fn resume(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("resume requested");
        self.engine.resume().await.map_err(to_fdo)
    }

    /// Enroll the largest face in an image file under `name`. Returns the
    /// new identity id.
    async fn enroll(&self, name: &str, image_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, image_path, "enroll requested");
        self.engine.enroll(name, image_path).await.map_err(|err| {
            tracing::warn!(name, image_path, error = %err, "enroll failed");
            to_fdo(err)
        })
    }

    /// Number of stored embeddings for `name`.
    async fn count_by_name(&self, name: &str) -> zbus::fdo::Result<u32> {
        let count = self.engine.count_by_name(name).await.map_err(to_fdo)?;
        Ok(count as u32)
    }

    /// Enrolled names with their embedding counts, as JSON.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let names = self.engine.list_identities().await.map_err(to_fdo)?;
        let entries: Vec<_> = names
            .into_iter()
            .map(|(name, count)| serde_json::json!({ "name": name, "count": count }))
            .collect();
        Ok(serde_json::Value::Array(entries).to_string())
    }

    /// Remove every enrolled identity.
    async fn clear_gallery(&self) -> zbus::fdo::Result<bool> {
        let removed = self.engine.clear_gallery().await.map_err(to_fdo)?;
        tracing::info!(removed, "gallery cleared over D-Bus");
        Ok(true)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        serde_json::to_string(&status).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    #[zbus(signal)]
    async fn status_update(emitter: &SignalEmitter<'_>, text: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn no_face_alert(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn known_user_confirmed(emitter: &SignalEmitter<'_>, name: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn unknown_user_confirmed(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;
}

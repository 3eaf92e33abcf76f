//! SQLite-backed gallery of known identities.
//!
//! One row per enrolled embedding. Embeddings are stored as little-endian
//! f32 blobs of exactly [`EMBEDDING_DIM`] values; rows of any other width
//! are rejected on write and reported as corrupt on read. The connection
//! sits behind a mutex and the database runs in WAL mode, so enrollment
//! writes never expose half-written rows to a concurrent `load_all`.

use doorman_core::recognizer::FACENET_EMBEDDING_DIM;
use doorman_core::{Embedding, GalleryError, GalleryStore, Identity};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Dimension of every stored embedding.
pub const EMBEDDING_DIM: usize = FACENET_EMBEDDING_DIM;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt embedding for identity {id}: {len} bytes")]
    CorruptEmbedding { id: String, len: usize },
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for GalleryError {
    fn from(err: StoreError) -> Self {
        GalleryError::new(err)
    }
}

/// Build a new identity row with a fresh id and the current timestamp.
pub fn new_identity(name: &str, embedding: Embedding, image_ref: &str) -> Identity {
    Identity {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        embedding,
        image_ref: image_ref.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

pub struct SqliteGallery {
    conn: Mutex<Connection>,
}

impl SqliteGallery {
    /// Open (or create) the gallery database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::info!(path = %path.display(), "opened gallery store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                embedding BLOB NOT NULL,
                image_ref TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS identities_name_idx ON identities(name);
            COMMIT;",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn load_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, name, embedding, image_ref, created_at FROM identities ORDER BY rowid")?;

        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Vec<u8>>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (id, name, blob, image_ref, created_at) = row?;
            let embedding = decode_embedding(&id, &blob)?;
            identities.push(Identity {
                id,
                name,
                embedding,
                image_ref,
                created_at,
            });
        }

        tracing::debug!(count = identities.len(), "loaded gallery");
        Ok(identities)
    }

    pub fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        if identity.embedding.len() != EMBEDDING_DIM {
            return Err(StoreError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: identity.embedding.len(),
            });
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO identities (id, name, embedding, image_ref, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.id,
                identity.name,
                encode_embedding(&identity.embedding),
                identity.image_ref,
                identity.created_at,
            ],
        )?;
        tracing::info!(id = %identity.id, name = %identity.name, image = %identity.image_ref, "identity stored");
        Ok(())
    }

    pub fn count(&self, name: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM identities WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn names(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name, COUNT(*) FROM identities GROUP BY name ORDER BY name")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_all(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM identities", [])?;
        tracing::info!(removed, "gallery cleared");
        Ok(removed)
    }
}

impl GalleryStore for SqliteGallery {
    fn load_all(&self) -> Result<Vec<Identity>, GalleryError> {
        Ok(self.load_identities()?)
    }

    fn append(&self, identity: &Identity) -> Result<(), GalleryError> {
        Ok(self.insert(identity)?)
    }

    fn count_by_name(&self, name: &str) -> Result<usize, GalleryError> {
        Ok(self.count(name)?)
    }

    fn list_names(&self) -> Result<Vec<(String, usize)>, GalleryError> {
        Ok(self.names()?)
    }

    fn clear(&self) -> Result<usize, GalleryError> {
        Ok(self.delete_all()?)
    }
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding.values().iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(id: &str, blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() != EMBEDDING_DIM * 4 {
        return Err(StoreError::CorruptEmbedding {
            id: id.to_string(),
            len: blob.len(),
        });
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding::from_stored(values))
}

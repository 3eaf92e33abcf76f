use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("degenerate embedding: zero or non-finite norm")]
    DegenerateEmbedding,
}

/// L2-normalized face embedding (128-dimensional for FaceNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Normalize a raw embedder output to unit length.
    ///
    /// A zero-norm vector carries no direction and cannot be compared;
    /// it usually means the crop was blank or badly exposed.
    pub fn normalized(raw: Vec<f32>) -> Result<Self, MatchError> {
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Err(MatchError::DegenerateEmbedding);
        }
        Ok(Self {
            values: raw.into_iter().map(|x| x / norm).collect(),
        })
    }

    /// Wrap values that were normalized before they were stored.
    pub fn from_stored(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Returns 0.0 when the dimensions differ or either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// A known person: one stored embedding plus provenance.
///
/// Names are not unique; a person enrolled from five photos has five rows,
/// each compared independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
    /// Where the enrollment image came from (file name or path).
    pub image_ref: String,
    pub created_at: String,
}

/// Best gallery hit for a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub name: String,
    pub identity_id: String,
    /// Cosine similarity of the match, strictly above the threshold used.
    pub similarity: f32,
}

/// Strategy for comparing a probe embedding against a gallery of identities.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &[Identity], threshold: f32) -> Option<MatchResult>;
}

/// Cosine similarity matcher.
///
/// Always iterates every gallery entry. When several entries share the
/// maximum similarity the first one in gallery order wins. Entries whose
/// dimension differs from the probe's are skipped.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &[Identity], threshold: f32) -> Option<MatchResult> {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            if identity.embedding.len() != probe.len() {
                tracing::warn!(
                    id = %identity.id,
                    name = %identity.name,
                    stored = identity.embedding.len(),
                    probe = probe.len(),
                    "skipping gallery entry with mismatched embedding dimension"
                );
                continue;
            }
            let sim = probe.similarity(&identity.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => Some(MatchResult {
                name: gallery[idx].name.clone(),
                identity_id: gallery[idx].id.clone(),
                similarity: best_sim,
            }),
            _ => None,
        }
    }
}

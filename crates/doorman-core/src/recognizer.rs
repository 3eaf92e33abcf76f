//! FaceNet face embedder via ONNX Runtime.
//!
//! Produces 128-dimensional embeddings from padded face crops. The raw
//! output is returned unnormalized; callers normalize through
//! [`Embedding::normalized`](crate::types::Embedding::normalized) so that a
//! degenerate vector is caught in one place.

use crate::preprocess::image_to_tensor;
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from BlazeFace!) ---
pub const FACENET_INPUT_SIZE: usize = 160;
pub const FACENET_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place the FaceNet export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face embedding model, treated as an opaque image → vector function.
pub trait Embedder: Send {
    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, RecognizerError>;
}

/// FaceNet-based embedder.
pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self { session })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, RecognizerError> {
        tracing::debug!(width = face.width(), height = face.height(), "FaceNet input");

        let input = image_to_tensor(face, FACENET_INPUT_SIZE);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        check_dimension(raw.to_vec())
    }
}

fn check_dimension(raw: Vec<f32>) -> Result<Vec<f32>, RecognizerError> {
    if raw.len() != FACENET_EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dimension_accepts_128() {
        assert_eq!(check_dimension(vec![0.5; 128]).unwrap().len(), 128);
    }

    #[test]
    fn test_check_dimension_rejects_other_lengths() {
        let err = check_dimension(vec![0.5; 512]).unwrap_err();
        assert!(matches!(err, RecognizerError::InferenceFailed(_)));
        assert!(err.to_string().contains("got 512"));
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmbedder::load("/nonexistent/facenet.onnx").err().unwrap();
        assert!(matches!(err, RecognizerError::ModelNotFound(_)));
    }
}

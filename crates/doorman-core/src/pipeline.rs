//! Per-frame classification: detect → suppress → crop → embed → match.
//!
//! These functions hold no state of their own; the daemon's engine owns the
//! models, the gallery snapshot and the stabilizer and calls in here once per
//! frame.

use crate::crop::{crop_face, DEFAULT_CROP_MARGIN};
use crate::detector::{decode_detections, nms, Detection, Detector, DetectorError};
use crate::detector::{DEFAULT_IOU_THRESHOLD, DEFAULT_SCORE_THRESHOLD};
use crate::recognizer::{Embedder, RecognizerError};
use crate::stabilizer::{StabilizerConfig, Verdict};
use crate::types::{CosineMatcher, Embedding, Identity, MatchError, Matcher};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Match(#[from] MatchError),
    #[error("no face detected")]
    NoFaceDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Anchors scoring at or below this are discarded.
    pub score_threshold: f32,
    /// Boxes overlapping a larger kept box above this IoU are suppressed.
    pub iou_threshold: f32,
    /// Padding added on each side of the face before embedding.
    pub crop_margin: f32,
    /// Cosine similarity a gallery entry must exceed to count as a match.
    pub similarity_threshold: f32,
    pub stabilizer: StabilizerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            crop_margin: DEFAULT_CROP_MARGIN,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            stabilizer: StabilizerConfig::default(),
        }
    }
}

/// Detect, decode and de-duplicate faces. Largest face first.
pub fn detect_faces(
    detector: &mut dyn Detector,
    frame: &RgbImage,
    config: &PipelineConfig,
) -> Result<Vec<Detection>, DetectorError> {
    let raw = detector.detect(frame)?;
    let decoded = decode_detections(&raw, detector.input_size(), config.score_threshold);
    let faces = nms(decoded, config.iou_threshold);
    tracing::debug!(anchors = raw.scores.len(), faces = faces.len(), "detected faces");
    Ok(faces)
}

/// Crop the face out of `frame` and embed it.
fn embed_face(
    detector: &dyn Detector,
    embedder: &mut dyn Embedder,
    frame: &RgbImage,
    face: &Detection,
    config: &PipelineConfig,
) -> Result<Result<Embedding, MatchError>, RecognizerError> {
    let crop = crop_face(frame, &face.face, detector.input_size(), config.crop_margin);
    let raw = embedder.embed(&crop)?;
    Ok(Embedding::normalized(raw))
}

/// Classify one frame against the gallery.
///
/// Only the largest face is considered. A degenerate embedding is treated
/// as an unrecognized face. Inference failures are returned as errors so the
/// caller can drop the frame without counting it as an observation.
pub fn classify_frame(
    detector: &mut dyn Detector,
    embedder: &mut dyn Embedder,
    frame: &RgbImage,
    gallery: &[Identity],
    config: &PipelineConfig,
) -> Result<Verdict, PipelineError> {
    let faces = detect_faces(detector, frame, config)?;
    let Some(largest) = faces.first() else {
        return Ok(Verdict::NoFace);
    };

    let embedding = match embed_face(detector, embedder, frame, largest, config)? {
        Ok(embedding) => embedding,
        Err(err) => {
            tracing::warn!(error = %err, "discarding embedding; treating face as unmatched");
            return Ok(Verdict::Unmatched(largest.face));
        }
    };

    let verdict = match CosineMatcher.best_match(&embedding, gallery, config.similarity_threshold) {
        Some(m) => {
            tracing::debug!(name = %m.name, similarity = m.similarity, "gallery match");
            Verdict::Matched {
                face: largest.face,
                name: m.name,
                similarity: m.similarity,
            }
        }
        None => {
            tracing::debug!(gallery = gallery.len(), "no gallery match");
            Verdict::Unmatched(largest.face)
        }
    };

    Ok(verdict)
}

/// Produce the embedding to enroll from one image of a person.
pub fn enroll_face(
    detector: &mut dyn Detector,
    embedder: &mut dyn Embedder,
    image: &RgbImage,
    config: &PipelineConfig,
) -> Result<Embedding, PipelineError> {
    let faces = detect_faces(detector, image, config)?;
    let largest = faces.first().ok_or(PipelineError::NoFaceDetected)?;
    tracing::info!(score = largest.score, area = largest.face.area(), "enroll: face selected");
    Ok(embed_face(detector, embedder, image, largest, config)??)
}

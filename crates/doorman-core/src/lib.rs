//! doorman-core — Face recognition pipeline core.
//!
//! Decodes BlazeFace detections, crops and embeds the largest face with
//! FaceNet (both via ONNX Runtime), matches embeddings against a gallery,
//! and stabilizes per-frame verdicts into discrete decisions.

pub mod crop;
pub mod detector;
pub mod gallery;
pub mod geometry;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod stabilizer;
pub mod types;

pub use detector::{Detection, Detector, OnnxDetector, RawDetections};
pub use gallery::{GalleryError, GalleryStore};
pub use geometry::FaceBox;
pub use pipeline::{PipelineConfig, PipelineError};
pub use recognizer::{Embedder, OnnxEmbedder};
pub use stabilizer::{Event, Phase, Stabilizer, StabilizerConfig, Status, Verdict};
pub use types::{CosineMatcher, Embedding, Identity, MatchError, MatchResult, Matcher};

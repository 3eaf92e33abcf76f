//! BlazeFace face detector via ONNX Runtime, plus the model-independent
//! decode and suppression stages.
//!
//! The detector emits one center-form box and one score per anchor. Decoding
//! turns the anchors that clear the score threshold into clamped corner-form
//! boxes in input pixels; suppression then removes duplicates, preferring the
//! larger box.

use crate::geometry::FaceBox;
use crate::preprocess::image_to_tensor;
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
pub const BLAZEFACE_INPUT_SIZE: u32 = 128;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.4;
/// Floats per anchor in the regressor output: box (4) + six keypoints (12).
const BLAZEFACE_REGRESSOR_WIDTH: usize = 16;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the BlazeFace export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Raw per-anchor detector output: center-form boxes normalized to `[0, 1]`
/// and one confidence score per anchor.
#[derive(Debug, Clone, Default)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
}

/// A decoded face box with its confidence score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub face: FaceBox,
    pub score: f32,
}

/// Face detection model, treated as an opaque image → tensors function.
pub trait Detector: Send {
    /// Side length of the square the model sees; decoded boxes live in this space.
    fn input_size(&self) -> u32;

    fn detect(&mut self, image: &RgbImage) -> Result<RawDetections, DetectorError>;
}

/// BlazeFace (short range) detector.
pub struct OnnxDetector {
    session: Session,
    /// Output index of the regressor (box) tensor.
    boxes_idx: usize,
    /// Output index of the classificator (score) tensor.
    scores_idx: usize,
}

impl OnnxDetector {
    /// Load the BlazeFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded BlazeFace model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "BlazeFace model requires 2 outputs (boxes, scores), got {}",
                output_names.len()
            )));
        }

        let (boxes_idx, scores_idx) = discover_output_indices(&output_names);
        tracing::debug!(boxes_idx, scores_idx, "BlazeFace output tensor mapping");

        Ok(Self {
            session,
            boxes_idx,
            scores_idx,
        })
    }
}

impl Detector for OnnxDetector {
    fn input_size(&self) -> u32 {
        BLAZEFACE_INPUT_SIZE
    }

    fn detect(&mut self, image: &RgbImage) -> Result<RawDetections, DetectorError> {
        let input = image_to_tensor(image, BLAZEFACE_INPUT_SIZE as usize);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, boxes) = outputs[self.boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;
        let (_, scores) = outputs[self.scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;

        let boxes = boxes
            .chunks_exact(BLAZEFACE_REGRESSOR_WIDTH)
            .map(|row| [row[0], row[1], row[2], row[3]])
            .collect::<Vec<_>>();

        if boxes.len() != scores.len() {
            return Err(DetectorError::InferenceFailed(format!(
                "anchor count mismatch: {} boxes, {} scores",
                boxes.len(),
                scores.len()
            )));
        }

        Ok(RawDetections {
            boxes,
            scores: scores.to_vec(),
        })
    }
}

/// Discover which output is boxes and which is scores.
///
/// Converted BlazeFace exports usually keep the TFLite names ("regressors",
/// "classificators"). Otherwise fall back to positional ordering: 0 = boxes, 1 = scores.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let find = |needle: &str| names.iter().position(|n| n.contains(needle));

    match (find("regressor"), find("classificator")) {
        (Some(boxes), Some(scores)) => {
            tracing::info!("BlazeFace: using name-based output tensor mapping");
            (boxes, scores)
        }
        _ => {
            tracing::info!(
                ?names,
                "BlazeFace: output names not recognized, using positional mapping 0=boxes, 1=scores"
            );
            (0, 1)
        }
    }
}

/// Decode anchors whose score clears `threshold` into clamped corner-form
/// boxes in input pixels. Anchors without box data are skipped.
pub fn decode_detections(raw: &RawDetections, input_size: u32, threshold: f32) -> Vec<Detection> {
    let size = input_size as f32;

    raw.scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let [cx, cy, w, h] = *raw.boxes.get(idx)?;
            let face = FaceBox::from_center(cx * size, cy * size, w * size, h * size).clamp_to(size);
            Some(Detection { face, score })
        })
        .collect()
}

/// Non-Maximum Suppression, ranked by box area (largest first).
///
/// The sort is stable, so equal areas keep their decode order.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.face.area().total_cmp(&a.face.area()));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if detections[i].face.iou(&detections[j].face) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_det(left: f32, top: f32, right: f32, bottom: f32, score: f32) -> Detection {
        Detection {
            face: FaceBox::new(left, top, right, bottom),
            score,
        }
    }

    #[test]
    fn test_decode_single_anchor() {
        let raw = RawDetections {
            boxes: vec![[0.5, 0.5, 0.3, 0.3]],
            scores: vec![0.9],
        };
        let dets = decode_detections(&raw, 128, 0.5);
        assert_eq!(dets.len(), 1);
        let f = dets[0].face;
        assert!((f.left - 44.8).abs() < 1e-3, "left = {}", f.left);
        assert!((f.top - 44.8).abs() < 1e-3, "top = {}", f.top);
        assert!((f.right - 83.2).abs() < 1e-3, "right = {}", f.right);
        assert!((f.bottom - 83.2).abs() < 1e-3, "bottom = {}", f.bottom);

        let kept = nms(dets, DEFAULT_IOU_THRESHOLD);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_decode_drops_scores_at_or_below_threshold() {
        let raw = RawDetections {
            boxes: vec![[0.2, 0.2, 0.1, 0.1], [0.5, 0.5, 0.1, 0.1], [0.8, 0.8, 0.1, 0.1]],
            scores: vec![0.5, 0.49, 0.51],
        };
        let dets = decode_detections(&raw, 128, 0.5);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].score - 0.51).abs() < 1e-6);
    }

    #[test]
    fn test_decode_clamps_to_input() {
        let raw = RawDetections {
            boxes: vec![[0.0, 1.0, 0.4, 0.4]],
            scores: vec![0.8],
        };
        let dets = decode_detections(&raw, 128, 0.5);
        let f = dets[0].face;
        assert_eq!(f.left, 0.0);
        assert_eq!(f.bottom, 128.0);
        assert!(f.left <= f.right && f.top <= f.bottom);
    }

    #[test]
    fn test_decode_skips_missing_box_rows() {
        let raw = RawDetections {
            boxes: vec![[0.5, 0.5, 0.2, 0.2]],
            scores: vec![0.9, 0.9],
        };
        assert_eq!(decode_detections(&raw, 128, 0.5).len(), 1);
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode_detections(&RawDetections::default(), 128, 0.5).is_empty());
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_det(0.0, 0.0, 100.0, 100.0, 0.9),
            make_det(5.0, 5.0, 105.0, 105.0, 0.8),
            make_det(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_prefers_larger_box_over_higher_score() {
        let detections = vec![
            make_det(10.0, 10.0, 50.0, 50.0, 0.99),
            make_det(8.0, 8.0, 54.0, 54.0, 0.6),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 1);
        assert!((result[0].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_nms_output_sorted_by_area() {
        let detections = vec![
            make_det(0.0, 0.0, 10.0, 10.0, 0.9),
            make_det(50.0, 50.0, 90.0, 90.0, 0.8),
            make_det(100.0, 0.0, 120.0, 20.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        let areas: Vec<f32> = result.iter().map(|d| d.face.area()).collect();
        assert_eq!(areas, vec![1600.0, 400.0, 100.0]);
    }

    #[test]
    fn test_nms_no_pair_exceeds_threshold() {
        let detections: Vec<Detection> = (0..12)
            .map(|i| {
                let o = i as f32 * 7.0;
                make_det(o, o / 2.0, o + 30.0 + i as f32, o / 2.0 + 30.0, 0.6)
            })
            .collect();
        let result = nms(detections, 0.4);
        for (i, a) in result.iter().enumerate() {
            for b in &result[i + 1..] {
                assert!(a.face.iou(&b.face) <= 0.4);
            }
        }
    }

    #[test]
    fn test_nms_deterministic_ties() {
        // Equal areas: decode order must survive.
        let detections = vec![
            make_det(0.0, 0.0, 10.0, 10.0, 0.6),
            make_det(40.0, 40.0, 50.0, 50.0, 0.7),
            make_det(80.0, 80.0, 90.0, 90.0, 0.8),
        ];
        let first = nms(detections.clone(), 0.4);
        let second = nms(detections, 0.4);
        assert_eq!(first, second);
        let scores: Vec<f32> = first.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.6, 0.7, 0.8]);
    }

    #[test]
    fn test_nms_keeps_zero_area_boxes() {
        let detections = vec![
            make_det(5.0, 5.0, 5.0, 5.0, 0.9),
            make_det(5.0, 5.0, 5.0, 5.0, 0.8),
        ];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = ["classificators", "regressors"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), (1, 0));
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = ["Identity", "Identity_1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), (0, 1));
    }
}

use doorman_core::{PipelineConfig, StabilizerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "blaze_face_short_range.onnx";
pub const EMBEDDER_MODEL_FILE: &str = "facenet.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory the frame source replays images from.
    pub frame_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity a gallery entry must exceed to match.
    pub similarity_threshold: f32,
    pub detection_threshold: f32,
    pub iou_threshold: f32,
    /// Padding added around the face before embedding, as a fraction of its size.
    pub crop_margin: f32,
    /// Consecutive identical labels needed to confirm a decision.
    pub required_consecutive: usize,
    /// Consecutive face-less frames before the "no face" alert.
    pub max_no_face_frames: u32,
    pub tick_interval_ms: u64,
}

/// On-disk TOML overrides. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    frame_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    detection_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    crop_margin: Option<f32>,
    required_consecutive: Option<usize>,
    max_no_face_frames: Option<u32>,
    tick_interval_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        let pipeline = PipelineConfig::default();
        Self {
            frame_dir: data_dir.join("frames"),
            model_dir: PathBuf::from("/usr/share/doorman/models"),
            db_path: data_dir.join("faces.db"),
            similarity_threshold: pipeline.similarity_threshold,
            detection_threshold: pipeline.score_threshold,
            iou_threshold: pipeline.iou_threshold,
            crop_margin: pipeline.crop_margin,
            required_consecutive: pipeline.stabilizer.required_consecutive,
            max_no_face_frames: pipeline.stabilizer.max_no_face_frames,
            tick_interval_ms: 100,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file named by `DOORMAN_CONFIG` (if set), then
    /// `DOORMAN_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("DOORMAN_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge(file);
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(())
    }

    fn merge(&mut self, file: FileConfig) {
        if let Some(v) = file.frame_dir {
            self.frame_dir = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        self.similarity_threshold = file.similarity_threshold.unwrap_or(self.similarity_threshold);
        self.detection_threshold = file.detection_threshold.unwrap_or(self.detection_threshold);
        self.iou_threshold = file.iou_threshold.unwrap_or(self.iou_threshold);
        self.crop_margin = file.crop_margin.unwrap_or(self.crop_margin);
        self.required_consecutive = file.required_consecutive.unwrap_or(self.required_consecutive);
        self.max_no_face_frames = file.max_no_face_frames.unwrap_or(self.max_no_face_frames);
        self.tick_interval_ms = file.tick_interval_ms.unwrap_or(self.tick_interval_ms);
    }

    /// Unparseable values are ignored and the previous value kept.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DOORMAN_FRAME_DIR") {
            self.frame_dir = PathBuf::from(v);
        }
        if let Some(v) = var("DOORMAN_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("DOORMAN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.similarity_threshold = parsed(&var, "DOORMAN_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.detection_threshold = parsed(&var, "DOORMAN_DETECTION_THRESHOLD", self.detection_threshold);
        self.iou_threshold = parsed(&var, "DOORMAN_IOU_THRESHOLD", self.iou_threshold);
        self.crop_margin = parsed(&var, "DOORMAN_CROP_MARGIN", self.crop_margin);
        self.required_consecutive = parsed(&var, "DOORMAN_REQUIRED_CONSECUTIVE", self.required_consecutive);
        self.max_no_face_frames = parsed(&var, "DOORMAN_MAX_NO_FACE_FRAMES", self.max_no_face_frames);
        self.tick_interval_ms = parsed(&var, "DOORMAN_TICK_INTERVAL_MS", self.tick_interval_ms);
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(EMBEDDER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            score_threshold: self.detection_threshold,
            iou_threshold: self.iou_threshold,
            crop_margin: self.crop_margin,
            similarity_threshold: self.similarity_threshold,
            stabilizer: StabilizerConfig {
                required_consecutive: self.required_consecutive.max(1),
                max_no_face_frames: self.max_no_face_frames.max(1),
            },
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorman")
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match var(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable config value");
                current
            }
        },
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_pipeline_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline_config(), PipelineConfig::default());
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert!(config.db_path.ends_with("doorman/faces.db"));
    }

    #[test]
    fn test_model_paths() {
        let mut config = Config::default();
        config.model_dir = PathBuf::from("/opt/models");
        assert_eq!(config.detector_model_path(), "/opt/models/blaze_face_short_range.onnx");
        assert_eq!(config.embedder_model_path(), "/opt/models/facenet.onnx");
    }

    #[test]
    fn test_file_overrides_subset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doorman.toml");
        std::fs::write(&path, "similarity_threshold = 0.8\nframe_dir = \"/srv/frames\"\n").unwrap();

        let mut config = Config::default();
        config.apply_file(&path).unwrap();
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.frame_dir, PathBuf::from("/srv/frames"));
        assert_eq!(config.iou_threshold, 0.4);
    }

    #[test]
    fn test_file_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doorman.toml");
        std::fs::write(&path, "camera_device = \"/dev/video0\"\n").unwrap();
        let err = Config::default().apply_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Config::default()
            .apply_file(Path::new("/nonexistent/doorman.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.merge(FileConfig {
            required_consecutive: Some(5),
            tick_interval_ms: Some(250),
            ..Default::default()
        });
        config.apply_env(env(&[
            ("DOORMAN_REQUIRED_CONSECUTIVE", "4"),
            ("DOORMAN_DB_PATH", "/var/lib/doorman/faces.db"),
        ]));
        assert_eq!(config.required_consecutive, 4);
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/doorman/faces.db"));
    }

    #[test]
    fn test_unparseable_env_keeps_value() {
        let mut config = Config::default();
        config.apply_env(env(&[("DOORMAN_SIMILARITY_THRESHOLD", "high")]));
        assert_eq!(config.similarity_threshold, 0.7);
    }

    #[test]
    fn test_zero_counts_are_clamped() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("DOORMAN_REQUIRED_CONSECUTIVE", "0"),
            ("DOORMAN_MAX_NO_FACE_FRAMES", "0"),
            ("DOORMAN_TICK_INTERVAL_MS", "0"),
        ]));
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.stabilizer.required_consecutive, 1);
        assert_eq!(pipeline.stabilizer.max_no_face_frames, 1);
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }
}

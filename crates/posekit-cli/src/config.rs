use anyhow::{Context, Result};
use posekit_core::{DetectorConfig, PoseThresholds};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration: optional TOML file, then `POSEKIT_*` environment
/// overrides, then defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model file name, relative to `model_dir`.
    pub detector_model: String,
    /// ArcFace model file name, relative to `model_dir`.
    pub recognizer_model: String,
    /// Minimum detection score for a face to be considered.
    pub confidence_threshold: f32,
    pub thresholds: PoseThresholds,
    /// Capture automatically once a pose has been held for `hold_window_ms`.
    pub auto_capture: bool,
    pub hold_window_ms: u64,
    /// How long to wait for a camera frame before treating the device as gone.
    pub frame_timeout_ms: u64,
    /// Frames discarded after the stream starts (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// JSON gallery handed to the matcher after enrollment.
    pub gallery_path: Option<PathBuf>,
    /// Cosine similarity at or above which a gallery entry is reported.
    pub match_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: posekit_core::default_model_dir(),
            detector_model: "det_500m.onnx".to_string(),
            recognizer_model: "w600k_r50.onnx".to_string(),
            confidence_threshold: posekit_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            thresholds: PoseThresholds::default(),
            auto_capture: true,
            hold_window_ms: 600,
            frame_timeout_ms: 2000,
            warmup_frames: 4,
            gallery_path: None,
            match_threshold: 0.40,
        }
    }
}

impl Config {
    /// Load from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Apply `POSEKIT_*` overrides read through `lookup`. Unparseable values
    /// are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("POSEKIT_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("POSEKIT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("POSEKIT_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = lookup("POSEKIT_RECOGNIZER_MODEL") {
            self.recognizer_model = v;
        }
        if let Some(v) = lookup("POSEKIT_GALLERY_PATH") {
            self.gallery_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("POSEKIT_AUTO_CAPTURE") {
            self.auto_capture = v != "0";
        }
        self.confidence_threshold = parsed(&lookup, "POSEKIT_CONFIDENCE_THRESHOLD", self.confidence_threshold);
        self.thresholds.center_max = parsed(&lookup, "POSEKIT_CENTER_MAX", self.thresholds.center_max);
        self.thresholds.turn_min = parsed(&lookup, "POSEKIT_TURN_MIN", self.thresholds.turn_min);
        self.hold_window_ms = parsed(&lookup, "POSEKIT_HOLD_WINDOW_MS", self.hold_window_ms);
        self.frame_timeout_ms = parsed(&lookup, "POSEKIT_FRAME_TIMEOUT_MS", self.frame_timeout_ms);
        self.warmup_frames = parsed(&lookup, "POSEKIT_WARMUP_FRAMES", self.warmup_frames);
        self.match_threshold = parsed(&lookup, "POSEKIT_MATCH_THRESHOLD", self.match_threshold);
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            detector_model: model_path(&self.model_dir, &self.detector_model),
            recognizer_model: model_path(&self.model_dir, &self.recognizer_model),
            confidence_threshold: self.confidence_threshold,
        }
    }

    pub fn hold_window(&self) -> Duration {
        Duration::from_millis(self.hold_window_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

fn model_path(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.detector_model, "det_500m.onnx");
        assert_eq!(config.hold_window(), Duration::from_millis(600));
        assert_eq!(config.frame_timeout(), Duration::from_millis(2000));
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.thresholds, PoseThresholds::default());
        assert!(config.auto_capture);
        assert!(config.gallery_path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            camera_device = "/dev/video2"
            hold_window_ms = 900

            [thresholds]
            turn_min = 0.4
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.hold_window_ms, 900);
        assert_eq!(config.thresholds.turn_min, 0.4);
        assert_eq!(config.thresholds.center_max, 0.25);
        assert_eq!(config.recognizer_model, "w600k_r50.onnx");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("POSEKIT_CAMERA_DEVICE", "/dev/video4"),
            ("POSEKIT_AUTO_CAPTURE", "0"),
            ("POSEKIT_CENTER_MAX", "0.2"),
            ("POSEKIT_WARMUP_FRAMES", "10"),
            ("POSEKIT_GALLERY_PATH", "/srv/gallery.json"),
        ]));
        assert_eq!(config.camera_device, "/dev/video4");
        assert!(!config.auto_capture);
        assert_eq!(config.thresholds.center_max, 0.2);
        assert_eq!(config.warmup_frames, 10);
        assert_eq!(config.gallery_path, Some(PathBuf::from("/srv/gallery.json")));
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[("POSEKIT_HOLD_WINDOW_MS", "soon")]));
        assert_eq!(config.hold_window_ms, 600);
    }

    #[test]
    fn test_detector_config_joins_model_dir() {
        let config = Config {
            model_dir: PathBuf::from("/opt/models"),
            ..Config::default()
        };
        let detector = config.detector_config();
        assert_eq!(detector.detector_model, "/opt/models/det_500m.onnx");
        assert_eq!(detector.recognizer_model, "/opt/models/w600k_r50.onnx");
        assert_eq!(detector.confidence_threshold, 0.5);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/posekit.toml"))).is_err());
    }
}

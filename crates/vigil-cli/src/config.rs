use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vigil_core::{OrbConfig, ScrfdConfig, SessionConfig, MATCH_COUNT_THRESHOLD, RATIO_THRESHOLD};

/// CLI configuration: defaults, then an optional TOML file, then `VIGIL_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Persisted reference face used by `verify` and `compare`.
    pub reference_face: Option<PathBuf>,
    /// Write annotated frames here instead of only logging verdicts.
    pub output_dir: Option<PathBuf>,
    pub ratio_threshold: f32,
    /// A face matches when strictly more good matches than this are found.
    pub match_count_threshold: usize,
    pub detector: ScrfdConfig,
    pub orb: OrbConfig,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 4,
            model_dir: default_model_dir(),
            reference_face: None,
            output_dir: None,
            ratio_threshold: RATIO_THRESHOLD,
            match_count_threshold: MATCH_COUNT_THRESHOLD,
            detector: ScrfdConfig::default(),
            orb: OrbConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Override fields from `VIGIL_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("VIGIL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("VIGIL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VIGIL_REFERENCE_FACE") {
            self.reference_face = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VIGIL_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(v));
        }

        self.camera_width = parsed(&lookup, "VIGIL_CAMERA_WIDTH", self.camera_width);
        self.camera_height = parsed(&lookup, "VIGIL_CAMERA_HEIGHT", self.camera_height);
        self.warmup_frames = parsed(&lookup, "VIGIL_WARMUP_FRAMES", self.warmup_frames);
        self.ratio_threshold = parsed(&lookup, "VIGIL_RATIO_THRESHOLD", self.ratio_threshold);
        self.match_count_threshold =
            parsed(&lookup, "VIGIL_MATCH_COUNT_THRESHOLD", self.match_count_threshold);

        self.detector.confidence_threshold = parsed(
            &lookup,
            "VIGIL_DETECTOR_CONFIDENCE",
            self.detector.confidence_threshold,
        );
        self.detector.nms_threshold =
            parsed(&lookup, "VIGIL_DETECTOR_NMS", self.detector.nms_threshold);
        self.orb.max_features = parsed(&lookup, "VIGIL_ORB_MAX_FEATURES", self.orb.max_features);
        self.orb.fast_threshold =
            parsed(&lookup, "VIGIL_ORB_FAST_THRESHOLD", self.orb.fast_threshold);

        if let Some(v) = lookup("VIGIL_PARALLEL_REGIONS") {
            self.session.parallel_regions = v != "0";
        }
        if let Some(max) = lookup("VIGIL_MAX_FRAMES").and_then(|v| v.parse().ok()) {
            self.session.max_frames = Some(max);
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

/// `$XDG_DATA_HOME/vigil/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("vigil/models")
}

fn parsed<T: std::str::FromStr>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

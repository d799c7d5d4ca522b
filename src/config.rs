//! Tunable parameters for the recognition pipeline and the surrounding session.
//!
//! Every field has a default, so an empty or partial TOML file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LprError, Result};

/// Characters the OCR engine is allowed to emit
pub const PLATE_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LprConfig {
    pub preprocess: PreprocessConfig,
    pub detector: DetectorConfig,
    pub ocr: OcrConfig,
    pub dedup: DedupConfig,
    pub stream: StreamConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Diameter of the bilateral filter neighbourhood in pixels
    pub bilateral_diameter: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,
    /// Hysteresis thresholds of the Canny edge detector
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            bilateral_diameter: 11,
            bilateral_sigma_color: 17.0,
            bilateral_sigma_space: 17.0,
            canny_low: 30.0,
            canny_high: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// OpenCV-format Haar cascade. `None` disables the classifier strategy.
    pub cascade_path: Option<PathBuf>,
    /// Pyramid step between detection scales
    pub scale_factor: f32,
    /// Raw hits a grouped rectangle needs to be more than
    pub min_neighbors: u32,
    /// Smallest window `[width, height]` considered by the classifier
    pub min_size: Option<[u32; 2]>,
    /// How many of the largest contours the contour strategy inspects
    pub max_contours: usize,
    /// Polygon approximation tolerance as a fraction of the contour perimeter
    pub approx_epsilon_ratio: f64,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cascade_path: None,
            scale_factor: 1.1,
            min_neighbors: 4,
            min_size: None,
            max_contours: 10,
            approx_epsilon_ratio: 0.018,
            min_aspect_ratio: 2.0,
            max_aspect_ratio: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Directory holding `text-recognition.rten`.
    /// Defaults to `$HOME/.cache/ocrs`.
    pub model_dir: Option<PathBuf>,
    pub whitelist: String,
    /// Cleaned reads shorter than this are discarded
    pub min_text_len: usize,
    /// Radius of the square structuring element (1 gives 3x3)
    pub morph_radius: u8,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            whitelist: PLATE_WHITELIST.to_string(),
            min_text_len: 5,
            morph_radius: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub cooldown_secs: u64,
    /// Drop entries whose cooldown has elapsed instead of keeping every
    /// plate seen for the whole session
    pub evict_expired: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30,
            evict_expired: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Run detection on every Nth frame only
    pub sample_every: u32,
    /// Save frames with the reported plates boxed into this directory
    pub annotate_dir: Option<PathBuf>,
    /// Only frames whose 1-based number is a multiple of this are saved
    pub annotate_every: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_every: 10,
            annotate_dir: None,
            annotate_every: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: PathBuf,
    pub crops_dir: Option<PathBuf>,
    pub camera_location: String,
    /// Score attached to every stored record; the pipeline does not estimate one
    pub confidence: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("platewatch.db"),
            crops_dir: None,
            camera_location: "Main Entrance".to_string(),
            confidence: 0.8,
        }
    }
}

impl LprConfig {
    /// Load a TOML config file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LprError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| LprError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.sample_every == 0 {
            return Err(LprError::Config("stream.sample_every must be at least 1".into()));
        }
        if self.stream.annotate_every == 0 {
            return Err(LprError::Config("stream.annotate_every must be at least 1".into()));
        }
        if self.detector.min_aspect_ratio > self.detector.max_aspect_ratio {
            return Err(LprError::Config(format!(
                "detector.min_aspect_ratio ({}) exceeds max_aspect_ratio ({})",
                self.detector.min_aspect_ratio, self.detector.max_aspect_ratio
            )));
        }
        if !(self.detector.scale_factor > 1.0) {
            return Err(LprError::Config("detector.scale_factor must be greater than 1.0".into()));
        }
        if self.ocr.min_text_len == 0 {
            return Err(LprError::Config("ocr.min_text_len must be at least 1".into()));
        }
        Ok(())
    }
}

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use rten_imageproc::{RectF, RotatedRect};
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::error::{LprError, Result};

const RECOGNITION_MODEL: &str = "text-recognition.rten";

/// Anything that can turn a binarized crop into raw text
pub trait OcrBackend: Send + Sync {
    /// Recognize a single line of text. Output should only contain
    /// characters from `whitelist`, but callers clean it regardless.
    fn recognize(&self, binarized: &GrayImage, whitelist: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// OCR backend running the `ocrs` detection and recognition models
pub struct OcrsBackend {
    engine: OcrEngine,
}

impl OcrsBackend {
    /// Load the recognition model from `dir`, restricting it to `whitelist`.
    /// Crops are read as a single line, so no detection model is needed.
    pub fn load<P: AsRef<Path>>(dir: P, whitelist: &str) -> anyhow::Result<Self> {
        let recognition_model_path = dir.as_ref().join(RECOGNITION_MODEL);

        if !recognition_model_path.exists() {
            anyhow::bail!(
                "OCR recognition model not found. Please run: ocrs-cli --help (or download models manually)\n\
                 Expected location: {}",
                recognition_model_path.display()
            );
        }

        let recognition_model = Model::load_file(&recognition_model_path)?;

        let engine = OcrEngine::new(OcrEngineParams {
            recognition_model: Some(recognition_model),
            allowed_chars: Some(whitelist.to_string()),
            ..Default::default()
        })?;

        Ok(Self { engine })
    }

    /// Load models from the configured directory or the standard cache location
    pub fn from_config(config: &OcrConfig) -> anyhow::Result<Self> {
        let dir = match &config.model_dir {
            Some(dir) => dir.clone(),
            None => default_model_dir()?,
        };
        Self::load(dir, &config.whitelist)
    }
}

/// `$HOME/.cache/ocrs`, where `ocrs-cli` downloads its models
pub fn default_model_dir() -> anyhow::Result<PathBuf> {
    let home_dir = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
    Ok(Path::new(&home_dir).join(".cache/ocrs"))
}

impl OcrBackend for OcrsBackend {
    /// Reads the whole crop as one text line, skipping word detection
    fn recognize(&self, binarized: &GrayImage, whitelist: &str) -> Result<String> {
        let img = DynamicImage::ImageLuma8(binarized.clone()).to_rgb8();
        let (width, height) = img.dimensions();
        let source = ImageSource::from_bytes(img.as_raw(), img.dimensions())
            .map_err(|e| LprError::Ocr(e.to_string()))?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|e| LprError::Ocr(e.to_string()))?;

        let line = vec![RotatedRect::from_rect(RectF::from_tlhw(
            0.,
            0.,
            height as f32,
            width as f32,
        ))];
        let lines = self
            .engine
            .recognize_text(&input, &[line])
            .map_err(|e| LprError::Ocr(e.to_string()))?;
        let text: String = lines.into_iter().flatten().map(|l| l.to_string()).collect();
        Ok(text
            .chars()
            .filter(|c| whitelist.contains(c.to_ascii_uppercase()))
            .collect())
    }

    fn name(&self) -> &str {
        "ocrs"
    }
}

/// Result of reading one candidate crop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOutcome {
    Recognized(String),
    /// Nothing usable after cleaning, including reads below the minimum length
    NoText,
    /// The engine itself failed; degraded to no text by callers
    EngineFailed(String),
}

impl TextOutcome {
    /// Recognized text, or an empty string for every other outcome
    pub fn text(&self) -> &str {
        match self {
            TextOutcome::Recognized(text) => text,
            _ => "",
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            TextOutcome::Recognized(text) => Some(text),
            _ => None,
        }
    }
}

/// Keep only ASCII letters and digits, uppercased, in their original order
pub fn clean_plate_text(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Binarizes plate crops and reads them with an OCR backend
pub struct TextExtractor {
    backend: Box<dyn OcrBackend>,
    whitelist: String,
    min_text_len: usize,
    morph_radius: u8,
}

impl TextExtractor {
    pub fn new(backend: Box<dyn OcrBackend>, config: &OcrConfig) -> Self {
        Self {
            backend,
            whitelist: config.whitelist.clone(),
            min_text_len: config.min_text_len,
            morph_radius: config.morph_radius,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Otsu threshold followed by a morphological close then open
    pub fn binarize(&self, crop: &DynamicImage) -> GrayImage {
        let gray = crop.to_luma8();
        let binary = threshold(&gray, otsu_level(&gray), ThresholdType::Binary);
        if self.morph_radius == 0 {
            return binary;
        }
        let closed = close(&binary, Norm::LInf, self.morph_radius);
        open(&closed, Norm::LInf, self.morph_radius)
    }

    pub fn read(&self, crop: &DynamicImage) -> TextOutcome {
        if crop.width() == 0 || crop.height() == 0 {
            return TextOutcome::NoText;
        }
        let binarized = self.binarize(crop);
        self.read_binarized(&binarized)
    }

    /// OCR an already binarized crop and validate the cleaned result
    pub fn read_binarized(&self, binarized: &GrayImage) -> TextOutcome {
        let raw = match self.backend.recognize(binarized, &self.whitelist) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(backend = self.backend.name(), "text extraction failed: {e}");
                return TextOutcome::EngineFailed(e.to_string());
            }
        };
        let cleaned = clean_plate_text(&raw);
        if cleaned.len() >= self.min_text_len {
            TextOutcome::Recognized(cleaned)
        } else {
            debug!(raw = raw.trim(), cleaned = %cleaned, "read rejected as too short");
            TextOutcome::NoText
        }
    }

    /// Plain-string form of [`TextExtractor::read`]; empty means no text
    pub fn extract_text(&self, crop: &DynamicImage) -> String {
        self.read(crop).text().to_string()
    }
}

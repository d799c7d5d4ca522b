use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{DynamicImage, GrayImage};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::LprConfig;
use crate::dedup::DedupTracker;
use crate::detection::CandidateDetector;
use crate::detection::ocr::{OcrBackend, TextExtractor, TextOutcome};
use crate::detection::preprocessing::{ImagePreprocessor, Preprocessed};
use crate::error::LprError;
use crate::models::{CandidateRegion, Detection};

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

impl DebugConfig {
    fn frame_dir(&self, frame: u64) -> PathBuf {
        self.output_dir.join(format!("{:04}", frame))
    }

    /// Write one intermediate image. Failures are logged, never fatal.
    fn save(&self, frame: u64, name: &str, image: &DynamicImage) {
        let dir = self.frame_dir(frame);
        let path = dir.join(format!("{name}.png"));
        let result = std::fs::create_dir_all(&dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| image.save(&path).map_err(anyhow::Error::from));
        match result {
            Ok(()) => debug!("Debug: saved {}", path.display()),
            Err(e) => warn!("Failed to save debug image {}: {e}", path.display()),
        }
    }
}

/// Per-frame recognition: preprocess, find candidates, read them, drop
/// duplicates. Owns the dedup state for the whole session.
pub struct PlatePipeline {
    preprocessor: ImagePreprocessor,
    detector: CandidateDetector,
    extractor: TextExtractor,
    tracker: DedupTracker,
    debug: Option<DebugConfig>,
    frames_processed: u64,
}

impl PlatePipeline {
    pub fn new(
        preprocessor: ImagePreprocessor,
        detector: CandidateDetector,
        extractor: TextExtractor,
        tracker: DedupTracker,
    ) -> Self {
        Self {
            preprocessor,
            detector,
            extractor,
            tracker,
            debug: None,
            frames_processed: 0,
        }
    }

    /// Standard composition: classifier with contour fallback
    pub fn from_config(config: &LprConfig, backend: Box<dyn OcrBackend>) -> Self {
        Self::new(
            ImagePreprocessor::new(config.preprocess.clone()),
            CandidateDetector::from_config(&config.detector),
            TextExtractor::new(backend, &config.ocr),
            DedupTracker::from_config(&config.dedup),
        )
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    pub fn debug_dir(&self) -> Option<&Path> {
        self.debug.as_ref().map(|d| d.output_dir.as_path())
    }

    pub fn tracker(&self) -> &DedupTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut DedupTracker {
        &mut self.tracker
    }

    pub fn detector(&self) -> &CandidateDetector {
        &self.detector
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Detections of one frame, with duplicates inside the cooldown window
    /// removed. An empty result means no plate was found; only unusable
    /// input is an error.
    pub fn process(
        &mut self,
        image: &DynamicImage,
        now: OffsetDateTime,
    ) -> std::result::Result<Vec<Detection>, LprError> {
        validate_input(image)?;
        self.frames_processed += 1;
        let frame = self.frames_processed;

        self.tracker.evict_expired(now);
        let detections = self.detect_frame(image, Some(frame));

        let total = detections.len();
        let emitted: Vec<Detection> = detections
            .into_iter()
            .filter(|d| self.tracker.try_emit(&d.text, now))
            .collect();

        if total > 0 {
            info!(
                frame,
                detections = total,
                emitted = emitted.len(),
                "frame processed"
            );
        }
        Ok(emitted)
    }

    /// All readable plates in `image`, without consulting the dedup state
    pub fn detect(&self, image: &DynamicImage) -> std::result::Result<Vec<Detection>, LprError> {
        validate_input(image)?;
        Ok(self.detect_frame(image, None))
    }

    pub fn preprocess(&self, image: &DynamicImage) -> Preprocessed {
        self.preprocessor.preprocess(image)
    }

    pub fn find_candidates(&self, image: &DynamicImage) -> Vec<CandidateRegion> {
        self.detector.find_candidates(&self.preprocess(image))
    }

    fn detect_frame(&self, image: &DynamicImage, frame: Option<u64>) -> Vec<Detection> {
        let debug = frame.and_then(|f| self.debug.as_ref().map(|d| (f, d)));
        if let Some((f, d)) = debug {
            d.save(f, "00_input", image);
        }

        let preprocessed = self.preprocessor.preprocess(image);
        if let Some((f, d)) = debug {
            d.save(f, "01_grayscale", &gray_to_dynamic(&preprocessed.gray));
            d.save(f, "02_edges", &gray_to_dynamic(&preprocessed.edges));
        }

        let candidates = self.detector.find_candidates(&preprocessed);
        if candidates.is_empty() {
            debug!("no plate candidates found");
            return Vec::new();
        }

        let mut detections = Vec::new();
        for (i, bbox) in candidates.into_iter().enumerate() {
            let Some(crop) = bbox.extract_roi(image) else {
                debug!(?bbox, "candidate outside image bounds");
                continue;
            };
            let binarized = self.extractor.binarize(&crop);
            if let Some((f, d)) = debug {
                d.save(f, &format!("03_candidate_{:02}", i + 1), &crop);
                d.save(f, &format!("04_binarized_{:02}", i + 1), &gray_to_dynamic(&binarized));
            }

            match self.extractor.read_binarized(&binarized) {
                TextOutcome::Recognized(text) => {
                    debug!(text = %text, ?bbox, "plate read");
                    detections.push(Detection {
                        text,
                        bbox,
                        source_image: crop,
                    });
                }
                TextOutcome::NoText | TextOutcome::EngineFailed(_) => {}
            }
        }
        detections
    }
}

fn validate_input(image: &DynamicImage) -> std::result::Result<(), LprError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(LprError::InvalidInput(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

fn gray_to_dynamic(img: &GrayImage) -> DynamicImage {
    DynamicImage::ImageLuma8(img.clone())
}

/// Chooses which frames of a live stream are run through detection
#[derive(Debug, Clone)]
pub struct FrameSampler {
    every: u32,
    seen: u64,
}

impl FrameSampler {
    /// `every` of 0 is treated as 1
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
        }
    }

    /// Count one incoming frame; true if it should be processed
    pub fn tick(&mut self) -> bool {
        self.seen += 1;
        self.seen % self.every as u64 == 0
    }

    pub fn frames_seen(&self) -> u64 {
        self.seen
    }
}

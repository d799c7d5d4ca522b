use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use platewatch::config::LprConfig;
use platewatch::core::db::PlateDb;
use platewatch::error::{LprError, Result};
use platewatch::{
    CandidateDetector, DedupTracker, ImagePreprocessor, OcrBackend, PlatePipeline, TextExtractor,
};
use time::OffsetDateTime;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Plate outline used by [`plate_image`]: (x, y, width, height)
pub const PLATE_RECT: (u32, u32, u32, u32) = (60, 75, 200, 50);

/// OCR stand-in that answers every call with the same script
#[derive(Clone)]
pub struct ScriptedOcr {
    response: std::result::Result<String, String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedOcr {
    pub fn reading(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `recognize` calls, usable after the backend is boxed
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl OcrBackend for ScriptedOcr {
    fn recognize(&self, _binarized: &GrayImage, _whitelist: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone().map_err(LprError::Ocr)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// White canvas of the given size
pub fn blank_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, WHITE))
}

/// A filled black rectangle on white
pub fn filled_rect_image(width: u32, height: u32, x: i32, y: i32, w: u32, h: u32) -> DynamicImage {
    let mut img = RgbImage::from_pixel(width, height, WHITE);
    draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), BLACK);
    DynamicImage::ImageRgb8(img)
}

/// Synthetic high-contrast plate: a thick black frame on a white background
/// with six dark glyph blocks inside, standing in for "ABC123"
pub fn plate_image() -> DynamicImage {
    let (px, py, pw, ph) = PLATE_RECT;
    let mut img = RgbImage::from_pixel(320, 200, WHITE);
    draw_filled_rect_mut(&mut img, Rect::at(px as i32, py as i32).of_size(pw, ph), BLACK);
    draw_filled_rect_mut(
        &mut img,
        Rect::at(px as i32 + 4, py as i32 + 4).of_size(pw - 8, ph - 8),
        WHITE,
    );
    for i in 0..6 {
        let x = px as i32 + 16 + i * 30;
        draw_filled_rect_mut(&mut img, Rect::at(x, py as i32 + 12).of_size(18, 26), BLACK);
    }
    DynamicImage::ImageRgb8(img)
}

/// Default configuration with no classifier model
pub fn test_config() -> LprConfig {
    LprConfig::default()
}

/// Pipeline with the classifier strategy disabled and a scripted OCR
pub fn contour_pipeline(ocr: ScriptedOcr) -> PlatePipeline {
    let config = test_config();
    PlatePipeline::new(
        ImagePreprocessor::new(config.preprocess.clone()),
        CandidateDetector::from_config(&config.detector),
        TextExtractor::new(Box::new(ocr), &config.ocr),
        DedupTracker::from_config(&config.dedup),
    )
}

pub fn at_secs(secs: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(secs)
}

/// Creates a PlateDb inside a temporary directory.
/// Returns both the database and the directory (which must be kept alive).
pub async fn create_test_db() -> (PlateDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let db = PlateDb::open(dir.path().join("plates.db"))
        .await
        .expect("Failed to create test database");
    (db, dir)
}

/// One weak classifier on a 4x4 window: a two-rectangle feature comparing
/// the right half against the left half, split at `threshold`.
pub fn cascade_xml(leaves: [f32; 2], stage_threshold: f32, threshold: f32) -> String {
    format!(
        r#"<?xml version="1.0"?>
<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>4</height>
  <width>4</width>
  <stageParams>
    <boostType>GAB</boostType>
    <maxDepth>1</maxDepth>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>{stage_threshold}</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 {threshold}</internalNodes>
          <leafValues>
            {} {}</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 2 4 -1.</_>
        <_>
          2 0 2 4 1.</_></rects></_></features></cascade>
</opencv_storage>
"#,
        leaves[0], leaves[1]
    )
}

/// Fires only where the right half of the window is brighter than the left
pub fn edge_cascade_xml() -> String {
    cascade_xml([0.0, 1.0], 0.5, 1.0)
}

/// Accepts every window
pub fn accept_all_cascade_xml() -> String {
    cascade_xml([0.0, 0.0], -1.0, 1.0)
}

/// 4x4 image, black on the left half and white on the right
pub fn split_image(left: u8, right: u8) -> GrayImage {
    GrayImage::from_fn(4, 4, |x, _| {
        if x < 2 {
            image::Luma([left])
        } else {
            image::Luma([right])
        }
    })
}

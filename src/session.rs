//! One processing run: a pipeline (and so one dedup state), an optional
//! record store and an optional directory for plate crops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use image::{DynamicImage, ImageReader, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{StorageConfig, StreamConfig};
use crate::core::db::{NewPlateRecord, PlateRepository};
use crate::models::{CandidateRegion, Detection};
use crate::pipeline::{FrameSampler, PlatePipeline};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Extensions picked up when scanning a folder
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "tiff"];

/// A detection that made it through dedup (and into the store, if any)
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub plate_number: String,
    pub timestamp: OffsetDateTime,
    pub record_id: Option<i64>,
    pub bbox: CandidateRegion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub frames_skipped_unreadable: u64,
    pub plates_emitted: usize,
    pub frames_annotated: u64,
    pub cancelled: bool,
}

type Clock = Box<dyn Fn() -> OffsetDateTime + Send + Sync>;

pub struct LprSession<R> {
    pipeline: PlatePipeline,
    store: Option<R>,
    storage: StorageConfig,
    sample_every: u32,
    annotate: Option<(PathBuf, u32)>,
    clock: Clock,
}

impl<R: PlateRepository> LprSession<R> {
    pub fn new(pipeline: PlatePipeline, store: Option<R>, storage: StorageConfig, stream: &StreamConfig) -> Self {
        Self {
            pipeline,
            store,
            storage,
            sample_every: stream.sample_every,
            annotate: stream
                .annotate_dir
                .clone()
                .map(|dir| (dir, stream.annotate_every.max(1))),
            clock: Box::new(OffsetDateTime::now_utc),
        }
    }

    /// Replace the wall clock, e.g. with a simulated one
    pub fn with_clock(mut self, clock: impl Fn() -> OffsetDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn pipeline(&self) -> &PlatePipeline {
        &self.pipeline
    }

    pub fn store(&self) -> Option<&R> {
        self.store.as_ref()
    }

    /// Load and process one image file. An unreadable file is logged and
    /// yields no results.
    pub async fn process_image_file<P: AsRef<Path>>(&mut self, path: P) -> Vec<SessionResult> {
        let path = path.as_ref();
        let img = match load_image(path) {
            Ok(img) => img,
            Err(e) => {
                warn!("Could not read image {}: {e:#}", path.display());
                return Vec::new();
            }
        };
        self.process_image(&img, Some(path)).await
    }

    /// Run the pipeline on an already loaded image and store what it emits
    pub async fn process_image(&mut self, img: &DynamicImage, source: Option<&Path>) -> Vec<SessionResult> {
        let now = (self.clock)();
        let detections = match self.pipeline.process(img, now) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Skipping frame: {e}");
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for detection in detections {
            if let Some(result) = self.emit(detection, source, now).await {
                results.push(result);
            }
        }
        results
    }

    /// Process every image in `dir` (non-recursive, sorted by name).
    /// Returns the number of plates emitted.
    pub async fn process_folder<P: AsRef<Path>>(&mut self, dir: P) -> anyhow::Result<usize> {
        let files = list_images(dir.as_ref())?;
        info!("Found {} images to process", files.len());

        let mut total = 0;
        for file in files {
            info!("Processing: {}", file.display());
            total += self.process_image_file(&file).await.len();
        }
        info!("Processing complete. Total plates detected: {total}");
        Ok(total)
    }

    /// Consume a live sequence of frames. `None` stands for a frame the
    /// source failed to deliver. Only every Nth frame is processed, and
    /// `stop` is only looked at between frames. With an annotation directory
    /// configured, processed frames numbered a multiple of `annotate_every`
    /// are saved with their reported plates boxed.
    pub async fn process_frames<I>(&mut self, frames: I, stop: &AtomicBool) -> StreamSummary
    where
        I: IntoIterator<Item = Option<DynamicImage>>,
    {
        let mut sampler = FrameSampler::new(self.sample_every);
        let mut summary = StreamSummary::default();

        for frame in frames {
            if stop.load(Ordering::SeqCst) {
                summary.cancelled = true;
                break;
            }
            if !sampler.tick() {
                continue;
            }
            let Some(frame) = frame else {
                summary.frames_skipped_unreadable += 1;
                continue;
            };
            summary.frames_processed += 1;
            let results = self.process_image(&frame, None).await;
            for r in &results {
                info!("Live detection: {}", r.plate_number);
            }
            summary.plates_emitted += results.len();

            if let Some((dir, every)) = &self.annotate {
                let number = sampler.frames_seen();
                if number % u64::from(*every) == 0 {
                    match save_annotated(dir, number, &frame, &results) {
                        Ok(path) => {
                            debug!("Saved annotated frame {}", path.display());
                            summary.frames_annotated += 1;
                        }
                        Err(e) => warn!("Failed to save annotated frame: {e:#}"),
                    }
                }
            }
        }
        summary.frames_seen = sampler.frames_seen();
        summary
    }

    async fn emit(&self, detection: Detection, source: Option<&Path>, now: OffsetDateTime) -> Option<SessionResult> {
        let Some(store) = &self.store else {
            return Some(SessionResult {
                plate_number: detection.text,
                timestamp: now,
                record_id: None,
                bbox: detection.bbox,
            });
        };

        let image_path = match &self.storage.crops_dir {
            Some(dir) => match save_crop(dir, &detection.source_image) {
                Ok(path) => Some(path.display().to_string()),
                Err(e) => {
                    warn!("Failed to save plate crop: {e:#}");
                    None
                }
            },
            None => source.map(|p| p.display().to_string()),
        };

        let record = NewPlateRecord {
            plate_number: detection.text.clone(),
            confidence_score: Some(self.storage.confidence),
            image_path,
            camera_location: Some(self.storage.camera_location.clone()),
            recorded_at: Some(now),
        };
        match store.insert_plate_record(&record).await {
            Ok(record_id) => {
                info!(record_id, "Detected and stored: {}", detection.text);
                Some(SessionResult {
                    plate_number: detection.text,
                    timestamp: now,
                    record_id: Some(record_id),
                    bbox: detection.bbox,
                })
            }
            Err(e) => {
                error!("Failed to store plate {}: {e:#}", detection.text);
                None
            }
        }
    }
}

pub fn load_image(path: &Path) -> anyhow::Result<DynamicImage> {
    let img = ImageReader::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;
    Ok(img)
}

/// Image files directly inside `dir`, sorted by file name
pub fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Folder {} does not exist", dir.display());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read folder {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    files.sort();
    Ok(files)
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

fn save_crop(dir: &Path, crop: &DynamicImage) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create crops directory {}", dir.display()))?;
    let path = dir.join(format!("{}.png", Uuid::new_v4()));
    crop.save(&path)
        .with_context(|| format!("Failed to save crop {}", path.display()))?;
    Ok(path)
}

fn save_annotated(dir: &Path, number: u64, frame: &DynamicImage, results: &[SessionResult]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create annotation directory {}", dir.display()))?;
    let mut canvas = frame.to_rgb8();
    for r in results {
        let rect = Rect::at(r.bbox.x as i32, r.bbox.y as i32).of_size(r.bbox.width.max(1), r.bbox.height.max(1));
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
    }
    let path = dir.join(format!("frame_{number:06}.png"));
    canvas
        .save(&path)
        .with_context(|| format!("Failed to save annotated frame {}", path.display()))?;
    Ok(path)
}

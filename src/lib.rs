pub mod config;
pub mod core;
pub mod dedup;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod session;

pub use config::LprConfig;
pub use dedup::DedupTracker;
pub use detection::CandidateDetector;
pub use detection::cascade::{ClassifierDetector, ClassifierStatus, HaarCascade};
pub use detection::contours::ContourDetector;
pub use detection::ocr::{OcrBackend, OcrsBackend, TextExtractor, TextOutcome};
pub use detection::preprocessing::{ImagePreprocessor, Preprocessed};
pub use error::LprError;
pub use models::{CandidateRegion, Detection};
pub use pipeline::{FrameSampler, PlatePipeline};
pub use session::{LprSession, SessionResult, StreamSummary};

use image::{DynamicImage, GrayImage};
use imageproc::edges::canny;
use imageproc::filter::bilateral_filter;

use crate::config::PreprocessConfig;

/// Derived forms of one frame shared by the detection strategies
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Smoothed single-channel image
    pub gray: GrayImage,
    /// Binary edge map (255 on edges)
    pub edges: GrayImage,
}

#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn preprocess(&self, img: &DynamicImage) -> Preprocessed {
        let gray = to_grayscale(img);
        if gray.is_empty() {
            return Preprocessed {
                edges: gray.clone(),
                gray,
            };
        }
        let gray = bilateral_filter(
            &gray,
            self.config.bilateral_diameter,
            self.config.bilateral_sigma_color,
            self.config.bilateral_sigma_space,
        );
        let edges = detect_edges(&gray, self.config.canny_low, self.config.canny_high);
        Preprocessed { gray, edges }
    }
}

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Detect edges using Canny edge detector
pub fn detect_edges(img: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    canny(img, low_threshold, high_threshold)
}

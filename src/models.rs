use image::DynamicImage;

/// Axis-aligned box in source-image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CandidateRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a region from inclusive pixel extents
    pub fn from_extents(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        }
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    /// Clip the region so it lies inside a `width` x `height` image.
    /// Returns `None` if nothing of it remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, w, h))
    }

    /// Crop this region out of `img`
    pub fn extract_roi(&self, img: &DynamicImage) -> Option<DynamicImage> {
        let clamped = self.clamp_to(img.width(), img.height())?;
        Some(img.crop_imm(clamped.x, clamped.y, clamped.width, clamped.height))
    }

    pub fn as_tuple(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }
}

/// A plate read that survived text validation
#[derive(Debug, Clone)]
pub struct Detection {
    /// Uppercase alphanumeric, at least the configured minimum length
    pub text: String,
    pub bbox: CandidateRegion,
    /// Pixels of `bbox` cut from the source frame
    pub source_image: DynamicImage,
}

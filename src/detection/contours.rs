use image::GrayImage;
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::geometry::{approximate_polygon_dp, arc_length, contour_area};
use imageproc::point::Point;
use tracing::trace;

use crate::config::DetectorConfig;
use crate::detection::CandidateStrategy;
use crate::detection::preprocessing::Preprocessed;
use crate::models::CandidateRegion;

/// Finds plate-shaped quadrilaterals among the outermost edge contours
#[derive(Debug, Clone)]
pub struct ContourDetector {
    pub max_contours: usize,
    pub epsilon_ratio: f64,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
}

impl ContourDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            max_contours: config.max_contours,
            epsilon_ratio: config.approx_epsilon_ratio,
            min_aspect_ratio: config.min_aspect_ratio,
            max_aspect_ratio: config.max_aspect_ratio,
        }
    }

    pub fn detect(&self, edges: &GrayImage) -> Vec<CandidateRegion> {
        let mut contours = external_contours(edges);
        contours.sort_by(|a, b| contour_area(&b.points).total_cmp(&contour_area(&a.points)));
        contours.truncate(self.max_contours);

        contours
            .iter()
            .filter_map(|contour| {
                let corners = self.approximate(&contour.points);
                if corners.len() != 4 {
                    return None;
                }
                let bbox = bounding_box(&corners)?;
                let aspect = bbox.aspect_ratio();
                trace!(?bbox, aspect, "quadrilateral contour");
                self.is_plate_shaped(aspect).then_some(bbox)
            })
            .collect()
    }

    pub fn is_plate_shaped(&self, aspect_ratio: f32) -> bool {
        aspect_ratio >= self.min_aspect_ratio && aspect_ratio <= self.max_aspect_ratio
    }

    fn approximate(&self, points: &[Point<i32>]) -> Vec<Point<i32>> {
        if points.len() < 3 {
            return points.to_vec();
        }
        let epsilon = self.epsilon_ratio * arc_length(points, true);
        let mut approx = approximate_polygon_dp(points, epsilon, true);
        // A closed approximation may repeat its first vertex
        if approx.len() > 1 && approx.first() == approx.last() {
            approx.pop();
        }
        approx
    }
}

impl Default for ContourDetector {
    fn default() -> Self {
        Self::new(&DetectorConfig::default())
    }
}

impl CandidateStrategy for ContourDetector {
    fn find_candidates(&self, preprocessed: &Preprocessed) -> Vec<CandidateRegion> {
        self.detect(&preprocessed.edges)
    }

    fn name(&self) -> &str {
        "Contour"
    }
}

/// Outer borders that are not nested inside any other border
pub fn external_contours(edges: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .collect()
}

/// Inclusive pixel bounds of a point set
pub fn bounding_box(points: &[Point<i32>]) -> Option<CandidateRegion> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    if min_x < 0 || min_y < 0 {
        return None;
    }
    Some(CandidateRegion::from_extents(
        min_x as u32,
        min_y as u32,
        max_x as u32,
        max_y as u32,
    ))
}

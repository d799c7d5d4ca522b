//! Boosted Haar cascade classifier in the OpenCV `<cascade>` XML layout.
//!
//! Detection runs over an image pyramid: each level is scaled down by
//! `scale_factor`, integral images are built once per level and the trained
//! window slides across it. Raw hits are merged with the same neighbour
//! grouping OpenCV applies, so `min_neighbors` has the familiar meaning.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, integral_squared_image};
use roxmltree::{Document, Node};
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::detection::CandidateStrategy;
use crate::detection::preprocessing::Preprocessed;
use crate::error::{LprError, Result};
use crate::models::CandidateRegion;

/// Relative size difference under which two raw hits count as neighbours
const GROUP_EPS: f32 = 0.2;

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    /// Child index when positive, negated leaf index otherwise
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// A trained cascade loaded from disk
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

/// Integral images of one pyramid level
struct LevelIntegrals {
    sum: Image<Luma<u64>>,
    squared: Image<Luma<u64>>,
}

impl LevelIntegrals {
    fn new(img: &GrayImage) -> Self {
        Self {
            sum: integral_image::<_, u64>(img),
            squared: integral_squared_image::<_, u64>(img),
        }
    }

    fn rect_sum(integral: &Image<Luma<u64>>, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let a = integral.get_pixel(x, y)[0];
        let b = integral.get_pixel(x + w, y)[0];
        let c = integral.get_pixel(x, y + h)[0];
        let d = integral.get_pixel(x + w, y + h)[0];
        (d + a) as f64 - (b + c) as f64
    }
}

impl HaarCascade {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| LprError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&xml).map_err(|reason| LprError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse the XML text of a cascade
    pub fn parse(xml: &str) -> std::result::Result<Self, String> {
        let doc = Document::parse(xml).map_err(|e| format!("XML parse error: {e}"))?;
        let root = doc.root_element();
        if root.descendants().any(|n| n.has_tag_name("trees")) {
            return Err("legacy haar cascade layout is not supported".into());
        }

        let cascade = root
            .children()
            .filter(Node::is_element)
            .find(|n| child(*n, "stages").is_some())
            .ok_or_else(|| "no <stages> element found".to_string())?;

        let stage_type = child_text(cascade, "stageType").unwrap_or("BOOST");
        if stage_type != "BOOST" {
            return Err(format!("unsupported stage type {stage_type}"));
        }
        let feature_type = child_text(cascade, "featureType").unwrap_or("HAAR");
        if !feature_type.eq_ignore_ascii_case("HAAR") {
            return Err(format!("unsupported feature type {feature_type}"));
        }
        let max_cat_count = child(cascade, "featureParams")
            .and_then(|p| child_text(p, "maxCatCount"))
            .map(parse_number::<u32>)
            .transpose()?
            .unwrap_or(0);
        if max_cat_count > 0 {
            return Err("categorical weak classifiers are not supported".into());
        }

        let window_width = parse_number::<u32>(required_text(cascade, "width")?)?;
        let window_height = parse_number::<u32>(required_text(cascade, "height")?)?;
        if window_width < 3 || window_height < 3 {
            return Err(format!("window {window_width}x{window_height} is too small"));
        }

        let stages = items(required(cascade, "stages")?)
            .map(parse_stage)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let features = items(required(cascade, "features")?)
            .map(parse_feature)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err("cascade has no stages".into());
        }
        for stage in &stages {
            for weak in &stage.classifiers {
                for node in &weak.nodes {
                    if node.feature >= features.len() {
                        return Err(format!("feature index {} out of range", node.feature));
                    }
                }
            }
        }
        for feature in &features {
            for r in &feature.rects {
                let right = r.x.checked_add(r.width);
                let bottom = r.y.checked_add(r.height);
                let inside = matches!(
                    (right, bottom),
                    (Some(right), Some(bottom)) if right <= window_width && bottom <= window_height
                );
                if !inside {
                    return Err("feature rectangle exceeds the detection window".into());
                }
            }
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Multi-scale sliding window detection with neighbour grouping
    pub fn detect_multi_scale(
        &self,
        gray: &GrayImage,
        scale_factor: f32,
        min_neighbors: u32,
        min_size: Option<(u32, u32)>,
    ) -> Vec<CandidateRegion> {
        if !(scale_factor > 1.0) {
            warn!(scale_factor, "cascade scan skipped, scale factor must be greater than 1.0");
            return Vec::new();
        }
        let (img_w, img_h) = gray.dimensions();
        let (min_w, min_h) = min_size.unwrap_or((0, 0));
        let mut hits = Vec::new();
        let mut factor = 1.0f32;

        loop {
            let scaled_w = (img_w as f32 / factor).round() as u32;
            let scaled_h = (img_h as f32 / factor).round() as u32;
            if scaled_w < self.window_width || scaled_h < self.window_height {
                break;
            }
            let win_w = (self.window_width as f32 * factor).round() as u32;
            let win_h = (self.window_height as f32 * factor).round() as u32;

            if win_w >= min_w && win_h >= min_h {
                let level = if scaled_w == img_w && scaled_h == img_h {
                    gray.clone()
                } else {
                    imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
                };
                let integrals = LevelIntegrals::new(&level);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=scaled_h - self.window_height).step_by(step) {
                    for x in (0..=scaled_w - self.window_width).step_by(step) {
                        if self.classify(&integrals, x, y) {
                            let region = CandidateRegion::new(
                                (x as f32 * factor).round() as u32,
                                (y as f32 * factor).round() as u32,
                                win_w,
                                win_h,
                            );
                            if let Some(region) = region.clamp_to(img_w, img_h) {
                                hits.push(region);
                            }
                        }
                    }
                }
            }
            factor *= scale_factor;
        }

        debug!(raw_hits = hits.len(), "cascade scan finished");
        group_rectangles(&hits, min_neighbors, GROUP_EPS)
    }

    /// Run every stage on the window whose top-left corner is (x, y)
    fn classify(&self, integrals: &LevelIntegrals, x: u32, y: u32) -> bool {
        let inner_w = self.window_width - 2;
        let inner_h = self.window_height - 2;
        let area = (inner_w * inner_h) as f64;
        let sum = LevelIntegrals::rect_sum(&integrals.sum, x + 1, y + 1, inner_w, inner_h);
        let sq_sum = LevelIntegrals::rect_sum(&integrals.squared, x + 1, y + 1, inner_w, inner_h);
        let spread = area * sq_sum - sum * sum;
        let norm = if spread > 0.0 { 1.0 / spread.sqrt() } else { 1.0 };

        self.stages.iter().all(|stage| {
            let score: f32 = stage
                .classifiers
                .iter()
                .map(|weak| self.weak_response(weak, integrals, x, y, norm))
                .sum();
            score >= stage.threshold
        })
    }

    fn weak_response(
        &self,
        weak: &WeakClassifier,
        integrals: &LevelIntegrals,
        x: u32,
        y: u32,
        norm: f64,
    ) -> f32 {
        let mut idx = 0usize;
        loop {
            let node = weak.nodes[idx];
            let value = self.feature_value(node.feature, integrals, x, y) * norm;
            let next = if value < node.threshold as f64 {
                node.left
            } else {
                node.right
            };
            if next <= 0 {
                return weak.leaves.get((-next) as usize).copied().unwrap_or(0.0);
            }
            idx = next as usize;
        }
    }

    fn feature_value(&self, feature: usize, integrals: &LevelIntegrals, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| {
                r.weight as f64
                    * LevelIntegrals::rect_sum(&integrals.sum, x + r.x, y + r.y, r.width, r.height)
            })
            .sum()
    }
}

/// Cluster similar rectangles and average each cluster. Clusters with no
/// more than `group_threshold` members are dropped, as are clusters lying
/// inside a better-supported one.
pub fn group_rectangles(
    rects: &[CandidateRegion],
    group_threshold: u32,
    eps: f32,
) -> Vec<CandidateRegion> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let labels = partition(rects, eps);
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![(0u64, 0u64, 0u64, 0u64); classes];
    let mut counts = vec![0u32; classes];
    for (rect, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s.0 += rect.x as u64;
        s.1 += rect.y as u64;
        s.2 += rect.width as u64;
        s.3 += rect.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<CandidateRegion> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let n = n as f64;
            CandidateRegion::new(
                (s.0 as f64 / n).round() as u32,
                (s.1 as f64 / n).round() as u32,
                (s.2 as f64 / n).round() as u32,
                (s.3 as f64 / n).round() as u32,
            )
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }
        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f32 * eps).round() as i64;
            let dy = (r2.height as f32 * eps).round() as i64;
            let inside = r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && (r1.x + r1.width) as i64 <= (r2.x + r2.width) as i64 + dx
                && (r1.y + r1.height) as i64 <= (r2.y + r2.height) as i64 + dy;
            inside && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            grouped.push(*r1);
        }
    }
    grouped
}

fn similar(a: &CandidateRegion, b: &CandidateRegion, eps: f32) -> bool {
    let delta =
        eps as f64 * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Equivalence classes of the similarity relation, labelled 0..n
fn partition(rects: &[CandidateRegion], eps: f32) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut label_of_root = vec![usize::MAX; rects.len()];
    let mut next = 0;
    (0..rects.len())
        .map(|i| {
            let root = find(&mut parent, i);
            if label_of_root[root] == usize::MAX {
                label_of_root[root] = next;
                next += 1;
            }
            label_of_root[root]
        })
        .collect()
}

/// Outcome of loading the classifier model once at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierStatus {
    Enabled,
    Disabled { reason: String },
}

/// Candidate strategy backed by a Haar cascade
#[derive(Debug, Clone)]
pub struct ClassifierDetector {
    cascade: Option<HaarCascade>,
    status: ClassifierStatus,
    scale_factor: f32,
    min_neighbors: u32,
    min_size: Option<(u32, u32)>,
}

impl ClassifierDetector {
    /// Load the configured model. A missing or unreadable model, or a scale
    /// factor that cannot grow the window, leaves the detector permanently
    /// disabled; it is never reloaded.
    pub fn from_config(config: &DetectorConfig) -> Self {
        if !(config.scale_factor > 1.0) {
            let reason = format!("scale factor {} must be greater than 1.0", config.scale_factor);
            warn!("plate classifier disabled: {reason}");
            return Self::disabled(reason, config);
        }
        let loaded = match &config.cascade_path {
            Some(path) => HaarCascade::load(path),
            None => Err(LprError::ModelLoad {
                path: PathBuf::new(),
                reason: "no cascade model configured".into(),
            }),
        };
        match loaded {
            Ok(cascade) => {
                info!(
                    stages = cascade.stage_count(),
                    window = ?cascade.window_size(),
                    "plate classifier loaded"
                );
                Self::with_cascade(cascade, config)
            }
            Err(e) => {
                warn!("plate classifier unavailable, using contour detection: {e}");
                Self::disabled(e.to_string(), config)
            }
        }
    }

    pub fn with_cascade(cascade: HaarCascade, config: &DetectorConfig) -> Self {
        Self {
            cascade: Some(cascade),
            status: ClassifierStatus::Enabled,
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
            min_size: config.min_size.map(|[w, h]| (w, h)),
        }
    }

    pub fn disabled(reason: impl Into<String>, config: &DetectorConfig) -> Self {
        Self {
            cascade: None,
            status: ClassifierStatus::Disabled {
                reason: reason.into(),
            },
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
            min_size: None,
        }
    }

    pub fn status(&self) -> &ClassifierStatus {
        &self.status
    }
}

impl CandidateStrategy for ClassifierDetector {
    fn find_candidates(&self, preprocessed: &Preprocessed) -> Vec<CandidateRegion> {
        match &self.cascade {
            Some(cascade) => cascade.detect_multi_scale(
                &preprocessed.gray,
                self.scale_factor,
                self.min_neighbors,
                self.min_size,
            ),
            None => Vec::new(),
        }
    }

    fn name(&self) -> &str {
        "Cascade Classifier"
    }

    fn is_enabled(&self) -> bool {
        self.status == ClassifierStatus::Enabled
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn required<'a, 'input>(node: Node<'a, 'input>, name: &str) -> std::result::Result<Node<'a, 'input>, String> {
    child(node, name).ok_or_else(|| format!("missing <{name}> element"))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text()).map(str::trim)
}

fn required_text<'a>(node: Node<'a, '_>, name: &str) -> std::result::Result<&'a str, String> {
    child_text(node, name).ok_or_else(|| format!("missing <{name}> value"))
}

/// Sequence entries, written as `<_>` elements
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.has_tag_name("_"))
}

fn parse_number<T: std::str::FromStr>(text: &str) -> std::result::Result<T, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("invalid number {:?}", text.trim()))
}

fn parse_numbers<T: std::str::FromStr>(text: &str) -> std::result::Result<Vec<T>, String> {
    text.split_whitespace().map(parse_number).collect()
}

fn parse_stage(node: Node) -> std::result::Result<Stage, String> {
    let threshold = parse_number::<f32>(required_text(node, "stageThreshold")?)?;
    let classifiers = items(required(node, "weakClassifiers")?)
        .map(parse_weak_classifier)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold,
        classifiers,
    })
}

fn parse_weak_classifier(node: Node) -> std::result::Result<WeakClassifier, String> {
    let raw: Vec<f64> = parse_numbers(required_text(node, "internalNodes")?)?;
    let leaves: Vec<f32> = parse_numbers(required_text(node, "leafValues")?)?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err("internalNodes must hold groups of four values".into());
    }

    let nodes: Vec<TreeNode> = raw
        .chunks_exact(4)
        .map(|c| TreeNode {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3] as f32,
        })
        .collect();

    for (i, node) in nodes.iter().enumerate() {
        for child in [node.left, node.right] {
            // Children always follow their parent, which keeps traversal finite
            let valid = if child > 0 {
                (child as usize) > i && (child as usize) < nodes.len()
            } else {
                (child.unsigned_abs() as usize) < leaves.len()
            };
            if !valid {
                return Err("weak classifier references a missing node or leaf".into());
            }
        }
    }
    Ok(WeakClassifier { nodes, leaves })
}

fn parse_feature(node: Node) -> std::result::Result<HaarFeature, String> {
    if let Some(tilted) = child_text(node, "tilted") {
        if parse_number::<i32>(tilted)? != 0 {
            return Err("tilted haar features are not supported".into());
        }
    }
    let rects = items(required(node, "rects")?)
        .map(|r| {
            let text = r.text().unwrap_or_default();
            let values: Vec<f32> = parse_numbers(text)?;
            match values.as_slice() {
                [x, y, w, h, weight] if weight.is_finite() => Ok(WeightedRect {
                    x: rect_extent(*x)?,
                    y: rect_extent(*y)?,
                    width: rect_extent(*w)?,
                    height: rect_extent(*h)?,
                    weight: *weight,
                }),
                _ => Err(format!("malformed feature rectangle {text:?}")),
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if rects.is_empty() {
        return Err("feature without rectangles".into());
    }
    Ok(HaarFeature { rects })
}

/// Pixel offset or size of a feature rectangle, a whole number within `u16`
fn rect_extent(value: f32) -> std::result::Result<u32, String> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= f32::from(u16::MAX) {
        Ok(value as u32)
    } else {
        Err(format!("invalid feature rectangle value {value}"))
    }
}

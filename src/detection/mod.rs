pub mod cascade;
pub mod contours;
pub mod ocr;
pub mod preprocessing;

use tracing::debug;

use crate::config::DetectorConfig;
use crate::models::CandidateRegion;
use cascade::ClassifierDetector;
use contours::ContourDetector;
use preprocessing::Preprocessed;

/// One way of proposing plate regions from a preprocessed frame
pub trait CandidateStrategy: Send + Sync {
    fn find_candidates(&self, preprocessed: &Preprocessed) -> Vec<CandidateRegion>;

    /// Human-readable name for this strategy (used in log output)
    fn name(&self) -> &str;

    /// Disabled strategies are skipped without being asked
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Ordered list of strategies; the first one producing any region wins.
/// Results of different strategies are never merged.
pub struct CandidateDetector {
    strategies: Vec<Box<dyn CandidateStrategy>>,
}

impl CandidateDetector {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Classifier first, contour fallback
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new()
            .with_strategy(Box::new(ClassifierDetector::from_config(config)))
            .with_strategy(Box::new(ContourDetector::new(config)))
    }

    /// Contour strategy only, as when no classifier model is available
    pub fn contour_only(config: &DetectorConfig) -> Self {
        Self::new().with_strategy(Box::new(ContourDetector::new(config)))
    }

    /// Append a strategy with lower priority than the existing ones
    pub fn with_strategy(mut self, strategy: Box<dyn CandidateStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn find_candidates(&self, preprocessed: &Preprocessed) -> Vec<CandidateRegion> {
        for strategy in self.strategies.iter().filter(|s| s.is_enabled()) {
            let candidates = strategy.find_candidates(preprocessed);
            debug!(
                strategy = strategy.name(),
                count = candidates.len(),
                "candidate search"
            );
            if !candidates.is_empty() {
                return candidates;
            }
        }
        Vec::new()
    }
}

impl Default for CandidateDetector {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

//! Suppression of repeated reads of the same plate.
//!
//! A plate is *hot* from the moment it is emitted until the cooldown has
//! elapsed, and *cold* otherwise. There is no timer: the state is decided
//! when the tracker is asked.

use std::collections::HashMap;

use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::DedupConfig;

#[derive(Debug, Clone)]
pub struct DedupTracker {
    cooldown: Duration,
    evict_enabled: bool,
    last_seen: HashMap<String, OffsetDateTime>,
}

impl DedupTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            evict_enabled: true,
            last_seen: HashMap::new(),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self {
            cooldown: Duration::seconds(config.cooldown_secs as i64),
            evict_enabled: config.evict_expired,
            last_seen: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True if `plate` is unseen or its cooldown has elapsed at `now`
    pub fn should_emit(&self, plate: &str, now: OffsetDateTime) -> bool {
        match self.last_seen.get(plate) {
            Some(&last) => now - last >= self.cooldown,
            None => true,
        }
    }

    pub fn record(&mut self, plate: &str, now: OffsetDateTime) {
        self.last_seen.insert(plate.to_string(), now);
    }

    /// Check and record as one step. Returns whether the plate may be emitted.
    pub fn try_emit(&mut self, plate: &str, now: OffsetDateTime) -> bool {
        if !self.should_emit(plate, now) {
            debug!(plate, "duplicate suppressed");
            return false;
        }
        self.record(plate, now);
        true
    }

    /// Forget plates that are already cold at `now`. Does not change what
    /// `should_emit` answers, only how much is remembered.
    pub fn evict_expired(&mut self, now: OffsetDateTime) -> usize {
        if !self.evict_enabled {
            return 0;
        }
        let before = self.last_seen.len();
        let cooldown = self.cooldown;
        self.last_seen.retain(|_, last| now - *last < cooldown);
        before - self.last_seen.len()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}

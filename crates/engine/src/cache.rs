use crate::lyrics::LyricTimeline;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const DEFAULT_CAPACITY: usize = 64;

/// Parsed timelines keyed by catalog id. An entry is built once and shared;
/// the oldest entry is evicted when the cache is full.
#[derive(Debug)]
pub struct LyricCache {
    entries: HashMap<String, Arc<LyricTimeline>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for LyricCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LyricCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, catalog_id: &str) -> Option<Arc<LyricTimeline>> {
        self.entries.get(catalog_id).cloned()
    }

    /// Parses `raw` unless `catalog_id` is already cached, in which case the
    /// existing timeline wins.
    pub fn get_or_parse(&mut self, catalog_id: &str, raw: &str) -> Arc<LyricTimeline> {
        if let Some(existing) = self.get(catalog_id) {
            return existing;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        let timeline = Arc::new(LyricTimeline::parse(raw));
        self.entries.insert(catalog_id.to_string(), timeline.clone());
        self.order.push_back(catalog_id.to_string());
        timeline
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Per-segment ordered registry of data sources.

use super::provider::DataSource;
use crate::domain::MarketSegment;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered source with its priority (lower is tried first).
#[derive(Clone)]
pub struct SourceDescriptor {
    pub source: Arc<dyn DataSource>,
    pub priority: u32,
}

impl std::fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("source", &self.source.name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Built once at startup, read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct DataSourceRegistry {
    by_segment: HashMap<MarketSegment, Vec<SourceDescriptor>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and keep the segment's list sorted by priority; ties keep registration order.
    pub fn register(&mut self, segment: MarketSegment, source: Arc<dyn DataSource>, priority: u32) {
        let list = self.by_segment.entry(segment).or_default();
        list.push(SourceDescriptor { source, priority });
        // stable sort
        list.sort_by_key(|d| d.priority);
    }

    /// Sources for `segment` in the order they should be tried.
    pub fn sources_for(&self, segment: MarketSegment) -> Vec<Arc<dyn DataSource>> {
        self.by_segment
            .get(&segment)
            .map(|list| list.iter().map(|d| Arc::clone(&d.source)).collect())
            .unwrap_or_default()
    }

    pub fn descriptors(&self, segment: MarketSegment) -> &[SourceDescriptor] {
        self.by_segment.get(&segment).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn segments(&self) -> Vec<MarketSegment> {
        let mut segs: Vec<_> = self.by_segment.keys().copied().collect();
        segs.sort();
        segs
    }
}

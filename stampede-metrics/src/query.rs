use smallvec::SmallVec;

use crate::key::KeyId;
use crate::metrics::{MetricKind, MetricStorage, RateCounts, new_trend_histogram};
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;
use crate::view::{AggregateView, MetricValue, TrendSummary};

#[derive(Debug, Clone, Copy)]
enum TagFilter {
    Eq(KeyId, KeyId),
    // The registry has never seen the key or value, so no series can carry it.
    Never,
}

impl TagFilter {
    fn matches(&self, tags: &TagSet) -> bool {
        match *self {
            TagFilter::Eq(k, v) => tags.get(k) == Some(v),
            TagFilter::Never => false,
        }
    }
}

/// Filtered, merged read over the series of one metric.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    name: String,
    kind: MetricKind,
    filters: SmallVec<[TagFilter; 4]>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId, name: &str, kind: MetricKind) -> Self {
        Self {
            registry,
            metric,
            name: name.to_string(),
            kind,
            filters: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn where_eq(mut self, key: &str, value: &str) -> Self {
        let filter = match (self.registry.lookup_key(key), self.registry.lookup_key(value)) {
            (Some(k), Some(v)) => TagFilter::Eq(k, v),
            _ => TagFilter::Never,
        };
        self.filters.push(filter);
        self
    }

    fn matches(&self, tags: &TagSet) -> bool {
        self.filters.iter().all(|f| f.matches(tags))
    }

    /// Merge every matching series into one view. `None` when no matching series has
    /// received a sample yet.
    pub fn aggregate(self) -> Option<AggregateView> {
        let mut seen = false;
        let value = match self.kind {
            MetricKind::Counter => {
                let mut sum = 0u64;
                self.registry.visit_series(self.metric, |tags, storage| {
                    if let MetricStorage::Counter(c) = storage
                        && let Some(v) = c.get()
                        && self.matches(tags)
                    {
                        seen = true;
                        sum = sum.saturating_add(v);
                    }
                });
                MetricValue::Counter(sum)
            }
            MetricKind::Gauge => {
                let mut sum = 0i64;
                self.registry.visit_series(self.metric, |tags, storage| {
                    if let MetricStorage::Gauge(g) = storage
                        && let Some(v) = g.get()
                        && self.matches(tags)
                    {
                        seen = true;
                        sum = sum.saturating_add(v);
                    }
                });
                MetricValue::Gauge(sum)
            }
            MetricKind::Rate => {
                let mut acc = RateCounts::default();
                self.registry.visit_series(self.metric, |tags, storage| {
                    if let MetricStorage::Rate(r) = storage
                        && self.matches(tags)
                    {
                        let r = *r.lock();
                        seen |= r.total > 0;
                        acc.hits = acc.hits.saturating_add(r.hits);
                        acc.total = acc.total.saturating_add(r.total);
                    }
                });
                MetricValue::from(acc)
            }
            MetricKind::Trend => {
                let mut acc = new_trend_histogram();
                self.registry.visit_series(self.metric, |tags, storage| {
                    if let MetricStorage::Trend(h) = storage
                        && self.matches(tags)
                    {
                        let h = h.lock();
                        // Same bounds on both sides, so `add` cannot fail.
                        let _ = acc.add(&*h);
                    }
                });
                let summary = TrendSummary::from_histogram(acc)?;
                seen = true;
                MetricValue::Trend(summary)
            }
        };

        seen.then(|| AggregateView {
            name: self.name,
            value,
        })
    }
}

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricSample, MetricStorage};
use crate::query::Query;
use crate::tags::TagSet;
use crate::view::{AggregateView, MetricValue, TrendSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

/// One tagged series, resolved back to strings.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub tags: Vec<(String, String)>,
    pub value: MetricValue,
}

/// Run-scoped metric store.
///
/// All writes go through atomics or a per-series lock held only for the duration of one
/// observation, so concurrent recorders never block each other for long and readers never
/// see half of a `record` call.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    by_name: DashMap<KeyId, MetricId>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    /// Declare a metric. Idempotent for the same kind.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let name_id = self.interner.get_or_intern(name);
        if let Some(id) = self.by_name.get(&name_id).map(|r| *r) {
            return self.check_kind(id, name, kind);
        }

        let mut defs = self.defs.write();
        // Another writer may have registered it between the lookup and the lock.
        if let Some(id) = self.by_name.get(&name_id).map(|r| *r) {
            drop(defs);
            return self.check_kind(id, name, kind);
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage.insert(id, DashMap::new());
        self.by_name.insert(name_id, id);
        Ok(id)
    }

    fn check_kind(&self, id: MetricId, name: &str, kind: MetricKind) -> Result<MetricId> {
        let registered = self.defs.read().get(id.0 as usize).map(|d| d.kind);
        match registered {
            Some(registered) if registered != kind => Err(Error::KindMismatch {
                name: name.to_string(),
                registered,
                attempted: kind,
            }),
            _ => Ok(id),
        }
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        let id = self.lookup_metric(name)?;
        self.defs.read().get(id.0 as usize).map(|d| d.kind)
    }

    fn lookup_metric(&self, name: &str) -> Option<MetricId> {
        let name_id = self.interner.lookup(name)?;
        self.by_name.get(&name_id).map(|r| *r)
    }

    pub(crate) fn lookup_key(&self, key: &str) -> Option<KeyId> {
        self.interner.lookup(key)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_unsorted(tags.iter().map(|(k, v)| {
            (
                self.interner.get_or_intern(k),
                self.interner.get_or_intern(v),
            )
        }))
    }

    /// Write handle for `(metric, tags)`, creating the series on first use.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let kind = self.defs.read().get(metric.0 as usize)?.kind;
        let series_map = self.storage.get(&metric)?;
        let handle = series_map
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind))
            .handle();
        Some(handle)
    }

    /// Register `name` and return the write handle for its `tags` series.
    pub fn series(&self, name: &str, kind: MetricKind, tags: &[(&str, &str)]) -> Result<MetricHandle> {
        let id = self.register(name, kind)?;
        self.handle(id, self.resolve_tags(tags))
            .ok_or_else(|| Error::UnknownMetric(name.to_string()))
    }

    pub fn record(&self, sample: &MetricSample) -> Result<()> {
        self.record_tagged(sample, &[])
    }

    pub fn record_tagged(&self, sample: &MetricSample, tags: &[(&str, &str)]) -> Result<()> {
        let id = self.register(sample.name(), sample.kind())?;
        let tags = self.resolve_tags(tags);
        if let Some(handle) = self.handle(id, tags) {
            handle.apply(sample);
        }
        Ok(())
    }

    /// Merged view of every series of `name`.
    pub fn snapshot(&self, name: &str) -> Option<AggregateView> {
        self.query(name)?.aggregate()
    }

    pub fn query(&self, name: &str) -> Option<Query<'_>> {
        let id = self.lookup_metric(name)?;
        let kind = self.defs.read().get(id.0 as usize)?.kind;
        Some(Query::new(self, id, name, kind))
    }

    /// Counter total, 0 when the counter never received a sample.
    pub fn counter_total(&self, name: &str) -> u64 {
        match self.snapshot(name).map(|v| v.value) {
            Some(MetricValue::Counter(c)) => c,
            _ => 0,
        }
    }

    pub(crate) fn visit_series(
        &self,
        metric: MetricId,
        mut f: impl FnMut(&TagSet, &MetricStorage),
    ) {
        if let Some(series_map) = self.storage.get(&metric) {
            for series in series_map.iter() {
                f(series.key(), series.value());
            }
        }
    }

    /// Names of every registered metric, in registration order.
    pub fn metric_names(&self) -> Vec<String> {
        self.defs
            .read()
            .iter()
            .filter_map(|d| self.interner.resolve(d.name))
            .map(|s| s.to_string())
            .collect()
    }

    /// Merged views for every metric that has samples, sorted by name.
    pub fn views(&self) -> Vec<AggregateView> {
        let mut out: Vec<AggregateView> = self
            .metric_names()
            .iter()
            .filter_map(|name| self.snapshot(name))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Every series with its tags, sorted by metric name.
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let mut out = Vec::new();
        let defs = self.defs.read();
        let resolve = |id: KeyId| {
            self.interner
                .resolve(id)
                .map(|s| s.to_string())
                .unwrap_or_default()
        };

        for entry in self.storage.iter() {
            let Some(def) = defs.get(entry.key().0 as usize) else {
                continue;
            };
            let name = resolve(def.name);

            for series in entry.value().iter() {
                let value = match series.value() {
                    MetricStorage::Counter(c) => match c.get() {
                        Some(v) => MetricValue::Counter(v),
                        None => continue,
                    },
                    MetricStorage::Gauge(g) => match g.get() {
                        Some(v) => MetricValue::Gauge(v),
                        None => continue,
                    },
                    MetricStorage::Rate(r) => {
                        let counts = *r.lock();
                        if counts.total == 0 {
                            continue;
                        }
                        MetricValue::from(counts)
                    }
                    MetricStorage::Trend(h) => {
                        let Some(summary) = TrendSummary::from_histogram(h.lock().clone()) else {
                            continue;
                        };
                        MetricValue::Trend(summary)
                    }
                };

                out.push(MetricSeriesSummary {
                    name: name.clone(),
                    tags: series
                        .key()
                        .iter()
                        .map(|(k, v)| (resolve(k), resolve(v)))
                        .collect(),
                    value,
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

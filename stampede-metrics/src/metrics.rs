use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Trend values are stored as integers in thousandths of the recorded unit.
///
/// For millisecond trends this gives microsecond resolution.
pub const TREND_SCALE: f64 = 1000.0;

/// Upper bound for trend values (after scaling): one hour expressed in milliseconds.
const TREND_MAX_SCALED: u64 = 3_600_000_000;

/// Significant digits kept by the trend histogram (relative error <= 0.1%).
const TREND_SIGFIG: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

/// One observation produced by an iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricSample {
    Counter { name: String, delta: u64 },
    Gauge { name: String, value: i64 },
    Rate { name: String, success: bool },
    Trend { name: String, value: f64 },
}

impl MetricSample {
    pub fn counter(name: impl Into<String>, delta: u64) -> Self {
        Self::Counter {
            name: name.into(),
            delta,
        }
    }

    pub fn gauge(name: impl Into<String>, value: i64) -> Self {
        Self::Gauge {
            name: name.into(),
            value,
        }
    }

    pub fn rate(name: impl Into<String>, success: bool) -> Self {
        Self::Rate {
            name: name.into(),
            success,
        }
    }

    pub fn trend(name: impl Into<String>, value: f64) -> Self {
        Self::Trend {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Counter { name, .. }
            | Self::Gauge { name, .. }
            | Self::Rate { name, .. }
            | Self::Trend { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Gauge { .. } => MetricKind::Gauge,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend { .. } => MetricKind::Trend,
        }
    }
}

pub(crate) fn new_trend_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, TREND_MAX_SCALED, TREND_SIGFIG) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

pub(crate) fn scale_trend_value(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    let scaled = (value * TREND_SCALE).round();
    if scaled >= TREND_MAX_SCALED as f64 {
        TREND_MAX_SCALED
    } else {
        scaled as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateCounts {
    pub hits: u64,
    pub total: u64,
}

/// Counter or gauge value plus whether any write has reached it.
///
/// Series can be created ahead of their first sample; an untouched cell reads as "no data",
/// not as zero.
#[derive(Debug, Default)]
pub(crate) struct ScalarCell<A> {
    pub(crate) value: A,
    touched: AtomicBool,
}

impl<A> ScalarCell<A> {
    #[inline]
    fn touch(&self) -> &A {
        if !self.touched.load(Ordering::Relaxed) {
            self.touched.store(true, Ordering::Release);
        }
        &self.value
    }

    pub(crate) fn is_touched(&self) -> bool {
        self.touched.load(Ordering::Acquire)
    }
}

impl ScalarCell<AtomicU64> {
    pub(crate) fn get(&self) -> Option<u64> {
        self.is_touched().then(|| self.value.load(Ordering::Relaxed))
    }
}

impl ScalarCell<AtomicI64> {
    pub(crate) fn get(&self) -> Option<i64> {
        self.is_touched().then(|| self.value.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum MetricStorage {
    Counter(Arc<ScalarCell<AtomicU64>>),
    Gauge(Arc<ScalarCell<AtomicI64>>),
    // `hits` and `total` move together, so they share one lock.
    Rate(Arc<Mutex<RateCounts>>),
    Trend(Arc<Mutex<Histogram<u64>>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::default()),
            MetricKind::Gauge => Self::Gauge(Arc::default()),
            MetricKind::Rate => Self::Rate(Arc::new(Mutex::new(RateCounts::default()))),
            MetricKind::Trend => Self::Trend(Arc::new(Mutex::new(new_trend_histogram()))),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        MetricHandle(self.clone())
    }
}

/// Write handle for one metric series.
///
/// Cheap to clone; hot paths can keep a handle instead of resolving names and tags on every
/// observation.
#[derive(Debug, Clone)]
pub struct MetricHandle(pub(crate) MetricStorage);

impl MetricHandle {
    #[inline]
    pub fn add(&self, delta: u64) {
        if let MetricStorage::Counter(c) = &self.0 {
            c.touch().fetch_add(delta, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set(&self, value: i64) {
        if let MetricStorage::Gauge(g) = &self.0 {
            g.touch().store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_gauge(&self, delta: i64) -> i64 {
        if let MetricStorage::Gauge(g) = &self.0 {
            return g.touch().fetch_add(delta, Ordering::Relaxed).saturating_add(delta);
        }
        0
    }

    /// Raise the gauge to `value` if it is currently lower.
    #[inline]
    pub fn set_max(&self, value: i64) {
        if let MetricStorage::Gauge(g) = &self.0 {
            g.touch().fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, success: bool) {
        if let MetricStorage::Rate(r) = &self.0 {
            let mut r = r.lock();
            r.total = r.total.saturating_add(1);
            if success {
                r.hits = r.hits.saturating_add(1);
            }
        }
    }

    #[inline]
    pub fn observe(&self, value: f64) {
        if let MetricStorage::Trend(h) = &self.0 {
            h.lock().saturating_record(scale_trend_value(value));
        }
    }

    pub(crate) fn apply(&self, sample: &MetricSample) {
        match sample {
            MetricSample::Counter { delta, .. } => self.add(*delta),
            MetricSample::Gauge { value, .. } => self.set(*value),
            MetricSample::Rate { success, .. } => self.add_rate(*success),
            MetricSample::Trend { value, .. } => self.observe(*value),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match &self.0 {
            MetricStorage::Counter(_) => MetricKind::Counter,
            MetricStorage::Gauge(_) => MetricKind::Gauge,
            MetricStorage::Rate(_) => MetricKind::Rate,
            MetricStorage::Trend(_) => MetricKind::Trend,
        }
    }
}

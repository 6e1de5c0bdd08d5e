use hdrhistogram::Histogram;

use crate::metrics::{MetricKind, RateCounts, TREND_SCALE};

/// Point-in-time aggregate for one metric (merged across the selected series).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateView {
    pub name: String,
    pub value: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate { hits: u64, total: u64 },
    Trend(TrendSummary),
}

impl AggregateView {
    pub fn kind(&self) -> MetricKind {
        match self.value {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Rate { .. } => MetricKind::Rate,
            MetricValue::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of observations (counter: accumulated sum).
    pub fn count(&self) -> u64 {
        match &self.value {
            MetricValue::Counter(c) => *c,
            MetricValue::Gauge(_) => 1,
            MetricValue::Rate { total, .. } => *total,
            MetricValue::Trend(t) => t.count,
        }
    }

    /// Hit ratio for rate metrics.
    pub fn rate(&self) -> Option<f64> {
        match self.value {
            MetricValue::Rate { hits, total } if total > 0 => Some(hits as f64 / total as f64),
            _ => None,
        }
    }

    pub fn trend(&self) -> Option<&TrendSummary> {
        match &self.value {
            MetricValue::Trend(t) => Some(t),
            _ => None,
        }
    }
}

/// Summary of a trend histogram, in the unit values were recorded with.
#[derive(Debug, Clone)]
pub struct TrendSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stdev: f64,
    histogram: Histogram<u64>,
}

impl TrendSummary {
    pub(crate) fn from_histogram(histogram: Histogram<u64>) -> Option<Self> {
        if histogram.is_empty() {
            return None;
        }

        Some(Self {
            count: histogram.len(),
            min: histogram.min() as f64 / TREND_SCALE,
            max: histogram.max() as f64 / TREND_SCALE,
            mean: histogram.mean() / TREND_SCALE,
            stdev: histogram.stdev() / TREND_SCALE,
            histogram,
        })
    }

    /// Percentile `p` in `[0, 100]`. Relative error is bounded by the histogram precision
    /// (three significant digits).
    pub fn percentile(&self, p: f64) -> f64 {
        let q = (p / 100.0).clamp(0.0, 1.0);
        self.histogram.value_at_quantile(q) as f64 / TREND_SCALE
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.0)
    }
}

impl PartialEq for TrendSummary {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count
            && self.min == other.min
            && self.max == other.max
            && self.mean == other.mean
            && self.stdev == other.stdev
            && self.histogram == other.histogram
    }
}

impl From<RateCounts> for MetricValue {
    fn from(r: RateCounts) -> Self {
        Self::Rate {
            hits: r.hits,
            total: r.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{new_trend_histogram, scale_trend_value};

    fn summary_of(values: &[f64]) -> Option<TrendSummary> {
        let mut h = new_trend_histogram();
        for v in values {
            h.saturating_record(scale_trend_value(*v));
        }
        TrendSummary::from_histogram(h)
    }

    #[test]
    fn empty_trend_has_no_summary() {
        assert!(summary_of(&[]).is_none());
    }

    #[test]
    fn trend_summary_stats_are_in_recorded_units() {
        let s = summary_of(&[10.0, 20.0, 30.0]).unwrap_or_else(|| panic!("expected summary"));
        assert_eq!(s.count, 3);
        assert!((s.min - 10.0).abs() < 0.01);
        assert!((s.max - 30.0).abs() < 0.03);
        assert!((s.mean - 20.0).abs() < 0.02);
        assert!((s.median() - 20.0).abs() < 0.02);
    }

    #[test]
    fn percentile_error_is_bounded() {
        let values: Vec<f64> = (1..=1000).map(f64::from).collect();
        let s = summary_of(&values).unwrap_or_else(|| panic!("expected summary"));

        for (p, exact) in [(50.0, 500.0), (95.0, 950.0), (99.0, 990.0), (99.9, 999.0)] {
            let got = s.percentile(p);
            // Histogram precision plus at most one rank of quantile rounding.
            let rel = (got - exact).abs() / exact;
            assert!(rel <= 0.005, "p({p}) = {got}, expected ~{exact}");
        }
    }

    #[test]
    fn rate_view_reports_ratio() {
        let v = AggregateView {
            name: "checks".to_string(),
            value: MetricValue::Rate { hits: 3, total: 4 },
        };
        assert_eq!(v.kind(), MetricKind::Rate);
        assert_eq!(v.count(), 4);
        assert_eq!(v.rate(), Some(0.75));
    }
}

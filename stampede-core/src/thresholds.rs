use std::fmt;
use std::time::Duration;

use stampede_metrics::MetricKind;

use crate::config::{ThresholdSet, ThresholdSpec};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    NotEq,
}

impl Comparator {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Lte => left <= right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Eq => left == right,
            Self::NotEq => left != right,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
            Self::NotEq => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl Aggregation {
    /// Whether this aggregation is defined for metrics of `kind`.
    pub fn supports(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => matches!(
                self,
                Self::Avg | Self::Min | Self::Max | Self::Med | Self::Count | Self::P(_)
            ),
            MetricKind::Counter => matches!(self, Self::Count | Self::Rate),
            MetricKind::Rate => matches!(self, Self::Rate),
            MetricKind::Gauge => matches!(self, Self::Value),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

/// The `<aggregation> <op> <bound>` part of a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub aggregation: Aggregation,
    pub comparator: Comparator,
    pub bound: f64,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparator.token(),
            self.bound
        )
    }
}

/// A compiled threshold bound to one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    /// The key as written, e.g. `http_req_duration{name:login}`.
    pub metric: String,
    /// Metric name without the tag filter.
    pub name: String,
    /// `key:value` pairs every matching series must carry.
    pub tags: Vec<(String, String)>,
    /// The expression as written.
    pub source: String,
    pub condition: Condition,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

impl ThresholdExpr {
    pub fn compile(metric: &str, spec: &ThresholdSpec) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidThreshold {
            metric: metric.to_string(),
            expression: spec.expression.clone(),
            reason,
        };
        let (name, tags) = parse_metric_key(metric).map_err(invalid)?;
        let condition = parse_threshold_expr(&spec.expression).map_err(invalid)?;

        Ok(Self {
            metric: metric.to_string(),
            name,
            tags,
            source: spec.expression.clone(),
            condition,
            abort_on_fail: spec.abort_on_fail,
            delay_abort_eval: spec.delay_abort_eval.unwrap_or(Duration::ZERO),
        })
    }

    /// Reject aggregations that make no sense for the metric's kind.
    pub fn check_kind(&self, kind: MetricKind) -> Result<(), ConfigError> {
        if self.condition.aggregation.supports(kind) {
            Ok(())
        } else {
            Err(ConfigError::ThresholdKindMismatch {
                metric: self.metric.clone(),
                expression: self.source.clone(),
                kind,
            })
        }
    }
}

/// Compile every expression of every set, checking kinds where `kind_of` knows them.
pub fn compile_thresholds(
    sets: &[ThresholdSet],
    kind_of: impl Fn(&str) -> Option<MetricKind>,
) -> Result<Vec<ThresholdExpr>, ConfigError> {
    let mut out = Vec::new();
    for set in sets {
        for spec in &set.expressions {
            let expr = ThresholdExpr::compile(&set.metric, spec)?;
            if let Some(kind) = kind_of(&expr.name) {
                expr.check_kind(kind)?;
            }
            out.push(expr);
        }
    }
    Ok(out)
}

/// Split `name{k:v,k2:v2}` into the metric name and its tag filter.
pub fn parse_metric_key(raw: &str) -> Result<(String, Vec<(String, String)>), String> {
    let raw = raw.trim();
    let Some((name, rest)) = raw.split_once('{') else {
        return Ok((raw.to_string(), Vec::new()));
    };
    let name = name.trim();
    let inner = rest
        .strip_suffix('}')
        .ok_or_else(|| format!("unterminated tag filter in `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("missing metric name in `{raw}`"));
    }

    let tags = inner
        .split(',')
        .map(|pair| {
            let (k, v) = pair
                .split_once(':')
                .ok_or_else(|| format!("expected `key:value` in `{raw}`, got `{pair}`"))?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() {
                return Err(format!("empty tag key in `{raw}`"));
            }
            Ok((k.to_string(), v.to_string()))
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok((name.to_string(), tags))
}

pub fn parse_threshold_expr(raw: &str) -> Result<Condition, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", Comparator::Lte),
        (">=", Comparator::Gte),
        ("==", Comparator::Eq),
        ("!=", Comparator::NotEq),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ];
    let (op_pos, op_len, comparator) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("missing comparison operator in `{raw}`"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("expected `<aggregation> <op> <value>`, got `{raw}`"));
    }

    let aggregation = match left.to_ascii_lowercase().as_str() {
        "avg" => Aggregation::Avg,
        "min" => Aggregation::Min,
        "max" => Aggregation::Max,
        "med" => Aggregation::Med,
        "count" => Aggregation::Count,
        "rate" => Aggregation::Rate,
        "value" => Aggregation::Value,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile {inner} out of range (0, 100]"));
            }
            Aggregation::P(p)
        }
    };

    let bound: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric bound `{right}`"))?;
    if !bound.is_finite() {
        return Err(format!("bound `{right}` is not finite"));
    }

    Ok(Condition {
        aggregation,
        comparator,
        bound,
    })
}

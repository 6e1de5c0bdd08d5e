use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is a {registered} and cannot record a {attempted} sample")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        attempted: MetricKind,
    },

    #[error("metric name must not be empty")]
    EmptyName,

    #[error("metric `{0}` is not registered")]
    UnknownMetric(String),
}

pub mod error;
pub mod key;
pub mod metrics;
pub mod query;
pub mod registry;
pub mod tags;
pub mod view;

pub use error::{Error, Result};
pub use key::KeyId;
pub use metrics::{MetricHandle, MetricKind, MetricSample, TREND_SCALE};
pub use query::Query;
pub use registry::{MetricId, MetricSeriesSummary, Registry};
pub use tags::TagSet;
pub use view::{AggregateView, MetricValue, TrendSummary};

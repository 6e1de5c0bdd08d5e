use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use stampede_http::{HttpClient, HttpRequest, HttpResponse};
use stampede_metrics::{MetricSample, Registry};
use tokio::time::Instant;

use crate::builtin::{
    CHECK_TAG, CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS,
    millis,
};
use crate::config::EnvVars;

/// What one invocation of the iteration callable reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationOutcome {
    pub success: bool,
    pub duration: Duration,
    /// Extra samples recorded when the iteration completes.
    pub samples: Vec<MetricSample>,
}

impl IterationOutcome {
    pub fn new(success: bool, duration: Duration) -> Self {
        Self {
            success,
            duration,
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sample(mut self, sample: MetricSample) -> Self {
        self.samples.push(sample);
        self
    }
}

pub type BoxIterationFuture = Pin<Box<dyn Future<Output = IterationOutcome> + Send + 'static>>;

/// User-supplied iteration logic.
///
/// Invoked concurrently from many workers, each with its own [`IterationContext`]. A panic
/// inside the returned future is contained and recorded as a failed iteration.
pub trait Iteration: Send + Sync + 'static {
    fn run(&self, ctx: IterationContext) -> BoxIterationFuture;
}

impl<F, Fut> Iteration for F
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = IterationOutcome> + Send + 'static,
{
    fn run(&self, ctx: IterationContext) -> BoxIterationFuture {
        Box::pin(self(ctx))
    }
}

/// Run-scoped state shared by every iteration of a scenario.
#[derive(Debug)]
pub(crate) struct IterationShared {
    pub(crate) scenario: Arc<str>,
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) env: EnvVars,
    pub(crate) registry: Arc<Registry>,
    pub(crate) client: HttpClient,
}

impl IterationShared {
    pub(crate) fn base_tags(&self) -> Vec<(&str, &str)> {
        let mut tags = Vec::with_capacity(self.tags.len() + 1);
        tags.push(("scenario", &*self.scenario));
        tags.extend(
            self.tags
                .iter()
                .filter(|(k, _)| k != "scenario")
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        tags
    }
}

/// Capabilities handed to one iteration.
#[derive(Debug, Clone)]
pub struct IterationContext {
    /// 1-based id of the worker running this iteration.
    pub vu_id: u64,
    /// 0-based count of iterations this worker started before this one.
    pub iteration: u64,
    started: Instant,
    shared: Arc<IterationShared>,
}

impl IterationContext {
    pub(crate) fn new(vu_id: u64, iteration: u64, shared: Arc<IterationShared>) -> Self {
        Self {
            vu_id,
            iteration,
            started: Instant::now(),
            shared,
        }
    }

    pub fn scenario(&self) -> &str {
        &self.shared.scenario
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.shared
            .env
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| &**v)
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Perform one HTTP exchange and record `http_*` and `data_*` metrics for it.
    ///
    /// Transport errors count as failed requests and are returned to the caller.
    pub async fn http(&self, req: HttpRequest) -> stampede_http::Result<HttpResponse> {
        let method = req.method.to_string();
        let started = Instant::now();
        let res = self.shared.client.perform(req).await;

        let status;
        let error_kind;
        let (failed, duration, sent, received) = match &res {
            Ok(r) => {
                status = r.status.to_string();
                error_kind = None;
                (r.status >= 400, r.duration, r.bytes_sent, r.bytes_received)
            }
            Err(e) => {
                status = "0".to_string();
                error_kind = Some(e.kind().to_string());
                (true, started.elapsed(), 0, 0)
            }
        };

        let mut tags = self.shared.base_tags();
        tags.push(("method", method.as_str()));
        tags.push(("status", status.as_str()));
        if let Some(kind) = &error_kind {
            tags.push(("error", kind.as_str()));
        }

        let reg = &self.shared.registry;
        let samples = [
            MetricSample::counter(HTTP_REQS, 1),
            MetricSample::trend(HTTP_REQ_DURATION, millis(duration)),
            MetricSample::rate(HTTP_REQ_FAILED, failed),
        ];
        for s in &samples {
            if let Err(err) = reg.record_tagged(s, &tags) {
                tracing::warn!(%err, "dropping http sample");
            }
        }

        let base = self.shared.base_tags();
        for s in [
            MetricSample::counter(DATA_SENT, sent),
            MetricSample::counter(DATA_RECEIVED, received),
        ] {
            if let Err(err) = reg.record_tagged(&s, &base) {
                tracing::warn!(%err, "dropping data sample");
            }
        }

        res
    }

    /// Record one `checks` sample tagged with `name`. Returns `ok`.
    pub fn check(&self, name: &str, ok: bool) -> bool {
        let mut tags = self.shared.base_tags();
        tags.push((CHECK_TAG, name));
        if let Err(err) = self
            .shared
            .registry
            .record_tagged(&MetricSample::rate(CHECKS, ok), &tags)
        {
            tracing::warn!(%err, "dropping check sample");
        }
        ok
    }

    /// Record a custom sample, tagged with the scenario.
    pub fn add(&self, sample: &MetricSample) -> stampede_metrics::Result<()> {
        self.shared
            .registry
            .record_tagged(sample, &self.shared.base_tags())
    }

    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub fn finish(&self, success: bool) -> IterationOutcome {
        IterationOutcome::new(success, self.elapsed())
    }
}

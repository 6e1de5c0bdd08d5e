use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use stampede_core::{
    HttpRequest, HttpResponse, Iteration, IterationContext, IterationOutcome, Method,
};

use crate::template;

/// One declarative HTTP exchange performed by every iteration.
///
/// String fields may still hold `${name}` placeholders for values captured by earlier steps.
#[derive(Debug, Clone)]
pub(crate) struct RequestStep {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body: Option<StepBody>,
    pub timeout: Option<Duration>,
    pub expect_status: Option<u16>,
    pub expect_body_contains: Option<String>,
    pub max_duration: Option<Duration>,
    /// `(var, json path)`: dotted path into the JSON response body.
    pub capture: Vec<(String, String)>,
    /// Pause after this request, before the next one.
    pub think: Option<Think>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StepBody {
    Text(String),
    /// Serialized per request after its string values are expanded.
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Think {
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl Think {
    fn pick(self) -> Duration {
        match self {
            Self::Fixed(d) => d,
            Self::Uniform { min, max } if max > min => rand::rng().random_range(min..=max),
            Self::Uniform { min, .. } => min,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpScript {
    pub steps: Vec<RequestStep>,
    pub think: Option<Think>,
}

impl HttpScript {
    pub(crate) fn into_iteration(self) -> impl Iteration {
        let script = Arc::new(self);
        move |ctx: IterationContext| {
            let script = Arc::clone(&script);
            async move { script.run(ctx).await }
        }
    }

    async fn run(&self, ctx: IterationContext) -> IterationOutcome {
        let mut vars: HashMap<String, String> = HashMap::new();
        let mut ok = true;

        for step in &self.steps {
            let req = match build_request(step, &vars) {
                Ok(req) => req,
                Err(err) => {
                    tracing::debug!(step = %step.name, %err, "skipping remaining steps");
                    ok = false;
                    break;
                }
            };

            match ctx.http(req).await {
                Ok(res) => {
                    ok &= verify(&ctx, step, &res, &mut vars);
                    if let Some(think) = step.think {
                        ctx.sleep(think.pick()).await;
                    }
                }
                Err(err) => {
                    tracing::debug!(step = %step.name, %err, "request failed");
                    if let Some(code) = step.expect_status {
                        ctx.check(&status_check_name(step, code), false);
                    }
                    ok = false;
                    break;
                }
            }
        }

        if let Some(think) = self.think {
            ctx.sleep(think.pick()).await;
        }

        ctx.finish(ok)
    }
}

fn status_check_name(step: &RequestStep, code: u16) -> String {
    format!("{} status is {code}", step.name)
}

fn build_request(step: &RequestStep, vars: &HashMap<String, String>) -> Result<HttpRequest, String> {
    let resolve = |s: &str| template::expand(s, |k| vars.get(k).cloned(), |_| false);

    let mut req = HttpRequest::new(step.method.clone(), resolve(&step.url)?);
    for (k, v) in &step.headers {
        req = req.with_header(k.as_str(), resolve(v)?);
    }
    for (k, v) in &step.params {
        req = req.with_param(k.as_str(), resolve(v)?);
    }
    match &step.body {
        None => {}
        Some(StepBody::Text(text)) => req = req.with_body(resolve(text)?),
        Some(StepBody::Json(shape)) => {
            let mut doc = shape.clone();
            template::expand_json(&mut doc, &resolve)?;
            let bytes = serde_json::to_vec(&doc).map_err(|e| e.to_string())?;
            req = req.with_body(bytes);
        }
    }
    if let Some(timeout) = step.timeout {
        req = req.with_timeout(timeout);
    }
    Ok(req)
}

/// Record the step's checks and captures. Returns whether all of them held.
fn verify(
    ctx: &IterationContext,
    step: &RequestStep,
    res: &HttpResponse,
    vars: &mut HashMap<String, String>,
) -> bool {
    let mut ok = match step.expect_status {
        Some(code) => ctx.check(&status_check_name(step, code), res.status == code),
        None => res.is_success(),
    };

    if let Some(needle) = &step.expect_body_contains {
        let found = res.body_utf8().is_some_and(|b| b.contains(needle.as_str()));
        ok &= ctx.check(&format!("{} body contains {needle}", step.name), found);
    }

    if let Some(limit) = step.max_duration {
        let name = format!(
            "{} response time < {}",
            step.name,
            humantime::format_duration(limit)
        );
        ok &= ctx.check(&name, res.duration < limit);
    }

    if step.capture.is_empty() {
        return ok;
    }

    let json = serde_json::from_slice::<serde_json::Value>(&res.body).ok();
    for (var, path) in &step.capture {
        let value = json.as_ref().and_then(|v| lookup_json(v, path));
        let captured = ctx.check(&format!("{} has {path}", step.name), value.is_some());
        ok &= captured;
        if let Some(v) = value {
            vars.insert(var.clone(), v);
        }
    }

    ok
}

/// Resolve a dotted path (`data.items.0.id`) to a scalar rendered as text.
fn lookup_json(root: &serde_json::Value, path: &str) -> Option<String> {
    let mut cur = root;
    for seg in path.split('.').filter(|s| !s.is_empty()) {
        cur = match cur {
            serde_json::Value::Object(map) => map.get(seg)?,
            serde_json::Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match cur {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null | serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
            None
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(url: &str) -> RequestStep {
        RequestStep {
            name: "search".to_string(),
            method: Method::GET,
            url: url.to_string(),
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
            timeout: None,
            expect_status: None,
            expect_body_contains: None,
            max_duration: None,
            capture: Vec::new(),
            think: None,
        }
    }

    #[test]
    fn lookup_json_walks_objects_and_arrays() {
        let v: serde_json::Value = serde_json::json!({
            "token": "abc",
            "user": { "id": 7, "roles": ["admin", "dev"] },
            "empty": null
        });

        assert_eq!(lookup_json(&v, "token").as_deref(), Some("abc"));
        assert_eq!(lookup_json(&v, "user.id").as_deref(), Some("7"));
        assert_eq!(lookup_json(&v, "user.roles.1").as_deref(), Some("dev"));
        assert_eq!(lookup_json(&v, "user.roles.9"), None);
        assert_eq!(lookup_json(&v, "user"), None);
        assert_eq!(lookup_json(&v, "empty"), None);
        assert_eq!(lookup_json(&v, "missing.path"), None);
    }

    #[test]
    fn build_request_substitutes_captured_values() {
        let mut s = step("http://localhost/api/logout");
        s.method = Method::POST;
        s.headers
            .push(("Authorization".to_string(), "Bearer ${token}".to_string()));
        s.params.push(("q".to_string(), "${term}".to_string()));
        s.timeout = Some(Duration::from_secs(2));

        let vars = HashMap::from([
            ("token".to_string(), "t-1".to_string()),
            ("term".to_string(), "phone".to_string()),
        ]);
        let req = build_request(&s, &vars).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(req.method, Method::POST);
        assert_eq!(
            req.headers,
            vec![("Authorization".to_string(), "Bearer t-1".to_string())]
        );
        assert_eq!(req.params, vec![("q".to_string(), "phone".to_string())]);
        assert_eq!(req.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn captured_values_in_json_bodies_are_escaped() {
        let mut s = step("http://localhost/api/profile");
        s.method = Method::POST;
        s.body = Some(StepBody::Json(serde_json::json!({
            "token": "${token}",
            "note": "static",
        })));

        let vars = HashMap::from([("token".to_string(), r#"a"b\c"#.to_string())]);
        let req = build_request(&s, &vars).unwrap_or_else(|e| panic!("{e}"));

        let sent: serde_json::Value =
            serde_json::from_slice(&req.body).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(sent["token"], r#"a"b\c"#);
        assert_eq!(sent["note"], "static");
    }

    #[test]
    fn text_bodies_expand_as_plain_text() {
        let mut s = step("http://localhost/echo");
        s.body = Some(StepBody::Text("id=${id}".to_string()));
        let vars = HashMap::from([("id".to_string(), "42".to_string())]);
        let req = build_request(&s, &vars).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(&req.body[..], b"id=42");
    }

    #[test]
    fn build_request_fails_when_capture_is_missing() {
        let mut s = step("http://localhost/api/logout");
        s.headers
            .push(("Authorization".to_string(), "Bearer ${token}".to_string()));
        assert!(build_request(&s, &HashMap::new()).is_err());
    }

    #[test]
    fn uniform_think_time_stays_in_range() {
        let think = Think::Uniform {
            min: Duration::from_millis(100),
            max: Duration::from_millis(300),
        };
        for _ in 0..100 {
            let d = think.pick();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }

        let degenerate = Think::Uniform {
            min: Duration::from_secs(1),
            max: Duration::from_secs(1),
        };
        assert_eq!(degenerate.pick(), Duration::from_secs(1));
    }
}

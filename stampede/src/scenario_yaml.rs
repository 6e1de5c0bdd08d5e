use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, anyhow, bail};
use serde::Deserialize;
use stampede_core::config::{DEFAULT_GRACEFUL_STOP, DEFAULT_TIME_UNIT};
use stampede_core::{
    ConfigError, EnvVars, ExecutorKind, Method, ScenarioSpec, Stage, ThresholdSet, ThresholdSpec,
    env_from_pairs,
};

use crate::script::{HttpScript, RequestStep, StepBody, Think};
use crate::template;

/// Env var that replaces the scenario's `baseUrl`.
pub(crate) const BASE_URL_ENV: &str = "BASE_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    /// Scenario name (metrics `scenario` tag).
    pub name: Option<String>,

    /// Executor kind: ramping-vus | ramping-arrival-rate
    pub executor: Option<String>,

    // ramping-vus
    #[serde(rename = "startVUs")]
    pub start_vus: Option<u64>,

    /// Constant load shorthand: `vus` held for `duration`. Excludes `stages`.
    pub vus: Option<u64>,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(default)]
    pub graceful_ramp_down: Option<YamlDuration>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    // ramping-arrival-rate
    pub start_rate: Option<u64>,

    #[serde(default)]
    pub time_unit: Option<YamlDuration>,

    #[serde(rename = "preAllocatedVUs")]
    pub pre_allocated_vus: Option<u64>,

    #[serde(rename = "maxVUs")]
    pub max_vus: Option<u64>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    /// Scenario-level tags.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,

    pub base_url: Option<String>,

    /// Values for `${VAR}` placeholders; overrides the process env, `--env` overrides these.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub requests: Vec<RequestYaml>,

    #[serde(default)]
    pub sleep: Option<SleepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    pub name: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,

    #[serde(default, deserialize_with = "deserialize_tags")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "deserialize_tags")]
    pub params: BTreeMap<String, String>,

    /// Text as-is; mappings and sequences are sent as JSON.
    #[serde(default)]
    pub body: Option<serde_yaml::Value>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    pub expect_status: Option<u16>,
    pub expect_body_contains: Option<String>,

    #[serde(default)]
    pub max_duration: Option<YamlDuration>,

    /// `var: json.path` pairs captured from the response for later steps.
    #[serde(default)]
    pub capture: BTreeMap<String, String>,

    /// Pause after this request completes.
    #[serde(default)]
    pub sleep: Option<SleepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum SleepYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdEntryYaml {
    Expr(String),
    Detailed(ThresholdObjectYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdObjectYaml {
    pub threshold: String,
    #[serde(default)]
    pub abort_on_fail: bool,
    #[serde(default)]
    pub delay_abort_eval: Option<YamlDuration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => continue,
        };
        out.insert(k, s);
    }

    Ok(out)
}

/// A parsed scenario file, ready to hand to the run controller.
#[derive(Debug)]
pub(crate) struct LoadedScenario {
    pub spec: ScenarioSpec,
    pub script: HttpScript,
    pub env: EnvVars,
}

pub(crate) async fn load_scenario(
    path: &Path,
    process_env: impl IntoIterator<Item = (String, String)>,
    overrides: &[(String, String)],
    base_url: Option<&str>,
) -> anyhow::Result<LoadedScenario> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario YAML: {}", path.display()))?;

    let doc: ScenarioYaml = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse YAML: {}", path.display()))?;

    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("default")
        .to_string();

    build_scenario(doc, default_name, process_env, overrides, base_url)
        .with_context(|| format!("invalid scenario: {}", path.display()))
}

/// Layer env sources, lowest priority first: process env, the scenario `env:` block, `--env`.
fn merge_env(
    process_env: impl IntoIterator<Item = (String, String)>,
    scenario_env: &BTreeMap<String, String>,
    overrides: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = process_env.into_iter().collect();
    for (k, v) in scenario_env {
        env.insert(k.clone(), v.clone());
    }
    for (k, v) in overrides {
        env.insert(k.clone(), v.clone());
    }
    env
}

pub(crate) fn build_scenario(
    doc: ScenarioYaml,
    default_name: String,
    process_env: impl IntoIterator<Item = (String, String)>,
    overrides: &[(String, String)],
    base_url_override: Option<&str>,
) -> anyhow::Result<LoadedScenario> {
    let ScenarioYaml {
        name,
        executor,
        start_vus,
        vus,
        duration,
        graceful_ramp_down,
        stages,
        start_rate,
        time_unit,
        pre_allocated_vus,
        max_vus,
        graceful_stop,
        tags,
        thresholds,
        base_url,
        env,
        requests,
        sleep,
    } = doc;

    let env = merge_env(process_env, &env, overrides);

    let executor = match executor.as_deref() {
        None => ExecutorKind::RampingVus,
        Some(raw) => raw
            .trim()
            .parse::<ExecutorKind>()
            .map_err(|_| anyhow!(ConfigError::InvalidExecutor(raw.to_string())))?,
    };

    let (start_vus, stages) = match (vus, duration) {
        (None, None) => (
            start_vus,
            stages
                .into_iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect(),
        ),
        (vus, duration) => {
            if executor != ExecutorKind::RampingVus {
                bail!("`vus`/`duration` only apply to the {} executor", ExecutorKind::RampingVus);
            }
            if !stages.is_empty() {
                bail!("set either `stages` or `vus`/`duration`, not both");
            }
            if start_vus.is_some() {
                bail!("`startVUs` cannot be combined with `vus`/`duration`");
            }
            let Some(duration) = duration else {
                bail!("`vus` needs a `duration`");
            };
            let vus = vus.unwrap_or(1);
            (Some(vus), vec![Stage::new(duration.into_inner(), vus)])
        }
    };

    let mut spec = ScenarioSpec::new(name.unwrap_or(default_name), executor, stages);
    spec.start_vus = start_vus.unwrap_or(0);
    spec.graceful_ramp_down = graceful_ramp_down.map(YamlDuration::into_inner);
    spec.start_rate = start_rate.unwrap_or(0);
    spec.time_unit = time_unit.map_or(DEFAULT_TIME_UNIT, YamlDuration::into_inner);
    spec.pre_allocated_vus = pre_allocated_vus.unwrap_or(1);
    spec.max_vus = max_vus;
    spec.graceful_stop = graceful_stop.map_or(DEFAULT_GRACEFUL_STOP, YamlDuration::into_inner);
    spec.tags = tags.into_iter().collect();
    spec.thresholds = parse_thresholds_map(thresholds);

    if requests.is_empty() {
        bail!("`requests` must list at least one request");
    }

    let captures: BTreeSet<String> = requests
        .iter()
        .flat_map(|r| r.capture.keys().cloned())
        .collect();
    let resolve = |s: &str| {
        template::expand(s, |k| env.get(k).cloned(), |k| captures.contains(k))
            .map_err(anyhow::Error::msg)
    };

    let base_url = match base_url_override {
        Some(url) => Some(url.to_string()),
        None => env.get(BASE_URL_ENV).cloned().or(base_url),
    };
    let base_url = base_url.map(|u| resolve(&u)).transpose()?;

    let steps = requests
        .into_iter()
        .enumerate()
        .map(|(idx, r)| build_step(idx, r, base_url.as_deref(), &resolve))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let think = sleep.map(SleepYaml::into_think).transpose()?;

    Ok(LoadedScenario {
        spec,
        script: HttpScript { steps, think },
        env: env_from_pairs(env),
    })
}

impl SleepYaml {
    fn into_think(self) -> anyhow::Result<Think> {
        match self {
            Self::Fixed(d) => Ok(Think::Fixed(d.into_inner())),
            Self::Range { min, max } => {
                let (min, max) = (min.into_inner(), max.into_inner());
                if min > max {
                    bail!("`sleep.min` must not exceed `sleep.max`");
                }
                Ok(Think::Uniform { min, max })
            }
        }
    }
}

fn build_step(
    idx: usize,
    r: RequestYaml,
    base_url: Option<&str>,
    resolve: &impl Fn(&str) -> anyhow::Result<String>,
) -> anyhow::Result<RequestStep> {
    let name = r.name.unwrap_or_else(|| format!("request_{}", idx + 1));
    let ctx = || format!("request `{name}`");

    let method = match r.method.as_deref().map(str::trim) {
        None | Some("") => Method::GET,
        Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
            .map_err(|_| anyhow!("invalid method `{m}`"))
            .with_context(ctx)?,
    };

    let url = match (r.url, r.path) {
        (Some(url), None) => url,
        (None, Some(path)) => {
            let Some(base) = base_url else {
                bail!("{}: `path` needs `baseUrl`, `BASE_URL` or --base-url", ctx());
            };
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
        (Some(_), Some(_)) => bail!("{}: set either `url` or `path`, not both", ctx()),
        (None, None) => bail!("{}: missing `url` or `path`", ctx()),
    };
    let url = resolve(&url).with_context(ctx)?;

    let mut headers = r
        .headers
        .into_iter()
        .map(|(k, v)| resolve(&v).map(|v| (k, v)))
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(ctx)?;

    let params = r
        .params
        .into_iter()
        .map(|(k, v)| resolve(&v).map(|v| (k, v)))
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(ctx)?;

    let body = match r.body {
        None | Some(serde_yaml::Value::Null) => None,
        Some(serde_yaml::Value::String(s)) => {
            Some(StepBody::Text(resolve(&s).with_context(ctx)?))
        }
        Some(structured) => {
            if !headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            {
                headers.push(("content-type".to_string(), "application/json".to_string()));
            }
            // Placeholders go into string values, never into serialized text.
            let mut doc = serde_json::to_value(&structured)
                .context("body is not representable as JSON")
                .with_context(ctx)?;
            template::expand_json(&mut doc, resolve).with_context(ctx)?;
            Some(StepBody::Json(doc))
        }
    };

    let think = r
        .sleep
        .map(SleepYaml::into_think)
        .transpose()
        .with_context(ctx)?;

    Ok(RequestStep {
        name,
        method,
        url,
        headers,
        params,
        body,
        timeout: r.timeout.map(YamlDuration::into_inner),
        expect_status: r.expect_status,
        expect_body_contains: r.expect_body_contains,
        max_duration: r.max_duration.map(YamlDuration::into_inner),
        capture: r.capture.into_iter().collect(),
        think,
    })
}

fn parse_thresholds_map(raw: BTreeMap<String, ThresholdExprYaml>) -> Vec<ThresholdSet> {
    raw.into_iter()
        .map(|(metric, exprs)| {
            let entries = match exprs {
                ThresholdExprYaml::One(e) => vec![e],
                ThresholdExprYaml::Many(v) => v,
            };
            let specs = entries.into_iter().map(|e| match e {
                ThresholdEntryYaml::Expr(s) => ThresholdSpec::new(s),
                ThresholdEntryYaml::Detailed(o) => ThresholdSpec {
                    expression: o.threshold,
                    abort_on_fail: o.abort_on_fail,
                    delay_abort_eval: o.delay_abort_eval.map(YamlDuration::into_inner),
                },
            });
            ThresholdSet::new(metric, specs)
        })
        .collect()
}

/// Parse repeated `--env KEY=VALUE` flags.
pub(crate) fn parse_env_overrides(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|s| -> anyhow::Result<(String, String)> {
            let (k, v) = s
                .split_once('=')
                .with_context(|| format!("invalid --env `{s}` (expected KEY=VALUE)"))?;
            let k = k.trim();
            if k.is_empty() {
                bail!("invalid --env `{s}` (empty KEY)");
            }
            Ok((k.to_string(), v.to_string()))
        })
        .collect()
}

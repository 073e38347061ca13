//! Plan Resolver
//!
//! Two interchangeable strategies propose a [`PlanCandidate`]:
//! - [`GenerativeStrategy`] asks the text generator and parses its reply
//! - [`KeywordStrategy`] matches the request against the source vocabulary
//!
//! [`PlanResolver`] tries the generative strategy first and drops to the
//! keyword strategy on any failure. Whichever candidate wins goes through
//! [`validate_plan`], so `resolve` always returns an in-vocabulary plan.

use crate::error::{AnalyticsError, Result};
use crate::llm::{parse_plan_response, TextGenerator};
use crate::plan::{validate_plan, AnalysisPlan, Correction, PlanCandidate};
use crate::prompt::build_for_source;
use crate::sources::{SourceDescriptor, DATE_DIMENSION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where a resolved plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOrigin {
    Generative,
    Fallback,
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub plan: AnalysisPlan,
    pub origin: PlanOrigin,

    /// Advisory text when the generator was bypassed
    pub notice: Option<String>,

    /// Fields the validation gate replaced
    pub corrections: Vec<Correction>,

    /// Provenance of the first resolution when this one is a cache hit
    pub cached_from: Option<PlanOrigin>,
}

#[async_trait]
pub trait PlanStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn propose(&self, user_text: &str, source: &SourceDescriptor) -> Result<PlanCandidate>;
}

/// Asks the text generator, bounded by `timeout`.
pub struct GenerativeStrategy {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl GenerativeStrategy {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }
}

#[async_trait]
impl PlanStrategy for GenerativeStrategy {
    fn name(&self) -> &'static str {
        "generative"
    }

    async fn propose(&self, user_text: &str, source: &SourceDescriptor) -> Result<PlanCandidate> {
        let prompt = build_for_source(user_text, source);
        debug!("Prompt for {}:\n{}", self.generator.name(), prompt);

        let raw = tokio::time::timeout(self.timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| {
                AnalyticsError::GenerationUnavailable(format!(
                    "{} did not answer within {}s",
                    self.generator.name(),
                    self.timeout.as_secs_f32()
                ))
            })??;

        parse_plan_response(&raw)
    }
}

/// Deterministic keyword matching against the source vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordStrategy;

#[async_trait]
impl PlanStrategy for KeywordStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn propose(&self, user_text: &str, source: &SourceDescriptor) -> Result<PlanCandidate> {
        Ok(keyword_candidate(user_text, source))
    }
}

/// Keyword plan for `user_text`.
///
/// "by time"/"over time" forces the date dimension with a breakdown;
/// otherwise the first dimension (registration order) whose name or label
/// occurs in the text wins. Metrics are matched the same way. Chart is
/// `line` for "trend"/"time", `pie` for "pie"/"share"/"proportion" (pie wins
/// when both match), else `bar`.
pub fn keyword_candidate(user_text: &str, source: &SourceDescriptor) -> PlanCandidate {
    let msg = user_text.to_lowercase();
    let by_time = msg.contains("by time") || msg.contains("over time");

    let mentions = |name: &str, label: &str| {
        msg.contains(&name.to_lowercase()) || msg.contains(&label.to_lowercase())
    };

    let dimension = if by_time {
        DATE_DIMENSION.to_string()
    } else {
        source
            .dimensions
            .iter()
            .find(|d| mentions(d.as_str(), source.dimension_label(d)))
            .map(String::as_str)
            .unwrap_or_else(|| source.default_dimension())
            .to_string()
    };

    let metric = source
        .metrics
        .iter()
        .find(|m| mentions(m.as_str(), source.metric_label(m)))
        .map(String::as_str)
        .unwrap_or_else(|| source.default_metric())
        .to_string();

    let mut chart_type = "bar";
    if msg.contains("trend") || msg.contains("time") {
        chart_type = "line";
    }
    if msg.contains("pie") || msg.contains("share") || msg.contains("proportion") {
        chart_type = "pie";
    }

    PlanCandidate {
        dimension: Some(dimension),
        metric: Some(metric),
        chart_type: Some(chart_type.to_string()),
        by_time_breakdown: Some(Value::Bool(by_time)),
    }
}

/// Upper bound on cached plans; the oldest entry is evicted first.
pub const PLAN_CACHE_CAPACITY: usize = 512;

#[derive(Debug, Clone)]
struct CachedPlan {
    plan: AnalysisPlan,
    origin: PlanOrigin,
    notice: Option<String>,
    corrections: Vec<Correction>,
    resolved_at: DateTime<Utc>,
}

pub struct PlanResolver {
    primary: Option<Box<dyn PlanStrategy>>,
    fallback: Box<dyn PlanStrategy>,
    cache: Mutex<HashMap<(String, String), CachedPlan>>,
}

impl PlanResolver {
    /// Generative first, keyword fallback.
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self::with_strategies(
            Some(Box::new(GenerativeStrategy::new(generator, timeout))),
            Box::new(KeywordStrategy),
        )
    }

    /// Keyword strategy only; no network calls.
    pub fn offline() -> Self {
        Self::with_strategies(None, Box::new(KeywordStrategy))
    }

    pub fn with_strategies(
        primary: Option<Box<dyn PlanStrategy>>,
        fallback: Box<dyn PlanStrategy>,
    ) -> Self {
        Self {
            primary,
            fallback,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `user_text` against `source`. Never fails.
    pub async fn resolve(&self, user_text: &str, source: &SourceDescriptor) -> Resolution {
        let key = cache_key(&source.id, user_text);
        if let Some(cached) = self.cached(&key) {
            debug!(
                "Plan cache hit for {:?} ({:?} plan resolved at {})",
                key, cached.origin, cached.resolved_at
            );
            return Resolution {
                plan: cached.plan,
                origin: PlanOrigin::Cached,
                notice: cached.notice,
                corrections: cached.corrections,
                cached_from: Some(cached.origin),
            };
        }

        let (candidate, origin, notice) = self.propose(user_text, source).await;
        let validated = validate_plan(&candidate, source);
        info!(
            "Resolved plan for '{}' on '{}' via {:?}: {:?}",
            user_text.trim(),
            source.id,
            origin,
            validated.plan
        );

        self.store(
            key,
            CachedPlan {
                plan: validated.plan.clone(),
                origin,
                notice: notice.clone(),
                corrections: validated.corrections.clone(),
                resolved_at: Utc::now(),
            },
        );

        Resolution {
            plan: validated.plan,
            origin,
            notice,
            corrections: validated.corrections,
            cached_from: None,
        }
    }

    /// Number of cached plans.
    pub fn cached_plans(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn cached(&self, key: &(String, String)) -> Option<CachedPlan> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn store(&self, key: (String, String), entry: CachedPlan) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        if cache.contains_key(&key) {
            return;
        }
        if cache.len() >= PLAN_CACHE_CAPACITY {
            let oldest = cache
                .iter()
                .min_by_key(|(_, cached)| cached.resolved_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Plan cache full; evicting {:?}", oldest);
                cache.remove(&oldest);
            }
        }
        cache.insert(key, entry);
    }

    async fn propose(
        &self,
        user_text: &str,
        source: &SourceDescriptor,
    ) -> (PlanCandidate, PlanOrigin, Option<String>) {
        let mut notice = None;

        if let Some(primary) = &self.primary {
            match primary.propose(user_text, source).await {
                Ok(candidate) if candidate.has_dimension() => {
                    return (candidate, PlanOrigin::Generative, None);
                }
                Ok(_) => {
                    warn!(
                        "{} strategy returned a plan without a dimension; using fallback",
                        primary.name()
                    );
                    notice = Some(
                        "The text generator returned no usable plan. Using keyword fallback."
                            .to_string(),
                    );
                }
                Err(e) if e.is_recoverable() => {
                    warn!("{} strategy failed: {}; using fallback", primary.name(), e);
                    notice = Some(format!(
                        "No usable plan from the text generator ({}). Using keyword fallback.",
                        e
                    ));
                }
                Err(e) => {
                    error!(
                        "{} strategy failed unexpectedly: {}; using fallback",
                        primary.name(),
                        e
                    );
                    notice = Some(format!(
                        "Plan generation failed ({}). Using keyword fallback.",
                        e
                    ));
                }
            }
        }

        let candidate = match self.fallback.propose(user_text, source).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(
                    "{} strategy failed: {}; using source defaults",
                    self.fallback.name(),
                    e
                );
                PlanCandidate::default()
            }
        };
        (candidate, PlanOrigin::Fallback, notice)
    }
}

fn cache_key(source_id: &str, user_text: &str) -> (String, String) {
    (source_id.to_string(), user_text.trim().to_lowercase())
}

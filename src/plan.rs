//! Analysis plans and the validation gate
//!
//! Every strategy produces a [`PlanCandidate`]; [`validate_plan`] is the only
//! place a candidate becomes an [`AnalysisPlan`].

use crate::sources::{ChartType, SourceDescriptor, DATE_DIMENSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Resolved intent. Serializes to the four-key plan exchange object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub dimension: String,
    pub metric: String,
    pub chart_type: ChartType,
    #[serde(default)]
    pub by_time_breakdown: bool,
}

/// Unvalidated plan fields as a strategy produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanCandidate {
    pub dimension: Option<String>,
    pub metric: Option<String>,
    pub chart_type: Option<String>,
    pub by_time_breakdown: Option<Value>,
}

impl PlanCandidate {
    /// Pull the plan keys out of a parsed JSON object. Anything that is not
    /// an object yields an empty candidate.
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let text = |key: &str| -> Option<String> {
            match obj.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            }
        };
        Self {
            dimension: text("dimension"),
            metric: text("metric"),
            chart_type: text("chart_type"),
            by_time_breakdown: obj.get("by_time_breakdown").cloned(),
        }
    }

    /// A candidate is usable only when it names a dimension.
    pub fn has_dimension(&self) -> bool {
        self.dimension
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false)
    }
}

/// A field the validation gate had to replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub field: String,
    pub requested: Option<String>,
    pub applied: String,
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.requested {
            Some(requested) => write!(
                f,
                "{} '{}' replaced by '{}'",
                self.field, requested, self.applied
            ),
            None => write!(f, "{} missing, using '{}'", self.field, self.applied),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub plan: AnalysisPlan,
    pub corrections: Vec<Correction>,
}

/// Normalize a candidate against `source`: out-of-vocabulary fields fall
/// back to the first declared dimension/metric and `bar`, and the breakdown
/// flag only survives on `"date"` plans of sources that declare a breakdown.
pub fn validate_plan(candidate: &PlanCandidate, source: &SourceDescriptor) -> ValidatedPlan {
    let mut corrections = Vec::new();

    let dimension = match candidate
        .dimension
        .as_deref()
        .and_then(|d| source.canonical_dimension(d))
    {
        Some(d) => d.to_string(),
        None => {
            let applied = source.default_dimension().to_string();
            corrections.push(Correction {
                field: "dimension".to_string(),
                requested: candidate.dimension.clone(),
                applied: applied.clone(),
            });
            applied
        }
    };

    let metric = match candidate
        .metric
        .as_deref()
        .and_then(|m| source.canonical_metric(m))
    {
        Some(m) => m.to_string(),
        None => {
            let applied = source.default_metric().to_string();
            corrections.push(Correction {
                field: "metric".to_string(),
                requested: candidate.metric.clone(),
                applied: applied.clone(),
            });
            applied
        }
    };

    let chart_type = match candidate.chart_type.as_deref().and_then(ChartType::parse) {
        Some(c) => c,
        None => {
            corrections.push(Correction {
                field: "chart_type".to_string(),
                requested: candidate.chart_type.clone(),
                applied: ChartType::Bar.to_string(),
            });
            ChartType::Bar
        }
    };

    let requested_breakdown = candidate
        .by_time_breakdown
        .as_ref()
        .map(coerce_bool)
        .unwrap_or(false);
    let by_time_breakdown = requested_breakdown
        && dimension == DATE_DIMENSION
        && source.breakdown_dimension.is_some();

    for correction in &corrections {
        warn!("Plan correction for source '{}': {}", source.id, correction);
    }

    ValidatedPlan {
        plan: AnalysisPlan {
            dimension,
            metric,
            chart_type,
            by_time_breakdown,
        },
        corrections,
    }
}

/// Truthiness of a loosely typed JSON flag.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        ),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceRegistry;
    use serde_json::json;

    fn registry() -> SourceRegistry {
        SourceRegistry::builtin("/srv/app").unwrap()
    }

    fn candidate(dim: &str, metric: &str, chart: &str, breakdown: Value) -> PlanCandidate {
        PlanCandidate {
            dimension: Some(dim.to_string()),
            metric: Some(metric.to_string()),
            chart_type: Some(chart.to_string()),
            by_time_breakdown: Some(breakdown),
        }
    }

    #[test]
    fn test_valid_candidate_passes_unchanged() {
        let registry = registry();
        let sales = registry.resolve("sales").unwrap();
        let validated = validate_plan(&candidate("category", "sales", "bar", json!(false)), sales);
        assert!(validated.corrections.is_empty());
        assert_eq!(
            validated.plan,
            AnalysisPlan {
                dimension: "category".to_string(),
                metric: "sales".to_string(),
                chart_type: ChartType::Bar,
                by_time_breakdown: false,
            }
        );
    }

    #[test]
    fn test_out_of_vocabulary_fields_are_replaced() {
        let registry = registry();
        let events = registry.resolve("events").unwrap();
        let validated = validate_plan(&candidate("city", "clicks", "scatter", json!(true)), events);
        assert_eq!(validated.plan.dimension, "country");
        assert_eq!(validated.plan.metric, "sessions");
        assert_eq!(validated.plan.chart_type, ChartType::Bar);
        assert!(!validated.plan.by_time_breakdown);
        assert_eq!(validated.corrections.len(), 3);
    }

    #[test]
    fn test_empty_candidate_gets_defaults() {
        let registry = registry();
        let sales = registry.resolve("sales").unwrap();
        let validated = validate_plan(&PlanCandidate::default(), sales);
        assert_eq!(validated.plan.dimension, "category");
        assert_eq!(validated.plan.metric, "sales");
        assert_eq!(validated.corrections[0].to_string(), "dimension missing, using 'category'");
    }

    #[test]
    fn test_breakdown_requires_date_dimension() {
        let registry = registry();
        let sales = registry.resolve("sales").unwrap();
        let validated = validate_plan(&candidate("region", "profit", "line", json!(true)), sales);
        assert!(!validated.plan.by_time_breakdown);

        let validated = validate_plan(&candidate("date", "profit", "line", json!("true")), sales);
        assert!(validated.plan.by_time_breakdown);
    }

    #[test]
    fn test_breakdown_requires_source_breakdown() {
        let registry = registry();
        let mut sales = registry.resolve("sales").unwrap().clone();
        sales.breakdown_dimension = None;
        let validated = validate_plan(&candidate("date", "profit", "line", json!(1)), &sales);
        assert!(!validated.plan.by_time_breakdown);
    }

    #[test]
    fn test_case_is_normalized_to_vocabulary() {
        let registry = registry();
        let sales = registry.resolve("sales").unwrap();
        let validated = validate_plan(&candidate("Region", "PROFIT", "Pie", json!(false)), sales);
        assert!(validated.corrections.is_empty());
        assert_eq!(validated.plan.dimension, "region");
        assert_eq!(validated.plan.metric, "profit");
        assert_eq!(validated.plan.chart_type, ChartType::Pie);
    }

    #[test]
    fn test_from_json_reads_plan_keys() {
        let c = PlanCandidate::from_json(&json!({
            "dimension": "date",
            "metric": "sales",
            "chart_type": "line",
            "by_time_breakdown": true,
            "confidence": 0.4
        }));
        assert_eq!(c.dimension.as_deref(), Some("date"));
        assert_eq!(c.by_time_breakdown, Some(json!(true)));
        assert!(c.has_dimension());

        assert_eq!(PlanCandidate::from_json(&json!([1, 2])), PlanCandidate::default());
        assert!(!PlanCandidate::from_json(&json!({"dimension": "  "})).has_dimension());
    }

    #[test]
    fn test_plan_serializes_to_exchange_format() {
        let plan = AnalysisPlan {
            dimension: "date".to_string(),
            metric: "revenue".to_string(),
            chart_type: ChartType::Line,
            by_time_breakdown: true,
        };
        assert_eq!(
            serde_json::to_value(&plan).unwrap(),
            json!({
                "dimension": "date",
                "metric": "revenue",
                "chart_type": "line",
                "by_time_breakdown": true
            })
        );
        let parsed: AnalysisPlan = serde_json::from_str(
            r#"{"dimension":"country","metric":"sessions","chart_type":"pie"}"#,
        )
        .unwrap();
        assert!(!parsed.by_time_breakdown);
    }

    #[test]
    fn test_coerce_bool() {
        assert!(coerce_bool(&json!("Yes")));
        assert!(!coerce_bool(&json!("false")));
        assert!(!coerce_bool(&json!(0)));
        assert!(!coerce_bool(&Value::Null));
    }
}

//! Prompt Builder
//!
//! Renders a source vocabulary and the user's request into the single
//! instruction string sent to the text generator. The required output keys
//! and the time-phrasing rule are part of the contract with
//! [`crate::llm::parse_plan_response`].

use crate::sources::{ChartType, SourceDescriptor};
use std::collections::BTreeMap;

pub fn build_prompt(
    user_text: &str,
    dimensions: &[String],
    metrics: &[String],
    dimension_labels: &BTreeMap<String, String>,
    metric_labels: &BTreeMap<String, String>,
    columns_description: &str,
) -> String {
    let dims = with_labels(dimensions, dimension_labels);
    let mets = with_labels(metrics, metric_labels);
    let charts: Vec<&str> = ChartType::ALL.iter().map(|c| c.as_str()).collect();

    format!(
        r#"Table columns: {}. Dimensions: {}. Metrics: {}. Chart types: {}.
User: "{}"
If user wants trend over time or "by time", use dimension "date", chart_type "line", "by_time_breakdown":true.
Reply ONLY with JSON: {{"dimension":"...","metric":"...","chart_type":"...","by_time_breakdown":true/false}}
"#,
        columns_description,
        dims,
        mets,
        charts.join(","),
        user_text.trim()
    )
}

/// Same as [`build_prompt`], with every argument taken from `source`.
pub fn build_for_source(user_text: &str, source: &SourceDescriptor) -> String {
    build_prompt(
        user_text,
        &source.dimensions,
        &source.metrics,
        &source.dimension_labels,
        &source.metric_labels,
        &source.columns_description(),
    )
}

// "region (Region),sub_category (Sub-category)"; unlabelled names stay bare
fn with_labels(names: &[String], labels: &BTreeMap<String, String>) -> String {
    names
        .iter()
        .map(|name| match labels.get(name) {
            Some(label) if !label.eq_ignore_ascii_case(name) => format!("{} ({})", name, label),
            _ => name.clone(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceRegistry;

    #[test]
    fn test_prompt_lists_vocabulary() {
        let registry = SourceRegistry::builtin("/srv/app").unwrap();
        let sales = registry.resolve("sales").unwrap();
        let prompt = build_for_source("profit by region", sales);

        assert!(prompt.contains("Table columns: date, category, region"));
        assert!(prompt.contains("Dimensions: category,region,sub_category (Sub-category),date."));
        assert!(prompt.contains("Metrics: sales,quantity,profit."));
        assert!(prompt.contains("Chart types: bar,line,pie."));
        assert!(prompt.contains(r#"User: "profit by region""#));
    }

    #[test]
    fn test_prompt_carries_output_contract() {
        let prompt = build_prompt(
            "sessions over time",
            &["country".to_string()],
            &["sessions".to_string()],
            &BTreeMap::new(),
            &BTreeMap::new(),
            "event_date, country, sessions",
        );
        assert!(prompt.contains(r#"use dimension "date", chart_type "line", "by_time_breakdown":true"#));
        for key in ["\"dimension\"", "\"metric\"", "\"chart_type\"", "\"by_time_breakdown\""] {
            assert!(prompt.contains(key), "missing {}", key);
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let registry = SourceRegistry::builtin("/srv/app").unwrap();
        let events = registry.resolve("events").unwrap();
        assert_eq!(
            build_for_source("revenue by channel", events),
            build_for_source("revenue by channel", events)
        );
    }
}

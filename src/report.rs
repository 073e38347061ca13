//! Short text digests of query results.

use crate::plan::AnalysisPlan;
use crate::query::{QueryKind, QueryResult};
use crate::sources::SourceDescriptor;
use itertools::Itertools;
use std::cmp::Ordering;

pub const NO_DATA: &str = "No data.";

/// Total plus the top three entries for categorical results, total plus the
/// bucket range for time results.
pub fn summarize(result: &QueryResult, metric_label: Option<&str>) -> String {
    if result.is_empty() {
        return NO_DATA.to_string();
    }

    let total = format_amount(result.total());
    let mut parts = vec![match metric_label {
        Some(label) => format!("Total {}: {}.", label, total),
        None => format!("Total: {}.", total),
    }];

    match result.kind {
        QueryKind::Categorical => {
            let top = result
                .rows
                .iter()
                .sorted_by(|a, b| b.value().partial_cmp(&a.value()).unwrap_or(Ordering::Equal))
                .take(3)
                .map(|row| format!("{}: {}", row.label(), format_amount(row.value())));
            parts.extend(top);
        }
        QueryKind::Time | QueryKind::TimeBreakdown => {
            if let (Some(first), Some(last)) = (result.rows.first(), result.rows.last()) {
                parts.push(format!("Time range: {} to {}.", first.label(), last.label()));
            }
        }
    }

    parts.join(" ")
}

/// "Profit by Region", or "Sales by time (by category)" for breakdown plans.
pub fn chart_title(plan: &AnalysisPlan, source: &SourceDescriptor) -> String {
    let metric = source.metric_label(&plan.metric);
    if plan.by_time_breakdown {
        let breakdown = source.breakdown_dimension.as_deref().unwrap_or("category");
        format!("{} by time (by {})", metric, breakdown)
    } else {
        format!("{} by {}", metric, source.dimension_label(&plan.dimension))
    }
}

/// Two decimals with thousands separators: `1234.5` -> `1,234.50`.
pub fn format_amount(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

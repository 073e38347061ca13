//! Source Registry - static catalog of queryable tables
//!
//! Each source declares where its data lives, which columns the table holds,
//! and the closed vocabulary of dimensions and metrics a plan may use.
//! The catalog is built once at startup and handed to every component by
//! reference.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Reserved pseudo-dimension bound to a source's time column.
pub const DATE_DIMENSION: &str = "date";

/// Chart kinds a plan may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
}

impl ChartType {
    pub const ALL: [ChartType; 3] = [ChartType::Bar, ChartType::Line, ChartType::Pie];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChartType::Bar => "Bar chart",
            ChartType::Line => "Line chart",
            ChartType::Pie => "Pie chart",
        }
    }

    /// Case-insensitive lookup; `None` for anything outside the enumeration.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queryable table and its vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,

    /// Display name
    pub name: String,

    /// CSV input consumed by the ETL step, relative to the project root
    pub csv_rel: PathBuf,

    /// SQLite database file, relative to the project root
    pub db_rel: PathBuf,

    /// Absolute CSV path (filled in by the registry)
    #[serde(default)]
    pub csv_path: PathBuf,

    /// Absolute database path (filled in by the registry)
    #[serde(default)]
    pub db_path: PathBuf,

    pub table: String,

    /// Logical column names expected in the table, in order
    pub columns: Vec<String>,

    /// Columns a plan may group by, plus optionally `"date"`
    pub dimensions: Vec<String>,

    /// Columns a plan may sum
    pub metrics: Vec<String>,

    /// Physical column bound to the `"date"` pseudo-dimension
    #[serde(alias = "date_column")]
    pub time_column: String,

    /// Categorical column used as a secondary series for time plans
    #[serde(default)]
    pub breakdown_dimension: Option<String>,

    #[serde(default)]
    pub dimension_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub metric_labels: BTreeMap<String, String>,
}

impl SourceDescriptor {
    /// First declared dimension; the substitute for anything unrecognised.
    pub fn default_dimension(&self) -> &str {
        self.dimensions
            .first()
            .map(String::as_str)
            .unwrap_or(DATE_DIMENSION)
    }

    /// First declared metric.
    pub fn default_metric(&self) -> &str {
        self.metrics.first().map(String::as_str).unwrap_or_default()
    }

    /// Canonical spelling of `raw` if it names a legal dimension (or `"date"`).
    pub fn canonical_dimension(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(DATE_DIMENSION) {
            return Some(DATE_DIMENSION);
        }
        self.dimensions
            .iter()
            .find(|d| d.eq_ignore_ascii_case(raw))
            .map(String::as_str)
    }

    /// Canonical spelling of `raw` if it names a legal metric.
    pub fn canonical_metric(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        self.metrics
            .iter()
            .find(|m| m.eq_ignore_ascii_case(raw))
            .map(String::as_str)
    }

    pub fn has_dimension(&self, name: &str) -> bool {
        name == DATE_DIMENSION || self.dimensions.iter().any(|d| d == name)
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.metrics.iter().any(|m| m == name)
    }

    pub fn dimension_label<'a>(&'a self, name: &'a str) -> &'a str {
        self.dimension_labels
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    pub fn metric_label<'a>(&'a self, name: &'a str) -> &'a str {
        self.metric_labels
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// Comma-separated column list used as the schema description in prompts.
    pub fn columns_description(&self) -> String {
        self.columns.join(", ")
    }

    /// One-line hint of what can be asked of this source.
    pub fn request_hint(&self) -> String {
        let dims: Vec<&str> = self
            .dimensions
            .iter()
            .map(|d| self.dimension_label(d))
            .collect();
        let mets: Vec<&str> = self.metrics.iter().map(|m| self.metric_label(m)).collect();
        let charts: Vec<&str> = ChartType::ALL.iter().map(|c| c.label()).collect();
        format!(
            "Charts you can request: by {} for {}; supported: {}.",
            dims.join(" / "),
            mets.join(" / "),
            charts.join(", ")
        )
    }

    /// Check the catalog invariants for this source.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| AnalyticsError::InvalidCatalog(format!("{}: {}", self.id, msg));

        if self.dimensions.is_empty() {
            return Err(invalid("no dimensions declared".to_string()));
        }
        if self.metrics.is_empty() {
            return Err(invalid("no metrics declared".to_string()));
        }
        if !is_plain_identifier(&self.table) {
            return Err(invalid(format!("table name '{}' is not a plain identifier", self.table)));
        }
        for column in &self.columns {
            if !is_plain_identifier(column) {
                return Err(invalid(format!("column '{}' is not a plain identifier", column)));
            }
        }

        let columns: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        if !columns.contains(self.time_column.as_str()) {
            return Err(invalid(format!(
                "time column '{}' is not one of the declared columns",
                self.time_column
            )));
        }
        if let Some(breakdown) = &self.breakdown_dimension {
            if !columns.contains(breakdown.as_str()) {
                return Err(invalid(format!(
                    "breakdown dimension '{}' is not one of the declared columns",
                    breakdown
                )));
            }
        }
        for dim in self.dimensions.iter().filter(|d| *d != DATE_DIMENSION) {
            if !columns.contains(dim.as_str()) {
                return Err(invalid(format!("dimension '{}' is not a declared column", dim)));
            }
        }
        for metric in &self.metrics {
            if !columns.contains(metric.as_str()) {
                return Err(invalid(format!("metric '{}' is not a declared column", metric)));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.csv_path = root.join(&self.csv_rel);
        self.db_path = root.join(&self.db_rel);
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    sources: Vec<SourceDescriptor>,
}

/// Immutable catalog of sources, in registration order.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<SourceDescriptor>,
}

impl SourceRegistry {
    /// Build a registry, validating every source and resolving its paths
    /// against `root`.
    pub fn new(root: impl AsRef<Path>, sources: Vec<SourceDescriptor>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(sources.len());
        for mut source in sources {
            source.validate()?;
            if !seen.insert(source.id.clone()) {
                return Err(AnalyticsError::InvalidCatalog(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            source.resolve_paths(&root);
            resolved.push(source);
        }

        info!("Source registry ready: {} source(s) under {:?}", resolved.len(), root);
        Ok(Self { sources: resolved })
    }

    /// The stock `sales` and `events` sources.
    pub fn builtin(root: impl AsRef<Path>) -> Result<Self> {
        Self::new(root, vec![sales_source(), events_source()])
    }

    /// Load a catalog from a JSON file shaped `{"sources": [...]}`.
    pub fn from_json_file(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let catalog: CatalogFile = serde_json::from_str(&content)?;
        info!("Loaded {} source(s) from {:?}", catalog.sources.len(), path);
        Self::new(root, catalog.sources)
    }

    pub fn get_source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn resolve(&self, id: &str) -> Result<&SourceDescriptor> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| AnalyticsError::UnknownSource(id.to_string()))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn sales_source() -> SourceDescriptor {
    SourceDescriptor {
        id: "sales".to_string(),
        name: "Sales (Retail)".to_string(),
        csv_rel: PathBuf::from("data/raw/sales.csv"),
        db_rel: PathBuf::from("db/app.sqlite"),
        csv_path: PathBuf::new(),
        db_path: PathBuf::new(),
        table: "analytics".to_string(),
        columns: strings(&[
            "date", "category", "region", "sub_category", "product", "sales", "quantity", "profit",
            "discount",
        ]),
        dimensions: strings(&["category", "region", "sub_category", "date"]),
        metrics: strings(&["sales", "quantity", "profit"]),
        time_column: "date".to_string(),
        breakdown_dimension: Some("category".to_string()),
        dimension_labels: labels(&[
            ("category", "Category"),
            ("region", "Region"),
            ("sub_category", "Sub-category"),
            ("date", "Date"),
        ]),
        metric_labels: labels(&[
            ("sales", "Sales"),
            ("quantity", "Quantity"),
            ("profit", "Profit"),
        ]),
    }
}

fn events_source() -> SourceDescriptor {
    SourceDescriptor {
        id: "events".to_string(),
        name: "Events (Web)".to_string(),
        csv_rel: PathBuf::from("data/raw/events.csv"),
        db_rel: PathBuf::from("db/events.sqlite"),
        csv_path: PathBuf::new(),
        db_path: PathBuf::new(),
        table: "events".to_string(),
        columns: strings(&[
            "event_date", "country", "device_type", "channel", "event_name", "sessions",
            "conversions", "revenue",
        ]),
        dimensions: strings(&["country", "device_type", "channel", "event_name", "date"]),
        metrics: strings(&["sessions", "conversions", "revenue"]),
        time_column: "event_date".to_string(),
        breakdown_dimension: Some("channel".to_string()),
        dimension_labels: labels(&[
            ("country", "Country"),
            ("device_type", "Device"),
            ("channel", "Channel"),
            ("event_name", "Event"),
            ("date", "Date"),
        ]),
        metric_labels: labels(&[
            ("sessions", "Sessions"),
            ("conversions", "Conversions"),
            ("revenue", "Revenue"),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids_in_registration_order() {
        let registry = SourceRegistry::builtin("/srv/app").unwrap();
        assert_eq!(registry.get_source_ids(), vec!["sales", "events"]);
    }

    #[test]
    fn test_resolve_makes_paths_absolute() {
        let registry = SourceRegistry::builtin("/srv/app").unwrap();
        let sales = registry.resolve("sales").unwrap();
        assert_eq!(sales.db_path, PathBuf::from("/srv/app/db/app.sqlite"));
        assert_eq!(sales.csv_path, PathBuf::from("/srv/app/data/raw/sales.csv"));
        assert_eq!(sales.table, "analytics");
    }

    #[test]
    fn test_unknown_source() {
        let registry = SourceRegistry::builtin("/srv/app").unwrap();
        let err = registry.resolve("inventory").unwrap_err();
        assert!(matches!(err, AnalyticsError::UnknownSource(ref id) if id == "inventory"));
    }

    #[test]
    fn test_breakdown_must_be_a_column() {
        let mut source = sales_source();
        source.breakdown_dimension = Some("segment".to_string());
        let err = SourceRegistry::new("/srv/app", vec![source]).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidCatalog(_)));
    }

    #[test]
    fn test_time_column_must_be_a_column() {
        let mut source = events_source();
        source.time_column = "ts".to_string();
        assert!(source.validate().is_err());
    }

    #[test]
    fn test_rejects_non_identifier_columns() {
        let mut source = sales_source();
        source.columns.push("profit; DROP TABLE analytics".to_string());
        assert!(source.validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err =
            SourceRegistry::new("/srv/app", vec![sales_source(), sales_source()]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_canonical_lookup_is_case_insensitive() {
        let sales = sales_source();
        assert_eq!(sales.canonical_dimension(" Region "), Some("region"));
        assert_eq!(sales.canonical_dimension("DATE"), Some("date"));
        assert_eq!(sales.canonical_metric("Profit"), Some("profit"));
        assert_eq!(sales.canonical_metric("discount"), None);
    }

    #[test]
    fn test_labels_fall_back_to_name() {
        let mut sales = sales_source();
        sales.metric_labels.remove("quantity");
        assert_eq!(sales.metric_label("quantity"), "quantity");
        assert_eq!(sales.dimension_label("sub_category"), "Sub-category");
    }

    #[test]
    fn test_chart_type_parse() {
        assert_eq!(ChartType::parse("LINE"), Some(ChartType::Line));
        assert_eq!(ChartType::parse("scatter"), None);
    }

    #[test]
    fn test_request_hint() {
        let hint = sales_source().request_hint();
        assert!(hint.contains("Category / Region / Sub-category / Date"));
        assert!(hint.contains("Bar chart, Line chart, Pie chart"));
    }

    #[test]
    fn test_catalog_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        let json = r#"{
  "sources": [{
    "id": "orders",
    "name": "Orders",
    "csv_rel": "data/orders.csv",
    "db_rel": "db/orders.sqlite",
    "table": "orders",
    "columns": ["ordered_at", "store", "amount"],
    "dimensions": ["store", "date"],
    "metrics": ["amount"],
    "date_column": "ordered_at"
  }]
}"#;
        std::fs::write(&path, json).unwrap();

        let registry = SourceRegistry::from_json_file(&path, dir.path()).unwrap();
        let orders = registry.resolve("orders").unwrap();
        assert_eq!(orders.time_column, "ordered_at");
        assert_eq!(orders.breakdown_dimension, None);
        assert_eq!(orders.db_path, dir.path().join("db/orders.sqlite"));
    }
}

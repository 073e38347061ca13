//! Natural-language analytics: one sentence in, a validated analysis plan,
//! an aggregation query, and its result out.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod prompt;
pub mod query;
pub mod report;
pub mod resolver;
pub mod sources;

pub use config::AppConfig;
pub use error::{AnalyticsError, Result};
pub use llm::{OllamaClient, TextGenerator};
pub use pipeline::{AnalysisOutcome, Analyst};
pub use plan::AnalysisPlan;
pub use query::{QueryKind, QueryResult, ResultRow};
pub use resolver::{PlanOrigin, PlanResolver, Resolution};
pub use sources::{ChartType, SourceDescriptor, SourceRegistry};

//! One request end to end: resolve the plan, run the query, summarize.

use crate::error::{AnalyticsError, Result};
use crate::query::{self, CompiledQuery, QueryResult};
use crate::report;
use crate::resolver::{PlanResolver, Resolution};
use crate::sources::{SourceDescriptor, SourceRegistry};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub source_id: String,
    pub request: String,
    pub resolution: Resolution,
    pub title: String,
    pub result: QueryResult,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DryRun {
    pub source_id: String,
    pub resolution: Resolution,
    pub query: CompiledQuery,
}

pub struct Analyst<'a> {
    registry: &'a SourceRegistry,
    resolver: PlanResolver,
}

impl<'a> Analyst<'a> {
    pub fn new(registry: &'a SourceRegistry, resolver: PlanResolver) -> Self {
        Self { registry, resolver }
    }

    /// Resolve `request` against `source_id`, execute it, and summarize.
    ///
    /// Fails only for an unknown source or a storage failure; generator
    /// problems are absorbed by the resolver.
    pub async fn ask(&self, source_id: &str, request: &str) -> Result<AnalysisOutcome> {
        let source = self.registry.resolve(source_id)?;
        let resolution = self.resolver.resolve(request, source).await;
        let compiled = query::compile(&resolution.plan, source)?;
        let result = run_blocking(compiled, source).await?;
        let summary = report::summarize(&result, None);
        let title = report::chart_title(&resolution.plan, source);

        info!(
            "Answered '{}' on '{}': {} row(s), {:?} plan",
            request.trim(),
            source_id,
            result.rows.len(),
            resolution.origin
        );

        Ok(AnalysisOutcome {
            source_id: source.id.clone(),
            request: request.to_string(),
            resolution,
            title,
            result,
            summary,
        })
    }

    /// Resolve and compile without touching storage.
    pub async fn dry_run(&self, source_id: &str, request: &str) -> Result<DryRun> {
        let source = self.registry.resolve(source_id)?;
        let resolution = self.resolver.resolve(request, source).await;
        let query = query::compile(&resolution.plan, source)?;
        Ok(DryRun {
            source_id: source.id.clone(),
            resolution,
            query,
        })
    }
}

/// Run a compiled statement on the blocking pool so a slow table scan does
/// not stall the async runtime.
async fn run_blocking(compiled: CompiledQuery, source: &SourceDescriptor) -> Result<QueryResult> {
    let sql = compiled.sql.clone();
    let source = source.clone();
    tokio::task::spawn_blocking(move || query::run(&compiled, &source))
        .await
        .map_err(|e| AnalyticsError::query(format!("query task failed: {}", e), sql))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryKind;

    #[tokio::test]
    async fn test_unknown_source_is_surfaced() {
        let registry = SourceRegistry::builtin("/srv/app").unwrap();
        let analyst = Analyst::new(&registry, PlanResolver::offline());
        let err = analyst.ask("inventory", "stock by warehouse").await.unwrap_err();
        assert!(matches!(err, AnalyticsError::UnknownSource(_)));
    }

    #[tokio::test]
    async fn test_dry_run_needs_no_database() {
        let registry = SourceRegistry::builtin("/srv/app").unwrap();
        let analyst = Analyst::new(&registry, PlanResolver::offline());
        let dry = analyst.dry_run("events", "revenue by time").await.unwrap();
        assert_eq!(dry.query.kind, QueryKind::TimeBreakdown);
        assert!(dry.query.sql.contains("\"channel\" AS category"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_storage_failure_carries_query_text() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::builtin(dir.path()).unwrap();
        let analyst = Analyst::new(&registry, PlanResolver::offline());

        let err = analyst.ask("sales", "profit by region").await.unwrap_err();
        match err {
            AnalyticsError::QueryExecution { message, query } => {
                assert!(message.contains("app.sqlite"), "{}", message);
                assert!(query.starts_with("SELECT \"region\" AS dim"), "{}", query);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

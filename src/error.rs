use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid source catalog: {0}")]
    InvalidCatalog(String),

    #[error("Text generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Plan parse failure: {0}")]
    PlanParseFailure(String),

    /// An identifier outside the source vocabulary reached the query compiler.
    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    #[error("Query execution failed: {message}. Query: {query}")]
    QueryExecution { message: String, query: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalyticsError {
    /// Wrap a storage failure together with the statement that was attempted.
    pub fn query(message: impl std::fmt::Display, query: impl Into<String>) -> Self {
        AnalyticsError::QueryExecution {
            message: message.to_string(),
            query: query.into(),
        }
    }

    /// True for failures the resolver absorbs by falling back.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::GenerationUnavailable(_) | AnalyticsError::PlanParseFailure(_)
        )
    }
}

impl From<reqwest::Error> for AnalyticsError {
    fn from(err: reqwest::Error) -> Self {
        AnalyticsError::GenerationUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

use thiserror::Error;

/// Error taxonomy for the orchestrator core. Variant names match the
/// implementation-free kinds named in the propagation policy: a driver maps
/// wire errors onto these, the turn engine decides which are turn-fatal, and
/// `code()` gives every HTTP response a stable machine-readable tag.
#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("request rejected ({status}): {message}")]
    RequestRejected { status: u16, message: String },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("context budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("conversation not found: {id}")]
    NotFound { id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WeaveError {
    /// Short machine-readable code, sent to clients in the REST error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            WeaveError::TransportFailure(_) => "TRANSPORT_FAILURE",
            WeaveError::RequestRejected { .. } => "REQUEST_REJECTED",
            WeaveError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            WeaveError::AuthFailed(_) => "AUTH_FAILED",
            WeaveError::SchemaValidation(_) => "SCHEMA_VALIDATION",
            WeaveError::ToolExecution(_) => "TOOL_EXECUTION",
            WeaveError::BudgetExceeded(_) => "BUDGET_EXCEEDED",
            WeaveError::Cancelled => "CANCELLED",
            WeaveError::Timeout { .. } => "TIMEOUT",
            WeaveError::NotFound { .. } => "NOT_FOUND",
            WeaveError::Conflict(_) => "CONFLICT",
            WeaveError::Config(_) => "CONFIG_ERROR",
            WeaveError::Database(_) => "DATABASE_ERROR",
            WeaveError::Http(_) => "HTTP_ERROR",
            WeaveError::Serialization(_) => "SERIALIZATION_ERROR",
            WeaveError::Io(_) => "IO_ERROR",
            WeaveError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this error kind maps to for the REST surface.
    pub fn http_status(&self) -> u16 {
        match self {
            WeaveError::AuthFailed(_) => 401,
            WeaveError::RequestRejected { .. } | WeaveError::SchemaValidation(_) => 400,
            WeaveError::NotFound { .. } => 404,
            WeaveError::Conflict(_) => 409,
            WeaveError::BudgetExceeded(_) => 413,
            WeaveError::Timeout { .. } => 504,
            WeaveError::Cancelled => 499,
            _ => 500,
        }
    }

    /// True for kinds that fail the whole turn (§7 propagation policy).
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            WeaveError::TransportFailure(_)
                | WeaveError::ProviderUnavailable(_)
                | WeaveError::Timeout { .. }
                | WeaveError::AuthFailed(_)
                | WeaveError::BudgetExceeded(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WeaveError>;

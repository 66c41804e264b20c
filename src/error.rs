use serde::Serialize;

/// App-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error, kind }` so machine consumers get structured error messages.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller error detected before any network call (empty prompt, no models, unknown metric).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transport-level failure: connection refused, DNS, timeout.
    #[error("Evaluation backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend answered, but not with a usable success payload.
    #[error("Evaluation backend error{}: {detail}", status_suffix(.status))]
    Backend { status: Option<u16>, detail: String },

    /// A result entry without a model identifier.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// The run-level failure taxonomy surfaced to callers of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestErrorKind {
    InvalidInput,
    BackendUnavailable,
    BackendError,
    MalformedResponse,
}

impl AppError {
    /// Request-level classification, or `None` for local storage/config/internal failures.
    pub fn kind(&self) -> Option<RequestErrorKind> {
        match self {
            AppError::InvalidInput(_) => Some(RequestErrorKind::InvalidInput),
            AppError::BackendUnavailable(_) => Some(RequestErrorKind::BackendUnavailable),
            AppError::Backend { .. } => Some(RequestErrorKind::BackendError),
            AppError::MalformedResponse(_) => Some(RequestErrorKind::MalformedResponse),
            _ => None,
        }
    }

    fn kind_str(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::Backend { .. } => "backend_error",
            AppError::MalformedResponse(_) => "malformed_response",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind_str())?;
        s.end()
    }
}

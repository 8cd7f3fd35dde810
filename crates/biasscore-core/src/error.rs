//! Error types for the biasscore-core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors, and a closed
//! `ErrorCode` vocabulary that the HTTP layer maps onto status codes.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Reading the config file from disk failed.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// The path that failed to read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from interacting with an LLM transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP request to the LLM endpoint failed at the transport level.
    #[error("LLM transport request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The LLM endpoint rejected our credentials.
    #[error("LLM authentication failed (401)")]
    AuthFailed,

    /// The LLM endpoint requires payment / billing is not current (402).
    #[error("LLM payment required (402)")]
    PaymentRequired,

    /// The LLM endpoint rate-limited the request (429).
    #[error("LLM rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if provided by the API.
        retry_after_secs: Option<u64>,
    },

    /// The LLM endpoint was unreachable or returned a server error (5xx).
    #[error("LLM endpoint unavailable: {message}")]
    Unavailable {
        /// Details about the failure.
        message: String,
    },

    /// The response could not be parsed at the JSON envelope level.
    #[error("malformed LLM response envelope: {0}")]
    Malformed(String),

    /// The response stream closed prematurely.
    #[error("LLM response streaming error: {0}")]
    StreamingError(String),
}

/// Errors from the content parser (score/confidence/explanation extraction).
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    /// No strategy could extract a score from the payload.
    #[error("could not extract a score from the LLM reply")]
    NoScoreFound,
}

/// Errors from the composite-score calculator.
#[derive(Debug, thiserror::Error)]
pub enum CalculatorError {
    /// After applying `handle_invalid`, fewer than one perspective has a valid score.
    #[error("all perspectives produced invalid scores")]
    AllPerspectivesInvalid,
}

/// Errors from the LLM ensemble orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    /// Every model failed or produced invalid output.
    #[error("all perspectives produced invalid scores")]
    AllPerspectivesInvalid,

    /// A transport error propagated without any usable fallback.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The per-job deadline elapsed before the ensemble completed.
    #[error("ensemble timed out")]
    Timeout,
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would violate a uniqueness constraint.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(source: sqlx::Error) -> Self {
        Self::Query { source }
    }
}

/// Errors from the end-to-end rescore flow.
#[derive(Debug, thiserror::Error)]
pub enum ScoreManagerError {
    /// The article does not exist.
    #[error("article not found: {0}")]
    NotFound(i64),

    /// The ensemble produced no usable score.
    #[error("all perspectives produced invalid scores")]
    AllPerspectivesInvalid,

    /// An LLM transport error surfaced as fatal for the job.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The per-job deadline elapsed.
    #[error("rescore timed out")]
    Timeout,

    /// A storage error occurred.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The closed vocabulary of error codes surfaced over HTTP and in progress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request was malformed (bad input).
    Validation,
    /// The requested resource does not exist.
    NotFound,
    /// The request conflicts with current state.
    Conflict,
    /// LLM credential rejected.
    LlmAuth,
    /// LLM billing/payment required.
    LlmPayment,
    /// LLM rate limit exhausted.
    LlmRateLimited,
    /// LLM endpoint unavailable.
    LlmUnavailable,
    /// LLM response stream broke.
    LlmStreaming,
    /// Every perspective failed to produce a usable score.
    LlmAllPerspectivesInvalid,
    /// A deadline elapsed.
    Timeout,
    /// An unclassified internal error.
    Internal,
}

impl ScoreManagerError {
    /// Map this error onto the closed error-code vocabulary (spec.md §7).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AllPerspectivesInvalid => ErrorCode::LlmAllPerspectivesInvalid,
            Self::Timeout => ErrorCode::Timeout,
            Self::Transport(e) => e.code(),
            Self::Store(_) => ErrorCode::Internal,
        }
    }
}

impl TransportError {
    /// Map this error onto the closed error-code vocabulary (spec.md §7).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AuthFailed => ErrorCode::LlmAuth,
            Self::PaymentRequired => ErrorCode::LlmPayment,
            Self::RateLimited { .. } => ErrorCode::LlmRateLimited,
            Self::Unavailable { .. } => ErrorCode::LlmUnavailable,
            Self::StreamingError(_) => ErrorCode::LlmStreaming,
            Self::Malformed(_) | Self::Request(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_field_message() {
        let err = ConfigError::MissingField {
            field: "ensemble.models".to_string(),
        };
        assert_eq!(err.to_string(), "missing required config field: ensemble.models");
    }

    #[test]
    fn config_error_file_not_found_message() {
        let err = ConfigError::FileNotFound {
            path: "/home/user/.biasscore/config.toml".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "config file not found: /home/user/.biasscore/config.toml"
        );
    }

    #[test]
    fn transport_error_rate_limited_message() {
        let err = TransportError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn transport_error_code_mapping() {
        assert_eq!(TransportError::AuthFailed.code(), ErrorCode::LlmAuth);
        assert_eq!(TransportError::PaymentRequired.code(), ErrorCode::LlmPayment);
        assert_eq!(
            TransportError::RateLimited { retry_after_secs: None }.code(),
            ErrorCode::LlmRateLimited
        );
        assert_eq!(
            TransportError::Unavailable { message: "x".into() }.code(),
            ErrorCode::LlmUnavailable
        );
        assert_eq!(
            TransportError::StreamingError("x".into()).code(),
            ErrorCode::LlmStreaming
        );
    }

    #[test]
    fn error_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::LlmAllPerspectivesInvalid).unwrap();
        assert_eq!(json, "\"llm_all_perspectives_invalid\"");
    }

    #[test]
    fn score_manager_error_not_found_code() {
        let err = ScoreManagerError::NotFound(42);
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}

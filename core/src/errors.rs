//! Petition engine error types
//!
//! Every rejected operation leaves the data model unchanged; the category
//! tells the transport how to report it and whether a retry is safe.

use crate::db::DbError;
use crate::model::SurveyId;
use thiserror::Error;

/// Error category for structured logging and transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or missing input
    Validation,
    /// Phone number already signed this petition
    Conflict,
    /// Caller is not the petition's creator
    Forbidden,
    /// Absent, or not yet visible to public callers
    NotFound,
    /// Owner-scoped operation without a caller identity
    Unauthenticated,
    /// Underlying store failure
    Storage,
    /// Misconfigured deployment
    Config,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Conflict => "CONFLICT_ERROR",
            Self::Forbidden => "FORBIDDEN_ERROR",
            Self::NotFound => "NOT_FOUND_ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Config => "CONFIG_ERROR",
        }
    }

    /// HTTP-style status reported to callers
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Storage | Self::Config => 500,
        }
    }

    /// Whether an idempotent read may be retried after this error.
    ///
    /// Never apply this to `SubmitSignature`: after an ambiguous storage
    /// failure the caller must check `has_signed` first.
    pub fn retryable_read(&self) -> bool {
        matches!(self, Self::Storage)
    }
}

#[derive(Debug, Error)]
pub enum PetitionError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        survey_id: Option<SurveyId>,
    },

    #[error("this phone number has already signed the petition")]
    Conflict,

    #[error("forbidden: caller does not own this petition")]
    Forbidden,

    #[error("petition not found")]
    NotFound,

    #[error("authentication required")]
    Unauthenticated,

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PetitionError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Conflict => ErrorCategory::Conflict,
            Self::Forbidden => ErrorCategory::Forbidden,
            Self::NotFound => ErrorCategory::NotFound,
            Self::Unauthenticated => ErrorCategory::Unauthenticated,
            Self::Storage { .. } => ErrorCategory::Storage,
            Self::Config { .. } => ErrorCategory::Config,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            survey_id: None,
        }
    }

    /// Validation failure attributed to one survey question
    pub fn survey_validation(survey_id: SurveyId, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            survey_id: Some(survey_id),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The survey a validation error refers to, if any
    pub fn survey_id(&self) -> Option<SurveyId> {
        match self {
            Self::Validation { survey_id, .. } => *survey_id,
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PetitionError {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage_with_source("sqlite failure", err)
    }
}

impl From<DbError> for PetitionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(e) => e.into(),
            other => Self::storage_with_source("database failure", other),
        }
    }
}

/// Result type for petition operations
pub type Result<T> = std::result::Result<T, PetitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_statuses() {
        assert_eq!(PetitionError::validation("x").category().status_code(), 400);
        assert_eq!(PetitionError::Conflict.category().status_code(), 409);
        assert_eq!(PetitionError::Forbidden.category().status_code(), 403);
        assert_eq!(PetitionError::NotFound.category().status_code(), 404);
        assert_eq!(PetitionError::Unauthenticated.category().status_code(), 401);
        assert_eq!(PetitionError::storage("x").category().status_code(), 500);
    }

    #[test]
    fn only_storage_reads_are_retryable() {
        assert!(ErrorCategory::Storage.retryable_read());
        assert!(!ErrorCategory::Conflict.retryable_read());
        assert!(!ErrorCategory::Validation.retryable_read());
    }

    #[test]
    fn db_errors_become_storage() {
        let err: PetitionError = DbError::Pool("exhausted".to_string()).into();
        assert_eq!(err.category(), ErrorCategory::Storage);
    }

    #[test]
    fn survey_validation_carries_id() {
        let err = PetitionError::survey_validation(SurveyId(7), "pick one");
        assert_eq!(err.survey_id(), Some(SurveyId(7)));
        assert_eq!(err.to_string(), "validation error: pick one");
    }
}

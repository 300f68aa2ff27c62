//! Row-level error types for the ingestion pipeline

use thiserror::Error;

/// A row that cannot be recorded but does not threaten the rest of the file
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("Row has no value for identifier field '{0}'")]
    MissingIdentifier(String),

    #[error("Invalid value for '{field}': '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl RowError {
    pub fn invalid(field: &str, value: &str, reason: impl Into<String>) -> Self {
        RowError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// How a failed row affects the file being processed
#[derive(Debug)]
pub enum RowFailure {
    /// Known bad input; recorded as a bad-line error with its message
    Invalid(RowError),
    /// Anything else raised while hashing or diffing, including stored state
    /// that no longer decodes; recorded with a trace
    Unexpected(anyhow::Error),
    /// Storage failure; aborts and resets the file
    Fatal(anyhow::Error),
}

/// Decode failures concern one stored row, not the database as a whole
fn is_decode_error(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_))
}

impl From<RowError> for RowFailure {
    fn from(err: RowError) -> Self {
        RowFailure::Invalid(err)
    }
}

impl From<anyhow::Error> for RowFailure {
    fn from(err: anyhow::Error) -> Self {
        if let Some(row_err) = err.downcast_ref::<RowError>() {
            return RowFailure::Invalid(row_err.clone());
        }
        let storage = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
            .any(|db_err| !is_decode_error(db_err));
        if storage {
            return RowFailure::Fatal(err);
        }
        RowFailure::Unexpected(err)
    }
}

impl From<sqlx::Error> for RowFailure {
    fn from(err: sqlx::Error) -> Self {
        if is_decode_error(&err) {
            RowFailure::Unexpected(err.into())
        } else {
            RowFailure::Fatal(err.into())
        }
    }
}

//! Error types for Crew Marketplace Lambda functions.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Crew Marketplace Lambda functions.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Caller is authenticated but not allowed to act on the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (duplicate application, RSVP, interest)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Auth(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// Message safe to return to API clients.
    ///
    /// Server-side failures are logged in full but only reported generically.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(m)
            | Error::Auth(m)
            | Error::Forbidden(m)
            | Error::NotFound(m)
            | Error::Conflict(m) => m.clone(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(crate::validation::describe(&errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::Auth("x".into()).status_code(), 401);
        assert_eq!(Error::Forbidden("x".into()).status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Conflict("x".into()).status_code(), 409);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let err = Error::Config("DB_SECRET_ARN not set".into());
        assert_eq!(err.public_message(), "Internal server error");

        let err = Error::Conflict("Already applied to this gig".into());
        assert_eq!(err.public_message(), "Already applied to this gig");
    }
}

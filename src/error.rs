use thiserror::Error;

#[derive(Debug, Error)]
pub enum AvaBotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("no credentials available: {0}")]
    NoCredentials(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub use crate::Result;

impl AvaBotError {
    /// Configuration and credential problems abort the requested operation
    /// instead of being reported as an ordinary vendor failure.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            AvaBotError::Config(_) | AvaBotError::Credentials(_) | AvaBotError::NoCredentials(_)
        )
    }
}

impl From<reqwest::Error> for AvaBotError {
    fn from(err: reqwest::Error) -> Self {
        AvaBotError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for AvaBotError {
    fn from(err: serde_json::Error) -> Self {
        AvaBotError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_upstream_status_and_body() {
        let err = AvaBotError::Upstream {
            status: 422,
            body: "invalid amount".to_string(),
        };
        assert_eq!(format!("{err}"), "upstream returned 422: invalid amount");
        assert!(!err.is_setup_error());
    }

    #[test]
    fn credential_errors_are_setup_errors() {
        assert!(AvaBotError::NoCredentials("x".to_string()).is_setup_error());
        assert!(AvaBotError::Credentials("x".to_string()).is_setup_error());
        assert!(AvaBotError::Config("x".to_string()).is_setup_error());
        let err = AvaBotError::Config("x".to_string());
        assert!(format!("{err}").contains("configuration error"));
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt::Display;

/// Errors that can occur in the versus server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("username '{0}' is already in use")]
    UsernameInUse(String),

    #[error("{kind} {id} already exists")]
    Conflict { kind: &'static str, id: String },

    #[error("invalid credential")]
    InvalidCredential,

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: &'static str },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("storage error: {reason}")]
    Storage {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl ServerError {
    pub fn not_found(kind: &'static str, id: impl Display) -> Self {
        ServerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn conflict(kind: &'static str, id: impl Display) -> Self {
        ServerError::Conflict {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServerError::NotFound { .. })
    }

    /// The status code the HTTP layer answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServerError::UsernameInUse(_) | ServerError::Conflict { .. } => StatusCode::CONFLICT,
            ServerError::InvalidCredential | ServerError::Unauthorized { .. } => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServerError::Storage { .. } | ServerError::InvalidConfig { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ServerError::UsernameInUse(_) => {
                "Username is already in use. Please choose a different username.".to_string()
            }
            ServerError::Storage { .. } | ServerError::InvalidConfig { .. } => {
                // Internals stay in the log.
                tracing::error!(error = %self, "Request failed.");
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = ServerError::not_found("player", "p-1");
        assert_eq!(err.to_string(), "player p-1 not found");
        assert!(err.is_not_found());

        let err = ServerError::UsernameInUse("alice".into());
        assert_eq!(err.to_string(), "username 'alice' is already in use");

        let err = ServerError::conflict("session", "g-1");
        assert_eq!(err.to_string(), "session g-1 already exists");
        assert!(!err.is_not_found());
    }

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        assert_eq!(
            ServerError::not_found("session", "x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::UsernameInUse("a".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::InvalidCredential.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::Storage {
                reason: "backend down".into(),
                source: None
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

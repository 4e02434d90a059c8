//! Server-specific error types

use cmaf_ingest_core::Error as CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// URL did not match any recognized upload pattern, or a path component
    /// attempted to escape the storage root (spec §6/§7).
    #[error("bad request: {0}")]
    BadUrl(String),

    #[error("authentication required for channel {0}")]
    AuthRequired(String),

    #[error("invalid credentials for channel {0}")]
    AuthInvalid(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, body) = match &self {
            ServerError::BadUrl(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::AuthRequired(_) | ServerError::AuthInvalid(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ServerError::Core(CoreError::ClientFraming(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Core(CoreError::Authentication(_)) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ServerError::Core(_) | ServerError::Io(_) | ServerError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        if status == StatusCode::UNAUTHORIZED {
            return (
                status,
                [(axum::http::header::WWW_AUTHENTICATE, "Basic")],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Closed error taxonomy for the whole service.
///
/// Every fallible operation below the route layer returns one of these five
/// kinds. Routes never build status codes themselves; the single mapping to a
/// transport response lives in the `ResponseError` impl at the bottom of this
/// file. Collaborator failures (sqlx, redis, model provider) are wrapped as
/// `Database` so handlers never see collaborator-specific error shapes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{resource} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("{message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    #[error("{0}")]
    Forbidden(String),

    // Display is intentionally generic: the cause never reaches the client.
    #[error("Internal server error")]
    Database(#[source] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: &'static str) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn db(cause: impl Into<anyhow::Error>) -> Self {
        Self::Database(cause.into())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        Self::db(e)
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        Self::db(e)
    }
}

impl From<async_openai::error::OpenAIError> for AppError {
    fn from(e: async_openai::error::OpenAIError) -> Self {
        Self::db(e)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        // Exhaustive on purpose: a new variant must pick its status here.
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AppError::Database(cause) = self {
            error!("request failed on a backing store or provider: {cause:?}");
        }

        let mut body = json!({ "message": self.to_string() });
        if let AppError::Validation {
            field: Some(field), ..
        } = self
        {
            body["field"] = json!(field);
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}

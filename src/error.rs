use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Pin not found: {0}")]
    NotFoundPin(String),
    #[error("Pin {0} is not an output device")]
    NotOutput(u8),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Unrecognized set value: {0}")]
    UnknownSetValue(String),
    #[error("Unknown request type: {0}")]
    UnknownRequest(String),
    #[error("Renaming disallowed")]
    RenameDisallowed,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persist(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFoundPin(_) => StatusCode::NOT_FOUND,
            AppError::NotOutput(_)
            | AppError::InvalidValue(_)
            | AppError::UnknownSetValue(_)
            | AppError::UnknownRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RenameDisallowed => StatusCode::FORBIDDEN,
            AppError::Config(_) | AppError::Persist(_) | AppError::Gpio(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

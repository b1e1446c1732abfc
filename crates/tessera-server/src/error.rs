use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tessera_core::TesseraError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    TotalFailure(String),
}

impl From<TesseraError> for AppError {
    fn from(err: TesseraError) -> Self {
        match err {
            TesseraError::InvalidInput(msg) => AppError::InvalidInput(msg),
            e @ TesseraError::TotalFailure { .. } => AppError::TotalFailure(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::TotalFailure(_) => "TOTAL_FAILURE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::TotalFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        match &self {
            AppError::InvalidInput(msg) => {
                tracing::warn!(message = %msg, error_code = %code, "Invalid input");
            }
            AppError::TotalFailure(msg) => {
                tracing::error!(message = %msg, error_code = %code, "All domains failed");
            }
        }

        tracing::debug!(
            status_code = %status.as_u16(),
            error_code = %code,
            error_message = %self,
            "Returning error response"
        );

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

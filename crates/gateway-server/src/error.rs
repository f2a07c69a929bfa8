use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gateway::{errors::GatewayError, tools::ToolError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid configuration value for {env_var}: {reason}")]
    Invalid { env_var: String, reason: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a settings path such as `providers.openai.api_key` to the environment
/// variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    format!("GATEWAY_{}", field_path.to_uppercase().replace('.', "__"))
}

/// A non-2xx response with a `{"error": {"code", "message"}}` body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new<M: Into<String>>(status: StatusCode, code: &'static str, message: M) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", message)
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        let (status, code) = match &error {
            GatewayError::Requirement(_) => (StatusCode::PRECONDITION_FAILED, "requirement_unmet"),
            GatewayError::Budget(_) => (StatusCode::TOO_MANY_REQUESTS, "budget_exceeded"),
            GatewayError::InvalidRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, code, error.to_string())
    }
}

impl From<ToolError> for ApiError {
    fn from(error: ToolError) -> Self {
        let status = match &error {
            ToolError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            ToolError::InvalidParameters(_) | ToolError::PathEscape(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.code(), error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, "{}", self.message);
        } else {
            tracing::debug!(code = self.code, status = %self.status, "{}", self.message);
        }

        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::budget::{BudgetExceeded, BudgetLimit};

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("server.port"), "GATEWAY_SERVER__PORT");
        assert_eq!(
            to_env_var("providers.openai.api_key"),
            "GATEWAY_PROVIDERS__OPENAI__API_KEY"
        );
    }

    #[test]
    fn test_status_mapping() {
        let budget = GatewayError::from(BudgetExceeded {
            persona: "p".into(),
            limit: BudgetLimit::Requests,
            max: 1.0,
        });
        assert_eq!(ApiError::from(budget).status, StatusCode::TOO_MANY_REQUESTS);

        let not_found = ApiError::from(ToolError::ToolNotFound("x".into()));
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.code, "tool_not_found");

        let escape = ApiError::from(ToolError::PathEscape("../x".into()));
        assert_eq!(escape.status, StatusCode::BAD_REQUEST);

        let failed = ApiError::from(ToolError::ExecutionError("disk full".into()));
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

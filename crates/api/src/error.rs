//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use portal_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),

    // Billing
    #[error("Payment gateway error")]
    Gateway(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            ApiError::InvalidWebhookSignature => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                self.to_string(),
            ),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Billing
            ApiError::Gateway(_) => (
                StatusCode::BAD_GATEWAY,
                "GATEWAY_ERROR",
                "Payment gateway error".to_string(),
            ),

            // Internal
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::ClientNotFound(_)
            | BillingError::InvoiceNotFound(_)
            | BillingError::SubscriptionNotFound(_)
            | BillingError::PackageNotFound(_)
            | BillingError::ProjectNotFound(_) => ApiError::NotFound,
            BillingError::InvoiceAlreadyPaid(number) => {
                ApiError::Conflict(format!("Invoice {} is already paid", number))
            }
            BillingError::DuplicateSubscription => {
                ApiError::Conflict("An active subscription already exists for this package".to_string())
            }
            BillingError::SubscriptionNotActive(status) => {
                ApiError::Conflict(format!("Subscription is not active (status: {})", status))
            }
            BillingError::CaptureNotCompleted(status) => {
                ApiError::BadRequest(format!("Payment capture not completed (status: {})", status))
            }
            BillingError::UnknownModel { provider, model } => ApiError::Validation(format!(
                "No pricing configured for provider '{}' model '{}'",
                provider, model
            )),
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::Unauthorized(_) => ApiError::Forbidden,
            BillingError::WebhookSignatureInvalid => ApiError::InvalidWebhookSignature,
            BillingError::WebhookPayloadInvalid(msg) => ApiError::BadRequest(msg),
            BillingError::GatewayApi(msg) => {
                tracing::error!(error = %msg, "Gateway API error");
                ApiError::Gateway(msg)
            }
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Config(msg) | BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal billing error");
                ApiError::Internal
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_mismatch_maps_to_forbidden() {
        // An authenticated caller hitting another tenant's invoice gets 403
        let err = ApiError::from(BillingError::Unauthorized(
            "Invoice belongs to a different client".to_string(),
        ));
        assert!(matches!(&err, ApiError::Forbidden));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_already_paid_maps_to_conflict() {
        let err = ApiError::from(BillingError::InvoiceAlreadyPaid("INV-2026-0001".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Gateway API error: {0}")]
    GatewayApi(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Service package not found: {0}")]
    PackageNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload malformed: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Invoice is already paid: {0}")]
    InvoiceAlreadyPaid(String),

    #[error("Payment capture not completed (gateway status: {0})")]
    CaptureNotCompleted(String),

    #[error("An active subscription already exists for this package")]
    DuplicateSubscription,

    #[error("Subscription is not active (status: {0})")]
    SubscriptionNotActive(String),

    #[error("Unknown pricing for provider '{provider}' model '{model}'")]
    UnknownModel { provider: String, model: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::GatewayApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

//! Portal Billing Module
//!
//! Handles PayPal integration for the client portal: invoice issuance
//! and payment, recurring subscriptions, webhook reconciliation, usage
//! pricing, and project budget alerting.
//!
//! ## Features
//!
//! - **Invoices**: Sequential per-year numbering, transactional issuance, HTML export
//! - **Payments**: Two-step order create/capture flow for one-time invoices
//! - **Subscriptions**: Recurring service packages on monthly or annual cycles
//! - **Webhooks**: Signature-verified, idempotent event reconciliation
//! - **Pricing**: Per-model token rates and usage cost aggregation
//! - **Budget Alerts**: Per-project usage budgets with one-shot email alerts
//! - **Email Notifications**: Receipts, invoice notices, lifecycle alerts

pub mod budget;
pub mod client;
pub mod email;
pub mod error;
pub mod invoices;
pub mod payments;
pub mod pricing;
pub mod subscriptions;
pub mod webhooks;

// Budget
pub use budget::{BudgetAlertService, BudgetStatus};

// Client
pub use client::{
    CaptureResult, GatewaySubscriptionCreated, OrderCreated, PayPalClient, PayPalConfig,
    WebhookTransmission,
};

// Email
pub use email::{BillingEmailService, EmailConfig};

// Error
pub use error::{BillingError, BillingResult};

// Invoices
pub use invoices::{InvoiceService, NewInvoiceItem};

// Payments
pub use payments::{PaymentFlow, PaymentRecorded};

// Pricing
pub use pricing::{PricingTable, UnknownModelPolicy, UsageBucket};

// Subscriptions
pub use subscriptions::{SubscriptionService, SubscriptionStarted};

// Webhooks
pub use webhooks::{GatewayEvent, WebhookHandler, WebhookOutcome};

use sqlx::PgPool;

/// Aggregate billing service wired up from the environment.
/// Shared clients (gateway, email) are cloned into each sub-service.
#[derive(Clone)]
pub struct BillingService {
    pub paypal: PayPalClient,
    pub invoices: InvoiceService,
    pub payments: PaymentFlow,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
    pub budget: BudgetAlertService,
    pub pricing: PricingTable,
}

impl BillingService {
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let paypal = PayPalClient::from_env()?;
        let email = BillingEmailService::from_env();
        Ok(Self {
            invoices: InvoiceService::new(pool.clone(), email.clone()),
            payments: PaymentFlow::new(paypal.clone(), pool.clone(), email.clone()),
            subscriptions: SubscriptionService::new(paypal.clone(), pool.clone(), email.clone()),
            webhooks: WebhookHandler::new(paypal.clone(), pool.clone(), email.clone()),
            budget: BudgetAlertService::new(pool, email),
            pricing: PricingTable::from_env(),
            paypal,
        })
    }
}

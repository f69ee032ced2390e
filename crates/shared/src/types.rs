//! Common types used across the portal

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Portal user role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::User
    }
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "paid" => Some(Self::Paid),
            "overdue" => Some(Self::Overdue),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this invoice can still be paid by the client
    pub fn is_payable(&self) -> bool {
        matches!(self, Self::Draft | Self::Sent | Self::Overdue)
    }
}

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Suspended,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "suspended" => Some(Self::Suspended),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// A client may not hold two subscriptions in a blocking state
    /// for the same service package
    pub fn blocks_duplicate(&self) -> bool {
        matches!(self, Self::Active | Self::Suspended)
    }
}

/// Billing cycle for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Annual,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Some(Self::Monthly),
            "annual" | "yearly" | "year" => Some(Self::Annual),
            _ => None,
        }
    }

    /// Human-readable label used on recurring invoice line items
    pub fn label(&self) -> &'static str {
        match self {
            Self::Monthly => "Monthly Subscription",
            Self::Annual => "Annual Subscription",
        }
    }

    /// Length of one billing period in days (annual periods use 365)
    pub fn period_days(&self) -> i64 {
        match self {
            Self::Monthly => 30,
            Self::Annual => 365,
        }
    }
}

/// Support ticket status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A client (tenant). All portal users, tickets, invoices, projects, and
/// subscriptions are scoped to exactly one client.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub contact_email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A portal user, keyed by the external identity provider's user id
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub client_id: Uuid,
    /// Identity provider's user id (e.g. "user_2abc...")
    pub external_id: String,
    pub email: String,
    pub role: UserRole,
    /// Opt-out flag for billing notification emails
    pub notify_billing: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Catalog entry for a recurring service plan
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ServicePackage {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
    /// Feature bullet list shown on the pricing page
    pub features: serde_json::Value,
    pub active: bool,
    /// Cached gateway billing plan ids, created lazily on first subscribe
    pub gateway_plan_id_monthly: Option<String>,
    pub gateway_plan_id_annual: Option<String>,
}

impl ServicePackage {
    pub fn price_cents(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.monthly_price_cents,
            BillingCycle::Annual => self.annual_price_cents,
        }
    }

    pub fn gateway_plan_id(&self, cycle: BillingCycle) -> Option<&str> {
        match cycle {
            BillingCycle::Monthly => self.gateway_plan_id_monthly.as_deref(),
            BillingCycle::Annual => self.gateway_plan_id_annual.as_deref(),
        }
    }
}

/// A client project; carries the optional usage budget configuration
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Usage budget ceiling in USD; None disables budget alerting
    pub budget_threshold_usd: Option<f64>,
    /// Alert fires when usage reaches this percentage of the threshold
    pub budget_alert_threshold_percent: f64,
    /// De-duplication marker so each breach alerts once
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_budget_alert_sent: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An invoice. Totals are computed at creation and never recomputed
/// from line items afterward.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub client_id: Uuid,
    /// Human-readable sequential number, e.g. "INV-2026-0042"
    pub number: String,
    pub status: InvoiceStatus,
    pub subtotal_cents: i64,
    /// Tax rate as a percentage, e.g. 8.0
    pub tax_rate_percent: f64,
    pub tax_amount_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One line item on an invoice; immutable after creation
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    /// quantity * unit_price_cents, computed once at insert
    pub amount_cents: i64,
}

/// One settled gateway transaction. The gateway transaction id is unique;
/// the reconciliation engine checks it before inserting so duplicate webhook
/// deliveries never double-record a payment.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub gateway_transaction_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A recurring subscription to a service package
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub client_id: Uuid,
    pub service_package_id: Uuid,
    pub gateway_subscription_id: String,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_billing_date: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One tracked external-API call, scoped to a project. Append-only.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ApiUsage {
    pub id: Uuid,
    pub project_id: Uuid,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub request_timestamp: OffsetDateTime,
}

/// A support ticket, optionally mirrored to a GitHub issue
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub client_id: Uuid,
    pub created_by: Uuid,
    pub subject: String,
    pub body: String,
    pub status: TicketStatus,
    /// Persisted GitHub issue number; the webhook syncs status by this
    /// column instead of parsing issue body text
    pub github_issue_number: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One message on a ticket thread
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Money helpers
// =============================================================================

/// Format a cent amount as a dollar string, e.g. 21600 -> "$216.00"
pub fn format_usd(cents: i64) -> String {
    format!("${:.2}", cents as f64 / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_cycle_from_str() {
        assert_eq!(BillingCycle::from_str("monthly"), Some(BillingCycle::Monthly));
        assert_eq!(BillingCycle::from_str("MONTH"), Some(BillingCycle::Monthly));
        assert_eq!(BillingCycle::from_str("yearly"), Some(BillingCycle::Annual));
        assert_eq!(BillingCycle::from_str("weekly"), None);
    }

    #[test]
    fn test_invoice_status_payable() {
        assert!(InvoiceStatus::Sent.is_payable());
        assert!(InvoiceStatus::Overdue.is_payable());
        assert!(!InvoiceStatus::Paid.is_payable());
        assert!(!InvoiceStatus::Cancelled.is_payable());
    }

    #[test]
    fn test_subscription_status_blocks_duplicate() {
        assert!(SubscriptionStatus::Active.blocks_duplicate());
        assert!(SubscriptionStatus::Suspended.blocks_duplicate());
        assert!(!SubscriptionStatus::Pending.blocks_duplicate());
        assert!(!SubscriptionStatus::Cancelled.blocks_duplicate());
        assert!(!SubscriptionStatus::Expired.blocks_duplicate());
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(21600), "$216.00");
        assert_eq!(format_usd(0), "$0.00");
        assert_eq!(format_usd(9900), "$99.00");
        assert_eq!(format_usd(1), "$0.01");
    }
}

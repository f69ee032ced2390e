//! Email notifications for billing events
//!
//! Sends transactional emails via Resend API. Sending is best-effort:
//! a delivery failure is logged and reported as `Ok(false)` so webhook
//! processing and invoice issuance never fail because of email.

use portal_shared::format_usd;

use crate::error::BillingResult;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Portal URL for links in email bodies
    pub portal_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Client Portal <noreply@example.com>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Client Portal".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@example.com".to_string()),
            portal_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Billing email notification service
#[derive(Clone)]
pub struct BillingEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl BillingEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(true)` if the email was sent successfully,
    /// `Ok(false)` if sending failed or email is not configured.
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Billing email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
        }
    }

    fn wrap(&self, heading: &str, heading_color: &str, inner: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: {heading_color};">{heading}</h2>
    {inner}
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            heading = heading,
            heading_color = heading_color,
            inner = inner,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        )
    }

    /// Notify a client that a new invoice is ready to pay
    pub async fn send_invoice_created(
        &self,
        to: &str,
        client_name: &str,
        invoice_number: &str,
        total_cents: i64,
    ) -> BillingResult<bool> {
        let pay_link = format!("{}/billing/invoices", self.config.portal_url);
        let inner = format!(
            r#"<p>Hi {client_name},</p>
    <p>Invoice <strong>{invoice_number}</strong> for <strong>{total}</strong> has been issued to your account.</p>
    <p>
        <a href="{pay_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            View and Pay Invoice
        </a>
    </p>"#,
            client_name = client_name,
            invoice_number = invoice_number,
            total = format_usd(total_cents),
            pay_link = pay_link,
        );
        let html = self.wrap("New Invoice", "#6366f1", &inner);
        self.send_email(
            to,
            &format!("Invoice {} - {}", invoice_number, self.config.app_name),
            &html,
        )
        .await
    }

    /// Send a payment receipt after a successful capture
    pub async fn send_receipt(
        &self,
        to: &str,
        client_name: &str,
        invoice_number: &str,
        amount_cents: i64,
        transaction_id: &str,
    ) -> BillingResult<bool> {
        let inner = format!(
            r#"<p>Hi {client_name},</p>
    <p>We received your payment of <strong>{amount}</strong> for invoice <strong>{invoice_number}</strong>.</p>
    <p style="color: #666; font-size: 14px;">Transaction reference: {transaction_id}</p>"#,
            client_name = client_name,
            amount = format_usd(amount_cents),
            invoice_number = invoice_number,
            transaction_id = transaction_id,
        );
        let html = self.wrap("Payment Received", "#16a34a", &inner);
        self.send_email(
            to,
            &format!("Payment Receipt - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Notify a client that their subscription is now active
    pub async fn send_subscription_activated(
        &self,
        to: &str,
        client_name: &str,
        package_name: &str,
    ) -> BillingResult<bool> {
        let inner = format!(
            r#"<p>Hi {client_name},</p>
    <p>Your subscription to <strong>{package_name}</strong> is now active.</p>"#,
            client_name = client_name,
            package_name = package_name,
        );
        let html = self.wrap("Subscription Activated", "#16a34a", &inner);
        self.send_email(
            to,
            &format!("Subscription Activated - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Notify a client that their subscription was cancelled
    pub async fn send_subscription_cancelled(
        &self,
        to: &str,
        client_name: &str,
        package_name: &str,
    ) -> BillingResult<bool> {
        let inner = format!(
            r#"<p>Hi {client_name},</p>
    <p>Your subscription to <strong>{package_name}</strong> has been cancelled.</p>
    <p>Service remains available until the end of the current billing period.</p>"#,
            client_name = client_name,
            package_name = package_name,
        );
        let html = self.wrap("Subscription Cancelled", "#dc2626", &inner);
        self.send_email(
            to,
            &format!("Subscription Cancelled - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Notify a client that a recurring payment failed
    pub async fn send_payment_failed(
        &self,
        to: &str,
        client_name: &str,
        package_name: &str,
    ) -> BillingResult<bool> {
        let update_link = format!("{}/billing", self.config.portal_url);
        let inner = format!(
            r#"<p>Hi {client_name},</p>
    <p>We weren't able to process the recurring payment for <strong>{package_name}</strong>.</p>
    <p>Please update your payment method to avoid any interruption to your service.</p>
    <p>
        <a href="{update_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Update Payment Method
        </a>
    </p>"#,
            client_name = client_name,
            package_name = package_name,
            update_link = update_link,
        );
        let html = self.wrap("Payment Failed", "#dc2626", &inner);
        self.send_email(
            to,
            &format!("Payment Failed - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Alert a client that a project's usage crossed its budget threshold
    pub async fn send_budget_alert(
        &self,
        to: &str,
        project_name: &str,
        usage_usd: f64,
        threshold_usd: f64,
        percentage: f64,
    ) -> BillingResult<bool> {
        let usage_link = format!("{}/projects", self.config.portal_url);
        let inner = format!(
            r#"<p>Hi there,</p>
    <p>Project <strong>{project_name}</strong> has used <strong>${usage:.2}</strong> of its <strong>${threshold:.2}</strong> budget ({percentage:.0}%).</p>
    <p>
        <a href="{usage_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Review Usage
        </a>
    </p>"#,
            project_name = project_name,
            usage = usage_usd,
            threshold = threshold_usd,
            percentage = percentage,
            usage_link = usage_link,
        );
        let html = self.wrap("Budget Alert", "#d97706", &inner);
        self.send_email(
            to,
            &format!("Budget Alert: {} - {}", project_name, self.config.app_name),
            &html,
        )
        .await
    }
}

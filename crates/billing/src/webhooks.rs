//! Gateway webhook reconciliation
//!
//! Every inbound delivery is signature-verified against the gateway's
//! verify API before anything is parsed. Deliveries are then claimed by
//! event id in `gateway_webhook_events` so redeliveries are no-ops, and
//! each handler does all of its writes inside one transaction. Handler
//! failures are logged and recorded but still acknowledged with success,
//! so the gateway does not retry an event we cannot process; only a
//! signature failure is rejected outright.

use portal_shared::{Client, ServicePackage, Subscription, SubscriptionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{parse_amount, PayPalClient, WebhookTransmission};
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::invoices::InvoiceService;

/// Parsed gateway webhook event envelope
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
}

/// Outcome reported to the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
    /// Handler failed; delivery is still acknowledged
    Failed,
}

#[derive(Clone)]
pub struct WebhookHandler {
    paypal: PayPalClient,
    pool: PgPool,
    email: BillingEmailService,
}

impl WebhookHandler {
    pub fn new(paypal: PayPalClient, pool: PgPool, email: BillingEmailService) -> Self {
        Self { paypal, pool, email }
    }

    /// Verify, claim, and dispatch one webhook delivery.
    pub async fn process(
        &self,
        transmission: &WebhookTransmission,
        body: &serde_json::Value,
    ) -> BillingResult<WebhookOutcome> {
        self.paypal
            .verify_webhook_signature(transmission, body)
            .await?;

        let event: GatewayEvent = serde_json::from_value(body.clone())
            .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;

        // Claim this event id; a prior delivery means we already handled it
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO gateway_webhook_events (id, gateway_event_id, event_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (gateway_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.id)
        .bind(&event.event_type)
        .fetch_optional(&self.pool)
        .await?;

        let Some((claim_id,)) = claimed else {
            tracing::info!(
                gateway_event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate webhook delivery, skipping"
            );
            return Ok(WebhookOutcome::Duplicate);
        };

        let outcome = match self.dispatch(&event).await {
            Ok(outcome) => {
                self.record_result(claim_id, "ok", None).await;
                outcome
            }
            Err(e) => {
                tracing::error!(
                    gateway_event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook handler failed"
                );
                self.record_result(claim_id, "error", Some(&e.to_string()))
                    .await;
                WebhookOutcome::Failed
            }
        };

        Ok(outcome)
    }

    async fn record_result(&self, claim_id: Uuid, result: &str, error_message: Option<&str>) {
        if let Err(e) = sqlx::query(
            "UPDATE gateway_webhook_events SET processing_result = $2, error_message = $3 WHERE id = $1",
        )
        .bind(claim_id)
        .bind(result)
        .bind(error_message)
        .execute(&self.pool)
        .await
        {
            tracing::error!(claim_id = %claim_id, error = %e, "Failed to record webhook result");
        }
    }

    async fn dispatch(&self, event: &GatewayEvent) -> BillingResult<WebhookOutcome> {
        match event.event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" => self.handle_capture_completed(event).await,
            "PAYMENT.SALE.COMPLETED" => self.handle_recurring_payment(event).await,
            "BILLING.SUBSCRIPTION.ACTIVATED" => {
                self.handle_subscription_status(event, SubscriptionStatus::Active)
                    .await
            }
            "BILLING.SUBSCRIPTION.CANCELLED" => {
                self.handle_subscription_status(event, SubscriptionStatus::Cancelled)
                    .await
            }
            "BILLING.SUBSCRIPTION.SUSPENDED" => {
                self.handle_subscription_status(event, SubscriptionStatus::Suspended)
                    .await
            }
            "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => {
                self.handle_subscription_payment_failed(event).await
            }
            other => {
                tracing::info!(event_type = %other, "Ignoring unhandled webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    fn resource_str<'a>(event: &'a GatewayEvent, key: &str) -> BillingResult<&'a str> {
        event
            .resource
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BillingError::WebhookPayloadInvalid(format!("resource.{} missing", key))
            })
    }

    /// One-time order capture settled. The order's custom_id carries our
    /// invoice id; mark it paid and record the payment, unless the capture
    /// flow already did.
    async fn handle_capture_completed(
        &self,
        event: &GatewayEvent,
    ) -> BillingResult<WebhookOutcome> {
        let transaction_id = Self::resource_str(event, "id")?;
        let custom_id = Self::resource_str(event, "custom_id")?;
        let amount_cents = event
            .resource
            .pointer("/amount/value")
            .and_then(|v| v.as_str())
            .map(parse_amount)
            .transpose()?
            .ok_or_else(|| {
                BillingError::WebhookPayloadInvalid("resource.amount.value missing".to_string())
            })?;
        let currency = event
            .resource
            .pointer("/amount/currency_code")
            .and_then(|v| v.as_str())
            .unwrap_or("USD");

        let invoice_id = Uuid::parse_str(custom_id).map_err(|_| {
            BillingError::WebhookPayloadInvalid(format!("custom_id is not an invoice id: {}", custom_id))
        })?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM payments WHERE gateway_transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            tracing::info!(
                transaction_id = %transaction_id,
                "Capture already recorded by payment flow, skipping"
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        let invoice: Option<portal_shared::Invoice> =
            sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
                .bind(invoice_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(invoice) = invoice else {
            tracing::warn!(
                invoice_id = %invoice_id,
                transaction_id = %transaction_id,
                "Capture webhook references unknown invoice"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        sqlx::query(
            r#"
            INSERT INTO payments
                (id, client_id, invoice_id, gateway_transaction_id,
                 amount_cents, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'completed')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice.client_id)
        .bind(invoice.id)
        .bind(transaction_id)
        .bind(amount_cents)
        .bind(currency)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE invoices SET status = 'paid', paid_date = $2 WHERE id = $1")
            .bind(invoice.id)
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            invoice_id = %invoice.id,
            number = %invoice.number,
            transaction_id = %transaction_id,
            amount_cents = amount_cents,
            "Invoice settled via capture webhook"
        );

        self.notify_receipt(invoice.client_id, &invoice.number, amount_cents, transaction_id)
            .await;

        Ok(WebhookOutcome::Processed)
    }

    /// Recurring subscription charge settled. Synthesize a paid invoice for
    /// the billing period, record the payment against it, and advance the
    /// next billing date, all in one transaction.
    async fn handle_recurring_payment(&self, event: &GatewayEvent) -> BillingResult<WebhookOutcome> {
        let transaction_id = Self::resource_str(event, "id")?;
        let gateway_subscription_id = Self::resource_str(event, "billing_agreement_id")?;
        let amount_cents = event
            .resource
            .pointer("/amount/total")
            .and_then(|v| v.as_str())
            .map(parse_amount)
            .transpose()?
            .ok_or_else(|| {
                BillingError::WebhookPayloadInvalid("resource.amount.total missing".to_string())
            })?;
        let currency = event
            .resource
            .pointer("/amount/currency")
            .and_then(|v| v.as_str())
            .unwrap_or("USD");

        let mut tx = self.pool.begin().await?;

        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM payments WHERE gateway_transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Ok(WebhookOutcome::Duplicate);
        }

        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE gateway_subscription_id = $1")
                .bind(gateway_subscription_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(subscription) = subscription else {
            tracing::warn!(
                gateway_subscription_id = %gateway_subscription_id,
                "Recurring payment for unknown subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let package: ServicePackage =
            sqlx::query_as("SELECT * FROM service_packages WHERE id = $1")
                .bind(subscription.service_package_id)
                .fetch_one(&mut *tx)
                .await?;

        let year = OffsetDateTime::now_utc().year();
        let number = InvoiceService::next_invoice_number(&mut tx, year).await?;
        let description = format!("{} - {}", package.name, subscription.billing_cycle.label());

        let invoice_id = Uuid::new_v4();
        // Recurring invoices record the gateway-charged amount as-is;
        // tax is part of the plan price
        sqlx::query(
            r#"
            INSERT INTO invoices
                (id, client_id, number, status, subtotal_cents, tax_rate_percent,
                 tax_amount_cents, total_cents, paid_date)
            VALUES ($1, $2, $3, 'paid', $4, 0, 0, $4, $5)
            "#,
        )
        .bind(invoice_id)
        .bind(subscription.client_id)
        .bind(&number)
        .bind(amount_cents)
        .bind(OffsetDateTime::now_utc())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO invoice_items
                (id, invoice_id, description, quantity, unit_price_cents, amount_cents)
            VALUES ($1, $2, $3, 1, $4, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(&description)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO payments
                (id, client_id, invoice_id, subscription_id, gateway_transaction_id,
                 amount_cents, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'completed')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subscription.client_id)
        .bind(invoice_id)
        .bind(subscription.id)
        .bind(transaction_id)
        .bind(amount_cents)
        .bind(currency)
        .execute(&mut *tx)
        .await?;

        let next_billing =
            OffsetDateTime::now_utc() + time::Duration::days(subscription.billing_cycle.period_days());
        sqlx::query("UPDATE subscriptions SET next_billing_date = $2 WHERE id = $1")
            .bind(subscription.id)
            .bind(next_billing)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription.id,
            invoice_number = %number,
            transaction_id = %transaction_id,
            amount_cents = amount_cents,
            "Recurring payment reconciled"
        );

        self.notify_receipt(subscription.client_id, &number, amount_cents, transaction_id)
            .await;

        Ok(WebhookOutcome::Processed)
    }

    /// Subscription status transitions driven by the gateway
    async fn handle_subscription_status(
        &self,
        event: &GatewayEvent,
        status: SubscriptionStatus,
    ) -> BillingResult<WebhookOutcome> {
        let gateway_subscription_id = Self::resource_str(event, "id")?;
        let next_billing_time = event
            .resource
            .pointer("/billing_info/next_billing_time")
            .and_then(|v| v.as_str())
            .and_then(|t| {
                OffsetDateTime::parse(t, &time::format_description::well_known::Rfc3339).ok()
            });

        let mut tx = self.pool.begin().await?;

        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = $2,
                next_billing_date = COALESCE($3, next_billing_date),
                cancel_at_period_end = CASE WHEN $2 = 'cancelled' THEN TRUE
                                            ELSE cancel_at_period_end END
            WHERE gateway_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(gateway_subscription_id)
        .bind(status.as_str())
        .bind(next_billing_time)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(subscription) = subscription else {
            tracing::warn!(
                gateway_subscription_id = %gateway_subscription_id,
                event_type = %event.event_type,
                "Status webhook for unknown subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription.id,
            status = %status.as_str(),
            "Subscription status updated from webhook"
        );

        match status {
            SubscriptionStatus::Active => {
                if let Some((client, package)) = self.subscription_parties(&subscription).await {
                    // Only users who opted into billing email get the notice
                    let recipients: Vec<(String,)> = sqlx::query_as(
                        "SELECT email FROM users WHERE client_id = $1 AND notify_billing = TRUE",
                    )
                    .bind(subscription.client_id)
                    .fetch_all(&self.pool)
                    .await
                    .unwrap_or_default();
                    for (email,) in &recipients {
                        if let Err(e) = self
                            .email
                            .send_subscription_activated(email, &client.name, &package.name)
                            .await
                        {
                            tracing::error!(subscription_id = %subscription.id, error = %e, "Activation email failed");
                        }
                    }
                }
            }
            SubscriptionStatus::Cancelled => {
                // Gateway-side cancels (dashboard, disputes) only surface
                // through this event, so the notice has to go out here
                if let Some((client, package)) = self.subscription_parties(&subscription).await {
                    if let Err(e) = self
                        .email
                        .send_subscription_cancelled(&client.contact_email, &client.name, &package.name)
                        .await
                    {
                        tracing::error!(subscription_id = %subscription.id, error = %e, "Cancel email failed");
                    }
                }
            }
            _ => {}
        }

        Ok(WebhookOutcome::Processed)
    }

    /// A recurring charge failed. The gateway retries the charge on its
    /// own schedule and emits SUSPENDED itself if retries run out, so the
    /// local status is left alone here; the client just gets a warning.
    async fn handle_subscription_payment_failed(
        &self,
        event: &GatewayEvent,
    ) -> BillingResult<WebhookOutcome> {
        let gateway_subscription_id = Self::resource_str(event, "id")?;

        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE gateway_subscription_id = $1")
                .bind(gateway_subscription_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(subscription) = subscription else {
            tracing::warn!(
                gateway_subscription_id = %gateway_subscription_id,
                "Payment-failed webhook for unknown subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        tracing::warn!(
            subscription_id = %subscription.id,
            "Recurring payment failed"
        );

        if let Some((client, package)) = self.subscription_parties(&subscription).await {
            if let Err(e) = self
                .email
                .send_payment_failed(&client.contact_email, &client.name, &package.name)
                .await
            {
                tracing::error!(subscription_id = %subscription.id, error = %e, "Payment-failed email failed");
            }
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn subscription_parties(
        &self,
        subscription: &Subscription,
    ) -> Option<(Client, ServicePackage)> {
        let client: Option<Client> = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(subscription.client_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();
        let package: Option<ServicePackage> =
            sqlx::query_as("SELECT * FROM service_packages WHERE id = $1")
                .bind(subscription.service_package_id)
                .fetch_optional(&self.pool)
                .await
                .ok()
                .flatten();
        client.zip(package)
    }

    async fn notify_receipt(
        &self,
        client_id: Uuid,
        invoice_number: &str,
        amount_cents: i64,
        transaction_id: &str,
    ) {
        let client: Option<Client> = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();
        if let Some(client) = client {
            if let Err(e) = self
                .email
                .send_receipt(
                    &client.contact_email,
                    &client.name,
                    invoice_number,
                    amount_cents,
                    transaction_id,
                )
                .await
            {
                tracing::error!(client_id = %client_id, error = %e, "Receipt email failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_parses() {
        let body = serde_json::json!({
            "id": "WH-EVT-1",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-123",
                "custom_id": "7f3c1a9e-0000-0000-0000-000000000000",
                "amount": {"currency_code": "USD", "value": "216.00"}
            }
        });
        let event: GatewayEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.id, "WH-EVT-1");
        assert_eq!(event.event_type, "PAYMENT.CAPTURE.COMPLETED");
        assert_eq!(
            event.resource.pointer("/amount/value").and_then(|v| v.as_str()),
            Some("216.00")
        );
    }

    #[test]
    fn test_event_without_resource_still_parses() {
        let body = serde_json::json!({
            "id": "WH-EVT-2",
            "event_type": "SOMETHING.NEW"
        });
        let event: GatewayEvent = serde_json::from_value(body).unwrap();
        assert!(event.resource.is_null());
    }

    #[test]
    fn test_resource_str_missing_key() {
        let event = GatewayEvent {
            id: "WH-EVT-3".to_string(),
            event_type: "PAYMENT.SALE.COMPLETED".to_string(),
            resource: serde_json::json!({"id": "TXN-1"}),
        };
        assert_eq!(WebhookHandler::resource_str(&event, "id").unwrap(), "TXN-1");
        assert!(WebhookHandler::resource_str(&event, "billing_agreement_id").is_err());
    }

    use crate::client::PayPalConfig;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        portal_shared::create_pool(&url)
            .await
            .expect("Failed to create pool")
    }

    // The gateway client never gets called by these handlers, so dummy
    // credentials pointing nowhere are fine
    fn test_handler(pool: PgPool) -> WebhookHandler {
        let config = PayPalConfig {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            api_base_url: "http://127.0.0.1:1".to_string(),
            webhook_id: "WH-123".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
        };
        WebhookHandler::new(
            PayPalClient::new(config),
            pool,
            crate::email::BillingEmailService::from_env(),
        )
    }

    async fn insert_client(pool: &PgPool) -> Uuid {
        let client_id = Uuid::new_v4();
        sqlx::query("INSERT INTO clients (id, name, contact_email) VALUES ($1, $2, $3)")
            .bind(client_id)
            .bind("Webhook Test Client")
            .bind(format!("billing-{}@example.com", client_id))
            .execute(pool)
            .await
            .unwrap();
        client_id
    }

    async fn insert_subscription(pool: &PgPool, client_id: Uuid, status: &str) -> (Uuid, String, Uuid) {
        let package_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO service_packages (id, name, monthly_price_cents, annual_price_cents)
            VALUES ($1, $2, 9900, 99900)
            "#,
        )
        .bind(package_id)
        .bind(format!("Package {}", package_id))
        .execute(pool)
        .await
        .unwrap();

        let subscription_id = Uuid::new_v4();
        let gateway_id = format!("I-{}", Uuid::new_v4().simple());
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, client_id, service_package_id, gateway_subscription_id, status, billing_cycle)
            VALUES ($1, $2, $3, $4, $5, 'monthly')
            "#,
        )
        .bind(subscription_id)
        .bind(client_id)
        .bind(package_id)
        .bind(&gateway_id)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();

        (subscription_id, gateway_id, package_id)
    }

    async fn subscription_status(pool: &PgPool, subscription_id: Uuid) -> (String, bool) {
        sqlx::query_as("SELECT status, cancel_at_period_end FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_capture_event_replay_records_one_payment() {
        let pool = test_pool().await;
        let handler = test_handler(pool.clone());
        let client_id = insert_client(&pool).await;

        let invoice_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoices
                (id, client_id, number, status, subtotal_cents, tax_rate_percent,
                 tax_amount_cents, total_cents)
            VALUES ($1, $2, $3, 'sent', 20000, 8, 1600, 21600)
            "#,
        )
        .bind(invoice_id)
        .bind(client_id)
        .bind(format!("TST-{:.16}", Uuid::new_v4().simple()))
        .execute(&pool)
        .await
        .unwrap();

        let transaction_id = format!("CAP-{}", Uuid::new_v4().simple());
        let event = GatewayEvent {
            id: format!("WH-{}", Uuid::new_v4().simple()),
            event_type: "PAYMENT.CAPTURE.COMPLETED".to_string(),
            resource: serde_json::json!({
                "id": transaction_id,
                "custom_id": invoice_id.to_string(),
                "amount": {"currency_code": "USD", "value": "216.00"}
            }),
        };

        let first = handler.handle_capture_completed(&event).await.unwrap();
        assert_eq!(first, WebhookOutcome::Processed);

        let (status, paid_date): (String, Option<OffsetDateTime>) =
            sqlx::query_as("SELECT status, paid_date FROM invoices WHERE id = $1")
                .bind(invoice_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "paid");
        let first_paid_date = paid_date.unwrap();

        // Redelivery of the same event body must not double-record
        let second = handler.handle_capture_completed(&event).await.unwrap();
        assert_eq!(second, WebhookOutcome::Duplicate);

        let payment_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE gateway_transaction_id = $1")
                .bind(&transaction_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(payment_count, 1);

        let (_, paid_date_after): (String, Option<OffsetDateTime>) =
            sqlx::query_as("SELECT status, paid_date FROM invoices WHERE id = $1")
                .bind(invoice_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(paid_date_after.unwrap(), first_paid_date);

        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_payment_failed_event_leaves_status_alone() {
        let pool = test_pool().await;
        let handler = test_handler(pool.clone());
        let client_id = insert_client(&pool).await;
        let (subscription_id, gateway_id, package_id) = insert_subscription(&pool, client_id, "active").await;

        let event = GatewayEvent {
            id: format!("WH-{}", Uuid::new_v4().simple()),
            event_type: "BILLING.SUBSCRIPTION.PAYMENT.FAILED".to_string(),
            resource: serde_json::json!({"id": gateway_id}),
        };
        let outcome = handler.handle_subscription_payment_failed(&event).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        // The gateway owns failure handling; locally nothing moves until
        // it sends SUSPENDED itself
        let (status, _) = subscription_status(&pool, subscription_id).await;
        assert_eq!(status, "active");

        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM service_packages WHERE id = $1")
            .bind(package_id)
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_cancelled_event_updates_subscription() {
        let pool = test_pool().await;
        let handler = test_handler(pool.clone());
        let client_id = insert_client(&pool).await;
        let (subscription_id, gateway_id, package_id) = insert_subscription(&pool, client_id, "active").await;

        let event = GatewayEvent {
            id: format!("WH-{}", Uuid::new_v4().simple()),
            event_type: "BILLING.SUBSCRIPTION.CANCELLED".to_string(),
            resource: serde_json::json!({"id": gateway_id}),
        };
        let outcome = handler
            .handle_subscription_status(&event, SubscriptionStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let (status, cancel_at_period_end) = subscription_status(&pool, subscription_id).await;
        assert_eq!(status, "cancelled");
        assert!(cancel_at_period_end);

        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM service_packages WHERE id = $1")
            .bind(package_id)
            .execute(&pool)
            .await
            .unwrap();
    }
}

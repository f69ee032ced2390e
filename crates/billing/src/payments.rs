//! One-time invoice payment flow
//!
//! Two-step gateway flow: create an order for the invoice total, redirect
//! the buyer to approve it, then capture on return. Marking the invoice
//! paid and recording the payment happen in one transaction, guarded by
//! the unique gateway transaction id so a webhook arriving for the same
//! capture cannot double-record it.

use portal_shared::{Client, Invoice};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{OrderCreated, PayPalClient};
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};

/// Outcome of a successful capture
#[derive(Debug, Clone, serde::Serialize)]
pub struct PaymentRecorded {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub transaction_id: String,
    pub amount_cents: i64,
}

#[derive(Clone)]
pub struct PaymentFlow {
    paypal: PayPalClient,
    pool: PgPool,
    email: BillingEmailService,
}

impl PaymentFlow {
    pub fn new(paypal: PayPalClient, pool: PgPool, email: BillingEmailService) -> Self {
        Self { paypal, pool, email }
    }

    async fn owned_invoice(&self, invoice_id: Uuid, client_id: Uuid) -> BillingResult<Invoice> {
        let invoice: Option<Invoice> = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        let invoice =
            invoice.ok_or_else(|| BillingError::InvoiceNotFound(invoice_id.to_string()))?;
        if invoice.client_id != client_id {
            return Err(BillingError::Unauthorized(
                "Invoice belongs to a different client".to_string(),
            ));
        }
        Ok(invoice)
    }

    /// Start payment for an invoice: create a gateway order for its total
    /// and hand back the approval URL.
    pub async fn create_order(
        &self,
        invoice_id: Uuid,
        client_id: Uuid,
    ) -> BillingResult<OrderCreated> {
        let invoice = self.owned_invoice(invoice_id, client_id).await?;

        if !invoice.status.is_payable() {
            return Err(BillingError::InvoiceAlreadyPaid(invoice.number));
        }

        self.paypal
            .create_order(
                invoice.total_cents,
                "USD",
                &invoice.number,
                &invoice.id.to_string(),
            )
            .await
    }

    /// Capture an approved order and settle the invoice.
    ///
    /// Only a COMPLETED gateway capture settles anything; any other status
    /// is surfaced as an error and the invoice stays payable.
    pub async fn capture_order(
        &self,
        invoice_id: Uuid,
        client_id: Uuid,
        order_id: &str,
    ) -> BillingResult<PaymentRecorded> {
        let invoice = self.owned_invoice(invoice_id, client_id).await?;

        // Re-check: the invoice may have been settled (e.g. by a webhook)
        // between order creation and the buyer returning
        if !invoice.status.is_payable() {
            return Err(BillingError::InvoiceAlreadyPaid(invoice.number));
        }

        let capture = self.paypal.capture_order(order_id).await?;
        if !capture.is_completed() {
            return Err(BillingError::CaptureNotCompleted(capture.status));
        }

        let mut tx = self.pool.begin().await?;

        // The capture webhook may have already recorded this transaction
        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM payments WHERE gateway_transaction_id = $1")
                .bind(&capture.transaction_id)
                .fetch_optional(&mut *tx)
                .await?;

        let payment_id = match existing {
            Some((id,)) => {
                tracing::info!(
                    transaction_id = %capture.transaction_id,
                    invoice_id = %invoice.id,
                    "Capture already recorded, skipping insert"
                );
                id
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO payments
                        (id, client_id, invoice_id, gateway_transaction_id,
                         amount_cents, currency, status)
                    VALUES ($1, $2, $3, $4, $5, $6, 'completed')
                    "#,
                )
                .bind(id)
                .bind(client_id)
                .bind(invoice.id)
                .bind(&capture.transaction_id)
                .bind(capture.amount_cents)
                .bind(&capture.currency)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        sqlx::query("UPDATE invoices SET status = 'paid', paid_date = $2 WHERE id = $1")
            .bind(invoice.id)
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            invoice_id = %invoice.id,
            number = %invoice.number,
            transaction_id = %capture.transaction_id,
            amount_cents = capture.amount_cents,
            "Invoice paid"
        );

        let client: Option<Client> = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(client) = client {
            if let Err(e) = self
                .email
                .send_receipt(
                    &client.contact_email,
                    &client.name,
                    &invoice.number,
                    capture.amount_cents,
                    &capture.transaction_id,
                )
                .await
            {
                tracing::error!(invoice_id = %invoice.id, error = %e, "Receipt email failed");
            }
        }

        Ok(PaymentRecorded {
            payment_id,
            invoice_id: invoice.id,
            transaction_id: capture.transaction_id,
            amount_cents: capture.amount_cents,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use crate::client::PayPalConfig;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        portal_shared::create_pool(&url)
            .await
            .expect("Failed to create pool")
    }

    fn paypal_for(base_url: &str) -> PayPalClient {
        PayPalClient::new(PayPalConfig {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            api_base_url: base_url.to_string(),
            webhook_id: "WH-123".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
        })
    }

    async fn insert_client(pool: &PgPool) -> Uuid {
        let client_id = Uuid::new_v4();
        sqlx::query("INSERT INTO clients (id, name, contact_email) VALUES ($1, $2, $3)")
            .bind(client_id)
            .bind("Payment Test Client")
            .bind(format!("billing-{}@example.com", client_id))
            .execute(pool)
            .await
            .unwrap();
        client_id
    }

    async fn insert_invoice(pool: &PgPool, client_id: Uuid) -> Uuid {
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
        .execute(pool)
        .await
        .unwrap();
        invoice_id
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_capture_after_webhook_reuses_payment_row() {
        let pool = test_pool().await;
        let mut server = mockito::Server::new_async().await;

        let client_id = insert_client(&pool).await;
        let invoice_id = insert_invoice(&pool, client_id).await;

        // The capture webhook beat the buyer's return trip and already
        // recorded this transaction
        let transaction_id = format!("CAP-{}", Uuid::new_v4().simple());
        let existing_payment_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, client_id, invoice_id, gateway_transaction_id,
                 amount_cents, currency, status)
            VALUES ($1, $2, $3, $4, 21600, 'USD', 'completed')
            "#,
        )
        .bind(existing_payment_id)
        .bind(client_id)
        .bind(invoice_id)
        .bind(&transaction_id)
        .execute(&pool)
        .await
        .unwrap();

        server
            .mock("POST", "/v1/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok-abc","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/checkout/orders/ORDER-RACE/capture")
            .with_status(201)
            .with_body(format!(
                r#"{{"id":"ORDER-RACE","status":"COMPLETED","purchase_units":[{{"payments":{{"captures":[
                    {{"id":"{}","status":"COMPLETED","amount":{{"currency_code":"USD","value":"216.00"}}}}
                ]}}}}]}}"#,
                transaction_id
            ))
            .create_async()
            .await;

        let flow = PaymentFlow::new(
            paypal_for(&server.url()),
            pool.clone(),
            BillingEmailService::from_env(),
        );
        let recorded = flow
            .capture_order(invoice_id, client_id, "ORDER-RACE")
            .await
            .unwrap();

        assert_eq!(recorded.payment_id, existing_payment_id);
        let payment_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE gateway_transaction_id = $1")
                .bind(&transaction_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(payment_count, 1);

        let status: String = sqlx::query_scalar("SELECT status FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "paid");

        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_foreign_invoice_is_rejected_before_gateway_call() {
        let pool = test_pool().await;
        let owner = insert_client(&pool).await;
        let other = insert_client(&pool).await;
        let invoice_id = insert_invoice(&pool, owner).await;

        // Gateway base URL points nowhere; ownership fails first
        let flow = PaymentFlow::new(
            paypal_for("http://127.0.0.1:1"),
            pool.clone(),
            BillingEmailService::from_env(),
        );

        let err = flow.create_order(invoice_id, other).await.unwrap_err();
        assert!(matches!(err, BillingError::Unauthorized(_)));

        for client_id in [owner, other] {
            sqlx::query("DELETE FROM clients WHERE id = $1")
                .bind(client_id)
                .execute(&pool)
                .await
                .unwrap();
        }
    }
}

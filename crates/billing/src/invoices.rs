//! Invoice issuance and lifecycle
//!
//! Invoice numbers are sequential per calendar year ("INV-2026-0042") and
//! allocated from a counter row with an atomic upsert, so concurrent
//! issuance can never produce duplicates. The invoice header and its line
//! items are written in a single transaction.

use portal_shared::{Invoice, InvoiceItem, InvoiceStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};

/// One requested line item for a new invoice
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

/// Compute (subtotal, tax, total) in cents for a set of line items.
/// Tax is rounded half-up to the nearest cent.
pub fn compute_totals(items: &[NewInvoiceItem], tax_rate_percent: f64) -> (i64, i64, i64) {
    let subtotal: i64 = items
        .iter()
        .map(|item| item.quantity as i64 * item.unit_price_cents)
        .sum();
    let tax = ((subtotal as f64 * tax_rate_percent / 100.0) + 0.5).floor() as i64;
    (subtotal, tax, subtotal + tax)
}

/// Format an invoice number from a year and a per-year sequence value
pub fn format_invoice_number(year: i32, seq: i64) -> String {
    format!("INV-{}-{:04}", year, seq)
}

fn validate_items(items: &[NewInvoiceItem]) -> BillingResult<()> {
    if items.is_empty() {
        return Err(BillingError::InvalidInput(
            "Invoice must have at least one line item".to_string(),
        ));
    }
    for item in items {
        if item.description.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "Line item description cannot be empty".to_string(),
            ));
        }
        if item.quantity <= 0 {
            return Err(BillingError::InvalidInput(
                "Line item quantity must be positive".to_string(),
            ));
        }
        if item.unit_price_cents <= 0 {
            return Err(BillingError::InvalidInput(
                "Line item unit price must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

/// Invoice issuance and query service
#[derive(Clone)]
pub struct InvoiceService {
    pool: PgPool,
    email: BillingEmailService,
}

impl InvoiceService {
    pub fn new(pool: PgPool, email: BillingEmailService) -> Self {
        Self { pool, email }
    }

    /// Allocate the next invoice number for the given year.
    ///
    /// Runs inside the caller's transaction; the ON CONFLICT upsert takes a
    /// row lock on the counter, so two concurrent issuances serialize and
    /// each sees a distinct sequence value.
    pub async fn next_invoice_number(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        year: i32,
    ) -> BillingResult<String> {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_counters (year, seq)
            VALUES ($1, 1)
            ON CONFLICT (year)
            DO UPDATE SET seq = invoice_counters.seq + 1
            RETURNING seq
            "#,
        )
        .bind(year)
        .fetch_one(&mut **tx)
        .await?;

        Ok(format_invoice_number(year, seq))
    }

    /// Issue a new invoice: allocate a number, write the header and all
    /// line items in one transaction, then send a best-effort notification.
    pub async fn create_invoice(
        &self,
        client_id: Uuid,
        items: Vec<NewInvoiceItem>,
        tax_rate_percent: f64,
        due_date: Option<OffsetDateTime>,
        notes: Option<String>,
    ) -> BillingResult<Invoice> {
        validate_items(&items)?;
        if !(0.0..=100.0).contains(&tax_rate_percent) {
            return Err(BillingError::InvalidInput(
                "Tax rate must be between 0 and 100".to_string(),
            ));
        }

        let client: Option<portal_shared::Client> =
            sqlx::query_as("SELECT * FROM clients WHERE id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?;
        let client = client.ok_or_else(|| BillingError::ClientNotFound(client_id.to_string()))?;

        let (subtotal, tax, total) = compute_totals(&items, tax_rate_percent);
        let year = OffsetDateTime::now_utc().year();

        let mut tx = self.pool.begin().await?;

        let number = Self::next_invoice_number(&mut tx, year).await?;

        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices
                (id, client_id, number, status, subtotal_cents, tax_rate_percent,
                 tax_amount_cents, total_cents, notes, due_date)
            VALUES ($1, $2, $3, 'draft', $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(&number)
        .bind(subtotal)
        .bind(tax_rate_percent)
        .bind(tax)
        .bind(total)
        .bind(&notes)
        .bind(due_date)
        .fetch_one(&mut *tx)
        .await?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items
                    (id, invoice_id, description, quantity, unit_price_cents, amount_cents)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice.id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.quantity as i64 * item.unit_price_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            invoice_id = %invoice.id,
            number = %invoice.number,
            client_id = %client_id,
            total_cents = total,
            "Invoice issued"
        );

        // Notification is best-effort; the invoice is already committed
        if let Err(e) = self
            .email
            .send_invoice_created(&client.contact_email, &client.name, &invoice.number, total)
            .await
        {
            tracing::error!(invoice_id = %invoice.id, error = %e, "Invoice notification failed");
        }

        Ok(invoice)
    }

    /// List a client's invoices, newest first
    pub async fn list_invoices(&self, client_id: Uuid) -> BillingResult<Vec<Invoice>> {
        let invoices = sqlx::query_as(
            "SELECT * FROM invoices WHERE client_id = $1 ORDER BY created_at DESC",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    /// Fetch one invoice by id
    pub async fn get_invoice(&self, invoice_id: Uuid) -> BillingResult<Invoice> {
        let invoice: Option<Invoice> = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        invoice.ok_or_else(|| BillingError::InvoiceNotFound(invoice_id.to_string()))
    }

    /// Fetch the line items for an invoice
    pub async fn get_items(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoiceItem>> {
        let items = sqlx::query_as(
            "SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY id",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Flip sent invoices past their due date to overdue.
    /// Returns the number of invoices transitioned.
    pub async fn mark_overdue(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'overdue'
            WHERE status = 'sent'
              AND due_date IS NOT NULL
              AND due_date < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(count = result.rows_affected(), "Marked invoices overdue");
        }
        Ok(result.rows_affected())
    }
}

/// Render an invoice as a standalone HTML document for export.
/// Text fields are HTML-escaped.
pub fn render_html(invoice: &Invoice, items: &[InvoiceItem], client_name: &str) -> String {
    fn escape(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    }

    let rows: String = items
        .iter()
        .map(|item| {
            format!(
                r#"        <tr><td>{}</td><td style="text-align: right;">{}</td><td style="text-align: right;">{}</td><td style="text-align: right;">{}</td></tr>
"#,
                escape(&item.description),
                item.quantity,
                portal_shared::format_usd(item.unit_price_cents),
                portal_shared::format_usd(item.amount_cents),
            )
        })
        .collect();

    let due = invoice
        .due_date
        .map(|d| format!("<p>Due: {}</p>", d.date()))
        .unwrap_or_default();
    let notes = invoice
        .notes
        .as_deref()
        .map(|n| format!("<p style=\"color: #666;\">{}</p>", escape(n)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Invoice {number}</title></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; color: #333; max-width: 700px; margin: 0 auto; padding: 40px 20px;">
    <h1>Invoice {number}</h1>
    <p>Billed to: <strong>{client}</strong></p>
    <p>Status: {status}</p>
    {due}
    <table style="width: 100%; border-collapse: collapse; margin: 24px 0;">
        <tr style="border-bottom: 2px solid #333; text-align: left;">
            <th>Description</th><th style="text-align: right;">Qty</th><th style="text-align: right;">Unit Price</th><th style="text-align: right;">Amount</th>
        </tr>
{rows}    </table>
    <p style="text-align: right;">Subtotal: {subtotal}<br>
    Tax ({tax_rate}%): {tax}<br>
    <strong>Total: {total}</strong></p>
    {notes}
</body>
</html>"#,
        number = escape(&invoice.number),
        client = escape(client_name),
        status = invoice.status.as_str(),
        due = due,
        rows = rows,
        subtotal = portal_shared::format_usd(invoice.subtotal_cents),
        tax_rate = invoice.tax_rate_percent,
        tax = portal_shared::format_usd(invoice.tax_amount_cents),
        total = portal_shared::format_usd(invoice.total_cents),
        notes = notes,
    )
}

/// True if the invoice can still be taken through the payment flow
pub fn is_payable(status: InvoiceStatus) -> bool {
    status.is_payable()
}

//! Invoice endpoints

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use portal_billing::invoices::{render_html, NewInvoiceItem};
use portal_billing::{OrderCreated, PaymentRecorded};
use portal_shared::{Invoice, InvoiceItem};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::ApiResult,
    state::AppState,
};

/// GET /api/v1/invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Invoice>>> {
    let invoices = state
        .billing
        .invoices
        .list_invoices(auth_user.client_id)
        .await?;
    Ok(Json(invoices))
}

#[derive(Debug, serde::Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

async fn owned_invoice(
    state: &AppState,
    auth_user: &AuthUser,
    invoice_id: Uuid,
) -> ApiResult<Invoice> {
    let invoice = state.billing.invoices.get_invoice(invoice_id).await?;
    auth_user.require_client(invoice.client_id)?;
    Ok(invoice)
}

/// GET /api/v1/invoices/:id
pub async fn get_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<InvoiceDetail>> {
    let invoice = owned_invoice(&state, &auth_user, invoice_id).await?;
    let items = state.billing.invoices.get_items(invoice.id).await?;
    Ok(Json(InvoiceDetail { invoice, items }))
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub client_id: Uuid,
    pub items: Vec<NewInvoiceItem>,
    /// Required so totals are never computed against an implicit rate
    pub tax_rate_percent: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    pub notes: Option<String>,
}

/// POST /api/v1/invoices (admin only)
pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateInvoiceRequest>,
) -> ApiResult<Json<Invoice>> {
    auth_user.require_admin()?;

    let invoice = state
        .billing
        .invoices
        .create_invoice(
            req.client_id,
            req.items,
            req.tax_rate_percent,
            req.due_date,
            req.notes,
        )
        .await?;
    Ok(Json(invoice))
}

/// GET /api/v1/invoices/:id/export
pub async fn export_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Response> {
    let invoice = owned_invoice(&state, &auth_user, invoice_id).await?;
    let items = state.billing.invoices.get_items(invoice.id).await?;

    let client: Option<portal_shared::Client> =
        sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(invoice.client_id)
            .fetch_optional(&state.pool)
            .await?;
    let client_name = client.map(|c| c.name).unwrap_or_default();

    let html = render_html(&invoice, &items, &client_name);
    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response())
}

/// POST /api/v1/invoices/:id/pay
pub async fn pay_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<OrderCreated>> {
    // Ownership is enforced inside the flow; admins pay on the invoice's tenant
    let invoice = owned_invoice(&state, &auth_user, invoice_id).await?;
    let order = state
        .billing
        .payments
        .create_order(invoice.id, invoice.client_id)
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub order_id: String,
}

/// POST /api/v1/invoices/:id/capture
pub async fn capture_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<CaptureRequest>,
) -> ApiResult<Json<PaymentRecorded>> {
    let invoice = owned_invoice(&state, &auth_user, invoice_id).await?;
    let payment = state
        .billing
        .payments
        .capture_order(invoice.id, invoice.client_id, &req.order_id)
        .await?;
    Ok(Json(payment))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    #[test]
    fn test_create_invoice_request_requires_tax_rate() {
        // The rate on the invoice is the source of truth; there is no
        // implicit server-side default to fall back to
        let without_rate = r#"{
            "client_id": "7f3c1a9e-0000-4000-8000-000000000001",
            "items": [{"description": "Consulting", "quantity": 2, "unit_price_cents": 5000}]
        }"#;
        assert!(serde_json::from_str::<CreateInvoiceRequest>(without_rate).is_err());

        let with_rate = r#"{
            "client_id": "7f3c1a9e-0000-4000-8000-000000000001",
            "items": [{"description": "Consulting", "quantity": 2, "unit_price_cents": 5000}],
            "tax_rate_percent": 8.0
        }"#;
        let parsed = serde_json::from_str::<CreateInvoiceRequest>(with_rate).unwrap();
        assert_eq!(parsed.tax_rate_percent, 8.0);
        assert!(parsed.due_date.is_none());
    }
}

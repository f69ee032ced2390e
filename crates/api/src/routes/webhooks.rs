//! Inbound webhook endpoints
//!
//! All three endpoints are public but signature-gated: PayPal via the
//! gateway's verify API, the identity provider and GitHub via HMAC-SHA256
//! over the raw body. Signature failures return 401 and touch nothing;
//! handler failures after verification are acknowledged with 200 so the
//! sender does not redeliver.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use portal_billing::{WebhookOutcome, WebhookTransmission};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    github,
    state::AppState,
};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing header: {}", name)))
}

/// POST /api/v1/webhooks/paypal
pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let transmission = WebhookTransmission {
        transmission_id: header(&headers, "paypal-transmission-id")?.to_string(),
        transmission_time: header(&headers, "paypal-transmission-time")?.to_string(),
        transmission_sig: header(&headers, "paypal-transmission-sig")?.to_string(),
        cert_url: header(&headers, "paypal-cert-url")?.to_string(),
        auth_algo: header(&headers, "paypal-auth-algo")?.to_string(),
    };

    let event: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    let outcome = state.billing.webhooks.process(&transmission, &event).await?;

    let status = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::Duplicate => "duplicate",
        WebhookOutcome::Ignored => "ignored",
        // Acknowledged anyway; redelivery would fail the same way
        WebhookOutcome::Failed => "failed",
    };
    Ok(Json(json!({ "status": status })))
}

type HmacSha256 = Hmac<Sha256>;

/// Verify a bare hex HMAC-SHA256 signature over the raw body
fn verify_hmac_hex(secret: &str, body: &[u8], hex_sig: &str) -> bool {
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, serde::Deserialize)]
struct IdentityEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: IdentityUserData,
}

#[derive(Debug, serde::Deserialize)]
struct IdentityUserData {
    /// Identity provider's user id
    id: String,
    email: Option<String>,
    name: Option<String>,
}

/// POST /api/v1/webhooks/identity
///
/// Provisioning events from the identity provider. `user.created` creates
/// a tenant (client) and its first user; further users for an existing
/// tenant are attached by the admin flow, not this hook.
pub async fn identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = header(&headers, "x-idp-signature")?;
    if !verify_hmac_hex(&state.config.idp_webhook_secret, &body, signature) {
        return Err(ApiError::InvalidWebhookSignature);
    }

    let event: IdentityEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    match event.event_type.as_str() {
        "user.created" => {
            let email = event.data.email.as_deref().unwrap_or_default();
            if email.is_empty() {
                tracing::warn!(external_id = %event.data.id, "user.created without email, skipping");
                return Ok(StatusCode::OK);
            }
            let name = event.data.name.as_deref().unwrap_or(email);

            // Redelivery guard: external_id is unique
            let existing: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM users WHERE external_id = $1")
                    .bind(&event.data.id)
                    .fetch_optional(&state.pool)
                    .await?;
            if existing.is_some() {
                return Ok(StatusCode::OK);
            }

            let mut tx = state.pool.begin().await?;
            let client_id = Uuid::new_v4();
            sqlx::query("INSERT INTO clients (id, name, contact_email) VALUES ($1, $2, $3)")
                .bind(client_id)
                .bind(name)
                .bind(email)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                INSERT INTO users (id, client_id, external_id, email, role)
                VALUES ($1, $2, $3, $4, 'user')
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(client_id)
            .bind(&event.data.id)
            .bind(email)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            tracing::info!(external_id = %event.data.id, client_id = %client_id, "Provisioned client from identity webhook");
        }
        "user.updated" => {
            if let Some(email) = &event.data.email {
                sqlx::query("UPDATE users SET email = $2 WHERE external_id = $1")
                    .bind(&event.data.id)
                    .bind(email)
                    .execute(&state.pool)
                    .await?;
            }
        }
        "user.deleted" => {
            let result = sqlx::query("DELETE FROM users WHERE external_id = $1")
                .bind(&event.data.id)
                .execute(&state.pool)
                .await?;
            tracing::info!(
                external_id = %event.data.id,
                deleted = result.rows_affected(),
                "Identity user deleted"
            );
        }
        other => {
            tracing::debug!(event_type = %other, "Ignoring identity event");
        }
    }

    Ok(StatusCode::OK)
}

#[derive(Debug, serde::Deserialize)]
struct GitHubIssueEvent {
    action: String,
    issue: GitHubIssue,
}

#[derive(Debug, serde::Deserialize)]
struct GitHubIssue {
    number: i64,
}

/// POST /api/v1/webhooks/github
///
/// Syncs mirrored-issue state back onto tickets by the persisted issue
/// number.
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = header(&headers, "x-hub-signature-256")?;
    if !github::verify_signature(&state.config.github_webhook_secret, &body, signature) {
        return Err(ApiError::InvalidWebhookSignature);
    }

    let event_name = header(&headers, "x-github-event")?;
    if event_name != "issues" {
        return Ok(StatusCode::OK);
    }

    let event: GitHubIssueEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    match event.action.as_str() {
        "closed" => {
            let result = sqlx::query(
                r#"
                UPDATE tickets SET status = 'closed', resolved_at = NOW()
                WHERE github_issue_number = $1 AND status <> 'closed'
                "#,
            )
            .bind(event.issue.number)
            .execute(&state.pool)
            .await?;
            if result.rows_affected() > 0 {
                tracing::info!(issue_number = event.issue.number, "Ticket closed from GitHub");
            }
        }
        "reopened" => {
            let result = sqlx::query(
                r#"
                UPDATE tickets SET status = 'open', resolved_at = NULL
                WHERE github_issue_number = $1
                "#,
            )
            .bind(event.issue.number)
            .execute(&state.pool)
            .await?;
            if result.rows_affected() > 0 {
                tracing::info!(issue_number = event.issue.number, "Ticket reopened from GitHub");
            }
        }
        _ => {}
    }

    Ok(StatusCode::OK)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    #[test]
    fn test_verify_hmac_hex() {
        let body = br#"{"type":"user.created"}"#;
        let mut mac = HmacSha256::new_from_slice(b"idp-secret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_hmac_hex("idp-secret", body, &sig));
        assert!(!verify_hmac_hex("wrong-secret", body, &sig));
        assert!(!verify_hmac_hex("idp-secret", b"tampered", &sig));
        assert!(!verify_hmac_hex("idp-secret", body, "zz-not-hex"));
    }

    #[test]
    fn test_identity_event_parses() {
        let body = r#"{"type":"user.created","data":{"id":"user_2abc","email":"a@b.com","name":"Acme"}}"#;
        let event: IdentityEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.event_type, "user.created");
        assert_eq!(event.data.id, "user_2abc");
        assert_eq!(event.data.email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_github_issue_event_parses() {
        let body = r#"{"action":"closed","issue":{"number":42,"title":"x"}}"#;
        let event: GitHubIssueEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.action, "closed");
        assert_eq!(event.issue.number, 42);
    }
}

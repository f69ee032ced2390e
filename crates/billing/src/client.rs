//! PayPal REST client and configuration
//!
//! Thin typed wrapper over the PayPal Orders, Billing, and Webhooks APIs.
//! OAuth access tokens are cached and refreshed shortly before expiry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{BillingError, BillingResult};

/// Configuration for PayPal billing
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    /// REST app client id
    pub client_id: String,
    /// REST app client secret
    pub client_secret: String,
    /// API base, e.g. https://api-m.sandbox.paypal.com
    pub api_base_url: String,
    /// Webhook id configured in the PayPal dashboard, required for
    /// inbound signature verification
    pub webhook_id: String,
    /// Base URL for approval return/cancel redirects
    pub app_base_url: String,
}

impl PayPalConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            client_id: std::env::var("PAYPAL_CLIENT_ID")
                .map_err(|_| BillingError::Config("PAYPAL_CLIENT_ID not set".to_string()))?,
            client_secret: std::env::var("PAYPAL_CLIENT_SECRET")
                .map_err(|_| BillingError::Config("PAYPAL_CLIENT_SECRET not set".to_string()))?,
            api_base_url: std::env::var("PAYPAL_API_BASE_URL")
                .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
            webhook_id: std::env::var("PAYPAL_WEBHOOK_ID")
                .map_err(|_| BillingError::Config("PAYPAL_WEBHOOK_ID not set".to_string()))?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

/// A created gateway order awaiting buyer approval
#[derive(Debug, Clone, Serialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub approval_url: Option<String>,
}

/// Result of capturing an approved order
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// Gateway capture status, e.g. "COMPLETED"
    pub status: String,
    /// Gateway transaction (capture) id
    pub transaction_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

impl CaptureResult {
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }
}

/// A created gateway subscription awaiting buyer approval
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySubscriptionCreated {
    pub subscription_id: String,
    pub approval_url: Option<String>,
}

/// Current gateway-side view of a subscription
#[derive(Debug, Clone)]
pub struct GatewaySubscription {
    pub status: String,
    pub next_billing_time: Option<OffsetDateTime>,
}

/// Transmission headers carried by an inbound PayPal webhook request
#[derive(Debug, Clone)]
pub struct WebhookTransmission {
    pub transmission_id: String,
    pub transmission_time: String,
    pub transmission_sig: String,
    pub cert_url: String,
    pub auth_algo: String,
}

// -- wire types ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct LinkDescription {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<LinkDescription>,
}

#[derive(Debug, Deserialize)]
struct AmountWire {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct CaptureWire {
    id: String,
    status: String,
    amount: AmountWire,
}

#[derive(Debug, Deserialize)]
struct PaymentsWire {
    #[serde(default)]
    captures: Vec<CaptureWire>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnitWire {
    payments: Option<PaymentsWire>,
}

#[derive(Debug, Deserialize)]
struct CaptureOrderResponse {
    #[serde(default)]
    purchase_units: Vec<PurchaseUnitWire>,
}

#[derive(Debug, Deserialize)]
struct ProductResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<LinkDescription>,
    billing_info: Option<BillingInfoWire>,
}

#[derive(Debug, Deserialize)]
struct BillingInfoWire {
    next_billing_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

/// Format a cent amount as a gateway decimal string, e.g. 21600 -> "216.00"
pub fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

/// Parse a gateway decimal amount string into cents, e.g. "216.00" -> 21600
pub fn parse_amount(value: &str) -> BillingResult<i64> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| BillingError::GatewayApi(format!("Invalid amount: {}", value)))?;
    Ok((parsed * 100.0).round() as i64)
}

fn approval_url(links: &[LinkDescription]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel == "approve")
        .map(|l| l.href.clone())
}

/// PayPal billing client
#[derive(Clone)]
pub struct PayPalClient {
    http: reqwest::Client,
    config: PayPalConfig,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl PayPalClient {
    /// Create a new client from config
    pub fn new(config: PayPalConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a new client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(PayPalConfig::from_env()?))
    }

    /// Get the config
    pub fn config(&self) -> &PayPalConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// Get a valid OAuth access token, refreshing if the cached one is
    /// missing or within a minute of expiry
    async fn access_token(&self) -> BillingResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > OffsetDateTime::now_utc() + time::Duration::seconds(60) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::GatewayApi(format!(
                "Token request failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = OffsetDateTime::now_utc() + time::Duration::seconds(token.expires_in);

        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> BillingResult<reqwest::Response> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::GatewayApi(format!(
                "{} failed ({}): {}",
                path, status, body
            )));
        }
        Ok(response)
    }

    /// Create a one-time order for an invoice total.
    /// `custom_id` carries our invoice id so the capture webhook can link back.
    pub async fn create_order(
        &self,
        amount_cents: i64,
        currency: &str,
        invoice_number: &str,
        custom_id: &str,
    ) -> BillingResult<OrderCreated> {
        let return_url = format!("{}/billing/return", self.config.app_base_url);
        let cancel_url = format!("{}/billing/cancel", self.config.app_base_url);

        let body = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": currency,
                    "value": format_amount(amount_cents),
                },
                "invoice_id": invoice_number,
                "custom_id": custom_id,
            }],
            "application_context": {
                "return_url": return_url,
                "cancel_url": cancel_url,
            }
        });

        let order: OrderResponse = self
            .post_json("/v2/checkout/orders", &body)
            .await?
            .json()
            .await?;

        tracing::info!(
            order_id = %order.id,
            invoice_number = %invoice_number,
            amount_cents = amount_cents,
            "Created gateway order"
        );

        Ok(OrderCreated {
            approval_url: approval_url(&order.links),
            order_id: order.id,
        })
    }

    /// Capture an approved order
    pub async fn capture_order(&self, order_id: &str) -> BillingResult<CaptureResult> {
        let path = format!("/v2/checkout/orders/{}/capture", order_id);
        let captured: CaptureOrderResponse = self
            .post_json(&path, &serde_json::json!({}))
            .await?
            .json()
            .await?;

        let capture = captured
            .purchase_units
            .first()
            .and_then(|pu| pu.payments.as_ref())
            .and_then(|p| p.captures.first())
            .ok_or_else(|| {
                BillingError::GatewayApi("Capture response missing capture details".to_string())
            })?;

        Ok(CaptureResult {
            status: capture.status.clone(),
            transaction_id: capture.id.clone(),
            amount_cents: parse_amount(&capture.amount.value)?,
            currency: capture.amount.currency_code.clone(),
        })
    }

    /// Create a billing plan for a service package + cycle.
    /// PayPal requires a catalog product first; we create one per plan.
    pub async fn create_billing_plan(
        &self,
        package_name: &str,
        price_cents: i64,
        currency: &str,
        interval_unit: &str,
    ) -> BillingResult<String> {
        let product: ProductResponse = self
            .post_json(
                "/v1/catalogs/products",
                &serde_json::json!({
                    "name": package_name,
                    "type": "SERVICE",
                    "category": "SOFTWARE",
                }),
            )
            .await?
            .json()
            .await?;

        let plan: PlanResponse = self
            .post_json(
                "/v1/billing/plans",
                &serde_json::json!({
                    "product_id": product.id,
                    "name": format!("{} ({})", package_name, interval_unit.to_lowercase()),
                    "billing_cycles": [{
                        "frequency": {
                            "interval_unit": interval_unit,
                            "interval_count": 1,
                        },
                        "tenure_type": "REGULAR",
                        "sequence": 1,
                        // 0 = charge until cancelled
                        "total_cycles": 0,
                        "pricing_scheme": {
                            "fixed_price": {
                                "currency_code": currency,
                                "value": format_amount(price_cents),
                            }
                        }
                    }],
                    "payment_preferences": {
                        "auto_bill_outstanding": true,
                        "payment_failure_threshold": 3,
                    }
                }),
            )
            .await?
            .json()
            .await?;

        tracing::info!(
            plan_id = %plan.id,
            package_name = %package_name,
            interval_unit = %interval_unit,
            "Created gateway billing plan"
        );

        Ok(plan.id)
    }

    /// Create a gateway subscription against a billing plan.
    /// `custom_id` carries our client id for webhook correlation.
    pub async fn create_subscription(
        &self,
        plan_id: &str,
        custom_id: &str,
    ) -> BillingResult<GatewaySubscriptionCreated> {
        let return_url = format!("{}/billing/subscription/return", self.config.app_base_url);
        let cancel_url = format!("{}/billing/subscription/cancel", self.config.app_base_url);

        let sub: SubscriptionResponse = self
            .post_json(
                "/v1/billing/subscriptions",
                &serde_json::json!({
                    "plan_id": plan_id,
                    "custom_id": custom_id,
                    "application_context": {
                        "return_url": return_url,
                        "cancel_url": cancel_url,
                    }
                }),
            )
            .await?
            .json()
            .await?;

        tracing::info!(
            subscription_id = %sub.id,
            plan_id = %plan_id,
            status = %sub.status,
            "Created gateway subscription"
        );

        Ok(GatewaySubscriptionCreated {
            approval_url: approval_url(&sub.links),
            subscription_id: sub.id,
        })
    }

    /// Cancel a gateway subscription server-side
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        reason: &str,
    ) -> BillingResult<()> {
        let token = self.access_token().await?;
        let path = format!("/v1/billing/subscriptions/{}/cancel", subscription_id);
        let response = self
            .http
            .post(self.url(&path))
            .bearer_auth(token)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await?;

        // Cancel returns 204 No Content on success
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::GatewayApi(format!(
                "Subscription cancel failed ({}): {}",
                status, body
            )));
        }

        tracing::info!(subscription_id = %subscription_id, "Cancelled gateway subscription");
        Ok(())
    }

    /// Fetch the gateway-side state of a subscription
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        let token = self.access_token().await?;
        let path = format!("/v1/billing/subscriptions/{}", subscription_id);
        let response = self
            .http
            .get(self.url(&path))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::SubscriptionNotFound(
                subscription_id.to_string(),
            ));
        }

        let sub: SubscriptionResponse = response.json().await?;
        let next_billing_time = sub
            .billing_info
            .and_then(|b| b.next_billing_time)
            .and_then(|t| {
                OffsetDateTime::parse(&t, &time::format_description::well_known::Rfc3339).ok()
            });

        Ok(GatewaySubscription {
            status: sub.status,
            next_billing_time,
        })
    }

    /// Verify an inbound webhook delivery against the gateway's published
    /// certificate via the verify-webhook-signature API. Returns Ok only
    /// when the gateway reports SUCCESS; any other outcome is a
    /// signature failure.
    pub async fn verify_webhook_signature(
        &self,
        transmission: &WebhookTransmission,
        event_body: &serde_json::Value,
    ) -> BillingResult<()> {
        let body = serde_json::json!({
            "auth_algo": transmission.auth_algo,
            "cert_url": transmission.cert_url,
            "transmission_id": transmission.transmission_id,
            "transmission_sig": transmission.transmission_sig,
            "transmission_time": transmission.transmission_time,
            "webhook_id": self.config.webhook_id,
            "webhook_event": event_body,
        });

        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Webhook signature verification request failed");
                BillingError::WebhookSignatureInvalid
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                status = %response.status(),
                "Webhook signature verification rejected by gateway"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let verdict: VerifySignatureResponse = response
            .json()
            .await
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;

        if verdict.verification_status != "SUCCESS" {
            tracing::warn!(
                verification_status = %verdict.verification_status,
                transmission_id = %transmission.transmission_id,
                "Webhook signature verification failed"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(21600), "216.00");
        assert_eq!(format_amount(9900), "99.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(100), "1.00");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("216.00").unwrap(), 21600);
        assert_eq!(parse_amount("99.00").unwrap(), 9900);
        assert_eq!(parse_amount("0.05").unwrap(), 5);
        assert!(parse_amount("not-a-number").is_err());
    }

    #[test]
    fn test_amount_round_trip() {
        for cents in [0_i64, 1, 99, 100, 2050, 21600, 999999] {
            assert_eq!(parse_amount(&format_amount(cents)).unwrap(), cents);
        }
    }

    fn test_config(base_url: &str) -> PayPalConfig {
        PayPalConfig {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            api_base_url: base_url.to_string(),
            webhook_id: "WH-123".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_order_against_mock_gateway() {
        let mut server = mockito::Server::new_async().await;

        let token_mock = server
            .mock("POST", "/v1/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok-abc","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let order_mock = server
            .mock("POST", "/v2/checkout/orders")
            .with_status(201)
            .with_body(
                r#"{"id":"ORDER-1","status":"CREATED","links":[
                    {"rel":"self","href":"https://gateway/orders/ORDER-1","method":"GET"},
                    {"rel":"approve","href":"https://gateway/approve/ORDER-1","method":"GET"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = PayPalClient::new(test_config(&server.url()));
        let order = client
            .create_order(21600, "USD", "INV-2026-0001", "some-uuid")
            .await
            .unwrap();

        assert_eq!(order.order_id, "ORDER-1");
        assert_eq!(
            order.approval_url.as_deref(),
            Some("https://gateway/approve/ORDER-1")
        );

        token_mock.assert_async().await;
        order_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_verification_failure_is_rejected() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/v1/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok-abc","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        server
            .mock("POST", "/v1/notifications/verify-webhook-signature")
            .with_status(200)
            .with_body(r#"{"verification_status":"FAILURE"}"#)
            .create_async()
            .await;

        let client = PayPalClient::new(test_config(&server.url()));
        let transmission = WebhookTransmission {
            transmission_id: "tid".to_string(),
            transmission_time: "2026-01-01T00:00:00Z".to_string(),
            transmission_sig: "sig".to_string(),
            cert_url: "https://gateway/cert.pem".to_string(),
            auth_algo: "SHA256withRSA".to_string(),
        };

        let result = client
            .verify_webhook_signature(&transmission, &serde_json::json!({"event_type": "X"}))
            .await;

        assert!(matches!(
            result,
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }
}

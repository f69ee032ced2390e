//! Subscription lifecycle against the payment gateway
//!
//! Gateway billing plans are created lazily the first time a package and
//! cycle are subscribed to, then cached on the package row. A new
//! subscription starts as pending locally; the activation webhook flips
//! it to active once the buyer approves.

use portal_shared::{BillingCycle, ServicePackage, Subscription};
use sqlx::PgPool;
use uuid::Uuid;

use crate::client::PayPalClient;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};

/// Response for a newly started subscription
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionStarted {
    pub subscription_id: Uuid,
    pub gateway_subscription_id: String,
    pub approval_url: Option<String>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    paypal: PayPalClient,
    pool: PgPool,
    email: BillingEmailService,
}

impl SubscriptionService {
    pub fn new(paypal: PayPalClient, pool: PgPool, email: BillingEmailService) -> Self {
        Self { paypal, pool, email }
    }

    /// List a client's subscriptions, newest first
    pub async fn list_subscriptions(&self, client_id: Uuid) -> BillingResult<Vec<Subscription>> {
        let subs = sqlx::query_as(
            "SELECT * FROM subscriptions WHERE client_id = $1 ORDER BY created_at DESC",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    /// Return the cached gateway plan id for this package + cycle, creating
    /// and caching one if the package has none yet.
    async fn ensure_plan(
        &self,
        package: &ServicePackage,
        cycle: BillingCycle,
    ) -> BillingResult<String> {
        if let Some(plan_id) = package.gateway_plan_id(cycle) {
            return Ok(plan_id.to_string());
        }

        let interval_unit = match cycle {
            BillingCycle::Monthly => "MONTH",
            BillingCycle::Annual => "YEAR",
        };
        let plan_id = self
            .paypal
            .create_billing_plan(&package.name, package.price_cents(cycle), "USD", interval_unit)
            .await?;

        let column = match cycle {
            BillingCycle::Monthly => "gateway_plan_id_monthly",
            BillingCycle::Annual => "gateway_plan_id_annual",
        };
        sqlx::query(&format!(
            "UPDATE service_packages SET {} = $1 WHERE id = $2",
            column
        ))
        .bind(&plan_id)
        .bind(package.id)
        .execute(&self.pool)
        .await?;

        Ok(plan_id)
    }

    /// Start a subscription to a service package.
    ///
    /// Rejected when the client already has an active or suspended
    /// subscription to the same package; a pending, cancelled, or expired
    /// one does not block re-subscribing.
    pub async fn create_subscription(
        &self,
        client_id: Uuid,
        package_id: Uuid,
        cycle: BillingCycle,
    ) -> BillingResult<SubscriptionStarted> {
        let package: Option<ServicePackage> =
            sqlx::query_as("SELECT * FROM service_packages WHERE id = $1 AND active = TRUE")
                .bind(package_id)
                .fetch_optional(&self.pool)
                .await?;
        let package =
            package.ok_or_else(|| BillingError::PackageNotFound(package_id.to_string()))?;

        let blocking: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM subscriptions
            WHERE client_id = $1 AND service_package_id = $2
              AND status IN ('active', 'suspended')
            "#,
        )
        .bind(client_id)
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;
        if blocking.is_some() {
            return Err(BillingError::DuplicateSubscription);
        }

        let plan_id = self.ensure_plan(&package, cycle).await?;
        let created = self
            .paypal
            .create_subscription(&plan_id, &client_id.to_string())
            .await?;

        let subscription: Subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (id, client_id, service_package_id, gateway_subscription_id,
                 status, billing_cycle)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(package_id)
        .bind(&created.subscription_id)
        .bind(cycle.as_str())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            gateway_subscription_id = %created.subscription_id,
            client_id = %client_id,
            package = %package.name,
            cycle = %cycle.as_str(),
            "Subscription started, awaiting approval"
        );

        Ok(SubscriptionStarted {
            subscription_id: subscription.id,
            gateway_subscription_id: created.subscription_id,
            approval_url: created.approval_url,
        })
    }

    /// Cancel an active subscription.
    ///
    /// The gateway cancel happens first; if it fails the local row is left
    /// untouched so billing state never diverges from the gateway. Service
    /// remains available until the end of the paid period.
    pub async fn cancel_subscription(
        &self,
        client_id: Uuid,
        subscription_id: Uuid,
    ) -> BillingResult<Subscription> {
        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE id = $1 AND client_id = $2")
                .bind(subscription_id)
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?;
        let subscription = subscription
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;

        if subscription.status != portal_shared::SubscriptionStatus::Active {
            return Err(BillingError::SubscriptionNotActive(
                subscription.status.as_str().to_string(),
            ));
        }

        self.paypal
            .cancel_subscription(
                &subscription.gateway_subscription_id,
                "Cancelled by customer",
            )
            .await?;

        sqlx::query(
            "UPDATE subscriptions SET status = 'cancelled', cancel_at_period_end = TRUE WHERE id = $1",
        )
        .bind(subscription.id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            gateway_subscription_id = %subscription.gateway_subscription_id,
            "Subscription cancelled"
        );

        let client: Option<portal_shared::Client> =
            sqlx::query_as("SELECT * FROM clients WHERE id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?;
        let package: Option<ServicePackage> =
            sqlx::query_as("SELECT * FROM service_packages WHERE id = $1")
                .bind(subscription.service_package_id)
                .fetch_optional(&self.pool)
                .await?;
        if let (Some(client), Some(package)) = (client, package) {
            if let Err(e) = self
                .email
                .send_subscription_cancelled(&client.contact_email, &client.name, &package.name)
                .await
            {
                tracing::error!(subscription_id = %subscription.id, error = %e, "Cancel email failed");
            }
        }

        // The gateway recomputes the final period end on cancel; pick it up
        // now so the row shows when service lapses. Best-effort only.
        if let Err(e) = self.refresh_next_billing_date(subscription.id).await {
            tracing::warn!(
                subscription_id = %subscription.id,
                error = %e,
                "Next billing date refresh after cancel failed"
            );
        }

        let refreshed: Subscription = sqlx::query_as("SELECT * FROM subscriptions WHERE id = $1")
            .bind(subscription.id)
            .fetch_one(&self.pool)
            .await?;

        Ok(refreshed)
    }

    /// Refresh the local next billing date from the gateway. Best-effort;
    /// the activation and renewal webhooks keep it current anyway.
    pub async fn refresh_next_billing_date(&self, subscription_id: Uuid) -> BillingResult<()> {
        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE id = $1")
                .bind(subscription_id)
                .fetch_optional(&self.pool)
                .await?;
        let subscription = subscription
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;

        let gateway = self
            .paypal
            .get_subscription(&subscription.gateway_subscription_id)
            .await?;

        if let Some(next) = gateway.next_billing_time {
            sqlx::query("UPDATE subscriptions SET next_billing_date = $2 WHERE id = $1")
                .bind(subscription.id)
                .bind(next)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use crate::client::PayPalConfig;
    use portal_shared::SubscriptionStatus;
    use time::macros::datetime;

    async fn test_pool() -> sqlx::PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        portal_shared::create_pool(&url)
            .await
            .expect("Failed to create pool")
    }

    fn service_for(base_url: &str, pool: sqlx::PgPool) -> SubscriptionService {
        let paypal = PayPalClient::new(PayPalConfig {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            api_base_url: base_url.to_string(),
            webhook_id: "WH-123".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
        });
        SubscriptionService::new(paypal, pool, BillingEmailService::from_env())
    }

    async fn insert_fixture(pool: &sqlx::PgPool, status: &str, gateway_id: &str) -> (Uuid, Uuid, Uuid) {
        let client_id = Uuid::new_v4();
        sqlx::query("INSERT INTO clients (id, name, contact_email) VALUES ($1, $2, $3)")
            .bind(client_id)
            .bind("Subscription Test Client")
            .bind(format!("billing-{}@example.com", client_id))
            .execute(pool)
            .await
            .unwrap();

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
        .bind(gateway_id)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();

        (client_id, package_id, subscription_id)
    }

    async fn cleanup(pool: &sqlx::PgPool, client_id: Uuid, package_id: Uuid) {
        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM service_packages WHERE id = $1")
            .bind(package_id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_cancel_refreshes_next_billing_date() {
        let pool = test_pool().await;
        let mut server = mockito::Server::new_async().await;

        let gateway_id = format!("I-{}", Uuid::new_v4().simple());
        let (client_id, package_id, subscription_id) =
            insert_fixture(&pool, "active", &gateway_id).await;

        server
            .mock("POST", "/v1/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok-abc","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;
        server
            .mock(
                "POST",
                format!("/v1/billing/subscriptions/{}/cancel", gateway_id).as_str(),
            )
            .with_status(204)
            .create_async()
            .await;
        server
            .mock(
                "GET",
                format!("/v1/billing/subscriptions/{}", gateway_id).as_str(),
            )
            .with_status(200)
            .with_body(format!(
                r#"{{"id":"{}","status":"CANCELLED","billing_info":{{"next_billing_time":"2097-01-01T00:00:00Z"}}}}"#,
                gateway_id
            ))
            .create_async()
            .await;

        let service = service_for(&server.url(), pool.clone());
        let cancelled = service
            .cancel_subscription(client_id, subscription_id)
            .await
            .unwrap();

        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(cancelled.cancel_at_period_end);
        // Final period end picked up from the gateway after the cancel
        assert_eq!(
            cancelled.next_billing_date,
            Some(datetime!(2097-01-01 00:00 UTC))
        );

        cleanup(&pool, client_id, package_id).await;
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_cancel_rejects_non_active_subscription() {
        let pool = test_pool().await;
        let gateway_id = format!("I-{}", Uuid::new_v4().simple());
        let (client_id, package_id, subscription_id) =
            insert_fixture(&pool, "pending", &gateway_id).await;

        // Rejected before any gateway call, so a dead base URL is fine
        let service = service_for("http://127.0.0.1:1", pool.clone());
        let err = service
            .cancel_subscription(client_id, subscription_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SubscriptionNotActive(_)));

        let status: String =
            sqlx::query_scalar("SELECT status FROM subscriptions WHERE id = $1")
                .bind(subscription_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "pending");

        cleanup(&pool, client_id, package_id).await;
    }
}

//! Service package catalog and subscription endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use portal_billing::SubscriptionStarted;
use portal_shared::{BillingCycle, ServicePackage, Subscription};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// GET /api/v1/packages
pub async fn list_packages(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ServicePackage>>> {
    let packages: Vec<ServicePackage> =
        sqlx::query_as("SELECT * FROM service_packages WHERE active = TRUE ORDER BY monthly_price_cents")
            .fetch_all(&state.pool)
            .await?;
    Ok(Json(packages))
}

/// GET /api/v1/subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Subscription>>> {
    let subs = state
        .billing
        .subscriptions
        .list_subscriptions(auth_user.client_id)
        .await?;
    Ok(Json(subs))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub package_id: Uuid,
    /// "monthly" or "annual"
    pub billing_cycle: String,
}

/// POST /api/v1/subscriptions
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<SubscriptionStarted>> {
    let cycle = BillingCycle::from_str(&req.billing_cycle).ok_or_else(|| {
        ApiError::Validation(format!(
            "Unknown billing cycle '{}' (expected monthly or annual)",
            req.billing_cycle
        ))
    })?;

    let started = state
        .billing
        .subscriptions
        .create_subscription(auth_user.client_id, req.package_id, cycle)
        .await?;
    Ok(Json(started))
}

/// DELETE /api/v1/subscriptions/:id
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let cancelled = state
        .billing
        .subscriptions
        .cancel_subscription(auth_user.client_id, subscription_id)
        .await?;
    Ok(Json(cancelled))
}

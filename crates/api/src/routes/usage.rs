//! API usage ingestion and reporting

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use portal_billing::pricing;
use portal_shared::ApiUsage;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct IngestUsageRequest {
    pub project_id: Uuid,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// Defaults to now when the caller doesn't backfill
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub request_timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct IngestUsageResponse {
    pub id: Uuid,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

/// Check the project exists and belongs to the caller's tenant
async fn owned_project(
    state: &AppState,
    auth_user: &AuthUser,
    project_id: Uuid,
) -> ApiResult<portal_shared::Project> {
    let project: Option<portal_shared::Project> =
        sqlx::query_as("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&state.pool)
            .await?;
    let project = project.ok_or(ApiError::NotFound)?;
    auth_user.require_client(project.client_id)?;
    Ok(project)
}

/// POST /api/v1/usage
pub async fn ingest_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<IngestUsageRequest>,
) -> ApiResult<Json<IngestUsageResponse>> {
    if req.input_tokens < 0 || req.output_tokens < 0 {
        return Err(ApiError::Validation(
            "Token counts cannot be negative".to_string(),
        ));
    }
    if req.provider.trim().is_empty() || req.model.trim().is_empty() {
        return Err(ApiError::Validation(
            "Provider and model are required".to_string(),
        ));
    }

    owned_project(&state, &auth_user, req.project_id).await?;

    let cost_usd = state.billing.pricing.cost_usd(
        &req.provider,
        &req.model,
        req.input_tokens,
        req.output_tokens,
    )?;
    let total_tokens = req.input_tokens + req.output_tokens;
    let timestamp = req
        .request_timestamp
        .unwrap_or_else(OffsetDateTime::now_utc);

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO api_usage
            (id, project_id, provider, model, input_tokens, output_tokens,
             total_tokens, cost_usd, request_timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(id)
    .bind(req.project_id)
    .bind(&req.provider)
    .bind(&req.model)
    .bind(req.input_tokens)
    .bind(req.output_tokens)
    .bind(total_tokens)
    .bind(cost_usd)
    .bind(timestamp)
    .execute(&state.pool)
    .await?;

    tracing::debug!(
        project_id = %req.project_id,
        provider = %req.provider,
        model = %req.model,
        total_tokens = total_tokens,
        cost_usd = cost_usd,
        "Usage recorded"
    );

    Ok(Json(IngestUsageResponse {
        id,
        total_tokens,
        cost_usd,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListUsageQuery {
    pub project_id: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
    pub limit: Option<i64>,
}

async fn fetch_usage(
    state: &AppState,
    auth_user: &AuthUser,
    query: &ListUsageQuery,
    limit: i64,
) -> ApiResult<Vec<ApiUsage>> {
    if let Some(project_id) = query.project_id {
        owned_project(state, auth_user, project_id).await?;
    }

    // Rows are always scoped to the caller's tenant via the project join
    let rows: Vec<ApiUsage> = sqlx::query_as(
        r#"
        SELECT u.* FROM api_usage u
        JOIN projects p ON p.id = u.project_id
        WHERE p.client_id = $1
          AND ($2::uuid IS NULL OR u.project_id = $2)
          AND ($3::timestamptz IS NULL OR u.request_timestamp >= $3)
          AND ($4::timestamptz IS NULL OR u.request_timestamp < $4)
        ORDER BY u.request_timestamp DESC
        LIMIT $5
        "#,
    )
    .bind(auth_user.client_id)
    .bind(query.project_id)
    .bind(query.start)
    .bind(query.end)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;
    Ok(rows)
}

/// GET /api/v1/usage
pub async fn list_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListUsageQuery>,
) -> ApiResult<Json<Vec<ApiUsage>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let rows = fetch_usage(&state, &auth_user, &query, limit).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct UsageSummaryQuery {
    pub project_id: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
    /// daily | provider | model
    pub group_by: Option<String>,
}

/// GET /api/v1/usage/summary
pub async fn usage_summary(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<UsageSummaryQuery>,
) -> ApiResult<Json<Vec<pricing::UsageBucket>>> {
    let filter = ListUsageQuery {
        project_id: query.project_id,
        start: query.start,
        end: query.end,
        limit: None,
    };
    // Aggregations need the full filtered window, not a page
    let rows = fetch_usage(&state, &auth_user, &filter, 100_000).await?;

    let buckets = match query.group_by.as_deref().unwrap_or("daily") {
        "daily" => pricing::aggregate_daily(&rows),
        "provider" => pricing::aggregate_by_provider(&rows),
        "model" => pricing::aggregate_by_model(&rows),
        other => {
            return Err(ApiError::Validation(format!(
                "Unknown group_by '{}' (expected daily, provider, or model)",
                other
            )))
        }
    };
    Ok(Json(buckets))
}

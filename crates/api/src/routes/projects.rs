//! Project and budget endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use portal_billing::BudgetStatus;
use portal_shared::Project;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// GET /api/v1/projects
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Project>>> {
    let projects: Vec<Project> =
        sqlx::query_as("SELECT * FROM projects WHERE client_id = $1 ORDER BY created_at DESC")
            .bind(auth_user.client_id)
            .fetch_all(&state.pool)
            .await?;
    Ok(Json(projects))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

/// POST /api/v1/projects
pub async fn create_project(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<Json<Project>> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Project name is required".to_string()));
    }

    let project: Project = sqlx::query_as(
        r#"
        INSERT INTO projects (id, client_id, name, description)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth_user.client_id)
    .bind(req.name.trim())
    .bind(&req.description)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(project_id = %project.id, client_id = %auth_user.client_id, "Project created");
    Ok(Json(project))
}

async fn owned_project(
    state: &AppState,
    auth_user: &AuthUser,
    project_id: Uuid,
) -> ApiResult<Project> {
    let project: Option<Project> = sqlx::query_as("SELECT * FROM projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(&state.pool)
        .await?;
    let project = project.ok_or(ApiError::NotFound)?;
    auth_user
        .require_client(project.client_id)
        .map_err(|_| ApiError::NotFound)?;
    Ok(project)
}

/// GET /api/v1/projects/:id
pub async fn get_project(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    let project = owned_project(&state, &auth_user, project_id).await?;
    Ok(Json(project))
}

/// GET /api/v1/projects/:id/budget
///
/// Dry-run budget position; reads only, never sends alerts.
pub async fn get_budget_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<BudgetStatus>> {
    let project = owned_project(&state, &auth_user, project_id).await?;
    let status = state.billing.budget.project_status(project.id).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBudgetRequest {
    /// None clears the budget
    pub budget_threshold_usd: Option<f64>,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_percent: f64,
}

fn default_alert_threshold() -> f64 {
    80.0
}

/// PATCH /api/v1/projects/:id/budget (admin only)
pub async fn update_budget(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<UpdateBudgetRequest>,
) -> ApiResult<Json<Project>> {
    auth_user.require_admin()?;
    let project = owned_project(&state, &auth_user, project_id).await?;

    let updated = state
        .billing
        .budget
        .update_budget(
            project.id,
            project.client_id,
            req.budget_threshold_usd,
            req.alert_threshold_percent,
        )
        .await?;
    Ok(Json(updated))
}

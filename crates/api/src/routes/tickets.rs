//! Support ticket endpoints
//!
//! Tickets are mirrored to GitHub issues best-effort; the issue number is
//! persisted on the ticket row so the GitHub webhook can sync status back.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use portal_shared::{Ticket, TicketMessage, TicketStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const MAX_SUBJECT_LENGTH: usize = 500;
const MAX_BODY_LENGTH: usize = 50_000;

/// GET /api/v1/tickets
pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let tickets: Vec<Ticket> =
        sqlx::query_as("SELECT * FROM tickets WHERE client_id = $1 ORDER BY created_at DESC")
            .bind(auth_user.client_id)
            .fetch_all(&state.pool)
            .await?;
    Ok(Json(tickets))
}

#[derive(Debug, serde::Serialize)]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub messages: Vec<TicketMessage>,
}

async fn owned_ticket(
    state: &AppState,
    auth_user: &AuthUser,
    ticket_id: Uuid,
) -> ApiResult<Ticket> {
    let ticket: Option<Ticket> = sqlx::query_as("SELECT * FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .fetch_optional(&state.pool)
        .await?;
    let ticket = ticket.ok_or(ApiError::NotFound)?;
    auth_user
        .require_client(ticket.client_id)
        .map_err(|_| ApiError::NotFound)?;
    Ok(ticket)
}

/// GET /api/v1/tickets/:id
pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<TicketDetail>> {
    let ticket = owned_ticket(&state, &auth_user, ticket_id).await?;
    let messages: Vec<TicketMessage> =
        sqlx::query_as("SELECT * FROM ticket_messages WHERE ticket_id = $1 ORDER BY created_at")
            .bind(ticket.id)
            .fetch_all(&state.pool)
            .await?;
    Ok(Json(TicketDetail { ticket, messages }))
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub body: String,
}

/// POST /api/v1/tickets
pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    if req.subject.trim().is_empty() {
        return Err(ApiError::Validation("Subject cannot be empty".to_string()));
    }
    if req.subject.len() > MAX_SUBJECT_LENGTH {
        return Err(ApiError::Validation(format!(
            "Subject too long (max {} characters)",
            MAX_SUBJECT_LENGTH
        )));
    }
    if req.body.trim().is_empty() {
        return Err(ApiError::Validation("Body cannot be empty".to_string()));
    }
    if req.body.len() > MAX_BODY_LENGTH {
        return Err(ApiError::Validation(format!(
            "Body too long (max {} characters)",
            MAX_BODY_LENGTH
        )));
    }

    // Mirror first so the issue number lands in the insert; a mirroring
    // failure just leaves it NULL
    let issue_body = format!("{}\n\n_Reported by {}_", req.body, auth_user.email);
    let issue_number = state.github.create_issue(&req.subject, &issue_body).await;

    let ticket: Ticket = sqlx::query_as(
        r#"
        INSERT INTO tickets (id, client_id, created_by, subject, body, status, github_issue_number)
        VALUES ($1, $2, $3, $4, $5, 'open', $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth_user.client_id)
    .bind(auth_user.user_id)
    .bind(req.subject.trim())
    .bind(&req.body)
    .bind(issue_number)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        ticket_id = %ticket.id,
        client_id = %auth_user.client_id,
        github_issue = ?issue_number,
        "Ticket created"
    );
    Ok(Json(ticket))
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub body: String,
}

/// POST /api/v1/tickets/:id/messages
pub async fn reply_to_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> ApiResult<Json<TicketMessage>> {
    if req.body.trim().is_empty() {
        return Err(ApiError::Validation("Body cannot be empty".to_string()));
    }
    if req.body.len() > MAX_BODY_LENGTH {
        return Err(ApiError::Validation(format!(
            "Body too long (max {} characters)",
            MAX_BODY_LENGTH
        )));
    }

    let ticket = owned_ticket(&state, &auth_user, ticket_id).await?;
    if ticket.status == TicketStatus::Closed {
        return Err(ApiError::Conflict("Ticket is closed".to_string()));
    }

    let message: TicketMessage = sqlx::query_as(
        r#"
        INSERT INTO ticket_messages (id, ticket_id, author_id, body)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(ticket.id)
    .bind(auth_user.user_id)
    .bind(&req.body)
    .fetch_one(&state.pool)
    .await?;

    sqlx::query("UPDATE tickets SET status = 'in_progress' WHERE id = $1 AND status = 'open'")
        .bind(ticket.id)
        .execute(&state.pool)
        .await?;

    if let Some(issue_number) = ticket.github_issue_number {
        let comment = format!("{}\n\n_From {}_", req.body, auth_user.email);
        state.github.add_comment(issue_number, &comment).await;
    }

    Ok(Json(message))
}

/// POST /api/v1/tickets/:id/close
pub async fn close_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<Ticket>> {
    let ticket = owned_ticket(&state, &auth_user, ticket_id).await?;
    if ticket.status == TicketStatus::Closed {
        return Err(ApiError::Conflict("Ticket is already closed".to_string()));
    }

    let closed: Ticket = sqlx::query_as(
        "UPDATE tickets SET status = 'closed', resolved_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(ticket.id)
    .fetch_one(&state.pool)
    .await?;

    if let Some(issue_number) = ticket.github_issue_number {
        state.github.close_issue(issue_number).await;
    }

    tracing::info!(ticket_id = %ticket.id, "Ticket closed");
    Ok(Json(closed))
}

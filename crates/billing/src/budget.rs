//! Project budget alerting
//!
//! Projects may carry a USD budget threshold; when accumulated usage cost
//! reaches the configured percentage of it, billing contacts get one
//! alert email. The `last_budget_alert_sent` stamp de-duplicates so a
//! breach alerts once until the stamp is cleared (e.g. when the budget is
//! raised).

use portal_shared::Project;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};

/// Snapshot of a project's budget position
#[derive(Debug, Clone, serde::Serialize)]
pub struct BudgetStatus {
    pub project_id: Uuid,
    pub threshold_usd: f64,
    pub usage_usd: f64,
    /// usage as a percentage of the threshold
    pub percentage: f64,
    pub alert_threshold_percent: f64,
    pub breached: bool,
    pub alert_already_sent: bool,
}

/// Pure breach computation, separated from I/O for testing
pub fn compute_status(
    project_id: Uuid,
    threshold_usd: f64,
    usage_usd: f64,
    alert_threshold_percent: f64,
    last_alert_sent: Option<OffsetDateTime>,
) -> BudgetStatus {
    let percentage = if threshold_usd > 0.0 {
        usage_usd / threshold_usd * 100.0
    } else {
        0.0
    };
    BudgetStatus {
        project_id,
        threshold_usd,
        usage_usd,
        percentage,
        alert_threshold_percent,
        breached: percentage >= alert_threshold_percent,
        alert_already_sent: last_alert_sent.is_some(),
    }
}

#[derive(Clone)]
pub struct BudgetAlertService {
    pool: PgPool,
    email: BillingEmailService,
}

impl BudgetAlertService {
    pub fn new(pool: PgPool, email: BillingEmailService) -> Self {
        Self { pool, email }
    }

    async fn usage_total(&self, project_id: Uuid) -> BillingResult<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(cost_usd) FROM api_usage WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0.0))
    }

    /// Read-only budget position for one project; never sends anything.
    /// Errors if the project has no budget configured.
    pub async fn project_status(&self, project_id: Uuid) -> BillingResult<BudgetStatus> {
        let project: Option<Project> = sqlx::query_as("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        let project =
            project.ok_or_else(|| BillingError::ProjectNotFound(project_id.to_string()))?;

        let threshold = project.budget_threshold_usd.ok_or_else(|| {
            BillingError::InvalidInput("Project has no budget threshold configured".to_string())
        })?;

        let usage = self.usage_total(project_id).await?;
        Ok(compute_status(
            project.id,
            threshold,
            usage,
            project.budget_alert_threshold_percent,
            project.last_budget_alert_sent,
        ))
    }

    /// Set or clear a project's budget. Changing the threshold clears the
    /// alert stamp so the new budget can alert again.
    pub async fn update_budget(
        &self,
        project_id: Uuid,
        client_id: Uuid,
        threshold_usd: Option<f64>,
        alert_threshold_percent: f64,
    ) -> BillingResult<Project> {
        if let Some(t) = threshold_usd {
            if t <= 0.0 {
                return Err(BillingError::InvalidInput(
                    "Budget threshold must be positive".to_string(),
                ));
            }
        }
        if !(0.0..=100.0).contains(&alert_threshold_percent) {
            return Err(BillingError::InvalidInput(
                "Alert threshold must be between 0 and 100".to_string(),
            ));
        }

        let project: Option<Project> = sqlx::query_as(
            r#"
            UPDATE projects
            SET budget_threshold_usd = $3,
                budget_alert_threshold_percent = $4,
                last_budget_alert_sent = NULL
            WHERE id = $1 AND client_id = $2
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(client_id)
        .bind(threshold_usd)
        .bind(alert_threshold_percent)
        .fetch_optional(&self.pool)
        .await?;

        project.ok_or_else(|| BillingError::ProjectNotFound(project_id.to_string()))
    }

    /// Scan all budgeted projects and alert on fresh breaches.
    /// Returns the number of alerts sent. Used by the hourly worker job.
    pub async fn run(&self) -> BillingResult<u64> {
        let projects: Vec<Project> = sqlx::query_as(
            r#"
            SELECT * FROM projects
            WHERE budget_threshold_usd IS NOT NULL
              AND last_budget_alert_sent IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sent = 0u64;
        for project in projects {
            match self.check_project(&project).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    // One bad project must not stop the scan
                    tracing::error!(project_id = %project.id, error = %e, "Budget check failed");
                }
            }
        }

        if sent > 0 {
            tracing::info!(alerts_sent = sent, "Budget scan complete");
        }
        Ok(sent)
    }

    async fn check_project(&self, project: &Project) -> BillingResult<bool> {
        let Some(threshold) = project.budget_threshold_usd else {
            return Ok(false);
        };
        let usage = self.usage_total(project.id).await?;
        let status = compute_status(
            project.id,
            threshold,
            usage,
            project.budget_alert_threshold_percent,
            project.last_budget_alert_sent,
        );
        if !status.breached {
            return Ok(false);
        }

        tracing::warn!(
            project_id = %project.id,
            usage_usd = status.usage_usd,
            threshold_usd = status.threshold_usd,
            percentage = status.percentage,
            "Project budget breached"
        );

        // Alert every user on the client who opted into billing email
        let recipients: Vec<(String,)> = sqlx::query_as(
            "SELECT email FROM users WHERE client_id = $1 AND notify_billing = TRUE",
        )
        .bind(project.client_id)
        .fetch_all(&self.pool)
        .await?;

        for (email,) in &recipients {
            if let Err(e) = self
                .email
                .send_budget_alert(
                    email,
                    &project.name,
                    status.usage_usd,
                    status.threshold_usd,
                    status.percentage,
                )
                .await
            {
                tracing::error!(project_id = %project.id, error = %e, "Budget alert email failed");
            }
        }

        // Stamp even when there were no recipients so we don't rescan forever
        sqlx::query("UPDATE projects SET last_budget_alert_sent = NOW() WHERE id = $1")
            .bind(project.id)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breach_at_exact_threshold() {
        let status = compute_status(Uuid::new_v4(), 100.0, 80.0, 80.0, None);
        assert!(status.breached);
        assert!((status.percentage - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_breach_below_threshold() {
        let status = compute_status(Uuid::new_v4(), 100.0, 79.99, 80.0, None);
        assert!(!status.breached);
    }

    #[test]
    fn test_usage_over_budget() {
        let status = compute_status(Uuid::new_v4(), 50.0, 75.0, 80.0, None);
        assert!(status.breached);
        assert!((status.percentage - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_alert_already_sent_flag() {
        let status = compute_status(
            Uuid::new_v4(),
            100.0,
            90.0,
            80.0,
            Some(OffsetDateTime::now_utc()),
        );
        assert!(status.breached);
        assert!(status.alert_already_sent);
    }

    #[test]
    fn test_zero_threshold_never_breaches() {
        let status = compute_status(Uuid::new_v4(), 0.0, 10.0, 80.0, None);
        assert!(!status.breached);
        assert_eq!(status.percentage, 0.0);
    }
}

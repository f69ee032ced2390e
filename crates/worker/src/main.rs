//! Portal Background Worker
//!
//! Handles scheduled jobs:
//! - Project budget alert scan (hourly)
//! - Overdue invoice sweep (daily at 2:00 UTC)

use std::sync::Arc;

use portal_billing::BillingService;
use portal_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Portal Worker v{}", env!("CARGO_PKG_VERSION"));

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;

    let billing = Arc::new(BillingService::from_env(pool)?);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Budget alert scan, at the top of every hour
    let budget = billing.budget.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let budget = budget.clone();
            Box::pin(async move {
                info!("Running scheduled budget alert scan");
                match budget.run().await {
                    Ok(sent) => info!(alerts_sent = sent, "Budget scan finished"),
                    Err(e) => error!(error = %e, "Budget scan failed"),
                }
            })
        })?)
        .await?;

    // Job 2: Overdue invoice sweep, daily at 2:00 UTC
    let invoices = billing.invoices.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let invoices = invoices.clone();
            Box::pin(async move {
                info!("Running scheduled overdue invoice sweep");
                match invoices.mark_overdue().await {
                    Ok(count) => info!(marked_overdue = count, "Overdue sweep finished"),
                    Err(e) => error!(error = %e, "Overdue sweep failed"),
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    info!("Scheduler started");

    // Park the main task; jobs run on the scheduler's tasks
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}

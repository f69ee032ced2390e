//! Application state

use std::sync::Arc;

use portal_billing::BillingService;
use sqlx::PgPool;

use crate::{auth::AuthState, config::Config, github::GitHubClient};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
    pub github: GitHubClient,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, billing: BillingService) -> Self {
        let github = GitHubClient::new(config.github_token.clone(), config.github_repo.clone());
        Self {
            pool,
            config,
            billing: Arc::new(billing),
            github,
        }
    }

    /// State for the auth middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            pool: self.pool.clone(),
            jwt_secret: self.config.idp_jwt_secret.clone(),
        }
    }
}

//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database
    pub database_url: String,
    pub database_direct_url: Option<String>,

    // Identity provider
    /// Shared secret for verifying identity-provider session JWTs (HS256)
    pub idp_jwt_secret: String,
    /// Shared secret for verifying identity-provider webhook signatures
    pub idp_webhook_secret: String,

    // GitHub issue mirroring
    pub github_token: Option<String>,
    /// "owner/repo" for mirrored support issues
    pub github_repo: Option<String>,
    pub github_webhook_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_direct_url: env::var("DATABASE_DIRECT_URL").ok(),

            idp_jwt_secret: env::var("IDP_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("IDP_JWT_SECRET"))?,
            idp_webhook_secret: env::var("IDP_WEBHOOK_SECRET")
                .map_err(|_| ConfigError::Missing("IDP_WEBHOOK_SECRET"))?,

            github_token: env::var("GITHUB_TOKEN").ok(),
            github_repo: env::var("GITHUB_REPO").ok(),
            github_webhook_secret: env::var("GITHUB_WEBHOOK_SECRET").unwrap_or_default(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

//! GitHub issue mirroring for support tickets
//!
//! Tickets are mirrored to issues in a configured repository so the
//! engineering team can work them in their normal flow. Mirroring is
//! best-effort: a GitHub outage never blocks ticket creation, the
//! ticket just ends up without an issue number. The issues webhook
//! syncs status back by the persisted issue number.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a GitHub `X-Hub-Signature-256` header against the raw body.
/// The header carries "sha256=<hex>"; comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Minimal GitHub REST client for issue mirroring
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: Option<String>,
    /// "owner/repo"
    repo: Option<String>,
    api_base_url: String,
}

impl GitHubClient {
    pub fn new(token: Option<String>, repo: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            repo,
            api_base_url: "https://api.github.com".to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.api_base_url = base_url.to_string();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some() && self.repo.is_some()
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.token.as_deref()?, self.repo.as_deref()?))
    }

    /// Open an issue for a new ticket. Returns the issue number, or None
    /// when mirroring is disabled or the request fails.
    pub async fn create_issue(&self, title: &str, body: &str) -> Option<i64> {
        let (token, repo) = self.credentials()?;

        let response = self
            .http
            .post(format!("{}/repos/{}/issues", self.api_base_url, repo))
            .bearer_auth(token)
            .header("User-Agent", "portal-api")
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({
                "title": title,
                "body": body,
                "labels": ["support"],
            }))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                #[derive(serde::Deserialize)]
                struct IssueResponse {
                    number: i64,
                }
                match resp.json::<IssueResponse>().await {
                    Ok(issue) => {
                        tracing::info!(issue_number = issue.number, "Mirrored ticket to GitHub issue");
                        Some(issue.number)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Malformed GitHub issue response - non-fatal");
                        None
                    }
                }
            }
            Ok(resp) => {
                tracing::error!(status = %resp.status(), "GitHub issue creation failed - non-fatal");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "GitHub issue creation failed - non-fatal");
                None
            }
        }
    }

    /// Mirror a ticket reply as an issue comment. Best-effort.
    pub async fn add_comment(&self, issue_number: i64, body: &str) -> bool {
        let Some((token, repo)) = self.credentials() else {
            return false;
        };

        let response = self
            .http
            .post(format!(
                "{}/repos/{}/issues/{}/comments",
                self.api_base_url, repo, issue_number
            ))
            .bearer_auth(token)
            .header("User-Agent", "portal-api")
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::error!(
                    issue_number = issue_number,
                    status = %resp.status(),
                    "GitHub comment failed - non-fatal"
                );
                false
            }
            Err(e) => {
                tracing::error!(issue_number = issue_number, error = %e, "GitHub comment failed - non-fatal");
                false
            }
        }
    }

    /// Close the mirrored issue when a ticket is closed in the portal. Best-effort.
    pub async fn close_issue(&self, issue_number: i64) -> bool {
        let Some((token, repo)) = self.credentials() else {
            return false;
        };

        let response = self
            .http
            .patch(format!(
                "{}/repos/{}/issues/{}",
                self.api_base_url, repo, issue_number
            ))
            .bearer_auth(token)
            .header("User-Agent", "portal-api")
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "state": "closed" }))
            .send()
            .await;

        matches!(response, Ok(resp) if resp.status().is_success())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"action":"closed"}"#;
        let header = sign("webhook-secret", body);
        assert!(verify_signature("webhook-secret", body, &header));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign("webhook-secret", br#"{"action":"closed"}"#);
        assert!(!verify_signature(
            "webhook-secret",
            br#"{"action":"reopened"}"#,
            &header
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = br#"{"action":"closed"}"#;
        let header = sign("webhook-secret", body);
        assert!(!verify_signature("other-secret", body, &header));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let body = b"{}";
        assert!(!verify_signature("s", body, "sha1=abcdef"));
        assert!(!verify_signature("s", body, "sha256=not-hex"));
        assert!(!verify_signature("s", body, ""));
    }

    #[tokio::test]
    async fn test_create_issue_against_mock() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/repos/acme/support/issues")
            .with_status(201)
            .with_body(r#"{"number": 42}"#)
            .create_async()
            .await;

        let client = GitHubClient::new(
            Some("token".to_string()),
            Some("acme/support".to_string()),
        )
        .with_base_url(&server.url());

        assert_eq!(client.create_issue("Subject", "Body").await, Some(42));
    }

    #[tokio::test]
    async fn test_disabled_client_returns_none() {
        let client = GitHubClient::new(None, None);
        assert!(!client.is_enabled());
        assert_eq!(client.create_issue("Subject", "Body").await, None);
    }
}

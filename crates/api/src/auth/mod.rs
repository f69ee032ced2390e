//! Authentication for the portal API
//!
//! Sessions are issued by the external identity provider; we verify its
//! HS256 session JWTs and resolve the `sub` claim to a portal user row.
//! Users are provisioned by the identity webhook, so an unknown `sub` on
//! a valid token means provisioning has not landed yet and reads as
//! unauthorized.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use portal_shared::{User, UserRole};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;

/// State handed to the auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub pool: PgPool,
    pub jwt_secret: String,
}

/// Claims carried by an identity-provider session token
#[derive(Debug, Deserialize)]
pub struct Claims {
    /// Identity provider's user id
    pub sub: String,
    pub exp: usize,
}

/// The authenticated caller, attached as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub role: UserRole,
    pub email: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Admins may act on any tenant; everyone else only on their own
    pub fn require_client(&self, client_id: Uuid) -> Result<(), ApiError> {
        if self.is_admin() || self.client_id == client_id {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(String::from)
}

/// Verify a session token's signature and expiry
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Token verification failed");
        ApiError::InvalidToken
    })
}

/// Middleware requiring a valid session token mapped to a known user
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return ApiError::Unauthorized.into_response();
    };

    let claims = match verify_token(&token, &auth_state.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let user: Result<Option<User>, sqlx::Error> =
        sqlx::query_as("SELECT * FROM users WHERE external_id = $1")
            .bind(&claims.sub)
            .fetch_optional(&auth_state.pool)
            .await;

    match user {
        Ok(Some(user)) => {
            let auth_user = AuthUser {
                user_id: user.id,
                client_id: user.client_id,
                role: user.role,
                email: user.email,
            };
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Ok(None) => {
            tracing::warn!(external_id = %claims.sub, "Valid token for unprovisioned user");
            ApiError::Unauthorized.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "User lookup failed during auth");
            ApiError::Internal.into_response()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: usize,
    }

    fn make_token(sub: &str, exp_offset_secs: i64, secret: &str) -> String {
        let exp = (time::OffsetDateTime::now_utc().unix_timestamp() + exp_offset_secs) as usize;
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_round_trip() {
        let token = make_token("user_abc123", 3600, "secret");
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, "user_abc123");
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = make_token("user_abc123", -3600, "secret");
        assert!(matches!(
            verify_token(&token, "secret"),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = make_token("user_abc123", 3600, "secret");
        assert!(matches!(
            verify_token(&token, "other-secret"),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn test_tenant_scope() {
        let client_id = Uuid::new_v4();
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            client_id,
            role: UserRole::User,
            email: "user@example.com".to_string(),
        };
        assert!(user.require_client(client_id).is_ok());
        assert!(user.require_client(Uuid::new_v4()).is_err());
        assert!(user.require_admin().is_err());

        let admin = AuthUser {
            role: UserRole::Admin,
            ..user
        };
        assert!(admin.require_client(Uuid::new_v4()).is_ok());
        assert!(admin.require_admin().is_ok());
    }
}

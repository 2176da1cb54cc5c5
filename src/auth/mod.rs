/*!
 * # Authentication Module
 *
 * Bearer-token authentication for the RecZone API. Tokens are HS256 JWTs
 * minted by the account service with a shared signing secret; this module
 * validates them, resolves the caller, and exposes the result to handlers
 * through request extensions.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::AppConfig;

/// Claims carried by the account-service JWTs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Auth uid of the caller
    pub sub: String,
    pub roles: Vec<String>,
    /// Token id, unique per mint
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated caller extracted from a validated JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub roles: Vec<String>,
    pub token_id: String,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Name the handlers take the extractor under.
pub type AuthenticatedUser = AuthUser;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingAuth,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            Self::TokenCreation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::MissingAuth => "AUTH_MISSING",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::TokenCreation(_) => "AUTH_TOKEN_CREATION_FAILED",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (self.status(), body).into_response()
    }
}

/// Validates bearer tokens against the shared signing secret. Minting lives
/// here too; the integration harness uses it to produce caller tokens.
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    issuer: String,
    audience: String,
    token_ttl_secs: i64,
}

impl AuthService {
    pub fn new(jwt_secret: String, issuer: String, audience: String, token_ttl_secs: i64) -> Self {
        Self {
            jwt_secret,
            issuer,
            audience,
            token_ttl_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            config.auth_issuer.clone(),
            config.auth_audience.clone(),
            config.jwt_expiration as i64,
        )
    }

    /// Mint a signed token for the given auth uid.
    pub fn generate_token(&self, user_id: &str, roles: Vec<String>) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + ChronoDuration::seconds(self.token_ttl_secs);

        let claims = Claims {
            sub: user_id.to_string(),
            roles,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Decode and verify a token, checking signature, expiry, issuer, and
    /// audience.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        Ok(claims)
    }
}

/// Authenticated-user extractor backed by the auth middleware.
///
/// Handlers taking `AuthenticatedUser` as an argument read the value the
/// middleware stored in request extensions; requests that bypassed the
/// middleware are rejected as unauthenticated.
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// Validates the bearer token and stores the caller in request extensions.
///
/// An outer layer injects the [`AuthService`] at startup; if it is absent
/// the route was wired up wrong, which is a 500, not a 401.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let Some(auth_service) = request.extensions().get::<Arc<AuthService>>().cloned() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Authentication service not available",
        )
            .into_response();
    };

    let headers = request.headers().clone();
    match extract_auth_from_headers(&headers, &auth_service) {
        Ok(user) => {
            debug!(user_id = %user.user_id, "authenticated request");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AuthError::MissingAuth)?;

    let claims = auth_service.validate_token(token)?;
    Ok(AuthUser {
        user_id: claims.sub,
        roles: claims.roles,
        token_id: claims.jti,
    })
}

/// Hangs the auth middleware off a router: `routes().with_auth()`.
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn test_service() -> AuthService {
        AuthService::new(
            "a-test-signing-secret-that-is-long-enough-for-unit-tests".to_string(),
            "reczone-api".to_string(),
            "reczone-app".to_string(),
            3600,
        )
    }

    #[test]
    fn generated_tokens_validate_round_trip() {
        let service = test_service();
        let token = service
            .generate_token("user-42", vec!["member".to_string()])
            .unwrap();

        let claims = service.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.roles, vec!["member".to_string()]);
        assert_eq!(claims.iss, "reczone-api");
        assert_eq!(claims.aud, "reczone-app");
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let service = AuthService::new(
            "a-test-signing-secret-that-is-long-enough-for-unit-tests".to_string(),
            "reczone-api".to_string(),
            "reczone-app".to_string(),
            -120,
        );
        let token = service.generate_token("user-42", vec![]).unwrap();

        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let service = test_service();
        let other = AuthService::new(
            "an-entirely-different-secret-used-by-nobody-in-particular".to_string(),
            "reczone-api".to_string(),
            "reczone-app".to_string(),
            3600,
        );
        let token = other.generate_token("user-42", vec![]).unwrap();

        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn tokens_for_another_audience_are_rejected() {
        let service = test_service();
        let other = AuthService::new(
            "a-test-signing-secret-that-is-long-enough-for-unit-tests".to_string(),
            "reczone-api".to_string(),
            "some-other-app".to_string(),
            3600,
        );
        let token = other.generate_token("user-42", vec![]).unwrap();

        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn bearer_header_is_parsed() {
        let service = test_service();
        let token = service.generate_token("user-7", vec![]).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let user = extract_auth_from_headers(&headers, &service).unwrap();
        assert_eq!(user.user_id, "user-7");
    }

    #[test]
    fn missing_header_is_missing_auth() {
        let service = test_service();
        let headers = HeaderMap::new();

        assert!(matches!(
            extract_auth_from_headers(&headers, &service),
            Err(AuthError::MissingAuth)
        ));
    }

    #[tokio::test]
    async fn extractor_reads_the_request_extension() {
        let request = HttpRequest::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        parts.extensions.insert(AuthUser {
            user_id: "user-9".to_string(),
            roles: vec![],
            token_id: "jti-1".to_string(),
        });

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, "user-9");
    }

    #[tokio::test]
    async fn extractor_rejects_unauthenticated_requests() {
        let request = HttpRequest::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let result = AuthUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::MissingAuth)));
    }
}

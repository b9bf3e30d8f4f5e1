//! Authentication middleware
//!
//! JWT bearer authentication and permission checks

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use shared::Actor;
use uuid::Uuid;

use crate::error::{AppError, AppResult, ErrorDetail, ErrorResponse};
use crate::AppState;

/// Authenticated user information extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub business_id: Uuid,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Check if user has a specific permission
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let permission = format!("{}:{}", resource, action);
        self.permissions.contains(&permission)
    }

    /// Fail with `InsufficientPermissions` unless the permission is granted
    pub fn require(&self, resource: &str, action: &str) -> AppResult<()> {
        if self.has_permission(resource, action) {
            Ok(())
        } else {
            Err(AppError::InsufficientPermissions(format!(
                "{}:{}",
                resource, action
            )))
        }
    }

    /// Operators holding `tanks:all` may work on every tank of the business
    pub fn has_full_tank_scope(&self) -> bool {
        self.has_permission("tanks", "all")
    }
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        Some(token) => token,
        None => return unauthorized_response("Missing or invalid Authorization header"),
    };

    let claims = match decode_jwt(token, &state.config.jwt.secret) {
        Ok(claims) => claims,
        Err(msg) => return unauthorized_response(&msg),
    };

    let user = match auth_user_from(claims) {
        Ok(user) => user,
        Err(msg) => return unauthorized_response(msg),
    };

    request.extensions_mut().insert(user);

    next.run(request).await
}

/// Identity carried into handlers; the role stays in the token, permissions
/// already spell out what it grants
fn auth_user_from(claims: Claims) -> Result<AuthUser, &'static str> {
    match (
        Uuid::parse_str(&claims.sub),
        Uuid::parse_str(&claims.business_id),
    ) {
        (Ok(user_id), Ok(business_id)) => Ok(AuthUser {
            user_id,
            business_id,
            permissions: claims.permissions,
        }),
        _ => Err("Invalid identifiers in token"),
    }
}

/// JWT claims structure
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    pub business_id: String,
    pub role_id: String,
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Decode and validate JWT token
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, String> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {}", e))
}

fn unauthorized_response(message: &str) -> Response {
    let error = ErrorResponse {
        error: ErrorDetail::new("UNAUTHORIZED", message),
    };
    (StatusCode::UNAUTHORIZED, Json(error)).into_response()
}

/// Extractor for authenticated user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                let error = ErrorResponse {
                    error: ErrorDetail::new("UNAUTHORIZED", "Authentication required"),
                };
                (StatusCode::UNAUTHORIZED, Json(error))
            })
    }
}

impl CurrentUser {
    pub fn actor(&self, origin: &ClientOrigin) -> Actor {
        Actor::new(self.0.user_id, origin.0.clone())
    }
}

/// Origin address of the request: first `X-Forwarded-For` hop, else the peer
#[derive(Clone, Debug, Default)]
pub struct ClientOrigin(pub Option<String>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());

        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };

        Ok(ClientOrigin(forwarded.or_else(peer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(permissions: &[&str]) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_require_permission() {
        let clerk = user(&["intake:create", "tanks:read"]);
        assert!(clerk.require("intake", "create").is_ok());
        assert!(matches!(
            clerk.require("intake", "annul"),
            Err(AppError::InsufficientPermissions(p)) if p == "intake:annul"
        ));
        assert!(!clerk.has_full_tank_scope());
        assert!(user(&["tanks:all"]).has_full_tank_scope());
    }

    #[test]
    fn test_auth_user_from_claims() {
        let user_id = Uuid::new_v4();
        let claims = Claims {
            sub: user_id.to_string(),
            business_id: Uuid::new_v4().to_string(),
            role_id: "clerk".to_string(),
            permissions: vec!["dispatch:create".to_string()],
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
        };
        let user = auth_user_from(claims).unwrap();
        assert_eq!(user.user_id, user_id);
        assert!(user.has_permission("dispatch", "create"));

        let bad = Claims {
            sub: "not-a-uuid".to_string(),
            business_id: Uuid::new_v4().to_string(),
            role_id: Uuid::new_v4().to_string(),
            permissions: vec![],
            exp: 0,
            iat: 0,
        };
        assert_eq!(
            auth_user_from(bad).unwrap_err(),
            "Invalid identifiers in token"
        );
    }

    #[test]
    fn test_decode_rejects_foreign_signature() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            business_id: Uuid::new_v4().to_string(),
            role_id: Uuid::new_v4().to_string(),
            permissions: vec![],
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();

        assert!(decode_jwt(&token, "ledger-secret").is_err());
        assert_eq!(decode_jwt(&token, "other-secret").unwrap().sub, claims.sub);
    }
}

//! Route definitions for the Fuel Inventory Ledger

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes
        .nest("/tanks", tank_routes(state.clone()))
        .nest("/intakes", intake_routes(state.clone()))
        .nest("/dispatches", dispatch_routes(state.clone()))
        .nest("/audit", audit_routes(state.clone()))
        .nest("/operators", operator_routes(state))
}

/// Tank stock and ledger routes (protected)
fn tank_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_tanks))
        .route("/:tank_id", get(handlers::get_tank_stock))
        .route("/:tank_id/movements", get(handlers::list_movements))
        .route("/:tank_id/verify", get(handlers::verify_tank))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Intake workflow routes (protected)
fn intake_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_intakes).post(handlers::create_intake))
        .route("/:intake_id", get(handlers::get_intake))
        .route("/:intake_id/confirm", post(handlers::confirm_intake))
        .route("/:intake_id/annul", post(handlers::annul_intake))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Dispatch workflow routes (protected)
fn dispatch_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_dispatches).post(handlers::open_dispatch))
        .route("/:dispatch_id", get(handlers::get_dispatch))
        .route("/:dispatch_id/complete", post(handlers::complete_dispatch))
        .route("/:dispatch_id/annul", post(handlers::annul_dispatch))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Audit trail routes (protected)
fn audit_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/:entity_type/:entity_id", get(handlers::list_audit_entries))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Operator credential routes (protected)
fn operator_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me/pin", put(handlers::set_own_pin))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Method, Request, StatusCode},
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use shared::LedgerPolicy;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::{Config, DatabaseConfig, JwtConfig, LedgerConfig, ServerConfig};
    use crate::middleware::auth::Claims;

    const SECRET: &str = "router-test-secret";

    fn app() -> Router {
        // Lazy pool: these requests are all rejected before touching the database
        let db = PgPoolOptions::new()
            .connect_lazy("postgres://ledger@localhost/fuel_ledger_test")
            .unwrap();
        let policy = LedgerPolicy::default();
        let config = Config {
            environment: "test".to_string(),
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://ledger@localhost/fuel_ledger_test".to_string(),
                max_connections: 1,
                min_connections: 0,
            },
            jwt: JwtConfig {
                secret: SECRET.to_string(),
            },
            ledger: LedgerConfig {
                reconciliation_threshold_liters: policy.reconciliation_threshold_liters,
                external_evidence_required: policy.external_evidence_required,
                idempotency_ttl_hours: 24,
            },
        };
        let state = AppState {
            db,
            config: Arc::new(config),
            policy,
        };
        api_routes(state.clone()).with_state(state)
    }

    fn token(permissions: &[&str]) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            business_id: Uuid::new_v4().to_string(),
            role_id: Uuid::new_v4().to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            exp: now + 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_tanks_require_bearer_token() {
        let request = Request::get("/tanks").body(Body::empty()).unwrap();
        let response = tokio_test::assert_ok!(app().oneshot(request).await);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_signed_elsewhere_is_rejected() {
        let foreign = encode(
            &Header::default(),
            &Claims {
                sub: Uuid::new_v4().to_string(),
                business_id: Uuid::new_v4().to_string(),
                role_id: Uuid::new_v4().to_string(),
                permissions: vec!["tanks:read".to_string()],
                exp: chrono::Utc::now().timestamp() + 3600,
                iat: chrono::Utc::now().timestamp(),
            },
            &EncodingKey::from_secret(b"someone-else"),
        )
        .unwrap();
        let request = Request::get("/tanks")
            .header(AUTHORIZATION, format!("Bearer {}", foreign))
            .body(Body::empty())
            .unwrap();
        let response = tokio_test::assert_ok!(app().oneshot(request).await);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_permission_is_forbidden() {
        let request = Request::get("/tanks")
            .header(AUTHORIZATION, format!("Bearer {}", token(&["intake:read"])))
            .body(Body::empty())
            .unwrap();
        let response = tokio_test::assert_ok!(app().oneshot(request).await);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_oversized_idempotency_key_is_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/dispatches/{}/annul", Uuid::new_v4()))
            .header(AUTHORIZATION, format!("Bearer {}", token(&["dispatch:annul"])))
            .header("idempotency-key", "k".repeat(200))
            .body(Body::empty())
            .unwrap();
        let response = tokio_test::assert_ok!(app().oneshot(request).await);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

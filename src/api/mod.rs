use crate::{
    api::handlers::{
        auth::{AuthConfig, AuthState, PasswordCodec},
        health,
    },
    store::{IsolationLevel, SharedStore, memory::MemoryStore, postgres::PgStore},
};
use anyhow::{Context, Result, bail};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::options,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// DSN that selects the in-process store instead of PostgreSQL.
pub const MEMORY_DSN: &str = "memory://";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the handlers need, shared through `Extension` layers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub auth: Arc<AuthState>,
    pub profile_isolation: IsolationLevel,
}

/// Assemble the routed application with request ids, tracing and state layers.
#[must_use]
pub fn app(state: AppState) -> Router {
    // Non-doc routes like preflight `OPTIONS /health` are added after the OpenAPI split.
    let (router, _openapi) = router().split_for_parts();
    router.route("/health", options(health::health)).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(state.auth))
            .layer(Extension(state.profile_isolation))
            .layer(Extension(state.store)),
    )
}

/// Open the store named by `dsn`.
///
/// # Errors
/// Returns an error if the DSN is not a `postgres://` URL or the pool cannot connect.
pub async fn connect_store(dsn: &str, max_connections: u32) -> Result<SharedStore> {
    if dsn == MEMORY_DSN {
        info!("Using in-memory store; data is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let url = Url::parse(dsn).context("Invalid DSN")?;
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        bail!("Unsupported DSN scheme: {}", url.scheme());
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    Ok(Arc::new(PgStore::new(pool)))
}

/// Start the server
/// # Errors
/// Return error if the store cannot be opened or the listener fails
pub async fn new(
    port: u16,
    dsn: &str,
    max_connections: u32,
    auth_config: AuthConfig,
    passwords: PasswordCodec,
    profile_isolation: IsolationLevel,
) -> Result<()> {
    let store = connect_store(dsn, max_connections).await?;

    let mode = auth_config.credential_mode();
    let auth = Arc::new(
        AuthState::from_config(auth_config, passwords, store.clone())
            .context("Invalid authentication configuration")?,
    );

    let app = app(AppState {
        store,
        auth,
        profile_isolation,
    });

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!(credential_mode = %mode, isolation = %profile_isolation, "Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::CredentialMode;
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn connect_store_accepts_memory_dsn() -> Result<()> {
        let store = connect_store(MEMORY_DSN, 1).await?;
        store.ping().await?;
        Ok(())
    }

    #[tokio::test]
    async fn connect_store_rejects_foreign_dsn() {
        assert!(connect_store("mysql://localhost/bulletin", 1).await.is_err());
        assert!(connect_store("not a dsn", 1).await.is_err());
    }

    #[tokio::test]
    async fn app_sets_request_id_and_serves_preflight_health() -> Result<()> {
        let store = connect_store(MEMORY_DSN, 1).await?;
        let auth = Arc::new(AuthState::from_config(
            AuthConfig::new(CredentialMode::Session),
            PasswordCodec::default(),
            store.clone(),
        )?);
        let app = app(AppState {
            store,
            auth,
            profile_isolation: IsolationLevel::default(),
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        Ok(())
    }
}

use anyhow::{Context, Result};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use bulletin::{
    api::{
        self, AppState,
        handlers::auth::{AuthConfig, AuthState, CredentialMode, PasswordCodec},
    },
    store::{
        IsolationLevel, SharedStore,
        memory::{Fault, MemoryStore},
    },
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "correct horse battery staple";

struct TestApp {
    router: Router,
    memory: MemoryStore,
}

impl TestApp {
    fn new(mode: CredentialMode) -> Result<Self> {
        let memory = MemoryStore::new();
        let store: SharedStore = Arc::new(memory.clone());
        let config = AuthConfig::new(mode).with_token_secret(SecretString::from("test-secret"));
        let passwords = PasswordCodec::new(1024, 1, 1)?;
        let auth = Arc::new(AuthState::from_config(config, passwords, store.clone())?);
        let router = api::app(AppState {
            store,
            auth,
            profile_isolation: IsolationLevel::ReadCommitted,
        });
        Ok(Self { router, memory })
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Result<Response> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn sign_up(&self, email: &str) -> Result<Response> {
        self.send(
            Method::POST,
            "/sign-up",
            None,
            Some(json!({
                "email": email,
                "password": PASSWORD,
                "name": "Ada",
                "age": 36,
                "gender": "FEMALE",
            })),
        )
        .await
    }

    /// Sign in and return the `name=value` pair to replay as a Cookie header.
    async fn sign_in(&self) -> Result<String> {
        let response = self
            .send(
                Method::POST,
                "/sign-in",
                None,
                Some(json!({ "email": EMAIL, "password": PASSWORD })),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = set_cookie(&response).context("sign-in did not set a cookie")?;
        let pair = set_cookie
            .split(';')
            .next()
            .context("empty Set-Cookie header")?;
        Ok(pair.to_string())
    }
}

fn set_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn assert_cookie_cleared(response: &Response) {
    let cookie = set_cookie(response).unwrap_or_default();
    assert!(cookie.starts_with("authorization=;"), "cookie: {cookie}");
    assert!(cookie.contains("Max-Age=0"), "cookie: {cookie}");
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn full_flow(mode: CredentialMode) -> Result<()> {
    let app = TestApp::new(mode)?;

    let response = app.sign_up(EMAIL).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.sign_up(EMAIL).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(app.memory.user_count().await, 1);
    assert_eq!(app.memory.profile_count().await, 1);

    let cookie = app.sign_in().await?;

    let response = app.send(Method::GET, "/users", Some(&cookie), None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["data"]["email"], EMAIL);
    assert_eq!(body["data"]["userInfos"]["name"], "Ada");
    assert_eq!(body["data"]["userInfos"]["gender"], "FEMALE");

    let response = app
        .send(
            Method::PATCH,
            "/users",
            Some(&cookie),
            Some(json!({ "name": "Grace", "age": 36 })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(Method::GET, "/users/histories", Some(&cookie), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    let entries = body["data"].as_array().context("history is not an array")?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["changedField"], "name");
    assert_eq!(entries[0]["oldValue"], "Ada");
    assert_eq!(entries[0]["newValue"], "Grace");

    // Repeating the same update changes nothing and records nothing.
    let response = app
        .send(
            Method::PATCH,
            "/users",
            Some(&cookie),
            Some(json!({ "name": "Grace" })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.memory.history_count().await, 1);

    let response = app.send(Method::POST, "/sign-out", Some(&cookie), None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_cookie_cleared(&response);

    Ok(())
}

#[tokio::test]
async fn token_mode_full_flow() -> Result<()> {
    full_flow(CredentialMode::Token).await
}

#[tokio::test]
async fn session_mode_full_flow() -> Result<()> {
    full_flow(CredentialMode::Session).await
}

#[tokio::test]
async fn session_is_unusable_after_sign_out() -> Result<()> {
    let app = TestApp::new(CredentialMode::Session)?;
    app.sign_up(EMAIL).await?;
    let cookie = app.sign_in().await?;
    assert_eq!(app.memory.session_count().await, 1);

    app.send(Method::POST, "/sign-out", Some(&cookie), None).await?;
    assert_eq!(app.memory.session_count().await, 0);

    let response = app.send(Method::GET, "/users", Some(&cookie), None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_cookie_cleared(&response);
    Ok(())
}

#[tokio::test]
async fn missing_and_tampered_credentials_are_rejected() -> Result<()> {
    let app = TestApp::new(CredentialMode::Token)?;
    app.sign_up(EMAIL).await?;
    let cookie = app.sign_in().await?;

    let response = app.send(Method::GET, "/users", None, None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_cookie_cleared(&response);

    // Flip the first signature character.
    let dot = cookie.rfind('.').context("token has no signature")?;
    let replacement = if &cookie[dot + 1..dot + 2] == "A" { "B" } else { "A" };
    let mut tampered = cookie.clone();
    tampered.replace_range(dot + 1..dot + 2, replacement);
    let response = app
        .send(Method::GET, "/users", Some(&tampered), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_cookie_cleared(&response);
    let body = json_body(response).await?;
    assert!(body["message"].is_string());
    Ok(())
}

#[tokio::test]
async fn protected_routes_authenticate_before_reading_the_body() -> Result<()> {
    let app = TestApp::new(CredentialMode::Token)?;
    let response = app
        .send(
            Method::PATCH,
            "/users",
            None,
            Some(json!({ "nickname": "nope" })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unknown_profile_fields_are_rejected() -> Result<()> {
    let app = TestApp::new(CredentialMode::Token)?;
    app.sign_up(EMAIL).await?;
    let cookie = app.sign_in().await?;

    let response = app
        .send(
            Method::PATCH,
            "/users",
            Some(&cookie),
            Some(json!({ "nickname": "nope" })),
        )
        .await?;
    assert!(response.status().is_client_error());
    assert_eq!(app.memory.history_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let app = TestApp::new(CredentialMode::Session)?;
    app.sign_up(EMAIL).await?;

    let response = app
        .send(
            Method::POST,
            "/sign-in",
            None,
            Some(json!({ "email": EMAIL, "password": "wrong" })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).is_none());
    assert_eq!(app.memory.session_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn health_reports_store_state() -> Result<()> {
    let app = TestApp::new(CredentialMode::Token)?;

    let response = app.send(Method::GET, "/health", None, None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    let body = json_body(response).await?;
    assert_eq!(body["name"], "bulletin");
    assert_eq!(body["database"], "ok");

    app.memory.inject(Fault::Unavailable);
    let response = app.send(Method::GET, "/health", None, None).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

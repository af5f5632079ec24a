//! Shared fixtures for unit and HTTP tests.

use crate::{
    AppState, Application,
    api::models::{
        auth::AccessTokenResponse,
        users::{Role, UserResponse},
    },
    auth::{password, tokens::TokenIssuer},
    config::{AuthConfig, Config, DatabaseConfig, PasswordConfig, PoolSettings},
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
};
use axum::http::header;
use axum_test::{TestResponse, TestServer};
use serde_json::json;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use uuid::Uuid;

/// Password of every user made by [`create_test_user`].
pub const TEST_PASSWORD: &str = "password123";

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig {
            // Tests hand the application a pool directly.
            url: None,
            pool: PoolSettings {
                max_connections: 2,
                min_connections: 0,
                ..Default::default()
            },
        },
        auth: AuthConfig {
            access_token_secret: Some("test-access-secret".to_string()),
            refresh_token_secret: Some("test-refresh-secret".to_string()),
            password: PasswordConfig {
                argon2_memory_kib: 128,
                argon2_iterations: 1,
                argon2_parallelism: 1,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn create_test_state(pool: PgPool) -> AppState {
    let config = create_test_config();
    let tokens = Arc::new(TokenIssuer::new(&config.auth).expect("test config has both secrets"));
    AppState::builder().db(pool).config(config).tokens(tokens).build()
}

/// State whose pool never connects, for tests that stop before touching the database.
pub fn create_test_state_lazy() -> AppState {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/unused")
        .expect("lazy pool from a static url");
    create_test_state(pool)
}

pub async fn create_test_app(pool: PgPool) -> TestServer {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestServer {
    Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application")
        .into_test_server()
}

/// Insert a user with a unique name, `{name}@example.com` and [`TEST_PASSWORD`].
pub async fn create_test_user(pool: &PgPool, role: Role) -> UserResponse {
    let params = create_test_config().auth.password.argon2_params();
    let password_hash = password::hash_string_with_params(TEST_PASSWORD, params).expect("Failed to hash test password");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let name = format!("testuser_{}", Uuid::new_v4().simple());
    let user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: format!("{name}@example.com"),
            name,
            password_hash,
            role,
        })
        .await
        .expect("Failed to create test user");

    UserResponse::from(user)
}

/// The `name=value` pair of the refresh cookie set by `response`.
pub fn refresh_cookie_pair(response: &TestResponse) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("response sets a cookie")
        .to_str()
        .expect("cookie is ascii");
    set_cookie.split(';').next().unwrap_or_default().to_string()
}

/// Sign in through the API, returning the access token and the refresh cookie pair.
pub async fn sign_in(server: &TestServer, email: &str) -> (String, String) {
    let response = server.post("/auth/login").json(&json!({"email": email, "password": TEST_PASSWORD})).await;
    response.assert_status_ok();

    let cookie = refresh_cookie_pair(&response);
    let body: AccessTokenResponse = response.json();
    (body.access_token, cookie)
}

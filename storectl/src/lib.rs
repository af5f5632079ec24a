//! # storectl: store back office API
//!
//! `storectl` is the HTTP backend for a small retail back office. Staff sign in, administrators
//! manage staff accounts, and both manage the product catalogue.
//!
//! ## Overview
//!
//! Two roles exist. **Admins** manage users and have full write access to products. **Cashiers**
//! can read products, look up users and maintain their own profile. Every route except sign-in,
//! token refresh, registration and the health check requires an access token.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) with PostgreSQL for
//! persistence. Requests flow through tracing, CORS and timeout layers, then (on protected
//! routes) the [access guard](auth::middleware::access_guard), which verifies the bearer token and
//! attaches the caller's identity. Handlers check the caller's role with
//! [`RequiresRole`](auth::roles::RequiresRole), then talk to the database through repositories in
//! [`db::handlers`].
//!
//! ### Sessions
//!
//! Sign-in returns a 15 minute access token in the body and a 7 day refresh token in an
//! HTTP-only cookie. The refresh token is stored server-side; exchanging it at
//! `/auth/refresh-token` rotates the stored row, so a refresh token works exactly once. See
//! [`auth::session`].
//!
//! ### Caching
//!
//! Product reads can be served from a Redis or in-memory [`cache::Cache`]. Writes invalidate the
//! affected entries. The cache is optional and a failing cache never fails a request.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML keys and environment variables.
//!
//! ## Testing
//!
//! Database tests use `#[sqlx::test]`, which provisions a fresh database per test and applies
//! the migrations. HTTP tests drive the full router through
//! [`axum_test::TestServer`](https://docs.rs/axum-test).

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::models::users::Role,
    auth::{middleware::access_guard, password, tokens::TokenIssuer},
    cache::Cache,
    config::CorsOrigin,
    db::handlers::{Repository, Users},
    db::models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    openapi::ApiDoc,
};
use axum::{
    Router,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{ProductId, RefreshTokenId, UserId};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .tokens(Arc::new(TokenIssuer::new(&config.auth)?))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub tokens: Arc<TokenIssuer>,
    #[builder(default)]
    pub cache: Cache,
}

/// Get the storectl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the bootstrap admin user, or bring an existing one up to date.
///
/// Idempotent: when a user with `email` already exists their password is reset to `password` and
/// their role set to admin, so the configured credentials always work after startup.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(
    email: &str,
    name: &str,
    password: &str,
    params: password::Argon2Params,
    db: &PgPool,
) -> anyhow::Result<UserId> {
    let password_hash = password::hash_password(password.to_string(), params).await?;

    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    let user_id = match user_repo.get_user_by_email(email).await? {
        Some(existing) => {
            user_repo
                .update(
                    existing.id,
                    &UserUpdateDBRequest {
                        password_hash: Some(password_hash),
                        role: Some(Role::Admin),
                        ..Default::default()
                    },
                )
                .await?;
            existing.id
        }
        None => {
            let created = user_repo
                .create(&UserCreateDBRequest {
                    name: name.to_string(),
                    email: email.to_string(),
                    password_hash,
                    role: Role::Admin,
                })
                .await?;
            info!("Created initial admin user");
            created.id
        }
    };

    tx.commit().await?;
    Ok(user_id)
}

async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let url = config
        .database
        .url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("database.url is not configured"))?;
    let settings = &config.database.pool;
    let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(optional(settings.idle_timeout_secs))
        .max_lifetime(optional(settings.max_lifetime_secs))
        .connect(url)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a trailing slash; Url::as_str adds one to bare hosts.
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PUT, http::Method::DELETE])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth, products, users};

    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh-token", post(auth::refresh_token))
        .route("/auth/register", post(auth::register));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/profile", get(users::get_profile))
        .route("/users/update-profile", post(users::update_profile))
        .route(
            "/users/{id}",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        )
        .route("/products", get(products::list_products).post(products::create_product))
        .route(
            "/products/{id}",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        .route_layer(from_fn_with_state(state.clone(), access_guard));

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let layers = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(create_cors_layer(&state.config)?)
        .layer(TimeoutLayer::new(state.config.request_timeout));

    Ok(router.layer(layers))
}

pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Like [`Application::new`], reusing `pool` instead of connecting when one is given.
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        info!(
            environment = ?config.environment,
            session_policy = ?config.auth.session_policy,
            cache = config.cache.enabled,
            "Starting storectl"
        );

        let pool = match pool {
            Some(pool) => {
                migrator().run(&pool).await?;
                pool
            }
            None => setup_database(&config).await?,
        };

        if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
            let name = config.admin_name.as_deref().unwrap_or("admin");
            create_initial_admin_user(email, name, password, config.auth.password.argon2_params(), &pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {e}"))?;
        }

        let tokens = Arc::new(TokenIssuer::new(&config.auth)?);
        let cache = Cache::connect(&config.cache).await?;

        let app_state = AppState::builder()
            .db(pool)
            .config(config.clone())
            .tokens(tokens)
            .cache(cache)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, app_state, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("storectl listening on http://{}, docs at http://localhost:{}/docs", bind_addr, self.config.port);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        self.app_state.cache.close().await;

        info!("Closing database connections...");
        self.app_state.db.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

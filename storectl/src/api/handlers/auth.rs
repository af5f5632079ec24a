use axum::{Json, extract::State, http::HeaderMap, http::StatusCode};

use crate::{
    AppState,
    api::models::{
        auth::{AccessTokenResponse, LoginRequest, LogoutResponse, MessageResponse, RegisterRequest, TokenResponse},
        users::{CurrentUser, Role, UserResponse, validate_email, validate_name, validate_password},
    },
    auth::{
        cookies::{clear_refresh_cookie, read_cookie, refresh_cookie},
        password,
        session::{IssuedTokens, Sessions},
    },
    config::Config,
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::Error,
};

fn token_response(issued: IssuedTokens, config: &Config) -> TokenResponse {
    TokenResponse {
        cookie: refresh_cookie(&issued.refresh_token, config),
        body: AccessTokenResponse {
            access_token: issued.access_token,
        },
    }
}

fn presented_cookie(headers: &HeaderMap, config: &Config) -> Option<String> {
    read_cookie(headers, &config.auth.cookie.name)
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Signed in. The refresh token is set as an HTTP-only cookie.", body = AccessTokenResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, headers: HeaderMap, Json(request): Json<LoginRequest>) -> Result<TokenResponse, Error> {
    let presented = presented_cookie(&headers, &state.config);
    let issued = Sessions::from(&state)
        .sign_in(&request.email, &request.password, presented.as_deref())
        .await?;

    Ok(token_response(issued, &state.config))
}

/// End the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logged out. The refresh cookie is cleared.", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Refresh token not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, current_user: CurrentUser, headers: HeaderMap) -> Result<LogoutResponse, Error> {
    let presented = presented_cookie(&headers, &state.config);
    Sessions::from(&state).logout(&current_user, presented.as_deref()).await?;

    Ok(LogoutResponse {
        body: MessageResponse::new("Logout successful"),
        cookie: clear_refresh_cookie(&state.config),
    })
}

/// Exchange the refresh cookie for a new access token
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    tag = "authentication",
    responses(
        (status = 200, description = "Tokens rotated. A new refresh cookie is set.", body = AccessTokenResponse),
        (status = 401, description = "Missing, invalid, expired or replayed refresh token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn refresh_token(State(state): State<AppState>, headers: HeaderMap) -> Result<TokenResponse, Error> {
    let presented = presented_cookie(&headers, &state.config);
    let issued = Sessions::from(&state).refresh(presented.as_deref()).await?;

    Ok(token_response(issued, &state.config))
}

/// Register a new cashier account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered", body = UserResponse),
        (status = 400, description = "Invalid input, or registration is disabled"),
        (status = 409, description = "User already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<(StatusCode, Json<UserResponse>), Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::bad_request("User registration is disabled"));
    }

    let password_config = &state.config.auth.password;
    validate_name(&request.name)?;
    validate_email(&request.email)?;
    validate_password(&request.password, password_config.min_length, password_config.max_length)?;

    let password_hash = password::hash_password(request.password, password_config.argon2_params()).await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            name: request.name,
            email: request.email,
            password_hash,
            role: Role::Cashier,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::{auth::AccessTokenResponse, users::Role},
        config::SessionPolicy,
        test_utils::{TEST_PASSWORD, create_test_app, create_test_app_with_config, create_test_config, create_test_user, refresh_cookie_pair, sign_in},
    };
    use axum::http::{StatusCode, header};
    use serde_json::{Value, json};
    use sqlx::PgPool;

    fn message(response: &axum_test::TestResponse) -> String {
        let body: Value = response.json();
        body["message"].as_str().unwrap_or_default().to_string()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_sets_refresh_cookie(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Cashier).await;

        let response = server
            .post("/auth/login")
            .json(&json!({"email": user.email, "password": TEST_PASSWORD}))
            .await;

        response.assert_status_ok();
        let set_cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
        assert!(set_cookie.starts_with("refreshToken="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Max-Age=604800"));

        let body: Value = response.json();
        assert!(body["accessToken"].is_string());
        // The refresh token never appears in the body.
        assert_eq!(body.as_object().unwrap().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_failures(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Cashier).await;

        let response = server
            .post("/auth/login")
            .json(&json!({"email": "ghost@example.com", "password": TEST_PASSWORD}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(message(&response), "User not found");

        let response = server
            .post("/auth/login")
            .json(&json!({"email": user.email, "password": "not-the-password"}))
            .await;
        response.assert_status_unauthorized();
        assert_eq!(message(&response), "Invalid credentials");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_full_session_lifecycle(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Cashier).await;

        let (access_token1, rt1) = sign_in(&server, &user.email).await;

        let profile = server.get("/users/profile").authorization_bearer(&access_token1).await;
        profile.assert_status_ok();
        let body: Value = profile.json();
        assert_eq!(body["id"], json!(user.id));

        let refreshed = server.post("/auth/refresh-token").add_header(header::COOKIE, rt1.clone()).await;
        refreshed.assert_status_ok();
        let rt2 = refresh_cookie_pair(&refreshed);
        let access_token2 = refreshed.json::<AccessTokenResponse>().access_token;
        assert_ne!(rt1, rt2);

        let replay = server.post("/auth/refresh-token").add_header(header::COOKIE, rt1).await;
        replay.assert_status_unauthorized();

        let logout = server
            .post("/auth/logout")
            .authorization_bearer(&access_token2)
            .add_header(header::COOKIE, rt2.clone())
            .await;
        logout.assert_status_ok();
        assert_eq!(message(&logout), "Logout successful");
        let cleared = logout.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
        assert!(cleared.starts_with("refreshToken=;"));
        assert!(cleared.contains("Max-Age=0"));

        let second_logout = server
            .post("/auth/logout")
            .authorization_bearer(&access_token2)
            .add_header(header::COOKIE, rt2)
            .await;
        second_logout.assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_sign_in_invalidates_previous_refresh_token(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Cashier).await;

        let (_, first_cookie) = sign_in(&server, &user.email).await;
        let (_, second_cookie) = sign_in(&server, &user.email).await;

        let stale = server.post("/auth/refresh-token").add_header(header::COOKIE, first_cookie).await;
        stale.assert_status_unauthorized();

        let current = server.post("/auth/refresh-token").add_header(header::COOKIE, second_cookie).await;
        current.assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_targeted_revocation_keeps_other_sessions(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.session_policy = SessionPolicy::TargetedRevocation;
        let server = create_test_app_with_config(pool.clone(), config).await;
        let user = create_test_user(&pool, Role::Cashier).await;

        let (_, laptop) = sign_in(&server, &user.email).await;
        let (_, phone) = sign_in(&server, &user.email).await;

        // Signing in again from the phone revokes only the phone's cookie.
        let again = server
            .post("/auth/login")
            .add_header(header::COOKIE, phone.clone())
            .json(&json!({"email": user.email, "password": TEST_PASSWORD}))
            .await;
        again.assert_status_ok();

        server
            .post("/auth/refresh-token")
            .add_header(header::COOKIE, phone)
            .await
            .assert_status_unauthorized();
        server
            .post("/auth/refresh-token")
            .add_header(header::COOKIE, laptop)
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_refresh_without_or_with_garbage_cookie(pool: PgPool) {
        let server = create_test_app(pool).await;

        let missing = server.post("/auth/refresh-token").await;
        missing.assert_status_unauthorized();
        assert_eq!(message(&missing), "Invalid credentials");

        let garbage = server.post("/auth/refresh-token").add_header(header::COOKIE, "refreshToken=not.a.jwt").await;
        garbage.assert_status_unauthorized();
        assert_eq!(message(&garbage), "Invalid or expired refresh token");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_logout_requires_access_token_and_cookie(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Cashier).await;
        let (access_token, cookie) = sign_in(&server, &user.email).await;

        let no_token = server.post("/auth/logout").add_header(header::COOKIE, cookie).await;
        no_token.assert_status_unauthorized();
        assert_eq!(message(&no_token), "Token not provided");

        let no_cookie = server.post("/auth/logout").authorization_bearer(&access_token).await;
        no_cookie.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(message(&no_cookie), "Refresh token not found");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.allow_registration = true;
        let server = create_test_app_with_config(pool, config).await;

        let response = server
            .post("/auth/register")
            .json(&json!({"name": "newcashier", "email": "new@example.com", "password": TEST_PASSWORD}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["role"], "cashier");
        assert!(body.get("passwordHash").is_none());

        let duplicate = server
            .post("/auth/register")
            .json(&json!({"name": "other", "email": "new@example.com", "password": TEST_PASSWORD}))
            .await;
        duplicate.assert_status(StatusCode::CONFLICT);
        assert_eq!(message(&duplicate), "User with this email already exists");

        let short = server
            .post("/auth/register")
            .json(&json!({"name": "shorty", "email": "short@example.com", "password": "pw"}))
            .await;
        short.assert_status(StatusCode::BAD_REQUEST);

        server.post("/auth/login").json(&json!({"email": "new@example.com", "password": TEST_PASSWORD})).await.assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_disabled(pool: PgPool) {
        let server = create_test_app(pool).await;

        let response = server
            .post("/auth/register")
            .json(&json!({"name": "newcashier", "email": "new@example.com", "password": TEST_PASSWORD}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(message(&response), "User registration is disabled");
    }
}

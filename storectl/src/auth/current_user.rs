use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::tokens::TokenIssuer,
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{instrument, trace};

const TOKEN_NOT_PROVIDED: &str = "Token not provided";

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::unauthenticated(TOKEN_NOT_PROVIDED))
}

/// Verify the request's bearer access token and return the identity it carries.
pub fn authenticate(headers: &HeaderMap, tokens: &TokenIssuer) -> Result<CurrentUser> {
    let token = bearer_token(headers)?;
    let claims = tokens.verify_access(token)?;
    Ok(CurrentUser::from(claims))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Routes behind the access guard already carry the verified identity.
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            trace!("Using identity attached by access guard");
            return Ok(*user);
        }

        authenticate(&parts.headers, &state.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::models::users::Role, test_utils::create_test_state_lazy};
    use axum::http::HeaderValue;

    fn headers(authorization: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = authorization {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        }
        headers
    }

    fn message(err: Error) -> Option<String> {
        match err {
            Error::Unauthenticated { message } => message,
            other => panic!("expected Unauthenticated, got {other:?}"),
        }
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers(Some("Bearer abc"))).unwrap(), "abc");

        for bad in [None, Some("Basic abc"), Some("Bearer "), Some("bearer abc"), Some("abc")] {
            let err = bearer_token(&headers(bad)).unwrap_err();
            assert_eq!(message(err).as_deref(), Some(TOKEN_NOT_PROVIDED), "header {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_extractor_verifies_bearer_token() {
        let state = create_test_state_lazy();
        let user_id = uuid::Uuid::new_v4();
        let token = state.tokens.issue_access_token(user_id, Role::Cashier).unwrap();

        let request = axum::http::Request::builder()
            .uri("/users/profile")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let user = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user, CurrentUser { id: user_id, role: Role::Cashier });
    }

    #[tokio::test]
    async fn test_extractor_rejects_garbage_token() {
        let state = create_test_state_lazy();
        let request = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Bearer not.a.jwt")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(message(err).as_deref(), Some("Invalid or expired token"));
    }

    #[tokio::test]
    async fn test_extractor_prefers_guard_identity() {
        let state = create_test_state_lazy();
        let attached = CurrentUser {
            id: uuid::Uuid::new_v4(),
            role: Role::Admin,
        };
        let request = axum::http::Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        parts.extensions.insert(attached);

        let user = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user, attached);
    }
}

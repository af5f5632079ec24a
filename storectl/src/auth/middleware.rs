use crate::{AppState, auth::current_user::authenticate, errors::Error};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::trace;

/// Reject requests without a valid access token; otherwise attach the caller's
/// [`CurrentUser`](crate::api::models::users::CurrentUser) to the request extensions.
pub async fn access_guard(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, Error> {
    let user = authenticate(request.headers(), &state.tokens)?;
    trace!(user_id = %crate::types::abbrev_uuid(&user.id), role = %user.role, "Access token accepted");

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

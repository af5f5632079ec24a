//! Authentication and authorization.
//!
//! Callers sign in with email and password and receive two tokens:
//!
//! - a short-lived **access token**, returned in the response body and sent back on every
//!   protected request as `Authorization: Bearer <token>`;
//! - a long-lived **refresh token**, set as an HTTP-only cookie and exchanged at
//!   `/auth/refresh-token` for a new pair. Each exchange rotates the stored token in place, so a
//!   superseded refresh token stops working.
//!
//! # Modules
//!
//! - [`password`]: Argon2 password hashing and verification
//! - [`tokens`]: signing and verifying access and refresh tokens
//! - [`cookies`]: building and reading the refresh cookie
//! - [`session`]: sign-in, logout and refresh over the refresh token store
//! - [`current_user`]: bearer token extraction and the [`CurrentUser`] extractor
//! - [`middleware`]: the access guard for protected routes
//! - [`roles`]: per-operation role allow-lists
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use storectl::auth::roles::{RequiresRole, Staff};
//!
//! async fn profile(auth: RequiresRole<Staff>, State(state): State<AppState>) -> Result<Json<UserResponse>, Error> {
//!     let user = load_user(&state, auth.user.id).await?;
//!     Ok(Json(user))
//! }
//! ```
//!
//! [`CurrentUser`]: crate::api::models::users::CurrentUser

pub mod cookies;
pub mod current_user;
pub mod middleware;
pub mod password;
pub mod roles;
pub mod session;
pub mod tokens;

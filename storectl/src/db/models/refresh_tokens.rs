//! Database models for refresh tokens.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::api::models::users::Role;
use crate::types::{RefreshTokenId, UserId};

/// Database entity model
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: RefreshTokenId,
    pub token: String,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
}

/// Request for storing a newly issued refresh token
#[derive(Debug, Clone)]
pub struct RefreshTokenCreateRequest {
    pub user_id: UserId,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

/// Request for rotating a refresh token in place
#[derive(Debug, Clone)]
pub struct RefreshTokenUpdateRequest {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

/// Response type (same as entity for now)
pub type RefreshTokenResponse = RefreshToken;

/// Filter for refresh tokens
#[derive(Debug, Clone)]
pub struct RefreshTokenFilter {
    pub user_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}

/// A stored refresh token joined with the user that owns it
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenWithOwner {
    pub id: RefreshTokenId,
    pub token: String,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub owner_email: String,
    pub owner_role: Role,
}

//! Session lifecycle: sign-in, logout and refresh-token rotation.
//!
//! Every sequence that mutates refresh tokens runs in one transaction that starts by locking the
//! owning user's row, so concurrent sign-ins, refreshes and logouts for the same user are applied
//! one after another.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::{password, tokens::TokenIssuer},
    config::{AuthConfig, SessionPolicy},
    db::{
        handlers::{RefreshTokens, Repository, Users},
        models::refresh_tokens::{RefreshTokenCreateRequest, RefreshTokenUpdateRequest},
    },
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// A freshly minted token pair. The access token goes in the response body, the refresh token in
/// the cookie.
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct Sessions<'a> {
    db: &'a PgPool,
    tokens: &'a TokenIssuer,
    config: &'a AuthConfig,
}

impl<'a> From<&'a AppState> for Sessions<'a> {
    fn from(state: &'a AppState) -> Self {
        Self::new(&state.db, &state.tokens, &state.config.auth)
    }
}

impl<'a> Sessions<'a> {
    pub fn new(db: &'a PgPool, tokens: &'a TokenIssuer, config: &'a AuthConfig) -> Self {
        Self { db, tokens, config }
    }

    /// Check credentials and open a new session.
    ///
    /// `presented` is the refresh cookie the client already holds, if any; it is revoked under the
    /// targeted-revocation policy.
    #[instrument(skip_all, err)]
    pub async fn sign_in(&self, email: &str, password: &str, presented: Option<&str>) -> Result<IssuedTokens> {
        let user = {
            let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            Users::new(&mut conn)
                .get_user_by_email(email)
                .await?
                .ok_or_else(|| Error::not_found("User"))?
        };

        if !password::verify_password(password.to_string(), user.password_hash.clone()).await? {
            debug!(user_id = %abbrev_uuid(&user.id), "Password mismatch");
            return Err(Error::unauthenticated(INVALID_CREDENTIALS));
        }

        let iat = Utc::now().timestamp();
        let access_token = self.tokens.issue_access_token(user.id, user.role)?;
        let refresh_token = self.tokens.issue_refresh_token(user.id, iat)?;

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;
        if !Users::new(&mut tx).lock_for_update(user.id).await? {
            return Err(Error::not_found("User"));
        }

        let mut refresh_tokens = RefreshTokens::new(&mut tx);
        let revoked = match (self.config.session_policy, presented) {
            (SessionPolicy::SingleSession, _) => refresh_tokens.delete_all_for_user(user.id).await?,
            (SessionPolicy::TargetedRevocation, Some(old)) => refresh_tokens.delete_by_token(old).await?,
            (SessionPolicy::TargetedRevocation, None) => 0,
        };
        refresh_tokens
            .create(&RefreshTokenCreateRequest {
                user_id: user.id,
                token: refresh_token.clone(),
                issued_at: issued_at(iat)?,
            })
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        info!(user_id = %abbrev_uuid(&user.id), revoked, "User signed in");
        Ok(IssuedTokens {
            access_token,
            refresh_token,
        })
    }

    /// End the session identified by `presented` for the authenticated `user`.
    #[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)), err)]
    pub async fn logout(&self, user: &CurrentUser, presented: Option<&str>) -> Result<()> {
        let token = presented.ok_or_else(|| Error::not_found("Refresh token"))?;

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;
        if !Users::new(&mut tx).lock_for_update(user.id).await? {
            return Err(Error::not_found("User"));
        }

        let deleted = RefreshTokens::new(&mut tx).delete_for_user(user.id, token).await?;
        if deleted == 0 {
            return Err(Error::not_found("Refresh token"));
        }

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        info!("User logged out");
        Ok(())
    }

    /// Exchange a refresh token for a new token pair, rotating the stored row in place.
    #[instrument(skip_all, err)]
    pub async fn refresh(&self, presented: Option<&str>) -> Result<IssuedTokens> {
        let token = presented.ok_or_else(|| Error::unauthenticated(INVALID_CREDENTIALS))?;
        let claims = self.tokens.verify_refresh(token)?;

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;
        if !Users::new(&mut tx).lock_for_update(claims.id).await? {
            return Err(Error::unauthenticated(INVALID_CREDENTIALS));
        }

        let mut refresh_tokens = RefreshTokens::new(&mut tx);
        let record = refresh_tokens
            .find_by_token(token)
            .await?
            .filter(|record| record.user_id == claims.id)
            .ok_or_else(|| Error::unauthenticated(INVALID_CREDENTIALS))?;

        if is_replayed(record.issued_at, claims.iat) {
            warn!(user_id = %abbrev_uuid(&record.user_id), "Replayed refresh token rejected");
            return Err(Error::unauthenticated("Invalid credentials (replayed)"));
        }

        // Role comes from the stored user so role changes apply on the next refresh.
        let iat = Utc::now().timestamp();
        let access_token = self.tokens.issue_access_token(record.user_id, record.owner_role)?;
        let refresh_token = self.tokens.issue_refresh_token(record.user_id, iat)?;

        refresh_tokens
            .update(
                record.id,
                &RefreshTokenUpdateRequest {
                    token: refresh_token.clone(),
                    issued_at: issued_at(iat)?,
                },
            )
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        debug!(user_id = %abbrev_uuid(&record.user_id), "Refresh token rotated");
        Ok(IssuedTokens {
            access_token,
            refresh_token,
        })
    }
}

/// A presented token is stale when the stored row was issued after it. Both sides are epoch seconds.
fn is_replayed(stored_issued_at: DateTime<Utc>, claimed_iat: i64) -> bool {
    stored_issued_at.timestamp() > claimed_iat
}

fn issued_at(iat: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(iat, 0).ok_or_else(|| Error::Internal {
        operation: format!("convert issued-at {iat} to a timestamp"),
    })
}

/// Revoke every session a user holds, e.g. after an admin resets their password.
///
/// Runs on the caller's connection so the revocation commits together with whatever change
/// prompted it; pass a transaction.
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn revoke_all(conn: &mut PgConnection, user_id: UserId) -> Result<u64> {
    Users::new(&mut *conn).lock_for_update(user_id).await?;
    let revoked = RefreshTokens::new(conn).delete_all_for_user(user_id).await?;
    Ok(revoked)
}

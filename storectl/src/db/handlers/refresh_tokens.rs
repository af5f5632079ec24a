//! Database repository for refresh tokens.
//!
//! Callers that combine several of these operations (sign-in, logout, refresh) run them inside a
//! single transaction after locking the owning user row.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::refresh_tokens::{
            RefreshToken, RefreshTokenCreateRequest, RefreshTokenFilter, RefreshTokenResponse, RefreshTokenUpdateRequest,
            RefreshTokenWithOwner,
        },
    },
    types::{RefreshTokenId, UserId, abbrev_uuid},
};

pub struct RefreshTokens<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for RefreshTokens<'c> {
    type CreateRequest = RefreshTokenCreateRequest;
    type UpdateRequest = RefreshTokenUpdateRequest;
    type Response = RefreshTokenResponse;
    type Id = RefreshTokenId;
    type Filter = RefreshTokenFilter;

    /// Store a newly issued token. Fails with a foreign key violation if the user does not exist.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens (token, user_id, issued_at)
            VALUES ($1, $2, $3)
            RETURNING id, token, user_id, issued_at
            "#,
        )
        .bind(&request.token)
        .bind(request.user_id)
        .bind(request.issued_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(token)
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let token = sqlx::query_as::<_, RefreshToken>("SELECT id, token, user_id, issued_at FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(token)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let tokens = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, token, user_id, issued_at FROM refresh_tokens
            WHERE ($1::uuid IS NULL OR user_id = $1)
            ORDER BY issued_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(tokens)
    }

    #[instrument(skip(self, filter), err)]
    async fn count(&mut self, filter: &Self::Filter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM refresh_tokens WHERE ($1::uuid IS NULL OR user_id = $1)")
            .bind(filter.user_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Rotate a token in place, keeping the row id.
    #[instrument(skip(self, request), fields(token_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            UPDATE refresh_tokens
            SET token = $2, issued_at = $3
            WHERE id = $1
            RETURNING id, token, user_id, issued_at
            "#,
        )
        .bind(id)
        .bind(&request.token)
        .bind(request.issued_at)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(token)
    }
}

impl<'c> RefreshTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Remove every refresh token owned by the user. Zero rows is not an error.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete_all_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete the row matching both the user and the exact token string.
    ///
    /// Returns the number of rows deleted (0 or 1) so callers can tell "already consumed" apart
    /// from success.
    #[instrument(skip(self, token), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete_for_user(&mut self, user_id: UserId, token: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1 AND token = $2")
            .bind(user_id)
            .bind(token)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete the row matching the exact token string, whoever owns it.
    #[instrument(skip(self, token), err)]
    pub async fn delete_by_token(&mut self, token: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Exact-match lookup joined with the owning user.
    #[instrument(skip(self, token), err)]
    pub async fn find_by_token(&mut self, token: &str) -> Result<Option<RefreshTokenWithOwner>> {
        let record = sqlx::query_as::<_, RefreshTokenWithOwner>(
            r#"
            SELECT rt.id, rt.token, rt.user_id, rt.issued_at, u.email AS owner_email, u.role AS owner_role
            FROM refresh_tokens rt
            JOIN users u ON u.id = rt.user_id
            WHERE rt.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        db::{handlers::Users, models::users::UserCreateDBRequest},
    };
    use chrono::{DateTime, Utc};
    use sqlx::PgPool;

    async fn create_user(conn: &mut PgConnection, name: &str) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: "hash".to_string(),
                role: Role::Cashier,
            })
            .await
            .unwrap()
            .id
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn create_request(user_id: UserId, token: &str, secs: i64) -> RefreshTokenCreateRequest {
        RefreshTokenCreateRequest {
            user_id,
            token: token.to_string(),
            issued_at: at(secs),
        }
    }

    #[sqlx::test]
    async fn test_create_and_find_by_token(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = create_user(&mut conn, "alice").await;
        let mut repo = RefreshTokens::new(&mut conn);

        let created = repo.create(&create_request(user_id, "rt-1", 1_700_000_000)).await.unwrap();
        assert_eq!(created.user_id, user_id);

        let found = repo.find_by_token("rt-1").await.unwrap().expect("token should exist");
        assert_eq!(found.id, created.id);
        assert_eq!(found.owner_email, "alice@example.com");
        assert_eq!(found.owner_role, Role::Cashier);
        assert_eq!(found.issued_at.timestamp(), 1_700_000_000);

        assert!(repo.find_by_token("rt-unknown").await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_create_for_missing_user_fails(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = RefreshTokens::new(&mut conn);

        let err = repo.create(&create_request(uuid::Uuid::new_v4(), "rt-x", 1)).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[sqlx::test]
    async fn test_delete_all_for_user_is_idempotent(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let alice = create_user(&mut conn, "alice").await;
        let bob = create_user(&mut conn, "bob").await;
        let mut repo = RefreshTokens::new(&mut conn);

        repo.create(&create_request(alice, "a-1", 1)).await.unwrap();
        repo.create(&create_request(alice, "a-2", 2)).await.unwrap();
        repo.create(&create_request(bob, "b-1", 3)).await.unwrap();

        assert_eq!(repo.delete_all_for_user(alice).await.unwrap(), 2);
        assert_eq!(repo.delete_all_for_user(alice).await.unwrap(), 0);

        let remaining = repo
            .list(&RefreshTokenFilter {
                user_id: None,
                skip: 0,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, "b-1");
    }

    #[sqlx::test]
    async fn test_delete_for_user_reports_count(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let alice = create_user(&mut conn, "alice").await;
        let bob = create_user(&mut conn, "bob").await;
        let mut repo = RefreshTokens::new(&mut conn);

        repo.create(&create_request(alice, "a-1", 1)).await.unwrap();

        // Wrong owner does not delete
        assert_eq!(repo.delete_for_user(bob, "a-1").await.unwrap(), 0);
        assert_eq!(repo.delete_for_user(alice, "a-1").await.unwrap(), 1);
        assert_eq!(repo.delete_for_user(alice, "a-1").await.unwrap(), 0);
    }

    #[sqlx::test]
    async fn test_update_rotates_in_place(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let alice = create_user(&mut conn, "alice").await;
        let mut repo = RefreshTokens::new(&mut conn);

        let original = repo.create(&create_request(alice, "old", 100)).await.unwrap();
        let rotated = repo
            .update(
                original.id,
                &RefreshTokenUpdateRequest {
                    token: "new".to_string(),
                    issued_at: at(200),
                },
            )
            .await
            .unwrap();

        assert_eq!(rotated.id, original.id);
        assert_eq!(rotated.token, "new");
        assert!(repo.find_by_token("old").await.unwrap().is_none());
        assert_eq!(
            repo.count(&RefreshTokenFilter {
                user_id: Some(alice),
                skip: 0,
                limit: 10
            })
            .await
            .unwrap(),
            1
        );
    }

    #[sqlx::test]
    async fn test_tokens_cascade_with_user(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let alice = create_user(&mut conn, "alice").await;
        RefreshTokens::new(&mut conn).create(&create_request(alice, "a-1", 1)).await.unwrap();

        Users::new(&mut conn).delete(alice).await.unwrap();

        assert!(RefreshTokens::new(&mut conn).find_by_token("a-1").await.unwrap().is_none());
    }
}

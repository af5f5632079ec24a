//! Database repository for products.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::{Repository, contains_pattern},
        models::products::{ProductCreateDBRequest, ProductDBResponse, ProductFilter, ProductUpdateDBRequest},
    },
    types::{ProductId, abbrev_uuid},
};

const PRODUCT_COLUMNS: &str = "id, name, description, price, stock, created_at, updated_at";

pub struct Products<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Products<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Products<'c> {
    type CreateRequest = ProductCreateDBRequest;
    type UpdateRequest = ProductUpdateDBRequest;
    type Response = ProductDBResponse;
    type Id = ProductId;
    type Filter = ProductFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let product = sqlx::query_as::<_, ProductDBResponse>(&format!(
            "INSERT INTO products (name, description, price, stock) VALUES ($1, $2, $3, $4) RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.price)
        .bind(request.stock)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let product = sqlx::query_as::<_, ProductDBResponse>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(product)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let products = sqlx::query_as::<_, ProductDBResponse>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE ($1::text IS NULL OR name ILIKE $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(filter.name.as_deref().map(contains_pattern))
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(products)
    }

    #[instrument(skip(self, filter), err)]
    async fn count(&mut self, filter: &Self::Filter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE ($1::text IS NULL OR name ILIKE $1)")
            .bind(filter.name.as_deref().map(contains_pattern))
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }

    #[instrument(skip(self), fields(product_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&mut *self.db).await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(product_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let product = sqlx::query_as::<_, ProductDBResponse>(&format!(
            r#"
            UPDATE products SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                price = COALESCE($4, price),
                stock = COALESCE($5, stock),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.price)
        .bind(request.stock)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sqlx::PgPool;

    fn create_request(name: &str, price: Decimal, stock: i32) -> ProductCreateDBRequest {
        ProductCreateDBRequest {
            name: name.to_string(),
            description: None,
            price,
            stock,
        }
    }

    #[sqlx::test]
    async fn test_create_get_update_delete(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Products::new(&mut conn);

        let created = repo.create(&create_request("Milk", Decimal::new(199, 2), 10)).await.unwrap();
        assert_eq!(created.price, Decimal::new(199, 2));

        let updated = repo
            .update(
                created.id,
                &ProductUpdateDBRequest {
                    stock: Some(4),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.stock, 4);
        assert_eq!(updated.name, "Milk");

        assert!(repo.get_by_id(created.id).await.unwrap().is_some());
        assert!(repo.delete(created.id).await.unwrap());
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
        assert!(!repo.delete(created.id).await.unwrap());
    }

    #[sqlx::test]
    async fn test_negative_stock_is_check_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Products::new(&mut conn);

        let err = repo.create(&create_request("Bread", Decimal::ONE, -1)).await.unwrap_err();
        match err {
            DbError::CheckViolation { constraint, .. } => {
                assert_eq!(constraint.as_deref(), Some("products_stock_non_negative"));
            }
            other => panic!("expected check violation, got {other:?}"),
        }
    }

    #[sqlx::test]
    async fn test_list_filters_by_name_newest_first(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Products::new(&mut conn);

        for name in ["Green Tea", "Black Tea", "Coffee"] {
            repo.create(&create_request(name, Decimal::ONE, 1)).await.unwrap();
        }

        let filter = ProductFilter::new(0, 10).with_name(Some("tea".to_string()));
        let teas = repo.list(&filter).await.unwrap();
        assert_eq!(teas.len(), 2);
        assert_eq!(teas[0].name, "Black Tea");
        assert_eq!(repo.count(&filter).await.unwrap(), 2);

        let page = repo.list(&ProductFilter::new(2, 10)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "Green Tea");
    }

    #[sqlx::test]
    async fn test_update_missing_product_is_not_found(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Products::new(&mut conn);

        let err = repo
            .update(uuid::Uuid::new_v4(), &ProductUpdateDBRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}

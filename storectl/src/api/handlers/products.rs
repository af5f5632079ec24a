//! Product catalogue endpoints.
//!
//! Reads go through the cache under `products:{id}` and `products:list:{page}:{limit}:{name}`.
//! Every write drops the product's own entry and all cached list pages.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        auth::MessageResponse,
        pagination::total_pages,
        products::{ListProductsQuery, ProductCreate, ProductListResponse, ProductResponse, ProductUpdate},
    },
    auth::roles::{Admin, RequiresRole, Staff},
    cache::Cache,
    db::{
        errors::DbError,
        handlers::{Products, Repository},
        models::products::ProductFilter,
    },
    errors::{Error, Result},
    types::{ProductId, abbrev_uuid},
};

const PRODUCT_LIST_PATTERN: &str = "products:list:*";

fn product_key(id: ProductId) -> String {
    format!("products:{id}")
}

fn product_list_key(page: i64, limit: i64, name: Option<&str>) -> String {
    format!("products:list:{page}:{limit}:{}", name.unwrap_or_default())
}

async fn invalidate(cache: &Cache, id: Option<ProductId>) {
    if let Some(id) = id {
        cache.delete(&product_key(id)).await;
    }
    cache.delete_pattern(PRODUCT_LIST_PATTERN).await;
}

fn product_not_found(e: DbError) -> Error {
    match e {
        DbError::NotFound => Error::not_found("Product"),
        other => other.into(),
    }
}

#[utoipa::path(
    get,
    path = "/products",
    tag = "products",
    summary = "List products",
    params(ListProductsQuery),
    responses(
        (status = 200, description = "A page of products, newest first", body = ProductListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
    _: RequiresRole<Staff>,
) -> Result<Json<ProductListResponse>> {
    let (page, limit) = (query.pagination.page(), query.pagination.limit());
    let filter = ProductFilter::new(query.pagination.skip(), limit).with_name(query.name);
    let key = product_list_key(page, limit, filter.name.as_deref());
    let (db, filter) = (&state.db, &filter);

    let response = state
        .cache
        .get_or_set(&key, None, || async move {
            let mut conn = db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let mut repo = Products::new(&mut conn);
            let products = repo.list(filter).await?;
            let total_products = repo.count(filter).await?;

            Ok(ProductListResponse {
                current_page: page,
                total_pages: total_pages(total_products, limit),
                total_products,
                products: products.into_iter().map(ProductResponse::from).collect(),
            })
        })
        .await?;

    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/products",
    tag = "products",
    summary = "Create product",
    request_body = ProductCreate,
    responses(
        (status = 201, description = "Product created", body = ProductResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Admins only"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_product(
    State(state): State<AppState>,
    _: RequiresRole<Admin>,
    Json(create): Json<ProductCreate>,
) -> Result<(StatusCode, Json<ProductResponse>)> {
    create.validate()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let product = Products::new(&mut conn).create(&create.into()).await?;

    invalidate(&state.cache, None).await;

    info!(product_id = %abbrev_uuid(&product.id), "Product created");
    Ok((StatusCode::CREATED, Json(ProductResponse::from(product))))
}

#[utoipa::path(
    get,
    path = "/products/{id}",
    tag = "products",
    summary = "Get product",
    params(("id" = uuid::Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product details", body = ProductResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Product not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_product(State(state): State<AppState>, Path(id): Path<ProductId>, _: RequiresRole<Staff>) -> Result<Json<ProductResponse>> {
    let db = &state.db;
    let product = state
        .cache
        .get_or_set(&product_key(id), None, || async move {
            let mut conn = db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            Products::new(&mut conn)
                .get_by_id(id)
                .await?
                .map(ProductResponse::from)
                .ok_or_else(|| Error::not_found("Product"))
        })
        .await?;

    Ok(Json(product))
}

#[utoipa::path(
    put,
    path = "/products/{id}",
    tag = "products",
    summary = "Update product",
    request_body = ProductUpdate,
    params(("id" = uuid::Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Updated product", body = ProductResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Product not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    _: RequiresRole<Admin>,
    Json(update): Json<ProductUpdate>,
) -> Result<Json<ProductResponse>> {
    update.validate()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let product = Products::new(&mut conn)
        .update(id, &update.into())
        .await
        .map_err(product_not_found)?;

    invalidate(&state.cache, Some(id)).await;

    Ok(Json(ProductResponse::from(product)))
}

#[utoipa::path(
    delete,
    path = "/products/{id}",
    tag = "products",
    summary = "Delete product",
    params(("id" = uuid::Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product deleted", body = MessageResponse),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Product not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_product(State(state): State<AppState>, Path(id): Path<ProductId>, _: RequiresRole<Admin>) -> Result<Json<MessageResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Products::new(&mut conn).delete(id).await? {
        return Err(Error::not_found("Product"));
    }

    invalidate(&state.cache, Some(id)).await;

    info!(product_id = %abbrev_uuid(&id), "Product deleted");
    Ok(Json(MessageResponse::new("Product deleted successfully")))
}

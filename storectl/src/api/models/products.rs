//! API request/response models for products.

use super::pagination::Pagination;
use crate::db::models::products::{ProductCreateDBRequest, ProductDBResponse, ProductUpdateDBRequest};
use crate::errors::Error;
use crate::types::ProductId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductCreate {
    pub name: String,
    pub description: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, minimum = 0)]
    pub price: Decimal,
    #[schema(minimum = 0)]
    pub stock: i32,
}

impl ProductCreate {
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)?;
        validate_price(self.price)?;
        validate_stock(self.stock)
    }
}

impl From<ProductCreate> for ProductCreateDBRequest {
    fn from(api: ProductCreate) -> Self {
        Self {
            name: api.name.trim().to_string(),
            description: api.description,
            price: api.price.round_dp(2),
            stock: api.stock,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    #[schema(value_type = Option<f64>, minimum = 0)]
    pub price: Option<Decimal>,
    #[schema(minimum = 0)]
    pub stock: Option<i32>,
}

impl ProductUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(stock) = self.stock {
            validate_stock(stock)?;
        }
        Ok(())
    }
}

impl From<ProductUpdate> for ProductUpdateDBRequest {
    fn from(api: ProductUpdate) -> Self {
        Self {
            name: api.name.map(|n| n.trim().to_string()),
            description: api.description,
            price: api.price.map(|p| p.round_dp(2)),
            stock: api.stock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductDBResponse> for ProductResponse {
    fn from(db: ProductDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            description: db.description,
            price: db.price,
            stock: db.stock,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Query parameters for listing products
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListProductsQuery {
    /// Pagination parameters
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Case-insensitive substring match on the product name
    pub name: Option<String>,
}

/// A page of products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductListResponse {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_products: i64,
    pub products: Vec<ProductResponse>,
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::bad_request("Product name is required"));
    }
    Ok(())
}

/// Largest value the `NUMERIC(12,2)` price column holds.
pub const MAX_PRICE: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

pub const INVALID_PRICE: &str = "Price must be a non-negative number no greater than 9999999999.99";

/// Checks the value as it will be stored, after rounding to cents.
fn validate_price(price: Decimal) -> Result<(), Error> {
    let stored = price.round_dp(2);
    if (stored.is_sign_negative() && !stored.is_zero()) || stored > MAX_PRICE {
        return Err(Error::bad_request(INVALID_PRICE));
    }
    Ok(())
}

fn validate_stock(stock: i32) -> Result<(), Error> {
    if stock < 0 {
        return Err(Error::bad_request("Stock must be a non-negative integer"));
    }
    Ok(())
}

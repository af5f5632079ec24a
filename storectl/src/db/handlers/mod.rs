//! Repository implementations for database access.
//!
//! Each repository:
//! - Wraps a SQLx connection or transaction
//! - Provides strongly-typed CRUD operations
//! - Handles query construction and parameter binding
//! - Returns domain models from [`crate::db::models`]
//!
//! # Available Repositories
//!
//! - [`Users`]: User accounts and credential lookup
//! - [`RefreshTokens`]: Outstanding refresh tokens per user
//! - [`Products`]: Product catalogue
//!
//! # Common Pattern
//!
//! ```ignore
//! use storectl::db::handlers::{Users, Repository};
//!
//! async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!     let mut repo = Users::new(&mut tx);
//!     let user = repo.get_user_by_email("a@x.com").await?;
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

pub mod products;
pub mod refresh_tokens;
pub mod repository;
pub mod users;

pub use products::Products;
pub use refresh_tokens::RefreshTokens;
pub use repository::Repository;
pub use users::Users;

//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Authentication** (`/auth/*`): Sign-in, logout, refresh token rotation, registration
//! - **Users** (`/users/*`): Staff account management and self-service profile
//! - **Products** (`/products/*`): Product catalogue management
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`. API documentation is
//! available at `/docs` when the server is running.

pub mod handlers;
pub mod models;

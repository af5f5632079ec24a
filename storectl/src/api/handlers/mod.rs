//! HTTP request handlers for all API endpoints.
//!
//! Each handler is responsible for:
//! - Request validation and deserialization
//! - Authorization via [`crate::auth::roles::RequiresRole`]
//! - Business logic execution via database repositories
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`auth`]: Sign-in, logout, refresh and registration
//! - [`users`]: User CRUD operations and profile management
//! - [`products`]: Product CRUD operations with cached reads
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which converts to the matching HTTP status code and a
//! JSON `{ "message": ... }` body.

pub mod auth;
pub mod products;
pub mod users;

//! API request and response data models.
//!
//! API models are distinct from database models so the wire format can evolve independently of
//! storage. JSON field names are camelCase; password hashes never appear in a response.
//!
//! - [`auth`]: Sign-in credentials and token responses
//! - [`users`]: Roles, the authenticated identity, user requests and responses
//! - [`products`]: Product requests and responses
//! - [`pagination`]: Page-based pagination parameters

pub mod auth;
pub mod pagination;
pub mod products;
pub mod users;

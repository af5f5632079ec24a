//! Database record models matching table schemas.
//!
//! These models are used by repositories to return query results and accept insertion/update
//! data. API-facing shapes live in [`crate::api::models`] and convert from these.

pub mod products;
pub mod refresh_tokens;
pub mod users;

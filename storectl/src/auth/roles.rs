//! Role-based access control.
//!
//! Each operation names its allow-list as a type parameter on [`RequiresRole`]:
//!
//! ```ignore
//! async fn delete_product(_: RequiresRole<Admin>, ...) -> Result<..., Error>
//! async fn get_product(_: RequiresRole<Staff>, ...) -> Result<..., Error>
//! ```

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    errors::{Error, Result},
};

/// A compile-time allow-list of roles.
pub trait AllowedRoles: Send + Sync + 'static {
    const ROLES: &'static [Role];
}

/// Administrators only
pub struct Admin;

impl AllowedRoles for Admin {
    const ROLES: &'static [Role] = &[Role::Admin];
}

/// Any store staff: administrators and cashiers
pub struct Staff;

impl AllowedRoles for Staff {
    const ROLES: &'static [Role] = &[Role::Admin, Role::Cashier];
}

pub fn check_role(user: &CurrentUser, allowed: &'static [Role]) -> Result<()> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        debug!(role = %user.role, ?allowed, "Role not permitted");
        Err(Error::InsufficientPermissions {
            role: user.role,
            required: allowed,
        })
    }
}

/// Extractor yielding the authenticated caller, provided their role is in `A::ROLES`.
pub struct RequiresRole<A: AllowedRoles> {
    pub user: CurrentUser,
    roles: PhantomData<A>,
}

impl<A: AllowedRoles> FromRequestParts<AppState> for RequiresRole<A> {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        check_role(&user, A::ROLES)?;
        Ok(Self { user, roles: PhantomData })
    }
}

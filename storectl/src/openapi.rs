//! OpenAPI document for the HTTP API, served as a Scalar UI at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Registers the `BearerAuth` scheme referenced by protected paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some(
                        "Access token from `POST /auth/login` or `POST /auth/refresh-token`:\n\n\
                        ```\nAuthorization: Bearer ACCESS_TOKEN\n```\n\n\
                        Access tokens expire after 15 minutes. Use the `refreshToken` cookie to get a new one.",
                    ))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "storectl", description = "Store back office API: staff sign-in, user management and the product catalogue."),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::refresh_token,
        api::handlers::auth::register,
        api::handlers::users::list_users,
        api::handlers::users::create_user,
        api::handlers::users::get_profile,
        api::handlers::users::update_profile,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
        api::handlers::products::list_products,
        api::handlers::products::create_product,
        api::handlers::products::get_product,
        api::handlers::products::update_product,
        api::handlers::products::delete_product,
    ),
    components(
        schemas(
            api::models::auth::LoginRequest,
            api::models::auth::RegisterRequest,
            api::models::auth::AccessTokenResponse,
            api::models::auth::MessageResponse,
            api::models::users::Role,
            api::models::users::UserCreate,
            api::models::users::UserUpdate,
            api::models::users::ProfileUpdate,
            api::models::users::UserResponse,
            api::models::users::UserListResponse,
            api::models::products::ProductCreate,
            api::models::products::ProductUpdate,
            api::models::products::ProductResponse,
            api::models::products::ProductListResponse,
        )
    ),
    tags(
        (name = "authentication", description = "Sign-in, logout and refresh token rotation. The refresh token travels in an HTTP-only `refreshToken` cookie."),
        (name = "users", description = "Staff accounts. Listing, creating, updating and deleting users is limited to admins."),
        (name = "products", description = "The product catalogue. Cashiers can read, admins can write."),
    )
)]
pub struct ApiDoc;

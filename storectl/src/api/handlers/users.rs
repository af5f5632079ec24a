use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        pagination::total_pages,
        users::{
            ListUsersQuery, ProfileUpdate, UserCreate, UserListResponse, UserResponse, UserUpdate, validate_email, validate_name,
            validate_password,
        },
    },
    auth::{
        password,
        roles::{Admin, RequiresRole, Staff},
        session,
    },
    config::PasswordConfig,
    db::{
        errors::DbError,
        handlers::{Repository, Users, users::UserFilter},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

fn user_not_found(e: DbError) -> Error {
    match e {
        DbError::NotFound => Error::not_found("User"),
        other => other.into(),
    }
}

/// Validate the optional profile fields and hash a new password if one was given.
async fn update_request(
    name: Option<String>,
    email: Option<String>,
    new_password: Option<String>,
    config: &PasswordConfig,
) -> Result<UserUpdateDBRequest> {
    if let Some(name) = &name {
        validate_name(name)?;
    }
    if let Some(email) = &email {
        validate_email(email)?;
    }
    let password_hash = match new_password {
        Some(new_password) => {
            validate_password(&new_password, config.min_length, config.max_length)?;
            Some(password::hash_password(new_password, config.argon2_params()).await?)
        }
        None => None,
    };

    Ok(UserUpdateDBRequest {
        name,
        email,
        password_hash,
        role: None,
    })
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "A page of users, newest first", body = UserListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admins only"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
    _: RequiresRole<Admin>,
) -> Result<Json<UserListResponse>> {
    let (page, limit) = (query.pagination.page(), query.pagination.limit());
    let filter = UserFilter::new(query.pagination.skip(), limit).with_search(query.search);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut conn);
    let users = repo.list(&filter).await?;
    let total_users = repo.count(&filter).await?;

    Ok(Json(UserListResponse {
        current_page: page,
        total_pages: total_pages(total_users, limit),
        total_users,
        users: users.into_iter().map(UserResponse::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    summary = "Create user",
    request_body = UserCreate,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Admins only"),
        (status = 409, description = "A user with this name or email already exists"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_user(
    State(state): State<AppState>,
    _: RequiresRole<Admin>,
    Json(create): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let password_config = &state.config.auth.password;
    validate_name(&create.name)?;
    validate_email(&create.email)?;
    validate_password(&create.password, password_config.min_length, password_config.max_length)?;

    let password_hash = password::hash_password(create.password, password_config.argon2_params()).await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            name: create.name,
            email: create.email,
            password_hash,
            role: create.role.unwrap_or_default(),
        })
        .await?;

    info!(user_id = %abbrev_uuid(&user.id), role = %user.role, "User created");
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

#[utoipa::path(
    get,
    path = "/users/profile",
    tag = "users",
    summary = "Get own profile",
    responses(
        (status = 200, description = "The caller's user record", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_profile(State(state): State<AppState>, caller: RequiresRole<Staff>) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    match Users::new(&mut conn).get_by_id(caller.user.id).await? {
        Some(user) => Ok(Json(UserResponse::from(user))),
        None => Err(Error::not_found("User")),
    }
}

#[utoipa::path(
    post,
    path = "/users/update-profile",
    tag = "users",
    summary = "Update own profile",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Updated user record", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Name or email already taken"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    caller: RequiresRole<Staff>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserResponse>> {
    let request = update_request(update.name, update.email, update.password, &state.config.auth.password).await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .update(caller.user.id, &request)
        .await
        .map_err(user_not_found)?;

    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    summary = "Get user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User details", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_user(State(state): State<AppState>, Path(id): Path<UserId>, _: RequiresRole<Staff>) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    match Users::new(&mut conn).get_by_id(id).await? {
        Some(user) => Ok(Json(UserResponse::from(user))),
        None => Err(Error::NotFound {
            resource: "User".to_string(),
            id: Some(id.to_string()),
        }),
    }
}

/// Changing a user's password here also signs them out everywhere.
#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    summary = "Update user",
    request_body = UserUpdate,
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Updated user record", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Name or email already taken"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    _: RequiresRole<Admin>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserResponse>> {
    let mut request = update_request(update.name, update.email, update.password, &state.config.auth.password).await?;
    request.role = update.role;
    let password_changed = request.password_hash.is_some();

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut tx).update(id, &request).await.map_err(user_not_found)?;

    if password_changed {
        let revoked = session::revoke_all(&mut tx, id).await?;
        info!(user_id = %abbrev_uuid(&id), revoked, "Password reset by admin, sessions revoked");
    }

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    summary = "Delete user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "The deleted user", body = UserResponse),
        (status = 400, description = "Admins cannot delete themselves"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_user(State(state): State<AppState>, Path(id): Path<UserId>, caller: RequiresRole<Admin>) -> Result<Json<UserResponse>> {
    if caller.user.id == id {
        return Err(Error::bad_request("You cannot delete your own account"));
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut tx);

    let user = repo.get_by_id(id).await?.ok_or_else(|| Error::not_found("User"))?;
    repo.delete(id).await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!(user_id = %abbrev_uuid(&id), "User deleted");
    Ok(Json(UserResponse::from(user)))
}

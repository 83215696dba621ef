//! User management within the caller's school.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, ChangePasswordRequest, RegisterRequest, Role,
    UpdateUserRequest, User, UserListQuery,
};
use crate::AppState;

use super::audit::audit;
use super::auth::{hash_password, verify_password, AuthContext};
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::validation::{
    parse_role, validate_email, validate_new_password, validate_password, validate_username,
};

/// Fields of an account about to be inserted
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: String,
    pub admin_title: String,
    pub teacher_subject: String,
}

/// Insert an account, refusing a username or email already taken anywhere
pub async fn insert_user(
    db: &sqlx::SqlitePool,
    school_id: i64,
    user: NewUser,
) -> Result<User, ApiError> {
    let taken: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = ? OR email = ? LIMIT 1")
            .bind(&user.username)
            .bind(&user.email)
            .fetch_optional(db)
            .await?;
    if taken.is_some() {
        return Err(ApiError::conflict("Username or email already exists"));
    }

    let password_hash = hash_password(&user.password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to hash password")
    })?;

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO users (school_id, username, email, password_hash, role, first_name,
            last_name, middle_name, admin_title, teacher_subject, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(school_id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&password_hash)
    .bind(user.role)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.middle_name)
    .bind(&user.admin_title)
    .bind(&user.teacher_subject)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(db)
    .await
    .map_err(|e| match ApiError::from(e) {
        err if err.code() == super::error::ErrorCode::Conflict => {
            ApiError::conflict("Username or email already exists")
        }
        err => err,
    })?;

    let created = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(result.last_insert_rowid())
        .fetch_one(db)
        .await?;
    Ok(created)
}

/// Row guard for writes that could remove an admin: the target is not an
/// admin, or another live admin remains. Binds the school id.
const LEAVES_AN_ADMIN: &str = "(role != 'admin' OR (SELECT COUNT(*) FROM users \
     WHERE school_id = ? AND role = 'admin' AND deleted_at IS NULL) > 1)";

/// POST /api/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("username", validate_username(&req.username))
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password))
        .check("role", parse_role(&req.role).map(|_| ()));
    errors.finish()?;
    let role = parse_role(&req.role).map_err(ApiError::bad_request)?;

    // The body's school_id is ignored; accounts land in the caller's school
    let user = insert_user(
        &state.db,
        ctx.school_id,
        NewUser {
            username: req.username,
            email: req.email,
            password: req.password,
            role,
            first_name: req.first_name,
            last_name: req.last_name,
            middle_name: req.middle_name,
            admin_title: req.admin_title,
            teacher_subject: req.teacher_subject,
        },
    )
    .await?;

    audit(
        &state,
        &ctx,
        actions::USER_CREATE,
        resource_types::USER,
        user.id,
        Some(json!({ "username": user.username, "role": user.role })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

/// GET /api/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> Result<Json<Value>, ApiError> {
    let role = query
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(parse_role)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let mut filters = ctx.tenant().filters("school_id");
    filters.raw("deleted_at IS NULL");
    filters.push_opt("role = ?", role.map(|r| r.as_str()));

    let sql = format!(
        "SELECT * FROM users {} ORDER BY last_name, first_name, id",
        filters.where_clause()
    );
    let users = filters
        .bind(sqlx::query_as::<_, User>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "users": users })))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let user: User = ctx.tenant().find(&state.db, id).await?;
    Ok(Json(json!({ "user": user })))
}

/// PUT /api/users/:id
///
/// Users edit their own profile; admins edit anyone in the school and
/// may also change role, admin title and teacher subject.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    if ctx.user_id != id && !ctx.is_admin() {
        return Err(ApiError::forbidden("Access denied"));
    }

    let mut user: User = ctx.tenant().find(&state.db, id).await?;

    if let Some(first_name) = req.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = req.last_name {
        user.last_name = last_name;
    }
    if let Some(middle_name) = req.middle_name {
        user.middle_name = middle_name;
    }
    if let Some(avatar_url) = req.avatar_url {
        user.avatar_url = avatar_url;
    }
    if let Some(email) = req.email.filter(|e| !e.is_empty()) {
        validate_email(&email).map_err(ApiError::bad_request)?;
        if email != user.email {
            let taken: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM users WHERE email = ? AND id != ?")
                    .bind(&email)
                    .bind(id)
                    .fetch_optional(&state.db)
                    .await?;
            if taken.is_some() {
                return Err(ApiError::conflict("Username or email already exists"));
            }
        }
        user.email = email;
    }

    let was_admin = user.role == Role::Admin;
    // Homework authority follows teacher_subject, so only admins set it
    if ctx.is_admin() {
        if let Some(role) = req.role.filter(|r| !r.is_empty()) {
            user.role = parse_role(&role).map_err(ApiError::bad_request)?;
        }
        if let Some(admin_title) = req.admin_title {
            user.admin_title = admin_title;
        }
        if let Some(teacher_subject) = req.teacher_subject {
            user.teacher_subject = teacher_subject;
        }
    }

    user.updated_at = now();
    let sql = format!(
        "UPDATE users SET first_name = ?, last_name = ?, middle_name = ?, email = ?, \
         avatar_url = ?, teacher_subject = ?, role = ?, admin_title = ?, updated_at = ? \
         WHERE id = ? AND school_id = ? AND deleted_at IS NULL AND (? OR {})",
        LEAVES_AN_ADMIN
    );
    let result = sqlx::query(&sql)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.middle_name)
        .bind(&user.email)
        .bind(&user.avatar_url)
        .bind(&user.teacher_subject)
        .bind(user.role)
        .bind(&user.admin_title)
        .bind(&user.updated_at)
        .bind(id)
        .bind(ctx.school_id)
        .bind(user.role == Role::Admin)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        if was_admin && user.role != Role::Admin {
            tracing::warn!(user_id = id, school_id = ctx.school_id, "Refused to demote last admin");
            return Err(ApiError::forbidden("Cannot change role of the last admin"));
        }
        return Err(ApiError::not_found("User not found"));
    }

    audit(
        &state,
        &ctx,
        actions::USER_UPDATE,
        resource_types::USER,
        id,
        Some(json!({ "role": user.role })),
    )
    .await;

    Ok(Json(json!({ "user": user })))
}

/// DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let user: User = ctx.tenant().find(&state.db, id).await?;

    let timestamp = now();
    let sql = format!(
        "UPDATE users SET deleted_at = ?, updated_at = ? \
         WHERE id = ? AND school_id = ? AND deleted_at IS NULL AND {}",
        LEAVES_AN_ADMIN
    );
    let result = sqlx::query(&sql)
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .bind(ctx.school_id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        if user.role == Role::Admin {
            tracing::warn!(user_id = id, school_id = ctx.school_id, "Refused to delete last admin");
            return Err(ApiError::forbidden("Cannot delete the last admin"));
        }
        return Err(ApiError::not_found("User not found"));
    }

    audit(&state, &ctx, actions::USER_DELETE, resource_types::USER, id, None).await;

    Ok(Json(json!({ "message": "User deleted successfully" })))
}

/// PUT /api/users/:id/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    if ctx.user_id != id {
        return Err(ApiError::forbidden("Access denied"));
    }
    validate_new_password(&req.new_password).map_err(ApiError::bad_request)?;

    let user: User = ctx.tenant().find(&state.db, id).await?;
    if !verify_password(&req.old_password, &user.password_hash) {
        tracing::warn!(user_id = id, "Password change with wrong old password");
        return Err(ApiError::unauthorized("Invalid old password"));
    }

    let password_hash = hash_password(&req.new_password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to hash password")
    })?;

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(now())
        .bind(id)
        .execute(&state.db)
        .await?;

    audit(
        &state,
        &ctx,
        actions::USER_PASSWORD_CHANGE,
        resource_types::USER,
        id,
        None,
    )
    .await;

    Ok(Json(json!({ "message": "Password changed successfully" })))
}

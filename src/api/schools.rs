//! School (tenant) endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, CreateSchoolRequest, School, UpdateSchoolRequest,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiJson, ApiPath};
use super::validation::validate_required;

pub(crate) async fn load_school(db: &sqlx::SqlitePool, id: i64) -> Result<Option<School>, sqlx::Error> {
    sqlx::query_as::<_, School>("SELECT * FROM schools WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Apply the non-empty fields of an update and persist the school
pub(crate) async fn apply_school_update(
    db: &sqlx::SqlitePool,
    mut school: School,
    req: UpdateSchoolRequest,
) -> Result<School, ApiError> {
    if !req.name.trim().is_empty() {
        school.name = req.name.trim().to_string();
    }
    if !req.address.is_empty() {
        school.address = req.address;
    }
    if !req.phone.is_empty() {
        school.phone = req.phone;
    }
    if !req.email.is_empty() {
        school.email = req.email;
    }
    if !req.logo_url.is_empty() {
        school.logo_url = req.logo_url;
    }
    school.updated_at = now();

    sqlx::query(
        r#"
        UPDATE schools SET name = ?, address = ?, phone = ?, email = ?, logo_url = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&school.name)
    .bind(&school.address)
    .bind(&school.phone)
    .bind(&school.email)
    .bind(&school.logo_url)
    .bind(&school.updated_at)
    .bind(school.id)
    .execute(db)
    .await?;

    Ok(school)
}

/// POST /api/schools
///
/// Anonymous: this is how a new tenant is bootstrapped.
pub async fn create_school(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateSchoolRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_required(&req.name, "School name is required").map_err(ApiError::bad_request)?;

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO schools (name, address, phone, email, logo_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(req.name.trim())
    .bind(&req.address)
    .bind(&req.phone)
    .bind(&req.email)
    .bind(&req.logo_url)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(&state.db)
    .await?;

    let school_id = result.last_insert_rowid();
    let school = load_school(&state.db, school_id)
        .await?
        .ok_or_else(|| ApiError::internal("Failed to load created school"))?;

    if let Err(e) = crate::db::log_audit(
        &state.db,
        school_id,
        actions::SCHOOL_CREATE,
        resource_types::SCHOOL,
        Some(&school_id.to_string()),
        None,
        Some(json!({ "name": school.name })),
    )
    .await
    {
        tracing::warn!(error = %e, "Failed to create audit log entry");
    }

    tracing::info!(school_id = school_id, name = %school.name, "School created");
    Ok((StatusCode::CREATED, Json(json!({ "school": school }))))
}

/// GET /api/schools
///
/// Only the caller's own school is visible.
pub async fn list_schools(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let schools: Vec<School> = load_school(&state.db, ctx.school_id).await?.into_iter().collect();
    Ok(Json(json!({ "schools": schools })))
}

/// GET /api/schools/:id
pub async fn get_school(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    if id != ctx.school_id {
        return Err(ApiError::not_found("School not found"));
    }
    let school = load_school(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;
    Ok(Json(json!({ "school": school })))
}

/// PUT /api/schools/:id
pub async fn update_school(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateSchoolRequest>,
) -> Result<Json<Value>, ApiError> {
    if id != ctx.school_id {
        tracing::warn!(user_id = ctx.user_id, target = id, "Cross-school update refused");
        return Err(ApiError::forbidden("Access denied"));
    }
    let school = load_school(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;

    let school = apply_school_update(&state.db, school, req).await?;
    audit(&state, &ctx, actions::SCHOOL_UPDATE, resource_types::SCHOOL, id, None).await;

    Ok(Json(json!({ "school": school })))
}

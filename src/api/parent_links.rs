//! Admin management of parent to student links.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{LinkParentRequest, ParentLinkEntry, ParentStudent, Role};
use crate::AppState;

use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiJson, ApiPath};
use super::parents::{children_of, create_link, parents_of, remove_link, LINK_SELECT, STUDENT_ROLES};

/// POST /api/parent-student-links
pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<LinkParentRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let link = create_link(&state, &ctx, &req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "link": link }))))
}

/// GET /api/parent-student-links
pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let sql = format!(
        "{} WHERE ps.school_id = ? ORDER BY parent_name, student_name",
        LINK_SELECT
    );
    let links = sqlx::query_as::<_, ParentLinkEntry>(&sql)
        .bind(ctx.school_id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "links": links })))
}

/// DELETE /api/parent-student-links/:id
pub async fn delete(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let link: ParentStudent = ctx.tenant().find(&state.db, id).await?;
    remove_link(&state, &ctx, link).await?;
    Ok(Json(json!({ "message": "Link deleted successfully" })))
}

/// GET /api/parent-student-links/parent/:parent_id/students
pub async fn students_of_parent(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(parent_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    if ctx
        .tenant()
        .user_with_role(&state.db, parent_id, &[Role::Parent])
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Parent not found"));
    }
    let students = children_of(&state.db, ctx.school_id, parent_id).await?;
    Ok(Json(json!({ "students": students })))
}

/// GET /api/parent-student-links/student/:student_id/parents
pub async fn parents_of_student(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    if ctx
        .tenant()
        .user_with_role(&state.db, student_id, STUDENT_ROLES)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Student not found"));
    }
    let parents = parents_of(&state.db, ctx.school_id, student_id).await?;
    Ok(Json(json!({ "parents": parents })))
}

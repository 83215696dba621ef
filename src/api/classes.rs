//! Class and roster endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, AddStudentsRequest, Class, ClassDetail, ClassListQuery,
    CreateClassRequest, Role, UpdateClassRequest, UserSummary,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::tenancy::Tenant;
use super::validation::validate_required;

const STUDENT_ROLES: &[Role] = &[Role::Student, Role::Starosta];

async fn summary(db: &sqlx::SqlitePool, id: Option<i64>) -> Result<Option<UserSummary>, sqlx::Error> {
    match id {
        Some(id) => {
            sqlx::query_as::<_, UserSummary>(
                "SELECT id, username, role, first_name, last_name FROM users WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(db)
            .await
        }
        None => Ok(None),
    }
}

pub(crate) async fn roster(db: &sqlx::SqlitePool, class_id: i64) -> Result<Vec<UserSummary>, sqlx::Error> {
    sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.username, u.role, u.first_name, u.last_name
        FROM users u
        JOIN class_students cs ON cs.student_id = u.id
        WHERE cs.class_id = ? AND u.deleted_at IS NULL
        ORDER BY u.last_name, u.first_name, u.id
        "#,
    )
    .bind(class_id)
    .fetch_all(db)
    .await
}

async fn detail(db: &sqlx::SqlitePool, class: Class) -> Result<ClassDetail, sqlx::Error> {
    let homeroom_teacher = summary(db, class.homeroom_teacher_id).await?;
    let starosta = summary(db, class.starosta_id).await?;
    let students = roster(db, class.id).await?;
    Ok(ClassDetail {
        class,
        homeroom_teacher,
        starosta,
        students,
    })
}

/// Check the optional homeroom teacher and starosta belong to the school
async fn check_staff(
    db: &sqlx::SqlitePool,
    tenant: Tenant,
    homeroom_teacher_id: Option<i64>,
    starosta_id: Option<i64>,
) -> Result<(), ApiError> {
    if let Some(id) = homeroom_teacher_id {
        if tenant.user_with_role(db, id, &[Role::Teacher]).await?.is_none() {
            return Err(ApiError::bad_request("Homeroom teacher not found or not a teacher"));
        }
    }
    if let Some(id) = starosta_id {
        if tenant.user_with_role(db, id, STUDENT_ROLES).await?.is_none() {
            return Err(ApiError::bad_request("Starosta not found or not a student"));
        }
    }
    Ok(())
}

/// GET /api/classes
pub async fn list_classes(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<ClassListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut filters = ctx.tenant().filters("school_id");
    filters.raw("deleted_at IS NULL");
    filters.push_opt("year = ?", query.year.filter(|y| !y.is_empty()));

    let sql = format!(
        "SELECT * FROM classes {} ORDER BY year DESC, name",
        filters.where_clause()
    );
    let classes = filters
        .bind(sqlx::query_as::<_, Class>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "classes": classes })))
}

/// GET /api/classes/:id
pub async fn get_class(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, id).await?;
    let class = detail(&state.db, class).await?;
    Ok(Json(json!({ "class": class })))
}

/// POST /api/classes
pub async fn create_class(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<CreateClassRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_required(&req.name, "Class name is required"))
        .check("year", validate_required(&req.year, "Class year is required"));
    errors.finish()?;

    check_staff(&state.db, ctx.tenant(), req.homeroom_teacher_id, req.starosta_id).await?;

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO classes (school_id, name, year, homeroom_teacher_id, starosta_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ctx.school_id)
    .bind(req.name.trim())
    .bind(req.year.trim())
    .bind(req.homeroom_teacher_id)
    .bind(req.starosta_id)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(&state.db)
    .await?;

    let class: Class = ctx.tenant().find(&state.db, result.last_insert_rowid()).await?;
    audit(
        &state,
        &ctx,
        actions::CLASS_CREATE,
        resource_types::CLASS,
        class.id,
        Some(json!({ "name": class.name, "year": class.year })),
    )
    .await;

    let class = detail(&state.db, class).await?;
    Ok((StatusCode::CREATED, Json(json!({ "class": class }))))
}

/// PUT /api/classes/:id
pub async fn update_class(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateClassRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut class: Class = ctx.tenant().find(&state.db, id).await?;
    check_staff(&state.db, ctx.tenant(), req.homeroom_teacher_id, req.starosta_id).await?;

    if !req.name.trim().is_empty() {
        class.name = req.name.trim().to_string();
    }
    if !req.year.trim().is_empty() {
        class.year = req.year.trim().to_string();
    }
    if req.homeroom_teacher_id.is_some() {
        class.homeroom_teacher_id = req.homeroom_teacher_id;
    }
    if req.starosta_id.is_some() {
        class.starosta_id = req.starosta_id;
    }
    class.updated_at = now();

    sqlx::query(
        r#"
        UPDATE classes SET name = ?, year = ?, homeroom_teacher_id = ?, starosta_id = ?, updated_at = ?
        WHERE id = ? AND school_id = ?
        "#,
    )
    .bind(&class.name)
    .bind(&class.year)
    .bind(class.homeroom_teacher_id)
    .bind(class.starosta_id)
    .bind(&class.updated_at)
    .bind(id)
    .bind(ctx.school_id)
    .execute(&state.db)
    .await?;

    audit(&state, &ctx, actions::CLASS_UPDATE, resource_types::CLASS, id, None).await;

    let class = detail(&state.db, class).await?;
    Ok(Json(json!({ "class": class })))
}

/// DELETE /api/classes/:id
pub async fn delete_class(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, id).await?;

    let timestamp = now();
    sqlx::query("UPDATE classes SET deleted_at = ?, updated_at = ? WHERE id = ? AND school_id = ?")
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(
        &state,
        &ctx,
        actions::CLASS_DELETE,
        resource_types::CLASS,
        id,
        Some(json!({ "name": class.name })),
    )
    .await;

    Ok(Json(json!({ "message": "Class deleted successfully" })))
}

/// POST /api/classes/:id/students
///
/// Every id must be a live student or starosta of the school, or nothing
/// is added.
pub async fn add_students(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<AddStudentsRequest>,
) -> Result<Json<Value>, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, id).await?;

    if !ctx
        .tenant()
        .all_users_with_role(&state.db, &req.student_ids, STUDENT_ROLES)
        .await?
    {
        return Err(ApiError::bad_request("Some students not found or not valid"));
    }

    let mut tx = state.db.begin().await?;
    for student_id in &req.student_ids {
        sqlx::query("INSERT OR IGNORE INTO class_students (class_id, student_id) VALUES (?, ?)")
            .bind(id)
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    audit(
        &state,
        &ctx,
        actions::CLASS_STUDENTS_ADD,
        resource_types::CLASS,
        id,
        Some(json!({ "student_ids": req.student_ids })),
    )
    .await;

    let class = detail(&state.db, class).await?;
    Ok(Json(json!({
        "class": class,
        "message": "Students added successfully",
    })))
}

/// DELETE /api/classes/:id/students/:student_id
pub async fn remove_student(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath((id, student_id)): ApiPath<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let _class: Class = ctx.tenant().find(&state.db, id).await?;

    let result = sqlx::query("DELETE FROM class_students WHERE class_id = ? AND student_id = ?")
        .bind(id)
        .bind(student_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Student not found in class"));
    }

    audit(
        &state,
        &ctx,
        actions::CLASS_STUDENT_REMOVE,
        resource_types::CLASS,
        id,
        Some(json!({ "student_id": student_id })),
    )
    .await;

    Ok(Json(json!({ "message": "Student removed from class successfully" })))
}

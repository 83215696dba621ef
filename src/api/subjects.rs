//! Subject endpoints and the teacher links behind grade authority.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, AssignTeachersRequest, CreateSubjectRequest, Role, Subject,
    SubjectWithTeachers, UpdateSubjectRequest, UserSummary,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiJson, ApiPath};
use super::validation::validate_required;

async fn teachers_of(db: &sqlx::SqlitePool, subject_id: i64) -> Result<Vec<UserSummary>, sqlx::Error> {
    sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.username, u.role, u.first_name, u.last_name
        FROM users u
        JOIN teachers_subjects ts ON ts.user_id = u.id
        WHERE ts.subject_id = ? AND u.deleted_at IS NULL
        ORDER BY u.last_name, u.first_name, u.id
        "#,
    )
    .bind(subject_id)
    .fetch_all(db)
    .await
}

async fn with_teachers(db: &sqlx::SqlitePool, subject: Subject) -> Result<SubjectWithTeachers, sqlx::Error> {
    let teachers = teachers_of(db, subject.id).await?;
    Ok(SubjectWithTeachers { subject, teachers })
}

/// True when the teacher is linked to the subject
pub(crate) async fn teaches(
    db: &sqlx::SqlitePool,
    teacher_id: i64,
    subject_id: i64,
) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM teachers_subjects WHERE user_id = ? AND subject_id = ?")
            .bind(teacher_id)
            .bind(subject_id)
            .fetch_optional(db)
            .await?;
    Ok(row.is_some())
}

/// GET /api/subjects
pub async fn list_subjects(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let subjects = sqlx::query_as::<_, Subject>(
        "SELECT * FROM subjects WHERE school_id = ? AND deleted_at IS NULL ORDER BY name",
    )
    .bind(ctx.school_id)
    .fetch_all(&state.db)
    .await?;

    let mut result = Vec::with_capacity(subjects.len());
    for subject in subjects {
        result.push(with_teachers(&state.db, subject).await?);
    }

    Ok(Json(json!({ "subjects": result })))
}

/// GET /api/subjects/:id
pub async fn get_subject(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let subject: Subject = ctx.tenant().find(&state.db, id).await?;
    let subject = with_teachers(&state.db, subject).await?;
    Ok(Json(json!({ "subject": subject })))
}

/// POST /api/subjects
pub async fn create_subject(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<CreateSubjectRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_required(&req.name, "Subject name is required").map_err(ApiError::bad_request)?;

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO subjects (school_id, name, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(ctx.school_id)
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(&state.db)
    .await?;

    let subject: Subject = ctx.tenant().find(&state.db, result.last_insert_rowid()).await?;
    audit(
        &state,
        &ctx,
        actions::SUBJECT_CREATE,
        resource_types::SUBJECT,
        subject.id,
        Some(json!({ "name": subject.name })),
    )
    .await;

    let subject = with_teachers(&state.db, subject).await?;
    Ok((StatusCode::CREATED, Json(json!({ "subject": subject }))))
}

/// PUT /api/subjects/:id
pub async fn update_subject(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateSubjectRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut subject: Subject = ctx.tenant().find(&state.db, id).await?;

    if !req.name.trim().is_empty() {
        subject.name = req.name.trim().to_string();
    }
    if let Some(description) = req.description {
        subject.description = description;
    }
    subject.updated_at = now();

    sqlx::query(
        "UPDATE subjects SET name = ?, description = ?, updated_at = ? WHERE id = ? AND school_id = ?",
    )
    .bind(&subject.name)
    .bind(&subject.description)
    .bind(&subject.updated_at)
    .bind(id)
    .bind(ctx.school_id)
    .execute(&state.db)
    .await?;

    audit(&state, &ctx, actions::SUBJECT_UPDATE, resource_types::SUBJECT, id, None).await;

    let subject = with_teachers(&state.db, subject).await?;
    Ok(Json(json!({ "subject": subject })))
}

/// DELETE /api/subjects/:id
pub async fn delete_subject(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let subject: Subject = ctx.tenant().find(&state.db, id).await?;

    let timestamp = now();
    sqlx::query("UPDATE subjects SET deleted_at = ?, updated_at = ? WHERE id = ? AND school_id = ?")
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(
        &state,
        &ctx,
        actions::SUBJECT_DELETE,
        resource_types::SUBJECT,
        id,
        Some(json!({ "name": subject.name })),
    )
    .await;

    Ok(Json(json!({ "message": "Subject deleted successfully" })))
}

/// POST /api/subjects/:id/teachers
///
/// Links that already exist are left alone.
pub async fn assign_teachers(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<AssignTeachersRequest>,
) -> Result<Json<Value>, ApiError> {
    let subject: Subject = ctx.tenant().find(&state.db, id).await?;

    if !ctx
        .tenant()
        .all_users_with_role(&state.db, &req.teacher_ids, &[Role::Teacher])
        .await?
    {
        return Err(ApiError::bad_request("Some teachers not found or not valid"));
    }

    let mut tx = state.db.begin().await?;
    for teacher_id in &req.teacher_ids {
        sqlx::query("INSERT OR IGNORE INTO teachers_subjects (user_id, subject_id) VALUES (?, ?)")
            .bind(teacher_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    audit(
        &state,
        &ctx,
        actions::SUBJECT_TEACHERS_ASSIGN,
        resource_types::SUBJECT,
        id,
        Some(json!({ "teacher_ids": req.teacher_ids })),
    )
    .await;

    let subject = with_teachers(&state.db, subject).await?;
    Ok(Json(json!({
        "subject": subject,
        "message": "Teachers assigned successfully",
    })))
}

/// DELETE /api/subjects/:id/teachers/:teacher_id
pub async fn remove_teacher(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath((id, teacher_id)): ApiPath<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let _subject: Subject = ctx.tenant().find(&state.db, id).await?;

    let result = sqlx::query("DELETE FROM teachers_subjects WHERE user_id = ? AND subject_id = ?")
        .bind(teacher_id)
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Teacher is not assigned to this subject"));
    }

    audit(
        &state,
        &ctx,
        actions::SUBJECT_TEACHER_REMOVE,
        resource_types::SUBJECT,
        id,
        Some(json!({ "teacher_id": teacher_id })),
    )
    .await;

    Ok(Json(json!({ "message": "Teacher removed from subject successfully" })))
}

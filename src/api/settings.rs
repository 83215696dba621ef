//! School settings, system info, backup snapshot and activity log.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    self, actions, list_audit_logs, now, resource_types, Announcement, AuditLogQuery, Class,
    Subject, UpdateSchoolRequest, User,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiJson, ApiQuery};
use super::schools::{apply_school_update, load_school};

#[derive(Debug, Serialize)]
struct ClassBackup {
    #[serde(flatten)]
    class: Class,
    student_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
struct SubjectBackup {
    #[serde(flatten)]
    subject: Subject,
    teacher_ids: Vec<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct JournalActivity {
    #[serde(rename = "type")]
    kind: String,
    count: i64,
    last_date: Option<String>,
}

/// GET /api/settings/school
pub async fn get_school_settings(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let school = load_school(&state.db, ctx.school_id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;
    Ok(Json(json!({ "school": school })))
}

/// PUT /api/settings/school
pub async fn update_school_settings(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<UpdateSchoolRequest>,
) -> Result<Json<Value>, ApiError> {
    let school = load_school(&state.db, ctx.school_id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;
    let school = apply_school_update(&state.db, school, req).await?;

    audit(
        &state,
        &ctx,
        actions::SCHOOL_UPDATE,
        resource_types::SCHOOL,
        ctx.school_id,
        None,
    )
    .await;

    Ok(Json(json!({ "school": school })))
}

/// GET /api/settings/system
pub async fn system_info(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let stats = db::system_totals(&state.db, ctx.school_id).await?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "stats": stats,
    })))
}

/// GET /api/settings/backup
///
/// JSON snapshot of the school. Password hashes never leave the server.
pub async fn backup(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let school = load_school(&state.db, ctx.school_id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;

    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE school_id = ? AND deleted_at IS NULL ORDER BY id",
    )
    .bind(ctx.school_id)
    .fetch_all(&state.db)
    .await?;

    let classes = sqlx::query_as::<_, Class>(
        "SELECT * FROM classes WHERE school_id = ? AND deleted_at IS NULL ORDER BY id",
    )
    .bind(ctx.school_id)
    .fetch_all(&state.db)
    .await?;
    let mut class_backups = Vec::with_capacity(classes.len());
    for class in classes {
        let student_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT student_id FROM class_students WHERE class_id = ? ORDER BY student_id",
        )
        .bind(class.id)
        .fetch_all(&state.db)
        .await?;
        class_backups.push(ClassBackup { class, student_ids });
    }

    let subjects = sqlx::query_as::<_, Subject>(
        "SELECT * FROM subjects WHERE school_id = ? AND deleted_at IS NULL ORDER BY id",
    )
    .bind(ctx.school_id)
    .fetch_all(&state.db)
    .await?;
    let mut subject_backups = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let teacher_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM teachers_subjects WHERE subject_id = ? ORDER BY user_id",
        )
        .bind(subject.id)
        .fetch_all(&state.db)
        .await?;
        subject_backups.push(SubjectBackup {
            subject,
            teacher_ids,
        });
    }

    let announcements = sqlx::query_as::<_, Announcement>(
        "SELECT * FROM announcements WHERE school_id = ? ORDER BY id",
    )
    .bind(ctx.school_id)
    .fetch_all(&state.db)
    .await?;

    tracing::info!(school_id = ctx.school_id, user_id = ctx.user_id, "Backup snapshot taken");

    Ok(Json(json!({
        "backup": {
            "school": school,
            "users": users,
            "classes": class_backups,
            "subjects": subject_backups,
            "announcements": announcements,
            "backup_date": now(),
        }
    })))
}

/// GET /api/settings/audit
pub async fn audit_log(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<AuditLogQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = sqlx::query_as::<_, JournalActivity>(
        r#"
        SELECT 'grades' AS kind, COUNT(*) AS count, MAX(created_at) AS last_date
            FROM grades WHERE school_id = ?1
        UNION ALL
        SELECT 'attendance', COUNT(*), MAX(created_at)
            FROM attendance WHERE school_id = ?1 AND deleted_at IS NULL
        UNION ALL
        SELECT 'homework', COUNT(*), MAX(created_at)
            FROM homework WHERE school_id = ?1 AND deleted_at IS NULL
        "#,
    )
    .bind(ctx.school_id)
    .fetch_all(&state.db)
    .await?;

    let activity = list_audit_logs(&state.db, ctx.school_id, &query).await?;

    Ok(Json(json!({
        "entries": entries,
        "activity": activity,
        "limit": query.limit(),
    })))
}

//! Attendance marking and reads.
//!
//! A record is keyed by `(student, class, date, lesson?, subject?)`. Marking
//! the same key again overwrites status, comment and marker, so replaying a
//! batch leaves the journal unchanged.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use sqlx::{Sqlite, Transaction};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, Attendance, AttendanceEntry, AttendanceListQuery,
    AttendanceStats, AttendanceStatus, BulkAttendanceRequest, Class, MarkAttendanceRequest, Role,
    Subject, User, UserSummary,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::tenancy::Tenant;
use super::validation::{parse_date, parse_status, validate_lesson_number};

pub(crate) const ENTRY_SELECT: &str = r#"
    SELECT a.*,
        TRIM(st.last_name || ' ' || st.first_name) AS student_name,
        c.name AS class_name,
        sub.name AS subject_name,
        CASE WHEN m.id IS NULL THEN NULL
             ELSE TRIM(m.last_name || ' ' || m.first_name) END AS marked_by_name
    FROM attendance a
    JOIN users st ON st.id = a.student_id
    JOIN classes c ON c.id = a.class_id
    LEFT JOIN subjects sub ON sub.id = a.subject_id
    LEFT JOIN users m ON m.id = a.marked_by
"#;

const STUDENT_ROLES: &[Role] = &[Role::Student, Role::Starosta];

/// Validate one record and write it inside the batch transaction.
/// Returns the id of the row that now holds the mark.
async fn upsert_record(
    tx: &mut Transaction<'_, Sqlite>,
    tenant: Tenant,
    marked_by: i64,
    record: &MarkAttendanceRequest,
) -> Result<i64, ApiError> {
    parse_date(&record.date).map_err(ApiError::bad_request)?;
    let status = parse_status(&record.status).map_err(ApiError::bad_request)?;
    if let Some(lesson) = record.lesson_number {
        validate_lesson_number(lesson).map_err(ApiError::bad_request)?;
    }

    if tenant.get_with::<Class, _>(&mut **tx, record.class_id).await?.is_none() {
        return Err(ApiError::bad_request("Class not found"));
    }
    if tenant
        .user_with_role_in(&mut **tx, record.student_id, STUDENT_ROLES)
        .await?
        .is_none()
    {
        return Err(ApiError::bad_request("Student not found or not a student"));
    }
    if let Some(subject_id) = record.subject_id {
        if tenant.get_with::<Subject, _>(&mut **tx, subject_id).await?.is_none() {
            return Err(ApiError::bad_request("Subject not found"));
        }
    }

    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM attendance
        WHERE student_id = ? AND class_id = ? AND date = ?
          AND lesson_number IS ? AND subject_id IS ? AND deleted_at IS NULL
        "#,
    )
    .bind(record.student_id)
    .bind(record.class_id)
    .bind(&record.date)
    .bind(record.lesson_number)
    .bind(record.subject_id)
    .fetch_optional(&mut **tx)
    .await?;

    let timestamp = now();
    match existing {
        Some((id,)) => {
            sqlx::query(
                "UPDATE attendance SET status = ?, comment = ?, marked_by = ?, updated_at = ? WHERE id = ?",
            )
            .bind(status)
            .bind(&record.comment)
            .bind(marked_by)
            .bind(&timestamp)
            .bind(id)
            .execute(&mut **tx)
            .await?;
            Ok(id)
        }
        None => {
            let result = sqlx::query(
                r#"
                INSERT INTO attendance (school_id, student_id, class_id, subject_id, date,
                    lesson_number, status, comment, marked_by, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(tenant.school_id)
            .bind(record.student_id)
            .bind(record.class_id)
            .bind(record.subject_id)
            .bind(&record.date)
            .bind(record.lesson_number)
            .bind(status)
            .bind(&record.comment)
            .bind(marked_by)
            .bind(&timestamp)
            .bind(&timestamp)
            .execute(&mut **tx)
            .await?;
            Ok(result.last_insert_rowid())
        }
    }
}

/// Apply every record or none of them
async fn mark_all(
    state: &AppState,
    ctx: &AuthContext,
    records: &[MarkAttendanceRequest],
) -> Result<Vec<i64>, ApiError> {
    let mut tx = state.db.begin().await?;
    let mut ids = Vec::with_capacity(records.len());
    for record in records {
        ids.push(upsert_record(&mut tx, ctx.tenant(), ctx.user_id, record).await?);
    }
    tx.commit().await?;
    Ok(ids)
}

async fn load_entry(db: &sqlx::SqlitePool, id: i64) -> Result<AttendanceEntry, sqlx::Error> {
    let sql = format!("{} WHERE a.id = ?", ENTRY_SELECT);
    sqlx::query_as::<_, AttendanceEntry>(&sql)
        .bind(id)
        .fetch_one(db)
        .await
}

/// Per-status counts for one student, optionally within a date range
pub(crate) async fn student_stats(
    db: &sqlx::SqlitePool,
    school_id: i64,
    student_id: i64,
    date_from: Option<&str>,
    date_to: Option<&str>,
) -> Result<AttendanceStats, sqlx::Error> {
    let rows: Vec<(AttendanceStatus, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*) FROM attendance
        WHERE school_id = ? AND student_id = ? AND deleted_at IS NULL
          AND (? IS NULL OR date >= ?) AND (? IS NULL OR date <= ?)
        GROUP BY status
        "#,
    )
    .bind(school_id)
    .bind(student_id)
    .bind(date_from)
    .bind(date_from)
    .bind(date_to)
    .bind(date_to)
    .fetch_all(db)
    .await?;

    let mut stats = AttendanceStats::default();
    for (status, count) in rows {
        stats.add(status, count);
    }
    Ok(stats)
}

/// POST /api/attendance
pub async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<MarkAttendanceRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ids = mark_all(&state, &ctx, std::slice::from_ref(&req)).await?;
    let id = ids
        .first()
        .copied()
        .ok_or_else(|| ApiError::internal("Failed to mark attendance"))?;

    audit(
        &state,
        &ctx,
        actions::ATTENDANCE_MARK,
        resource_types::ATTENDANCE,
        id,
        Some(json!({ "student_id": req.student_id, "date": req.date, "status": req.status })),
    )
    .await;

    let attendance = load_entry(&state.db, id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "attendance": attendance }))))
}

/// POST /api/attendance/bulk
pub async fn bulk_mark_attendance(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<BulkAttendanceRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if req.records.is_empty() {
        return Err(ApiError::bad_request("No attendance records provided"));
    }

    let ids = mark_all(&state, &ctx, &req.records).await?;

    audit(
        &state,
        &ctx,
        actions::ATTENDANCE_MARK,
        resource_types::ATTENDANCE,
        ids.iter().map(i64::to_string).collect::<Vec<_>>().join(","),
        Some(json!({ "count": ids.len() })),
    )
    .await;

    tracing::info!(
        school_id = ctx.school_id,
        marked_by = ctx.user_id,
        count = ids.len(),
        "Attendance batch applied"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Attendance marked successfully",
            "count": ids.len(),
        })),
    ))
}

/// GET /api/attendance
pub async fn list_attendance(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<AttendanceListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut filters = ctx.tenant().filters("a.school_id");
    filters.raw("a.deleted_at IS NULL");
    filters
        .push_opt("a.class_id = ?", query.class_id)
        .push_opt("a.subject_id = ?", query.subject_id)
        .push_opt("a.student_id = ?", query.student_id);
    if let Some(date) = query.date.filter(|d| !d.is_empty()) {
        parse_date(&date).map_err(ApiError::bad_request)?;
        filters.push("a.date = ?", date);
    }
    if let Some(status) = query.status.filter(|s| !s.is_empty()) {
        let status = parse_status(&status).map_err(ApiError::bad_request)?;
        filters.push("a.status = ?", status.as_str());
    }

    let sql = format!(
        "{} {} ORDER BY a.date DESC, a.lesson_number, a.id LIMIT 100",
        ENTRY_SELECT,
        filters.where_clause()
    );
    let attendance = filters
        .bind(sqlx::query_as::<_, AttendanceEntry>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "attendance": attendance })))
}

/// GET /api/attendance/student/:id/stats
pub async fn student_attendance_stats(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let student: User = ctx
        .tenant()
        .user_with_role(&state.db, student_id, STUDENT_ROLES)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;

    let stats = student_stats(&state.db, ctx.school_id, student_id, None, None).await?;
    Ok(Json(json!({
        "student": UserSummary::from(student),
        "total": stats.total(),
        "stats": stats,
    })))
}

/// DELETE /api/attendance/:id
pub async fn delete_attendance(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let _record: Attendance = ctx.tenant().find(&state.db, id).await?;

    let timestamp = now();
    sqlx::query("UPDATE attendance SET deleted_at = ?, updated_at = ? WHERE id = ? AND school_id = ?")
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(&state, &ctx, actions::ATTENDANCE_DELETE, resource_types::ATTENDANCE, id, None).await;

    Ok(Json(json!({ "message": "Attendance record deleted successfully" })))
}

//! Parent views and the parent to student links behind them.
//!
//! A parent only ever sees data of students they are linked to. Admins
//! see any student of their school.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, AttendanceEntry, DateRangeQuery, GradeEntry, HomeworkEntry,
    LinkParentRequest, ParentLinkEntry, ParentStudent, Role, User, UserSummary,
};
use crate::AppState;

use super::attendance::{self, student_stats};
use super::audit::audit;
use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::grades;
use super::homework;
use super::validation::parse_date;

pub(crate) const STUDENT_ROLES: &[Role] = &[Role::Student, Role::Starosta];

pub(crate) const LINK_SELECT: &str = r#"
    SELECT ps.*,
        TRIM(p.last_name || ' ' || p.first_name) AS parent_name,
        p.username AS parent_username,
        TRIM(s.last_name || ' ' || s.first_name) AS student_name,
        s.username AS student_username
    FROM parent_students ps
    JOIN users p ON p.id = ps.parent_id
    JOIN users s ON s.id = ps.student_id
"#;

/// Create a link after checking both ends belong to the caller's school
pub(crate) async fn create_link(
    state: &AppState,
    ctx: &AuthContext,
    req: &LinkParentRequest,
) -> Result<ParentLinkEntry, ApiError> {
    let tenant = ctx.tenant();
    if tenant
        .user_with_role(&state.db, req.parent_id, &[Role::Parent])
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Parent not found"));
    }
    if tenant
        .user_with_role(&state.db, req.student_id, STUDENT_ROLES)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Student not found"));
    }

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM parent_students WHERE parent_id = ? AND student_id = ?")
            .bind(req.parent_id)
            .bind(req.student_id)
            .fetch_optional(&state.db)
            .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("Link already exists"));
    }

    let result = sqlx::query(
        "INSERT INTO parent_students (school_id, parent_id, student_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(ctx.school_id)
    .bind(req.parent_id)
    .bind(req.student_id)
    .bind(now())
    .execute(&state.db)
    .await
    .map_err(|e| match ApiError::from(e) {
        err if err.code() == super::error::ErrorCode::Conflict => {
            ApiError::conflict("Link already exists")
        }
        err => err,
    })?;

    let link_id = result.last_insert_rowid();
    audit(
        state,
        ctx,
        actions::PARENT_LINK,
        resource_types::PARENT_LINK,
        link_id,
        Some(json!({ "parent_id": req.parent_id, "student_id": req.student_id })),
    )
    .await;

    let sql = format!("{} WHERE ps.id = ?", LINK_SELECT);
    let link = sqlx::query_as::<_, ParentLinkEntry>(&sql)
        .bind(link_id)
        .fetch_one(&state.db)
        .await?;
    Ok(link)
}

/// Remove a link and record who did it
pub(crate) async fn remove_link(
    state: &AppState,
    ctx: &AuthContext,
    link: ParentStudent,
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM parent_students WHERE id = ? AND school_id = ?")
        .bind(link.id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(
        state,
        ctx,
        actions::PARENT_UNLINK,
        resource_types::PARENT_LINK,
        link.id,
        Some(json!({ "parent_id": link.parent_id, "student_id": link.student_id })),
    )
    .await;
    Ok(())
}

/// Students linked to a parent
pub(crate) async fn children_of(
    db: &sqlx::SqlitePool,
    school_id: i64,
    parent_id: i64,
) -> Result<Vec<UserSummary>, sqlx::Error> {
    sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.username, u.role, u.first_name, u.last_name
        FROM users u
        JOIN parent_students ps ON ps.student_id = u.id
        WHERE ps.parent_id = ? AND ps.school_id = ? AND u.deleted_at IS NULL
        ORDER BY u.last_name, u.first_name
        "#,
    )
    .bind(parent_id)
    .bind(school_id)
    .fetch_all(db)
    .await
}

/// Parents linked to a student
pub(crate) async fn parents_of(
    db: &sqlx::SqlitePool,
    school_id: i64,
    student_id: i64,
) -> Result<Vec<UserSummary>, sqlx::Error> {
    sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.username, u.role, u.first_name, u.last_name
        FROM users u
        JOIN parent_students ps ON ps.parent_id = u.id
        WHERE ps.student_id = ? AND ps.school_id = ? AND u.deleted_at IS NULL
        ORDER BY u.last_name, u.first_name
        "#,
    )
    .bind(student_id)
    .bind(school_id)
    .fetch_all(db)
    .await
}

/// Gate for the child views: admins pass, parents need a link
async fn child_for(state: &AppState, ctx: &AuthContext, student_id: i64) -> Result<User, ApiError> {
    match ctx.role {
        Role::Admin => {}
        Role::Parent => {
            let link: Option<(i64,)> = sqlx::query_as(
                "SELECT id FROM parent_students WHERE parent_id = ? AND student_id = ? AND school_id = ?",
            )
            .bind(ctx.user_id)
            .bind(student_id)
            .bind(ctx.school_id)
            .fetch_optional(&state.db)
            .await?;
            if link.is_none() {
                tracing::warn!(
                    parent_id = ctx.user_id,
                    student_id = student_id,
                    "Child data requested without a link"
                );
                return Err(ApiError::forbidden("Access denied"));
            }
        }
        _ => return Err(ApiError::forbidden("Access denied")),
    }

    ctx.tenant()
        .user_with_role(&state.db, student_id, STUDENT_ROLES)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))
}

/// POST /api/parents/link
pub async fn link_parent(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<LinkParentRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let link = create_link(&state, &ctx, &req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "link": link,
            "message": "Parent linked to student successfully",
        })),
    ))
}

/// DELETE /api/parents/:parent_id/students/:student_id
pub async fn unlink_parent(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath((parent_id, student_id)): ApiPath<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let link = sqlx::query_as::<_, ParentStudent>(
        "SELECT * FROM parent_students WHERE parent_id = ? AND student_id = ? AND school_id = ?",
    )
    .bind(parent_id)
    .bind(student_id)
    .bind(ctx.school_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Link not found"))?;

    remove_link(&state, &ctx, link).await?;
    Ok(Json(json!({ "message": "Parent unlinked from student successfully" })))
}

/// GET /api/parents/children
pub async fn my_children(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let children = children_of(&state.db, ctx.school_id, ctx.user_id).await?;
    Ok(Json(json!({ "children": children })))
}

/// GET /api/parents/:id/children
pub async fn parent_children(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(parent_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let parent = ctx
        .tenant()
        .user_with_role(&state.db, parent_id, &[Role::Parent])
        .await?
        .ok_or_else(|| ApiError::not_found("Parent not found"))?;
    let children = children_of(&state.db, ctx.school_id, parent.id).await?;
    Ok(Json(json!({
        "parent": UserSummary::from(parent),
        "children": children,
    })))
}

/// GET /api/parents/students/:id/parents
pub async fn student_parents(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let student = ctx
        .tenant()
        .user_with_role(&state.db, student_id, STUDENT_ROLES)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    let parents = parents_of(&state.db, ctx.school_id, student.id).await?;
    Ok(Json(json!({
        "student": UserSummary::from(student),
        "parents": parents,
    })))
}

/// GET /api/parents/child/:id/grades
pub async fn child_grades(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let student = child_for(&state, &ctx, student_id).await?;

    let sql = format!(
        "{} WHERE g.student_id = ? AND g.school_id = ? ORDER BY g.date DESC, g.id DESC LIMIT 100",
        grades::ENTRY_SELECT
    );
    let grades = sqlx::query_as::<_, GradeEntry>(&sql)
        .bind(student.id)
        .bind(ctx.school_id)
        .fetch_all(&state.db)
        .await?;

    let (average_grade,): (Option<f64>,) =
        sqlx::query_as("SELECT AVG(grade) FROM grades WHERE student_id = ? AND school_id = ?")
            .bind(student.id)
            .bind(ctx.school_id)
            .fetch_one(&state.db)
            .await?;

    Ok(Json(json!({
        "student": UserSummary::from(student),
        "grades": grades,
        "average_grade": average_grade.unwrap_or(0.0),
    })))
}

/// GET /api/parents/child/:id/attendance
pub async fn child_attendance(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<DateRangeQuery>,
) -> Result<Json<Value>, ApiError> {
    let student = child_for(&state, &ctx, student_id).await?;

    let date_from = query.date_from.filter(|d| !d.is_empty());
    let date_to = query.date_to.filter(|d| !d.is_empty());
    for date in date_from.iter().chain(date_to.iter()) {
        parse_date(date).map_err(ApiError::bad_request)?;
    }

    let sql = format!(
        "{} WHERE a.student_id = ? AND a.school_id = ? AND a.deleted_at IS NULL \
         AND (? IS NULL OR a.date >= ?) AND (? IS NULL OR a.date <= ?) \
         ORDER BY a.date DESC, a.lesson_number LIMIT 100",
        attendance::ENTRY_SELECT
    );
    let records = sqlx::query_as::<_, AttendanceEntry>(&sql)
        .bind(student.id)
        .bind(ctx.school_id)
        .bind(&date_from)
        .bind(&date_from)
        .bind(&date_to)
        .bind(&date_to)
        .fetch_all(&state.db)
        .await?;

    let stats = student_stats(
        &state.db,
        ctx.school_id,
        student.id,
        date_from.as_deref(),
        date_to.as_deref(),
    )
    .await?;

    Ok(Json(json!({
        "student": UserSummary::from(student),
        "attendance": records,
        "stats": {
            "total": stats.total(),
            "present": stats.present,
            "absent": stats.absent,
            "late": stats.late,
            "sick": stats.sick,
            "excused": stats.excused,
        },
        "percentage": stats.percentage(),
    })))
}

/// GET /api/parents/child/:id/homework
pub async fn child_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let student = child_for(&state, &ctx, student_id).await?;

    let sql = format!(
        "{} WHERE h.school_id = ? AND h.deleted_at IS NULL AND h.class_id IN \
         (SELECT class_id FROM class_students WHERE student_id = ?) \
         ORDER BY h.due_date ASC, h.id LIMIT 50",
        homework::ENTRY_SELECT
    );
    let homework = sqlx::query_as::<_, HomeworkEntry>(&sql)
        .bind(ctx.school_id)
        .bind(student.id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({
        "student": UserSummary::from(student),
        "homework": homework,
    })))
}

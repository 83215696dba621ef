//! Grade journal endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, AverageQuery, Class, CreateGradeRequest, Grade, GradeEntry,
    GradeListQuery, JournalQuery, Role, Subject, SubjectAverage, UpdateGradeRequest,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::classes::roster;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::subjects::teaches;
use super::validation::{parse_date, validate_date, validate_grade_type, validate_grade_value};

pub(crate) const ENTRY_SELECT: &str = r#"
    SELECT g.*,
        TRIM(st.last_name || ' ' || st.first_name) AS student_name,
        sub.name AS subject_name,
        TRIM(t.last_name || ' ' || t.first_name) AS teacher_name
    FROM grades g
    JOIN users st ON st.id = g.student_id
    JOIN subjects sub ON sub.id = g.subject_id
    JOIN users t ON t.id = g.teacher_id
"#;

const STUDENT_ROLES: &[Role] = &[Role::Student, Role::Starosta];

async fn load_entry(db: &sqlx::SqlitePool, id: i64) -> Result<GradeEntry, sqlx::Error> {
    let sql = format!("{} WHERE g.id = ?", ENTRY_SELECT);
    sqlx::query_as::<_, GradeEntry>(&sql)
        .bind(id)
        .fetch_one(db)
        .await
}

/// Admins may touch any grade; teachers only the ones they gave
fn ensure_author(ctx: &AuthContext, grade: &Grade, message: &str) -> Result<(), ApiError> {
    if ctx.is_admin() || grade.teacher_id == ctx.user_id {
        Ok(())
    } else {
        Err(ApiError::forbidden(message))
    }
}

/// GET /api/grades
pub async fn list_grades(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<GradeListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut filters = ctx.tenant().filters("g.school_id");
    filters
        .push_opt("g.student_id = ?", query.student_id)
        .push_opt("g.subject_id = ?", query.subject_id)
        .push_opt("g.teacher_id = ?", query.teacher_id)
        .push_opt("g.grade_type = ?", query.grade_type.filter(|t| !t.is_empty()));
    if let Some(from) = query.date_from.filter(|d| !d.is_empty()) {
        parse_date(&from).map_err(ApiError::bad_request)?;
        filters.push("g.date >= ?", from);
    }
    if let Some(to) = query.date_to.filter(|d| !d.is_empty()) {
        parse_date(&to).map_err(ApiError::bad_request)?;
        filters.push("g.date <= ?", to);
    }

    let sql = format!(
        "{} {} ORDER BY g.date DESC, g.id DESC",
        ENTRY_SELECT,
        filters.where_clause()
    );
    let grades = filters
        .bind(sqlx::query_as::<_, GradeEntry>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "grades": grades })))
}

/// GET /api/grades/:id
pub async fn get_grade(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let grade: Grade = ctx.tenant().find(&state.db, id).await?;
    let grade = load_entry(&state.db, grade.id).await?;
    Ok(Json(json!({ "grade": grade })))
}

/// POST /api/grades
///
/// Teachers may only grade subjects they are linked to.
pub async fn create_grade(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<CreateGradeRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("grade", validate_grade_value(req.grade))
        .check("grade_type", validate_grade_type(&req.grade_type))
        .check("date", validate_date(&req.date));
    errors.finish()?;

    let tenant = ctx.tenant();
    if tenant
        .user_with_role(&state.db, req.student_id, STUDENT_ROLES)
        .await?
        .is_none()
    {
        return Err(ApiError::bad_request("Student not found or not a student"));
    }
    if tenant.get::<Subject>(&state.db, req.subject_id).await?.is_none() {
        return Err(ApiError::bad_request("Subject not found"));
    }
    if ctx.role == Role::Teacher && !teaches(&state.db, ctx.user_id, req.subject_id).await? {
        tracing::warn!(
            teacher_id = ctx.user_id,
            subject_id = req.subject_id,
            "Grade refused for unlinked subject"
        );
        return Err(ApiError::forbidden("You don't teach this subject"));
    }

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO grades (school_id, student_id, subject_id, teacher_id, grade, grade_type,
            date, comment, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ctx.school_id)
    .bind(req.student_id)
    .bind(req.subject_id)
    .bind(ctx.user_id)
    .bind(req.grade)
    .bind(&req.grade_type)
    .bind(&req.date)
    .bind(&req.comment)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(&state.db)
    .await?;

    let grade = load_entry(&state.db, result.last_insert_rowid()).await?;
    audit(
        &state,
        &ctx,
        actions::GRADE_CREATE,
        resource_types::GRADE,
        grade.grade.id,
        Some(json!({
            "student_id": req.student_id,
            "subject_id": req.subject_id,
            "grade": req.grade,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "grade": grade }))))
}

/// PUT /api/grades/:id
pub async fn update_grade(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateGradeRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut grade: Grade = ctx.tenant().find(&state.db, id).await?;
    ensure_author(&ctx, &grade, "Not authorized to update this grade")?;

    if let Some(value) = req.grade {
        validate_grade_value(value).map_err(ApiError::bad_request)?;
        grade.grade = value;
    }
    if let Some(grade_type) = req.grade_type {
        validate_grade_type(&grade_type).map_err(ApiError::bad_request)?;
        grade.grade_type = grade_type;
    }
    if let Some(date) = req.date.filter(|d| !d.is_empty()) {
        validate_date(&date).map_err(ApiError::bad_request)?;
        grade.date = date;
    }
    if let Some(comment) = req.comment {
        grade.comment = comment;
    }

    sqlx::query(
        r#"
        UPDATE grades SET grade = ?, grade_type = ?, date = ?, comment = ?, updated_at = ?
        WHERE id = ? AND school_id = ?
        "#,
    )
    .bind(grade.grade)
    .bind(&grade.grade_type)
    .bind(&grade.date)
    .bind(&grade.comment)
    .bind(now())
    .bind(id)
    .bind(ctx.school_id)
    .execute(&state.db)
    .await?;

    audit(
        &state,
        &ctx,
        actions::GRADE_UPDATE,
        resource_types::GRADE,
        id,
        Some(json!({ "grade": grade.grade })),
    )
    .await;

    let grade = load_entry(&state.db, id).await?;
    Ok(Json(json!({ "grade": grade })))
}

/// DELETE /api/grades/:id
pub async fn delete_grade(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let grade: Grade = ctx.tenant().find(&state.db, id).await?;
    ensure_author(&ctx, &grade, "Not authorized to delete this grade")?;

    sqlx::query("DELETE FROM grades WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(
        &state,
        &ctx,
        actions::GRADE_DELETE,
        resource_types::GRADE,
        id,
        Some(json!({ "student_id": grade.student_id, "grade": grade.grade })),
    )
    .await;

    Ok(Json(json!({ "message": "Grade deleted successfully" })))
}

/// Mean grade per subject for one student
pub(crate) async fn subject_averages(
    db: &sqlx::SqlitePool,
    school_id: i64,
    student_id: i64,
) -> Result<Vec<SubjectAverage>, sqlx::Error> {
    sqlx::query_as::<_, SubjectAverage>(
        r#"
        SELECT g.subject_id, sub.name AS subject_name,
            CAST(AVG(g.grade) AS REAL) AS average, COUNT(*) AS count
        FROM grades g
        JOIN subjects sub ON sub.id = g.subject_id
        WHERE g.school_id = ? AND g.student_id = ?
        GROUP BY g.subject_id, sub.name
        ORDER BY sub.name
        "#,
    )
    .bind(school_id)
    .bind(student_id)
    .fetch_all(db)
    .await
}

/// GET /api/grades/student/:id/average
pub async fn student_average(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<AverageQuery>,
) -> Result<Json<Value>, ApiError> {
    if ctx
        .tenant()
        .user_with_role(&state.db, student_id, STUDENT_ROLES)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Student not found"));
    }

    let mut filters = ctx.tenant().filters("school_id");
    filters
        .push("student_id = ?", student_id)
        .push_opt("subject_id = ?", query.subject_id);
    if let Some(from) = query.date_from.filter(|d| !d.is_empty()) {
        parse_date(&from).map_err(ApiError::bad_request)?;
        filters.push("date >= ?", from);
    }
    if let Some(to) = query.date_to.filter(|d| !d.is_empty()) {
        parse_date(&to).map_err(ApiError::bad_request)?;
        filters.push("date <= ?", to);
    }

    let sql = format!(
        "SELECT COALESCE(CAST(AVG(grade) AS REAL), 0.0), COUNT(*) FROM grades {}",
        filters.where_clause()
    );
    let (overall_average, total_grades) = filters
        .bind(sqlx::query_as::<_, (f64, i64)>(&sql))
        .fetch_one(&state.db)
        .await?;

    let subject_averages = subject_averages(&state.db, ctx.school_id, student_id).await?;

    Ok(Json(json!({
        "student_id": student_id,
        "overall_average": overall_average,
        "total_grades": total_grades,
        "subject_averages": subject_averages,
    })))
}

/// GET /api/grades/class/:id/journal
///
/// Grades of every rostered student keyed by student id, newest first.
pub async fn class_journal(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(class_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<JournalQuery>,
) -> Result<Json<Value>, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, class_id).await?;
    let students = roster(&state.db, class_id).await?;

    let sql = format!(
        "{} JOIN class_students cs ON cs.student_id = g.student_id AND cs.class_id = ? \
         WHERE g.school_id = ? AND (? IS NULL OR g.subject_id = ?) \
         ORDER BY g.date DESC, g.id DESC",
        ENTRY_SELECT
    );
    let grades = sqlx::query_as::<_, GradeEntry>(&sql)
        .bind(class_id)
        .bind(ctx.school_id)
        .bind(query.subject_id)
        .bind(query.subject_id)
        .fetch_all(&state.db)
        .await?;

    let mut journal: Map<String, Value> = students
        .iter()
        .map(|s| (s.id.to_string(), Value::Array(Vec::new())))
        .collect();
    for grade in grades {
        let key = grade.grade.student_id.to_string();
        let value = serde_json::to_value(&grade).map_err(|e| {
            tracing::error!("Failed to serialize grade: {}", e);
            ApiError::internal("Failed to build journal")
        })?;
        if let Some(Value::Array(entries)) = journal.get_mut(&key) {
            entries.push(value);
        }
    }

    Ok(Json(json!({
        "class": class,
        "students": students,
        "journal": journal,
    })))
}

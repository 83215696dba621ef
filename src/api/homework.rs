//! Homework endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, today, Class, CreateHomeworkRequest, Homework, HomeworkEntry,
    HomeworkListQuery, Role, Subject, UpdateHomeworkRequest, User,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::validation::{validate_date, validate_required};

pub(crate) const ENTRY_SELECT: &str = r#"
    SELECT h.*,
        c.name AS class_name,
        sub.name AS subject_name,
        TRIM(t.last_name || ' ' || t.first_name) AS teacher_name
    FROM homework h
    JOIN classes c ON c.id = h.class_id
    JOIN subjects sub ON sub.id = h.subject_id
    JOIN users t ON t.id = h.teacher_id
"#;

async fn load_entry(db: &sqlx::SqlitePool, id: i64) -> Result<HomeworkEntry, sqlx::Error> {
    let sql = format!("{} WHERE h.id = ?", ENTRY_SELECT);
    sqlx::query_as::<_, HomeworkEntry>(&sql)
        .bind(id)
        .fetch_one(db)
        .await
}

/// Resolve class and subject in the caller's school
async fn class_and_subject(
    state: &AppState,
    ctx: &AuthContext,
    class_id: i64,
    subject_id: i64,
) -> Result<(Class, Subject), ApiError> {
    let tenant = ctx.tenant();
    let class = tenant
        .get::<Class>(&state.db, class_id)
        .await?
        .ok_or_else(|| ApiError::bad_request("Class not found"))?;
    let subject = tenant
        .get::<Subject>(&state.db, subject_id)
        .await?
        .ok_or_else(|| ApiError::bad_request("Subject not found"))?;
    Ok((class, subject))
}

/// A teacher sets homework for the subject they teach or for their
/// homeroom class.
fn may_assign(teacher: &User, class: &Class, subject: &Subject) -> bool {
    let label = teacher.teacher_subject.trim();
    (!label.is_empty() && label == subject.name.trim())
        || class.homeroom_teacher_id == Some(teacher.id)
}

fn ensure_author(ctx: &AuthContext, homework: &Homework, message: &str) -> Result<(), ApiError> {
    if ctx.is_admin() || homework.teacher_id == ctx.user_id {
        Ok(())
    } else {
        Err(ApiError::forbidden(message))
    }
}

/// GET /api/homework
pub async fn list_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<HomeworkListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut filters = ctx.tenant().filters("h.school_id");
    filters.raw("h.deleted_at IS NULL");
    filters
        .push_opt("h.class_id = ?", query.class_id)
        .push_opt("h.subject_id = ?", query.subject_id);

    let sql = format!(
        "{} {} ORDER BY h.due_date ASC, h.id",
        ENTRY_SELECT,
        filters.where_clause()
    );
    let homework = filters
        .bind(sqlx::query_as::<_, HomeworkEntry>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "homework": homework })))
}

/// GET /api/homework/:id
pub async fn get_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let homework: Homework = ctx.tenant().find(&state.db, id).await?;
    let homework = load_entry(&state.db, homework.id).await?;
    Ok(Json(json!({ "homework": homework })))
}

/// POST /api/homework
pub async fn create_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<CreateHomeworkRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let assigned_date = req
        .assigned_date
        .filter(|d| !d.is_empty())
        .unwrap_or_else(today);

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("description", validate_required(&req.description, "Description is required"))
        .check("assigned_date", validate_date(&assigned_date))
        .check("due_date", validate_date(&req.due_date));
    errors.finish()?;

    let (class, subject) = class_and_subject(&state, &ctx, req.class_id, req.subject_id).await?;

    if ctx.role == Role::Teacher {
        let teacher: User = ctx.tenant().find(&state.db, ctx.user_id).await?;
        if !may_assign(&teacher, &class, &subject) {
            return Err(ApiError::forbidden(
                "You can only create homework for your subject or your class",
            ));
        }
    }

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO homework (school_id, class_id, subject_id, teacher_id, description,
            assigned_date, due_date, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ctx.school_id)
    .bind(class.id)
    .bind(subject.id)
    .bind(ctx.user_id)
    .bind(&req.description)
    .bind(&assigned_date)
    .bind(&req.due_date)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(&state.db)
    .await?;

    let homework = load_entry(&state.db, result.last_insert_rowid()).await?;
    audit(
        &state,
        &ctx,
        actions::HOMEWORK_CREATE,
        resource_types::HOMEWORK,
        homework.homework.id,
        Some(json!({ "class_id": class.id, "subject_id": subject.id, "due_date": req.due_date })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "homework": homework }))))
}

/// PUT /api/homework/:id
pub async fn update_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateHomeworkRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut homework: Homework = ctx.tenant().find(&state.db, id).await?;
    ensure_author(&ctx, &homework, "You can only update your own homework")?;

    let class_id = req.class_id.unwrap_or(homework.class_id);
    let subject_id = req.subject_id.unwrap_or(homework.subject_id);
    class_and_subject(&state, &ctx, class_id, subject_id).await?;
    homework.class_id = class_id;
    homework.subject_id = subject_id;

    if let Some(description) = req.description.filter(|d| !d.trim().is_empty()) {
        homework.description = description;
    }
    if let Some(date) = req.assigned_date.filter(|d| !d.is_empty()) {
        validate_date(&date).map_err(ApiError::bad_request)?;
        homework.assigned_date = date;
    }
    if let Some(date) = req.due_date.filter(|d| !d.is_empty()) {
        validate_date(&date).map_err(ApiError::bad_request)?;
        homework.due_date = date;
    }

    sqlx::query(
        r#"
        UPDATE homework SET class_id = ?, subject_id = ?, description = ?, assigned_date = ?,
            due_date = ?, updated_at = ?
        WHERE id = ? AND school_id = ?
        "#,
    )
    .bind(homework.class_id)
    .bind(homework.subject_id)
    .bind(&homework.description)
    .bind(&homework.assigned_date)
    .bind(&homework.due_date)
    .bind(now())
    .bind(id)
    .bind(ctx.school_id)
    .execute(&state.db)
    .await?;

    audit(&state, &ctx, actions::HOMEWORK_UPDATE, resource_types::HOMEWORK, id, None).await;

    let homework = load_entry(&state.db, id).await?;
    Ok(Json(json!({ "homework": homework })))
}

/// DELETE /api/homework/:id
pub async fn delete_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let homework: Homework = ctx.tenant().find(&state.db, id).await?;
    ensure_author(&ctx, &homework, "You can only delete your own homework")?;

    let timestamp = now();
    sqlx::query("UPDATE homework SET deleted_at = ?, updated_at = ? WHERE id = ? AND school_id = ?")
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(&state, &ctx, actions::HOMEWORK_DELETE, resource_types::HOMEWORK, id, None).await;

    Ok(Json(json!({ "message": "Homework deleted successfully" })))
}

/// Homework of one class due on either side of today
async fn class_homework_by_due(
    state: &AppState,
    ctx: &AuthContext,
    class_id: i64,
    upcoming: bool,
) -> Result<Vec<HomeworkEntry>, ApiError> {
    let _class: Class = ctx.tenant().find(&state.db, class_id).await?;

    let (comparison, order) = if upcoming {
        (">=", "ASC")
    } else {
        ("<", "DESC")
    };
    let sql = format!(
        "{} WHERE h.class_id = ? AND h.school_id = ? AND h.deleted_at IS NULL \
         AND h.due_date {} ? ORDER BY h.due_date {}, h.id",
        ENTRY_SELECT, comparison, order
    );
    let homework = sqlx::query_as::<_, HomeworkEntry>(&sql)
        .bind(class_id)
        .bind(ctx.school_id)
        .bind(today())
        .fetch_all(&state.db)
        .await?;
    Ok(homework)
}

/// GET /api/homework/class/:id/upcoming
pub async fn upcoming_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(class_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let homework = class_homework_by_due(&state, &ctx, class_id, true).await?;
    Ok(Json(json!({ "homework": homework })))
}

/// GET /api/homework/class/:id/overdue
pub async fn overdue_homework(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(class_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let homework = class_homework_by_due(&state, &ctx, class_id, false).await?;
    Ok(Json(json!({ "homework": homework })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher(subject: &str) -> User {
        serde_json::from_value(json!({
            "id": 3, "school_id": 1, "username": "t", "email": "t@x", "role": "teacher",
            "first_name": "", "last_name": "", "teacher_subject": subject,
            "created_at": "", "updated_at": "",
        }))
        .unwrap()
    }

    fn class(homeroom: Option<i64>) -> Class {
        Class {
            id: 1,
            school_id: 1,
            name: "5A".into(),
            year: "2025".into(),
            homeroom_teacher_id: homeroom,
            starosta_id: None,
            created_at: String::new(),
            updated_at: String::new(),
            deleted_at: None,
        }
    }

    fn subject(name: &str) -> Subject {
        Subject {
            id: 1,
            school_id: 1,
            name: name.into(),
            description: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_may_assign_by_subject_label() {
        assert!(may_assign(&teacher("Math"), &class(None), &subject("Math")));
        assert!(!may_assign(&teacher("Math"), &class(None), &subject("Biology")));
        assert!(!may_assign(&teacher(""), &class(None), &subject("")));
    }

    #[test]
    fn test_may_assign_as_homeroom_teacher() {
        assert!(may_assign(&teacher("Math"), &class(Some(3)), &subject("Biology")));
        assert!(!may_assign(&teacher("Math"), &class(Some(4)), &subject("Biology")));
    }
}

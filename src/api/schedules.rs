//! Weekly timetable endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::db::{
    actions, now, resource_types, Class, CreateScheduleRequest, Role, Schedule, ScheduleEntry,
    ScheduleListQuery, Subject, UpdateScheduleRequest,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::tenancy::Tenant;
use super::validation::{parse_day_of_week, validate_lesson_number, validate_time_range};

const ENTRY_SELECT: &str = r#"
    SELECT s.*, c.name AS class_name, sub.name AS subject_name,
        CASE WHEN t.id IS NULL THEN NULL
             ELSE TRIM(t.last_name || ' ' || t.first_name) END AS teacher_name
    FROM schedules s
    JOIN classes c ON c.id = s.class_id
    JOIN subjects sub ON sub.id = s.subject_id
    LEFT JOIN users t ON t.id = s.teacher_id
"#;

/// Validated timetable slot, ready to be written
struct Slot {
    class_id: i64,
    subject_id: i64,
    teacher_id: Option<i64>,
    day_of_week: String,
    day_index: i64,
    lesson_number: i64,
    start_time: String,
    end_time: String,
    room_number: String,
}

impl Slot {
    async fn check(self, db: &sqlx::SqlitePool, tenant: Tenant) -> Result<Self, ApiError> {
        if tenant.get::<Class>(db, self.class_id).await?.is_none() {
            return Err(ApiError::bad_request("Class not found"));
        }
        if tenant.get::<Subject>(db, self.subject_id).await?.is_none() {
            return Err(ApiError::bad_request("Subject not found"));
        }
        if let Some(teacher_id) = self.teacher_id {
            if tenant
                .user_with_role(db, teacher_id, &[Role::Teacher])
                .await?
                .is_none()
            {
                return Err(ApiError::bad_request("Teacher not found or not a teacher"));
            }
        }
        Ok(self)
    }
}

fn slot_fields(
    day_of_week: &str,
    lesson_number: i64,
    start_time: &str,
    end_time: &str,
) -> Result<i64, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("day_of_week", parse_day_of_week(day_of_week).map(|_| ()))
        .check("lesson_number", validate_lesson_number(lesson_number))
        .check("time", validate_time_range(start_time, end_time));
    errors.finish()?;
    let day = parse_day_of_week(day_of_week).map_err(ApiError::bad_request)?;
    Ok(day.index())
}

async fn load_entry(db: &sqlx::SqlitePool, id: i64) -> Result<ScheduleEntry, sqlx::Error> {
    let sql = format!("{} WHERE s.id = ?", ENTRY_SELECT);
    sqlx::query_as::<_, ScheduleEntry>(&sql)
        .bind(id)
        .fetch_one(db)
        .await
}

/// GET /api/schedules
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<ScheduleListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut filters = ctx.tenant().filters("s.school_id");
    filters.raw("s.deleted_at IS NULL");
    filters.push_opt("s.class_id = ?", query.class_id);
    if let Some(day) = query.day_of_week.filter(|d| !d.trim().is_empty()) {
        let day = parse_day_of_week(&day).map_err(ApiError::bad_request)?;
        filters.push("s.day_index = ?", day.index());
    }

    let sql = format!(
        "{} {} ORDER BY s.day_index, s.lesson_number, c.name",
        ENTRY_SELECT,
        filters.where_clause()
    );
    let schedules = filters
        .bind(sqlx::query_as::<_, ScheduleEntry>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "schedules": schedules })))
}

/// GET /api/schedules/:id
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let schedule: Schedule = ctx.tenant().find(&state.db, id).await?;
    let schedule = load_entry(&state.db, schedule.id).await?;
    Ok(Json(json!({ "schedule": schedule })))
}

/// GET /api/schedules/class/:id
///
/// Lessons grouped by day label, each day ordered by lesson number.
pub async fn get_class_schedule(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(class_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, class_id).await?;

    let sql = format!(
        "{} WHERE s.class_id = ? AND s.school_id = ? AND s.deleted_at IS NULL \
         ORDER BY s.day_index, s.lesson_number",
        ENTRY_SELECT
    );
    let entries = sqlx::query_as::<_, ScheduleEntry>(&sql)
        .bind(class_id)
        .bind(ctx.school_id)
        .fetch_all(&state.db)
        .await?;

    let mut by_day: Map<String, Value> = Map::new();
    for entry in entries {
        let day = entry.schedule.day_of_week.clone();
        let lessons = by_day
            .entry(day)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(lessons) = lessons {
            lessons.push(serde_json::to_value(&entry).map_err(|e| {
                tracing::error!("Failed to serialize schedule entry: {}", e);
                ApiError::internal("Failed to build schedule")
            })?);
        }
    }

    Ok(Json(json!({ "class": class, "schedule": by_day })))
}

/// POST /api/schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let day_index = slot_fields(
        &req.day_of_week,
        req.lesson_number,
        &req.start_time,
        &req.end_time,
    )?;
    let slot = Slot {
        class_id: req.class_id,
        subject_id: req.subject_id,
        teacher_id: req.teacher_id,
        day_of_week: req.day_of_week.trim().to_string(),
        day_index,
        lesson_number: req.lesson_number,
        start_time: req.start_time,
        end_time: req.end_time,
        room_number: req.room_number,
    }
    .check(&state.db, ctx.tenant())
    .await?;

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO schedules (school_id, class_id, subject_id, teacher_id, day_of_week, day_index,
            lesson_number, start_time, end_time, room_number, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ctx.school_id)
    .bind(slot.class_id)
    .bind(slot.subject_id)
    .bind(slot.teacher_id)
    .bind(&slot.day_of_week)
    .bind(slot.day_index)
    .bind(slot.lesson_number)
    .bind(&slot.start_time)
    .bind(&slot.end_time)
    .bind(&slot.room_number)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(&state.db)
    .await?;

    let schedule = load_entry(&state.db, result.last_insert_rowid()).await?;
    audit(
        &state,
        &ctx,
        actions::SCHEDULE_CREATE,
        resource_types::SCHEDULE,
        schedule.schedule.id,
        Some(json!({
            "class_id": slot.class_id,
            "day_of_week": slot.day_of_week,
            "lesson_number": slot.lesson_number,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "schedule": schedule }))))
}

/// PUT /api/schedules/:id
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateScheduleRequest>,
) -> Result<Json<Value>, ApiError> {
    let current: Schedule = ctx.tenant().find(&state.db, id).await?;

    let day_of_week = req
        .day_of_week
        .filter(|d| !d.trim().is_empty())
        .map(|d| d.trim().to_string())
        .unwrap_or(current.day_of_week);
    let lesson_number = req.lesson_number.unwrap_or(current.lesson_number);
    let start_time = req.start_time.unwrap_or(current.start_time);
    let end_time = req.end_time.unwrap_or(current.end_time);
    let day_index = slot_fields(&day_of_week, lesson_number, &start_time, &end_time)?;

    let slot = Slot {
        class_id: req.class_id.unwrap_or(current.class_id),
        subject_id: req.subject_id.unwrap_or(current.subject_id),
        teacher_id: req.teacher_id.or(current.teacher_id),
        day_of_week,
        day_index,
        lesson_number,
        start_time,
        end_time,
        room_number: req.room_number.unwrap_or(current.room_number),
    }
    .check(&state.db, ctx.tenant())
    .await?;

    sqlx::query(
        r#"
        UPDATE schedules SET class_id = ?, subject_id = ?, teacher_id = ?, day_of_week = ?,
            day_index = ?, lesson_number = ?, start_time = ?, end_time = ?, room_number = ?,
            updated_at = ?
        WHERE id = ? AND school_id = ?
        "#,
    )
    .bind(slot.class_id)
    .bind(slot.subject_id)
    .bind(slot.teacher_id)
    .bind(&slot.day_of_week)
    .bind(slot.day_index)
    .bind(slot.lesson_number)
    .bind(&slot.start_time)
    .bind(&slot.end_time)
    .bind(&slot.room_number)
    .bind(now())
    .bind(id)
    .bind(ctx.school_id)
    .execute(&state.db)
    .await?;

    audit(&state, &ctx, actions::SCHEDULE_UPDATE, resource_types::SCHEDULE, id, None).await;

    let schedule = load_entry(&state.db, id).await?;
    Ok(Json(json!({ "schedule": schedule })))
}

/// DELETE /api/schedules/:id
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let _schedule: Schedule = ctx.tenant().find(&state.db, id).await?;

    let timestamp = now();
    sqlx::query("UPDATE schedules SET deleted_at = ?, updated_at = ? WHERE id = ? AND school_id = ?")
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(&state, &ctx, actions::SCHEDULE_DELETE, resource_types::SCHEDULE, id, None).await;

    Ok(Json(json!({ "message": "Schedule deleted successfully" })))
}

//! Announcement endpoints.
//!
//! Admins read every announcement of their school. Everyone else reads
//! those addressed to `all`, to their own audience, or (for students) to a
//! class they are rostered in.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, is_valid_target_role, now, resource_types, Announcement, AnnouncementEntry,
    AnnouncementListQuery, Class, CreateAnnouncementRequest, Filters, SqlArg,
    UpdateAnnouncementRequest,
};
use crate::AppState;

use super::audit::audit;
use super::auth::AuthContext;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::validation::validate_required;

const ENTRY_SELECT: &str = r#"
    SELECT an.*,
        TRIM(u.last_name || ' ' || u.first_name) AS author_name,
        c.name AS target_class_name
    FROM announcements an
    JOIN users u ON u.id = an.author_id
    LEFT JOIN classes c ON c.id = an.target_class_id
"#;

/// Restrict `filters` to what the caller may read
fn visible_to(ctx: &AuthContext, filters: &mut Filters) {
    let Some(audience) = ctx.role.audience() else {
        return;
    };
    if ctx.role.is_student() {
        filters.push_all(
            "(an.target_role = 'all' OR an.target_role = ? OR an.target_class_id IN \
             (SELECT class_id FROM class_students WHERE student_id = ?))",
            [SqlArg::from(audience), SqlArg::from(ctx.user_id)],
        );
    } else {
        filters.push("(an.target_role = 'all' OR an.target_role = ?)", audience);
    }
}

async fn load_entry(db: &sqlx::SqlitePool, id: i64) -> Result<AnnouncementEntry, sqlx::Error> {
    let sql = format!("{} WHERE an.id = ?", ENTRY_SELECT);
    sqlx::query_as::<_, AnnouncementEntry>(&sql)
        .bind(id)
        .fetch_one(db)
        .await
}

async fn check_target(
    state: &AppState,
    ctx: &AuthContext,
    target_role: &str,
    target_class_id: Option<i64>,
) -> Result<(), ApiError> {
    if !is_valid_target_role(target_role) {
        return Err(ApiError::bad_request("Invalid target role"));
    }
    if let Some(class_id) = target_class_id {
        if ctx.tenant().get::<Class>(&state.db, class_id).await?.is_none() {
            return Err(ApiError::not_found("Target class not found"));
        }
    }
    Ok(())
}

fn ensure_author(ctx: &AuthContext, announcement: &Announcement, message: &str) -> Result<(), ApiError> {
    if ctx.is_admin() || announcement.author_id == ctx.user_id {
        Ok(())
    } else {
        Err(ApiError::forbidden(message))
    }
}

/// GET /api/announcements
pub async fn list_announcements(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<AnnouncementListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut filters = ctx.tenant().filters("an.school_id");
    visible_to(&ctx, &mut filters);
    filters
        .push_opt(
            "an.target_role = ?",
            query.target_role.filter(|r| !r.is_empty()),
        )
        .push_opt("an.target_class_id = ?", query.class_id);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let sql = format!(
        "{} {} ORDER BY an.created_at DESC, an.id DESC LIMIT {}",
        ENTRY_SELECT,
        filters.where_clause(),
        limit
    );
    let announcements = filters
        .bind(sqlx::query_as::<_, AnnouncementEntry>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "announcements": announcements })))
}

/// GET /api/announcements/my
pub async fn my_announcements(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let sql = format!(
        "{} WHERE an.school_id = ? AND an.author_id = ? ORDER BY an.created_at DESC, an.id DESC",
        ENTRY_SELECT
    );
    let announcements = sqlx::query_as::<_, AnnouncementEntry>(&sql)
        .bind(ctx.school_id)
        .bind(ctx.user_id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "announcements": announcements })))
}

/// GET /api/announcements/class/:id
pub async fn class_announcements(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(class_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, class_id).await?;

    let mut filters = ctx.tenant().filters("an.school_id");
    visible_to(&ctx, &mut filters);
    filters.push(
        "(an.target_class_id = ? OR an.target_role = 'all')",
        class_id,
    );
    let sql = format!(
        "{} {} ORDER BY an.created_at DESC, an.id DESC",
        ENTRY_SELECT,
        filters.where_clause()
    );
    let announcements = filters
        .bind(sqlx::query_as::<_, AnnouncementEntry>(&sql))
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "class": class, "announcements": announcements })))
}

/// GET /api/announcements/:id
pub async fn get_announcement(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let mut filters = ctx.tenant().filters("an.school_id");
    visible_to(&ctx, &mut filters);
    filters.push("an.id = ?", id);
    let sql = format!("{} {}", ENTRY_SELECT, filters.where_clause());
    // Hidden rows read as missing
    let announcement = filters
        .bind(sqlx::query_as::<_, AnnouncementEntry>(&sql))
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Announcement not found"))?;
    Ok(Json(json!({ "announcement": announcement })))
}

/// POST /api/announcements
pub async fn create_announcement(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<CreateAnnouncementRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("title", validate_required(&req.title, "Title is required"))
        .check("content", validate_required(&req.content, "Content is required"));
    errors.finish()?;
    check_target(&state, &ctx, &req.target_role, req.target_class_id).await?;

    let timestamp = now();
    let result = sqlx::query(
        r#"
        INSERT INTO announcements (school_id, author_id, title, content, target_role,
            target_class_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ctx.school_id)
    .bind(ctx.user_id)
    .bind(&req.title)
    .bind(&req.content)
    .bind(&req.target_role)
    .bind(req.target_class_id)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(&state.db)
    .await?;

    let announcement = load_entry(&state.db, result.last_insert_rowid()).await?;
    audit(
        &state,
        &ctx,
        actions::ANNOUNCEMENT_CREATE,
        resource_types::ANNOUNCEMENT,
        announcement.announcement.id,
        Some(json!({
            "title": req.title,
            "target_role": req.target_role,
            "target_class_id": req.target_class_id,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "announcement": announcement }))))
}

/// PUT /api/announcements/:id
pub async fn update_announcement(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateAnnouncementRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut announcement: Announcement = ctx.tenant().find(&state.db, id).await?;
    ensure_author(&ctx, &announcement, "Not authorized to update this announcement")?;

    if let Some(title) = req.title.filter(|t| !t.trim().is_empty()) {
        announcement.title = title;
    }
    if let Some(content) = req.content.filter(|c| !c.trim().is_empty()) {
        announcement.content = content;
    }
    if let Some(target_role) = req.target_role {
        announcement.target_role = target_role;
    }
    if req.target_class_id.is_some() {
        announcement.target_class_id = req.target_class_id;
    }
    check_target(
        &state,
        &ctx,
        &announcement.target_role,
        announcement.target_class_id,
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE announcements SET title = ?, content = ?, target_role = ?, target_class_id = ?,
            updated_at = ?
        WHERE id = ? AND school_id = ?
        "#,
    )
    .bind(&announcement.title)
    .bind(&announcement.content)
    .bind(&announcement.target_role)
    .bind(announcement.target_class_id)
    .bind(now())
    .bind(id)
    .bind(ctx.school_id)
    .execute(&state.db)
    .await?;

    audit(
        &state,
        &ctx,
        actions::ANNOUNCEMENT_UPDATE,
        resource_types::ANNOUNCEMENT,
        id,
        None,
    )
    .await;

    let announcement = load_entry(&state.db, id).await?;
    Ok(Json(json!({ "announcement": announcement })))
}

/// DELETE /api/announcements/:id
pub async fn delete_announcement(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let announcement: Announcement = ctx.tenant().find(&state.db, id).await?;
    ensure_author(&ctx, &announcement, "Not authorized to delete this announcement")?;

    sqlx::query("DELETE FROM announcements WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(ctx.school_id)
        .execute(&state.db)
        .await?;

    audit(
        &state,
        &ctx,
        actions::ANNOUNCEMENT_DELETE,
        resource_types::ANNOUNCEMENT,
        id,
        Some(json!({ "title": announcement.title })),
    )
    .await;

    Ok(Json(json!({ "message": "Announcement deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: 9,
            school_id: 1,
            role,
        }
    }

    #[test]
    fn test_admin_sees_everything() {
        let mut filters = Filters::new();
        visible_to(&ctx(Role::Admin), &mut filters);
        assert_eq!(filters.where_clause(), "");
    }

    #[test]
    fn test_students_also_see_their_classes() {
        let mut filters = Filters::new();
        visible_to(&ctx(Role::Starosta), &mut filters);
        assert!(filters.where_clause().contains("class_students"));

        let mut filters = Filters::new();
        visible_to(&ctx(Role::Teacher), &mut filters);
        assert!(!filters.where_clause().contains("class_students"));
    }
}

//! Activity log of mutations, kept per school.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub school_id: i64,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    /// Defaults to 100, capped at 500
    pub limit: Option<i64>,
}

impl AuditLogQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 500)
    }
}

/// Common audit action types
pub mod actions {
    pub const SCHOOL_CREATE: &str = "school.create";
    pub const SCHOOL_UPDATE: &str = "school.update";

    pub const USER_REGISTER: &str = "user.register";
    pub const USER_CREATE: &str = "user.create";
    pub const USER_UPDATE: &str = "user.update";
    pub const USER_DELETE: &str = "user.delete";
    pub const USER_PASSWORD_CHANGE: &str = "user.password_change";

    pub const CLASS_CREATE: &str = "class.create";
    pub const CLASS_UPDATE: &str = "class.update";
    pub const CLASS_DELETE: &str = "class.delete";
    pub const CLASS_STUDENTS_ADD: &str = "class.students.add";
    pub const CLASS_STUDENT_REMOVE: &str = "class.student.remove";

    pub const SUBJECT_CREATE: &str = "subject.create";
    pub const SUBJECT_UPDATE: &str = "subject.update";
    pub const SUBJECT_DELETE: &str = "subject.delete";
    pub const SUBJECT_TEACHERS_ASSIGN: &str = "subject.teachers.assign";
    pub const SUBJECT_TEACHER_REMOVE: &str = "subject.teacher.remove";

    pub const SCHEDULE_CREATE: &str = "schedule.create";
    pub const SCHEDULE_UPDATE: &str = "schedule.update";
    pub const SCHEDULE_DELETE: &str = "schedule.delete";

    pub const ATTENDANCE_MARK: &str = "attendance.mark";
    pub const ATTENDANCE_DELETE: &str = "attendance.delete";

    pub const GRADE_CREATE: &str = "grade.create";
    pub const GRADE_UPDATE: &str = "grade.update";
    pub const GRADE_DELETE: &str = "grade.delete";

    pub const HOMEWORK_CREATE: &str = "homework.create";
    pub const HOMEWORK_UPDATE: &str = "homework.update";
    pub const HOMEWORK_DELETE: &str = "homework.delete";

    pub const ANNOUNCEMENT_CREATE: &str = "announcement.create";
    pub const ANNOUNCEMENT_UPDATE: &str = "announcement.update";
    pub const ANNOUNCEMENT_DELETE: &str = "announcement.delete";

    pub const PARENT_LINK: &str = "parent.link";
    pub const PARENT_UNLINK: &str = "parent.unlink";
}

/// Common resource types
pub mod resource_types {
    pub const SCHOOL: &str = "school";
    pub const USER: &str = "user";
    pub const CLASS: &str = "class";
    pub const SUBJECT: &str = "subject";
    pub const SCHEDULE: &str = "schedule";
    pub const ATTENDANCE: &str = "attendance";
    pub const GRADE: &str = "grade";
    pub const HOMEWORK: &str = "homework";
    pub const ANNOUNCEMENT: &str = "announcement";
    pub const PARENT_LINK: &str = "parent_link";
}

/// Log an audit event to the database
pub async fn log_audit(
    db: &SqlitePool,
    school_id: i64,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    user_id: Option<i64>,
    details: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now();
    let details_json = details.map(|d| d.to_string());

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, school_id, action, resource_type, resource_id, user_id, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(school_id)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(user_id)
    .bind(&details_json)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(
        school_id = school_id,
        action = action,
        resource_type = resource_type,
        resource_id = resource_id,
        user_id = user_id,
        "Audit log recorded"
    );

    Ok(())
}

/// Newest entries of one school
pub async fn list_audit_logs(
    db: &SqlitePool,
    school_id: i64,
    query: &AuditLogQuery,
) -> Result<Vec<AuditLog>, sqlx::Error> {
    sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT * FROM audit_logs
        WHERE school_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(school_id)
    .bind(query.limit())
    .fetch_all(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_log_and_list_is_scoped_to_school() {
        let db = test_pool().await;
        sqlx::query("INSERT INTO schools (name) VALUES ('A'), ('B')")
            .execute(&db)
            .await
            .unwrap();

        log_audit(&db, 1, actions::CLASS_CREATE, resource_types::CLASS, Some("3"), Some(1), None)
            .await
            .unwrap();
        log_audit(
            &db,
            2,
            actions::GRADE_CREATE,
            resource_types::GRADE,
            Some("9"),
            Some(4),
            Some(serde_json::json!({"grade": 5})),
        )
        .await
        .unwrap();

        let entries = list_audit_logs(&db, 1, &AuditLogQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "class.create");
        assert_eq!(entries[0].resource_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(AuditLogQuery::default().limit(), 100);
        assert_eq!(AuditLogQuery { limit: Some(10_000) }.limit(), 500);
        assert_eq!(AuditLogQuery { limit: Some(0) }.limit(), 1);
    }
}

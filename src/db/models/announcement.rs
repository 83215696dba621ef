//! School announcements and their audience filter.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Accepted `target_role` values. Empty means the same as `all`
/// for authoring purposes but only `all` is matched by readers.
pub const TARGET_ROLES: [&str; 5] = ["all", "teachers", "students", "parents", ""];

pub fn is_valid_target_role(value: &str) -> bool {
    TARGET_ROLES.contains(&value)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Announcement {
    pub id: i64,
    pub school_id: i64,
    pub author_id: i64,
    pub title: String,
    pub content: String,
    pub target_role: String,
    pub target_class_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AnnouncementEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub announcement: Announcement,
    pub author_name: String,
    pub target_class_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub target_role: String,
    pub target_class_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAnnouncementRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub target_role: Option<String>,
    pub target_class_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnnouncementListQuery {
    pub target_role: Option<String>,
    pub class_id: Option<i64>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_roles() {
        assert!(is_valid_target_role("all"));
        assert!(is_valid_target_role(""));
        assert!(is_valid_target_role("parents"));
        assert!(!is_valid_target_role("teacher"));
        assert!(!is_valid_target_role("admins"));
    }
}

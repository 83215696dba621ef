//! Parent to student links.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParentStudent {
    pub id: i64,
    pub school_id: i64,
    pub parent_id: i64,
    pub student_id: i64,
    pub created_at: String,
}

/// Link with both ends named, for list views
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ParentLinkEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub link: ParentStudent,
    pub parent_name: String,
    pub parent_username: String,
    pub student_name: String,
    pub student_username: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkParentRequest {
    pub parent_id: i64,
    pub student_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct DateRangeQuery {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

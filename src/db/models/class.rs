//! Classes and their student rosters.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::UserSummary;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Class {
    pub id: i64,
    pub school_id: i64,
    pub name: String,
    pub year: String,
    pub homeroom_teacher_id: Option<i64>,
    pub starosta_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip)]
    pub deleted_at: Option<String>,
}

/// Class with the users it references resolved
#[derive(Debug, Clone, Serialize)]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: Class,
    pub homeroom_teacher: Option<UserSummary>,
    pub starosta: Option<UserSummary>,
    pub students: Vec<UserSummary>,
}

/// Class reference embedded in other payloads
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassSummary {
    pub id: i64,
    pub name: String,
    pub year: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateClassRequest {
    pub name: String,
    pub year: String,
    pub homeroom_teacher_id: Option<i64>,
    pub starosta_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateClassRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub year: String,
    pub homeroom_teacher_id: Option<i64>,
    pub starosta_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AddStudentsRequest {
    pub student_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClassListQuery {
    pub year: Option<String>,
}

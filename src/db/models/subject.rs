//! Subjects and the teachers linked to them.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::UserSummary;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subject {
    pub id: i64,
    pub school_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip)]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectWithTeachers {
    #[serde(flatten)]
    pub subject: Subject,
    pub teachers: Vec<UserSummary>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSubjectRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTeachersRequest {
    pub teacher_ids: Vec<i64>,
}

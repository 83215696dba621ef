//! Homework assignments.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Homework {
    pub id: i64,
    pub school_id: i64,
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
    pub description: String,
    pub assigned_date: String,
    pub due_date: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip)]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HomeworkEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub homework: Homework,
    pub class_name: String,
    pub subject_name: String,
    pub teacher_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateHomeworkRequest {
    pub class_id: i64,
    pub subject_id: i64,
    pub description: String,
    /// Defaults to today
    pub assigned_date: Option<String>,
    pub due_date: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateHomeworkRequest {
    pub class_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub description: Option<String>,
    pub assigned_date: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HomeworkListQuery {
    pub class_id: Option<i64>,
    pub subject_id: Option<i64>,
}

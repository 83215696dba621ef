//! Grades and averages.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const GRADE_TYPES: [&str; 5] = ["homework", "test", "exam", "oral", "final"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Grade {
    pub id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
    pub grade: i64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub grade_type: String,
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub comment: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Grade joined with student, subject and teacher names
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GradeEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub grade: Grade,
    pub student_name: String,
    pub subject_name: String,
    pub teacher_name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubjectAverage {
    pub subject_id: i64,
    pub subject_name: String,
    pub average: f64,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateGradeRequest {
    pub student_id: i64,
    pub subject_id: i64,
    pub grade: i64,
    #[serde(default)]
    pub grade_type: String,
    pub date: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGradeRequest {
    pub grade: Option<i64>,
    pub grade_type: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GradeListQuery {
    pub student_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub teacher_id: Option<i64>,
    pub grade_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AverageQuery {
    pub subject_id: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JournalQuery {
    pub subject_id: Option<i64>,
}

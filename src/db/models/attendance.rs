//! Attendance journal.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Sick,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Sick => "sick",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "sick" => Ok(AttendanceStatus::Sick),
            "excused" => Ok(AttendanceStatus::Excused),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attendance {
    pub id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub subject_id: Option<i64>,
    pub date: String,
    pub lesson_number: Option<i64>,
    pub status: AttendanceStatus,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub comment: String,
    pub marked_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip)]
    pub deleted_at: Option<String>,
}

/// Attendance row joined with display names
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AttendanceEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub attendance: Attendance,
    pub student_name: String,
    pub class_name: String,
    pub subject_name: Option<String>,
    pub marked_by_name: Option<String>,
}

/// Per-status tally for one student
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceStats {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub sick: i64,
    pub excused: i64,
}

impl AttendanceStats {
    pub fn add(&mut self, status: AttendanceStatus, count: i64) {
        match status {
            AttendanceStatus::Present => self.present += count,
            AttendanceStatus::Absent => self.absent += count,
            AttendanceStatus::Late => self.late += count,
            AttendanceStatus::Sick => self.sick += count,
            AttendanceStatus::Excused => self.excused += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.sick + self.excused
    }

    /// Share of present marks, 0 when nothing was recorded
    pub fn percentage(&self) -> f64 {
        percentage(self.present, self.total())
    }
}

pub fn percentage(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkAttendanceRequest {
    pub student_id: i64,
    pub class_id: i64,
    pub subject_id: Option<i64>,
    pub date: String,
    pub lesson_number: Option<i64>,
    pub status: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkAttendanceRequest {
    pub records: Vec<MarkAttendanceRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceListQuery {
    pub class_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub student_id: Option<i64>,
    pub date: Option<String>,
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_percentage() {
        let mut stats = AttendanceStats::default();
        assert_eq!(stats.percentage(), 0.0);
        stats.add(AttendanceStatus::Present, 3);
        stats.add(AttendanceStatus::Sick, 1);
        assert_eq!(stats.total(), 4);
        assert_eq!(stats.percentage(), 75.0);
    }

    #[test]
    fn test_status_is_case_sensitive() {
        assert_eq!("late".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Late);
        assert!("Late".parse::<AttendanceStatus>().is_err());
        assert!("missing".parse::<AttendanceStatus>().is_err());
    }
}

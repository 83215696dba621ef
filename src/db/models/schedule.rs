//! Weekly timetable.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    /// 1 for Monday through 7 for Sunday
    pub fn index(&self) -> i64 {
        *self as i64 + 1
    }
}

impl std::str::FromStr for DayOfWeek {
    type Err = String;

    /// Accepts English and Russian day names in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monday" | "понедельник" => Ok(DayOfWeek::Monday),
            "tuesday" | "вторник" => Ok(DayOfWeek::Tuesday),
            "wednesday" | "среда" => Ok(DayOfWeek::Wednesday),
            "thursday" | "четверг" => Ok(DayOfWeek::Thursday),
            "friday" | "пятница" => Ok(DayOfWeek::Friday),
            "saturday" | "суббота" => Ok(DayOfWeek::Saturday),
            "sunday" | "воскресенье" => Ok(DayOfWeek::Sunday),
            _ => Err(format!("Invalid day of week: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Schedule {
    pub id: i64,
    pub school_id: i64,
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: Option<i64>,
    pub day_of_week: String,
    #[serde(skip)]
    pub day_index: i64,
    pub lesson_number: i64,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub room_number: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip)]
    pub deleted_at: Option<String>,
}

/// Schedule row joined with class, subject and teacher names
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScheduleEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub schedule: Schedule,
    pub class_name: String,
    pub subject_name: String,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: Option<i64>,
    pub day_of_week: String,
    pub lesson_number: i64,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub room_number: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateScheduleRequest {
    pub class_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub teacher_id: Option<i64>,
    pub day_of_week: Option<String>,
    pub lesson_number: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub room_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleListQuery {
    pub class_id: Option<i64>,
    pub day_of_week: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_of_week_labels() {
        assert_eq!("Monday".parse::<DayOfWeek>().unwrap().index(), 1);
        assert_eq!("SUNDAY".parse::<DayOfWeek>().unwrap().index(), 7);
        assert_eq!("Понедельник".parse::<DayOfWeek>().unwrap(), DayOfWeek::Monday);
        assert_eq!("пятница".parse::<DayOfWeek>().unwrap(), DayOfWeek::Friday);
        assert!("Funday".parse::<DayOfWeek>().is_err());
    }
}

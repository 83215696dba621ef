//! Input validation for API requests.
//!
//! Each helper returns `Err(message)` with the text sent to the client.
//! Combine several with `ValidationErrorBuilder::check` from the `error`
//! module, or map a single one with `ApiError::bad_request`.

use chrono::{NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{AttendanceStatus, DayOfWeek, Role, GRADE_TYPES};

lazy_static! {
    /// `local@domain`, no whitespace and a single `@`
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap();

    /// Zero-padded 24h time
    static ref TIME_REGEX: Regex = Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").unwrap();
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }
    if username.chars().count() > 50 {
        return Err("Username is too long (max 50 characters)".to_string());
    }
    if username.chars().any(char::is_whitespace) {
        return Err("Username cannot contain whitespace".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

/// Register only requires a password to be present
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    Ok(())
}

/// Rule applied when a user picks a new password
pub fn validate_new_password(password: &str) -> Result<(), String> {
    if password.chars().count() < 6 {
        return Err("Password must be at least 6 characters".to_string());
    }
    Ok(())
}

pub fn parse_role(role: &str) -> Result<Role, String> {
    role.parse::<Role>().map_err(|_| "Invalid role".to_string())
}

pub fn validate_required(value: &str, message: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(message.to_string());
    }
    Ok(())
}

/// Strict `YYYY-MM-DD`
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    if value.len() != 10 {
        return Err("Invalid date format (use YYYY-MM-DD)".to_string());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| "Invalid date format (use YYYY-MM-DD)".to_string())
}

pub fn validate_date(value: &str) -> Result<(), String> {
    parse_date(value).map(|_| ())
}

/// `HH:MM`, 00:00 to 23:59
pub fn validate_time(value: &str) -> Result<(), String> {
    if !TIME_REGEX.is_match(value) {
        return Err("Invalid time format (use HH:MM)".to_string());
    }
    Ok(())
}

pub fn validate_time_range(start: &str, end: &str) -> Result<(), String> {
    validate_time(start)?;
    validate_time(end)?;
    let start = NaiveTime::parse_from_str(start, "%H:%M").map_err(|e| e.to_string())?;
    let end = NaiveTime::parse_from_str(end, "%H:%M").map_err(|e| e.to_string())?;
    if start >= end {
        return Err("Start time must be before end time".to_string());
    }
    Ok(())
}

pub fn parse_day_of_week(value: &str) -> Result<DayOfWeek, String> {
    value.parse::<DayOfWeek>().map_err(|_| {
        "Invalid day of week (use Monday..Sunday or Понедельник..Воскресенье)".to_string()
    })
}

pub fn validate_lesson_number(lesson: i64) -> Result<(), String> {
    if !(1..=10).contains(&lesson) {
        return Err("Lesson number must be between 1 and 10".to_string());
    }
    Ok(())
}

pub fn validate_grade_value(grade: i64) -> Result<(), String> {
    if !(1..=5).contains(&grade) {
        return Err("Grade must be between 1 and 5".to_string());
    }
    Ok(())
}

/// Empty means untyped
pub fn validate_grade_type(grade_type: &str) -> Result<(), String> {
    if grade_type.is_empty() || GRADE_TYPES.contains(&grade_type) {
        Ok(())
    } else {
        Err(format!("Invalid grade type (use one of: {})", GRADE_TYPES.join(", ")))
    }
}

pub fn parse_status(status: &str) -> Result<AttendanceStatus, String> {
    status.parse::<AttendanceStatus>().map_err(|_| {
        "Invalid status (use present, absent, late, sick or excused)".to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("a").is_ok());
        assert!(validate_username("ivan.petrov").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("two words").is_err());
        assert!(validate_username(&"x".repeat(51)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@x").is_ok());
        assert!(validate_email("teacher@school.example").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("a b@c").is_err());
    }

    #[test]
    fn test_passwords() {
        assert!(validate_password("p").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_new_password("secret").is_ok());
        assert!(validate_new_password("short").is_err());
    }

    #[test]
    fn test_parse_date_is_strict() {
        assert!(parse_date("2025-01-10").is_ok());
        assert!(parse_date("2025-1-10").is_err());
        assert!(parse_date("2025-02-30").is_err());
        assert!(parse_date("10.01.2025").is_err());
        assert_eq!(
            parse_date("yesterday").unwrap_err(),
            "Invalid date format (use YYYY-MM-DD)"
        );
    }

    #[test]
    fn test_time_range() {
        assert!(validate_time_range("08:30", "09:15").is_ok());
        assert!(validate_time_range("09:15", "08:30").is_err());
        assert!(validate_time_range("09:00", "09:00").is_err());
        assert!(validate_time("24:00").is_err());
        assert!(validate_time("8:30").is_err());
    }

    #[test]
    fn test_numeric_ranges() {
        assert!(validate_lesson_number(1).is_ok());
        assert!(validate_lesson_number(10).is_ok());
        assert!(validate_lesson_number(11).is_err());
        assert!(validate_grade_value(0).is_err());
        assert!(validate_grade_value(5).is_ok());
    }

    #[test]
    fn test_grade_type_and_status() {
        assert!(validate_grade_type("").is_ok());
        assert!(validate_grade_type("exam").is_ok());
        assert!(validate_grade_type("quiz").is_err());
        assert_eq!(parse_status("sick").unwrap(), AttendanceStatus::Sick);
        assert!(parse_status("gone").is_err());
        assert_eq!(parse_role("parent").unwrap(), Role::Parent);
        assert!(parse_role("janitor").is_err());
    }
}

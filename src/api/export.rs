//! CSV downloads.
//!
//! Every file starts with a UTF-8 byte order mark so spreadsheet tools
//! pick the right encoding.

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::Response,
};
use std::sync::Arc;

use crate::db::{
    self, today, AttendanceEntry, Class, DateRangeQuery, GradeEntry, Role, User,
};
use crate::AppState;

use super::analytics::report_range;
use super::attendance::{self, student_stats};
use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiPath, ApiQuery};
use super::grades::{self, subject_averages};
use super::schools::load_school;

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Minimal RFC 4180 writer
#[derive(Debug, Default)]
struct CsvWriter {
    out: String,
}

impl CsvWriter {
    fn new() -> Self {
        Self::default()
    }

    fn row(&mut self, fields: &[&str]) -> &mut Self {
        let line: Vec<String> = fields.iter().map(|f| escape(f)).collect();
        self.out.push_str(&line.join(","));
        self.out.push('\n');
        self
    }

    fn blank(&mut self) -> &mut Self {
        self.out.push('\n');
        self
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut bytes = BOM.to_vec();
        bytes.extend_from_slice(self.out.as_bytes());
        bytes
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Keep file names header-safe
fn file_stem(value: &str) -> String {
    let stem: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "export".to_string()
    } else {
        stem
    }
}

fn csv_response(filename: &str, csv: CsvWriter) -> Result<Response, ApiError> {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(csv.into_bytes()))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build response");
            ApiError::internal("Failed to build response")
        })
}

fn fmt2(value: f64) -> String {
    format!("{:.2}", value)
}

/// GET /api/export/class/:id/grades
pub async fn class_grades(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(class_id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, class_id).await?;

    let sql = format!(
        "{} JOIN class_students cs ON cs.student_id = g.student_id AND cs.class_id = ? \
         WHERE g.school_id = ? ORDER BY g.date DESC, student_name",
        grades::ENTRY_SELECT
    );
    let rows = sqlx::query_as::<_, GradeEntry>(&sql)
        .bind(class.id)
        .bind(ctx.school_id)
        .fetch_all(&state.db)
        .await?;

    let mut csv = CsvWriter::new();
    csv.row(&["Date", "Student", "Subject", "Grade", "Type", "Teacher", "Comment"]);
    for row in &rows {
        csv.row(&[
            row.grade.date.as_str(),
            &row.student_name,
            &row.subject_name,
            &row.grade.grade.to_string(),
            &row.grade.grade_type,
            &row.teacher_name,
            &row.grade.comment,
        ]);
    }

    csv_response(&format!("grades_class_{}.csv", file_stem(&class.name)), csv)
}

/// GET /api/export/class/:id/attendance
pub async fn class_attendance(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(class_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<DateRangeQuery>,
) -> Result<Response, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, class_id).await?;
    let (date_from, date_to) = report_range(query.date_from, query.date_to)?;

    let sql = format!(
        "{} WHERE a.class_id = ? AND a.school_id = ? AND a.deleted_at IS NULL \
         AND a.date >= ? AND a.date <= ? ORDER BY a.date DESC, student_name",
        attendance::ENTRY_SELECT
    );
    let rows = sqlx::query_as::<_, AttendanceEntry>(&sql)
        .bind(class.id)
        .bind(ctx.school_id)
        .bind(&date_from)
        .bind(&date_to)
        .fetch_all(&state.db)
        .await?;

    let mut csv = CsvWriter::new();
    csv.row(&["Date", "Student", "Subject", "Status", "Marked by", "Comment"]);
    for row in &rows {
        csv.row(&[
            row.attendance.date.as_str(),
            &row.student_name,
            row.subject_name.as_deref().unwrap_or(""),
            row.attendance.status.as_str(),
            row.marked_by_name.as_deref().unwrap_or(""),
            &row.attendance.comment,
        ]);
    }

    csv_response(&format!("attendance_class_{}.csv", file_stem(&class.name)), csv)
}

/// GET /api/export/student/:id/report
pub async fn student_report(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(student_id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let student: User = ctx
        .tenant()
        .user_with_role(&state.db, student_id, &[Role::Student, Role::Starosta])
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;

    let grades_sql = format!(
        "{} WHERE g.student_id = ? AND g.school_id = ? ORDER BY g.date DESC LIMIT 100",
        grades::ENTRY_SELECT
    );
    let grade_rows = sqlx::query_as::<_, GradeEntry>(&grades_sql)
        .bind(student.id)
        .bind(ctx.school_id)
        .fetch_all(&state.db)
        .await?;
    let averages = subject_averages(&state.db, ctx.school_id, student.id).await?;

    let attendance_sql = format!(
        "{} WHERE a.student_id = ? AND a.school_id = ? AND a.deleted_at IS NULL \
         ORDER BY a.date DESC LIMIT 100",
        attendance::ENTRY_SELECT
    );
    let attendance_rows = sqlx::query_as::<_, AttendanceEntry>(&attendance_sql)
        .bind(student.id)
        .bind(ctx.school_id)
        .fetch_all(&state.db)
        .await?;
    let stats = student_stats(&state.db, ctx.school_id, student.id, None, None).await?;

    let mut csv = CsvWriter::new();
    csv.row(&["STUDENT REPORT"]);
    let name = format!("{} {}", student.full_name(), student.middle_name);
    csv.row(&["Name", name.trim()]);
    csv.blank();

    csv.row(&["GRADES"]);
    csv.row(&["Date", "Subject", "Grade", "Type", "Teacher"]);
    for row in &grade_rows {
        csv.row(&[
            row.grade.date.as_str(),
            &row.subject_name,
            &row.grade.grade.to_string(),
            &row.grade.grade_type,
            &row.teacher_name,
        ]);
    }
    csv.blank();

    csv.row(&["SUBJECT AVERAGES"]);
    csv.row(&["Subject", "Average", "Grades"]);
    for avg in &averages {
        csv.row(&[
            avg.subject_name.as_str(),
            &fmt2(avg.average),
            &avg.count.to_string(),
        ]);
    }
    csv.blank();

    csv.row(&["ATTENDANCE (last 100 records)"]);
    csv.row(&["Date", "Subject", "Status"]);
    for row in &attendance_rows {
        csv.row(&[
            row.attendance.date.as_str(),
            row.subject_name.as_deref().unwrap_or(""),
            row.attendance.status.as_str(),
        ]);
    }
    csv.blank();

    csv.row(&["ATTENDANCE STATISTICS"]);
    csv.row(&["Total", &stats.total().to_string()]);
    csv.row(&["Present", &stats.present.to_string()]);
    csv.row(&["Absent", &stats.absent.to_string()]);
    csv.row(&["Late", &stats.late.to_string()]);
    csv.row(&["Sick", &stats.sick.to_string()]);
    csv.row(&["Excused", &stats.excused.to_string()]);
    csv.row(&["Attendance %", &format!("{}%", fmt2(stats.percentage()))]);

    let filename = format!(
        "report_student_{}_{}.csv",
        file_stem(&student.last_name),
        file_stem(&student.first_name)
    );
    csv_response(&filename, csv)
}

/// GET /api/export/school/report
pub async fn school_report(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Response, ApiError> {
    let school = load_school(&state.db, ctx.school_id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;
    let totals = db::school_totals(&state.db, ctx.school_id).await?;
    let classes = db::compare_classes(&state.db, ctx.school_id).await?;
    let date = today();

    let mut csv = CsvWriter::new();
    csv.row(&["SCHOOL REPORT"]);
    csv.row(&["School", school.name.as_str()]);
    csv.row(&["Report date", date.as_str()]);
    csv.blank();

    csv.row(&["TOTALS"]);
    csv.row(&["Students", &totals.total_students.to_string()]);
    csv.row(&["Teachers", &totals.total_teachers.to_string()]);
    csv.row(&["Classes", &totals.total_classes.to_string()]);
    csv.blank();

    csv.row(&["CLASSES"]);
    csv.row(&["Class", "Students", "Average grade", "Attendance %"]);
    for class in &classes {
        csv.row(&[
            class.class_name.as_str(),
            &class.students_count.to_string(),
            &fmt2(class.average_grade),
            &fmt2(class.attendance_percent),
        ]);
    }

    csv_response(&format!("school_report_{}.csv", date), csv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_quotes_only_when_needed() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_output_starts_with_bom() {
        let mut csv = CsvWriter::new();
        csv.row(&["Date", "Student"]).row(&["2025-01-10", "Lee Ann"]);
        let bytes = csv.into_bytes();
        assert_eq!(&bytes[..3], BOM);
        assert_eq!(
            std::str::from_utf8(&bytes[3..]).unwrap(),
            "Date,Student\n2025-01-10,Lee Ann\n"
        );
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("5A"), "5A");
        assert_eq!(file_stem("5 А"), "5__");
        assert_eq!(file_stem(""), "export");
    }
}

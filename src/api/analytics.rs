//! Read-only rollups for dashboards.

use axum::{extract::State, Json};
use chrono::{Months, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{self, Class, ReportFilter, Role, Subject, UserSummary};
use crate::AppState;

use super::auth::AuthContext;
use super::error::ApiError;
use super::extract::{ApiPath, ApiQuery};
use super::validation::parse_date;

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub class_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/// Resolve an optional date range, defaulting to the last month
pub(crate) fn report_range(
    date_from: Option<String>,
    date_to: Option<String>,
) -> Result<(String, String), ApiError> {
    let today = Utc::now().date_naive();
    let month_ago = today.checked_sub_months(Months::new(1)).unwrap_or(today);

    let from = match date_from.filter(|d| !d.is_empty()) {
        Some(d) => parse_date(&d).map_err(ApiError::bad_request)?,
        None => month_ago,
    };
    let to = match date_to.filter(|d| !d.is_empty()) {
        Some(d) => parse_date(&d).map_err(ApiError::bad_request)?,
        None => today,
    };
    Ok((
        from.format("%Y-%m-%d").to_string(),
        to.format("%Y-%m-%d").to_string(),
    ))
}

/// GET /api/analytics/school
pub async fn school_stats(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let stats = db::school_totals(&state.db, ctx.school_id).await?;
    Ok(Json(json!({ "stats": stats })))
}

/// GET /api/analytics/class/:id
pub async fn class_stats(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let class: Class = ctx.tenant().find(&state.db, id).await?;
    let stats = db::class_stats(&state.db, class.id).await?;

    Ok(Json(json!({
        "class": class,
        "total_students": stats.total_students,
        "average_grade": stats.average_grade,
        "attendance_percentage": stats.attendance_percentage,
        "lessons_per_week": stats.lessons_per_week,
    })))
}

/// GET /api/analytics/teacher/:id
pub async fn teacher_stats(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let teacher = ctx
        .tenant()
        .user_with_role(&state.db, id, &[Role::Teacher])
        .await?
        .ok_or_else(|| ApiError::not_found("Teacher not found"))?;
    let stats = db::teacher_stats(&state.db, ctx.school_id, teacher.id).await?;

    Ok(Json(json!({
        "teacher": UserSummary::from(teacher),
        "lessons_count": stats.lessons_count,
        "classes_count": stats.classes_count,
        "subjects": stats.subjects,
        "average_grade": stats.average_grade,
        "total_grades": stats.total_grades,
        "homework_count": stats.homework_count,
    })))
}

/// GET /api/analytics/subject/:id
pub async fn subject_stats(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let subject: Subject = ctx.tenant().find(&state.db, id).await?;
    let stats = db::subject_stats(&state.db, ctx.school_id, subject.id).await?;

    Ok(Json(json!({
        "subject": subject,
        "average_grade": stats.average_grade,
        "total_grades": stats.total_grades,
        "grade_distribution": stats.grade_distribution,
        "lessons_count": stats.lessons_count,
    })))
}

/// GET /api/analytics/attendance-report
pub async fn attendance_report(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<ReportQuery>,
) -> Result<Json<Value>, ApiError> {
    let (date_from, date_to) = report_range(query.date_from, query.date_to)?;
    let filter = ReportFilter {
        class_id: query.class_id,
        subject_id: None,
        date_from,
        date_to,
    };
    let report = db::attendance_report(&state.db, ctx.school_id, &filter).await?;

    Ok(Json(json!({
        "date_from": filter.date_from,
        "date_to": filter.date_to,
        "report": report,
    })))
}

/// GET /api/analytics/grades-report
pub async fn grades_report(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(query): ApiQuery<ReportQuery>,
) -> Result<Json<Value>, ApiError> {
    let (date_from, date_to) = report_range(query.date_from, query.date_to)?;
    let filter = ReportFilter {
        class_id: query.class_id,
        subject_id: query.subject_id,
        date_from,
        date_to,
    };
    let report = db::grades_report(&state.db, ctx.school_id, &filter).await?;

    Ok(Json(json!({
        "date_from": filter.date_from,
        "date_to": filter.date_to,
        "report": report,
    })))
}

/// GET /api/analytics/compare-classes
pub async fn compare_classes(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let comparisons = db::compare_classes(&state.db, ctx.school_id).await?;
    Ok(Json(json!({ "comparisons": comparisons })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_range_defaults_to_last_month() {
        let (from, to) = report_range(None, None).unwrap();
        assert!(from < to);
        assert_eq!(to, db::today());
    }

    #[test]
    fn test_report_range_rejects_bad_dates() {
        let (from, to) =
            report_range(Some("2025-01-01".into()), Some("2025-01-31".into())).unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("2025-01-01", "2025-01-31"));
        assert!(report_range(Some("01/02/2025".into()), None).is_err());
    }
}

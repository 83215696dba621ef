//! Read-only rollups behind the analytics and export endpoints.
//!
//! Every query is scoped by school, either directly or through the class
//! or student it joins on.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::{percentage, Subject};

/// Headline counts for one school
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct SchoolTotals {
    pub total_classes: i64,
    pub total_students: i64,
    pub total_teachers: i64,
    pub total_subjects: i64,
    pub total_schedules: i64,
    pub total_grades: i64,
    pub total_homework: i64,
}

/// Record counts shown on the system settings page
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemTotals {
    pub total_users: i64,
    pub total_classes: i64,
    pub total_subjects: i64,
    pub total_schedules: i64,
    pub total_grades: i64,
    pub total_attendance: i64,
    pub total_homework: i64,
    pub total_announcements: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClassComparison {
    pub class_id: i64,
    pub class_name: String,
    pub students_count: i64,
    pub average_grade: f64,
    pub attendance_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceReportRow {
    pub student_id: i64,
    pub student_name: String,
    pub class_name: String,
    pub total: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub sick: i64,
    pub excused: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GradesReportRow {
    pub student_id: i64,
    pub student_name: String,
    pub class_name: String,
    pub subject_name: String,
    pub average: f64,
    pub count: i64,
    pub grade_5: i64,
    pub grade_4: i64,
    pub grade_3: i64,
    pub grade_2: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct GradeDistribution {
    pub grade_5: i64,
    pub grade_4: i64,
    pub grade_3: i64,
    pub grade_2: i64,
    pub grade_1: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStats {
    pub total_students: i64,
    pub average_grade: f64,
    pub attendance_percentage: f64,
    pub lessons_per_week: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeacherStats {
    pub lessons_count: i64,
    pub classes_count: i64,
    pub subjects: Vec<Subject>,
    pub average_grade: f64,
    pub total_grades: i64,
    pub homework_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectStats {
    pub average_grade: f64,
    pub total_grades: i64,
    pub grade_distribution: GradeDistribution,
    pub lessons_count: i64,
}

/// Filters shared by the date-ranged reports
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub class_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub date_from: String,
    pub date_to: String,
}

const STUDENT_NAME: &str = "TRIM(u.last_name || ' ' || u.first_name)";

pub async fn school_totals(db: &SqlitePool, school_id: i64) -> Result<SchoolTotals, sqlx::Error> {
    sqlx::query_as::<_, SchoolTotals>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM classes WHERE school_id = ?1 AND deleted_at IS NULL) AS total_classes,
            (SELECT COUNT(*) FROM users WHERE school_id = ?1 AND deleted_at IS NULL
                AND role IN ('student', 'starosta')) AS total_students,
            (SELECT COUNT(*) FROM users WHERE school_id = ?1 AND deleted_at IS NULL
                AND role = 'teacher') AS total_teachers,
            (SELECT COUNT(*) FROM subjects WHERE school_id = ?1 AND deleted_at IS NULL) AS total_subjects,
            (SELECT COUNT(*) FROM schedules WHERE school_id = ?1 AND deleted_at IS NULL) AS total_schedules,
            (SELECT COUNT(*) FROM grades WHERE school_id = ?1) AS total_grades,
            (SELECT COUNT(*) FROM homework WHERE school_id = ?1 AND deleted_at IS NULL) AS total_homework
        "#,
    )
    .bind(school_id)
    .fetch_one(db)
    .await
}

pub async fn system_totals(db: &SqlitePool, school_id: i64) -> Result<SystemTotals, sqlx::Error> {
    sqlx::query_as::<_, SystemTotals>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM users WHERE school_id = ?1 AND deleted_at IS NULL) AS total_users,
            (SELECT COUNT(*) FROM classes WHERE school_id = ?1 AND deleted_at IS NULL) AS total_classes,
            (SELECT COUNT(*) FROM subjects WHERE school_id = ?1 AND deleted_at IS NULL) AS total_subjects,
            (SELECT COUNT(*) FROM schedules WHERE school_id = ?1 AND deleted_at IS NULL) AS total_schedules,
            (SELECT COUNT(*) FROM grades WHERE school_id = ?1) AS total_grades,
            (SELECT COUNT(*) FROM attendance WHERE school_id = ?1 AND deleted_at IS NULL) AS total_attendance,
            (SELECT COUNT(*) FROM homework WHERE school_id = ?1 AND deleted_at IS NULL) AS total_homework,
            (SELECT COUNT(*) FROM announcements WHERE school_id = ?1) AS total_announcements
        "#,
    )
    .bind(school_id)
    .fetch_one(db)
    .await
}

/// Mean grade of everyone on a class roster, 0 without grades
pub async fn class_average_grade(db: &SqlitePool, class_id: i64) -> Result<f64, sqlx::Error> {
    let (avg,): (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG(g.grade) FROM grades g
        JOIN class_students cs ON cs.student_id = g.student_id
        JOIN classes c ON c.id = cs.class_id
        WHERE cs.class_id = ? AND g.school_id = c.school_id
        "#,
    )
    .bind(class_id)
    .fetch_one(db)
    .await?;
    Ok(avg.unwrap_or(0.0))
}

pub async fn class_stats(db: &SqlitePool, class_id: i64) -> Result<ClassStats, sqlx::Error> {
    let (total_students,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM class_students cs
        JOIN users u ON u.id = cs.student_id AND u.deleted_at IS NULL
        WHERE cs.class_id = ?
        "#,
    )
    .bind(class_id)
    .fetch_one(db)
    .await?;

    let (present, total): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(CASE WHEN status = 'present' THEN 1 ELSE 0 END), 0), COUNT(*)
        FROM attendance WHERE class_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(class_id)
    .fetch_one(db)
    .await?;

    let (lessons_per_week,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM schedules WHERE class_id = ? AND deleted_at IS NULL",
    )
    .bind(class_id)
    .fetch_one(db)
    .await?;

    Ok(ClassStats {
        total_students,
        average_grade: class_average_grade(db, class_id).await?,
        attendance_percentage: percentage(present, total),
        lessons_per_week,
    })
}

pub async fn teacher_stats(
    db: &SqlitePool,
    school_id: i64,
    teacher_id: i64,
) -> Result<TeacherStats, sqlx::Error> {
    let (lessons_count, classes_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COUNT(DISTINCT class_id) FROM schedules
        WHERE school_id = ? AND teacher_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(school_id)
    .bind(teacher_id)
    .fetch_one(db)
    .await?;

    let subjects = sqlx::query_as::<_, Subject>(
        r#"
        SELECT s.* FROM subjects s
        JOIN teachers_subjects ts ON ts.subject_id = s.id
        WHERE ts.user_id = ? AND s.school_id = ? AND s.deleted_at IS NULL
        ORDER BY s.name
        "#,
    )
    .bind(teacher_id)
    .bind(school_id)
    .fetch_all(db)
    .await?;

    let (average_grade, total_grades): (Option<f64>, i64) = sqlx::query_as(
        "SELECT AVG(grade), COUNT(*) FROM grades WHERE school_id = ? AND teacher_id = ?",
    )
    .bind(school_id)
    .bind(teacher_id)
    .fetch_one(db)
    .await?;

    let (homework_count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM homework
        WHERE school_id = ? AND teacher_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(school_id)
    .bind(teacher_id)
    .fetch_one(db)
    .await?;

    Ok(TeacherStats {
        lessons_count,
        classes_count,
        subjects,
        average_grade: average_grade.unwrap_or(0.0),
        total_grades,
        homework_count,
    })
}

pub async fn subject_stats(
    db: &SqlitePool,
    school_id: i64,
    subject_id: i64,
) -> Result<SubjectStats, sqlx::Error> {
    let (average_grade, total_grades): (Option<f64>, i64) = sqlx::query_as(
        "SELECT AVG(grade), COUNT(*) FROM grades WHERE school_id = ? AND subject_id = ?",
    )
    .bind(school_id)
    .bind(subject_id)
    .fetch_one(db)
    .await?;

    let grade_distribution = sqlx::query_as::<_, GradeDistribution>(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN grade = 5 THEN 1 ELSE 0 END), 0) AS grade_5,
            COALESCE(SUM(CASE WHEN grade = 4 THEN 1 ELSE 0 END), 0) AS grade_4,
            COALESCE(SUM(CASE WHEN grade = 3 THEN 1 ELSE 0 END), 0) AS grade_3,
            COALESCE(SUM(CASE WHEN grade = 2 THEN 1 ELSE 0 END), 0) AS grade_2,
            COALESCE(SUM(CASE WHEN grade = 1 THEN 1 ELSE 0 END), 0) AS grade_1
        FROM grades WHERE school_id = ? AND subject_id = ?
        "#,
    )
    .bind(school_id)
    .bind(subject_id)
    .fetch_one(db)
    .await?;

    let (lessons_count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM schedules
        WHERE school_id = ? AND subject_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(school_id)
    .bind(subject_id)
    .fetch_one(db)
    .await?;

    Ok(SubjectStats {
        average_grade: average_grade.unwrap_or(0.0),
        total_grades,
        grade_distribution,
        lessons_count,
    })
}

pub async fn compare_classes(
    db: &SqlitePool,
    school_id: i64,
) -> Result<Vec<ClassComparison>, sqlx::Error> {
    sqlx::query_as::<_, ClassComparison>(
        r#"
        SELECT
            c.id AS class_id,
            c.name AS class_name,
            (SELECT COUNT(*) FROM class_students cs
                JOIN users u ON u.id = cs.student_id AND u.deleted_at IS NULL
                WHERE cs.class_id = c.id) AS students_count,
            COALESCE((SELECT AVG(g.grade) FROM grades g
                JOIN class_students cs ON cs.student_id = g.student_id
                WHERE cs.class_id = c.id AND g.school_id = c.school_id), 0.0) AS average_grade,
            COALESCE((SELECT SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END) * 100.0 / COUNT(*)
                FROM attendance a
                WHERE a.class_id = c.id AND a.deleted_at IS NULL), 0.0) AS attendance_percent
        FROM classes c
        WHERE c.school_id = ? AND c.deleted_at IS NULL
        ORDER BY c.name
        "#,
    )
    .bind(school_id)
    .fetch_all(db)
    .await
}

pub async fn attendance_report(
    db: &SqlitePool,
    school_id: i64,
    filter: &ReportFilter,
) -> Result<Vec<AttendanceReportRow>, sqlx::Error> {
    let mut filters = crate::db::Filters::new();
    filters
        .push("c.school_id = ?", school_id)
        .raw("a.deleted_at IS NULL")
        .push("a.date >= ?", filter.date_from.as_str())
        .push("a.date <= ?", filter.date_to.as_str())
        .push_opt("a.class_id = ?", filter.class_id)
        .push_opt("a.subject_id = ?", filter.subject_id);

    let sql = format!(
        r#"
        SELECT
            u.id AS student_id,
            {name} AS student_name,
            c.name AS class_name,
            COUNT(a.id) AS total,
            SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END) AS present,
            SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END) AS absent,
            SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END) AS late,
            SUM(CASE WHEN a.status = 'sick' THEN 1 ELSE 0 END) AS sick,
            SUM(CASE WHEN a.status = 'excused' THEN 1 ELSE 0 END) AS excused,
            SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END) * 100.0 / COUNT(a.id) AS percentage
        FROM attendance a
        JOIN users u ON u.id = a.student_id
        JOIN classes c ON c.id = a.class_id
        {where_clause}
        GROUP BY u.id, c.id
        ORDER BY percentage DESC, student_name
        "#,
        name = STUDENT_NAME,
        where_clause = filters.where_clause()
    );

    filters
        .bind(sqlx::query_as::<_, AttendanceReportRow>(&sql))
        .fetch_all(db)
        .await
}

pub async fn grades_report(
    db: &SqlitePool,
    school_id: i64,
    filter: &ReportFilter,
) -> Result<Vec<GradesReportRow>, sqlx::Error> {
    let mut filters = crate::db::Filters::new();
    filters
        .push("g.school_id = ?", school_id)
        .push("g.date >= ?", filter.date_from.as_str())
        .push("g.date <= ?", filter.date_to.as_str())
        .push_opt(
            "g.student_id IN (SELECT student_id FROM class_students WHERE class_id = ?)",
            filter.class_id,
        )
        .push_opt("g.subject_id = ?", filter.subject_id);

    let sql = format!(
        r#"
        SELECT
            u.id AS student_id,
            {name} AS student_name,
            COALESCE((SELECT c.name FROM classes c
                JOIN class_students cs ON cs.class_id = c.id
                WHERE cs.student_id = u.id AND c.deleted_at IS NULL
                ORDER BY c.id LIMIT 1), '') AS class_name,
            s.name AS subject_name,
            AVG(g.grade) AS average,
            COUNT(g.id) AS count,
            SUM(CASE WHEN g.grade = 5 THEN 1 ELSE 0 END) AS grade_5,
            SUM(CASE WHEN g.grade = 4 THEN 1 ELSE 0 END) AS grade_4,
            SUM(CASE WHEN g.grade = 3 THEN 1 ELSE 0 END) AS grade_3,
            SUM(CASE WHEN g.grade = 2 THEN 1 ELSE 0 END) AS grade_2
        FROM grades g
        JOIN users u ON u.id = g.student_id
        JOIN subjects s ON s.id = g.subject_id
        {where_clause}
        GROUP BY u.id, s.id
        ORDER BY average DESC, student_name
        "#,
        name = STUDENT_NAME,
        where_clause = filters.where_clause()
    );

    filters
        .bind(sqlx::query_as::<_, GradesReportRow>(&sql))
        .fetch_all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn seed(db: &SqlitePool) {
        sqlx::query(
            r#"
            INSERT INTO schools (name) VALUES ('S1'), ('S2');
            INSERT INTO users (school_id, username, email, password_hash, role, first_name, last_name) VALUES
                (1, 't', 't@x', 'h', 'teacher', 'Tom', 'Teach'),
                (1, 'ann', 'ann@x', 'h', 'student', 'Ann', 'Lee'),
                (1, 'bob', 'bob@x', 'h', 'starosta', 'Bob', 'Ray'),
                (2, 'eve', 'eve@x', 'h', 'student', 'Eve', 'Far');
            INSERT INTO classes (school_id, name, year) VALUES (1, '5A', '2025'), (2, '9B', '2025');
            INSERT INTO class_students (class_id, student_id) VALUES (1, 2), (1, 3), (2, 4);
            INSERT INTO subjects (school_id, name) VALUES (1, 'Math'), (2, 'Math');
            INSERT INTO teachers_subjects (user_id, subject_id) VALUES (1, 1);
            INSERT INTO grades (school_id, student_id, subject_id, teacher_id, grade, date) VALUES
                (1, 2, 1, 1, 5, '2025-01-10'),
                (1, 3, 1, 1, 3, '2025-01-11'),
                (2, 4, 2, 1, 1, '2025-01-11');
            INSERT INTO attendance (school_id, student_id, class_id, date, status) VALUES
                (1, 2, 1, '2025-01-10', 'present'),
                (1, 3, 1, '2025-01-10', 'absent'),
                (1, 2, 1, '2025-01-11', 'present');
            "#,
        )
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_school_totals_are_scoped() {
        let db = test_pool().await;
        seed(&db).await;

        let totals = school_totals(&db, 1).await.unwrap();
        assert_eq!(totals.total_students, 2);
        assert_eq!(totals.total_teachers, 1);
        assert_eq!(totals.total_grades, 2);
        assert_eq!(totals.total_classes, 1);
    }

    #[tokio::test]
    async fn test_class_stats_and_comparison() {
        let db = test_pool().await;
        seed(&db).await;

        let stats = class_stats(&db, 1).await.unwrap();
        assert_eq!(stats.total_students, 2);
        assert_eq!(stats.average_grade, 4.0);
        assert!((stats.attendance_percentage - 66.666).abs() < 0.01);

        let rows = compare_classes(&db, 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].class_name, "5A");
        assert_eq!(rows[0].students_count, 2);
    }

    #[tokio::test]
    async fn test_reports_order_and_distribution() {
        let db = test_pool().await;
        seed(&db).await;
        let filter = ReportFilter {
            date_from: "2025-01-01".into(),
            date_to: "2025-01-31".into(),
            ..ReportFilter::default()
        };

        let attendance = attendance_report(&db, 1, &filter).await.unwrap();
        assert_eq!(attendance.len(), 2);
        assert_eq!(attendance[0].student_name, "Lee Ann");
        assert_eq!(attendance[0].percentage, 100.0);
        assert_eq!(attendance[1].absent, 1);

        let grades = grades_report(&db, 1, &filter).await.unwrap();
        assert_eq!(grades.len(), 2);
        assert_eq!(grades[0].grade_5, 1);
        assert_eq!(grades[0].class_name, "5A");

        let dist = subject_stats(&db, 1, 1).await.unwrap();
        assert_eq!(dist.total_grades, 2);
        assert_eq!(
            dist.grade_distribution,
            GradeDistribution { grade_5: 1, grade_3: 1, ..Default::default() }
        );
    }
}

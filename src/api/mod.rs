pub mod access;
mod analytics;
mod announcements;
mod attendance;
mod audit;
pub mod auth;
mod classes;
pub mod error;
mod export;
mod extract;
mod grades;
mod homework;
mod parent_links;
mod parents;
mod schedules;
mod schools;
mod settings;
mod subjects;
pub mod tenancy;
mod users;
mod validation;

#[cfg(test)]
mod tests;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/schools", post(schools::create_school));

    // Any authenticated caller
    let member_routes = Router::new()
        .route("/auth/me", get(auth::me))
        // Users
        .route("/users", get(users::list_users))
        .route("/users/:id", get(users::get_user).put(users::update_user))
        .route("/users/:id/password", put(users::change_password))
        // Classes
        .route("/classes", get(classes::list_classes))
        .route("/classes/:id", get(classes::get_class))
        // Subjects
        .route("/subjects", get(subjects::list_subjects))
        .route("/subjects/:id", get(subjects::get_subject))
        // Schedules
        .route("/schedules", get(schedules::list_schedules))
        .route("/schedules/:id", get(schedules::get_schedule))
        .route("/schedules/class/:id", get(schedules::get_class_schedule))
        // Attendance
        .route("/attendance", get(attendance::list_attendance))
        .route(
            "/attendance/student/:id/stats",
            get(attendance::student_attendance_stats),
        )
        // Grades
        .route("/grades", get(grades::list_grades))
        .route("/grades/:id", get(grades::get_grade))
        .route("/grades/student/:id/average", get(grades::student_average))
        .route("/grades/class/:id/journal", get(grades::class_journal))
        // Homework
        .route("/homework", get(homework::list_homework))
        .route("/homework/:id", get(homework::get_homework))
        .route("/homework/class/:id/upcoming", get(homework::upcoming_homework))
        .route("/homework/class/:id/overdue", get(homework::overdue_homework))
        // Announcements
        .route("/announcements", get(announcements::list_announcements))
        .route("/announcements/my", get(announcements::my_announcements))
        .route(
            "/announcements/class/:id",
            get(announcements::class_announcements),
        )
        .route("/announcements/:id", get(announcements::get_announcement))
        // Analytics
        .route("/analytics/school", get(analytics::school_stats))
        .route("/analytics/class/:id", get(analytics::class_stats))
        .route("/analytics/teacher/:id", get(analytics::teacher_stats))
        .route("/analytics/subject/:id", get(analytics::subject_stats))
        .route("/analytics/attendance-report", get(analytics::attendance_report))
        .route("/analytics/grades-report", get(analytics::grades_report))
        .route("/analytics/compare-classes", get(analytics::compare_classes))
        // Export
        .route("/export/class/:id/grades", get(export::class_grades))
        .route("/export/class/:id/attendance", get(export::class_attendance))
        .route("/export/student/:id/report", get(export::student_report))
        .route("/export/school/report", get(export::school_report))
        // Parents (child endpoints check the link in the handler)
        .route("/parents/children", get(parents::my_children))
        .route("/parents/child/:id/grades", get(parents::child_grades))
        .route("/parents/child/:id/attendance", get(parents::child_attendance))
        .route("/parents/child/:id/homework", get(parents::child_homework))
        // Parent-student links
        .route("/parent-student-links", get(parent_links::list))
        .route(
            "/parent-student-links/parent/:parent_id/students",
            get(parent_links::students_of_parent),
        )
        .route(
            "/parent-student-links/student/:student_id/parents",
            get(parent_links::parents_of_student),
        )
        // Settings
        .route("/settings/school", get(settings::get_school_settings))
        .route("/settings/system", get(settings::system_info));

    let attendance_routes = Router::new()
        .route("/attendance", post(attendance::mark_attendance))
        .route("/attendance/bulk", post(attendance::bulk_mark_attendance))
        .route_layer(middleware::from_fn_with_state(
            access::ATTENDANCE_MARKERS,
            access::require_role,
        ));

    // Admin and teacher; ownership is checked in the handlers
    let staff_routes = Router::new()
        .route("/schedules", post(schedules::create_schedule))
        .route("/schedules/:id", put(schedules::update_schedule))
        .route("/grades", post(grades::create_grade))
        .route(
            "/grades/:id",
            put(grades::update_grade).delete(grades::delete_grade),
        )
        .route("/homework", post(homework::create_homework))
        .route(
            "/homework/:id",
            put(homework::update_homework).delete(homework::delete_homework),
        )
        .route("/announcements", post(announcements::create_announcement))
        .route(
            "/announcements/:id",
            put(announcements::update_announcement).delete(announcements::delete_announcement),
        )
        .route_layer(middleware::from_fn_with_state(
            access::STAFF,
            access::require_role,
        ));

    let admin_routes = Router::new()
        // Schools
        .route("/schools", get(schools::list_schools))
        .route(
            "/schools/:id",
            get(schools::get_school).put(schools::update_school),
        )
        // Users
        .route("/users", post(users::create_user))
        .route("/users/:id", delete(users::delete_user))
        // Classes
        .route("/classes", post(classes::create_class))
        .route(
            "/classes/:id",
            put(classes::update_class).delete(classes::delete_class),
        )
        .route("/classes/:id/students", post(classes::add_students))
        .route(
            "/classes/:id/students/:student_id",
            delete(classes::remove_student),
        )
        // Subjects
        .route("/subjects", post(subjects::create_subject))
        .route(
            "/subjects/:id",
            put(subjects::update_subject).delete(subjects::delete_subject),
        )
        .route("/subjects/:id/teachers", post(subjects::assign_teachers))
        .route(
            "/subjects/:id/teachers/:teacher_id",
            delete(subjects::remove_teacher),
        )
        .route("/schedules/:id", delete(schedules::delete_schedule))
        .route("/attendance/:id", delete(attendance::delete_attendance))
        // Parents
        .route("/parents/link", post(parents::link_parent))
        .route(
            "/parents/:id/students/:student_id",
            delete(parents::unlink_parent),
        )
        .route("/parents/:id/children", get(parents::parent_children))
        .route("/parents/students/:id/parents", get(parents::student_parents))
        .route("/parent-student-links", post(parent_links::create))
        .route("/parent-student-links/:id", delete(parent_links::delete))
        // Settings
        .route("/settings/school", put(settings::update_school_settings))
        .route("/settings/backup", get(settings::backup))
        .route("/settings/audit", get(settings::audit_log))
        .route_layer(middleware::from_fn_with_state(
            access::ADMIN,
            access::require_role,
        ));

    // Protected API routes
    let protected_routes = member_routes
        .merge(attendance_routes)
        .merge(staff_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api", public_routes.merge(protected_routes));

    let static_dir = &state.config.server.static_dir;
    if static_dir.is_dir() {
        let index = if state.config.server.demo_mode {
            static_dir.join("demo.html")
        } else {
            static_dir.join("index.html")
        };
        router = router
            .route_service("/", ServeFile::new(&index))
            .fallback_service(ServeDir::new(static_dir).not_found_service(ServeFile::new(&index)));
    }

    router
        .layer(middleware::from_fn(preflight))
        .layer(cors)
        .layer(middleware::from_fn(preflight_status))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// OPTIONS never reaches the auth gate
async fn preflight(request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(request).await
}

/// CorsLayer answers real preflights itself with 200; normalise to 204
async fn preflight_status(request: Request<Body>, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options && response.status().is_success() {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

//! Router-level tests over an in-memory database.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::config::Config;
use crate::db;
use crate::AppState;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
}

struct Reply {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    bytes: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }
}

impl TestApp {
    async fn new() -> Self {
        let state = Arc::new(AppState::new(Config::default(), db::test_pool().await));
        Self {
            router: super::create_router(state.clone()),
            state,
        }
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        Reply {
            status,
            headers,
            bytes,
        }
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let reply = self.send(method, uri, token, body).await;
        (reply.status, reply.json())
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, uri, Some(token), Some(body)).await
    }

    async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, Some(token), None).await
    }

    /// New school plus its first admin; returns (school_id, admin_id, token)
    async fn bootstrap(&self, name: &str, admin: &str) -> (i64, i64, String) {
        let (status, body) = self.post("/api/schools", None, json!({ "name": name })).await;
        assert_eq!(status, StatusCode::CREATED);
        let school_id = body["school"]["id"].as_i64().unwrap();

        let (status, body) = self
            .post(
                "/api/auth/register",
                None,
                json!({
                    "school_id": school_id,
                    "username": admin,
                    "email": format!("{}@x", admin),
                    "password": "p",
                    "role": "admin",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            school_id,
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    /// Admin creates an account, which then logs in; returns (user_id, token)
    async fn member(&self, admin_token: &str, username: &str, role: &str) -> (i64, String) {
        let (status, body) = self
            .post(
                "/api/users",
                Some(admin_token),
                json!({
                    "username": username,
                    "email": format!("{}@school.test", username),
                    "password": "secret1",
                    "role": role,
                    "first_name": username,
                    "last_name": "Test",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let id = body["user"]["id"].as_i64().unwrap();

        let (status, body) = self
            .post(
                "/api/auth/login",
                None,
                json!({ "username": username, "password": "secret1" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        (id, body["token"].as_str().unwrap().to_string())
    }

    async fn class(&self, admin_token: &str, name: &str) -> i64 {
        let (status, body) = self
            .post("/api/classes", Some(admin_token), json!({ "name": name, "year": "2025" }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["class"]["id"].as_i64().unwrap()
    }

    async fn subject(&self, admin_token: &str, name: &str) -> i64 {
        let (status, body) = self
            .post("/api/subjects", Some(admin_token), json!({ "name": name }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["subject"]["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_health_and_preflight() {
    let app = TestApp::new().await;

    let reply = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.bytes, b"OK");

    let reply = app.send(Method::OPTIONS, "/api/users", None, None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_bootstrap_school_and_admin() {
    let app = TestApp::new().await;

    let (status, body) = app.post("/api/schools", None, json!({ "name": "S1" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["school"]["id"], 1);

    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({"school_id":1,"username":"a","email":"a@x","password":"p","role":"admin"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["token"].as_str().unwrap().to_string();
    assert!(body["user"].get("password_hash").is_none());

    let (status, body) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], 1);
    assert_eq!(body["user"]["school"]["name"], "S1");
}

#[tokio::test]
async fn test_register_rules() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({"username":"a","email":"a@x","password":"p","role":"admin"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "School ID is required");

    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({"school_id":9,"username":"a","email":"a@x","password":"p","role":"admin"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "School not found");

    let (school_id, _, _) = app.bootstrap("S1", "a").await;

    // A second public admin is refused
    let (status, _) = app
        .post(
            "/api/auth/register",
            None,
            json!({"school_id":school_id,"username":"b","email":"b@x","password":"p","role":"admin"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Duplicate username
    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({"school_id":school_id,"username":"a","email":"c@x","password":"p","role":"student"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Username or email already exists");

    let (status, _) = app
        .post(
            "/api/auth/register",
            None,
            json!({"school_id":school_id,"username":"s","email":"s@x","password":"p","role":"student"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_login_and_refresh() {
    let app = TestApp::new().await;
    app.bootstrap("S1", "a").await;

    let (status, body) = app
        .post("/api/auth/login", None, json!({"username":"a","password":"wrong"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, body) = app
        .post("/api/auth/login", None, json!({"username":"a","password":"p"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = app
        .post("/api/auth/refresh", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());

    // Access tokens are not refresh tokens
    let (status, _) = app
        .post("/api/auth/refresh", None, json!({ "refresh_token": access }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Nor the other way round
    let (status, _) = app.get("/api/auth/me", &refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_gate_rejects_missing_and_tampered_tokens() {
    let app = TestApp::new().await;
    let (_, _, token) = app.bootstrap("S1", "a").await;

    let (status, body) = app.call(Method::GET, "/api/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authorization header required");

    let signature_start = token.rfind('.').unwrap() + 1;
    let mut tampered = token.into_bytes();
    tampered[signature_start] = if tampered[signature_start] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();
    let (status, _) = app.get("/api/users", &tampered).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_whitelist() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (_, student) = app.member(&admin, "stu", "student").await;
    let (_, teacher) = app.member(&admin, "tea", "teacher").await;

    let (status, body) = app
        .post("/api/classes", Some(&student), json!({ "name": "5A", "year": "2025" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Insufficient permissions");

    let (status, _) = app
        .post("/api/classes", Some(&teacher), json!({ "name": "5A", "year": "2025" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/api/settings/backup", &teacher).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Reads stay open to every role
    let (status, _) = app.get("/api/classes", &student).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_last_admin_cannot_be_deleted() {
    let app = TestApp::new().await;
    let (_, admin_id, token) = app.bootstrap("S1", "a").await;

    let (status, body) = app.delete(&format!("/api/users/{}", admin_id), &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Cannot delete the last admin");

    let (_, _) = app.member(&token, "second", "admin").await;
    let (status, _) = app.delete(&format!("/api/users/{}", admin_id), &token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_last_admin_cannot_be_demoted() {
    let app = TestApp::new().await;
    let (_, admin_id, token) = app.bootstrap("S1", "a").await;

    let (status, _) = app
        .put(&format!("/api/users/{}", admin_id), &token, json!({ "role": "teacher" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.get(&format!("/api/users/{}", admin_id), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "admin");
}

async fn live_admins(app: &TestApp, school_id: i64) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM users WHERE school_id = ? AND role = 'admin' AND deleted_at IS NULL",
    )
    .bind(school_id)
    .fetch_one(&app.state.db)
    .await
    .unwrap();
    count
}

#[tokio::test]
async fn test_admins_deleting_each_other_leave_one() {
    let app = TestApp::new().await;
    let (school_id, first_id, first) = app.bootstrap("S1", "a").await;
    let (second_id, second) = app.member(&first, "second", "admin").await;

    let first_uri = format!("/api/users/{}", first_id);
    let second_uri = format!("/api/users/{}", second_id);
    let ((a, _), (b, _)) = tokio::join!(
        app.delete(&second_uri, &first),
        app.delete(&first_uri, &second),
    );

    let succeeded = [a, b].iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(succeeded, 1, "{} / {}", a, b);
    assert_eq!(live_admins(&app, school_id).await, 1);
}

#[tokio::test]
async fn test_admins_demoting_each_other_leave_one() {
    let app = TestApp::new().await;
    let (school_id, first_id, first) = app.bootstrap("S1", "a").await;
    let (second_id, second) = app.member(&first, "second", "admin").await;

    let first_uri = format!("/api/users/{}", first_id);
    let second_uri = format!("/api/users/{}", second_id);
    let ((a, _), (b, _)) = tokio::join!(
        app.put(&second_uri, &first, json!({ "role": "teacher" })),
        app.put(&first_uri, &second, json!({ "role": "teacher" })),
    );

    let succeeded = [a, b].iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(succeeded, 1, "{} / {}", a, b);
    assert_eq!(live_admins(&app, school_id).await, 1);
}

#[tokio::test]
async fn test_teacher_cannot_grant_own_subject() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (teacher_id, teacher) = app.member(&admin, "tea", "teacher").await;
    let class_id = app.class(&admin, "7B").await;
    let subject_id = app.subject(&admin, "Bio").await;
    let homework = json!({
        "class_id": class_id,
        "subject_id": subject_id,
        "description": "Read chapter 3",
        "due_date": "2030-01-10",
    });
    let self_uri = format!("/api/users/{}", teacher_id);

    let (status, _) = app.post("/api/homework", Some(&teacher), homework.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Profile edits still go through, the label is ignored
    let (status, _) = app
        .put(&self_uri, &teacher, json!({ "first_name": "Tea", "teacher_subject": "Bio" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.get(&self_uri, &teacher).await;
    assert_eq!(body["user"]["first_name"], "Tea");
    assert_ne!(body["user"]["teacher_subject"], "Bio");

    let (status, _) = app.post("/api/homework", Some(&teacher), homework.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .put(&self_uri, &admin, json!({ "teacher_subject": "Bio" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.post("/api/homework", Some(&teacher), homework).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
}

#[tokio::test]
async fn test_change_password_is_self_only() {
    let app = TestApp::new().await;
    let (_, admin_id, admin) = app.bootstrap("S1", "a").await;
    let (teacher_id, teacher) = app.member(&admin, "tea", "teacher").await;

    let (status, body) = app
        .put(
            &format!("/api/users/{}/password", admin_id),
            &teacher,
            json!({ "old_password": "p", "new_password": "newpass" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");

    let uri = format!("/api/users/{}/password", teacher_id);
    let (status, body) = app
        .put(&uri, &teacher, json!({ "old_password": "nope", "new_password": "newpass" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid old password");

    let (status, _) = app
        .put(&uri, &teacher, json!({ "old_password": "secret1", "new_password": "newpass" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/auth/login", None, json!({"username":"tea","password":"newpass"}))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_teacher_grades_only_linked_subjects() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (teacher_id, teacher) = app.member(&admin, "tea", "teacher").await;
    let (student_id, _) = app.member(&admin, "stu", "student").await;
    let math = app.subject(&admin, "Math").await;
    let bio = app.subject(&admin, "Bio").await;

    let (status, _) = app
        .post(
            &format!("/api/subjects/{}/teachers", math),
            Some(&admin),
            json!({ "teacher_ids": [teacher_id] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/api/grades",
            Some(&teacher),
            json!({"student_id":student_id,"subject_id":math,"grade":5,"date":"2025-01-10"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["grade"]["teacher_id"], teacher_id);

    let (status, body) = app
        .post(
            "/api/grades",
            Some(&teacher),
            json!({"student_id":student_id,"subject_id":bio,"grade":5,"date":"2025-01-10"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "You don't teach this subject");

    let (status, body) = app
        .get(&format!("/api/grades/student/{}/average", student_id), &admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_grades"], 1);
    assert_eq!(body["overall_average"], 5.0);
}

#[tokio::test]
async fn test_bulk_attendance_upserts() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (student_id, _) = app.member(&admin, "stu", "student").await;
    let (_, starosta) = app.member(&admin, "mon", "starosta").await;
    let class_id = app.class(&admin, "5A").await;

    for status_label in ["present", "absent"] {
        let (status, body) = app
            .post(
                "/api/attendance/bulk",
                Some(&starosta),
                json!({ "records": [{
                    "student_id": student_id,
                    "class_id": class_id,
                    "date": "2025-01-10",
                    "status": status_label,
                }]}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["count"], 1);
    }

    let (status, body) = app
        .get(&format!("/api/attendance?class_id={}", class_id), &admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["attendance"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "absent");
}

#[tokio::test]
async fn test_bulk_attendance_is_all_or_nothing() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (student_id, _) = app.member(&admin, "stu", "student").await;
    let class_id = app.class(&admin, "5A").await;

    let (status, _) = app
        .post(
            "/api/attendance/bulk",
            Some(&admin),
            json!({ "records": [
                {"student_id": student_id, "class_id": class_id, "date": "2025-01-10", "status": "present"},
                {"student_id": student_id, "class_id": class_id, "date": "2025-01-11", "status": "asleep"},
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app
        .get(&format!("/api/attendance?class_id={}", class_id), &admin)
        .await;
    assert!(body["attendance"].as_array().unwrap().is_empty());

    // Parents may not mark attendance at all
    let (_, parent) = app.member(&admin, "par", "parent").await;
    let (status, _) = app
        .post(
            "/api/attendance",
            Some(&parent),
            json!({"student_id": student_id, "class_id": class_id, "date": "2025-01-10", "status": "present"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_parent_sees_only_linked_children() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (child_id, _) = app.member(&admin, "kid", "student").await;
    let (parent_id, parent) = app.member(&admin, "mom", "parent").await;
    let (_, stranger) = app.member(&admin, "other", "parent").await;
    let (_, teacher) = app.member(&admin, "tea", "teacher").await;

    let link = json!({ "parent_id": parent_id, "student_id": child_id });
    let (status, _) = app.post("/api/parents/link", Some(&admin), link.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.post("/api/parent-student-links", Some(&admin), link).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Link already exists");

    let uri = format!("/api/parents/child/{}/grades", child_id);
    let (status, _) = app.get(&uri, &parent).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&uri, &stranger).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.get(&uri, &teacher).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.get(&uri, &admin).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/parents/children", &parent).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["children"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .delete(&format!("/api/parents/{}/students/{}", parent_id, child_id), &admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&uri, &parent).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_announcement_visibility() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (student_id, student) = app.member(&admin, "stu", "student").await;
    let (_, teacher) = app.member(&admin, "tea", "teacher").await;
    let class_id = app.class(&admin, "7B").await;
    app.class(&admin, "8C").await;

    let (status, _) = app
        .post(
            &format!("/api/classes/{}/students", class_id),
            Some(&admin),
            json!({ "student_ids": [student_id] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let mut ids = Vec::new();
    for (title, target_role, target_class_id) in [
        ("A1", "all", None),
        ("A2", "teachers", None),
        ("A3", "", Some(class_id)),
    ] {
        let (status, body) = app
            .post(
                "/api/announcements",
                Some(&admin),
                json!({
                    "title": title,
                    "content": "text",
                    "target_role": target_role,
                    "target_class_id": target_class_id,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        ids.push(body["announcement"]["id"].as_i64().unwrap());
    }

    async fn titles_at(app: &TestApp, uri: &str, token: &str) -> Vec<String> {
        let (status, body) = app.get(uri, token).await;
        assert_eq!(status, StatusCode::OK);
        let mut titles: Vec<String> = body["announcements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["title"].as_str().unwrap().to_string())
            .collect();
        titles.sort();
        titles
    }

    async fn titles(app: &TestApp, token: &str) -> Vec<String> {
        titles_at(app, "/api/announcements", token).await
    }

    assert_eq!(titles(&app, &student).await, ["A1", "A3"]);
    assert_eq!(titles(&app, &teacher).await, ["A1", "A2"]);
    assert_eq!(titles(&app, &admin).await, ["A1", "A2", "A3"]);

    // The same reader filter holds for single reads and the class feed
    let teachers_only = format!("/api/announcements/{}", ids[1]);
    let (status, body) = app.get(&teachers_only, &student).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Announcement not found");
    let (status, _) = app.get(&teachers_only, &teacher).await;
    assert_eq!(status, StatusCode::OK);
    let class_only = format!("/api/announcements/{}", ids[2]);
    let (status, _) = app.get(&class_only, &teacher).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = app.get(&class_only, &student).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["announcement"]["title"], "A3");

    let feed = format!("/api/announcements/class/{}", class_id);
    let feed_titles = |body: &Value| -> Vec<String> {
        let mut titles: Vec<String> = body["announcements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["title"].as_str().unwrap().to_string())
            .collect();
        titles.sort();
        titles
    };
    let (status, body) = app.get(&feed, &teacher).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed_titles(&body), ["A1"]);
    let (_, body) = app.get(&feed, &student).await;
    assert_eq!(feed_titles(&body), ["A1", "A3"]);
    let (_, body) = app.get(&feed, &admin).await;
    assert_eq!(feed_titles(&body), ["A1", "A3"]);
}

#[tokio::test]
async fn test_announcement_author_ownership() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (_, author) = app.member(&admin, "t1", "teacher").await;
    let (_, other) = app.member(&admin, "t2", "teacher").await;

    let (_, body) = app
        .post(
            "/api/announcements",
            Some(&author),
            json!({ "title": "Trip", "content": "Friday", "target_role": "all" }),
        )
        .await;
    let uri = format!("/api/announcements/{}", body["announcement"]["id"]);

    let (status, _) = app.put(&uri, &other, json!({ "title": "Hijack" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.delete(&uri, &other).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.delete(&uri, &author).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let app = TestApp::new().await;
    let (school_one, _, admin_one) = app.bootstrap("S1", "a").await;
    let (school_two, _, admin_two) = app.bootstrap("S2", "b").await;
    let class_id = app.class(&admin_one, "5A").await;
    let (student_id, _) = app.member(&admin_one, "stu", "student").await;

    let (status, _) = app.get(&format!("/api/classes/{}", class_id), &admin_two).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&format!("/api/users/{}", student_id), &admin_two).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&format!("/api/schools/{}", school_one), &admin_two).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .put(&format!("/api/schools/{}", school_one), &admin_two, json!({ "name": "Mine" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");

    // Foreign rows cannot be attached either
    let (status, _) = app
        .post(
            &format!("/api/classes/{}/students", class_id),
            Some(&admin_two),
            json!({ "student_ids": [student_id] }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/users", &admin_two).await;
    for user in body["users"].as_array().unwrap() {
        assert_eq!(user["school_id"], school_two);
    }
    let (_, body) = app.get("/api/schools", &admin_two).await;
    let schools = body["schools"].as_array().unwrap();
    assert_eq!(schools.len(), 1);
    assert_eq!(schools[0]["id"], school_two);
}

#[tokio::test]
async fn test_class_schedule_map() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (teacher_id, teacher) = app.member(&admin, "tea", "teacher").await;
    let class_id = app.class(&admin, "5A").await;
    let math = app.subject(&admin, "Math").await;

    let (status, body) = app
        .post(
            "/api/schedules",
            Some(&teacher),
            json!({
                "class_id": class_id,
                "subject_id": math,
                "teacher_id": teacher_id,
                "day_of_week": "monday",
                "lesson_number": 1,
                "start_time": "08:30",
                "end_time": "09:15",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, _) = app
        .post(
            "/api/schedules",
            Some(&admin),
            json!({
                "class_id": class_id,
                "subject_id": math,
                "day_of_week": "monday",
                "lesson_number": 2,
                "start_time": "10:00",
                "end_time": "09:00",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .get(&format!("/api/schedules/class/{}", class_id), &teacher)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedule"]["monday"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_exports_are_csv_with_bom() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let class_id = app.class(&admin, "5A").await;

    for uri in [
        format!("/api/export/class/{}/grades", class_id),
        format!("/api/export/class/{}/attendance", class_id),
        "/api/export/school/report".to_string(),
    ] {
        let reply = app.send(Method::GET, &uri, Some(&admin), None).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", uri);
        assert_eq!(&reply.bytes[..3], &[0xEF, 0xBB, 0xBF]);
        let disposition = reply.headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename="));
    }
}

#[tokio::test]
async fn test_settings_backup_and_activity_log() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    app.member(&admin, "tea", "teacher").await;
    app.class(&admin, "5A").await;

    let (status, body) = app.get("/api/settings/backup", &admin).await;
    assert_eq!(status, StatusCode::OK);
    let users = body["backup"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("password_hash").is_none()));
    assert_eq!(body["backup"]["classes"][0]["student_ids"], json!([]));

    let (status, body) = app.get("/api/settings/audit?limit=10", &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 10);
    assert_eq!(body["entries"].as_array().unwrap().len(), 3);
    let actions: Vec<&str> = body["activity"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|row| row["action"].as_str())
        .collect();
    assert!(actions.contains(&"class.create"));
    assert!(actions.contains(&"user.create"));

    let (status, body) = app.get("/api/settings/system", &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_soft_deleted_user_cannot_log_in() {
    let app = TestApp::new().await;
    let (_, _, admin) = app.bootstrap("S1", "a").await;
    let (teacher_id, _) = app.member(&admin, "tea", "teacher").await;

    let (status, _) = app.delete(&format!("/api/users/{}", teacher_id), &admin).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/auth/login", None, json!({"username":"tea","password":"secret1"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (deleted_at,): (Option<String>,) =
        sqlx::query_as("SELECT deleted_at FROM users WHERE id = ?")
            .bind(teacher_id)
            .fetch_one(&app.state.db)
            .await
            .unwrap();
    assert!(deleted_at.is_some());
}

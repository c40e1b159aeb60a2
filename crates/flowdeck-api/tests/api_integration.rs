use axum::http::StatusCode;
use axum_test::{TestServer, TestWebSocket};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use flowdeck_api::{create_router, AppState};
use flowdeck_core::Settings;
use flowdeck_store::Store;
use serde_json::{json, Value};
use tempfile::TempDir;

const ADMIN_PASSWORD: &str = "Tr0ub4dor&Horse";

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.env = "test".into();
    settings
}

fn server_with(settings: Settings) -> TestServer {
    let store = Store::in_memory().expect("in-memory store");
    let state = AppState::new(settings, store);
    TestServer::new(create_router(state)).expect("test server")
}

fn test_server() -> TestServer {
    server_with(test_settings())
}

/// Sockets need a real listener, so realtime tests bind a local port.
fn socket_server() -> TestServer {
    let store = Store::in_memory().expect("in-memory store");
    let state = AppState::new(test_settings(), store);
    TestServer::builder()
        .http_transport()
        .build(create_router(state))
        .expect("socket test server")
}

/// Opens `/ws` for `account` and waits for its own `user_online`, which also proves the
/// socket is registered.
async fn connect(server: &TestServer, account: &Account) -> TestWebSocket {
    let mut ws = open_socket(server, account).await;
    let hello: Value = ws.receive_json().await;
    assert_eq!(hello["type"], "user_online");
    assert_eq!(hello["user_id"], account.id);
    ws
}

async fn open_socket(server: &TestServer, account: &Account) -> TestWebSocket {
    server
        .get_websocket("/ws")
        .add_query_param("token", &account.token)
        .await
        .into_websocket()
        .await
}

/// Round-trips `request_online_users`; events queued before it arrive first.
async fn online_users(ws: &mut TestWebSocket) -> Vec<i64> {
    ws.send_json(&json!({ "type": "request_online_users" })).await;
    let list: Value = ws.receive_json().await;
    assert_eq!(list["type"], "online_users_list");
    list["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["user_id"].as_i64().unwrap())
        .collect()
}

struct Account {
    id: i64,
    token: String,
}

async fn register(server: &TestServer, org: &str) -> (Account, i64) {
    let resp = server
        .post("/api/v1/auth/register")
        .json(&json!({
            "organisation_name": format!("{org} Inc"),
            "organisation_email": format!("hello@{org}.test"),
            "name": format!("{org} Admin"),
            "email": format!("admin@{org}.test"),
            "password": ADMIN_PASSWORD,
        }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let body: Value = resp.json();
    (
        Account {
            id: body["user"]["id"].as_i64().unwrap(),
            token: body["token"].as_str().unwrap().to_string(),
        },
        body["organisation"]["id"].as_i64().unwrap(),
    )
}

async fn login(server: &TestServer, email: &str, password: &str) -> Account {
    let resp = server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": email, "password": password }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    Account {
        id: body["user"]["id"].as_i64().unwrap(),
        token: body["token"].as_str().unwrap().to_string(),
    }
}

async fn create_department(server: &TestServer, admin: &Account, name: &str) -> i64 {
    let resp = server
        .post("/api/v1/admin/departments")
        .authorization_bearer(&admin.token)
        .json(&json!({ "name": name }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    resp.json::<Value>()["id"].as_i64().unwrap()
}

/// Creates a user through the admin API and logs them in with the one-time password.
async fn add_user(
    server: &TestServer,
    admin: &Account,
    email: &str,
    department_id: Option<i64>,
    roles: &[&str],
) -> Account {
    let resp = server
        .post("/api/v1/admin/users")
        .authorization_bearer(&admin.token)
        .json(&json!({
            "name": email.split('@').next().unwrap(),
            "email": email,
            "department_id": department_id,
            "roles": roles,
        }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let body: Value = resp.json();
    let password = body["password"].as_str().unwrap().to_string();
    login(server, email, &password).await
}

async fn notifications(server: &TestServer, account: &Account) -> Vec<Value> {
    let resp = server
        .get("/api/v1/notifications")
        .authorization_bearer(&account.token)
        .await;
    resp.assert_status_ok();
    resp.json::<Value>()["notifications"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let server = test_server();

    let resp = server.get("/health").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["database"]["status"], "healthy");

    server.get("/health/live").await.assert_status_ok();
}

#[tokio::test]
async fn accounts_survive_a_restart_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("flowdeck.db");
    let on_disk = || {
        let store = Store::open(&path).expect("file store");
        TestServer::new(create_router(AppState::new(test_settings(), store))).expect("test server")
    };

    let (admin, org_id) = register(&on_disk(), "acme").await;

    let server = on_disk();
    let again = login(&server, "admin@acme.test", ADMIN_PASSWORD).await;
    assert_eq!(again.id, admin.id);
    let resp = server
        .get("/api/v1/me")
        .authorization_bearer(&admin.token)
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["user"]["organisation_id"], org_id);
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let server = test_server();
    let resp = server.get("/health").await;
    assert_eq!(resp.header("x-content-type-options"), "nosniff");
    assert_eq!(resp.header("x-frame-options"), "DENY");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let server = test_server();
    server
        .get("/api/v1/me")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/api/v1/me")
        .authorization_bearer("not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_returns_a_working_session() {
    let server = test_server();
    let (admin, org_id) = register(&server, "acme").await;

    let resp = server
        .get("/api/v1/me")
        .authorization_bearer(&admin.token)
        .await;
    resp.assert_status_ok();
    let me: Value = resp.json();
    assert_eq!(me["user"]["id"], admin.id);
    assert_eq!(me["organisation"]["id"], org_id);
    assert_eq!(me["user"]["roles"], json!(["Admin"]));
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let server = test_server();
    register(&server, "acme").await;

    let resp = server
        .post("/api/v1/auth/register")
        .json(&json!({
            "organisation_name": "Acme Again",
            "organisation_email": "hello@acme.test",
            "name": "Someone",
            "email": "someone@acme.test",
            "password": ADMIN_PASSWORD,
        }))
        .await;
    resp.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn weak_passwords_are_rejected_at_registration() {
    let server = test_server();
    let resp = server
        .post("/api/v1/auth/register")
        .json(&json!({
            "organisation_name": "Weak",
            "organisation_email": "hello@weak.test",
            "name": "Weak Admin",
            "email": "admin@weak.test",
            "password": "password",
        }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_failures_are_unauthorized_then_rate_limited() {
    let mut settings = test_settings();
    settings.auth.login_attempts_per_minute = 2;
    let server = server_with(settings);
    register(&server, "acme").await;

    for _ in 0..2 {
        server
            .post("/api/v1/auth/login")
            .json(&json!({ "email": "admin@acme.test", "password": "Wrong-pass9!" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
    server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "ADMIN@acme.test", "password": ADMIN_PASSWORD }))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let server = test_server();
    let (acme, _) = register(&server, "acme").await;
    let (globex, _) = register(&server, "globex").await;

    server
        .get(&format!("/api/v1/users/{}", acme.id))
        .authorization_bearer(&globex.token)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let resp = server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&globex.token)
        .json(&json!({ "content": "hi", "recipient_id": acme.id }))
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn department_filter_stays_inside_the_tenant() {
    let server = test_server();
    let (acme, _) = register(&server, "acme").await;
    let (globex, _) = register(&server, "globex").await;
    let acme_dept = create_department(&server, &acme, "Research").await;
    server
        .post("/api/v1/tasks")
        .authorization_bearer(&acme.token)
        .json(&json!({ "title": "acme confidential", "department_id": acme_dept }))
        .await
        .assert_status(StatusCode::CREATED);

    server
        .get("/api/v1/tasks")
        .add_query_param("department_id", acme_dept)
        .authorization_bearer(&globex.token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/api/v1/tasks/board")
        .add_query_param("department_id", acme_dept)
        .authorization_bearer(&globex.token)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let resp = server
        .get("/api/v1/tasks")
        .add_query_param("department_id", acme_dept)
        .authorization_bearer(&acme.token)
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["total"], 1);
}

#[tokio::test]
async fn huge_page_numbers_return_empty_pages() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;

    let resp = server
        .get("/api/v1/tasks")
        .add_query_param("page", u32::MAX)
        .add_query_param("per_page", 100)
        .authorization_bearer(&admin.token)
        .await;
    resp.assert_status_ok();
    assert!(resp.json::<Value>()["items"].as_array().unwrap().is_empty());

    server
        .get("/api/v1/meetings")
        .add_query_param("page", u32::MAX)
        .authorization_bearer(&admin.token)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn members_cannot_use_admin_routes() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let member = add_user(&server, &admin, "member@acme.test", None, &[]).await;

    server
        .get("/api/v1/admin/overview")
        .authorization_bearer(&member.token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .post("/api/v1/notifications/broadcast")
        .authorization_bearer(&member.token)
        .json(&json!({ "title": "Hi", "message": "All hands" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_cannot_delete_themselves() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let member = add_user(&server, &admin, "member@acme.test", None, &[]).await;

    server
        .delete(&format!("/api/v1/admin/users/{}", admin.id))
        .authorization_bearer(&admin.token)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .delete(&format!("/api/v1/admin/users/{}", member.id))
        .authorization_bearer(&admin.token)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    // Deactivated accounts lose access immediately.
    server
        .get("/api/v1/me")
        .authorization_bearer(&member.token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn task_lifecycle_notifies_and_tracks_status() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let dept = create_department(&server, &admin, "Engineering").await;
    let manager = add_user(&server, &admin, "lead@acme.test", Some(dept), &["Manager"]).await;
    let member = add_user(&server, &admin, "dev@acme.test", Some(dept), &["Member"]).await;

    // Members cannot create tasks.
    server
        .post("/api/v1/tasks")
        .authorization_bearer(&member.token)
        .json(&json!({ "title": "Nope" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let due = Utc::now() + Duration::days(3);
    let resp = server
        .post("/api/v1/tasks")
        .authorization_bearer(&manager.token)
        .json(&json!({
            "title": "Ship read receipts",
            "priority": "high",
            "due_date": due,
            "assignee_ids": [member.id],
            "deliverables": [{ "title": "API" }, { "title": "UI" }],
        }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let detail: Value = resp.json();
    let task_id = detail["task"]["id"].as_i64().unwrap();
    assert_eq!(detail["task"]["department_id"], dept);
    assert_eq!(detail["completion_percentage"], 0);

    let inbox = notifications(&server, &member).await;
    assert!(inbox
        .iter()
        .any(|n| n["type"] == "task_assigned" && n["task_id"] == task_id));

    let resp = server
        .get("/api/v1/tasks")
        .authorization_bearer(&member.token)
        .await;
    resp.assert_status_ok();
    let list: Value = resp.json();
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["id"], task_id);

    let resp = server
        .post(&format!("/api/v1/tasks/{task_id}/status"))
        .authorization_bearer(&member.token)
        .json(&json!({ "status": "done" }))
        .await;
    resp.assert_status_ok();
    let task: Value = resp.json();
    assert_eq!(task["status"], "done");
    assert!(task["completed_date"].is_string());

    let resp = server
        .get(&format!("/api/v1/tasks/{task_id}"))
        .authorization_bearer(&manager.token)
        .await;
    resp.assert_status_ok();
    let detail: Value = resp.json();
    assert!(!detail["history"].as_array().unwrap().is_empty());

    let resp = server
        .get("/api/v1/tasks/board")
        .authorization_bearer(&manager.token)
        .await;
    resp.assert_status_ok();
    let board: Value = resp.json();
    assert_eq!(board["done"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn task_start_after_due_is_rejected() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let now = Utc::now();
    server
        .post("/api/v1/tasks")
        .authorization_bearer(&admin.token)
        .json(&json!({
            "title": "Backwards",
            "start_date": now + Duration::days(2),
            "due_date": now,
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn time_logs_need_a_positive_duration() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let resp = server
        .post("/api/v1/tasks")
        .authorization_bearer(&admin.token)
        .json(&json!({ "title": "Track me", "assignee_ids": [admin.id] }))
        .await;
    let task_id = resp.json::<Value>()["task"]["id"].as_i64().unwrap();

    server
        .post(&format!("/api/v1/tasks/{task_id}/time-logs"))
        .authorization_bearer(&admin.token)
        .json(&json!({ "duration_hours": 0.0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post(&format!("/api/v1/tasks/{task_id}/time-logs"))
        .authorization_bearer(&admin.token)
        .json(&json!({ "duration_hours": 1.5 }))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn direct_message_to_offline_user_ticks_through_read() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let member = add_user(&server, &admin, "member@acme.test", None, &[]).await;

    let resp = server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&admin.token)
        .json(&json!({ "content": "  Are you around?  ", "recipient_id": member.id }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let sent: Value = resp.json();
    let message_id = sent["id"].as_i64().unwrap();
    assert_eq!(sent["content"], "Are you around?");
    assert_eq!(sent["delivery_state"], "sent");

    let inbox = notifications(&server, &member).await;
    assert!(inbox.iter().any(|n| n["type"] == "message"));

    let resp = server
        .get("/api/v1/messages/unread-count")
        .authorization_bearer(&member.token)
        .await;
    assert_eq!(resp.json::<Value>()["count"], 1);

    // Only the recipient may mark it read.
    server
        .post(&format!("/api/v1/chat/messages/{message_id}/read"))
        .authorization_bearer(&admin.token)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let resp = server
        .get(&format!("/api/v1/chat/direct/{}", admin.id))
        .authorization_bearer(&member.token)
        .await;
    resp.assert_status_ok();
    let history: Value = resp.json();
    assert_eq!(history["marked_read"], 1);
    assert_eq!(history["messages"][0]["delivery_state"], "read");
    assert!(history["messages"][0]["delivered_at"].is_string());

    let resp = server
        .get("/api/v1/messages/unread-count")
        .authorization_bearer(&member.token)
        .await;
    assert_eq!(resp.json::<Value>()["count"], 0);
}

#[tokio::test]
async fn self_and_targetless_messages_are_rejected() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;

    server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&admin.token)
        .json(&json!({ "content": "me", "recipient_id": admin.id }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&admin.token)
        .json(&json!({ "content": "nowhere" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&admin.token)
        .json(&json!({ "content": "   ", "recipient_id": admin.id + 1 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn channel_messages_require_membership() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let insider = add_user(&server, &admin, "in@acme.test", None, &[]).await;
    let outsider = add_user(&server, &admin, "out@acme.test", None, &[]).await;

    let resp = server
        .post("/api/v1/chat/channels")
        .authorization_bearer(&admin.token)
        .json(&json!({ "name": "launch", "channel_type": "project", "member_ids": [insider.id] }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let channel_id = resp.json::<Value>()["id"].as_i64().unwrap();

    server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&insider.token)
        .json(&json!({ "content": "ready", "channel_id": channel_id }))
        .await
        .assert_status(StatusCode::CREATED);
    server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&outsider.token)
        .json(&json!({ "content": "let me in", "channel_id": channel_id }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let resp = server
        .get(&format!("/api/v1/chat/channels/{channel_id}/messages"))
        .authorization_bearer(&admin.token)
        .await;
    resp.assert_status_ok();
    let history: Value = resp.json();
    assert_eq!(history["messages"].as_array().unwrap().len(), 1);
    assert_eq!(history["members"].as_array().unwrap().len(), 2);

    let resp = server
        .get("/api/v1/chat/search")
        .add_query_param("q", "read")
        .authorization_bearer(&insider.token)
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn leave_requests_respect_quota_and_review() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let dept = create_department(&server, &admin, "Ops").await;
    let member = add_user(&server, &admin, "ops@acme.test", Some(dept), &[]).await;

    server
        .put(&format!("/api/v1/users/{}/leave-quota", member.id))
        .authorization_bearer(&admin.token)
        .json(&json!({ "annual": 5, "sick": 3, "personal": 2 }))
        .await
        .assert_status_ok();

    let start = NaiveDate::from_ymd_opt(Utc::now().year() + 1, 3, 2).unwrap();
    let resp = server
        .post("/api/v1/leave")
        .authorization_bearer(&member.token)
        .json(&json!({
            "leave_type": "annual",
            "start_date": start,
            "end_date": start + Duration::days(2),
            "reason": "Family trip",
        }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let request: Value = resp.json();
    assert_eq!(request["total_days"], 3);
    assert_eq!(request["status"], "pending");
    let leave_id = request["id"].as_i64().unwrap();

    // 3 pending + 3 more exceeds the 5-day quota.
    server
        .post("/api/v1/leave")
        .authorization_bearer(&member.token)
        .json(&json!({
            "leave_type": "vacation",
            "start_date": start + Duration::days(10),
            "end_date": start + Duration::days(12),
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let reviewer_inbox = notifications(&server, &admin).await;
    assert!(reviewer_inbox.iter().any(|n| n["type"] == "leave_requested"));

    let resp = server
        .get("/api/v1/leave/pending")
        .authorization_bearer(&admin.token)
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>().as_array().unwrap().len(), 1);

    // Nobody reviews their own request.
    server
        .post(&format!("/api/v1/leave/{leave_id}/review"))
        .authorization_bearer(&member.token)
        .json(&json!({ "decision": "approved" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let resp = server
        .post(&format!("/api/v1/leave/{leave_id}/review"))
        .authorization_bearer(&admin.token)
        .json(&json!({ "decision": "approved", "notes": "Enjoy" }))
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["status"], "approved");

    server
        .post(&format!("/api/v1/leave/{leave_id}/review"))
        .authorization_bearer(&admin.token)
        .json(&json!({ "decision": "rejected" }))
        .await
        .assert_status(StatusCode::CONFLICT);

    let inbox = notifications(&server, &member).await;
    assert!(inbox.iter().any(|n| n["type"] == "leave_reviewed"));

    let resp = server
        .get("/api/v1/leave/balance")
        .add_query_param("year", start.year())
        .authorization_bearer(&member.token)
        .await;
    resp.assert_status_ok();
    let balances: Value = resp.json();
    let annual = balances
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["bucket"] == "annual")
        .cloned()
        .unwrap();
    assert_eq!(annual["approved"], 3);
    assert_eq!(annual["remaining"], 2);
}

#[tokio::test]
async fn meetings_validate_window_and_notify_invitees() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let guest = add_user(&server, &admin, "guest@acme.test", None, &[]).await;
    let start = Utc::now() + Duration::days(1);

    server
        .post("/api/v1/meetings")
        .authorization_bearer(&admin.token)
        .json(&json!({
            "title": "Backwards",
            "start_time": start,
            "end_time": start - Duration::hours(1),
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let resp = server
        .post("/api/v1/meetings")
        .authorization_bearer(&admin.token)
        .json(&json!({
            "title": "Planning",
            "start_time": start,
            "end_time": start + Duration::minutes(45),
            "attendee_ids": [guest.id],
            "agenda": [{ "title": "Goals" }, { "title": "Risks" }],
        }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let detail: Value = resp.json();
    let meeting_id = detail["meeting"]["id"].as_i64().unwrap();
    assert_eq!(detail["duration_minutes"], 45);
    assert_eq!(detail["agenda"][1]["title"], "Risks");

    let inbox = notifications(&server, &guest).await;
    assert!(inbox.iter().any(|n| n["type"] == "meeting_invitation"));

    let resp = server
        .post(&format!("/api/v1/meetings/{meeting_id}/respond"))
        .authorization_bearer(&guest.token)
        .json(&json!({ "response": "accepted" }))
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["response_stats"]["accepted"], 1);

    // Only the organizer (or an admin) may delete.
    server
        .delete(&format!("/api/v1/meetings/{meeting_id}"))
        .authorization_bearer(&guest.token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn notifications_belong_to_their_owner() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;
    let member = add_user(&server, &admin, "member@acme.test", None, &[]).await;

    server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&admin.token)
        .json(&json!({ "content": "ping", "recipient_id": member.id }))
        .await
        .assert_status(StatusCode::CREATED);
    let inbox = notifications(&server, &member).await;
    let id = inbox[0]["id"].as_i64().unwrap();

    server
        .post(&format!("/api/v1/notifications/{id}/read"))
        .authorization_bearer(&admin.token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .post(&format!("/api/v1/notifications/{id}/read"))
        .authorization_bearer(&member.token)
        .await
        .assert_status_ok();

    let resp = server
        .post("/api/v1/notifications/read-all")
        .authorization_bearer(&member.token)
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["updated"], 0);
}

#[tokio::test]
async fn dashboard_and_calendar_render_for_a_new_user() {
    let server = test_server();
    let (admin, _) = register(&server, "acme").await;

    let resp = server
        .post("/api/v1/tasks")
        .authorization_bearer(&admin.token)
        .json(&json!({
            "title": "Due soon",
            "priority": "urgent",
            "due_date": Utc::now() + Duration::days(2),
            "assignee_ids": [admin.id],
        }))
        .await;
    resp.assert_status(StatusCode::CREATED);

    let resp = server
        .get("/api/v1/dashboard")
        .authorization_bearer(&admin.token)
        .await;
    resp.assert_status_ok();
    let dashboard: Value = resp.json();
    assert_eq!(dashboard["stats"]["total_tasks"], 1);
    assert_eq!(dashboard["open_tasks"].as_array().unwrap().len(), 1);

    let resp = server
        .get("/api/v1/calendar/events")
        .authorization_bearer(&admin.token)
        .await;
    resp.assert_status_ok();
    let events: Value = resp.json();
    assert_eq!(events[0]["kind"], "task");
    assert_eq!(events[0]["color"], "#e74c3c");

    server
        .get("/api/v1/dashboard/analytics")
        .add_query_param("days", 7)
        .authorization_bearer(&admin.token)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn socket_requires_a_valid_token() {
    let server = socket_server();
    server
        .get_websocket("/ws")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get_websocket("/ws")
        .add_query_param("token", "not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let (admin, _) = register(&server, "acme").await;
    let mut ws = connect(&server, &admin).await;
    assert_eq!(online_users(&mut ws).await, vec![admin.id]);
}

#[tokio::test]
async fn pending_direct_messages_are_delivered_on_connect() {
    let server = socket_server();
    let (alice, _) = register(&server, "acme").await;
    let bob = add_user(&server, &alice, "bob@acme.test", None, &["member"]).await;
    let mut alice_ws = connect(&server, &alice).await;

    let resp = server
        .post("/api/v1/chat/messages")
        .authorization_bearer(&alice.token)
        .json(&json!({ "content": "see you tomorrow", "recipient_id": bob.id }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let sent: Value = resp.json();
    let message_id = sent["id"].as_i64().unwrap();
    assert_eq!(sent["delivery_state"], "sent");
    let echo: Value = alice_ws.receive_json().await;
    assert_eq!(echo["type"], "new_direct_message");
    assert_eq!(echo["message"]["id"], message_id);

    let _bob_ws = connect(&server, &bob).await;
    let online: Value = alice_ws.receive_json().await;
    assert_eq!(online["type"], "user_online");
    assert_eq!(online["user_id"], bob.id);
    let delivered: Value = alice_ws.receive_json().await;
    assert_eq!(delivered["type"], "message_delivered");
    assert_eq!(delivered["message_id"], message_id);
    assert_eq!(delivered["recipient_id"], bob.id);
}

#[tokio::test]
async fn direct_message_to_online_user_is_delivered_immediately() {
    let server = socket_server();
    let (alice, _) = register(&server, "acme").await;
    let bob = add_user(&server, &alice, "bob@acme.test", None, &["member"]).await;
    let mut alice_ws = connect(&server, &alice).await;
    let mut bob_ws = connect(&server, &bob).await;
    let online: Value = alice_ws.receive_json().await;
    assert_eq!(online["user_id"], bob.id);

    alice_ws
        .send_json(&json!({ "type": "send_message", "content": "ping", "recipient_id": bob.id }))
        .await;

    let incoming: Value = bob_ws.receive_json().await;
    assert_eq!(incoming["type"], "new_direct_message");
    assert_eq!(incoming["message"]["content"], "ping");
    assert_eq!(incoming["message"]["delivery_state"], "delivered");
    let message_id = incoming["message"]["id"].as_i64().unwrap();

    let echo: Value = alice_ws.receive_json().await;
    assert_eq!(echo["type"], "new_direct_message");
    let delivered: Value = alice_ws.receive_json().await;
    assert_eq!(delivered["type"], "message_delivered");
    assert_eq!(delivered["message_id"], message_id);

    // Nothing was queued for later, so no message notification either.
    assert!(!notifications(&server, &bob)
        .await
        .iter()
        .any(|n| n["type"] == "message"));
}

#[tokio::test]
async fn joining_a_channel_requires_membership() {
    let server = socket_server();
    let (alice, _) = register(&server, "acme").await;
    let bob = add_user(&server, &alice, "bob@acme.test", None, &["member"]).await;
    let resp = server
        .post("/api/v1/chat/channels")
        .authorization_bearer(&alice.token)
        .json(&json!({ "name": "leadership" }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let channel_id = resp.json::<Value>()["id"].as_i64().unwrap();

    let mut bob_ws = connect(&server, &bob).await;
    bob_ws
        .send_json(&json!({ "type": "join_channel", "channel_id": channel_id }))
        .await;
    let refused: Value = bob_ws.receive_json().await;
    assert_eq!(refused["type"], "error");

    // The socket stays usable after a refused event.
    assert_eq!(online_users(&mut bob_ws).await, vec![bob.id]);
}

#[tokio::test]
async fn typing_skips_the_typing_socket() {
    let server = socket_server();
    let (alice, _) = register(&server, "acme").await;
    let bob = add_user(&server, &alice, "bob@acme.test", None, &["member"]).await;
    let resp = server
        .post("/api/v1/chat/channels")
        .authorization_bearer(&alice.token)
        .json(&json!({ "name": "launch", "member_ids": [bob.id] }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let channel_id = resp.json::<Value>()["id"].as_i64().unwrap();

    let mut typing_tab = connect(&server, &alice).await;
    // A second tab of the same user is not a presence change.
    let mut other_tab = open_socket(&server, &alice).await;
    assert_eq!(online_users(&mut other_tab).await, vec![alice.id]);
    let mut bob_ws = connect(&server, &bob).await;
    for tab in [&mut typing_tab, &mut other_tab] {
        let online: Value = tab.receive_json().await;
        assert_eq!(online["user_id"], bob.id);
    }

    typing_tab
        .send_json(&json!({ "type": "typing", "channel_id": channel_id }))
        .await;
    for ws in [&mut bob_ws, &mut other_tab] {
        let typing: Value = ws.receive_json().await;
        assert_eq!(typing["type"], "user_typing");
        assert_eq!(typing["user_id"], alice.id);
        assert_eq!(typing["channel_id"], channel_id);
        assert_eq!(typing["is_typing"], true);
    }
    // The next frame on the typing socket is the reply, not its own typing event.
    assert_eq!(online_users(&mut typing_tab).await, vec![alice.id, bob.id]);
}

#[tokio::test]
async fn presence_changes_reach_the_organisation() {
    let server = socket_server();
    let (alice, _) = register(&server, "acme").await;
    let bob = add_user(&server, &alice, "bob@acme.test", None, &["member"]).await;
    let (globex, _) = register(&server, "globex").await;
    let mut alice_ws = connect(&server, &alice).await;
    let mut globex_ws = connect(&server, &globex).await;

    let bob_ws = connect(&server, &bob).await;
    let online: Value = alice_ws.receive_json().await;
    assert_eq!(online["type"], "user_online");
    assert_eq!(online["user_id"], bob.id);
    assert_eq!(online["name"], "bob");

    let resp = server
        .get(&format!("/api/v1/users/{}", bob.id))
        .authorization_bearer(&alice.token)
        .await;
    assert_eq!(resp.json::<Value>()["is_online"], true);

    bob_ws.close().await;
    let offline: Value = alice_ws.receive_json().await;
    assert_eq!(offline["type"], "user_offline");
    assert_eq!(offline["user_id"], bob.id);
    assert!(offline["last_seen"].is_string());

    // Other organisations never hear about it.
    assert_eq!(online_users(&mut globex_ws).await, vec![globex.id]);
}

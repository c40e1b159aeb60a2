use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::{require_auth, security_headers_middleware};
use crate::realtime::ws_handler;
use crate::rest::{admin, auth, chat, dashboard, health, leave, meetings, notifications, tasks, users};
use crate::state::AppState;

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected = Router::new()
        // Account
        .route("/auth/logout", post(auth::logout))
        .route("/auth/change-password", post(auth::change_password))
        .route("/me", get(auth::me).patch(auth::update_me))
        // Tasks
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/board", get(tasks::board))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/tasks/{id}/status", post(tasks::change_status))
        .route("/tasks/{id}/comments", post(tasks::add_comment))
        .route("/tasks/{id}/time-logs", post(tasks::add_time_log))
        .route("/tasks/{id}/auto-assign", post(tasks::auto_assign))
        .route("/tags", get(tasks::list_tags).post(tasks::create_tag))
        // Chat
        .route(
            "/chat/channels",
            get(chat::list_channels).post(chat::create_channel),
        )
        .route("/chat/channels/{id}/messages", get(chat::channel_messages))
        .route("/chat/direct/{user_id}", get(chat::direct_messages))
        .route("/chat/messages", post(chat::send_message))
        .route("/chat/messages/{id}/read", post(chat::mark_read))
        .route("/chat/search", get(chat::search))
        .route("/chat/recent", get(chat::recent_conversations))
        .route("/messages/unread-count", get(chat::unread_count))
        // Notifications
        .route("/notifications", get(notifications::list))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/broadcast", post(notifications::broadcast))
        // Meetings
        .route(
            "/meetings",
            get(meetings::list_meetings).post(meetings::create_meeting),
        )
        .route(
            "/meetings/{id}",
            get(meetings::get_meeting)
                .patch(meetings::update_meeting)
                .delete(meetings::delete_meeting),
        )
        .route("/meetings/{id}/respond", post(meetings::respond))
        .route(
            "/meetings/{id}/notes",
            get(meetings::list_notes).post(meetings::add_note),
        )
        // Leave
        .route("/leave", get(leave::my_requests).post(leave::create_request))
        .route("/leave/pending", get(leave::pending))
        .route("/leave/balance", get(leave::balance))
        .route("/leave/{id}/review", post(leave::review))
        .route("/users/{id}/leave-quota", put(leave::set_quota))
        // Dashboard
        .route("/stats", get(dashboard::stats))
        .route("/dashboard", get(dashboard::dashboard))
        .route("/dashboard/analytics", get(dashboard::analytics))
        .route("/calendar/events", get(dashboard::calendar_events))
        .route("/users/search", get(users::search))
        .route("/users/{id}", get(users::get_user))
        // Admin
        .route("/admin/users", post(admin::create_user))
        .route(
            "/admin/users/{id}",
            patch(admin::update_user).delete(admin::deactivate_user),
        )
        .route(
            "/admin/departments",
            get(admin::list_departments).post(admin::create_department),
        )
        .route("/admin/overview", get(admin::overview))
        .route("/admin/holidays", post(admin::create_holiday))
        .route("/admin/audit", get(admin::audit_log))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public.merge(protected)
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.allowed_origins);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api_routes(&state))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn(security_headers_middleware)),
        )
}

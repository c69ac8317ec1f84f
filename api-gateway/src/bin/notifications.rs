//! Notifications Lambda - In-app notification feed.
//!
//! Endpoints:
//! - GET /notifications?unread=true - Caller's notifications, newest first
//! - PATCH /notifications/{id}/read - Mark one notification read

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use shared::http::{route_path, segments, success};
use shared::{authenticate, Config, Pagination};

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct NotificationRow {
    id: Uuid,
    kind: String,
    title: String,
    body: Option<String>,
    link: Option<String>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

/// Application state
struct AppState {
    db_pool: PgPool,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let db_pool = shared::db::connect(&config).await?;
        Ok(Self { db_pool })
    }
}

fn parse_notification_id(id: &str) -> shared::Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| shared::Error::Validation("Invalid notification ID".to_string()))
}

async fn list_notifications(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let params = event.query_string_parameters();
    let pagination = Pagination::from_params(params.first("page"), params.first("limit"));
    let unread_only = params.first("unread") == Some("true");

    let rows: Vec<NotificationRow> = sqlx::query_as(
        r#"
        SELECT id, kind, title, body, link, is_read, created_at
        FROM notifications
        WHERE user_id = $1 AND (NOT $2 OR is_read = FALSE)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user.user_id)
    .bind(unread_only)
    .bind(pagination.limit)
    .bind(pagination.offset())
    .fetch_all(&state.db_pool)
    .await?;

    let unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user.user_id)
    .fetch_one(&state.db_pool)
    .await?;

    success(
        200,
        serde_json::json!({
            "notifications": rows,
            "unreadCount": unread,
            "pagination": { "page": pagination.page, "limit": pagination.limit },
        }),
        "Notifications retrieved",
    )
}

async fn mark_read(state: &AppState, event: &Request, id: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let notification_id = parse_notification_id(id)?;

    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE id = $1 AND user_id = $2",
    )
    .bind(notification_id)
    .bind(user.user_id)
    .execute(&state.db_pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(shared::Error::NotFound("Notification not found".to_string()));
    }

    info!(notification_id = %notification_id, "Notification marked read");
    success(
        200,
        serde_json::json!({ "id": notification_id.to_string(), "isRead": true }),
        "Notification marked as read",
    )
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, segments(path).as_slice()) {
        ("GET", ["notifications"]) => list_notifications(state, event).await,
        ("PATCH", ["notifications", id, "read"]) => mark_read(state, event, id).await,
        _ => Err(shared::Error::NotFound("Not found".to_string())),
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    match route(&state, &event).await {
        Ok(response) => Ok(response),
        Err(e) => shared::http::from_error(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    shared::init_tracing();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

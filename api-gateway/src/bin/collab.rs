//! Collab Lambda - Calls for collaborators on creative projects.
//!
//! Endpoints:
//! - GET /collab - List posts (public, paginated; `status`, `tag` filters)
//! - POST /collab - Create a post
//! - GET /collab/my - Caller's posts, all statuses
//! - GET /collab/{id} - Get a post by id or slug (public; drafts owner only)
//! - PATCH /collab/{id} - Update a post (owner only)
//! - DELETE /collab/{id} - Delete a post (owner only)
//! - PATCH /collab/{id}/close - Close a post (owner only)
//! - POST /collab/{id}/interest - Express interest
//! - DELETE /collab/{id}/interest - Withdraw interest
//! - GET /collab/{id}/interests - List interested users (owner only)
//! - GET /collab/{id}/collaborators - List collaborators (public)
//! - POST /collab/{id}/collaborators - Add a collaborator (owner only)
//! - DELETE /collab/{id}/collaborators/{userId} - Remove a collaborator (owner only)

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use shared::http::{parse_json_body, route_path, segments, success};
use shared::models::{ensure_visible, normalize_tags, CollabStatus, NotificationKind};
use shared::profiles::{notify_after_commit, NewNotification};
use shared::slug::{unique_slug, SlugTable};
use shared::validation::{trim_field, trim_optional, validate_request};
use shared::{authenticate, optional_user, AuthenticatedUser, Config, Pagination};

/// Create collab post request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateCollabRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be 3-200 characters"))]
    title: String,
    #[validate(length(min = 10, max = 5000, message = "Summary must be 10-5000 characters"))]
    summary: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    draft: bool,
}

impl CreateCollabRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_field(&mut self.title);
        trim_field(&mut self.summary);
        validate_request(self)
    }
}

/// Update collab post request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateCollabRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be 3-200 characters"))]
    title: Option<String>,
    #[validate(length(min = 10, max = 5000, message = "Summary must be 10-5000 characters"))]
    summary: Option<String>,
    status: Option<String>,
    tags: Option<Vec<String>>,
}

impl UpdateCollabRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_optional(&mut self.title);
        trim_optional(&mut self.summary);
        validate_request(self)
    }
}

/// Add collaborator request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AddCollaboratorRequest {
    user_id: Uuid,
    #[validate(length(max = 100, message = "Role must be at most 100 characters"))]
    role: Option<String>,
    #[validate(length(max = 100, message = "Department must be at most 100 characters"))]
    department: Option<String>,
}

/// Express interest request
#[derive(Debug, Default, Deserialize, Validate)]
struct InterestRequest {
    #[validate(length(max = 1000, message = "Message must be at most 1000 characters"))]
    message: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct CollabRow {
    id: Uuid,
    slug: String,
    user_id: Uuid,
    author_name: Option<String>,
    title: String,
    summary: String,
    status: String,
    interest_count: i64,
    created_at: DateTime<Utc>,
}

/// Collab post response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollabResponse {
    id: String,
    slug: String,
    title: String,
    summary: String,
    status: String,
    tags: Vec<String>,
    interest_count: i64,
    author: serde_json::Value,
    created_at: String,
}

impl CollabResponse {
    fn new(row: CollabRow, tags: Vec<String>) -> Self {
        Self {
            id: row.id.to_string(),
            slug: row.slug,
            title: row.title,
            summary: row.summary,
            status: row.status,
            tags,
            interest_count: row.interest_count,
            author: serde_json::json!({
                "id": row.user_id.to_string(),
                "displayName": row.author_name,
            }),
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

const COLLAB_SELECT: &str = r#"
    SELECT p.id, p.slug, p.user_id, prof.display_name AS author_name, p.title, p.summary,
           p.status, p.created_at,
           (SELECT COUNT(*) FROM collab_interests i WHERE i.collab_id = p.id) AS interest_count
    FROM collab_posts p
    LEFT JOIN user_profiles prof ON prof.id = p.user_id
"#;

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

async fn load_tags(pool: &PgPool, ids: &[Uuid]) -> shared::Result<HashMap<Uuid, Vec<String>>> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT collab_id, tag FROM collab_tags WHERE collab_id = ANY($1) ORDER BY collab_id, tag",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut tags: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (id, tag) in rows {
        tags.entry(id).or_default().push(tag);
    }
    Ok(tags)
}

async fn with_tags(pool: &PgPool, rows: Vec<CollabRow>) -> shared::Result<Vec<CollabResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut tags = load_tags(pool, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let post_tags = tags.remove(&row.id).unwrap_or_default();
            CollabResponse::new(row, post_tags)
        })
        .collect())
}

async fn find_post(pool: &PgPool, key: &str) -> shared::Result<CollabRow> {
    let row = match Uuid::parse_str(key) {
        Ok(id) => {
            sqlx::query_as::<_, CollabRow>(&format!("{} WHERE p.id = $1", COLLAB_SELECT))
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        Err(_) => {
            sqlx::query_as::<_, CollabRow>(&format!("{} WHERE p.slug = $1", COLLAB_SELECT))
                .bind(key)
                .fetch_optional(pool)
                .await?
        }
    };
    row.ok_or_else(|| shared::Error::NotFound("Collab post not found".to_string()))
}

/// Drafts are visible to their author only.
fn check_visible(post: &CollabRow, viewer: Option<Uuid>) -> shared::Result<()> {
    let is_draft = post.status == CollabStatus::Draft.as_str();
    ensure_visible(is_draft, post.user_id, viewer, "Collab post not found")
}

fn require_owner(post: &CollabRow, user: &AuthenticatedUser, action: &str) -> shared::Result<()> {
    if post.user_id == user.user_id {
        Ok(())
    } else {
        Err(shared::Error::Forbidden(format!("Only the post owner can {}", action)))
    }
}

/// Look up a post the caller is allowed to see.
async fn find_visible_post(pool: &PgPool, key: &str, viewer: Option<Uuid>) -> shared::Result<CollabRow> {
    let post = find_post(pool, key).await?;
    check_visible(&post, viewer)?;
    Ok(post)
}

async fn replace_tags(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    post_id: Uuid,
    tags: &[String],
) -> shared::Result<()> {
    sqlx::query("DELETE FROM collab_tags WHERE collab_id = $1")
        .bind(post_id)
        .execute(&mut **tx)
        .await?;
    for tag in tags {
        sqlx::query("INSERT INTO collab_tags (collab_id, tag) VALUES ($1, $2)")
            .bind(post_id)
            .bind(tag)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn list_posts(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let params = event.query_string_parameters();
    let pagination = Pagination::from_params(params.first("page"), params.first("limit"));
    let status: CollabStatus = params.first("status").unwrap_or("open").parse()?;
    if status == CollabStatus::Draft {
        return Err(shared::Error::Validation(
            "Drafts are only listed under /collab/my".to_string(),
        ));
    }
    let tag = params.first("tag").map(|t| t.trim().to_lowercase());

    let filter = r#"
        WHERE p.status = $1
        AND ($2::text IS NULL OR EXISTS(
            SELECT 1 FROM collab_tags t WHERE t.collab_id = p.id AND t.tag = $2
        ))
    "#;

    let rows: Vec<CollabRow> = sqlx::query_as(&format!(
        "{} {} ORDER BY p.created_at DESC LIMIT $3 OFFSET $4",
        COLLAB_SELECT, filter
    ))
    .bind(status.as_str())
    .bind(&tag)
    .bind(pagination.limit)
    .bind(pagination.offset())
    .fetch_all(&state.db_pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM collab_posts p {}",
        filter
    ))
    .bind(status.as_str())
    .bind(&tag)
    .fetch_one(&state.db_pool)
    .await?;

    let posts = with_tags(&state.db_pool, rows).await?;

    success(
        200,
        serde_json::json!({
            "posts": posts,
            "pagination": pagination.with_total(total),
        }),
        "Collab posts retrieved",
    )
}

async fn create_post(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let mut request: CreateCollabRequest = parse_json_body(event.body())?;
    request.check()?;
    let tags = normalize_tags(&request.tags)?;

    let status = if request.draft {
        CollabStatus::Draft
    } else {
        CollabStatus::Open
    };
    let slug = unique_slug(&state.db_pool, SlugTable::CollabPosts, &request.title).await?;
    let post_id = Uuid::new_v4();

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO collab_posts (id, slug, user_id, title, summary, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(post_id)
    .bind(&slug)
    .bind(user.user_id)
    .bind(&request.title)
    .bind(&request.summary)
    .bind(status.as_str())
    .execute(&mut *tx)
    .await?;

    replace_tags(&mut tx, post_id, &tags).await?;
    tx.commit().await?;

    info!(collab_id = %post_id, slug = %slug, "Created collab post");

    success(
        201,
        serde_json::json!({ "id": post_id.to_string(), "slug": slug, "tags": tags }),
        "Collab post created",
    )
}

async fn my_posts(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;

    let rows: Vec<CollabRow> = sqlx::query_as(&format!(
        "{} WHERE p.user_id = $1 ORDER BY p.created_at DESC",
        COLLAB_SELECT
    ))
    .bind(user.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    let posts = with_tags(&state.db_pool, rows).await?;
    success(200, posts, "Collab posts retrieved")
}

async fn get_post(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let viewer = optional_user(event)?.map(|u| u.user_id);
    let row = find_visible_post(&state.db_pool, key, viewer).await?;
    let mut posts = with_tags(&state.db_pool, vec![row]).await?;
    let post = posts
        .pop()
        .ok_or_else(|| shared::Error::NotFound("Collab post not found".to_string()))?;
    success(200, post, "Collab post retrieved")
}

async fn update_post(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_owner(&post, &user, "edit it")?;

    let mut request: UpdateCollabRequest = parse_json_body(event.body())?;
    request.check()?;
    let status = request
        .status
        .as_deref()
        .map(str::parse::<CollabStatus>)
        .transpose()?;
    let tags = request.tags.as_deref().map(normalize_tags).transpose()?;

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE collab_posts SET
            title = COALESCE($2, title),
            summary = COALESCE($3, summary),
            status = COALESCE($4, status),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post.id)
    .bind(&request.title)
    .bind(&request.summary)
    .bind(status.map(CollabStatus::as_str))
    .execute(&mut *tx)
    .await?;

    if let Some(tags) = &tags {
        replace_tags(&mut tx, post.id, tags).await?;
    }
    tx.commit().await?;

    info!(collab_id = %post.id, "Updated collab post");
    get_post(state, event, &post.id.to_string()).await
}

async fn delete_post(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_owner(&post, &user, "delete it")?;

    sqlx::query("DELETE FROM collab_posts WHERE id = $1")
        .bind(post.id)
        .execute(&state.db_pool)
        .await?;

    info!(collab_id = %post.id, "Deleted collab post");
    success(200, serde_json::json!({ "id": post.id.to_string() }), "Collab post deleted")
}

async fn close_post(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_owner(&post, &user, "close it")?;

    sqlx::query("UPDATE collab_posts SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(post.id)
        .bind(CollabStatus::Closed.as_str())
        .execute(&state.db_pool)
        .await?;

    info!(collab_id = %post.id, "Closed collab post");
    success(
        200,
        serde_json::json!({ "id": post.id.to_string(), "status": CollabStatus::Closed }),
        "Collab post closed",
    )
}

async fn express_interest(
    state: &AppState,
    event: &Request,
    key: &str,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_visible_post(&state.db_pool, key, Some(user.user_id)).await?;
    if post.user_id == user.user_id {
        return Err(shared::Error::Validation(
            "You cannot express interest in your own post".to_string(),
        ));
    }
    if post.status != CollabStatus::Open.as_str() {
        return Err(shared::Error::Validation(
            "This collab post is not open".to_string(),
        ));
    }

    let request: InterestRequest = if event.body().is_empty() {
        InterestRequest::default()
    } else {
        parse_json_body(event.body())?
    };
    validate_request(&request)?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO collab_interests (collab_id, user_id, message)
        VALUES ($1, $2, $3)
        ON CONFLICT (collab_id, user_id) DO NOTHING
        "#,
    )
    .bind(post.id)
    .bind(user.user_id)
    .bind(&request.message)
    .execute(&state.db_pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(shared::Error::Conflict(
            "You have already expressed interest".to_string(),
        ));
    }

    notify_after_commit(
        &state.db_pool,
        NewNotification {
            user_id: post.user_id,
            kind: NotificationKind::CollabInterest,
            title: "Someone is interested in your collab",
            body: Some(post.title.as_str()),
            link: Some(format!("/collab/{}", post.slug)),
        },
    )
    .await;

    info!(collab_id = %post.id, user_id = %user.user_id, "Interest expressed");
    success(201, serde_json::json!({ "collabId": post.id.to_string() }), "Interest expressed")
}

async fn withdraw_interest(
    state: &AppState,
    event: &Request,
    key: &str,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;

    let deleted = sqlx::query("DELETE FROM collab_interests WHERE collab_id = $1 AND user_id = $2")
        .bind(post.id)
        .bind(user.user_id)
        .execute(&state.db_pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(shared::Error::NotFound("Interest not found".to_string()));
    }

    success(200, serde_json::json!({ "collabId": post.id.to_string() }), "Interest removed")
}

async fn list_interests(
    state: &AppState,
    event: &Request,
    key: &str,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_owner(&post, &user, "view interests")?;

    let rows: Vec<(Uuid, Option<String>, Option<String>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT i.user_id, prof.display_name, i.message, i.created_at
        FROM collab_interests i
        LEFT JOIN user_profiles prof ON prof.id = i.user_id
        WHERE i.collab_id = $1
        ORDER BY i.created_at
        "#,
    )
    .bind(post.id)
    .fetch_all(&state.db_pool)
    .await?;

    let interests: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(user_id, display_name, message, created_at)| {
            serde_json::json!({
                "userId": user_id.to_string(),
                "displayName": display_name,
                "message": message,
                "createdAt": created_at.to_rfc3339(),
            })
        })
        .collect();

    success(
        200,
        serde_json::json!({ "count": interests.len(), "interests": interests }),
        "Interests retrieved",
    )
}

async fn list_collaborators(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let viewer = optional_user(event)?.map(|u| u.user_id);
    let post = find_visible_post(&state.db_pool, key, viewer).await?;

    let rows: Vec<(Uuid, Option<String>, Option<String>, Option<String>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT c.user_id, prof.display_name, c.role, c.department, c.added_at
        FROM collab_collaborators c
        LEFT JOIN user_profiles prof ON prof.id = c.user_id
        WHERE c.collab_id = $1
        ORDER BY c.added_at
        "#,
    )
    .bind(post.id)
    .fetch_all(&state.db_pool)
    .await?;

    let collaborators: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(user_id, display_name, role, department, added_at)| {
            serde_json::json!({
                "userId": user_id.to_string(),
                "displayName": display_name,
                "role": role,
                "department": department,
                "addedAt": added_at.to_rfc3339(),
            })
        })
        .collect();

    success(200, collaborators, "Collaborators retrieved")
}

async fn add_collaborator(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_owner(&post, &user, "add collaborators")?;

    let mut request: AddCollaboratorRequest = parse_json_body(event.body())?;
    trim_optional(&mut request.role);
    trim_optional(&mut request.department);
    validate_request(&request)?;
    if request.user_id == post.user_id {
        return Err(shared::Error::Validation(
            "The post owner is already part of the project".to_string(),
        ));
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_profiles WHERE id = $1)")
        .bind(request.user_id)
        .fetch_one(&state.db_pool)
        .await?;
    if !exists {
        return Err(shared::Error::NotFound("User not found".to_string()));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO collab_collaborators (collab_id, user_id, role, department)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (collab_id, user_id) DO NOTHING
        "#,
    )
    .bind(post.id)
    .bind(request.user_id)
    .bind(&request.role)
    .bind(&request.department)
    .execute(&state.db_pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(shared::Error::Conflict(
            "This user is already a collaborator".to_string(),
        ));
    }

    notify_after_commit(
        &state.db_pool,
        NewNotification {
            user_id: request.user_id,
            kind: NotificationKind::CollaboratorAdded,
            title: "You were added as a collaborator",
            body: Some(post.title.as_str()),
            link: Some(format!("/collab/{}", post.slug)),
        },
    )
    .await;

    info!(collab_id = %post.id, collaborator = %request.user_id, "Collaborator added");
    success(
        201,
        serde_json::json!({ "collabId": post.id.to_string(), "userId": request.user_id.to_string() }),
        "Collaborator added",
    )
}

async fn remove_collaborator(
    state: &AppState,
    event: &Request,
    key: &str,
    collaborator: &str,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_owner(&post, &user, "remove collaborators")?;
    let collaborator = Uuid::parse_str(collaborator)
        .map_err(|_| shared::Error::Validation("Invalid user ID".to_string()))?;

    let deleted = sqlx::query("DELETE FROM collab_collaborators WHERE collab_id = $1 AND user_id = $2")
        .bind(post.id)
        .bind(collaborator)
        .execute(&state.db_pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(shared::Error::NotFound("Collaborator not found".to_string()));
    }

    info!(collab_id = %post.id, collaborator = %collaborator, "Collaborator removed");
    success(
        200,
        serde_json::json!({ "collabId": post.id.to_string(), "userId": collaborator.to_string() }),
        "Collaborator removed",
    )
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, segments(path).as_slice()) {
        ("GET", ["collab"]) => list_posts(state, event).await,
        ("POST", ["collab"]) => create_post(state, event).await,
        ("GET", ["collab", "my"]) => my_posts(state, event).await,
        ("GET", ["collab", id]) => get_post(state, event, id).await,
        ("PATCH", ["collab", id]) => update_post(state, event, id).await,
        ("DELETE", ["collab", id]) => delete_post(state, event, id).await,
        ("PATCH", ["collab", id, "close"]) => close_post(state, event, id).await,
        ("POST", ["collab", id, "interest"]) => express_interest(state, event, id).await,
        ("DELETE", ["collab", id, "interest"]) => withdraw_interest(state, event, id).await,
        ("GET", ["collab", id, "interests"]) => list_interests(state, event, id).await,
        ("GET", ["collab", id, "collaborators"]) => list_collaborators(state, event, id).await,
        ("POST", ["collab", id, "collaborators"]) => add_collaborator(state, event, id).await,
        ("DELETE", ["collab", id, "collaborators", user_id]) => {
            remove_collaborator(state, event, id, user_id).await
        }
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

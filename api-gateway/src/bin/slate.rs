//! Slate Lambda - Short posts feed with media, reactions and comments.
//!
//! Endpoints:
//! - GET /slate - Published feed (public, paginated)
//! - POST /slate - Create a post
//! - GET /slate/my - Caller's posts, all statuses
//! - GET /slate/saved - Posts the caller saved
//! - PATCH /slate/comment/{commentId} - Edit a comment (author only)
//! - DELETE /slate/comment/{commentId} - Delete a comment and its replies (author only)
//! - GET /slate/{id} - Post by id or slug (public; unpublished posts author only)
//! - PATCH /slate/{id} - Update a post (author only)
//! - DELETE /slate/{id} - Delete a post (author only)
//! - GET /slate/{id}/likes - Users who liked the post (public)
//! - POST /slate/{id}/likes - Like
//! - DELETE /slate/{id}/likes - Unlike
//! - POST /slate/{id}/save - Save
//! - DELETE /slate/{id}/save - Unsave
//! - POST /slate/{id}/share - Share
//! - DELETE /slate/{id}/share - Unshare
//! - GET /slate/{id}/comment - Comment threads, newest first (public)
//! - POST /slate/{id}/comment - Comment or reply

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use shared::http::{parse_json_body, route_path, segments, success};
use shared::models::{ensure_visible, NotificationKind, SlateStatus};
use shared::profiles::{notify_after_commit, NewNotification};
use shared::slug::{unique_slug, SlugTable};
use shared::validation::{trim_field, trim_optional, validate_request};
use shared::{authenticate, optional_user, AuthenticatedUser, Config, Pagination};

/// Most media items one post may carry.
const MAX_MEDIA: usize = 10;

/// Words of the content used to build a slug.
const SLUG_WORDS: usize = 8;

const FEED_PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaInput {
    url: String,
    media_type: String,
}

/// Create slate post request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateSlateRequest {
    #[validate(length(min = 1, max = 5000, message = "Content must be 1-5000 characters"))]
    content: String,
    #[serde(default)]
    media: Vec<MediaInput>,
    #[serde(default)]
    draft: bool,
}

impl CreateSlateRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_field(&mut self.content);
        validate_request(self)?;
        check_media(&self.media)
    }
}

/// Update slate post request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateSlateRequest {
    #[validate(length(min = 1, max = 5000, message = "Content must be 1-5000 characters"))]
    content: Option<String>,
    status: Option<String>,
    media: Option<Vec<MediaInput>>,
}

impl UpdateSlateRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_optional(&mut self.content);
        validate_request(self)?;
        match &self.media {
            Some(media) => check_media(media),
            None => Ok(()),
        }
    }
}

/// Comment request, also used for edits
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CommentRequest {
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1-2000 characters"))]
    content: String,
    parent_id: Option<Uuid>,
}

impl CommentRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_field(&mut self.content);
        validate_request(self)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SlatePostRow {
    id: Uuid,
    slug: String,
    author_id: Uuid,
    author_name: Option<String>,
    content: String,
    status: String,
    like_count: i64,
    comment_count: i64,
    share_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Author {
    id: Uuid,
    display_name: Option<String>,
}

/// Slate post API response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlatePostResponse {
    id: Uuid,
    slug: String,
    author: Author,
    content: String,
    status: String,
    media: Vec<MediaInput>,
    like_count: i64,
    comment_count: i64,
    share_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    liked_by_me: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_by_me: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SlatePostResponse {
    fn new(row: SlatePostRow, media: Vec<MediaInput>) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            author: Author {
                id: row.author_id,
                display_name: row.author_name,
            },
            content: row.content,
            status: row.status,
            media,
            like_count: row.like_count,
            comment_count: row.comment_count,
            share_count: row.share_count,
            liked_by_me: None,
            saved_by_me: None,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct CommentRow {
    id: Uuid,
    user_id: Uuid,
    author_name: Option<String>,
    parent_id: Option<Uuid>,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentNode {
    #[serde(flatten)]
    comment: CommentRow,
    replies: Vec<CommentNode>,
}

/// The three per-user toggles on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaction {
    Like,
    Save,
    Share,
}

impl Reaction {
    fn insert_sql(self) -> &'static str {
        match self {
            Reaction::Like => {
                "INSERT INTO slate_likes (post_id, user_id) VALUES ($1, $2) ON CONFLICT (post_id, user_id) DO NOTHING"
            }
            Reaction::Save => {
                "INSERT INTO slate_saves (post_id, user_id) VALUES ($1, $2) ON CONFLICT (post_id, user_id) DO NOTHING"
            }
            Reaction::Share => {
                "INSERT INTO slate_shares (post_id, user_id) VALUES ($1, $2) ON CONFLICT (post_id, user_id) DO NOTHING"
            }
        }
    }

    fn delete_sql(self) -> &'static str {
        match self {
            Reaction::Like => "DELETE FROM slate_likes WHERE post_id = $1 AND user_id = $2",
            Reaction::Save => "DELETE FROM slate_saves WHERE post_id = $1 AND user_id = $2",
            Reaction::Share => "DELETE FROM slate_shares WHERE post_id = $1 AND user_id = $2",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Reaction::Like => "liked",
            Reaction::Save => "saved",
            Reaction::Share => "shared",
        }
    }
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

const POST_SELECT: &str = r#"
    SELECT p.id, p.slug, p.author_id, prof.display_name AS author_name, p.content, p.status,
           (SELECT COUNT(*) FROM slate_likes l WHERE l.post_id = p.id) AS like_count,
           (SELECT COUNT(*) FROM slate_comments c WHERE c.post_id = p.id) AS comment_count,
           (SELECT COUNT(*) FROM slate_shares s WHERE s.post_id = p.id) AS share_count,
           p.created_at, p.updated_at
    FROM slate_posts p
    LEFT JOIN user_profiles prof ON prof.id = p.author_id
"#;

fn check_media(media: &[MediaInput]) -> shared::Result<()> {
    if media.len() > MAX_MEDIA {
        return Err(shared::Error::Validation(format!(
            "At most {} media items per post",
            MAX_MEDIA
        )));
    }
    for item in media {
        if !item.url.starts_with("https://") {
            return Err(shared::Error::Validation(
                "Media URLs must use https".to_string(),
            ));
        }
        if !matches!(item.media_type.as_str(), "image" | "video") {
            return Err(shared::Error::Validation(format!(
                "Invalid media type '{}'. Must be one of: image, video",
                item.media_type
            )));
        }
    }
    Ok(())
}

/// Opening words of a post, used as its slug source.
fn slug_source(content: &str) -> String {
    content
        .split_whitespace()
        .take(SLUG_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Nest replies under their parents. Threads come newest first, replies oldest
/// first. `rows` must be in ascending `created_at` order.
fn thread_comments(rows: Vec<CommentRow>) -> Vec<CommentNode> {
    let ids: HashSet<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut children: HashMap<Uuid, Vec<CommentRow>> = HashMap::new();
    let mut roots = Vec::new();

    for row in rows {
        match row.parent_id.filter(|parent| ids.contains(parent)) {
            Some(parent) => children.entry(parent).or_default().push(row),
            None => roots.push(row),
        }
    }

    let mut threads: Vec<CommentNode> = roots
        .into_iter()
        .map(|comment| attach_replies(comment, &mut children))
        .collect();
    threads.reverse();
    threads
}

fn attach_replies(comment: CommentRow, children: &mut HashMap<Uuid, Vec<CommentRow>>) -> CommentNode {
    let replies = children
        .remove(&comment.id)
        .unwrap_or_default()
        .into_iter()
        .map(|reply| attach_replies(reply, children))
        .collect();
    CommentNode { comment, replies }
}

/// Unpublished posts are visible to their author only.
fn check_visible(post: &SlatePostRow, viewer: Option<Uuid>) -> shared::Result<()> {
    let hidden = post.status != SlateStatus::Published.as_str();
    ensure_visible(hidden, post.author_id, viewer, "Slate post not found")
}

fn require_author(post: &SlatePostRow, user: &AuthenticatedUser, action: &str) -> shared::Result<()> {
    if post.author_id == user.user_id {
        Ok(())
    } else {
        Err(shared::Error::Forbidden(format!("Only the author can {}", action)))
    }
}

async fn find_post(pool: &PgPool, key: &str) -> shared::Result<SlatePostRow> {
    let row = match Uuid::parse_str(key) {
        Ok(id) => {
            sqlx::query_as::<_, SlatePostRow>(&format!("{} WHERE p.id = $1", POST_SELECT))
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        Err(_) => {
            sqlx::query_as::<_, SlatePostRow>(&format!("{} WHERE p.slug = $1", POST_SELECT))
                .bind(key)
                .fetch_optional(pool)
                .await?
        }
    };
    row.ok_or_else(|| shared::Error::NotFound("Slate post not found".to_string()))
}

async fn find_visible_post(pool: &PgPool, key: &str, viewer: Option<Uuid>) -> shared::Result<SlatePostRow> {
    let post = find_post(pool, key).await?;
    check_visible(&post, viewer)?;
    Ok(post)
}

async fn load_media(pool: &PgPool, ids: &[Uuid]) -> shared::Result<HashMap<Uuid, Vec<MediaInput>>> {
    let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
        "SELECT post_id, url, media_type FROM slate_media WHERE post_id = ANY($1) ORDER BY post_id, position",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut media: HashMap<Uuid, Vec<MediaInput>> = HashMap::new();
    for (post_id, url, media_type) in rows {
        media.entry(post_id).or_default().push(MediaInput { url, media_type });
    }
    Ok(media)
}

async fn to_responses(pool: &PgPool, rows: Vec<SlatePostRow>) -> shared::Result<Vec<SlatePostResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut media = load_media(pool, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let items = media.remove(&row.id).unwrap_or_default();
            SlatePostResponse::new(row, items)
        })
        .collect())
}

async fn replace_media(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    post_id: Uuid,
    media: &[MediaInput],
) -> shared::Result<()> {
    sqlx::query("DELETE FROM slate_media WHERE post_id = $1")
        .bind(post_id)
        .execute(&mut **tx)
        .await?;
    for (position, item) in media.iter().enumerate() {
        sqlx::query(
            "INSERT INTO slate_media (post_id, position, url, media_type) VALUES ($1, $2, $3, $4)",
        )
        .bind(post_id)
        .bind(position as i32)
        .bind(&item.url)
        .bind(&item.media_type)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn feed(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let params = event.query_string_parameters();
    let pagination = Pagination::from_params_or(params.first("page"), params.first("limit"), FEED_PAGE_SIZE);

    let rows: Vec<SlatePostRow> = sqlx::query_as(&format!(
        "{} WHERE p.status = $1 ORDER BY p.created_at DESC LIMIT $2 OFFSET $3",
        POST_SELECT
    ))
    .bind(SlateStatus::Published.as_str())
    .bind(pagination.limit)
    .bind(pagination.offset())
    .fetch_all(&state.db_pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM slate_posts WHERE status = $1")
        .bind(SlateStatus::Published.as_str())
        .fetch_one(&state.db_pool)
        .await?;

    let posts = to_responses(&state.db_pool, rows).await?;
    success(
        200,
        serde_json::json!({
            "posts": posts,
            "pagination": pagination.with_total(total),
        }),
        "Slate feed retrieved",
    )
}

async fn create_post(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let mut request: CreateSlateRequest = parse_json_body(event.body())?;
    request.check()?;

    let status = if request.draft {
        SlateStatus::Draft
    } else {
        SlateStatus::Published
    };
    let slug = unique_slug(&state.db_pool, SlugTable::SlatePosts, &slug_source(&request.content)).await?;
    let post_id = Uuid::new_v4();

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO slate_posts (id, slug, author_id, content, status)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(post_id)
    .bind(&slug)
    .bind(user.user_id)
    .bind(&request.content)
    .bind(status.as_str())
    .execute(&mut *tx)
    .await?;

    replace_media(&mut tx, post_id, &request.media).await?;
    tx.commit().await?;

    info!(post_id = %post_id, slug = %slug, "Created slate post");

    success(
        201,
        serde_json::json!({ "id": post_id.to_string(), "slug": slug, "status": status }),
        "Slate post created",
    )
}

async fn my_posts(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;

    let rows: Vec<SlatePostRow> = sqlx::query_as(&format!(
        "{} WHERE p.author_id = $1 ORDER BY p.created_at DESC",
        POST_SELECT
    ))
    .bind(user.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    let posts = to_responses(&state.db_pool, rows).await?;
    success(200, posts, "Your slate posts retrieved")
}

async fn saved_posts(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;

    // Saved posts that have since been unpublished drop out for everyone but their author.
    let rows: Vec<SlatePostRow> = sqlx::query_as(&format!(
        r#"{}
        JOIN slate_saves sv ON sv.post_id = p.id
        WHERE sv.user_id = $1 AND (p.status = $2 OR p.author_id = $1)
        ORDER BY sv.created_at DESC"#,
        POST_SELECT
    ))
    .bind(user.user_id)
    .bind(SlateStatus::Published.as_str())
    .fetch_all(&state.db_pool)
    .await?;

    let posts = to_responses(&state.db_pool, rows).await?;
    success(200, posts, "Saved slate posts retrieved")
}

async fn get_post(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let viewer = optional_user(event)?.map(|u| u.user_id);
    let post = find_visible_post(&state.db_pool, key, viewer).await?;

    let flags = match viewer {
        Some(user_id) => {
            let (liked, saved): (bool, bool) = sqlx::query_as(
                r#"
                SELECT EXISTS(SELECT 1 FROM slate_likes WHERE post_id = $1 AND user_id = $2),
                       EXISTS(SELECT 1 FROM slate_saves WHERE post_id = $1 AND user_id = $2)
                "#,
            )
            .bind(post.id)
            .bind(user_id)
            .fetch_one(&state.db_pool)
            .await?;
            Some((liked, saved))
        }
        None => None,
    };

    let mut posts = to_responses(&state.db_pool, vec![post]).await?;
    let mut response = posts
        .pop()
        .ok_or_else(|| shared::Error::NotFound("Slate post not found".to_string()))?;
    if let Some((liked, saved)) = flags {
        response.liked_by_me = Some(liked);
        response.saved_by_me = Some(saved);
    }
    success(200, response, "Slate post retrieved")
}

async fn update_post(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_author(&post, &user, "edit this post")?;

    let mut request: UpdateSlateRequest = parse_json_body(event.body())?;
    request.check()?;
    let status = request
        .status
        .as_deref()
        .map(str::parse::<SlateStatus>)
        .transpose()?;

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE slate_posts SET
            content = COALESCE($2, content),
            status = COALESCE($3, status),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post.id)
    .bind(&request.content)
    .bind(status.map(SlateStatus::as_str))
    .execute(&mut *tx)
    .await?;

    if let Some(media) = &request.media {
        replace_media(&mut tx, post.id, media).await?;
    }
    tx.commit().await?;

    info!(post_id = %post.id, "Updated slate post");
    get_post(state, event, &post.id.to_string()).await
}

async fn delete_post(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_post(&state.db_pool, key).await?;
    require_author(&post, &user, "delete this post")?;

    sqlx::query("DELETE FROM slate_posts WHERE id = $1")
        .bind(post.id)
        .execute(&state.db_pool)
        .await?;

    info!(post_id = %post.id, "Deleted slate post");
    success(200, serde_json::json!({ "id": post.id.to_string() }), "Slate post deleted")
}

async fn list_likes(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let viewer = optional_user(event)?.map(|u| u.user_id);
    let post = find_visible_post(&state.db_pool, key, viewer).await?;

    let rows: Vec<(Uuid, Option<String>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT l.user_id, prof.display_name, l.created_at
        FROM slate_likes l
        LEFT JOIN user_profiles prof ON prof.id = l.user_id
        WHERE l.post_id = $1
        ORDER BY l.created_at DESC
        "#,
    )
    .bind(post.id)
    .fetch_all(&state.db_pool)
    .await?;

    let likes: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(user_id, display_name, created_at)| {
            serde_json::json!({
                "userId": user_id.to_string(),
                "displayName": display_name,
                "likedAt": created_at.to_rfc3339(),
            })
        })
        .collect();

    success(200, likes, "Likes retrieved")
}

/// A post the caller may react to: visible to them and published.
async fn find_reactable_post(pool: &PgPool, key: &str, user: &AuthenticatedUser) -> shared::Result<SlatePostRow> {
    let post = find_visible_post(pool, key, Some(user.user_id)).await?;
    if post.status != SlateStatus::Published.as_str() {
        return Err(shared::Error::Validation(
            "This post is not published".to_string(),
        ));
    }
    Ok(post)
}

async fn add_reaction(
    state: &AppState,
    event: &Request,
    key: &str,
    reaction: Reaction,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_reactable_post(&state.db_pool, key, &user).await?;
    if reaction == Reaction::Share && post.author_id == user.user_id {
        return Err(shared::Error::Validation(
            "You cannot share your own post".to_string(),
        ));
    }

    let inserted = sqlx::query(reaction.insert_sql())
        .bind(post.id)
        .bind(user.user_id)
        .execute(&state.db_pool)
        .await?;

    if inserted.rows_affected() == 0 {
        return Err(shared::Error::Conflict(format!(
            "You have already {} this post",
            reaction.past_tense()
        )));
    }

    info!(post_id = %post.id, user_id = %user.user_id, "Slate post {}", reaction.past_tense());
    success(
        201,
        serde_json::json!({
            "postId": post.id.to_string(),
            "reaction": reaction.past_tense(),
            "active": true,
        }),
        "Reaction saved",
    )
}

async fn remove_reaction(
    state: &AppState,
    event: &Request,
    key: &str,
    reaction: Reaction,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_visible_post(&state.db_pool, key, Some(user.user_id)).await?;

    let deleted = sqlx::query(reaction.delete_sql())
        .bind(post.id)
        .bind(user.user_id)
        .execute(&state.db_pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(shared::Error::NotFound(format!(
            "You have not {} this post",
            reaction.past_tense()
        )));
    }

    success(
        200,
        serde_json::json!({
            "postId": post.id.to_string(),
            "reaction": reaction.past_tense(),
            "active": false,
        }),
        "Reaction removed",
    )
}

async fn list_comments(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let viewer = optional_user(event)?.map(|u| u.user_id);
    let post = find_visible_post(&state.db_pool, key, viewer).await?;

    let rows: Vec<CommentRow> = sqlx::query_as(
        r#"
        SELECT c.id, c.user_id, prof.display_name AS author_name, c.parent_id, c.content,
               c.created_at, c.updated_at
        FROM slate_comments c
        LEFT JOIN user_profiles prof ON prof.id = c.user_id
        WHERE c.post_id = $1
        ORDER BY c.created_at
        "#,
    )
    .bind(post.id)
    .fetch_all(&state.db_pool)
    .await?;

    success(200, thread_comments(rows), "Comments retrieved")
}

async fn add_comment(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let post = find_reactable_post(&state.db_pool, key, &user).await?;

    let mut request: CommentRequest = parse_json_body(event.body())?;
    request.check()?;

    if let Some(parent_id) = request.parent_id {
        let parent_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM slate_comments WHERE id = $1 AND post_id = $2)",
        )
        .bind(parent_id)
        .bind(post.id)
        .fetch_one(&state.db_pool)
        .await?;
        if !parent_exists {
            return Err(shared::Error::NotFound("Parent comment not found".to_string()));
        }
    }

    let comment_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO slate_comments (id, post_id, user_id, parent_id, content)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(comment_id)
    .bind(post.id)
    .bind(user.user_id)
    .bind(request.parent_id)
    .bind(&request.content)
    .execute(&state.db_pool)
    .await?;

    if post.author_id != user.user_id {
        notify_after_commit(
            &state.db_pool,
            NewNotification {
                user_id: post.author_id,
                kind: NotificationKind::SlateComment,
                title: "New comment on your post",
                body: Some(request.content.as_str()),
                link: Some(format!("/slate/{}", post.slug)),
            },
        )
        .await;
    }

    info!(post_id = %post.id, comment_id = %comment_id, "Comment added");
    success(
        201,
        serde_json::json!({
            "id": comment_id.to_string(),
            "postId": post.id.to_string(),
            "parentId": request.parent_id.map(|p| p.to_string()),
        }),
        "Comment added",
    )
}

async fn find_own_comment(pool: &PgPool, id: &str, user: &AuthenticatedUser) -> shared::Result<Uuid> {
    let comment_id = Uuid::parse_str(id)
        .map_err(|_| shared::Error::Validation("Invalid comment ID".to_string()))?;

    let author: Option<Uuid> = sqlx::query_scalar("SELECT user_id FROM slate_comments WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(pool)
        .await?;

    match author {
        None => Err(shared::Error::NotFound("Comment not found".to_string())),
        Some(author) if author != user.user_id => Err(shared::Error::Forbidden(
            "Only the comment author can change it".to_string(),
        )),
        Some(_) => Ok(comment_id),
    }
}

async fn update_comment(state: &AppState, event: &Request, id: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let comment_id = find_own_comment(&state.db_pool, id, &user).await?;

    let mut request: CommentRequest = parse_json_body(event.body())?;
    request.check()?;

    sqlx::query("UPDATE slate_comments SET content = $2, updated_at = NOW() WHERE id = $1")
        .bind(comment_id)
        .bind(&request.content)
        .execute(&state.db_pool)
        .await?;

    info!(comment_id = %comment_id, "Comment updated");
    success(
        200,
        serde_json::json!({ "id": comment_id.to_string(), "content": request.content }),
        "Comment updated",
    )
}

async fn delete_comment(state: &AppState, event: &Request, id: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let comment_id = find_own_comment(&state.db_pool, id, &user).await?;

    sqlx::query("DELETE FROM slate_comments WHERE id = $1")
        .bind(comment_id)
        .execute(&state.db_pool)
        .await?;

    info!(comment_id = %comment_id, "Comment deleted");
    success(200, serde_json::json!({ "id": comment_id.to_string() }), "Comment deleted")
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, segments(path).as_slice()) {
        ("GET", ["slate"]) => feed(state, event).await,
        ("POST", ["slate"]) => create_post(state, event).await,
        ("GET", ["slate", "my"]) => my_posts(state, event).await,
        ("GET", ["slate", "saved"]) => saved_posts(state, event).await,
        ("PATCH", ["slate", "comment", id]) => update_comment(state, event, id).await,
        ("DELETE", ["slate", "comment", id]) => delete_comment(state, event, id).await,
        ("GET", ["slate", id]) => get_post(state, event, id).await,
        ("PATCH", ["slate", id]) => update_post(state, event, id).await,
        ("DELETE", ["slate", id]) => delete_post(state, event, id).await,
        ("GET", ["slate", id, "likes"]) => list_likes(state, event, id).await,
        ("POST", ["slate", id, "likes"]) => add_reaction(state, event, id, Reaction::Like).await,
        ("DELETE", ["slate", id, "likes"]) => remove_reaction(state, event, id, Reaction::Like).await,
        ("POST", ["slate", id, "save"]) => add_reaction(state, event, id, Reaction::Save).await,
        ("DELETE", ["slate", id, "save"]) => remove_reaction(state, event, id, Reaction::Save).await,
        ("POST", ["slate", id, "share"]) => add_reaction(state, event, id, Reaction::Share).await,
        ("DELETE", ["slate", id, "share"]) => remove_reaction(state, event, id, Reaction::Share).await,
        ("GET", ["slate", id, "comment"]) => list_comments(state, event, id).await,
        ("POST", ["slate", id, "comment"]) => add_comment(state, event, id).await,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn comment(id: Uuid, parent_id: Option<Uuid>, secs: i64) -> CommentRow {
        CommentRow {
            id,
            user_id: Uuid::nil(),
            author_name: None,
            parent_id,
            content: format!("comment at {}", secs),
            created_at: at(secs),
            updated_at: at(secs),
        }
    }

    fn post(status: &str, author: Uuid) -> SlatePostRow {
        SlatePostRow {
            id: Uuid::nil(),
            slug: "wrapped-day-three".to_string(),
            author_id: author,
            author_name: Some("Ines".to_string()),
            content: "Wrapped day three of the shoot".to_string(),
            status: status.to_string(),
            like_count: 4,
            comment_count: 2,
            share_count: 1,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    #[test]
    fn test_content_trimmed_and_bounded() {
        let mut request: CreateSlateRequest =
            serde_json::from_value(serde_json::json!({ "content": "  Wrapped!  " })).unwrap();
        assert!(request.check().is_ok());
        assert_eq!(request.content, "Wrapped!");
        assert!(!request.draft);

        let mut blank: CreateSlateRequest =
            serde_json::from_value(serde_json::json!({ "content": "    " })).unwrap();
        assert!(matches!(blank.check(), Err(shared::Error::Validation(_))));

        let mut long: CreateSlateRequest =
            serde_json::from_value(serde_json::json!({ "content": "a".repeat(5001) })).unwrap();
        assert!(long.check().is_err());
    }

    #[test]
    fn test_media_rules() {
        let image = MediaInput {
            url: "https://cdn.example.com/still.jpg".to_string(),
            media_type: "image".to_string(),
        };
        assert!(check_media(&[image.clone()]).is_ok());
        assert!(check_media(&vec![image.clone(); MAX_MEDIA + 1]).is_err());

        let insecure = MediaInput {
            url: "http://cdn.example.com/still.jpg".to_string(),
            ..image.clone()
        };
        assert!(check_media(&[insecure]).is_err());

        let audio = MediaInput {
            media_type: "audio".to_string(),
            ..image
        };
        assert!(check_media(&[audio]).is_err());
    }

    #[test]
    fn test_comment_length() {
        let mut request: CommentRequest =
            serde_json::from_value(serde_json::json!({ "content": "a".repeat(2001) })).unwrap();
        assert!(request.check().is_err());

        let mut padded: CommentRequest =
            serde_json::from_value(serde_json::json!({ "content": "  nice  " })).unwrap();
        assert!(padded.check().is_ok());
        assert_eq!(padded.content, "nice");
    }

    #[test]
    fn test_slug_source() {
        assert_eq!(
            slug_source("Wrapped   day three of the shoot, huge thanks to everyone on set"),
            "Wrapped day three of the shoot, huge thanks"
        );
        assert_eq!(slug_source("   "), "");
    }

    #[test]
    fn test_thread_comments() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let reply = Uuid::new_v4();
        let nested = Uuid::new_v4();
        let orphan = Uuid::new_v4();

        let threads = thread_comments(vec![
            comment(first, None, 1),
            comment(reply, Some(first), 2),
            comment(second, None, 3),
            comment(nested, Some(reply), 4),
            comment(orphan, Some(Uuid::new_v4()), 5),
        ]);

        let roots: Vec<Uuid> = threads.iter().map(|t| t.comment.id).collect();
        assert_eq!(roots, vec![orphan, second, first]);
        let first_thread = &threads[2];
        assert_eq!(first_thread.replies.len(), 1);
        assert_eq!(first_thread.replies[0].comment.id, reply);
        assert_eq!(first_thread.replies[0].replies[0].comment.id, nested);

        let json = serde_json::to_value(&threads[2]).unwrap();
        assert!(json.get("parentId").is_some());
        assert_eq!(json["replies"][0]["replies"][0]["id"], nested.to_string());
    }

    #[test]
    fn test_unpublished_posts_hidden() {
        let author = Uuid::new_v4();
        for status in ["draft", "archived"] {
            let row = post(status, author);
            assert!(check_visible(&row, Some(author)).is_ok());
            assert!(matches!(check_visible(&row, None), Err(shared::Error::NotFound(_))));
        }
        assert!(check_visible(&post("published", author), None).is_ok());
    }

    #[test]
    fn test_reaction_sql() {
        assert!(Reaction::Save.insert_sql().contains("slate_saves"));
        assert!(Reaction::Share.delete_sql().contains("slate_shares"));
        assert_eq!(Reaction::Like.past_tense(), "liked");
    }

    #[test]
    fn test_response_shape() {
        let media = vec![MediaInput {
            url: "https://cdn.example.com/still.jpg".to_string(),
            media_type: "image".to_string(),
        }];
        let json = serde_json::to_value(SlatePostResponse::new(post("published", Uuid::nil()), media)).unwrap();
        assert_eq!(json["likeCount"], 4);
        assert_eq!(json["author"]["displayName"], "Ines");
        assert_eq!(json["media"][0]["mediaType"], "image");
        assert!(json.get("likedByMe").is_none());
    }
}

//! Gigs Lambda - Job postings and applications.
//!
//! Endpoints:
//! - GET /gigs - List active gigs (public, paginated)
//! - POST /gigs - Create a gig (complete profile required)
//! - GET /gigs/{id} - Get gig details by id or slug (public; drafts creator only)
//! - PATCH /gigs/{id} - Update a gig (creator only)
//! - DELETE /gigs/{id} - Delete a gig (creator only)
//! - POST /gigs/{id}/apply - Apply to a gig
//! - GET /gigs/{id}/applications - List applications (creator only)
//! - PATCH /gigs/{id}/applications/{applicationId}/status - Update application status (creator only)
//! - GET /applications/my - Caller's applications
//! - GET /applications/{id} - One application (applicant or gig creator)

use chrono::{DateTime, NaiveDate, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use shared::calendar::{
    format_day_ranges, month_label, parse_day_ranges, parse_month_label,
    transform_calendar_months, CalendarMonth, MonthDays,
};
use shared::http::{parse_json_body, route_path, segments, success};
use shared::models::{
    ensure_visible, format_budget_label, ApplicationStatus, GigStatus, NotificationKind,
};
use shared::profiles::{notify_after_commit, profile_completeness, NewNotification};
use shared::slug::{unique_slug, SlugTable};
use shared::validation::{trim_field, trim_optional, validate_request};
use shared::{authenticate, optional_user, AuthenticatedUser, Config, Pagination};

/// Create gig request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateGigRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be 3-200 characters"))]
    title: String,
    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    description: Option<String>,
    qualifying_criteria: Option<String>,
    budget_amount: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    request_quote: bool,
    #[validate(range(min = 1, message = "Crew count must be at least 1"))]
    crew_count: Option<i32>,
    expiry_date: Option<NaiveDate>,
    #[serde(default)]
    dates: Vec<MonthDays>,
    #[serde(default)]
    locations: Vec<String>,
}

/// Update gig request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateGigRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be 3-200 characters"))]
    title: Option<String>,
    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    description: Option<String>,
    qualifying_criteria: Option<String>,
    budget_amount: Option<i64>,
    currency: Option<String>,
    request_quote: Option<bool>,
    #[validate(range(min = 1, message = "Crew count must be at least 1"))]
    crew_count: Option<i32>,
    expiry_date: Option<NaiveDate>,
    status: Option<String>,
    dates: Option<Vec<MonthDays>>,
    locations: Option<Vec<String>>,
}

/// Apply request
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest {
    #[validate(length(max = 5000, message = "Cover note must be at most 5000 characters"))]
    cover_note: Option<String>,
    resume_url: Option<String>,
    portfolio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct GigRow {
    id: Uuid,
    slug: String,
    title: String,
    description: Option<String>,
    qualifying_criteria: Option<String>,
    budget_amount: Option<i64>,
    currency: String,
    request_quote: bool,
    crew_count: i32,
    expiry_date: Option<NaiveDate>,
    status: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

/// Gig API response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GigResponse {
    id: String,
    slug: String,
    title: String,
    description: Option<String>,
    qualifying_criteria: Option<String>,
    budget_amount: Option<i64>,
    currency: String,
    request_quote: bool,
    budget_label: String,
    crew_count: i32,
    expiry_date: Option<String>,
    status: String,
    created_by: String,
    created_at: String,
    locations: Vec<String>,
    calendar_months: Vec<CalendarMonth>,
}

impl GigResponse {
    fn new(row: GigRow, dates: &[MonthDays], locations: Vec<String>) -> Self {
        Self {
            budget_label: format_budget_label(row.budget_amount, &row.currency, row.request_quote),
            calendar_months: transform_calendar_months(dates),
            id: row.id.to_string(),
            slug: row.slug,
            title: row.title,
            description: row.description,
            qualifying_criteria: row.qualifying_criteria,
            budget_amount: row.budget_amount,
            currency: row.currency,
            request_quote: row.request_quote,
            crew_count: row.crew_count,
            expiry_date: row.expiry_date.map(|d| d.to_string()),
            status: row.status,
            created_by: row.created_by.to_string(),
            created_at: row.created_at.to_rfc3339(),
            locations,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    id: Uuid,
    gig_id: Uuid,
    applicant_user_id: Uuid,
    display_name: Option<String>,
    cover_note: Option<String>,
    resume_url: Option<String>,
    portfolio_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationDetailRow {
    #[sqlx(flatten)]
    application: ApplicationRow,
    gig_created_by: Uuid,
    gig_slug: String,
    gig_title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationResponse {
    id: String,
    gig_id: String,
    applicant_user_id: String,
    display_name: Option<String>,
    cover_note: Option<String>,
    resume_url: Option<String>,
    portfolio_url: Option<String>,
    status: String,
    created_at: String,
}

impl From<ApplicationRow> for ApplicationResponse {
    fn from(row: ApplicationRow) -> Self {
        Self {
            id: row.id.to_string(),
            gig_id: row.gig_id.to_string(),
            applicant_user_id: row.applicant_user_id.to_string(),
            display_name: row.display_name,
            cover_note: row.cover_note,
            resume_url: row.resume_url,
            portfolio_url: row.portfolio_url,
            status: row.status,
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

const GIG_COLUMNS: &str = "id, slug, title, description, qualifying_criteria, budget_amount, \
     currency, request_quote, crew_count, expiry_date, status, created_by, created_at";

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

fn check_budget(amount: Option<i64>) -> shared::Result<()> {
    match amount {
        Some(amount) if amount < 0 => Err(shared::Error::Validation(
            "Budget must not be negative".to_string(),
        )),
        _ => Ok(()),
    }
}

impl CreateGigRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_field(&mut self.title);
        validate_request(self)?;
        check_budget(self.budget_amount)
    }
}

impl UpdateGigRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_optional(&mut self.title);
        validate_request(self)?;
        check_budget(self.budget_amount)
    }
}

/// Validate and canonicalise gig dates before storing them.
///
/// Each entry's label becomes `"Mon YYYY"` and its days compact range notation.
fn normalize_dates(dates: &[MonthDays]) -> shared::Result<Vec<MonthDays>> {
    dates
        .iter()
        .map(|entry| {
            let (year, month) = parse_month_label(&entry.month).ok_or_else(|| {
                shared::Error::Validation(format!("Invalid month '{}'", entry.month))
            })?;
            let days = parse_day_ranges(&entry.days);
            if days.is_empty() {
                return Err(shared::Error::Validation(format!(
                    "No valid days given for {}",
                    entry.month
                )));
            }
            Ok(MonthDays {
                month: month_label(year, month).unwrap_or_else(|| entry.month.clone()),
                days: format_day_ranges(&days),
            })
        })
        .collect()
}

fn clean_locations(locations: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for location in locations.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if !cleaned.iter().any(|c| c.eq_ignore_ascii_case(location)) {
            cleaned.push(location.to_string());
        }
    }
    cleaned
}

/// Dates and locations for a batch of gigs.
async fn load_gig_extras(
    pool: &PgPool,
    gig_ids: &[Uuid],
) -> shared::Result<(HashMap<Uuid, Vec<MonthDays>>, HashMap<Uuid, Vec<String>>)> {
    let mut dates: HashMap<Uuid, Vec<MonthDays>> = HashMap::new();
    let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
        "SELECT gig_id, month, days FROM gig_dates WHERE gig_id = ANY($1) ORDER BY gig_id, position",
    )
    .bind(gig_ids)
    .fetch_all(pool)
    .await?;
    for (gig_id, month, days) in rows {
        dates.entry(gig_id).or_default().push(MonthDays { month, days });
    }

    let mut locations: HashMap<Uuid, Vec<String>> = HashMap::new();
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT gig_id, location FROM gig_locations WHERE gig_id = ANY($1) ORDER BY gig_id, location",
    )
    .bind(gig_ids)
    .fetch_all(pool)
    .await?;
    for (gig_id, location) in rows {
        locations.entry(gig_id).or_default().push(location);
    }

    Ok((dates, locations))
}

async fn replace_dates_and_locations(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    gig_id: Uuid,
    dates: Option<&[MonthDays]>,
    locations: Option<&[String]>,
) -> shared::Result<()> {
    if let Some(dates) = dates {
        sqlx::query("DELETE FROM gig_dates WHERE gig_id = $1")
            .bind(gig_id)
            .execute(&mut **tx)
            .await?;
        for (position, entry) in dates.iter().enumerate() {
            sqlx::query(
                "INSERT INTO gig_dates (gig_id, position, month, days) VALUES ($1, $2, $3, $4)",
            )
            .bind(gig_id)
            .bind(position as i32)
            .bind(&entry.month)
            .bind(&entry.days)
            .execute(&mut **tx)
            .await?;
        }
    }

    if let Some(locations) = locations {
        sqlx::query("DELETE FROM gig_locations WHERE gig_id = $1")
            .bind(gig_id)
            .execute(&mut **tx)
            .await?;
        for location in locations {
            sqlx::query("INSERT INTO gig_locations (gig_id, location) VALUES ($1, $2)")
                .bind(gig_id)
                .bind(location)
                .execute(&mut **tx)
                .await?;
        }
    }

    Ok(())
}

/// Find a gig by UUID or slug.
async fn find_gig(pool: &PgPool, key: &str) -> shared::Result<GigRow> {
    let row = match Uuid::parse_str(key) {
        Ok(id) => {
            sqlx::query_as::<_, GigRow>(&format!("SELECT {} FROM gigs WHERE id = $1", GIG_COLUMNS))
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        Err(_) => {
            sqlx::query_as::<_, GigRow>(&format!("SELECT {} FROM gigs WHERE slug = $1", GIG_COLUMNS))
                .bind(key)
                .fetch_optional(pool)
                .await?
        }
    };
    row.ok_or_else(|| shared::Error::NotFound("Gig not found".to_string()))
}

fn require_creator(gig: &GigRow, user: &AuthenticatedUser) -> shared::Result<()> {
    if gig.created_by == user.user_id {
        Ok(())
    } else {
        Err(shared::Error::Forbidden(
            "Only the gig creator can do this".to_string(),
        ))
    }
}

async fn list_gigs(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let params = event.query_string_parameters();
    let pagination = Pagination::from_params(params.first("page"), params.first("limit"));

    let rows: Vec<GigRow> = sqlx::query_as(&format!(
        "SELECT {} FROM gigs WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        GIG_COLUMNS
    ))
    .bind(GigStatus::Active.as_str())
    .bind(pagination.limit)
    .bind(pagination.offset())
    .fetch_all(&state.db_pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gigs WHERE status = $1")
        .bind(GigStatus::Active.as_str())
        .fetch_one(&state.db_pool)
        .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let (mut dates, mut locations) = load_gig_extras(&state.db_pool, &ids).await?;

    let gigs: Vec<GigResponse> = rows
        .into_iter()
        .map(|row| {
            let gig_dates = dates.remove(&row.id).unwrap_or_default();
            let gig_locations = locations.remove(&row.id).unwrap_or_default();
            GigResponse::new(row, &gig_dates, gig_locations)
        })
        .collect();

    success(
        200,
        serde_json::json!({
            "gigs": gigs,
            "pagination": pagination.with_total(total),
        }),
        "Gigs retrieved",
    )
}

async fn create_gig(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    profile_completeness(&state.db_pool, user.user_id)
        .await?
        .require_complete()?;

    let mut request: CreateGigRequest = parse_json_body(event.body())?;
    request.check()?;

    let dates = normalize_dates(&request.dates)?;
    let locations = clean_locations(&request.locations);
    let slug = unique_slug(&state.db_pool, SlugTable::Gigs, &request.title).await?;
    let gig_id = Uuid::new_v4();

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO gigs (id, slug, title, description, qualifying_criteria, budget_amount,
                          currency, request_quote, crew_count, expiry_date, status, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(gig_id)
    .bind(&slug)
    .bind(&request.title)
    .bind(&request.description)
    .bind(&request.qualifying_criteria)
    .bind(request.budget_amount)
    .bind(request.currency.as_deref().unwrap_or("USD"))
    .bind(request.request_quote)
    .bind(request.crew_count.unwrap_or(1))
    .bind(request.expiry_date)
    .bind(GigStatus::Active.as_str())
    .bind(user.user_id)
    .execute(&mut *tx)
    .await?;

    replace_dates_and_locations(&mut tx, gig_id, Some(dates.as_slice()), Some(locations.as_slice())).await?;
    tx.commit().await?;

    info!(gig_id = %gig_id, slug = %slug, user_id = %user.user_id, "Created gig");

    success(
        201,
        serde_json::json!({ "id": gig_id.to_string(), "slug": slug }),
        "Gig created successfully",
    )
}

/// Drafts are visible to their creator only.
fn check_visible(gig: &GigRow, viewer: Option<Uuid>) -> shared::Result<()> {
    let is_draft = gig.status == GigStatus::Draft.as_str();
    ensure_visible(is_draft, gig.created_by, viewer, "Gig not found")
}

async fn get_gig(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let viewer = optional_user(event)?;
    let gig = find_gig(&state.db_pool, key).await?;
    check_visible(&gig, viewer.map(|u| u.user_id))?;
    let (mut dates, mut locations) = load_gig_extras(&state.db_pool, &[gig.id]).await?;
    let gig_dates = dates.remove(&gig.id).unwrap_or_default();
    let gig_locations = locations.remove(&gig.id).unwrap_or_default();

    success(
        200,
        GigResponse::new(gig, &gig_dates, gig_locations),
        "Gig retrieved",
    )
}

async fn update_gig(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let gig = find_gig(&state.db_pool, key).await?;
    require_creator(&gig, &user)?;

    let mut request: UpdateGigRequest = parse_json_body(event.body())?;
    request.check()?;

    let status = request
        .status
        .as_deref()
        .map(str::parse::<GigStatus>)
        .transpose()?;
    let dates = request.dates.as_deref().map(normalize_dates).transpose()?;
    let locations = request.locations.as_deref().map(clean_locations);

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE gigs SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            qualifying_criteria = COALESCE($4, qualifying_criteria),
            budget_amount = COALESCE($5, budget_amount),
            currency = COALESCE($6, currency),
            request_quote = COALESCE($7, request_quote),
            crew_count = COALESCE($8, crew_count),
            expiry_date = COALESCE($9, expiry_date),
            status = COALESCE($10, status),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(gig.id)
    .bind(&request.title)
    .bind(&request.description)
    .bind(&request.qualifying_criteria)
    .bind(request.budget_amount)
    .bind(&request.currency)
    .bind(request.request_quote)
    .bind(request.crew_count)
    .bind(request.expiry_date)
    .bind(status.map(GigStatus::as_str))
    .execute(&mut *tx)
    .await?;

    replace_dates_and_locations(&mut tx, gig.id, dates.as_deref(), locations.as_deref()).await?;
    tx.commit().await?;

    info!(gig_id = %gig.id, "Updated gig");
    get_gig(state, event, &gig.id.to_string()).await
}

async fn delete_gig(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let gig = find_gig(&state.db_pool, key).await?;
    require_creator(&gig, &user)?;

    sqlx::query("DELETE FROM gigs WHERE id = $1")
        .bind(gig.id)
        .execute(&state.db_pool)
        .await?;

    info!(gig_id = %gig.id, "Deleted gig");
    success(200, serde_json::json!({ "id": gig.id.to_string() }), "Gig deleted")
}

async fn apply(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    profile_completeness(&state.db_pool, user.user_id)
        .await?
        .require_complete()?;

    let gig = find_gig(&state.db_pool, key).await?;
    check_visible(&gig, Some(user.user_id))?;
    if gig.created_by == user.user_id {
        return Err(shared::Error::Validation(
            "You cannot apply to your own gig".to_string(),
        ));
    }
    if gig.status != GigStatus::Active.as_str() {
        return Err(shared::Error::Validation(
            "This gig is not accepting applications".to_string(),
        ));
    }

    let request: ApplyRequest = if event.body().is_empty() {
        ApplyRequest::default()
    } else {
        parse_json_body(event.body())?
    };
    validate_request(&request)?;

    let application_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO applications (id, gig_id, applicant_user_id, cover_note, resume_url, portfolio_url, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (gig_id, applicant_user_id) DO NOTHING
        "#,
    )
    .bind(application_id)
    .bind(gig.id)
    .bind(user.user_id)
    .bind(&request.cover_note)
    .bind(&request.resume_url)
    .bind(&request.portfolio_url)
    .bind(ApplicationStatus::Pending.as_str())
    .execute(&state.db_pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(shared::Error::Conflict(
            "You have already applied to this gig".to_string(),
        ));
    }

    notify_after_commit(
        &state.db_pool,
        NewNotification {
            user_id: gig.created_by,
            kind: NotificationKind::ApplicationReceived,
            title: "New application received",
            body: Some(gig.title.as_str()),
            link: Some(format!("/gigs/{}/applications", gig.slug)),
        },
    )
    .await;

    info!(gig_id = %gig.id, application_id = %application_id, "Application submitted");

    success(
        201,
        serde_json::json!({
            "id": application_id.to_string(),
            "status": ApplicationStatus::Pending,
        }),
        "Application submitted",
    )
}

async fn list_applications(
    state: &AppState,
    event: &Request,
    key: &str,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let gig = find_gig(&state.db_pool, key).await?;
    require_creator(&gig, &user)?;

    let applications: Vec<ApplicationResponse> = sqlx::query_as::<_, ApplicationRow>(
        r#"
        SELECT a.id, a.gig_id, a.applicant_user_id, p.display_name, a.cover_note,
               a.resume_url, a.portfolio_url, a.status, a.created_at
        FROM applications a
        LEFT JOIN user_profiles p ON p.id = a.applicant_user_id
        WHERE a.gig_id = $1
        ORDER BY a.created_at
        "#,
    )
    .bind(gig.id)
    .fetch_all(&state.db_pool)
    .await?
    .into_iter()
    .map(ApplicationResponse::from)
    .collect();

    success(
        200,
        serde_json::json!({ "count": applications.len(), "applications": applications }),
        "Applications retrieved",
    )
}

async fn update_application_status(
    state: &AppState,
    event: &Request,
    key: &str,
    application_id: &str,
) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let gig = find_gig(&state.db_pool, key).await?;
    require_creator(&gig, &user)?;

    let application_id = Uuid::parse_str(application_id)
        .map_err(|_| shared::Error::Validation("Invalid application ID".to_string()))?;
    let request: StatusUpdateRequest = parse_json_body(event.body())?;
    let status: ApplicationStatus = request.status.parse()?;

    let applicant: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE applications SET status = $3, updated_at = NOW()
        WHERE id = $1 AND gig_id = $2
        RETURNING applicant_user_id
        "#,
    )
    .bind(application_id)
    .bind(gig.id)
    .bind(status.as_str())
    .fetch_optional(&state.db_pool)
    .await?;

    let applicant =
        applicant.ok_or_else(|| shared::Error::NotFound("Application not found".to_string()))?;

    let body = format!("{}: {}", gig.title, status.as_str());
    notify_after_commit(
        &state.db_pool,
        NewNotification {
            user_id: applicant,
            kind: NotificationKind::StatusChanged,
            title: "Application status updated",
            body: Some(body.as_str()),
            link: Some(format!("/gigs/{}", gig.slug)),
        },
    )
    .await;

    info!(application_id = %application_id, status = status.as_str(), "Application status changed");

    success(
        200,
        serde_json::json!({ "id": application_id.to_string(), "status": status }),
        "Application status updated",
    )
}

async fn my_applications(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;

    let rows: Vec<(Uuid, String, DateTime<Utc>, Uuid, String, String)> = sqlx::query_as(
        r#"
        SELECT a.id, a.status, a.created_at, g.id, g.slug, g.title
        FROM applications a
        JOIN gigs g ON g.id = a.gig_id
        WHERE a.applicant_user_id = $1
        ORDER BY a.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    let applications: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, status, created_at, gig_id, slug, title)| {
            serde_json::json!({
                "id": id.to_string(),
                "status": status,
                "createdAt": created_at.to_rfc3339(),
                "gig": { "id": gig_id.to_string(), "slug": slug, "title": title },
            })
        })
        .collect();

    success(200, applications, "Applications retrieved")
}

/// The applicant and the gig's creator may read an application.
fn can_read_application(applicant: Uuid, gig_creator: Uuid, caller: Uuid) -> bool {
    caller == applicant || caller == gig_creator
}

async fn get_application(state: &AppState, event: &Request, id: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let application_id = Uuid::parse_str(id)
        .map_err(|_| shared::Error::Validation("Invalid application ID".to_string()))?;

    let row: Option<ApplicationDetailRow> = sqlx::query_as(
        r#"
        SELECT a.id, a.gig_id, a.applicant_user_id, p.display_name, a.cover_note,
               a.resume_url, a.portfolio_url, a.status, a.created_at,
               g.created_by AS gig_created_by, g.slug AS gig_slug, g.title AS gig_title
        FROM applications a
        JOIN gigs g ON g.id = a.gig_id
        LEFT JOIN user_profiles p ON p.id = a.applicant_user_id
        WHERE a.id = $1
        "#,
    )
    .bind(application_id)
    .fetch_optional(&state.db_pool)
    .await?;

    let row = row.ok_or_else(|| shared::Error::NotFound("Application not found".to_string()))?;

    if !can_read_application(row.application.applicant_user_id, row.gig_created_by, user.user_id) {
        return Err(shared::Error::Forbidden(
            "Only the applicant or the gig creator can view this application".to_string(),
        ));
    }

    let gig = serde_json::json!({
        "id": row.application.gig_id.to_string(),
        "slug": row.gig_slug,
        "title": row.gig_title,
    });
    let mut body = serde_json::to_value(ApplicationResponse::from(row.application))?;
    body["gig"] = gig;

    success(200, body, "Application retrieved")
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, segments(path).as_slice()) {
        ("GET", ["gigs"]) => list_gigs(state, event).await,
        ("POST", ["gigs"]) => create_gig(state, event).await,
        ("GET", ["applications", "my"]) => my_applications(state, event).await,
        ("GET", ["applications", id]) => get_application(state, event, id).await,
        ("GET", ["gigs", id]) => get_gig(state, event, id).await,
        ("PATCH", ["gigs", id]) => update_gig(state, event, id).await,
        ("DELETE", ["gigs", id]) => delete_gig(state, event, id).await,
        ("POST", ["gigs", id, "apply"]) => apply(state, event, id).await,
        ("GET", ["gigs", id, "applications"]) => list_applications(state, event, id).await,
        ("PATCH", ["gigs", id, "applications", application_id, "status"]) => {
            update_application_status(state, event, id, application_id).await
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

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(month: &str, days: &str) -> MonthDays {
        MonthDays {
            month: month.to_string(),
            days: days.to_string(),
        }
    }

    #[test]
    fn test_normalize_dates() {
        let dates =
            normalize_dates(&[entry("september 2025", "15-20, 1-5,10, 3")]).unwrap();
        assert_eq!(dates[0].month, "Sep 2025");
        assert_eq!(dates[0].days, "1-5, 10, 15-20");
    }

    #[test]
    fn test_normalize_rejects_bad_month_or_empty_days() {
        assert!(matches!(
            normalize_dates(&[entry("Smarch 2025", "1")]),
            Err(shared::Error::Validation(_))
        ));
        assert!(matches!(
            normalize_dates(&[entry("Sep 2025", "nope")]),
            Err(shared::Error::Validation(_))
        ));
    }

    #[test]
    fn test_clean_locations() {
        let cleaned = clean_locations(&[
            " London ".to_string(),
            "london".to_string(),
            "".to_string(),
            "Mumbai".to_string(),
        ]);
        assert_eq!(cleaned, vec!["London", "Mumbai"]);
    }

    #[test]
    fn test_create_request_validation() {
        let request: CreateGigRequest = serde_json::from_value(serde_json::json!({
            "title": "DP",
            "crewCount": 0,
        }))
        .unwrap();
        assert!(matches!(
            validate_request(&request),
            Err(shared::Error::Validation(_))
        ));

        let request: CreateGigRequest = serde_json::from_value(serde_json::json!({
            "title": "4 Video Editors for Shortfilm",
            "budgetAmount": 40000,
            "currency": "INR",
            "dates": [{ "month": "Sep 2025", "days": "1-5" }],
            "locations": ["Mumbai"],
        }))
        .unwrap();
        assert!(validate_request(&request).is_ok());
        assert!(!request.request_quote);
    }

    #[test]
    fn test_create_title_trimmed_before_length_check() {
        let mut request: CreateGigRequest = serde_json::from_value(serde_json::json!({
            "title": "  ab  ",
        }))
        .unwrap();
        assert!(matches!(request.check(), Err(shared::Error::Validation(_))));

        let mut request: CreateGigRequest = serde_json::from_value(serde_json::json!({
            "title": "  Gaffer needed  ",
        }))
        .unwrap();
        request.check().unwrap();
        assert_eq!(request.title, "Gaffer needed");
    }

    #[test]
    fn test_update_rules_match_create() {
        for body in [
            serde_json::json!({ "crewCount": 0 }),
            serde_json::json!({ "budgetAmount": -500 }),
            serde_json::json!({ "title": " x " }),
        ] {
            let mut request: UpdateGigRequest = serde_json::from_value(body.clone()).unwrap();
            assert!(
                matches!(request.check(), Err(shared::Error::Validation(_))),
                "{}",
                body
            );
        }

        let mut request: UpdateGigRequest =
            serde_json::from_value(serde_json::json!({ "crewCount": 3, "budgetAmount": 0 })).unwrap();
        assert!(request.check().is_ok());
    }

    #[test]
    fn test_draft_gig_hidden_from_others() {
        let creator = Uuid::new_v4();
        let mut gig = GigRow {
            id: Uuid::nil(),
            slug: "gaffer-for-music-video".to_string(),
            title: "Gaffer for music video".to_string(),
            description: None,
            qualifying_criteria: None,
            budget_amount: Some(40000),
            currency: "INR".to_string(),
            request_quote: false,
            crew_count: 1,
            expiry_date: None,
            status: "draft".to_string(),
            created_by: creator,
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        assert!(check_visible(&gig, Some(creator)).is_ok());
        assert!(matches!(check_visible(&gig, None), Err(shared::Error::NotFound(_))));
        assert!(matches!(
            check_visible(&gig, Some(Uuid::new_v4())),
            Err(shared::Error::NotFound(_))
        ));

        gig.status = "active".to_string();
        assert!(check_visible(&gig, None).is_ok());
    }

    #[test]
    fn test_application_readers() {
        let applicant = Uuid::new_v4();
        let creator = Uuid::new_v4();
        assert!(can_read_application(applicant, creator, applicant));
        assert!(can_read_application(applicant, creator, creator));
        assert!(!can_read_application(applicant, creator, Uuid::new_v4()));
    }
}

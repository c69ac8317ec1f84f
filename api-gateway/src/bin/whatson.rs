//! What's On Lambda - Community events and RSVPs.
//!
//! Endpoints:
//! - GET /whatson - List events (public, paginated; `isPaid`, `isOnline` filters)
//! - POST /whatson - Create an event
//! - GET /whatson/my - Caller's events, all statuses
//! - GET /whatson/calendar?year=&month= - Calendar page with event days (public)
//! - GET /whatson/rsvps/my - Caller's RSVPs
//! - GET /whatson/{id} - Event details by id or slug (public; drafts creator only)
//! - PATCH /whatson/{id} - Update an event (creator only)
//! - DELETE /whatson/{id} - Delete an event (creator only)
//! - POST /whatson/{id}/rsvp - RSVP to an event
//! - DELETE /whatson/{id}/rsvp - Cancel the caller's RSVP
//! - GET /whatson/{id}/rsvp/list - RSVPs for an event (creator only)
//! - GET /whatson/{id}/rsvp/export - RSVPs as CSV (creator only)

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use shared::calendar::{build_calendar_cells, month_grid, month_label};
use shared::http::{csv_response, parse_json_body, route_path, segments, success};
use shared::models::{
    ensure_visible, format_budget_label, normalize_tags, EventStatus, NotificationKind, RsvpStatus,
};
use shared::profiles::{notify_after_commit, NewNotification};
use shared::slug::{unique_slug, SlugTable};
use shared::tickets::{reference_number, ticket_number, validate_spot_request, PaymentStatus};
use shared::validation::{trim_field, trim_optional, validate_request};
use shared::{authenticate, optional_user, AuthenticatedUser, Config, Pagination};

/// One scheduled session of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleEntry {
    date: NaiveDate,
    start_time: Option<String>,
    end_time: Option<String>,
}

/// Create event request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be 3-200 characters"))]
    title: String,
    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    description: Option<String>,
    #[serde(default)]
    is_online: bool,
    location: Option<String>,
    #[serde(default)]
    is_paid: bool,
    price_amount: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    unlimited_spots: bool,
    total_spots: Option<i32>,
    max_spots_per_person: Option<i32>,
    #[serde(default)]
    draft: bool,
    schedule: Vec<ScheduleEntry>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Update event request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateEventRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be 3-200 characters"))]
    title: Option<String>,
    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    description: Option<String>,
    is_online: Option<bool>,
    location: Option<String>,
    is_paid: Option<bool>,
    price_amount: Option<i64>,
    currency: Option<String>,
    unlimited_spots: Option<bool>,
    total_spots: Option<i32>,
    max_spots_per_person: Option<i32>,
    status: Option<String>,
    schedule: Option<Vec<ScheduleEntry>>,
    tags: Option<Vec<String>>,
}

/// RSVP request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RsvpRequest {
    #[serde(default = "one_spot")]
    number_of_spots: u32,
    #[serde(default)]
    dates: Vec<NaiveDate>,
}

fn one_spot() -> u32 {
    1
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    slug: String,
    created_by: Uuid,
    title: String,
    description: Option<String>,
    is_online: bool,
    location: Option<String>,
    is_paid: bool,
    price_amount: Option<i64>,
    currency: String,
    unlimited_spots: bool,
    total_spots: Option<i32>,
    max_spots_per_person: i32,
    status: String,
    created_at: DateTime<Utc>,
    spots_taken: i64,
}

impl EventRow {
    /// Spots still open, `None` when unlimited.
    fn available_spots(&self) -> Option<i64> {
        if self.unlimited_spots {
            None
        } else {
            Some((i64::from(self.total_spots.unwrap_or(0)) - self.spots_taken).max(0))
        }
    }
}

/// Event API response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: String,
    slug: String,
    title: String,
    description: Option<String>,
    is_online: bool,
    location: Option<String>,
    is_paid: bool,
    price_label: String,
    unlimited_spots: bool,
    total_spots: Option<i32>,
    max_spots_per_person: i32,
    rsvp_count: i64,
    available_spots: Option<i64>,
    status: String,
    created_by: String,
    created_at: String,
    schedule: Vec<ScheduleEntry>,
    tags: Vec<String>,
}

impl EventResponse {
    fn new(row: EventRow, schedule: Vec<ScheduleEntry>, tags: Vec<String>) -> Self {
        let price_label = if row.is_paid {
            format_budget_label(row.price_amount, &row.currency, false)
        } else {
            "Free".to_string()
        };
        Self {
            available_spots: row.available_spots(),
            price_label,
            id: row.id.to_string(),
            slug: row.slug,
            title: row.title,
            description: row.description,
            is_online: row.is_online,
            location: row.location,
            is_paid: row.is_paid,
            unlimited_spots: row.unlimited_spots,
            total_spots: row.total_spots,
            max_spots_per_person: row.max_spots_per_person,
            rsvp_count: row.spots_taken,
            status: row.status,
            created_by: row.created_by.to_string(),
            created_at: row.created_at.to_rfc3339(),
            schedule,
            tags,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RsvpRow {
    id: Uuid,
    user_id: Uuid,
    display_name: Option<String>,
    email: Option<String>,
    number_of_spots: i32,
    ticket_number: String,
    reference_number: String,
    payment_status: String,
    status: String,
    created_at: DateTime<Utc>,
    dates: Vec<NaiveDate>,
}

const EVENT_SELECT: &str = r#"
    SELECT e.id, e.slug, e.created_by, e.title, e.description, e.is_online, e.location,
           e.is_paid, e.price_amount, e.currency, e.unlimited_spots, e.total_spots,
           e.max_spots_per_person, e.status, e.created_at,
           COALESCE((SELECT SUM(r.number_of_spots) FROM whatson_rsvps r
                     WHERE r.event_id = e.id AND r.status = 'confirmed'), 0)::BIGINT AS spots_taken
    FROM whatson_events e
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

/// Location and capacity rules shared by create and update.
fn check_event_shape(
    is_online: bool,
    location: Option<&str>,
    unlimited_spots: bool,
    total_spots: Option<i32>,
    max_spots_per_person: i32,
) -> shared::Result<()> {
    if !is_online && location.map_or(true, |l| l.trim().is_empty()) {
        return Err(shared::Error::Validation(
            "Location is required for in-person events".to_string(),
        ));
    }
    if max_spots_per_person < 1 {
        return Err(shared::Error::Validation(
            "Max spots per person must be at least 1".to_string(),
        ));
    }
    if !unlimited_spots {
        match total_spots {
            Some(total) if total >= 1 => {
                if max_spots_per_person > total {
                    return Err(shared::Error::Validation(
                        "Max spots per person cannot exceed total spots".to_string(),
                    ));
                }
            }
            _ => {
                return Err(shared::Error::Validation(
                    "Total spots are required unless spots are unlimited".to_string(),
                ))
            }
        }
    }
    Ok(())
}

fn check_price(is_paid: bool, price_amount: Option<i64>) -> shared::Result<()> {
    if is_paid && price_amount.map_or(true, |p| p <= 0) {
        return Err(shared::Error::Validation(
            "Paid events need a price".to_string(),
        ));
    }
    Ok(())
}

impl CreateEventRequest {
    fn check(&mut self) -> shared::Result<()> {
        trim_field(&mut self.title);
        trim_optional(&mut self.location);
        validate_request(self)?;
        check_event_shape(
            self.is_online,
            self.location.as_deref(),
            self.unlimited_spots,
            self.total_spots,
            self.max_spots_per_person.unwrap_or(1),
        )?;
        check_schedule(&self.schedule)?;
        check_price(self.is_paid, self.price_amount)
    }
}

impl UpdateEventRequest {
    /// Applies the create rules to the event as it would look after the update.
    fn check(&mut self, existing: &EventRow) -> shared::Result<()> {
        trim_optional(&mut self.title);
        trim_optional(&mut self.location);
        validate_request(self)?;

        let unlimited = self.unlimited_spots.unwrap_or(existing.unlimited_spots);
        let total_spots = self.total_spots.or(existing.total_spots);
        check_event_shape(
            self.is_online.unwrap_or(existing.is_online),
            self.location.as_deref().or(existing.location.as_deref()),
            unlimited,
            total_spots,
            self.max_spots_per_person.unwrap_or(existing.max_spots_per_person),
        )?;
        check_price(
            self.is_paid.unwrap_or(existing.is_paid),
            self.price_amount.or(existing.price_amount),
        )?;
        if !unlimited {
            if let Some(total) = total_spots {
                if i64::from(total) < existing.spots_taken {
                    return Err(shared::Error::Conflict(format!(
                        "{} spots are already taken",
                        existing.spots_taken
                    )));
                }
            }
        }
        if let Some(schedule) = &self.schedule {
            check_schedule(schedule)?;
        }
        Ok(())
    }
}

fn parse_time(label: &str, value: &str) -> shared::Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| {
        shared::Error::Validation(format!("Invalid {} '{}', expected HH:MM", label, value))
    })
}

/// Schedule must be non-empty, with well-formed, ordered times and no repeated days.
fn check_schedule(schedule: &[ScheduleEntry]) -> shared::Result<()> {
    if schedule.is_empty() {
        return Err(shared::Error::Validation(
            "At least one scheduled date is required".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    for entry in schedule {
        if !seen.insert(entry.date) {
            return Err(shared::Error::Validation(format!(
                "{} is scheduled more than once",
                entry.date
            )));
        }
        let start = entry
            .start_time
            .as_deref()
            .map(|t| parse_time("start time", t))
            .transpose()?;
        let end = entry
            .end_time
            .as_deref()
            .map(|t| parse_time("end time", t))
            .transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(shared::Error::Validation(format!(
                    "End time must be after start time on {}",
                    entry.date
                )));
            }
        }
    }
    Ok(())
}

/// Dates the attendee picked, defaulting to every scheduled date.
fn select_dates(requested: &[NaiveDate], scheduled: &[NaiveDate]) -> shared::Result<Vec<NaiveDate>> {
    if requested.is_empty() {
        return Ok(scheduled.to_vec());
    }
    let picked: BTreeSet<NaiveDate> = requested.iter().copied().collect();
    if let Some(missing) = picked.iter().find(|d| !scheduled.contains(d)) {
        return Err(shared::Error::Validation(format!(
            "{} is not a scheduled date for this event",
            missing
        )));
    }
    Ok(picked.into_iter().collect())
}

fn rsvp_csv(rows: &[RsvpRow]) -> shared::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "Name",
        "Email",
        "Ticket Number",
        "Reference",
        "Spots",
        "Payment Status",
        "RSVP Date",
    ])?;

    for row in rows {
        let spots = row.number_of_spots.to_string();
        let date = row.created_at.format("%Y-%m-%d").to_string();
        writer.write_record([
            row.display_name.as_deref().unwrap_or(""),
            row.email.as_deref().unwrap_or(""),
            row.ticket_number.as_str(),
            row.reference_number.as_str(),
            spots.as_str(),
            row.payment_status.as_str(),
            date.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| shared::Error::Internal(format!("Failed to finish CSV: {}", e)))
}

async fn load_schedules_and_tags(
    pool: &PgPool,
    ids: &[Uuid],
) -> shared::Result<(HashMap<Uuid, Vec<ScheduleEntry>>, HashMap<Uuid, Vec<String>>)> {
    let rows: Vec<(Uuid, NaiveDate, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT event_id, event_date, start_time, end_time
        FROM whatson_schedule
        WHERE event_id = ANY($1)
        ORDER BY event_id, event_date
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut schedules: HashMap<Uuid, Vec<ScheduleEntry>> = HashMap::new();
    for (event_id, date, start_time, end_time) in rows {
        schedules.entry(event_id).or_default().push(ScheduleEntry {
            date,
            start_time,
            end_time,
        });
    }

    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT event_id, tag FROM whatson_tags WHERE event_id = ANY($1) ORDER BY event_id, tag",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut tags: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (event_id, tag) in rows {
        tags.entry(event_id).or_default().push(tag);
    }

    Ok((schedules, tags))
}

async fn to_responses(pool: &PgPool, rows: Vec<EventRow>) -> shared::Result<Vec<EventResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let (mut schedules, mut tags) = load_schedules_and_tags(pool, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let schedule = schedules.remove(&row.id).unwrap_or_default();
            let event_tags = tags.remove(&row.id).unwrap_or_default();
            EventResponse::new(row, schedule, event_tags)
        })
        .collect())
}

async fn replace_schedule_and_tags(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: Uuid,
    schedule: Option<&[ScheduleEntry]>,
    tags: Option<&[String]>,
) -> shared::Result<()> {
    if let Some(schedule) = schedule {
        sqlx::query("DELETE FROM whatson_schedule WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut **tx)
            .await?;
        for entry in schedule {
            sqlx::query(
                r#"
                INSERT INTO whatson_schedule (event_id, event_date, start_time, end_time)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(event_id)
            .bind(entry.date)
            .bind(&entry.start_time)
            .bind(&entry.end_time)
            .execute(&mut **tx)
            .await?;
        }
    }

    if let Some(tags) = tags {
        sqlx::query("DELETE FROM whatson_tags WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut **tx)
            .await?;
        for tag in tags {
            sqlx::query("INSERT INTO whatson_tags (event_id, tag) VALUES ($1, $2)")
                .bind(event_id)
                .bind(tag)
                .execute(&mut **tx)
                .await?;
        }
    }

    Ok(())
}

async fn find_event(pool: &PgPool, key: &str) -> shared::Result<EventRow> {
    let row = match Uuid::parse_str(key) {
        Ok(id) => {
            sqlx::query_as::<_, EventRow>(&format!("{} WHERE e.id = $1", EVENT_SELECT))
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        Err(_) => {
            sqlx::query_as::<_, EventRow>(&format!("{} WHERE e.slug = $1", EVENT_SELECT))
                .bind(key)
                .fetch_optional(pool)
                .await?
        }
    };
    row.ok_or_else(|| shared::Error::NotFound("Event not found".to_string()))
}

/// Drafts are visible to their creator only.
fn check_visible(row: &EventRow, viewer: Option<Uuid>) -> shared::Result<()> {
    let is_draft = row.status == EventStatus::Draft.as_str();
    ensure_visible(is_draft, row.created_by, viewer, "Event not found")
}

fn require_creator(event: &EventRow, user: &AuthenticatedUser) -> shared::Result<()> {
    if event.created_by == user.user_id {
        Ok(())
    } else {
        Err(shared::Error::Forbidden(
            "Only the event creator can do this".to_string(),
        ))
    }
}

fn parse_bool_param(name: &str, value: Option<&str>) -> shared::Result<Option<bool>> {
    match value {
        None => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => Err(shared::Error::Validation(format!(
            "{} must be true or false, got '{}'",
            name, other
        ))),
    }
}

async fn list_events(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let params = event.query_string_parameters();
    let pagination = Pagination::from_params(params.first("page"), params.first("limit"));
    let status: EventStatus = params.first("status").unwrap_or("published").parse()?;
    if status == EventStatus::Draft {
        return Err(shared::Error::Validation(
            "Drafts are only listed under /whatson/my".to_string(),
        ));
    }
    let is_paid = parse_bool_param("isPaid", params.first("isPaid"))?;
    let is_online = parse_bool_param("isOnline", params.first("isOnline"))?;

    let filter = r#"
        WHERE e.status = $1
        AND ($2::boolean IS NULL OR e.is_paid = $2)
        AND ($3::boolean IS NULL OR e.is_online = $3)
    "#;

    let rows: Vec<EventRow> = sqlx::query_as(&format!(
        "{} {} ORDER BY e.created_at DESC LIMIT $4 OFFSET $5",
        EVENT_SELECT, filter
    ))
    .bind(status.as_str())
    .bind(is_paid)
    .bind(is_online)
    .bind(pagination.limit)
    .bind(pagination.offset())
    .fetch_all(&state.db_pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM whatson_events e {}",
        filter
    ))
    .bind(status.as_str())
    .bind(is_paid)
    .bind(is_online)
    .fetch_one(&state.db_pool)
    .await?;

    let events = to_responses(&state.db_pool, rows).await?;

    success(
        200,
        serde_json::json!({
            "events": events,
            "pagination": pagination.with_total(total),
        }),
        "Events retrieved",
    )
}

async fn create_event(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let mut request: CreateEventRequest = parse_json_body(event.body())?;
    request.check()?;

    let max_per_person = request.max_spots_per_person.unwrap_or(1);
    let tags = normalize_tags(&request.tags)?;

    let status = if request.draft {
        EventStatus::Draft
    } else {
        EventStatus::Published
    };
    let slug = unique_slug(&state.db_pool, SlugTable::WhatsOnEvents, &request.title).await?;
    let event_id = Uuid::new_v4();

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO whatson_events (id, slug, created_by, title, description, is_online, location,
                                    is_paid, price_amount, currency, unlimited_spots, total_spots,
                                    max_spots_per_person, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(event_id)
    .bind(&slug)
    .bind(user.user_id)
    .bind(&request.title)
    .bind(&request.description)
    .bind(request.is_online)
    .bind(&request.location)
    .bind(request.is_paid)
    .bind(request.price_amount.filter(|_| request.is_paid))
    .bind(request.currency.as_deref().unwrap_or("USD"))
    .bind(request.unlimited_spots)
    .bind(request.total_spots.filter(|_| !request.unlimited_spots))
    .bind(max_per_person)
    .bind(status.as_str())
    .execute(&mut *tx)
    .await?;

    replace_schedule_and_tags(&mut tx, event_id, Some(request.schedule.as_slice()), Some(tags.as_slice()))
        .await?;
    tx.commit().await?;

    info!(event_id = %event_id, slug = %slug, "Created event");

    success(
        201,
        serde_json::json!({ "id": event_id.to_string(), "slug": slug, "status": status }),
        "Event created",
    )
}

async fn my_events(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;

    let rows: Vec<EventRow> = sqlx::query_as(&format!(
        "{} WHERE e.created_by = $1 ORDER BY e.created_at DESC",
        EVENT_SELECT
    ))
    .bind(user.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    let events = to_responses(&state.db_pool, rows).await?;
    success(200, events, "Events retrieved")
}

async fn calendar(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let params = event.query_string_parameters();
    let today = Utc::now().date_naive();
    let year: i32 = match params.first("year") {
        Some(y) => y
            .parse()
            .map_err(|_| shared::Error::Validation(format!("Invalid year '{}'", y)))?,
        None => today.year(),
    };
    let month: u32 = match params.first("month") {
        Some(m) => m
            .parse()
            .map_err(|_| shared::Error::Validation(format!("Invalid month '{}'", m)))?,
        None => today.month0(),
    };

    let invalid = || shared::Error::Validation("Month must be 0-11".to_string());
    let cells = build_calendar_cells(year, month).ok_or_else(invalid)?;
    let grid = month_grid(year, month).ok_or_else(invalid)?;
    let first = NaiveDate::from_ymd_opt(year, month + 1, 1).ok_or_else(invalid)?;
    let next = first
        .checked_add_months(chrono::Months::new(1))
        .ok_or_else(invalid)?;

    let dates: Vec<NaiveDate> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT s.event_date
        FROM whatson_schedule s
        JOIN whatson_events e ON e.id = s.event_id
        WHERE e.status = $1 AND s.event_date >= $2 AND s.event_date < $3
        ORDER BY s.event_date
        "#,
    )
    .bind(EventStatus::Published.as_str())
    .bind(first)
    .bind(next)
    .fetch_all(&state.db_pool)
    .await?;

    let event_days: Vec<u32> = dates.iter().map(|d| d.day()).collect();

    success(
        200,
        serde_json::json!({
            "year": year,
            "month": month,
            "label": month_label(year, month),
            "cells": cells,
            "grid": grid,
            "eventDays": event_days,
        }),
        "Calendar retrieved",
    )
}

async fn get_event(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let viewer = optional_user(event)?.map(|u| u.user_id);
    let row = find_event(&state.db_pool, key).await?;
    check_visible(&row, viewer)?;
    let mut events = to_responses(&state.db_pool, vec![row]).await?;
    let event = events
        .pop()
        .ok_or_else(|| shared::Error::NotFound("Event not found".to_string()))?;
    success(200, event, "Event retrieved")
}

async fn update_event(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let existing = find_event(&state.db_pool, key).await?;
    require_creator(&existing, &user)?;

    let mut request: UpdateEventRequest = parse_json_body(event.body())?;
    request.check(&existing)?;
    let status = request
        .status
        .as_deref()
        .map(str::parse::<EventStatus>)
        .transpose()?;
    let tags = request.tags.as_deref().map(normalize_tags).transpose()?;

    let mut tx = state.db_pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE whatson_events SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            is_online = COALESCE($4, is_online),
            location = COALESCE($5, location),
            is_paid = COALESCE($6, is_paid),
            price_amount = COALESCE($7, price_amount),
            currency = COALESCE($8, currency),
            unlimited_spots = COALESCE($9, unlimited_spots),
            total_spots = COALESCE($10, total_spots),
            max_spots_per_person = COALESCE($11, max_spots_per_person),
            status = COALESCE($12, status),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(existing.id)
    .bind(&request.title)
    .bind(&request.description)
    .bind(request.is_online)
    .bind(&request.location)
    .bind(request.is_paid)
    .bind(request.price_amount)
    .bind(&request.currency)
    .bind(request.unlimited_spots)
    .bind(request.total_spots)
    .bind(request.max_spots_per_person)
    .bind(status.map(EventStatus::as_str))
    .execute(&mut *tx)
    .await?;

    replace_schedule_and_tags(&mut tx, existing.id, request.schedule.as_deref(), tags.as_deref())
        .await?;
    tx.commit().await?;

    info!(event_id = %existing.id, "Updated event");
    get_event(state, event, &existing.id.to_string()).await
}

async fn delete_event(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let existing = find_event(&state.db_pool, key).await?;
    require_creator(&existing, &user)?;

    sqlx::query("DELETE FROM whatson_events WHERE id = $1")
        .bind(existing.id)
        .execute(&state.db_pool)
        .await?;

    info!(event_id = %existing.id, "Deleted event");
    success(200, serde_json::json!({ "id": existing.id.to_string() }), "Event deleted")
}

async fn create_rsvp(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let request: RsvpRequest = parse_json_body(event.body())?;
    let event_id = find_event(&state.db_pool, key).await?.id;

    let mut tx = state.db_pool.begin().await?;

    // Row lock serialises spot counting and ticket sequencing per event.
    let target: EventRow = sqlx::query_as(&format!("{} WHERE e.id = $1 FOR UPDATE OF e", EVENT_SELECT))
        .bind(event_id)
        .fetch_one(&mut *tx)
        .await?;

    check_visible(&target, Some(user.user_id))?;
    if target.status != EventStatus::Published.as_str() {
        return Err(shared::Error::Validation(
            "This event is not open for RSVPs".to_string(),
        ));
    }

    let existing: Option<(Uuid, String, String, String)> = sqlx::query_as(
        r#"
        SELECT id, status, ticket_number, reference_number
        FROM whatson_rsvps
        WHERE event_id = $1 AND user_id = $2
        "#,
    )
    .bind(target.id)
    .bind(user.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((_, status, _, _)) = &existing {
        if status == RsvpStatus::Confirmed.as_str() {
            return Err(shared::Error::Conflict(
                "You have already RSVPed to this event".to_string(),
            ));
        }
    }

    validate_spot_request(
        request.number_of_spots,
        target.max_spots_per_person.max(0) as u32,
        target.available_spots().map(|n| n.clamp(0, i64::from(u32::MAX)) as u32),
    )?;

    let scheduled: Vec<NaiveDate> = sqlx::query_scalar(
        "SELECT event_date FROM whatson_schedule WHERE event_id = $1 ORDER BY event_date",
    )
    .bind(target.id)
    .fetch_all(&mut *tx)
    .await?;
    let dates = select_dates(&request.dates, &scheduled)?;

    let payment_status = PaymentStatus::initial(target.is_paid);

    let (rsvp_id, ticket, reference) = match existing {
        Some((rsvp_id, _, ticket, reference)) => {
            sqlx::query(
                r#"
                UPDATE whatson_rsvps
                SET number_of_spots = $2, payment_status = $3, status = $4, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(rsvp_id)
            .bind(request.number_of_spots as i32)
            .bind(payment_status.as_str())
            .bind(RsvpStatus::Confirmed.as_str())
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM whatson_rsvp_dates WHERE rsvp_id = $1")
                .bind(rsvp_id)
                .execute(&mut *tx)
                .await?;

            (rsvp_id, ticket, reference)
        }
        None => {
            let issued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM whatson_rsvps WHERE event_id = $1")
                .bind(target.id)
                .fetch_one(&mut *tx)
                .await?;
            let sequence = u32::try_from(issued + 1).map_err(|_| {
                shared::Error::Internal("Ticket sequence overflow".to_string())
            })?;
            let ticket = ticket_number(Utc::now().year(), sequence)?;
            let reference = reference_number();
            let rsvp_id = Uuid::new_v4();

            sqlx::query(
                r#"
                INSERT INTO whatson_rsvps (id, event_id, user_id, number_of_spots, ticket_number,
                                           reference_number, payment_status, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(rsvp_id)
            .bind(target.id)
            .bind(user.user_id)
            .bind(request.number_of_spots as i32)
            .bind(&ticket)
            .bind(&reference)
            .bind(payment_status.as_str())
            .bind(RsvpStatus::Confirmed.as_str())
            .execute(&mut *tx)
            .await?;

            (rsvp_id, ticket, reference)
        }
    };

    for date in &dates {
        sqlx::query("INSERT INTO whatson_rsvp_dates (rsvp_id, event_date) VALUES ($1, $2)")
            .bind(rsvp_id)
            .bind(date)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    notify_after_commit(
        &state.db_pool,
        NewNotification {
            user_id: target.created_by,
            kind: NotificationKind::RsvpReceived,
            title: "New RSVP",
            body: Some(target.title.as_str()),
            link: Some(format!("/whatson/{}/rsvp/list", target.slug)),
        },
    )
    .await;

    info!(event_id = %target.id, rsvp_id = %rsvp_id, ticket = %ticket, "RSVP confirmed");

    success(
        201,
        serde_json::json!({
            "rsvpId": rsvp_id.to_string(),
            "ticketNumber": ticket,
            "referenceNumber": reference,
            "paymentStatus": payment_status,
            "numberOfSpots": request.number_of_spots,
            "dates": dates,
        }),
        "RSVP created",
    )
}

async fn cancel_rsvp(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let target = find_event(&state.db_pool, key).await?;

    let cancelled = sqlx::query(
        r#"
        UPDATE whatson_rsvps
        SET status = $3,
            payment_status = CASE WHEN payment_status = 'paid' THEN 'refunded' ELSE payment_status END,
            updated_at = NOW()
        WHERE event_id = $1 AND user_id = $2 AND status = $4
        "#,
    )
    .bind(target.id)
    .bind(user.user_id)
    .bind(RsvpStatus::Cancelled.as_str())
    .bind(RsvpStatus::Confirmed.as_str())
    .execute(&state.db_pool)
    .await?;

    if cancelled.rows_affected() == 0 {
        return Err(shared::Error::NotFound("RSVP not found".to_string()));
    }

    info!(event_id = %target.id, user_id = %user.user_id, "RSVP cancelled");
    success(200, serde_json::json!({ "eventId": target.id.to_string() }), "RSVP cancelled")
}

async fn fetch_rsvps(pool: &PgPool, event_id: Uuid, confirmed_only: bool) -> shared::Result<Vec<RsvpRow>> {
    let rows = sqlx::query_as::<_, RsvpRow>(
        r#"
        SELECT r.id, r.user_id, p.display_name, p.email, r.number_of_spots, r.ticket_number,
               r.reference_number, r.payment_status, r.status, r.created_at,
               COALESCE(array_agg(d.event_date ORDER BY d.event_date)
                        FILTER (WHERE d.event_date IS NOT NULL), '{}') AS dates
        FROM whatson_rsvps r
        LEFT JOIN user_profiles p ON p.id = r.user_id
        LEFT JOIN whatson_rsvp_dates d ON d.rsvp_id = r.id
        WHERE r.event_id = $1 AND (NOT $2 OR r.status = 'confirmed')
        GROUP BY r.id, p.display_name, p.email
        ORDER BY r.created_at
        "#,
    )
    .bind(event_id)
    .bind(confirmed_only)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn list_rsvps(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let target = find_event(&state.db_pool, key).await?;
    require_creator(&target, &user)?;

    let rsvps: Vec<serde_json::Value> = fetch_rsvps(&state.db_pool, target.id, false)
        .await?
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "id": row.id.to_string(),
                "userId": row.user_id.to_string(),
                "displayName": row.display_name,
                "email": row.email,
                "numberOfSpots": row.number_of_spots,
                "ticketNumber": row.ticket_number,
                "referenceNumber": row.reference_number,
                "paymentStatus": row.payment_status,
                "status": row.status,
                "createdAt": row.created_at.to_rfc3339(),
                "dates": row.dates,
            })
        })
        .collect();

    success(
        200,
        serde_json::json!({ "count": rsvps.len(), "rsvps": rsvps }),
        "RSVPs retrieved",
    )
}

async fn export_rsvps(state: &AppState, event: &Request, key: &str) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let target = find_event(&state.db_pool, key).await?;
    require_creator(&target, &user)?;

    let rows = fetch_rsvps(&state.db_pool, target.id, true).await?;
    let contents = rsvp_csv(&rows)?;

    info!(event_id = %target.id, rows = rows.len(), "Exported RSVPs");
    csv_response(&format!("{}-rsvps.csv", target.slug), contents)
}

async fn my_rsvps(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;

    let rows: Vec<(Uuid, String, String, String, String, i32, DateTime<Utc>, Uuid, String, String)> =
        sqlx::query_as(
            r#"
            SELECT r.id, r.ticket_number, r.reference_number, r.payment_status, r.status,
                   r.number_of_spots, r.created_at, e.id, e.slug, e.title
            FROM whatson_rsvps r
            JOIN whatson_events e ON e.id = r.event_id
            WHERE r.user_id = $1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(user.user_id)
        .fetch_all(&state.db_pool)
        .await?;

    let event_ids: Vec<Uuid> = rows.iter().map(|r| r.7).collect();
    let (mut schedules, _) = load_schedules_and_tags(&state.db_pool, &event_ids).await?;

    let rsvps: Vec<serde_json::Value> = rows
        .into_iter()
        .map(
            |(id, ticket, reference, payment_status, status, spots, created_at, event_id, slug, title)| {
                serde_json::json!({
                    "id": id.to_string(),
                    "ticketNumber": ticket,
                    "referenceNumber": reference,
                    "paymentStatus": payment_status,
                    "status": status,
                    "numberOfSpots": spots,
                    "createdAt": created_at.to_rfc3339(),
                    "event": {
                        "id": event_id.to_string(),
                        "slug": slug,
                        "title": title,
                        "schedule": schedules.remove(&event_id).unwrap_or_default(),
                    },
                })
            },
        )
        .collect();

    success(200, rsvps, "RSVPs retrieved")
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, segments(path).as_slice()) {
        ("GET", ["whatson"]) => list_events(state, event).await,
        ("POST", ["whatson"]) => create_event(state, event).await,
        ("GET", ["whatson", "my"]) => my_events(state, event).await,
        ("GET", ["whatson", "calendar"]) => calendar(state, event).await,
        ("GET", ["whatson", "rsvps", "my"]) => my_rsvps(state, event).await,
        ("GET", ["whatson", id]) => get_event(state, event, id).await,
        ("PATCH", ["whatson", id]) => update_event(state, event, id).await,
        ("DELETE", ["whatson", id]) => delete_event(state, event, id).await,
        ("POST", ["whatson", id, "rsvp"]) => create_rsvp(state, event, id).await,
        ("DELETE", ["whatson", id, "rsvp"]) => cancel_rsvp(state, event, id).await,
        ("GET", ["whatson", id, "rsvp", "list"]) => list_rsvps(state, event, id).await,
        ("GET", ["whatson", id, "rsvp", "export"]) => export_rsvps(state, event, id).await,
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

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn session(d: &str, start: Option<&str>, end: Option<&str>) -> ScheduleEntry {
        ScheduleEntry {
            date: date(d),
            start_time: start.map(String::from),
            end_time: end.map(String::from),
        }
    }

    #[test]
    fn test_event_shape() {
        assert!(check_event_shape(true, None, true, None, 1).is_ok());
        assert!(check_event_shape(false, Some("Leeds Playhouse"), false, Some(40), 4).is_ok());
        assert!(check_event_shape(false, Some("  "), true, None, 1).is_err());
        assert!(check_event_shape(true, None, false, None, 1).is_err());
        assert!(check_event_shape(true, None, false, Some(2), 3).is_err());
        assert!(check_event_shape(true, None, true, None, 0).is_err());
    }

    #[test]
    fn test_schedule_rules() {
        assert!(check_schedule(&[]).is_err());
        assert!(check_schedule(&[session("2025-09-14", Some("18:00"), Some("21:30"))]).is_ok());
        assert!(check_schedule(&[session("2025-09-14", Some("21:00"), Some("18:00"))]).is_err());
        assert!(check_schedule(&[session("2025-09-14", Some("6pm"), None)]).is_err());
        assert!(check_schedule(&[
            session("2025-09-14", None, None),
            session("2025-09-14", None, None),
        ])
        .is_err());
    }

    #[test]
    fn test_select_dates() {
        let scheduled = vec![date("2025-09-14"), date("2025-09-15")];
        assert_eq!(select_dates(&[], &scheduled).unwrap(), scheduled);
        assert_eq!(
            select_dates(&[date("2025-09-15"), date("2025-09-15")], &scheduled).unwrap(),
            vec![date("2025-09-15")]
        );
        assert!(select_dates(&[date("2025-09-16")], &scheduled).is_err());
    }

    fn sample_event() -> EventRow {
        EventRow {
            id: Uuid::nil(),
            slug: "open-mic".to_string(),
            created_by: Uuid::nil(),
            title: "Open Mic".to_string(),
            description: None,
            is_online: false,
            location: Some("Leeds".to_string()),
            is_paid: false,
            price_amount: None,
            currency: "GBP".to_string(),
            unlimited_spots: false,
            total_spots: Some(10),
            max_spots_per_person: 2,
            status: "published".to_string(),
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            spots_taken: 7,
        }
    }

    #[test]
    fn test_available_spots() {
        let mut row = sample_event();
        assert_eq!(row.available_spots(), Some(3));
        row.spots_taken = 12;
        assert_eq!(row.available_spots(), Some(0));
        row.unlimited_spots = true;
        assert_eq!(row.available_spots(), None);

        let response = EventResponse::new(row, vec![], vec![]);
        assert_eq!(response.price_label, "Free");
    }

    #[test]
    fn test_update_checks_merged_event() {
        let existing = sample_event();

        let mut paid_without_price: UpdateEventRequest =
            serde_json::from_value(serde_json::json!({ "isPaid": true })).unwrap();
        assert!(matches!(
            paid_without_price.check(&existing),
            Err(shared::Error::Validation(_))
        ));

        let mut paid_with_price: UpdateEventRequest =
            serde_json::from_value(serde_json::json!({ "isPaid": true, "priceAmount": 1500 })).unwrap();
        assert!(paid_with_price.check(&existing).is_ok());

        let mut below_taken: UpdateEventRequest =
            serde_json::from_value(serde_json::json!({ "totalSpots": 5 })).unwrap();
        assert!(matches!(below_taken.check(&existing), Err(shared::Error::Conflict(_))));

        let mut padded_title: UpdateEventRequest =
            serde_json::from_value(serde_json::json!({ "title": "  ab  " })).unwrap();
        assert!(matches!(padded_title.check(&existing), Err(shared::Error::Validation(_))));
    }

    #[test]
    fn test_create_checks() {
        let mut request: CreateEventRequest = serde_json::from_value(serde_json::json!({
            "title": "  Open Mic Night  ",
            "isOnline": true,
            "unlimitedSpots": true,
            "schedule": [{ "date": "2025-09-14" }],
        }))
        .unwrap();
        assert!(request.check().is_ok());
        assert_eq!(request.title, "Open Mic Night");

        request.is_paid = true;
        assert!(request.check().is_err());

        let mut short: CreateEventRequest = serde_json::from_value(serde_json::json!({
            "title": "  ab  ",
            "isOnline": true,
            "unlimitedSpots": true,
            "schedule": [{ "date": "2025-09-14" }],
        }))
        .unwrap();
        assert!(matches!(short.check(), Err(shared::Error::Validation(_))));
    }

    #[test]
    fn test_draft_event_visibility() {
        let mut row = sample_event();
        let creator = Uuid::new_v4();
        row.created_by = creator;
        row.status = "draft".to_string();
        assert!(check_visible(&row, Some(creator)).is_ok());
        assert!(matches!(check_visible(&row, None), Err(shared::Error::NotFound(_))));
        assert!(matches!(
            check_visible(&row, Some(Uuid::new_v4())),
            Err(shared::Error::NotFound(_))
        ));

        row.status = "published".to_string();
        assert!(check_visible(&row, None).is_ok());
    }

    #[test]
    fn test_rsvp_csv() {
        let rows = vec![RsvpRow {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            display_name: Some("Ravi, Jr.".to_string()),
            email: Some("ravi@example.com".to_string()),
            number_of_spots: 2,
            ticket_number: "WO-2025-000001".to_string(),
            reference_number: "#ABCDEFGHIJ123".to_string(),
            payment_status: "not_required".to_string(),
            status: "confirmed".to_string(),
            created_at: DateTime::<Utc>::from_timestamp(1_757_808_000, 0).unwrap(),
            dates: vec![],
        }];

        let csv = String::from_utf8(rsvp_csv(&rows).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Name,Email,Ticket Number,Reference,Spots,Payment Status,RSVP Date")
        );
        assert_eq!(
            lines.next(),
            Some("\"Ravi, Jr.\",ravi@example.com,WO-2025-000001,#ABCDEFGHIJ123,2,not_required,2025-09-14")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_rsvp_request_defaults() {
        let request: RsvpRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.number_of_spots, 1);
        assert!(request.dates.is_empty());
    }

    #[test]
    fn test_bool_params() {
        assert_eq!(parse_bool_param("isPaid", None).unwrap(), None);
        assert_eq!(parse_bool_param("isPaid", Some("true")).unwrap(), Some(true));
        assert!(parse_bool_param("isPaid", Some("yes")).is_err());
    }
}

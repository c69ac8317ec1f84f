//! Availability Lambda - Crew calendar of available / hold / n/a days.
//!
//! Endpoints:
//! - GET /availability?from=&to= - Caller's entries, optionally bounded
//! - POST /availability - Set one or more days (upsert per date)
//! - GET /availability/check?date=YYYY-MM-DD - Conflict check for one day

use chrono::{DateTime, NaiveDate, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use shared::availability::{parse_date, AvailabilityStatus, ConflictCheck};
use shared::http::{parse_json_body, route_path, segments, success};
use shared::{authenticate, Config};

/// Most days a single request may set.
const MAX_ENTRIES_PER_REQUEST: usize = 366;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityEntry {
    date: String,
    status: String,
    note: Option<String>,
}

/// Accepts either a single entry or `{ "entries": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SetAvailabilityRequest {
    Many { entries: Vec<AvailabilityEntry> },
    One(AvailabilityEntry),
}

impl SetAvailabilityRequest {
    fn into_entries(self) -> Vec<AvailabilityEntry> {
        match self {
            SetAvailabilityRequest::Many { entries } => entries,
            SetAvailabilityRequest::One(entry) => vec![entry],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedEntry {
    date: NaiveDate,
    status: AvailabilityStatus,
    note: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct AvailabilityRow {
    availability_date: NaiveDate,
    status: String,
    note: Option<String>,
    updated_at: DateTime<Utc>,
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

/// Validate entries; a later entry for the same date wins.
fn parse_entries(entries: Vec<AvailabilityEntry>) -> shared::Result<Vec<ParsedEntry>> {
    if entries.is_empty() {
        return Err(shared::Error::Validation(
            "At least one availability entry is required".to_string(),
        ));
    }
    if entries.len() > MAX_ENTRIES_PER_REQUEST {
        return Err(shared::Error::Validation(format!(
            "At most {} entries per request",
            MAX_ENTRIES_PER_REQUEST
        )));
    }

    let mut parsed: Vec<ParsedEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let date = parse_date(&entry.date)?;
        let status: AvailabilityStatus = entry.status.parse()?;
        let note = entry
            .note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if note.as_ref().is_some_and(|n| n.chars().count() > 500) {
            return Err(shared::Error::Validation(
                "Note must be at most 500 characters".to_string(),
            ));
        }

        parsed.retain(|p| p.date != date);
        parsed.push(ParsedEntry { date, status, note });
    }
    parsed.sort_by_key(|p| p.date);
    Ok(parsed)
}

fn parse_range(from: Option<&str>, to: Option<&str>) -> shared::Result<(Option<NaiveDate>, Option<NaiveDate>)> {
    let from = from.map(parse_date).transpose()?;
    let to = to.map(parse_date).transpose()?;
    if let (Some(from), Some(to)) = (from, to) {
        if to < from {
            return Err(shared::Error::Validation(
                "'to' must not be before 'from'".to_string(),
            ));
        }
    }
    Ok((from, to))
}

async fn list_availability(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let params = event.query_string_parameters();
    let (from, to) = parse_range(params.first("from"), params.first("to"))?;

    let rows: Vec<AvailabilityRow> = sqlx::query_as(
        r#"
        SELECT availability_date, status, note, updated_at
        FROM crew_availability
        WHERE user_id = $1
        AND ($2::date IS NULL OR availability_date >= $2)
        AND ($3::date IS NULL OR availability_date <= $3)
        ORDER BY availability_date
        "#,
    )
    .bind(user.user_id)
    .bind(from)
    .bind(to)
    .fetch_all(&state.db_pool)
    .await?;

    success(200, rows, "Availability retrieved")
}

async fn set_availability(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let request: SetAvailabilityRequest = parse_json_body(event.body())?;
    let entries = parse_entries(request.into_entries())?;

    let mut tx = state.db_pool.begin().await?;

    for entry in &entries {
        sqlx::query(
            r#"
            INSERT INTO crew_availability (id, user_id, availability_date, status, note)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, availability_date)
            DO UPDATE SET status = EXCLUDED.status, note = EXCLUDED.note, updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .bind(entry.date)
        .bind(entry.status.as_str())
        .bind(&entry.note)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(user_id = %user.user_id, count = entries.len(), "Availability updated");

    let dates: Vec<NaiveDate> = entries.iter().map(|e| e.date).collect();
    success(
        200,
        serde_json::json!({ "updated": entries.len(), "dates": dates }),
        "Availability saved",
    )
}

async fn check_availability(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let params = event.query_string_parameters();
    let date = params
        .first("date")
        .ok_or_else(|| shared::Error::Validation("date query parameter is required".to_string()))
        .and_then(parse_date)?;

    let status: Option<String> = sqlx::query_scalar(
        "SELECT status FROM crew_availability WHERE user_id = $1 AND availability_date = $2",
    )
    .bind(user.user_id)
    .bind(date)
    .fetch_optional(&state.db_pool)
    .await?;

    let status = status
        .as_deref()
        .map(str::parse::<AvailabilityStatus>)
        .transpose()?;

    success(200, ConflictCheck::new(date, status), "Availability checked")
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, segments(path).as_slice()) {
        ("GET", ["availability"]) => list_availability(state, event).await,
        ("POST", ["availability"]) => set_availability(state, event).await,
        ("GET", ["availability", "check"]) => check_availability(state, event).await,
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

    fn entry(date: &str, status: &str) -> AvailabilityEntry {
        AvailabilityEntry {
            date: date.to_string(),
            status: status.to_string(),
            note: None,
        }
    }

    #[test]
    fn test_request_shapes() {
        let one: SetAvailabilityRequest =
            serde_json::from_str(r#"{"date":"2025-09-01","status":"hold"}"#).unwrap();
        assert_eq!(one.into_entries().len(), 1);

        let many: SetAvailabilityRequest = serde_json::from_str(
            r#"{"entries":[{"date":"2025-09-01","status":"hold"},{"date":"2025-09-02","status":"na"}]}"#,
        )
        .unwrap();
        assert_eq!(many.into_entries().len(), 2);
    }

    #[test]
    fn test_parse_entries_last_wins() {
        let parsed = parse_entries(vec![
            entry("2025-09-03", "available"),
            entry("2025-09-01", "Hold"),
            entry("2025-09-03", "n/a"),
        ])
        .unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].date, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(parsed[0].status, AvailabilityStatus::Hold);
        assert_eq!(parsed[1].status, AvailabilityStatus::Na);
    }

    #[test]
    fn test_parse_entries_rejects_bad_input() {
        assert!(parse_entries(vec![]).is_err());
        assert!(parse_entries(vec![entry("2025-13-01", "hold")]).is_err());
        assert!(parse_entries(vec![entry("2025-09-01", "busy")]).is_err());
    }

    #[test]
    fn test_blank_note_dropped() {
        let mut e = entry("2025-09-01", "hold");
        e.note = Some("   ".to_string());
        assert_eq!(parse_entries(vec![e]).unwrap()[0].note, None);
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(None, None).unwrap(), (None, None));
        assert!(parse_range(Some("2025-09-10"), Some("2025-09-01")).is_err());
        let (from, to) = parse_range(Some("2025-09-01"), Some("2025-09-30")).unwrap();
        assert!(from < to);
    }
}

//! Referrals Lambda - Crew recommending each other, optionally for a gig.
//!
//! Endpoints:
//! - GET /referrals - Referrals the caller sent and received
//! - POST /referrals - Refer another user

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use shared::http::{parse_json_body, route_path, segments, success};
use shared::models::{ensure_visible, GigStatus, NotificationKind};
use shared::profiles::{notify_after_commit, NewNotification};
use shared::validation::{trim_optional, validate_request};
use shared::{authenticate, Config};

/// Create referral request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateReferralRequest {
    referred_user_id: Uuid,
    gig_id: Option<Uuid>,
    #[validate(length(max = 1000, message = "Message must be at most 1000 characters"))]
    message: Option<String>,
}

impl CreateReferralRequest {
    fn check(&mut self, referrer: Uuid) -> shared::Result<()> {
        trim_optional(&mut self.message);
        if self.message.as_deref() == Some("") {
            self.message = None;
        }
        validate_request(self)?;
        if self.referred_user_id == referrer {
            return Err(shared::Error::Validation(
                "You cannot refer yourself".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct ReferralRow {
    id: Uuid,
    referrer_user_id: Uuid,
    referrer_name: Option<String>,
    referred_user_id: Uuid,
    referred_name: Option<String>,
    gig_id: Option<Uuid>,
    gig_slug: Option<String>,
    gig_title: Option<String>,
    message: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferralsResponse {
    sent: Vec<ReferralRow>,
    received: Vec<ReferralRow>,
}

/// Gig fields a referral needs.
#[derive(Debug, sqlx::FromRow)]
struct ReferredGig {
    id: Uuid,
    slug: String,
    title: String,
    created_by: Uuid,
    status: String,
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

/// Split rows into what the user sent and what they received.
fn split_referrals(rows: Vec<ReferralRow>, user_id: Uuid) -> ReferralsResponse {
    let mut response = ReferralsResponse::default();
    for row in rows {
        if row.referrer_user_id == user_id {
            response.sent.push(row);
        } else {
            response.received.push(row);
        }
    }
    response
}

fn referral_link(gig: Option<&ReferredGig>) -> String {
    match gig {
        Some(gig) => format!("/gigs/{}", gig.slug),
        None => "/referrals".to_string(),
    }
}

async fn list_referrals(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;

    let rows: Vec<ReferralRow> = sqlx::query_as(
        r#"
        SELECT r.id, r.referrer_user_id, referrer.display_name AS referrer_name,
               r.referred_user_id, referred.display_name AS referred_name,
               r.gig_id, g.slug AS gig_slug, g.title AS gig_title,
               r.message, r.created_at
        FROM referrals r
        LEFT JOIN user_profiles referrer ON referrer.id = r.referrer_user_id
        LEFT JOIN user_profiles referred ON referred.id = r.referred_user_id
        LEFT JOIN gigs g ON g.id = r.gig_id
        WHERE r.referrer_user_id = $1 OR r.referred_user_id = $1
        ORDER BY r.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    success(200, split_referrals(rows, user.user_id), "Referrals retrieved")
}

async fn create_referral(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let user = authenticate(event)?;
    let mut request: CreateReferralRequest = parse_json_body(event.body())?;
    request.check(user.user_id)?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_profiles WHERE id = $1)")
        .bind(request.referred_user_id)
        .fetch_one(&state.db_pool)
        .await?;
    if !exists {
        return Err(shared::Error::NotFound("User not found".to_string()));
    }

    let gig = match request.gig_id {
        Some(gig_id) => {
            let gig: ReferredGig = sqlx::query_as(
                "SELECT id, slug, title, created_by, status FROM gigs WHERE id = $1",
            )
            .bind(gig_id)
            .fetch_optional(&state.db_pool)
            .await?
            .ok_or_else(|| shared::Error::NotFound("Gig not found".to_string()))?;
            let is_draft = gig.status == GigStatus::Draft.as_str();
            ensure_visible(is_draft, gig.created_by, Some(user.user_id), "Gig not found")?;
            Some(gig)
        }
        None => None,
    };

    let referral_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO referrals (id, referrer_user_id, referred_user_id, gig_id, message)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (referrer_user_id, referred_user_id, gig_id) DO NOTHING
        "#,
    )
    .bind(referral_id)
    .bind(user.user_id)
    .bind(request.referred_user_id)
    .bind(gig.as_ref().map(|g| g.id))
    .bind(&request.message)
    .execute(&state.db_pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(shared::Error::Conflict(
            "You have already referred this user".to_string(),
        ));
    }

    notify_after_commit(
        &state.db_pool,
        NewNotification {
            user_id: request.referred_user_id,
            kind: NotificationKind::ReferralReceived,
            title: "You were referred",
            body: gig.as_ref().map(|g| g.title.as_str()),
            link: Some(referral_link(gig.as_ref())),
        },
    )
    .await;

    info!(referral_id = %referral_id, referred = %request.referred_user_id, "Referral created");

    success(
        201,
        serde_json::json!({
            "id": referral_id.to_string(),
            "referredUserId": request.referred_user_id.to_string(),
            "gigId": gig.map(|g| g.id.to_string()),
        }),
        "Referral created",
    )
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, segments(path).as_slice()) {
        ("GET", ["referrals"]) => list_referrals(state, event).await,
        ("POST", ["referrals"]) => create_referral(state, event).await,
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

    fn row(referrer: Uuid, referred: Uuid) -> ReferralRow {
        ReferralRow {
            id: Uuid::new_v4(),
            referrer_user_id: referrer,
            referrer_name: Some("Maya".to_string()),
            referred_user_id: referred,
            referred_name: Some("Tom".to_string()),
            gig_id: None,
            gig_slug: None,
            gig_title: None,
            message: None,
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        }
    }

    #[test]
    fn test_split_sent_and_received() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let response = split_referrals(vec![row(me, other), row(other, me), row(me, Uuid::new_v4())], me);
        assert_eq!(response.sent.len(), 2);
        assert_eq!(response.received.len(), 1);
        assert_eq!(response.received[0].referrer_user_id, other);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["sent"][0].get("referredName").is_some());
    }

    #[test]
    fn test_self_referral_rejected() {
        let me = Uuid::new_v4();
        let mut request: CreateReferralRequest = serde_json::from_value(serde_json::json!({
            "referredUserId": me.to_string(),
        }))
        .unwrap();
        assert!(matches!(request.check(me), Err(shared::Error::Validation(_))));
        assert!(request.check(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_blank_message_dropped() {
        let mut request: CreateReferralRequest = serde_json::from_value(serde_json::json!({
            "referredUserId": Uuid::new_v4().to_string(),
            "message": "   ",
        }))
        .unwrap();
        assert!(request.check(Uuid::new_v4()).is_ok());
        assert_eq!(request.message, None);

        let mut long: CreateReferralRequest = serde_json::from_value(serde_json::json!({
            "referredUserId": Uuid::new_v4().to_string(),
            "message": "a".repeat(1001),
        }))
        .unwrap();
        assert!(long.check(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_referral_link() {
        assert_eq!(referral_link(None), "/referrals");
        let gig = ReferredGig {
            id: Uuid::nil(),
            slug: "gaffer-for-music-video".to_string(),
            title: "Gaffer for music video".to_string(),
            created_by: Uuid::nil(),
            status: "active".to_string(),
        };
        assert_eq!(referral_link(Some(&gig)), "/gigs/gaffer-for-music-video");
    }
}

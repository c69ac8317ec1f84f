//! Shared data models.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Status enums stored as lowercase text columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Validation(format!(
                        concat!("Invalid ", stringify!($name), " '{}'. Must be one of: {}"),
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// Lifecycle of a gig posting.
    GigStatus { Draft => "draft", Active => "active", Closed => "closed" }
}

text_enum! {
    /// Where an applicant stands on a gig.
    ApplicationStatus {
        Pending => "pending",
        Shortlisted => "shortlisted",
        Confirmed => "confirmed",
        Released => "released",
    }
}

text_enum! {
    CollabStatus { Open => "open", Closed => "closed", Draft => "draft" }
}

text_enum! {
    EventStatus { Draft => "draft", Published => "published", Cancelled => "cancelled" }
}

text_enum! {
    RsvpStatus { Confirmed => "confirmed", Cancelled => "cancelled" }
}

text_enum! {
    NotificationKind {
        ApplicationReceived => "application_received",
        StatusChanged => "status_changed",
        ReferralReceived => "referral_received",
        RsvpReceived => "rsvp_received",
        CollabInterest => "collab_interest",
        CollaboratorAdded => "collaborator_added",
        SlateComment => "slate_comment",
    }
}

text_enum! {
    SlateStatus { Draft => "draft", Published => "published", Archived => "archived" }
}

/// Human-readable budget for gig cards.
pub fn format_budget_label(amount: Option<i64>, currency: &str, request_quote: bool) -> String {
    if request_quote {
        return "Request quote".to_string();
    }
    match amount {
        None | Some(0) => "Not specified".to_string(),
        Some(amount) => format!("{} {}", currency, group_thousands(amount)),
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Profile completion threshold for posting or applying to gigs.
pub const PROFILE_COMPLETE_PERCENTAGE: i16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCompleteness {
    pub is_complete: bool,
    pub percentage: i16,
}

impl ProfileCompleteness {
    /// A missing profile counts as 0%.
    pub fn from_percentage(percentage: Option<i16>) -> Self {
        let percentage = percentage.unwrap_or(0).clamp(0, 100);
        Self {
            is_complete: percentage >= PROFILE_COMPLETE_PERCENTAGE,
            percentage,
        }
    }

    pub fn require_complete(self) -> Result<()> {
        if self.is_complete {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "Profile must be at least {}% complete (currently {}%)",
                PROFILE_COMPLETE_PERCENTAGE, self.percentage
            )))
        }
    }
}

/// Drafts are only visible to their owner. Anyone else, signed in or not, gets
/// the same 404 as for a missing row.
pub fn ensure_visible(is_draft: bool, owner: Uuid, viewer: Option<Uuid>, not_found: &str) -> Result<()> {
    if is_draft && viewer != Some(owner) {
        Err(Error::NotFound(not_found.to_string()))
    } else {
        Ok(())
    }
}

/// Most tags a post or event may carry.
pub const MAX_TAGS: usize = 10;

/// Trim, lowercase and de-duplicate tags, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if tag.is_empty() || normalized.contains(&tag) {
            continue;
        }
        if tag.chars().count() > 50 {
            return Err(Error::Validation(format!("Tag '{}' is longer than 50 characters", tag)));
        }
        normalized.push(tag);
    }
    if normalized.len() > MAX_TAGS {
        return Err(Error::Validation(format!("At most {} tags allowed", MAX_TAGS)));
    }
    Ok(normalized)
}

/// Page/limit query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;

    /// Lenient parse: bad or missing values fall back to defaults.
    pub fn from_params(page: Option<&str>, limit: Option<&str>) -> Self {
        Self::from_params_or(page, limit, Self::DEFAULT_LIMIT)
    }

    /// Like `from_params` with a feed-specific default page size.
    pub fn from_params_or(page: Option<&str>, limit: Option<&str>, default_limit: i64) -> Self {
        let page = page.and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
        let limit = limit
            .and_then(|l| l.parse().ok())
            .unwrap_or(default_limit)
            .clamp(1, Self::MAX_LIMIT);
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    /// Response metadata including the total row count.
    pub fn with_total(self, total: i64) -> serde_json::Value {
        serde_json::json!({
            "page": self.page,
            "limit": self.limit,
            "total": total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_text() {
        assert_eq!("Shortlisted".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::Shortlisted);
        assert_eq!(ApplicationStatus::Released.as_str(), "released");
        assert_eq!(
            serde_json::to_value(NotificationKind::ApplicationReceived).unwrap(),
            "application_received"
        );
    }

    #[test]
    fn test_status_rejects_unknown() {
        match "hired".parse::<ApplicationStatus>() {
            Err(Error::Validation(m)) => {
                assert!(m.contains("pending, shortlisted, confirmed, released"), "{}", m)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_budget_label() {
        assert_eq!(format_budget_label(Some(5000), "GBP", true), "Request quote");
        assert_eq!(format_budget_label(None, "GBP", false), "Not specified");
        assert_eq!(format_budget_label(Some(0), "GBP", false), "Not specified");
        assert_eq!(format_budget_label(Some(950), "USD", false), "USD 950");
        assert_eq!(format_budget_label(Some(1_250_000), "INR", false), "INR 1,250,000");
    }

    #[test]
    fn test_profile_completeness() {
        assert!(!ProfileCompleteness::from_percentage(None).is_complete);
        assert!(!ProfileCompleteness::from_percentage(Some(79)).is_complete);
        assert!(ProfileCompleteness::from_percentage(Some(80)).is_complete);
        assert!(matches!(
            ProfileCompleteness::from_percentage(Some(40)).require_complete(),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_draft_visibility() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        assert!(ensure_visible(false, owner, None, "Gig not found").is_ok());
        assert!(ensure_visible(true, owner, Some(owner), "Gig not found").is_ok());
        assert!(matches!(
            ensure_visible(true, owner, None, "Gig not found"),
            Err(Error::NotFound(m)) if m == "Gig not found"
        ));
        assert!(matches!(
            ensure_visible(true, owner, Some(stranger), "Gig not found"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " #Documentary ".to_string(),
            "documentary".to_string(),
            "".to_string(),
            "Music Video".to_string(),
        ];
        assert_eq!(normalize_tags(&tags).unwrap(), vec!["documentary", "music video"]);

        let too_many: Vec<String> = (0..11).map(|i| format!("tag{}", i)).collect();
        assert!(matches!(normalize_tags(&too_many), Err(Error::Validation(_))));
    }

    #[test]
    fn test_pagination() {
        let p = Pagination::from_params(None, None);
        assert_eq!((p.page, p.limit, p.offset()), (1, 10, 0));

        let p = Pagination::from_params(Some("3"), Some("20"));
        assert_eq!(p.offset(), 40);

        let p = Pagination::from_params(Some("-2"), Some("5000"));
        assert_eq!((p.page, p.limit), (1, 100));

        let p = Pagination::from_params(Some("abc"), Some("0"));
        assert_eq!((p.page, p.limit), (1, 1));

        let p = Pagination::from_params_or(None, None, 20);
        assert_eq!(p.limit, 20);
    }
}

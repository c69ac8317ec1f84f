//! URL slugs for gigs, collab posts and events.

use chrono::Utc;
use sqlx::PgPool;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::Result;

/// Lowercase, hyphen-separated form of `title`.
///
/// Runs of anything that is not alphanumeric become a single hyphen and the
/// result never starts or ends with one.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Millisecond timestamps that never repeat or go backwards.
#[derive(Debug, Default)]
pub struct SlugClock {
    last: AtomicI64,
}

impl SlugClock {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Current Unix time in milliseconds, bumped past the previous stamp.
    pub fn next_stamp(&self) -> i64 {
        self.stamp_at(Utc::now().timestamp_millis())
    }

    fn stamp_at(&self, now: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

static CLOCK: SlugClock = SlugClock::new();

/// Path segments the routers match before `{id}`; a slug equal to one could
/// never be fetched.
pub const RESERVED_SLUGS: &[&str] = &["my", "calendar", "rsvps", "saved", "comment"];

pub fn is_reserved(slug: &str) -> bool {
    RESERVED_SLUGS.contains(&slug)
}

/// `base` if free, otherwise `base-<timestamp>`. Reserved words always count as taken.
pub fn disambiguate(base: &str, taken: bool) -> String {
    if taken || is_reserved(base) {
        format!("{}-{}", base, CLOCK.next_stamp())
    } else {
        base.to_string()
    }
}

/// Slug base for a title, never empty.
pub fn base_slug(title: &str) -> String {
    match slugify(title) {
        s if s.is_empty() => "untitled".to_string(),
        s => s,
    }
}

/// Tables that carry a unique `slug` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugTable {
    Gigs,
    CollabPosts,
    WhatsOnEvents,
    SlatePosts,
}

impl SlugTable {
    fn exists_query(self) -> &'static str {
        match self {
            SlugTable::Gigs => "SELECT EXISTS(SELECT 1 FROM gigs WHERE slug = $1)",
            SlugTable::CollabPosts => "SELECT EXISTS(SELECT 1 FROM collab_posts WHERE slug = $1)",
            SlugTable::WhatsOnEvents => {
                "SELECT EXISTS(SELECT 1 FROM whatson_events WHERE slug = $1)"
            }
            SlugTable::SlatePosts => "SELECT EXISTS(SELECT 1 FROM slate_posts WHERE slug = $1)",
        }
    }
}

/// Slug for `title` that is not yet used in `table`.
pub async fn unique_slug(pool: &PgPool, table: SlugTable, title: &str) -> Result<String> {
    let base = base_slug(title);
    if is_reserved(&base) {
        return Ok(disambiguate(&base, true));
    }

    let taken: bool = sqlx::query_scalar(table.exists_query())
        .bind(&base)
        .fetch_one(pool)
        .await?;

    Ok(disambiguate(&base, taken))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_punctuation() {
        assert_eq!(
            slugify("4 Video Editors for Shortfilm!"),
            "4-video-editors-for-shortfilm"
        );
    }

    #[test]
    fn test_slugify_collapses_separators() {
        assert_eq!(slugify("  Multiple   Spaces -- Here "), "multiple-spaces-here");
        assert_eq!(slugify("DOP / Camera_Op"), "dop-camera-op");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_slugify_unicode() {
        assert_eq!(slugify("Café Crew Night"), "café-crew-night");
    }

    #[test]
    fn test_base_slug_fallback() {
        assert_eq!(base_slug("!!!"), "untitled");
        assert_eq!(base_slug("Grip Wanted"), "grip-wanted");
    }

    #[test]
    fn test_disambiguate_free() {
        assert_eq!(disambiguate("grip-wanted", false), "grip-wanted");
    }

    #[test]
    fn test_reserved_words_get_suffix() {
        for title in ["My", "Calendar", "RSVPs!"] {
            let slug = disambiguate(&base_slug(title), false);
            let (base, stamp) = slug.rsplit_once('-').expect("suffix");
            assert!(is_reserved(base), "{}", slug);
            assert!(stamp.parse::<i64>().is_ok(), "{}", slug);
        }
        assert_eq!(disambiguate("my-showreel", false), "my-showreel");
    }

    #[test]
    fn test_disambiguate_taken_is_increasing() {
        let stamp = |s: String| -> i64 {
            s.strip_prefix("grip-wanted-")
                .and_then(|t| t.parse().ok())
                .expect("timestamp suffix")
        };

        let first = stamp(disambiguate("grip-wanted", true));
        let second = stamp(disambiguate("grip-wanted", true));
        let third = stamp(disambiguate("grip-wanted", true));

        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn test_clock_never_goes_backwards() {
        let clock = SlugClock::new();
        assert_eq!(clock.stamp_at(1_000), 1_000);
        assert_eq!(clock.stamp_at(1_000), 1_001);
        assert_eq!(clock.stamp_at(900), 1_002);
        assert_eq!(clock.stamp_at(5_000), 5_000);
    }
}

//! Profile and notification queries used by several functions.

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::models::{NotificationKind, ProfileCompleteness};
use crate::Result;

/// Completion status of a user's crew profile.
pub async fn profile_completeness(pool: &PgPool, user_id: Uuid) -> Result<ProfileCompleteness> {
    let percentage: Option<Option<i16>> = sqlx::query_scalar(
        "SELECT profile_completion_percentage FROM user_profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(ProfileCompleteness::from_percentage(percentage.flatten()))
}

/// A notification to store for a user.
#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: &'a str,
    pub body: Option<&'a str>,
    pub link: Option<String>,
}

/// Insert a notification row.
pub async fn notify(pool: &PgPool, notification: NewNotification<'_>) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO notifications (id, user_id, kind, title, body, link)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(notification.user_id)
    .bind(notification.kind.as_str())
    .bind(notification.title)
    .bind(notification.body)
    .bind(&notification.link)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Insert a notification after the caller's own write has committed.
///
/// A failed insert is logged and swallowed: the committed write stands and
/// the client must not see an error for it.
pub async fn notify_after_commit(pool: &PgPool, notification: NewNotification<'_>) -> Option<Uuid> {
    let kind = notification.kind;
    let user_id = notification.user_id;
    delivered(notify(pool, notification).await, kind, user_id)
}

fn delivered(result: Result<Uuid>, kind: NotificationKind, user_id: Uuid) -> Option<Uuid> {
    match result {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(error = %e, kind = kind.as_str(), user_id = %user_id, "Notification not stored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_failed_insert_is_not_an_error() {
        let user = Uuid::new_v4();
        let failed = Err(Error::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(delivered(failed, NotificationKind::RsvpReceived, user), None);

        let id = Uuid::new_v4();
        assert_eq!(delivered(Ok(id), NotificationKind::RsvpReceived, user), Some(id));
    }
}

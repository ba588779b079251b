use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClubApplication {
    pub id: Uuid,
    pub club_id: Uuid,
    pub name: String,
    pub application_start_time: DateTime<Utc>,
    pub application_end_time: DateTime<Utc>,
    pub result_release_time: DateTime<Utc>,
    pub external_url: Option<String>,
    pub acceptance_email: String,
    pub rejection_email: String,
    pub is_active: bool,
    pub is_wharton_council: bool,
    pub created_at: DateTime<Utc>,
}

impl ClubApplication {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.application_start_time <= now && now < self.application_end_time
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplicationCommittee {
    pub id: i64,
    pub application_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplicationQuestion {
    pub id: i64,
    pub application_id: Uuid,
    pub committee_id: Option<i64>,
    pub prompt: String,
    pub word_limit: Option<i32>,
}

pub const SUBMISSION_PENDING: &str = "pending";
pub const SUBMISSION_REJECTED_WRITTEN: &str = "rejected_after_written";
pub const SUBMISSION_REJECTED_INTERVIEW: &str = "rejected_after_interview";
pub const SUBMISSION_ACCEPTED: &str = "accepted";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplicationSubmission {
    pub id: Uuid,
    pub application_id: Uuid,
    pub user_id: Uuid,
    pub committee_id: Option<i64>,
    pub status: String,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

/// Strip a trailing clone-suffix from a committee name: `"Tech copy 2"` and
/// `"Tech (copy 2)"` both canonicalize to `"Tech"`. Names without a suffix
/// come back unchanged.
pub fn canonical_committee_name(name: &str) -> String {
    let trimmed = name.trim_end();

    // "(copy N)" form
    if let Some(open) = trimmed.rfind("(copy ") {
        let tail = &trimmed[open..];
        if let Some(inner) = tail.strip_prefix("(copy ").and_then(|t| t.strip_suffix(')')) {
            if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                return trimmed[..open].trim_end().to_string();
            }
        }
    }

    // bare "copy N" form
    if let Some(pos) = trimmed.rfind(" copy ") {
        let tail = &trimmed[pos + " copy ".len()..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            return trimmed[..pos].trim_end().to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn canonicalizes_parenthesized_copy_suffix() {
        assert_eq!(canonical_committee_name("Tech (copy 1)"), "Tech");
        assert_eq!(canonical_committee_name("Tech (copy 12)"), "Tech");
    }

    #[test]
    fn canonicalizes_bare_copy_suffix() {
        assert_eq!(canonical_committee_name("Marketing copy 3"), "Marketing");
    }

    #[test]
    fn leaves_ordinary_names_alone() {
        assert_eq!(canonical_committee_name("Tech"), "Tech");
        assert_eq!(canonical_committee_name("Copy Editing"), "Copy Editing");
        assert_eq!(canonical_committee_name("copy"), "copy");
        // "copy" without a number is part of the name
        assert_eq!(canonical_committee_name("Hard copy desk"), "Hard copy desk");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonical_committee_name("Tech (copy 2)");
        assert_eq!(canonical_committee_name(&once), once);
    }

    #[test]
    fn open_window_is_half_open() {
        let now = Utc::now();
        let app = ClubApplication {
            id: Uuid::new_v4(),
            club_id: Uuid::new_v4(),
            name: "Fall Recruiting".into(),
            application_start_time: now - Duration::days(1),
            application_end_time: now + Duration::days(1),
            result_release_time: now + Duration::days(7),
            external_url: None,
            acceptance_email: String::new(),
            rejection_email: String::new(),
            is_active: true,
            is_wharton_council: false,
            created_at: now,
        };
        assert!(app.is_open(now));
        assert!(!app.is_open(app.application_end_time));
        assert!(app.is_open(app.application_start_time));
    }
}

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const INVITE_ID_LEN: usize = 8;
pub const INVITE_TOKEN_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MembershipInvite {
    pub id: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub club_id: Uuid,
    pub email: String,
    pub role: i32,
    pub title: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MembershipInvite {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Constant-length compare is not required here: the token is 128 chars
    /// of entropy and the id must also match, so a plain compare after
    /// trimming the CHAR(128) padding is sufficient.
    pub fn token_matches(&self, presented: &str) -> bool {
        self.token.trim_end() == presented.trim_end()
    }
}

pub fn generate_invite_id() -> String {
    random_alphanumeric(INVITE_ID_LEN)
}

pub fn generate_invite_token() -> String {
    random_alphanumeric(INVITE_TOKEN_LEN)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Local part of an email address, lowercased. `None` when the address
/// has no `@`.
pub fn email_local_part(email: &str) -> Option<String> {
    email
        .split_once('@')
        .map(|(local, _)| local.to_lowercase())
}

/// Whether an address belongs to the university (`.edu` domain suffix).
pub fn is_university_email(email: &str) -> bool {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase().ends_with(".edu") || domain.eq_ignore_ascii_case("edu"))
        .unwrap_or(false)
}

pub const OWNERSHIP_REQUEST_PENDING: &str = "pending";
pub const OWNERSHIP_REQUEST_ACCEPTED: &str = "accepted";
pub const OWNERSHIP_REQUEST_DENIED: &str = "denied";
pub const OWNERSHIP_REQUEST_WITHDRAWN: &str = "withdrawn";

/// Days a prior non-withdrawn request blocks a new one.
pub const OWNERSHIP_REQUEST_COOLDOWN_DAYS: i64 = 180;

/// Whether `status` is a state a pending request may move to.
pub fn is_resolution_status(status: &str) -> bool {
    matches!(
        status,
        OWNERSHIP_REQUEST_ACCEPTED | OWNERSHIP_REQUEST_DENIED | OWNERSHIP_REQUEST_WITHDRAWN
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OwnershipRequest {
    pub id: Uuid,
    pub club_id: Uuid,
    pub requester_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl OwnershipRequest {
    /// Whether this past request blocks a new one made at `now`.
    pub fn blocks_at(&self, now: DateTime<Utc>) -> bool {
        if self.status == OWNERSHIP_REQUEST_WITHDRAWN {
            return false;
        }
        now - self.created_at < chrono::Duration::days(OWNERSHIP_REQUEST_COOLDOWN_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn generated_ids_have_expected_lengths() {
        assert_eq!(generate_invite_id().len(), INVITE_ID_LEN);
        assert_eq!(generate_invite_token().len(), INVITE_TOKEN_LEN);
    }

    #[test]
    fn token_comparison_ignores_char_column_padding() {
        let invite = MembershipInvite {
            id: "abcd1234".into(),
            token: format!("{:<128}", "secret"),
            club_id: Uuid::new_v4(),
            email: "x@example.edu".into(),
            role: 20,
            title: "Member".into(),
            active: true,
            expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(invite.token_matches("secret"));
        assert!(!invite.token_matches("wrong"));
    }

    #[test]
    fn local_part_extraction() {
        assert_eq!(email_local_part("Ab.C@seas.upenn.edu"), Some("ab.c".into()));
        assert_eq!(email_local_part("not-an-email"), None);
    }

    #[test]
    fn university_email_detection() {
        assert!(is_university_email("student@upenn.edu"));
        assert!(is_university_email("student@seas.upenn.EDU"));
        assert!(!is_university_email("someone@gmail.com"));
        assert!(!is_university_email("plain-string"));
    }

    fn request(status: &str, age_days: i64) -> OwnershipRequest {
        OwnershipRequest {
            id: Uuid::new_v4(),
            club_id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            status: status.into(),
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn denied_request_blocks_within_cooldown() {
        assert!(request(OWNERSHIP_REQUEST_DENIED, 179).blocks_at(Utc::now()));
    }

    #[test]
    fn denied_request_unblocks_at_exactly_180_days() {
        let r = request(OWNERSHIP_REQUEST_DENIED, 0);
        let at = r.created_at + Duration::days(OWNERSHIP_REQUEST_COOLDOWN_DAYS);
        assert!(!r.blocks_at(at));
        assert!(r.blocks_at(at - Duration::nanoseconds(1)));
    }

    #[test]
    fn withdrawn_request_never_blocks() {
        assert!(!request(OWNERSHIP_REQUEST_WITHDRAWN, 1).blocks_at(Utc::now()));
    }

    #[test]
    fn resolution_statuses_are_the_three_terminal_states() {
        assert!(is_resolution_status(OWNERSHIP_REQUEST_ACCEPTED));
        assert!(is_resolution_status(OWNERSHIP_REQUEST_DENIED));
        assert!(is_resolution_status(OWNERSHIP_REQUEST_WITHDRAWN));
        assert!(!is_resolution_status(OWNERSHIP_REQUEST_PENDING));
        assert!(!is_resolution_status("approved"));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered student club. `approved` is tri-state: `Some(true)` approved,
/// `Some(false)` rejected, `None` pending review.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Club {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    pub email: Option<String>,
    pub active: bool,
    pub approved: Option<bool>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_comment: Option<String>,
    pub ghost: bool,
    pub archived: bool,
    pub approved_name: Option<String>,
    pub approved_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Club {
    pub fn is_pending(&self) -> bool {
        self.approved.is_none() && !self.archived
    }

    /// Visible to someone with no special standing toward this club.
    pub fn publicly_visible(&self) -> bool {
        if self.archived {
            return false;
        }
        (self.active && self.approved == Some(true)) || self.ghost
    }

    /// Whether public reads should serve the last approved snapshot
    /// instead of the live row.
    pub fn serves_ghost_snapshot(&self) -> bool {
        self.ghost && self.approved != Some(true)
    }
}

/// Fields that send an approved club back to the review queue when edited.
pub const SENSITIVE_FIELDS: &[&str] = &["name", "description", "email"];

/// The public projection of a club; ghosting clubs serve their last
/// approved snapshot here so unapproved edits never leak.
#[derive(Debug, Clone, Serialize)]
pub struct PublicClub {
    pub code: String,
    pub name: String,
    pub description: String,
    pub email: Option<String>,
    pub active: bool,
    pub approved: Option<bool>,
}

impl PublicClub {
    pub fn from_club(club: &Club) -> Self {
        if club.serves_ghost_snapshot() {
            Self {
                code: club.code.clone(),
                name: club
                    .approved_name
                    .clone()
                    .unwrap_or_else(|| club.name.clone()),
                description: club
                    .approved_description
                    .clone()
                    .unwrap_or_else(|| club.description.clone()),
                // email is not snapshotted, so the live value may be an
                // unapproved edit; withhold it rather than leak it
                email: None,
                active: club.active,
                // the snapshot is, by definition, the approved version
                approved: Some(true),
            }
        } else {
            Self {
                code: club.code.clone(),
                name: club.name.clone(),
                description: club.description.clone(),
                email: club.email.clone(),
                active: club.active,
                approved: club.approved,
            }
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ClubApprovalHistoryEntry {
    pub id: i64,
    pub club_id: Uuid,
    pub approved: bool,
    pub approved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn club() -> Club {
        Club {
            id: Uuid::new_v4(),
            code: "harvest".into(),
            name: "Harvest Club".into(),
            description: "We harvest.".into(),
            email: None,
            active: true,
            approved: Some(true),
            approved_by: None,
            approved_at: None,
            approved_comment: None,
            ghost: false,
            archived: false,
            approved_name: None,
            approved_description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn approved_active_club_is_public() {
        assert!(club().publicly_visible());
    }

    #[test]
    fn archived_club_is_never_public() {
        let mut c = club();
        c.archived = true;
        assert!(!c.publicly_visible());
        c.ghost = true;
        assert!(!c.publicly_visible());
    }

    #[test]
    fn ghost_club_is_public_while_pending() {
        let mut c = club();
        c.approved = None;
        c.active = false;
        c.ghost = true;
        assert!(c.publicly_visible());
        assert!(c.serves_ghost_snapshot());
    }

    #[test]
    fn pending_non_ghost_club_is_hidden() {
        let mut c = club();
        c.approved = None;
        assert!(!c.publicly_visible());
    }

    #[test]
    fn public_projection_serves_snapshot_fields() {
        let mut c = club();
        c.approved = None;
        c.ghost = true;
        c.name = "Unreviewed Name".into();
        c.approved_name = Some("Harvest Club".into());
        c.approved_description = Some("We harvest.".into());
        c.description = "Unreviewed description".into();
        c.email = Some("new-contact@example.edu".into());

        let public = PublicClub::from_club(&c);
        assert_eq!(public.name, "Harvest Club");
        assert_eq!(public.description, "We harvest.");
        assert_eq!(public.email, None);
        assert_eq!(public.approved, Some(true));
    }
}

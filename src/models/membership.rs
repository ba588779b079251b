use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Membership roles; lower numbers carry more authority.
pub const ROLE_OWNER: i32 = 0;
pub const ROLE_OFFICER: i32 = 10;
pub const ROLE_MEMBER: i32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: Uuid,
    pub club_id: Uuid,
    pub user_id: Uuid,
    pub role: i32,
    pub title: String,
    pub active: bool,
    pub public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn is_owner(&self) -> bool {
        self.active && self.role <= ROLE_OWNER
    }

    pub fn is_officer(&self) -> bool {
        self.active && self.role <= ROLE_OFFICER
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub graduation_year: Option<i32>,
    pub is_superuser: bool,
    pub can_approve_clubs: bool,
    pub can_see_pending_clubs: bool,
    pub subscribed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(role: i32, active: bool) -> Membership {
        Membership {
            id: Uuid::new_v4(),
            club_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role,
            title: "Member".into(),
            active,
            public: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn owner_is_also_officer() {
        let m = membership(ROLE_OWNER, true);
        assert!(m.is_owner());
        assert!(m.is_officer());
    }

    #[test]
    fn plain_member_is_neither() {
        let m = membership(ROLE_MEMBER, true);
        assert!(!m.is_owner());
        assert!(!m.is_officer());
    }

    #[test]
    fn inactive_roles_carry_no_authority() {
        let m = membership(ROLE_OWNER, false);
        assert!(!m.is_owner());
        assert!(!m.is_officer());
    }
}

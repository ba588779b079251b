use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub club_id: Uuid,
    pub name: String,
    pub description: String,
    /// Activities-fair events cannot change type after creation.
    pub is_fair: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventShowing {
    pub id: Uuid,
    pub event_id: Uuid,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub ticket_order_limit: i32,
    pub ticket_drop_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EventShowing {
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    /// Tickets become purchasable at the drop time; a showing with no drop
    /// time has dropped from the start.
    pub fn has_dropped(&self, now: DateTime<Utc>) -> bool {
        match self.ticket_drop_time {
            Some(drop) => drop <= now,
            None => true,
        }
    }

    /// After the drop, ticket class definitions and the drop time itself
    /// are frozen.
    pub fn drop_elapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.ticket_drop_time, Some(drop) if drop <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn showing(drop_offset_mins: Option<i64>) -> EventShowing {
        let now = Utc::now();
        EventShowing {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            location: None,
            start_time: now + Duration::hours(2),
            end_time: now + Duration::hours(4),
            ticket_order_limit: 10,
            ticket_drop_time: drop_offset_mins.map(|m| now + Duration::minutes(m)),
            created_at: now,
        }
    }

    #[test]
    fn no_drop_time_means_already_dropped() {
        let s = showing(None);
        assert!(s.has_dropped(Utc::now()));
        assert!(!s.drop_elapsed(Utc::now()));
    }

    #[test]
    fn drop_boundary_is_inclusive() {
        let s = showing(Some(30));
        let drop = s.ticket_drop_time.unwrap();
        assert!(s.has_dropped(drop));
        assert!(!s.has_dropped(drop - Duration::nanoseconds(1)));
    }

    #[test]
    fn ended_at_end_time() {
        let s = showing(None);
        assert!(!s.has_ended(Utc::now()));
        assert!(s.has_ended(s.end_time));
    }
}

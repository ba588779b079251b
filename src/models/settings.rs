use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Singleton row with id = 1. Creation and deletion are disallowed; readers
/// always find the seeded row.
pub const QUEUE_SETTINGS_ID: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegistrationQueueSettings {
    pub id: i32,
    pub reapproval_queue_open: bool,
    pub new_approval_queue_open: bool,
    pub reapproval_queue_open_at: Option<DateTime<Utc>>,
    pub new_approval_queue_open_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationQueueSettings {
    /// Scheduled flips whose timestamp has passed. A due timestamp toggles
    /// its queue flag, so the same mechanism opens and closes queues.
    /// Returns the new flag values, or `None` when nothing is due.
    pub fn due_flips(&self, now: DateTime<Utc>) -> Option<(bool, bool)> {
        let reapproval_due = matches!(self.reapproval_queue_open_at, Some(at) if at <= now);
        let new_due = matches!(self.new_approval_queue_open_at, Some(at) if at <= now);

        if reapproval_due || new_due {
            Some((
                self.reapproval_queue_open != reapproval_due,
                self.new_approval_queue_open != new_due,
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn settings() -> RegistrationQueueSettings {
        RegistrationQueueSettings {
            id: QUEUE_SETTINGS_ID,
            reapproval_queue_open: false,
            new_approval_queue_open: false,
            reapproval_queue_open_at: None,
            new_approval_queue_open_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn no_schedule_means_no_flip() {
        assert!(settings().due_flips(Utc::now()).is_none());
    }

    #[test]
    fn past_timestamp_flips_only_its_queue() {
        let mut s = settings();
        s.reapproval_queue_open_at = Some(Utc::now() - Duration::hours(1));
        assert_eq!(s.due_flips(Utc::now()), Some((true, false)));
    }

    #[test]
    fn past_timestamp_closes_an_open_queue() {
        let mut s = settings();
        s.new_approval_queue_open = true;
        s.new_approval_queue_open_at = Some(Utc::now() - Duration::minutes(5));
        assert_eq!(s.due_flips(Utc::now()), Some((false, false)));
    }

    #[test]
    fn future_timestamp_does_not_flip() {
        let mut s = settings();
        s.new_approval_queue_open_at = Some(Utc::now() + Duration::hours(1));
        assert!(s.due_flips(Utc::now()).is_none());
    }
}

//! Scheduled jobs.
//!
//! One daily tick and one short-cadence tick. Every daily job is idempotent
//! within a day, so an operator can also run them as one-shot commands (see
//! the `clubhouse-jobs` binary), with `--dry-run` for zero side effects.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc, Weekday};
use serde::Serialize;
use sqlx::PgPool;

use crate::config::Config;
use crate::services::applications;
use crate::services::approval;
use crate::services::holds;
use crate::services::invites;
use crate::services::notify::{Mailer, NotificationDispatcher};
use crate::utils::error::AppError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DAILY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default, Serialize)]
pub struct DailyReport {
    pub invites_expired: u64,
    pub queues_flipped: bool,
    pub deadline_reminders: u32,
    pub reviewer_reminder_sent: bool,
    pub memberships_graduated: u64,
}

#[derive(Serialize)]
struct QueueReminderContext {
    pending_count: i64,
}

pub fn is_weekday(weekday: Weekday) -> bool {
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Apply scheduled queue flips whose timestamp has passed. Clears the
/// schedule so each flip happens once.
pub async fn apply_queue_flips(pool: &PgPool, dry_run: bool) -> Result<bool, AppError> {
    let settings = approval::queue_settings(pool).await?;
    let Some((reapproval, new)) = settings.due_flips(Utc::now()) else {
        return Ok(false);
    };
    if dry_run {
        return Ok(true);
    }

    sqlx::query(
        "UPDATE registration_queue_settings SET \
         reapproval_queue_open = $1, new_approval_queue_open = $2, \
         reapproval_queue_open_at = CASE WHEN $1 <> reapproval_queue_open THEN NULL \
                                         ELSE reapproval_queue_open_at END, \
         new_approval_queue_open_at = CASE WHEN $2 <> new_approval_queue_open THEN NULL \
                                           ELSE new_approval_queue_open_at END, \
         updated_at = now() \
         WHERE id = $3",
    )
    .bind(reapproval)
    .bind(new)
    .bind(crate::models::settings::QUEUE_SETTINGS_ID)
    .execute(pool)
    .await?;

    tracing::info!(reapproval, new, "Registration queue flags flipped");
    Ok(true)
}

/// Deactivate memberships of users whose class has graduated.
pub async fn graduate_members(pool: &PgPool, dry_run: bool) -> Result<u64, AppError> {
    let current_year = Utc::now().year();
    if dry_run {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM memberships m JOIN users u ON u.id = m.user_id \
             WHERE m.active AND u.graduation_year IS NOT NULL AND u.graduation_year < $1",
        )
        .bind(current_year)
        .fetch_one(pool)
        .await?;
        return Ok(count as u64);
    }

    let graduated = sqlx::query(
        "UPDATE memberships m SET active = FALSE, updated_at = now() \
         FROM users u \
         WHERE u.id = m.user_id AND m.active \
           AND u.graduation_year IS NOT NULL AND u.graduation_year < $1",
    )
    .bind(current_year)
    .execute(pool)
    .await?
    .rows_affected();

    if graduated > 0 {
        tracing::info!(graduated, "Graduated memberships deactivated");
    }
    Ok(graduated)
}

/// Weekday nudge to everyone who can review the approval queue.
pub async fn send_reviewer_reminder<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    dry_run: bool,
) -> Result<bool, AppError> {
    if !is_weekday(Utc::now().weekday()) {
        return Ok(false);
    }
    let pending = approval::pending_count(pool).await?;
    if pending == 0 {
        return Ok(false);
    }
    if dry_run {
        return Ok(true);
    }

    let reviewers: Vec<(String,)> = sqlx::query_as(
        "SELECT email FROM users WHERE can_approve_clubs OR is_superuser",
    )
    .fetch_all(pool)
    .await?;
    let recipients: Vec<String> = reviewers.into_iter().map(|(e,)| e).collect();

    let sent = dispatcher
        .send(
            "approval_queue_reminder",
            None,
            &recipients,
            &QueueReminderContext {
                pending_count: pending,
            },
            Vec::new(),
        )
        .await?;
    Ok(sent)
}

/// The daily tick. Job failures are logged and do not stop later jobs.
pub async fn run_daily_jobs<M: Mailer>(
    pool: &PgPool,
    _config: &Config,
    dispatcher: &NotificationDispatcher<M>,
    dry_run: bool,
) -> Result<DailyReport, AppError> {
    let mut report = DailyReport::default();

    if !dry_run {
        match invites::expire_stale_invites(pool).await {
            Ok(expired) => report.invites_expired = expired,
            Err(e) => tracing::error!(error = %e, "Invite expiry job failed"),
        }
    }

    match apply_queue_flips(pool, dry_run).await {
        Ok(flipped) => report.queues_flipped = flipped,
        Err(e) => tracing::error!(error = %e, "Queue flip job failed"),
    }

    match applications::send_deadline_reminders(pool, dispatcher, dry_run).await {
        Ok(reminded) => report.deadline_reminders = reminded,
        Err(e) => tracing::error!(error = %e, "Deadline reminder job failed"),
    }

    match send_reviewer_reminder(pool, dispatcher, dry_run).await {
        Ok(sent) => report.reviewer_reminder_sent = sent,
        Err(e) => tracing::error!(error = %e, "Reviewer reminder job failed"),
    }

    match graduate_members(pool, dry_run).await {
        Ok(graduated) => report.memberships_graduated = graduated,
        Err(e) => tracing::error!(error = %e, "Graduation job failed"),
    }

    tracing::info!(?report, dry_run, "Daily jobs complete");
    Ok(report)
}

/// Spawn the background ticks; returns immediately.
pub fn spawn<M: Mailer + 'static>(
    pool: PgPool,
    config: Config,
    dispatcher: Arc<NotificationDispatcher<M>>,
) {
    {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = holds::sweep_expired_holds(&pool).await {
                    tracing::error!(error = %e, "Hold sweep failed");
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DAILY_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = run_daily_jobs(&pool, &config, dispatcher.as_ref(), false).await {
                tracing::error!(error = %e, "Daily jobs failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekends_are_not_weekdays() {
        assert!(is_weekday(Weekday::Mon));
        assert!(is_weekday(Weekday::Fri));
        assert!(!is_weekday(Weekday::Sat));
        assert!(!is_weekday(Weekday::Sun));
    }
}

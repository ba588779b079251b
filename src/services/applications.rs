//! Club applications.
//!
//! Applications own committees and questions and can be cloned wholesale for
//! a new cycle. Cloning can leave "copy N" suffixes on committee names;
//! normalization canonicalizes those and merges the resulting duplicates,
//! reassigning questions to the earliest-id committee.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::models::application::{
    canonical_committee_name, ApplicationCommittee, ApplicationSubmission, ClubApplication,
    SUBMISSION_ACCEPTED, SUBMISSION_PENDING, SUBMISSION_REJECTED_INTERVIEW,
    SUBMISSION_REJECTED_WRITTEN,
};
use crate::models::invite;
use crate::models::membership::ROLE_MEMBER;
use crate::services::notify::{Mailer, NotificationDispatcher};
use crate::utils::error::AppError;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApplicationParams {
    pub name: String,
    pub application_start_time: DateTime<Utc>,
    pub application_end_time: DateTime<Utc>,
    pub result_release_time: DateTime<Utc>,
    pub external_url: Option<String>,
    #[serde(default)]
    pub acceptance_email: String,
    #[serde(default)]
    pub rejection_email: String,
    #[serde(default)]
    pub is_wharton_council: bool,
}

pub fn validate_application_times(params: &ApplicationParams) -> Result<(), AppError> {
    if params.application_end_time <= params.application_start_time {
        return Err(AppError::Invalid(
            "application end must be after its start".into(),
        ));
    }
    if params.result_release_time < params.application_end_time {
        return Err(AppError::Invalid(
            "results cannot release before applications close".into(),
        ));
    }
    Ok(())
}

pub async fn create_application(
    pool: &PgPool,
    club_id: Uuid,
    params: &ApplicationParams,
) -> Result<ClubApplication, AppError> {
    validate_application_times(params)?;
    let application = sqlx::query_as::<_, ClubApplication>(
        "INSERT INTO club_applications \
         (club_id, name, application_start_time, application_end_time, result_release_time, \
          external_url, acceptance_email, rejection_email, is_wharton_council) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
    )
    .bind(club_id)
    .bind(&params.name)
    .bind(params.application_start_time)
    .bind(params.application_end_time)
    .bind(params.result_release_time)
    .bind(&params.external_url)
    .bind(&params.acceptance_email)
    .bind(&params.rejection_email)
    .bind(params.is_wharton_council)
    .fetch_one(pool)
    .await?;
    Ok(application)
}

/// Deep-copy an application with its committees and questions. Committee
/// names that would collide inside the clone pick up a "(copy N)" suffix.
pub async fn clone_application(pool: &PgPool, src_id: Uuid) -> Result<ClubApplication, AppError> {
    let mut txn = pool.begin().await?;

    let src = sqlx::query_as::<_, ClubApplication>(
        "SELECT * FROM club_applications WHERE id = $1",
    )
    .bind(src_id)
    .fetch_optional(&mut *txn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("application {src_id}")))?;

    let clone = sqlx::query_as::<_, ClubApplication>(
        "INSERT INTO club_applications \
         (club_id, name, application_start_time, application_end_time, result_release_time, \
          external_url, acceptance_email, rejection_email, is_wharton_council) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
    )
    .bind(src.club_id)
    .bind(format!("{} (copy)", src.name))
    .bind(src.application_start_time)
    .bind(src.application_end_time)
    .bind(src.result_release_time)
    .bind(&src.external_url)
    .bind(&src.acceptance_email)
    .bind(&src.rejection_email)
    .bind(src.is_wharton_council)
    .fetch_one(&mut *txn)
    .await?;

    let committees = sqlx::query_as::<_, ApplicationCommittee>(
        "SELECT * FROM application_committees WHERE application_id = $1 ORDER BY id",
    )
    .bind(src_id)
    .fetch_all(&mut *txn)
    .await?;

    let mut name_counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut committee_map: BTreeMap<i64, i64> = BTreeMap::new();
    for committee in &committees {
        let count = name_counts.entry(committee.name.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            committee.name.clone()
        } else {
            format!("{} (copy {})", committee.name, *count - 1)
        };
        let (new_id,): (i64,) = sqlx::query_as(
            "INSERT INTO application_committees (application_id, name) \
             VALUES ($1, $2) RETURNING id",
        )
        .bind(clone.id)
        .bind(&name)
        .fetch_one(&mut *txn)
        .await?;
        committee_map.insert(committee.id, new_id);
    }

    let questions: Vec<(Option<i64>, String, Option<i32>)> = sqlx::query_as(
        "SELECT committee_id, prompt, word_limit FROM application_questions \
         WHERE application_id = $1 ORDER BY id",
    )
    .bind(src_id)
    .fetch_all(&mut *txn)
    .await?;
    for (committee_id, prompt, word_limit) in questions {
        sqlx::query(
            "INSERT INTO application_questions (application_id, committee_id, prompt, word_limit) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(clone.id)
        .bind(committee_id.and_then(|id| committee_map.get(&id).copied()))
        .bind(prompt)
        .bind(word_limit)
        .execute(&mut *txn)
        .await?;
    }

    txn.commit().await?;
    tracing::info!(src = %src_id, clone = %clone.id, "Application cloned");
    Ok(clone)
}

/// A plan for collapsing a duplicate cluster onto its earliest committee.
#[derive(Debug, PartialEq, Eq)]
pub struct MergePlan {
    pub primary_id: i64,
    pub canonical_name: String,
    pub duplicate_ids: Vec<i64>,
}

/// Group committees by key and plan one merge per cluster. The earliest id
/// wins; clusters of one still surface when the survivor needs a rename.
pub fn plan_merges<F>(committees: &[ApplicationCommittee], key: F) -> Vec<MergePlan>
where
    F: Fn(&str) -> String,
{
    let mut clusters: BTreeMap<String, Vec<&ApplicationCommittee>> = BTreeMap::new();
    for committee in committees {
        clusters
            .entry(key(&committee.name))
            .or_default()
            .push(committee);
    }

    let mut plans = Vec::new();
    for (canonical_name, mut members) in clusters {
        members.sort_by_key(|c| c.id);
        let primary = members[0];
        let duplicate_ids: Vec<i64> = members[1..].iter().map(|c| c.id).collect();
        if !duplicate_ids.is_empty() || primary.name != canonical_name {
            plans.push(MergePlan {
                primary_id: primary.id,
                canonical_name,
                duplicate_ids,
            });
        }
    }
    plans
}

async fn apply_merge_plans(pool: &PgPool, plans: &[MergePlan]) -> Result<u64, AppError> {
    if plans.is_empty() {
        return Ok(0);
    }

    let mut txn = pool.begin().await?;
    let mut merged = 0;
    for plan in plans {
        sqlx::query("UPDATE application_committees SET name = $2 WHERE id = $1")
            .bind(plan.primary_id)
            .bind(&plan.canonical_name)
            .execute(&mut *txn)
            .await?;
        for duplicate_id in &plan.duplicate_ids {
            sqlx::query(
                "UPDATE application_questions SET committee_id = $1 WHERE committee_id = $2",
            )
            .bind(plan.primary_id)
            .bind(duplicate_id)
            .execute(&mut *txn)
            .await?;
            sqlx::query(
                "UPDATE application_submissions SET committee_id = $1 WHERE committee_id = $2",
            )
            .bind(plan.primary_id)
            .bind(duplicate_id)
            .execute(&mut *txn)
            .await?;
            sqlx::query("DELETE FROM application_committees WHERE id = $1")
                .bind(duplicate_id)
                .execute(&mut *txn)
                .await?;
            merged += 1;
        }
    }
    txn.commit().await?;
    Ok(merged)
}

async fn committees_of(
    pool: &PgPool,
    application_id: Uuid,
) -> Result<Vec<ApplicationCommittee>, AppError> {
    let committees = sqlx::query_as::<_, ApplicationCommittee>(
        "SELECT * FROM application_committees WHERE application_id = $1 ORDER BY id",
    )
    .bind(application_id)
    .fetch_all(pool)
    .await?;
    Ok(committees)
}

/// Strip clone suffixes and merge the clusters that emerge. Idempotent.
pub async fn normalize_committees(pool: &PgPool, application_id: Uuid) -> Result<u64, AppError> {
    let committees = committees_of(pool, application_id).await?;
    let plans = plan_merges(&committees, |name| canonical_committee_name(name));
    let merged = apply_merge_plans(pool, &plans).await?;
    if merged > 0 {
        tracing::info!(application = %application_id, merged, "Committees normalized");
    }
    Ok(merged)
}

/// Merge committees whose names are exactly equal.
pub async fn merge_duplicate_committees(
    pool: &PgPool,
    application_id: Uuid,
) -> Result<u64, AppError> {
    let committees = committees_of(pool, application_id).await?;
    let plans = plan_merges(&committees, |name| name.to_string());
    apply_merge_plans(pool, &plans).await
}

pub async fn submit_application(
    pool: &PgPool,
    user_id: Uuid,
    application: &ClubApplication,
    committee_id: Option<i64>,
) -> Result<ApplicationSubmission, AppError> {
    if !application.is_open(Utc::now()) {
        return Err(AppError::Invalid("this application is not open".into()));
    }
    if let Some(id) = committee_id {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM application_committees \
             WHERE id = $1 AND application_id = $2)",
        )
        .bind(id)
        .bind(application.id)
        .fetch_one(pool)
        .await?;
        if !exists {
            return Err(AppError::NotFound(format!("committee {id}")));
        }
    }

    let submission = sqlx::query_as::<_, ApplicationSubmission>(
        "INSERT INTO application_submissions (application_id, user_id, committee_id, status) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(application.id)
    .bind(user_id)
    .bind(committee_id)
    .bind(SUBMISSION_PENDING)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::AlreadyExists("you have already applied to this committee".into())
        }
        _ => AppError::Database(e),
    })?;
    Ok(submission)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionEmailType {
    Acceptance,
    Rejection,
}

impl DecisionEmailType {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "acceptance" => Ok(Self::Acceptance),
            "rejection" => Ok(Self::Rejection),
            other => Err(AppError::Invalid(format!("unknown email type '{other}'"))),
        }
    }

    fn matches_status(self, status: &str) -> bool {
        match self {
            Self::Acceptance => status == SUBMISSION_ACCEPTED,
            Self::Rejection => {
                status == SUBMISSION_REJECTED_WRITTEN || status == SUBMISSION_REJECTED_INTERVIEW
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DecisionEmailReport {
    pub sent: u32,
    pub skipped: u32,
    pub dry_run: bool,
}

/// Send decision emails for every matching submission. Acceptances also get
/// a member invite expiring five days out. `notified` guards re-sends unless
/// `allow_resend`; `dry_run` makes no persistent change and sends nothing.
pub async fn send_decision_emails<M: Mailer>(
    pool: &PgPool,
    config: &Config,
    dispatcher: &NotificationDispatcher<M>,
    application: &ClubApplication,
    email_type: DecisionEmailType,
    allow_resend: bool,
    dry_run: bool,
) -> Result<DecisionEmailReport, AppError> {
    let body = match email_type {
        DecisionEmailType::Acceptance => &application.acceptance_email,
        DecisionEmailType::Rejection => &application.rejection_email,
    };
    if body.trim().is_empty() {
        return Err(AppError::Invalid(
            "this application has no email body configured for that decision".into(),
        ));
    }

    let submissions: Vec<(Uuid, String, String, bool)> = sqlx::query_as(
        "SELECT s.id, s.status, u.email, s.notified \
         FROM application_submissions s \
         JOIN users u ON u.id = s.user_id \
         WHERE s.application_id = $1",
    )
    .bind(application.id)
    .fetch_all(pool)
    .await?;

    let (club_name,): (String,) = sqlx::query_as("SELECT name FROM clubs WHERE id = $1")
        .bind(application.club_id)
        .fetch_one(pool)
        .await?;

    let mut report = DecisionEmailReport {
        sent: 0,
        skipped: 0,
        dry_run,
    };

    for (submission_id, status, email, notified) in submissions {
        if !email_type.matches_status(status.as_str()) {
            continue;
        }
        if notified && !allow_resend {
            report.skipped += 1;
            continue;
        }
        if dry_run {
            report.sent += 1;
            continue;
        }

        let subject = format!("Your application to {club_name}");
        dispatcher.send_custom(&subject, body, &[email.clone()]).await?;

        if email_type == DecisionEmailType::Acceptance {
            sqlx::query(
                "INSERT INTO membership_invites (id, token, club_id, email, role, title, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, 'Member', $6)",
            )
            .bind(invite::generate_invite_id())
            .bind(invite::generate_invite_token())
            .bind(application.club_id)
            .bind(&email)
            .bind(ROLE_MEMBER)
            .bind(Utc::now() + config.acceptance_invite_expiry)
            .execute(pool)
            .await?;
        }

        sqlx::query("UPDATE application_submissions SET notified = TRUE WHERE id = $1")
            .bind(submission_id)
            .execute(pool)
            .await?;
        report.sent += 1;
    }

    tracing::info!(
        application = %application.id,
        sent = report.sent,
        skipped = report.skipped,
        dry_run,
        "Decision emails processed"
    );
    Ok(report)
}

#[derive(Serialize)]
struct ReminderContext {
    club_name: String,
    deadline: String,
}

/// Daily job: three days before an application closes, remind subscribed
/// students who are not members and have not graduated.
pub async fn send_deadline_reminders<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    dry_run: bool,
) -> Result<u32, AppError> {
    let now = Utc::now();
    let window_start = now + Duration::days(3);
    let window_end = window_start + Duration::days(1);
    let current_year = chrono::Datelike::year(&now);

    let applications: Vec<(Uuid, Uuid, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT a.id, a.club_id, c.name, a.application_end_time \
         FROM club_applications a \
         JOIN clubs c ON c.id = a.club_id \
         WHERE a.is_active AND a.application_end_time >= $1 AND a.application_end_time < $2",
    )
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;

    let mut reminded = 0;
    for (_application_id, club_id, club_name, end_time) in applications {
        let recipients: Vec<(String,)> = sqlx::query_as(
            "SELECT u.email FROM club_subscriptions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.club_id = $1 AND u.subscribed \
               AND (u.graduation_year IS NULL OR u.graduation_year >= $2) \
               AND NOT EXISTS(SELECT 1 FROM memberships m \
                              WHERE m.club_id = s.club_id AND m.user_id = u.id AND m.active)",
        )
        .bind(club_id)
        .bind(current_year)
        .fetch_all(pool)
        .await?;

        let recipients: Vec<String> = recipients.into_iter().map(|(e,)| e).collect();
        if recipients.is_empty() {
            continue;
        }
        if dry_run {
            reminded += recipients.len() as u32;
            continue;
        }
        dispatcher
            .send(
                "deadline_reminder",
                None,
                &recipients,
                &ReminderContext {
                    club_name: club_name.clone(),
                    deadline: end_time.format("%B %-d, %Y").to_string(),
                },
                Vec::new(),
            )
            .await?;
        reminded += recipients.len() as u32;
    }

    Ok(reminded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committee(id: i64, name: &str) -> ApplicationCommittee {
        ApplicationCommittee {
            id,
            application_id: Uuid::nil(),
            name: name.into(),
        }
    }

    #[test]
    fn clean_committees_need_no_merging() {
        let committees = vec![committee(1, "Tech"), committee(2, "Marketing")];
        assert!(plan_merges(&committees, |n| n.to_string()).is_empty());
    }

    #[test]
    fn copy_suffixes_merge_onto_earliest_id() {
        let committees = vec![
            committee(5, "Tech (copy 1)"),
            committee(3, "Tech"),
            committee(7, "Tech copy 2"),
        ];
        let plans = plan_merges(&committees, |n| canonical_committee_name(n));
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].primary_id, 3);
        assert_eq!(plans[0].canonical_name, "Tech");
        assert_eq!(plans[0].duplicate_ids, vec![5, 7]);
    }

    #[test]
    fn lone_suffixed_committee_is_renamed_not_merged() {
        let committees = vec![committee(4, "Tech (copy 1)")];
        let plans = plan_merges(&committees, |n| canonical_committee_name(n));
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].canonical_name, "Tech");
        assert!(plans[0].duplicate_ids.is_empty());
    }

    #[test]
    fn planning_is_idempotent() {
        let committees = vec![committee(3, "Tech")];
        // a second run over the already-merged state plans nothing
        assert!(plan_merges(&committees, |n| canonical_committee_name(n)).is_empty());
    }

    #[test]
    fn exact_match_merge_ignores_suffixes() {
        let committees = vec![committee(1, "Tech (copy 1)"), committee(2, "Tech")];
        let plans = plan_merges(&committees, |n| n.to_string());
        assert!(plans.is_empty());
    }

    #[test]
    fn email_type_matches_both_rejection_statuses() {
        let t = DecisionEmailType::Rejection;
        assert!(t.matches_status(SUBMISSION_REJECTED_WRITTEN));
        assert!(t.matches_status(SUBMISSION_REJECTED_INTERVIEW));
        assert!(!t.matches_status(SUBMISSION_ACCEPTED));
        assert!(!t.matches_status(SUBMISSION_PENDING));
    }

    #[test]
    fn application_times_validate() {
        let now = Utc::now();
        let mut params = ApplicationParams {
            name: "Fall".into(),
            application_start_time: now,
            application_end_time: now + Duration::days(7),
            result_release_time: now + Duration::days(14),
            external_url: None,
            acceptance_email: String::new(),
            rejection_email: String::new(),
            is_wharton_council: false,
        };
        assert!(validate_application_times(&params).is_ok());

        params.result_release_time = now + Duration::days(3);
        assert!(validate_application_times(&params).is_err());

        params.result_release_time = now + Duration::days(14);
        params.application_end_time = now;
        assert!(validate_application_times(&params).is_err());
    }
}

//! One-shot runner for the scheduled jobs.
//!
//! Each subcommand mirrors a scheduler tick so operators can run (or dry-run)
//! jobs out of band. Exits 0 on success, 1 with a diagnostic on failure.

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use clubhouse_server::config::Config;
use clubhouse_server::services::applications;
use clubhouse_server::services::approval;
use clubhouse_server::services::holds;
use clubhouse_server::services::invites;
use clubhouse_server::services::notify::{NotificationDispatcher, SmtpMailer};
use clubhouse_server::services::scheduler;
use clubhouse_server::utils::error::AppError;

#[derive(Parser)]
#[command(name = "clubhouse-jobs", about = "Run scheduled jobs one-shot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full daily job set.
    Daily {
        #[arg(long)]
        dry_run: bool,
    },
    /// Release expired cart holds.
    SweepHolds,
    /// Retire invites whose expiry has passed.
    ExpireInvites {
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply scheduled approval-queue open/close flips.
    FlipQueues {
        #[arg(long)]
        dry_run: bool,
    },
    /// Send three-days-out application deadline reminders.
    DeadlineReminders {
        #[arg(long)]
        dry_run: bool,
    },
    /// Deactivate memberships of graduated users.
    GraduateMembers {
        #[arg(long)]
        dry_run: bool,
    },
    /// Merge an application's exactly-duplicated committees.
    MergeCommittees {
        /// Application id to clean up.
        application: uuid::Uuid,
    },
    /// Yearly sweep: deactivate every club for renewal.
    DeactivateClubs {
        /// Also email club owners about the renewal cycle.
        #[arg(long)]
        send_emails: bool,
    },
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;
    let mailer = SmtpMailer::new(&config.smtp)?;
    let dispatcher = NotificationDispatcher::new(mailer);

    match cli.command {
        Command::Daily { dry_run } => {
            let report = scheduler::run_daily_jobs(&pool, &config, &dispatcher, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        }
        Command::SweepHolds => {
            let swept = holds::sweep_expired_holds(&pool).await?;
            println!("released {swept} expired holds");
        }
        Command::ExpireInvites { dry_run } => {
            if dry_run {
                println!("dry run: no invites expired");
            } else {
                let expired = invites::expire_stale_invites(&pool).await?;
                println!("expired {expired} invites");
            }
        }
        Command::FlipQueues { dry_run } => {
            let flipped = scheduler::apply_queue_flips(&pool, dry_run).await?;
            println!("queue flips {}", if flipped { "applied" } else { "not due" });
        }
        Command::DeadlineReminders { dry_run } => {
            let reminded =
                applications::send_deadline_reminders(&pool, &dispatcher, dry_run).await?;
            println!("reminded {reminded} students");
        }
        Command::GraduateMembers { dry_run } => {
            let graduated = scheduler::graduate_members(&pool, dry_run).await?;
            println!("graduated {graduated} memberships");
        }
        Command::MergeCommittees { application } => {
            let merged = applications::merge_duplicate_committees(&pool, application).await?;
            println!("merged {merged} duplicate committees");
        }
        Command::DeactivateClubs { send_emails } => {
            let affected = approval::deactivate_all(&pool, &dispatcher, send_emails).await?;
            println!("deactivated {affected} clubs");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

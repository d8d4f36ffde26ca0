/// Membership reconciliation job
///
/// Walks every conversation and repairs `conversation_participants` rows so
/// they match the conversation's participants array: missing rows are
/// inserted, rows for users no longer in the array are marked as left.
///
/// Usage:
/// ```bash
/// cargo run --bin reconcile-memberships -- [--batch-size <N>] [--conversation <uuid>]
/// ```
use anyhow::{Context, Result};
use conversation_service::config::SERVICE_NAME;
use conversation_service::services::MembershipTracker;
use conversation_service::store::PgConversationStore;
use db_pool::DbConfig;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct JobConfig {
    batch_size: i64,
    conversation: Option<Uuid>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            conversation: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    conversation_service::logging::init_tracing();

    let job = parse_args()?;
    info!(?job, "starting membership reconciliation");

    let db_config = DbConfig::from_env(SERVICE_NAME).map_err(anyhow::Error::msg)?;
    let pool = db_pool::create_pool(db_config)
        .await
        .context("failed to connect to database")?;
    let tracker = MembershipTracker::new(Arc::new(PgConversationStore::new(pool)));

    let report = match job.conversation {
        Some(id) => tracker
            .reconcile(id)
            .await
            .with_context(|| format!("reconciling conversation {id}"))?,
        None => tracker
            .reconcile_all(job.batch_size)
            .await
            .context("reconciliation run failed")?,
    };

    info!(
        conversations = report.conversations,
        inserted = report.rows_inserted,
        departed = report.rows_departed,
        promoted = report.admins_promoted,
        failed = report.failed,
        "membership reconciliation finished"
    );
    if report.failed > 0 {
        anyhow::bail!("{} conversations could not be reconciled", report.failed);
    }
    Ok(())
}

fn parse_args() -> Result<JobConfig> {
    let mut job = JobConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--batch-size" => {
                let value = args.get(i + 1).context("--batch-size requires a value")?;
                job.batch_size = value.parse().context("invalid batch size")?;
                i += 2;
            }
            "--conversation" => {
                let value = args
                    .get(i + 1)
                    .context("--conversation requires a UUID value")?;
                job.conversation =
                    Some(Uuid::parse_str(value).context("invalid UUID for --conversation")?);
                i += 2;
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(job)
}

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use crate::aggregate;
use crate::currency::Currency;
use crate::donation::NewDonation;
use crate::env::{Config, Env};
use crate::error::StorageError;
use crate::ingest::{IngestOutcome, ingest};
use crate::reconcile::{Scope, reconcile};
use crate::sync::{JsonFileFeed, sync_once};
use crate::{amount::MinorUnits, query};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid amount: {value}. Amount must be greater than zero")]
    InvalidAmount { value: u64 },
    #[error("Exactly one of --campaign, --donor, or --all must be given")]
    AmbiguousScope,
}

#[derive(Debug, Parser)]
#[command(name = "donation-ledger")]
#[command(about = "Donation ledger reconciliation engine")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub env: Env,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Record one confirmed donation
    Ingest {
        #[arg(long)]
        campaign: String,
        #[arg(long)]
        donor: String,
        /// Amount in minor units of the currency
        #[arg(long)]
        amount: u64,
        #[arg(long, default_value = "sgusd")]
        currency: Currency,
        #[arg(long, default_value = "")]
        message: String,
        #[arg(long)]
        anonymous: bool,
        /// External ledger transaction id, the idempotency key
        #[arg(long = "tx-id")]
        external_transaction_id: String,
    },
    /// Import confirmed events from a JSON feed file
    Sync {
        /// Path to a JSON array of confirmed donation events
        #[arg(long)]
        feed: PathBuf,
    },
    /// Recompute aggregates from donation records and repair drift
    Reconcile {
        #[arg(long, conflicts_with_all = ["donor", "all"])]
        campaign: Option<String>,
        #[arg(long, conflicts_with = "all")]
        donor: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Record funds withdrawn from a campaign by its owner
    Withdraw {
        #[arg(long)]
        campaign: String,
        /// Amount in minor units
        #[arg(long)]
        amount: u64,
    },
    /// Record funds distributed from a campaign to beneficiaries
    Distribute {
        #[arg(long)]
        campaign: String,
        /// Amount in minor units
        #[arg(long)]
        amount: u64,
    },
    /// Show stored aggregates
    Show {
        #[command(subcommand)]
        target: ShowTarget,
    },
}

#[derive(Debug, Subcommand)]
pub enum ShowTarget {
    /// One campaign's aggregate
    Campaign { campaign_id: String },
    /// One donor's aggregate
    Donor { address: String },
    /// Leaderboards of campaigns and donors by value
    Top {
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

pub async fn run(config: Config, command: Commands) -> anyhow::Result<()> {
    let pool = config.get_sqlite_pool().await?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(StorageError::from)?;
    run_command_with_writers(config, command, &pool, &mut std::io::stdout()).await
}

async fn run_command_with_writers<W: Write>(
    config: Config,
    command: Commands,
    pool: &SqlitePool,
    stdout: &mut W,
) -> anyhow::Result<()> {
    let policy = config.currency_policy();
    match command {
        Commands::Ingest {
            campaign,
            donor,
            amount,
            currency,
            message,
            anonymous,
            external_transaction_id,
        } => {
            if amount == 0 {
                return Err(CliError::InvalidAmount { value: amount }.into());
            }
            let donation = NewDonation {
                campaign_id: campaign,
                donor_address: donor,
                amount: MinorUnits::new(amount),
                currency,
                message,
                is_anonymous: anonymous,
                external_transaction_id,
            };
            match ingest(pool, policy, donation).await? {
                IngestOutcome::Recorded { record, campaign } => {
                    writeln!(
                        stdout,
                        "Recorded donation {} to campaign {} ({} raised, {} backers)",
                        record.external_transaction_id,
                        campaign.campaign_id,
                        campaign.current_amount.get(),
                        campaign.backer_count,
                    )?;
                }
                IngestOutcome::Duplicate { existing } => {
                    writeln!(
                        stdout,
                        "Donation {} already recorded, nothing applied",
                        existing.external_transaction_id
                    )?;
                }
            }
        }
        Commands::Sync { feed } => {
            let feed = JsonFileFeed::new(feed);
            let summary = sync_once(pool, policy, &feed).await?;
            writeln!(
                stdout,
                "Sync: {} fetched, {} recorded, {} duplicates, {} failed",
                summary.fetched, summary.recorded, summary.duplicates, summary.failed
            )?;
        }
        Commands::Reconcile {
            campaign,
            donor,
            all,
        } => {
            let scope = match (campaign, donor, all) {
                (Some(id), None, false) => Scope::Campaign(id),
                (None, Some(addr), false) => Scope::Donor(addr),
                (None, None, true) => Scope::All,
                _ => return Err(CliError::AmbiguousScope.into()),
            };
            info!("Reconciling scope {scope}");
            let reports = reconcile(pool, policy, scope).await?;
            let drifted = reports.iter().filter(|r| r.drifted()).count();
            writeln!(
                stdout,
                "Reconciled {} scope(s), {} repaired",
                reports.len(),
                drifted
            )?;
            for report in reports.iter().filter(|r| r.drifted()) {
                writeln!(stdout, "  repaired {}", report.scope_key())?;
            }
        }
        Commands::Withdraw { campaign, amount } => {
            if amount == 0 {
                return Err(CliError::InvalidAmount { value: amount }.into());
            }
            aggregate::record_withdrawal(pool, &campaign, MinorUnits::new(amount)).await?;
            writeln!(stdout, "Recorded withdrawal of {amount} from campaign {campaign}")?;
        }
        Commands::Distribute { campaign, amount } => {
            if amount == 0 {
                return Err(CliError::InvalidAmount { value: amount }.into());
            }
            aggregate::record_distribution(pool, &campaign, MinorUnits::new(amount)).await?;
            writeln!(stdout, "Recorded distribution of {amount} from campaign {campaign}")?;
        }
        Commands::Show { target } => match target {
            ShowTarget::Campaign { campaign_id } => {
                match query::campaign_aggregate(pool, &campaign_id).await? {
                    Some(aggregate) => writeln!(
                        stdout,
                        "Campaign {}: raised {}, backers {}, withdrawn {}, distributed {}",
                        aggregate.campaign_id,
                        aggregate.current_amount.get(),
                        aggregate.backer_count,
                        aggregate.withdrawn_amount.get(),
                        aggregate.distributed_amount.get(),
                    )?,
                    None => writeln!(stdout, "No aggregate for campaign {campaign_id}")?,
                }
            }
            ShowTarget::Donor { address } => {
                match query::donor_aggregate(pool, &address).await? {
                    Some(aggregate) => writeln!(
                        stdout,
                        "Donor {}: donated {} across {} donation(s)",
                        aggregate.address,
                        aggregate.total_donated.get(),
                        aggregate.donation_count,
                    )?,
                    None => writeln!(stdout, "No aggregate for donor {address}")?,
                }
            }
            ShowTarget::Top { limit } => {
                writeln!(stdout, "Top campaigns:")?;
                for campaign in query::top_campaigns(pool, limit).await? {
                    writeln!(
                        stdout,
                        "  {} {} ({} backers)",
                        campaign.campaign_id,
                        campaign.current_amount.get(),
                        campaign.backer_count
                    )?;
                }
                writeln!(stdout, "Top donors:")?;
                for donor in query::top_donors(pool, limit).await? {
                    writeln!(
                        stdout,
                        "  {} {} ({} donation(s))",
                        donor.address,
                        donor.total_donated.get(),
                        donor.donation_count
                    )?;
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    fn test_config() -> Config {
        Env::try_parse_from(["ledger", "--db", "sqlite::memory:"])
            .unwrap()
            .into_config()
    }

    fn parse(args: &[&str]) -> Commands {
        let mut full = vec!["donation-ledger", "--db", "sqlite::memory:"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap().command
    }

    #[test]
    fn reconcile_scope_flags_conflict() {
        let result = Cli::try_parse_from([
            "donation-ledger",
            "--db",
            "sqlite::memory:",
            "reconcile",
            "--campaign",
            "c1",
            "--all",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ingest_then_show_round_trip() {
        let pool = setup_test_db().await;
        let config = test_config();

        let mut out = Vec::new();
        run_command_with_writers(
            config.clone(),
            parse(&[
                "ingest",
                "--campaign",
                "c1",
                "--donor",
                "d1",
                "--amount",
                "5000",
                "--tx-id",
                "tx-cli-1",
            ]),
            &pool,
            &mut out,
        )
        .await
        .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Recorded donation tx-cli-1"));

        let mut out = Vec::new();
        run_command_with_writers(
            config,
            parse(&["show", "campaign", "c1"]),
            &pool,
            &mut out,
        )
        .await
        .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("raised 5000"));
        assert!(printed.contains("backers 1"));
    }

    #[tokio::test]
    async fn duplicate_ingest_reports_already_recorded() {
        let pool = setup_test_db().await;
        let config = test_config();
        let args = [
            "ingest",
            "--campaign",
            "c1",
            "--donor",
            "d1",
            "--amount",
            "5000",
            "--tx-id",
            "tx-cli-dup",
        ];

        let mut out = Vec::new();
        run_command_with_writers(config.clone(), parse(&args), &pool, &mut out)
            .await
            .unwrap();

        let mut out = Vec::new();
        run_command_with_writers(config, parse(&args), &pool, &mut out)
            .await
            .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("already recorded"));
    }

    #[tokio::test]
    async fn zero_amount_is_rejected_before_any_write() {
        let pool = setup_test_db().await;
        let config = test_config();

        let mut out = Vec::new();
        let err = run_command_with_writers(
            config,
            parse(&[
                "ingest",
                "--campaign",
                "c1",
                "--donor",
                "d1",
                "--amount",
                "0",
                "--tx-id",
                "tx-zero",
            ]),
            &pool,
            &mut out,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Invalid amount"));
        assert_eq!(crate::donation::db_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn withdraw_and_distribute_update_campaign_figures() {
        let pool = setup_test_db().await;
        let config = test_config();

        let mut out = Vec::new();
        run_command_with_writers(
            config.clone(),
            parse(&[
                "ingest",
                "--campaign",
                "c1",
                "--donor",
                "d1",
                "--amount",
                "5000",
                "--tx-id",
                "tx-funds",
            ]),
            &pool,
            &mut out,
        )
        .await
        .unwrap();

        for args in [
            ["withdraw", "--campaign", "c1", "--amount", "1000"],
            ["distribute", "--campaign", "c1", "--amount", "500"],
        ] {
            let mut out = Vec::new();
            run_command_with_writers(config.clone(), parse(&args), &pool, &mut out)
                .await
                .unwrap();
        }

        let mut out = Vec::new();
        run_command_with_writers(config, parse(&["show", "campaign", "c1"]), &pool, &mut out)
            .await
            .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("withdrawn 1000"));
        assert!(printed.contains("distributed 500"));
        assert!(printed.contains("raised 5000"));
    }

    #[tokio::test]
    async fn reconcile_all_over_empty_database_reports_nothing() {
        let pool = setup_test_db().await;
        let config = test_config();

        let mut out = Vec::new();
        run_command_with_writers(config, parse(&["reconcile", "--all"]), &pool, &mut out)
            .await
            .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Reconciled 0 scope(s), 0 repaired"));
    }
}

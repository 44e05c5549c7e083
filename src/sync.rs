//! External ledger sync: funnels confirmed on-chain contribution
//! events through donation ingestion.
//!
//! How the feed is obtained (polling, webhook, manual export) is the
//! collaborator's business; this module only guarantees that every
//! event goes through the same ingestion path as first-party
//! submissions, so the idempotency guard deduplicates regardless of
//! origin. A sync pass re-run over the same events is therefore safe.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::amount::MinorUnits;
use crate::currency::{Currency, CurrencyPolicy};
use crate::donation::NewDonation;
use crate::ingest::{IngestOutcome, ingest};

/// One externally-confirmed contribution event, as reported by the
/// source-of-truth ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedDonation {
    pub external_transaction_id: String,
    pub campaign_id: String,
    pub donor_address: String,
    pub amount: MinorUnits,
    pub currency: Currency,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_anonymous: bool,
    pub confirmed_at: DateTime<Utc>,
}

impl From<ConfirmedDonation> for NewDonation {
    fn from(event: ConfirmedDonation) -> Self {
        Self {
            campaign_id: event.campaign_id,
            donor_address: event.donor_address,
            amount: event.amount,
            currency: event.currency,
            message: event.message,
            is_anonymous: event.is_anonymous,
            external_transaction_id: event.external_transaction_id,
        }
    }
}

/// Source of confirmed contribution events.
#[async_trait]
pub trait LedgerFeed {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn confirmed_events(&self) -> Result<Vec<ConfirmedDonation>, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError<FeedError> {
    #[error("Ledger feed error: {0}")]
    Feed(#[source] FeedError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] crate::error::LedgerError),
}

/// Counters from one sync pass, for the operator log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSummary {
    pub fetched: usize,
    pub recorded: usize,
    pub duplicates: usize,
    pub failed: usize,
}

fn feed_retry_strategy() -> ExponentialBuilder {
    const SYNC_MAX_RETRIES: usize = 5;
    const SYNC_INITIAL_DELAY: Duration = Duration::from_millis(100);
    const SYNC_MAX_DELAY: Duration = Duration::from_secs(30);

    ExponentialBuilder::default()
        .with_max_times(SYNC_MAX_RETRIES)
        .with_min_delay(SYNC_INITIAL_DELAY)
        .with_max_delay(SYNC_MAX_DELAY)
        .with_jitter()
}

/// Fetches the feed (with retry) and ingests every event. Per-event
/// failures are logged and counted rather than aborting the pass;
/// duplicates are the expected outcome for events seen before.
#[tracing::instrument(skip(pool, policy, feed), level = tracing::Level::INFO)]
pub async fn sync_once<F: LedgerFeed + Sync>(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    feed: &F,
) -> Result<SyncSummary, SyncError<F::Error>> {
    let events = (|| async { feed.confirmed_events().await })
        .retry(feed_retry_strategy())
        .await
        .map_err(SyncError::Feed)?;

    let mut summary = SyncSummary {
        fetched: events.len(),
        ..SyncSummary::default()
    };

    for event in events {
        let external_tx_id = event.external_transaction_id.clone();
        match ingest(pool, policy, event.into()).await {
            Ok(IngestOutcome::Recorded { .. }) => summary.recorded += 1,
            Ok(IngestOutcome::Duplicate { .. }) => summary.duplicates += 1,
            Err(e) => {
                summary.failed += 1;
                error!(
                    external_tx_id = %external_tx_id,
                    "Failed to ingest synced event: {e}"
                );
            }
        }
    }

    info!(
        fetched = summary.fetched,
        recorded = summary.recorded,
        duplicates = summary.duplicates,
        failed = summary.failed,
        "Ledger sync pass complete"
    );

    Ok(summary)
}

/// Feed backed by a JSON file of confirmed events, used for manual
/// imports of historical records.
#[derive(Debug, Clone)]
pub struct JsonFileFeed {
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum JsonFeedError {
    #[error("Failed to read feed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse feed file: {0}")]
    Json(#[from] serde_json::Error),
}

impl JsonFileFeed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl LedgerFeed for JsonFileFeed {
    type Error = JsonFeedError;

    async fn confirmed_events(&self) -> Result<Vec<ConfirmedDonation>, Self::Error> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockLedgerFeed;
    use super::*;
    use crate::aggregate;
    use crate::test_utils::setup_test_db;

    fn event(tx: &str, donor: &str, amount: u64) -> ConfirmedDonation {
        ConfirmedDonation {
            external_transaction_id: tx.to_string(),
            campaign_id: "campaign-1".to_string(),
            donor_address: donor.to_string(),
            amount: MinorUnits::new(amount),
            currency: Currency::Sgusd,
            message: String::new(),
            is_anonymous: false,
            confirmed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sync_ingests_every_event_once() {
        let pool = setup_test_db().await;
        let feed = MockLedgerFeed::new(vec![
            event("tx-1", "d1", 100),
            event("tx-2", "d2", 200),
        ]);

        let summary = sync_once(&pool, CurrencyPolicy::default(), &feed)
            .await
            .unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.recorded, 2);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(summary.failed, 0);

        let campaign = aggregate::find_campaign(&pool, "campaign-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, MinorUnits::new(300));
    }

    #[tokio::test]
    async fn rerunning_sync_reports_duplicates_without_double_counting() {
        let pool = setup_test_db().await;
        let feed = MockLedgerFeed::new(vec![event("tx-1", "d1", 100)]);
        let policy = CurrencyPolicy::default();

        sync_once(&pool, policy, &feed).await.unwrap();
        let summary = sync_once(&pool, policy, &feed).await.unwrap();

        assert_eq!(summary.recorded, 0);
        assert_eq!(summary.duplicates, 1);

        let campaign = aggregate::find_campaign(&pool, "campaign-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, MinorUnits::new(100));
    }

    #[tokio::test]
    async fn transient_feed_failures_are_retried() {
        let pool = setup_test_db().await;
        let feed = MockLedgerFeed::failing_first(vec![event("tx-1", "d1", 100)], 2);

        let summary = sync_once(&pool, CurrencyPolicy::default(), &feed)
            .await
            .unwrap();
        assert_eq!(summary.recorded, 1);
    }

    #[tokio::test]
    async fn invalid_event_is_counted_failed_and_pass_continues() {
        let pool = setup_test_db().await;
        let mut bad = event("", "d1", 100);
        bad.external_transaction_id = String::new();
        let feed = MockLedgerFeed::new(vec![bad, event("tx-ok", "d2", 50)]);

        let summary = sync_once(&pool, CurrencyPolicy::default(), &feed)
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.recorded, 1);
    }
}

//! Donation ingestion: the write path of the engine.
//!
//! State machine: Received -> Validated -> (Duplicate | Persisted) ->
//! Projected. The record insert and the aggregate increments run inside
//! one SQLite transaction, so the pair lands atomically; the record
//! write is the durability anchor and the reconciler repairs any
//! aggregate the incremental step failed to reach. Concurrent attempts
//! carrying the same external transaction id are resolved by the unique
//! index: the losing writer's constraint violation is translated into
//! the duplicate outcome.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::aggregate::{self, CampaignAggregate};
use crate::currency::CurrencyPolicy;
use crate::donation::{self, DonationRecord, NewDonation};
use crate::error::{LedgerError, StorageError};
use crate::lock::{campaign_key, donor_key, get_scope_lock};

/// Bounded wait on storage before ingestion fails with a retryable
/// storage error.
const STORAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal state of one ingestion call. A duplicate is a success, not
/// an error: callers display it identically to a fresh recording and
/// must not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New record persisted and projected into the aggregates.
    Recorded {
        record: DonationRecord,
        campaign: CampaignAggregate,
    },
    /// The external transaction id was already applied; nothing
    /// changed and the prior record is returned unchanged.
    Duplicate { existing: DonationRecord },
}

impl IngestOutcome {
    pub fn record(&self) -> &DonationRecord {
        match self {
            Self::Recorded { record, .. } => record,
            Self::Duplicate { existing } => existing,
        }
    }
}

/// Accepts a fully-validated donation intent and durably records it
/// exactly once, then updates the aggregates.
#[tracing::instrument(
    skip(pool, policy, donation),
    fields(
        campaign_id = %donation.campaign_id,
        donor = %donation.donor_address,
        amount = %donation.amount,
        external_tx_id = %donation.external_transaction_id,
    ),
    level = tracing::Level::INFO
)]
pub async fn ingest(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    donation: NewDonation,
) -> Result<IngestOutcome, LedgerError> {
    donation.validate()?;

    // Serialize aggregate writers per scope. Campaign lock first, then
    // donor lock; every writer acquires in this order.
    let campaign_lock = get_scope_lock(&campaign_key(&donation.campaign_id)).await;
    let _campaign_guard = campaign_lock.lock().await;

    let donor_guard = if donation.is_anonymous {
        None
    } else {
        let donor_lock = get_scope_lock(&donor_key(&donation.donor_address)).await;
        Some(donor_lock.lock_owned().await)
    };

    let outcome = tokio::time::timeout(STORAGE_TIMEOUT, persist_and_project(pool, policy, &donation))
        .await
        .map_err(|_| LedgerError::Storage(StorageError::Timeout(STORAGE_TIMEOUT)))??;

    drop(donor_guard);
    Ok(outcome)
}

async fn persist_and_project(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    donation: &NewDonation,
) -> Result<IngestOutcome, LedgerError> {
    let mut sql_tx = pool.begin().await?;

    // Idempotency guard inside the transaction: the same unit of work
    // that would insert the record sees any prior one.
    if let Some(existing) =
        donation::find_by_external_tx_id(sql_tx.as_mut(), &donation.external_transaction_id).await?
    {
        sql_tx.rollback().await?;
        info!(
            external_tx_id = %donation.external_transaction_id,
            "Donation already applied, skipping projection"
        );
        return Ok(IngestOutcome::Duplicate { existing });
    }

    let record = match donation
        .insert_within_transaction(&mut sql_tx, Utc::now())
        .await
    {
        Ok(record) => record,
        Err(err) => {
            sql_tx.rollback().await?;
            return duplicate_from_insert_race(pool, donation, err).await;
        }
    };

    project_record(&mut sql_tx, policy, &record).await?;
    sql_tx.commit().await?;

    let campaign = aggregate::find_campaign(pool, &record.campaign_id)
        .await?
        .unwrap_or(CampaignAggregate {
            campaign_id: record.campaign_id.clone(),
            current_amount: crate::amount::MinorUnits::ZERO,
            backer_count: 0,
            withdrawn_amount: crate::amount::MinorUnits::ZERO,
            distributed_amount: crate::amount::MinorUnits::ZERO,
        });

    info!(
        donation_id = record.id,
        campaign_total = %campaign.current_amount,
        backer_count = campaign.backer_count,
        "Recorded donation"
    );

    Ok(IngestOutcome::Recorded { record, campaign })
}

/// Incremental updater: applies one new record's delta to the
/// aggregates within the caller's transaction.
async fn project_record(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    policy: CurrencyPolicy,
    record: &DonationRecord,
) -> Result<(), LedgerError> {
    // Lazy materialization of the zero-baseline campaign row happens
    // even when the donation's currency does not count toward totals.
    aggregate::ensure_campaign(sql_tx, &record.campaign_id).await?;

    if !policy.counts_toward_totals(record.currency) {
        info!(
            currency = %record.currency,
            accepted = %policy.accepted(),
            "Donation recorded but excluded from totals by currency policy"
        );
        return Ok(());
    }

    let backer_delta = if record.is_anonymous {
        0
    } else if is_first_qualifying_donation(sql_tx, record, policy).await? {
        1
    } else {
        0
    };

    aggregate::increment_campaign(sql_tx, &record.campaign_id, record.amount, backer_delta).await?;

    if !record.is_anonymous {
        aggregate::increment_donor(
            sql_tx,
            &record.donor_address,
            record.amount,
            record.created_at,
        )
        .await?;
    }

    Ok(())
}

/// True when the just-inserted record is this donor's first qualifying
/// donation to the campaign, i.e. the donor becomes a distinct backer.
async fn is_first_qualifying_donation(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &DonationRecord,
    policy: CurrencyPolicy,
) -> Result<bool, LedgerError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM donations \
         WHERE campaign_id = ?1 AND donor_address = ?2 AND is_anonymous = 0 AND currency = ?3",
    )
    .bind(&record.campaign_id)
    .bind(&record.donor_address)
    .bind(policy.accepted().as_str())
    .fetch_one(sql_tx.as_mut())
    .await?;

    // The new record is already visible inside this transaction.
    Ok(count == 1)
}

/// A concurrent writer won the insert race for this transaction id:
/// its commit landed between this writer's guard check and its insert,
/// so the insert hit the unique index. Translated into the duplicate
/// transition by refetching the winner's record; any other error
/// propagates unchanged.
async fn duplicate_from_insert_race(
    pool: &SqlitePool,
    donation: &NewDonation,
    err: LedgerError,
) -> Result<IngestOutcome, LedgerError> {
    if !is_unique_violation(&err) {
        return Err(err);
    }

    warn!(
        external_tx_id = %donation.external_transaction_id,
        "Lost insert race, returning prior record"
    );
    let existing = donation::find_by_external_tx_id(pool, &donation.external_transaction_id)
        .await?
        .ok_or(err)?;
    Ok(IngestOutcome::Duplicate { existing })
}

fn is_unique_violation(err: &LedgerError) -> bool {
    matches!(
        err,
        LedgerError::Storage(StorageError::Unavailable(sqlx::Error::Database(db_err)))
            if db_err.is_unique_violation()
    )
}

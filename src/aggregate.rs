//! Derived aggregate rows and their write primitives.
//!
//! Aggregates carry nothing that is absent from the donation records;
//! they exist so reads stay cheap. Two write disciplines apply: the
//! incremental updater uses relative UPSERT increments so concurrent
//! writers never lose updates, and the reconciler overwrites the
//! maintained value wholesale because it derives from the complete
//! record set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::amount::{self, AmountError, MinorUnits};
use crate::error::LedgerError;
use crate::projector::{CampaignTotals, DonorTotals};

/// Derived, mutable summary of a campaign's donations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignAggregate {
    pub campaign_id: String,
    pub current_amount: MinorUnits,
    pub backer_count: u64,
    pub withdrawn_amount: MinorUnits,
    pub distributed_amount: MinorUnits,
}

/// Derived, mutable summary of a donor's non-anonymous donations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorAggregate {
    pub address: String,
    pub total_donated: MinorUnits,
    pub donation_count: u64,
    pub first_donation: Option<DateTime<Utc>>,
    pub last_donation: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    campaign_id: String,
    current_amount: i64,
    backer_count: i64,
    withdrawn_amount: i64,
    distributed_amount: i64,
}

impl CampaignRow {
    fn into_aggregate(self) -> Result<CampaignAggregate, LedgerError> {
        Ok(CampaignAggregate {
            campaign_id: self.campaign_id,
            current_amount: MinorUnits::from_storage(self.current_amount)?,
            backer_count: amount::count_from_storage(self.backer_count)?,
            withdrawn_amount: MinorUnits::from_storage(self.withdrawn_amount)?,
            distributed_amount: MinorUnits::from_storage(self.distributed_amount)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DonorRow {
    address: String,
    total_donated: i64,
    donation_count: i64,
    first_donation: Option<DateTime<Utc>>,
    last_donation: Option<DateTime<Utc>>,
}

impl DonorRow {
    fn into_aggregate(self) -> Result<DonorAggregate, LedgerError> {
        Ok(DonorAggregate {
            address: self.address,
            total_donated: MinorUnits::from_storage(self.total_donated)?,
            donation_count: amount::count_from_storage(self.donation_count)?,
            first_donation: self.first_donation,
            last_donation: self.last_donation,
        })
    }
}

pub async fn find_campaign<'e, E>(
    executor: E,
    campaign_id: &str,
) -> Result<Option<CampaignAggregate>, LedgerError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query_as::<_, CampaignRow>(
        "SELECT campaign_id, current_amount, backer_count, withdrawn_amount, distributed_amount \
         FROM campaign_aggregates WHERE campaign_id = ?1",
    )
    .bind(campaign_id)
    .fetch_optional(executor)
    .await?;

    row.map(CampaignRow::into_aggregate).transpose()
}

pub async fn find_donor<'e, E>(
    executor: E,
    address: &str,
) -> Result<Option<DonorAggregate>, LedgerError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query_as::<_, DonorRow>(
        "SELECT address, total_donated, donation_count, first_donation, last_donation \
         FROM donor_aggregates WHERE address = ?1",
    )
    .bind(address)
    .fetch_optional(executor)
    .await?;

    row.map(DonorRow::into_aggregate).transpose()
}

/// Lazy materialization: creates the zero-baseline campaign row if it
/// does not exist yet, leaving an existing row untouched.
pub async fn ensure_campaign(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    campaign_id: &str,
) -> Result<(), LedgerError> {
    sqlx::query("INSERT OR IGNORE INTO campaign_aggregates (campaign_id) VALUES (?1)")
        .bind(campaign_id)
        .execute(sql_tx.as_mut())
        .await?;
    Ok(())
}

/// Applies one donation's delta to the campaign row as a relative
/// increment. Never reads the stored value into memory first; a stale
/// read-modify-write would lose concurrent updates.
pub async fn increment_campaign(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    campaign_id: &str,
    amount: MinorUnits,
    backer_delta: i64,
) -> Result<(), LedgerError> {
    let amount = amount.to_storage()?;

    sqlx::query(
        r#"
        INSERT INTO campaign_aggregates (campaign_id, current_amount, backer_count, last_updated)
        VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
        ON CONFLICT(campaign_id) DO UPDATE SET
            current_amount = current_amount + excluded.current_amount,
            backer_count = backer_count + excluded.backer_count,
            last_updated = CURRENT_TIMESTAMP
        "#,
    )
    .bind(campaign_id)
    .bind(amount)
    .bind(backer_delta)
    .execute(sql_tx.as_mut())
    .await?;

    Ok(())
}

/// Reconciler write path: unconditional overwrite of the maintained
/// totals. Withdrawn/distributed figures are real state, not derived
/// from donations, so they are preserved.
pub async fn overwrite_campaign(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    campaign_id: &str,
    totals: &CampaignTotals,
) -> Result<(), LedgerError> {
    let amount = totals.current_amount.to_storage()?;
    let backers = i64::try_from(totals.backer_count)
        .map_err(|_| AmountError::ExceedsStorageRange(totals.backer_count))?;

    sqlx::query(
        r#"
        INSERT INTO campaign_aggregates (campaign_id, current_amount, backer_count, last_updated)
        VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
        ON CONFLICT(campaign_id) DO UPDATE SET
            current_amount = excluded.current_amount,
            backer_count = excluded.backer_count,
            last_updated = CURRENT_TIMESTAMP
        "#,
    )
    .bind(campaign_id)
    .bind(amount)
    .bind(backers)
    .execute(sql_tx.as_mut())
    .await?;

    Ok(())
}

/// Applies one donation to the donor row. Count and total are relative
/// increments; first/last timestamps fold in with MIN/MAX so arrival
/// order does not matter.
pub async fn increment_donor(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    address: &str,
    amount: MinorUnits,
    donated_at: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let amount = amount.to_storage()?;

    sqlx::query(
        r#"
        INSERT INTO donor_aggregates (
            address, total_donated, donation_count, first_donation, last_donation, last_updated
        )
        VALUES (?1, ?2, 1, ?3, ?3, CURRENT_TIMESTAMP)
        ON CONFLICT(address) DO UPDATE SET
            total_donated = total_donated + excluded.total_donated,
            donation_count = donation_count + 1,
            first_donation = COALESCE(MIN(first_donation, excluded.first_donation), excluded.first_donation),
            last_donation = COALESCE(MAX(last_donation, excluded.last_donation), excluded.last_donation),
            last_updated = CURRENT_TIMESTAMP
        "#,
    )
    .bind(address)
    .bind(amount)
    .bind(donated_at)
    .execute(sql_tx.as_mut())
    .await?;

    Ok(())
}

/// Reconciler write path for donor rows: unconditional overwrite.
pub async fn overwrite_donor(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    address: &str,
    totals: &DonorTotals,
) -> Result<(), LedgerError> {
    let amount = totals.total_donated.to_storage()?;
    let count = i64::try_from(totals.donation_count)
        .map_err(|_| AmountError::ExceedsStorageRange(totals.donation_count))?;

    sqlx::query(
        r#"
        INSERT INTO donor_aggregates (
            address, total_donated, donation_count, first_donation, last_donation, last_updated
        )
        VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
        ON CONFLICT(address) DO UPDATE SET
            total_donated = excluded.total_donated,
            donation_count = excluded.donation_count,
            first_donation = excluded.first_donation,
            last_donation = excluded.last_donation,
            last_updated = CURRENT_TIMESTAMP
        "#,
    )
    .bind(address)
    .bind(amount)
    .bind(count)
    .bind(totals.first_donation)
    .bind(totals.last_donation)
    .execute(sql_tx.as_mut())
    .await?;

    Ok(())
}

/// Records funds withdrawn by the campaign owner as a relative
/// increment on the campaign row.
pub async fn record_withdrawal(
    pool: &SqlitePool,
    campaign_id: &str,
    amount: MinorUnits,
) -> Result<(), LedgerError> {
    let amount = amount.to_storage()?;

    sqlx::query(
        "UPDATE campaign_aggregates \
         SET withdrawn_amount = withdrawn_amount + ?1, last_updated = CURRENT_TIMESTAMP \
         WHERE campaign_id = ?2",
    )
    .bind(amount)
    .bind(campaign_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Records funds distributed to beneficiaries as a relative increment
/// on the campaign row.
pub async fn record_distribution(
    pool: &SqlitePool,
    campaign_id: &str,
    amount: MinorUnits,
) -> Result<(), LedgerError> {
    let amount = amount.to_storage()?;

    sqlx::query(
        "UPDATE campaign_aggregates \
         SET distributed_amount = distributed_amount + ?1, last_updated = CURRENT_TIMESTAMP \
         WHERE campaign_id = ?2",
    )
    .bind(amount)
    .bind(campaign_id)
    .execute(pool)
    .await?;

    Ok(())
}

//! The append-only donation record store and its idempotency guard.
//!
//! A [`DonationRecord`] is the single source of truth: aggregates are
//! derivative and always recomputable from the rows in this table. The
//! unique index on `external_transaction_id` makes the guard check and
//! the insert one serializable unit per transaction id; a losing
//! concurrent writer hits the constraint and is treated as a duplicate
//! submission, never as double-application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::amount::MinorUnits;
use crate::currency::Currency;
use crate::error::{DonationValidationError, LedgerError};

/// Immutable record of one contribution. Created exactly once when the
/// contribution is first observed, never mutated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: i64,
    pub campaign_id: String,
    pub donor_address: String,
    pub amount: MinorUnits,
    pub currency: Currency,
    pub message: String,
    pub is_anonymous: bool,
    pub external_transaction_id: String,
    pub created_at: DateTime<Utc>,
}

/// Fully-validated donation intent accepted by the write path. The
/// caller is expected to have obtained external ledger confirmation
/// before constructing one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDonation {
    pub campaign_id: String,
    pub donor_address: String,
    pub amount: MinorUnits,
    pub currency: Currency,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_anonymous: bool,
    pub external_transaction_id: String,
}

impl NewDonation {
    /// Required-field validation. Nothing is written when this fails;
    /// the error names the offending field.
    pub fn validate(&self) -> Result<(), DonationValidationError> {
        if self.campaign_id.trim().is_empty() {
            return Err(DonationValidationError::EmptyCampaignId);
        }
        if self.donor_address.trim().is_empty() {
            return Err(DonationValidationError::EmptyDonorAddress);
        }
        if self.external_transaction_id.trim().is_empty() {
            return Err(DonationValidationError::EmptyExternalTransactionId);
        }
        if self.amount.is_zero() {
            return Err(DonationValidationError::ZeroAmount);
        }
        Ok(())
    }

    /// Appends the record inside the caller's transaction and returns
    /// it with its generated id and timestamp. A unique-constraint
    /// violation on `external_transaction_id` is surfaced as
    /// `sqlx::Error`; the ingestion path translates it into the
    /// duplicate outcome.
    pub async fn insert_within_transaction(
        &self,
        sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        created_at: DateTime<Utc>,
    ) -> Result<DonationRecord, LedgerError> {
        let amount = self.amount.to_storage()?;

        let result = sqlx::query(
            r#"
            INSERT INTO donations (
                campaign_id,
                donor_address,
                amount,
                currency,
                message,
                is_anonymous,
                external_transaction_id,
                created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&self.campaign_id)
        .bind(&self.donor_address)
        .bind(amount)
        .bind(self.currency.as_str())
        .bind(&self.message)
        .bind(self.is_anonymous)
        .bind(&self.external_transaction_id)
        .bind(created_at)
        .execute(sql_tx.as_mut())
        .await?;

        Ok(DonationRecord {
            id: result.last_insert_rowid(),
            campaign_id: self.campaign_id.clone(),
            donor_address: self.donor_address.clone(),
            amount: self.amount,
            currency: self.currency,
            message: self.message.clone(),
            is_anonymous: self.is_anonymous,
            external_transaction_id: self.external_transaction_id.clone(),
            created_at,
        })
    }
}

/// Raw row shape used by the runtime-checked queries before conversion
/// into the domain type.
#[derive(Debug, sqlx::FromRow)]
struct DonationRow {
    id: i64,
    campaign_id: String,
    donor_address: String,
    amount: i64,
    currency: String,
    message: String,
    is_anonymous: bool,
    external_transaction_id: String,
    created_at: DateTime<Utc>,
}

impl DonationRow {
    fn into_record(self) -> Result<DonationRecord, LedgerError> {
        Ok(DonationRecord {
            id: self.id,
            campaign_id: self.campaign_id,
            donor_address: self.donor_address,
            amount: MinorUnits::from_storage(self.amount)?,
            currency: self.currency.parse()?,
            message: self.message,
            is_anonymous: self.is_anonymous,
            external_transaction_id: self.external_transaction_id,
            created_at: self.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, campaign_id, donor_address, amount, currency, \
     message, is_anonymous, external_transaction_id, created_at FROM donations";

/// Idempotency guard: has a record with this external transaction id
/// already been applied? Pure check, no side effects.
pub async fn find_by_external_tx_id<'e, E>(
    executor: E,
    external_transaction_id: &str,
) -> Result<Option<DonationRecord>, LedgerError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query_as::<_, DonationRow>(&format!(
        "{SELECT_COLUMNS} WHERE external_transaction_id = ?1"
    ))
    .bind(external_transaction_id)
    .fetch_optional(executor)
    .await?;

    row.map(DonationRow::into_record).transpose()
}

/// All records for a campaign in creation order, for the projector.
pub async fn find_by_campaign<'e, E>(
    executor: E,
    campaign_id: &str,
) -> Result<Vec<DonationRecord>, LedgerError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let rows = sqlx::query_as::<_, DonationRow>(&format!(
        "{SELECT_COLUMNS} WHERE campaign_id = ?1 ORDER BY created_at ASC, id ASC"
    ))
    .bind(campaign_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(DonationRow::into_record).collect()
}

/// All records from a donor in creation order, for the projector.
pub async fn find_by_donor<'e, E>(
    executor: E,
    donor_address: &str,
) -> Result<Vec<DonationRecord>, LedgerError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let rows = sqlx::query_as::<_, DonationRow>(&format!(
        "{SELECT_COLUMNS} WHERE donor_address = ?1 ORDER BY created_at ASC, id ASC"
    ))
    .bind(donor_address)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(DonationRow::into_record).collect()
}

pub async fn db_count(pool: &SqlitePool) -> Result<i64, LedgerError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM donations")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

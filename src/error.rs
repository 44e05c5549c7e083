//! Domain-specific error types with one enum per boundary: validation,
//! storage, ingestion, and reconciliation. Benign outcomes (duplicate
//! submissions, unknown reconciliation scopes) are modeled as outcomes
//! on their operations, not as errors here.

use crate::amount::AmountError;
use crate::currency::ParseCurrencyError;

/// Field-level validation failures. Rejected at the boundary before any
/// write; the offending field is named for the caller.
#[derive(Debug, thiserror::Error)]
pub enum DonationValidationError {
    #[error("Missing campaign id")]
    EmptyCampaignId,
    #[error("Missing donor address")]
    EmptyDonorAddress,
    #[error("Missing external transaction id")]
    EmptyExternalTransactionId,
    #[error("Donation amount must be greater than zero")]
    ZeroAmount,
    #[error("Invalid currency: {0}")]
    Currency(#[from] ParseCurrencyError),
}

/// Transient storage failures. Safe to retry the whole ingestion call
/// because the idempotency guard deduplicates the replay.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("Storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Unified error type for ledger operations with clear domain
/// boundaries between validation, amount arithmetic, and persistence.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid donation: {0}")]
    Validation(#[from] DonationValidationError),
    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Reconciliation lease for scope '{0}' is held by another worker")]
    LeaseHeld(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Unavailable(err))
    }
}

impl From<ParseCurrencyError> for LedgerError {
    fn from(err: ParseCurrencyError) -> Self {
        Self::Validation(DonationValidationError::Currency(err))
    }
}

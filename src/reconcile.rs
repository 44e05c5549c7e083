//! Full recomputation of aggregates from the record store.
//!
//! The reconciler is the self-healing half of the engine: it replays
//! the projector over every donation record in a scope and overwrites
//! the maintained aggregate, authoritative over whatever the
//! incremental path left behind. Drift between the stored and the
//! recomputed value is expected after partial failures; it is reported
//! and repaired, never treated as corruption.

use std::fmt;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::aggregate;
use crate::currency::CurrencyPolicy;
use crate::donation;
use crate::error::LedgerError;
use crate::lock::{
    campaign_key, clear_scope_lease, donor_key, get_scope_lock, try_acquire_scope_lease,
};
use crate::projector::{self, CampaignTotals, DonorTotals};

/// What to recompute: one campaign, one donor, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Campaign(String),
    Donor(String),
    All,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Campaign(id) => write!(f, "campaign:{id}"),
            Self::Donor(address) => write!(f, "donor:{address}"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Before/after values of one reconciled aggregate, for audit logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileReport {
    Campaign {
        campaign_id: String,
        before: CampaignTotals,
        after: CampaignTotals,
    },
    Donor {
        address: String,
        before: DonorTotals,
        after: DonorTotals,
    },
}

impl ReconcileReport {
    /// True when the stored aggregate disagreed with the recomputed
    /// value and was repaired.
    pub fn drifted(&self) -> bool {
        match self {
            Self::Campaign { before, after, .. } => before != after,
            Self::Donor { before, after, .. } => before != after,
        }
    }

    pub fn scope_key(&self) -> String {
        match self {
            Self::Campaign { campaign_id, .. } => campaign_key(campaign_id),
            Self::Donor { address, .. } => donor_key(address),
        }
    }
}

/// Recomputes the aggregates in scope from scratch and overwrites the
/// stored values. Idempotent: a second pass with no intervening writes
/// reports no drift.
#[tracing::instrument(skip(pool, policy), fields(scope = %scope), level = tracing::Level::INFO)]
pub async fn reconcile(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    scope: Scope,
) -> Result<Vec<ReconcileReport>, LedgerError> {
    let reports = match scope {
        Scope::Campaign(campaign_id) => {
            vec![reconcile_campaign(pool, policy, &campaign_id).await?]
        }
        Scope::Donor(address) => vec![reconcile_donor(pool, policy, &address).await?],
        Scope::All => {
            let mut reports = Vec::new();
            for campaign_id in all_campaign_ids(pool).await? {
                reports.push(reconcile_campaign(pool, policy, &campaign_id).await?);
            }
            for address in all_donor_addresses(pool).await? {
                reports.push(reconcile_donor(pool, policy, &address).await?);
            }
            reports
        }
    };

    let drifted = reports.iter().filter(|r| r.drifted()).count();
    info!(
        reconciled = reports.len(),
        drifted, "Reconciliation pass complete"
    );

    Ok(reports)
}

/// Commits the lease in its own transaction so other processes observe
/// it for the whole duration of the pass. A crash mid-pass leaves the
/// lease behind; the TTL cleanup in the next acquisition reclaims it.
async fn acquire_lease(pool: &SqlitePool, scope_key: &str) -> Result<(), LedgerError> {
    let mut sql_tx = pool.begin().await?;
    if !try_acquire_scope_lease(&mut sql_tx, scope_key).await? {
        sql_tx.rollback().await?;
        return Err(LedgerError::LeaseHeld(scope_key.to_string()));
    }
    sql_tx.commit().await?;
    Ok(())
}

async fn release_lease(pool: &SqlitePool, scope_key: &str) -> Result<(), LedgerError> {
    let mut sql_tx = pool.begin().await?;
    clear_scope_lease(&mut sql_tx, scope_key).await?;
    sql_tx.commit().await?;
    Ok(())
}

async fn reconcile_campaign(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    campaign_id: &str,
) -> Result<ReconcileReport, LedgerError> {
    let scope_key = campaign_key(campaign_id);

    // Same in-process lock the incremental updater takes, so no
    // concurrent increment can clobber the overwrite.
    let scope_lock = get_scope_lock(&scope_key).await;
    let _guard = scope_lock.lock().await;

    acquire_lease(pool, &scope_key).await?;
    let result = recompute_campaign(pool, policy, campaign_id).await;
    release_lease(pool, &scope_key).await?;

    let report = result?;
    log_drift(&report);
    Ok(report)
}

async fn recompute_campaign(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    campaign_id: &str,
) -> Result<ReconcileReport, LedgerError> {
    let mut sql_tx = pool.begin().await?;

    let before = aggregate::find_campaign(sql_tx.as_mut(), campaign_id)
        .await?
        .map(|a| CampaignTotals {
            current_amount: a.current_amount,
            backer_count: a.backer_count,
        })
        .unwrap_or_default();

    let records = donation::find_by_campaign(sql_tx.as_mut(), campaign_id).await?;
    let after = projector::project_campaign(&records, policy)?;

    aggregate::overwrite_campaign(&mut sql_tx, campaign_id, &after).await?;
    sql_tx.commit().await?;

    Ok(ReconcileReport::Campaign {
        campaign_id: campaign_id.to_string(),
        before,
        after,
    })
}

async fn reconcile_donor(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    address: &str,
) -> Result<ReconcileReport, LedgerError> {
    let scope_key = donor_key(address);

    let scope_lock = get_scope_lock(&scope_key).await;
    let _guard = scope_lock.lock().await;

    acquire_lease(pool, &scope_key).await?;
    let result = recompute_donor(pool, policy, address).await;
    release_lease(pool, &scope_key).await?;

    let report = result?;
    log_drift(&report);
    Ok(report)
}

async fn recompute_donor(
    pool: &SqlitePool,
    policy: CurrencyPolicy,
    address: &str,
) -> Result<ReconcileReport, LedgerError> {
    let mut sql_tx = pool.begin().await?;

    let before = aggregate::find_donor(sql_tx.as_mut(), address)
        .await?
        .map(|a| DonorTotals {
            total_donated: a.total_donated,
            donation_count: a.donation_count,
            first_donation: a.first_donation,
            last_donation: a.last_donation,
        })
        .unwrap_or_default();

    let records = donation::find_by_donor(sql_tx.as_mut(), address).await?;
    let after = projector::project_donor(&records, policy)?;

    aggregate::overwrite_donor(&mut sql_tx, address, &after).await?;
    sql_tx.commit().await?;

    Ok(ReconcileReport::Donor {
        address: address.to_string(),
        before,
        after,
    })
}

fn log_drift(report: &ReconcileReport) {
    if report.drifted() {
        warn!(
            scope = %report.scope_key(),
            ?report,
            "Aggregate drift detected and repaired"
        );
    }
}

/// Every campaign known to either the record store or the aggregate
/// table. Aggregates without records must still reconcile (to zero).
async fn all_campaign_ids(pool: &SqlitePool) -> Result<Vec<String>, LedgerError> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT campaign_id FROM campaign_aggregates \
         UNION SELECT DISTINCT campaign_id FROM donations \
         ORDER BY campaign_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Every donor with an aggregate row or a non-anonymous record.
/// Anonymous-only addresses never materialize a donor aggregate, so
/// they have nothing to reconcile.
async fn all_donor_addresses(pool: &SqlitePool) -> Result<Vec<String>, LedgerError> {
    let addresses: Vec<String> = sqlx::query_scalar(
        "SELECT address FROM donor_aggregates \
         UNION SELECT DISTINCT donor_address FROM donations WHERE is_anonymous = 0 \
         ORDER BY address",
    )
    .fetch_all(pool)
    .await?;
    Ok(addresses)
}

//! Scope-level locking for aggregate writers.
//!
//! Two layers: in-process async locks serialize concurrent aggregate
//! writers per campaign/donor within one process, and a `scope_locks`
//! table provides cross-process leases so a reconciliation pass is the
//! only writer admitted to its scope for the pass's duration.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::LedgerError;

/// Global scope-level locks to prevent race conditions between
/// concurrent ingestion calls and reconciliation passes. Each scope key
/// gets its own mutex to keep aggregate increments atomic per scope.
static SCOPE_LOCKS: LazyLock<RwLock<HashMap<String, Arc<Mutex<()>>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Lock key for a campaign aggregate.
pub fn campaign_key(campaign_id: &str) -> String {
    format!("campaign:{campaign_id}")
}

/// Lock key for a donor aggregate.
pub fn donor_key(donor_address: &str) -> String {
    format!("donor:{donor_address}")
}

/// Acquires the scope-specific lock, creating it on first use.
pub async fn get_scope_lock(key: &str) -> Arc<Mutex<()>> {
    // Fast path: the lock usually exists already.
    {
        let locks_read = SCOPE_LOCKS.read().await;
        if let Some(lock) = locks_read.get(key) {
            return lock.clone();
        }
    }

    let mut locks_write = SCOPE_LOCKS.write().await;
    locks_write
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

const LEASE_TIMEOUT_MINUTES: i32 = 5;

/// Atomically acquires a reconciliation lease for the scope key.
/// Returns true if the lease was acquired, false if another worker
/// holds it. Stale leases older than the TTL are cleaned up first.
pub async fn try_acquire_scope_lease(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    scope_key: &str,
) -> Result<bool, LedgerError> {
    let timeout_param = format!("-{LEASE_TIMEOUT_MINUTES} minutes");
    let cleanup_result =
        sqlx::query("DELETE FROM scope_locks WHERE scope_key = ?1 AND locked_at < datetime('now', ?2)")
            .bind(scope_key)
            .bind(&timeout_param)
            .execute(sql_tx.as_mut())
            .await
            .map_err(LedgerError::from)?;

    if cleanup_result.rows_affected() > 0 {
        info!(
            "Cleaned up {} stale lease(s) older than {} minutes for scope {scope_key}",
            cleanup_result.rows_affected(),
            LEASE_TIMEOUT_MINUTES
        );
    }

    let result = sqlx::query("INSERT OR IGNORE INTO scope_locks (scope_key) VALUES (?1)")
        .bind(scope_key)
        .execute(sql_tx.as_mut())
        .await
        .map_err(LedgerError::from)?;

    let lease_acquired = result.rows_affected() > 0;
    if lease_acquired {
        info!("Acquired reconciliation lease for scope: {scope_key}");
    } else {
        warn!("Reconciliation lease for scope {scope_key} already held");
    }

    Ok(lease_acquired)
}

/// Releases the reconciliation lease when the pass is done.
pub async fn clear_scope_lease(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    scope_key: &str,
) -> Result<(), LedgerError> {
    let result = sqlx::query("DELETE FROM scope_locks WHERE scope_key = ?1")
        .bind(scope_key)
        .execute(sql_tx.as_mut())
        .await
        .map_err(LedgerError::from)?;

    if result.rows_affected() > 0 {
        info!("Cleared reconciliation lease for scope: {scope_key}");
    }

    Ok(())
}

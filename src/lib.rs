//! Donation ledger reconciliation engine: an append-only store of
//! externally-confirmed donations with derived campaign and donor
//! aggregates that can always be rebuilt from the records.

pub mod aggregate;
pub mod amount;
pub mod cli;
pub mod currency;
pub mod donation;
mod env;
pub mod error;
pub mod ingest;
mod lock;
pub mod projector;
pub mod query;
pub mod reconcile;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_utils;

pub use env::{Config, Env, LogLevel, setup_tracing};
pub use error::LedgerError;

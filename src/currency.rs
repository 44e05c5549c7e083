//! Currency tags and the accepted-currency policy.
//!
//! Donations in any known currency are recorded, but only donations in
//! the policy's accepted tag count toward aggregate totals. The policy
//! is an explicit input everywhere so the rule is versioned in one
//! place instead of hard-coded at call sites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of currency tags the platform knows how to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Currency {
    /// Platform stablecoin, the default accepted tag for aggregates.
    Sgusd,
    Sol,
    Usdc,
}

impl Currency {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sgusd => "SGUSD",
            Self::Sol => "SOL",
            Self::Usdc => "USDC",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown currency tag: {0}")]
pub struct ParseCurrencyError(String);

impl FromStr for Currency {
    type Err = ParseCurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SGUSD" => Ok(Self::Sgusd),
            "SOL" => Ok(Self::Sol),
            "USDC" => Ok(Self::Usdc),
            _ => Err(ParseCurrencyError(s.to_string())),
        }
    }
}

/// Decides which currency tags count toward aggregate totals.
///
/// Exactly one tag is accepted at any time. Donations in other tags are
/// stored but excluded from `current_amount` and `total_donated` by the
/// incremental updater and the reconciler alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrencyPolicy {
    accepted: Currency,
}

impl CurrencyPolicy {
    pub const fn new(accepted: Currency) -> Self {
        Self { accepted }
    }

    pub const fn accepted(self) -> Currency {
        self.accepted
    }

    pub fn counts_toward_totals(self, currency: Currency) -> bool {
        currency == self.accepted
    }
}

impl Default for CurrencyPolicy {
    fn default() -> Self {
        Self::new(Currency::Sgusd)
    }
}

//! Shared test fixtures: database setup and a donation builder with
//! sensible defaults.

use sqlx::SqlitePool;

use crate::amount::MinorUnits;
use crate::currency::Currency;
use crate::donation::NewDonation;

/// Centralized test database setup to eliminate duplication across test
/// files. Creates an in-memory SQLite database with all migrations
/// applied.
pub(crate) async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

/// Builder for `NewDonation` test instances. The defaults are valid and
/// deterministic; tests override only the fields they assert on.
pub(crate) struct DonationBuilder {
    donation: NewDonation,
}

impl Default for DonationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DonationBuilder {
    pub(crate) fn new() -> Self {
        Self {
            donation: NewDonation {
                campaign_id: "campaign-1".to_string(),
                donor_address: "donor-1".to_string(),
                amount: MinorUnits::new(1_000),
                currency: Currency::Sgusd,
                message: String::new(),
                is_anonymous: false,
                external_transaction_id: "tx-fixture-1".to_string(),
            },
        }
    }

    pub(crate) fn with_campaign(mut self, campaign_id: &str) -> Self {
        self.donation.campaign_id = campaign_id.to_string();
        self
    }

    pub(crate) fn with_donor(mut self, donor_address: &str) -> Self {
        self.donation.donor_address = donor_address.to_string();
        self
    }

    pub(crate) fn with_amount(mut self, amount: u64) -> Self {
        self.donation.amount = MinorUnits::new(amount);
        self
    }

    pub(crate) fn with_currency(mut self, currency: Currency) -> Self {
        self.donation.currency = currency;
        self
    }

    pub(crate) fn with_tx_id(mut self, external_transaction_id: &str) -> Self {
        self.donation.external_transaction_id = external_transaction_id.to_string();
        self
    }

    pub(crate) fn anonymous(mut self) -> Self {
        self.donation.is_anonymous = true;
        self
    }

    pub(crate) fn build(self) -> NewDonation {
        self.donation
    }
}

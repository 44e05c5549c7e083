//! Read interface over the aggregate tables, consumed by the
//! presentation layer: single-row fetches and value-descending
//! leaderboards.

use sqlx::SqlitePool;

use crate::aggregate::{self, CampaignAggregate, DonorAggregate};
use crate::amount::{self, MinorUnits};
use crate::error::LedgerError;

pub async fn campaign_aggregate(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Option<CampaignAggregate>, LedgerError> {
    aggregate::find_campaign(pool, campaign_id).await
}

pub async fn donor_aggregate(
    pool: &SqlitePool,
    address: &str,
) -> Result<Option<DonorAggregate>, LedgerError> {
    aggregate::find_donor(pool, address).await
}

#[derive(Debug, sqlx::FromRow)]
struct CampaignRankRow {
    campaign_id: String,
    current_amount: i64,
    backer_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DonorRankRow {
    address: String,
    total_donated: i64,
    donation_count: i64,
}

/// A leaderboard entry: scope key plus its aggregate value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCampaign {
    pub campaign_id: String,
    pub current_amount: MinorUnits,
    pub backer_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedDonor {
    pub address: String,
    pub total_donated: MinorUnits,
    pub donation_count: u64,
}

/// Campaigns ordered by raised amount descending.
pub async fn top_campaigns(
    pool: &SqlitePool,
    limit: u32,
) -> Result<Vec<RankedCampaign>, LedgerError> {
    let rows = sqlx::query_as::<_, CampaignRankRow>(
        "SELECT campaign_id, current_amount, backer_count FROM campaign_aggregates \
         ORDER BY current_amount DESC, campaign_id ASC LIMIT ?1",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(RankedCampaign {
                campaign_id: row.campaign_id,
                current_amount: MinorUnits::from_storage(row.current_amount)?,
                backer_count: amount::count_from_storage(row.backer_count)?,
            })
        })
        .collect()
}

/// Donors ordered by total donated descending.
pub async fn top_donors(pool: &SqlitePool, limit: u32) -> Result<Vec<RankedDonor>, LedgerError> {
    let rows = sqlx::query_as::<_, DonorRankRow>(
        "SELECT address, total_donated, donation_count FROM donor_aggregates \
         ORDER BY total_donated DESC, address ASC LIMIT ?1",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(RankedDonor {
                address: row.address,
                total_donated: MinorUnits::from_storage(row.total_donated)?,
                donation_count: amount::count_from_storage(row.donation_count)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyPolicy;
    use crate::ingest::ingest;
    use crate::test_utils::{DonationBuilder, setup_test_db};

    async fn seed(pool: &SqlitePool) {
        let policy = CurrencyPolicy::default();
        for (tx, campaign, donor, amount) in [
            ("tx-1", "c-small", "d1", 100u64),
            ("tx-2", "c-big", "d1", 9_000),
            ("tx-3", "c-big", "d2", 1_000),
            ("tx-4", "c-mid", "d3", 5_000),
        ] {
            ingest(
                pool,
                policy,
                DonationBuilder::new()
                    .with_tx_id(tx)
                    .with_campaign(campaign)
                    .with_donor(donor)
                    .with_amount(amount)
                    .build(),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn top_campaigns_ranks_by_amount_descending() {
        let pool = setup_test_db().await;
        seed(&pool).await;

        let top = top_campaigns(&pool, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].campaign_id, "c-big");
        assert_eq!(top[0].current_amount, MinorUnits::new(10_000));
        assert_eq!(top[0].backer_count, 2);
        assert_eq!(top[1].campaign_id, "c-mid");
    }

    #[tokio::test]
    async fn top_donors_ranks_by_total_descending() {
        let pool = setup_test_db().await;
        seed(&pool).await;

        let top = top_donors(&pool, 10).await.unwrap();
        assert_eq!(top[0].address, "d1");
        assert_eq!(top[0].total_donated, MinorUnits::new(9_100));
        assert_eq!(top[0].donation_count, 2);
    }

    #[tokio::test]
    async fn single_row_fetches_return_none_for_unknown_keys() {
        let pool = setup_test_db().await;
        assert!(campaign_aggregate(&pool, "nope").await.unwrap().is_none());
        assert!(donor_aggregate(&pool, "nope").await.unwrap().is_none());
    }
}

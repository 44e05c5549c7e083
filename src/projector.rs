//! Pure aggregate projection over donation record sets.
//!
//! These functions define what the aggregates mean. The incremental
//! updater and the reconciler both follow the rules stated here; the
//! reconciler is literally a replay of these folds over the full
//! record set.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::amount::{AmountError, MinorUnits};
use crate::currency::CurrencyPolicy;
use crate::donation::DonationRecord;

/// Projected campaign totals: accepted-currency sum plus distinct
/// non-anonymous backers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CampaignTotals {
    pub current_amount: MinorUnits,
    pub backer_count: u64,
}

/// Projected donor totals over non-anonymous, accepted-currency
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DonorTotals {
    pub total_donated: MinorUnits,
    pub donation_count: u64,
    pub first_donation: Option<DateTime<Utc>>,
    pub last_donation: Option<DateTime<Utc>>,
}

/// Folds a campaign's records into totals. Anonymous donations count
/// toward the amount but never contribute a distinct backer address;
/// non-accepted currencies count toward nothing.
pub fn project_campaign(
    records: &[DonationRecord],
    policy: CurrencyPolicy,
) -> Result<CampaignTotals, AmountError> {
    let mut current_amount = MinorUnits::ZERO;
    let mut backers: HashSet<&str> = HashSet::new();

    for record in records {
        if !policy.counts_toward_totals(record.currency) {
            continue;
        }
        current_amount = current_amount.checked_add(record.amount)?;
        if !record.is_anonymous {
            backers.insert(record.donor_address.as_str());
        }
    }

    Ok(CampaignTotals {
        current_amount,
        backer_count: backers.len() as u64,
    })
}

/// Folds a donor's records into totals. Anonymous records are excluded
/// entirely; an anonymous contribution must never surface on a donor's
/// public aggregate.
pub fn project_donor(
    records: &[DonationRecord],
    policy: CurrencyPolicy,
) -> Result<DonorTotals, AmountError> {
    let mut totals = DonorTotals::default();

    for record in records {
        if record.is_anonymous || !policy.counts_toward_totals(record.currency) {
            continue;
        }
        totals.total_donated = totals.total_donated.checked_add(record.amount)?;
        totals.donation_count += 1;
        totals.first_donation = Some(match totals.first_donation {
            Some(first) => first.min(record.created_at),
            None => record.created_at,
        });
        totals.last_donation = Some(match totals.last_donation {
            Some(last) => last.max(record.created_at),
            None => record.created_at,
        });
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::currency::Currency;
    use crate::test_utils::DonationBuilder;

    fn record(builder: DonationBuilder, id: i64, hour: u32) -> DonationRecord {
        let donation = builder.build();
        DonationRecord {
            id,
            campaign_id: donation.campaign_id,
            donor_address: donation.donor_address,
            amount: donation.amount,
            currency: donation.currency,
            message: donation.message,
            is_anonymous: donation.is_anonymous,
            external_transaction_id: donation.external_transaction_id,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_record_set_projects_to_zero() {
        let policy = CurrencyPolicy::default();
        assert_eq!(
            project_campaign(&[], policy).unwrap(),
            CampaignTotals::default()
        );
        assert_eq!(project_donor(&[], policy).unwrap(), DonorTotals::default());
    }

    #[test]
    fn campaign_projection_counts_distinct_backers_once() {
        let policy = CurrencyPolicy::default();
        let records = vec![
            record(DonationBuilder::new().with_amount(100), 1, 1),
            record(DonationBuilder::new().with_amount(200), 2, 2),
            record(
                DonationBuilder::new().with_amount(50).with_donor("other"),
                3,
                3,
            ),
        ];

        let totals = project_campaign(&records, policy).unwrap();
        assert_eq!(totals.current_amount, MinorUnits::new(350));
        assert_eq!(totals.backer_count, 2);
    }

    #[test]
    fn anonymous_records_count_toward_amount_but_not_backers() {
        let policy = CurrencyPolicy::default();
        let records = vec![
            record(DonationBuilder::new().with_amount(100), 1, 1),
            record(
                DonationBuilder::new()
                    .with_amount(900)
                    .with_donor("ghost")
                    .anonymous(),
                2,
                2,
            ),
        ];

        let totals = project_campaign(&records, policy).unwrap();
        assert_eq!(totals.current_amount, MinorUnits::new(1_000));
        assert_eq!(totals.backer_count, 1);
    }

    #[test]
    fn non_accepted_currency_is_excluded_from_both_projections() {
        let policy = CurrencyPolicy::default();
        let records = vec![
            record(DonationBuilder::new().with_amount(100), 1, 1),
            record(
                DonationBuilder::new()
                    .with_amount(999)
                    .with_currency(Currency::Sol),
                2,
                2,
            ),
        ];

        let campaign = project_campaign(&records, policy).unwrap();
        assert_eq!(campaign.current_amount, MinorUnits::new(100));

        let donor = project_donor(&records, policy).unwrap();
        assert_eq!(donor.total_donated, MinorUnits::new(100));
        assert_eq!(donor.donation_count, 1);
    }

    #[test]
    fn donor_projection_skips_anonymous_records() {
        let policy = CurrencyPolicy::default();
        let records = vec![
            record(DonationBuilder::new().with_amount(100), 1, 2),
            record(DonationBuilder::new().with_amount(200).anonymous(), 2, 1),
            record(DonationBuilder::new().with_amount(300), 3, 5),
        ];

        let totals = project_donor(&records, policy).unwrap();
        assert_eq!(totals.total_donated, MinorUnits::new(400));
        assert_eq!(totals.donation_count, 2);
        assert_eq!(
            totals.first_donation,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap())
        );
        assert_eq!(
            totals.last_donation,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap())
        );
    }

    #[test]
    fn projection_is_order_independent() {
        let policy = CurrencyPolicy::default();
        let mut records = vec![
            record(DonationBuilder::new().with_amount(100), 1, 1),
            record(
                DonationBuilder::new().with_amount(200).with_donor("other"),
                2,
                2,
            ),
            record(DonationBuilder::new().with_amount(300).anonymous(), 3, 3),
        ];

        let forward = project_campaign(&records, policy).unwrap();
        records.reverse();
        let backward = project_campaign(&records, policy).unwrap();
        assert_eq!(forward, backward);
    }
}

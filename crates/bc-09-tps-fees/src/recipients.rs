//! # Recipient Normalization
//!
//! Fee recipients arrive either implicitly (the first author gets 100%)
//! or as an explicit share list. Normalization produces one canonical,
//! address-sorted, keyed form so validator and composer iterate the same
//! entries in the same order - iterating positionally over whatever shape
//! arrived is how the two sides historically diverged.
//!
//! Shares must sum to 100. A list naming any non-author is overridden to
//! `{first_author: 100}`: external addresses cannot be charged.

use crate::errors::TpsFeeError;
use shared_types::{Address, Unit};
use std::collections::BTreeMap;

/// The canonical recipient form: sorted (address, share%) pairs summing
/// to 100.
pub fn normalize_recipients(unit: &Unit) -> Result<Vec<(Address, u32)>, TpsFeeError> {
    let first_author = unit
        .first_author_address()
        .unwrap_or_default()
        .to_string();

    let Some(explicit) = &unit.earned_headers_commission_recipients else {
        return Ok(vec![(first_author, 100)]);
    };

    // Keyed form: merge duplicate addresses before validating shares.
    let mut by_address: BTreeMap<Address, u32> = BTreeMap::new();
    for recipient in explicit {
        *by_address.entry(recipient.address.clone()).or_insert(0) +=
            recipient.earned_headers_commission_share;
    }
    let total: u32 = by_address.values().sum();
    if total != 100 {
        return Err(TpsFeeError::BadShares(total));
    }
    // Charging a non-author would let units spend other people's credit.
    if by_address.keys().any(|addr| !unit.is_authored_by(addr)) {
        return Ok(vec![(first_author, 100)]);
    }
    Ok(by_address.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Author, CommissionRecipient};
    use std::collections::BTreeMap;

    fn unit_with_recipients(recipients: Option<Vec<CommissionRecipient>>) -> Unit {
        Unit {
            version: "4.0".into(),
            alt: "1".into(),
            unit: None,
            parent_units: vec![],
            last_ball: None,
            last_ball_unit: None,
            witness_list_unit: None,
            witnesses: None,
            timestamp: 0,
            authors: vec![
                Author {
                    address: "ALICE".into(),
                    definition: None,
                    authentifiers: BTreeMap::new(),
                },
                Author {
                    address: "BOB".into(),
                    definition: None,
                    authentifiers: BTreeMap::new(),
                },
            ],
            messages: vec![],
            earned_headers_commission_recipients: recipients,
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: None,
            content_hash: None,
        }
    }

    #[test]
    fn default_is_first_author_full_share() {
        let unit = unit_with_recipients(None);
        assert_eq!(
            normalize_recipients(&unit).unwrap(),
            vec![("ALICE".to_string(), 100)]
        );
    }

    #[test]
    fn explicit_author_shares_kept_and_sorted() {
        let unit = unit_with_recipients(Some(vec![
            CommissionRecipient {
                address: "BOB".into(),
                earned_headers_commission_share: 60,
            },
            CommissionRecipient {
                address: "ALICE".into(),
                earned_headers_commission_share: 40,
            },
        ]));
        assert_eq!(
            normalize_recipients(&unit).unwrap(),
            vec![("ALICE".to_string(), 40), ("BOB".to_string(), 60)]
        );
    }

    #[test]
    fn non_author_recipient_overrides_to_first_author() {
        let unit = unit_with_recipients(Some(vec![CommissionRecipient {
            address: "MALLORY".into(),
            earned_headers_commission_share: 100,
        }]));
        assert_eq!(
            normalize_recipients(&unit).unwrap(),
            vec![("ALICE".to_string(), 100)]
        );
    }

    #[test]
    fn shares_must_sum_to_hundred() {
        let unit = unit_with_recipients(Some(vec![CommissionRecipient {
            address: "ALICE".into(),
            earned_headers_commission_share: 80,
        }]));
        assert_eq!(
            normalize_recipients(&unit).unwrap_err(),
            TpsFeeError::BadShares(80)
        );
    }

    #[test]
    fn duplicate_addresses_merge_before_share_check() {
        let unit = unit_with_recipients(Some(vec![
            CommissionRecipient {
                address: "ALICE".into(),
                earned_headers_commission_share: 50,
            },
            CommissionRecipient {
                address: "ALICE".into(),
                earned_headers_commission_share: 50,
            },
        ]));
        assert_eq!(
            normalize_recipients(&unit).unwrap(),
            vec![("ALICE".to_string(), 100)]
        );
    }
}

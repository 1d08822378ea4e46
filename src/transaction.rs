// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger transaction records.
//!
//! A record follows a one-way state machine:
//! - [`Unconfirmed`](ConfirmationState::Unconfirmed) → [`Confirmed`](ConfirmationState::Confirmed)
//!   (once the node reports enough confirmations)
//!
//! Records inserted already confirmed never pass through `Unconfirmed`.

use crate::account::Pool;
use crate::base::{AccountId, TxId};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationState {
    Unconfirmed,
    Confirmed,
}

impl ConfirmationState {
    /// Classifies a node confirmation count against the threshold.
    ///
    /// Negative counts (conflicted transactions) are unconfirmed.
    pub fn from_confirmations(confirmations: i64, confirm_after: i64) -> Self {
        if confirmations >= confirm_after {
            Self::Confirmed
        } else {
            Self::Unconfirmed
        }
    }

    pub fn is_confirmed(self) -> bool {
        self == Self::Confirmed
    }
}

/// A transaction known to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TxId,
    pub account_id: AccountId,
    pub direction: Direction,
    /// Amount in smallest currency units.
    pub amount: u64,
    pub state: ConfirmationState,
    /// Pool the amount was first credited to. Fixed at insertion.
    pub credited_pool: Pool,
}

impl TransactionRecord {
    /// Builds a fresh inbound record in the given state.
    pub fn inbound(id: TxId, account_id: AccountId, amount: u64, state: ConfirmationState) -> Self {
        Self {
            id,
            account_id,
            direction: Direction::Inbound,
            amount,
            state,
            credited_pool: state.into(),
        }
    }
}

/// Result of looking a transaction ID up in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Absent,
    Seen(TransactionRecord),
}

/// Converts a node decimal amount into integer smallest units.
///
/// The scale factor is `10^unit_decimals` (`100_000_000` for 8 decimals).
/// Returns `None` for negative amounts, amounts with sub-unit precision left
/// over, and values that do not fit a `u64`.
pub fn to_smallest_units(amount: Decimal, unit_decimals: u32) -> Option<u64> {
    if amount < Decimal::ZERO {
        return None;
    }
    let scale = Decimal::from(10_u64.checked_pow(unit_decimals)?);
    let units = amount.checked_mul(scale)?;
    if !units.fract().is_zero() {
        return None;
    }
    units.to_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_with_exponent_not_xor() {
        // 10 ^ 8 as XOR would be 2.
        assert_eq!(to_smallest_units(dec!(0.01), 8), Some(1_000_000));
        assert_eq!(to_smallest_units(dec!(1), 8), Some(100_000_000));
        assert_eq!(to_smallest_units(dec!(0.00000001), 8), Some(1));
        assert_eq!(to_smallest_units(dec!(21000000), 8), Some(2_100_000_000_000_000));
    }

    #[test]
    fn zero_is_a_valid_amount() {
        assert_eq!(to_smallest_units(Decimal::ZERO, 8), Some(0));
    }

    #[test]
    fn rejects_sub_unit_precision() {
        assert_eq!(to_smallest_units(dec!(0.000000001), 8), None);
        assert_eq!(to_smallest_units(dec!(1.005), 2), None);
    }

    #[test]
    fn trailing_zeros_beyond_unit_are_fine() {
        assert_eq!(to_smallest_units(dec!(0.010000000000), 8), Some(1_000_000));
    }

    #[test]
    fn rejects_negative_and_overflow() {
        assert_eq!(to_smallest_units(dec!(-0.5), 8), None);
        assert_eq!(to_smallest_units(dec!(1000000000000), 8), None);
        assert_eq!(to_smallest_units(dec!(1), 20), None);
    }

    #[test]
    fn confirmation_threshold_is_inclusive() {
        assert_eq!(
            ConfirmationState::from_confirmations(6, 6),
            ConfirmationState::Confirmed
        );
        assert_eq!(
            ConfirmationState::from_confirmations(5, 6),
            ConfirmationState::Unconfirmed
        );
        assert_eq!(
            ConfirmationState::from_confirmations(-1, 6),
            ConfirmationState::Unconfirmed
        );
    }

    #[test]
    fn inbound_record_credits_pool_matching_state() {
        let record = TransactionRecord::inbound(
            TxId::from("tx"),
            AccountId(1),
            10,
            ConfirmationState::Confirmed,
        );
        assert_eq!(record.direction, Direction::Inbound);
        assert_eq!(record.credited_pool, Pool::Confirmed);
    }
}

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

//! Property-based tests for accounts and the reconciler.
//!
//! These tests verify invariants that should hold for any sequence of
//! notifications, in any order, with any number of duplicates.

use deposit_ledger::{
    Account, AccountId, Config, Effect, FixtureNode, MemoryBalances, MemoryDirectory,
    MemoryLedger, NodeTransaction, Pool, Reconciler, TxId, to_smallest_units,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Amount in whole satoshi: 1 sat to 10 BTC.
fn arb_sats() -> impl Strategy<Value = u64> {
    1u64..=1_000_000_000u64
}

/// Notification: (transaction index, confirmations reported).
fn arb_notification(txs: usize) -> impl Strategy<Value = (usize, i64)> {
    (0..txs, -1i64..12)
}

// =============================================================================
// Account Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Confirm moves never change the total.
    #[test]
    fn confirm_conserves_total(
        credits in prop::collection::vec(arb_sats(), 1..10),
        confirm_mask in prop::collection::vec(any::<bool>(), 10),
    ) {
        let account = Account::new(AccountId(1));
        for (i, amount) in credits.iter().enumerate() {
            account.credit(Pool::Unconfirmed, *amount, &TxId::new(format!("t{i}"))).unwrap();
        }
        let total = account.balance().total();

        for (i, amount) in credits.iter().enumerate() {
            if confirm_mask[i] {
                account.move_to_confirmed(*amount, &TxId::new(format!("t{i}"))).unwrap();
            }
            prop_assert_eq!(account.balance().total(), total);
        }
    }

    /// A move larger than the unconfirmed pool fails and changes nothing.
    #[test]
    fn unconfirmed_never_goes_negative(
        credit in arb_sats(),
        extra in 1u64..1_000,
    ) {
        let account = Account::new(AccountId(1));
        account.credit(Pool::Unconfirmed, credit, &TxId::from("a")).unwrap();

        prop_assert!(account.move_to_confirmed(credit + extra, &TxId::from("a")).is_err());
        prop_assert_eq!(account.unconfirmed(), credit);
        prop_assert_eq!(account.confirmed(), 0);

        // The rejected step was not journaled.
        prop_assert_eq!(
            account.move_to_confirmed(credit, &TxId::from("a")),
            Ok(Effect::Applied)
        );
    }

    /// Replaying a step is always a no-op.
    #[test]
    fn replayed_steps_change_nothing(
        amount in arb_sats(),
        replays in 1usize..10,
    ) {
        let account = Account::new(AccountId(1));
        let tx = TxId::from("t");
        account.credit(Pool::Unconfirmed, amount, &tx).unwrap();
        account.move_to_confirmed(amount, &tx).unwrap();
        let snapshot = account.balance();

        for _ in 0..replays {
            prop_assert_eq!(account.credit(Pool::Unconfirmed, amount, &tx), Ok(Effect::Replayed));
            prop_assert_eq!(account.move_to_confirmed(amount, &tx), Ok(Effect::Replayed));
        }
        prop_assert_eq!(account.balance(), snapshot);
    }
}

// =============================================================================
// Amount Conversion Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Any whole-satoshi amount converts back to itself.
    #[test]
    fn whole_units_convert_exactly(sats in 0u64..=2_100_000_000_000_000u64) {
        let amount = Decimal::new(sats as i64, 8);
        prop_assert_eq!(to_smallest_units(amount, 8), Some(sats));
    }

    /// Precision finer than one satoshi is rejected.
    #[test]
    fn sub_unit_precision_is_rejected(sats in 0i64..1_000_000_000, digit in 1i64..10) {
        let amount = Decimal::new(sats * 10 + digit, 9);
        prop_assert_eq!(to_smallest_units(amount, 8), None);
    }

    #[test]
    fn negative_amounts_are_rejected(sats in 1i64..1_000_000_000) {
        prop_assert_eq!(to_smallest_units(Decimal::new(-sats, 8), 8), None);
    }
}

// =============================================================================
// Reconciler Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Whatever order and multiplicity notifications arrive in, each
    /// transaction is credited once, and confirmed once it has been seen
    /// at or above the threshold.
    #[test]
    fn notifications_book_each_deposit_once(
        amounts in prop::collection::vec(arb_sats(), 1..6),
        schedule in prop::collection::vec(arb_notification(6), 1..40),
    ) {
        let node = Arc::new(FixtureNode::new());
        let balances = Arc::new(MemoryBalances::new());
        let directory = Arc::new(MemoryDirectory::new());
        balances.open_account(AccountId(1));
        directory.register("alice", AccountId(1));
        let engine = Reconciler::new(
            &Config::default(),
            node.clone(),
            Arc::new(MemoryLedger::new()),
            balances.clone(),
            directory,
        );

        let mut seen = vec![false; amounts.len()];
        let mut confirmed = vec![false; amounts.len()];
        for (index, confirmations) in schedule {
            let Some(&sats) = amounts.get(index) else { continue };
            let tx = TxId::new(format!("tx{index}"));
            let amount = Decimal::new(sats as i64, 8);
            node.set(tx.clone(), NodeTransaction::receive("alice", amount, confirmations));

            prop_assert!(engine.process_deposit(&tx).is_ok());
            seen[index] = true;
            // Once confirmed, a lower count from the node does not undo it.
            confirmed[index] |= confirmations >= 6;
        }

        let expected_confirmed: u64 = amounts
            .iter()
            .zip(&confirmed)
            .filter(|(_, c)| **c)
            .map(|(a, _)| *a)
            .sum();
        let expected_unconfirmed: u64 = amounts
            .iter()
            .zip(seen.iter().zip(&confirmed))
            .filter(|(_, (s, c))| **s && !**c)
            .map(|(a, _)| *a)
            .sum();

        let account = balances.get_account(AccountId(1)).unwrap();
        prop_assert_eq!(account.confirmed(), expected_confirmed);
        prop_assert_eq!(account.unconfirmed(), expected_unconfirmed);
    }
}

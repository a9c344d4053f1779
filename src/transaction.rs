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

//! Transaction log entries.
//!
//! A [`Transaction`] records one quantity movement against one batch:
//! positive quantities are check-ins, negative ones check-outs. Entries are
//! immutable once logged, except for the quantity of the most recent entry,
//! which its author may amend.

use crate::base::{BatchId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Back-reference to the batch this entry moved stock for.
    pub batch_id: BatchId,
    /// Signed quantity delta, rounded to [`QUANTITY_PRECISION`] digits.
    ///
    /// This is the value that moved the batch quantity, not the raw caller
    /// input, so a batch's quantity equals the running sum of its log.
    ///
    /// [`QUANTITY_PRECISION`]: crate::QUANTITY_PRECISION
    pub quantity: Decimal,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Creates a log entry with a freshly generated ID.
    pub fn new(
        batch_id: BatchId,
        quantity: Decimal,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            batch_id,
            quantity,
            user_id,
            timestamp,
        }
    }

    pub fn is_check_in(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_check_out(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sign_determines_direction() {
        let batch_id = BatchId::generate();
        let check_in = Transaction::new(batch_id, dec!(5), UserId::from("alex"), Utc::now());
        let check_out = Transaction::new(batch_id, dec!(-5), UserId::from("alex"), Utc::now());
        assert!(check_in.is_check_in() && !check_in.is_check_out());
        assert!(check_out.is_check_out() && !check_out.is_check_in());
    }

    #[test]
    fn generated_ids_are_unique() {
        let batch_id = BatchId::generate();
        let a = Transaction::new(batch_id, dec!(1), UserId::from("a"), Utc::now());
        let b = Transaction::new(batch_id, dec!(1), UserId::from("a"), Utc::now());
        assert_ne!(a.id, b.id);
    }
}

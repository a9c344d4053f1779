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

//! Per-batch transaction log store.
//!
//! Logs are append-only and ordered oldest first. The single exception is
//! [`TransactionLog::amend_last`], which rewrites the quantity of the newest
//! entry after re-checking, under the store's own write guard, that the entry
//! is still the newest one.

use crate::base::{BatchId, TransactionId};
use crate::error::StoreError;
use crate::transaction::Transaction;
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Storage contract for transaction logs.
pub trait TransactionLog: Send + Sync {
    /// Appends an entry to the log of `transaction.batch_id`.
    fn append(&self, transaction: Transaction) -> Result<(), StoreError>;

    /// Returns the full log of a batch, oldest entry first.
    ///
    /// An unknown batch yields an empty log.
    fn all(&self, batch_id: &BatchId) -> Result<Vec<Transaction>, StoreError>;

    /// Returns the most recent entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyLog`] if the batch has no entries.
    fn last(&self, batch_id: &BatchId) -> Result<Transaction, StoreError>;

    /// Replaces the quantity of the most recent entry.
    ///
    /// The tip check and the write happen atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::EmptyLog`] if the batch has no entries.
    /// - [`StoreError::StaleAmendment`] if the newest entry is not `expected`.
    fn amend_last(
        &self,
        batch_id: &BatchId,
        expected: &TransactionId,
        quantity: Decimal,
    ) -> Result<Transaction, StoreError>;
}

/// In-memory log store keeping one vector per batch in a [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    logs: DashMap<BatchId, Vec<Transaction>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(&self, transaction: Transaction) -> Result<(), StoreError> {
        self.logs
            .entry(transaction.batch_id)
            .or_default()
            .push(transaction);
        Ok(())
    }

    fn all(&self, batch_id: &BatchId) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .logs
            .get(batch_id)
            .map(|log| log.clone())
            .unwrap_or_default())
    }

    fn last(&self, batch_id: &BatchId) -> Result<Transaction, StoreError> {
        self.logs
            .get(batch_id)
            .and_then(|log| log.last().cloned())
            .ok_or(StoreError::EmptyLog(*batch_id))
    }

    fn amend_last(
        &self,
        batch_id: &BatchId,
        expected: &TransactionId,
        quantity: Decimal,
    ) -> Result<Transaction, StoreError> {
        // The shard write guard is held from the tip check through the write.
        let mut log = self
            .logs
            .get_mut(batch_id)
            .ok_or(StoreError::EmptyLog(*batch_id))?;
        let last = log.last_mut().ok_or(StoreError::EmptyLog(*batch_id))?;
        if last.id != *expected {
            return Err(StoreError::StaleAmendment {
                batch_id: *batch_id,
                expected: *expected,
                actual: last.id,
            });
        }
        last.quantity = quantity;
        Ok(last.clone())
    }
}

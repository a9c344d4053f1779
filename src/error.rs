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

//! Error types for inventory operations and their storage collaborators.

use crate::base::{BatchId, TransactionId, UserId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures reported by a batch repository or transaction log store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No batch record exists for the ID
    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    /// The batch has no log entries
    #[error("transaction log of batch {0} is empty")]
    EmptyLog(BatchId),

    /// The amendment target is no longer the tip of the log
    #[error("transaction {expected} is not the last entry of batch {batch_id} (last is {actual})")]
    StaleAmendment {
        batch_id: BatchId,
        expected: TransactionId,
        actual: TransactionId,
    },

    /// The backing storage failed
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification of an [`InventoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Forbidden,
    StaleAmendment,
    Inconsistent,
    Store,
    Cancelled,
}

/// Inventory engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Batch ID does not resolve
    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    /// The batch has no transaction to read or amend
    #[error("no transaction found for batch {0}")]
    TransactionNotFound(BatchId),

    /// Check-out would exceed the stock on hand
    #[error("quantity of batch {batch_id} cannot drop below zero (would be {quantity})")]
    NegativeQuantity { batch_id: BatchId, quantity: Decimal },

    /// Expiration date is not after the original check-in date
    #[error("expiration date of batch {batch_id} must be after the original check-in on {check_in}")]
    ExpirationBeforeCheckIn {
        batch_id: BatchId,
        check_in: chrono::NaiveDate,
    },

    /// Locked batches accept no transactions
    #[error("batch {0} is locked")]
    BatchLocked(BatchId),

    /// Only the author of the last transaction may amend it
    #[error("transaction {transaction_id} was performed by a different user than {user_id}")]
    NotOriginalAuthor {
        transaction_id: TransactionId,
        user_id: UserId,
    },

    /// The amendment target is no longer the last transaction
    #[error("transaction {transaction_id} is not the last transaction of batch {batch_id}")]
    StaleAmendment {
        batch_id: BatchId,
        transaction_id: TransactionId,
    },

    /// One store was written and the other was not
    #[error("{operation} left batch {batch_id} inconsistent with its log: {source}")]
    Inconsistent {
        batch_id: BatchId,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// Recorded quantity disagrees with the transaction log
    #[error("batch {batch_id} records {recorded} but its log sums to {logged}")]
    Discrepancy {
        batch_id: BatchId,
        recorded: Decimal,
        logged: Decimal,
    },

    /// The resulting quantity does not fit in a `Decimal`
    #[error("quantity of batch {batch_id} is out of range")]
    QuantityOverflow { batch_id: BatchId },

    /// Initial quantity of a new batch is negative
    #[error("initial quantity cannot be negative (got {0})")]
    InvalidQuantity(Decimal),

    /// A store failed before anything was written
    #[error("{operation} on batch {batch_id} failed: {source}")]
    Store {
        batch_id: BatchId,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// A repository call not scoped to one batch failed
    #[error("{operation} failed: {source}")]
    Repository {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// The caller's cancellation signal fired before any write
    #[error("operation cancelled")]
    Cancelled,
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BatchNotFound(_) | Self::TransactionNotFound(_) => ErrorKind::NotFound,
            Self::NegativeQuantity { .. }
            | Self::ExpirationBeforeCheckIn { .. }
            | Self::QuantityOverflow { .. }
            | Self::InvalidQuantity(_) => ErrorKind::InvalidArgument,
            Self::BatchLocked(_) | Self::NotOriginalAuthor { .. } => ErrorKind::Forbidden,
            Self::StaleAmendment { .. } => ErrorKind::StaleAmendment,
            Self::Inconsistent { .. } | Self::Discrepancy { .. } => ErrorKind::Inconsistent,
            Self::Store { .. } | Self::Repository { .. } => ErrorKind::Store,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Translates a store failure that happened before any write.
    ///
    /// Lookup misses and stale tips keep their own meaning; everything else
    /// is wrapped with the batch and operation that hit it.
    pub(crate) fn from_store(batch_id: BatchId, operation: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::BatchNotFound(id) => Self::BatchNotFound(id),
            StoreError::EmptyLog(id) => Self::TransactionNotFound(id),
            StoreError::StaleAmendment {
                batch_id, expected, ..
            } => Self::StaleAmendment {
                batch_id,
                transaction_id: expected,
            },
            source @ StoreError::Unavailable(_) => Self::Store {
                batch_id,
                operation,
                source,
            },
        }
    }
}

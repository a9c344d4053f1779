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

//! Inventory consistency engine.
//!
//! The [`Engine`] is the only writer of batch records and transaction logs.
//! It keeps a batch's quantity, lock state and archival state in agreement
//! with its log:
//!
//! - **Create**: persists the batch and logs the starting quantity as its
//!   first check-in.
//! - **Update**: edits descriptive attributes; the expiration date must stay
//!   after the original check-in date.
//! - **Status**: locks or unlocks the batch. No log entry is written.
//! - **Transaction**: checks stock in (positive) or out (negative). Locked
//!   batches and overdrawn stock are rejected; reaching zero archives.
//! - **Amendment**: rewrites the quantity of the newest log entry, only by
//!   its author, and replays the difference onto the batch.
//!
//! # Write Ordering
//!
//! Transactions and amendments write the log first and the batch second. A
//! failed log write aborts with nothing changed. A failed batch write after
//! a successful log write is reported as [`InventoryError::Inconsistent`] and
//! leaves the log ahead of the batch, which [`Engine::audit_batch`] detects.
//! Creation is the exception: the repository assigns the ID, so the batch is
//! written before its initial log entry.
//!
//! # Thread Safety
//!
//! Every write to a batch holds that batch's mutex for its whole
//! read-validate-write sequence. Writes to different batches never contend.

use crate::base::{BatchId, TransactionId, UserId};
use crate::batch::{BatchDraft, BatchFilter, BatchUpdate, MaterialBatch};
use crate::cancel::Cancellation;
use crate::error::{InventoryError, StoreError};
use crate::quantity::round_quantity;
use crate::repository::{BatchRepository, InMemoryBatchRepository};
use crate::transaction::Transaction;
use crate::transaction_log::{InMemoryTransactionLog, TransactionLog};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Source of transaction timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tunable engine behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Reject amendments that would leave the batch with a negative quantity.
    ///
    /// Off by default: amendments correct authoring mistakes and trust the
    /// caller's arithmetic.
    pub reject_negative_amendments: bool,
}

/// Inventory engine over a batch repository and a transaction log store.
///
/// # Invariants
///
/// - `quantity >= 0` after every transaction.
/// - `quantity` equals the rounded running sum of the batch's log.
/// - A batch whose quantity reached zero stays archived.
/// - Locked batches accept no transactions.
/// - Only the newest log entry can be amended, and only by its author.
pub struct Engine<R = InMemoryBatchRepository, L = InMemoryTransactionLog> {
    batches: R,
    log: L,
    /// Per-batch write locks.
    locks: DashMap<BatchId, Arc<Mutex<()>>>,
    clock: Box<dyn Clock>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine over empty in-memory stores.
    pub fn new() -> Self {
        Self::with_stores(InMemoryBatchRepository::new(), InMemoryTransactionLog::new())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: BatchRepository, L: TransactionLog> Engine<R, L> {
    pub fn with_stores(batches: R, log: L) -> Self {
        Engine {
            batches,
            log,
            locks: DashMap::new(),
            clock: Box::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.batches
    }

    pub fn transaction_log(&self) -> &L {
        &self.log
    }

    /// Returns a view whose writes abort with [`InventoryError::Cancelled`]
    /// once `cancellation` fires, before anything is written.
    pub fn session<'a>(&'a self, cancellation: &'a Cancellation) -> Session<'a, R, L> {
        Session {
            engine: self,
            cancellation: Some(cancellation),
        }
    }

    fn writer(&self) -> Session<'_, R, L> {
        Session {
            engine: self,
            cancellation: None,
        }
    }

    /// Creates a batch and logs its starting quantity as the first check-in.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidQuantity`] - Starting quantity is negative.
    /// - [`InventoryError::Inconsistent`] - Batch was stored but its initial entry was not.
    pub fn create_batch(
        &self,
        draft: BatchDraft,
        user_id: &UserId,
    ) -> Result<MaterialBatch, InventoryError> {
        self.writer().create_batch(draft, user_id)
    }

    /// Replaces the descriptive attributes of a batch.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::BatchNotFound`] - Unknown batch.
    /// - [`InventoryError::ExpirationBeforeCheckIn`] - Expiration date is on or
    ///   before the date of the oldest log entry.
    pub fn update_batch(
        &self,
        batch_id: &BatchId,
        update: BatchUpdate,
    ) -> Result<MaterialBatch, InventoryError> {
        self.writer().update_batch(batch_id, update)
    }

    /// Locks or unlocks a batch.
    pub fn update_batch_status(
        &self,
        batch_id: &BatchId,
        is_locked: bool,
    ) -> Result<(), InventoryError> {
        self.writer().update_batch_status(batch_id, is_locked)
    }

    /// Checks material in (positive `quantity`) or out (negative `quantity`).
    ///
    /// # Errors
    ///
    /// - [`InventoryError::BatchNotFound`] - Unknown batch.
    /// - [`InventoryError::BatchLocked`] - Batch is locked.
    /// - [`InventoryError::NegativeQuantity`] - Check-out exceeds stock on hand.
    /// - [`InventoryError::QuantityOverflow`] - Resulting quantity is out of range.
    /// - [`InventoryError::TransactionNotFound`] - The initial entry is not logged yet.
    /// - [`InventoryError::Inconsistent`] - Logged, but the batch write failed.
    pub fn perform_transaction(
        &self,
        batch_id: &BatchId,
        quantity: Decimal,
        user_id: &UserId,
    ) -> Result<Transaction, InventoryError> {
        self.writer().perform_transaction(batch_id, quantity, user_id)
    }

    /// Sets the quantity of the batch's newest log entry and replays the
    /// difference onto the batch.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::BatchNotFound`] - Unknown batch.
    /// - [`InventoryError::StaleAmendment`] - `transaction_id` is not the newest entry.
    /// - [`InventoryError::NotOriginalAuthor`] - `user_id` did not perform the entry.
    /// - [`InventoryError::NegativeQuantity`] - Only with
    ///   [`EngineConfig::reject_negative_amendments`].
    /// - [`InventoryError::Inconsistent`] - Amended, but the batch write failed.
    pub fn amend_last_transaction(
        &self,
        batch_id: &BatchId,
        transaction_id: &TransactionId,
        quantity: Decimal,
        user_id: &UserId,
    ) -> Result<(), InventoryError> {
        self.writer()
            .amend_last_transaction(batch_id, transaction_id, quantity, user_id)
    }

    pub fn get_batch(&self, batch_id: &BatchId) -> Result<MaterialBatch, InventoryError> {
        self.batches
            .get(batch_id)
            .map_err(|e| InventoryError::from_store(*batch_id, "get_batch", e))
    }

    /// Lists batches, optionally narrowed to a material and/or site.
    pub fn get_batches(&self, filter: &BatchFilter) -> Result<Vec<MaterialBatch>, InventoryError> {
        self.batches
            .filtered(filter)
            .map_err(|source| InventoryError::Repository {
                operation: "get_batches",
                source,
            })
    }

    /// Returns the full log of a batch, oldest entry first.
    pub fn get_log(&self, batch_id: &BatchId) -> Result<Vec<Transaction>, InventoryError> {
        self.get_batch(batch_id)?;
        self.log
            .all(batch_id)
            .map_err(|e| InventoryError::from_store(*batch_id, "get_log", e))
    }

    pub fn get_last_transaction(&self, batch_id: &BatchId) -> Result<Transaction, InventoryError> {
        self.get_batch(batch_id)?;
        self.log
            .last(batch_id)
            .map_err(|e| InventoryError::from_store(*batch_id, "get_last_transaction", e))
    }

    /// Verifies that the batch quantity equals the rounded running sum of its log.
    ///
    /// Returns the agreed quantity.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Discrepancy`] - Quantity and log disagree.
    /// - [`InventoryError::QuantityOverflow`] - The log does not sum to a `Decimal`.
    /// - [`InventoryError::Inconsistent`] - The batch has no log at all.
    pub fn audit_batch(&self, batch_id: &BatchId) -> Result<Decimal, InventoryError> {
        let lock = self.batch_lock(batch_id)?;
        let _guard = lock.lock();

        let batch = self.get_batch(batch_id)?;
        let log = self
            .log
            .all(batch_id)
            .map_err(|e| InventoryError::from_store(*batch_id, "audit_batch", e))?;
        if log.is_empty() {
            tracing::error!(%batch_id, "batch has no transaction log");
            return Err(InventoryError::Inconsistent {
                batch_id: *batch_id,
                operation: "audit_batch",
                source: StoreError::EmptyLog(*batch_id),
            });
        }

        let logged = log
            .iter()
            .try_fold(Decimal::ZERO, |sum, tx| {
                sum.checked_add(tx.quantity).map(round_quantity)
            })
            .ok_or(InventoryError::QuantityOverflow {
                batch_id: *batch_id,
            })?;
        if logged != batch.quantity {
            tracing::error!(%batch_id, recorded = %batch.quantity, %logged, "quantity discrepancy");
            return Err(InventoryError::Discrepancy {
                batch_id: *batch_id,
                recorded: batch.quantity,
                logged,
            });
        }
        Ok(logged)
    }

    /// Returns the write lock of an existing batch.
    ///
    /// Locks are only handed out for batches the repository knows, so bogus
    /// IDs never grow the lock table.
    fn batch_lock(&self, batch_id: &BatchId) -> Result<Arc<Mutex<()>>, InventoryError> {
        if let Some(lock) = self.locks.get(batch_id) {
            return Ok(Arc::clone(&lock));
        }
        self.get_batch(batch_id)?;
        Ok(Arc::clone(&self.locks.entry(*batch_id).or_default()))
    }
}

/// Write access to an [`Engine`], optionally bound to a [`Cancellation`].
///
/// Obtained through [`Engine::session`]. The signal is checked on entry and
/// again right before the first write.
pub struct Session<'a, R, L> {
    engine: &'a Engine<R, L>,
    cancellation: Option<&'a Cancellation>,
}

impl<R: BatchRepository, L: TransactionLog> Session<'_, R, L> {
    fn checkpoint(&self) -> Result<(), InventoryError> {
        match self.cancellation {
            Some(cancellation) if cancellation.is_cancelled() => {
                tracing::debug!("cancelled before write");
                Err(InventoryError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    pub fn create_batch(
        &self,
        mut draft: BatchDraft,
        user_id: &UserId,
    ) -> Result<MaterialBatch, InventoryError> {
        self.checkpoint()?;
        let engine = self.engine;

        draft.quantity = round_quantity(draft.quantity);
        if draft.quantity < Decimal::ZERO {
            tracing::warn!(quantity = %draft.quantity, "rejected negative starting quantity");
            return Err(InventoryError::InvalidQuantity(draft.quantity));
        }

        self.checkpoint()?;
        let batch = engine
            .batches
            .create(draft)
            .map_err(|source| InventoryError::Repository {
                operation: "create_batch",
                source,
            })?;

        // The starting stock is the batch's first check-in.
        let initial = Transaction::new(batch.id, batch.quantity, user_id.clone(), engine.clock.now());
        if let Err(source) = engine.log.append(initial) {
            tracing::error!(batch_id = %batch.id, error = %source, "initial log entry not written");
            return Err(InventoryError::Inconsistent {
                batch_id: batch.id,
                operation: "create_batch",
                source,
            });
        }

        tracing::debug!(batch_id = %batch.id, quantity = %batch.quantity, %user_id, "batch created");
        Ok(batch)
    }

    pub fn update_batch(
        &self,
        batch_id: &BatchId,
        update: BatchUpdate,
    ) -> Result<MaterialBatch, InventoryError> {
        self.checkpoint()?;
        let engine = self.engine;
        let lock = engine.batch_lock(batch_id)?;
        let _guard = lock.lock();

        let mut batch = engine.get_batch(batch_id)?;
        let log = engine
            .log
            .all(batch_id)
            .map_err(|e| InventoryError::from_store(*batch_id, "update_batch", e))?;
        let check_in = log
            .first()
            .ok_or(InventoryError::TransactionNotFound(*batch_id))?
            .timestamp
            .date_naive();
        if update.expiration_date <= check_in {
            tracing::warn!(%batch_id, expiration = %update.expiration_date, %check_in, "expiration before check-in");
            return Err(InventoryError::ExpirationBeforeCheckIn {
                batch_id: *batch_id,
                check_in,
            });
        }

        self.checkpoint()?;
        batch.apply_update(update);
        engine
            .batches
            .update(&batch)
            .map_err(|e| InventoryError::from_store(*batch_id, "update_batch", e))?;

        tracing::debug!(%batch_id, "batch updated");
        Ok(batch)
    }

    pub fn update_batch_status(
        &self,
        batch_id: &BatchId,
        is_locked: bool,
    ) -> Result<(), InventoryError> {
        self.checkpoint()?;
        let engine = self.engine;
        let lock = engine.batch_lock(batch_id)?;
        let _guard = lock.lock();

        let mut batch = engine.get_batch(batch_id)?;
        batch.is_locked = is_locked;

        self.checkpoint()?;
        engine
            .batches
            .update(&batch)
            .map_err(|e| InventoryError::from_store(*batch_id, "update_batch_status", e))?;

        tracing::debug!(%batch_id, is_locked, "batch status changed");
        Ok(())
    }

    pub fn perform_transaction(
        &self,
        batch_id: &BatchId,
        quantity: Decimal,
        user_id: &UserId,
    ) -> Result<Transaction, InventoryError> {
        self.checkpoint()?;
        let engine = self.engine;
        let lock = engine.batch_lock(batch_id)?;
        let _guard = lock.lock();

        let mut batch = engine.get_batch(batch_id)?;
        if batch.is_locked {
            tracing::warn!(%batch_id, %user_id, "transaction on locked batch");
            return Err(InventoryError::BatchLocked(*batch_id));
        }

        let log_is_empty = matches!(engine.log.last(batch_id), Err(StoreError::EmptyLog(_)));
        if log_is_empty {
            // Creation has not written the initial entry yet.
            tracing::warn!(%batch_id, "transaction before initial log entry");
            return Err(InventoryError::TransactionNotFound(*batch_id));
        }

        let delta = round_quantity(quantity);
        let new_quantity = batch
            .quantity
            .checked_add(delta)
            .map(round_quantity)
            .ok_or(InventoryError::QuantityOverflow {
                batch_id: *batch_id,
            })?;
        if new_quantity < Decimal::ZERO {
            tracing::warn!(%batch_id, on_hand = %batch.quantity, %delta, "check-out exceeds stock");
            return Err(InventoryError::NegativeQuantity {
                batch_id: *batch_id,
                quantity: new_quantity,
            });
        }

        self.checkpoint()?;
        let transaction = Transaction::new(*batch_id, delta, user_id.clone(), engine.clock.now());
        engine
            .log
            .append(transaction.clone())
            .map_err(|e| InventoryError::from_store(*batch_id, "perform_transaction", e))?;

        batch.set_quantity(new_quantity);
        if let Err(source) = engine.batches.update(&batch) {
            tracing::error!(%batch_id, transaction_id = %transaction.id, error = %source, "log ahead of batch");
            return Err(InventoryError::Inconsistent {
                batch_id: *batch_id,
                operation: "perform_transaction",
                source,
            });
        }

        tracing::debug!(
            %batch_id,
            transaction_id = %transaction.id,
            %delta,
            quantity = %new_quantity,
            archived = batch.is_archived,
            "transaction performed"
        );
        Ok(transaction)
    }

    pub fn amend_last_transaction(
        &self,
        batch_id: &BatchId,
        transaction_id: &TransactionId,
        quantity: Decimal,
        user_id: &UserId,
    ) -> Result<(), InventoryError> {
        self.checkpoint()?;
        let engine = self.engine;
        let lock = engine.batch_lock(batch_id)?;
        let _guard = lock.lock();

        let mut batch = engine.get_batch(batch_id)?;
        let last = engine
            .log
            .last(batch_id)
            .map_err(|e| InventoryError::from_store(*batch_id, "amend_last_transaction", e))?;
        if last.id != *transaction_id {
            tracing::warn!(%batch_id, %transaction_id, last = %last.id, "stale amendment");
            return Err(InventoryError::StaleAmendment {
                batch_id: *batch_id,
                transaction_id: *transaction_id,
            });
        }
        if last.user_id != *user_id {
            tracing::warn!(%batch_id, %transaction_id, %user_id, author = %last.user_id, "amendment by non-author");
            return Err(InventoryError::NotOriginalAuthor {
                transaction_id: *transaction_id,
                user_id: user_id.clone(),
            });
        }

        let amended = round_quantity(quantity);
        let new_quantity = batch
            .quantity
            .checked_sub(last.quantity)
            .and_then(|q| q.checked_add(amended))
            .map(round_quantity)
            .ok_or(InventoryError::QuantityOverflow {
                batch_id: *batch_id,
            })?;
        if engine.config.reject_negative_amendments && new_quantity < Decimal::ZERO {
            tracing::warn!(%batch_id, %transaction_id, quantity = %new_quantity, "amendment would go negative");
            return Err(InventoryError::NegativeQuantity {
                batch_id: *batch_id,
                quantity: new_quantity,
            });
        }

        self.checkpoint()?;
        engine
            .log
            .amend_last(batch_id, transaction_id, amended)
            .map_err(|e| InventoryError::from_store(*batch_id, "amend_last_transaction", e))?;

        batch.set_quantity(new_quantity);
        if let Err(source) = engine.batches.update(&batch) {
            tracing::error!(%batch_id, %transaction_id, error = %source, "amended log ahead of batch");
            return Err(InventoryError::Inconsistent {
                batch_id: *batch_id,
                operation: "amend_last_transaction",
                source,
            });
        }

        tracing::debug!(
            %batch_id,
            %transaction_id,
            from = %last.quantity,
            to = %amended,
            quantity = %new_quantity,
            "transaction amended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{AreaId, MaterialId, SiteId};
    use crate::batch::{Material, StorageLocation};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn draft(quantity: Decimal) -> BatchDraft {
        BatchDraft {
            material: Material::new(MaterialId(1), "PP 505 Standard"),
            expiration_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            location: StorageLocation {
                site_id: SiteId(Uuid::from_u128(1)),
                site_name: "Pontstr. Keller".to_owned(),
                area_id: AreaId(Uuid::from_u128(2)),
                area_name: "Regal 1".to_owned(),
            },
            batch_number: 34,
            quantity,
            custom_props: HashMap::new(),
            is_locked: false,
        }
    }

    #[test]
    fn lock_table_only_grows_for_known_batches() {
        let engine = Engine::new();
        let unknown = BatchId::generate();
        assert_eq!(
            engine.perform_transaction(&unknown, dec!(1), &UserId::from("a")),
            Err(InventoryError::BatchNotFound(unknown))
        );
        assert!(engine.locks.is_empty());

        let batch = engine.create_batch(draft(dec!(1)), &UserId::from("a")).unwrap();
        engine
            .perform_transaction(&batch.id, dec!(1), &UserId::from("a"))
            .unwrap();
        assert_eq!(engine.locks.len(), 1);
    }

    #[test]
    fn timestamps_come_from_the_clock() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let engine = Engine::new().with_clock(FixedClock(at));
        let user = UserId::from("alex");

        let batch = engine.create_batch(draft(dec!(5)), &user).unwrap();
        let tx = engine.perform_transaction(&batch.id, dec!(1), &user).unwrap();

        assert_eq!(tx.timestamp, at);
        assert_eq!(engine.get_log(&batch.id).unwrap()[0].timestamp, at);
    }

    #[test]
    fn expiration_compares_against_check_in_date() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T23:59:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let engine = Engine::new().with_clock(FixedClock(at));
        let batch = engine.create_batch(draft(dec!(5)), &UserId::from("a")).unwrap();

        let update = |date: NaiveDate| BatchUpdate {
            material: batch.material.clone(),
            expiration_date: date,
            location: batch.location.clone(),
            batch_number: batch.batch_number,
            custom_props: HashMap::new(),
        };

        let same_day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            engine.update_batch(&batch.id, update(same_day)),
            Err(InventoryError::ExpirationBeforeCheckIn {
                batch_id: batch.id,
                check_in: same_day,
            })
        );

        let next_day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let updated = engine.update_batch(&batch.id, update(next_day)).unwrap();
        assert_eq!(updated.expiration_date, next_day);
    }

    #[test]
    fn cancelled_session_writes_nothing() {
        let engine = Engine::new();
        let user = UserId::from("a");
        let batch = engine.create_batch(draft(dec!(10)), &user).unwrap();

        let cancellation = Cancellation::new();
        cancellation.cancel();
        let session = engine.session(&cancellation);

        assert_eq!(
            session.perform_transaction(&batch.id, dec!(-1), &user),
            Err(InventoryError::Cancelled)
        );
        assert_eq!(
            session.update_batch_status(&batch.id, true),
            Err(InventoryError::Cancelled)
        );
        assert_eq!(
            session.create_batch(draft(dec!(1)), &user).map(|b| b.id),
            Err(InventoryError::Cancelled)
        );

        assert_eq!(engine.get_batch(&batch.id).unwrap(), batch);
        assert_eq!(engine.get_log(&batch.id).unwrap().len(), 1);
        assert_eq!(engine.repository().len(), 1);
    }

    #[test]
    fn live_session_behaves_like_engine() {
        let engine = Engine::new();
        let user = UserId::from("a");
        let cancellation = Cancellation::with_timeout(std::time::Duration::from_secs(60));
        let session = engine.session(&cancellation);

        let batch = session.create_batch(draft(dec!(10)), &user).unwrap();
        session.perform_transaction(&batch.id, dec!(-4), &user).unwrap();

        assert_eq!(engine.get_batch(&batch.id).unwrap().quantity, dec!(6));
        assert_eq!(engine.audit_batch(&batch.id), Ok(dec!(6)));
    }
}

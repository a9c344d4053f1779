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

//! Batch repository.
//!
//! Durable home of [`MaterialBatch`] records. Repositories are passive: they
//! assign IDs and store whatever the engine hands them, without validating
//! quantities or consulting the transaction log.

use crate::base::BatchId;
use crate::batch::{BatchDraft, BatchFilter, MaterialBatch};
use crate::error::StoreError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Storage contract for material batches.
pub trait BatchRepository: Send + Sync {
    /// Persists a new batch and assigns its ID.
    fn create(&self, draft: BatchDraft) -> Result<MaterialBatch, StoreError>;

    /// Loads a batch by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BatchNotFound`] if no record exists.
    fn get(&self, batch_id: &BatchId) -> Result<MaterialBatch, StoreError>;

    /// Lists batches matching the filter.
    fn filtered(&self, filter: &BatchFilter) -> Result<Vec<MaterialBatch>, StoreError>;

    /// Replaces the full stored record of an existing batch.
    fn update(&self, batch: &MaterialBatch) -> Result<(), StoreError>;
}

/// In-memory repository backed by a [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryBatchRepository {
    batches: DashMap<BatchId, MaterialBatch>,
}

impl InMemoryBatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl BatchRepository for InMemoryBatchRepository {
    fn create(&self, draft: BatchDraft) -> Result<MaterialBatch, StoreError> {
        let batch = MaterialBatch::from_draft(BatchId::generate(), draft);
        match self.batches.entry(batch.id) {
            Entry::Occupied(_) => Err(StoreError::Unavailable(format!(
                "batch id {} already assigned",
                batch.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(batch.clone());
                Ok(batch)
            }
        }
    }

    fn get(&self, batch_id: &BatchId) -> Result<MaterialBatch, StoreError> {
        self.batches
            .get(batch_id)
            .map(|batch| batch.clone())
            .ok_or(StoreError::BatchNotFound(*batch_id))
    }

    fn filtered(&self, filter: &BatchFilter) -> Result<Vec<MaterialBatch>, StoreError> {
        let mut batches: Vec<MaterialBatch> = self
            .batches
            .iter()
            .filter(|batch| filter.matches(batch))
            .map(|batch| batch.clone())
            .collect();
        batches.sort_by_key(|batch| batch.id);
        Ok(batches)
    }

    fn update(&self, batch: &MaterialBatch) -> Result<(), StoreError> {
        let mut stored = self
            .batches
            .get_mut(&batch.id)
            .ok_or(StoreError::BatchNotFound(batch.id))?;
        *stored = batch.clone();
        Ok(())
    }
}

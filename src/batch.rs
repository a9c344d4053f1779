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

//! Material batch model.
//!
//! A [`MaterialBatch`] is one physical lot of a material at one storage
//! location. Its quantity only changes through the engine; the structs here
//! carry no business rules of their own.
//!
//! # Example
//!
//! ```
//! use inventory_ledger_rs::{BatchFilter, MaterialId};
//!
//! let filter = BatchFilter::default().material(MaterialId(1));
//! assert_eq!(filter.material_id, Some(MaterialId(1)));
//! assert_eq!(filter.site_id, None);
//! ```

use crate::base::{AreaId, BatchId, CustomPropId, MaterialId, SiteId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of the catalog material a batch consists of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub manufacturer: String,
    pub manufacturer_specific_id: String,
    /// Plastic type code, e.g. `"PP"` or `"PUR"`.
    pub kind: String,
}

impl Material {
    pub fn new(id: MaterialId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            manufacturer: String::new(),
            manufacturer_specific_id: String::new(),
            kind: String::new(),
        }
    }
}

/// A storage site and an area within it, each independently identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub site_id: SiteId,
    pub site_name: String,
    pub area_id: AreaId,
    pub area_name: String,
}

/// A tracked quantity of one material at one storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialBatch {
    pub id: BatchId,
    pub material: Material,
    pub expiration_date: NaiveDate,
    pub location: StorageLocation,
    /// Manufacturer provided batch number.
    pub batch_number: u64,
    pub quantity: Decimal,
    pub custom_props: HashMap<CustomPropId, String>,
    pub is_locked: bool,
    /// Set once the quantity reaches exactly zero. Never cleared.
    pub is_archived: bool,
}

impl MaterialBatch {
    /// Builds a batch record from a draft. Used by repositories when assigning IDs.
    pub fn from_draft(id: BatchId, draft: BatchDraft) -> Self {
        Self {
            id,
            material: draft.material,
            expiration_date: draft.expiration_date,
            location: draft.location,
            batch_number: draft.batch_number,
            quantity: draft.quantity,
            custom_props: draft.custom_props,
            is_locked: draft.is_locked,
            is_archived: false,
        }
    }

    pub(crate) fn apply_update(&mut self, update: BatchUpdate) {
        self.material = update.material;
        self.expiration_date = update.expiration_date;
        self.location = update.location;
        self.batch_number = update.batch_number;
        self.custom_props = update.custom_props;
    }

    /// Sets a new quantity, archiving the batch if it reached zero.
    pub(crate) fn set_quantity(&mut self, quantity: Decimal) {
        self.quantity = quantity;
        if quantity.is_zero() {
            self.is_archived = true;
        }
    }
}

/// Input for creating a batch. The repository assigns the ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDraft {
    pub material: Material,
    pub expiration_date: NaiveDate,
    pub location: StorageLocation,
    pub batch_number: u64,
    pub quantity: Decimal,
    pub custom_props: HashMap<CustomPropId, String>,
    pub is_locked: bool,
}

/// Editable batch attributes. Quantity and lock/archive state are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub material: Material,
    pub expiration_date: NaiveDate,
    pub location: StorageLocation,
    pub batch_number: u64,
    pub custom_props: HashMap<CustomPropId, String>,
}

/// Optional material and site criteria for listing batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchFilter {
    pub material_id: Option<MaterialId>,
    pub site_id: Option<SiteId>,
}

impl BatchFilter {
    pub fn material(mut self, material_id: MaterialId) -> Self {
        self.material_id = Some(material_id);
        self
    }

    pub fn site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    /// Returns `true` if the batch satisfies every criterion that is set.
    pub fn matches(&self, batch: &MaterialBatch) -> bool {
        self.material_id.is_none_or(|id| batch.material.id == id)
            && self.site_id.is_none_or(|id| batch.location.site_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn location(site: u128) -> StorageLocation {
        StorageLocation {
            site_id: SiteId(Uuid::from_u128(site)),
            site_name: "Pontstr. Keller".to_owned(),
            area_id: AreaId(Uuid::from_u128(site + 100)),
            area_name: "Regal 1".to_owned(),
        }
    }

    fn batch(material: u32, site: u128, quantity: Decimal) -> MaterialBatch {
        MaterialBatch::from_draft(
            BatchId(Uuid::from_u128(1)),
            BatchDraft {
                material: Material::new(MaterialId(material), "PP 505 Standard"),
                expiration_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                location: location(site),
                batch_number: 34,
                quantity,
                custom_props: HashMap::new(),
                is_locked: false,
            },
        )
    }

    #[test]
    fn draft_produces_unarchived_batch() {
        let batch = batch(1, 1, dec!(0));
        assert!(!batch.is_archived);
        assert_eq!(batch.quantity, dec!(0));
    }

    #[test]
    fn reaching_zero_archives() {
        let mut batch = batch(1, 1, dec!(5));
        batch.set_quantity(dec!(0.000));
        assert!(batch.is_archived);
    }

    #[test]
    fn archival_is_one_way() {
        let mut batch = batch(1, 1, dec!(5));
        batch.set_quantity(dec!(0));
        batch.set_quantity(dec!(12.5));
        assert!(batch.is_archived);
        assert_eq!(batch.quantity, dec!(12.5));
    }

    #[test]
    fn filter_matches_on_set_criteria_only() {
        let batch = batch(2, 7, dec!(1));
        assert!(BatchFilter::default().matches(&batch));
        assert!(BatchFilter::default().material(MaterialId(2)).matches(&batch));
        assert!(!BatchFilter::default().material(MaterialId(3)).matches(&batch));
        assert!(
            BatchFilter::default()
                .material(MaterialId(2))
                .site(SiteId(Uuid::from_u128(7)))
                .matches(&batch)
        );
        assert!(
            !BatchFilter::default()
                .material(MaterialId(2))
                .site(SiteId(Uuid::from_u128(8)))
                .matches(&batch)
        );
    }

    #[test]
    fn update_leaves_quantity_and_flags_alone() {
        let mut batch = batch(1, 1, dec!(42));
        batch.is_locked = true;
        batch.apply_update(BatchUpdate {
            material: Material::new(MaterialId(9), "Spice Melange"),
            expiration_date: NaiveDate::from_ymd_opt(2031, 6, 30).unwrap(),
            location: location(3),
            batch_number: 9000,
            custom_props: HashMap::from([(CustomPropId(Uuid::from_u128(5)), "note".to_owned())]),
        });
        assert_eq!(batch.material.id, MaterialId(9));
        assert_eq!(batch.batch_number, 9000);
        assert_eq!(batch.quantity, dec!(42));
        assert!(batch.is_locked);
        assert!(!batch.is_archived);
    }
}

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

//! # Inventory Ledger
//!
//! This library keeps material batch inventories consistent with their
//! transaction logs: batches are created, relocated, locked, and checked in
//! or out, and every quantity movement is recorded in a per-batch log whose
//! newest entry its author may amend.
//!
//! ## Core Components
//!
//! - [`Engine`]: Orchestrates every write and enforces the inventory rules
//! - [`BatchRepository`] / [`TransactionLog`]: Storage contracts, with in-memory implementations
//! - [`MaterialBatch`] / [`Transaction`]: Batch records and log entries
//! - [`round_quantity`]: The rounding policy applied to all incoming quantities
//! - [`InventoryError`]: Error types for rejected or failed operations
//!
//! ## Example
//!
//! ```
//! use inventory_ledger_rs::{
//!     AreaId, BatchDraft, Engine, ErrorKind, Material, MaterialId, SiteId, StorageLocation, UserId,
//! };
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//! use std::collections::HashMap;
//! use uuid::Uuid;
//!
//! let engine = Engine::new();
//! let alex = UserId::from("alex");
//!
//! let batch = engine
//!     .create_batch(
//!         BatchDraft {
//!             material: Material::new(MaterialId(1), "PP 505 Standard"),
//!             expiration_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
//!             location: StorageLocation {
//!                 site_id: SiteId(Uuid::nil()),
//!                 site_name: "Keller".into(),
//!                 area_id: AreaId(Uuid::nil()),
//!                 area_name: "Regal 1".into(),
//!             },
//!             batch_number: 34,
//!             quantity: dec!(100),
//!             custom_props: HashMap::new(),
//!             is_locked: false,
//!         },
//!         &alex,
//!     )
//!     .unwrap();
//!
//! // Check out 30
//! engine.perform_transaction(&batch.id, dec!(-30), &alex).unwrap();
//! assert_eq!(engine.get_batch(&batch.id).unwrap().quantity, dec!(70));
//!
//! // Overdrawing is rejected
//! let err = engine.perform_transaction(&batch.id, dec!(-80), &alex).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::InvalidArgument);
//! ```
//!
//! ## Thread Safety
//!
//! Writes to the same batch are serialized by a per-batch mutex; writes to
//! different batches proceed in parallel.

mod base;
pub mod batch;
mod cancel;
mod engine;
pub mod error;
mod quantity;
pub mod repository;
mod transaction;
pub mod transaction_log;

pub use base::{AreaId, BatchId, CustomPropId, MaterialId, SiteId, TransactionId, UserId};
pub use batch::{BatchDraft, BatchFilter, BatchUpdate, Material, MaterialBatch, StorageLocation};
pub use cancel::Cancellation;
pub use engine::{Clock, Engine, EngineConfig, Session, SystemClock};
pub use error::{ErrorKind, InventoryError, StoreError};
pub use quantity::{QUANTITY_PRECISION, round_quantity};
pub use repository::{BatchRepository, InMemoryBatchRepository};
pub use transaction::Transaction;
pub use transaction_log::{InMemoryTransactionLog, TransactionLog};

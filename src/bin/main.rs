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

use chrono::NaiveDate;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use inventory_ledger_rs::{
    AreaId, BatchDraft, BatchId, Engine, EngineConfig, InventoryError, Material, MaterialId,
    SiteId, StorageLocation, TransactionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Inventory Ledger - Replay inventory operation CSV files
///
/// Reads batch operations from a CSV file and outputs batch states to stdout.
/// Supports batch creation, check-in, check-out, amendment, lock, and unlock.
#[derive(Parser, Debug)]
#[command(name = "inventory-ledger-rs")]
#[command(about = "Replays material batch operations and reports batch states", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,batch,tx,user,quantity,material,expires
    /// Example: cargo run -- operations.csv > batches.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    json: bool,

    /// Name of the storage site new batches are placed in
    #[arg(long, default_value = "main")]
    site: String,

    /// Reject amendments that would leave a batch with negative stock
    #[arg(long)]
    reject_negative_amendments: bool,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.json);

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %args.input.display(), error = %e, "cannot open input");
            process::exit(1);
        }
    };

    let config = EngineConfig {
        reject_negative_amendments: args.reject_negative_amendments,
    };
    let replay = match process_operations(BufReader::new(file), config, &args.site) {
        Ok(replay) => replay,
        Err(e) => {
            tracing::error!(error = %e, "cannot process operations");
            process::exit(1);
        }
    };

    if let Err(e) = write_batches(&replay, std::io::stdout()) {
        tracing::error!(error = %e, "cannot write output");
        process::exit(1);
    }
}

/// Installs the global subscriber. Filtering follows `RUST_LOG`, default `info`.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, batch, tx, user, quantity, material, expires`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    op_type: String,
    batch: u32,
    #[serde(deserialize_with = "csv::invalid_option")]
    tx: Option<u32>,
    user: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    quantity: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    material: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    expires: Option<NaiveDate>,
}

/// A parsed operation. `batch` and `tx` are caller-side labels.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Create {
        batch: u32,
        tx: Option<u32>,
        user: UserId,
        quantity: Decimal,
        material: MaterialId,
        expires: NaiveDate,
    },
    Transact {
        batch: u32,
        tx: Option<u32>,
        user: UserId,
        /// Signed delta; check-outs are already negated.
        quantity: Decimal,
    },
    Amend {
        batch: u32,
        tx: u32,
        user: UserId,
        quantity: Decimal,
    },
    SetLocked {
        batch: u32,
        locked: bool,
    },
}

impl CsvRecord {
    /// Converts CSV record to an Operation.
    ///
    /// Returns `None` for unknown operation types or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let batch = self.batch;
        let user = self.user.filter(|u| !u.is_empty()).map(UserId::new);

        match self.op_type.to_lowercase().as_str() {
            "create" => Some(Operation::Create {
                batch,
                tx: self.tx,
                user: user?,
                quantity: self.quantity?,
                material: MaterialId(self.material?),
                expires: self.expires?,
            }),
            "checkin" => Some(Operation::Transact {
                batch,
                tx: self.tx,
                user: user?,
                quantity: self.quantity?.abs(),
            }),
            "checkout" => Some(Operation::Transact {
                batch,
                tx: self.tx,
                user: user?,
                quantity: -self.quantity?.abs(),
            }),
            "amend" => Some(Operation::Amend {
                batch,
                tx: self.tx?,
                user: user?,
                quantity: self.quantity?,
            }),
            "lock" => Some(Operation::SetLocked {
                batch,
                locked: true,
            }),
            "unlock" => Some(Operation::SetLocked {
                batch,
                locked: false,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
enum ReplayError {
    #[error("unknown batch label {0}")]
    UnknownBatch(u32),

    #[error("batch label {0} already in use")]
    DuplicateBatch(u32),

    #[error("unknown transaction label {0}")]
    UnknownTransaction(u32),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Engine plus the label tables mapping CSV references to generated IDs.
struct Replay {
    engine: Engine,
    batches: BTreeMap<u32, BatchId>,
    transactions: HashMap<u32, TransactionId>,
    location: StorageLocation,
}

impl Replay {
    fn new(config: EngineConfig, site_name: &str) -> Self {
        Self {
            engine: Engine::new().with_config(config),
            batches: BTreeMap::new(),
            transactions: HashMap::new(),
            location: StorageLocation {
                site_id: SiteId(Uuid::now_v7()),
                site_name: site_name.to_owned(),
                area_id: AreaId(Uuid::now_v7()),
                area_name: "receiving".to_owned(),
            },
        }
    }

    fn batch_id(&self, label: u32) -> Result<BatchId, ReplayError> {
        self.batches
            .get(&label)
            .copied()
            .ok_or(ReplayError::UnknownBatch(label))
    }

    fn apply(&mut self, operation: Operation) -> Result<(), ReplayError> {
        match operation {
            Operation::Create {
                batch,
                tx,
                user,
                quantity,
                material,
                expires,
            } => {
                if self.batches.contains_key(&batch) {
                    return Err(ReplayError::DuplicateBatch(batch));
                }
                let draft = BatchDraft {
                    material: Material::new(material, format!("Material {material}")),
                    expiration_date: expires,
                    location: self.location.clone(),
                    batch_number: u64::from(batch),
                    quantity,
                    custom_props: HashMap::new(),
                    is_locked: false,
                };
                let created = self.engine.create_batch(draft, &user)?;
                self.batches.insert(batch, created.id);
                if let Some(tx) = tx {
                    let initial = self.engine.get_last_transaction(&created.id)?;
                    self.transactions.insert(tx, initial.id);
                }
            }
            Operation::Transact {
                batch,
                tx,
                user,
                quantity,
            } => {
                let batch_id = self.batch_id(batch)?;
                let transaction = self.engine.perform_transaction(&batch_id, quantity, &user)?;
                if let Some(tx) = tx {
                    self.transactions.insert(tx, transaction.id);
                }
            }
            Operation::Amend {
                batch,
                tx,
                user,
                quantity,
            } => {
                let batch_id = self.batch_id(batch)?;
                let transaction_id = *self
                    .transactions
                    .get(&tx)
                    .ok_or(ReplayError::UnknownTransaction(tx))?;
                self.engine
                    .amend_last_transaction(&batch_id, &transaction_id, quantity, &user)?;
            }
            Operation::SetLocked { batch, locked } => {
                let batch_id = self.batch_id(batch)?;
                self.engine.update_batch_status(&batch_id, locked)?;
            }
        }
        Ok(())
    }
}

/// Replay operations from a CSV reader.
///
/// Rows are read one at a time. Malformed rows
/// and rejected operations are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, batch, tx, user, quantity, material, expires`
/// - `type`: create, checkin, checkout, amend, lock, unlock
/// - `batch`: Caller-side batch label (u32)
/// - `tx`: Caller-side transaction label (u32), required for amend
/// - `user`: Acting user, required for all but lock/unlock
/// - `quantity`: Decimal magnitude; amend takes the corrected signed quantity
/// - `material`: Material ID, create only
/// - `expires`: Expiration date `YYYY-MM-DD`, create only
///
/// # Example
///
/// ```csv
/// type,batch,tx,user,quantity,material,expires
/// create,1,1,alex,100,1,2030-01-01
/// checkout,1,2,alex,30,,
/// amend,1,2,alex,-25,,
/// lock,1,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
fn process_operations<R: Read>(
    reader: R,
    config: EngineConfig,
    site_name: &str,
) -> Result<Replay, csv::Error> {
    let mut replay = Replay::new(config, site_name);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        // Header is line 1.
        let line = row + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(operation) = record.into_operation() else {
            tracing::warn!(line, "skipping invalid operation record");
            continue;
        };
        if let Err(e) = replay.apply(operation) {
            tracing::warn!(line, error = %e, "skipping rejected operation");
        }
    }

    Ok(replay)
}

/// Output row for one batch.
#[derive(Debug, Serialize)]
struct BatchRow {
    batch: u32,
    material: MaterialId,
    site: String,
    quantity: Decimal,
    locked: bool,
    archived: bool,
    transactions: usize,
}

/// Write batch states to a CSV writer, ordered by batch label.
///
/// # CSV Format
///
/// Columns: `batch, material, site, quantity, locked, archived, transactions`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_batches<W: Write>(replay: &Replay, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for (label, batch_id) in &replay.batches {
        let (Ok(batch), Ok(log)) = (
            replay.engine.get_batch(batch_id),
            replay.engine.get_log(batch_id),
        ) else {
            tracing::warn!(batch = label, "batch vanished before output");
            continue;
        };
        wtr.serialize(BatchRow {
            batch: *label,
            material: batch.material.id,
            site: batch.location.site_name,
            quantity: batch.quantity,
            locked: batch.is_locked,
            archived: batch.is_archived,
            transactions: log.len(),
        })?;
    }

    wtr.flush()?;
    Ok(())
}

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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the engine from many threads at once and verify that
//! the per-batch locking neither deadlocks nor lets concurrent writers break
//! the inventory invariants.
//!
//! The dev build enables parking_lot's `deadlock_detection` feature, so the
//! engine's own batch mutexes are watched by the detector.

use chrono::NaiveDate;
use inventory_ledger_rs::{
    AreaId, BatchDraft, BatchFilter, BatchId, Engine, ErrorKind, Material, MaterialId, SiteId,
    StorageLocation, UserId,
};
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

// === Helpers ===

fn create(engine: &Engine, material: u32, quantity: Decimal) -> BatchId {
    let draft = BatchDraft {
        material: Material::new(MaterialId(material), "PP 505 ENHANCED"),
        expiration_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
        location: StorageLocation {
            site_id: SiteId(Uuid::from_u128(u128::from(material % 3))),
            site_name: "Pontstr. Empore Maschinenhalle".into(),
            area_id: AreaId(Uuid::nil()),
            area_name: "Abstellplatz links".into(),
        },
        batch_number: 42,
        quantity,
        custom_props: HashMap::new(),
        is_locked: false,
    };
    engine.create_batch(draft, &UserId::from("alex")).unwrap().id
}

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

// === Tests ===

/// Many threads checking in, checking out and reading a single batch.
#[test]
fn no_deadlock_high_contention_single_batch() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let batch_id = create(&engine, 1, dec!(100));
    let check_ins = Arc::new(AtomicUsize::new(0));
    let check_outs = Arc::new(AtomicUsize::new(0));

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let engine = engine.clone();
        let check_ins = check_ins.clone();
        let check_outs = check_outs.clone();
        let user = UserId::new(format!("worker-{thread_id}"));

        let handle = thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                if i % 3 == 0 {
                    if engine.perform_transaction(&batch_id, dec!(10), &user).is_ok() {
                        check_ins.fetch_add(1, Ordering::SeqCst);
                    }
                } else if i % 3 == 1 {
                    if engine.perform_transaction(&batch_id, dec!(-7.5), &user).is_ok() {
                        check_outs.fetch_add(1, Ordering::SeqCst);
                    }
                } else {
                    // Read operations
                    let _ = engine.get_batch(&batch_id);
                    let _ = engine.get_last_transaction(&batch_id);
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Verify final state is consistent
    let batch = engine.get_batch(&batch_id).unwrap();
    let expected = dec!(100) + Decimal::from(check_ins.load(Ordering::SeqCst)) * dec!(10)
        - Decimal::from(check_outs.load(Ordering::SeqCst)) * dec!(7.5);
    assert!(batch.quantity >= Decimal::ZERO);
    assert_eq!(batch.quantity, expected);
    assert_eq!(engine.audit_batch(&batch_id), Ok(expected));
}

/// Concurrent check-outs can never collectively overdraw a batch.
#[test]
fn concurrent_checkouts_never_overdraw() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let batch_id = create(&engine, 1, dec!(100));
    let successes = Arc::new(AtomicUsize::new(0));

    const NUM_THREADS: usize = 16;
    const ATTEMPTS_PER_THREAD: usize = 20;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = engine.clone();
            let successes = successes.clone();
            thread::spawn(move || {
                for _ in 0..ATTEMPTS_PER_THREAD {
                    match engine.perform_transaction(&batch_id, dec!(-1), &UserId::from("alex")) {
                        Ok(_) => {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidArgument),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(successes.load(Ordering::SeqCst), 100);
    let batch = engine.get_batch(&batch_id).unwrap();
    assert_eq!(batch.quantity, Decimal::ZERO);
    assert!(batch.is_archived);
    assert_eq!(engine.get_log(&batch_id).unwrap().len(), 101);
}

/// Operations spread across many batches, with reads of neighbouring batches.
#[test]
fn no_deadlock_cross_batch_operations() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());

    const NUM_THREADS: usize = 20;
    const NUM_BATCHES: usize = 10;
    const OPS_PER_THREAD: usize = 50;

    let batches: Arc<Vec<BatchId>> = Arc::new(
        (0..NUM_BATCHES)
            .map(|i| create(&engine, i as u32, dec!(50)))
            .collect(),
    );

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let engine = engine.clone();
        let batches = batches.clone();
        let user = UserId::new(format!("worker-{thread_id}"));

        let handle = thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                // Each thread cycles through batches
                let batch_id = batches[(thread_id + i) % NUM_BATCHES];

                if i % 2 == 0 {
                    let _ = engine.perform_transaction(&batch_id, dec!(5), &user);
                } else {
                    let _ = engine.perform_transaction(&batch_id, dec!(-1), &user);
                }

                if i % 5 == 0 {
                    let _ = engine.update_batch_status(&batch_id, i % 10 == 0);
                }

                // Also read from a different batch
                let other = batches[(thread_id + i + 1) % NUM_BATCHES];
                let _ = engine.get_log(&other);
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    for batch_id in batches.iter() {
        let quantity = engine.audit_batch(batch_id).expect("batch consistent with log");
        assert!(quantity >= Decimal::ZERO);
    }
}

/// Writers race appends against amendments of their own entries.
#[test]
fn no_deadlock_amendment_race() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let batch_id = create(&engine, 4, dec!(2000));
    let stale = Arc::new(AtomicUsize::new(0));

    const NUM_THREADS: usize = 12;
    const ROUNDS: usize = 50;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let engine = engine.clone();
            let stale = stale.clone();
            let user = UserId::new(format!("worker-{thread_id}"));
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let tx = engine
                        .perform_transaction(&batch_id, dec!(-1), &user)
                        .expect("enough stock");
                    match engine.amend_last_transaction(&batch_id, &tx.id, dec!(-2), &user) {
                        Ok(()) => {}
                        Err(e) => {
                            assert_eq!(e.kind(), ErrorKind::StaleAmendment);
                            stale.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let total = NUM_THREADS * ROUNDS;
    let amended = total - stale.load(Ordering::SeqCst);
    let expected = dec!(2000) - Decimal::from(total) - Decimal::from(amended);
    assert_eq!(engine.get_batch(&batch_id).unwrap().quantity, expected);
    assert_eq!(engine.audit_batch(&batch_id), Ok(expected));
}

/// Listing batches while others are created and mutated.
#[test]
fn no_deadlock_listing_during_mutation() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let running = Arc::new(AtomicBool::new(true));

    let mut handles = Vec::new();

    // Spawn writer threads that add and move stock
    for writer_id in 0..5u32 {
        let engine = engine.clone();
        let running = running.clone();

        let handle = thread::spawn(move || {
            let mut count = 0;
            while running.load(Ordering::SeqCst) && count < 100 {
                let batch_id = create(&engine, writer_id, dec!(10));
                let _ = engine.perform_transaction(&batch_id, dec!(-10), &UserId::from("alex"));
                count += 1;
                thread::yield_now();
            }
        });

        handles.push(handle);
    }

    // Spawn reader threads that list batches
    for reader_id in 0..5u32 {
        let engine = engine.clone();
        let running = running.clone();

        let handle = thread::spawn(move || {
            let mut iterations = 0;
            while running.load(Ordering::SeqCst) && iterations < 50 {
                let filter = BatchFilter::default().material(MaterialId(reader_id));
                for batch in engine.get_batches(&filter).unwrap() {
                    assert!(batch.quantity >= Decimal::ZERO);
                }
                iterations += 1;
                thread::yield_now();
            }
        });

        handles.push(handle);
    }

    // Let them run for a bit
    thread::sleep(Duration::from_millis(500));
    running.store(false, Ordering::SeqCst);

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let archived = engine
        .get_batches(&BatchFilter::default())
        .unwrap()
        .iter()
        .filter(|batch| batch.is_archived)
        .count();
    assert_eq!(archived, engine.repository().len());
}

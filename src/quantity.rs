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

//! Quantity rounding policy.
//!
//! Every caller-supplied quantity is rounded to [`QUANTITY_PRECISION`]
//! fractional digits, midpoints away from zero, before it touches state.
//! Sums are rounded again after combining.
//!
//! ```
//! use inventory_ledger_rs::round_quantity;
//! use rust_decimal_macros::dec;
//!
//! assert_eq!(round_quantity(dec!(0.0005)), dec!(0.001));
//! assert_eq!(round_quantity(dec!(-0.0005)), dec!(-0.001));
//! assert_eq!(round_quantity(dec!(12.345)), dec!(12.345));
//! ```

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits kept for material quantities.
pub const QUANTITY_PRECISION: u32 = 3;

/// Rounds a quantity to three fractional digits, ties away from zero.
pub fn round_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(QUANTITY_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

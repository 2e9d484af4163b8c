// SPDX-License-Identifier: BSD-3-Clause
//! Explicit-value analysis of integer variables.

pub mod reducer;
pub mod refiner;
pub mod value;

pub use reducer::ValueReducer;
pub use refiner::ValueRefiner;
pub use value::{ValueAnalysis, ValuePrecision, ValueState};

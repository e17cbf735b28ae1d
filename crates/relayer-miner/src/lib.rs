// Copyright 2023 Ring Exchange Network Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(missing_docs)]

//! # Relayer Miner
//!
//! The matching half of the relay: a periodic matcher scans the order book
//! for candidate rings, the evaluator prices each candidate (rate
//! reduction, volume allocation, fee selection, deviation test, net-income
//! projection), and admitted rings are handed to the submitter.

/// On-chain token and fee balances for ring hydration.
pub mod balance;
/// Ring economics: rate reduction, fills, fees, admissibility.
pub mod evaluator;
/// Gas price estimation.
pub mod gas;
/// The periodic matching loop.
pub mod matcher;
/// The submission hand-off boundary.
pub mod submitter;

pub use balance::{BalanceProvider, Erc20BalanceProvider, StaticBalanceProvider};
pub use evaluator::{price_valid, ring_product_at_least_unit, Evaluator};
pub use gas::FixedGasOracle;
pub use matcher::{MatcherSettings, TimingMatcher};
pub use submitter::{
    FeeSelection, QueueSubmitter, RingSubmitter, SubmitOutcome, SubmittedLeg,
    SubmittedRing, SUBMITTED_RINGS_QUEUE,
};

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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Relayer Types
//!
//! The shared data model of the ring relayer: the token registry, signed
//! orders and their live projections, candidate rings, chain events and the
//! exact rational arithmetic all price and fee math is performed with.

/// Typed chain events consumed by the ingress adapter.
pub mod events;
/// Signed orders and their live residual projections.
pub mod order;
/// Conversions between chain integers and exact rationals.
pub mod rational;
/// Candidate rings and their per-leg fill scratch state.
pub mod ring;
/// Token metadata, the process-wide registry and market wrapping.
pub mod token;

#[doc(hidden)]
pub mod test_support;

pub use events::{ChainEvent, EventMeta};
pub use order::{OrderState, OrderStatus, RawOrder};
pub use ring::{FilledOrder, Ring, RingReceipt};
pub use token::{Token, TokenRegistry};

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

//! Typed events flowing from the chain extractor into the ingress adapter.
//!
//! The extractor boundary delivers these over an explicit channel in
//! `(block_number, log_index)` order; the adapter applies them one at a time.

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::order::RawOrder;

/// Chain coordinates shared by every extracted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Block the event was mined in.
    pub block_number: u64,
    /// Position of the log inside the block.
    pub log_index: u64,
}

impl EventMeta {
    /// Creates event coordinates.
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// An event produced by the chain extractor or the ingestion gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChainEvent {
    /// A new order reached the relay, either from the gateway topic or from
    /// an on-chain placement log.
    OrderPlaced {
        /// Chain coordinates; zero for gateway submissions.
        meta: EventMeta,
        /// The signed order.
        order: Box<RawOrder>,
    },
    /// A leg of a mined ring settled volume against an order.
    Fill {
        /// Chain coordinates.
        meta: EventMeta,
        /// Content-derived identity of this fill log, used for idempotence.
        event_id: H256,
        /// The order debited by the fill.
        order_hash: H256,
        /// The ring the fill settled in.
        ring_hash: H256,
        /// Sell-side volume settled.
        amount_s: U256,
        /// Buy-side volume settled.
        amount_b: U256,
    },
    /// The owner cancelled part or all of an order.
    Cancel {
        /// Chain coordinates.
        meta: EventMeta,
        /// Content-derived identity of this cancel log.
        event_id: H256,
        /// The cancelled order.
        order_hash: H256,
        /// Sell-side volume withdrawn.
        amount_s: U256,
        /// Buy-side volume withdrawn.
        amount_b: U256,
    },
    /// The owner invalidated every order placed before `cutoff`.
    Cutoff {
        /// Chain coordinates.
        meta: EventMeta,
        /// The sweeping owner.
        owner: Address,
        /// Orders with `valid_since < cutoff` terminate.
        cutoff: u64,
    },
    /// Like [`ChainEvent::Cutoff`], restricted to one unordered token pair.
    CutoffPair {
        /// Chain coordinates.
        meta: EventMeta,
        /// The sweeping owner.
        owner: Address,
        /// One side of the pair.
        token_a: Address,
        /// The other side of the pair.
        token_b: Address,
        /// Orders with `valid_since < cutoff` terminate.
        cutoff: u64,
    },
    /// A full ring settled on chain.
    RingMined {
        /// Chain coordinates.
        meta: EventMeta,
        /// Content-derived identity of this log.
        event_id: H256,
        /// Hash of the settled ring.
        ring_hash: H256,
        /// The miner that submitted it.
        miner: Address,
        /// The orders forming the ring, in cycle order.
        order_hashes: Vec<H256>,
    },
    /// The chain reorganized; state above `block_number` must be rewound.
    Fork {
        /// The common-ancestor block; ingestion resumes at the next block.
        block_number: u64,
    },
}

impl ChainEvent {
    /// The block this event belongs to.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::OrderPlaced { meta, .. }
            | Self::Fill { meta, .. }
            | Self::Cancel { meta, .. }
            | Self::Cutoff { meta, .. }
            | Self::CutoffPair { meta, .. }
            | Self::RingMined { meta, .. } => meta.block_number,
            Self::Fork { block_number } => *block_number,
        }
    }
}

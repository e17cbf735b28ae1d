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

//! # Relayer Store Module
//!
//! Storage backends for the order book and its event journals.
//!
//! ## Overview
//!
//! The store keeps three kinds of state: live order records indexed by
//! market and owner, append-only journals of chain events keyed by
//! `(block_number, log_index, id)` so a fork rewind is an ordered range
//! drain, and FIFO queues for the submitter hand-off. Every concern is a
//! trait implemented by both the in-memory and the sled backend.

use std::fmt::Display;

use ethers::types::{Address, H256, U256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ring_relayer_types::OrderState;
use ring_relayer_utils::Result;

/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for managing the FIFO queues of the relayer.
pub mod queue;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
pub mod sled;

pub use self::sled::SledStore;
pub use mem::InMemoryStore;
pub use queue::QueueStore;

/// Identifies one order book shard: a settlement protocol plus the ordered
/// `(token_s, token_b)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarketKey {
    /// Settlement contract address.
    pub protocol: Address,
    /// Sell-side token.
    pub token_s: Address,
    /// Buy-side token.
    pub token_b: Address,
}

impl MarketKey {
    /// Creates a market key.
    pub fn new(protocol: Address, token_s: Address, token_b: Address) -> Self {
        Self {
            protocol,
            token_s,
            token_b,
        }
    }

    /// The key with its token sides swapped.
    pub fn inverse(&self) -> Self {
        Self {
            protocol: self.protocol,
            token_s: self.token_b,
            token_b: self.token_s,
        }
    }

    /// Returns the bytes of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(60);
        vec.extend_from_slice(self.protocol.as_bytes());
        vec.extend_from_slice(self.token_s.as_bytes());
        vec.extend_from_slice(self.token_b.as_bytes());
        vec
    }
}

impl Display for MarketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Market({:?}, {:?} -> {:?})",
            self.protocol, self.token_s, self.token_b
        )
    }
}

/// Journal key ordering events by chain position, then by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKey {
    /// Block the event was mined in.
    pub block_number: u64,
    /// Position of the log inside the block.
    pub log_index: u64,
    /// Content-derived identity of the log.
    pub event_id: H256,
}

impl EventKey {
    /// Creates a journal key.
    pub fn new(block_number: u64, log_index: u64, event_id: H256) -> Self {
        Self {
            block_number,
            log_index,
            event_id,
        }
    }

    /// Big-endian bytes; lexicographic order equals chain order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(48);
        vec.extend_from_slice(&self.block_number.to_be_bytes());
        vec.extend_from_slice(&self.log_index.to_be_bytes());
        vec.extend_from_slice(self.event_id.as_bytes());
        vec
    }

    /// The smallest key strictly above every event of `block_number`.
    pub fn block_upper_bound(block_number: u64) -> Vec<u8> {
        let mut vec = Vec::with_capacity(48);
        vec.extend_from_slice(&block_number.saturating_add(1).to_be_bytes());
        vec.extend_from_slice(&[0u8; 40]);
        vec
    }
}

/// A settled fill against one order leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRecord {
    /// Block the fill was mined in.
    pub block_number: u64,
    /// Position of the log inside the block.
    pub log_index: u64,
    /// Content-derived identity of the fill log.
    pub event_id: H256,
    /// The debited order.
    pub order_hash: H256,
    /// The ring the fill settled in.
    pub ring_hash: H256,
    /// Owner of the debited order.
    pub owner: Address,
    /// Sell-side volume settled.
    pub amount_s: U256,
    /// Buy-side volume settled.
    pub amount_b: U256,
}

impl FillRecord {
    /// The journal key of this record.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.block_number, self.log_index, self.event_id)
    }
}

/// An owner cancellation of part or all of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRecord {
    /// Block the cancellation was mined in.
    pub block_number: u64,
    /// Position of the log inside the block.
    pub log_index: u64,
    /// Content-derived identity of the cancel log.
    pub event_id: H256,
    /// The cancelled order.
    pub order_hash: H256,
    /// Owner of the cancelled order.
    pub owner: Address,
    /// Sell-side volume withdrawn.
    pub amount_s: U256,
    /// Buy-side volume withdrawn.
    pub amount_b: U256,
}

impl CancelRecord {
    /// The journal key of this record.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.block_number, self.log_index, self.event_id)
    }
}

/// An owner cutoff sweep, optionally restricted to one unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoffRecord {
    /// Block the sweep was mined in.
    pub block_number: u64,
    /// Position of the log inside the block.
    pub log_index: u64,
    /// The sweeping owner.
    pub owner: Address,
    /// Orders with `valid_since < cutoff` terminate.
    pub cutoff: u64,
    /// Restricting pair; `None` sweeps every market.
    pub pair: Option<(Address, Address)>,
}

impl CutoffRecord {
    /// The journal key of this record; cutoffs have no separate log id, the
    /// owner address padded into a word stands in.
    pub fn key(&self) -> EventKey {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(self.owner.as_bytes());
        EventKey::new(self.block_number, self.log_index, H256::from(word))
    }
}

/// A full ring settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMinedRecord {
    /// Block the ring settled in.
    pub block_number: u64,
    /// Position of the log inside the block.
    pub log_index: u64,
    /// Content-derived identity of the log.
    pub event_id: H256,
    /// Hash of the settled ring.
    pub ring_hash: H256,
    /// The miner that submitted it.
    pub miner: Address,
    /// The orders forming the ring, in cycle order.
    pub order_hashes: Vec<H256>,
}

impl RingMinedRecord {
    /// The journal key of this record.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.block_number, self.log_index, self.event_id)
    }
}

/// Filters for a fill page query; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct FillQuery {
    /// Restrict to one order.
    pub order_hash: Option<H256>,
    /// Restrict to one owner.
    pub owner: Option<Address>,
    /// Restrict to one ring.
    pub ring_hash: Option<H256>,
}

impl FillQuery {
    fn matches(&self, record: &FillRecord) -> bool {
        self.order_hash.map_or(true, |h| h == record.order_hash)
            && self.owner.map_or(true, |o| o == record.owner)
            && self.ring_hash.map_or(true, |h| h == record.ring_hash)
    }
}

/// A zero-based page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    /// Zero-based page index.
    pub page_index: usize,
    /// Records per page.
    pub page_size: usize,
}

impl PageRequest {
    /// Creates a page request; a zero page size collapses to one record.
    pub fn new(page_index: usize, page_size: usize) -> Self {
        Self {
            page_index,
            page_size: page_size.max(1),
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The records of this page, in chain order.
    pub items: Vec<T>,
    /// Total records matching the filter.
    pub total: usize,
    /// Echo of the requested page index.
    pub page_index: usize,
    /// Echo of the requested page size.
    pub page_size: usize,
}

/// Fills and cancels removed by a fork rewind, ready to be reversed.
#[derive(Debug, Clone, Default)]
pub struct RewindBatch {
    /// Removed fills.
    pub fills: Vec<FillRecord>,
    /// Removed cancellations.
    pub cancels: Vec<CancelRecord>,
}

/// Live order records with market and owner indexes.
pub trait OrderStore: Clone + Send + Sync {
    /// Inserts a fresh order and indexes it by market and owner.
    fn insert_order(&self, order: &OrderState) -> Result<()>;
    /// Fetches an order by hash.
    fn get_order(&self, hash: H256) -> Result<Option<OrderState>>;
    /// Overwrites an order record; the indexes are keyed by immutable
    /// fields and need no maintenance.
    fn update_order(&self, order: &OrderState) -> Result<()>;
    /// All orders of one market shard, unsorted.
    fn market_orders(&self, market: &MarketKey) -> Result<Vec<OrderState>>;
    /// All orders of one owner, unsorted.
    fn owner_orders(&self, owner: Address) -> Result<Vec<OrderState>>;
}

/// A simple set keyed by the hash of an event, marking it processed.
///
/// This is what makes fill and cancel application idempotent.
pub trait EventHashStore: Send + Sync + Clone {
    /// Store the event in the store.
    fn store_event(&self, event: &[u8]) -> Result<()>;
    /// Check if the event is stored in the store.
    fn contains_event(&self, event: &[u8]) -> Result<bool>;
    /// Delete the event from the store.
    fn delete_event(&self, event: &[u8]) -> Result<()>;
}

/// Append-only journals of chain events, ordered by chain position.
pub trait EventJournalStore: EventHashStore {
    /// Appends a fill; returns `false` when the event id was seen before.
    fn record_fill(&self, record: &FillRecord) -> Result<bool>;
    /// Appends a cancellation; returns `false` on a duplicate event id.
    fn record_cancel(&self, record: &CancelRecord) -> Result<bool>;
    /// Appends a cutoff sweep.
    fn record_cutoff(&self, record: &CutoffRecord) -> Result<()>;
    /// Appends a ring settlement; returns `false` on a duplicate event id.
    fn record_ring_mined(&self, record: &RingMinedRecord) -> Result<bool>;
    /// Pages through fills matching `query`, in chain order.
    fn fills_page(&self, query: &FillQuery, page: PageRequest) -> Result<Page<FillRecord>>;
    /// Pages through ring settlements, optionally restricted to one ring.
    fn ring_mined_page(
        &self,
        ring_hash: Option<H256>,
        page: PageRequest,
    ) -> Result<Page<RingMinedRecord>>;
    /// Removes every fill, cancel and ring settlement recorded at blocks
    /// strictly above `block_number` and returns the reversible records.
    fn drain_events_above(&self, block_number: u64) -> Result<RewindBatch>;
}

fn paginate<T: Clone>(matched: Vec<T>, page: PageRequest) -> Page<T> {
    let total = matched.len();
    let start = page.page_index.saturating_mul(page.page_size);
    let items = matched
        .into_iter()
        .skip(start)
        .take(page.page_size)
        .collect();
    Page {
        items,
        total,
        page_index: page.page_index,
        page_size: page.page_size,
    }
}

/// Encodes a record as its stored byte representation.
fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a record from its stored byte representation.
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

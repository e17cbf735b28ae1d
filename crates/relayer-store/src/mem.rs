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

//! In-memory storage backend, primarily for tests and the relay-only mode.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use ethers::types::{Address, H256};
use parking_lot::RwLock;

use ring_relayer_types::OrderState;
use ring_relayer_utils::Result;

use super::{
    decode, encode, paginate, CancelRecord, CutoffRecord, EventHashStore,
    EventJournalStore, EventKey, FillQuery, FillRecord, MarketKey, OrderStore,
    Page, PageRequest, RewindBatch, RingMinedRecord,
};

type Journal = BTreeMap<Vec<u8>, Vec<u8>>;

/// InMemoryStore holds the whole book and its journals behind `RwLock`s.
///
/// Readers take consistent snapshots; writers are exclusive per map, which
/// over-satisfies the per-order-hash serialization the book requires.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    orders: Arc<RwLock<HashMap<H256, OrderState>>>,
    market_index: Arc<RwLock<HashMap<Vec<u8>, BTreeSet<H256>>>>,
    owner_index: Arc<RwLock<HashMap<Address, BTreeSet<H256>>>>,
    fills: Arc<RwLock<Journal>>,
    cancels: Arc<RwLock<Journal>>,
    cutoffs: Arc<RwLock<Journal>>,
    ring_mined: Arc<RwLock<Journal>>,
    seen_events: Arc<RwLock<HashSet<Vec<u8>>>>,
    queues: Arc<RwLock<HashMap<String, Vec<Vec<u8>>>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl InMemoryStore {
    pub(crate) fn queue_push(&self, queue: &str, item: Vec<u8>) {
        self.queues
            .write()
            .entry(queue.to_string())
            .or_default()
            .push(item);
    }

    pub(crate) fn queue_pop(&self, queue: &str) -> Option<Vec<u8>> {
        let mut guard = self.queues.write();
        let items = guard.get_mut(queue)?;
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }

    pub(crate) fn queue_front(&self, queue: &str) -> Option<Vec<u8>> {
        self.queues.read().get(queue)?.first().cloned()
    }

    pub(crate) fn queue_count(&self, queue: &str) -> usize {
        self.queues.read().get(queue).map(Vec::len).unwrap_or(0)
    }
}

impl OrderStore for InMemoryStore {
    #[tracing::instrument(skip(self, order))]
    fn insert_order(&self, order: &OrderState) -> Result<()> {
        let raw = &order.raw_order;
        let market =
            MarketKey::new(raw.protocol, raw.token_s, raw.token_b).to_bytes();
        self.orders.write().insert(raw.hash, order.clone());
        self.market_index
            .write()
            .entry(market)
            .or_default()
            .insert(raw.hash);
        self.owner_index
            .write()
            .entry(raw.owner)
            .or_default()
            .insert(raw.hash);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn get_order(&self, hash: H256) -> Result<Option<OrderState>> {
        Ok(self.orders.read().get(&hash).cloned())
    }

    #[tracing::instrument(skip(self, order))]
    fn update_order(&self, order: &OrderState) -> Result<()> {
        self.orders
            .write()
            .insert(order.raw_order.hash, order.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn market_orders(&self, market: &MarketKey) -> Result<Vec<OrderState>> {
        let index = self.market_index.read();
        let orders = self.orders.read();
        let hashes = index.get(&market.to_bytes());
        Ok(hashes
            .into_iter()
            .flatten()
            .filter_map(|h| orders.get(h).cloned())
            .collect())
    }

    #[tracing::instrument(skip(self))]
    fn owner_orders(&self, owner: Address) -> Result<Vec<OrderState>> {
        let index = self.owner_index.read();
        let orders = self.orders.read();
        let hashes = index.get(&owner);
        Ok(hashes
            .into_iter()
            .flatten()
            .filter_map(|h| orders.get(h).cloned())
            .collect())
    }
}

impl EventHashStore for InMemoryStore {
    fn store_event(&self, event: &[u8]) -> Result<()> {
        self.seen_events.write().insert(event.to_vec());
        Ok(())
    }

    fn contains_event(&self, event: &[u8]) -> Result<bool> {
        Ok(self.seen_events.read().contains(event))
    }

    fn delete_event(&self, event: &[u8]) -> Result<()> {
        self.seen_events.write().remove(event);
        Ok(())
    }
}

impl EventJournalStore for InMemoryStore {
    #[tracing::instrument(skip(self, record))]
    fn record_fill(&self, record: &FillRecord) -> Result<bool> {
        if self.contains_event(record.event_id.as_bytes())? {
            return Ok(false);
        }
        self.store_event(record.event_id.as_bytes())?;
        self.fills
            .write()
            .insert(record.key().to_bytes(), encode(record)?);
        Ok(true)
    }

    #[tracing::instrument(skip(self, record))]
    fn record_cancel(&self, record: &CancelRecord) -> Result<bool> {
        if self.contains_event(record.event_id.as_bytes())? {
            return Ok(false);
        }
        self.store_event(record.event_id.as_bytes())?;
        self.cancels
            .write()
            .insert(record.key().to_bytes(), encode(record)?);
        Ok(true)
    }

    #[tracing::instrument(skip(self, record))]
    fn record_cutoff(&self, record: &CutoffRecord) -> Result<()> {
        self.cutoffs
            .write()
            .insert(record.key().to_bytes(), encode(record)?);
        Ok(())
    }

    #[tracing::instrument(skip(self, record))]
    fn record_ring_mined(&self, record: &RingMinedRecord) -> Result<bool> {
        if self.contains_event(record.event_id.as_bytes())? {
            return Ok(false);
        }
        self.store_event(record.event_id.as_bytes())?;
        self.ring_mined
            .write()
            .insert(record.key().to_bytes(), encode(record)?);
        Ok(true)
    }

    #[tracing::instrument(skip(self, query))]
    fn fills_page(
        &self,
        query: &FillQuery,
        page: PageRequest,
    ) -> Result<Page<FillRecord>> {
        let guard = self.fills.read();
        let matched = guard
            .values()
            .map(|bytes| decode::<FillRecord>(bytes))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect::<Vec<_>>();
        Ok(paginate(matched, page))
    }

    #[tracing::instrument(skip(self))]
    fn ring_mined_page(
        &self,
        ring_hash: Option<H256>,
        page: PageRequest,
    ) -> Result<Page<RingMinedRecord>> {
        let guard = self.ring_mined.read();
        let matched = guard
            .values()
            .map(|bytes| decode::<RingMinedRecord>(bytes))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|r| ring_hash.map_or(true, |h| h == r.ring_hash))
            .collect::<Vec<_>>();
        Ok(paginate(matched, page))
    }

    #[tracing::instrument(skip(self))]
    fn drain_events_above(&self, block_number: u64) -> Result<RewindBatch> {
        let bound = EventKey::block_upper_bound(block_number);
        let mut batch = RewindBatch::default();

        let mut fills = self.fills.write();
        let keys: Vec<_> = fills.range(bound.clone()..).map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Some(bytes) = fills.remove(&key) {
                let record: FillRecord = decode(&bytes)?;
                self.delete_event(record.event_id.as_bytes())?;
                batch.fills.push(record);
            }
        }
        drop(fills);

        let mut cancels = self.cancels.write();
        let keys: Vec<_> = cancels.range(bound.clone()..).map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Some(bytes) = cancels.remove(&key) {
                let record: CancelRecord = decode(&bytes)?;
                self.delete_event(record.event_id.as_bytes())?;
                batch.cancels.push(record);
            }
        }
        drop(cancels);

        let mut ring_mined = self.ring_mined.write();
        let keys: Vec<_> = ring_mined.range(bound..).map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Some(bytes) = ring_mined.remove(&key) {
                let record: RingMinedRecord = decode(&bytes)?;
                self.delete_event(record.event_id.as_bytes())?;
            }
        }

        Ok(batch)
    }
}

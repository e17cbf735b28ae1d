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

//! Durable storage backend on top of [Sled](https://sled.rs).
//!
//! One tree per concern: `orders`, the two order indexes, one journal tree
//! per event table and a dedup tree marking processed event ids. Journal
//! keys are big-endian `(block, log_index, id)` so chain order equals key
//! order and a fork rewind is a single range scan.

use std::path::Path;

use ethers::types::{Address, H256};

use ring_relayer_types::OrderState;
use ring_relayer_utils::Result;

use super::{
    decode, encode, paginate, CancelRecord, CutoffRecord, EventHashStore,
    EventJournalStore, EventKey, FillQuery, FillRecord, MarketKey, OrderStore,
    Page, PageRequest, RewindBatch, RingMinedRecord,
};

const ORDERS_TREE: &str = "orders";
const MARKET_INDEX_TREE: &str = "orders_by_market";
const OWNER_INDEX_TREE: &str = "orders_by_owner";
const FILLS_TREE: &str = "fill_events";
const CANCELS_TREE: &str = "cancel_events";
const CUTOFFS_TREE: &str = "cutoff_events";
const RING_MINED_TREE: &str = "ring_mined_events";
const SEEN_EVENTS_TREE: &str = "seen_events";

/// SledStore is a store that persists the book in a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledStore.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk.
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    pub(crate) fn queue_tree(&self, queue: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(format!("queue/{queue}"))?)
    }

    pub(crate) fn next_queue_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    fn index_key(prefix: &[u8], hash: H256) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 32);
        key.extend_from_slice(prefix);
        key.extend_from_slice(hash.as_bytes());
        key
    }

    fn scan_index(&self, tree_name: &str, prefix: &[u8]) -> Result<Vec<OrderState>> {
        let index = self.db.open_tree(tree_name)?;
        let orders = self.db.open_tree(ORDERS_TREE)?;
        let mut result = Vec::new();
        for entry in index.scan_prefix(prefix) {
            let (key, _) = entry?;
            let hash = &key[prefix.len()..];
            if let Some(bytes) = orders.get(hash)? {
                result.push(decode(&bytes)?);
            }
        }
        Ok(result)
    }

    fn drain_tree_above(
        &self,
        tree_name: &str,
        block_number: u64,
    ) -> Result<Vec<Vec<u8>>> {
        let tree = self.db.open_tree(tree_name)?;
        let bound = EventKey::block_upper_bound(block_number);
        let mut removed = Vec::new();
        let keys = tree
            .range(bound..)
            .map(|entry| entry.map(|(k, _)| k))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for key in keys {
            if let Some(bytes) = tree.remove(&key)? {
                removed.push(bytes.to_vec());
            }
        }
        Ok(removed)
    }
}

impl OrderStore for SledStore {
    #[tracing::instrument(skip(self, order))]
    fn insert_order(&self, order: &OrderState) -> Result<()> {
        let raw = &order.raw_order;
        let orders = self.db.open_tree(ORDERS_TREE)?;
        orders.insert(raw.hash.as_bytes(), encode(order)?)?;
        let market =
            MarketKey::new(raw.protocol, raw.token_s, raw.token_b).to_bytes();
        let market_index = self.db.open_tree(MARKET_INDEX_TREE)?;
        market_index.insert(Self::index_key(&market, raw.hash), &[])?;
        let owner_index = self.db.open_tree(OWNER_INDEX_TREE)?;
        owner_index
            .insert(Self::index_key(raw.owner.as_bytes(), raw.hash), &[])?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn get_order(&self, hash: H256) -> Result<Option<OrderState>> {
        let orders = self.db.open_tree(ORDERS_TREE)?;
        orders
            .get(hash.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    #[tracing::instrument(skip(self, order))]
    fn update_order(&self, order: &OrderState) -> Result<()> {
        let orders = self.db.open_tree(ORDERS_TREE)?;
        orders.insert(order.raw_order.hash.as_bytes(), encode(order)?)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn market_orders(&self, market: &MarketKey) -> Result<Vec<OrderState>> {
        self.scan_index(MARKET_INDEX_TREE, &market.to_bytes())
    }

    #[tracing::instrument(skip(self))]
    fn owner_orders(&self, owner: Address) -> Result<Vec<OrderState>> {
        self.scan_index(OWNER_INDEX_TREE, owner.as_bytes())
    }
}

impl EventHashStore for SledStore {
    fn store_event(&self, event: &[u8]) -> Result<()> {
        let tree = self.db.open_tree(SEEN_EVENTS_TREE)?;
        tree.insert(event, &[])?;
        Ok(())
    }

    fn contains_event(&self, event: &[u8]) -> Result<bool> {
        let tree = self.db.open_tree(SEEN_EVENTS_TREE)?;
        Ok(tree.contains_key(event)?)
    }

    fn delete_event(&self, event: &[u8]) -> Result<()> {
        let tree = self.db.open_tree(SEEN_EVENTS_TREE)?;
        tree.remove(event)?;
        Ok(())
    }
}

impl EventJournalStore for SledStore {
    #[tracing::instrument(skip(self, record))]
    fn record_fill(&self, record: &FillRecord) -> Result<bool> {
        if self.contains_event(record.event_id.as_bytes())? {
            return Ok(false);
        }
        self.store_event(record.event_id.as_bytes())?;
        let tree = self.db.open_tree(FILLS_TREE)?;
        tree.insert(record.key().to_bytes(), encode(record)?)?;
        Ok(true)
    }

    #[tracing::instrument(skip(self, record))]
    fn record_cancel(&self, record: &CancelRecord) -> Result<bool> {
        if self.contains_event(record.event_id.as_bytes())? {
            return Ok(false);
        }
        self.store_event(record.event_id.as_bytes())?;
        let tree = self.db.open_tree(CANCELS_TREE)?;
        tree.insert(record.key().to_bytes(), encode(record)?)?;
        Ok(true)
    }

    #[tracing::instrument(skip(self, record))]
    fn record_cutoff(&self, record: &CutoffRecord) -> Result<()> {
        let tree = self.db.open_tree(CUTOFFS_TREE)?;
        tree.insert(record.key().to_bytes(), encode(record)?)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, record))]
    fn record_ring_mined(&self, record: &RingMinedRecord) -> Result<bool> {
        if self.contains_event(record.event_id.as_bytes())? {
            return Ok(false);
        }
        self.store_event(record.event_id.as_bytes())?;
        let tree = self.db.open_tree(RING_MINED_TREE)?;
        tree.insert(record.key().to_bytes(), encode(record)?)?;
        Ok(true)
    }

    #[tracing::instrument(skip(self, query))]
    fn fills_page(
        &self,
        query: &FillQuery,
        page: PageRequest,
    ) -> Result<Page<FillRecord>> {
        let tree = self.db.open_tree(FILLS_TREE)?;
        let mut matched = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let record: FillRecord = decode(&bytes)?;
            if query.matches(&record) {
                matched.push(record);
            }
        }
        Ok(paginate(matched, page))
    }

    #[tracing::instrument(skip(self))]
    fn ring_mined_page(
        &self,
        ring_hash: Option<H256>,
        page: PageRequest,
    ) -> Result<Page<RingMinedRecord>> {
        let tree = self.db.open_tree(RING_MINED_TREE)?;
        let mut matched = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let record: RingMinedRecord = decode(&bytes)?;
            if ring_hash.map_or(true, |h| h == record.ring_hash) {
                matched.push(record);
            }
        }
        Ok(paginate(matched, page))
    }

    #[tracing::instrument(skip(self))]
    fn drain_events_above(&self, block_number: u64) -> Result<RewindBatch> {
        let mut batch = RewindBatch::default();
        for bytes in self.drain_tree_above(FILLS_TREE, block_number)? {
            let record: FillRecord = decode(&bytes)?;
            self.delete_event(record.event_id.as_bytes())?;
            batch.fills.push(record);
        }
        for bytes in self.drain_tree_above(CANCELS_TREE, block_number)? {
            let record: CancelRecord = decode(&bytes)?;
            self.delete_event(record.event_id.as_bytes())?;
            batch.cancels.push(record);
        }
        for bytes in self.drain_tree_above(RING_MINED_TREE, block_number)? {
            let record: RingMinedRecord = decode(&bytes)?;
            self.delete_event(record.event_id.as_bytes())?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use ring_relayer_types::test_support::{signed_order, OrderParams};
    use ring_relayer_types::OrderState;

    fn fill(block: u64, log_index: u64, seed: u8) -> FillRecord {
        FillRecord {
            block_number: block,
            log_index,
            event_id: H256::from([seed; 32]),
            order_hash: H256::from([seed; 32]),
            ring_hash: H256::from([0xFF; 32]),
            owner: Address::from([seed; 20]),
            amount_s: U256::from(100),
            amount_b: U256::from(10),
        }
    }

    #[test]
    fn orders_round_trip_with_indexes() {
        let store = SledStore::temporary().unwrap();
        let order = OrderState::new(signed_order(OrderParams::default()));
        store.insert_order(&order).unwrap();

        let raw = &order.raw_order;
        let fetched = store.get_order(raw.hash).unwrap().unwrap();
        assert_eq!(fetched, order);

        let market = MarketKey::new(raw.protocol, raw.token_s, raw.token_b);
        assert_eq!(store.market_orders(&market).unwrap().len(), 1);
        assert!(store.market_orders(&market.inverse()).unwrap().is_empty());
        assert_eq!(store.owner_orders(raw.owner).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_fill_events_are_rejected() {
        let store = SledStore::temporary().unwrap();
        let record = fill(100, 0, 1);
        assert!(store.record_fill(&record).unwrap());
        assert!(!store.record_fill(&record).unwrap());
        let page = store
            .fills_page(&FillQuery::default(), PageRequest::new(0, 10))
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn drain_removes_only_higher_blocks() {
        let store = SledStore::temporary().unwrap();
        store.record_fill(&fill(100, 0, 1)).unwrap();
        store.record_fill(&fill(100, 1, 2)).unwrap();
        store.record_fill(&fill(101, 0, 3)).unwrap();

        let batch = store.drain_events_above(100).unwrap();
        assert_eq!(batch.fills.len(), 1);
        assert_eq!(batch.fills[0].block_number, 101);

        let page = store
            .fills_page(&FillQuery::default(), PageRequest::new(0, 10))
            .unwrap();
        assert_eq!(page.total, 2);
        // The drained event id is free to be re-ingested.
        assert!(store.record_fill(&fill(101, 0, 3)).unwrap());
    }

    #[test]
    fn fills_pages_respect_filters() {
        let store = SledStore::temporary().unwrap();
        for i in 0..5u8 {
            store.record_fill(&fill(100 + i as u64, 0, i + 1)).unwrap();
        }
        let query = FillQuery {
            owner: Some(Address::from([2u8; 20])),
            ..Default::default()
        };
        let page = store.fills_page(&query, PageRequest::new(0, 10)).unwrap();
        assert_eq!(page.total, 1);

        let all = store
            .fills_page(&FillQuery::default(), PageRequest::new(1, 2))
            .unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.items[0].block_number, 102);
    }
}

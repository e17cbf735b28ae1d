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

//! # Order Manager
//!
//! Owns every live order's residual state. Serves book and miner queries
//! with depth and freshness guarantees, and applies the state changes
//! driven by chain events: fills, cancellations, cutoff sweeps and fork
//! rewinds. Mutations are serialized per order hash; disjoint hashes
//! proceed in parallel.

use std::collections::HashSet;
use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use parking_lot::{Mutex, MutexGuard};

use ring_relayer_store::{
    CancelRecord, CutoffRecord, EventJournalStore, FillQuery, FillRecord,
    MarketKey, OrderStore, Page, PageRequest, RingMinedRecord,
};
use ring_relayer_types::order::current_timestamp;
use ring_relayer_types::token::unordered_pair;
use ring_relayer_types::{OrderState, OrderStatus, RawOrder};
use ring_relayer_utils::{Error, Result};

/// The event ingress adapter and the fork guard.
pub mod adapter;

pub use adapter::{EventAdapter, ForkGuard};

const LOCK_SHARDS: usize = 32;

/// Striped per-order-hash locks.
///
/// Writers against the same hash serialize on one shard; the stripe count
/// keeps disjoint hashes mostly contention-free.
struct HashLocks {
    shards: Vec<Mutex<()>>,
}

impl HashLocks {
    fn new() -> Self {
        Self {
            shards: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock(&self, hash: H256) -> MutexGuard<'_, ()> {
        let shard = hash.as_bytes()[31] as usize % LOCK_SHARDS;
        self.shards[shard].lock()
    }
}

/// Outcome of an order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAck {
    /// The order was accepted and is now live.
    Accepted,
    /// The identical order was already known; the call was a no-op.
    Duplicate,
}

/// The order book: submission, queries and event-driven mutation.
pub struct OrderManager<S> {
    store: S,
    locks: HashLocks,
}

impl<S> OrderManager<S>
where
    S: OrderStore + EventJournalStore,
{
    /// Wraps a storage backend.
    pub fn new(store: S) -> Arc<Self> {
        Arc::new(Self {
            store,
            locks: HashLocks::new(),
        })
    }

    /// Direct access to the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates and accepts an inbound order.
    ///
    /// Idempotent by hash: resubmitting identical content is a no-op, while
    /// different content under a known hash is rejected outright.
    pub fn submit_order(&self, raw: RawOrder) -> Result<SubmitAck> {
        raw.validate()?;
        let _guard = self.locks.lock(raw.hash);
        if let Some(existing) = self.store.get_order(raw.hash)? {
            if existing.raw_order == raw {
                tracing::debug!(hash = ?raw.hash, "duplicate order submission");
                return Ok(SubmitAck::Duplicate);
            }
            return Err(Error::InvalidOrder {
                reason: "order hash collides with different content".into(),
            });
        }
        self.store.insert_order(&OrderState::new(raw))?;
        Ok(SubmitAck::Accepted)
    }

    /// Fetches one order by hash.
    pub fn get_order_by_hash(&self, hash: H256) -> Result<Option<OrderState>> {
        self.store.get_order(hash)
    }

    /// The live book of one market orientation, cheapest sell price first.
    ///
    /// Ties break on earlier `valid_since`, then on lexicographic hash, so
    /// the ordering is total and stable across calls.
    pub fn get_order_book(
        &self,
        protocol: Address,
        token_s: Address,
        token_b: Address,
        limit: usize,
    ) -> Result<Vec<OrderState>> {
        let now = current_timestamp();
        let market = MarketKey::new(protocol, token_s, token_b);
        let mut orders: Vec<_> = self
            .store
            .market_orders(&market)?
            .into_iter()
            .filter(|o| !o.resolve_status(now).is_terminal())
            .collect();
        sort_by_price(&mut orders);
        orders.truncate(limit);
        Ok(orders)
    }

    /// Orders a miner can bind into candidate rings right now: unexpired,
    /// non-terminal, with residual volume, minus the caller's exclusions.
    pub fn miner_orders(
        &self,
        protocol: Address,
        token_s: Address,
        token_b: Address,
        limit: usize,
        exclude: &HashSet<H256>,
    ) -> Result<Vec<OrderState>> {
        let now = current_timestamp();
        let market = MarketKey::new(protocol, token_s, token_b);
        let mut orders: Vec<_> = self
            .store
            .market_orders(&market)?
            .into_iter()
            .filter(|o| o.is_effective(now))
            .filter(|o| !exclude.contains(&o.raw_order.hash))
            .collect();
        sort_by_price(&mut orders);
        orders.truncate(limit);
        Ok(orders)
    }

    /// Pages through recorded fills.
    pub fn fills_page_query(
        &self,
        query: &FillQuery,
        page: PageRequest,
    ) -> Result<Page<FillRecord>> {
        self.store.fills_page(query, page)
    }

    /// Pages through recorded ring settlements.
    pub fn ring_mined_page_query(
        &self,
        ring_hash: Option<H256>,
        page: PageRequest,
    ) -> Result<Page<RingMinedRecord>> {
        self.store.ring_mined_page(ring_hash, page)
    }

    /// Applies a settled fill: journals it and advances the order residuals.
    ///
    /// Idempotent by the fill's `event_id`.
    pub fn apply_fill(&self, record: FillRecord) -> Result<()> {
        let _guard = self.locks.lock(record.order_hash);
        if !self.store.record_fill(&record)? {
            tracing::debug!(event = ?record.event_id, "fill already applied");
            return Ok(());
        }
        match self.store.get_order(record.order_hash)? {
            Some(mut order) => {
                order.apply_fill(record.amount_s, record.amount_b, record.block_number);
                self.store.update_order(&order)?;
            }
            None => {
                tracing::warn!(
                    order = ?record.order_hash,
                    "fill for an order this relay has never seen"
                );
            }
        }
        Ok(())
    }

    /// Applies an owner cancellation, mirroring [`Self::apply_fill`].
    pub fn apply_cancel(&self, record: CancelRecord) -> Result<()> {
        let _guard = self.locks.lock(record.order_hash);
        if !self.store.record_cancel(&record)? {
            tracing::debug!(event = ?record.event_id, "cancel already applied");
            return Ok(());
        }
        match self.store.get_order(record.order_hash)? {
            Some(mut order) => {
                order.apply_cancel(record.amount_s, record.amount_b, record.block_number);
                self.store.update_order(&order)?;
            }
            None => {
                tracing::warn!(
                    order = ?record.order_hash,
                    "cancel for an order this relay has never seen"
                );
            }
        }
        Ok(())
    }

    /// Terminates every order of `owner` with `valid_since < cutoff` that is
    /// not already terminal.
    pub fn apply_cutoff(&self, record: CutoffRecord) -> Result<usize> {
        self.store.record_cutoff(&record)?;
        self.sweep_owner(record.owner, record.cutoff, record.block_number, None)
    }

    /// Like [`Self::apply_cutoff`], restricted to one unordered token pair.
    pub fn apply_cutoff_pair(&self, record: CutoffRecord) -> Result<usize> {
        let pair = record.pair.ok_or(Error::Generic(
            "pair cutoff record carries no token pair",
        ))?;
        self.store.record_cutoff(&record)?;
        self.sweep_owner(
            record.owner,
            record.cutoff,
            record.block_number,
            Some(unordered_pair(pair.0, pair.1)),
        )
    }

    /// Journals a full ring settlement.
    pub fn apply_ring_mined(&self, record: RingMinedRecord) -> Result<()> {
        if !self.store.record_ring_mined(&record)? {
            tracing::debug!(event = ?record.event_id, "ring settlement already recorded");
        }
        Ok(())
    }

    /// Rewinds every fill and cancel recorded at `block_number` or above,
    /// restoring the affected orders' residuals exactly.
    pub fn apply_fork_rewind(&self, block_number: u64) -> Result<()> {
        let batch = self
            .store
            .drain_events_above(block_number.saturating_sub(1))?;
        tracing::warn!(
            block_number,
            fills = batch.fills.len(),
            cancels = batch.cancels.len(),
            "rewinding chain state"
        );
        for fill in batch.fills {
            let _guard = self.locks.lock(fill.order_hash);
            if let Some(mut order) = self.store.get_order(fill.order_hash)? {
                order.rollback_fill(fill.amount_s, fill.amount_b);
                self.store.update_order(&order)?;
            }
        }
        for cancel in batch.cancels {
            let _guard = self.locks.lock(cancel.order_hash);
            if let Some(mut order) = self.store.get_order(cancel.order_hash)? {
                order.rollback_cancel(cancel.amount_s, cancel.amount_b);
                self.store.update_order(&order)?;
            }
        }
        Ok(())
    }

    fn sweep_owner(
        &self,
        owner: Address,
        cutoff: u64,
        block_number: u64,
        pair: Option<(Address, Address)>,
    ) -> Result<usize> {
        let mut swept = 0;
        for mut order in self.store.owner_orders(owner)? {
            if order.status.is_terminal() {
                continue;
            }
            if order.raw_order.valid_since >= U256::from(cutoff) {
                continue;
            }
            if let Some(pair) = pair {
                let order_pair = unordered_pair(
                    order.raw_order.token_s,
                    order.raw_order.token_b,
                );
                if order_pair != pair {
                    continue;
                }
            }
            let _guard = self.locks.lock(order.raw_order.hash);
            order.status = OrderStatus::Cutoff;
            order.updated_block = order.updated_block.max(block_number);
            self.store.update_order(&order)?;
            swept += 1;
        }
        tracing::info!(?owner, cutoff, swept, "cutoff sweep finished");
        Ok(swept)
    }
}

fn sort_by_price(orders: &mut [OrderState]) {
    orders.sort_by(|a, b| {
        a.raw_order
            .sell_price()
            .cmp(&b.raw_order.sell_price())
            .then_with(|| a.raw_order.valid_since.cmp(&b.raw_order.valid_since))
            .then_with(|| a.raw_order.hash.cmp(&b.raw_order.hash))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_relayer_store::InMemoryStore;
    use ring_relayer_types::test_support::{signed_order, OrderParams};

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn manager() -> Arc<OrderManager<InMemoryStore>> {
        OrderManager::new(InMemoryStore::default())
    }

    fn order(amount_s: u64, amount_b: u64, seed: u8) -> RawOrder {
        signed_order(OrderParams {
            owner_seed: seed,
            amount_s: U256::from(amount_s) * U256::exp10(18),
            amount_b: U256::from(amount_b) * U256::exp10(18),
            ..OrderParams::default()
        })
    }

    fn fill_of(order: &RawOrder, amount_s: U256, amount_b: U256, block: u64, nonce: u8) -> FillRecord {
        FillRecord {
            block_number: block,
            log_index: 0,
            event_id: H256::from([nonce; 32]),
            order_hash: order.hash,
            ring_hash: H256::from([0xEE; 32]),
            owner: order.owner,
            amount_s,
            amount_b,
        }
    }

    #[test]
    fn submission_is_idempotent_by_hash() {
        let om = manager();
        let raw = order(1000, 100, 1);
        assert_eq!(om.submit_order(raw.clone()).unwrap(), SubmitAck::Accepted);
        assert_eq!(om.submit_order(raw.clone()).unwrap(), SubmitAck::Duplicate);
        // Still exactly one live order.
        let book = om
            .get_order_book(raw.protocol, raw.token_s, raw.token_b, 10)
            .unwrap();
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn equal_hash_different_content_is_invalid() {
        let om = manager();
        let raw = order(1000, 100, 1);
        om.submit_order(raw.clone()).unwrap();
        let mut forged = order(2000, 100, 1);
        forged.hash = raw.hash;
        assert!(matches!(
            om.submit_order(forged),
            Err(Error::InvalidOrder { .. })
        ));
    }

    #[test]
    fn rejected_orders_never_reach_the_book() {
        let om = manager();
        let mut raw = order(1000, 100, 1);
        raw.amount_s = U256::zero();
        assert!(om.submit_order(raw).is_err());
    }

    #[test]
    fn book_sorts_ascending_by_sell_price() {
        let om = manager();
        let cheap = order(1000, 100, 1); // sPrice 10
        let pricey = order(3000, 100, 2); // sPrice 30
        let mid = order(2000, 100, 3); // sPrice 20
        for raw in [&pricey, &cheap, &mid] {
            om.submit_order((*raw).clone()).unwrap();
        }
        let book = om
            .get_order_book(cheap.protocol, cheap.token_s, cheap.token_b, 10)
            .unwrap();
        let hashes: Vec<_> = book.iter().map(|o| o.raw_order.hash).collect();
        assert_eq!(hashes, vec![cheap.hash, mid.hash, pricey.hash]);
    }

    #[test]
    fn miner_orders_skip_exhausted_and_excluded() {
        let om = manager();
        let a = order(1000, 100, 1);
        let b = order(1000, 100, 2);
        let c = order(1000, 100, 3);
        for raw in [&a, &b, &c] {
            om.submit_order((*raw).clone()).unwrap();
        }
        // Exhaust `a` completely.
        om.apply_fill(fill_of(&a, a.amount_s, a.amount_b, 100, 1))
            .unwrap();
        let exclude = HashSet::from([b.hash]);
        let orders = om
            .miner_orders(a.protocol, a.token_s, a.token_b, 10, &exclude)
            .unwrap();
        let hashes: Vec<_> = orders.iter().map(|o| o.raw_order.hash).collect();
        assert_eq!(hashes, vec![c.hash]);
    }

    #[test]
    fn miner_orders_skip_expired_orders() {
        let om = manager();
        let expired = signed_order(OrderParams {
            owner_seed: 1,
            valid_until: 1_000,
            ..OrderParams::default()
        });
        om.submit_order(expired.clone()).unwrap();
        let orders = om
            .miner_orders(
                expired.protocol,
                expired.token_s,
                expired.token_b,
                10,
                &HashSet::new(),
            )
            .unwrap();
        assert!(orders.is_empty());
        // The stored status is still NEW; expiry is a read-time overlay.
        let state = om.get_order_by_hash(expired.hash).unwrap().unwrap();
        assert_eq!(state.status, OrderStatus::New);
    }

    #[test]
    fn fills_are_idempotent_by_event_id() {
        let om = manager();
        let raw = order(1000, 100, 1);
        om.submit_order(raw.clone()).unwrap();
        let record = fill_of(&raw, U256::exp10(18), U256::exp10(17), 100, 1);
        om.apply_fill(record.clone()).unwrap();
        om.apply_fill(record).unwrap();
        let state = om.get_order_by_hash(raw.hash).unwrap().unwrap();
        assert_eq!(state.dealt_amount_s, U256::exp10(18));
        assert_eq!(state.status, OrderStatus::Partial);
    }

    #[test]
    fn cutoff_boundary_is_strict() {
        let om = manager();
        let raw = signed_order(OrderParams {
            owner_seed: 1,
            valid_since: 500,
            ..OrderParams::default()
        });
        om.submit_order(raw.clone()).unwrap();

        // Cutoff at exactly valid_since leaves the order alone.
        let swept = om
            .apply_cutoff(CutoffRecord {
                block_number: 10,
                log_index: 0,
                owner: raw.owner,
                cutoff: 500,
                pair: None,
            })
            .unwrap();
        assert_eq!(swept, 0);

        // One second later it terminates.
        let swept = om
            .apply_cutoff(CutoffRecord {
                block_number: 11,
                log_index: 0,
                owner: raw.owner,
                cutoff: 501,
                pair: None,
            })
            .unwrap();
        assert_eq!(swept, 1);
        let state = om.get_order_by_hash(raw.hash).unwrap().unwrap();
        assert_eq!(state.status, OrderStatus::Cutoff);
    }

    #[test]
    fn pair_cutoff_only_sweeps_the_matching_pair() {
        let om = manager();
        let on_pair = signed_order(OrderParams {
            owner_seed: 1,
            valid_since: 100,
            ..OrderParams::default()
        });
        let off_pair = signed_order(OrderParams {
            owner_seed: 1,
            valid_since: 100,
            token_s: addr(0x0A),
            token_b: addr(0x0B),
            ..OrderParams::default()
        });
        om.submit_order(on_pair.clone()).unwrap();
        om.submit_order(off_pair.clone()).unwrap();

        let swept = om
            .apply_cutoff_pair(CutoffRecord {
                block_number: 10,
                log_index: 0,
                owner: on_pair.owner,
                cutoff: 10_000,
                // The pair matches regardless of orientation.
                pair: Some((on_pair.token_b, on_pair.token_s)),
            })
            .unwrap();
        assert_eq!(swept, 1);
        let untouched = om.get_order_by_hash(off_pair.hash).unwrap().unwrap();
        assert_eq!(untouched.status, OrderStatus::New);
    }

    #[test]
    fn fork_rewind_restores_residuals_exactly() {
        let om = manager();
        let raw = order(1000, 100, 1);
        om.submit_order(raw.clone()).unwrap();

        // Two fills at block 100, one at block 101.
        om.apply_fill(fill_of(&raw, U256::exp10(18), U256::exp10(17), 100, 1))
            .unwrap();
        om.apply_fill(fill_of(&raw, U256::exp10(18), U256::exp10(17), 100, 2))
            .unwrap();
        om.apply_fill(fill_of(&raw, U256::exp10(19), U256::exp10(18), 101, 3))
            .unwrap();

        om.apply_fork_rewind(101).unwrap();
        let state = om.get_order_by_hash(raw.hash).unwrap().unwrap();
        // Block-100 effects intact, block-101 fill undone.
        assert_eq!(state.dealt_amount_s, U256::exp10(18) * U256::from(2));
        assert_eq!(state.dealt_amount_b, U256::exp10(17) * U256::from(2));

        // Ingestion resumes above the fork point with a fresh event.
        om.apply_fill(fill_of(&raw, U256::exp10(19), U256::exp10(18), 102, 3))
            .unwrap();
        let state = om.get_order_by_hash(raw.hash).unwrap().unwrap();
        assert_eq!(state.dealt_amount_s, U256::exp10(18) * U256::from(2) + U256::exp10(19));
    }

    #[test]
    fn fill_then_rewind_is_a_round_trip() {
        let om = manager();
        let raw = order(1000, 100, 1);
        om.submit_order(raw.clone()).unwrap();
        let before = om.get_order_by_hash(raw.hash).unwrap().unwrap();
        om.apply_fill(fill_of(&raw, U256::exp10(18), U256::exp10(17), 50, 1))
            .unwrap();
        om.apply_fork_rewind(50).unwrap();
        let after = om.get_order_by_hash(raw.hash).unwrap().unwrap();
        assert_eq!(before.dealt_amount_s, after.dealt_amount_s);
        assert_eq!(before.dealt_amount_b, after.dealt_amount_b);
        assert_eq!(before.status, after.status);
    }

    #[test]
    fn fill_pages_are_served_through_the_manager() {
        let om = manager();
        let raw = order(1000, 100, 1);
        om.submit_order(raw.clone()).unwrap();
        for i in 0..3u8 {
            om.apply_fill(fill_of(
                &raw,
                U256::exp10(18),
                U256::exp10(17),
                100 + i as u64,
                i + 1,
            ))
            .unwrap();
        }
        let page = om
            .fills_page_query(
                &FillQuery {
                    order_hash: Some(raw.hash),
                    ..Default::default()
                },
                PageRequest::new(0, 2),
            )
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
    }
}

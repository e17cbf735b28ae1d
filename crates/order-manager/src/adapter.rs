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

//! The event ingress adapter.
//!
//! One serialized consumer pulls typed events off the extractor channel and
//! turns them into order-state mutations. Fork handling is cooperatively
//! serialized against matcher ticks through the [`ForkGuard`]: the adapter
//! holds the write side for the duration of a rewind, matcher ticks hold
//! the read side, so no tick overlaps a rewind.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use ring_relayer_store::{
    CancelRecord, CutoffRecord, EventJournalStore, FillRecord, OrderStore,
    RingMinedRecord,
};
use ring_relayer_types::ChainEvent;
use ring_relayer_utils::Result;

use crate::OrderManager;

/// Serializes fork rewinds against matcher ticks.
///
/// A thin wrapper so the two sides cannot be mixed up: the adapter rewinds
/// under [`ForkGuard::begin_rewind`], the matcher ticks under
/// [`ForkGuard::hold_for_tick`].
#[derive(Debug, Default)]
pub struct ForkGuard {
    inner: tokio::sync::RwLock<()>,
}

impl ForkGuard {
    /// Creates an unlocked guard.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Exclusive access for the duration of a rewind.
    pub async fn begin_rewind(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }

    /// Shared access for the duration of one matcher tick.
    pub async fn hold_for_tick(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }
}

/// Translates extractor events into order book mutations.
pub struct EventAdapter<S> {
    manager: Arc<OrderManager<S>>,
    fork_guard: Arc<ForkGuard>,
}

impl<S> EventAdapter<S>
where
    S: OrderStore + EventJournalStore + 'static,
{
    /// Creates the adapter over the shared book and fork guard.
    pub fn new(manager: Arc<OrderManager<S>>, fork_guard: Arc<ForkGuard>) -> Self {
        Self {
            manager,
            fork_guard,
        }
    }

    /// Consumes the event stream until it closes or shutdown is signalled.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<ChainEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        tracing::warn!("extractor channel closed, adapter stopping");
                        break;
                    };
                    if let Err(e) = self.apply(event).await {
                        tracing::error!("error while applying chain event: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("event adapter shutting down");
                    break;
                }
            }
        }
    }

    /// Applies one event in arrival order.
    pub async fn apply(&self, event: ChainEvent) -> Result<()> {
        match event {
            ChainEvent::OrderPlaced { order, .. } => {
                match self.manager.submit_order(*order) {
                    Ok(ack) => tracing::debug!(?ack, "order ingested"),
                    Err(e) => tracing::warn!("order rejected at ingress: {}", e),
                }
            }
            ChainEvent::Fill {
                meta,
                event_id,
                order_hash,
                ring_hash,
                amount_s,
                amount_b,
            } => {
                let owner = self
                    .manager
                    .get_order_by_hash(order_hash)?
                    .map(|o| o.raw_order.owner)
                    .unwrap_or_default();
                self.manager.apply_fill(FillRecord {
                    block_number: meta.block_number,
                    log_index: meta.log_index,
                    event_id,
                    order_hash,
                    ring_hash,
                    owner,
                    amount_s,
                    amount_b,
                })?;
            }
            ChainEvent::Cancel {
                meta,
                event_id,
                order_hash,
                amount_s,
                amount_b,
            } => {
                let owner = self
                    .manager
                    .get_order_by_hash(order_hash)?
                    .map(|o| o.raw_order.owner)
                    .unwrap_or_default();
                self.manager.apply_cancel(CancelRecord {
                    block_number: meta.block_number,
                    log_index: meta.log_index,
                    event_id,
                    order_hash,
                    owner,
                    amount_s,
                    amount_b,
                })?;
            }
            ChainEvent::Cutoff { meta, owner, cutoff } => {
                self.manager.apply_cutoff(CutoffRecord {
                    block_number: meta.block_number,
                    log_index: meta.log_index,
                    owner,
                    cutoff,
                    pair: None,
                })?;
            }
            ChainEvent::CutoffPair {
                meta,
                owner,
                token_a,
                token_b,
                cutoff,
            } => {
                self.manager.apply_cutoff_pair(CutoffRecord {
                    block_number: meta.block_number,
                    log_index: meta.log_index,
                    owner,
                    cutoff,
                    pair: Some((token_a, token_b)),
                })?;
            }
            ChainEvent::RingMined {
                meta,
                event_id,
                ring_hash,
                miner,
                order_hashes,
            } => {
                self.manager.apply_ring_mined(RingMinedRecord {
                    block_number: meta.block_number,
                    log_index: meta.log_index,
                    event_id,
                    ring_hash,
                    miner,
                    order_hashes,
                })?;
            }
            ChainEvent::Fork { block_number } => {
                // No matcher tick runs while the write side is held.
                let _exclusive = self.fork_guard.begin_rewind().await;
                self.manager.apply_fork_rewind(block_number + 1)?;
                tracing::warn!(
                    resume_from = block_number + 1,
                    "fork rewind complete, resuming ingestion"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U256};
    use ring_relayer_store::InMemoryStore;
    use ring_relayer_types::test_support::{signed_order, OrderParams};
    use ring_relayer_types::{EventMeta, OrderStatus};

    fn harness() -> (
        EventAdapter<InMemoryStore>,
        Arc<OrderManager<InMemoryStore>>,
    ) {
        let manager = OrderManager::new(InMemoryStore::default());
        let adapter = EventAdapter::new(manager.clone(), ForkGuard::new());
        (adapter, manager)
    }

    #[tokio::test]
    async fn events_drive_the_order_lifecycle() {
        let (adapter, manager) = harness();
        let raw = signed_order(OrderParams::default());

        adapter
            .apply(ChainEvent::OrderPlaced {
                meta: EventMeta::new(0, 0),
                order: Box::new(raw.clone()),
            })
            .await
            .unwrap();

        adapter
            .apply(ChainEvent::Fill {
                meta: EventMeta::new(100, 0),
                event_id: H256::from([1u8; 32]),
                order_hash: raw.hash,
                ring_hash: H256::from([9u8; 32]),
                amount_s: U256::exp10(20),
                amount_b: U256::exp10(19),
            })
            .await
            .unwrap();

        let state = manager.get_order_by_hash(raw.hash).unwrap().unwrap();
        assert_eq!(state.status, OrderStatus::Partial);
        assert_eq!(state.dealt_amount_s, U256::exp10(20));
    }

    #[tokio::test]
    async fn fork_event_rewinds_higher_blocks_only() {
        let (adapter, manager) = harness();
        let raw = signed_order(OrderParams::default());
        adapter
            .apply(ChainEvent::OrderPlaced {
                meta: EventMeta::new(0, 0),
                order: Box::new(raw.clone()),
            })
            .await
            .unwrap();

        for (block, nonce) in [(100u64, 1u8), (101, 2)] {
            adapter
                .apply(ChainEvent::Fill {
                    meta: EventMeta::new(block, 0),
                    event_id: H256::from([nonce; 32]),
                    order_hash: raw.hash,
                    ring_hash: H256::from([9u8; 32]),
                    amount_s: U256::exp10(20),
                    amount_b: U256::exp10(19),
                })
                .await
                .unwrap();
        }

        adapter
            .apply(ChainEvent::Fork { block_number: 100 })
            .await
            .unwrap();

        let state = manager.get_order_by_hash(raw.hash).unwrap().unwrap();
        assert_eq!(state.dealt_amount_s, U256::exp10(20));
    }

    #[tokio::test]
    async fn run_loop_consumes_until_shutdown() {
        let (adapter, manager) = harness();
        let raw = signed_order(OrderParams::default());
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(adapter.run(rx, shutdown_rx));
        tx.send(ChainEvent::OrderPlaced {
            meta: EventMeta::new(0, 0),
            order: Box::new(raw.clone()),
        })
        .await
        .unwrap();

        // Let the adapter drain the channel, then stop it.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        assert!(manager.get_order_by_hash(raw.hash).unwrap().is_some());
    }
}

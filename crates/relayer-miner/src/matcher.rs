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

//! The periodic matching loop.
//!
//! One cooperative task per matcher. Every tick it pulls the top of both
//! book sides for each configured market, enumerates candidate 2-rings
//! (and 3-rings through configured bridge tokens), hydrates candidate legs
//! with on-chain balances, asks the evaluator, and forwards the best
//! admitted ring per market to the submitter. Legs committed to an
//! accepted ring are excluded from further candidates within the tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, H256};
use num_rational::BigRational;
use num_traits::Zero;
use tokio::sync::broadcast;

use ring_relayer_order_manager::{ForkGuard, OrderManager};
use ring_relayer_store::{EventJournalStore, OrderStore};
use ring_relayer_types::rational::rat_from_u256;
use ring_relayer_types::{FilledOrder, OrderState, Ring, RingReceipt};
use ring_relayer_utils::{Error, Result};

use crate::balance::BalanceProvider;
use crate::evaluator::{price_valid, ring_product_at_least_unit, Evaluator};
use crate::submitter::{RingSubmitter, SubmitOutcome};

/// Static wiring of one matcher instance.
#[derive(Debug, Clone)]
pub struct MatcherSettings {
    /// The settlement contract candidate legs must bind to.
    pub protocol: Address,
    /// Address of the protocol fee token.
    pub lrc_address: Address,
    /// Matched token pairs; both orientations are scanned.
    pub markets: Vec<(Address, Address)>,
    /// Bridge tokens extending candidates to 3-rings; empty disables them.
    pub bridge_tokens: Vec<Address>,
    /// Tick cadence.
    pub tick_interval: Duration,
    /// Book depth pulled per side and tick.
    pub match_depth: usize,
}

/// The timing-driven ring matcher.
pub struct TimingMatcher<S> {
    manager: Arc<OrderManager<S>>,
    evaluator: Arc<Evaluator>,
    submitter: Arc<dyn RingSubmitter>,
    balances: Arc<dyn BalanceProvider>,
    fork_guard: Arc<ForkGuard>,
    settings: MatcherSettings,
}

impl<S> TimingMatcher<S>
where
    S: OrderStore + EventJournalStore + 'static,
{
    /// Wires a matcher out of its collaborators.
    pub fn new(
        manager: Arc<OrderManager<S>>,
        evaluator: Arc<Evaluator>,
        submitter: Arc<dyn RingSubmitter>,
        balances: Arc<dyn BalanceProvider>,
        fork_guard: Arc<ForkGuard>,
        settings: MatcherSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            evaluator,
            submitter,
            balances,
            fork_guard,
            settings,
        })
    }

    /// Runs the matching loop until shutdown.
    ///
    /// A tick that exceeds twice the configured interval is aborted and the
    /// loop yields to the next tick.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let tick_deadline = self.settings.tick_interval * 2;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tokio::time::timeout(tick_deadline, self.tick()).await {
                        Ok(Ok(submitted)) if submitted > 0 => {
                            tracing::info!(submitted, "matcher tick finished");
                        }
                        Ok(Ok(_)) => {
                            tracing::trace!("matcher tick finished, nothing admitted");
                        }
                        Ok(Err(e)) => {
                            tracing::error!("matcher tick failed: {}", e);
                        }
                        Err(_) => {
                            tracing::warn!(
                                "matcher tick exceeded twice its interval, aborted"
                            );
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("matcher shutting down");
                    break;
                }
            }
        }
    }

    /// One matching pass over every configured market.
    pub async fn tick(&self) -> Result<usize> {
        // No tick overlaps a fork rewind.
        let _guard = self.fork_guard.hold_for_tick().await;
        let mut in_flight: HashSet<H256> = HashSet::new();
        let mut submitted = 0usize;

        for (token_a, token_b) in self.settings.markets.clone() {
            let candidates =
                self.enumerate_candidates(token_a, token_b, &in_flight)?;
            let best = self.evaluate_candidates(candidates, &in_flight).await?;
            let Some((ring, receipt)) = best else {
                continue;
            };
            let leg_hashes: Vec<_> =
                ring.orders.iter().map(FilledOrder::order_hash).collect();
            match self.submitter.submit(&ring, &receipt).await {
                Ok(SubmitOutcome::Accepted { ring_hash }) => {
                    tracing::debug!(?ring_hash, "ring handed to the submitter");
                    in_flight.extend(leg_hashes);
                    submitted += 1;
                }
                Ok(SubmitOutcome::Rejected { reason }) => {
                    tracing::warn!(%reason, "submitter rejected the ring");
                }
                Err(e) => {
                    tracing::error!("submission failed: {}", e);
                }
            }
        }
        Ok(submitted)
    }

    fn enumerate_candidates(
        &self,
        token_a: Address,
        token_b: Address,
        in_flight: &HashSet<H256>,
    ) -> Result<Vec<Vec<OrderState>>> {
        let depth = self.settings.match_depth;
        let protocol = self.settings.protocol;
        let sells = self
            .manager
            .miner_orders(protocol, token_a, token_b, depth, in_flight)?;
        let buys = self
            .manager
            .miner_orders(protocol, token_b, token_a, depth, in_flight)?;

        let mut candidates = Vec::new();
        for sell in &sells {
            for buy in &buys {
                if price_valid(sell, buy) {
                    candidates.push(vec![sell.clone(), buy.clone()]);
                }
            }
        }

        for bridge in &self.settings.bridge_tokens {
            if *bridge == token_a || *bridge == token_b {
                continue;
            }
            let seconds = self
                .manager
                .miner_orders(protocol, token_b, *bridge, depth, in_flight)?;
            let thirds = self
                .manager
                .miner_orders(protocol, *bridge, token_a, depth, in_flight)?;
            for first in &sells {
                for second in &seconds {
                    for third in &thirds {
                        if ring_product_at_least_unit(&[first, second, third]) {
                            candidates.push(vec![
                                first.clone(),
                                second.clone(),
                                third.clone(),
                            ]);
                        }
                    }
                }
            }
        }
        Ok(candidates)
    }

    async fn evaluate_candidates(
        &self,
        candidates: Vec<Vec<OrderState>>,
        in_flight: &HashSet<H256>,
    ) -> Result<Option<(Ring, RingReceipt)>> {
        let mut best: Option<(Ring, RingReceipt)> = None;
        for legs in candidates {
            if legs
                .iter()
                .any(|o| in_flight.contains(&o.raw_order.hash))
            {
                continue;
            }
            let mut ring = self.hydrate_ring(legs).await?;
            if ring
                .orders
                .iter()
                .any(|leg| leg.available_amount_s.is_zero())
            {
                continue;
            }
            match self.evaluator.compute_ring(&mut ring) {
                Ok(()) => {}
                Err(
                    e @ (Error::RingProductUnprofitable
                    | Error::RateExceedsOriginal
                    | Error::CvsThresholdExceeded { .. }),
                ) => {
                    tracing::debug!("candidate ring rejected: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            }
            let receipt = self.evaluator.evaluate_received(&ring).await?;
            if receipt.received <= BigRational::zero() {
                tracing::debug!(
                    received = %receipt.received,
                    "candidate ring earns nothing after cost"
                );
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |(_, current)| receipt.received > current.received);
            if better {
                best = Some((ring, receipt));
            }
        }
        Ok(best)
    }

    /// Wraps candidate legs with the owners' current balances.
    async fn hydrate_ring(&self, legs: Vec<OrderState>) -> Result<Ring> {
        let mut filled = Vec::with_capacity(legs.len());
        for order in legs {
            let raw = &order.raw_order;
            let token_balance = self
                .balances
                .token_balance(raw.token_s, raw.owner)
                .await?;
            let lrc_balance = self
                .balances
                .token_balance(self.settings.lrc_address, raw.owner)
                .await?;
            let available_s = rat_from_u256(
                order.remaining_amount_s().min(token_balance),
            );
            let available_b = rat_from_u256(order.remaining_amount_b());
            filled.push(FilledOrder::new(
                order,
                available_s,
                available_b,
                rat_from_u256(lrc_balance),
            ));
        }
        Ok(Ring::new(filled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use ethers::types::U256;
    use num_bigint::BigInt;
    use num_traits::One;

    use ring_price_oracle_backends::DummyLegalOracle;
    use ring_relayer_order_manager::OrderManager;
    use ring_relayer_store::{InMemoryStore, QueueStore};
    use ring_relayer_types::test_support::{signed_order, OrderParams};
    use ring_relayer_types::RawOrder;

    use crate::balance::StaticBalanceProvider;
    use crate::gas::FixedGasOracle;
    use crate::submitter::{QueueSubmitter, SubmittedRing, SUBMITTED_RINGS_QUEUE};

    const LRC: u8 = 1;
    const WETH: u8 = 2;
    const RDN: u8 = 3;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn order(token_s: u8, token_b: u8, amount_s: u64, amount_b: u64, seed: u8) -> RawOrder {
        signed_order(OrderParams {
            owner_seed: seed,
            token_s: addr(token_s),
            token_b: addr(token_b),
            amount_s: U256::from(amount_s) * U256::exp10(18),
            amount_b: U256::from(amount_b) * U256::exp10(18),
            ..OrderParams::default()
        })
    }

    struct Harness {
        matcher: Arc<TimingMatcher<InMemoryStore>>,
        manager: Arc<OrderManager<InMemoryStore>>,
        store: InMemoryStore,
    }

    fn harness(balances: StaticBalanceProvider, bridge_tokens: Vec<Address>) -> Harness {
        let store = InMemoryStore::default();
        let manager = OrderManager::new(store.clone());
        let prices = HashMap::from([
            (addr(LRC), BigRational::one()),
            (addr(WETH), BigRational::from_integer(BigInt::from(10))),
            (addr(RDN), BigRational::one()),
        ]);
        let oracle = Arc::new(DummyLegalOracle::new(prices, BigRational::zero()));
        let evaluator = Arc::new(Evaluator::new(
            oracle,
            Arc::new(FixedGasOracle::new(U256::one())),
            addr(LRC),
            1_000_000,
            0.0,
            1.0,
            &HashMap::from([(2, 400_000), (3, 400_000), (4, 400_000)]),
        ));
        let submitter = Arc::new(QueueSubmitter::new(store.clone()));
        let settings = MatcherSettings {
            protocol: OrderParams::default().protocol,
            lrc_address: addr(LRC),
            markets: vec![(addr(LRC), addr(WETH))],
            bridge_tokens,
            tick_interval: Duration::from_millis(100),
            match_depth: 10,
        };
        let matcher = TimingMatcher::new(
            manager.clone(),
            evaluator,
            submitter,
            Arc::new(balances),
            ForkGuard::new(),
            settings,
        );
        Harness {
            matcher,
            manager,
            store,
        }
    }

    fn queued(store: &InMemoryStore) -> Vec<SubmittedRing> {
        let mut rings = Vec::new();
        while let Some(ring) = store.dequeue_item(SUBMITTED_RINGS_QUEUE).unwrap() {
            rings.push(ring);
        }
        rings
    }

    #[tokio::test]
    async fn a_closing_pair_is_matched_and_submitted() {
        let h = harness(
            StaticBalanceProvider::uniform(U256::exp10(30)),
            Vec::new(),
        );
        h.manager
            .submit_order(order(LRC, WETH, 1000, 100, 1))
            .unwrap();
        h.manager
            .submit_order(order(WETH, LRC, 100, 1000, 2))
            .unwrap();

        let submitted = h.matcher.tick().await.unwrap();
        assert_eq!(submitted, 1);
        let rings = queued(&h.store);
        assert_eq!(rings.len(), 1);
        let ring = &rings[0];
        assert_eq!(ring.legs.len(), 2);
        // Adjacent fills chain through the ring.
        assert_eq!(ring.legs[0].fill_amount_b, ring.legs[1].fill_amount_s);
    }

    #[tokio::test]
    async fn non_closing_prices_produce_no_rings() {
        let h = harness(
            StaticBalanceProvider::uniform(U256::exp10(30)),
            Vec::new(),
        );
        h.manager
            .submit_order(order(LRC, WETH, 1000, 100, 1))
            .unwrap();
        // This ask wants far more LRC than the first order sells.
        h.manager
            .submit_order(order(WETH, LRC, 50, 1000, 2))
            .unwrap();

        let submitted = h.matcher.tick().await.unwrap();
        assert_eq!(submitted, 0);
        assert!(queued(&h.store).is_empty());
    }

    #[tokio::test]
    async fn drained_balances_keep_orders_out_of_rings() {
        let h = harness(StaticBalanceProvider::uniform(U256::zero()), Vec::new());
        h.manager
            .submit_order(order(LRC, WETH, 1000, 100, 1))
            .unwrap();
        h.manager
            .submit_order(order(WETH, LRC, 100, 1000, 2))
            .unwrap();

        let submitted = h.matcher.tick().await.unwrap();
        assert_eq!(submitted, 0);
        assert!(queued(&h.store).is_empty());
    }

    #[tokio::test]
    async fn bridge_tokens_extend_matching_to_three_rings() {
        let h = harness(
            StaticBalanceProvider::uniform(U256::exp10(30)),
            vec![addr(RDN)],
        );
        h.manager
            .submit_order(order(LRC, WETH, 1000, 100, 1))
            .unwrap();
        h.manager
            .submit_order(order(WETH, RDN, 100, 200, 2))
            .unwrap();
        h.manager
            .submit_order(order(RDN, LRC, 200, 1000, 3))
            .unwrap();

        let submitted = h.matcher.tick().await.unwrap();
        assert_eq!(submitted, 1);
        let rings = queued(&h.store);
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].legs.len(), 3);
        assert_eq!(rings[0].legs[0].fill_amount_b, rings[0].legs[1].fill_amount_s);
        assert_eq!(rings[0].legs[1].fill_amount_b, rings[0].legs[2].fill_amount_s);
    }
}

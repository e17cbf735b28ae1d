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

//! The submission hand-off boundary.
//!
//! An admitted ring leaves the matcher as a [`SubmittedRing`]: per-leg fill
//! volumes with the fee selection resolved, plus the gas budget and price
//! the projection used. The shipped implementation parks these records in
//! the store's FIFO queue; encoding them for the settlement contract and
//! shipping the transaction is the downstream queue consumer's concern.

use async_trait::async_trait;
use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};

use ring_relayer_store::QueueStore;
use ring_relayer_types::order::current_timestamp;
use ring_relayer_types::rational::rat_to_u256_round;
use ring_relayer_types::{Ring, RingReceipt};
use ring_relayer_utils::Result;

/// Name of the queue admitted rings are parked in.
pub const SUBMITTED_RINGS_QUEUE: &str = "submitted_rings";

/// Which fee model the submitter resolved for a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeSelection {
    /// The scaled fee-token fee.
    LrcFee,
    /// The margin-split saving.
    MarginSplit,
}

/// One leg of a submitted ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedLeg {
    /// The underlying order.
    pub order_hash: H256,
    /// Allocated sell-side volume, rounded to base units.
    pub fill_amount_s: U256,
    /// Allocated buy-side volume, rounded to base units.
    pub fill_amount_b: U256,
    /// The fee-token fee, rounded to base units.
    pub lrc_fee: U256,
    /// The margin-split saving, rounded to base units of the saved token.
    pub fee_s: U256,
    /// The larger fee candidate by legal value.
    pub fee_selection: FeeSelection,
}

/// An admitted ring on its way to the settlement contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedRing {
    /// Content hash over the leg order hashes.
    pub ring_hash: H256,
    /// The legs in cycle order.
    pub legs: Vec<SubmittedLeg>,
    /// Gas budget used in the income projection.
    pub gas: U256,
    /// Gas price used in the income projection.
    pub gas_price: U256,
    /// Wall-clock seconds when the ring was admitted.
    pub created_at: u64,
}

/// Outcome of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The ring was accepted downstream.
    Accepted {
        /// Hash of the accepted ring.
        ring_hash: H256,
    },
    /// The ring was refused; the matcher releases its legs.
    Rejected {
        /// Reason reported by the submitter.
        reason: String,
    },
}

/// Downstream acceptor of admitted rings.
#[async_trait]
pub trait RingSubmitter: Send + Sync {
    /// Hands one evaluated ring downstream.
    async fn submit(&self, ring: &Ring, receipt: &RingReceipt) -> Result<SubmitOutcome>;
}

/// Parks admitted rings in the store's FIFO queue.
pub struct QueueSubmitter<Q> {
    store: Q,
}

impl<Q> QueueSubmitter<Q>
where
    Q: QueueStore<SubmittedRing>,
{
    /// Wraps a queue backend.
    pub fn new(store: Q) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<Q> RingSubmitter for QueueSubmitter<Q>
where
    Q: QueueStore<SubmittedRing>,
{
    async fn submit(&self, ring: &Ring, receipt: &RingReceipt) -> Result<SubmitOutcome> {
        if !(2..=4).contains(&ring.size()) {
            return Ok(SubmitOutcome::Rejected {
                reason: format!("unsupported ring size {}", ring.size()),
            });
        }
        if !ring.is_closed() {
            return Ok(SubmitOutcome::Rejected {
                reason: "ring does not close its token loop".into(),
            });
        }
        let record = SubmittedRing {
            ring_hash: ring.hash(),
            legs: ring
                .orders
                .iter()
                .map(|leg| SubmittedLeg {
                    order_hash: leg.order_hash(),
                    fill_amount_s: rat_to_u256_round(&leg.fill_amount_s),
                    fill_amount_b: rat_to_u256_round(&leg.fill_amount_b),
                    lrc_fee: rat_to_u256_round(&leg.lrc_fee),
                    fee_s: rat_to_u256_round(&leg.fee_s),
                    fee_selection: if leg.legal_lrc_fee < leg.legal_fee_s {
                        FeeSelection::MarginSplit
                    } else {
                        FeeSelection::LrcFee
                    },
                })
                .collect(),
            gas: receipt.gas,
            gas_price: receipt.gas_price,
            created_at: current_timestamp(),
        };
        let ring_hash = record.ring_hash;
        self.store.enqueue_item(SUBMITTED_RINGS_QUEUE, record)?;
        tracing::info!(?ring_hash, received = %receipt.received, "ring parked for submission");
        Ok(SubmitOutcome::Accepted { ring_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;
    use num_rational::BigRational;
    use num_traits::Zero;
    use ring_relayer_store::InMemoryStore;
    use ring_relayer_types::test_support::{signed_order, OrderParams};
    use ring_relayer_types::{FilledOrder, OrderState};

    fn leg(token_s: u8, token_b: u8, seed: u8) -> FilledOrder {
        let order = signed_order(OrderParams {
            owner_seed: seed,
            token_s: Address::from([token_s; 20]),
            token_b: Address::from([token_b; 20]),
            ..OrderParams::default()
        });
        FilledOrder::from_residual(OrderState::new(order), BigRational::zero())
    }

    fn receipt() -> RingReceipt {
        RingReceipt {
            gas: U256::from(400_000),
            gas_price: U256::from(30_000_000_000u64),
            cost_legal: BigRational::zero(),
            legal_fee: BigRational::zero(),
            received: BigRational::zero(),
        }
    }

    #[tokio::test]
    async fn accepted_rings_land_in_the_queue() {
        let store = InMemoryStore::default();
        let submitter = QueueSubmitter::new(store.clone());
        let ring = Ring::new(vec![leg(1, 2, 1), leg(2, 1, 2)]);

        let outcome = submitter.submit(&ring, &receipt()).await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                ring_hash: ring.hash()
            }
        );
        let parked: Option<SubmittedRing> =
            store.dequeue_item(SUBMITTED_RINGS_QUEUE).unwrap();
        let parked = parked.unwrap();
        assert_eq!(parked.ring_hash, ring.hash());
        assert_eq!(parked.legs.len(), 2);
        assert_eq!(parked.gas, U256::from(400_000));
    }

    #[tokio::test]
    async fn open_loops_are_rejected() {
        let store = InMemoryStore::default();
        let submitter = QueueSubmitter::new(store.clone());
        let ring = Ring::new(vec![leg(1, 2, 1), leg(3, 1, 2)]);
        let outcome = submitter.submit(&ring, &receipt()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected { .. }));
        let parked: Option<SubmittedRing> =
            store.dequeue_item(SUBMITTED_RINGS_QUEUE).unwrap();
        assert!(parked.is_none());
    }
}

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

//! Candidate rings and the per-evaluation scratch state of their legs.
//!
//! A [`Ring`] borrows a snapshot of its legs for one matcher iteration; legs
//! reference their underlying order by value and hash, never by pointer, so
//! no cyclic ownership exists. Rings are ephemeral messages handed to the
//! submitter once admitted.

use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use num_rational::BigRational;
use num_traits::Zero;

use crate::order::OrderState;
use crate::rational::rat_from_u256;

/// One leg of a candidate ring: an order snapshot plus the mutable scratch
/// fields the evaluator fills in.
///
/// Created on each matching pass and never persisted.
#[derive(Debug, Clone)]
pub struct FilledOrder {
    /// Snapshot of the underlying live order.
    pub order: OrderState,
    /// Sell-side volume the owner can actually settle right now.
    pub available_amount_s: BigRational,
    /// Buy-side volume still wanted.
    pub available_amount_b: BigRational,
    /// The owner's spendable fee-token balance.
    pub available_lrc_balance: BigRational,
    /// Rate-reduced sell price, `amount_s / amount_b · ρ`.
    pub s_price: BigRational,
    /// Inverse of `s_price` after reduction.
    pub b_price: BigRational,
    /// Rate-reduced sell amount used by the deviation test.
    pub rate_amount_s: BigRational,
    /// Allocated sell-side fill volume.
    pub fill_amount_s: BigRational,
    /// Allocated buy-side fill volume.
    pub fill_amount_b: BigRational,
    /// Margin saving expressed in the saved token.
    pub fee_s: BigRational,
    /// Scaled fee-token fee, clamped to the owner's balance.
    pub lrc_fee: BigRational,
    /// Legal-currency value of the margin-split saving.
    pub legal_fee_s: BigRational,
    /// Legal-currency value of the fee-token fee.
    pub legal_lrc_fee: BigRational,
}

impl FilledOrder {
    /// Wraps an order snapshot with the balances hydrated by the matcher.
    pub fn new(
        order: OrderState,
        available_amount_s: BigRational,
        available_amount_b: BigRational,
        available_lrc_balance: BigRational,
    ) -> Self {
        Self {
            order,
            available_amount_s,
            available_amount_b,
            available_lrc_balance,
            s_price: BigRational::zero(),
            b_price: BigRational::zero(),
            rate_amount_s: BigRational::zero(),
            fill_amount_s: BigRational::zero(),
            fill_amount_b: BigRational::zero(),
            fee_s: BigRational::zero(),
            lrc_fee: BigRational::zero(),
            legal_fee_s: BigRational::zero(),
            legal_lrc_fee: BigRational::zero(),
        }
    }

    /// Wraps an order snapshot with its full residual as the available
    /// volume. Used by tests and by callers that already capped balances.
    pub fn from_residual(order: OrderState, available_lrc_balance: BigRational) -> Self {
        let available_s = rat_from_u256(order.remaining_amount_s());
        let available_b = rat_from_u256(order.remaining_amount_b());
        Self::new(order, available_s, available_b, available_lrc_balance)
    }

    /// The hash identifying the underlying order.
    pub fn order_hash(&self) -> H256 {
        self.order.raw_order.hash
    }
}

/// An ordered cycle of two or more orders that closes a token loop.
#[derive(Debug, Clone)]
pub struct Ring {
    /// The legs, in cycle order.
    pub orders: Vec<FilledOrder>,
    /// Uniform rate-reduction factor in `(0, 1]`, set by the evaluator.
    pub reduced_rate: BigRational,
}

impl Ring {
    /// Builds a ring out of pre-hydrated legs.
    pub fn new(orders: Vec<FilledOrder>) -> Self {
        Self {
            orders,
            reduced_rate: BigRational::zero(),
        }
    }

    /// Number of legs.
    pub fn size(&self) -> usize {
        self.orders.len()
    }

    /// True when every leg's buy token feeds the next leg's sell token.
    pub fn is_closed(&self) -> bool {
        if self.orders.len() < 2 {
            return false;
        }
        self.orders.iter().enumerate().all(|(i, leg)| {
            let next = &self.orders[(i + 1) % self.orders.len()];
            leg.order.raw_order.token_b == next.order.raw_order.token_s
        })
    }

    /// Content hash over the leg order hashes, identifying the ring.
    pub fn hash(&self) -> H256 {
        let mut buf = Vec::with_capacity(self.orders.len() * 32);
        for leg in &self.orders {
            buf.extend_from_slice(leg.order_hash().as_bytes());
        }
        H256::from(keccak256(buf))
    }
}

/// The evaluator's economic projection for an admitted ring.
#[derive(Debug, Clone)]
pub struct RingReceipt {
    /// Gas budget for settling a ring of this size.
    pub gas: U256,
    /// Estimated gas price at evaluation time.
    pub gas_price: U256,
    /// Legal-currency settlement cost net of the subsidy.
    pub cost_legal: BigRational,
    /// Sum over legs of the larger fee candidate, in legal currency.
    pub legal_fee: BigRational,
    /// Projected miner net income after cost and wallet split.
    pub received: BigRational,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderState;
    use crate::test_support::{signed_order, OrderParams};
    use ethers::types::Address;

    fn leg(token_s: u8, token_b: u8) -> FilledOrder {
        let order = signed_order(OrderParams {
            token_s: Address::from([token_s; 20]),
            token_b: Address::from([token_b; 20]),
            ..OrderParams::default()
        });
        FilledOrder::from_residual(OrderState::new(order), BigRational::zero())
    }

    #[test]
    fn two_leg_cycle_closes() {
        let ring = Ring::new(vec![leg(1, 2), leg(2, 1)]);
        assert!(ring.is_closed());
    }

    #[test]
    fn broken_cycle_does_not_close() {
        let ring = Ring::new(vec![leg(1, 2), leg(3, 1)]);
        assert!(!ring.is_closed());
        let singleton = Ring::new(vec![leg(1, 1)]);
        assert!(!singleton.is_closed());
    }

    #[test]
    fn three_leg_cycle_closes() {
        let ring = Ring::new(vec![leg(1, 2), leg(2, 3), leg(3, 1)]);
        assert!(ring.is_closed());
    }

    #[test]
    fn ring_hash_depends_on_leg_order() {
        let a = Ring::new(vec![leg(1, 2), leg(2, 1)]);
        let b = Ring::new(vec![leg(2, 1), leg(1, 2)]);
        assert_ne!(a.hash(), b.hash());
    }
}

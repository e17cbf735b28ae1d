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

//! Signed participant orders and their live residual projections.

use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::{Address, RecoveryMessage, Signature, H256, U256, U64};
use ethers::utils::{hash_message, keccak256};
use num_rational::BigRational;
use serde::{Deserialize, Serialize};

use ring_relayer_utils::{Error, Result};

use crate::rational::ratio_of;

/// Seconds since the unix epoch, by the local wall clock.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The signed intent of a market participant to swap `token_s` for `token_b`.
///
/// Content-addressed by `hash`; authenticated by the `(v, r, s)` signature
/// over the hash, recoverable to `owner`. The wire rendering matches the
/// gateway JSON exactly: camel-cased names, `0x`-prefixed hex integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    /// Address of the settlement contract version this order binds to.
    pub protocol: Address,
    /// The order owner; fills debit this account.
    pub owner: Address,
    /// Content hash of the essential fields; the order's identity.
    pub hash: H256,
    /// Token offered for sale.
    pub token_s: Address,
    /// Token to be bought.
    pub token_b: Address,
    /// Amount of `token_s` offered.
    pub amount_s: U256,
    /// Amount of `token_b` asked for.
    pub amount_b: U256,
    /// Earliest settlement time, seconds since the epoch.
    pub valid_since: U256,
    /// Latest settlement time, seconds since the epoch.
    pub valid_until: U256,
    /// Offered fee denominated in the protocol fee token.
    pub lrc_fee: U256,
    /// Selects the fee model: cap the buy side instead of the sell side.
    pub buy_no_more_than_amount_b: bool,
    /// Share of the margin saving granted to the miner, in [0, 100].
    pub margin_split_percentage: u8,
    /// Signature recovery id.
    pub v: U64,
    /// Signature `r` component.
    pub r: H256,
    /// Signature `s` component.
    pub s: H256,
    /// Identifier of the wallet that produced the order.
    pub wallet_id: U256,
    /// Ephemeral key authorized to bind this order into a submission.
    pub auth_addr: Address,
    /// Private half of the ephemeral submission key.
    pub auth_private_key: H256,
}

impl RawOrder {
    /// Recomputes the content hash over the essential fields.
    ///
    /// The packing is position-fixed so the hash is a pure function of the
    /// order content: addresses as 20 bytes, integers as 32-byte big-endian
    /// words, flags as single bytes.
    pub fn generate_hash(&self) -> H256 {
        let mut buf = Vec::with_capacity(261);
        buf.extend_from_slice(self.protocol.as_bytes());
        buf.extend_from_slice(self.owner.as_bytes());
        buf.extend_from_slice(self.token_s.as_bytes());
        buf.extend_from_slice(self.token_b.as_bytes());
        buf.extend_from_slice(self.auth_addr.as_bytes());
        let mut word = [0u8; 32];
        for value in [
            self.wallet_id,
            self.amount_s,
            self.amount_b,
            self.valid_since,
            self.valid_until,
            self.lrc_fee,
        ] {
            value.to_big_endian(&mut word);
            buf.extend_from_slice(&word);
        }
        buf.push(u8::from(self.buy_no_more_than_amount_b));
        buf.push(self.margin_split_percentage);
        H256::from(keccak256(buf))
    }

    /// Recovers the signer of the order hash.
    pub fn signer(&self) -> Result<Address> {
        let signature = Signature {
            r: U256::from_big_endian(self.r.as_bytes()),
            s: U256::from_big_endian(self.s.as_bytes()),
            v: self.v.as_u64(),
        };
        let digest = hash_message(self.hash);
        Ok(signature.recover(RecoveryMessage::Hash(digest))?)
    }

    /// Full boundary validation of an inbound order.
    pub fn validate(&self) -> Result<()> {
        if self.amount_s.is_zero() || self.amount_b.is_zero() {
            return Err(Error::InvalidOrder {
                reason: "amountS and amountB must both be positive".into(),
            });
        }
        if self.valid_since > self.valid_until {
            return Err(Error::InvalidOrder {
                reason: "validSince exceeds validUntil".into(),
            });
        }
        if self.margin_split_percentage > 100 {
            return Err(Error::InvalidOrder {
                reason: "marginSplitPercentage exceeds 100".into(),
            });
        }
        if self.hash != self.generate_hash() {
            return Err(Error::InvalidOrder {
                reason: "order hash does not match its content".into(),
            });
        }
        let signer = self.signer().map_err(|_| Error::InvalidOrder {
            reason: "signature is not recoverable".into(),
        })?;
        if signer != self.owner {
            return Err(Error::InvalidOrder {
                reason: "signature does not recover to the owner".into(),
            });
        }
        Ok(())
    }

    /// The sell price `amount_s / amount_b` as an exact rational.
    pub fn sell_price(&self) -> BigRational {
        ratio_of(self.amount_s, self.amount_b)
    }

    /// The buy price `amount_b / amount_s` as an exact rational.
    pub fn buy_price(&self) -> BigRational {
        ratio_of(self.amount_b, self.amount_s)
    }

    /// True once `valid_until` has passed.
    pub fn is_expired(&self, now: u64) -> bool {
        self.valid_until < U256::from(now)
    }
}

/// Lifecycle of a live order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, no fill recorded yet.
    New,
    /// At least one fill recorded, residual remains.
    Partial,
    /// Residual exhausted through fills.
    Finished,
    /// Residual exhausted or invalidated through cancellation.
    Cancelled,
    /// Invalidated by an owner cutoff sweep.
    Cutoff,
    /// Past `valid_until`; derived at read time, never stored.
    Expired,
    /// Bound into an in-flight ring submission.
    Pending,
}

impl OrderStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Cutoff | Self::Expired)
    }
}

/// Live projection of a [`RawOrder`]: the immutable intent plus residuals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    /// The underlying signed order.
    pub raw_order: RawOrder,
    /// Sell-side volume already settled on chain.
    pub dealt_amount_s: U256,
    /// Buy-side volume already settled on chain.
    pub dealt_amount_b: U256,
    /// Sell-side volume cancelled by the owner.
    pub cancelled_amount_s: U256,
    /// Buy-side volume cancelled by the owner.
    pub cancelled_amount_b: U256,
    /// Stored lifecycle status; expiry overlays this at read time.
    pub status: OrderStatus,
    /// Highest block number that mutated this state.
    pub updated_block: u64,
}

impl OrderState {
    /// Wraps a freshly accepted order.
    pub fn new(raw_order: RawOrder) -> Self {
        Self {
            raw_order,
            dealt_amount_s: U256::zero(),
            dealt_amount_b: U256::zero(),
            cancelled_amount_s: U256::zero(),
            cancelled_amount_b: U256::zero(),
            status: OrderStatus::New,
            updated_block: 0,
        }
    }

    /// Sell-side residual after fills and cancellations.
    pub fn remaining_amount_s(&self) -> U256 {
        self.raw_order
            .amount_s
            .saturating_sub(self.dealt_amount_s)
            .saturating_sub(self.cancelled_amount_s)
    }

    /// Buy-side residual after fills and cancellations.
    pub fn remaining_amount_b(&self) -> U256 {
        self.raw_order
            .amount_b
            .saturating_sub(self.dealt_amount_b)
            .saturating_sub(self.cancelled_amount_b)
    }

    /// Whether the exhaustion side of the order has been consumed.
    ///
    /// Orders capping the buy side exhaust on `amount_b`, all others on
    /// `amount_s`.
    pub fn is_exhausted(&self) -> bool {
        if self.raw_order.buy_no_more_than_amount_b {
            self.remaining_amount_b().is_zero()
        } else {
            self.remaining_amount_s().is_zero()
        }
    }

    /// The effective status at `now`: expiry overlays non-terminal states.
    pub fn resolve_status(&self, now: u64) -> OrderStatus {
        if !self.status.is_terminal() && self.raw_order.is_expired(now) {
            return OrderStatus::Expired;
        }
        self.status
    }

    /// True when the order can still feed the matcher at `now`.
    pub fn is_effective(&self, now: u64) -> bool {
        !self.resolve_status(now).is_terminal()
            && !self.is_exhausted()
            && self.raw_order.valid_since <= U256::from(now)
    }

    /// Applies a settled fill to the residuals and advances the status.
    pub fn apply_fill(&mut self, amount_s: U256, amount_b: U256, block: u64) {
        self.dealt_amount_s = self.dealt_amount_s.saturating_add(amount_s);
        self.dealt_amount_b = self.dealt_amount_b.saturating_add(amount_b);
        self.updated_block = self.updated_block.max(block);
        if self.status.is_terminal() {
            return;
        }
        if self.is_exhausted() {
            self.status = OrderStatus::Finished;
        } else if !amount_s.is_zero() || !amount_b.is_zero() {
            self.status = OrderStatus::Partial;
        }
    }

    /// Reverses a previously applied fill during a fork rewind.
    pub fn rollback_fill(&mut self, amount_s: U256, amount_b: U256) {
        self.dealt_amount_s = self.dealt_amount_s.saturating_sub(amount_s);
        self.dealt_amount_b = self.dealt_amount_b.saturating_sub(amount_b);
        self.recompute_fill_status();
    }

    /// Applies an owner cancellation to the residuals.
    pub fn apply_cancel(&mut self, amount_s: U256, amount_b: U256, block: u64) {
        self.cancelled_amount_s = self.cancelled_amount_s.saturating_add(amount_s);
        self.cancelled_amount_b = self.cancelled_amount_b.saturating_add(amount_b);
        self.updated_block = self.updated_block.max(block);
        if self.status.is_terminal() {
            return;
        }
        if self.is_exhausted() {
            self.status = OrderStatus::Cancelled;
        }
    }

    /// Reverses a previously applied cancellation during a fork rewind.
    pub fn rollback_cancel(&mut self, amount_s: U256, amount_b: U256) {
        self.cancelled_amount_s = self.cancelled_amount_s.saturating_sub(amount_s);
        self.cancelled_amount_b = self.cancelled_amount_b.saturating_sub(amount_b);
        if self.status == OrderStatus::Cancelled && !self.is_exhausted() {
            self.recompute_fill_status();
        }
    }

    fn recompute_fill_status(&mut self) {
        if matches!(
            self.status,
            OrderStatus::Cutoff | OrderStatus::Expired | OrderStatus::Pending
        ) {
            return;
        }
        self.status = if self.is_exhausted() {
            OrderStatus::Finished
        } else if self.dealt_amount_s.is_zero() && self.dealt_amount_b.is_zero() {
            OrderStatus::New
        } else {
            OrderStatus::Partial
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{signed_order, OrderParams};

    #[test]
    fn hash_is_deterministic_and_content_addressed() {
        let order = signed_order(OrderParams::default());
        assert_eq!(order.hash, order.generate_hash());
        let mut tampered = order.clone();
        tampered.amount_s = order.amount_s + U256::one();
        assert_ne!(tampered.generate_hash(), order.hash);
    }

    #[test]
    fn validation_accepts_a_well_formed_order() {
        let order = signed_order(OrderParams::default());
        order.validate().unwrap();
    }

    #[test]
    fn validation_rejects_tampered_content() {
        let mut order = signed_order(OrderParams::default());
        order.amount_b = order.amount_b + U256::one();
        assert!(matches!(
            order.validate(),
            Err(Error::InvalidOrder { .. })
        ));
    }

    #[test]
    fn validation_rejects_foreign_signatures() {
        let honest = signed_order(OrderParams::default());
        let foreign = signed_order(OrderParams {
            owner_seed: 7,
            ..OrderParams::default()
        });
        let mut forged = honest;
        forged.v = foreign.v;
        forged.r = foreign.r;
        forged.s = foreign.s;
        assert!(matches!(
            forged.validate(),
            Err(Error::InvalidOrder { .. })
        ));
    }

    #[test]
    fn validation_rejects_inverted_validity_window() {
        let order = signed_order(OrderParams {
            valid_since: 2_000,
            valid_until: 1_000,
            ..OrderParams::default()
        });
        assert!(matches!(
            order.validate(),
            Err(Error::InvalidOrder { .. })
        ));
    }

    #[test]
    fn wire_format_uses_gateway_names() {
        let order = signed_order(OrderParams::default());
        let json = serde_json::to_value(&order).unwrap();
        for field in [
            "protocol",
            "owner",
            "hash",
            "tokenS",
            "tokenB",
            "amountS",
            "amountB",
            "validSince",
            "validUntil",
            "lrcFee",
            "buyNoMoreThanAmountB",
            "marginSplitPercentage",
            "v",
            "r",
            "s",
            "walletId",
            "authAddr",
            "authPrivateKey",
        ] {
            assert!(json.get(field).is_some(), "missing wire field {field}");
        }
        // Big integers travel as 0x-prefixed hex.
        assert!(json["amountS"].as_str().unwrap().starts_with("0x"));
        let back: RawOrder = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn residual_invariant_holds_through_fills_and_cancels() {
        let order = signed_order(OrderParams::default());
        let amount_s = order.amount_s;
        let mut state = OrderState::new(order);
        state.apply_fill(amount_s / 4, U256::from(10), 100);
        state.apply_cancel(amount_s / 4, U256::from(10), 101);
        assert!(state.dealt_amount_s + state.cancelled_amount_s <= amount_s);
        assert_eq!(state.status, OrderStatus::Partial);
    }

    #[test]
    fn fill_transitions_new_partial_finished() {
        let order = signed_order(OrderParams::default());
        let (amount_s, amount_b) = (order.amount_s, order.amount_b);
        let mut state = OrderState::new(order);
        assert_eq!(state.status, OrderStatus::New);
        state.apply_fill(amount_s / 2, amount_b / 2, 10);
        assert_eq!(state.status, OrderStatus::Partial);
        state.apply_fill(amount_s - amount_s / 2, amount_b - amount_b / 2, 11);
        assert_eq!(state.status, OrderStatus::Finished);
    }

    #[test]
    fn rollback_restores_residuals_exactly() {
        let order = signed_order(OrderParams::default());
        let (amount_s, amount_b) = (order.amount_s, order.amount_b);
        let mut state = OrderState::new(order);
        state.apply_fill(amount_s / 2, amount_b / 2, 10);
        let snapshot = state.clone();
        state.apply_fill(amount_s / 4, amount_b / 4, 11);
        state.rollback_fill(amount_s / 4, amount_b / 4);
        assert_eq!(state.dealt_amount_s, snapshot.dealt_amount_s);
        assert_eq!(state.dealt_amount_b, snapshot.dealt_amount_b);
        assert_eq!(state.status, OrderStatus::Partial);
    }

    #[test]
    fn expiry_is_derived_at_read_time() {
        let order = signed_order(OrderParams {
            valid_since: 1_000,
            valid_until: 2_000,
            ..OrderParams::default()
        });
        let state = OrderState::new(order);
        assert_eq!(state.resolve_status(1_500), OrderStatus::New);
        assert_eq!(state.resolve_status(2_001), OrderStatus::Expired);
        // The stored status is untouched.
        assert_eq!(state.status, OrderStatus::New);
    }

    #[test]
    fn buy_capped_orders_exhaust_on_the_buy_side() {
        let order = signed_order(OrderParams {
            buy_no_more_than_amount_b: true,
            ..OrderParams::default()
        });
        let amount_b = order.amount_b;
        let mut state = OrderState::new(order);
        state.apply_fill(U256::from(1), amount_b, 5);
        assert_eq!(state.status, OrderStatus::Finished);
    }
}

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

//! Ring economics.
//!
//! For a candidate cycle the evaluator computes a uniform rate-reduction
//! factor, allocates per-leg fill volumes around the most-constrained leg,
//! prices both fee models per leg, gates admission on a scaled
//! coefficient-of-variation test across the leg rate ratios, and projects
//! the miner's net income net of gas. All math is exact rationals; the one
//! float is the n-th root, immediately pinned back through its ten-digit
//! decimal rendering.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::middleware::gas_oracle::GasOracle;
use ethers::types::{Address, U256};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};

use ring_price_oracle_backends::LegalValueOracle;
use ring_relayer_types::rational::{
    rat_from_f64_dec, rat_from_u256, rat_round_to_bigint, rat_to_f64, ratio_of,
    u256_to_bigint,
};
use ring_relayer_types::{OrderState, Ring, RingReceipt};
use ring_relayer_utils::{Error, Result};

/// The scale factor of the rate-ratio deviation test.
const RATE_RATIO_SCALE: i64 = 10_000;

/// Stateless per-ring evaluation; one instance serves every matcher tick.
pub struct Evaluator {
    market_cap: Arc<dyn LegalValueOracle>,
    gas_oracle: Arc<dyn GasOracle>,
    lrc_address: Address,
    rate_ratio_cvs_threshold: i64,
    gas_used_with_length: HashMap<usize, U256>,
    real_cost_rate: BigRational,
    wallet_split: BigRational,
}

impl Evaluator {
    /// Builds the evaluator out of its collaborators and tuning knobs.
    pub fn new(
        market_cap: Arc<dyn LegalValueOracle>,
        gas_oracle: Arc<dyn GasOracle>,
        lrc_address: Address,
        rate_ratio_cvs_threshold: i64,
        subsidy: f64,
        wallet_split: f64,
        gas_table: &HashMap<usize, u64>,
    ) -> Self {
        let gas_used_with_length = gas_table
            .iter()
            .map(|(size, gas)| (*size, U256::from(*gas)))
            .collect();
        Self {
            market_cap,
            gas_oracle,
            lrc_address,
            rate_ratio_cvs_threshold,
            gas_used_with_length,
            real_cost_rate: BigRational::from_float(1.0 - subsidy)
                .unwrap_or_else(BigRational::one),
            wallet_split: BigRational::from_float(wallet_split)
                .unwrap_or_else(BigRational::zero),
        }
    }

    /// Evaluates a candidate ring in place.
    ///
    /// On success the ring carries its reduced rate and every leg carries
    /// fill volumes and both fee candidates. Failure reasons: the rate
    /// product falls below one, a leg's reduced sell amount exceeds its
    /// original, or the deviation test trips.
    pub fn compute_ring(&self, ring: &mut Ring) -> Result<()> {
        let size = ring.size();
        if size < 2 {
            return Err(Error::Generic("a ring needs at least two legs"));
        }

        // Price products and the per-leg prices, unreduced.
        let mut product_amount_s = BigRational::one();
        let mut product_amount_b = BigRational::one();
        for leg in &mut ring.orders {
            let amount_s = rat_from_u256(leg.order.raw_order.amount_s);
            let amount_b = rat_from_u256(leg.order.raw_order.amount_b);
            product_amount_s *= &amount_s;
            product_amount_b *= &amount_b;
            leg.s_price = &amount_s / &amount_b;
            leg.b_price = &amount_b / &amount_s;
        }
        let product_price = product_amount_s / product_amount_b;
        if product_price < BigRational::one() {
            return Err(Error::RingProductUnprofitable);
        }

        // The n-th root runs in double precision and is pinned back through
        // its decimal rendering; the deviation test below tolerates the
        // rounding this introduces.
        let price_float = rat_to_f64(&product_price).unwrap_or_default();
        let root_of_ring = price_float.powf(1.0 / size as f64);
        let rate = rat_from_f64_dec(root_of_ring);
        if rate <= BigRational::zero() {
            return Err(Error::RingProductUnprofitable);
        }
        ring.reduced_rate = rate.recip();
        tracing::debug!(
            rate = %rate,
            root_of_ring,
            size,
            reduced_rate = %ring.reduced_rate,
            "computed ring rate reduction"
        );

        // Forward pass: apply the reduction and find the most-constrained
        // leg while tentatively allocating volumes.
        let mut min_volume_idx = 0usize;
        for idx in 0..size {
            let reduced_rate = ring.reduced_rate.clone();
            let last_fill_b = idx
                .checked_sub(1)
                .map(|prev| ring.orders[prev].fill_amount_b.clone());
            let leg = &mut ring.orders[idx];

            leg.s_price *= &reduced_rate;
            leg.b_price = leg.s_price.clone().recip();

            let amount_s = rat_from_u256(leg.order.raw_order.amount_s);
            leg.rate_amount_s = amount_s * &reduced_rate;

            match last_fill_b {
                Some(last) if last >= leg.available_amount_s => {
                    leg.fill_amount_s = leg.available_amount_s.clone();
                    min_volume_idx = idx;
                }
                Some(last) => {
                    leg.fill_amount_s = last;
                }
                None => {
                    leg.fill_amount_s = leg.available_amount_s.clone();
                }
            }
            leg.fill_amount_b = &leg.fill_amount_s * &leg.b_price;
        }

        // Backward correction from the most-constrained leg.
        for idx in (0..min_volume_idx).rev() {
            let next_fill_s = ring.orders[idx + 1].fill_amount_s.clone();
            let leg = &mut ring.orders[idx];
            leg.fill_amount_b = next_fill_s;
            leg.fill_amount_s = &leg.fill_amount_b * &leg.s_price;
        }

        // Forward completion past it.
        for idx in min_volume_idx + 1..size {
            let last_fill_b = ring.orders[idx - 1].fill_amount_b.clone();
            let leg = &mut ring.orders[idx];
            leg.fill_amount_s = last_fill_b;
            leg.fill_amount_b = &leg.fill_amount_s * &leg.b_price;
        }

        self.compute_fee_of_ring_and_order(ring);

        let cvs = price_rate_cv_square(ring)?;
        let cvs_i64 = cvs.to_i64().unwrap_or(i64::MAX);
        if cvs_i64 <= self.rate_ratio_cvs_threshold {
            Ok(())
        } else {
            Err(Error::CvsThresholdExceeded {
                cvs: cvs_i64,
                threshold: self.rate_ratio_cvs_threshold,
            })
        }
    }

    /// Projects the miner's net income for an already-computed ring.
    pub async fn evaluate_received(&self, ring: &Ring) -> Result<RingReceipt> {
        let gas_price = self.gas_oracle.fetch().await?;
        let gas = match self.gas_used_with_length.get(&ring.size()) {
            Some(gas) => *gas,
            None => {
                tracing::warn!(size = ring.size(), "no gas budget configured");
                U256::zero()
            }
        };
        let protocol_cost = gas * gas_price;
        let cost_eth = rat_from_u256(protocol_cost);
        let mut cost_legal = match self.market_cap.legal_value_of_eth(&cost_eth) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("cost conversion may be unreliable: {}", e);
                cost_eth
            }
        };
        let mut legal_fee = BigRational::zero();
        for leg in &ring.orders {
            if leg.legal_lrc_fee < leg.legal_fee_s {
                legal_fee += &leg.legal_fee_s;
            } else {
                legal_fee += &leg.legal_lrc_fee;
            }
        }
        cost_legal *= &self.real_cost_rate;
        let received = (&legal_fee - &cost_legal) * &self.wallet_split;
        Ok(RingReceipt {
            gas,
            gas_price,
            cost_legal,
            legal_fee,
            received,
        })
    }

    /// Per-leg fee selection: the margin-split saving and the scaled
    /// fee-token fee, both valued in legal currency. The submitter picks
    /// the larger side per leg.
    fn compute_fee_of_ring_and_order(&self, ring: &mut Ring) {
        let reduced_rate = ring.reduced_rate.clone();
        for leg in &mut ring.orders {
            let raw = leg.order.raw_order.clone();

            let (saving_token, saving_amount) = if raw.buy_no_more_than_amount_b {
                // The seller keeps the residual sell token.
                let s_price = ratio_of(raw.amount_s, raw.amount_b);
                let saving = &leg.fill_amount_b * &s_price - &leg.fill_amount_s;
                (raw.token_s, saving)
            } else {
                // The buyer receives extra buy token beyond the reduced promise.
                let saving =
                    &leg.fill_amount_b - &leg.fill_amount_b * &reduced_rate;
                (raw.token_b, saving)
            };
            leg.fee_s = saving_amount;
            let legal_amount_of_saving =
                self.legal_currency(saving_token, &leg.fee_s);

            let rate = &leg.fill_amount_s / rat_from_u256(raw.amount_s);
            leg.lrc_fee = rat_from_u256(raw.lrc_fee) * rate;
            if leg.available_lrc_balance <= leg.lrc_fee {
                leg.lrc_fee = leg.available_lrc_balance.clone();
            }
            leg.legal_lrc_fee =
                self.legal_currency(self.lrc_address, &leg.lrc_fee);

            // TODO: confirm whether the split percentage needs the /100
            // normalization before scaling the legal saving.
            let split_per = BigRational::from_integer(BigInt::from(
                raw.margin_split_percentage,
            ));
            leg.legal_fee_s = legal_amount_of_saving * split_per;
            tracing::debug!(
                order = ?raw.hash,
                legal_lrc_fee = %leg.legal_lrc_fee,
                legal_fee_s = %leg.legal_fee_s,
                "priced both fee candidates"
            );
        }
    }

    fn legal_currency(&self, token: Address, amount: &BigRational) -> BigRational {
        match self.market_cap.legal_value(token, amount) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("fee comparison may be unreliable: {}", e);
                amount.clone()
            }
        }
    }
}

/// Division-free profitability pre-check for a two-order candidate.
///
/// Closing is only worth computing when the sell products cover the buy
/// products; comparing products avoids any rational division.
pub fn price_valid(a2b: &OrderState, b2a: &OrderState) -> bool {
    ring_product_at_least_unit(&[a2b, b2a])
}

/// The n-order generalization of [`price_valid`].
pub fn ring_product_at_least_unit(orders: &[&OrderState]) -> bool {
    let mut amount_s = BigInt::one();
    let mut amount_b = BigInt::one();
    for order in orders {
        amount_s *= u256_to_bigint(order.raw_order.amount_s);
        amount_b *= u256_to_bigint(order.raw_order.amount_b);
    }
    amount_s >= amount_b
}

/// The scaled rate-ratio variance across legs.
///
/// Per leg the ratio is `scale · round(rate_amount_s) / amount_s` in big
/// integers; any leg whose reduced sell amount exceeds its original is
/// rejected outright. The chained integer divisions deliberately truncate
/// at each step.
fn price_rate_cv_square(ring: &Ring) -> Result<BigInt> {
    let scale = BigInt::from(RATE_RATIO_SCALE);
    let mut rate_ratios = Vec::with_capacity(ring.size());
    for leg in &ring.orders {
        let s1b0 = rat_round_to_bigint(&leg.rate_amount_s);
        let s0b1 = u256_to_bigint(leg.order.raw_order.amount_s);
        if s1b0 > s0b1 {
            return Err(Error::RateExceedsOriginal);
        }
        let ratio = &scale * &s1b0 / &s0b1;
        rate_ratios.push(ratio);
    }
    Ok(cv_square(&rate_ratios, &scale))
}

fn cv_square(rate_ratios: &[BigInt], scale: &BigInt) -> BigInt {
    let length = BigInt::from(rate_ratios.len());
    let length1 = BigInt::from(rate_ratios.len() - 1);
    let avg: BigInt = rate_ratios.iter().sum::<BigInt>() / &length;
    if avg.is_zero() {
        return BigInt::zero();
    }
    let mut cvs = BigInt::zero();
    for ratio in rate_ratios {
        let sub = ratio - &avg;
        cvs += &sub * &sub;
    }
    cvs * scale / &avg * scale / &avg / length1
}

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

//! Deterministic order fixtures shared by the workspace test suites.

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256, U64};
use ethers::utils::hash_message;

use crate::order::RawOrder;

/// Deterministic wallet derived from a single seed byte.
pub fn wallet(seed: u8) -> LocalWallet {
    assert_ne!(seed, 0, "the zero key is not a valid signing key");
    LocalWallet::from_bytes(&[seed; 32]).expect("static test key")
}

/// Knobs for building a signed fixture order.
#[derive(Debug, Clone)]
pub struct OrderParams {
    /// Seed byte of the owner's signing key.
    pub owner_seed: u8,
    /// Settlement contract address.
    pub protocol: Address,
    /// Token offered for sale.
    pub token_s: Address,
    /// Token to be bought.
    pub token_b: Address,
    /// Sell amount.
    pub amount_s: U256,
    /// Buy amount.
    pub amount_b: U256,
    /// Window start, seconds.
    pub valid_since: u64,
    /// Window end, seconds.
    pub valid_until: u64,
    /// Offered fee in the protocol fee token.
    pub lrc_fee: U256,
    /// Fee model selector.
    pub buy_no_more_than_amount_b: bool,
    /// Miner share of the margin saving.
    pub margin_split_percentage: u8,
}

impl Default for OrderParams {
    fn default() -> Self {
        Self {
            owner_seed: 1,
            protocol: Address::from([0xAA; 20]),
            token_s: Address::from([0x01; 20]),
            token_b: Address::from([0x02; 20]),
            amount_s: U256::exp10(21),
            amount_b: U256::exp10(20),
            valid_since: 0,
            valid_until: 4_000_000_000,
            lrc_fee: U256::exp10(19),
            buy_no_more_than_amount_b: false,
            margin_split_percentage: 50,
        }
    }
}

/// Builds a fully signed order whose hash and signature verify.
pub fn signed_order(params: OrderParams) -> RawOrder {
    let wallet = wallet(params.owner_seed);
    let mut order = RawOrder {
        protocol: params.protocol,
        owner: wallet.address(),
        hash: H256::zero(),
        token_s: params.token_s,
        token_b: params.token_b,
        amount_s: params.amount_s,
        amount_b: params.amount_b,
        valid_since: U256::from(params.valid_since),
        valid_until: U256::from(params.valid_until),
        lrc_fee: params.lrc_fee,
        buy_no_more_than_amount_b: params.buy_no_more_than_amount_b,
        margin_split_percentage: params.margin_split_percentage,
        v: U64::zero(),
        r: H256::zero(),
        s: H256::zero(),
        wallet_id: U256::one(),
        auth_addr: Address::from([0xBB; 20]),
        auth_private_key: H256::from([0xCC; 32]),
    };
    order.hash = order.generate_hash();
    let signature = wallet
        .sign_hash(hash_message(order.hash))
        .expect("signing a fixture order never fails");
    let mut word = [0u8; 32];
    signature.r.to_big_endian(&mut word);
    order.r = H256::from(word);
    signature.s.to_big_endian(&mut word);
    order.s = H256::from(word);
    order.v = U64::from(signature.v);
    order
}

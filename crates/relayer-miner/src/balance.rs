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

//! On-chain balance reads for ring hydration.
//!
//! The matcher caps every leg's available volume by the owner's current
//! token balance and reads the fee-token balance for the clamp in the fee
//! step. Behind a trait so tests inject a static table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};

use ring_relayer_utils::Result;

abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
    ]"#
);

/// Read access to current token balances.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// The owner's current balance of `token`.
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256>;
}

/// Balance reads against the chain through a JSON-RPC provider.
#[derive(Debug, Clone)]
pub struct Erc20BalanceProvider {
    client: Arc<Provider<Http>>,
}

impl Erc20BalanceProvider {
    /// Wraps a JSON-RPC client.
    pub fn new(client: Arc<Provider<Http>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BalanceProvider for Erc20BalanceProvider {
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let contract = Erc20Token::new(token, self.client.clone());
        Ok(contract.balance_of(owner).call().await?)
    }
}

/// A fixed balance table for tests and dry runs.
///
/// Addresses missing from the table report the configured default.
#[derive(Debug, Clone, Default)]
pub struct StaticBalanceProvider {
    balances: HashMap<(Address, Address), U256>,
    default_balance: U256,
}

impl StaticBalanceProvider {
    /// A provider returning `default_balance` for every account.
    pub fn uniform(default_balance: U256) -> Self {
        Self {
            balances: HashMap::new(),
            default_balance,
        }
    }

    /// Overrides the balance of one `(token, owner)` pair.
    pub fn set(mut self, token: Address, owner: Address, balance: U256) -> Self {
        self.balances.insert((token, owner), balance);
        self
    }
}

#[async_trait]
impl BalanceProvider for StaticBalanceProvider {
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        Ok(self
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(self.default_balance))
    }
}

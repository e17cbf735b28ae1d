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

//! Gas price estimation.
//!
//! The production path wraps the node's own estimate through
//! [`ProviderOracle`]; [`FixedGasOracle`] pins the price for tests and
//! offline runs.

use async_trait::async_trait;
use ethers::middleware::gas_oracle::{GasOracle, GasOracleError, ProviderOracle};
use ethers::providers::{Http, Provider};
use ethers::types::U256;

/// Builds the default node-backed gas oracle.
pub fn provider_oracle(provider: Provider<Http>) -> ProviderOracle<Provider<Http>> {
    ProviderOracle::new(provider)
}

/// A gas oracle that always reports the same price.
#[derive(Debug, Clone)]
pub struct FixedGasOracle {
    gas_price: U256,
}

impl FixedGasOracle {
    /// Pins the oracle to `gas_price` wei.
    pub fn new(gas_price: U256) -> Self {
        Self { gas_price }
    }
}

#[async_trait]
impl GasOracle for FixedGasOracle {
    async fn fetch(&self) -> Result<U256, GasOracleError> {
        Ok(self.gas_price)
    }

    async fn estimate_eip1559_fees(&self) -> Result<(U256, U256), GasOracleError> {
        Ok((self.gas_price, U256::zero()))
    }
}

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

//! # Relayer Configuration Module
//!
//! Configuration for the ring relayer: the operational mode, the chain
//! endpoint, the token universe, the matched markets, the market-data
//! upstream and the miner tuning knobs. Files are TOML or JSON discovered
//! under a config directory, overlaid with `RING_`-prefixed environment
//! variables.

/// CLI options and the logger / store bootstrap.
#[cfg(feature = "cli")]
pub mod cli;
/// Config file discovery, parsing and post-load validation.
pub mod utils;

use std::collections::HashMap;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// The default matcher tick interval in milliseconds.
const fn default_tick_interval_ms() -> u64 {
    10_000
}
/// The default CVS admission threshold.
const fn default_cvs_threshold() -> i64 {
    1_000
}
/// The default wallet split fraction.
const fn default_wallet_split() -> f64 {
    0.8
}
/// The default book depth pulled per side and tick.
const fn default_match_depth() -> usize {
    10
}
/// Default market-data refresh cadence in minutes.
const fn default_refresh_interval_minutes() -> u64 {
    5
}
/// Default per-request HTTP timeout in seconds.
const fn default_request_timeout_secs() -> u64 {
    10
}
/// Default retry interval for transient failures, milliseconds.
const fn default_retry_interval_ms() -> u64 {
    1_000
}
/// Default retry ceiling before a transient failure turns fatal.
const fn default_max_retries() -> usize {
    5
}
fn default_currency() -> String {
    "CNY".to_string()
}
fn default_fee_token() -> String {
    "LRC".to_string()
}
fn default_weth_token() -> String {
    "WETH".to_string()
}
fn default_quote_tokens() -> Vec<String> {
    vec!["WETH".to_string(), "LRC".to_string()]
}
fn default_gas_table() -> HashMap<usize, u64> {
    // One placeholder budget for every supported ring size.
    HashMap::from([(2, 400_000), (3, 400_000), (4, 400_000)])
}

/// Which long-running services this process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationalMode {
    /// Order ingestion and book serving only.
    Relay,
    /// Ring matching and submission only.
    Miner,
    /// Both halves in one process.
    #[default]
    Full,
}

impl OperationalMode {
    /// True when the matcher and submitter should run.
    pub fn runs_miner(&self) -> bool {
        matches!(self, Self::Miner | Self::Full)
    }
    /// True when the gateway-facing book services should run.
    pub fn runs_relay(&self) -> bool {
        matches!(self, Self::Relay | Self::Full)
    }
}

/// Top-level configuration of the ring relayer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RingRelayerConfig {
    /// Which services this process hosts.
    #[serde(default)]
    pub mode: OperationalMode,
    /// The EVM chain hosting the settlement contract.
    pub chain: ChainConfig,
    /// Settlement protocol parameters.
    pub protocol: ProtocolConfig,
    /// The token universe, keyed by upper-case symbol.
    #[serde(default)]
    pub tokens: HashMap<String, TokenConfig>,
    /// Quote-token symbols in market-wrapping priority order.
    #[serde(default = "default_quote_tokens")]
    pub quote_tokens: Vec<String>,
    /// Token pairs the matcher scans every tick.
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
    /// Market-data upstream parameters.
    #[serde(default)]
    pub market_cap: MarketCapConfig,
    /// Matching and evaluation tuning.
    #[serde(default)]
    pub miner: MinerConfig,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// The EVM endpoint and account the relayer operates with.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// Http(s) endpoint for JSON-RPC.
    pub http_endpoint: url::Url,
    /// Chain id used for transaction signing.
    pub chain_id: u64,
    /// Hex-encoded private key of the miner account; `$VAR` reads the
    /// environment. Only required when the miner runs.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            http_endpoint: url::Url::parse("http://localhost:8545")
                .expect("static url"),
            chain_id: 1,
            private_key: None,
        }
    }
}

/// Settlement protocol parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProtocolConfig {
    /// Address of the settlement contract this relay serves.
    pub address: Address,
    /// Symbol of the protocol fee token.
    #[serde(default = "default_fee_token")]
    pub fee_token: String,
    /// Symbol of the token anchoring ETH-denominated conversions.
    #[serde(default = "default_weth_token")]
    pub weth_token: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            address: Address::zero(),
            fee_token: default_fee_token(),
            weth_token: default_weth_token(),
        }
    }
}

/// One configured token.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenConfig {
    /// On-chain contract address.
    pub address: Address,
    /// Number of decimals; the registry stores `10^decimals`.
    pub decimals: u32,
    /// Cross-reference id at the market data upstream.
    #[serde(default)]
    pub source: Option<String>,
}

/// One matched market: the matcher scans both orientations of the pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarketConfig {
    /// Base-side token symbol.
    pub base: String,
    /// Quote-side token symbol.
    pub quote: String,
}

/// Market-data upstream parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarketCapConfig {
    /// Quote-list URL with a single `%s` placeholder for the base currency.
    pub base_url: String,
    /// The base currency quotes are requested in.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Refresh cadence in minutes.
    #[serde(default = "default_refresh_interval_minutes")]
    pub refresh_interval_minutes: u64,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MarketCapConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coinmarketcap.com/v1/ticker/?convert=%s&limit=500"
                .to_string(),
            currency: default_currency(),
            refresh_interval_minutes: default_refresh_interval_minutes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Matching and evaluation tuning knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MinerConfig {
    /// Matcher tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Admission threshold for the scaled rate-ratio variance test.
    #[serde(default = "default_cvs_threshold")]
    pub rate_ratio_cvs_threshold: i64,
    /// Fraction of the settlement cost the operator subsidizes, in [0, 1].
    #[serde(default)]
    pub subsidy: f64,
    /// Fraction of the net income credited to the miner, in [0, 1].
    #[serde(default = "default_wallet_split")]
    pub wallet_split: f64,
    /// Gas budget per ring size.
    #[serde(default = "default_gas_table")]
    pub gas_used_per_ring_size: HashMap<usize, u64>,
    /// Book depth pulled per side and tick.
    #[serde(default = "default_match_depth")]
    pub match_depth: usize,
    /// Symbols bridging 3-leg rings; empty disables them.
    #[serde(default)]
    pub bridge_tokens: Vec<String>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            rate_ratio_cvs_threshold: default_cvs_threshold(),
            subsidy: 0.0,
            wallet_split: default_wallet_split(),
            gas_used_per_ring_size: default_gas_table(),
            match_depth: default_match_depth(),
            bridge_tokens: Vec::new(),
        }
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Delay between attempts, milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,
    /// Attempts before the failure is promoted to fatal.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
        }
    }
}

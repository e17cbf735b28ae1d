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

//! # Relayer Context Module
//!
//! The shared runtime context: configuration, the shutdown broadcast, the
//! durable store, the token registry and the market-cap provider. Built
//! once at boot and passed as an explicit handle into every component
//! constructor; nothing reaches into ambient state.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use tokio::sync::broadcast;

use ring_price_oracle_backends::{MarketCapOptions, MarketCapProvider};
use ring_relayer_config::RingRelayerConfig;
use ring_relayer_store::SledStore;
use ring_relayer_types::{Token, TokenRegistry};
use ring_relayer_utils::{Error, Result};

/// RelayerContext contains the relayer's configuration and shared handles.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: RingRelayerConfig,
    /// Broadcasts a shutdown signal to all long-running tasks.
    ///
    /// Every spawned service holds a receiver and reaches a safe terminal
    /// state when the `()` value arrives.
    notify_shutdown: broadcast::Sender<()>,
    store: SledStore,
    registry: Arc<TokenRegistry>,
    market_cap: Arc<MarketCapProvider>,
}

impl RelayerContext {
    /// Creates a new RelayerContext out of the loaded configuration.
    pub fn new(config: RingRelayerConfig, store: SledStore) -> Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let tokens = config
            .tokens
            .iter()
            .map(|(symbol, token)| {
                Token::new(
                    token.address,
                    symbol.clone(),
                    token.decimals,
                    token.source.clone(),
                )
            })
            .collect::<Vec<_>>();
        let registry = Arc::new(TokenRegistry::new(
            tokens,
            config.quote_tokens.clone(),
            &config.protocol.weth_token,
        )?);
        let market_cap_options = MarketCapOptions::builder()
            .base_url(config.market_cap.base_url.clone())
            .currency(config.market_cap.currency.clone())
            .refresh_interval(Duration::from_secs(
                config.market_cap.refresh_interval_minutes * 60,
            ))
            .request_timeout(Duration::from_secs(
                config.market_cap.request_timeout_secs,
            ))
            .build();
        let market_cap = Arc::new(MarketCapProvider::new(
            market_cap_options,
            registry.clone(),
        )?);
        Ok(Self {
            config,
            notify_shutdown,
            store,
            registry,
            market_cap,
        })
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.notify_shutdown.subscribe()
    }

    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// The durable store backing the order book.
    pub fn store(&self) -> &SledStore {
        &self.store
    }

    /// The process-wide token registry.
    pub fn registry(&self) -> Arc<TokenRegistry> {
        self.registry.clone()
    }

    /// The market-cap provider.
    pub fn market_cap(&self) -> Arc<MarketCapProvider> {
        self.market_cap.clone()
    }

    /// Returns a new JSON-RPC provider for the configured chain.
    pub async fn evm_provider(&self) -> Result<Provider<Http>> {
        let provider =
            Provider::try_from(self.config.chain.http_endpoint.as_str())?
                .interval(Duration::from_millis(5u64));
        Ok(provider)
    }

    /// Sets up the miner wallet from the configured private key.
    ///
    /// A key starting with `$` is read from the environment instead.
    pub async fn evm_wallet(&self) -> Result<LocalWallet> {
        let raw_key = self
            .config
            .chain
            .private_key
            .as_ref()
            .ok_or(Error::Generic("missing required private-key in the config"))?;
        let key = if let Some(var) = raw_key.strip_prefix('$') {
            std::env::var(var)
                .map_err(|_| Error::Generic("private-key env var is not set"))?
        } else {
            raw_key.clone()
        };
        let wallet: LocalWallet = key.trim_start_matches("0x").parse()?;
        Ok(wallet.with_chain_id(self.config.chain.chain_id))
    }

    /// The configured protocol fee token address.
    pub fn fee_token_address(&self) -> Result<Address> {
        self.registry
            .by_symbol(&self.config.protocol.fee_token)
            .map(|t| t.address)
            .ok_or(Error::Generic("fee token is not in the registry"))
    }

    /// Resolves the configured markets into address pairs.
    pub fn market_pairs(&self) -> Result<Vec<(Address, Address)>> {
        self.config
            .markets
            .iter()
            .map(|market| {
                let base = self
                    .registry
                    .by_symbol(&market.base)
                    .ok_or(Error::Generic("market base token is not registered"))?;
                let quote = self
                    .registry
                    .by_symbol(&market.quote)
                    .ok_or(Error::Generic("market quote token is not registered"))?;
                Ok((base.address, quote.address))
            })
            .collect()
    }

    /// Resolves the configured bridge tokens into addresses.
    pub fn bridge_tokens(&self) -> Result<Vec<Address>> {
        self.config
            .miner
            .bridge_tokens
            .iter()
            .map(|symbol| {
                self.registry
                    .by_symbol(symbol)
                    .map(|t| t.address)
                    .ok_or(Error::Generic("bridge token is not registered"))
            })
            .collect()
    }
}

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

//! Service wiring: which long-running tasks this process hosts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use ring_relayer_context::RelayerContext;
use ring_relayer_miner::{
    gas::provider_oracle, Erc20BalanceProvider, Evaluator, MatcherSettings,
    QueueSubmitter, TimingMatcher,
};
use ring_relayer_order_manager::{EventAdapter, ForkGuard, OrderManager};
use ring_relayer_store::SledStore;
use ring_relayer_types::ChainEvent;
use ring_price_oracle_backends::LegalValueOracle;

/// Capacity of the extractor event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Spawns the configured services and returns the event sender that the
/// chain extractor boundary feeds.
pub async fn start(
    ctx: &RelayerContext,
    store: SledStore,
) -> anyhow::Result<mpsc::Sender<ChainEvent>> {
    let manager = OrderManager::new(store.clone());
    let fork_guard = ForkGuard::new();

    // The ingress adapter consumes the extractor stream in every mode.
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let adapter = EventAdapter::new(manager.clone(), fork_guard.clone());
    let shutdown = ctx.shutdown_signal();
    tokio::spawn(adapter.run(event_rx, shutdown));
    tracing::debug!("event ingress adapter started");

    if ctx.config.mode.runs_miner() {
        start_miner(ctx, store, manager, fork_guard).await?;
    } else {
        tracing::info!("running in relay mode, matcher disabled");
    }
    Ok(event_tx)
}

async fn start_miner(
    ctx: &RelayerContext,
    store: SledStore,
    manager: Arc<OrderManager<SledStore>>,
    fork_guard: Arc<ForkGuard>,
) -> anyhow::Result<()> {
    let provider = ctx.evm_provider().await?;
    // The miner signs ring submissions; fail fast when the key is absent.
    let wallet = ctx.evm_wallet().await?;
    tracing::info!(miner = ?ethers::signers::Signer::address(&wallet), "miner account loaded");

    let oracle: Arc<dyn LegalValueOracle> = ctx.market_cap();
    let gas_oracle = Arc::new(provider_oracle(provider.clone()));
    let miner_config = &ctx.config.miner;
    let evaluator = Arc::new(Evaluator::new(
        oracle,
        gas_oracle,
        ctx.fee_token_address()?,
        miner_config.rate_ratio_cvs_threshold,
        miner_config.subsidy,
        miner_config.wallet_split,
        &miner_config.gas_used_per_ring_size,
    ));
    let submitter = Arc::new(QueueSubmitter::new(store));
    let balances = Arc::new(Erc20BalanceProvider::new(Arc::new(provider)));
    let settings = MatcherSettings {
        protocol: ctx.config.protocol.address,
        lrc_address: ctx.fee_token_address()?,
        markets: ctx.market_pairs()?,
        bridge_tokens: ctx.bridge_tokens()?,
        tick_interval: Duration::from_millis(miner_config.tick_interval_ms),
        match_depth: miner_config.match_depth,
    };
    let matcher = TimingMatcher::new(
        manager,
        evaluator,
        submitter,
        balances,
        fork_guard,
        settings,
    );
    tokio::spawn(matcher.run(ctx.shutdown_signal()));
    tracing::debug!("timing matcher started");
    Ok(())
}

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

#![deny(unsafe_code)]

//! The ring relayer binary: loads configuration, opens the store, wires
//! the configured services and runs until interrupted.

use std::time::Duration;

use anyhow::Context;
use ring_relayer_config::cli::{create_store, load_config, setup_logger, Opts};
use ring_relayer_context::RelayerContext;
use ring_relayer_utils::retry::ConstantWithMaxRetryCount;

mod service;

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    let config = load_config(args.config_dir.clone())?;
    let store = create_store(&args).await?;
    let ctx = RelayerContext::new(config, store.clone())
        .context("failed to build the relayer context")?;

    // The market data table must be warm before anything prices a fee.
    let retry = ConstantWithMaxRetryCount::new(
        Duration::from_millis(ctx.config.retry.interval_ms),
        ctx.config.retry.max_retries,
    );
    ctx.market_cap()
        .init(retry)
        .await
        .context("initial market data sync failed")?;
    ctx.market_cap().start(ctx.shutdown_signal());

    let extractor_tx = service::start(&ctx, store).await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::warn!("Shutting down...");
            ctx.shutdown();
            drop(extractor_tx);
            tracing::info!("Clean Exit ..");
        }
        Err(err) => {
            tracing::error!("Unable to listen for shutdown signal: {}", err);
            ctx.shutdown();
            std::process::exit(1);
        }
    }
    Ok(())
}

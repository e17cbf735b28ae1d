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

//! Config file discovery, parsing and post-load validation.

use config::{Config, File};
use std::path::{Path, PathBuf};

use ring_relayer_utils::Error;

use super::*;

/// A helper function that will search for all config files in the given directory and return them
/// as a vec of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> ring_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(Error::from))
        .collect()
}

/// Try to parse the [`RingRelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> ring_relayer_utils::Result<RingRelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of RING).
    let builder = builder
        .add_source(config::Environment::with_prefix("RING").separator("_"));
    let cfg = builder.build()?;
    let config: Result<
        RingRelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files under the given directory.
///
/// Same as [`search_config_files`] and [`parse_from_files`] combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> ring_relayer_utils::Result<RingRelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: RingRelayerConfig,
) -> ring_relayer_utils::Result<RingRelayerConfig> {
    tracing::trace!("Checking configuration sanity ...");

    // token symbols are upper-case everywhere else; normalize here once.
    let tokens = config
        .tokens
        .drain()
        .map(|(symbol, token)| (symbol.to_uppercase(), token))
        .collect::<HashMap<_, _>>();
    config.tokens = tokens;
    for quote in &mut config.quote_tokens {
        *quote = quote.to_uppercase();
    }
    for market in &mut config.markets {
        market.base = market.base.to_uppercase();
        market.quote = market.quote.to_uppercase();
    }
    config.protocol.fee_token = config.protocol.fee_token.to_uppercase();
    config.protocol.weth_token = config.protocol.weth_token.to_uppercase();

    let known = |symbol: &String| config.tokens.contains_key(symbol);
    if !known(&config.protocol.fee_token) {
        return Err(Error::Generic("fee token is not in the token set"));
    }
    if !known(&config.protocol.weth_token) {
        return Err(Error::Generic("weth token is not in the token set"));
    }
    for market in &config.markets {
        if !known(&market.base) || !known(&market.quote) {
            tracing::error!(
                "market {}-{} references an unknown token",
                market.base,
                market.quote
            );
            return Err(Error::Generic("market references an unknown token"));
        }
    }
    for bridge in &config.miner.bridge_tokens {
        if !config.tokens.contains_key(&bridge.to_uppercase()) {
            return Err(Error::Generic("bridge token is not in the token set"));
        }
    }

    if !(0.0..=1.0).contains(&config.miner.subsidy) {
        return Err(Error::Generic("subsidy must lie in [0, 1]"));
    }
    if !(0.0..=1.0).contains(&config.miner.wallet_split) {
        return Err(Error::Generic("wallet-split must lie in [0, 1]"));
    }
    if config.miner.rate_ratio_cvs_threshold < 0 {
        return Err(Error::Generic("cvs threshold must be non-negative"));
    }
    for size in 2..=4usize {
        if !config.miner.gas_used_per_ring_size.contains_key(&size) {
            tracing::warn!("no gas budget configured for {}-rings", size);
        }
    }
    if config.market_cap.refresh_interval_minutes == 0 {
        config.market_cap.refresh_interval_minutes = 5;
    }

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_config() -> RingRelayerConfig {
        let mut config = RingRelayerConfig::default();
        config.tokens.insert(
            "LRC".into(),
            TokenConfig {
                address: Address::from([1u8; 20]),
                decimals: 18,
                source: Some("loopring".into()),
            },
        );
        config.tokens.insert(
            "WETH".into(),
            TokenConfig {
                address: Address::from([2u8; 20]),
                decimals: 18,
                source: Some("ethereum".into()),
            },
        );
        config.markets.push(MarketConfig {
            base: "lrc".into(),
            quote: "weth".into(),
        });
        config
    }

    #[test]
    fn postloading_normalizes_symbols() {
        let config = postloading_process(base_config()).unwrap();
        assert_eq!(config.markets[0].base, "LRC");
        assert_eq!(config.markets[0].quote, "WETH");
    }

    #[test]
    fn postloading_rejects_unknown_market_tokens() {
        let mut config = base_config();
        config.markets.push(MarketConfig {
            base: "DAI".into(),
            quote: "WETH".into(),
        });
        assert!(postloading_process(config).is_err());
    }

    #[test]
    fn postloading_rejects_out_of_range_fractions() {
        let mut config = base_config();
        config.miner.wallet_split = 1.5;
        assert!(postloading_process(config).is_err());
    }

    #[test]
    fn files_are_discovered_and_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayer.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[chain]
http-endpoint = "http://localhost:8545"
chain-id = 1

[protocol]
address = "0x00000000000000000000000000000000000000aa"

[tokens.LRC]
address = "0x0000000000000000000000000000000000000001"
decimals = 18

[tokens.WETH]
address = "0x0000000000000000000000000000000000000002"
decimals = 18

[[markets]]
base = "LRC"
quote = "WETH"

[miner]
rate-ratio-cvs-threshold = 500
"#
        )
        .unwrap();
        let files = search_config_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        let config = parse_from_files(&files).unwrap();
        assert_eq!(config.miner.rate_ratio_cvs_threshold, 500);
        assert_eq!(config.markets.len(), 1);
    }
}

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
#![warn(missing_docs)]

//! # Price Oracle Backends
//!
//! A background-refreshed table of token prices in legal currency, fed from
//! an HTTP quote-list upstream and queried by the ring evaluator's fee
//! comparison step.
//!
//! The table is seeded from the token registry at construction; a refresh
//! task re-fetches the upstream every few minutes and updates entries
//! matched by their case-insensitive external id. Entries the upstream stops
//! listing are logged stale and retained at their previous value, so a
//! flaky upstream degrades freshness, never availability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;
use parking_lot::RwLock;
use serde::Deserialize;
use typed_builder::TypedBuilder;

use ring_relayer_types::rational::rat_from_decimal_str;
use ring_relayer_types::TokenRegistry;
use ring_relayer_utils::retry::ConstantWithMaxRetryCount;
use ring_relayer_utils::{Error, Result};

/// The legal-currency valuation seam the evaluator consumes.
///
/// The production implementation is [`MarketCapProvider`];
/// [`DummyLegalOracle`] serves tests and offline runs.
pub trait LegalValueOracle: Send + Sync {
    /// Legal-currency value of `amount` base units of `token`.
    fn legal_value(&self, token: Address, amount: &BigRational) -> Result<BigRational>;
    /// Legal-currency value of `amount` wei.
    fn legal_value_of_eth(&self, amount: &BigRational) -> Result<BigRational>;
}

/// A fixed-price oracle: every token values at `amount · price`, with no
/// decimals scaling. Prices absorb whatever scale the caller works in.
#[derive(Debug, Clone)]
pub struct DummyLegalOracle {
    prices: HashMap<Address, BigRational>,
    eth_price: BigRational,
}

impl DummyLegalOracle {
    /// Creates the oracle out of a static price map.
    pub fn new(prices: HashMap<Address, BigRational>, eth_price: BigRational) -> Self {
        Self { prices, eth_price }
    }
}

impl LegalValueOracle for DummyLegalOracle {
    fn legal_value(&self, token: Address, amount: &BigRational) -> Result<BigRational> {
        let price = self
            .prices
            .get(&token)
            .ok_or(Error::UnknownToken { address: token })?;
        Ok(amount * price)
    }

    fn legal_value_of_eth(&self, amount: &BigRational) -> Result<BigRational> {
        Ok(amount * &self.eth_price)
    }
}

/// A list of supported legal currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegalCurrency {
    /// Chinese Yuan; the default quote currency.
    #[default]
    CNY,
    /// United States Dollar.
    USD,
    /// Bitcoin.
    BTC,
}

impl LegalCurrency {
    /// Parses a currency tag, defaulting to CNY for anything unknown.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_uppercase().as_str() {
            "USD" => Self::USD,
            "BTC" => Self::BTC,
            _ => Self::CNY,
        }
    }
}

impl std::fmt::Display for LegalCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CNY => write!(f, "CNY"),
            Self::USD => write!(f, "USD"),
            Self::BTC => write!(f, "BTC"),
        }
    }
}

/// One token's market data entry.
#[derive(Debug, Clone)]
pub struct CurrencyMarketCap {
    /// Token contract address.
    pub address: Address,
    /// External id at the upstream.
    pub id: String,
    /// Token symbol.
    pub symbol: String,
    /// Decimals factor, `10^d`.
    pub decimals: BigInt,
    /// Price in CNY.
    pub price_cny: BigRational,
    /// Price in USD.
    pub price_usd: BigRational,
    /// Price in BTC.
    pub price_btc: BigRational,
    /// 24-hour volume in USD.
    pub volume_24h_usd: f64,
    /// 24-hour volume in CNY.
    pub volume_24h_cny: f64,
    /// Upstream timestamp of the last matched row.
    pub last_updated: u64,
    /// Whether any refresh has matched this entry yet.
    pub synced: bool,
}

impl CurrencyMarketCap {
    fn seeded(address: Address, id: String, symbol: String, decimals: BigInt) -> Self {
        Self {
            address,
            id,
            symbol,
            decimals,
            price_cny: BigRational::one(),
            price_usd: BigRational::one(),
            price_btc: BigRational::one(),
            volume_24h_usd: 0.0,
            volume_24h_cny: 0.0,
            last_updated: 0,
            synced: false,
        }
    }

    fn price(&self, currency: LegalCurrency) -> BigRational {
        match currency {
            LegalCurrency::CNY => self.price_cny.clone(),
            LegalCurrency::USD => self.price_usd.clone(),
            LegalCurrency::BTC => self.price_btc.clone(),
        }
    }
}

/// One row of the upstream quote list.
#[derive(Debug, Deserialize)]
struct TickerRow {
    id: String,
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    price_btc: Option<String>,
    #[serde(default)]
    price_cny: Option<String>,
    #[serde(default, rename = "24h_volume_usd")]
    volume_24h_usd: Option<String>,
    #[serde(default, rename = "24h_volume_cny")]
    volume_24h_cny: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

/// Connection parameters for the market data upstream.
#[derive(Debug, Clone, TypedBuilder)]
pub struct MarketCapOptions {
    /// Quote-list URL with a single `%s` placeholder for the base currency.
    #[builder(setter(into))]
    pub base_url: String,
    /// The base currency quotes are requested in.
    #[builder(default, setter(into))]
    pub currency: String,
    /// Refresh cadence.
    #[builder(default = Duration::from_secs(5 * 60))]
    pub refresh_interval: Duration,
    /// Per-request HTTP timeout.
    #[builder(default = Duration::from_secs(10))]
    pub request_timeout: Duration,
}

/// The background-refreshed token price table.
pub struct MarketCapProvider {
    base_url: String,
    currency: LegalCurrency,
    currency_tag: String,
    refresh_interval: Duration,
    client: reqwest::Client,
    registry: Arc<TokenRegistry>,
    caps: RwLock<HashMap<Address, CurrencyMarketCap>>,
    id_to_address: HashMap<String, Address>,
}

impl std::fmt::Debug for MarketCapProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketCapProvider")
            .field("currency", &self.currency)
            .finish()
    }
}

impl MarketCapProvider {
    /// Builds the provider and seeds one entry per registry token that
    /// carries an external id.
    pub fn new(options: MarketCapOptions, registry: Arc<TokenRegistry>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        let mut caps = HashMap::new();
        let mut id_to_address = HashMap::new();
        for token in registry.tokens() {
            let Some(id) = token.source.clone() else {
                continue;
            };
            caps.insert(
                token.address,
                CurrencyMarketCap::seeded(
                    token.address,
                    id.clone(),
                    token.symbol.clone(),
                    token.decimals.clone(),
                ),
            );
            id_to_address.insert(id.to_uppercase(), token.address);
        }
        let currency_tag = if options.currency.is_empty() {
            LegalCurrency::default().to_string()
        } else {
            options.currency.to_uppercase()
        };
        Ok(Self {
            base_url: options.base_url,
            currency: LegalCurrency::from_tag(&currency_tag),
            currency_tag,
            refresh_interval: options.refresh_interval,
            client,
            registry,
            caps: RwLock::new(caps),
            id_to_address,
        })
    }

    /// The provider's configured base currency.
    pub fn currency(&self) -> LegalCurrency {
        self.currency
    }

    /// Performs the initial sync under a bounded retry policy.
    pub async fn init(&self, retry: ConstantWithMaxRetryCount) -> Result<()> {
        backoff::future::retry(retry, || async {
            self.sync().await.map_err(backoff::Error::transient)
        })
        .await
    }

    /// Spawns the refresh task; it stops on the shutdown signal.
    pub fn start(
        self: Arc<Self>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let provider = self;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + provider.refresh_interval;
            let mut ticker =
                tokio::time::interval_at(start, provider.refresh_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::info!("market cap syncing...");
                        if let Err(e) = provider.sync().await {
                            tracing::error!("can't sync market caps: {}", e);
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("market cap refresher shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Fetches the upstream quote list once and folds it into the table.
    pub async fn sync(&self) -> Result<()> {
        let url = self.base_url.replace("%s", &self.currency_tag);
        let rows: Vec<TickerRow> =
            self.client.get(url).send().await?.json().await?;
        let mut synced_ids = Vec::with_capacity(rows.len());
        let mut caps = self.caps.write();
        for row in rows {
            let Some(address) = self.id_to_address.get(&row.id.to_uppercase())
            else {
                continue;
            };
            let Some(cap) = caps.get_mut(address) else {
                continue;
            };
            if let Some(price) = row.price_cny.as_deref().and_then(rat_from_decimal_str) {
                cap.price_cny = price;
            }
            if let Some(price) = row.price_usd.as_deref().and_then(rat_from_decimal_str) {
                cap.price_usd = price;
            }
            if let Some(price) = row.price_btc.as_deref().and_then(rat_from_decimal_str) {
                cap.price_btc = price;
            }
            if let Some(volume) = row.volume_24h_usd.as_deref().and_then(|v| v.parse().ok()) {
                cap.volume_24h_usd = volume;
            }
            if let Some(volume) = row.volume_24h_cny.as_deref().and_then(|v| v.parse().ok()) {
                cap.volume_24h_cny = volume;
            }
            cap.last_updated = row
                .last_updated
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or(cap.last_updated);
            cap.synced = true;
            synced_ids.push(cap.id.clone());
        }
        for cap in caps.values() {
            if !synced_ids.contains(&cap.id) {
                tracing::error!(
                    "token {} (id {}) missed this sync; keeping values of {}",
                    cap.symbol,
                    cap.id,
                    cap.last_updated,
                );
            }
        }
        Ok(())
    }

    /// The token's price in `currency`.
    ///
    /// A token without a table entry yields [`Error::UnknownToken`]; an
    /// entry no refresh has matched yet yields [`Error::MarketDataStale`].
    /// Both carry a documented unit-price fallback the caller may proceed
    /// with.
    pub fn price(&self, token: Address, currency: LegalCurrency) -> Result<BigRational> {
        let caps = self.caps.read();
        match caps.get(&token) {
            Some(cap) if cap.synced => Ok(cap.price(currency)),
            Some(_) => Err(Error::MarketDataStale { address: token }),
            None => Err(Error::UnknownToken { address: token }),
        }
    }

    /// The token's price under a textual currency tag.
    pub fn price_by_tag(&self, token: Address, tag: &str) -> Result<BigRational> {
        self.price(token, LegalCurrency::from_tag(tag))
    }

    /// Legal-currency value of `amount` base units of `token`.
    ///
    /// Stale market data degrades to the unit price with a warning so fee
    /// comparison can proceed; unregistered tokens stay an error.
    pub fn legal_value(&self, token: Address, amount: &BigRational) -> Result<BigRational> {
        let meta = self.registry.by_address(token)?;
        let price = match self.price(token, self.currency) {
            Ok(price) => price,
            Err(Error::MarketDataStale { address }) => {
                tracing::warn!(
                    ?address,
                    "market data never synced; valuing at unit price"
                );
                BigRational::one()
            }
            Err(e) => return Err(e),
        };
        let scaled = amount / BigRational::from_integer(meta.decimals.clone());
        Ok(scaled * price)
    }

    /// Legal-currency value of `amount` wei.
    pub fn legal_value_of_eth(&self, amount: &BigRational) -> Result<BigRational> {
        self.legal_value(self.registry.weth_address(), amount)
    }
}

impl LegalValueOracle for MarketCapProvider {
    fn legal_value(&self, token: Address, amount: &BigRational) -> Result<BigRational> {
        MarketCapProvider::legal_value(self, token, amount)
    }

    fn legal_value_of_eth(&self, amount: &BigRational) -> Result<BigRational> {
        MarketCapProvider::legal_value_of_eth(self, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_relayer_types::Token;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::extract::State;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn registry() -> Arc<TokenRegistry> {
        Arc::new(
            TokenRegistry::new(
                vec![
                    Token::new(addr(1), "LRC", 18, Some("loopring".into())),
                    Token::new(addr(2), "WETH", 18, Some("ethereum".into())),
                    Token::new(addr(3), "RDN", 18, None),
                ],
                vec!["WETH".into(), "LRC".into()],
                "WETH",
            )
            .unwrap(),
        )
    }

    #[derive(Clone)]
    struct MockState {
        fail: Arc<AtomicBool>,
    }

    async fn ticker_handler(State(state): State<MockState>) -> impl IntoResponse {
        if state.fail.load(Ordering::Relaxed) {
            return Err(Json("simulated upstream failure"));
        }
        Ok(Json(serde_json::json!([
            {
                "id": "loopring",
                "price_usd": "0.5",
                "price_btc": "0.00001",
                "price_cny": "3.5",
                "24h_volume_usd": "1000.5",
                "24h_volume_cny": "7003.5",
                "last_updated": "1515139188"
            },
            {
                "id": "ethereum",
                "price_usd": "1000",
                "price_btc": "0.05",
                "price_cny": "7000",
                "24h_volume_usd": "2000000",
                "24h_volume_cny": "14000000",
                "last_updated": "1515139188"
            },
            {
                "id": "unlisted-token",
                "price_usd": "9.9",
                "price_cny": "70",
                "last_updated": "1515139188"
            }
        ])))
    }

    struct MockUpstream {
        fail: Arc<AtomicBool>,
        url: String,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Drop for MockUpstream {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    fn random_free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn spawn_upstream() -> MockUpstream {
        let fail = Arc::new(AtomicBool::new(false));
        let state = MockState { fail: fail.clone() };
        let addr = SocketAddr::from(([127, 0, 0, 1], random_free_port()));
        let app = Router::new()
            .route("/ticker", get(ticker_handler))
            .with_state(state);
        let handle = tokio::spawn(async move {
            axum::Server::bind(&addr)
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        // Wait for the server to start.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        MockUpstream {
            fail,
            url: format!("http://{addr}/ticker?convert=%s"),
            handle,
        }
    }

    fn provider(url: &str, currency: &str) -> Arc<MarketCapProvider> {
        let options = MarketCapOptions::builder()
            .base_url(url)
            .currency(currency)
            .build();
        Arc::new(MarketCapProvider::new(options, registry()).unwrap())
    }

    #[tokio::test]
    async fn sync_fills_the_table_and_queries_convert() {
        let upstream = spawn_upstream().await;
        let provider = provider(&upstream.url, "CNY");
        provider.sync().await.unwrap();

        let lrc_cny = provider.price(addr(1), LegalCurrency::CNY).unwrap();
        assert_eq!(lrc_cny, rat_from_decimal_str("3.5").unwrap());
        let eth_usd = provider.price_by_tag(addr(2), "usd").unwrap();
        assert_eq!(eth_usd, rat_from_decimal_str("1000").unwrap());

        // 2e18 base units of LRC at 3.5 CNY.
        let amount = BigRational::from_integer(BigInt::from(2) * BigInt::from(10u64).pow(18));
        let legal = provider.legal_value(addr(1), &amount).unwrap();
        assert_eq!(legal, rat_from_decimal_str("7").unwrap());

        let eth_legal = provider
            .legal_value_of_eth(&BigRational::from_integer(BigInt::from(10u64).pow(18)))
            .unwrap();
        assert_eq!(eth_legal, rat_from_decimal_str("7000").unwrap());
    }

    #[tokio::test]
    async fn failed_refresh_retains_previous_values() {
        let upstream = spawn_upstream().await;
        let provider = provider(&upstream.url, "CNY");
        provider.sync().await.unwrap();
        let before = provider.price(addr(1), LegalCurrency::CNY).unwrap();

        upstream.fail.store(true, Ordering::Relaxed);
        assert!(provider.sync().await.is_err());
        let after = provider.price(addr(1), LegalCurrency::CNY).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unknown_and_stale_tokens_are_distinguished() {
        let upstream = spawn_upstream().await;
        let provider = provider(&upstream.url, "CNY");
        // Nothing synced yet: registered tokens report stale data.
        assert!(matches!(
            provider.price(addr(1), LegalCurrency::CNY),
            Err(Error::MarketDataStale { .. })
        ));
        // RDN has no external id, so it never gets an entry.
        assert!(matches!(
            provider.price(addr(3), LegalCurrency::CNY),
            Err(Error::UnknownToken { .. })
        ));
        // Legal value still proceeds at unit price for stale entries.
        let amount = BigRational::from_integer(BigInt::from(10u64).pow(18));
        let legal = provider.legal_value(addr(1), &amount).unwrap();
        assert_eq!(legal, BigRational::one());
    }
}

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

//! Token metadata and the market registry.
//!
//! The registry is built once at boot from configuration and then handed
//! around as an immutable handle; no component mutates it afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::Address;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use ring_relayer_utils::{Error, Result};

use crate::rational::pow10;

/// The separator between the base and the quote side of a market string.
pub const MARKET_SEPARATOR: char = '-';

/// An ERC-20 token known to the relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// On-chain contract address.
    pub address: Address,
    /// Upper-case ASCII ticker symbol.
    pub symbol: String,
    /// The decimals factor, `10^d`, as a big integer.
    pub decimals: BigInt,
    /// Cross-reference id used to match rows from the market data upstream.
    pub source: Option<String>,
}

impl Token {
    /// Creates a token out of its address, symbol and decimal count.
    pub fn new(
        address: Address,
        symbol: impl Into<String>,
        decimals: u32,
        source: Option<String>,
    ) -> Self {
        Self {
            address,
            symbol: symbol.into().to_uppercase(),
            decimals: pow10(decimals),
            source,
        }
    }
}

/// Process-wide token lookup and market wrapping.
///
/// Symbols resolve case-insensitively. A configured subset of tokens act as
/// quote ("market") tokens; every market string is rendered `BASE-QUOTE`
/// with the quote side drawn from that subset, in configured priority order.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    by_address: HashMap<Address, Arc<Token>>,
    by_symbol: HashMap<String, Arc<Token>>,
    quote_symbols: Vec<String>,
    weth: Address,
}

impl TokenRegistry {
    /// Builds the registry out of the configured token set.
    ///
    /// `quote_symbols` lists the market tokens by priority; `weth_symbol`
    /// names the token that anchors ETH-denominated conversions. Both must
    /// resolve against `tokens`.
    pub fn new(
        tokens: Vec<Token>,
        quote_symbols: Vec<String>,
        weth_symbol: &str,
    ) -> Result<Self> {
        let mut by_address = HashMap::with_capacity(tokens.len());
        let mut by_symbol = HashMap::with_capacity(tokens.len() * 2);
        for token in tokens {
            let token = Arc::new(token);
            by_address.insert(token.address, token.clone());
            by_symbol.insert(token.symbol.clone(), token.clone());
            by_symbol.insert(token.symbol.to_lowercase(), token.clone());
        }
        let weth = by_symbol
            .get(&weth_symbol.to_uppercase())
            .map(|t| t.address)
            .ok_or(Error::Generic("weth token missing from the registry"))?;
        let quote_symbols = quote_symbols
            .into_iter()
            .map(|s| s.to_uppercase())
            .collect::<Vec<_>>();
        for quote in &quote_symbols {
            if !by_symbol.contains_key(quote) {
                return Err(Error::Generic("quote token missing from the registry"));
            }
        }
        Ok(Self {
            by_address,
            by_symbol,
            quote_symbols,
            weth,
        })
    }

    /// Looks a token up by its contract address.
    pub fn by_address(&self, address: Address) -> Result<&Token> {
        self.by_address
            .get(&address)
            .map(Arc::as_ref)
            .ok_or(Error::UnknownToken { address })
    }

    /// Looks a token up by symbol, case-insensitively.
    pub fn by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.by_symbol
            .get(symbol)
            .or_else(|| self.by_symbol.get(&symbol.to_uppercase()))
            .map(Arc::as_ref)
    }

    /// All registered tokens, deduplicated by address.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.by_address.values().map(Arc::as_ref)
    }

    /// The address anchoring ETH-denominated market data.
    pub fn weth_address(&self) -> Address {
        self.weth
    }

    /// Wraps an unordered token pair into its canonical market string.
    ///
    /// The quote side is the pair member that appears earliest in the
    /// configured quote list; the other member is the base.
    pub fn wrap_market(&self, token_a: Address, token_b: Address) -> Result<String> {
        let a = self.by_address(token_a)?;
        let b = self.by_address(token_b)?;
        let (base, quote) = self.split_base_quote(a, b)?;
        Ok(format!("{}{}{}", base.symbol, MARKET_SEPARATOR, quote.symbol))
    }

    /// Unwraps a market string back into its `(base, quote)` token pair.
    pub fn unwrap_market(&self, market: &str) -> Result<(&Token, &Token)> {
        let (base, quote) = market
            .split_once(MARKET_SEPARATOR)
            .ok_or(Error::Generic("malformed market string"))?;
        let base = self
            .by_symbol(base)
            .ok_or(Error::Generic("unknown base token symbol"))?;
        let quote = self
            .by_symbol(quote)
            .ok_or(Error::Generic("unknown quote token symbol"))?;
        Ok((base, quote))
    }

    /// True when `token` is configured as a quote token.
    pub fn is_quote_token(&self, token: Address) -> bool {
        self.by_address
            .get(&token)
            .map(|t| self.quote_symbols.contains(&t.symbol))
            .unwrap_or(false)
    }

    fn split_base_quote<'a>(
        &self,
        a: &'a Token,
        b: &'a Token,
    ) -> Result<(&'a Token, &'a Token)> {
        for quote in &self.quote_symbols {
            if &a.symbol == quote {
                return Ok((b, a));
            }
            if &b.symbol == quote {
                return Ok((a, b));
            }
        }
        Err(Error::Generic("neither side of the pair is a quote token"))
    }
}

/// Normalizes an unordered token pair so both orientations compare equal.
pub fn unordered_pair(a: Address, b: Address) -> (Address, Address) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn registry() -> TokenRegistry {
        TokenRegistry::new(
            vec![
                Token::new(addr(1), "LRC", 18, Some("loopring".into())),
                Token::new(addr(2), "WETH", 18, Some("ethereum".into())),
                Token::new(addr(3), "RDN", 18, Some("raiden-network".into())),
            ],
            vec!["WETH".into(), "LRC".into()],
            "WETH",
        )
        .unwrap()
    }

    #[test]
    fn symbols_resolve_case_insensitively() {
        let reg = registry();
        assert_eq!(reg.by_symbol("lrc").unwrap().address, addr(1));
        assert_eq!(reg.by_symbol("Lrc").unwrap().address, addr(1));
        assert_eq!(reg.by_symbol("LRC").unwrap().address, addr(1));
        assert!(reg.by_symbol("DAI").is_none());
    }

    #[test]
    fn market_wrapping_picks_the_priority_quote() {
        let reg = registry();
        assert_eq!(reg.wrap_market(addr(1), addr(2)).unwrap(), "LRC-WETH");
        // Orientation does not matter.
        assert_eq!(reg.wrap_market(addr(2), addr(1)).unwrap(), "LRC-WETH");
        // LRC quotes pairs that do not involve WETH.
        assert_eq!(reg.wrap_market(addr(3), addr(1)).unwrap(), "RDN-LRC");
    }

    #[test]
    fn unwrap_returns_the_ordered_pair() {
        let reg = registry();
        let (base, quote) = reg.unwrap_market("LRC-WETH").unwrap();
        assert_eq!(base.address, addr(1));
        assert_eq!(quote.address, addr(2));
        assert!(reg.unwrap_market("LRCWETH").is_err());
    }

    #[test]
    fn unknown_address_is_an_error() {
        let reg = registry();
        assert!(matches!(
            reg.by_address(addr(9)),
            Err(Error::UnknownToken { .. })
        ));
    }

    #[test]
    fn unordered_pair_is_orientation_free() {
        assert_eq!(unordered_pair(addr(2), addr(1)), (addr(1), addr(2)));
        assert_eq!(unordered_pair(addr(1), addr(2)), (addr(1), addr(2)));
    }
}

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

//! # Relayer Utils
//!
//! Common error types, the crate-wide `Result` alias and retry policies
//! shared by every other crate in the workspace.

use ethers::types::{Address, H256};

/// Retry functionality
pub mod retry;

/// An enum of all possible errors that could be encountered during the
/// execution of the ring relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// HTTP client error while talking to the market data upstream.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Sled transaction error.
    #[error(transparent)]
    SledTransaction(#[from] sled::transaction::TransactionError<std::io::Error>),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Smart contract error.
    #[error(transparent)]
    EthersContract(
        #[from]
        ethers::contract::ContractError<
            ethers::providers::Provider<ethers::providers::Http>,
        >,
    ),
    /// Error while recovering or verifying an order signature.
    #[error(transparent)]
    Signature(#[from] ethers::types::SignatureError),
    /// Error while building a wallet out of a private key.
    #[error(transparent)]
    EthersWallet(#[from] ethers::signers::WalletError),
    /// Gas oracle error while estimating the gas price.
    #[error(transparent)]
    GasOracle(#[from] ethers::middleware::gas_oracle::GasOracleError),
    /// An order failed boundary validation and was rejected.
    #[error("Invalid order: {}", reason)]
    InvalidOrder {
        /// Human readable reason for the rejection.
        reason: String,
    },
    /// A second submission under an already-known order hash.
    #[error("Duplicate order: {:?}", hash)]
    DuplicateOrder {
        /// The order hash that was already known.
        hash: H256,
    },
    /// The token is not registered with the relayer.
    #[error("Unknown token: {:?}", address)]
    UnknownToken {
        /// Address of the unregistered token.
        address: Address,
    },
    /// Market data for the token has not been refreshed recently enough.
    #[error("Market data stale for token: {:?}", address)]
    MarketDataStale {
        /// Address of the token with stale data.
        address: Address,
    },
    /// The product of the candidate ring's exchange rates is below one.
    #[error("Ring rate product below unit, ring is not profitable")]
    RingProductUnprofitable,
    /// A leg's rate-reduced sell amount exceeds its original sell amount.
    #[error("Rate amount exceeds the original order amount")]
    RateExceedsOriginal,
    /// The coefficient-of-variation test rejected the candidate ring.
    #[error("CVS {} exceeds the configured threshold {}", cvs, threshold)]
    CvsThresholdExceeded {
        /// The computed scaled CVS value.
        cvs: i64,
        /// The configured admission threshold.
        threshold: i64,
    },
    /// The downstream submitter refused the ring.
    #[error("Submitter rejected the ring: {}", reason)]
    SubmitterRejected {
        /// Reason reported by the submitter.
        reason: String,
    },
    /// A chain reorganization was detected; matching is suspended.
    #[error("Chain fork detected at block #{}", block)]
    ChainFork {
        /// The common-ancestor block number of the fork.
        block: u64,
    },
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// A background task failed and stopped abnormally.
    #[error("Task stopped abnormally")]
    TaskStoppedAbnormally,
}

/// A type alias for the result used across the ring relayer.
pub type Result<T> = std::result::Result<T, Error>;

// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Esplora
//!
//! This module defines an [`EsploraProvider`] struct that serves [`UtxoProvider`] lookups from
//! an Esplora backend by way of the `reqwest` HTTP client.
//!
//! ## Example
//!
//! ```no_run
//! # use ordinals_tx::provider::esplora::{EsploraConfig, EsploraProvider};
//! let provider = EsploraProvider::from_config(&EsploraConfig {
//!     base_url: "https://blockstream.info/testnet/api".to_string(),
//!     concurrency: None,
//! });
//! ```
//!
//! see: <https://github.com/Blockstream/esplora/blob/master/API.md>

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::Txid;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{TransactionInfo, UtxoProvider};
use crate::error::Error;
use crate::types::Utxo;

/// Default number of concurrent requests a caller should batch against Esplora
pub const DEFAULT_CONCURRENT_REQUESTS: u8 = 4;

/// Errors that can happen talking to Esplora
#[derive(Debug)]
pub enum EsploraError {
    /// Error during reqwest HTTP request
    Reqwest(reqwest::Error),
    /// HTTP response error
    HttpResponse(u16),
    /// Invalid txid returned by a broadcast
    InvalidTxid(String),
}

impl fmt::Display for EsploraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for EsploraError {}

impl From<reqwest::Error> for EsploraError {
    fn from(err: reqwest::Error) -> Self {
        EsploraError::Reqwest(err)
    }
}

/// Configuration for an [`EsploraProvider`]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct EsploraConfig {
    /// Base URL of the esplora service
    ///
    /// eg. `https://blockstream.info/api/`
    pub base_url: String,
    /// Number of parallel requests sent to the esplora service (default: 4)
    pub concurrency: Option<u8>,
}

#[derive(Deserialize, Clone, Debug)]
struct Vin {
    txid: Txid,
}

#[derive(Deserialize, Clone, Debug)]
struct TxStatus {
    confirmed: bool,
}

#[derive(Deserialize, Clone, Debug)]
struct Tx {
    txid: Txid,
    vin: Vec<Vin>,
    weight: u64,
    fee: u64,
    status: TxStatus,
}

/// Chain backend speaking the Esplora REST API
#[derive(Debug)]
pub struct EsploraProvider {
    url: String,
    client: Client,
    concurrency: u8,
}

impl EsploraProvider {
    /// Create a new instance of the client from a base URL
    pub fn new(base_url: &str) -> Self {
        EsploraProvider {
            url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            concurrency: DEFAULT_CONCURRENT_REQUESTS,
        }
    }

    /// Create a new instance from an [`EsploraConfig`]
    pub fn from_config(config: &EsploraConfig) -> Self {
        let mut provider = Self::new(&config.base_url);
        if let Some(concurrency) = config.concurrency {
            provider.concurrency = concurrency;
        }
        provider
    }

    /// Concurrency configured for batch lookups
    pub fn concurrency(&self) -> u8 {
        self.concurrency
    }

    async fn get_text(&self, path: &str) -> Result<String, EsploraError> {
        let resp = self
            .client
            .get(&format!("{}{}", self.url, path))
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(EsploraError::HttpResponse(resp.status().as_u16()));
        }

        Ok(resp.text().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, EsploraError> {
        let resp = self
            .client
            .get(&format!("{}{}", self.url, path))
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(EsploraError::HttpResponse(resp.status().as_u16()));
        }

        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl UtxoProvider for EsploraProvider {
    async fn get_unspent_utxos(&self, address: &str) -> Result<Vec<Utxo>, Error> {
        Ok(self
            .get_json::<Vec<Utxo>>(&format!("/address/{}/utxo", address))
            .await?)
    }

    async fn get_transaction_hex(&self, txid: &Txid) -> Result<String, Error> {
        Ok(self.get_text(&format!("/tx/{}/hex", txid)).await?)
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<TransactionInfo, Error> {
        let tx = self.get_json::<Tx>(&format!("/tx/{}", txid)).await?;
        Ok(TransactionInfo {
            txid: tx.txid,
            confirmed: tx.status.confirmed,
            weight: tx.weight,
            fee: tx.fee,
            vin_txids: tx.vin.into_iter().map(|vin| vin.txid).collect(),
        })
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, Error> {
        let resp = self
            .client
            .post(&format!("{}/tx", self.url))
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(EsploraError::from)?;

        if resp.status() != StatusCode::OK {
            return Err(EsploraError::HttpResponse(resp.status().as_u16()).into());
        }

        let body = resp.text().await.map_err(EsploraError::from)?;
        debug!("esplora accepted transaction {}", body);
        Txid::from_str(body.trim()).map_err(|_| EsploraError::InvalidTxid(body).into())
    }
}

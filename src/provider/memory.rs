// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! In-memory provider
//!
//! This module defines an in-memory implementation of [`UtxoProvider`] and [`BundleProvider`]
//! that doesn't talk to any backend. It can be used for offline compilation or tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bitcoin::consensus::encode::{deserialize_hex, serialize_hex};
use bitcoin::{OutPoint, Transaction, Txid};

use super::{BundleProvider, TransactionInfo, UtxoProvider};
use crate::error::Error;
use crate::types::{BundleData, Utxo};

#[derive(Debug, Default)]
struct Store {
    utxos: BTreeMap<String, Vec<Utxo>>,
    transactions: HashMap<Txid, (String, TransactionInfo)>,
    bundles: HashMap<OutPoint, BundleData>,
    broadcasted: Vec<String>,
}

/// In-memory chain backend and ordinals index
///
/// Once a transaction has been broadcast through this provider, the outputs it spends are
/// removed from the UTXO set.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    store: RwLock<Store>,
}

impl MemoryProvider {
    /// Create a new empty provider
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an unspent output owned by `address`
    pub fn add_utxo(&self, address: &str, utxo: Utxo) {
        self.write()
            .utxos
            .entry(address.to_string())
            .or_default()
            .push(utxo);
    }

    /// Attach inscriptions and satributes to an outpoint
    pub fn add_bundle(&self, outpoint: OutPoint, bundle: BundleData) {
        self.write().bundles.insert(outpoint, bundle);
    }

    /// Store a transaction with its fee and confirmation status
    pub fn add_transaction(&self, tx: &Transaction, fee: u64, confirmed: bool) -> Txid {
        let txid = tx.compute_txid();
        let info = TransactionInfo {
            txid,
            confirmed,
            weight: tx.weight().to_wu(),
            fee,
            vin_txids: tx.input.iter().map(|i| i.previous_output.txid).collect(),
        };
        self.write()
            .transactions
            .insert(txid, (serialize_hex(tx), info));
        txid
    }

    /// Raw transactions broadcast so far, oldest first
    pub fn broadcasted(&self) -> Vec<String> {
        self.read().broadcasted.clone()
    }
}

#[async_trait]
impl UtxoProvider for MemoryProvider {
    async fn get_unspent_utxos(&self, address: &str) -> Result<Vec<Utxo>, Error> {
        Ok(self.read().utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_transaction_hex(&self, txid: &Txid) -> Result<String, Error> {
        self.read()
            .transactions
            .get(txid)
            .map(|(hex, _)| hex.clone())
            .ok_or_else(|| Error::Provider(format!("Transaction not found: {}", txid)))
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<TransactionInfo, Error> {
        self.read()
            .transactions
            .get(txid)
            .map(|(_, info)| info.clone())
            .ok_or_else(|| Error::Provider(format!("Transaction not found: {}", txid)))
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, Error> {
        let tx: Transaction =
            deserialize_hex(tx_hex).map_err(|e| Error::Provider(e.to_string()))?;
        let txid = tx.compute_txid();

        let mut store = self.write();
        for txin in &tx.input {
            for utxos in store.utxos.values_mut() {
                utxos.retain(|u| u.outpoint() != txin.previous_output);
            }
        }
        store.broadcasted.push(tx_hex.to_string());

        Ok(txid)
    }
}

#[async_trait]
impl BundleProvider for MemoryProvider {
    async fn get_utxo_bundle(
        &self,
        outpoint: &OutPoint,
        _address: &str,
        _is_external: bool,
    ) -> Result<Option<BundleData>, Error> {
        Ok(self.read().bundles.get(outpoint).cloned())
    }
}

// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::{Address, Network, OutPoint, Script};

use crate::address::{parse_address, AddressContext};
use crate::error::Error;
use crate::utxo::ExtendedUtxo;

/// The two address roles a transaction is compiled for
///
/// Payment and ordinals may be the same [`AddressContext`]. The context holds no state of its
/// own and can be reused across compilations.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    network: Network,
    payment: Arc<AddressContext>,
    ordinals: Arc<AddressContext>,
}

impl TransactionContext {
    /// Build a context, both addresses must be on the same network
    pub fn new(payment: Arc<AddressContext>, ordinals: Arc<AddressContext>) -> Result<Self, Error> {
        if payment.network() != ordinals.network() {
            return Err(Error::InvalidAddress(format!(
                "payment address {} and ordinals address {} are on different networks",
                payment.address(),
                ordinals.address()
            )));
        }

        Ok(TransactionContext {
            network: payment.network(),
            payment,
            ordinals,
        })
    }

    /// Network of both addresses
    pub fn network(&self) -> Network {
        self.network
    }

    /// Address funding BTC sends and fees
    pub fn payment_address(&self) -> &Arc<AddressContext> {
        &self.payment
    }

    /// Address holding inscriptions and rare sats
    pub fn ordinals_address(&self) -> &Arc<AddressContext> {
        &self.ordinals
    }

    /// Where change goes unless overridden
    pub fn change_address(&self) -> &str {
        self.payment.address()
    }

    fn contexts(&self) -> impl Iterator<Item = &Arc<AddressContext>> {
        let ordinals = if Arc::ptr_eq(&self.payment, &self.ordinals) {
            None
        } else {
            Some(&self.ordinals)
        };
        std::iter::once(&self.payment).chain(ordinals)
    }

    /// The context owning `address`, if any
    pub fn address_context(&self, address: &str) -> Option<&Arc<AddressContext>> {
        self.contexts().find(|context| context.address() == address)
    }

    /// The context whose output script is `script`, if any
    pub fn address_context_for_script(&self, script: &Script) -> Option<&Arc<AddressContext>> {
        self.contexts()
            .find(|context| context.script_pubkey().as_script() == script)
    }

    /// Parse an address, checking it's on the network of the context
    pub fn parse_address(&self, address: &str) -> Result<Address, Error> {
        parse_address(address, self.network)
    }

    /// Find an unspent output of the payment or the ordinals address
    pub async fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Arc<ExtendedUtxo>>, Error> {
        for context in self.contexts() {
            if let Some(utxo) = context.get_utxo(outpoint).await? {
                return Ok(Some(utxo));
            }
        }
        Ok(None)
    }

    /// Every unspent output of both addresses, keyed by outpoint
    pub(crate) async fn utxo_index(&self) -> Result<HashMap<OutPoint, Arc<ExtendedUtxo>>, Error> {
        let mut index = HashMap::new();
        for context in self.contexts() {
            for utxo in context.get_utxos().await? {
                index.entry(utxo.outpoint()).or_insert(utxo);
            }
        }
        Ok(index)
    }
}

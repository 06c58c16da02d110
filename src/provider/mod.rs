//! Providers
//!
//! This module defines the traits the compiler uses to reach the outside world: a chain backend
//! to list UTXOs, fetch transactions and broadcast ([`UtxoProvider`]), an ordinals index to learn
//! which inscriptions and rare sats sit on a UTXO ([`BundleProvider`]) and an optional runes
//! decoder ([`RuneClient`]).
//!
//! Handles are passed explicitly to every [`AddressContext`](crate::AddressContext) through
//! [`Providers`], there is no process-wide registry.
//!
//! [`MemoryProvider`] implements both chain and bundle lookups in memory. With the `esplora`
//! feature, [`esplora::EsploraProvider`] serves chain lookups over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};

use crate::error::Error;
use crate::types::{BundleData, RuneOp, Utxo};

mod memory;
pub use memory::MemoryProvider;

#[cfg(feature = "esplora")]
pub mod esplora;

/// Transaction data needed to walk unconfirmed ancestors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Transaction id
    pub txid: Txid,
    /// Whether the transaction is in a block
    pub confirmed: bool,
    /// Weight in weight units
    pub weight: u64,
    /// Absolute fee in satoshis
    pub fee: u64,
    /// Transactions spent by this one
    pub vin_txids: Vec<Txid>,
}

impl TransactionInfo {
    /// Virtual size, weight divided by 4 rounded up
    pub fn vsize(&self) -> u64 {
        (self.weight + 3) / 4
    }
}

/// Chain backend
#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// List the unspent outputs of `address`
    async fn get_unspent_utxos(&self, address: &str) -> Result<Vec<Utxo>, Error>;

    /// Raw transaction as hex
    async fn get_transaction_hex(&self, txid: &Txid) -> Result<String, Error>;

    /// Fee and ancestry data of a transaction
    async fn get_transaction(&self, txid: &Txid) -> Result<TransactionInfo, Error>;

    /// Broadcast a raw transaction, returning its id
    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, Error>;
}

/// Ordinals index
#[async_trait]
pub trait BundleProvider: Send + Sync {
    /// Inscriptions and rare sats of the UTXO at `outpoint`
    ///
    /// `is_external` is set for outputs that don't belong to the wallet, the index may resolve
    /// them differently. `None` means the index doesn't know the output.
    async fn get_utxo_bundle(
        &self,
        outpoint: &OutPoint,
        address: &str,
        is_external: bool,
    ) -> Result<Option<BundleData>, Error>;
}

/// Runes decoder
#[async_trait]
pub trait RuneClient: Send + Sync {
    /// Decode the runestone of a raw transaction, if it has one
    async fn decode_rune_script(&self, tx_hex: &str) -> Result<Option<RuneOp>, Error>;
}

/// Provider handles shared by the address contexts of a transaction
#[derive(Clone)]
pub struct Providers {
    /// Chain backend
    pub utxo: Arc<dyn UtxoProvider>,
    /// Ordinals index
    pub bundle: Arc<dyn BundleProvider>,
}

impl Providers {
    /// Bundle two handles
    pub fn new(utxo: Arc<dyn UtxoProvider>, bundle: Arc<dyn BundleProvider>) -> Self {
        Providers { utxo, bundle }
    }

    /// Use the same [`MemoryProvider`] for both roles
    pub fn from_memory(provider: Arc<MemoryProvider>) -> Self {
        Providers {
            utxo: provider.clone(),
            bundle: provider,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

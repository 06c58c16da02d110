// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

// only enables the `doc_cfg` feature when the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Ordinals-aware transaction compilation
//!
//! This crate builds Bitcoin transactions for a wallet holding inscriptions and rare sats next
//! to plain BTC. Callers describe *what* a transaction must do with a list of [`Action`]s: send
//! an amount, move a whole UTXO, split a UTXO at a sat offset or add a script output.
//! [`EnhancedTransaction`] turns them into a funded, fee-correct and dust-safe transaction,
//! spending inscribed or rare sats only when asked to.
//!
//! [`EnhancedPsbt`] goes the other way: it reads a PSBT built by a third party and reports where
//! every inscription and rare sat of its inputs ends up.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ordinals_tx::bitcoin::Network;
//! use ordinals_tx::provider::{MemoryProvider, Providers};
//! use ordinals_tx::signer::SignerBackend;
//! use ordinals_tx::*;
//!
//! # async fn run(signer: SignerBackend) -> Result<(), Error> {
//! let providers = Providers::from_memory(Arc::new(MemoryProvider::new()));
//! let payment = Arc::new(AddressContext::new(
//!     AddressType::P2wpkh,
//!     "bcrt1q6rhpng9evdsfnn833a4f4vej0asu6dk5srld6x",
//!     "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
//!     Network::Regtest,
//!     0,
//!     signer,
//!     providers,
//! )?);
//! let context = TransactionContext::new(payment.clone(), payment)?;
//!
//! let transaction = EnhancedTransaction::new(
//!     context,
//!     vec![Action::SendBtc(SendBtcAction {
//!         to_address: "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080".to_string(),
//!         amount: 25_000,
//!         combinable: false,
//!     })],
//!     8.0,
//!     TransactionOptions::default(),
//! )?;
//! let summary = transaction.get_fee_summary().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! * `esplora`: enables [`provider::esplora::EsploraProvider`], a chain provider speaking the
//!   Esplora REST API over `reqwest`

pub extern crate bitcoin;
pub extern crate miniscript;

#[macro_use]
pub(crate) mod error;
pub mod action;
pub mod address;
pub mod context;
pub mod provider;
pub mod psbt;
pub mod signer;
pub mod summary;
pub mod transaction;
mod types;
pub mod utils;
mod utxo;
pub mod vsize;

pub use action::{Action, ActionMap, ScriptAction, SendBtcAction, SendUtxoAction, SplitUtxoAction};
pub use address::{AddressContext, AddressType, IoSizes};
pub use context::TransactionContext;
pub use error::{Error, ErrorKind};
pub use psbt::{EnhancedInput, EnhancedPsbt, InputToSign, PsbtSummary, SignPsbtOptions};
pub use transaction::{EnhancedTransaction, FeeSummary, TransactionOptions};
pub use types::*;
pub use utxo::ExtendedUtxo;

/// Get the version of [`ordinals_tx`](crate) at runtime.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION", "unknown")
}

// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Transaction compilation
//!
//! An [`EnhancedTransaction`] turns a list of [`Action`]s into a funded, signed transaction.
//! Every call compiles from scratch, so changing the fee rate between calls is always honored.
//!
//! ```no_run
//! # use ordinals_tx::*;
//! # async fn run(context: TransactionContext) -> Result<(), Error> {
//! let actions = vec![Action::SendBtc(SendBtcAction {
//!     to_address: "bcrt1q6rhpng9evdsfnn833a4f4vej0asu6dk5srld6x".to_string(),
//!     amount: 10_000,
//!     combinable: false,
//! })];
//! let mut transaction =
//!     EnhancedTransaction::new(context, actions, 12.0, TransactionOptions::default())?;
//!
//! let summary = transaction.get_fee_summary().await?;
//! println!("fee: {} sats", summary.fee);
//!
//! transaction.set_fee_rate(15.0)?;
//! let txid = transaction.broadcast().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{OutPoint, Txid};
use log::info;
use miniscript::psbt::PsbtExt;
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionMap};
use crate::address::AddressContext;
use crate::context::TransactionContext;
use crate::error::Error;
use crate::summary::{attribution_inputs, fee_output, load_bundles, summarize_outputs};
use crate::types::{FeeOutput, TransactionOutput};
use crate::utxo::ExtendedUtxo;

mod coin_selection;
mod processors;

use coin_selection::{apply_send_btc_actions_and_fee, FeeResult};
use processors::{
    apply_script_actions, apply_send_utxo_actions, apply_split_utxo_actions, InProgressTransaction,
};

/// Compilation options
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TransactionOptions {
    /// Signal replaceability on every input
    pub rbf_enabled: bool,
    /// Outpoints that must never be spent
    pub exclude_outpoint_list: Vec<OutPoint>,
    /// Outpoints that must be spent, funding the BTC sends and the fee
    pub force_include_outpoint_list: Vec<OutPoint>,
    /// Send change here instead of the payment address
    pub override_change_address: Option<String>,
    /// Let the fee engine spend unconfirmed payment UTXOs when confirmed ones are not enough
    pub allow_unconfirmed_input: bool,
    /// Pay for the unconfirmed ancestors of the inputs, so the whole package reaches the rate
    pub use_effective_fee_rate: bool,
    /// Accept script actions other than `OP_RETURN`
    pub allow_unknown_outputs: bool,
}

/// Fee and outputs of a compiled transaction
#[derive(Debug, Clone)]
pub struct FeeSummary {
    /// Fee in satoshis
    pub fee: u64,
    /// Fee divided by the estimated vsize
    pub fee_rate: f64,
    /// Fee rate of the transaction together with its unconfirmed ancestors
    pub effective_fee_rate: f64,
    /// Estimated virtual size once signed
    pub vsize: u64,
    /// UTXOs spent, in input order
    pub inputs: Vec<Arc<ExtendedUtxo>>,
    /// Outputs with the inscriptions and rare sats they receive
    pub outputs: Vec<TransactionOutput>,
    /// Sats spent as fee, with what they carry
    pub fee_output: FeeOutput,
}

/// Round a fee rate to sat/vB, rejecting anything not positive
fn validate_fee_rate(fee_rate: f64) -> Result<u64, Error> {
    let rounded = fee_rate.round();
    if !rounded.is_finite() || rounded < 1.0 {
        return Err(Error::InvalidFeeRate(fee_rate));
    }
    Ok(rounded as u64)
}

struct Compiled {
    tx: InProgressTransaction,
    fee: FeeResult,
}

/// A transaction described by actions, compiled on demand
#[derive(Debug)]
pub struct EnhancedTransaction {
    context: TransactionContext,
    actions: ActionMap,
    fee_rate: u64,
    options: TransactionOptions,
}

impl EnhancedTransaction {
    /// Validate the actions and the fee rate
    ///
    /// The fee rate is rounded to the nearest integer and must be at least 1 sat/vB.
    pub fn new(
        context: TransactionContext,
        actions: Vec<Action>,
        fee_rate: f64,
        options: TransactionOptions,
    ) -> Result<Self, Error> {
        let fee_rate = validate_fee_rate(fee_rate)?;
        let actions = ActionMap::new(actions)?;

        Ok(EnhancedTransaction {
            context,
            actions,
            fee_rate,
            options,
        })
    }

    /// Fee rate in sat/vB
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    /// Change the fee rate for the next compilation
    pub fn set_fee_rate(&mut self, fee_rate: f64) -> Result<(), Error> {
        self.fee_rate = validate_fee_rate(fee_rate)?;
        Ok(())
    }

    /// The actions, grouped by kind
    pub fn actions(&self) -> &ActionMap {
        &self.actions
    }

    /// Compilation options
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    async fn compile(&self) -> Result<Compiled, Error> {
        let mut tx = InProgressTransaction::new()?;

        apply_script_actions(&mut tx, &self.actions.script, &self.options)?;
        apply_send_utxo_actions(&mut tx, &self.context, &self.actions.send_utxo, &self.options)
            .await?;
        apply_split_utxo_actions(&mut tx, &self.context, &self.actions.split_utxo, &self.options)
            .await?;

        let change_address = self
            .actions
            .spendable_destination()
            .or(self.options.override_change_address.as_deref())
            .unwrap_or_else(|| self.context.change_address());
        let change_script = self.context.parse_address(change_address)?.script_pubkey();

        let fee = apply_send_btc_actions_and_fee(
            &mut tx,
            &self.context,
            &self.actions.send_btc,
            self.fee_rate,
            &self.options,
            &change_script,
        )
        .await?;

        Ok(Compiled { tx, fee })
    }

    async fn sign(&self, tx: &mut InProgressTransaction) -> Result<(), Error> {
        let mut owners: Vec<(Arc<AddressContext>, Vec<usize>)> = vec![];
        for (index, utxo) in tx.inputs.iter().enumerate() {
            let owner = self
                .context
                .address_context(utxo.address())
                .ok_or_else(|| Error::AddressNotInContext(utxo.address().to_string()))?;
            match owners.iter_mut().find(|(context, _)| Arc::ptr_eq(context, owner)) {
                Some((_, indexes)) => indexes.push(index),
                None => owners.push((owner.clone(), vec![index])),
            }
        }

        for (owner, indexes) in owners {
            owner.sign(&mut tx.psbt, &indexes).await?;
        }
        Ok(())
    }

    /// Compile without signing and summarize fee and outputs
    pub async fn get_fee_summary(&self) -> Result<FeeSummary, Error> {
        let Compiled { tx, fee } = self.compile().await?;

        let bundles = load_bundles(&tx.inputs).await?;
        let inputs = attribution_inputs(&tx.inputs, &bundles);
        let txouts = &tx.psbt.unsigned_tx.output;
        let outputs = summarize_outputs(&inputs, txouts, self.context.network());
        let fee_output = fee_output(&inputs, tx.total_outputs(), fee.fee);

        Ok(FeeSummary {
            fee: fee.fee,
            fee_rate: fee.fee_rate,
            effective_fee_rate: fee.effective_fee_rate,
            vsize: fee.vsize,
            inputs: tx.inputs.clone(),
            outputs,
            fee_output,
        })
    }

    /// Compile without signing, as base64, for signing elsewhere
    pub async fn get_unsigned_psbt_base64(&self) -> Result<String, Error> {
        Ok(self.compile().await?.tx.psbt.to_string())
    }

    /// Compile, sign and finalize, returning the raw transaction and its id
    pub async fn get_transaction_hex_and_id(&self) -> Result<(String, Txid), Error> {
        let Compiled { mut tx, fee } = self.compile().await?;
        self.sign(&mut tx).await?;

        let secp = Secp256k1::verification_only();
        tx.psbt.finalize_mut(&secp).map_err(Error::Finalize)?;
        let signed = tx.psbt.extract_tx_unchecked_fee_rate();
        let txid = signed.compute_txid();

        info!(
            "compiled {} with {} inputs, {} outputs, fee {} ({} sat/vB)",
            txid,
            signed.input.len(),
            signed.output.len(),
            fee.fee,
            self.fee_rate
        );
        Ok((serialize_hex(&signed), txid))
    }

    /// Compile, sign and push to the network through the payment address's provider
    pub async fn broadcast(&self) -> Result<Txid, Error> {
        let (hex, _) = self.get_transaction_hex_and_id().await?;
        let txid = self
            .context
            .payment_address()
            .providers()
            .utxo
            .send_raw_transaction(&hex)
            .await?;
        info!("broadcasted {}", txid);
        Ok(txid)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_fee_rate_is_rounded() {
        assert_eq!(validate_fee_rate(10.4).unwrap(), 10);
        assert_eq!(validate_fee_rate(10.5).unwrap(), 11);
        assert_eq!(validate_fee_rate(0.6).unwrap(), 1);
    }

    #[test]
    fn test_invalid_fee_rates() {
        for rate in [0.0, 0.4, -3.0, f64::NAN, f64::INFINITY] {
            assert_matches!(validate_fee_rate(rate), Err(Error::InvalidFeeRate(_)));
        }
    }

    #[test]
    fn test_options_defaults() {
        let options: TransactionOptions =
            serde_json::from_str(r#"{"rbf_enabled": true}"#).unwrap();
        assert!(options.rbf_enabled);
        assert!(options.exclude_outpoint_list.is_empty());
        assert!(!options.allow_unknown_outputs);
    }
}

// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! BTC sends and fee
//!
//! The last processor adds the BTC send outputs, then funds them and the fee from the payment
//! address. Candidates are ordered so that plain confirmed UTXOs, largest first, are spent
//! before anything carrying inscriptions or rare sats.
//!
//! Each round estimates the size of the transaction with a change output. If the change left
//! after the fee is above the dust limit the size is estimated again with the real change
//! amount, the larger estimate wins and the change output is added. Otherwise, if the inputs
//! already cover the outputs and a fee without change, the leftover goes to the miner. If not,
//! one more candidate is added and the round starts again.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::{ScriptBuf, TxOut, Txid};
use futures::future::try_join_all;
use log::{debug, info};

use super::processors::{resolve_utxo, InProgressTransaction};
use super::TransactionOptions;
use crate::action::SendBtcAction;
use crate::context::TransactionContext;
use crate::error::Error;
use crate::provider::UtxoProvider;
use crate::utils::{fee_for_vsize, IsDust};
use crate::utxo::ExtendedUtxo;
use crate::vsize::estimate_vsize;

/// Number of ancestor lookups in flight at once
const ANCESTOR_BATCH_SIZE: usize = 10;

/// Fee the engine settled on
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FeeResult {
    pub fee: u64,
    pub vsize: u64,
    pub fee_rate: f64,
    pub effective_fee_rate: f64,
    pub change: Option<u64>,
}

/// Size and fee of the unconfirmed transactions the inputs depend on
#[derive(Debug, Default)]
struct UnconfirmedPackage {
    vsize: u64,
    fee: u64,
    visited: HashSet<Txid>,
}

impl UnconfirmedPackage {
    /// Walk the unconfirmed ancestry of `txid`, skipping what was already counted
    async fn add_ancestors(&mut self, provider: &dyn UtxoProvider, txid: Txid) -> Result<(), Error> {
        if !self.visited.insert(txid) {
            return Ok(());
        }

        let mut pending = vec![txid];
        while !pending.is_empty() {
            let mut next = vec![];
            for batch in pending.chunks(ANCESTOR_BATCH_SIZE) {
                let infos = try_join_all(batch.iter().map(|txid| provider.get_transaction(txid))).await?;
                for info in infos {
                    if info.confirmed {
                        continue;
                    }
                    self.vsize += info.vsize();
                    self.fee += info.fee;
                    for parent in info.vin_txids {
                        if self.visited.insert(parent) {
                            next.push(parent);
                        }
                    }
                }
            }
            pending = next;
        }
        debug!(
            "unconfirmed package is now {} vB paying {} sats",
            self.vsize, self.fee
        );

        Ok(())
    }
}

struct FeeEngine<'a> {
    fee_rate: u64,
    package: Option<UnconfirmedPackage>,
    provider: &'a dyn UtxoProvider,
}

impl FeeEngine<'_> {
    /// Fee this transaction must pay at `vsize`
    ///
    /// With effective fee rate accounting, the whole unconfirmed package must reach the rate,
    /// but never less than the transaction's own size at the rate.
    fn required_fee(&self, vsize: u64) -> u64 {
        let own = fee_for_vsize(vsize, self.fee_rate);
        match &self.package {
            Some(package) => {
                let total = fee_for_vsize(vsize + package.vsize, self.fee_rate);
                own.max(total.saturating_sub(package.fee))
            }
            None => own,
        }
    }

    fn effective_fee_rate(&self, fee: u64, vsize: u64) -> f64 {
        match &self.package {
            Some(package) => (fee + package.fee) as f64 / (vsize + package.vsize) as f64,
            None => fee as f64 / vsize as f64,
        }
    }

    async fn track(&mut self, utxo: &ExtendedUtxo) -> Result<(), Error> {
        if utxo.is_confirmed() {
            return Ok(());
        }
        if let Some(package) = self.package.as_mut() {
            package.add_ancestors(self.provider, utxo.utxo().txid).await?;
        }
        Ok(())
    }

    fn result(&self, fee: u64, vsize: u64, change: Option<u64>) -> FeeResult {
        FeeResult {
            fee,
            vsize,
            fee_rate: fee as f64 / vsize as f64,
            effective_fee_rate: self.effective_fee_rate(fee, vsize),
            change,
        }
    }
}

fn vsize_with_output(tx: &InProgressTransaction, script_pubkey: &ScriptBuf, amount: u64) -> u64 {
    let mut psbt = tx.psbt.clone();
    psbt.unsigned_tx.output.push(TxOut {
        value: bitcoin::Amount::from_sat(amount),
        script_pubkey: script_pubkey.clone(),
    });
    psbt.outputs.push(Default::default());
    estimate_vsize(&psbt)
}

/// Spendable payment UTXOs, ordered so that popping from the end yields the next to spend
async fn candidate_utxos(
    tx: &InProgressTransaction,
    context: &TransactionContext,
    options: &TransactionOptions,
    dust_value: u64,
    include_unconfirmed: bool,
) -> Result<Vec<Arc<ExtendedUtxo>>, Error> {
    let used = tx.used_outpoints();
    let utxos: Vec<_> = context
        .payment_address()
        .get_utxos()
        .await?
        .into_iter()
        .filter(|utxo| {
            !used.contains(&utxo.outpoint())
                && !options.exclude_outpoint_list.contains(&utxo.outpoint())
                && utxo.value() > dust_value
                && (include_unconfirmed || utxo.is_confirmed())
        })
        .collect();

    let embellished = try_join_all(utxos.iter().map(|utxo| utxo.is_embellished())).await?;
    let mut keyed: Vec<_> = embellished.into_iter().zip(utxos).collect();
    keyed.sort_by(|(a_embellished, a), (b_embellished, b)| {
        (!a_embellished, a.is_confirmed(), a.value(), a.outpoint()).cmp(&(
            !b_embellished,
            b.is_confirmed(),
            b.value(),
            b.outpoint(),
        ))
    });

    Ok(keyed.into_iter().map(|(_, utxo)| utxo).collect())
}

fn can_afford(
    tx: &InProgressTransaction,
    candidates: &[Arc<ExtendedUtxo>],
    input_size: u64,
    output_size: u64,
    fee_rate: u64,
) -> bool {
    let available = tx.total_inputs() + candidates.iter().map(|u| u.value()).sum::<u64>();
    let vsize = estimate_vsize(&tx.psbt) + candidates.len() as u64 * input_size + output_size;
    available >= tx.total_outputs() + fee_for_vsize(vsize, fee_rate)
}

/// Add the BTC sends, then fund them and the fee, adding change to `change_script` if worth it
pub(crate) async fn apply_send_btc_actions_and_fee(
    tx: &mut InProgressTransaction,
    context: &TransactionContext,
    actions: &[SendBtcAction],
    fee_rate: u64,
    options: &TransactionOptions,
    change_script: &ScriptBuf,
) -> Result<FeeResult, Error> {
    let payment = context.payment_address();
    let provider = payment.providers().utxo.clone();
    let mut engine = FeeEngine {
        fee_rate,
        package: options
            .use_effective_fee_rate
            .then(UnconfirmedPackage::default),
        provider: provider.as_ref(),
    };

    for outpoint in &options.force_include_outpoint_list {
        if tx.is_used(outpoint) {
            continue;
        }
        let (utxo, owner) = resolve_utxo(tx, context, outpoint, options).await?;
        debug!("force including {}", outpoint);
        tx.add_input(&owner, utxo, options.rbf_enabled);
    }

    let mut sends: Vec<(String, u64, bool)> = vec![];
    for action in actions {
        let existing = sends
            .iter_mut()
            .find(|(address, _, combinable)| *combinable && action.combinable && *address == action.to_address);
        match existing {
            Some((_, amount, _)) => *amount += action.amount,
            None => sends.push((action.to_address.clone(), action.amount, action.combinable)),
        }
    }
    for (address, amount, _) in sends {
        if amount.is_dust() {
            return Err(Error::OutputBelowDustLimit(amount));
        }
        let script_pubkey = context.parse_address(&address)?.script_pubkey();
        tx.add_output(script_pubkey, amount);
    }

    // every input already in the transaction counts in the package
    for utxo in tx.inputs.clone() {
        engine.track(&utxo).await?;
    }

    let io_sizes = payment.io_sizes();
    let dust_value = fee_for_vsize(io_sizes.input_size, fee_rate);
    let mut candidates = candidate_utxos(tx, context, options, dust_value, false).await?;
    if options.allow_unconfirmed_input
        && !can_afford(tx, &candidates, io_sizes.input_size, io_sizes.output_size, fee_rate)
    {
        debug!("confirmed UTXOs can't fund the transaction, adding unconfirmed ones");
        candidates = candidate_utxos(tx, context, options, dust_value, true).await?;
    }
    debug!("{} candidate UTXOs above {} sats", candidates.len(), dust_value);

    loop {
        let total_inputs = tx.total_inputs();
        let total_outputs = tx.total_outputs();
        let current_change = total_inputs.saturating_sub(total_outputs);

        let vsize_with_change = vsize_with_output(tx, change_script, current_change);
        let fee_with_change = engine.required_fee(vsize_with_change);
        debug!(
            "inputs {} outputs {}: {} vB with change, fee {}",
            total_inputs, total_outputs, vsize_with_change, fee_with_change
        );

        if let Some(change) = current_change.checked_sub(fee_with_change) {
            if !change.is_dust() {
                let vsize = vsize_with_change.max(vsize_with_output(tx, change_script, change));
                let fee = engine.required_fee(vsize);
                if let Some(change) = current_change.checked_sub(fee).filter(|c| !c.is_dust()) {
                    tx.add_output(change_script.clone(), change);
                    info!("funded with {} sats of change and a fee of {}", change, fee);
                    return Ok(engine.result(fee, vsize, Some(change)));
                }
            }
        }

        if tx.has_outputs() {
            let vsize = estimate_vsize(&tx.psbt);
            if current_change >= engine.required_fee(vsize) {
                info!("funded without change, fee of {}", current_change);
                return Ok(engine.result(current_change, vsize, None));
            }
        }

        let next = candidates.pop().ok_or(Error::InsufficientFunds {
            needed: total_outputs + fee_with_change,
            available: total_inputs,
        })?;
        engine.track(&next).await?;
        tx.add_input(payment, next, options.rbf_enabled);
    }
}

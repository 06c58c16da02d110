// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Action processors
//!
//! Each processor appends inputs and outputs to an [`InProgressTransaction`]. An outpoint is
//! never spent twice and never spent if it's on the exclusion list.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::psbt::{self, Psbt};
use bitcoin::{absolute, transaction, Amount, OutPoint, ScriptBuf, Transaction, TxOut};
use log::debug;

use super::TransactionOptions;
use crate::action::{ScriptAction, SendUtxoAction, SplitPoint};
use crate::address::AddressContext;
use crate::context::TransactionContext;
use crate::error::Error;
use crate::utils::IsDust;
use crate::utxo::ExtendedUtxo;

/// A transaction being compiled, with the UTXOs it spends in input order
#[derive(Debug)]
pub(crate) struct InProgressTransaction {
    pub(crate) psbt: Psbt,
    pub(crate) inputs: Vec<Arc<ExtendedUtxo>>,
}

impl InProgressTransaction {
    pub(crate) fn new() -> Result<Self, Error> {
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        Ok(InProgressTransaction {
            psbt: Psbt::from_unsigned_tx(tx)?,
            inputs: vec![],
        })
    }

    pub(crate) fn used_outpoints(&self) -> HashSet<OutPoint> {
        self.psbt
            .unsigned_tx
            .input
            .iter()
            .map(|txin| txin.previous_output)
            .collect()
    }

    pub(crate) fn is_used(&self, outpoint: &OutPoint) -> bool {
        self.psbt
            .unsigned_tx
            .input
            .iter()
            .any(|txin| txin.previous_output == *outpoint)
    }

    pub(crate) fn add_input(&mut self, owner: &AddressContext, utxo: Arc<ExtendedUtxo>, rbf_enabled: bool) {
        debug!("spending {} ({} sats) from {}", utxo.outpoint(), utxo.value(), owner.address());
        owner.add_input(&mut self.psbt, &utxo, rbf_enabled);
        self.inputs.push(utxo);
    }

    pub(crate) fn add_output(&mut self, script_pubkey: ScriptBuf, amount: u64) {
        self.psbt.unsigned_tx.output.push(TxOut {
            value: Amount::from_sat(amount),
            script_pubkey,
        });
        self.psbt.outputs.push(psbt::Output::default());
    }

    pub(crate) fn total_inputs(&self) -> u64 {
        self.inputs.iter().map(|utxo| utxo.value()).sum()
    }

    pub(crate) fn total_outputs(&self) -> u64 {
        self.psbt
            .unsigned_tx
            .output
            .iter()
            .map(|txout| txout.value.to_sat())
            .sum()
    }

    pub(crate) fn has_outputs(&self) -> bool {
        !self.psbt.unsigned_tx.output.is_empty()
    }
}

/// Find a UTXO an action explicitly asks for, with the context owning it
pub(crate) async fn resolve_utxo(
    tx: &InProgressTransaction,
    context: &TransactionContext,
    outpoint: &OutPoint,
    options: &TransactionOptions,
) -> Result<(Arc<ExtendedUtxo>, Arc<AddressContext>), Error> {
    if options.exclude_outpoint_list.contains(outpoint) {
        return Err(Error::OutpointExcluded(*outpoint));
    }
    if tx.is_used(outpoint) {
        return Err(Error::OutpointAlreadyUsed(*outpoint));
    }

    let utxo = context
        .get_utxo(outpoint)
        .await?
        .ok_or(Error::UtxoNotFound(*outpoint))?;
    let owner = context
        .address_context(utxo.address())
        .cloned()
        .ok_or_else(|| Error::AddressNotInContext(utxo.address().to_string()))?;

    Ok((utxo, owner))
}

/// Zero-value script outputs, `OP_RETURN` unless unknown outputs are allowed
pub(crate) fn apply_script_actions(
    tx: &mut InProgressTransaction,
    actions: &[ScriptAction],
    options: &TransactionOptions,
) -> Result<(), Error> {
    for action in actions {
        if !action.script.is_op_return() && !options.allow_unknown_outputs {
            return Err(Error::UnknownOutputsNotAllowed);
        }
        tx.add_output(action.script.clone(), 0);
    }
    Ok(())
}

/// Whole-UTXO sends
///
/// Actions are grouped by destination in order of first appearance. Within a destination, each
/// non-combinable UTXO gets its own output and the combinable ones share a single output.
/// Spendable UTXOs are spent without an output.
pub(crate) async fn apply_send_utxo_actions(
    tx: &mut InProgressTransaction,
    context: &TransactionContext,
    actions: &[SendUtxoAction],
    options: &TransactionOptions,
) -> Result<(), Error> {
    let mut destinations: Vec<&str> = vec![];
    for action in actions {
        if !destinations.contains(&action.to_address.as_str()) {
            destinations.push(&action.to_address);
        }
    }

    for destination in destinations {
        let script_pubkey = context.parse_address(destination)?.script_pubkey();

        for combinable in [false, true] {
            let mut combined = 0u64;
            let mut combined_any = false;

            for action in actions
                .iter()
                .filter(|a| a.to_address == destination && a.combinable == combinable)
            {
                let (utxo, owner) = resolve_utxo(tx, context, &action.outpoint, options).await?;
                let value = utxo.value();
                tx.add_input(&owner, utxo, options.rbf_enabled);

                if action.spendable {
                    continue;
                }
                if combinable {
                    combined += value;
                    combined_any = true;
                } else {
                    if value.is_dust() {
                        return Err(Error::OutputBelowDustLimit(value));
                    }
                    tx.add_output(script_pubkey.clone(), value);
                }
            }

            if combined_any {
                if combined.is_dust() {
                    return Err(Error::OutputBelowDustLimit(combined));
                }
                tx.add_output(script_pubkey.clone(), combined);
            }
        }
    }

    Ok(())
}

/// UTXO splits
///
/// Split points are grouped by outpoint and sorted by offset. Groups ending with a spendable
/// point are processed last. The sats before the first offset go back to the UTXO owner, each
/// point sends the sats up to the next offset (or the end of the UTXO) to its destination. The
/// very last point, if spendable, gets no output: its sats fund the fee and change.
pub(crate) async fn apply_split_utxo_actions(
    tx: &mut InProgressTransaction,
    context: &TransactionContext,
    actions: &[SplitPoint],
    options: &TransactionOptions,
) -> Result<(), Error> {
    let mut groups: Vec<(OutPoint, Vec<&SplitPoint>)> = vec![];
    for action in actions {
        match groups.iter_mut().find(|(outpoint, _)| *outpoint == action.outpoint) {
            Some((_, group)) => group.push(action),
            None => groups.push((action.outpoint, vec![action])),
        }
    }
    for (_, group) in groups.iter_mut() {
        group.sort_by_key(|point| point.offset);
    }
    groups.sort_by_key(|(_, group)| group.last().map(|point| point.spendable).unwrap_or(false));

    let group_count = groups.len();
    for (group_index, (outpoint, group)) in groups.into_iter().enumerate() {
        let (utxo, owner) = resolve_utxo(tx, context, &outpoint, options).await?;
        let value = utxo.value();
        let owner_script = utxo.script_pubkey().clone();

        for point in &group {
            if point.offset >= value {
                return Err(Error::SplitOffsetOutOfRange {
                    outpoint,
                    offset: point.offset,
                    value,
                });
            }
        }

        let mut outputs = vec![];
        let first_offset = group.first().map(|point| point.offset).unwrap_or(0);
        if first_offset > 0 {
            if first_offset.is_dust() {
                return Err(Error::SplitBelowDust {
                    outpoint,
                    offset: 0,
                    amount: first_offset,
                });
            }
            outputs.push((owner_script.clone(), first_offset));
        }

        let last_group = group_index + 1 == group_count;
        for (index, point) in group.iter().enumerate() {
            let next_offset = group.get(index + 1).map(|next| next.offset).unwrap_or(value);
            let amount = next_offset - point.offset;
            let is_last = index + 1 == group.len();

            if last_group && is_last && point.spendable {
                debug!(
                    "leaving {} sats of {} from offset {} to fee and change",
                    amount, outpoint, point.offset
                );
                continue;
            }
            if amount.is_dust() {
                return Err(Error::SplitBelowDust {
                    outpoint,
                    offset: point.offset,
                    amount,
                });
            }

            let script_pubkey = match (&point.to_address, point.spendable) {
                (Some(address), false) => context.parse_address(address)?.script_pubkey(),
                _ => owner_script.clone(),
            };
            outputs.push((script_pubkey, amount));
        }

        tx.add_input(&owner, utxo, options.rbf_enabled);
        for (script_pubkey, amount) in outputs {
            tx.add_output(script_pubkey, amount);
        }
    }

    Ok(())
}

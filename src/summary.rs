// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Output summaries
//!
//! Sats flow through a transaction in order: the first sat of the first input becomes the first
//! sat of the first output, and whatever is left after the last output is the fee. Laying every
//! input end to end gives each output a `[offset, offset + value)` window, and every inscription
//! or rare sat range falling into that window lands in the output.

use std::sync::Arc;

use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::blockdata::script::Instruction;
use bitcoin::{Address, Network, TxOut};
use futures::future::try_join_all;
use log::trace;

use crate::error::Error;
use crate::types::{
    BundleData, FeeOutput, OutputInscription, OutputKind, OutputSatribute, TransactionOutput,
};
use crate::utxo::ExtendedUtxo;

/// One input laid out for attribution
#[derive(Debug, Clone, Copy)]
pub struct AttributionInput<'a> {
    /// Owner of the input
    pub address: &'a str,
    /// Value in satoshis
    pub value: u64,
    /// Sat ranges of the input, if known
    pub bundle: Option<&'a BundleData>,
}

/// Inscriptions and rare sats of `inputs` landing in `[start, start + len)`
///
/// Offsets in the result are relative to `start`. An inscription lands where its sat lands, a
/// rare sat range is clipped to the window and dropped if nothing is left.
pub fn attribute_window(
    inputs: &[AttributionInput<'_>],
    start: u64,
    len: u64,
) -> (Vec<OutputInscription>, Vec<OutputSatribute>) {
    let end = start.saturating_add(len);
    let mut inscriptions = vec![];
    let mut satributes = vec![];

    let mut running = 0u64;
    for input in inputs {
        if running >= end {
            break;
        }
        let input_end = running.saturating_add(input.value);
        if input_end <= start {
            running = input_end;
            continue;
        }

        if let Some(bundle) = input.bundle {
            for range in &bundle.sat_ranges {
                let sat = running.saturating_add(range.offset);

                if sat >= start && sat < end.min(input_end) {
                    for inscription in &range.inscriptions {
                        trace!("inscription {} at offset {}", inscription.id, sat - start);
                        inscriptions.push(OutputInscription {
                            id: inscription.id.clone(),
                            offset: sat - start,
                            from_address: input.address.to_string(),
                            number: inscription.number,
                            content_type: inscription.content_type.clone(),
                        });
                    }
                }

                let types = range.rare_satributes();
                if types.is_empty() {
                    continue;
                }
                let clipped_start = sat.max(start);
                let clipped_end = sat.saturating_add(range.len()).min(end).min(input_end);
                if clipped_end <= clipped_start {
                    continue;
                }
                trace!(
                    "{:?} from {} clipped to [{}, {})",
                    types,
                    input.address,
                    clipped_start,
                    clipped_end
                );
                satributes.push(OutputSatribute {
                    types,
                    amount: clipped_end - clipped_start,
                    offset: clipped_start - start,
                    from_address: input.address.to_string(),
                });
            }
        }

        running = input_end;
    }

    (inscriptions, satributes)
}

/// Decode an output script into a [`TransactionOutput`] with no attribution
pub fn decode_output(txout: &TxOut, network: Network) -> TransactionOutput {
    let script = &txout.script_pubkey;
    let (kind, address) = match Address::from_script(script, network) {
        Ok(address) => (OutputKind::Address, Some(address.to_string())),
        Err(_) if script.is_p2pk() => (OutputKind::PubKey, None),
        Err(_) => match script.instructions().last() {
            Some(Ok(Instruction::Op(op))) if op == OP_CHECKMULTISIG => (OutputKind::MultiSig, None),
            _ => (OutputKind::Script, None),
        },
    };

    TransactionOutput {
        kind,
        amount: txout.value.to_sat(),
        address,
        script: script.to_asm_string(),
        script_pubkey: script.clone(),
        inscriptions: vec![],
        satributes: vec![],
    }
}

/// Bundle data of every input, fetched concurrently
pub(crate) async fn load_bundles(inputs: &[Arc<ExtendedUtxo>]) -> Result<Vec<Option<&BundleData>>, Error> {
    try_join_all(inputs.iter().map(|utxo| utxo.bundle_data())).await
}

/// Lay out `inputs` next to their bundles
pub(crate) fn attribution_inputs<'a>(
    inputs: &'a [Arc<ExtendedUtxo>],
    bundles: &[Option<&'a BundleData>],
) -> Vec<AttributionInput<'a>> {
    inputs
        .iter()
        .zip(bundles)
        .map(|(utxo, bundle)| AttributionInput {
            address: utxo.address(),
            value: utxo.value(),
            bundle: *bundle,
        })
        .collect()
}

/// Decode every output and attribute sats to it
pub fn summarize_outputs(
    inputs: &[AttributionInput<'_>],
    outputs: &[TxOut],
    network: Network,
) -> Vec<TransactionOutput> {
    let mut offset = 0u64;
    outputs
        .iter()
        .map(|txout| {
            let mut output = decode_output(txout, network);
            let (inscriptions, satributes) = attribute_window(inputs, offset, output.amount);
            output.inscriptions = inscriptions;
            output.satributes = satributes;
            offset = offset.saturating_add(output.amount);
            output
        })
        .collect()
}

/// The sats spent as fee, right after the last output
pub fn fee_output(inputs: &[AttributionInput<'_>], total_outputs: u64, fee: u64) -> FeeOutput {
    let (inscriptions, satributes) = attribute_window(inputs, total_outputs, fee);
    FeeOutput {
        amount: fee,
        inscriptions,
        satributes,
    }
}

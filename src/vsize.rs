// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Transaction size estimation
//!
//! Fees are computed before signing, so every input that isn't finalized yet is filled with a
//! dummy satisfaction as large as the real one will be.

use bitcoin::psbt::{Input, Psbt};
use bitcoin::sighash::TapSighashType;
use bitcoin::{ScriptBuf, TxIn, TxOut, Witness};

// DER signature with sighash byte, worst case
const ECDSA_SIGNATURE_SIZE: usize = 72;
const COMPRESSED_PUBKEY_SIZE: usize = 33;
const SCHNORR_SIGNATURE_SIZE: usize = 64;
// push of a 22-byte P2WPKH redeem script
const P2SH_P2WPKH_SCRIPT_SIG_SIZE: usize = 23;
// signature push + compressed key push
const P2PKH_SCRIPT_SIG_SIZE: usize = 107;

pub(crate) fn spent_output<'a>(input: &'a Input, txin: &TxIn) -> Option<&'a TxOut> {
    input.witness_utxo.as_ref().or_else(|| {
        input
            .non_witness_utxo
            .as_ref()
            .and_then(|tx| tx.output.get(txin.previous_output.vout as usize))
    })
}

fn p2wpkh_witness() -> Witness {
    Witness::from_slice(&[
        vec![0u8; ECDSA_SIGNATURE_SIZE],
        vec![0u8; COMPRESSED_PUBKEY_SIZE],
    ])
}

fn dummy_satisfy(txin: &mut TxIn, input: &Input, script_pubkey: &ScriptBuf) {
    if script_pubkey.is_p2tr() {
        let non_default = input
            .sighash_type
            .and_then(|ty| ty.taproot_hash_ty().ok())
            .map(|ty| ty != TapSighashType::Default)
            .unwrap_or(false);
        let size = SCHNORR_SIGNATURE_SIZE + usize::from(non_default);
        txin.witness = Witness::from_slice(&[vec![0u8; size]]);
    } else if script_pubkey.is_p2sh() {
        txin.script_sig = ScriptBuf::from_bytes(vec![0u8; P2SH_P2WPKH_SCRIPT_SIG_SIZE]);
        txin.witness = p2wpkh_witness();
    } else if script_pubkey.is_p2pkh() {
        txin.script_sig = ScriptBuf::from_bytes(vec![0u8; P2PKH_SCRIPT_SIG_SIZE]);
    } else {
        txin.witness = p2wpkh_witness();
    }
}

/// Virtual size of `psbt` once every input is signed
///
/// Finalized inputs count with their actual scriptSig and witness. Inputs whose previous
/// output is unknown are sized as P2WPKH.
pub fn estimate_vsize(psbt: &Psbt) -> u64 {
    let mut tx = psbt.unsigned_tx.clone();

    for (txin, input) in tx.input.iter_mut().zip(psbt.inputs.iter()) {
        if input.final_script_witness.is_some() || input.final_script_sig.is_some() {
            txin.witness = input.final_script_witness.clone().unwrap_or_default();
            txin.script_sig = input.final_script_sig.clone().unwrap_or_default();
            continue;
        }

        let script_pubkey = spent_output(input, txin)
            .map(|txout| txout.script_pubkey.clone())
            .unwrap_or_default();
        dummy_satisfy(txin, input, &script_pubkey);
    }

    tx.vsize() as u64
}

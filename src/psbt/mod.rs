// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Foreign PSBTs
//!
//! An [`EnhancedPsbt`] reads a PSBT built by someone else (a marketplace, a dApp) and describes
//! it in the same terms as a compiled transaction: which UTXOs it spends, where inscriptions and
//! rare sats end up, and how much goes to fee.
//!
//! Fee and sat attribution are only reported when every signature, present or about to be
//! made, commits to all outputs with `SIGHASH_ALL`. Any other sighash lets the outputs change
//! after signing, so the summary could lie.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::blockdata::script::Instruction;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::{self, Psbt, PsbtSighashType};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, Amount, OutPoint, TxOut};
use log::{debug, warn};
use miniscript::psbt::PsbtExt;

use crate::address::AddressContext;
use crate::context::TransactionContext;
use crate::error::Error;
use crate::provider::RuneClient;
use crate::signer::SignerError;
use crate::summary::{
    attribute_window, attribution_inputs, decode_output, fee_output, load_bundles,
    summarize_outputs, AttributionInput,
};
use crate::types::{
    FeeOutput, OutputInscription, OutputSatribute, RuneOp, TransactionOutput, Utxo, UtxoStatus,
};
use crate::utxo::ExtendedUtxo;
use crate::vsize::{estimate_vsize, spent_output};

const SIGHASH_ANYONECANPAY: u32 = 0x80;
const SIGHASH_BASE_MASK: u32 = 0x7f;

/// Inputs of the PSBT the wallet is asked to sign with one of its addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputToSign {
    /// Wallet address owning the inputs
    pub address: String,
    /// Indexes of the inputs
    pub signing_indexes: Vec<usize>,
    /// Sighash to sign with, `SIGHASH_ALL` (or taproot default) if not set
    pub sighash_type: Option<PsbtSighashType>,
}

/// Options for [`EnhancedPsbt::get_signed_psbt_base64`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignPsbtOptions {
    /// Finalize the inputs signed by the wallet
    pub finalize: bool,
}

/// An input of a foreign PSBT
#[derive(Debug, Clone)]
pub struct EnhancedInput {
    /// The UTXO spent, a placeholder if the wallet doesn't own it
    pub extended_utxo: Arc<ExtendedUtxo>,
    /// Sighash of the first signature found or planned for the input
    pub sighash: Option<PsbtSighashType>,
    /// Whether the wallet will sign this input
    pub wallet_will_sign: bool,
    /// Inscriptions of the UTXO, offsets within the UTXO
    pub inscriptions: Vec<OutputInscription>,
    /// Rare sats of the UTXO, offsets within the UTXO
    pub satributes: Vec<OutputSatribute>,
}

/// Description of a foreign PSBT
#[derive(Debug, Clone)]
pub struct PsbtSummary {
    /// Inputs in order
    pub inputs: Vec<EnhancedInput>,
    /// Outputs, attributed only when `is_final`
    pub outputs: Vec<TransactionOutput>,
    /// Fee, only when `is_final`
    pub fee_output: Option<FeeOutput>,
    /// Some signature commits to no output
    pub has_sighash_none: bool,
    /// Some signature commits to a single output
    pub has_sighash_single: bool,
    /// Every signature commits to all inputs and outputs
    pub is_final: bool,
    /// Runestone of the transaction, if a rune client is attached
    pub rune_op: Option<RuneOp>,
    /// Fee divided by the estimated vsize, only when `is_final`
    pub fee_rate: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SighashPosture {
    all: bool,
    none: bool,
    single: bool,
}

impl SighashPosture {
    fn from_sighashes(sighashes: &[u32]) -> Self {
        let mut posture = SighashPosture {
            all: true,
            ..Default::default()
        };
        for sighash in sighashes {
            let anyone_can_pay = sighash & SIGHASH_ANYONECANPAY != 0;
            match sighash & SIGHASH_BASE_MASK {
                0 | 1 if !anyone_can_pay => {}
                0 | 1 => posture.all = false,
                2 => {
                    posture.all = false;
                    posture.none = true;
                }
                3 => {
                    posture.all = false;
                    posture.single = true;
                }
                _ => posture.all = false,
            }
        }
        posture
    }
}

/// Sighash byte at the end of a serialized signature
fn sighash_of_signature(bytes: &[u8]) -> Option<u32> {
    match bytes.len() {
        // schnorr signature with the implicit default sighash
        64 => Some(0),
        9..=73 => bytes.last().map(|byte| u32::from(*byte)),
        _ => None,
    }
}

/// Sighashes of the signatures already in `input`
fn signature_sighashes(input: &psbt::Input) -> Vec<u32> {
    let mut sighashes: Vec<u32> = input
        .partial_sigs
        .values()
        .map(|sig| sig.sighash_type.to_u32())
        .collect();
    if let Some(sig) = input.tap_key_sig {
        sighashes.push(sig.sighash_type as u32);
    }
    sighashes.extend(
        input
            .tap_script_sigs
            .values()
            .map(|sig| sig.sighash_type as u32),
    );

    match input
        .final_script_witness
        .as_ref()
        .filter(|witness| !witness.is_empty())
    {
        Some(witness) => sighashes.extend(witness.nth(0).and_then(sighash_of_signature)),
        // a nested segwit scriptSig only pushes the redeem script
        None => {
            if let Some(Ok(Instruction::PushBytes(bytes))) = input
                .final_script_sig
                .as_ref()
                .and_then(|script_sig| script_sig.instructions().next())
            {
                sighashes.extend(sighash_of_signature(bytes.as_bytes()));
            }
        }
    }

    sighashes
}

type SigningPlan = Vec<(Arc<AddressContext>, Vec<usize>, Option<PsbtSighashType>)>;

/// A PSBT received from a third party
pub struct EnhancedPsbt {
    context: TransactionContext,
    psbt: Psbt,
    inputs_to_sign: Option<Vec<InputToSign>>,
    rune_client: Option<Arc<dyn RuneClient>>,
}

impl fmt::Debug for EnhancedPsbt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhancedPsbt")
            .field("context", &self.context)
            .field("psbt", &self.psbt)
            .field("inputs_to_sign", &self.inputs_to_sign)
            .finish_non_exhaustive()
    }
}

impl EnhancedPsbt {
    /// Parse a base64 PSBT
    ///
    /// With `inputs_to_sign` unset, the wallet signs every input spending one of the context's
    /// addresses.
    pub fn new(
        context: TransactionContext,
        psbt_base64: &str,
        inputs_to_sign: Option<Vec<InputToSign>>,
    ) -> Result<Self, Error> {
        let psbt = Psbt::from_str(psbt_base64)?;
        Ok(EnhancedPsbt {
            context,
            psbt,
            inputs_to_sign,
            rune_client: None,
        })
    }

    /// Decode runestones with `client` when summarizing
    pub fn with_rune_client(mut self, client: Arc<dyn RuneClient>) -> Self {
        self.rune_client = Some(client);
        self
    }

    /// The parsed PSBT
    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    fn signing_plan(&self) -> Result<SigningPlan, Error> {
        let mut plan: SigningPlan = vec![];

        match &self.inputs_to_sign {
            Some(inputs_to_sign) => {
                for input in inputs_to_sign {
                    let owner = self
                        .context
                        .address_context(&input.address)
                        .ok_or_else(|| Error::AddressNotInContext(input.address.clone()))?;
                    if input.signing_indexes.iter().any(|i| *i >= self.psbt.inputs.len()) {
                        return Err(SignerError::InputIndexOutOfRange.into());
                    }
                    plan.push((owner.clone(), input.signing_indexes.clone(), input.sighash_type));
                }
            }
            None => {
                let spent = self.psbt.unsigned_tx.input.iter().zip(&self.psbt.inputs);
                for (index, (txin, input)) in spent.enumerate() {
                    let owner = match spent_output(input, txin)
                        .and_then(|txout| self.context.address_context_for_script(&txout.script_pubkey))
                    {
                        Some(owner) => owner,
                        None => continue,
                    };
                    match plan.iter_mut().find(|(context, _, _)| Arc::ptr_eq(context, owner)) {
                        Some((_, indexes, _)) => indexes.push(index),
                        None => plan.push((owner.clone(), vec![index], None)),
                    }
                }
            }
        }

        Ok(plan)
    }

    fn resolve_inputs(&self, known: &HashMap<OutPoint, Arc<ExtendedUtxo>>) -> Vec<Arc<ExtendedUtxo>> {
        let network = self.context.network();
        let providers = self.context.payment_address().providers();

        self.psbt
            .unsigned_tx
            .input
            .iter()
            .zip(&self.psbt.inputs)
            .map(|(txin, input)| {
                let outpoint = txin.previous_output;
                if let Some(utxo) = known.get(&outpoint) {
                    return utxo.clone();
                }

                warn!("input {} is not a wallet UTXO, using PSBT data", outpoint);
                let txout = spent_output(input, txin).cloned().unwrap_or(TxOut {
                    value: Amount::ZERO,
                    script_pubkey: Default::default(),
                });
                let address = Address::from_script(&txout.script_pubkey, network)
                    .map(|address| address.to_string())
                    .unwrap_or_default();
                let utxo = Utxo {
                    txid: outpoint.txid,
                    vout: outpoint.vout,
                    value: txout.value.to_sat(),
                    status: UtxoStatus::default(),
                };
                Arc::new(ExtendedUtxo::new(
                    utxo,
                    &address,
                    txout.script_pubkey,
                    true,
                    providers.clone(),
                ))
            })
            .collect()
    }

    /// Describe the inputs and outputs of the PSBT
    pub async fn get_summary(&self) -> Result<PsbtSummary, Error> {
        let known = self.context.utxo_index().await?;
        let utxos = self.resolve_inputs(&known);
        let bundles = load_bundles(&utxos).await?;
        let layout = attribution_inputs(&utxos, &bundles);

        let mut planned: HashMap<usize, Option<PsbtSighashType>> = HashMap::new();
        for (_, indexes, sighash) in self.signing_plan()? {
            for index in indexes {
                planned.insert(index, sighash);
            }
        }

        let mut all_sighashes = vec![];
        let mut inputs = vec![];
        for (index, (utxo, input)) in utxos.iter().zip(&self.psbt.inputs).enumerate() {
            let mut sighashes = signature_sighashes(input);
            let wallet_will_sign = planned.contains_key(&index);
            if let Some(declared) = planned.get(&index) {
                let declared = (*declared)
                    .or(input.sighash_type)
                    .map(|ty| ty.to_u32())
                    .unwrap_or(1);
                sighashes.push(declared);
            }

            let (inscriptions, satributes) = attribute_window(&layout[index..=index], 0, utxo.value());
            inputs.push(EnhancedInput {
                extended_utxo: utxo.clone(),
                sighash: sighashes.first().map(|ty| PsbtSighashType::from_u32(*ty)),
                wallet_will_sign,
                inscriptions,
                satributes,
            });
            all_sighashes.extend(sighashes);
        }

        let posture = SighashPosture::from_sighashes(&all_sighashes);
        debug!("sighash posture of the PSBT: {:?}", posture);

        let network = self.context.network();
        let txouts = &self.psbt.unsigned_tx.output;
        let outputs = if posture.all {
            summarize_outputs(&layout, txouts, network)
        } else {
            txouts.iter().map(|txout| decode_output(txout, network)).collect()
        };

        let (fee_output, fee_rate) = match self.fee(&layout, posture) {
            Some((fee_output, fee_rate)) => (Some(fee_output), Some(fee_rate)),
            None => (None, None),
        };

        let rune_op = match &self.rune_client {
            Some(client) => {
                client
                    .decode_rune_script(&serialize_hex(&self.psbt.unsigned_tx))
                    .await?
            }
            None => None,
        };

        Ok(PsbtSummary {
            inputs,
            outputs,
            fee_output,
            has_sighash_none: posture.none,
            has_sighash_single: posture.single,
            is_final: posture.all,
            rune_op,
            fee_rate,
        })
    }

    fn fee(&self, layout: &[AttributionInput<'_>], posture: SighashPosture) -> Option<(FeeOutput, f64)> {
        if !posture.all {
            return None;
        }
        let total_inputs: u64 = layout.iter().map(|input| input.value).sum();
        let total_outputs: u64 = self
            .psbt
            .unsigned_tx
            .output
            .iter()
            .map(|txout| txout.value.to_sat())
            .sum();
        let fee = total_inputs.checked_sub(total_outputs)?;
        let vsize = estimate_vsize(&self.psbt);

        Some((fee_output(layout, total_outputs, fee), fee as f64 / vsize as f64))
    }

    /// Sign the wallet's inputs and return the PSBT as base64
    pub async fn get_signed_psbt_base64(&self, options: SignPsbtOptions) -> Result<String, Error> {
        let mut psbt = self.psbt.clone();

        // sighash computations need the spent outputs of every input
        for (txin, input) in psbt.unsigned_tx.input.iter().zip(psbt.inputs.iter_mut()) {
            if input.witness_utxo.is_none() {
                input.witness_utxo = spent_output(input, txin).cloned();
            }
        }

        let mut signed = vec![];
        for (owner, indexes, sighash) in self.signing_plan()? {
            if let Some(sighash) = sighash {
                for index in &indexes {
                    psbt.inputs[*index].sighash_type = Some(sighash);
                }
            }
            owner.sign(&mut psbt, &indexes).await?;
            signed.extend(indexes);
        }

        if options.finalize {
            let secp = Secp256k1::verification_only();
            for index in signed {
                psbt.finalize_inp_mut(&secp, index)
                    .map_err(|e| Error::Finalize(vec![e]))?;
            }
        }

        Ok(psbt.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sighash_posture() {
        assert_eq!(
            SighashPosture::from_sighashes(&[0, 1]),
            SighashPosture {
                all: true,
                none: false,
                single: false
            }
        );
        assert_eq!(
            SighashPosture::from_sighashes(&[1, 0x81]),
            SighashPosture {
                all: false,
                none: false,
                single: false
            }
        );
        let posture = SighashPosture::from_sighashes(&[1, 2, 0x83]);
        assert!(!posture.all);
        assert!(posture.none);
        assert!(posture.single);
    }

    #[test]
    fn test_no_signature_is_all() {
        assert!(SighashPosture::from_sighashes(&[]).all);
    }

    #[test]
    fn test_sighash_of_signature() {
        assert_eq!(sighash_of_signature(&[0u8; 64]), Some(0));
        let mut sig = vec![0u8; 65];
        sig[64] = 0x83;
        assert_eq!(sighash_of_signature(&sig), Some(0x83));
        let mut der = vec![0x30u8; 71];
        der[70] = 0x02;
        assert_eq!(sighash_of_signature(&der), Some(2));
        assert_eq!(sighash_of_signature(&[]), None);
    }

    fn pushes(items: &[&[u8]]) -> bitcoin::ScriptBuf {
        items
            .iter()
            .fold(bitcoin::script::Builder::new(), |builder, item| {
                let bytes = bitcoin::script::PushBytesBuf::try_from(item.to_vec()).unwrap();
                builder.push_slice(bytes)
            })
            .into_script()
    }

    #[test]
    fn test_nested_segwit_redeem_script_is_not_a_signature() {
        use bitcoin::hashes::Hash;

        // the redeem script ends in 0x02, which would read as SIGHASH_NONE
        let redeem =
            bitcoin::ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([2; 20]));
        let mut sig = vec![0x30u8; 71];
        sig[70] = 0x01;
        let input = psbt::Input {
            final_script_sig: Some(pushes(&[redeem.as_bytes()])),
            final_script_witness: Some(bitcoin::Witness::from_slice(&[sig, vec![0x02; 33]])),
            ..Default::default()
        };

        assert_eq!(signature_sighashes(&input), vec![1]);
    }

    #[test]
    fn test_legacy_script_sig_signature() {
        let mut sig = vec![0x30u8; 71];
        sig[70] = 0x03;
        let input = psbt::Input {
            final_script_sig: Some(pushes(&[&sig, &[0x02; 33]])),
            ..Default::default()
        };

        assert_eq!(signature_sighashes(&input), vec![3]);
    }
}

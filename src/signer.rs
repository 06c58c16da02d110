// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Signing backends
//!
//! Every [`AddressContext`](crate::AddressContext) signs through a [`SignerBackend`]:
//!
//! - [`SignerBackend::Software`] asks a [`KeyCustody`] for the secret key of the account and
//!   signs the inputs in-process.
//! - [`SignerBackend::Hardware`] hands the whole PSBT to a [`HardwareSigner`] and merges back
//!   what the device returns.
//!
//! ```
//! # use std::sync::Arc;
//! # use async_trait::async_trait;
//! # use bitcoin::secp256k1::SecretKey;
//! # use ordinals_tx::signer::*;
//! #[derive(Debug)]
//! struct SingleKey(SecretKey);
//!
//! #[async_trait]
//! impl KeyCustody for SingleKey {
//!     async fn secret_key(&self, _request: &KeyRequest) -> Result<SecretKey, SignerError> {
//!         Ok(self.0)
//!     }
//! }
//!
//! let key = SecretKey::from_slice(&[0xcd; 32])?;
//! let backend = SignerBackend::Software(Arc::new(SingleKey(key)));
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak};
use bitcoin::psbt::{self, Psbt};
use bitcoin::secp256k1::{self, All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{self, EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::{ecdsa, taproot, Network, PublicKey, ScriptBuf, TxOut};

use crate::address::AddressType;

pub(crate) type SecpCtx = Secp256k1<All>;

/// Signing error
#[derive(Debug)]
pub enum SignerError {
    /// The custody backend has no key for the request
    MissingKey,
    /// The key returned by the custody backend doesn't match the address
    InvalidKey,
    /// The user canceled the operation
    UserCanceled,
    /// Input index is out of range
    InputIndexOutOfRange,
    /// The `witness_utxo` field of the transaction is required to sign this input
    MissingWitnessUtxo,
    /// The psbt requests a sighash type the signing context can't produce
    NonStandardSighash,
    /// Error while computing a segwit v0 sighash
    P2wpkhSighash(sighash::P2wpkhError),
    /// Error while computing a taproot sighash
    TaprootSighash(sighash::TaprootError),
    /// The PSBT returned by a hardware signer can't be merged
    Combine(psbt::Error),
    /// Error reported by a hardware signer
    Device(String),
}

impl From<sighash::P2wpkhError> for SignerError {
    fn from(e: sighash::P2wpkhError) -> Self {
        SignerError::P2wpkhSighash(e)
    }
}

impl From<sighash::TaprootError> for SignerError {
    fn from(e: sighash::TaprootError) -> Self {
        SignerError::TaprootSighash(e)
    }
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => write!(f, "Missing private key"),
            Self::InvalidKey => write!(f, "The private key doesn't match the address"),
            Self::UserCanceled => write!(f, "The user canceled the operation"),
            Self::InputIndexOutOfRange => write!(f, "Input index out of range"),
            Self::MissingWitnessUtxo => write!(f, "Missing witness UTXO"),
            Self::NonStandardSighash => write!(f, "The psbt contains a non standard sighash"),
            Self::P2wpkhSighash(err) => {
                write!(f, "Error while computing the hash to sign: {}", err)
            }
            Self::TaprootSighash(err) => {
                write!(f, "Error while computing the hash to sign: {}", err)
            }
            Self::Combine(err) => write!(f, "Can't merge the signed PSBT: {}", err),
            Self::Device(err) => write!(f, "Hardware signer error: {}", err),
        }
    }
}

impl std::error::Error for SignerError {}

/// Which key of an account is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Key of the segwit v0 payment addresses
    Payment,
    /// Key of the taproot addresses, derived on its own path
    Taproot,
}

/// Request sent to a [`KeyCustody`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    /// Account the address belongs to
    pub account_index: u32,
    /// Network of the address
    pub network: Network,
    /// Derivation family
    pub purpose: KeyPurpose,
}

/// Resolves account keys for software signing
#[async_trait]
pub trait KeyCustody: fmt::Debug + Send + Sync {
    /// Secret key of the address identified by `request`
    async fn secret_key(&self, request: &KeyRequest) -> Result<SecretKey, SignerError>;
}

/// Request sent to a [`HardwareSigner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareRequest {
    /// Account the address belongs to
    pub account_index: u32,
    /// Network of the address
    pub network: Network,
    /// Script type of the address
    pub address_type: AddressType,
    /// The address whose inputs are signed
    pub address: String,
    /// Inputs to sign
    pub input_indexes: Vec<usize>,
}

/// External device signing a whole PSBT at once
#[async_trait]
pub trait HardwareSigner: fmt::Debug + Send + Sync {
    /// Sign the inputs listed in `request`, returning the PSBT with the signatures
    async fn sign_psbt(&self, psbt: &Psbt, request: &HardwareRequest) -> Result<Psbt, SignerError>;
}

/// How an address signs its inputs
#[derive(Debug, Clone)]
pub enum SignerBackend {
    /// Keys are handed out by a custody backend and used in-process
    Software(Arc<dyn KeyCustody>),
    /// The PSBT is signed on an external device
    Hardware(Arc<dyn HardwareSigner>),
}

fn check_input(psbt: &Psbt, input_index: usize) -> Result<(), SignerError> {
    if input_index >= psbt.inputs.len() || input_index >= psbt.unsigned_tx.input.len() {
        return Err(SignerError::InputIndexOutOfRange);
    }
    Ok(())
}

/// Sign a segwit v0 input whose script code is the P2WPKH `script`
///
/// Used for native P2WPKH and for P2SH-wrapped P2WPKH, where `script` is the redeem script.
pub(crate) fn sign_p2wpkh_input(
    psbt: &mut Psbt,
    input_index: usize,
    secret_key: &SecretKey,
    script: &ScriptBuf,
    secp: &SecpCtx,
) -> Result<(), SignerError> {
    check_input(psbt, input_index)?;
    let input = &psbt.inputs[input_index];
    if input.final_script_witness.is_some() {
        return Ok(());
    }

    let value = input
        .witness_utxo
        .as_ref()
        .ok_or(SignerError::MissingWitnessUtxo)?
        .value;
    let hash_ty = match input.sighash_type {
        Some(ty) => ty
            .ecdsa_hash_ty()
            .map_err(|_| SignerError::NonStandardSighash)?,
        None => EcdsaSighashType::All,
    };

    let sighash =
        SighashCache::new(&psbt.unsigned_tx).p2wpkh_signature_hash(input_index, script, value, hash_ty)?;
    let msg = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_ecdsa(&msg, secret_key);

    let pubkey = PublicKey::new(secp256k1::PublicKey::from_secret_key(secp, secret_key));
    psbt.inputs[input_index].partial_sigs.insert(
        pubkey,
        ecdsa::Signature {
            signature,
            sighash_type: hash_ty,
        },
    );

    Ok(())
}

/// Sign a taproot key-path input, tweaking the key with an empty script tree
pub(crate) fn sign_taproot_input(
    psbt: &mut Psbt,
    input_index: usize,
    secret_key: &SecretKey,
    secp: &SecpCtx,
) -> Result<(), SignerError> {
    check_input(psbt, input_index)?;
    let input = &psbt.inputs[input_index];
    if input.final_script_witness.is_some() || input.tap_key_sig.is_some() {
        return Ok(());
    }

    let hash_ty = match input.sighash_type {
        Some(ty) => ty
            .taproot_hash_ty()
            .map_err(|_| SignerError::NonStandardSighash)?,
        None => TapSighashType::Default,
    };
    let prevouts = psbt
        .inputs
        .iter()
        .map(|i| i.witness_utxo.clone())
        .collect::<Option<Vec<TxOut>>>()
        .ok_or(SignerError::MissingWitnessUtxo)?;

    let sighash = SighashCache::new(&psbt.unsigned_tx).taproot_key_spend_signature_hash(
        input_index,
        &Prevouts::All(&prevouts),
        hash_ty,
    )?;

    let keypair = Keypair::from_secret_key(secp, secret_key)
        .tap_tweak(secp, None)
        .to_inner();
    let msg = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_schnorr_no_aux_rand(&msg, &keypair);

    psbt.inputs[input_index].tap_key_sig = Some(taproot::Signature {
        signature,
        sighash_type: hash_ty,
    });

    Ok(())
}

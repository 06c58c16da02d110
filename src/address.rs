// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Address contexts
//!
//! An [`AddressContext`] is the identity of one wallet address (type, address, public key,
//! network, account) together with what the compiler needs to spend from it: the UTXO lookup,
//! the PSBT input template and the signing backend.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::address::NetworkUnchecked;
use bitcoin::psbt::{self, Psbt};
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::{
    Address, CompressedPublicKey, Network, OutPoint, PublicKey, ScriptBuf, Sequence, TxIn,
    XOnlyPublicKey,
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::provider::Providers;
use crate::signer::{
    sign_p2wpkh_input, sign_taproot_input, HardwareRequest, KeyPurpose, KeyRequest, SecpCtx,
    SignerBackend, SignerError,
};
use crate::utxo::ExtendedUtxo;

/// Script type of a wallet address
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// Native segwit v0 pay-to-pubkey-hash
    P2wpkh,
    /// P2WPKH nested in pay-to-script-hash
    P2sh,
    /// Taproot key-path only
    P2tr,
}

impl AddressType {
    /// Infer the type from a parsed address
    pub fn from_address(address: &Address) -> Result<Self, Error> {
        match address.address_type() {
            Some(bitcoin::AddressType::P2wpkh) => Ok(AddressType::P2wpkh),
            Some(bitcoin::AddressType::P2sh) => Ok(AddressType::P2sh),
            Some(bitcoin::AddressType::P2tr) => Ok(AddressType::P2tr),
            other => Err(Error::UnsupportedAddressType(format!("{:?}", other))),
        }
    }

    /// Input and output sizes in virtual bytes
    pub fn io_sizes(&self) -> IoSizes {
        match self {
            AddressType::P2wpkh => IoSizes {
                input_size: 68,
                output_size: 31,
            },
            AddressType::P2sh => IoSizes {
                input_size: 91,
                output_size: 32,
            },
            AddressType::P2tr => IoSizes {
                input_size: 58,
                output_size: 43,
            },
        }
    }
}

impl FromStr for AddressType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "p2wpkh" => Ok(AddressType::P2wpkh),
            "p2sh" | "p2sh-p2wpkh" => Ok(AddressType::P2sh),
            "p2tr" => Ok(AddressType::P2tr),
            _ => Err(Error::UnsupportedAddressType(s.to_string())),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::P2wpkh => write!(f, "p2wpkh"),
            AddressType::P2sh => write!(f, "p2sh"),
            AddressType::P2tr => write!(f, "p2tr"),
        }
    }
}

/// Size contribution of one input and one output, in vbytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSizes {
    /// Size of a signed input spending this type
    pub input_size: u64,
    /// Size of an output paying this type
    pub output_size: u64,
}

#[derive(Debug, Clone)]
enum KeyData {
    Segwit {
        public_key: CompressedPublicKey,
        p2wpkh_script: ScriptBuf,
    },
    Taproot {
        internal_key: XOnlyPublicKey,
    },
}

/// One wallet address able to fund and sign a transaction
#[derive(Debug)]
pub struct AddressContext {
    address_type: AddressType,
    address: Address,
    address_str: String,
    network: Network,
    account_index: u32,
    key: KeyData,
    signer: SignerBackend,
    providers: Providers,
    secp: SecpCtx,
}

/// Parse `address` and check it belongs to `network`
pub(crate) fn parse_address(address: &str, network: Network) -> Result<Address, Error> {
    let unchecked = Address::<NetworkUnchecked>::from_str(address)
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;
    unchecked
        .require_network(network)
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))
}

impl AddressContext {
    /// Build a context, checking that `public_key` really controls `address` on `network`
    ///
    /// For [`AddressType::P2tr`] the key may be given either as a 33-byte compressed key or as
    /// a 32-byte x-only key; it's the untweaked internal key.
    pub fn new(
        address_type: AddressType,
        address: &str,
        public_key: &str,
        network: Network,
        account_index: u32,
        signer: SignerBackend,
        providers: Providers,
    ) -> Result<Self, Error> {
        let secp = Secp256k1::new();
        let parsed = parse_address(address, network)?;
        let invalid_key = |e: &dyn fmt::Display| Error::InvalidPublicKey(format!("{}: {}", public_key, e));

        let (key, script_pubkey) = match address_type {
            AddressType::P2wpkh | AddressType::P2sh => {
                let public_key = CompressedPublicKey::from_str(public_key).map_err(|e| invalid_key(&e))?;
                let p2wpkh_script = ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash());
                let script_pubkey = match address_type {
                    AddressType::P2sh => ScriptBuf::new_p2sh(&p2wpkh_script.script_hash()),
                    _ => p2wpkh_script.clone(),
                };
                (
                    KeyData::Segwit {
                        public_key,
                        p2wpkh_script,
                    },
                    script_pubkey,
                )
            }
            AddressType::P2tr => {
                let internal_key = if public_key.len() == 64 {
                    XOnlyPublicKey::from_str(public_key).map_err(|e| invalid_key(&e))?
                } else {
                    PublicKey::from_str(public_key)
                        .map_err(|e| invalid_key(&e))?
                        .inner
                        .x_only_public_key()
                        .0
                };
                let script_pubkey = ScriptBuf::new_p2tr(&secp, internal_key, None);
                (KeyData::Taproot { internal_key }, script_pubkey)
            }
        };

        if script_pubkey != parsed.script_pubkey() {
            return Err(Error::InvalidPublicKey(format!(
                "{} does not match {} address {}",
                public_key, address_type, address
            )));
        }

        Ok(AddressContext {
            address_type,
            address_str: parsed.to_string(),
            address: parsed,
            network,
            account_index,
            key,
            signer,
            providers,
            secp,
        })
    }

    /// Script type
    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// Address as a string
    pub fn address(&self) -> &str {
        &self.address_str
    }

    /// Output script of the address
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// Network of the address
    pub fn network(&self) -> Network {
        self.network
    }

    /// Account the address belongs to
    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    /// Provider handles used for lookups from this address
    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    /// Sizes in vbytes of one input spending and one output paying this address
    pub fn io_sizes(&self) -> IoSizes {
        self.address_type.io_sizes()
    }

    /// Fetch the current unspent outputs of the address
    ///
    /// Every call hits the provider and returns fresh [`ExtendedUtxo`]s, with empty caches.
    pub async fn get_utxos(&self) -> Result<Vec<Arc<ExtendedUtxo>>, Error> {
        let utxos = self
            .providers
            .utxo
            .get_unspent_utxos(&self.address_str)
            .await?;
        debug!("{} unspent outputs for {}", utxos.len(), self.address_str);

        let script_pubkey = self.script_pubkey();
        Ok(utxos
            .into_iter()
            .map(|utxo| {
                Arc::new(ExtendedUtxo::new(
                    utxo,
                    &self.address_str,
                    script_pubkey.clone(),
                    false,
                    self.providers.clone(),
                ))
            })
            .collect())
    }

    /// Look up one unspent output of the address
    pub async fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Arc<ExtendedUtxo>>, Error> {
        Ok(self
            .get_utxos()
            .await?
            .into_iter()
            .find(|utxo| utxo.outpoint() == *outpoint))
    }

    /// Append an input spending `utxo` to `psbt`, returning its index
    ///
    /// Fills in the PSBT fields the type needs to be signed and finalized: the witness UTXO
    /// always, the redeem script for P2SH and the internal key for P2TR.
    pub fn add_input(&self, psbt: &mut Psbt, utxo: &ExtendedUtxo, rbf_enabled: bool) -> usize {
        let sequence = if rbf_enabled {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        } else {
            Sequence::MAX
        };
        psbt.unsigned_tx.input.push(TxIn {
            previous_output: utxo.outpoint(),
            sequence,
            ..Default::default()
        });

        let mut input = psbt::Input {
            witness_utxo: Some(utxo.to_txout()),
            ..Default::default()
        };
        match (&self.key, self.address_type) {
            (KeyData::Segwit { p2wpkh_script, .. }, AddressType::P2sh) => {
                input.redeem_script = Some(p2wpkh_script.clone());
            }
            (KeyData::Taproot { internal_key }, _) => {
                input.tap_internal_key = Some(*internal_key);
            }
            _ => {}
        }
        psbt.inputs.push(input);

        psbt.inputs.len() - 1
    }

    /// Sign the inputs at `input_indexes`, which must spend outputs of this address
    pub async fn sign(&self, psbt: &mut Psbt, input_indexes: &[usize]) -> Result<(), Error> {
        if input_indexes.is_empty() {
            return Ok(());
        }
        debug!(
            "signing inputs {:?} with {} ({})",
            input_indexes, self.address_str, self.address_type
        );

        match &self.signer {
            SignerBackend::Software(custody) => {
                let purpose = match self.key {
                    KeyData::Taproot { .. } => KeyPurpose::Taproot,
                    KeyData::Segwit { .. } => KeyPurpose::Payment,
                };
                let secret_key = custody
                    .secret_key(&KeyRequest {
                        account_index: self.account_index,
                        network: self.network,
                        purpose,
                    })
                    .await?;
                let derived = secp256k1::PublicKey::from_secret_key(&self.secp, &secret_key);

                match &self.key {
                    KeyData::Segwit {
                        public_key,
                        p2wpkh_script,
                    } => {
                        if derived != public_key.0 {
                            return Err(SignerError::InvalidKey.into());
                        }
                        for index in input_indexes {
                            sign_p2wpkh_input(psbt, *index, &secret_key, p2wpkh_script, &self.secp)?;
                        }
                    }
                    KeyData::Taproot { internal_key } => {
                        if derived.x_only_public_key().0 != *internal_key {
                            return Err(SignerError::InvalidKey.into());
                        }
                        for index in input_indexes {
                            if let Some(input) = psbt.inputs.get_mut(*index) {
                                input.tap_internal_key.get_or_insert(*internal_key);
                            }
                            sign_taproot_input(psbt, *index, &secret_key, &self.secp)?;
                        }
                    }
                }
            }
            SignerBackend::Hardware(device) => {
                let request = HardwareRequest {
                    account_index: self.account_index,
                    network: self.network,
                    address_type: self.address_type,
                    address: self.address_str.clone(),
                    input_indexes: input_indexes.to_vec(),
                };
                let signed = device.sign_psbt(psbt, &request).await?;
                psbt.combine(signed).map_err(SignerError::Combine)?;
            }
        }

        Ok(())
    }
}

// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fmt;

use bitcoin::{psbt, OutPoint};

use crate::signer::SignerError;

/// Coarse classification of an [`Error`]
///
/// Lets a caller tell "the wallet needs more funds" apart from "this request is wrong" without
/// matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was rejected before any transaction state was touched
    Validation,
    /// An outpoint or address referenced by the request could not be used
    Referential,
    /// Coin selection ran out of candidates
    InsufficientFunds,
    /// A provider, signer or encoding failure outside of this crate
    External,
}

/// Errors that can be thrown while compiling or summarizing a transaction
#[derive(Debug)]
pub enum Error {
    /// Fee rate must round to a positive integer number of sat/vB
    InvalidFeeRate(f64),
    /// Cannot build a transaction without any action
    NoActions,
    /// The action list mixes actions that cannot be compiled together
    ConflictingActions(String),
    /// An action is malformed
    InvalidAction(String),
    /// A split location is not in the `txid:vout:offset` form
    InvalidLocation(String),
    /// A split location carries a negative offset
    NegativeSplitOffset(String),
    /// Output created is under the dust limit, 546 satoshis
    OutputBelowDustLimit(u64),
    /// The address can't be parsed or belongs to another network
    InvalidAddress(String),
    /// The public key can't be parsed or doesn't match its address
    InvalidPublicKey(String),
    /// The address type is not one of P2WPKH, P2SH-P2WPKH or P2TR
    UnsupportedAddressType(String),
    /// A non `OP_RETURN` script output was requested without `allow_unknown_outputs`
    UnknownOutputsNotAllowed,
    /// The outpoint is not in the UTXO set of the payment or ordinals address
    UtxoNotFound(OutPoint),
    /// The outpoint is part of `exclude_outpoint_list` but an action needs it
    OutpointExcluded(OutPoint),
    /// The outpoint is already spent by this transaction
    OutpointAlreadyUsed(OutPoint),
    /// A split would create an output under the dust limit
    SplitBelowDust {
        /// UTXO being split
        outpoint: OutPoint,
        /// Offset of the output that would be too small
        offset: u64,
        /// Value the output would carry
        amount: u64,
    },
    /// A split offset is beyond the value of its UTXO
    SplitOffsetOutOfRange {
        /// UTXO being split
        outpoint: OutPoint,
        /// Requested offset
        offset: u64,
        /// Value of the UTXO
        value: u64,
    },
    /// The address is neither the payment nor the ordinals address of the context
    AddressNotInContext(String),
    /// Coin selection exhausted every candidate UTXO
    InsufficientFunds {
        /// Sats needed for the outputs and the fee at the last estimate
        needed: u64,
        /// Sats available from the inputs selected so far
        available: u64,
    },
    /// Signing error
    Signer(SignerError),
    /// Error returned by a UTXO, bundle or rune provider
    Provider(String),
    /// Esplora client error
    #[cfg(feature = "esplora")]
    Esplora(Box<crate::provider::esplora::EsploraError>),
    /// Partially signed bitcoin transaction error
    Psbt(psbt::Error),
    /// Partially signed bitcoin transaction parse error
    PsbtParse(psbt::PsbtParseError),
    /// Errors while finalizing the PSBT inputs
    Finalize(Vec<miniscript::psbt::Error>),
    /// Encoding error
    Encode(bitcoin::consensus::encode::Error),
}

impl Error {
    /// Return the [`ErrorKind`] of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFeeRate(_)
            | Self::NoActions
            | Self::ConflictingActions(_)
            | Self::InvalidAction(_)
            | Self::InvalidLocation(_)
            | Self::NegativeSplitOffset(_)
            | Self::OutputBelowDustLimit(_)
            | Self::InvalidAddress(_)
            | Self::InvalidPublicKey(_)
            | Self::UnsupportedAddressType(_)
            | Self::UnknownOutputsNotAllowed => ErrorKind::Validation,
            Self::UtxoNotFound(_)
            | Self::OutpointExcluded(_)
            | Self::OutpointAlreadyUsed(_)
            | Self::SplitBelowDust { .. }
            | Self::SplitOffsetOutOfRange { .. }
            | Self::AddressNotInContext(_) => ErrorKind::Referential,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            _ => ErrorKind::External,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFeeRate(rate) => write!(f, "Invalid fee rate: {}", rate),
            Self::NoActions => write!(f, "No actions supplied to compile a transaction"),
            Self::ConflictingActions(reason) => write!(f, "Conflicting actions: {}", reason),
            Self::InvalidAction(reason) => write!(f, "Invalid action: {}", reason),
            Self::InvalidLocation(location) => write!(f, "Invalid UTXO location: {}", location),
            Self::NegativeSplitOffset(location) => {
                write!(f, "Split offset cannot be negative: {}", location)
            }
            Self::OutputBelowDustLimit(amount) => {
                write!(f, "Output below the dust limit: {}", amount)
            }
            Self::InvalidAddress(err) => write!(f, "Invalid address: {}", err),
            Self::InvalidPublicKey(err) => write!(f, "Invalid public key: {}", err),
            Self::UnsupportedAddressType(kind) => write!(f, "Unsupported address type: {}", kind),
            Self::UnknownOutputsNotAllowed => {
                write!(f, "Script outputs other than OP_RETURN are not allowed")
            }
            Self::UtxoNotFound(outpoint) => write!(f, "UTXO not found: {}", outpoint),
            Self::OutpointExcluded(outpoint) => {
                write!(f, "UTXO {} is excluded but required by an action", outpoint)
            }
            Self::OutpointAlreadyUsed(outpoint) => write!(f, "UTXO already used: {}", outpoint),
            Self::SplitBelowDust {
                outpoint,
                offset,
                amount,
            } => write!(
                f,
                "Split of {} at offset {} would create an output of {} sats, below the dust limit",
                outpoint, offset, amount
            ),
            Self::SplitOffsetOutOfRange {
                outpoint,
                offset,
                value,
            } => write!(
                f,
                "Insufficient value in {} ({} sats) for a split at offset {}",
                outpoint, value, offset
            ),
            Self::AddressNotInContext(address) => {
                write!(f, "Address {} is not part of the transaction context", address)
            }
            Self::InsufficientFunds { .. } => write!(
                f,
                "No more UTXOs to use. Insufficient funds for this transaction"
            ),
            Self::Signer(err) => write!(f, "Signer error: {}", err),
            Self::Provider(err) => write!(f, "Provider error: {}", err),
            #[cfg(feature = "esplora")]
            Self::Esplora(err) => write!(f, "Esplora client error: {}", err),
            Self::Psbt(err) => write!(f, "PSBT error: {}", err),
            Self::PsbtParse(err) => write!(f, "Impossible to parse PSBT: {}", err),
            Self::Finalize(errors) => write!(f, "Failed to finalize PSBT: {:?}", errors),
            Self::Encode(err) => write!(f, "Encoding error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_error {
    ( $from:ty, $to:ident ) => {
        impl_error!($from, $to, Error);
    };
    ( $from:ty, $to:ident, $impl_for:ty ) => {
        impl std::convert::From<$from> for $impl_for {
            fn from(err: $from) -> Self {
                <$impl_for>::$to(err)
            }
        }
    };
}

impl_error!(SignerError, Signer);
impl_error!(psbt::Error, Psbt);
impl_error!(psbt::PsbtParseError, PsbtParse);
impl_error!(bitcoin::consensus::encode::Error, Encode);

#[cfg(feature = "esplora")]
impl From<crate::provider::esplora::EsploraError> for Error {
    fn from(other: crate::provider::esplora::EsploraError) -> Self {
        Error::Esplora(Box::new(other))
    }
}

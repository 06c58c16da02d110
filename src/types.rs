// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::{BlockHash, OutPoint, ScriptBuf, Txid};

use serde::{Deserialize, Serialize};

/// Confirmation status of a [`Utxo`]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UtxoStatus {
    /// Whether the transaction creating the output is in a block
    pub confirmed: bool,
    /// Height of the confirming block
    pub block_height: Option<u32>,
    /// Hash of the confirming block
    pub block_hash: Option<BlockHash>,
    /// Timestamp of the confirming block
    pub block_time: Option<u64>,
}

/// An unspent transaction output as reported by a [`UtxoProvider`](crate::provider::UtxoProvider)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Utxo {
    /// Id of the transaction that created the output
    pub txid: Txid,
    /// Index of the output in that transaction
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    /// Confirmation status
    pub status: UtxoStatus,
}

impl Utxo {
    /// Reference to the output as an [`OutPoint`]
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

/// Rare sat attribute attached to a [`SatRange`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Satribute {
    /// Any sat that is not the first of its block
    Common,
    /// First sat of a block
    Uncommon,
    /// First sat of a difficulty adjustment period
    Rare,
    /// First sat of a halving epoch
    Epic,
    /// First sat of a cycle
    Legendary,
    /// First sat of the genesis block
    Mythic,
    /// Last sat of a block
    BlackUncommon,
    /// Last sat of a difficulty adjustment period
    BlackRare,
    /// Last sat of a halving epoch
    BlackEpic,
    /// Last sat of a cycle
    BlackLegendary,
    /// Mined in block 9
    #[serde(rename = "BLOCK_9")]
    Block9,
    /// Mined in block 78
    #[serde(rename = "BLOCK_78")]
    Block78,
    /// Mined by Satoshi Nakamoto
    Nakamoto,
    /// Spent in the first bitcoin transaction
    FirstTransaction,
    /// Mined in the first 1000 blocks
    Vintage,
    /// Spent in the Bitcoin Pizza Day transaction
    Pizza,
    /// Spent in the first JPEG purchase
    Jpeg,
    /// Spent in the Silk Road hitman payment
    Hitman,
    /// Sat number reading the same both ways
    Palindrome,
    /// First sat of a whole bitcoin
    Alpha,
    /// Last sat of a whole bitcoin
    Omega,
    /// Attribute this version doesn't know about
    #[serde(other)]
    Unknown,
}

impl Satribute {
    /// Whether the attribute makes a sat worth protecting
    pub fn is_rare(&self) -> bool {
        !matches!(self, Satribute::Common | Satribute::Unknown)
    }
}

/// Inscription bound to the first sat of a [`SatRange`]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct InscriptionInfo {
    /// Inscription id, `<txid>i<index>`
    pub id: String,
    /// Inscription number
    pub number: i64,
    /// MIME type of the content
    pub content_type: String,
}

/// Absolute `[start, end)` sat numbers of a [`SatRange`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SatBounds {
    /// First sat number, inclusive
    pub start: u64,
    /// Last sat number, exclusive
    pub end: u64,
}

/// Contiguous span of sats inside a UTXO
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SatRange {
    /// Offset of the first sat of the range within the UTXO
    pub offset: u64,
    /// Absolute sat numbers
    pub range: SatBounds,
    /// Rare sat attributes
    #[serde(default)]
    pub satributes: Vec<Satribute>,
    /// Inscriptions sitting on the first sat of the range
    #[serde(default)]
    pub inscriptions: Vec<InscriptionInfo>,
}

impl SatRange {
    /// Number of sats in the range
    pub fn len(&self) -> u64 {
        self.range.end.saturating_sub(self.range.start)
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attributes other than [`Satribute::Common`]
    pub fn rare_satributes(&self) -> Vec<Satribute> {
        self.satributes
            .iter()
            .copied()
            .filter(Satribute::is_rare)
            .collect()
    }
}

/// Inscriptions and satributes carried by one UTXO
///
/// Ranges are ordered by ascending `offset` and never overlap.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BundleData {
    /// Sat ranges of the UTXO
    pub sat_ranges: Vec<SatRange>,
}

impl BundleData {
    /// Whether any range carries an inscription or a rare attribute
    pub fn is_embellished(&self) -> bool {
        self.sat_ranges
            .iter()
            .any(|r| !r.inscriptions.is_empty() || r.satributes.iter().any(Satribute::is_rare))
    }

    /// Whether any range carries an inscription
    pub fn has_inscriptions(&self) -> bool {
        self.sat_ranges.iter().any(|r| !r.inscriptions.is_empty())
    }
}

/// Kind of a compiled or decoded output
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Standard output with an address form
    Address,
    /// Bare pay-to-pubkey output
    PubKey,
    /// Bare multisig output
    MultiSig,
    /// Anything else, including `OP_RETURN`
    Script,
}

/// Inscription landing in an output, at `offset` sats from the output's first sat
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputInscription {
    /// Inscription id
    pub id: String,
    /// Offset within the output
    pub offset: u64,
    /// Address owning the input the inscription came from
    pub from_address: String,
    /// Inscription number
    pub number: i64,
    /// MIME type of the content
    pub content_type: String,
}

/// Rare sats landing in an output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputSatribute {
    /// Attributes of the sats
    pub types: Vec<Satribute>,
    /// Number of sats of the range inside the output
    pub amount: u64,
    /// Offset within the output
    pub offset: u64,
    /// Address owning the input the sats came from
    pub from_address: String,
}

/// A compiled or decoded transaction output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutput {
    /// Kind of the output
    #[serde(rename = "type")]
    pub kind: OutputKind,
    /// Value in satoshis
    pub amount: u64,
    /// Address, for [`OutputKind::Address`] outputs
    pub address: Option<String>,
    /// Script in assembly form
    pub script: String,
    /// Raw script
    pub script_pubkey: ScriptBuf,
    /// Inscriptions landing in this output
    pub inscriptions: Vec<OutputInscription>,
    /// Rare sats landing in this output
    pub satributes: Vec<OutputSatribute>,
}

impl TransactionOutput {
    /// Script as lowercase hex
    pub fn script_hex(&self) -> String {
        self.script_pubkey.to_hex_string()
    }
}

/// The sats consumed by the fee, with whatever they carry
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeOutput {
    /// Fee in satoshis
    pub amount: u64,
    /// Inscriptions that would be burned as fee
    pub inscriptions: Vec<OutputInscription>,
    /// Rare sats that would be burned as fee
    pub satributes: Vec<OutputSatribute>,
}

/// One edict of a decoded runestone
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RuneEdict {
    /// Rune id, `block:tx`
    pub id: String,
    /// Amount moved
    pub amount: u128,
    /// Output receiving the amount
    pub output: u32,
}

/// Rune operation decoded from a transaction by a [`RuneClient`](crate::provider::RuneClient)
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RuneOp {
    /// Transfers
    pub edicts: Vec<RuneEdict>,
    /// Rune minted, if any
    pub mint: Option<String>,
    /// Output receiving unallocated runes
    pub pointer: Option<u32>,
    /// Whether the runestone is malformed and burns every input rune
    pub is_cenotaph: bool,
}

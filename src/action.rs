// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Actions
//!
//! An [`Action`] is a declarative intent: it says what the transaction must do, not how. Actions
//! are grouped by kind into an [`ActionMap`], which also validates the combinations that can't
//! be compiled together.
//!
//! Action lists can be loaded from JSON:
//!
//! ```
//! # use ordinals_tx::Action;
//! let actions: Vec<Action> = serde_json::from_str(r#"[
//!     {"type": "send_btc", "to_address": "bcrt1qxyz", "amount": 1000, "combinable": false},
//!     {"type": "split_utxo", "location": "ebd9813ecebc57ff8f30797de7c205e3c7498ca950ea4341ee51a685ff2fa30a:0:600", "to_address": "bcrt1qabc"}
//! ]"#)?;
//! assert_eq!(actions.len(), 2);
//! # Ok::<_, serde_json::Error>(())
//! ```

use bitcoin::{OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::utils::parse_location;

/// Send an amount of BTC to an address
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SendBtcAction {
    /// Destination
    pub to_address: String,
    /// Amount in satoshis
    pub amount: u64,
    /// Merge with the other combinable sends to the same address into one output
    #[serde(default)]
    pub combinable: bool,
}

/// Move a whole UTXO to an address
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SendUtxoAction {
    /// Destination
    pub to_address: String,
    /// UTXO to move
    pub outpoint: OutPoint,
    /// Merge with the other combinable sends to the same address into one output
    #[serde(default)]
    pub combinable: bool,
    /// Don't create an output: the value goes to the destination as change, minus the fee
    #[serde(default)]
    pub spendable: bool,
}

/// Cut a UTXO at a sat offset
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SplitUtxoAction {
    /// `txid:vout:offset`
    pub location: String,
    /// Receiver of the sats from the offset to the next split point
    #[serde(default)]
    pub to_address: Option<String>,
    /// The sats from the offset are not sent anywhere in particular
    #[serde(default)]
    pub spendable: bool,
}

/// Add a raw script output with no value
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScriptAction {
    /// Output script
    pub script: ScriptBuf,
}

/// What a transaction must do
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// See [`SendBtcAction`]
    SendBtc(SendBtcAction),
    /// See [`SendUtxoAction`]
    SendUtxo(SendUtxoAction),
    /// See [`SplitUtxoAction`]
    SplitUtxo(SplitUtxoAction),
    /// See [`ScriptAction`]
    Script(ScriptAction),
}

/// A [`SplitUtxoAction`] with its location parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SplitPoint {
    pub outpoint: OutPoint,
    pub offset: u64,
    pub to_address: Option<String>,
    pub spendable: bool,
}

/// Actions grouped by kind, in the order they were given
#[derive(Debug, Clone, Default)]
pub struct ActionMap {
    pub(crate) send_btc: Vec<SendBtcAction>,
    pub(crate) send_utxo: Vec<SendUtxoAction>,
    pub(crate) split_utxo: Vec<SplitPoint>,
    pub(crate) script: Vec<ScriptAction>,
}

impl ActionMap {
    /// Group and validate `actions`
    ///
    /// Spendable UTXO sends must be alone in the list and share one destination, since their
    /// value flows into the change output.
    pub fn new(actions: Vec<Action>) -> Result<Self, Error> {
        if actions.is_empty() {
            return Err(Error::NoActions);
        }

        let mut map = ActionMap::default();
        for action in actions {
            match action {
                Action::SendBtc(action) => map.send_btc.push(action),
                Action::SendUtxo(action) => map.send_utxo.push(action),
                Action::SplitUtxo(action) => {
                    if !action.spendable && action.to_address.is_none() {
                        return Err(Error::InvalidAction(format!(
                            "split at {} needs a destination unless spendable",
                            action.location
                        )));
                    }
                    let (outpoint, offset) = parse_location(&action.location)?;
                    map.split_utxo.push(SplitPoint {
                        outpoint,
                        offset,
                        to_address: action.to_address,
                        spendable: action.spendable,
                    });
                }
                Action::Script(action) => map.script.push(action),
            }
        }

        let spendable = map.send_utxo.iter().filter(|a| a.spendable).count();
        if spendable > 0 {
            let others = map.send_btc.len()
                + map.split_utxo.len()
                + map.script.len()
                + (map.send_utxo.len() - spendable);
            if others > 0 {
                return Err(Error::ConflictingActions(
                    "spendable UTXO sends can't be combined with other actions".to_string(),
                ));
            }

            let first = &map.send_utxo[0].to_address;
            if map.send_utxo.iter().any(|a| &a.to_address != first) {
                return Err(Error::ConflictingActions(
                    "spendable UTXO sends must all go to the same address".to_string(),
                ));
            }
        }

        Ok(map)
    }

    /// Destination of the spendable UTXO sends, if the map holds any
    pub fn spendable_destination(&self) -> Option<&str> {
        self.send_utxo
            .iter()
            .find(|a| a.spendable)
            .map(|a| a.to_address.as_str())
    }

    /// Whether the map has no action at all
    pub fn is_empty(&self) -> bool {
        self.send_btc.is_empty()
            && self.send_utxo.is_empty()
            && self.split_utxo.is_empty()
            && self.script.is_empty()
    }
}

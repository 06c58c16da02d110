// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut};
use tokio::sync::OnceCell;

use crate::error::Error;
use crate::provider::Providers;
use crate::types::{BundleData, Utxo};

/// A [`Utxo`] with its owner and lazily fetched extra data
///
/// The raw transaction hex and the bundle data are fetched on first access and memoized for
/// the lifetime of the value. They are never invalidated: to observe a newer state of the
/// output (after a reindex, for instance) build a new `ExtendedUtxo`.
#[derive(Debug)]
pub struct ExtendedUtxo {
    utxo: Utxo,
    address: String,
    script_pubkey: ScriptBuf,
    is_external: bool,
    providers: Providers,
    hex: OnceCell<String>,
    bundle_data: OnceCell<Option<BundleData>>,
}

impl ExtendedUtxo {
    /// Wrap a UTXO owned by `address`
    ///
    /// `is_external` marks outputs not owned by the wallet, as found in foreign PSBTs.
    pub fn new(
        utxo: Utxo,
        address: &str,
        script_pubkey: ScriptBuf,
        is_external: bool,
        providers: Providers,
    ) -> Self {
        ExtendedUtxo {
            utxo,
            address: address.to_string(),
            script_pubkey,
            is_external,
            providers,
            hex: OnceCell::new(),
            bundle_data: OnceCell::new(),
        }
    }

    /// Seed the bundle data instead of asking the provider for it
    pub fn with_bundle_data(mut self, bundle_data: Option<BundleData>) -> Self {
        self.bundle_data = OnceCell::new_with(Some(bundle_data));
        self
    }

    /// The wrapped UTXO
    pub fn utxo(&self) -> &Utxo {
        &self.utxo
    }

    /// Reference to the output
    pub fn outpoint(&self) -> OutPoint {
        self.utxo.outpoint()
    }

    /// Value in satoshis
    pub fn value(&self) -> u64 {
        self.utxo.value
    }

    /// Owner of the output
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Output script
    pub fn script_pubkey(&self) -> &ScriptBuf {
        &self.script_pubkey
    }

    /// Whether the output belongs to someone else
    pub fn is_external(&self) -> bool {
        self.is_external
    }

    /// Whether the creating transaction is in a block
    pub fn is_confirmed(&self) -> bool {
        self.utxo.status.confirmed
    }

    /// The output as it appears in its transaction
    pub fn to_txout(&self) -> TxOut {
        TxOut {
            value: Amount::from_sat(self.utxo.value),
            script_pubkey: self.script_pubkey.clone(),
        }
    }

    /// Raw hex of the transaction that created the output
    pub async fn hex(&self) -> Result<&str, Error> {
        self.hex
            .get_or_try_init(|| self.providers.utxo.get_transaction_hex(&self.utxo.txid))
            .await
            .map(String::as_str)
    }

    /// Inscriptions and rare sats of the output, `None` if the index doesn't know it
    pub async fn bundle_data(&self) -> Result<Option<&BundleData>, Error> {
        let outpoint = self.outpoint();
        self.bundle_data
            .get_or_try_init(|| {
                self.providers
                    .bundle
                    .get_utxo_bundle(&outpoint, &self.address, self.is_external)
            })
            .await
            .map(Option::as_ref)
    }

    /// Whether any sat of the output carries an inscription or a rare attribute
    pub async fn is_embellished(&self) -> Result<bool, Error> {
        Ok(self
            .bundle_data()
            .await?
            .map(BundleData::is_embellished)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provider::{BundleProvider, MemoryProvider, UtxoProvider};
    use crate::types::{InscriptionInfo, SatBounds, SatRange, UtxoStatus};
    use async_trait::async_trait;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingBundles {
        inner: MemoryProvider,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BundleProvider for CountingBundles {
        async fn get_utxo_bundle(
            &self,
            outpoint: &OutPoint,
            address: &str,
            is_external: bool,
        ) -> Result<Option<BundleData>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .get_utxo_bundle(outpoint, address, is_external)
                .await
        }
    }

    fn utxo() -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([7; 32]),
            vout: 1,
            value: 10_000,
            status: UtxoStatus {
                confirmed: true,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_bundle_data_is_memoized() {
        let bundles = Arc::new(CountingBundles::default());
        bundles.inner.add_bundle(
            utxo().outpoint(),
            BundleData {
                sat_ranges: vec![SatRange {
                    offset: 0,
                    range: SatBounds { start: 50, end: 51 },
                    satributes: vec![],
                    inscriptions: vec![InscriptionInfo {
                        id: "abci0".to_string(),
                        number: 1,
                        content_type: "text/plain".to_string(),
                    }],
                }],
            },
        );
        let chain: Arc<dyn UtxoProvider> = Arc::new(MemoryProvider::new());
        let extended = ExtendedUtxo::new(
            utxo(),
            "bcrt1qowner",
            ScriptBuf::new(),
            false,
            Providers::new(chain, bundles.clone()),
        );

        assert!(extended.is_embellished().await.unwrap());
        assert!(extended.bundle_data().await.unwrap().is_some());
        assert_eq!(bundles.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_seeded_bundle_data() {
        let extended = ExtendedUtxo::new(
            utxo(),
            "bcrt1qowner",
            ScriptBuf::new(),
            true,
            Providers::from_memory(Arc::new(MemoryProvider::new())),
        )
        .with_bundle_data(None);

        assert!(!extended.is_embellished().await.unwrap());
        assert_eq!(extended.to_txout().value, Amount::from_sat(10_000));
    }
}

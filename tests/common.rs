#![allow(unused)]
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{
    absolute, transaction, Address, Amount, CompressedPublicKey, Network, OutPoint, ScriptBuf,
    Transaction, TxIn, TxOut, Txid,
};
use ordinals_tx::provider::{MemoryProvider, Providers};
use ordinals_tx::signer::{KeyCustody, KeyPurpose, KeyRequest, SignerBackend, SignerError};
use ordinals_tx::{
    AddressContext, AddressType, BundleData, InscriptionInfo, SatBounds, SatRange, Satribute,
    TransactionContext, Utxo, UtxoStatus,
};

pub const PAYMENT_KEY: [u8; 32] = [1; 32];
pub const TAPROOT_KEY: [u8; 32] = [2; 32];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Custody handing out two fixed keys
#[derive(Debug)]
pub struct FixedKeys;

#[async_trait]
impl KeyCustody for FixedKeys {
    async fn secret_key(&self, request: &KeyRequest) -> Result<SecretKey, SignerError> {
        if request.account_index != 0 {
            return Err(SignerError::MissingKey);
        }
        let bytes = match request.purpose {
            KeyPurpose::Payment => PAYMENT_KEY,
            KeyPurpose::Taproot => TAPROOT_KEY,
        };
        SecretKey::from_slice(&bytes).map_err(|_| SignerError::InvalidKey)
    }
}

pub fn public_key(secret: [u8; 32]) -> CompressedPublicKey {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&secret).unwrap();
    CompressedPublicKey(PublicKey::from_secret_key(&secp, &sk))
}

/// A P2WPKH address nobody in the wallet controls
pub fn external_address(byte: u8) -> Address {
    Address::p2wpkh(&public_key([byte; 32]), Network::Regtest)
}

pub struct TestWallet {
    pub provider: Arc<MemoryProvider>,
    pub payment: Arc<AddressContext>,
    pub ordinals: Arc<AddressContext>,
    pub context: TransactionContext,
}

/// A regtest wallet with a P2WPKH payment address and a P2TR ordinals address
pub fn test_wallet() -> TestWallet {
    let secp = Secp256k1::new();
    let provider = Arc::new(MemoryProvider::new());
    let signer = SignerBackend::Software(Arc::new(FixedKeys));

    let payment_key = public_key(PAYMENT_KEY);
    let payment_address = Address::p2wpkh(&payment_key, Network::Regtest);
    let payment = Arc::new(
        AddressContext::new(
            AddressType::P2wpkh,
            &payment_address.to_string(),
            &payment_key.to_string(),
            Network::Regtest,
            0,
            signer.clone(),
            Providers::from_memory(provider.clone()),
        )
        .unwrap(),
    );

    let (internal_key, _) = public_key(TAPROOT_KEY).0.x_only_public_key();
    let ordinals_address = Address::p2tr(&secp, internal_key, None, Network::Regtest);
    let ordinals = Arc::new(
        AddressContext::new(
            AddressType::P2tr,
            &ordinals_address.to_string(),
            &internal_key.to_string(),
            Network::Regtest,
            0,
            signer,
            Providers::from_memory(provider.clone()),
        )
        .unwrap(),
    );

    let context = TransactionContext::new(payment.clone(), ordinals.clone()).unwrap();
    TestWallet {
        provider,
        payment,
        ordinals,
        context,
    }
}

/// Give `address` a UTXO of `value` sats, identified by `seed`
pub fn receive(
    provider: &MemoryProvider,
    address: &str,
    value: u64,
    confirmed: bool,
    seed: u8,
) -> OutPoint {
    let outpoint = OutPoint::new(Txid::from_byte_array([seed; 32]), 0);
    provider.add_utxo(
        address,
        Utxo {
            txid: outpoint.txid,
            vout: outpoint.vout,
            value,
            status: UtxoStatus {
                confirmed,
                block_height: confirmed.then_some(800_000),
                ..Default::default()
            },
        },
    );
    outpoint
}

/// Bundle with one inscription on the sat at `offset`
pub fn inscription_at(offset: u64, id: &str) -> BundleData {
    BundleData {
        sat_ranges: vec![SatRange {
            offset,
            range: SatBounds {
                start: 1_250_000_000 + offset,
                end: 1_250_000_000 + offset + 1,
            },
            satributes: vec![Satribute::Common],
            inscriptions: vec![InscriptionInfo {
                id: id.to_string(),
                number: 1_234,
                content_type: "text/plain;charset=utf-8".to_string(),
            }],
        }],
    }
}

/// Bare transaction paying `value` to `script_pubkey`, spending `previous_output`
pub fn funding_tx(previous_output: OutPoint, script_pubkey: ScriptBuf, value: u64) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output,
            ..Default::default()
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        }],
    }
}

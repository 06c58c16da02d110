mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Transaction, Txid};
use common::*;
use ordinals_tx::provider::UtxoProvider;
use ordinals_tx::{
    Action, EnhancedTransaction, Error, ErrorKind, OutputKind, SendBtcAction, SendUtxoAction,
    SplitUtxoAction, TransactionOptions, Utxo, UtxoStatus,
};

fn send_btc(to: &str, amount: u64) -> Action {
    Action::SendBtc(SendBtcAction {
        to_address: to.to_string(),
        amount,
        combinable: false,
    })
}

fn send_utxo(to: &str, outpoint: OutPoint, spendable: bool) -> Action {
    Action::SendUtxo(SendUtxoAction {
        to_address: to.to_string(),
        outpoint,
        combinable: false,
        spendable,
    })
}

fn split_utxo(outpoint: OutPoint, offset: u64, to: Option<&str>, spendable: bool) -> Action {
    Action::SplitUtxo(SplitUtxoAction {
        location: format!("{}:{}", outpoint, offset),
        to_address: to.map(str::to_string),
        spendable,
    })
}

fn input_outpoints(summary: &ordinals_tx::FeeSummary) -> Vec<OutPoint> {
    summary.inputs.iter().map(|utxo| utxo.outpoint()).collect()
}

#[tokio::test]
async fn test_simple_send() {
    init_logger();
    let wallet = test_wallet();
    let funding = receive(&wallet.provider, wallet.payment.address(), 3_000, true, 10);
    let recipient = external_address(50);

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&recipient.to_string(), 1_000)],
        10.0,
        TransactionOptions::default(),
    )
    .unwrap();

    let summary = transaction.get_fee_summary().await.unwrap();
    assert_eq!(summary.vsize, 141);
    assert_eq!(summary.fee, 1_410);
    assert_eq!(summary.fee_rate, 10.0);
    assert_eq!(input_outpoints(&summary), vec![funding]);

    assert_eq!(summary.outputs.len(), 2);
    assert_eq!(summary.outputs[0].kind, OutputKind::Address);
    assert_eq!(summary.outputs[0].amount, 1_000);
    assert_eq!(summary.outputs[0].address, Some(recipient.to_string()));
    assert_eq!(summary.outputs[1].amount, 590);
    assert_eq!(
        summary.outputs[1].address.as_deref(),
        Some(wallet.payment.address())
    );
    assert_eq!(summary.fee_output.amount, 1_410);

    let (hex, txid) = transaction.get_transaction_hex_and_id().await.unwrap();
    let tx: Transaction = deserialize_hex(&hex).unwrap();
    assert_eq!(tx.compute_txid(), txid);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].witness.len(), 2);
    assert_eq!(tx.output.len(), 2);
    assert!(tx.vsize() as u64 <= summary.vsize);
}

#[tokio::test]
async fn test_insufficient_funds() {
    init_logger();
    let wallet = test_wallet();
    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&external_address(50).to_string(), 1_000)],
        10.0,
        TransactionOptions::default(),
    )
    .unwrap();

    let err = transaction.get_fee_summary().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "No more UTXOs to use. Insufficient funds for this transaction"
    );
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
}

#[tokio::test]
async fn test_send_below_dust() {
    let wallet = test_wallet();
    receive(&wallet.provider, wallet.payment.address(), 3_000, true, 10);
    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&external_address(50).to_string(), 545)],
        1.0,
        TransactionOptions::default(),
    )
    .unwrap();
    assert_matches!(
        transaction.get_fee_summary().await,
        Err(Error::OutputBelowDustLimit(545))
    );
}

#[tokio::test]
async fn test_combinable_sends_are_merged() {
    let wallet = test_wallet();
    receive(&wallet.provider, wallet.payment.address(), 10_000, true, 10);
    let recipient = external_address(50).to_string();
    let combinable = |amount| {
        Action::SendBtc(SendBtcAction {
            to_address: recipient.clone(),
            amount,
            combinable: true,
        })
    };

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![combinable(1_000), combinable(2_000), send_btc(&recipient, 700)],
        2.0,
        TransactionOptions::default(),
    )
    .unwrap();
    let summary = transaction.get_fee_summary().await.unwrap();
    let amounts: Vec<u64> = summary.outputs.iter().map(|o| o.amount).collect();
    assert_eq!(&amounts[..2], &[3_000, 700]);
}

#[tokio::test]
async fn test_largest_plain_utxo_first() {
    let wallet = test_wallet();
    let small = receive(&wallet.provider, wallet.payment.address(), 3_000, true, 13);
    let large = receive(&wallet.provider, wallet.payment.address(), 5_000, true, 14);
    let recipient = external_address(50).to_string();

    let build = |options| {
        EnhancedTransaction::new(
            wallet.context.clone(),
            vec![send_btc(&recipient, 1_000)],
            10.0,
            options,
        )
        .unwrap()
    };

    let summary = build(TransactionOptions::default())
        .get_fee_summary()
        .await
        .unwrap();
    assert_eq!(input_outpoints(&summary), vec![large]);

    let summary = build(TransactionOptions {
        exclude_outpoint_list: vec![large],
        ..Default::default()
    })
    .get_fee_summary()
    .await
    .unwrap();
    assert_eq!(input_outpoints(&summary), vec![small]);

    let summary = build(TransactionOptions {
        force_include_outpoint_list: vec![small],
        ..Default::default()
    })
    .get_fee_summary()
    .await
    .unwrap();
    assert_eq!(input_outpoints(&summary), vec![small]);
}

#[tokio::test]
async fn test_embellished_utxos_are_spent_last() {
    let wallet = test_wallet();
    let plain = receive(&wallet.provider, wallet.payment.address(), 5_000, true, 11);
    let inscribed = receive(&wallet.provider, wallet.payment.address(), 20_000, true, 12);
    wallet
        .provider
        .add_bundle(inscribed, inscription_at(100, "inscribed0"));

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&external_address(50).to_string(), 1_000)],
        10.0,
        TransactionOptions::default(),
    )
    .unwrap();
    let summary = transaction.get_fee_summary().await.unwrap();
    assert_eq!(input_outpoints(&summary), vec![plain]);
    assert!(summary.outputs.iter().all(|o| o.inscriptions.is_empty()));
}

#[tokio::test]
async fn test_fee_conservation_and_repricing() {
    let wallet = test_wallet();
    receive(&wallet.provider, wallet.payment.address(), 10_000, true, 15);
    let mut transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&external_address(50).to_string(), 1_000)],
        10.0,
        TransactionOptions {
            rbf_enabled: true,
            ..Default::default()
        },
    )
    .unwrap();

    let (first, _) = transaction.get_transaction_hex_and_id().await.unwrap();
    transaction.set_fee_rate(10.0).unwrap();
    let (second, _) = transaction.get_transaction_hex_and_id().await.unwrap();
    assert_eq!(first, second);

    let tx: Transaction = deserialize_hex(&first).unwrap();
    assert!(tx.input.iter().all(|txin| txin.sequence.is_rbf()));

    transaction.set_fee_rate(19.6).unwrap();
    assert_eq!(transaction.fee_rate(), 20);
    let summary = transaction.get_fee_summary().await.unwrap();
    let total_inputs: u64 = summary.inputs.iter().map(|u| u.value()).sum();
    let total_outputs: u64 = summary.outputs.iter().map(|o| o.amount).sum();
    assert_eq!(total_inputs - total_outputs, summary.fee);
    assert_eq!(summary.fee, summary.vsize * 20);

    let (third, _) = transaction.get_transaction_hex_and_id().await.unwrap();
    assert_ne!(first, third);

    assert_matches!(transaction.set_fee_rate(0.0), Err(Error::InvalidFeeRate(_)));
    assert_eq!(transaction.fee_rate(), 20);
}

#[tokio::test]
async fn test_send_inscription_funds_fee_from_payment() {
    init_logger();
    let wallet = test_wallet();
    let inscribed = receive(&wallet.provider, wallet.ordinals.address(), 10_000, true, 17);
    wallet
        .provider
        .add_bundle(inscribed, inscription_at(0, "gift0"));
    let funding = receive(&wallet.provider, wallet.payment.address(), 5_000, true, 18);
    let recipient = external_address(52);

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_utxo(&recipient.to_string(), inscribed, false)],
        2.0,
        TransactionOptions::default(),
    )
    .unwrap();
    let summary = transaction.get_fee_summary().await.unwrap();

    assert_eq!(input_outpoints(&summary), vec![inscribed, funding]);
    let unique: HashSet<_> = input_outpoints(&summary).into_iter().collect();
    assert_eq!(unique.len(), summary.inputs.len());

    let gift = &summary.outputs[0];
    assert_eq!(gift.amount, 10_000);
    assert_eq!(gift.address, Some(recipient.to_string()));
    assert_eq!(gift.inscriptions.len(), 1);
    assert_eq!(gift.inscriptions[0].id, "gift0");
    assert_eq!(gift.inscriptions[0].offset, 0);
    assert_eq!(gift.inscriptions[0].from_address, wallet.ordinals.address());
    assert!(summary.outputs[1].inscriptions.is_empty());
    assert!(summary.fee_output.inscriptions.is_empty());

    // both the taproot and the segwit input get signed and finalized
    let (hex, _) = transaction.get_transaction_hex_and_id().await.unwrap();
    let tx: Transaction = deserialize_hex(&hex).unwrap();
    assert_eq!(tx.input[0].witness.len(), 1);
    assert_eq!(tx.input[1].witness.len(), 2);
}

#[tokio::test]
async fn test_spendable_send_utxo_pays_fee_from_itself() {
    let wallet = test_wallet();
    let utxo = receive(&wallet.provider, wallet.ordinals.address(), 10_000, true, 16);
    let recipient = external_address(51);

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_utxo(&recipient.to_string(), utxo, true)],
        5.0,
        TransactionOptions::default(),
    )
    .unwrap();
    let summary = transaction.get_fee_summary().await.unwrap();

    assert_eq!(summary.vsize, 99);
    assert_eq!(summary.fee, 495);
    assert_eq!(summary.outputs.len(), 1);
    assert_eq!(summary.outputs[0].amount, 9_505);
    assert_eq!(summary.outputs[0].address, Some(recipient.to_string()));

    let (hex, _) = transaction.get_transaction_hex_and_id().await.unwrap();
    let tx: Transaction = deserialize_hex(&hex).unwrap();
    assert_eq!(tx.input[0].witness.len(), 1);
    assert_eq!(tx.input[0].witness.nth(0).map(|sig| sig.len()), Some(64));
}

#[tokio::test]
async fn test_split_tail_funds_fee_and_change() {
    init_logger();
    let wallet = test_wallet();
    let inscribed = receive(&wallet.provider, wallet.ordinals.address(), 10_000, true, 40);
    wallet
        .provider
        .add_bundle(inscribed, inscription_at(0, "split0"));
    receive(&wallet.provider, wallet.payment.address(), 50_000, true, 41);
    let recipient = external_address(55);

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![
            split_utxo(inscribed, 8_000, None, true),
            split_utxo(inscribed, 0, Some(&recipient.to_string()), false),
        ],
        10.0,
        TransactionOptions::default(),
    )
    .unwrap();
    let summary = transaction.get_fee_summary().await.unwrap();

    // the 2_000 sats after the split pay the fee, no payment UTXO is needed
    assert_eq!(input_outpoints(&summary), vec![inscribed]);
    assert_eq!(summary.vsize, 130);
    assert_eq!(summary.fee, 1_300);
    assert_eq!(summary.outputs.len(), 2);
    assert_eq!(summary.outputs[0].amount, 8_000);
    assert_eq!(summary.outputs[0].address, Some(recipient.to_string()));
    assert_eq!(summary.outputs[0].inscriptions.len(), 1);
    assert_eq!(summary.outputs[0].inscriptions[0].id, "split0");
    assert_eq!(summary.outputs[1].amount, 700);
    assert_eq!(
        summary.outputs[1].address.as_deref(),
        Some(wallet.payment.address())
    );
    assert!(summary.outputs[1].inscriptions.is_empty());
    assert_eq!(summary.fee_output.amount, 1_300);

    let (hex, _) = transaction.get_transaction_hex_and_id().await.unwrap();
    let tx: Transaction = deserialize_hex(&hex).unwrap();
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].witness.len(), 1);
}

#[tokio::test]
async fn test_change_address_precedence() {
    init_logger();
    let wallet = test_wallet();
    receive(&wallet.provider, wallet.payment.address(), 3_000, true, 42);
    let inscribed = receive(&wallet.provider, wallet.ordinals.address(), 10_000, true, 43);
    let recipient = external_address(50).to_string();
    let override_address = external_address(60).to_string();
    let with_override = TransactionOptions {
        override_change_address: Some(override_address.clone()),
        ..Default::default()
    };

    // payment address by default
    let summary = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&recipient, 1_000)],
        10.0,
        TransactionOptions::default(),
    )
    .unwrap()
    .get_fee_summary()
    .await
    .unwrap();
    assert_eq!(summary.outputs[1].amount, 590);
    assert_eq!(
        summary.outputs[1].address.as_deref(),
        Some(wallet.payment.address())
    );

    // the override replaces it
    let summary = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&recipient, 1_000)],
        10.0,
        with_override.clone(),
    )
    .unwrap()
    .get_fee_summary()
    .await
    .unwrap();
    assert_eq!(summary.outputs.len(), 2);
    assert_eq!(summary.outputs[1].amount, 590);
    assert_eq!(summary.outputs[1].address, Some(override_address.clone()));

    // a spendable destination wins over the override
    let destination = external_address(51).to_string();
    let summary = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_utxo(&destination, inscribed, true)],
        5.0,
        with_override,
    )
    .unwrap()
    .get_fee_summary()
    .await
    .unwrap();
    assert_eq!(summary.outputs.len(), 1);
    assert_eq!(summary.outputs[0].amount, 9_505);
    assert_eq!(summary.outputs[0].address, Some(destination));

    // an override on another network is rejected
    let mainnet = bitcoin::Address::p2wpkh(&public_key([61; 32]), bitcoin::Network::Bitcoin);
    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&recipient, 1_000)],
        10.0,
        TransactionOptions {
            override_change_address: Some(mainnet.to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_matches!(
        transaction.get_fee_summary().await,
        Err(Error::InvalidAddress(_))
    );
}

#[tokio::test]
async fn test_conflicting_actions() {
    let wallet = test_wallet();
    let recipient = external_address(51).to_string();
    let outpoint = OutPoint::new(Txid::from_byte_array([16; 32]), 0);

    let err = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_utxo(&recipient, outpoint, true), send_btc(&recipient, 1_000)],
        5.0,
        TransactionOptions::default(),
    )
    .unwrap_err();
    assert_matches!(err, Error::ConflictingActions(_));
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_matches!(
        EnhancedTransaction::new(wallet.context.clone(), vec![], 5.0, TransactionOptions::default()),
        Err(Error::NoActions)
    );
}

#[tokio::test]
async fn test_unknown_utxo() {
    let wallet = test_wallet();
    let outpoint = OutPoint::new(Txid::from_byte_array([99; 32]), 0);
    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_utxo(&external_address(51).to_string(), outpoint, false)],
        5.0,
        TransactionOptions::default(),
    )
    .unwrap();

    let err = transaction.get_fee_summary().await.unwrap_err();
    assert_matches!(err, Error::UtxoNotFound(op) if op == outpoint);
    assert_eq!(err.kind(), ErrorKind::Referential);
}

#[tokio::test]
async fn test_unconfirmed_package_fee() {
    init_logger();
    let wallet = test_wallet();
    let provider = &wallet.provider;

    let grandparent = funding_tx(
        OutPoint::new(Txid::all_zeros(), 0),
        external_address(60).script_pubkey(),
        6_000,
    );
    let grandparent_txid = provider.add_transaction(&grandparent, 0, true);
    let parent = funding_tx(
        OutPoint::new(grandparent_txid, 0),
        wallet.payment.script_pubkey(),
        5_000,
    );
    let parent_txid = provider.add_transaction(&parent, 100, false);
    provider.add_utxo(
        wallet.payment.address(),
        Utxo {
            txid: parent_txid,
            vout: 0,
            value: 5_000,
            status: UtxoStatus::default(),
        },
    );

    let actions = vec![send_btc(&external_address(50).to_string(), 1_000)];
    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        actions.clone(),
        10.0,
        TransactionOptions::default(),
    )
    .unwrap();
    assert_matches!(
        transaction.get_fee_summary().await,
        Err(Error::InsufficientFunds { .. })
    );

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        actions,
        10.0,
        TransactionOptions {
            allow_unconfirmed_input: true,
            use_effective_fee_rate: true,
            ..Default::default()
        },
    )
    .unwrap();
    let summary = transaction.get_fee_summary().await.unwrap();
    let parent_vsize = parent.vsize() as u64;

    assert_eq!(summary.vsize, 141);
    assert_eq!(summary.fee, (141 + parent_vsize) * 10 - 100);
    assert_eq!(summary.effective_fee_rate, 10.0);
    assert!(summary.fee_rate > 10.0);
}

#[tokio::test]
async fn test_broadcast() {
    let wallet = test_wallet();
    receive(&wallet.provider, wallet.payment.address(), 3_000, true, 10);
    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![send_btc(&external_address(50).to_string(), 1_000)],
        10.0,
        TransactionOptions::default(),
    )
    .unwrap();

    let (_, expected) = transaction.get_transaction_hex_and_id().await.unwrap();
    let txid = transaction.broadcast().await.unwrap();
    assert_eq!(txid, expected);
    assert_eq!(wallet.provider.broadcasted().len(), 1);
    assert!(wallet
        .provider
        .get_unspent_utxos(wallet.payment.address())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_op_return_output() {
    let wallet = test_wallet();
    receive(&wallet.provider, wallet.payment.address(), 3_000, true, 10);
    let script = bitcoin::script::Builder::new()
        .push_opcode(bitcoin::opcodes::all::OP_RETURN)
        .push_slice(b"ord")
        .into_script();

    let transaction = EnhancedTransaction::new(
        wallet.context.clone(),
        vec![
            Action::Script(ordinals_tx::ScriptAction { script }),
            send_btc(&external_address(50).to_string(), 1_000),
        ],
        1.0,
        TransactionOptions::default(),
    )
    .unwrap();
    let summary = transaction.get_fee_summary().await.unwrap();
    assert_eq!(summary.outputs[0].kind, OutputKind::Script);
    assert_eq!(summary.outputs[0].amount, 0);
    assert_eq!(summary.outputs[1].amount, 1_000);
}

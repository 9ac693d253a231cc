//! Shared builders for exercising the engine in tests.

use std::path::PathBuf;

use crate::core::block::Block;
use crate::core::blockchain::Blockchain;
use crate::core::consensus::{ChainParams, RegtestConsensus};
use crate::core::contract::NoContractRunner;
use crate::core::transaction::{Input, Output, Transaction};
use crate::core::validator::minimum_fee;
use crate::crypto::key_pair::{PrivateKey, PublicKey};
use crate::storage::memory::MemoryStore;
use crate::types::hash::Hash;
use crate::types::payload::Payload;

/// Engine instantiation used throughout the test suite.
pub type DevChain = Blockchain<MemoryStore, RegtestConsensus, NoContractRunner>;

/// Ownership payload binding an output to `key`.
pub fn owner_payload(key: &PublicKey) -> Payload {
    Payload::new().with("publicKey", key.to_hex())
}

/// An output owned by `key`'s public key.
pub fn keyed_output(key: &PrivateKey, value: u64, nonce: u64) -> Output {
    Output::new(value, nonce, owner_payload(&key.public_key()))
}

/// Builds a transaction spending `utxos` into `outputs`, signing every
/// input with `key` over the canonical `output_id ++ output_set_id`
/// message.
pub fn signed_spend(
    key: &PrivateKey,
    utxos: &[Output],
    outputs: Vec<Output>,
    timestamp: u64,
) -> Transaction {
    let output_set = Transaction::output_set_of(&outputs);
    let inputs = utxos
        .iter()
        .map(|utxo| {
            let message = format!("{}{}", utxo.id(), output_set);
            let signature = key.sign(message.as_bytes());
            Input::new(utxo.id(), Payload::new().with("signature", signature.to_hex()))
        })
        .collect();
    Transaction::new(inputs, outputs, timestamp, false)
}

/// Spends `utxo` into a recipient output plus change, paying exactly the
/// minimum fee.
///
/// Two-pass construction: the fee metric depends only on data-bag sizes,
/// which are identical between the draft and the final transaction.
pub fn spend_to(
    key: &PrivateKey,
    utxo: &Output,
    to: &PublicKey,
    recipient_value: u64,
    timestamp: u64,
) -> Transaction {
    let build = |change: u64| {
        let outputs = vec![
            Output::new(recipient_value, timestamp, owner_payload(to)),
            Output::new(change, timestamp + 1, owner_payload(&key.public_key())),
        ];
        signed_spend(key, std::slice::from_ref(utxo), outputs, timestamp)
    };

    let fee = minimum_fee(&build(1));
    let change = utxo
        .value()
        .checked_sub(recipient_value)
        .and_then(|rest| rest.checked_sub(fee))
        .expect("test utxo cannot cover recipient value plus minimum fee");
    build(change)
}

/// A coinbase-flagged transaction padded to an exact canonical size.
pub fn transaction_of_size(target: usize, seed: u64) -> Transaction {
    let build = |pad: usize| {
        let data = Payload::new().with("pad", "x".repeat(pad));
        Transaction::new(vec![], vec![Output::new(seed, seed, data)], seed, true)
    };

    let base = build(0).size() as usize;
    assert!(target >= base, "target {target} below minimum size {base}");
    let tx = build(target - base);
    assert_eq!(tx.size(), target as u64);
    tx
}

/// A height-1 block whose coinbase pays `value` to `key`.
pub fn genesis_block(key: &PrivateKey, value: u64, timestamp: u64) -> Block {
    let coinbase = Transaction::new(
        vec![],
        vec![Output::new(value, 0, owner_payload(&key.public_key()))],
        timestamp,
        true,
    );
    Block::new(vec![], coinbase, Hash::zero(), timestamp, Payload::new(), 1)
}

/// A hand-built empty block paying its whole coinbase to a fresh key.
pub fn empty_block(
    previous_id: Hash,
    height: u64,
    coinbase_value: u64,
    consensus_data: Payload,
    timestamp: u64,
) -> Block {
    let coinbase = Transaction::new(
        vec![],
        vec![keyed_output(&PrivateKey::new(), coinbase_value, height)],
        timestamp,
        true,
    );
    Block::new(vec![], coinbase, previous_id, timestamp, consensus_data, height)
}

/// Writes `genesis` to a temp genesis file and opens a fresh dev chain
/// from it. The returned directory keeps the file alive.
pub fn open_chain_with_genesis(
    genesis: &Block,
    mut params: ChainParams,
) -> (DevChain, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path: PathBuf = dir.path().join("genesis.json");
    std::fs::write(&path, genesis.to_json_pretty()).expect("failed to write genesis file");
    params.genesis_file = Some(path);

    let chain = Blockchain::open(MemoryStore::new(), RegtestConsensus, NoContractRunner, params)
        .expect("failed to open chain");
    assert_eq!(
        chain.genesis_id(),
        Some(genesis.id()),
        "genesis file was not imported"
    );
    (chain, dir)
}

//! Blocks and their normalized storage projection.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::core::transaction::{Transaction, eq_ord_by_id};
use crate::types::codec::{self, DecodeError};
use crate::types::hash::Hash;
use crate::types::payload::Payload;

/// An immutable block: a set of transactions, a distinguished coinbase,
/// and a link to the parent block.
///
/// The ID commits to every field including the opaque consensus data and
/// the height, so blocks are validated once upon receipt and never
/// modified. The previous-block ID of the genesis block is the zero hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "BlockRecord")]
pub struct Block {
    transactions: Vec<Transaction>,
    coinbase: Transaction,
    previous_id: Hash,
    timestamp: u64,
    consensus_data: Payload,
    height: u64,
    id: Hash,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockRecord {
    transactions: Vec<Transaction>,
    coinbase: Transaction,
    previous_id: Hash,
    timestamp: u64,
    consensus_data: Payload,
    height: u64,
    id: Hash,
}

impl Block {
    /// Creates a block, sorting the transaction set into canonical ID order
    /// before computing the block ID.
    pub fn new(
        mut transactions: Vec<Transaction>,
        coinbase: Transaction,
        previous_id: Hash,
        timestamp: u64,
        consensus_data: Payload,
        height: u64,
    ) -> Self {
        transactions.sort_unstable_by_key(Transaction::id);

        let mut h = Hash::sha3();
        h.update(b"BLOCK");
        for tx in &transactions {
            h.update(tx.id().as_slice());
        }
        h.update(coinbase.id().as_slice());
        h.update(previous_id.as_slice());
        h.update(&timestamp.to_le_bytes());
        h.update(&consensus_data.canonical_bytes());
        h.update(&height.to_le_bytes());
        let id = h.finalize();

        Self {
            transactions,
            coinbase,
            previous_id,
            timestamp,
            consensus_data,
            height,
            id,
        }
    }

    /// Non-coinbase transactions in canonical ID order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// The distinguished value-creating transaction of this block.
    pub fn coinbase(&self) -> &Transaction {
        &self.coinbase
    }

    pub fn previous_id(&self) -> Hash {
        self.previous_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Opaque data interpreted only by the consensus adapter.
    pub fn consensus_data(&self) -> &Payload {
        &self.consensus_data
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    /// Strictly decodes a block from its canonical JSON form.
    pub fn from_json(bytes: &[u8]) -> Result<Block, DecodeError> {
        codec::from_canonical_slice(bytes)
    }

    /// Renders the block as indented JSON, the on-disk genesis file form.
    pub fn to_json_pretty(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("canonical JSON encoding cannot fail")
    }
}

impl TryFrom<BlockRecord> for Block {
    type Error = DecodeError;

    fn try_from(record: BlockRecord) -> Result<Self, Self::Error> {
        let built = Block::new(
            record.transactions,
            record.coinbase,
            record.previous_id,
            record.timestamp,
            record.consensus_data,
            record.height,
        );
        if built.id != record.id {
            return Err(DecodeError::IdMismatch {
                embedded: record.id,
                computed: built.id,
            });
        }
        Ok(built)
    }
}

eq_ord_by_id!(Block);

/// Storage projection of a [`Block`]: nested transactions replaced by ID
/// references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbBlock {
    pub id: Hash,
    pub transactions: Vec<Hash>,
    pub coinbase: Hash,
    pub previous_id: Hash,
    pub timestamp: u64,
    pub consensus_data: Payload,
    pub height: u64,
}

impl DbBlock {
    pub fn project(block: &Block) -> Self {
        Self {
            id: block.id(),
            transactions: block.transactions().iter().map(Transaction::id).collect(),
            coinbase: block.coinbase().id(),
            previous_id: block.previous_id(),
            timestamp: block.timestamp(),
            consensus_data: block.consensus_data().clone(),
            height: block.height(),
        }
    }
}

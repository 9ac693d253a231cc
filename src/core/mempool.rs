//! In-memory index of unconfirmed transactions.

use log::debug;
use std::collections::{BTreeMap, HashMap};

use crate::core::consensus::Consensus;
use crate::core::contract::ContractRunner;
use crate::core::transaction::Transaction;
use crate::core::validator::TxValidator;
use crate::types::hash::Hash;

/// Cumulative-size bound (3.9 MiB) on the transaction set handed to block
/// builders.
pub const MAX_TEMPLATE_BYTES: u64 = 4_089_446;

/// Pool of verified-but-unconfirmed transactions.
///
/// Owned exclusively by the chain engine and mutated only under the chain
/// lock. Conflict detection is index-based: no two pooled transactions may
/// share an input ID, claim the same referenced output, or create the same
/// output. Iteration is in transaction-ID order, which makes template
/// selection deterministic.
#[derive(Clone, Default)]
pub struct Mempool {
    /// Pooled transactions in ID order.
    txs: BTreeMap<Hash, Transaction>,
    /// Input ID -> owning transaction.
    inputs: HashMap<Hash, Hash>,
    /// Created output ID or claimed (spent) output ID -> owning transaction.
    outputs: HashMap<Hash, Hash>,
    /// Cumulative canonical size of all pooled transactions.
    bytes: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a transaction with this ID is pooled.
    pub fn contains(&self, id: Hash) -> bool {
        self.txs.contains_key(&id)
    }

    /// Adds a transaction, rejecting any conflict with the current pool.
    ///
    /// Rejects when the ID is already pooled, an input ID is already
    /// indexed, a referenced output is already claimed by another pooled
    /// transaction, or a created output ID collides. All indices are
    /// populated atomically on acceptance.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        let id = tx.id();
        if self.txs.contains_key(&id) {
            return false;
        }

        for inp in tx.inputs() {
            if self.inputs.contains_key(&inp.id()) || self.outputs.contains_key(&inp.output_id()) {
                return false;
            }
        }

        for out in tx.outputs() {
            if self.outputs.contains_key(&out.id()) {
                return false;
            }
        }

        self.bytes += tx.size();
        for inp in tx.inputs() {
            self.inputs.insert(inp.id(), id);
            self.outputs.insert(inp.output_id(), id);
        }
        for out in tx.outputs() {
            self.outputs.insert(out.id(), id);
        }
        self.txs.insert(id, tx);

        true
    }

    /// Removes a transaction and its index entries; no-op when absent.
    pub fn remove(&mut self, tx: &Transaction) {
        let Some(stored) = self.txs.remove(&tx.id()) else {
            return;
        };

        self.bytes -= stored.size();
        for inp in stored.inputs() {
            self.inputs.remove(&inp.id());
            self.outputs.remove(&inp.output_id());
        }
        for out in stored.outputs() {
            self.outputs.remove(&out.id());
        }
    }

    /// Returns the largest ID-ordered prefix of the pool whose cumulative
    /// size stays strictly under [`MAX_TEMPLATE_BYTES`].
    ///
    /// The first transaction that would reach the bound stops iteration.
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut total = 0u64;
        let mut selected = Vec::new();

        for tx in self.txs.values() {
            let size = tx.size();
            if total + size < MAX_TEMPLATE_BYTES {
                total += size;
                selected.push(tx.clone());
                continue;
            }
            break;
        }

        selected
    }

    /// Re-runs the validator over every pooled transaction and drops those
    /// that no longer verify against the given chain-state view.
    ///
    /// The remove-set is gathered first and applied second, so a removal
    /// can never invalidate the verdict already made for a sibling.
    pub fn rescan<C: Consensus, R: ContractRunner>(&mut self, validator: &TxValidator<'_, C, R>) {
        let removals: Vec<Transaction> = self
            .txs
            .values()
            .filter(|tx| validator.verify_transaction(tx, false).is_err())
            .cloned()
            .collect();

        for tx in &removals {
            debug!("mempool: dropping invalidated transaction {}", tx.id());
            self.remove(tx);
        }
    }

    /// Number of pooled transactions.
    pub fn count(&self) -> usize {
        self.txs.len()
    }

    /// Cumulative canonical size of the pool in bytes.
    pub fn size(&self) -> u64 {
        self.bytes
    }
}

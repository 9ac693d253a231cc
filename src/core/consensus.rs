//! The pluggable consensus seam and chain-level parameters.

use std::path::PathBuf;

use crate::core::block::{Block, DbBlock};
use crate::core::transaction::Transaction;
use crate::storage::store::{StoreMut, StoreView};
use crate::types::hash::Hash;
use crate::types::payload::Payload;

/// Smallest accounting unit multiplier for whole coins.
pub const COIN: u64 = 100_000_000;

/// The consensus policy consulted by the chain engine.
///
/// Implementations decide fork choice and may maintain their own state in
/// dedicated tables of the shared storage transaction. They must be
/// stateless or internally thread-safe: `verify_transaction` runs
/// concurrently from block-verification workers.
pub trait Consensus: Send + Sync {
    /// Custom transaction rules, consulted after the structural checks.
    fn verify_transaction(&self, view: &dyn StoreView, tx: &Transaction) -> bool;

    /// Advisory callback when a transaction is confirmed into a block.
    ///
    /// A `false` return is logged but does not abort the commit unless
    /// [`ChainParams::strict_confirm_hooks`] is set.
    fn confirm_transaction(&self, db: &mut dyn StoreMut, tx: &Transaction) -> bool;

    /// Preconditions linking a new block to its parent.
    fn check_consensus_rules(
        &self,
        view: &dyn StoreView,
        block: &Block,
        parent: &DbBlock,
    ) -> bool;

    /// Fork choice: should `candidate` displace the current tip?
    fn is_block_better(&self, view: &dyn StoreView, candidate: &Block, tip: &DbBlock) -> bool;

    /// Final acceptance hook before a block's transactions are confirmed.
    fn submit_block(&self, db: &mut dyn StoreMut, block: &Block) -> bool;

    /// Produces the opaque consensus data for a freshly built block.
    fn generate_consensus_data(
        &self,
        view: &dyn StoreView,
        previous_id: Hash,
        public_key: &str,
    ) -> Payload;
}

/// Chain-wide configuration supplied by the embedder.
#[derive(Clone)]
pub struct ChainParams {
    /// Block reward at height 1.
    pub initial_block_reward: u64,
    /// Number of blocks between reward halvings.
    pub reward_halving_interval: u64,
    /// Maps the verifier's public key to the coinbase owner key.
    pub coinbase_owner: fn(&str) -> String,
    /// Canonical-serialization genesis block path; loaded on first start
    /// and written out when a fresh genesis is generated.
    pub genesis_file: Option<PathBuf>,
    /// When set, a failing `Consensus::confirm_transaction` aborts the
    /// block instead of being logged and tolerated.
    pub strict_confirm_hooks: bool,
    /// When set, a block whose timestamp precedes its parent's is rejected.
    pub require_monotonic_timestamps: bool,
}

fn identity_owner(public_key: &str) -> String {
    public_key.to_string()
}

impl ChainParams {
    /// Development defaults: 50-coin reward halving every 210 000 blocks,
    /// verifier key owns its own coinbase, lax hooks, no genesis file.
    pub fn dev() -> Self {
        Self {
            initial_block_reward: 50 * COIN,
            reward_halving_interval: 210_000,
            coinbase_owner: identity_owner,
            genesis_file: None,
            strict_confirm_hooks: false,
            require_monotonic_timestamps: false,
        }
    }

    /// Block reward at the given height: the initial reward halved once per
    /// elapsed interval. Monotone nonincreasing in height.
    pub fn block_reward(&self, height: u64) -> u64 {
        let halvings = height.saturating_sub(1) / self.reward_halving_interval.max(1);
        if halvings >= u64::BITS as u64 {
            return 0;
        }
        self.initial_block_reward >> halvings
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::dev()
    }
}

/// Consensus policy for regression testing and local development.
///
/// Every hook accepts; fork choice is driven entirely by an `isBetter`
/// flag inside the candidate block's consensus data, which lets tests and
/// single-node deployments force or forbid reorganizations explicitly.
pub struct RegtestConsensus;

impl RegtestConsensus {
    /// Consensus data that marks a block as preferable to the current tip.
    pub fn better_data() -> Payload {
        Payload::new().with("isBetter", true)
    }
}

impl Consensus for RegtestConsensus {
    fn verify_transaction(&self, _view: &dyn StoreView, _tx: &Transaction) -> bool {
        true
    }

    fn confirm_transaction(&self, _db: &mut dyn StoreMut, _tx: &Transaction) -> bool {
        true
    }

    fn check_consensus_rules(
        &self,
        _view: &dyn StoreView,
        _block: &Block,
        _parent: &DbBlock,
    ) -> bool {
        true
    }

    fn is_block_better(&self, _view: &dyn StoreView, candidate: &Block, _tip: &DbBlock) -> bool {
        candidate
            .consensus_data()
            .get("isBetter")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    fn submit_block(&self, _db: &mut dyn StoreMut, _block: &Block) -> bool {
        true
    }

    fn generate_consensus_data(
        &self,
        _view: &dyn StoreView,
        _previous_id: Hash,
        _public_key: &str,
    ) -> Payload {
        Payload::new().with("isBetter", false)
    }
}

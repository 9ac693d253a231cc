//! The chain engine: block submission, tip maintenance, candidate
//! tracking, reorganization, and the public ledger API.

use log::{error, info, warn};
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};
use std::fs;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::core::block::{Block, DbBlock};
use crate::core::consensus::{ChainParams, Consensus};
use crate::core::contract::ContractRunner;
use crate::core::mempool::Mempool;
use crate::core::transaction::{DbInput, DbOutput, DbTransaction, Output, Transaction};
use crate::core::validator::{TxValidator, TxVerifyError};
use crate::crypto::key_pair::PrivateKey;
use crate::storage::store::{
    Store, StoreError, StoreMut, StoreTx, StoreView, TIP_KEY, get_json, get_json_index, tables,
};
use crate::types::codec::to_canonical_vec;
use crate::types::hash::Hash;
use crate::types::payload::Payload;

/// Outcome of a successful block submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block extended the main chain (directly or after a
    /// reorganization) and its state changes are committed.
    Connected,
    /// The block was stored as a side-chain candidate; no state changes.
    SideChain,
    /// The block is already on the main chain; nothing was done.
    AlreadyKnown,
}

/// Reasons a submission was not accepted.
///
/// [`is_permanent`](Self::is_permanent) classifies every variant:
/// permanent rejections must not be retried and may penalize the origin,
/// transient ones may succeed after the chain state changes.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The submitted transaction failed verification.
    #[error(transparent)]
    Transaction(#[from] TxVerifyError),
    /// The transaction conflicts with one already pooled.
    #[error("transaction {0} has a mempool conflict")]
    MempoolConflict(Hash),
    /// The block's parent is in neither the main chain nor the candidates.
    #[error("previous block {0} does not exist")]
    UnknownParent(Hash),
    /// The block's claimed height does not follow its parent.
    #[error("block {id} claims height {claimed}, expected {expected}")]
    WrongHeight { id: Hash, claimed: u64, expected: u64 },
    /// The block's timestamp precedes its parent's (only checked when
    /// configured).
    #[error("block {0} has a timestamp earlier than its parent")]
    TimestampRegression(Hash),
    /// The consensus adapter's preconditions rejected the block.
    #[error("consensus rules cannot verify block {0}")]
    ConsensusRules(Hash),
    /// The consensus adapter's final acceptance hook rejected the block.
    #[error("consensus rejected block {0} on submission")]
    ConsensusSubmit(Hash),
    /// A transaction inside the block failed verification.
    #[error("block {block} contains an invalid transaction: {source}")]
    BlockTransaction {
        block: Hash,
        #[source]
        source: TxVerifyError,
    },
    /// The coinbase creates more value than the reward plus fees allow.
    #[error("coinbase output total {total} exceeds the allowed {allowed}")]
    CoinbaseOverpays { total: u64, allowed: u64 },
    /// Fee totalling overflowed the 64-bit accounting range.
    #[error("arithmetic overflow while totalling block fees")]
    FeeOverflow,
    /// An alternative chain failed to verify during reorganization; the
    /// storage transaction was discarded and the original chain stands.
    #[error("alternative chain rooted at {0} failed to verify")]
    InvalidFork(Hash),
    /// A strict confirmation hook rejected a transaction.
    #[error("consensus refused to confirm transaction {0}")]
    ConfirmHook(Hash),
    /// A record the engine relies on is missing or undecodable.
    #[error("chain state corrupted: {0}")]
    CorruptState(String),
    /// The storage backend failed; nothing was applied.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// `true` when the rejection is definitive and must not be retried.
    pub fn is_permanent(&self) -> bool {
        match self {
            SubmitError::Transaction(e) => e.is_permanent(),
            SubmitError::BlockTransaction { .. } => true,
            SubmitError::MempoolConflict(_) => false,
            SubmitError::Store(_) | SubmitError::CorruptState(_) => false,
            _ => true,
        }
    }
}

/// A requested record is absent.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("block {0} not found")]
    Block(Hash),
    #[error("no block at height {0}")]
    BlockHeight(u64),
    #[error("transaction {0} not found")]
    Transaction(Hash),
    #[error("output {0} not found")]
    Output(Hash),
    #[error("the chain is empty")]
    EmptyChain,
}

/// State mutated only under the chain lock.
struct ChainInner {
    mempool: Mempool,
    genesis_id: Option<Hash>,
}

/// The UTXO-model chain engine.
///
/// Owns the storage backend, the consensus adapter, the contract runner
/// and the mempool. Every public operation acquires the single chain lock
/// for its full duration and opens exactly one storage transaction,
/// committed on success and discarded otherwise; inner operations receive
/// the already-locked state and the open transaction by reference.
pub struct Blockchain<S: Store, C: Consensus, R: ContractRunner> {
    store: S,
    consensus: C,
    contracts: R,
    params: ChainParams,
    chain: Mutex<ChainInner>,
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn db_block<V: StoreView + ?Sized>(view: &V, key: &str) -> Option<DbBlock> {
    get_json(view, tables::BLOCKS, key)
}

fn candidate<V: StoreView + ?Sized>(view: &V, key: &str) -> Option<Block> {
    get_json(view, tables::CANDIDATES, key)
}

fn block_id_at_height<V: StoreView + ?Sized>(view: &V, height: u64) -> Option<Hash> {
    get_json_index(view, tables::BLOCKS, 0, &height.to_string())
}

/// Looks up an output record in `utxos`, falling back to `stxos`.
fn output_record<V: StoreView + ?Sized>(view: &V, key: &str) -> Option<DbOutput> {
    get_json(view, tables::UTXOS, key).or_else(|| get_json(view, tables::STXOS, key))
}

fn owner_index<V: StoreView + ?Sized>(view: &V, table: &str, owner: &str) -> Vec<Hash> {
    get_json_index(view, table, 0, owner).unwrap_or_default()
}

/// Appends an output ID to a table's public-key index.
fn index_add<T: StoreMut>(db: &mut T, table: &str, owner: &str, id: Hash) {
    let mut ids = owner_index(&*db, table, owner);
    if !ids.contains(&id) {
        ids.push(id);
    }
    db.put_index(table, 0, owner, to_canonical_vec(&ids));
}

/// Removes an output ID from a table's public-key index, erasing the
/// entry when the list empties.
fn index_remove<T: StoreMut>(db: &mut T, table: &str, owner: &str, id: Hash) {
    let mut ids = owner_index(&*db, table, owner);
    ids.retain(|x| *x != id);
    if ids.is_empty() {
        db.erase_index(table, 0, owner);
    } else {
        db.put_index(table, 0, owner, to_canonical_vec(&ids));
    }
}

/// Removes an output from a table's primary keyspace and its public-key
/// index.
fn remove_txo<T: StoreMut>(db: &mut T, table: &str, id: Hash, data: &Payload) {
    db.erase(table, &id.to_string());
    if let Some(owner) = data.public_key() {
        index_remove(db, table, owner, id);
    }
}

/// Rebuilds a confirmed transaction from its storage projection.
fn assemble_transaction<V: StoreView + ?Sized>(view: &V, id: Hash) -> Option<Transaction> {
    let record: DbTransaction = get_json(view, tables::TRANSACTIONS, &id.to_string())?;

    let mut outputs = Vec::with_capacity(record.outputs.len());
    for output_id in &record.outputs {
        outputs.push(output_record(view, &output_id.to_string())?.to_output());
    }

    let mut inputs = Vec::with_capacity(record.inputs.len());
    for input_id in &record.inputs {
        let input: DbInput = get_json(view, tables::INPUTS, &input_id.to_string())?;
        inputs.push(input.to_input());
    }

    let built = Transaction::new(inputs, outputs, record.timestamp, record.coinbase);
    (built.id() == record.id).then_some(built)
}

/// Rebuilds a full block from its storage projection.
fn assemble_block<V: StoreView + ?Sized>(view: &V, record: &DbBlock) -> Option<Block> {
    let mut transactions = Vec::with_capacity(record.transactions.len());
    for tx_id in &record.transactions {
        transactions.push(assemble_transaction(view, *tx_id)?);
    }
    let coinbase = assemble_transaction(view, record.coinbase)?;

    let built = Block::new(
        transactions,
        coinbase,
        record.previous_id,
        record.timestamp,
        record.consensus_data.clone(),
        record.height,
    );
    (built.id() == record.id).then_some(built)
}

/// Fee implied by a pooled transaction against the current unspent set.
fn pool_fee<V: StoreView + ?Sized>(view: &V, tx: &Transaction) -> Option<u64> {
    let mut input_total: u64 = 0;
    for inp in tx.inputs() {
        let utxo: DbOutput = get_json(view, tables::UTXOS, &inp.output_id().to_string())?;
        input_total = input_total.checked_add(utxo.value)?;
    }
    let output_total = tx
        .outputs()
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value()))?;
    input_total.checked_sub(output_total)
}

impl<S: Store, C: Consensus, R: ContractRunner> Blockchain<S, C, R> {
    /// Opens the engine over a storage backend, bootstrapping a genesis
    /// block when the store is empty.
    ///
    /// Bootstrap order follows the configuration: the canonical-JSON
    /// genesis file is imported when present and valid; otherwise a fresh
    /// genesis is generated with an ephemeral key and written back to the
    /// configured path.
    pub fn open(store: S, consensus: C, contracts: R, params: ChainParams) -> Result<Self, SubmitError> {
        let engine = Self {
            store,
            consensus,
            contracts,
            params,
            chain: Mutex::new(ChainInner {
                mempool: Mempool::new(),
                genesis_id: None,
            }),
        };
        engine.bootstrap()?;
        Ok(engine)
    }

    fn bootstrap(&self) -> Result<(), SubmitError> {
        let mut inner = self.chain.lock();

        let tip_exists = {
            let db = self.store.begin();
            let exists = db.get(tables::BLOCKS, TIP_KEY).is_some();
            db.abort();
            exists
        };

        if !tip_exists {
            let mut imported = false;

            if let Some(path) = self.params.genesis_file.clone() {
                match fs::read(&path) {
                    Ok(bytes) => match Block::from_json(&bytes) {
                        Ok(genesis) => {
                            match self.submit_block_locked(&mut inner, &genesis, true) {
                                Ok(_) => {
                                    info!("bootstrap: imported genesis block {}", genesis.id());
                                    imported = true;
                                }
                                Err(e) => {
                                    warn!("bootstrap: failed to import genesis block: {e}")
                                }
                            }
                        }
                        Err(e) => warn!("bootstrap: failed to parse genesis block file: {e}"),
                    },
                    Err(e) => warn!("bootstrap: failed to open genesis block file: {e}"),
                }
            }

            if !imported {
                info!("bootstrap: generating new genesis block");
                let key = PrivateKey::new();
                let genesis = self.build_template(&inner, &key.public_key().to_hex());
                self.submit_block_locked(&mut inner, &genesis, true)?;

                if let Some(path) = &self.params.genesis_file
                    && let Err(e) = fs::write(path, genesis.to_json_pretty())
                {
                    warn!("bootstrap: failed to write genesis block file: {e}");
                }
            }
        }

        if inner.genesis_id.is_none() {
            let db = self.store.begin();
            inner.genesis_id = block_id_at_height(&db, 1);
            db.abort();
        }

        Ok(())
    }

    /// ID of the genesis block, once the chain is bootstrapped.
    pub fn genesis_id(&self) -> Option<Hash> {
        self.chain.lock().genesis_id
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Verifies a transaction against current chain state and admits it
    /// to the mempool.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), SubmitError> {
        let mut inner = self.chain.lock();
        let backup = inner.mempool.clone();

        let mut db = self.store.begin();
        match self.submit_transaction_at(&mut db, &mut inner.mempool, tx) {
            Ok(()) => {
                if let Err(e) = db.commit() {
                    inner.mempool = backup;
                    return Err(e.into());
                }
                Ok(())
            }
            Err(e) => {
                db.abort();
                Err(e)
            }
        }
    }

    fn submit_transaction_at(
        &self,
        db: &mut S::Tx<'_>,
        mempool: &mut Mempool,
        tx: Transaction,
    ) -> Result<(), SubmitError> {
        let id = tx.id();

        let verdict = TxValidator::new(&*db, &self.consensus, &self.contracts)
            .verify_transaction(&tx, false);
        if let Err(e) = verdict {
            info!("submit_transaction: failed to verify transaction {id}: {e}");
            return Err(e.into());
        }

        if !mempool.insert(tx) {
            info!("submit_transaction: transaction {id} has a mempool conflict");
            return Err(SubmitError::MempoolConflict(id));
        }

        info!("submit_transaction: accepted transaction {id}");
        Ok(())
    }

    /// Submits a block for inclusion in the chain.
    ///
    /// Runs the whole attempt - including any reorganization it triggers -
    /// inside a single storage transaction, committed only on success.
    pub fn submit_block(&self, block: Block) -> Result<BlockOutcome, SubmitError> {
        let mut inner = self.chain.lock();
        self.submit_block_locked(&mut inner, &block, false)
    }

    fn submit_block_locked(
        &self,
        inner: &mut ChainInner,
        block: &Block,
        genesis: bool,
    ) -> Result<BlockOutcome, SubmitError> {
        // The mempool is in-memory state: restore it if the storage
        // transaction does not reach a successful commit.
        let backup = inner.mempool.clone();

        let mut db = self.store.begin();
        match self.submit_block_at(&mut db, inner, block, genesis) {
            Ok(outcome) => {
                if let Err(e) = db.commit() {
                    inner.mempool = backup;
                    return Err(e.into());
                }
                Ok(outcome)
            }
            Err(e) => {
                db.abort();
                inner.mempool = backup;
                Err(e)
            }
        }
    }

    fn submit_block_at(
        &self,
        db: &mut S::Tx<'_>,
        inner: &mut ChainInner,
        block: &Block,
        genesis: bool,
    ) -> Result<BlockOutcome, SubmitError> {
        let id = block.id();
        let id_key = id.to_string();

        if db.get(tables::BLOCKS, &id_key).is_some() {
            info!("submit_block: block {id} is already in the main chain");
            return Ok(BlockOutcome::AlreadyKnown);
        }

        let mut only_save = false;
        let mut height = 1u64;

        if !genesis {
            let parent_key = block.previous_id().to_string();
            let parent = match db_block(&*db, &parent_key) {
                Some(parent) => parent,
                None => match candidate(&*db, &parent_key) {
                    Some(parent) => DbBlock::project(&parent),
                    None => {
                        info!(
                            "submit_block: previous block {} does not exist",
                            block.previous_id()
                        );
                        return Err(SubmitError::UnknownParent(block.previous_id()));
                    }
                },
            };

            if self.params.require_monotonic_timestamps && block.timestamp() < parent.timestamp {
                info!("submit_block: block {id} regresses its parent's timestamp");
                return Err(SubmitError::TimestampRegression(id));
            }

            if !self.consensus.check_consensus_rules(&*db, block, &parent) {
                info!("submit_block: consensus rules cannot verify block {id}");
                return Err(SubmitError::ConsensusRules(id));
            }

            let Some(tip) = db_block(&*db, TIP_KEY) else {
                return Err(SubmitError::UnknownParent(block.previous_id()));
            };

            if parent.id != tip.id {
                // The block does not directly lead on from the tip: either
                // the fork it completes outweighs the current chain, or it
                // is parked as a candidate.
                if self.consensus.is_block_better(&*db, block, &tip) {
                    info!("submit_block: forking the chain to parent {}", parent.id);
                    self.reorg_chain(db, inner, parent.id)?;
                    let new_tip = db_block(&*db, TIP_KEY).ok_or_else(|| {
                        SubmitError::CorruptState("tip missing after reorganization".into())
                    })?;
                    height = new_tip.height + 1;
                } else {
                    warn!(
                        "submit_block: block {id} has less verifier backing than the current chain"
                    );
                    height = parent.height + 1;
                    only_save = true;
                }
            } else {
                height = tip.height + 1;
            }
        }

        // The ID commits to the height, so the claimed height must be the
        // one the parent implies.
        if block.height() != height {
            return Err(SubmitError::WrongHeight {
                id,
                claimed: block.height(),
                expected: height,
            });
        }

        if only_save {
            db.put(tables::CANDIDATES, &id_key, to_canonical_vec(block));
            info!("submit_block: stored side-chain candidate {id} at height {height}");
            return Ok(BlockOutcome::SideChain);
        }

        let fees = self.verify_block_body(db, block)?;

        let coinbase_verdict = TxValidator::new(&*db, &self.consensus, &self.contracts)
            .verify_transaction(block.coinbase(), true);
        if let Err(e) = coinbase_verdict {
            info!("submit_block: coinbase transaction could not be verified: {e}");
            return Err(SubmitError::BlockTransaction { block: id, source: e });
        }

        let coinbase_total = block
            .coinbase()
            .outputs()
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value()))
            .ok_or(SubmitError::FeeOverflow)?;
        let allowed = fees
            .checked_add(self.params.block_reward(height))
            .ok_or(SubmitError::FeeOverflow)?;
        if coinbase_total > allowed {
            info!("submit_block: coinbase output is not the correct value");
            return Err(SubmitError::CoinbaseOverpays {
                total: coinbase_total,
                allowed,
            });
        }

        if !self.consensus.submit_block(db, block) {
            info!("submit_block: consensus submit hook rejected block {id}");
            return Err(SubmitError::ConsensusSubmit(id));
        }

        self.confirm_transaction(db, &mut inner.mempool, block.coinbase(), id)?;
        for tx in block.transactions() {
            self.confirm_transaction(db, &mut inner.mempool, tx, id)?;
        }

        let record = DbBlock::project(block);
        db.erase(tables::CANDIDATES, &id_key);
        db.put(tables::BLOCKS, TIP_KEY, to_canonical_vec(&record));
        db.put_index(tables::BLOCKS, 0, &height.to_string(), to_canonical_vec(&id));
        db.put(tables::BLOCKS, &id_key, to_canonical_vec(&record));

        inner
            .mempool
            .rescan(&TxValidator::new(&*db, &self.consensus, &self.contracts));

        if genesis {
            inner.genesis_id = Some(id);
        }

        info!("submit_block: committed block {id} at height {height}");
        Ok(BlockOutcome::Connected)
    }

    /// Verifies every non-coinbase transaction of a block and totals the
    /// fees they pay.
    ///
    /// Verification runs on scoped worker threads in batches sized by the
    /// hardware concurrency, all sharing the storage transaction
    /// read-only; the failure slot is checked after each join batch and
    /// short-circuits further batches.
    fn verify_block_body(&self, view: &S::Tx<'_>, block: &Block) -> Result<u64, SubmitError> {
        let txs = block.transactions();
        if txs.is_empty() {
            return Ok(0);
        }

        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let mut fees: u64 = 0;

        for batch in txs.chunks(workers) {
            let verdicts: Vec<Result<u64, TxVerifyError>> = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|tx| {
                        scope.spawn(move || {
                            TxValidator::new(view, &self.consensus, &self.contracts)
                                .verify_transaction(tx, false)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("verification worker panicked"))
                    .collect()
            });

            for verdict in verdicts {
                match verdict {
                    Ok(fee) => {
                        fees = fees.checked_add(fee).ok_or(SubmitError::FeeOverflow)?;
                    }
                    Err(e) => {
                        info!("submit_block: transaction could not be verified: {e}");
                        return Err(SubmitError::BlockTransaction {
                            block: block.id(),
                            source: e,
                        });
                    }
                }
            }
        }

        Ok(fees)
    }

    /// Confirms a transaction into the given block: spends its inputs'
    /// referenced outputs into `stxos`, records its inputs, adds its
    /// outputs to `utxos`, stores the projection and drops it from the
    /// mempool.
    fn confirm_transaction(
        &self,
        db: &mut S::Tx<'_>,
        mempool: &mut Mempool,
        tx: &Transaction,
        confirming_block: Hash,
    ) -> Result<(), SubmitError> {
        if !self.consensus.confirm_transaction(db, tx) {
            if self.params.strict_confirm_hooks {
                return Err(SubmitError::ConfirmHook(tx.id()));
            }
            // Advisory hook: tolerated, but loudly.
            error!("consensus rules failed to confirm transaction {}", tx.id());
        }

        for inp in tx.inputs() {
            let output_key = inp.output_id().to_string();
            let raw = db.get(tables::UTXOS, &output_key).ok_or_else(|| {
                SubmitError::CorruptState(format!("utxo {output_key} missing during confirmation"))
            })?;
            let utxo: DbOutput = serde_json::from_slice(&raw).map_err(|e| {
                SubmitError::CorruptState(format!("utxo {output_key} undecodable: {e}"))
            })?;

            db.put(tables::STXOS, &output_key, raw);
            if let Some(owner) = utxo.data.public_key() {
                let owner = owner.to_string();
                index_add(db, tables::STXOS, &owner, utxo.id);
                index_remove(db, tables::UTXOS, &owner, utxo.id);
            }
            db.erase(tables::UTXOS, &output_key);

            db.put(
                tables::INPUTS,
                &inp.id().to_string(),
                to_canonical_vec(&DbInput::project(inp)),
            );
        }

        for out in tx.outputs() {
            if let Some(owner) = out.data().public_key() {
                let owner = owner.to_string();
                index_add(db, tables::UTXOS, &owner, out.id());
            }
            db.put(
                tables::UTXOS,
                &out.id().to_string(),
                to_canonical_vec(&DbOutput::project(out, tx.id())),
            );
        }

        db.put(
            tables::TRANSACTIONS,
            &tx.id().to_string(),
            to_canonical_vec(&DbTransaction::project(tx, confirming_block)),
        );

        mempool.remove(tx);
        Ok(())
    }

    /// Reverses the current tip block inside the caller's storage
    /// transaction: the exact inverse of confirmation, after which the
    /// parent is the tip and the reversed block is a candidate.
    ///
    /// The reversed block's transactions are replayed into the mempool
    /// best-effort; replay failures are logged, not fatal.
    fn reverse_block(&self, db: &mut S::Tx<'_>, mempool: &mut Mempool) -> Result<(), SubmitError> {
        let tip_record = db_block(&*db, TIP_KEY)
            .ok_or_else(|| SubmitError::CorruptState("no tip to reverse".into()))?;
        let tip = assemble_block(&*db, &tip_record).ok_or_else(|| {
            SubmitError::CorruptState(format!("tip block {} cannot be rebuilt", tip_record.id))
        })?;

        for out in tip.coinbase().outputs() {
            remove_txo(db, tables::UTXOS, out.id(), out.data());
        }
        db.erase(tables::TRANSACTIONS, &tip.coinbase().id().to_string());

        let mut replay: Vec<Transaction> = Vec::new();
        for tx in tip.transactions() {
            for out in tx.outputs() {
                remove_txo(db, tables::UTXOS, out.id(), out.data());
            }

            for inp in tx.inputs() {
                db.erase(tables::INPUTS, &inp.id().to_string());

                let spent_key = inp.output_id().to_string();
                let spent: DbOutput =
                    get_json(&*db, tables::STXOS, &spent_key).ok_or_else(|| {
                        SubmitError::CorruptState(format!(
                            "stxo {spent_key} missing during reversal"
                        ))
                    })?;

                remove_txo(db, tables::STXOS, spent.id, &spent.data);
                db.put(tables::UTXOS, &spent_key, to_canonical_vec(&spent));
                if let Some(owner) = spent.data.public_key() {
                    let owner = owner.to_string();
                    index_add(db, tables::UTXOS, &owner, spent.id);
                }
            }

            db.erase(tables::TRANSACTIONS, &tx.id().to_string());
            replay.push(tx.clone());
        }

        let parent = db_block(&*db, &tip.previous_id().to_string()).ok_or_else(|| {
            SubmitError::CorruptState(format!(
                "cannot reverse block {}: parent is not on the main chain",
                tip.id()
            ))
        })?;

        db.erase_index(tables::BLOCKS, 0, &tip_record.height.to_string());
        db.erase(tables::BLOCKS, &tip.id().to_string());
        db.put(tables::BLOCKS, TIP_KEY, to_canonical_vec(&parent));
        db.put(tables::CANDIDATES, &tip.id().to_string(), to_canonical_vec(&tip));

        mempool.rescan(&TxValidator::new(&*db, &self.consensus, &self.contracts));

        for tx in replay {
            let id = tx.id();
            if let Err(e) = self.submit_transaction_at(db, mempool, tx) {
                warn!("reverse_block: previously confirmed transaction {id} is now invalid: {e}");
            }
        }

        Ok(())
    }

    /// Swaps the main-chain suffix for the candidate chain ending at
    /// `new_tip_id`, all inside the caller's storage transaction.
    ///
    /// Walks candidate ancestry back to the fork point, reverses the main
    /// chain to it, then resubmits the candidates oldest-first. Any
    /// failure surfaces as [`SubmitError::InvalidFork`]; the caller
    /// discards the storage transaction, restoring the original chain.
    fn reorg_chain(
        &self,
        db: &mut S::Tx<'_>,
        inner: &mut ChainInner,
        new_tip_id: Hash,
    ) -> Result<(), SubmitError> {
        let mut pending: Vec<Block> = Vec::new();
        let mut cursor = new_tip_id;
        while let Some(block) = candidate(&*db, &cursor.to_string()) {
            cursor = block.previous_id();
            pending.push(block);
        }
        // When the target already sits on the main chain the walk is empty
        // and the fork point is the target itself.
        let fork_point = cursor;

        loop {
            let tip = db_block(&*db, TIP_KEY).ok_or_else(|| {
                SubmitError::CorruptState("tip missing during reorganization".into())
            })?;
            if tip.id == fork_point {
                break;
            }
            if tip.height <= 1 {
                warn!("reorg_chain: fork point {fork_point} is not on the main chain");
                return Err(SubmitError::InvalidFork(new_tip_id));
            }
            self.reverse_block(db, &mut inner.mempool)?;
        }

        for block in pending.into_iter().rev() {
            let block_id = block.id();
            if let Err(e) = self.submit_block_at(db, inner, &block, false) {
                warn!("reorg_chain: alternative chain failed to verify: {e}");
                return Err(SubmitError::InvalidFork(block_id));
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Block template
    // ------------------------------------------------------------------

    /// Assembles a candidate block over the current mempool snapshot.
    ///
    /// Read-only with respect to persistent state: the coinbase pays the
    /// block reward plus the fees of every selected transaction to the
    /// configured owner of `public_key`, with a random nonce.
    pub fn generate_verifying_block(&self, public_key: &str) -> Block {
        let inner = self.chain.lock();
        self.build_template(&inner, public_key)
    }

    fn build_template(&self, inner: &ChainInner, public_key: &str) -> Block {
        let db = self.store.begin();

        let transactions = inner.mempool.transactions();
        let (height, previous_id, genesis) = match db_block(&db, TIP_KEY) {
            Some(tip) => (tip.height + 1, tip.id, false),
            None => (1, Hash::zero(), true),
        };

        let now = unix_time();
        let mut value = self.params.block_reward(height);
        for tx in &transactions {
            value = value.saturating_add(pool_fee(&db, tx).unwrap_or(0));
        }

        let owner = (self.params.coinbase_owner)(public_key);
        let nonce = OsRng.next_u32() as u64;
        let coinbase = Transaction::new(
            vec![],
            vec![Output::new(value, nonce, Payload::new().with("publicKey", owner))],
            now,
            true,
        );

        let consensus_data = if genesis {
            Payload::new()
        } else {
            self.consensus
                .generate_consensus_data(&db, previous_id, public_key)
        };

        let block = Block::new(transactions, coinbase, previous_id, now, consensus_data, height);
        db.abort();
        block
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    fn lookup_block(&self, view: &S::Tx<'_>, key: &str) -> Option<Block> {
        match db_block(view, key) {
            Some(record) => assemble_block(view, &record)
                .or_else(|| candidate(view, &record.id.to_string())),
            None => candidate(view, key),
        }
    }

    /// Returns a block by ID, searching the main chain and candidates.
    pub fn block(&self, id: Hash) -> Result<Block, LookupError> {
        let _guard = self.chain.lock();
        let db = self.store.begin();
        let result = self
            .lookup_block(&db, &id.to_string())
            .ok_or(LookupError::Block(id));
        db.abort();
        result
    }

    /// Returns the main-chain block at the given height.
    pub fn block_by_height(&self, height: u64) -> Result<Block, LookupError> {
        let _guard = self.chain.lock();
        let db = self.store.begin();
        let result = block_id_at_height(&db, height)
            .and_then(|id| self.lookup_block(&db, &id.to_string()))
            .ok_or(LookupError::BlockHeight(height));
        db.abort();
        result
    }

    /// Returns the current tip block.
    pub fn tip(&self) -> Result<Block, LookupError> {
        let _guard = self.chain.lock();
        let db = self.store.begin();
        let result = db_block(&db, TIP_KEY)
            .and_then(|record| assemble_block(&db, &record))
            .ok_or(LookupError::EmptyChain);
        db.abort();
        result
    }

    /// Returns a confirmed transaction by ID.
    pub fn transaction(&self, id: Hash) -> Result<Transaction, LookupError> {
        let _guard = self.chain.lock();
        let db = self.store.begin();
        let result = assemble_transaction(&db, id).ok_or(LookupError::Transaction(id));
        db.abort();
        result
    }

    /// Returns an output by ID, searching `utxos` then `stxos`.
    pub fn output(&self, id: Hash) -> Result<Output, LookupError> {
        let _guard = self.chain.lock();
        let db = self.store.begin();
        let result = output_record(&db, &id.to_string())
            .map(|record| record.to_output())
            .ok_or(LookupError::Output(id));
        db.abort();
        result
    }

    fn outputs_for_owner(&self, table: &'static str, public_key: &str) -> Vec<DbOutput> {
        let _guard = self.chain.lock();
        let db = self.store.begin();
        let outputs = owner_index(&db, table, public_key)
            .into_iter()
            .filter_map(|id| get_json(&db, table, &id.to_string()))
            .collect();
        db.abort();
        outputs
    }

    /// All unspent outputs owned by the given public key.
    pub fn unspent_outputs(&self, public_key: &str) -> Vec<DbOutput> {
        self.outputs_for_owner(tables::UTXOS, public_key)
    }

    /// All spent outputs owned by the given public key.
    pub fn spent_outputs(&self, public_key: &str) -> Vec<DbOutput> {
        self.outputs_for_owner(tables::STXOS, public_key)
    }

    /// Snapshot of the mempool, bounded by the template size limit.
    pub fn unconfirmed_transactions(&self) -> Vec<Transaction> {
        self.chain.lock().mempool.transactions()
    }

    /// Number of transactions in the mempool.
    pub fn mempool_count(&self) -> usize {
        self.chain.lock().mempool.count()
    }

    /// Cumulative byte size of the mempool.
    pub fn mempool_size(&self) -> u64 {
        self.chain.lock().mempool.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consensus::{COIN, RegtestConsensus};
    use crate::core::contract::NoContractRunner;
    use crate::storage::memory::MemoryStore;
    use crate::test_utils::{
        DevChain, empty_block, genesis_block, open_chain_with_genesis, spend_to,
    };
    use std::collections::BTreeMap;

    type Snapshot = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

    fn fresh_chain() -> DevChain {
        Blockchain::open(
            MemoryStore::new(),
            RegtestConsensus,
            NoContractRunner,
            ChainParams::dev(),
        )
        .unwrap()
    }

    /// Funded chain: genesis pays 50 coins to the returned key.
    fn funded_chain() -> (DevChain, crate::crypto::key_pair::PrivateKey, Output, tempfile::TempDir) {
        let key = PrivateKey::new();
        let genesis = genesis_block(&key, 50 * COIN, 100);
        let utxo = genesis.coinbase().outputs()[0].clone();
        let (chain, dir) = open_chain_with_genesis(&genesis, ChainParams::dev());
        (chain, key, utxo, dir)
    }

    fn assert_utxo_stxo_disjoint(store: &MemoryStore) {
        let snapshot = store.snapshot();
        let empty = BTreeMap::new();
        let utxos = snapshot.get(tables::UTXOS).unwrap_or(&empty);
        let stxos = snapshot.get(tables::STXOS).unwrap_or(&empty);
        for key in utxos.keys() {
            assert!(!stxos.contains_key(key), "output {key} in both utxos and stxos");
        }
    }

    /// Keyspaces covered by the reversibility property.
    fn reversible_state(snapshot: &Snapshot) -> Snapshot {
        snapshot
            .iter()
            .filter(|(slot, _)| !slot.starts_with(tables::CANDIDATES))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[test]
    fn genesis_only_chain() {
        let chain = fresh_chain();

        let tip = chain.tip().unwrap();
        assert_eq!(tip.height(), 1);
        assert_eq!(chain.block_by_height(1).unwrap().id(), tip.id());
        assert_eq!(chain.genesis_id(), Some(tip.id()));
        assert_eq!(chain.mempool_count(), 0);
        assert_eq!(chain.mempool_size(), 0);
    }

    #[test]
    fn genesis_file_is_written_and_reimported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");

        let mut params = ChainParams::dev();
        params.genesis_file = Some(path.clone());

        let first = Blockchain::open(
            MemoryStore::new(),
            RegtestConsensus,
            NoContractRunner,
            params.clone(),
        )
        .unwrap();
        assert!(path.exists());

        let second =
            Blockchain::open(MemoryStore::new(), RegtestConsensus, NoContractRunner, params)
                .unwrap();
        assert_eq!(first.genesis_id(), second.genesis_id());
    }

    #[test]
    fn reopening_an_existing_store_keeps_the_chain() {
        let (chain, _key, _utxo, _dir) = funded_chain();
        let tip = chain.tip().unwrap();
        let store = chain.store.clone();
        drop(chain);

        let reopened = Blockchain::open(
            store,
            RegtestConsensus,
            NoContractRunner,
            ChainParams::dev(),
        )
        .unwrap();
        assert_eq!(reopened.tip().unwrap().id(), tip.id());
        assert_eq!(reopened.genesis_id(), Some(tip.id()));
    }

    #[test]
    fn simple_spend_lifecycle() {
        let (chain, key, utxo, _dir) = funded_chain();
        let owner_hex = key.public_key().to_hex();

        let recipient = PrivateKey::new();
        let tx = spend_to(&key, &utxo, &recipient.public_key(), 30 * COIN, 200);
        chain.submit_transaction(tx.clone()).unwrap();
        assert_eq!(chain.mempool_count(), 1);
        assert!(chain.mempool_size() > 0);
        assert_eq!(chain.unconfirmed_transactions(), vec![tx.clone()]);

        let verifier = PrivateKey::new();
        let block = chain.generate_verifying_block(&verifier.public_key().to_hex());
        assert_eq!(block.height(), 2);
        assert_eq!(block.transactions(), &[tx.clone()]);

        let outcome = chain.submit_block(block.clone()).unwrap();
        assert_eq!(outcome, BlockOutcome::Connected);

        // The spent coin moved to stxos; the new outputs are unspent.
        assert!(chain.spent_outputs(&owner_hex).iter().any(|o| o.id == utxo.id()));
        assert!(chain.unspent_outputs(&owner_hex).iter().all(|o| o.id != utxo.id()));
        for out in tx.outputs() {
            assert_eq!(chain.output(out.id()).unwrap(), *out);
        }
        let recipient_hex = recipient.public_key().to_hex();
        assert!(
            chain
                .unspent_outputs(&recipient_hex)
                .iter()
                .any(|o| o.value == 30 * COIN)
        );

        assert_eq!(chain.mempool_count(), 0);
        assert_eq!(chain.transaction(tx.id()).unwrap(), tx);
        assert_eq!(chain.tip().unwrap().id(), block.id());
        assert_utxo_stxo_disjoint(&chain.store);

        // Resubmitting the tip block is a success no-op.
        let before = chain.store.snapshot();
        assert_eq!(
            chain.submit_block(block).unwrap(),
            BlockOutcome::AlreadyKnown
        );
        assert_eq!(chain.store.snapshot(), before);
    }

    #[test]
    fn template_coinbase_matches_fees_plus_reward_exactly() {
        let (chain, key, utxo, _dir) = funded_chain();

        let tx = spend_to(&key, &utxo, &PrivateKey::new().public_key(), COIN, 200);
        let fee = {
            let db = chain.store.begin();
            let fee = pool_fee(&db, &tx).unwrap();
            db.abort();
            fee
        };
        chain.submit_transaction(tx).unwrap();

        let block = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        let coinbase_total: u64 = block.coinbase().outputs().iter().map(Output::value).sum();
        assert_eq!(coinbase_total, chain.params.block_reward(2) + fee);

        // Exactly fees + reward is accepted.
        assert_eq!(chain.submit_block(block).unwrap(), BlockOutcome::Connected);
    }

    #[test]
    fn coinbase_overpaying_by_one_unit_is_rejected() {
        let (chain, _key, _utxo, _dir) = funded_chain();
        let genesis_id = chain.tip().unwrap().id();

        let reward = chain.params.block_reward(2);
        let block = empty_block(genesis_id, 2, reward + 1, Payload::new(), 200);

        let err = chain.submit_block(block).unwrap_err();
        assert!(matches!(err, SubmitError::CoinbaseOverpays { .. }));
        assert!(err.is_permanent());
        assert_eq!(chain.tip().unwrap().id(), genesis_id);
    }

    #[test]
    fn double_spend_is_a_transient_mempool_conflict() {
        let (chain, key, utxo, _dir) = funded_chain();

        let first = spend_to(&key, &utxo, &PrivateKey::new().public_key(), 30 * COIN, 200);
        chain.submit_transaction(first).unwrap();

        let second = spend_to(&key, &utxo, &PrivateKey::new().public_key(), 10 * COIN, 201);
        let err = chain.submit_transaction(second).unwrap_err();
        assert!(matches!(err, SubmitError::MempoolConflict(_)));
        assert!(!err.is_permanent());
        assert_eq!(chain.mempool_count(), 1);
    }

    #[test]
    fn unknown_parent_is_rejected_permanently() {
        let (chain, _key, _utxo, _dir) = funded_chain();
        let orphan = empty_block(
            Hash::sha3().chain(b"nowhere").finalize(),
            2,
            1,
            Payload::new(),
            200,
        );
        let err = chain.submit_block(orphan).unwrap_err();
        assert!(matches!(err, SubmitError::UnknownParent(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn wrong_claimed_height_is_rejected() {
        let (chain, _key, _utxo, _dir) = funded_chain();
        let genesis_id = chain.tip().unwrap().id();

        let block = empty_block(genesis_id, 5, 1, Payload::new(), 200);
        let err = chain.submit_block(block).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::WrongHeight {
                claimed: 5,
                expected: 2,
                ..
            }
        ));
    }

    #[test]
    fn timestamp_regression_is_configurable() {
        let key = PrivateKey::new();
        let genesis = genesis_block(&key, 50 * COIN, 1_000);

        let mut strict = ChainParams::dev();
        strict.require_monotonic_timestamps = true;
        let (chain, _dir) = open_chain_with_genesis(&genesis, strict);
        let old = empty_block(genesis.id(), 2, 1, Payload::new(), 999);
        let err = chain.submit_block(old.clone()).unwrap_err();
        assert!(matches!(err, SubmitError::TimestampRegression(_)));

        let (lax_chain, _dir2) = open_chain_with_genesis(&genesis, ChainParams::dev());
        assert_eq!(
            lax_chain.submit_block(old).unwrap(),
            BlockOutcome::Connected
        );
    }

    #[test]
    fn block_reversal_restores_prior_state() {
        let (chain, key, utxo, _dir) = funded_chain();

        let tx = spend_to(&key, &utxo, &PrivateKey::new().public_key(), 30 * COIN, 200);
        chain.submit_transaction(tx.clone()).unwrap();

        let before = chain.store.snapshot();
        let block = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        chain.submit_block(block.clone()).unwrap();
        assert_ne!(chain.store.snapshot(), before);

        {
            let mut inner = chain.chain.lock();
            let mut db = chain.store.begin();
            chain.reverse_block(&mut db, &mut inner.mempool).unwrap();
            db.commit().unwrap();
        }

        let after = chain.store.snapshot();
        assert_eq!(reversible_state(&after), reversible_state(&before));

        // The reversed block is now a candidate and its transaction is
        // back in the mempool.
        assert!(after.get(tables::CANDIDATES).unwrap().contains_key(&block.id().to_string()));
        assert!(chain.unconfirmed_transactions().contains(&tx));
        assert_utxo_stxo_disjoint(&chain.store);
    }

    #[test]
    fn fork_reorganizes_when_consensus_prefers_it() {
        let (chain, key, utxo, _dir) = funded_chain();
        let genesis_id = chain.tip().unwrap().id();

        // Main chain: A2 (carrying a spend), A3.
        let tx = spend_to(&key, &utxo, &PrivateKey::new().public_key(), 30 * COIN, 200);
        chain.submit_transaction(tx.clone()).unwrap();
        let a2 = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        chain.submit_block(a2.clone()).unwrap();
        let a3 = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        chain.submit_block(a3.clone()).unwrap();
        assert_eq!(chain.tip().unwrap().id(), a3.id());

        // Alternative chain from genesis. B2 is not preferred: side chain.
        let reward = chain.params.block_reward(2);
        let b2 = empty_block(genesis_id, 2, reward, Payload::new(), 300);
        assert_eq!(chain.submit_block(b2.clone()).unwrap(), BlockOutcome::SideChain);
        assert_eq!(chain.tip().unwrap().id(), a3.id());

        // B3 carries the isBetter flag: the engine reverses A3 and A2,
        // connects B2, then extends with B3.
        let b3 = empty_block(b2.id(), 3, reward, RegtestConsensus::better_data(), 301);
        assert_eq!(chain.submit_block(b3.clone()).unwrap(), BlockOutcome::Connected);

        assert_eq!(chain.tip().unwrap().id(), b3.id());
        assert_eq!(chain.block_by_height(2).unwrap().id(), b2.id());
        assert_eq!(chain.block_by_height(3).unwrap().id(), b3.id());

        // Chain continuity across the new suffix.
        assert_eq!(chain.block_by_height(2).unwrap().previous_id(), genesis_id);
        assert_eq!(chain.block_by_height(3).unwrap().previous_id(), b2.id());

        // The displaced blocks became candidates; B2 no longer is one.
        let snapshot = chain.store.snapshot();
        let candidates = snapshot.get(tables::CANDIDATES).unwrap();
        assert!(candidates.contains_key(&a2.id().to_string()));
        assert!(candidates.contains_key(&a3.id().to_string()));
        assert!(!candidates.contains_key(&b2.id().to_string()));

        // The spend from A2 was replayed into the mempool.
        assert!(chain.unconfirmed_transactions().contains(&tx));

        // Displaced blocks remain reachable through the candidate set.
        assert_eq!(chain.block(a2.id()).unwrap().id(), a2.id());
        assert_utxo_stxo_disjoint(&chain.store);
    }

    /// Regtest behavior plus a rejection of one specific block in the
    /// final submit hook.
    struct RejectOnSubmit {
        reject: Hash,
    }

    impl Consensus for RejectOnSubmit {
        fn verify_transaction(&self, view: &dyn StoreView, tx: &Transaction) -> bool {
            RegtestConsensus.verify_transaction(view, tx)
        }
        fn confirm_transaction(&self, db: &mut dyn StoreMut, tx: &Transaction) -> bool {
            RegtestConsensus.confirm_transaction(db, tx)
        }
        fn check_consensus_rules(
            &self,
            view: &dyn StoreView,
            block: &Block,
            parent: &DbBlock,
        ) -> bool {
            RegtestConsensus.check_consensus_rules(view, block, parent)
        }
        fn is_block_better(&self, view: &dyn StoreView, candidate: &Block, tip: &DbBlock) -> bool {
            RegtestConsensus.is_block_better(view, candidate, tip)
        }
        fn submit_block(&self, _db: &mut dyn StoreMut, block: &Block) -> bool {
            block.id() != self.reject
        }
        fn generate_consensus_data(
            &self,
            view: &dyn StoreView,
            previous_id: Hash,
            public_key: &str,
        ) -> Payload {
            RegtestConsensus.generate_consensus_data(view, previous_id, public_key)
        }
    }

    #[test]
    fn failed_reorganization_preserves_all_state() {
        let key = PrivateKey::new();
        let genesis = genesis_block(&key, 50 * COIN, 100);
        let utxo = genesis.coinbase().outputs()[0].clone();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        std::fs::write(&path, genesis.to_json_pretty()).unwrap();
        let mut params = ChainParams::dev();
        params.genesis_file = Some(path);

        let reward = params.block_reward(2);
        let b2 = empty_block(genesis.id(), 2, reward, Payload::new(), 300);
        let b3 = empty_block(b2.id(), 3, reward, RegtestConsensus::better_data(), 301);

        let chain = Blockchain::open(
            MemoryStore::new(),
            RejectOnSubmit { reject: b3.id() },
            NoContractRunner,
            params,
        )
        .unwrap();

        // Main chain with a pooled-and-confirmed spend, then A3.
        let tx = spend_to(&key, &utxo, &PrivateKey::new().public_key(), 30 * COIN, 200);
        chain.submit_transaction(tx).unwrap();
        let a2 = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        chain.submit_block(a2).unwrap();
        let a3 = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        chain.submit_block(a3.clone()).unwrap();

        chain.submit_block(b2).unwrap();

        let snapshot_before = chain.store.snapshot();
        let mempool_before = chain.mempool_count();

        // The reorganization itself succeeds, but B3 then fails its own
        // submit hook: the whole storage transaction is discarded.
        let err = chain.submit_block(b3).unwrap_err();
        assert!(matches!(err, SubmitError::ConsensusSubmit(_)));
        assert!(err.is_permanent());

        assert_eq!(chain.store.snapshot(), snapshot_before);
        assert_eq!(chain.mempool_count(), mempool_before);
        assert_eq!(chain.tip().unwrap().id(), a3.id());
    }

    #[test]
    fn reorg_runs_through_fork_points_already_on_the_main_chain() {
        let (chain, _key, _utxo, _dir) = funded_chain();
        let genesis_id = chain.tip().unwrap().id();

        let a2 = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        chain.submit_block(a2).unwrap();

        // B2's parent (genesis) is on the main chain, so the candidate
        // walk is empty and the engine reverses straight to the parent.
        let reward = chain.params.block_reward(2);
        let b2 = empty_block(genesis_id, 2, reward, RegtestConsensus::better_data(), 300);
        assert_eq!(chain.submit_block(b2.clone()).unwrap(), BlockOutcome::Connected);
        assert_eq!(chain.tip().unwrap().id(), b2.id());
    }

    /// Consensus whose confirmation hook always refuses.
    struct RefusingConfirm;

    impl Consensus for RefusingConfirm {
        fn verify_transaction(&self, _: &dyn StoreView, _: &Transaction) -> bool {
            true
        }
        fn confirm_transaction(&self, _: &mut dyn StoreMut, _: &Transaction) -> bool {
            false
        }
        fn check_consensus_rules(&self, _: &dyn StoreView, _: &Block, _: &DbBlock) -> bool {
            true
        }
        fn is_block_better(&self, _: &dyn StoreView, _: &Block, _: &DbBlock) -> bool {
            false
        }
        fn submit_block(&self, _: &mut dyn StoreMut, _: &Block) -> bool {
            true
        }
        fn generate_consensus_data(&self, _: &dyn StoreView, _: Hash, _: &str) -> Payload {
            Payload::new()
        }
    }

    #[test]
    fn confirm_hook_failures_are_tolerated_unless_strict() {
        // Lax (default): the hook failure is logged and the chain grows.
        let lax = Blockchain::open(
            MemoryStore::new(),
            RefusingConfirm,
            NoContractRunner,
            ChainParams::dev(),
        )
        .unwrap();
        assert_eq!(lax.tip().unwrap().height(), 1);

        // Strict: the same bootstrap fails on the genesis coinbase.
        let mut params = ChainParams::dev();
        params.strict_confirm_hooks = true;
        let strict = Blockchain::open(
            MemoryStore::new(),
            RefusingConfirm,
            NoContractRunner,
            params,
        );
        assert!(matches!(strict, Err(SubmitError::ConfirmHook(_))));
    }

    #[test]
    fn lookups_signal_not_found_distinctly() {
        let (chain, _key, _utxo, _dir) = funded_chain();
        let missing = Hash::sha3().chain(b"missing").finalize();

        assert!(matches!(chain.block(missing), Err(LookupError::Block(_))));
        assert!(matches!(
            chain.block_by_height(9),
            Err(LookupError::BlockHeight(9))
        ));
        assert!(matches!(
            chain.transaction(missing),
            Err(LookupError::Transaction(_))
        ));
        assert!(matches!(chain.output(missing), Err(LookupError::Output(_))));
    }

    #[test]
    fn chain_continuity_holds_over_several_blocks() {
        let (chain, _key, _utxo, _dir) = funded_chain();

        for _ in 0..4 {
            let block = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
            chain.submit_block(block).unwrap();
        }

        let tip = chain.tip().unwrap();
        assert_eq!(tip.height(), 5);
        for height in 2..=tip.height() {
            let block = chain.block_by_height(height).unwrap();
            let parent = chain.block_by_height(height - 1).unwrap();
            assert_eq!(block.previous_id(), parent.id());
            assert_eq!(block.height(), height);
        }
    }

    #[test]
    fn block_with_invalid_transaction_is_rejected_permanently() {
        let (chain, key, utxo, _dir) = funded_chain();
        let genesis_id = chain.tip().unwrap().id();

        // A spend of an output that does not exist.
        let phantom = crate::test_utils::keyed_output(&PrivateKey::new(), 10 * COIN, 77);
        let bad_tx = spend_to(&PrivateKey::new(), &phantom, &key.public_key(), COIN, 200);

        let coinbase = Transaction::new(
            vec![],
            vec![crate::test_utils::keyed_output(
                &PrivateKey::new(),
                chain.params.block_reward(2),
                2,
            )],
            200,
            true,
        );
        let block = Block::new(
            vec![bad_tx],
            coinbase,
            genesis_id,
            200,
            Payload::new(),
            2,
        );

        let err = chain.submit_block(block).unwrap_err();
        assert!(matches!(err, SubmitError::BlockTransaction { .. }));
        assert!(err.is_permanent());
        assert_eq!(chain.tip().unwrap().id(), genesis_id);
        assert_eq!(utxo.value(), 50 * COIN);
    }

    #[test]
    fn many_transaction_block_verifies_in_parallel_batches() {
        let key = PrivateKey::new();
        let count = 12u64;
        let per_output = 2 * COIN;

        // Genesis funds `count` separate outputs so the block's spends are
        // independent.
        let outputs: Vec<Output> = (0..count)
            .map(|i| crate::test_utils::keyed_output(&key, per_output, i))
            .collect();
        let coinbase = Transaction::new(vec![], outputs.clone(), 100, true);
        let genesis = Block::new(vec![], coinbase, Hash::zero(), 100, Payload::new(), 1);
        let (chain, _dir) = open_chain_with_genesis(&genesis, ChainParams::dev());

        for (i, utxo) in outputs.iter().enumerate() {
            let tx = spend_to(&key, utxo, &PrivateKey::new().public_key(), COIN, 200 + i as u64);
            chain.submit_transaction(tx).unwrap();
        }
        assert_eq!(chain.mempool_count(), count as usize);

        let block = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        assert_eq!(block.transactions().len(), count as usize);
        assert_eq!(chain.submit_block(block).unwrap(), BlockOutcome::Connected);
        assert_eq!(chain.mempool_count(), 0);
        assert_utxo_stxo_disjoint(&chain.store);
    }

    #[test]
    fn conservation_holds_for_confirmed_transactions() {
        let (chain, key, utxo, _dir) = funded_chain();

        let tx = spend_to(&key, &utxo, &PrivateKey::new().public_key(), 30 * COIN, 200);
        chain.submit_transaction(tx.clone()).unwrap();
        let block = chain.generate_verifying_block(&PrivateKey::new().public_key().to_hex());
        chain.submit_block(block).unwrap();

        let confirmed = chain.transaction(tx.id()).unwrap();
        let output_total: u64 = confirmed.outputs().iter().map(Output::value).sum();
        let input_total: u64 = confirmed
            .inputs()
            .iter()
            .map(|i| chain.output(i.output_id()).unwrap().value())
            .sum();
        assert!(output_total <= input_total);
    }
}

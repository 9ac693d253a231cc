//! Key-value storage contract consumed by the chain engine.
//!
//! The engine persists everything through this trait family; the concrete
//! backend is supplied by the embedder. Values are opaque byte strings (the
//! engine stores canonical JSON), keys are strings (entity IDs in hex,
//! decimal heights, public keys, or the distinguished `"tip"` key).

use thiserror::Error;

/// Logical table names used by the engine.
pub mod tables {
    /// Main-chain block records, plus the `"tip"` key and the height index.
    pub const BLOCKS: &str = "blocks";
    /// Orphans and side-chain blocks, stored in full.
    pub const CANDIDATES: &str = "candidates";
    /// Confirmed transactions.
    pub const TRANSACTIONS: &str = "transactions";
    /// Unspent outputs, plus a public-key secondary index.
    pub const UTXOS: &str = "utxos";
    /// Spent outputs, kept for reversibility, with the same secondary index.
    pub const STXOS: &str = "stxos";
    /// Inputs of confirmed transactions.
    pub const INPUTS: &str = "inputs";
}

/// Key of the current main-chain tip inside [`tables::BLOCKS`].
pub const TIP_KEY: &str = "tip";

/// Errors surfaced by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to read or durably apply a transaction.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Read access to a consistent view of the store.
///
/// Object-safe and `Sync` so one open transaction can be shared read-only
/// between the validator, the consensus adapter, the contract runner, and
/// the worker threads of within-block verification.
pub trait StoreView: Send + Sync {
    /// Reads a value from a table's primary keyspace.
    fn get(&self, table: &str, key: &str) -> Option<Vec<u8>>;

    /// Reads a value from a numbered secondary index of a table.
    fn get_index(&self, table: &str, index: u8, key: &str) -> Option<Vec<u8>>;
}

/// Write access on top of [`StoreView`].
///
/// Writes are buffered inside the transaction and invisible to other views
/// until commit.
pub trait StoreMut: StoreView {
    fn put(&mut self, table: &str, key: &str, value: Vec<u8>);

    fn put_index(&mut self, table: &str, index: u8, key: &str, value: Vec<u8>);

    fn erase(&mut self, table: &str, key: &str);

    fn erase_index(&mut self, table: &str, index: u8, key: &str);
}

/// A read-write storage transaction.
///
/// Exactly one is opened per public engine operation. Commit is atomic and
/// durable; abort (or drop) discards every buffered write, so no partial
/// state is ever observable.
pub trait StoreTx: StoreMut {
    /// Atomically applies all buffered writes.
    fn commit(self) -> Result<(), StoreError>;

    /// Discards all buffered writes. Dropping the transaction is equivalent.
    fn abort(self);
}

/// A storage backend: a set of named tables with transactional access.
///
/// Concurrent read-only transactions are permitted; writers are serialized
/// by the engine's chain lock.
pub trait Store: Send + Sync {
    type Tx<'a>: StoreTx
    where
        Self: 'a;

    /// Opens a consistent read-write transaction.
    fn begin(&self) -> Self::Tx<'_>;
}

/// Reads and decodes a JSON record from a table's primary keyspace.
///
/// A record that fails to decode behaves as absent, which downstream
/// validation treats the same way as a missing entry.
pub fn get_json<T>(view: &(impl StoreView + ?Sized), table: &str, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    view.get(table, key)
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

/// Reads and decodes a JSON record from a numbered secondary index.
pub fn get_json_index<T>(
    view: &(impl StoreView + ?Sized),
    table: &str,
    index: u8,
    key: &str,
) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    view.get_index(table, index, key)
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

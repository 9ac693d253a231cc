//! In-memory storage backend for development and testing.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::storage::store::{Store, StoreError, StoreMut, StoreTx, StoreView};

type Tables = HashMap<String, BTreeMap<String, Vec<u8>>>;

/// Builds the internal keyspace name for a table or one of its indexes.
fn slot(table: &str, index: Option<u8>) -> String {
    match index {
        None => table.to_string(),
        Some(i) => format!("{table}#{i}"),
    }
}

/// Thread-safe in-memory [`Store`].
///
/// Tables are plain ordered maps behind a read-write lock. Transactions
/// buffer their writes in an overlay and apply them on commit; reads go
/// through the overlay first and fall back to committed state, so a
/// transaction observes its own writes. Cloning shares the underlying
/// tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a deep copy of the committed tables, keyed by keyspace name
    /// (`table` or `table#index`). Intended for state comparisons in tests
    /// and debugging.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, Vec<u8>>> {
        self.tables
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Store for MemoryStore {
    type Tx<'a>
        = MemoryTx<'a>
    where
        Self: 'a;

    fn begin(&self) -> MemoryTx<'_> {
        MemoryTx {
            store: self,
            writes: HashMap::new(),
        }
    }
}

/// Transaction over a [`MemoryStore`]: an overlay of pending writes.
pub struct MemoryTx<'a> {
    store: &'a MemoryStore,
    /// Buffered writes keyed by `(keyspace, key)`; `None` marks an erase.
    writes: HashMap<(String, String), Option<Vec<u8>>>,
}

impl MemoryTx<'_> {
    fn read(&self, table: &str, index: Option<u8>, key: &str) -> Option<Vec<u8>> {
        let keyspace = slot(table, index);
        if let Some(pending) = self.writes.get(&(keyspace.clone(), key.to_string())) {
            return pending.clone();
        }
        self.store
            .tables
            .read()
            .get(&keyspace)
            .and_then(|t| t.get(key))
            .cloned()
    }

    fn write(&mut self, table: &str, index: Option<u8>, key: &str, value: Option<Vec<u8>>) {
        self.writes.insert((slot(table, index), key.to_string()), value);
    }
}

impl StoreView for MemoryTx<'_> {
    fn get(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        self.read(table, None, key)
    }

    fn get_index(&self, table: &str, index: u8, key: &str) -> Option<Vec<u8>> {
        self.read(table, Some(index), key)
    }
}

impl StoreMut for MemoryTx<'_> {
    fn put(&mut self, table: &str, key: &str, value: Vec<u8>) {
        self.write(table, None, key, Some(value));
    }

    fn put_index(&mut self, table: &str, index: u8, key: &str, value: Vec<u8>) {
        self.write(table, Some(index), key, Some(value));
    }

    fn erase(&mut self, table: &str, key: &str) {
        self.write(table, None, key, None);
    }

    fn erase_index(&mut self, table: &str, index: u8, key: &str) {
        self.write(table, Some(index), key, None);
    }
}

impl StoreTx for MemoryTx<'_> {
    fn commit(self) -> Result<(), StoreError> {
        let mut tables = self.store.tables.write();
        for ((keyspace, key), value) in self.writes {
            match value {
                Some(v) => {
                    tables.entry(keyspace).or_default().insert(key, v);
                }
                None => {
                    if let Some(table) = tables.get_mut(&keyspace) {
                        table.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn abort(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::tables;
    use std::thread;

    #[test]
    fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put(tables::BLOCKS, "k", b"v".to_vec());
        tx.commit().unwrap();

        let tx = store.begin();
        assert_eq!(tx.get(tables::BLOCKS, "k"), Some(b"v".to_vec()));
        tx.abort();
    }

    #[test]
    fn transaction_observes_its_own_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        assert!(tx.get(tables::UTXOS, "a").is_none());
        tx.put(tables::UTXOS, "a", b"1".to_vec());
        assert_eq!(tx.get(tables::UTXOS, "a"), Some(b"1".to_vec()));
        tx.erase(tables::UTXOS, "a");
        assert!(tx.get(tables::UTXOS, "a").is_none());
    }

    #[test]
    fn abort_discards_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put(tables::BLOCKS, "k", b"v".to_vec());
        tx.abort();

        let tx = store.begin();
        assert!(tx.get(tables::BLOCKS, "k").is_none());
        tx.abort();
    }

    #[test]
    fn drop_is_equivalent_to_abort() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin();
            tx.put(tables::BLOCKS, "k", b"v".to_vec());
        }
        let tx = store.begin();
        assert!(tx.get(tables::BLOCKS, "k").is_none());
        tx.abort();
    }

    #[test]
    fn secondary_indexes_are_separate_keyspaces() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put(tables::UTXOS, "k", b"primary".to_vec());
        tx.put_index(tables::UTXOS, 0, "k", b"indexed".to_vec());
        tx.commit().unwrap();

        let tx = store.begin();
        assert_eq!(tx.get(tables::UTXOS, "k"), Some(b"primary".to_vec()));
        assert_eq!(tx.get_index(tables::UTXOS, 0, "k"), Some(b"indexed".to_vec()));
        tx.abort();
    }

    #[test]
    fn erase_only_affects_named_key() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put(tables::STXOS, "a", b"1".to_vec());
        tx.put(tables::STXOS, "b", b"2".to_vec());
        tx.commit().unwrap();

        let mut tx = store.begin();
        tx.erase(tables::STXOS, "a");
        tx.commit().unwrap();

        let tx = store.begin();
        assert!(tx.get(tables::STXOS, "a").is_none());
        assert_eq!(tx.get(tables::STXOS, "b"), Some(b"2".to_vec()));
        tx.abort();
    }

    #[test]
    fn concurrent_read_only_views() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put(tables::BLOCKS, "k", b"v".to_vec());
        tx.commit().unwrap();

        let tx = store.begin();
        thread::scope(|s| {
            for _ in 0..4 {
                let view = &tx;
                s.spawn(move || {
                    assert_eq!(view.get(tables::BLOCKS, "k"), Some(b"v".to_vec()));
                });
            }
        });
        tx.abort();
    }

    #[test]
    fn snapshot_reflects_committed_state_only() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put(tables::BLOCKS, "committed", b"1".to_vec());
        tx.commit().unwrap();

        let mut tx = store.begin();
        tx.put(tables::BLOCKS, "pending", b"2".to_vec());

        let snapshot = store.snapshot();
        let blocks = snapshot.get(tables::BLOCKS).unwrap();
        assert!(blocks.contains_key("committed"));
        assert!(!blocks.contains_key("pending"));
        tx.abort();
    }
}

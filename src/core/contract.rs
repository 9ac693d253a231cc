//! Seam to the embedded contract interpreter.

use crate::core::transaction::Transaction;
use crate::storage::store::StoreView;

/// Evaluates the contract-bearing outputs touched by a transaction.
///
/// The interpreter itself lives outside this crate; the engine only
/// requires a truthy verdict before accepting a transaction. Implementations
/// must be stateless or internally thread-safe, since verification may run
/// from several worker threads against one storage view.
pub trait ContractRunner: Send + Sync {
    /// Returns `true` if every contract touched by `tx` authorizes it.
    fn evaluate_valid(&self, view: &dyn StoreView, tx: &Transaction) -> bool;
}

/// Stand-in runner used when no interpreter is embedded.
///
/// Treats every contract as satisfied, which leaves signature checks and
/// consensus rules as the only spend authorization.
pub struct NoContractRunner;

impl ContractRunner for NoContractRunner {
    fn evaluate_valid(&self, _view: &dyn StoreView, _tx: &Transaction) -> bool {
        true
    }
}

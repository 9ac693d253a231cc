//! Per-call transaction verification against a transactional view of
//! chain state.

use log::debug;
use thiserror::Error;

use crate::core::consensus::Consensus;
use crate::core::contract::ContractRunner;
use crate::core::transaction::{DbOutput, Input, Transaction};
use crate::crypto::key_pair::{PublicKey, Signature};
use crate::storage::store::{StoreView, get_json, tables};
use crate::types::hash::Hash;

/// Fee units charged per byte of input/output data in the minimum-fee
/// metric; half of the computed minimum must actually be paid.
const FEE_PER_DATA_BYTE: u64 = 100;

/// Reasons a transaction fails verification.
///
/// Only [`AlreadyConfirmed`](Self::AlreadyConfirmed) is transient - the
/// submitter may retry after the chain state changes. Every other failure
/// is definitive and callers may penalize the origin.
#[derive(Debug, Error)]
pub enum TxVerifyError {
    /// The transaction ID is already in the confirmed set.
    #[error("transaction {0} already exists")]
    AlreadyConfirmed(Hash),
    /// A created output collides with an existing UTXO or STXO.
    #[error("output {0} already exists")]
    OutputExists(Hash),
    /// A referenced output is unknown or already spent.
    #[error("output {0} is missing or already spent")]
    MissingOutput(Hash),
    /// The resolved output demands a signature the input does not carry.
    #[error("input spending output {0} carries no signature")]
    MissingSignature(Hash),
    /// The spend signature does not verify under the output's key.
    #[error("could not verify signature for output {0}")]
    InvalidSignature(Hash),
    /// Value created exceeds value consumed.
    #[error("output total {outputs} exceeds input total {inputs}")]
    OutputsExceedInputs { outputs: u64, inputs: u64 },
    /// The paid fee is below half the minimum-fee metric.
    #[error("fee {fee} is below the required minimum of {minimum} / 2")]
    FeeTooLow { fee: u64, minimum: u64 },
    /// Summing values overflowed the 64-bit accounting range.
    #[error("value total overflows u64")]
    ValueOverflow,
    /// The contract interpreter rejected the transaction.
    #[error("contract evaluation returned false for transaction {0}")]
    ContractRejected(Hash),
    /// The consensus adapter rejected the transaction.
    #[error("consensus rules rejected transaction {0}")]
    ConsensusRejected(Hash),
}

impl TxVerifyError {
    /// `true` when the rejection is definitive and must not be retried.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, TxVerifyError::AlreadyConfirmed(_))
    }
}

/// Stateless-per-call transaction verifier.
///
/// Borrows the open storage transaction together with the consensus and
/// contract seams; one instance is built per verification site. Safe to use
/// from several threads over the same view, which is how within-block
/// verification parallelizes.
pub struct TxValidator<'a, C, R> {
    view: &'a dyn StoreView,
    consensus: &'a C,
    contracts: &'a R,
}

/// The minimum-fee metric: a per-byte charge over the canonical spend and
/// ownership data carried by a transaction.
pub fn minimum_fee(tx: &Transaction) -> u64 {
    let data_bytes: u64 = tx
        .inputs()
        .iter()
        .map(|i| i.data().byte_len())
        .chain(tx.outputs().iter().map(|o| o.data().byte_len()))
        .sum();
    data_bytes.saturating_mul(FEE_PER_DATA_BYTE)
}

impl<'a, C: Consensus, R: ContractRunner> TxValidator<'a, C, R> {
    pub fn new(view: &'a dyn StoreView, consensus: &'a C, contracts: &'a R) -> Self {
        Self {
            view,
            consensus,
            contracts,
        }
    }

    /// Verifies a transaction against the borrowed chain-state view.
    ///
    /// Checks run in order and short-circuit on the first failure: replay
    /// guard, output novelty, input resolution, signatures, balance, fee
    /// floor, contract evaluation, consensus rules. Returns the implied fee
    /// (input total minus output total; zero for coinbase transactions).
    pub fn verify_transaction(
        &self,
        tx: &Transaction,
        coinbase: bool,
    ) -> Result<u64, TxVerifyError> {
        // 1. Replay guard.
        if self
            .view
            .get(tables::TRANSACTIONS, &tx.id().to_string())
            .is_some()
        {
            debug!("verify_transaction: tx {} already exists", tx.id());
            return Err(TxVerifyError::AlreadyConfirmed(tx.id()));
        }

        // 2. Output novelty.
        let mut output_total: u64 = 0;
        for out in tx.outputs() {
            let key = out.id().to_string();
            if self.view.get(tables::UTXOS, &key).is_some()
                || self.view.get(tables::STXOS, &key).is_some()
            {
                return Err(TxVerifyError::OutputExists(out.id()));
            }
            output_total = output_total
                .checked_add(out.value())
                .ok_or(TxVerifyError::ValueOverflow)?;
        }

        // 3. Input resolution against the unspent set.
        let mut input_total: u64 = 0;
        let mut resolved: Vec<(&Input, DbOutput)> = Vec::with_capacity(tx.inputs().len());
        for inp in tx.inputs() {
            let utxo: DbOutput =
                get_json(self.view, tables::UTXOS, &inp.output_id().to_string())
                    .ok_or(TxVerifyError::MissingOutput(inp.output_id()))?;
            input_total = input_total
                .checked_add(utxo.value)
                .ok_or(TxVerifyError::ValueOverflow)?;
            resolved.push((inp, utxo));
        }

        // 4. Spend signatures. Contract-guarded outputs defer to the
        //    interpreter instead.
        let output_set = tx.output_set_id();
        for (inp, utxo) in &resolved {
            let Some(owner) = utxo.data.public_key() else {
                continue;
            };
            if utxo.data.contract().is_some() {
                continue;
            }

            let signature = inp
                .data()
                .signature()
                .and_then(Signature::from_hex)
                .ok_or(TxVerifyError::MissingSignature(utxo.id))?;
            let key = PublicKey::from_hex(owner)
                .ok_or(TxVerifyError::InvalidSignature(utxo.id))?;
            let message = format!("{}{}", utxo.id, output_set);
            if !key.verify(message.as_bytes(), &signature) {
                return Err(TxVerifyError::InvalidSignature(utxo.id));
            }
        }

        if !coinbase {
            // 5. Conservation.
            if output_total > input_total {
                return Err(TxVerifyError::OutputsExceedInputs {
                    outputs: output_total,
                    inputs: input_total,
                });
            }

            // 6. Fee floor.
            let fee = input_total - output_total;
            let minimum = minimum_fee(tx);
            if (fee as u128) * 2 < minimum as u128 {
                return Err(TxVerifyError::FeeTooLow { fee, minimum });
            }
        }

        // 7. Contract evaluation.
        if !self.contracts.evaluate_valid(self.view, tx) {
            return Err(TxVerifyError::ContractRejected(tx.id()));
        }

        // 8. Consensus rules.
        if !self.consensus.verify_transaction(self.view, tx) {
            return Err(TxVerifyError::ConsensusRejected(tx.id()));
        }

        Ok(if coinbase {
            0
        } else {
            input_total - output_total
        })
    }
}

//! Transactions, their inputs and outputs, and the normalized storage
//! projections of all three.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::codec::{self, DecodeError};
use crate::types::hash::Hash;
use crate::types::payload::Payload;

/// An unspent (or spent) transaction output.
///
/// Immutable after construction. The data bag may carry a `publicKey` field
/// binding the output to an owner and/or a `contract` field deferring spend
/// authorization to the contract interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "OutputRecord")]
pub struct Output {
    value: u64,
    nonce: u64,
    data: Payload,
    id: Hash,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputRecord {
    value: u64,
    nonce: u64,
    data: Payload,
    id: Hash,
}

fn output_id(value: u64, nonce: u64, data: &Payload) -> Hash {
    let mut h = Hash::sha3();
    h.update(b"OUTPUT");
    h.update(&value.to_le_bytes());
    h.update(&nonce.to_le_bytes());
    h.update(&data.canonical_bytes());
    h.finalize()
}

impl Output {
    pub fn new(value: u64, nonce: u64, data: Payload) -> Self {
        let id = output_id(value, nonce, &data);
        Self {
            value,
            nonce,
            data,
            id,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn id(&self) -> Hash {
        self.id
    }
}

impl TryFrom<OutputRecord> for Output {
    type Error = DecodeError;

    fn try_from(record: OutputRecord) -> Result<Self, Self::Error> {
        let built = Output::new(record.value, record.nonce, record.data);
        if built.id != record.id {
            return Err(DecodeError::IdMismatch {
                embedded: record.id,
                computed: built.id,
            });
        }
        Ok(built)
    }
}

/// A reference to a prior output together with opaque spend data.
///
/// The spend data usually carries a `signature` field; contract-guarded
/// outputs are instead authorized by the contract interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "InputRecord")]
pub struct Input {
    output_id: Hash,
    data: Payload,
    id: Hash,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InputRecord {
    output_id: Hash,
    data: Payload,
    id: Hash,
}

fn input_id(output_id: Hash, data: &Payload) -> Hash {
    let mut h = Hash::sha3();
    h.update(b"INPUT");
    h.update(output_id.as_slice());
    h.update(&data.canonical_bytes());
    h.finalize()
}

impl Input {
    pub fn new(output_id: Hash, data: Payload) -> Self {
        let id = input_id(output_id, &data);
        Self {
            output_id,
            data,
            id,
        }
    }

    /// ID of the output this input spends.
    pub fn output_id(&self) -> Hash {
        self.output_id
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn id(&self) -> Hash {
        self.id
    }
}

impl TryFrom<InputRecord> for Input {
    type Error = DecodeError;

    fn try_from(record: InputRecord) -> Result<Self, Self::Error> {
        let built = Input::new(record.output_id, record.data);
        if built.id != record.id {
            return Err(DecodeError::IdMismatch {
                embedded: record.id,
                computed: built.id,
            });
        }
        Ok(built)
    }
}

/// A transaction: a set of inputs consumed and a set of outputs created.
///
/// Input and output sets are kept sorted by ID so hashing is canonical.
/// The coinbase flag marks the distinguished value-creating transaction of
/// a block; coinbase transactions have no inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TransactionRecord")]
pub struct Transaction {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    timestamp: u64,
    coinbase: bool,
    id: Hash,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TransactionRecord {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    timestamp: u64,
    coinbase: bool,
    id: Hash,
}

impl Transaction {
    /// Creates a transaction, sorting inputs and outputs into canonical
    /// ID order before computing the transaction ID.
    pub fn new(
        mut inputs: Vec<Input>,
        mut outputs: Vec<Output>,
        timestamp: u64,
        coinbase: bool,
    ) -> Self {
        inputs.sort_unstable_by_key(Input::id);
        outputs.sort_unstable_by_key(Output::id);

        let mut h = Hash::sha3();
        h.update(b"TX");
        h.update(&codec::to_canonical_vec(&inputs));
        h.update(&codec::to_canonical_vec(&outputs));
        h.update(&timestamp.to_le_bytes());
        h.update(&[coinbase as u8]);
        let id = h.finalize();

        Self {
            inputs,
            outputs,
            timestamp,
            coinbase,
            id,
        }
    }

    /// Inputs in canonical ID order.
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Outputs in canonical ID order.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_coinbase(&self) -> bool {
        self.coinbase
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    /// Hash over the sorted output-ID concatenation.
    ///
    /// This is the message bound into every input signature, tying a spend
    /// authorization to the exact set of outputs it funds.
    pub fn output_set_id(&self) -> Hash {
        Self::output_set_of(&self.outputs)
    }

    /// [`output_set_id`](Self::output_set_id) computed from a bare output
    /// set, for signers that build inputs before assembling the transaction.
    pub fn output_set_of(outputs: &[Output]) -> Hash {
        let mut ids: Vec<Hash> = outputs.iter().map(Output::id).collect();
        ids.sort_unstable();
        let mut h = Hash::sha3();
        h.update(b"TXOUTSET");
        for id in ids {
            h.update(id.as_slice());
        }
        h.finalize()
    }

    /// Canonical serialization size in bytes, used for mempool accounting.
    pub fn size(&self) -> u64 {
        codec::to_canonical_vec(self).len() as u64
    }
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = DecodeError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let built = Transaction::new(
            record.inputs,
            record.outputs,
            record.timestamp,
            record.coinbase,
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

macro_rules! eq_ord_by_id {
    ($entity:ty) => {
        impl PartialEq for $entity {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $entity {}

        impl PartialOrd for $entity {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $entity {
            fn cmp(&self, other: &Self) -> Ordering {
                self.id.cmp(&other.id)
            }
        }
    };
}

eq_ord_by_id!(Output);
eq_ord_by_id!(Input);
eq_ord_by_id!(Transaction);

pub(crate) use eq_ord_by_id;

/// Storage projection of an [`Output`], annotated with the transaction that
/// created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbOutput {
    pub id: Hash,
    pub value: u64,
    pub nonce: u64,
    pub data: Payload,
    pub transaction_id: Hash,
}

impl DbOutput {
    pub fn project(output: &Output, transaction_id: Hash) -> Self {
        Self {
            id: output.id(),
            value: output.value(),
            nonce: output.nonce(),
            data: output.data().clone(),
            transaction_id,
        }
    }

    /// Rebuilds the value-level output this record projects.
    pub fn to_output(&self) -> Output {
        Output::new(self.value, self.nonce, self.data.clone())
    }
}

/// Storage projection of an [`Input`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbInput {
    pub id: Hash,
    pub output_id: Hash,
    pub data: Payload,
}

impl DbInput {
    pub fn project(input: &Input) -> Self {
        Self {
            id: input.id(),
            output_id: input.output_id(),
            data: input.data().clone(),
        }
    }

    pub fn to_input(&self) -> Input {
        Input::new(self.output_id, self.data.clone())
    }
}

/// Storage projection of a [`Transaction`]: nested entities replaced by ID
/// references, annotated with the confirming block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbTransaction {
    pub id: Hash,
    pub inputs: Vec<Hash>,
    pub outputs: Vec<Hash>,
    pub timestamp: u64,
    pub coinbase: bool,
    pub confirming_block: Hash,
}

impl DbTransaction {
    pub fn project(tx: &Transaction, confirming_block: Hash) -> Self {
        Self {
            id: tx.id(),
            inputs: tx.inputs().iter().map(Input::id).collect(),
            outputs: tx.outputs().iter().map(Output::id).collect(),
            timestamp: tx.timestamp(),
            coinbase: tx.is_coinbase(),
            confirming_block,
        }
    }
}

//! The execution result of a transition and its assembly.

use alloy_consensus::{Eip658Value, Receipt, ReceiptEnvelope, ReceiptWithBloom, TxEnvelope};
use alloy_eips::{eip2718::Encodable2718, eip4895::Withdrawal};
use alloy_primitives::{keccak256, Address, Bloom, Bytes, Log, B256, U256};
use alloy_trie::root::{ordered_trie_root, ordered_trie_root_with_encoder};
use serde::{Deserialize, Serialize};

use crate::{requests_hash, Alloc, StateDb, ValidatedEnv};

/// Execution summary of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// State root after the block.
    pub state_root: B256,
    /// Root of the included transactions.
    pub tx_root: B256,
    /// Root of the receipts.
    pub receipts_root: B256,
    /// Hash of the RLP list of all logs.
    pub logs_hash: B256,
    /// Bloom filter of all logs.
    pub logs_bloom: Bloom,
    /// Receipts of the included transactions.
    pub receipts: Vec<TransactionReceipt>,
    /// Rejected transactions, by submission index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedTx>,
    /// Block difficulty, `None` after the merge.
    #[serde(rename = "currentDifficulty")]
    pub difficulty: Option<U256>,
    /// Gas used by the block.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    /// Base fee of the block.
    #[serde(
        rename = "currentBaseFee",
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_fee: Option<u64>,
    /// Root of the withdrawals, if the block carries a withdrawal list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<B256>,
    /// Excess blob gas of the block, if the blob gas market is established.
    #[serde(
        rename = "currentExcessBlobGas",
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub excess_blob_gas: Option<u64>,
    /// Blob gas used by the block, if the blob gas market is established.
    #[serde(
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub blob_gas_used: Option<u64>,
    /// EIP-7685 requests hash, from Prague on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_hash: Option<B256>,
    /// Requests with the type byte stripped, from Prague on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<Vec<Bytes>>,
}

/// Information about a rejected transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedTx {
    /// Index of the transaction in submission order.
    #[serde(with = "alloy_serde::quantity")]
    pub index: u64,
    /// Reason for the rejection.
    pub error: String,
}

/// Transaction log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLog {
    /// Address that generated this log.
    pub address: Address,
    /// Indexed topics of the log.
    pub topics: Vec<B256>,
    /// Log data.
    pub data: Bytes,
    /// Block number where this log was generated.
    #[serde(with = "alloy_serde::quantity")]
    pub block_number: u64,
    /// Hash of the transaction that generated this log.
    pub transaction_hash: B256,
    /// Index of the transaction in the block.
    #[serde(with = "alloy_serde::quantity")]
    pub transaction_index: u64,
    /// Hash of the block containing this log. A placeholder while the block is being built.
    pub block_hash: B256,
    /// Index of this log within the block.
    #[serde(with = "alloy_serde::quantity")]
    pub log_index: u64,
    /// Whether this log was removed due to a chain reorganization.
    pub removed: bool,
}

impl TransactionLog {
    /// The consensus log.
    pub fn to_log(&self) -> Log {
        Log::new_unchecked(self.address, self.topics.clone(), self.data.clone())
    }
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Transaction type.
    #[serde(rename = "type", with = "alloy_serde::quantity")]
    pub tx_type: u8,
    /// Intermediate state root, before Byzantium.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<B256>,
    /// Execution status: 1 for success, 0 for a reverted execution.
    #[serde(with = "alloy_serde::quantity")]
    pub status: u64,
    /// Cumulative gas used in the block up to and including this transaction.
    #[serde(with = "alloy_serde::quantity")]
    pub cumulative_gas_used: u64,
    /// Bloom filter of the logs of this transaction.
    pub logs_bloom: Bloom,
    /// Logs emitted by this transaction.
    pub logs: Vec<TransactionLog>,
    /// Hash of the transaction.
    pub transaction_hash: B256,
    /// Address of the created contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    /// Gas used by this transaction.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    /// Gas price paid by this transaction.
    #[serde(with = "alloy_serde::quantity")]
    pub effective_gas_price: u128,
    /// Blob gas used by this transaction (EIP-4844).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub blob_gas_used: Option<u64>,
    /// Price of one unit of blob gas (EIP-4844).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub blob_gas_price: Option<u128>,
    /// Hash of the block. A placeholder while the block is being built.
    pub block_hash: B256,
    /// Block number.
    #[serde(with = "alloy_serde::quantity")]
    pub block_number: u64,
    /// Index of the transaction among the included transactions.
    #[serde(with = "alloy_serde::quantity")]
    pub transaction_index: u64,
}

impl TransactionReceipt {
    /// Returns `true` if the execution did not revert.
    pub const fn is_success(&self) -> bool {
        self.status == 1
    }

    /// The consensus receipt, as committed to by the receipts root.
    pub fn to_envelope(&self) -> ReceiptEnvelope {
        let status = match self.root {
            Some(root) => Eip658Value::PostState(root),
            None => Eip658Value::Eip658(self.is_success()),
        };
        let receipt = ReceiptWithBloom {
            receipt: Receipt {
                status,
                cumulative_gas_used: self.cumulative_gas_used,
                logs: self.logs.iter().map(TransactionLog::to_log).collect(),
            },
            logs_bloom: self.logs_bloom,
        };
        match self.tx_type {
            1 => ReceiptEnvelope::Eip2930(receipt),
            2 => ReceiptEnvelope::Eip1559(receipt),
            3 => ReceiptEnvelope::Eip4844(receipt),
            4 => ReceiptEnvelope::Eip7702(receipt),
            _ => ReceiptEnvelope::Legacy(receipt),
        }
    }
}

/// Block-level values the result is assembled from.
#[derive(Debug)]
pub struct BlockSummary<'a> {
    /// Committed state root.
    pub state_root: B256,
    /// Included transactions, in inclusion order.
    pub included: &'a [TxEnvelope],
    /// Receipts of the included transactions.
    pub receipts: Vec<TransactionReceipt>,
    /// Rejected transactions.
    pub rejected: Vec<RejectedTx>,
    /// Gas used by the block.
    pub gas_used: u64,
    /// Blob gas used by the block.
    pub blob_gas_used: u64,
    /// Typed requests, from Prague on.
    pub requests: Option<Vec<Bytes>>,
    /// The validated environment of the block.
    pub env: &'a ValidatedEnv,
}

impl ExecutionResult {
    /// Assembles the result of a block.
    pub fn assemble(summary: BlockSummary<'_>) -> Self {
        let BlockSummary {
            state_root,
            included,
            receipts,
            rejected,
            gas_used,
            blob_gas_used,
            requests,
            env,
        } = summary;

        let envelopes: Vec<_> = receipts.iter().map(TransactionReceipt::to_envelope).collect();
        let logs: Vec<Log> = receipts
            .iter()
            .flat_map(|receipt| receipt.logs.iter().map(TransactionLog::to_log))
            .collect();
        let blob_gas = env.blob_gas();

        let (requests_hash, requests) = match requests {
            Some(requests) => {
                let hash = requests_hash(&requests);
                let stripped = requests.iter().map(|request| request.slice(1..)).collect();
                (Some(hash), Some(stripped))
            }
            None => (None, None),
        };

        Self {
            state_root,
            tx_root: ordered_trie_root_with_encoder(included, |tx, buf| tx.encode_2718(buf)),
            receipts_root: ordered_trie_root_with_encoder(&envelopes, |receipt, buf| {
                receipt.encode_2718(buf)
            }),
            logs_hash: logs_hash(&logs),
            logs_bloom: merged_bloom(&receipts),
            receipts,
            rejected,
            difficulty: env.difficulty,
            gas_used,
            base_fee: env.base_fee,
            withdrawals_root: env.withdrawals.as_deref().map(withdrawals_root),
            excess_blob_gas: blob_gas.map(|blob_gas| blob_gas.excess_blob_gas),
            blob_gas_used: blob_gas.map(|_| blob_gas_used),
            requests_hash,
            requests,
        }
    }
}

/// Keccak-256 of the RLP list of `logs`.
pub fn logs_hash(logs: &[Log]) -> B256 {
    let mut out = Vec::new();
    alloy_rlp::encode_list::<_, Log>(logs, &mut out);
    keccak256(out)
}

/// Bloom filter of `logs`.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::default();
    for log in logs {
        bloom.accrue_log(log);
    }
    bloom
}

/// Union of the receipt blooms.
pub fn merged_bloom(receipts: &[TransactionReceipt]) -> Bloom {
    let mut bloom = Bloom::default();
    for receipt in receipts {
        bloom.accrue_bloom(&receipt.logs_bloom);
    }
    bloom
}

/// Ordered trie root of the withdrawals.
pub fn withdrawals_root(withdrawals: &[Withdrawal]) -> B256 {
    ordered_trie_root(withdrawals)
}

/// Outcome of a successful transition.
#[derive(Debug)]
pub struct TransitionOutput<S> {
    /// A fresh view of the committed post-state.
    pub state: S,
    /// The execution result.
    pub result: ExecutionResult,
    /// RLP list of the included transactions.
    pub body: Bytes,
}

impl<S: StateDb> TransitionOutput<S> {
    /// The post-state as an allocation.
    pub fn post_alloc(&self) -> Alloc {
        self.state.dump()
    }
}

/// Combined output document: the post-state allocation, the result and the block body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedOutput {
    /// Post-state allocation.
    pub alloc: Alloc,
    /// Execution result.
    pub result: ExecutionResult,
    /// RLP encoded block body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Bytes>,
}

//! The EVM collaborator.
//!
//! The transition does not interpret bytecode. It hands every transaction to a [`BlockEvm`] as a
//! [`Message`] and consumes the [`MessageOutcome`]. Pre- and post-block system operations are
//! expressed through [`BlockEvm::system_call`].

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::{eip2930::AccessList, eip7702::SignedAuthorization};
use alloy_primitives::{Address, BlockNumber, Bytes, ChainId, Log, TxKind, B256, U256};
use auto_impl::auto_impl;

use crate::{
    constants::{
        eip4844::GAS_PER_BLOB,
        requests::{
            CONSOLIDATION_REQUEST_PREDEPLOY_ADDRESS, CONSOLIDATION_REQUEST_TYPE,
            WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS, WITHDRAWAL_REQUEST_TYPE,
        },
        system::{BEACON_ROOTS_ADDRESS, HISTORY_STORAGE_ADDRESS},
    },
    StateDb, StateError, ValidatedEnv,
};

/// Block-level values visible to executing transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    /// Block coinbase.
    pub coinbase: Address,
    /// Block number.
    pub number: BlockNumber,
    /// Block timestamp.
    pub timestamp: u64,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Block difficulty, zero after the merge.
    pub difficulty: U256,
    /// Block randomness, after the merge.
    pub prev_randao: Option<B256>,
    /// Base fee, from London on.
    pub base_fee: Option<u64>,
    /// Blob base fee, if the blob gas market is established.
    pub blob_base_fee: Option<u128>,
    /// Chain id.
    pub chain_id: ChainId,
}

impl BlockContext {
    /// Builds the context of a validated environment.
    pub fn new(env: &ValidatedEnv, chain_id: ChainId) -> Self {
        Self {
            coinbase: env.coinbase,
            number: env.number,
            timestamp: env.timestamp,
            gas_limit: env.gas_limit,
            difficulty: env.difficulty.unwrap_or_default(),
            prev_randao: env.random.map(|random| B256::from(random.to_be_bytes::<32>())),
            base_fee: env.base_fee,
            blob_base_fee: env.blob_gas().map(|blob_gas| blob_gas.blob_base_fee),
            chain_id,
        }
    }
}

/// A transaction prepared for execution: the recovered sender and the effective gas price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Recovered sender.
    pub from: Address,
    /// Call target or contract creation.
    pub to: TxKind,
    /// Transaction nonce.
    pub nonce: u64,
    /// Transferred value.
    pub value: U256,
    /// Gas limit of the transaction.
    pub gas_limit: u64,
    /// Price paid per unit of gas.
    pub gas_price: u128,
    /// Maximum price per unit of gas, equal to the gas price for legacy transactions.
    pub gas_fee_cap: u128,
    /// Maximum priority fee per unit of gas, equal to the gas price for legacy transactions.
    pub gas_tip_cap: u128,
    /// Call data or init code.
    pub data: Bytes,
    /// EIP-2930 access list.
    pub access_list: AccessList,
    /// EIP-4844 blob versioned hashes.
    pub blob_hashes: Vec<B256>,
    /// EIP-4844 maximum price per unit of blob gas.
    pub blob_gas_fee_cap: Option<u128>,
    /// EIP-7702 authorizations.
    pub authorization_list: Vec<SignedAuthorization>,
}

impl Message {
    /// Derives the message of `tx` sent by `from`.
    ///
    /// With a base fee the gas price is `min(tip + base_fee, fee_cap)`, otherwise the gas price
    /// (or fee cap) of the transaction.
    pub fn from_tx(tx: &TxEnvelope, from: Address, base_fee: Option<u64>) -> Self {
        Self {
            from,
            to: tx.kind(),
            nonce: tx.nonce(),
            value: tx.value(),
            gas_limit: tx.gas_limit(),
            gas_price: tx.effective_gas_price(base_fee),
            gas_fee_cap: tx.max_fee_per_gas(),
            gas_tip_cap: tx.priority_fee_or_price(),
            data: tx.input().clone(),
            access_list: tx.access_list().cloned().unwrap_or_default(),
            blob_hashes: tx.blob_versioned_hashes().map(<[B256]>::to_vec).unwrap_or_default(),
            blob_gas_fee_cap: tx.max_fee_per_blob_gas(),
            authorization_list: tx.authorization_list().map(<[_]>::to_vec).unwrap_or_default(),
        }
    }

    /// Blob gas consumed by the message.
    pub fn blob_gas(&self) -> u64 {
        GAS_PER_BLOB * self.blob_hashes.len() as u64
    }

    /// Returns `true` if the message creates a contract.
    pub fn is_create(&self) -> bool {
        self.to.is_create()
    }
}

/// Result of a message that was applied to the state.
///
/// A reverted message is still included in the block: it consumed gas and paid fees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOutcome {
    /// Gas used after refunds.
    pub gas_used: u64,
    /// Emitted logs. Empty if the message reverted.
    pub logs: Vec<Log>,
    /// Whether execution reverted.
    pub reverted: bool,
    /// Return data.
    pub output: Bytes,
}

/// Gas available to the remaining transactions of the block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasPool(u64);

impl GasPool {
    /// Creates a pool holding `gas`.
    pub const fn new(gas: u64) -> Self {
        Self(gas)
    }

    /// Remaining gas.
    pub const fn gas(&self) -> u64 {
        self.0
    }

    /// Deducts `amount` from the pool.
    pub const fn sub_gas(&mut self, amount: u64) -> Result<(), InvalidTransaction> {
        if self.0 < amount {
            return Err(InvalidTransaction::GasLimitReached { have: self.0, want: amount });
        }
        self.0 -= amount;
        Ok(())
    }

    /// Returns `amount` to the pool.
    pub const fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }

    /// Resets the pool to `gas`.
    pub const fn set_gas(&mut self, gas: u64) {
        self.0 = gas;
    }
}

/// Historical block hash lookups made by `BLOCKHASH`.
#[auto_impl(&mut, Box)]
pub trait BlockHashProvider {
    /// Hash of block `number`, or `None` if it is not known.
    fn block_hash(&mut self, number: BlockNumber) -> Option<B256>;
}

/// Reason a message could not be applied. The transaction is rejected and its state changes
/// are rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTransaction {
    /// The transaction nonce is lower than the account nonce.
    #[error("nonce too low: address {address}, tx: {tx} state: {state}")]
    NonceTooLow {
        /// Sender.
        address: Address,
        /// Transaction nonce.
        tx: u64,
        /// Account nonce.
        state: u64,
    },
    /// The transaction nonce is higher than the account nonce.
    #[error("nonce too high: address {address}, tx: {tx} state: {state}")]
    NonceTooHigh {
        /// Sender.
        address: Address,
        /// Transaction nonce.
        tx: u64,
        /// Account nonce.
        state: u64,
    },
    /// The sender can not pay for gas and value.
    #[error("insufficient funds for gas * price + value: address {address} have {have} want {want}")]
    InsufficientFunds {
        /// Sender.
        address: Address,
        /// Sender balance.
        have: U256,
        /// Required balance.
        want: U256,
    },
    /// The block gas pool can not cover the transaction gas limit.
    #[error("gas limit reached")]
    GasLimitReached {
        /// Gas left in the pool.
        have: u64,
        /// Gas limit of the transaction.
        want: u64,
    },
    /// The gas limit does not cover the intrinsic gas.
    #[error("intrinsic gas too low: have {have}, want {want}")]
    IntrinsicGas {
        /// Gas limit of the transaction.
        have: u64,
        /// Intrinsic gas.
        want: u64,
    },
    /// The fee cap is below the block base fee.
    #[error(
        "max fee per gas less than block base fee: address {address}, maxFeePerGas: {fee_cap}, baseFee: {base_fee}"
    )]
    FeeCapTooLow {
        /// Sender.
        address: Address,
        /// Fee cap of the transaction.
        fee_cap: u128,
        /// Block base fee.
        base_fee: u64,
    },
    /// The blob fee cap is below the block blob base fee.
    #[error(
        "max fee per blob gas less than block blob gas fee: address {address} blobGasFeeCap: {fee_cap}, blobBaseFee: {blob_base_fee}"
    )]
    BlobFeeCapTooLow {
        /// Sender.
        address: Address,
        /// Blob fee cap of the transaction.
        fee_cap: u128,
        /// Block blob base fee.
        blob_base_fee: u128,
    },
    /// Any other consensus violation reported by the EVM.
    #[error("{0}")]
    Other(String),
}

/// Failure of a system operation. Block-fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvmError {
    /// The system call to `address` failed.
    #[error("system call to {address} failed: {message}")]
    SystemCall {
        /// Called system contract.
        address: Address,
        /// Failure description.
        message: String,
    },
    /// The state could not be accessed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// The EVM used to execute a block.
///
/// Implementors provide message application and raw system calls. The pre-block and request
/// queue operations are built on [`BlockEvm::system_call`].
pub trait BlockEvm<S: StateDb> {
    /// Applies `message` to `state`, charging its gas limit to `gas_pool`.
    ///
    /// On error the caller reverts the state to a snapshot taken before the call and restores
    /// the pool. Implementations must therefore leave the transaction open: they must not call
    /// [`StateDb::finalise`], [`StateDb::intermediate_root`] or [`StateDb::commit`], which
    /// invalidate that snapshot.
    fn apply_message(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        block_hashes: &mut dyn BlockHashProvider,
        message: &Message,
        gas_pool: &mut GasPool,
    ) -> Result<MessageOutcome, InvalidTransaction>;

    /// Calls `contract` from the system address with `input` and returns the output.
    fn system_call(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        contract: Address,
        input: Bytes,
    ) -> Result<Bytes, EvmError>;

    /// Stores the parent beacon block root in the EIP-4788 contract.
    fn process_beacon_block_root(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        parent_beacon_block_root: B256,
    ) -> Result<(), EvmError> {
        self.system_call(
            state,
            block,
            BEACON_ROOTS_ADDRESS,
            Bytes::copy_from_slice(parent_beacon_block_root.as_slice()),
        )?;
        state.finalise(true);
        Ok(())
    }

    /// Stores the parent block hash in the EIP-2935 history contract.
    fn process_parent_block_hash(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        parent_hash: B256,
    ) -> Result<(), EvmError> {
        self.system_call(
            state,
            block,
            HISTORY_STORAGE_ADDRESS,
            Bytes::copy_from_slice(parent_hash.as_slice()),
        )?;
        state.finalise(true);
        Ok(())
    }

    /// Drains the EIP-7002 withdrawal request queue into `requests`.
    fn process_withdrawal_queue(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        requests: &mut Vec<Bytes>,
    ) -> Result<(), EvmError> {
        drain_queue(
            self,
            state,
            block,
            WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS,
            WITHDRAWAL_REQUEST_TYPE,
            requests,
        )
    }

    /// Drains the EIP-7251 consolidation request queue into `requests`.
    fn process_consolidation_queue(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        requests: &mut Vec<Bytes>,
    ) -> Result<(), EvmError> {
        drain_queue(
            self,
            state,
            block,
            CONSOLIDATION_REQUEST_PREDEPLOY_ADDRESS,
            CONSOLIDATION_REQUEST_TYPE,
            requests,
        )
    }
}

/// Calls a request predeploy and appends its output, prefixed with `request_type`. An empty
/// output appends nothing.
fn drain_queue<S: StateDb, E: BlockEvm<S> + ?Sized>(
    evm: &mut E,
    state: &mut S,
    block: &BlockContext,
    contract: Address,
    request_type: u8,
    requests: &mut Vec<Bytes>,
) -> Result<(), EvmError> {
    let output = evm.system_call(state, block, contract, Bytes::new())?;
    state.finalise(true);
    if output.is_empty() {
        return Ok(());
    }

    let mut request = Vec::with_capacity(output.len() + 1);
    request.push(request_type);
    request.extend_from_slice(&output);
    requests.push(request.into());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{Signed, TxEip1559, TxLegacy};
    use alloy_primitives::{address, Signature};

    const SENDER: Address = address!("0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b");

    fn signature() -> Signature {
        Signature::new(U256::from(1), U256::from(1), false)
    }

    #[test]
    fn test_gas_pool() {
        let mut pool = GasPool::new(100);
        pool.sub_gas(60).unwrap();
        assert_eq!(pool.gas(), 40);
        assert_eq!(
            pool.sub_gas(41).unwrap_err(),
            InvalidTransaction::GasLimitReached { have: 40, want: 41 }
        );
        pool.add_gas(10);
        assert_eq!(pool.gas(), 50);
        pool.set_gas(7);
        assert_eq!(pool.gas(), 7);
    }

    #[test]
    fn test_effective_gas_price() {
        let tx = TxEip1559 {
            chain_id: 1,
            gas_limit: 21_000,
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 3,
            to: TxKind::Call(Address::ZERO),
            ..Default::default()
        };
        let tx = TxEnvelope::Eip1559(Signed::new_unhashed(tx, signature()));

        assert_eq!(Message::from_tx(&tx, SENDER, Some(10)).gas_price, 13);
        assert_eq!(Message::from_tx(&tx, SENDER, Some(99)).gas_price, 100);

        let message = Message::from_tx(&tx, SENDER, Some(10));
        assert_eq!(message.gas_fee_cap, 100);
        assert_eq!(message.gas_tip_cap, 3);
        assert_eq!(message.from, SENDER);
    }

    #[test]
    fn test_legacy_message() {
        let tx =
            TxLegacy { gas_price: 7, gas_limit: 50_000, to: TxKind::Create, ..Default::default() };
        let tx = TxEnvelope::Legacy(Signed::new_unhashed(tx, signature()));

        let message = Message::from_tx(&tx, SENDER, Some(1));
        assert_eq!(message.gas_price, 7);
        assert!(message.is_create());
        assert_eq!(message.blob_gas(), 0);
    }
}

use std::collections::HashMap;

use alloy_primitives::{Address, BlockNumber, Bytes, Log, LogData, TxKind, U256};

use crate::{
    constants::{
        requests::{CONSOLIDATION_REQUEST_PREDEPLOY_ADDRESS, WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS},
        system::{
            BEACON_ROOTS_ADDRESS, BEACON_ROOTS_HISTORY_BUFFER_LENGTH, HISTORY_SERVE_WINDOW,
            HISTORY_STORAGE_ADDRESS,
        },
    },
    BlockContext, BlockEvm, BlockHashProvider, EvmError, GasPool, InvalidTransaction, Message,
    MessageOutcome, StateDb,
};

const TX_GAS: u64 = 21_000;
const TX_CREATE_GAS: u64 = 32_000;
const TX_DATA_ZERO_GAS: u64 = 4;
const TX_DATA_NON_ZERO_GAS: u64 = 16;
const ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
const ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
const PER_EMPTY_ACCOUNT_GAS: u64 = 25_000;

/// Behaviour of a call to a scripted recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallScript {
    /// Logs emitted by the recipient.
    pub logs: Vec<LogData>,
    /// Whether the call reverts.
    pub revert: bool,
    /// Gas consumed on top of the intrinsic gas.
    pub extra_gas: u64,
    /// Block number passed to `BLOCKHASH`. The answer is stored in slot 0 of the recipient.
    pub query_block_hash: Option<BlockNumber>,
    /// Error returned once the call has run, rejecting the transaction.
    pub fail: Option<InvalidTransaction>,
}

impl CallScript {
    /// A script emitting `log`.
    pub fn emit(log: LogData) -> Self {
        Self { logs: vec![log], ..Default::default() }
    }

    /// A reverting script.
    pub fn reverting() -> Self {
        Self { revert: true, ..Default::default() }
    }

    /// A script querying the hash of block `number`.
    pub fn block_hash(number: BlockNumber) -> Self {
        Self { query_block_hash: Some(number), ..Default::default() }
    }

    /// Rejects the transaction with `err` after the call has run.
    pub fn failing(mut self, err: InvalidTransaction) -> Self {
        self.fail = Some(err);
        self
    }

    /// Consumes `gas` on top of the intrinsic gas.
    pub const fn extra_gas(mut self, gas: u64) -> Self {
        self.extra_gas = gas;
        self
    }
}

/// An EVM double executing plain value transfers with consensus fee accounting.
///
/// Calls to a recipient with a [`CallScript`] follow the script. The system contracts are
/// modelled by their storage layout, and only if code is deployed at their address. The
/// request predeploys return the scripted queue contents once.
#[derive(Debug, Clone, Default)]
pub struct MockEvm {
    scripts: HashMap<Address, CallScript>,
    withdrawal_requests: Bytes,
    consolidation_requests: Bytes,
    fail_system_calls: bool,
    system_calls: Vec<Address>,
}

impl MockEvm {
    /// Creates an EVM without scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts calls to `address`.
    pub fn with_script(mut self, address: Address, script: CallScript) -> Self {
        self.scripts.insert(address, script);
        self
    }

    /// Sets the output of the next withdrawal queue drain.
    pub fn with_withdrawal_requests(mut self, requests: impl Into<Bytes>) -> Self {
        self.withdrawal_requests = requests.into();
        self
    }

    /// Sets the output of the next consolidation queue drain.
    pub fn with_consolidation_requests(mut self, requests: impl Into<Bytes>) -> Self {
        self.consolidation_requests = requests.into();
        self
    }

    /// Makes every system call fail.
    pub const fn failing_system_calls(mut self) -> Self {
        self.fail_system_calls = true;
        self
    }

    /// Contracts called through [`BlockEvm::system_call`], in call order.
    pub fn system_calls(&self) -> &[Address] {
        &self.system_calls
    }
}

/// Intrinsic gas of `message`, without the EIP-3860 init code charge.
pub fn intrinsic_gas(message: &Message) -> u64 {
    let base = if message.is_create() { TX_GAS + TX_CREATE_GAS } else { TX_GAS };
    let data: u64 = message
        .data
        .iter()
        .map(|byte| if *byte == 0 { TX_DATA_ZERO_GAS } else { TX_DATA_NON_ZERO_GAS })
        .sum();
    let access_list: u64 = message
        .access_list
        .iter()
        .map(|item| {
            ACCESS_LIST_ADDRESS_GAS + ACCESS_LIST_STORAGE_KEY_GAS * item.storage_keys.len() as u64
        })
        .sum();
    let authorizations = PER_EMPTY_ACCOUNT_GAS * message.authorization_list.len() as u64;
    base + data + access_list + authorizations
}

impl<S: StateDb> BlockEvm<S> for MockEvm {
    fn apply_message(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        block_hashes: &mut dyn BlockHashProvider,
        message: &Message,
        gas_pool: &mut GasPool,
    ) -> Result<MessageOutcome, InvalidTransaction> {
        let from = message.from;

        let nonce = state.nonce(from);
        if message.nonce < nonce {
            return Err(InvalidTransaction::NonceTooLow {
                address: from,
                tx: message.nonce,
                state: nonce,
            });
        }
        if message.nonce > nonce {
            return Err(InvalidTransaction::NonceTooHigh {
                address: from,
                tx: message.nonce,
                state: nonce,
            });
        }
        if let Some(base_fee) = block.base_fee {
            if message.gas_fee_cap < u128::from(base_fee) {
                return Err(InvalidTransaction::FeeCapTooLow {
                    address: from,
                    fee_cap: message.gas_fee_cap,
                    base_fee,
                });
            }
        }
        let blob_gas = message.blob_gas();
        let mut blob_fee = U256::ZERO;
        let blob_fees = (message.blob_gas_fee_cap, block.blob_base_fee);
        if let (Some(fee_cap), Some(blob_base_fee)) = blob_fees {
            if blob_gas > 0 && fee_cap < blob_base_fee {
                return Err(InvalidTransaction::BlobFeeCapTooLow {
                    address: from,
                    fee_cap,
                    blob_base_fee,
                });
            }
            blob_fee = U256::from(blob_gas) * U256::from(blob_base_fee);
        }

        let gas_price = U256::from(message.gas_price);
        let balance = state.balance(from);
        let want = U256::from(message.gas_limit) * U256::from(message.gas_fee_cap) +
            message.value +
            U256::from(blob_gas) * U256::from(message.blob_gas_fee_cap.unwrap_or_default());
        if balance < want {
            return Err(InvalidTransaction::InsufficientFunds {
                address: from,
                have: balance,
                want,
            });
        }
        gas_pool.sub_gas(message.gas_limit)?;
        state.sub_balance(from, U256::from(message.gas_limit) * gas_price + blob_fee);

        let intrinsic = intrinsic_gas(message);
        if message.gas_limit < intrinsic {
            return Err(InvalidTransaction::IntrinsicGas {
                have: message.gas_limit,
                want: intrinsic,
            });
        }
        state.set_nonce(from, nonce + 1);

        let to = match message.to {
            TxKind::Call(to) => to,
            TxKind::Create => from.create(nonce),
        };
        let script = self.scripts.get(&to).cloned().unwrap_or_default();
        let gas_used = (intrinsic + script.extra_gas).min(message.gas_limit);
        let hash = script.query_block_hash.map(|number| block_hashes.block_hash(number));
        if let Some(err) = script.fail {
            return Err(err);
        }

        let mut logs = Vec::new();
        if !script.revert {
            if message.is_create() {
                state.create_account(to);
            }
            state.sub_balance(from, message.value);
            state.add_balance(to, message.value);
            if let Some(hash) = hash {
                let value = U256::from_be_bytes(hash.unwrap_or_default().0);
                state.set_storage(to, U256::ZERO, value);
            }
            logs = script.logs.into_iter().map(|data| Log { address: to, data }).collect();
        }

        let gas_left = message.gas_limit - gas_used;
        state.add_balance(from, U256::from(gas_left) * gas_price);
        gas_pool.add_gas(gas_left);

        let tip = message.gas_price.saturating_sub(u128::from(block.base_fee.unwrap_or_default()));
        state.add_balance(block.coinbase, U256::from(gas_used) * U256::from(tip));

        Ok(MessageOutcome { gas_used, logs, reverted: script.revert, output: Bytes::new() })
    }

    fn system_call(
        &mut self,
        state: &mut S,
        block: &BlockContext,
        contract: Address,
        input: Bytes,
    ) -> Result<Bytes, EvmError> {
        self.system_calls.push(contract);
        if self.fail_system_calls {
            return Err(EvmError::SystemCall {
                address: contract,
                message: "execution reverted".to_string(),
            });
        }
        if state.code(contract).is_empty() {
            return Ok(Bytes::new());
        }

        let output = match contract {
            BEACON_ROOTS_ADDRESS => {
                let index = block.timestamp % BEACON_ROOTS_HISTORY_BUFFER_LENGTH;
                state.set_storage(contract, U256::from(index), U256::from(block.timestamp));
                state.set_storage(
                    contract,
                    U256::from(index + BEACON_ROOTS_HISTORY_BUFFER_LENGTH),
                    U256::from_be_slice(&input),
                );
                Bytes::new()
            }
            HISTORY_STORAGE_ADDRESS => {
                let index = block.number.saturating_sub(1) % HISTORY_SERVE_WINDOW;
                state.set_storage(contract, U256::from(index), U256::from_be_slice(&input));
                Bytes::new()
            }
            WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS => std::mem::take(&mut self.withdrawal_requests),
            CONSOLIDATION_REQUEST_PREDEPLOY_ADDRESS => {
                std::mem::take(&mut self.consolidation_requests)
            }
            _ => Bytes::new(),
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryState;
    use alloy_primitives::B256;

    const SENDER: Address = Address::with_last_byte(0xaa);
    const RECIPIENT: Address = Address::with_last_byte(0xbb);
    const COINBASE: Address = Address::with_last_byte(0xcc);

    struct NoHashes;

    impl BlockHashProvider for NoHashes {
        fn block_hash(&mut self, _number: BlockNumber) -> Option<B256> {
            None
        }
    }

    fn block(base_fee: Option<u64>) -> BlockContext {
        BlockContext {
            coinbase: COINBASE,
            number: 1,
            timestamp: 12,
            gas_limit: 30_000_000,
            difficulty: U256::ZERO,
            prev_randao: None,
            base_fee,
            blob_base_fee: None,
            chain_id: 1,
        }
    }

    fn message(value: u64, gas_price: u128) -> Message {
        Message {
            from: SENDER,
            to: TxKind::Call(RECIPIENT),
            nonce: 0,
            value: U256::from(value),
            gas_limit: 30_000,
            gas_price,
            gas_fee_cap: gas_price,
            gas_tip_cap: gas_price,
            data: Bytes::new(),
            access_list: Default::default(),
            blob_hashes: Vec::new(),
            blob_gas_fee_cap: None,
            authorization_list: Vec::new(),
        }
    }

    fn funded() -> MemoryState {
        let mut state = MemoryState::default();
        state.set_balance(SENDER, U256::from(10_000_000));
        state
    }

    #[test]
    fn test_transfer_fee_accounting() {
        let mut state = funded();
        let mut pool = GasPool::new(100_000);
        let outcome = MockEvm::new()
            .apply_message(
                &mut state,
                &block(Some(7)),
                &mut NoHashes,
                &message(1_000, 10),
                &mut pool,
            )
            .unwrap();

        assert_eq!(outcome.gas_used, 21_000);
        assert_eq!(pool.gas(), 79_000);
        assert_eq!(state.balance(RECIPIENT), U256::from(1_000));
        assert_eq!(state.balance(SENDER), U256::from(10_000_000 - 1_000 - 21_000 * 10));
        assert_eq!(state.balance(COINBASE), U256::from(21_000 * 3));
        assert_eq!(state.nonce(SENDER), 1);
    }

    #[test]
    fn test_rejections() {
        let mut evm = MockEvm::new();
        let mut pool = GasPool::new(100_000);

        let mut state = funded();
        state.set_nonce(SENDER, 2);
        let err = evm
            .apply_message(&mut state, &block(None), &mut NoHashes, &message(0, 1), &mut pool)
            .unwrap_err();
        assert_eq!(err, InvalidTransaction::NonceTooLow { address: SENDER, tx: 0, state: 2 });

        let mut state = funded();
        let err = evm
            .apply_message(&mut state, &block(Some(2)), &mut NoHashes, &message(0, 1), &mut pool)
            .unwrap_err();
        assert!(matches!(err, InvalidTransaction::FeeCapTooLow { base_fee: 2, .. }));

        let expensive = message(0, 1_000);
        let err = evm
            .apply_message(&mut state, &block(None), &mut NoHashes, &expensive, &mut pool)
            .unwrap_err();
        assert!(matches!(err, InvalidTransaction::InsufficientFunds { .. }));

        let mut low = message(0, 1);
        low.gas_limit = 20_000;
        let err = evm
            .apply_message(&mut state, &block(None), &mut NoHashes, &low, &mut pool)
            .unwrap_err();
        assert_eq!(err, InvalidTransaction::IntrinsicGas { have: 20_000, want: 21_000 });
    }

    #[test]
    fn test_reverting_script_keeps_fees() {
        let mut state = funded();
        let mut pool = GasPool::new(100_000);
        let mut evm = MockEvm::new()
            .with_script(RECIPIENT, CallScript::emit(LogData::default()).extra_gas(5_000))
            .with_script(Address::with_last_byte(0xdd), CallScript::reverting());

        let outcome = evm
            .apply_message(&mut state, &block(None), &mut NoHashes, &message(5, 1), &mut pool)
            .unwrap();
        assert_eq!(outcome.gas_used, 26_000);
        assert_eq!(outcome.logs.len(), 1);

        let mut reverting = message(5, 1);
        reverting.nonce = 1;
        reverting.to = TxKind::Call(Address::with_last_byte(0xdd));
        let outcome = evm
            .apply_message(&mut state, &block(None), &mut NoHashes, &reverting, &mut pool)
            .unwrap();
        assert!(outcome.reverted);
        assert!(outcome.logs.is_empty());
        assert_eq!(state.balance(Address::with_last_byte(0xdd)), U256::ZERO);
        assert_eq!(state.nonce(SENDER), 2);
    }

    #[test]
    fn test_system_calls_need_code() {
        let mut evm = MockEvm::new().with_withdrawal_requests(vec![0xab]);
        let mut state = MemoryState::default();
        let root = Bytes::copy_from_slice(B256::repeat_byte(9).as_slice());

        evm.system_call(&mut state, &block(None), BEACON_ROOTS_ADDRESS, root.clone()).unwrap();
        assert_eq!(state.storage(BEACON_ROOTS_ADDRESS, U256::from(12)), U256::ZERO);

        state.set_code(BEACON_ROOTS_ADDRESS, Bytes::from_static(&[0x00]));
        state.set_code(WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS, Bytes::from_static(&[0x00]));
        evm.system_call(&mut state, &block(None), BEACON_ROOTS_ADDRESS, root).unwrap();
        assert_eq!(state.storage(BEACON_ROOTS_ADDRESS, U256::from(12)), U256::from(12));
        let root_slot = U256::from(12 + BEACON_ROOTS_HISTORY_BUFFER_LENGTH);
        assert_eq!(
            state.storage(BEACON_ROOTS_ADDRESS, root_slot),
            U256::from_be_bytes(B256::repeat_byte(9).0)
        );

        let queue = WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS;
        let output = evm.system_call(&mut state, &block(None), queue, Bytes::new()).unwrap();
        assert_eq!(output, Bytes::from_static(&[0xab]));
        assert_eq!(evm.system_calls().len(), 3);
    }
}

//! The state transition engine: applies a transaction batch to a pre-state, finalizes the block
//! and assembles the execution result.

use std::collections::BTreeMap;

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::eip2718::Typed2718;
use alloy_primitives::{BlockNumber, B256, U256};
use tracing::{debug, info, trace, warn};

use crate::{
    constants::{eip4895::GWEI_TO_WEI, LOG_BLOCK_HASH_PLACEHOLDER},
    encode_transactions, logs_bloom, make_pre_state, parse_deposit_logs, Alloc, BlockContext,
    BlockEnv, BlockEvm, BlockHashProvider, BlockRewards, BlockSummary, ChainConfig,
    ExecutionResult, ForkSigner, GasPool, Hardforks, Message, MessageOutcome, RejectedTx, StateDb,
    TransactionLog, TransactionReceipt, TransactionSigner, TransactionsInput, TransitionConfig,
    TransitionError, TransitionOutput, TxDecodeError, ValidatedEnv,
};

/// Inputs of one transition run.
#[derive(Debug, Clone, Default)]
pub struct TransitionInput {
    /// Pre-state allocation.
    pub alloc: Alloc,
    /// Block environment.
    pub env: BlockEnv,
    /// Submitted transactions.
    pub txs: TransactionsInput,
}

/// Runs a full transition: signs keyed transactions, validates the environment, builds the
/// pre-state in the empty `state` and executes the block with `evm`.
pub fn run<S, E>(
    config: TransitionConfig,
    input: TransitionInput,
    state: S,
    evm: E,
) -> Result<TransitionOutput<S>, TransitionError>
where
    S: StateDb,
    E: BlockEvm<S>,
{
    let TransitionInput { alloc, env, txs } = input;

    let txs = txs.into_source(&ForkSigner::latest(config.chain.chain_id))?;
    let env = ValidatedEnv::new(env, &config.chain)?;
    let (state, pre_root) = make_pre_state(state, &alloc).map_err(TransitionError::PreState)?;
    debug!(target: "block_transition", number = env.number, %pre_root, "starting transition");

    StateTransition::new(config, env, state, evm).execute(txs)
}

/// Executes one block on top of a pre-state.
///
/// The engine is consumed by [`StateTransition::execute`]: it either commits the block and
/// returns the [`TransitionOutput`], or fails with a block-fatal [`TransitionError`].
#[derive(Debug)]
pub struct StateTransition<S, E, T = ForkSigner> {
    config: TransitionConfig,
    env: ValidatedEnv,
    block: BlockContext,
    state: S,
    evm: E,
    signer: T,
}

impl<S: StateDb, E: BlockEvm<S>> StateTransition<S, E> {
    /// Creates an engine recovering senders with the signer of the block's forks.
    pub fn new(config: TransitionConfig, env: ValidatedEnv, state: S, evm: E) -> Self {
        let signer = ForkSigner::new(&config.chain, env.number, env.timestamp);
        Self::with_signer(config, env, state, evm, signer)
    }
}

impl<S, E, T> StateTransition<S, E, T>
where
    S: StateDb,
    E: BlockEvm<S>,
    T: TransactionSigner,
{
    /// Creates an engine recovering senders with `signer`.
    pub fn with_signer(
        config: TransitionConfig,
        env: ValidatedEnv,
        state: S,
        evm: E,
        signer: T,
    ) -> Self {
        let block = BlockContext::new(&env, config.chain.chain_id);
        Self { config, env, block, state, evm, signer }
    }

    /// Executes `txs` in submission order and finalizes the block.
    ///
    /// Transactions that fail to decode, to recover, to fit the blob gas allowance or to apply
    /// are rejected by submission index and leave no trace in the state. Everything else is
    /// included.
    pub fn execute<I>(self, txs: I) -> Result<TransitionOutput<S>, TransitionError>
    where
        I: IntoIterator<Item = Result<TxEnvelope, TxDecodeError>>,
    {
        let Self { config, env, block, mut state, mut evm, signer } = self;
        let chain = &config.chain;
        let number = env.number;
        let timestamp = env.timestamp;
        let blob_gas = env.blob_gas();

        pre_block_operations(chain, &env, &block, &mut state, &mut evm)?;

        let mut acc = BlockAccumulator::new(env.gas_limit);
        let mut block_hashes = BlockHashOracle::new(env.block_hashes.as_ref());

        for (index, tx) in txs.into_iter().enumerate() {
            let tx = match tx {
                Ok(tx) => tx,
                Err(err) => {
                    warn!(target: "block_transition", index, %err, "rejected tx");
                    acc.reject(index, err.to_string());
                    continue;
                }
            };
            let hash = *tx.tx_hash();

            if tx.is_eip4844() && blob_gas.is_none() {
                let err = "blob tx used but field env.ExcessBlobGas missing";
                warn!(target: "block_transition", index, %hash, %err, "rejected tx");
                acc.reject(index, err.to_string());
                continue;
            }

            let sender = match signer.recover_sender(&tx) {
                Ok(sender) => sender,
                Err(err) => {
                    warn!(target: "block_transition", index, %hash, %err, "rejected tx");
                    acc.reject(index, err.to_string());
                    continue;
                }
            };
            let message = Message::from_tx(&tx, sender, env.base_fee);

            let tx_blob_gas = message.blob_gas();
            if let Some(blob_gas) = blob_gas.filter(|_| tx_blob_gas > 0) {
                let used = acc.blob_gas_used + tx_blob_gas;
                let max = blob_gas.params.max_blob_gas();
                if used > max {
                    let err = format!("blob gas ({used}) would exceed maximum allowance {max}");
                    warn!(target: "block_transition", index, %hash, %err, "rejected tx");
                    acc.reject(index, err);
                    continue;
                }
            }

            let snapshot = state.snapshot();
            let prev_gas = acc.gas_pool.gas();
            let outcome = match evm.apply_message(
                &mut state,
                &block,
                &mut block_hashes,
                &message,
                &mut acc.gas_pool,
            ) {
                Ok(outcome) => outcome,
                Err(err) => {
                    state.revert_to_snapshot(snapshot);
                    acc.gas_pool.set_gas(prev_gas);
                    info!(
                        target: "block_transition",
                        index,
                        %hash,
                        from = %sender,
                        %err,
                        "rejected tx"
                    );
                    acc.reject(index, err.to_string());
                    continue;
                }
            };

            if let Some(err) = block_hashes.take_error() {
                return Err(err);
            }

            acc.gas_used += outcome.gas_used;
            acc.blob_gas_used += tx_blob_gas;

            // pre-Byzantium receipts commit to the intermediate state root
            let root = if chain.is_byzantium(number) {
                state.finalise(true);
                None
            } else {
                Some(state.intermediate_root(chain.is_eip158(number)))
            };

            let receipt = acc.receipt(ReceiptInput {
                tx: &tx,
                message: &message,
                outcome,
                root,
                number,
                blob_gas_price: blob_gas.map(|blob_gas| blob_gas.blob_base_fee),
            });
            trace!(
                target: "block_transition",
                index = receipt.transaction_index,
                %hash,
                gas_used = receipt.gas_used,
                status = receipt.status,
                "included tx"
            );
            acc.receipts.push(receipt);
            acc.included.push(tx);
        }

        let eip158 = chain.is_eip158(number);
        state.intermediate_root(eip158);

        if let Some(rewards) = BlockRewards::compute(config.reward, &env.ommers) {
            for (address, reward) in rewards.ommers {
                state.add_balance(address, reward);
            }
            state.add_balance(env.coinbase, rewards.miner);
            debug!(
                target: "block_transition",
                coinbase = %env.coinbase,
                reward = %rewards.miner,
                "applied block rewards"
            );
        }

        if let Some(withdrawals) = &env.withdrawals {
            for withdrawal in withdrawals {
                let amount = U256::from(withdrawal.amount) * U256::from(GWEI_TO_WEI);
                state.add_balance(withdrawal.address, amount);
            }
            debug!(target: "block_transition", count = withdrawals.len(), "applied withdrawals");
        }

        let requests = if chain.is_prague(number, timestamp) {
            let mut requests = Vec::new();
            let logs: Vec<_> = acc
                .receipts
                .iter()
                .flat_map(|receipt| receipt.logs.iter().map(TransactionLog::to_log))
                .collect();
            parse_deposit_logs(&mut requests, &logs, chain.deposit_contract_address)
                .map_err(TransitionError::DepositLogs)?;
            evm.process_withdrawal_queue(&mut state, &block, &mut requests)
                .map_err(TransitionError::WithdrawalRequests)?;
            evm.process_consolidation_queue(&mut state, &block, &mut requests)
                .map_err(TransitionError::ConsolidationRequests)?;
            debug!(target: "block_transition", count = requests.len(), "collected requests");
            Some(requests)
        } else {
            None
        };

        let state_root = state
            .commit(number, eip158, chain.is_cancun(number, timestamp))
            .map_err(TransitionError::Commit)?;
        debug!(
            target: "block_transition",
            number,
            %state_root,
            included = acc.included.len(),
            rejected = acc.rejected.len(),
            gas_used = acc.gas_used,
            "committed block"
        );

        let body = encode_transactions(&acc.included);
        let result = ExecutionResult::assemble(BlockSummary {
            state_root,
            included: &acc.included,
            receipts: acc.receipts,
            rejected: acc.rejected,
            gas_used: acc.gas_used,
            blob_gas_used: acc.blob_gas_used,
            requests,
            env: &env,
        });
        let state = state.reopen(state_root).map_err(TransitionError::Reopen)?;

        Ok(TransitionOutput { state, result, body })
    }
}

/// Runs the irregular state changes and system calls preceding the first transaction.
fn pre_block_operations<S: StateDb, E: BlockEvm<S>>(
    chain: &ChainConfig,
    env: &ValidatedEnv,
    block: &BlockContext,
    state: &mut S,
    evm: &mut E,
) -> Result<(), TransitionError> {
    let mut ctx = PreBlockContext { chain, env, block, state, evm };
    for rule in PreBlockRule::<S, E>::all() {
        if (rule.applies)(chain, env) {
            debug!(target: "block_transition", rule = rule.name, "applying pre-block rule");
            (rule.apply)(&mut ctx)?;
        }
    }
    Ok(())
}

/// Everything a pre-block operation may read or modify.
struct PreBlockContext<'a, S, E> {
    chain: &'a ChainConfig,
    env: &'a BlockEnv,
    block: &'a BlockContext,
    state: &'a mut S,
    evm: &'a mut E,
}

/// One operation preceding the first transaction: a predicate deciding whether it runs for the
/// block and the operation itself.
struct PreBlockRule<S, E> {
    name: &'static str,
    applies: fn(&ChainConfig, &BlockEnv) -> bool,
    apply: fn(&mut PreBlockContext<'_, S, E>) -> Result<(), TransitionError>,
}

impl<S: StateDb, E: BlockEvm<S>> PreBlockRule<S, E> {
    /// The pre-block rules in execution order: DAO hard fork, beacon root, parent hash.
    fn all() -> [Self; 3] {
        [
            Self {
                name: "dao-hard-fork",
                applies: |chain, env| {
                    chain.dao_fork_support && chain.dao_fork_block == Some(env.number)
                },
                apply: dao_hard_fork_rule,
            },
            Self {
                name: "beacon-block-root",
                applies: |_, env| env.parent_beacon_block_root.is_some(),
                apply: beacon_block_root_rule,
            },
            Self {
                name: "parent-block-hash",
                applies: |chain, env| {
                    env.block_hashes.is_some() && chain.is_prague(env.number, env.timestamp)
                },
                apply: parent_block_hash_rule,
            },
        ]
    }
}

fn dao_hard_fork_rule<S: StateDb, E>(
    ctx: &mut PreBlockContext<'_, S, E>,
) -> Result<(), TransitionError> {
    apply_dao_hard_fork(ctx.state, ctx.chain);
    Ok(())
}

fn beacon_block_root_rule<S: StateDb, E: BlockEvm<S>>(
    ctx: &mut PreBlockContext<'_, S, E>,
) -> Result<(), TransitionError> {
    let root = ctx.env.parent_beacon_block_root.unwrap_or_default();
    ctx.evm
        .process_beacon_block_root(ctx.state, ctx.block, root)
        .map_err(TransitionError::SystemCall)
}

fn parent_block_hash_rule<S: StateDb, E: BlockEvm<S>>(
    ctx: &mut PreBlockContext<'_, S, E>,
) -> Result<(), TransitionError> {
    let parent_hash = ctx
        .env
        .number
        .checked_sub(1)
        .and_then(|parent| ctx.env.block_hashes.as_ref()?.get(&parent).copied())
        .unwrap_or_default();
    ctx.evm
        .process_parent_block_hash(ctx.state, ctx.block, parent_hash)
        .map_err(TransitionError::SystemCall)
}

/// Moves the balance of every account of the DAO drain list into the refund contract, creating
/// the contract if it does not exist.
pub fn apply_dao_hard_fork<S: StateDb>(state: &mut S, chain: &ChainConfig) {
    let refund = chain.dao_refund_contract;
    if !state.exists(refund) {
        state.create_account(refund);
    }
    for address in &chain.dao_drain_list {
        let balance = state.balance(*address);
        state.add_balance(refund, balance);
        state.set_balance(*address, U256::ZERO);
    }
}

/// Running totals of the block being built.
#[derive(Debug)]
struct BlockAccumulator {
    gas_pool: GasPool,
    gas_used: u64,
    blob_gas_used: u64,
    log_index: u64,
    included: Vec<TxEnvelope>,
    receipts: Vec<TransactionReceipt>,
    rejected: Vec<RejectedTx>,
}

struct ReceiptInput<'a> {
    tx: &'a TxEnvelope,
    message: &'a Message,
    outcome: MessageOutcome,
    root: Option<B256>,
    number: BlockNumber,
    blob_gas_price: Option<u128>,
}

impl BlockAccumulator {
    const fn new(gas_limit: u64) -> Self {
        Self {
            gas_pool: GasPool::new(gas_limit),
            gas_used: 0,
            blob_gas_used: 0,
            log_index: 0,
            included: Vec::new(),
            receipts: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn reject(&mut self, index: usize, error: String) {
        self.rejected.push(RejectedTx { index: index as u64, error });
    }

    /// Builds the receipt of the next included transaction. Must run after the gas totals
    /// account for the transaction.
    fn receipt(&mut self, input: ReceiptInput<'_>) -> TransactionReceipt {
        let ReceiptInput { tx, message, outcome, root, number, blob_gas_price } = input;
        let hash = *tx.tx_hash();
        let transaction_index = self.included.len() as u64;

        let consensus_logs = if outcome.reverted { Vec::new() } else { outcome.logs };
        let logs = consensus_logs
            .iter()
            .map(|log| {
                let log_index = self.log_index;
                self.log_index += 1;
                TransactionLog {
                    address: log.address,
                    topics: log.topics().to_vec(),
                    data: log.data.data.clone(),
                    block_number: number,
                    transaction_hash: hash,
                    transaction_index,
                    block_hash: LOG_BLOCK_HASH_PLACEHOLDER,
                    log_index,
                    removed: false,
                }
            })
            .collect();

        let blob_gas_used = message.blob_gas();
        TransactionReceipt {
            tx_type: tx.ty(),
            root,
            status: u64::from(!outcome.reverted),
            cumulative_gas_used: self.gas_used,
            logs_bloom: logs_bloom(&consensus_logs),
            logs,
            transaction_hash: hash,
            contract_address: message.is_create().then(|| message.from.create(tx.nonce())),
            gas_used: outcome.gas_used,
            effective_gas_price: message.gas_price,
            blob_gas_used: (blob_gas_used > 0).then_some(blob_gas_used),
            blob_gas_price: blob_gas_price.filter(|_| blob_gas_used > 0),
            block_hash: LOG_BLOCK_HASH_PLACEHOLDER,
            block_number: number,
            transaction_index,
        }
    }
}

/// Serves `BLOCKHASH` from the supplied hash table and remembers the last lookup it could not
/// serve. The lookup itself answers with the zero hash.
#[derive(Debug)]
struct BlockHashOracle<'a> {
    hashes: Option<&'a BTreeMap<BlockNumber, B256>>,
    error: Option<TransitionError>,
}

impl<'a> BlockHashOracle<'a> {
    const fn new(hashes: Option<&'a BTreeMap<BlockNumber, B256>>) -> Self {
        Self { hashes, error: None }
    }

    fn take_error(&mut self) -> Option<TransitionError> {
        self.error.take()
    }
}

impl BlockHashProvider for BlockHashOracle<'_> {
    fn block_hash(&mut self, number: BlockNumber) -> Option<B256> {
        let Some(hashes) = self.hashes else {
            self.error = Some(TransitionError::NoBlockhashes { number });
            return None;
        };
        let hash = hashes.get(&number).copied();
        if hash.is_none() {
            self.error = Some(TransitionError::MissingBlockhash { number });
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::MockEvm, GenesisAccount, MemoryState};
    use alloy_hardforks::EthereumHardfork;
    use alloy_primitives::Address;

    #[test]
    fn test_block_hash_oracle() {
        let hashes = BTreeMap::from([(1, B256::repeat_byte(1))]);
        let mut oracle = BlockHashOracle::new(Some(&hashes));
        assert_eq!(oracle.block_hash(1), Some(B256::repeat_byte(1)));
        assert!(oracle.take_error().is_none());

        assert_eq!(oracle.block_hash(2), None);
        let err = oracle.take_error();
        assert!(matches!(err, Some(TransitionError::MissingBlockhash { number: 2 })));
        assert!(oracle.take_error().is_none());

        let mut oracle = BlockHashOracle::new(None);
        assert_eq!(oracle.block_hash(3), None);
        let err = oracle.take_error();
        assert!(matches!(err, Some(TransitionError::NoBlockhashes { number: 3 })));
    }

    #[test]
    fn test_pre_block_rules_order() {
        let applied = |chain: &ChainConfig, env: &BlockEnv| -> Vec<&'static str> {
            PreBlockRule::<MemoryState, MockEvm>::all()
                .into_iter()
                .filter(|rule| (rule.applies)(chain, env))
                .map(|rule| rule.name)
                .collect()
        };
        let env = BlockEnv {
            number: 1,
            parent_beacon_block_root: Some(B256::repeat_byte(0xbe)),
            block_hashes: Some(BTreeMap::new()),
            ..Default::default()
        };

        let prague = ChainConfig::from_fork(EthereumHardfork::Prague, 1).unwrap();
        assert_eq!(applied(&prague, &env), ["beacon-block-root", "parent-block-hash"]);
        let no_hashes = BlockEnv { block_hashes: None, ..env.clone() };
        assert_eq!(applied(&prague, &no_hashes), ["beacon-block-root"]);

        let cancun = ChainConfig::from_fork(EthereumHardfork::Cancun, 1).unwrap();
        assert_eq!(applied(&cancun, &env), ["beacon-block-root"]);

        let mut dao = ChainConfig::frontier(1);
        dao.dao_fork_support = true;
        dao.dao_fork_block = Some(1);
        let env = BlockEnv { parent_beacon_block_root: None, ..env };
        assert_eq!(applied(&dao, &env), ["dao-hard-fork"]);
        dao.dao_fork_support = false;
        assert!(applied(&dao, &env).is_empty());
    }

    #[test]
    fn test_dao_hard_fork() {
        let drained = Address::with_last_byte(0xd1);
        let mut chain = ChainConfig::frontier(1);
        chain.dao_drain_list = vec![drained, Address::with_last_byte(0xd2)];

        let alloc = Alloc::from([(drained, GenesisAccount::with_balance(U256::from(100)))]);
        let (mut state, _) = make_pre_state(MemoryState::default(), &alloc).unwrap();
        apply_dao_hard_fork(&mut state, &chain);

        assert_eq!(state.balance(drained), U256::ZERO);
        assert_eq!(state.balance(chain.dao_refund_contract), U256::from(100));
        assert!(state.exists(chain.dao_refund_contract));
    }

    #[test]
    fn test_accumulator_rejects_by_submission_index() {
        let mut acc = BlockAccumulator::new(30_000_000);
        acc.reject(3, "nonce too low".to_string());
        assert_eq!(acc.rejected, vec![RejectedTx { index: 3, error: "nonce too low".to_string() }]);
        assert_eq!(acc.gas_pool.gas(), 30_000_000);
    }
}

//! Shared fixtures of the integration tests.
#![allow(dead_code)]

use alloy_consensus::TxEnvelope;
use alloy_hardforks::EthereumHardfork;
use alloy_primitives::{address, Address, U256};
use block_transition::{
    make_pre_state,
    test_utils::{key_address, legacy_transfer, sign_tx, MockEvm, ALICE_KEY},
    Alloc, BlockEnv, ChainConfig, GenesisAccount, Hardforks, MemoryState, StateTransition,
    TransactionSource, TransitionConfig, TransitionError, TransitionOutput, ValidatedEnv,
};

pub const CHAIN_ID: u64 = 1;
pub const COINBASE: Address = address!("0x2adc25665018aa1fe0e6bc666dac8fc2697ff9ba");
pub const RECIPIENT: Address = address!("0x00000000000000000000000000000000000000bb");
pub const GAS_PRICE: u128 = 10;
pub const BASE_FEE: u64 = 7;
pub const NUMBER: u64 = 1;
pub const TIMESTAMP: u64 = 1_000;
pub const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

/// A chain with `fork` and its predecessors active from genesis.
pub fn chain(fork: EthereumHardfork) -> ChainConfig {
    ChainConfig::from_fork(fork, CHAIN_ID).unwrap()
}

/// A block environment accepted by `chain`: block 1 at timestamp 1000 with a 30M gas limit.
pub fn block_env(chain: &ChainConfig) -> BlockEnv {
    let merged = chain.is_merged();
    BlockEnv {
        coinbase: COINBASE,
        gas_limit: 30_000_000,
        number: NUMBER,
        timestamp: TIMESTAMP,
        difficulty: (!merged).then_some(U256::from(131_072)),
        random: merged.then_some(U256::ZERO),
        base_fee: chain.is_london(NUMBER).then_some(BASE_FEE),
        excess_blob_gas: chain.is_cancun(NUMBER, TIMESTAMP).then_some(0),
        withdrawals: chain.is_shanghai(NUMBER, TIMESTAMP).then(Vec::new),
        ..Default::default()
    }
}

/// The sender of the test transactions.
pub fn alice() -> Address {
    key_address(&ALICE_KEY)
}

/// Alice holds one ether, the coinbase one wei.
pub fn alloc() -> Alloc {
    Alloc::from([
        (alice(), GenesisAccount::with_balance(U256::from(ONE_ETHER))),
        (COINBASE, GenesisAccount::with_balance(U256::from(1))),
    ])
}

/// A signed legacy transfer of `value` wei from alice to the recipient.
pub fn transfer(nonce: u64, value: u64) -> TxEnvelope {
    sign_tx(legacy_transfer(nonce, RECIPIENT, U256::from(value), GAS_PRICE), &ALICE_KEY, CHAIN_ID)
}

/// Validates `env`, builds the pre-state from `alloc` and executes `txs`.
pub fn execute(
    config: TransitionConfig,
    env: BlockEnv,
    alloc: &Alloc,
    txs: Vec<TxEnvelope>,
    evm: MockEvm,
) -> Result<TransitionOutput<MemoryState>, TransitionError> {
    let env = ValidatedEnv::new(env, &config.chain)?;
    let (state, _) = make_pre_state(MemoryState::default(), alloc).unwrap();
    StateTransition::new(config, env, state, evm).execute(TransactionSource::decoded(txs))
}

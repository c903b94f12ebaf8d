//! Consensus constants used by the block state transition.
//!
//! Constants are grouped by the EIP (or consensus engine) that introduces them.

use alloy_primitives::{address, b256, Address, B256};

/// Placeholder block hash attached to receipt logs. The hash of the block being built is not
/// known while its transactions execute.
pub const LOG_BLOCK_HASH_PLACEHOLDER: B256 =
    b256!("0x1337000000000000000000000000000000000000000000000000000000000000");

/// Constants for the EIP-1559 fee market.
pub mod eip1559 {
    /// Base fee of the first London block.
    pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;
    /// Bounds the gas limit of a block relative to its gas target.
    pub const ELASTICITY_MULTIPLIER: u64 = 2;
    /// Bounds the amount the base fee can change between blocks.
    pub const BASE_FEE_CHANGE_DENOMINATOR: u64 = 8;
}

/// Constants for the EIP-4844 blob gas market.
pub mod eip4844 {
    /// Blob gas consumed by a single blob.
    pub const GAS_PER_BLOB: u64 = 131_072;
    /// Minimum price of a unit of blob gas.
    pub const MIN_BLOB_GASPRICE: u128 = 1;

    /// Target blobs per block in Cancun.
    pub const CANCUN_TARGET_BLOBS_PER_BLOCK: u64 = 3;
    /// Maximum blobs per block in Cancun.
    pub const CANCUN_MAX_BLOBS_PER_BLOCK: u64 = 6;
    /// Controls the maximum rate of change of the blob base fee in Cancun.
    pub const CANCUN_BLOB_BASE_FEE_UPDATE_FRACTION: u64 = 3_338_477;

    /// Target blobs per block in Prague (EIP-7691).
    pub const PRAGUE_TARGET_BLOBS_PER_BLOCK: u64 = 6;
    /// Maximum blobs per block in Prague (EIP-7691).
    pub const PRAGUE_MAX_BLOBS_PER_BLOCK: u64 = 9;
    /// Controls the maximum rate of change of the blob base fee in Prague (EIP-7691).
    pub const PRAGUE_BLOB_BASE_FEE_UPDATE_FRACTION: u64 = 5_007_716;
}

/// Constants for the ethash difficulty adjustment.
pub mod ethash {
    use alloy_primitives::{b256, B256};

    /// The difficulty never drops below this value.
    pub const MINIMUM_DIFFICULTY: u64 = 131_072;
    /// Divisor of the parent difficulty used to compute the adjustment step.
    pub const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;
    /// Frontier: blocks faster than this (in seconds) raise the difficulty.
    pub const DURATION_LIMIT: u64 = 13;
    /// Number of blocks in one period of the difficulty bomb.
    pub const EXP_DIFF_PERIOD: u64 = 100_000;

    /// Difficulty bomb delay introduced in Byzantium (EIP-649).
    pub const BYZANTIUM_BOMB_DELAY: u64 = 3_000_000;
    /// Difficulty bomb delay introduced in Constantinople (EIP-1234).
    pub const CONSTANTINOPLE_BOMB_DELAY: u64 = 5_000_000;
    /// Difficulty bomb delay introduced in Muir Glacier (EIP-2384).
    pub const MUIR_GLACIER_BOMB_DELAY: u64 = 9_000_000;
    /// Difficulty bomb delay introduced in London (EIP-3554).
    pub const LONDON_BOMB_DELAY: u64 = 9_700_000;
    /// Difficulty bomb delay introduced in Arrow Glacier (EIP-4345).
    pub const ARROW_GLACIER_BOMB_DELAY: u64 = 10_700_000;
    /// Difficulty bomb delay introduced in Gray Glacier (EIP-5133).
    pub const GRAY_GLACIER_BOMB_DELAY: u64 = 11_400_000;

    /// Keccak-256 of the RLP encoding of an empty ommer list.
    pub const EMPTY_OMMER_ROOT_HASH: B256 =
        b256!("0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");
}

/// Constants for EIP-4895 beacon chain withdrawals.
pub mod eip4895 {
    /// Withdrawal amounts are denominated in gwei.
    pub const GWEI_TO_WEI: u64 = 1_000_000_000;
}

/// Constants for the execution layer requests (EIP-6110, EIP-7002, EIP-7251).
pub mod requests {
    use super::*;

    /// Request type of EIP-6110 deposits.
    pub const DEPOSIT_REQUEST_TYPE: u8 = 0x00;
    /// Request type of EIP-7002 withdrawal requests.
    pub const WITHDRAWAL_REQUEST_TYPE: u8 = 0x01;
    /// Request type of EIP-7251 consolidation requests.
    pub const CONSOLIDATION_REQUEST_TYPE: u8 = 0x02;

    /// Mainnet deposit contract.
    pub const MAINNET_DEPOSIT_CONTRACT_ADDRESS: Address =
        address!("0x00000000219ab540356cBB839Cbe05303d7705Fa");
    /// Topic of `DepositEvent(bytes,bytes,bytes,bytes,bytes)`.
    pub const DEPOSIT_EVENT_SIGNATURE_HASH: B256 =
        b256!("0x649bbc62d0e31342afea4e5cd82d4049e7e1ee912fc0889aa790803be39038c5");
    /// Size of the ABI encoded data of a deposit event.
    pub const DEPOSIT_LOG_DATA_SIZE: usize = 576;
    /// Size of a flattened deposit request.
    pub const DEPOSIT_REQUEST_SIZE: usize = 192;

    /// EIP-7002 withdrawal request predeploy.
    pub const WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS: Address =
        address!("0x00000961Ef480Eb55e80D19ad83579A64c007002");
    /// EIP-7251 consolidation request predeploy.
    pub const CONSOLIDATION_REQUEST_PREDEPLOY_ADDRESS: Address =
        address!("0x0000BBdDc7CE488642fb579F8B00f3a590007251");
}

/// Constants for the pre-block system calls (EIP-4788, EIP-2935).
pub mod system {
    use super::*;

    /// Caller of every system call.
    pub const SYSTEM_ADDRESS: Address = address!("0xfffffffffffffffffffffffffffffffffffffffe");
    /// EIP-4788 beacon roots contract.
    pub const BEACON_ROOTS_ADDRESS: Address =
        address!("0x000F3df6D732807Ef1319fB7B8bB8522d0Beac02");
    /// Ring buffer length of the beacon roots contract.
    pub const BEACON_ROOTS_HISTORY_BUFFER_LENGTH: u64 = 8191;
    /// EIP-2935 history storage contract.
    pub const HISTORY_STORAGE_ADDRESS: Address =
        address!("0x0000F90827F1C53a10cb7A02335B175320002935");
    /// Ring buffer length of the history storage contract.
    pub const HISTORY_SERVE_WINDOW: u64 = 8191;
}

/// Constants for the DAO hard fork irregular state change.
pub mod dao {
    use super::*;

    /// Mainnet block of the DAO hard fork.
    pub const MAINNET_DAO_FORK_BLOCK: u64 = 1_920_000;
    /// Contract receiving the drained balances on mainnet.
    pub const MAINNET_DAO_REFUND_CONTRACT: Address =
        address!("0xbf4ed7b27f1d666546e30d74d50d173d20bca754");
}

//! Chain rules oracle.
//!
//! Pure functions deriving the fork-dependent numeric policy of a block: the EIP-1559 base fee,
//! the EIP-4844 blob gas market, the ethash difficulty adjustment and the block rewards. Fork
//! activation itself is answered by [`Hardforks`].

use alloy_hardforks::EthereumHardfork;
use alloy_primitives::{Address, BlockNumber, BlockTimestamp, B256, U256};

use crate::{
    constants::{
        eip1559::{BASE_FEE_CHANGE_DENOMINATOR, ELASTICITY_MULTIPLIER, INITIAL_BASE_FEE},
        eip4844::MIN_BLOB_GASPRICE,
        ethash::{
            ARROW_GLACIER_BOMB_DELAY, BYZANTIUM_BOMB_DELAY, CONSTANTINOPLE_BOMB_DELAY,
            DIFFICULTY_BOUND_DIVISOR, DURATION_LIMIT, EMPTY_OMMER_ROOT_HASH, EXP_DIFF_PERIOD,
            GRAY_GLACIER_BOMB_DELAY, LONDON_BOMB_DELAY, MINIMUM_DIFFICULTY,
            MUIR_GLACIER_BOMB_DELAY,
        },
    },
    BlobParams, Hardforks, Ommer,
};

/// Gas figures of the parent block used to derive the base fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentGas {
    /// Parent base fee.
    pub base_fee: u64,
    /// Gas used by the parent block.
    pub gas_used: u64,
    /// Gas limit of the parent block.
    pub gas_limit: u64,
}

/// Computes the EIP-1559 base fee of block `number` from its parent.
///
/// If the parent is not a London block the base fee is [`INITIAL_BASE_FEE`]. A parent with a
/// zero gas target keeps its base fee.
pub fn calc_base_fee(chain: impl Hardforks, number: BlockNumber, parent: ParentGas) -> u64 {
    let parent_number = number.saturating_sub(1);
    if number == 0 || !chain.is_london(parent_number) {
        return INITIAL_BASE_FEE;
    }

    let gas_target = parent.gas_limit / ELASTICITY_MULTIPLIER;
    if gas_target == 0 || parent.gas_used == gas_target {
        return parent.base_fee;
    }

    let base_fee = parent.base_fee as u128;
    let target = gas_target as u128;
    if parent.gas_used > gas_target {
        let gas_delta = (parent.gas_used - gas_target) as u128;
        let delta = (base_fee * gas_delta / target / BASE_FEE_CHANGE_DENOMINATOR as u128).max(1);
        u64::try_from(base_fee + delta).unwrap_or(u64::MAX)
    } else {
        let gas_delta = (gas_target - parent.gas_used) as u128;
        let delta = base_fee * gas_delta / target / BASE_FEE_CHANGE_DENOMINATOR as u128;
        u64::try_from(base_fee.saturating_sub(delta)).unwrap_or(u64::MAX)
    }
}

/// Computes the excess blob gas of a block from its parent's excess and usage.
///
/// `params` are the blob parameters of the block being built; without them the target is zero.
pub fn calc_excess_blob_gas(
    params: Option<BlobParams>,
    parent_excess_blob_gas: u64,
    parent_blob_gas_used: u64,
) -> u64 {
    let target = params.map(|params| params.target_blob_gas()).unwrap_or_default();
    parent_excess_blob_gas.saturating_add(parent_blob_gas_used).saturating_sub(target)
}

/// Computes the blob base fee for the given excess blob gas.
pub fn calc_blob_fee(params: BlobParams, excess_blob_gas: u64) -> u128 {
    fake_exponential(
        MIN_BLOB_GASPRICE,
        excess_blob_gas as u128,
        params.base_fee_update_fraction as u128,
    )
}

/// Approximates `factor * e ** (numerator / denominator)` using a Taylor expansion.
///
/// See `fake_exponential` in EIP-4844. Saturates at [`u128::MAX`].
pub fn fake_exponential(factor: u128, numerator: u128, denominator: u128) -> u128 {
    if denominator == 0 {
        return factor;
    }
    let factor = U256::from(factor);
    let numerator = U256::from(numerator);
    let denominator = U256::from(denominator);

    let mut i = U256::from(1);
    let mut output = U256::ZERO;
    let mut accumulator = factor * denominator;
    while !accumulator.is_zero() {
        output = output.saturating_add(accumulator);
        accumulator = accumulator.saturating_mul(numerator) / (denominator * i);
        i += U256::from(1);
    }
    u128::try_from(output / denominator).unwrap_or(u128::MAX)
}

/// Inputs of the ethash difficulty adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyInput {
    /// Number of the block being built.
    pub number: BlockNumber,
    /// Timestamp of the block being built.
    pub timestamp: BlockTimestamp,
    /// Parent timestamp.
    pub parent_timestamp: BlockTimestamp,
    /// Parent difficulty.
    pub parent_difficulty: U256,
    /// Parent ommer hash. The zero hash stands for "no ommers".
    pub parent_uncle_hash: B256,
}

/// Computes the ethash difficulty of a block.
///
/// The formula is selected by the forks active at `input.number`: Frontier, Homestead, or the
/// Byzantium family with the difficulty bomb delayed by the latest active delay.
pub fn calc_difficulty(chain: impl Hardforks, input: DifficultyInput) -> U256 {
    let active = |fork| chain.fork_activation(fork).active_at_block(input.number);

    let bomb_delay = if active(EthereumHardfork::GrayGlacier) {
        Some(GRAY_GLACIER_BOMB_DELAY)
    } else if active(EthereumHardfork::ArrowGlacier) {
        Some(ARROW_GLACIER_BOMB_DELAY)
    } else if active(EthereumHardfork::London) {
        Some(LONDON_BOMB_DELAY)
    } else if active(EthereumHardfork::MuirGlacier) {
        Some(MUIR_GLACIER_BOMB_DELAY)
    } else if active(EthereumHardfork::Constantinople) {
        Some(CONSTANTINOPLE_BOMB_DELAY)
    } else if active(EthereumHardfork::Byzantium) {
        Some(BYZANTIUM_BOMB_DELAY)
    } else {
        None
    };

    match bomb_delay {
        Some(delay) => byzantium_difficulty(input, delay),
        None if active(EthereumHardfork::Homestead) => homestead_difficulty(input),
        None => frontier_difficulty(input),
    }
}

fn byzantium_difficulty(input: DifficultyInput, bomb_delay: u64) -> U256 {
    let uncles_factor = if input.parent_uncle_hash.is_zero() ||
        input.parent_uncle_hash == EMPTY_OMMER_ROOT_HASH
    {
        1
    } else {
        2
    };
    let elapsed = input.timestamp.saturating_sub(input.parent_timestamp) / 9;
    let factor = (uncles_factor - elapsed.min(i64::MAX as u64) as i64).max(-99);

    let mut difficulty = adjust(input.parent_difficulty, factor);

    let parent_number = input.number.saturating_sub(1);
    let fake_number = parent_number.saturating_sub(bomb_delay - 1);
    difficulty += bomb(fake_number / EXP_DIFF_PERIOD);
    difficulty
}

fn homestead_difficulty(input: DifficultyInput) -> U256 {
    let elapsed = input.timestamp.saturating_sub(input.parent_timestamp) / 10;
    let factor = (1 - elapsed.min(i64::MAX as u64) as i64).max(-99);

    adjust(input.parent_difficulty, factor) + bomb(input.number / EXP_DIFF_PERIOD)
}

fn frontier_difficulty(input: DifficultyInput) -> U256 {
    let elapsed = input.timestamp.saturating_sub(input.parent_timestamp);
    let factor = if elapsed < DURATION_LIMIT { 1 } else { -1 };

    let difficulty =
        adjust(input.parent_difficulty, factor) + bomb(input.number / EXP_DIFF_PERIOD);
    difficulty.max(U256::from(MINIMUM_DIFFICULTY))
}

/// `parent + parent / 2048 * factor`, floored at [`MINIMUM_DIFFICULTY`].
fn adjust(parent_difficulty: U256, factor: i64) -> U256 {
    let step = parent_difficulty / U256::from(DIFFICULTY_BOUND_DIVISOR);
    let change = step.saturating_mul(U256::from(factor.unsigned_abs()));
    let difficulty = if factor >= 0 {
        parent_difficulty.saturating_add(change)
    } else {
        parent_difficulty.saturating_sub(change)
    };
    difficulty.max(U256::from(MINIMUM_DIFFICULTY))
}

/// Exponential difficulty bomb: `2 ** (period - 2)` once more than one period has passed.
fn bomb(period: u64) -> U256 {
    if period > 1 {
        U256::from(1).checked_shl((period - 2) as usize).unwrap_or(U256::ZERO)
    } else {
        U256::ZERO
    }
}

/// Block rewards paid at the end of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRewards {
    /// Reward of the block's coinbase, including the per-ommer inclusion bonus.
    pub miner: U256,
    /// Reward of each ommer's coinbase.
    pub ommers: Vec<(Address, U256)>,
}

impl BlockRewards {
    /// Computes the rewards for `reward` wei per block. Returns `None` if `reward` is negative,
    /// which disables rewards.
    ///
    /// The miner receives `reward + ommers * reward / 32`, each ommer `(8 - delta) * reward / 8`.
    pub fn compute(reward: i64, ommers: &[Ommer]) -> Option<Self> {
        let reward = U256::from(u64::try_from(reward).ok()?);
        let per_ommer = reward >> 5;

        let mut miner = reward;
        let ommers = ommers
            .iter()
            .map(|ommer| {
                miner += per_ommer;
                let numerator = U256::from(8u64.saturating_sub(ommer.delta)) * reward;
                (ommer.address, numerator >> 3)
            })
            .collect();

        Some(Self { miner, ommers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChainConfig;
    use alloy_primitives::address;

    fn london() -> ChainConfig {
        ChainConfig::from_fork(EthereumHardfork::London, 1).unwrap()
    }

    #[test]
    fn test_base_fee_first_london_block() {
        let mut config = ChainConfig::from_fork(EthereumHardfork::Berlin, 1).unwrap();
        config.london_block = Some(10);
        let parent = ParentGas { base_fee: 7, gas_used: 0, gas_limit: 30_000_000 };
        assert_eq!(calc_base_fee(&config, 10, parent), INITIAL_BASE_FEE);
        assert_ne!(calc_base_fee(&config, 11, parent), INITIAL_BASE_FEE);
    }

    #[test]
    fn test_base_fee_adjustment() {
        let config = london();
        let at_target = ParentGas { base_fee: 1_000, gas_used: 15_000_000, gas_limit: 30_000_000 };
        assert_eq!(calc_base_fee(&config, 1, at_target), 1_000);

        let full = ParentGas { gas_used: 30_000_000, ..at_target };
        assert_eq!(calc_base_fee(&config, 1, full), 1_125);

        let empty = ParentGas { gas_used: 0, ..at_target };
        assert_eq!(calc_base_fee(&config, 1, empty), 875);

        // the increase is at least one wei
        let tiny = ParentGas { base_fee: 1, gas_used: 15_000_001, gas_limit: 30_000_000 };
        assert_eq!(calc_base_fee(&config, 1, tiny), 2);
    }

    #[test]
    fn test_excess_blob_gas() {
        let target = BlobParams::CANCUN.target_blob_gas();
        assert_eq!(calc_excess_blob_gas(Some(BlobParams::CANCUN), 0, target), 0);
        assert_eq!(calc_excess_blob_gas(Some(BlobParams::CANCUN), 10, target + 5), 15);
        assert_eq!(calc_excess_blob_gas(Some(BlobParams::CANCUN), 0, 0), 0);
        assert_eq!(calc_excess_blob_gas(None, 10, 5), 15);
    }

    #[test]
    fn test_blob_fee() {
        assert_eq!(calc_blob_fee(BlobParams::CANCUN, 0), 1);
        assert_eq!(calc_blob_fee(BlobParams::CANCUN, 2_314_057), 1);
        assert_eq!(calc_blob_fee(BlobParams::CANCUN, 2_314_058), 2);
        assert_eq!(calc_blob_fee(BlobParams::CANCUN, 10 * 1024 * 1024), 23);
    }

    #[test]
    fn test_fake_exponential() {
        for (factor, numerator, denominator, expected) in [
            (1u128, 0u128, 1u128, 1u128),
            (38493, 0, 1000, 38493),
            (0, 1234, 2345, 0),
            (1, 2, 1, 6),
            (1, 4, 2, 7),
            (1, 3, 1, 16),
            (1, 6, 2, 18),
            (1, 4, 1, 49),
            (1, 8, 2, 50),
            (10, 8, 2, 542),
            (11, 8, 2, 596),
            (1, 5, 1, 136),
            (1, 5, 2, 11),
            (2, 5, 2, 23),
        ] {
            assert_eq!(fake_exponential(factor, numerator, denominator), expected);
        }
    }

    #[test]
    fn test_frontier_difficulty() {
        let config = ChainConfig::frontier(1);
        let parent_difficulty = U256::from(1_000_000u64);
        let input = DifficultyInput {
            number: 1,
            timestamp: 10,
            parent_timestamp: 0,
            parent_difficulty,
            parent_uncle_hash: B256::ZERO,
        };
        assert_eq!(calc_difficulty(&config, input), U256::from(1_000_000u64 + 488));

        let slow = DifficultyInput { timestamp: 20, ..input };
        assert_eq!(calc_difficulty(&config, slow), U256::from(1_000_000u64 - 488));
    }

    #[test]
    fn test_homestead_difficulty() {
        let config = ChainConfig::from_fork(EthereumHardfork::Homestead, 1).unwrap();
        let input = DifficultyInput {
            number: 1,
            timestamp: 25,
            parent_timestamp: 0,
            parent_difficulty: U256::from(1_000_000u64),
            parent_uncle_hash: B256::ZERO,
        };
        // 1 - 25 / 10 = -1
        assert_eq!(calc_difficulty(&config, input), U256::from(1_000_000u64 - 488));
    }

    #[test]
    fn test_byzantium_difficulty_uncles_and_floor() {
        let config = ChainConfig::from_fork(EthereumHardfork::Byzantium, 1).unwrap();
        let input = DifficultyInput {
            number: 1,
            timestamp: 1,
            parent_timestamp: 0,
            parent_difficulty: U256::from(2_048_000u64),
            parent_uncle_hash: B256::ZERO,
        };
        assert_eq!(calc_difficulty(&config, input), U256::from(2_049_000u64));

        let with_uncles = DifficultyInput { parent_uncle_hash: B256::repeat_byte(1), ..input };
        assert_eq!(calc_difficulty(&config, with_uncles), U256::from(2_050_000u64));

        let empty_hash = DifficultyInput { parent_uncle_hash: EMPTY_OMMER_ROOT_HASH, ..input };
        assert_eq!(calc_difficulty(&config, empty_hash), U256::from(2_049_000u64));

        let floor = DifficultyInput {
            parent_difficulty: U256::from(MINIMUM_DIFFICULTY),
            timestamp: 10_000,
            ..input
        };
        assert_eq!(calc_difficulty(&config, floor), U256::from(MINIMUM_DIFFICULTY));
    }

    #[test]
    fn test_bomb_delay() {
        let config = ChainConfig::from_fork(EthereumHardfork::Byzantium, 1).unwrap();
        let input = DifficultyInput {
            number: BYZANTIUM_BOMB_DELAY + 3 * EXP_DIFF_PERIOD,
            timestamp: 9,
            parent_timestamp: 0,
            parent_difficulty: U256::from(2_048_000u64),
            parent_uncle_hash: B256::ZERO,
        };
        // factor 0, three bomb periods past the delay: 2 ** (3 - 2)
        assert_eq!(calc_difficulty(&config, input), U256::from(2_048_002u64));
    }

    #[test]
    fn test_block_rewards() {
        let ommers = [
            Ommer { delta: 1, address: address!("0x00000000000000000000000000000000000000aa") },
            Ommer { delta: 2, address: address!("0x00000000000000000000000000000000000000bb") },
        ];
        let rewards = BlockRewards::compute(32_000, &ommers).unwrap();
        assert_eq!(rewards.miner, U256::from(32_000 + 2 * 1_000));
        assert_eq!(rewards.ommers[0].1, U256::from(28_000));
        assert_eq!(rewards.ommers[1].1, U256::from(24_000));

        assert!(BlockRewards::compute(-1, &ommers).is_none());
        assert_eq!(BlockRewards::compute(0, &[]).unwrap().miner, U256::ZERO);
    }
}

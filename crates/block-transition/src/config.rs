use std::str::FromStr;

use alloy_hardforks::{EthereumHardfork, ForkCondition};
use alloy_primitives::{Address, BlockNumber, BlockTimestamp, ChainId, U256};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{dao, eip4844, requests::MAINNET_DEPOSIT_CONTRACT_ADDRESS},
    ConfigError,
};

/// Forks in activation order. [`EthereumHardfork::Dao`] is not part of the sequence, it is an
/// irregular state change configured separately.
pub const FORK_SEQUENCE: [EthereumHardfork; 17] = [
    EthereumHardfork::Frontier,
    EthereumHardfork::Homestead,
    EthereumHardfork::Tangerine,
    EthereumHardfork::SpuriousDragon,
    EthereumHardfork::Byzantium,
    EthereumHardfork::Constantinople,
    EthereumHardfork::Petersburg,
    EthereumHardfork::Istanbul,
    EthereumHardfork::MuirGlacier,
    EthereumHardfork::Berlin,
    EthereumHardfork::London,
    EthereumHardfork::ArrowGlacier,
    EthereumHardfork::GrayGlacier,
    EthereumHardfork::Paris,
    EthereumHardfork::Shanghai,
    EthereumHardfork::Cancun,
    EthereumHardfork::Prague,
];

/// Blob gas parameters of a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobParams {
    /// Target number of blobs per block.
    pub target: u64,
    /// Maximum number of blobs per block.
    pub max: u64,
    /// Controls the maximum rate of change of the blob base fee.
    pub base_fee_update_fraction: u64,
}

impl BlobParams {
    /// Blob parameters introduced in Cancun (EIP-4844).
    pub const CANCUN: Self = Self {
        target: eip4844::CANCUN_TARGET_BLOBS_PER_BLOCK,
        max: eip4844::CANCUN_MAX_BLOBS_PER_BLOCK,
        base_fee_update_fraction: eip4844::CANCUN_BLOB_BASE_FEE_UPDATE_FRACTION,
    };

    /// Blob parameters introduced in Prague (EIP-7691).
    pub const PRAGUE: Self = Self {
        target: eip4844::PRAGUE_TARGET_BLOBS_PER_BLOCK,
        max: eip4844::PRAGUE_MAX_BLOBS_PER_BLOCK,
        base_fee_update_fraction: eip4844::PRAGUE_BLOB_BASE_FEE_UPDATE_FRACTION,
    };

    /// Target blob gas per block.
    pub const fn target_blob_gas(&self) -> u64 {
        self.target * eip4844::GAS_PER_BLOB
    }

    /// Maximum blob gas per block.
    pub const fn max_blob_gas(&self) -> u64 {
        self.max * eip4844::GAS_PER_BLOB
    }
}

/// Per-fork blob parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobSchedule {
    /// Parameters from Cancun on.
    pub cancun: BlobParams,
    /// Parameters from Prague on.
    pub prague: BlobParams,
}

impl Default for BlobSchedule {
    fn default() -> Self {
        Self { cancun: BlobParams::CANCUN, prague: BlobParams::PRAGUE }
    }
}

/// Chain configuration: chain id, fork activations and the fork-specific parameters the
/// transition depends on.
///
/// The serialized form follows the genesis `config` section (`homesteadBlock`, `shanghaiTime`,
/// `terminalTotalDifficulty`, ...). Block-activated forks are keyed by number, forks from
/// Shanghai on by timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Chain id used for replay protection.
    pub chain_id: ChainId,
    /// Homestead activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homestead_block: Option<BlockNumber>,
    /// DAO hard fork block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dao_fork_block: Option<BlockNumber>,
    /// Whether this chain applies the DAO irregular state change.
    #[serde(default)]
    pub dao_fork_support: bool,
    /// Accounts drained into [`ChainConfig::dao_refund_contract`] at the DAO fork block.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dao_drain_list: Vec<Address>,
    /// Receiver of the drained DAO balances.
    #[serde(default = "default_dao_refund_contract")]
    pub dao_refund_contract: Address,
    /// Tangerine Whistle (EIP-150) activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip150_block: Option<BlockNumber>,
    /// Replay protection (EIP-155) activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip155_block: Option<BlockNumber>,
    /// Spurious Dragon (EIP-158) activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip158_block: Option<BlockNumber>,
    /// Byzantium activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byzantium_block: Option<BlockNumber>,
    /// Constantinople activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constantinople_block: Option<BlockNumber>,
    /// Petersburg activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub petersburg_block: Option<BlockNumber>,
    /// Istanbul activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istanbul_block: Option<BlockNumber>,
    /// Muir Glacier activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muir_glacier_block: Option<BlockNumber>,
    /// Berlin activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub berlin_block: Option<BlockNumber>,
    /// London activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub london_block: Option<BlockNumber>,
    /// Arrow Glacier activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrow_glacier_block: Option<BlockNumber>,
    /// Gray Glacier activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gray_glacier_block: Option<BlockNumber>,
    /// Block at which the network splits off at the merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_netsplit_block: Option<BlockNumber>,
    /// Shanghai activation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shanghai_time: Option<BlockTimestamp>,
    /// Cancun activation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancun_time: Option<BlockTimestamp>,
    /// Prague activation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prague_time: Option<BlockTimestamp>,
    /// Total difficulty at which the chain transitions to proof of stake. A value of zero means
    /// the chain is merged from genesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_total_difficulty: Option<U256>,
    /// EIP-6110 deposit contract.
    #[serde(default = "default_deposit_contract")]
    pub deposit_contract_address: Address,
    /// Blob parameters per fork.
    #[serde(default)]
    pub blob_schedule: BlobSchedule,
}

const fn default_dao_refund_contract() -> Address {
    dao::MAINNET_DAO_REFUND_CONTRACT
}

const fn default_deposit_contract() -> Address {
    MAINNET_DEPOSIT_CONTRACT_ADDRESS
}

impl ChainConfig {
    /// A configuration with no fork scheduled. Every fork reports
    /// [`ForkCondition::Never`] except Frontier.
    pub fn frontier(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            homestead_block: None,
            dao_fork_block: None,
            dao_fork_support: false,
            dao_drain_list: Vec::new(),
            dao_refund_contract: dao::MAINNET_DAO_REFUND_CONTRACT,
            eip150_block: None,
            eip155_block: None,
            eip158_block: None,
            byzantium_block: None,
            constantinople_block: None,
            petersburg_block: None,
            istanbul_block: None,
            muir_glacier_block: None,
            berlin_block: None,
            london_block: None,
            arrow_glacier_block: None,
            gray_glacier_block: None,
            merge_netsplit_block: None,
            shanghai_time: None,
            cancun_time: None,
            prague_time: None,
            terminal_total_difficulty: None,
            deposit_contract_address: MAINNET_DEPOSIT_CONTRACT_ADDRESS,
            blob_schedule: BlobSchedule::default(),
        }
    }

    /// A configuration where `fork` and every fork before it are active from genesis.
    pub fn from_fork(fork: EthereumHardfork, chain_id: ChainId) -> Result<Self, ConfigError> {
        let position = FORK_SEQUENCE
            .iter()
            .position(|candidate| *candidate == fork)
            .ok_or_else(|| ConfigError::UnknownFork(fork.to_string()))?;

        let mut config = Self::frontier(chain_id);
        for fork in &FORK_SEQUENCE[..=position] {
            config.activate_at_genesis(*fork);
        }
        Ok(config)
    }

    /// Parses a fork name and returns [`ChainConfig::from_fork`] for it.
    ///
    /// Besides the hardfork names, the names used by the reference test suites are accepted:
    /// `EIP150`, `EIP158`, `ConstantinopleFix` and `Merge`.
    pub fn from_fork_name(name: &str, chain_id: ChainId) -> Result<Self, ConfigError> {
        Self::from_fork(parse_fork_name(name)?, chain_id)
    }

    /// Mainnet fork schedule.
    ///
    /// The DAO drain list is not bundled. Supply it through
    /// [`ChainConfig::dao_drain_list`] to replay the DAO fork block.
    pub fn mainnet() -> Self {
        Self {
            homestead_block: Some(1_150_000),
            dao_fork_block: Some(dao::MAINNET_DAO_FORK_BLOCK),
            dao_fork_support: true,
            eip150_block: Some(2_463_000),
            eip155_block: Some(2_675_000),
            eip158_block: Some(2_675_000),
            byzantium_block: Some(4_370_000),
            constantinople_block: Some(7_280_000),
            petersburg_block: Some(7_280_000),
            istanbul_block: Some(9_069_000),
            muir_glacier_block: Some(9_200_000),
            berlin_block: Some(12_244_000),
            london_block: Some(12_965_000),
            arrow_glacier_block: Some(13_773_000),
            gray_glacier_block: Some(15_050_000),
            shanghai_time: Some(1_681_338_455),
            cancun_time: Some(1_710_338_135),
            prague_time: Some(1_746_612_311),
            terminal_total_difficulty: Some(U256::from(58_750_000_000_000_000_000_000_u128)),
            ..Self::frontier(1)
        }
    }

    fn activate_at_genesis(&mut self, fork: EthereumHardfork) {
        match fork {
            EthereumHardfork::Homestead => self.homestead_block = Some(0),
            EthereumHardfork::Tangerine => self.eip150_block = Some(0),
            EthereumHardfork::SpuriousDragon => {
                self.eip155_block = Some(0);
                self.eip158_block = Some(0);
            }
            EthereumHardfork::Byzantium => self.byzantium_block = Some(0),
            EthereumHardfork::Constantinople => self.constantinople_block = Some(0),
            EthereumHardfork::Petersburg => self.petersburg_block = Some(0),
            EthereumHardfork::Istanbul => self.istanbul_block = Some(0),
            EthereumHardfork::MuirGlacier => self.muir_glacier_block = Some(0),
            EthereumHardfork::Berlin => self.berlin_block = Some(0),
            EthereumHardfork::London => self.london_block = Some(0),
            EthereumHardfork::ArrowGlacier => self.arrow_glacier_block = Some(0),
            EthereumHardfork::GrayGlacier => self.gray_glacier_block = Some(0),
            EthereumHardfork::Paris => self.terminal_total_difficulty = Some(U256::ZERO),
            EthereumHardfork::Shanghai => self.shanghai_time = Some(0),
            EthereumHardfork::Cancun => self.cancun_time = Some(0),
            EthereumHardfork::Prague => self.prague_time = Some(0),
            _ => {}
        }
    }

    /// Whether the chain has been proof of stake since genesis, i.e. the terminal total
    /// difficulty is defined and zero.
    pub fn is_merged(&self) -> bool {
        self.terminal_total_difficulty.is_some_and(|ttd| ttd.is_zero())
    }

    /// Blob parameters in force at the given block, or `None` before Cancun.
    pub fn blob_params_at(
        &self,
        number: BlockNumber,
        timestamp: BlockTimestamp,
    ) -> Option<BlobParams> {
        if self.is_fork_active(EthereumHardfork::Prague, number, timestamp) {
            Some(self.blob_schedule.prague)
        } else if self.is_fork_active(EthereumHardfork::Cancun, number, timestamp) {
            Some(self.blob_schedule.cancun)
        } else {
            None
        }
    }
}

impl Hardforks for ChainConfig {
    fn fork_activation(&self, fork: EthereumHardfork) -> ForkCondition {
        let block = |number: Option<BlockNumber>| {
            number.map_or(ForkCondition::Never, ForkCondition::Block)
        };
        let time = |timestamp: Option<BlockTimestamp>| {
            timestamp.map_or(ForkCondition::Never, ForkCondition::Timestamp)
        };

        match fork {
            EthereumHardfork::Frontier => ForkCondition::Block(0),
            EthereumHardfork::Homestead => block(self.homestead_block),
            EthereumHardfork::Dao => block(self.dao_fork_block),
            EthereumHardfork::Tangerine => block(self.eip150_block),
            EthereumHardfork::SpuriousDragon => block(self.eip158_block),
            EthereumHardfork::Byzantium => block(self.byzantium_block),
            EthereumHardfork::Constantinople => block(self.constantinople_block),
            EthereumHardfork::Petersburg => block(self.petersburg_block),
            EthereumHardfork::Istanbul => block(self.istanbul_block),
            EthereumHardfork::MuirGlacier => block(self.muir_glacier_block),
            EthereumHardfork::Berlin => block(self.berlin_block),
            EthereumHardfork::London => block(self.london_block),
            EthereumHardfork::ArrowGlacier => block(self.arrow_glacier_block),
            EthereumHardfork::GrayGlacier => block(self.gray_glacier_block),
            EthereumHardfork::Paris => match self.terminal_total_difficulty {
                Some(total_difficulty) => ForkCondition::TTD {
                    activation_block_number: self.merge_netsplit_block.unwrap_or_default(),
                    fork_block: self.merge_netsplit_block,
                    total_difficulty,
                },
                None => ForkCondition::Never,
            },
            EthereumHardfork::Shanghai => time(self.shanghai_time),
            EthereumHardfork::Cancun => time(self.cancun_time),
            EthereumHardfork::Prague => time(self.prague_time),
            _ => ForkCondition::Never,
        }
    }
}

/// Fork activation queries. Implementors only provide [`Hardforks::fork_activation`].
#[auto_impl(&, Box, Arc)]
pub trait Hardforks {
    /// Retrieves the [`ForkCondition`] of `fork`. Unscheduled forks return
    /// [`ForkCondition::Never`].
    fn fork_activation(&self, fork: EthereumHardfork) -> ForkCondition;

    /// Returns `true` if `fork` is active at the given block number or timestamp.
    fn is_fork_active(
        &self,
        fork: EthereumHardfork,
        number: BlockNumber,
        timestamp: BlockTimestamp,
    ) -> bool {
        let condition = self.fork_activation(fork);
        condition.active_at_block(number) || condition.active_at_timestamp(timestamp)
    }

    /// Returns `true` if Homestead is active at the given block.
    fn is_homestead(&self, number: BlockNumber) -> bool {
        self.fork_activation(EthereumHardfork::Homestead).active_at_block(number)
    }

    /// Returns `true` if replay protection (EIP-155) is active at the given block.
    fn is_eip155(&self, number: BlockNumber) -> bool {
        self.fork_activation(EthereumHardfork::SpuriousDragon).active_at_block(number)
    }

    /// Returns `true` if empty-account pruning (EIP-158) is active at the given block.
    fn is_eip158(&self, number: BlockNumber) -> bool {
        self.fork_activation(EthereumHardfork::SpuriousDragon).active_at_block(number)
    }

    /// Returns `true` if Byzantium is active at the given block.
    fn is_byzantium(&self, number: BlockNumber) -> bool {
        self.fork_activation(EthereumHardfork::Byzantium).active_at_block(number)
    }

    /// Returns `true` if London is active at the given block.
    fn is_london(&self, number: BlockNumber) -> bool {
        self.fork_activation(EthereumHardfork::London).active_at_block(number)
    }

    /// Returns `true` if Shanghai is active at the given block.
    fn is_shanghai(&self, number: BlockNumber, timestamp: BlockTimestamp) -> bool {
        self.is_fork_active(EthereumHardfork::Shanghai, number, timestamp)
    }

    /// Returns `true` if Cancun is active at the given block.
    fn is_cancun(&self, number: BlockNumber, timestamp: BlockTimestamp) -> bool {
        self.is_fork_active(EthereumHardfork::Cancun, number, timestamp)
    }

    /// Returns `true` if Prague is active at the given block.
    fn is_prague(&self, number: BlockNumber, timestamp: BlockTimestamp) -> bool {
        self.is_fork_active(EthereumHardfork::Prague, number, timestamp)
    }
}

/// Parses a fork name, accepting the aliases used by the reference test suites.
pub fn parse_fork_name(name: &str) -> Result<EthereumHardfork, ConfigError> {
    let fork = match name.to_ascii_lowercase().as_str() {
        "eip150" | "tangerinewhistle" => EthereumHardfork::Tangerine,
        "eip158" => EthereumHardfork::SpuriousDragon,
        "constantinoplefix" => EthereumHardfork::Petersburg,
        "merge" => EthereumHardfork::Paris,
        _ => EthereumHardfork::from_str(name)
            .map_err(|_| ConfigError::UnknownFork(name.to_string()))?,
    };
    Ok(fork)
}

/// Configuration of one transition run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionConfig {
    /// Chain configuration.
    pub chain: ChainConfig,
    /// Block reward in wei. A negative value disables block and ommer rewards.
    #[serde(default)]
    pub reward: i64,
}

impl TransitionConfig {
    /// Creates a configuration with the given chain and block reward.
    pub const fn new(chain: ChainConfig, reward: i64) -> Self {
        Self { chain, reward }
    }

    /// Creates a configuration with rewards disabled.
    pub const fn without_rewards(chain: ChainConfig) -> Self {
        Self { chain, reward: -1 }
    }
}

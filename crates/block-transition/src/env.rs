use std::collections::BTreeMap;

use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Address, BlockNumber, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    calc_base_fee, calc_blob_fee, calc_difficulty, calc_excess_blob_gas, BlobParams, ChainConfig,
    DifficultyInput, Hardforks, ParentGas,
};

/// An ommer of the block: its depth relative to the block and its coinbase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ommer {
    /// Distance between the block and the ommer.
    #[serde(with = "alloy_serde::quantity")]
    pub delta: u64,
    /// Coinbase of the ommer.
    pub address: Address,
}

/// Block environment of a transition.
///
/// Parent fields are only used to derive the base fee, the difficulty and the blob gas fields
/// when those are not supplied directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEnv {
    /// Block coinbase.
    #[serde(rename = "currentCoinbase")]
    pub coinbase: Address,
    /// Block gas limit.
    #[serde(rename = "currentGasLimit", with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    /// Block number.
    #[serde(rename = "currentNumber", with = "alloy_serde::quantity")]
    pub number: u64,
    /// Block timestamp.
    #[serde(rename = "currentTimestamp", with = "alloy_serde::quantity")]
    pub timestamp: u64,
    /// Block difficulty. Pre-merge only.
    #[serde(rename = "currentDifficulty", default)]
    pub difficulty: Option<U256>,
    /// Block randomness (EIP-4399). Post-merge only.
    #[serde(rename = "currentRandom", default)]
    pub random: Option<U256>,
    /// Block base fee (EIP-1559).
    ///
    /// Bounded to `u64` like the header field it becomes. Larger values fail to parse.
    #[serde(
        rename = "currentBaseFee",
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_fee: Option<u64>,
    /// Excess blob gas of the block (EIP-4844).
    #[serde(
        rename = "currentExcessBlobGas",
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub excess_blob_gas: Option<u64>,
    /// Parent difficulty.
    #[serde(default)]
    pub parent_difficulty: Option<U256>,
    /// Parent base fee, bounded to `u64` like [`BlockEnv::base_fee`].
    #[serde(default, with = "alloy_serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub parent_base_fee: Option<u64>,
    /// Gas used by the parent block.
    #[serde(default, with = "alloy_serde::quantity")]
    pub parent_gas_used: u64,
    /// Gas limit of the parent block.
    #[serde(default, with = "alloy_serde::quantity")]
    pub parent_gas_limit: u64,
    /// Parent timestamp.
    #[serde(default, with = "alloy_serde::quantity")]
    pub parent_timestamp: u64,
    /// Parent ommer hash. The zero hash stands for "no ommers".
    #[serde(default)]
    pub parent_uncle_hash: B256,
    /// Parent excess blob gas.
    #[serde(default, with = "alloy_serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub parent_excess_blob_gas: Option<u64>,
    /// Blob gas used by the parent block.
    #[serde(default, with = "alloy_serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub parent_blob_gas_used: Option<u64>,
    /// Parent beacon block root (EIP-4788).
    #[serde(default)]
    pub parent_beacon_block_root: Option<B256>,
    /// Historical block hashes available to `BLOCKHASH`.
    #[serde(default, with = "block_hashes", skip_serializing_if = "Option::is_none")]
    pub block_hashes: Option<BTreeMap<BlockNumber, B256>>,
    /// Ommers of the block.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ommers: Vec<Ommer>,
    /// Beacon chain withdrawals (EIP-4895). `None` is distinct from an empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals: Option<Vec<Withdrawal>>,
}

/// Block hash tables keyed by hex or decimal block numbers.
mod block_hashes {
    use std::collections::BTreeMap;

    use alloy_primitives::{BlockNumber, B256, U64};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub(super) fn serialize<S: Serializer>(
        hashes: &Option<BTreeMap<BlockNumber, B256>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        hashes
            .as_ref()
            .map(|hashes| {
                hashes
                    .iter()
                    .map(|(number, hash)| (U64::from(*number), *hash))
                    .collect::<BTreeMap<_, _>>()
            })
            .serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BTreeMap<BlockNumber, B256>>, D::Error> {
        let hashes = Option::<BTreeMap<U64, B256>>::deserialize(deserializer)?;
        Ok(hashes
            .map(|hashes| hashes.into_iter().map(|(number, hash)| (number.to(), hash)).collect()))
    }
}

/// Error raised when the block environment is inconsistent with the chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// London is active but the base fee can not be derived.
    #[error("EIP-1559 config but missing 'parentBaseFee' in env section")]
    MissingParentBaseFee,
    /// Shanghai is active but no withdrawal list was supplied.
    #[error("Shanghai config but missing 'withdrawals' in env section")]
    MissingWithdrawals,
    /// The difficulty is missing and the parent difficulty to derive it from as well.
    #[error(
        "currentDifficulty was not provided, and cannot be calculated due to missing parentDifficulty"
    )]
    MissingParentDifficulty,
    /// The difficulty of the genesis block can not be derived.
    #[error("currentDifficulty needs to be provided for block number 0")]
    GenesisDifficulty,
    /// The difficulty can not be derived for a block that is not after its parent.
    #[error(
        "currentDifficulty cannot be calculated -- currentTime ({timestamp}) needs to be after parent time ({parent_timestamp})"
    )]
    TimestampNotAfterParent {
        /// Block timestamp.
        timestamp: u64,
        /// Parent timestamp.
        parent_timestamp: u64,
    },
    /// A merged chain requires the block randomness.
    #[error("post-merge requires currentRandom to be defined in env")]
    MissingRandom,
    /// A merged chain requires a zero difficulty.
    #[error("post-merge difficulty must be zero (or omitted) in env")]
    NonZeroDifficulty,
    /// The fork name is not known.
    #[error("unsupported fork: {0}")]
    UnknownFork(String),
}

/// Blob gas market of a block, established by the environment validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobGasInfo {
    /// Excess blob gas of the block.
    pub excess_blob_gas: u64,
    /// Price of one unit of blob gas.
    pub blob_base_fee: u128,
    /// Blob parameters of the active fork.
    pub params: BlobParams,
}

/// A [`BlockEnv`] that passed validation, with derived fields filled in.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Deref)]
pub struct ValidatedEnv {
    #[deref]
    env: BlockEnv,
    blob_gas: Option<BlobGasInfo>,
}

impl ValidatedEnv {
    /// Validates `env` against `chain`, deriving the base fee, the difficulty and the blob gas
    /// market where they are not supplied.
    ///
    /// The rules run once, in a fixed order: base fee, withdrawals, merge and difficulty, blob
    /// gas. The first failing rule aborts validation.
    pub fn new(env: BlockEnv, chain: &ChainConfig) -> Result<Self, ConfigError> {
        let mut validated = Self { env, blob_gas: None };
        for rule in &ENV_RULES {
            if (rule.applies)(chain, &validated.env) {
                debug!(target: "block_transition::env", rule = rule.name, "applying env rule");
                (rule.apply)(&mut validated, chain)?;
            }
        }
        Ok(validated)
    }

    /// The validated block environment.
    pub const fn env(&self) -> &BlockEnv {
        &self.env
    }

    /// The blob gas market, if one could be established for this block.
    pub const fn blob_gas(&self) -> Option<BlobGasInfo> {
        self.blob_gas
    }

    /// Consumes the validated environment, returning the block environment.
    pub fn into_inner(self) -> BlockEnv {
        self.env
    }
}

/// One environment validation rule: a predicate deciding whether the rule applies to the block
/// and the action normalizing the environment.
struct EnvRule {
    name: &'static str,
    applies: fn(&ChainConfig, &BlockEnv) -> bool,
    apply: fn(&mut ValidatedEnv, &ChainConfig) -> Result<(), ConfigError>,
}

const ENV_RULES: [EnvRule; 4] = [
    EnvRule {
        name: "london-base-fee",
        applies: |chain, env| chain.is_london(env.number),
        apply: apply_base_fee,
    },
    EnvRule {
        name: "shanghai-withdrawals",
        applies: |chain, env| chain.is_shanghai(env.number, env.timestamp),
        apply: apply_withdrawals,
    },
    EnvRule { name: "merge-difficulty", applies: |_, _| true, apply: apply_merge },
    EnvRule { name: "blob-gas", applies: |_, _| true, apply: apply_blob_gas },
];

fn apply_base_fee(validated: &mut ValidatedEnv, chain: &ChainConfig) -> Result<(), ConfigError> {
    let env = &mut validated.env;
    if env.base_fee.is_some() {
        return Ok(());
    }
    let parent_base_fee = match env.parent_base_fee {
        Some(base_fee) if env.number != 0 => base_fee,
        _ => return Err(ConfigError::MissingParentBaseFee),
    };
    let base_fee = calc_base_fee(
        chain,
        env.number,
        ParentGas {
            base_fee: parent_base_fee,
            gas_used: env.parent_gas_used,
            gas_limit: env.parent_gas_limit,
        },
    );
    debug!(target: "block_transition::env", base_fee, "derived base fee");
    env.base_fee = Some(base_fee);
    Ok(())
}

fn apply_withdrawals(validated: &mut ValidatedEnv, _: &ChainConfig) -> Result<(), ConfigError> {
    if validated.env.withdrawals.is_none() {
        return Err(ConfigError::MissingWithdrawals);
    }
    Ok(())
}

fn apply_merge(validated: &mut ValidatedEnv, chain: &ChainConfig) -> Result<(), ConfigError> {
    let env = &mut validated.env;
    if chain.is_merged() {
        if env.random.is_none() {
            return Err(ConfigError::MissingRandom);
        }
        if env.difficulty.is_some_and(|difficulty| !difficulty.is_zero()) {
            return Err(ConfigError::NonZeroDifficulty);
        }
        env.difficulty = None;
        return Ok(());
    }

    if env.difficulty.is_some() {
        return Ok(());
    }
    let Some(parent_difficulty) = env.parent_difficulty else {
        return Err(ConfigError::MissingParentDifficulty);
    };
    if env.number == 0 {
        return Err(ConfigError::GenesisDifficulty);
    }
    if env.timestamp <= env.parent_timestamp {
        return Err(ConfigError::TimestampNotAfterParent {
            timestamp: env.timestamp,
            parent_timestamp: env.parent_timestamp,
        });
    }
    let difficulty = calc_difficulty(
        chain,
        DifficultyInput {
            number: env.number,
            timestamp: env.timestamp,
            parent_timestamp: env.parent_timestamp,
            parent_difficulty,
            parent_uncle_hash: env.parent_uncle_hash,
        },
    );
    debug!(target: "block_transition::env", %difficulty, "derived difficulty");
    env.difficulty = Some(difficulty);
    Ok(())
}

fn apply_blob_gas(validated: &mut ValidatedEnv, chain: &ChainConfig) -> Result<(), ConfigError> {
    let env = &validated.env;
    let Some(params) = chain.blob_params_at(env.number, env.timestamp) else {
        return Ok(());
    };
    let parent = (env.parent_excess_blob_gas, env.parent_blob_gas_used);
    let excess_blob_gas = match (env.excess_blob_gas, parent) {
        (Some(excess), _) => excess,
        (None, (Some(parent_excess), Some(parent_used))) => {
            calc_excess_blob_gas(Some(params), parent_excess, parent_used)
        }
        _ => return Ok(()),
    };
    let blob_base_fee = calc_blob_fee(params, excess_blob_gas);
    debug!(
        target: "block_transition::env",
        excess_blob_gas,
        blob_base_fee,
        "established blob gas market"
    );
    validated.blob_gas = Some(BlobGasInfo { excess_blob_gas, blob_base_fee, params });
    Ok(())
}

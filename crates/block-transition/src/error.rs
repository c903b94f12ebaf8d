use std::path::PathBuf;

use alloy_primitives::BlockNumber;

use crate::{ConfigError, DepositError, EvmError, SignerError, StateError, TxDecodeError};

/// Exit code of an EVM or state failure.
pub const EVM_ERROR_CODE: i32 = 2;
/// Exit code of an invalid configuration.
pub const CONFIG_ERROR_CODE: i32 = 3;
/// Exit code of a `BLOCKHASH` lookup outside the supplied hash table.
pub const MISSING_BLOCKHASH_ERROR_CODE: i32 = 4;
/// Exit code of a JSON decoding or encoding failure.
pub const JSON_ERROR_CODE: i32 = 10;
/// Exit code of a failed file operation.
pub const IO_ERROR_CODE: i32 = 11;
/// Exit code of an RLP decoding failure.
pub const RLP_ERROR_CODE: i32 = 12;

/// A fatal transition failure. Each variant maps to a stable exit code, see
/// [`TransitionError::code`].
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// The block environment is inconsistent with the chain configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A transaction queried a block hash missing from the supplied table.
    #[error("getHash({number}) invoked, blockhash for that block not provided")]
    MissingBlockhash {
        /// The queried block number.
        number: BlockNumber,
    },

    /// A transaction queried a block hash but no hash table was supplied.
    #[error("getHash({number}) invoked, no blockhashes provided")]
    NoBlockhashes {
        /// The queried block number.
        number: BlockNumber,
    },

    /// A pre-execution system call failed.
    #[error(transparent)]
    SystemCall(EvmError),

    /// The deposit logs of the block could not be parsed.
    #[error("could not parse requests logs: {0}")]
    DepositLogs(#[source] DepositError),

    /// The withdrawal request queue could not be processed.
    #[error("could not process withdrawal requests: {0}")]
    WithdrawalRequests(#[source] EvmError),

    /// The consolidation request queue could not be processed.
    #[error("could not process consolidation requests: {0}")]
    ConsolidationRequests(#[source] EvmError),

    /// The post-state could not be committed.
    #[error("could not commit state: {0}")]
    Commit(#[source] StateError),

    /// The committed post-state could not be reopened.
    #[error("could not reopen state: {0}")]
    Reopen(#[source] StateError),

    /// The pre-state could not be built.
    #[error("could not build pre-state: {0}")]
    PreState(#[source] StateError),

    /// A keyed transaction could not be signed.
    #[error("tx {index}: failed to sign tx: {source}")]
    Sign {
        /// Submission index of the transaction.
        index: usize,
        /// Underlying signing error.
        source: SignerError,
    },

    /// A transaction record could not be converted into a transaction.
    #[error("tx {index}: {source}")]
    TxInput {
        /// Submission index of the transaction.
        index: usize,
        /// Underlying conversion error.
        source: TxDecodeError,
    },

    /// An input document is not valid JSON for its type.
    #[error("failed unmarshaling {file}: {source}")]
    JsonParse {
        /// Name of the input.
        file: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// An output document could not be encoded.
    #[error("failed marshalling output: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// An input file could not be read.
    #[error("failed reading {file}: {source}", file = file.display())]
    InputLoad {
        /// Path of the input.
        file: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// An output file could not be written.
    #[error("failed writing output {file}: {source}", file = file.display())]
    OutputWrite {
        /// Path of the output.
        file: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The transaction stream is not a valid RLP list.
    #[error("rlp error: {0}")]
    Rlp(#[source] TxDecodeError),
}

impl TransitionError {
    /// Exit code of the error.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Config(_) => CONFIG_ERROR_CODE,
            Self::MissingBlockhash { .. } | Self::NoBlockhashes { .. } => {
                MISSING_BLOCKHASH_ERROR_CODE
            }
            Self::SystemCall(_) |
            Self::DepositLogs(_) |
            Self::WithdrawalRequests(_) |
            Self::ConsolidationRequests(_) |
            Self::Commit(_) |
            Self::Reopen(_) |
            Self::PreState(_) => EVM_ERROR_CODE,
            Self::Sign { .. } |
            Self::TxInput { .. } |
            Self::JsonParse { .. } |
            Self::JsonEncode(_) => JSON_ERROR_CODE,
            Self::InputLoad { .. } | Self::OutputWrite { .. } => IO_ERROR_CODE,
            Self::Rlp(_) => RLP_ERROR_CODE,
        }
    }

    /// Renders the error the way it is reported to the caller: `ERROR(<code>): <message>`.
    pub fn report(&self) -> String {
        format!("ERROR({}): {self}", self.code())
    }
}

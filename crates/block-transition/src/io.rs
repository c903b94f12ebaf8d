//! Loading of transition inputs and writing of outputs.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use alloy_primitives::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    Alloc, BlockEnv, CombinedOutput, ExecutionResult, TransactionInput, TransactionsInput,
    TransitionError, TransitionInput,
};

/// Combined input document read from stdin.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StdinInput {
    alloc: Alloc,
    env: BlockEnv,
    #[serde(default)]
    txs: Option<Vec<TransactionInput>>,
    #[serde(default)]
    txs_rlp: Option<Bytes>,
}

/// Load the pre-state allocation from a JSON file.
pub fn load_alloc(path: impl AsRef<Path>) -> Result<Alloc, TransitionError> {
    load_json(path.as_ref())
}

/// Load the block environment from a JSON file.
pub fn load_env(path: impl AsRef<Path>) -> Result<BlockEnv, TransitionError> {
    load_json(path.as_ref())
}

/// Load transactions from a file.
///
/// A file with the `rlp` extension holds a JSON string with the hex encoded RLP list of signed
/// transactions. Any other file holds a JSON list of transaction records.
pub fn load_transactions(path: impl AsRef<Path>) -> Result<TransactionsInput, TransitionError> {
    let path = path.as_ref();
    if path.extension().is_some_and(|extension| extension == "rlp") {
        Ok(TransactionsInput::Rlp(load_json(path)?))
    } else {
        Ok(TransactionsInput::Json(load_json(path)?))
    }
}

/// Load inputs from `reader` in the combined JSON format: `{"alloc", "env", "txs"}`, or
/// `"txsRlp"` in place of `"txs"`.
pub fn load_from_reader(mut reader: impl Read) -> Result<TransitionInput, TransitionError> {
    let mut buffer = String::new();
    reader
        .read_to_string(&mut buffer)
        .map_err(|source| TransitionError::InputLoad { file: PathBuf::from("stdin"), source })?;

    let input: StdinInput = serde_json::from_str(&buffer)
        .map_err(|source| TransitionError::JsonParse { file: "stdin".to_string(), source })?;

    let txs = match (input.txs_rlp, input.txs) {
        (Some(rlp), _) => TransactionsInput::Rlp(rlp),
        (None, txs) => TransactionsInput::Json(txs.unwrap_or_default()),
    };
    Ok(TransitionInput { alloc: input.alloc, env: input.env, txs })
}

/// Load inputs from stdin in the combined JSON format.
pub fn load_from_stdin() -> Result<TransitionInput, TransitionError> {
    load_from_reader(std::io::stdin().lock())
}

/// Write the post-state alloc to `output_alloc`, relative to `output_basedir` if given.
pub fn write_alloc_to_file(
    alloc: &Alloc,
    output_alloc: &str,
    output_basedir: Option<&Path>,
) -> Result<PathBuf, TransitionError> {
    write_json(&output_path(output_alloc, output_basedir), alloc)
}

/// Write the execution result to `output_result`, relative to `output_basedir` if given.
pub fn write_result_to_file(
    result: &ExecutionResult,
    output_result: &str,
    output_basedir: Option<&Path>,
) -> Result<PathBuf, TransitionError> {
    write_json(&output_path(output_result, output_basedir), result)
}

/// Write the RLP encoded block body, as a JSON hex string, to `output_body`, relative to
/// `output_basedir` if given.
pub fn write_body_to_file(
    body: &Bytes,
    output_body: &str,
    output_basedir: Option<&Path>,
) -> Result<PathBuf, TransitionError> {
    write_json(&output_path(output_body, output_basedir), body)
}

/// Write the combined output document to `writer`.
pub fn write_combined(
    mut writer: impl Write,
    output: &CombinedOutput,
) -> Result<(), TransitionError> {
    let json = serde_json::to_string_pretty(output).map_err(TransitionError::JsonEncode)?;
    writeln!(writer, "{json}")
        .map_err(|source| TransitionError::OutputWrite { file: PathBuf::from("stdout"), source })
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, TransitionError> {
    let content = fs::read_to_string(path)
        .map_err(|source| TransitionError::InputLoad { file: path.to_path_buf(), source })?;

    serde_json::from_str(&content)
        .map_err(|source| TransitionError::JsonParse { file: path.display().to_string(), source })
}

fn output_path(name: &str, basedir: Option<&Path>) -> PathBuf {
    basedir.map_or_else(|| PathBuf::from(name), |basedir| basedir.join(name))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf, TransitionError> {
    let json = serde_json::to_string_pretty(value).map_err(TransitionError::JsonEncode)?;

    // Create base directory if it doesn't exist
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|source| TransitionError::OutputWrite { file: parent.to_path_buf(), source })?;
    }

    fs::write(path, json)
        .map_err(|source| TransitionError::OutputWrite { file: path.to_path_buf(), source })?;

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenesisAccount;
    use alloy_primitives::{Address, U256};

    #[test]
    fn test_load_from_reader() {
        let input = r#"{
            "alloc": {
                "0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b": { "balance": "0x5ffd4878be161d74" }
            },
            "env": {
                "currentCoinbase": "0x2adc25665018aa1fe0e6bc666dac8fc2697ff9ba",
                "currentGasLimit": "0x1c9c380",
                "currentNumber": "0x1",
                "currentTimestamp": "0x3e8"
            },
            "txsRlp": "0xc0"
        }"#;
        let input = load_from_reader(input.as_bytes()).unwrap();
        assert_eq!(input.alloc.len(), 1);
        assert_eq!(input.env.gas_limit, 30_000_000);
        assert_eq!(input.txs, TransactionsInput::Rlp(Bytes::from_static(&[0xc0])));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_alloc(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.code(), 11);

        let path = dir.path().join("env.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_env(&path).unwrap_err();
        assert_eq!(err.code(), 10);

        let err = load_from_reader("[]".as_bytes()).unwrap_err();
        assert!(matches!(err, TransitionError::JsonParse { .. }));
    }

    #[test]
    fn test_base_fee_above_u64_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.json");
        let env = |base_fee: &str| {
            format!(
                r#"{{
                    "currentCoinbase": "0x2adc25665018aa1fe0e6bc666dac8fc2697ff9ba",
                    "currentGasLimit": "0x1c9c380",
                    "currentNumber": "0x1",
                    "currentTimestamp": "0x3e8",
                    "currentBaseFee": "{base_fee}",
                    "parentBaseFee": "{base_fee}"
                }}"#
            )
        };

        fs::write(&path, env("0xffffffffffffffff")).unwrap();
        let loaded = load_env(&path).unwrap();
        assert_eq!(loaded.base_fee, Some(u64::MAX));
        assert_eq!(loaded.parent_base_fee, Some(u64::MAX));

        fs::write(&path, env("0x10000000000000000")).unwrap();
        let err = load_env(&path).unwrap_err();
        assert!(matches!(err, TransitionError::JsonParse { .. }));
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_load_transactions_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let rlp = dir.path().join("txs.rlp");
        fs::write(&rlp, r#""0xc0""#).unwrap();
        assert_eq!(
            load_transactions(&rlp).unwrap(),
            TransactionsInput::Rlp(Bytes::from_static(&[0xc0]))
        );

        let json = dir.path().join("txs.json");
        fs::write(&json, "[]").unwrap();
        assert_eq!(load_transactions(&json).unwrap(), TransactionsInput::Json(Vec::new()));
    }

    #[test]
    fn test_write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let basedir = dir.path().join("out");
        let account = GenesisAccount::with_balance(U256::from(7)).nonce(1);
        let alloc = Alloc::from([(Address::with_last_byte(1), account)]);

        let path = write_alloc_to_file(&alloc, "alloc.json", Some(&basedir)).unwrap();
        assert_eq!(path, basedir.join("alloc.json"));
        assert_eq!(load_alloc(&path).unwrap(), alloc);

        let path = write_body_to_file(&Bytes::from_static(&[0xc0]), "body.json", Some(&basedir))
            .unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), r#""0xc0""#);
    }
}

//! Transaction inputs and the transaction source of the transition.
//!
//! Transactions arrive either as JSON records (possibly unsigned, with a secret key attached) or
//! as an RLP list of signed transactions. Both end up as a [`TransactionSource`] yielding one
//! transaction, or one decode error, per submitted item.

use alloy_consensus::{
    TxEip1559, TxEip2930, TxEip4844, TxEip4844Variant, TxEip7702, TxEnvelope, TxLegacy,
    TypedTransaction,
};
use alloy_eips::{
    eip2718::{Decodable2718, Eip2718Error},
    eip2930::AccessList,
    eip7702::SignedAuthorization,
};
use alloy_primitives::{Address, Bytes, ChainId, Signature, TxKind, B256, U256};
use alloy_rlp::Header;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{into_envelope, SignerError, TransactionSigner, TransitionError};

/// Error raised for a transaction that can not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxDecodeError {
    /// The transaction type is unknown.
    #[error("unsupported transaction type: {0}")]
    UnsupportedType(u8),
    /// A field required by the transaction type is missing.
    #[error("missing required field '{0}' in transaction")]
    MissingField(&'static str),
    /// A field does not fit its consensus type.
    #[error("invalid value for field '{0}' in transaction")]
    InvalidField(&'static str),
    /// The RLP structure is malformed.
    #[error("rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// The EIP-2718 envelope is malformed.
    #[error("{0}")]
    Eip2718(String),
}

impl From<Eip2718Error> for TxDecodeError {
    fn from(err: Eip2718Error) -> Self {
        Self::Eip2718(err.to_string())
    }
}

/// A transaction record of the JSON input.
///
/// A record whose `v`, `r` and `s` are all zero is unsigned and is signed with `secretKey`
/// before execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    /// Transaction type (0=Legacy, 1=EIP-2930, 2=EIP-1559, 3=EIP-4844, 4=EIP-7702).
    #[serde(rename = "type", default, with = "alloy_serde::quantity::opt")]
    pub tx_type: Option<u8>,
    /// Chain id.
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub chain_id: Option<ChainId>,
    /// Transaction nonce.
    #[serde(with = "alloy_serde::quantity")]
    pub nonce: u64,
    /// Gas price (legacy, EIP-2930).
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub gas_price: Option<u128>,
    /// Maximum fee per gas (EIP-1559).
    #[serde(default, alias = "gasFeeCap", with = "alloy_serde::quantity::opt")]
    pub max_fee_per_gas: Option<u128>,
    /// Maximum priority fee per gas (EIP-1559).
    #[serde(default, alias = "gasTipCap", with = "alloy_serde::quantity::opt")]
    pub max_priority_fee_per_gas: Option<u128>,
    /// Gas limit.
    #[serde(default, with = "alloy_serde::quantity")]
    pub gas: u64,
    /// Recipient, `None` for contract creation.
    #[serde(default)]
    pub to: Option<Address>,
    /// Transferred value.
    #[serde(default)]
    pub value: U256,
    /// Call data or init code.
    #[serde(default, alias = "data")]
    pub input: Bytes,
    /// Access list (EIP-2930).
    #[serde(default)]
    pub access_list: Option<AccessList>,
    /// Authorization list (EIP-7702).
    #[serde(default)]
    pub authorization_list: Option<Vec<SignedAuthorization>>,
    /// Maximum fee per blob gas (EIP-4844).
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub max_fee_per_blob_gas: Option<u128>,
    /// Blob versioned hashes (EIP-4844).
    #[serde(default)]
    pub blob_versioned_hashes: Vec<B256>,
    /// Signature `v`.
    #[serde(default)]
    pub v: U256,
    /// Signature parity of a typed transaction. Takes precedence over `v`.
    #[serde(default, rename = "yParity", with = "alloy_serde::quantity::opt")]
    pub y_parity: Option<u64>,
    /// Signature `r`.
    #[serde(default)]
    pub r: U256,
    /// Signature `s`.
    #[serde(default)]
    pub s: U256,
    /// Secret key signing an unsigned record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<B256>,
    /// Whether an unsigned legacy record is signed with replay protection. Defaults to `true`.
    #[serde(default = "default_protected")]
    pub protected: bool,
}

const fn default_protected() -> bool {
    true
}

impl TransactionInput {
    /// Returns `true` if the record carries no signature.
    pub fn is_unsigned(&self) -> bool {
        self.v.is_zero()
            && self.y_parity.unwrap_or_default() == 0
            && self.r.is_zero()
            && self.s.is_zero()
    }

    /// Converts the record into a transaction with its optional key.
    pub fn into_tx_with_key(self) -> Result<TxWithKey, TxDecodeError> {
        let signature = (!self.is_unsigned()).then(|| self.signature()).transpose()?;
        let tx = self.typed_transaction()?;
        Ok(TxWithKey { tx, signature, key: self.secret_key, protected: self.protected })
    }

    fn signature(&self) -> Result<Signature, TxDecodeError> {
        let v: u64 = self.v.try_into().map_err(|_| TxDecodeError::InvalidField("v"))?;
        let y_parity = match self.tx_type.unwrap_or_default() {
            // EIP-155: v = chain_id * 2 + 35 + y_parity, otherwise v = 27 + y_parity
            0 if v >= 35 => (v - 35) % 2 == 1,
            0 => v == 28,
            _ => match self.y_parity {
                Some(parity @ (0 | 1)) if v == 0 || v == parity => parity == 1,
                Some(_) => return Err(TxDecodeError::InvalidField("yParity")),
                None => v == 1,
            },
        };
        Ok(Signature::new(self.r, self.s, y_parity))
    }

    /// Chain id encoded in the `v` of a signed legacy record.
    fn legacy_chain_id(&self) -> Option<ChainId> {
        if self.is_unsigned() {
            return self.chain_id;
        }
        let v: u64 = self.v.try_into().ok()?;
        (v >= 35).then(|| (v - 35) / 2)
    }

    fn typed_transaction(&self) -> Result<TypedTransaction, TxDecodeError> {
        let kind = self.to.map_or(TxKind::Create, TxKind::Call);
        let chain_id = || self.chain_id.ok_or(TxDecodeError::MissingField("chainId"));
        let gas_price = || self.gas_price.ok_or(TxDecodeError::MissingField("gasPrice"));
        let max_fee_per_gas =
            || self.max_fee_per_gas.ok_or(TxDecodeError::MissingField("maxFeePerGas"));
        let max_priority_fee_per_gas = || {
            self.max_priority_fee_per_gas
                .ok_or(TxDecodeError::MissingField("maxPriorityFeePerGas"))
        };
        let to = || self.to.ok_or(TxDecodeError::MissingField("to"));
        let access_list = self.access_list.clone().unwrap_or_default();

        let tx = match self.tx_type.unwrap_or_default() {
            0 => TypedTransaction::Legacy(TxLegacy {
                chain_id: self.legacy_chain_id(),
                nonce: self.nonce,
                gas_price: gas_price()?,
                gas_limit: self.gas,
                to: kind,
                value: self.value,
                input: self.input.clone(),
            }),
            1 => TypedTransaction::Eip2930(TxEip2930 {
                chain_id: chain_id()?,
                nonce: self.nonce,
                gas_price: gas_price()?,
                gas_limit: self.gas,
                to: kind,
                value: self.value,
                access_list,
                input: self.input.clone(),
            }),
            2 => TypedTransaction::Eip1559(TxEip1559 {
                chain_id: chain_id()?,
                nonce: self.nonce,
                gas_limit: self.gas,
                max_fee_per_gas: max_fee_per_gas()?,
                max_priority_fee_per_gas: max_priority_fee_per_gas()?,
                to: kind,
                value: self.value,
                access_list,
                input: self.input.clone(),
            }),
            3 => TypedTransaction::Eip4844(TxEip4844Variant::TxEip4844(TxEip4844 {
                chain_id: chain_id()?,
                nonce: self.nonce,
                gas_limit: self.gas,
                max_fee_per_gas: max_fee_per_gas()?,
                max_priority_fee_per_gas: max_priority_fee_per_gas()?,
                to: to()?,
                value: self.value,
                access_list,
                blob_versioned_hashes: self.blob_versioned_hashes.clone(),
                max_fee_per_blob_gas: self
                    .max_fee_per_blob_gas
                    .ok_or(TxDecodeError::MissingField("maxFeePerBlobGas"))?,
                input: self.input.clone(),
            })),
            4 => TypedTransaction::Eip7702(TxEip7702 {
                chain_id: chain_id()?,
                nonce: self.nonce,
                gas_limit: self.gas,
                max_fee_per_gas: max_fee_per_gas()?,
                max_priority_fee_per_gas: max_priority_fee_per_gas()?,
                to: to()?,
                value: self.value,
                access_list,
                authorization_list: self
                    .authorization_list
                    .clone()
                    .ok_or(TxDecodeError::MissingField("authorizationList"))?,
                input: self.input.clone(),
            }),
            other => return Err(TxDecodeError::UnsupportedType(other)),
        };
        Ok(tx)
    }
}

/// A transaction with its signature, or with the key to sign it.
#[derive(Debug, Clone, PartialEq)]
pub struct TxWithKey {
    /// The transaction.
    pub tx: TypedTransaction,
    /// Signature, `None` if the transaction is unsigned.
    pub signature: Option<Signature>,
    /// Secret key of an unsigned transaction.
    pub key: Option<B256>,
    /// Whether signing applies replay protection.
    pub protected: bool,
}

impl TxWithKey {
    /// Returns the signed transaction, signing it with `signer` if it is unsigned and has a key.
    ///
    /// An unsigned transaction without a key is kept with an empty signature; sender recovery
    /// will reject it.
    pub fn into_signed<T: TransactionSigner>(self, signer: &T) -> Result<TxEnvelope, SignerError> {
        match (self.signature, self.key) {
            (Some(signature), _) => Ok(into_envelope(self.tx, signature)),
            (None, Some(key)) => signer.sign(self.tx, &key, self.protected),
            (None, None) => {
                Ok(into_envelope(self.tx, Signature::new(U256::ZERO, U256::ZERO, false)))
            }
        }
    }
}

/// Signs the unsigned keyed transactions of `txs`.
///
/// Signing failures are fatal: the whole batch is refused.
pub fn sign_transactions<T: TransactionSigner>(
    txs: Vec<TxWithKey>,
    signer: &T,
) -> Result<Vec<TxEnvelope>, TransitionError> {
    txs.into_iter()
        .enumerate()
        .map(|(index, tx)| {
            tx.into_signed(signer).map_err(|source| TransitionError::Sign { index, source })
        })
        .collect()
}

/// Transactions as supplied to a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionsInput {
    /// JSON records.
    Json(Vec<TransactionInput>),
    /// An RLP list of signed transactions.
    Rlp(Bytes),
}

impl Default for TransactionsInput {
    fn default() -> Self {
        Self::Json(Vec::new())
    }
}

impl TransactionsInput {
    /// Prepares the transaction source, signing keyed JSON records with `signer`.
    pub fn into_source<T: TransactionSigner>(
        self,
        signer: &T,
    ) -> Result<TransactionSource, TransitionError> {
        match self {
            Self::Json(records) => {
                let txs = records
                    .into_iter()
                    .enumerate()
                    .map(|(index, record)| {
                        record
                            .into_tx_with_key()
                            .map_err(|source| TransitionError::TxInput { index, source })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TransactionSource::decoded(sign_transactions(txs, signer)?))
            }
            Self::Rlp(data) => TransactionSource::rlp(data).map_err(TransitionError::Rlp),
        }
    }
}

/// A sequence of submitted transactions.
///
/// Yields one item per submitted transaction: the transaction or the reason it could not be
/// decoded.
#[derive(Debug)]
pub enum TransactionSource {
    /// Already decoded transactions.
    Decoded(std::vec::IntoIter<TxEnvelope>),
    /// An RLP encoded transaction list, decoded lazily.
    Rlp(RlpTxStream),
}

impl TransactionSource {
    /// A source over decoded transactions.
    pub fn decoded(txs: Vec<TxEnvelope>) -> Self {
        Self::Decoded(txs.into_iter())
    }

    /// A source over an RLP list of transactions. Fails if `data` is not an RLP list.
    pub fn rlp(data: impl Into<Bytes>) -> Result<Self, TxDecodeError> {
        RlpTxStream::new(data.into()).map(Self::Rlp)
    }
}

impl Iterator for TransactionSource {
    type Item = Result<TxEnvelope, TxDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Decoded(txs) => txs.next().map(Ok),
            Self::Rlp(stream) => stream.next(),
        }
    }
}

/// Lazily decodes the items of an RLP transaction list.
///
/// An item that is well framed but not a valid transaction yields an error and decoding
/// continues with the next item. A malformed item header ends the stream after the error.
#[derive(Debug)]
pub struct RlpTxStream {
    payload: Bytes,
    offset: usize,
    done: bool,
}

impl RlpTxStream {
    /// Validates the outer list header of `data`.
    pub fn new(data: Bytes) -> Result<Self, TxDecodeError> {
        let mut buf = &data[..];
        let header = Header::decode(&mut buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString.into());
        }
        if header.payload_length != buf.len() {
            return Err(alloy_rlp::Error::UnexpectedLength.into());
        }
        let start = data.len() - buf.len();
        debug!(
            target: "block_transition::source",
            bytes = header.payload_length,
            "opened rlp transaction list"
        );
        Ok(Self { payload: data.slice(start..), offset: 0, done: false })
    }

    fn next_item(&mut self) -> Result<TxEnvelope, TxDecodeError> {
        let remaining = self.payload.slice(self.offset..);
        let length = match Header::decode(&mut &remaining[..]) {
            Ok(header) if header.length_with_payload() <= remaining.len() => {
                header.length_with_payload()
            }
            Ok(_) => {
                self.done = true;
                return Err(alloy_rlp::Error::InputTooShort.into());
            }
            Err(err) => {
                self.done = true;
                return Err(err.into());
            }
        };
        self.offset += length;

        let mut buf = &remaining[..length];
        let tx = TxEnvelope::network_decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength.into());
        }
        Ok(tx)
    }
}

impl Iterator for RlpTxStream {
    type Item = Result<TxEnvelope, TxDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.payload.len() {
            return None;
        }
        Some(self.next_item())
    }
}

/// Encodes transactions as an RLP list, the block body format.
pub fn encode_transactions(txs: &[TxEnvelope]) -> Bytes {
    let mut out = Vec::new();
    alloy_rlp::encode_list::<_, TxEnvelope>(txs, &mut out);
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ForkSigner;
    use alloy_primitives::{address, b256};

    const KEY: B256 = b256!("0x45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8");

    fn record() -> TransactionInput {
        TransactionInput {
            nonce: 0,
            gas_price: Some(10),
            gas: 21_000,
            to: Some(address!("0x0000000000000000000000000000000000000aaa")),
            value: U256::from(1),
            secret_key: Some(KEY),
            protected: true,
            ..Default::default()
        }
    }

    fn signed(count: u64) -> Vec<TxEnvelope> {
        let signer = ForkSigner::latest(1);
        (0..count)
            .map(|nonce| {
                let record = TransactionInput { nonce, ..record() };
                record.into_tx_with_key().unwrap().into_signed(&signer).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_json_record() {
        let record: TransactionInput = serde_json::from_str(
            r#"{
                "gas": "0x5208",
                "gasPrice": "0xa",
                "nonce": "0x0",
                "to": "0x0000000000000000000000000000000000000aaa",
                "value": "0x1",
                "input": "0x",
                "v": "0x0",
                "r": "0x0",
                "s": "0x0",
                "secretKey": "0x45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8"
            }"#,
        )
        .unwrap();
        assert!(record.is_unsigned());
        assert!(record.protected);
        assert_eq!(record.gas_price, Some(10));

        let tx = record.into_tx_with_key().unwrap();
        assert_eq!(tx.signature, None);
        assert_eq!(tx.key, Some(KEY));
    }

    #[test]
    fn test_typed_record_requires_fields() {
        let record = TransactionInput { tx_type: Some(2), ..record() };
        assert_eq!(record.into_tx_with_key().unwrap_err(), TxDecodeError::MissingField("chainId"));

        let record = TransactionInput { tx_type: Some(9), ..self::record() };
        assert_eq!(record.into_tx_with_key().unwrap_err(), TxDecodeError::UnsupportedType(9));
    }

    #[test]
    fn test_typed_record_y_parity() {
        let typed = |v: u64, y_parity: Option<u64>| TransactionInput {
            tx_type: Some(2),
            chain_id: Some(1),
            gas_price: None,
            max_fee_per_gas: Some(10),
            max_priority_fee_per_gas: Some(1),
            v: U256::from(v),
            y_parity,
            r: U256::from(1),
            s: U256::from(1),
            secret_key: None,
            ..record()
        };

        let record: TransactionInput = serde_json::from_value(serde_json::json!({
            "type": "0x2",
            "chainId": "0x1",
            "nonce": "0x0",
            "gas": "0x5208",
            "maxFeePerGas": "0xa",
            "maxPriorityFeePerGas": "0x1",
            "yParity": "0x1",
            "r": "0x1",
            "s": "0x1"
        }))
        .unwrap();
        assert_eq!(record.y_parity, Some(1));
        assert!(!record.is_unsigned());
        assert!(record.into_tx_with_key().unwrap().signature.unwrap().v());

        assert!(typed(1, Some(1)).into_tx_with_key().unwrap().signature.unwrap().v());
        assert!(!typed(0, Some(0)).into_tx_with_key().unwrap().signature.unwrap().v());
        assert!(typed(1, None).into_tx_with_key().unwrap().signature.unwrap().v());
        assert_eq!(
            typed(1, Some(0)).into_tx_with_key().unwrap_err(),
            TxDecodeError::InvalidField("yParity")
        );
        assert_eq!(
            typed(0, Some(2)).into_tx_with_key().unwrap_err(),
            TxDecodeError::InvalidField("yParity")
        );
    }

    #[test]
    fn test_signed_legacy_record_chain_id_from_v() {
        let record = TransactionInput {
            v: U256::from(37),
            r: U256::from(1),
            s: U256::from(1),
            secret_key: None,
            ..record()
        };
        let tx = record.into_tx_with_key().unwrap();
        let TypedTransaction::Legacy(legacy) = &tx.tx else { unreachable!() };
        assert_eq!(legacy.chain_id, Some(1));
        assert_eq!(tx.signature.map(|signature| signature.v()), Some(false));
    }

    #[test]
    fn test_decoded_source() {
        let txs = signed(2);
        let source = TransactionSource::decoded(txs.clone());
        let decoded: Vec<_> = source.map(Result::unwrap).collect();
        assert_eq!(decoded, txs);
    }

    #[test]
    fn test_rlp_source() {
        let txs = signed(3);
        let body = encode_transactions(&txs);
        let decoded: Vec<_> = TransactionSource::rlp(body).unwrap().map(Result::unwrap).collect();
        assert_eq!(decoded, txs);
    }

    #[test]
    fn test_rlp_source_bad_item_is_skipped() {
        let txs = signed(2);
        let mut first = Vec::new();
        alloy_rlp::Encodable::encode(&txs[0], &mut first);
        let mut second = Vec::new();
        alloy_rlp::Encodable::encode(&txs[1], &mut second);
        // a well framed list that is not a transaction
        let bad = [0xc2, 0x01, 0x02];

        let mut payload = first;
        payload.extend_from_slice(&bad);
        payload.extend_from_slice(&second);
        let mut data = Vec::new();
        Header { list: true, payload_length: payload.len() }.encode(&mut data);
        data.extend_from_slice(&payload);

        let items: Vec<_> = TransactionSource::rlp(data).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &txs[0]);
        assert!(items[1].is_err());
        assert_eq!(items[2].as_ref().unwrap(), &txs[1]);
    }

    #[test]
    fn test_rlp_source_requires_list() {
        assert!(TransactionSource::rlp(vec![0x82, 0x01, 0x02]).is_err());
        assert!(TransactionSource::rlp(Vec::<u8>::new()).is_err());
        assert_eq!(TransactionSource::rlp(vec![0xc0]).unwrap().count(), 0);
    }

    #[test]
    fn test_sign_failure_is_fatal() {
        let txs = vec![
            record().into_tx_with_key().unwrap(),
            TransactionInput { secret_key: Some(B256::ZERO), ..record() }
                .into_tx_with_key()
                .unwrap(),
        ];
        let err = sign_transactions(txs, &ForkSigner::latest(1)).unwrap_err();
        assert!(matches!(err, TransitionError::Sign { index: 1, .. }));
        assert_eq!(err.code(), 10);
    }
}

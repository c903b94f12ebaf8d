use alloy_consensus::{
    TxEip1559, TxEip4844, TxEip4844Variant, TxEnvelope, TxLegacy, TypedTransaction,
};
use alloy_primitives::{b256, Address, Bytes, ChainId, TxKind, B256, U256};
use alloy_signer_local::PrivateKeySigner;

use crate::{ForkSigner, TransactionSigner};

/// Secret key of the well-known test account `0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b`.
pub const ALICE_KEY: B256 =
    b256!("0x45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8");

/// Secret key `1`, account `0x7e5f4552091a69125d5dfcb7b8c2659029395bdf`.
pub const BOB_KEY: B256 =
    b256!("0x0000000000000000000000000000000000000000000000000000000000000001");

/// Address of the account controlled by `key`.
pub fn key_address(key: &B256) -> Address {
    PrivateKeySigner::from_bytes(key).expect("valid test key").address()
}

/// Signs `tx` with `key`, replay protected on `chain_id`.
pub fn sign_tx(tx: TypedTransaction, key: &B256, chain_id: ChainId) -> TxEnvelope {
    ForkSigner::latest(chain_id).sign(tx, key, true).expect("signable test transaction")
}

/// A legacy value transfer with a 21000 gas limit.
pub fn legacy_transfer(nonce: u64, to: Address, value: U256, gas_price: u128) -> TypedTransaction {
    TypedTransaction::Legacy(TxLegacy {
        nonce,
        gas_price,
        gas_limit: 21_000,
        to: TxKind::Call(to),
        value,
        ..Default::default()
    })
}

/// A legacy call of `to` with `input` and `gas_limit`.
pub fn legacy_call(
    nonce: u64,
    to: Address,
    input: Bytes,
    gas_limit: u64,
    gas_price: u128,
) -> TypedTransaction {
    TypedTransaction::Legacy(TxLegacy {
        nonce,
        gas_price,
        gas_limit,
        to: TxKind::Call(to),
        input,
        ..Default::default()
    })
}

/// An EIP-1559 value transfer with a 21000 gas limit.
pub fn eip1559_transfer(
    chain_id: ChainId,
    nonce: u64,
    to: Address,
    value: U256,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
) -> TypedTransaction {
    TypedTransaction::Eip1559(TxEip1559 {
        chain_id,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        to: TxKind::Call(to),
        value,
        ..Default::default()
    })
}

/// An EIP-4844 transaction carrying `blobs` blobs.
pub fn blob_tx(
    chain_id: ChainId,
    nonce: u64,
    to: Address,
    blobs: usize,
    max_fee_per_gas: u128,
) -> TypedTransaction {
    TypedTransaction::Eip4844(TxEip4844Variant::TxEip4844(TxEip4844 {
        chain_id,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas,
        max_priority_fee_per_gas: 0,
        to,
        blob_versioned_hashes: (0..blobs).map(|i| B256::with_last_byte(i as u8 + 1)).collect(),
        max_fee_per_blob_gas: max_fee_per_gas,
        ..Default::default()
    }))
}

//! Sender recovery and signing of keyed transactions.

use alloy_consensus::{
    transaction::SignerRecoverable, SignableTransaction, Signed, Transaction, TxEip4844Variant,
    TxEnvelope, TxType, TypedTransaction,
};
use alloy_hardforks::EthereumHardfork;
use alloy_primitives::{Address, BlockNumber, BlockTimestamp, ChainId, Signature, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use auto_impl::auto_impl;

use crate::{ChainConfig, Hardforks};

/// Error raised when a sender can not be recovered or a transaction can not be signed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The transaction type is not active, or can not be signed as requested.
    #[error("transaction type not supported: {0}")]
    TxTypeNotSupported(u8),
    /// The transaction is signed for another chain.
    #[error("invalid chain id for signer: have {have} want {want}")]
    InvalidChainId {
        /// Chain id of the transaction.
        have: ChainId,
        /// Chain id of the signer.
        want: ChainId,
    },
    /// The signature does not yield a sender.
    #[error("invalid transaction v, r, s values")]
    InvalidSignature,
    /// The secret key is invalid or signing failed.
    #[error("{0}")]
    Signing(String),
}

/// Signer collaborator of the transition.
#[auto_impl(&, Box, Arc)]
pub trait TransactionSigner {
    /// Recovers the sender of `tx`.
    fn recover_sender(&self, tx: &TxEnvelope) -> Result<Address, SignerError>;

    /// Signs `tx` with the secret `key`.
    ///
    /// A `protected` legacy transaction is signed with the signer's chain id (EIP-155), an
    /// unprotected one without. Typed transactions are always protected.
    fn sign(
        &self,
        tx: TypedTransaction,
        key: &B256,
        protected: bool,
    ) -> Result<TxEnvelope, SignerError>;
}

/// A signer enforcing the rules of the forks active at one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkSigner {
    chain_id: ChainId,
    homestead: bool,
    eip155: bool,
    berlin: bool,
    london: bool,
    cancun: bool,
    prague: bool,
}

impl ForkSigner {
    /// Creates the signer of block `number` at `timestamp` on `chain`.
    pub fn new(chain: &ChainConfig, number: BlockNumber, timestamp: BlockTimestamp) -> Self {
        Self {
            chain_id: chain.chain_id,
            homestead: chain.is_homestead(number),
            eip155: chain.is_eip155(number),
            berlin: chain.is_fork_active(EthereumHardfork::Berlin, number, timestamp),
            london: chain.is_london(number),
            cancun: chain.is_cancun(number, timestamp),
            prague: chain.is_prague(number, timestamp),
        }
    }

    /// Creates a signer accepting every transaction type for `chain_id`.
    pub const fn latest(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            homestead: true,
            eip155: true,
            berlin: true,
            london: true,
            cancun: true,
            prague: true,
        }
    }

    /// Chain id of the signer.
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    const fn supports(&self, tx_type: TxType) -> bool {
        match tx_type {
            TxType::Legacy => true,
            TxType::Eip2930 => self.berlin,
            TxType::Eip1559 => self.london,
            TxType::Eip4844 => self.cancun,
            TxType::Eip7702 => self.prague,
        }
    }
}

impl TransactionSigner for ForkSigner {
    fn recover_sender(&self, tx: &TxEnvelope) -> Result<Address, SignerError> {
        let tx_type = tx.tx_type();
        if !self.supports(tx_type) {
            return Err(SignerError::TxTypeNotSupported(tx_type as u8));
        }
        if let Some(chain_id) = tx.chain_id() {
            // a replay protected legacy transaction is not valid before EIP-155
            if tx.is_legacy() && !self.eip155 {
                return Err(SignerError::InvalidSignature);
            }
            if chain_id != self.chain_id {
                return Err(SignerError::InvalidChainId { have: chain_id, want: self.chain_id });
            }
        }

        let sender =
            if self.homestead { tx.recover_signer() } else { tx.recover_signer_unchecked() };
        sender.map_err(|_| SignerError::InvalidSignature)
    }

    fn sign(
        &self,
        tx: TypedTransaction,
        key: &B256,
        protected: bool,
    ) -> Result<TxEnvelope, SignerError> {
        let signer =
            PrivateKeySigner::from_bytes(key).map_err(|err| SignerError::Signing(err.to_string()))?;

        let envelope = match tx {
            TypedTransaction::Legacy(mut tx) => {
                tx.chain_id = protected.then_some(self.chain_id);
                TxEnvelope::Legacy(sign_with(&signer, tx)?)
            }
            typed if !protected => {
                return Err(SignerError::TxTypeNotSupported(typed_tx_type(&typed)));
            }
            TypedTransaction::Eip2930(tx) => TxEnvelope::Eip2930(sign_with(&signer, tx)?),
            TypedTransaction::Eip1559(tx) => TxEnvelope::Eip1559(sign_with(&signer, tx)?),
            TypedTransaction::Eip4844(tx) => TxEnvelope::Eip4844(sign_with(&signer, tx)?),
            TypedTransaction::Eip7702(tx) => TxEnvelope::Eip7702(sign_with(&signer, tx)?),
        };
        Ok(envelope)
    }
}

fn sign_with<T: SignableTransaction<Signature>>(
    signer: &PrivateKeySigner,
    tx: T,
) -> Result<Signed<T>, SignerError> {
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|err| SignerError::Signing(err.to_string()))?;
    Ok(tx.into_signed(signature))
}

const fn typed_tx_type(tx: &TypedTransaction) -> u8 {
    let tx_type = match tx {
        TypedTransaction::Legacy(_) => TxType::Legacy,
        TypedTransaction::Eip2930(_) => TxType::Eip2930,
        TypedTransaction::Eip1559(_) => TxType::Eip1559,
        TypedTransaction::Eip4844(_) => TxType::Eip4844,
        TypedTransaction::Eip7702(_) => TxType::Eip7702,
    };
    tx_type as u8
}

/// Wraps a transaction and an existing signature into an envelope.
pub fn into_envelope(tx: TypedTransaction, signature: Signature) -> TxEnvelope {
    match tx {
        TypedTransaction::Legacy(tx) => TxEnvelope::Legacy(Signed::new_unhashed(tx, signature)),
        TypedTransaction::Eip2930(tx) => TxEnvelope::Eip2930(Signed::new_unhashed(tx, signature)),
        TypedTransaction::Eip1559(tx) => TxEnvelope::Eip1559(Signed::new_unhashed(tx, signature)),
        TypedTransaction::Eip4844(tx) => {
            TxEnvelope::Eip4844(Signed::<TxEip4844Variant>::new_unhashed(tx, signature))
        }
        TypedTransaction::Eip7702(tx) => TxEnvelope::Eip7702(Signed::new_unhashed(tx, signature)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{TxEip1559, TxLegacy};
    use alloy_primitives::{b256, uint, TxKind, U256};

    const KEY: B256 = b256!("0x45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8");

    fn legacy() -> TypedTransaction {
        TypedTransaction::Legacy(TxLegacy {
            gas_price: 10,
            gas_limit: 21_000,
            to: TxKind::Call(Address::with_last_byte(1)),
            ..Default::default()
        })
    }

    fn eip1559(chain_id: ChainId) -> TypedTransaction {
        TypedTransaction::Eip1559(TxEip1559 {
            chain_id,
            gas_limit: 21_000,
            max_fee_per_gas: 10,
            to: TxKind::Call(Address::with_last_byte(1)),
            ..Default::default()
        })
    }

    fn sender() -> Address {
        PrivateKeySigner::from_bytes(&KEY).unwrap().address()
    }

    fn chain(fork: EthereumHardfork) -> ChainConfig {
        ChainConfig::from_fork(fork, 1).unwrap()
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = ForkSigner::latest(1);

        let protected = signer.sign(legacy(), &KEY, true).unwrap();
        assert_eq!(protected.chain_id(), Some(1));
        assert_eq!(signer.recover_sender(&protected).unwrap(), sender());

        let unprotected = signer.sign(legacy(), &KEY, false).unwrap();
        assert_eq!(unprotected.chain_id(), None);
        assert_eq!(signer.recover_sender(&unprotected).unwrap(), sender());

        let typed = signer.sign(eip1559(1), &KEY, true).unwrap();
        assert_eq!(signer.recover_sender(&typed).unwrap(), sender());
    }

    #[test]
    fn test_unprotected_typed_tx_can_not_be_signed() {
        let err = ForkSigner::latest(1).sign(eip1559(1), &KEY, false).unwrap_err();
        assert_eq!(err, SignerError::TxTypeNotSupported(2));
    }

    #[test]
    fn test_invalid_key() {
        let err = ForkSigner::latest(1).sign(legacy(), &B256::ZERO, true).unwrap_err();
        assert!(matches!(err, SignerError::Signing(_)));
    }

    #[test]
    fn test_tx_type_must_be_active() {
        let tx = ForkSigner::latest(1).sign(eip1559(1), &KEY, true).unwrap();

        let berlin = ForkSigner::new(&chain(EthereumHardfork::Berlin), 1, 0);
        assert_eq!(berlin.recover_sender(&tx).unwrap_err(), SignerError::TxTypeNotSupported(2));

        let london = ForkSigner::new(&chain(EthereumHardfork::London), 1, 0);
        assert_eq!(london.recover_sender(&tx).unwrap(), sender());
    }

    #[test]
    fn test_chain_id_mismatch() {
        let tx = ForkSigner::latest(5).sign(legacy(), &KEY, true).unwrap();
        let err = ForkSigner::latest(1).recover_sender(&tx).unwrap_err();
        assert_eq!(err, SignerError::InvalidChainId { have: 5, want: 1 });
    }

    #[test]
    fn test_protected_legacy_before_eip155() {
        let tx = ForkSigner::latest(1).sign(legacy(), &KEY, true).unwrap();
        let homestead = ForkSigner::new(&chain(EthereumHardfork::Homestead), 1, 0);
        assert_eq!(homestead.recover_sender(&tx).unwrap_err(), SignerError::InvalidSignature);

        let tx = ForkSigner::latest(1).sign(legacy(), &KEY, false).unwrap();
        assert_eq!(homestead.recover_sender(&tx).unwrap(), sender());
    }

    #[test]
    fn test_high_s_rejected_from_homestead() {
        const SECP256K1N: U256 =
            uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

        let TxEnvelope::Legacy(signed) = ForkSigner::latest(1).sign(legacy(), &KEY, false).unwrap()
        else {
            unreachable!()
        };
        let signature = signed.signature();
        let malleable = Signature::new(signature.r(), SECP256K1N - signature.s(), !signature.v());
        let tx = TxEnvelope::Legacy(Signed::new_unhashed(signed.tx().clone(), malleable));

        let frontier = ForkSigner::new(&chain(EthereumHardfork::Frontier), 1, 0);
        assert_eq!(frontier.recover_sender(&tx).unwrap(), sender());

        let homestead = ForkSigner::new(&chain(EthereumHardfork::Homestead), 1, 0);
        assert_eq!(homestead.recover_sender(&tx).unwrap_err(), SignerError::InvalidSignature);
    }
}

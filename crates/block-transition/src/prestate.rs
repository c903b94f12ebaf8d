use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{StateDb, StateError};

/// Genesis-style account allocation (address -> account).
pub type Alloc = BTreeMap<Address, GenesisAccount>;

/// An account of an [`Alloc`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisAccount {
    /// Account balance in wei.
    #[serde(default)]
    pub balance: U256,
    /// Account nonce.
    #[serde(default, with = "alloy_serde::quantity", skip_serializing_if = "is_zero")]
    pub nonce: u64,
    /// Account code.
    #[serde(default, skip_serializing_if = "<[u8]>::is_empty")]
    pub code: Bytes,
    /// Account storage. Zero values are never stored.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<U256, U256>,
}

const fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl GenesisAccount {
    /// Creates an account holding `balance` wei.
    pub fn with_balance(balance: U256) -> Self {
        Self { balance, ..Default::default() }
    }

    /// Sets the account nonce.
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the account code.
    pub fn code(mut self, code: impl Into<Bytes>) -> Self {
        self.code = code.into();
        self
    }

    /// Sets a storage slot.
    pub fn storage_slot(mut self, key: U256, value: U256) -> Self {
        self.storage.insert(key, value);
        self
    }

    /// Whether the account is empty as defined by EIP-161: no code, zero nonce, zero balance.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }
}

/// Materializes `alloc` into the empty state `state`, commits it and returns a fresh view at
/// the committed root together with the root.
///
/// The pre-state is committed without empty-account pruning: every allocated account exists in
/// the pre-state, even an empty one.
pub fn make_pre_state<S: StateDb>(mut state: S, alloc: &Alloc) -> Result<(S, B256), StateError> {
    for (address, account) in alloc {
        state.create_account(*address);
        state.set_balance(*address, account.balance);
        state.set_nonce(*address, account.nonce);
        if !account.code.is_empty() {
            state.set_code(*address, account.code.clone());
        }
        for (key, value) in &account.storage {
            state.set_storage(*address, *key, *value);
        }
    }
    let root = state.commit(0, false, false)?;
    debug!(target: "block_transition::prestate", accounts = alloc.len(), %root, "built pre-state");

    Ok((state.reopen(root)?, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryState;
    use alloy_primitives::address;
    use alloy_trie::EMPTY_ROOT_HASH;

    #[test]
    fn test_empty_alloc_has_empty_root() {
        let (_, root) = make_pre_state(MemoryState::default(), &Alloc::new()).unwrap();
        assert_eq!(root, EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_pre_state_contains_alloc() {
        let sender = address!("0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b");
        let contract = address!("0x1000000000000000000000000000000000000000");
        let alloc = Alloc::from([
            (sender, GenesisAccount::with_balance(U256::from(1_000_000)).nonce(3)),
            (
                contract,
                GenesisAccount::default()
                    .code(vec![0x60, 0x00])
                    .storage_slot(U256::from(1), U256::from(42)),
            ),
        ]);

        let (state, root) = make_pre_state(MemoryState::default(), &alloc).unwrap();
        assert_ne!(root, EMPTY_ROOT_HASH);
        assert_eq!(state.balance(sender), U256::from(1_000_000));
        assert_eq!(state.nonce(sender), 3);
        assert_eq!(state.storage(contract, U256::from(1)), U256::from(42));
        assert_eq!(state.dump(), alloc);

        // the same allocation always commits to the same root
        let (_, again) = make_pre_state(MemoryState::default(), &alloc).unwrap();
        assert_eq!(root, again);
    }

    #[test]
    fn test_alloc_json() {
        let alloc: Alloc = serde_json::from_str(
            r#"{
                "0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b": { "balance": "0x5ffd4878be161d74", "nonce": "0xac" },
                "0x8a8eafb1cf62bfbeb1741769dae1a9dd47996192": { "balance": "0xfeedbead", "code": "0x6001", "storage": { "0x01": "0x02" } }
            }"#,
        )
        .unwrap();
        let account = &alloc[&address!("0x8a8eafb1cf62bfbeb1741769dae1a9dd47996192")];
        assert_eq!(account.code, Bytes::from_static(&[0x60, 0x01]));
        assert_eq!(account.storage[&U256::from(1)], U256::from(2));
        assert_eq!(alloc[&address!("0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b")].nonce, 0xac);
    }
}

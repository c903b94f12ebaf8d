//! Account state storage.
//!
//! [`StateDb`] is the storage collaborator of the transition: account reads and writes,
//! journaled snapshots, finalisation and commitment to a state root. [`MemoryState`] is an
//! in-memory implementation backed by a shared [`MemoryDatabase`] of committed states.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, RwLock},
};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::RlpEncodable;
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH, KECCAK_EMPTY};
use tracing::trace;

use crate::{Alloc, GenesisAccount};

/// Revision token returned by [`StateDb::snapshot`]. Tokens increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(usize);

/// Error raised by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// No committed state exists for the root.
    #[error("missing trie node for state root {0}")]
    MissingRoot(B256),
    /// An account holding storage was destructed but storage wiping is disabled.
    #[error("storage wiping of destructed account {0} is not allowed")]
    StorageWipe(Address),
    /// The shared database lock was poisoned by a panicking writer.
    #[error("state database lock poisoned")]
    Poisoned,
}

/// Account state with journaled snapshots.
///
/// Writes to a missing account create it. Snapshots are only valid until the next
/// [`StateDb::finalise`].
pub trait StateDb {
    /// Returns `true` if the account exists.
    fn exists(&self, address: Address) -> bool;

    /// Account balance, zero for a missing account.
    fn balance(&self, address: Address) -> U256;

    /// Account nonce, zero for a missing account.
    fn nonce(&self, address: Address) -> u64;

    /// Account code, empty for a missing account.
    fn code(&self, address: Address) -> Bytes;

    /// Storage value of `key`, zero if unset.
    fn storage(&self, address: Address, key: U256) -> U256;

    /// Creates the account if it does not exist.
    fn create_account(&mut self, address: Address);

    /// Adds `amount` wei to the account. A zero amount still touches the account.
    fn add_balance(&mut self, address: Address, amount: U256);

    /// Subtracts `amount` wei from the account, saturating at zero.
    fn sub_balance(&mut self, address: Address, amount: U256);

    /// Sets the account balance.
    fn set_balance(&mut self, address: Address, balance: U256);

    /// Sets the account nonce.
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// Sets the account code.
    fn set_code(&mut self, address: Address, code: Bytes);

    /// Sets a storage slot. Setting zero clears the slot.
    fn set_storage(&mut self, address: Address, key: U256, value: U256);

    /// Removes the account together with its storage.
    fn self_destruct(&mut self, address: Address);

    /// Takes a snapshot of the current state.
    fn snapshot(&mut self) -> SnapshotId;

    /// Reverts every change made since `id` was taken.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not returned by [`StateDb::snapshot`] since the last finalisation, or
    /// was already reverted.
    fn revert_to_snapshot(&mut self, id: SnapshotId);

    /// Ends the current transaction: invalidates snapshots and, if `delete_empty`, removes the
    /// touched accounts that are empty (EIP-158).
    fn finalise(&mut self, delete_empty: bool);

    /// Finalises and returns the current state root without committing.
    fn intermediate_root(&mut self, delete_empty: bool) -> B256;

    /// Finalises and commits the state of block `block_number`, returning the new root.
    ///
    /// With `no_storage_wiping` (Cancun), destructing an account that held committed storage is
    /// an error.
    fn commit(
        &mut self,
        block_number: u64,
        delete_empty: bool,
        no_storage_wiping: bool,
    ) -> Result<B256, StateError>;

    /// Opens a fresh view of the committed state at `root`, sharing the same backing database.
    fn reopen(&self, root: B256) -> Result<Self, StateError>
    where
        Self: Sized;

    /// Dumps every account of the current state.
    fn dump(&self) -> Alloc;
}

type Accounts = BTreeMap<Address, GenesisAccount>;

/// Committed states keyed by state root. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    states: Arc<RwLock<HashMap<B256, Arc<Accounts>>>>,
}

impl MemoryDatabase {
    fn load(&self, root: B256) -> Result<Arc<Accounts>, StateError> {
        if root == EMPTY_ROOT_HASH {
            return Ok(Arc::default());
        }
        let states = self.states.read().map_err(|_| StateError::Poisoned)?;
        states.get(&root).cloned().ok_or(StateError::MissingRoot(root))
    }

    fn store(&self, root: B256, accounts: Arc<Accounts>) -> Result<(), StateError> {
        let mut states = self.states.write().map_err(|_| StateError::Poisoned)?;
        states.insert(root, accounts);
        Ok(())
    }

    /// Number of committed states.
    pub fn len(&self) -> usize {
        self.states.read().map(|states| states.len()).unwrap_or_default()
    }

    /// Returns `true` if nothing was committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
enum JournalEntry {
    Created { address: Address },
    Balance { address: Address, prev: U256 },
    Nonce { address: Address, prev: u64 },
    Code { address: Address, prev: Bytes },
    Storage { address: Address, key: U256, prev: U256 },
    Destructed { address: Address, prev: GenesisAccount },
}

impl JournalEntry {
    const fn address(&self) -> Address {
        match self {
            Self::Created { address } |
            Self::Balance { address, .. } |
            Self::Nonce { address, .. } |
            Self::Code { address, .. } |
            Self::Storage { address, .. } |
            Self::Destructed { address, .. } => *address,
        }
    }

    fn revert(self, accounts: &mut Accounts) {
        match self {
            Self::Created { address } => {
                accounts.remove(&address);
            }
            Self::Destructed { address, prev } => {
                accounts.insert(address, prev);
            }
            Self::Balance { address, prev } => {
                if let Some(account) = accounts.get_mut(&address) {
                    account.balance = prev;
                }
            }
            Self::Nonce { address, prev } => {
                if let Some(account) = accounts.get_mut(&address) {
                    account.nonce = prev;
                }
            }
            Self::Code { address, prev } => {
                if let Some(account) = accounts.get_mut(&address) {
                    account.code = prev;
                }
            }
            Self::Storage { address, key, prev } => {
                if let Some(account) = accounts.get_mut(&address) {
                    set_slot(&mut account.storage, key, prev);
                }
            }
        }
    }
}

/// An in-memory [`StateDb`].
///
/// Committed states are kept in the shared [`MemoryDatabase`], so [`StateDb::reopen`] can open
/// any root committed through this state or one of its views.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    db: MemoryDatabase,
    committed: Arc<Accounts>,
    accounts: Accounts,
    journal: Vec<JournalEntry>,
    revisions: Vec<(SnapshotId, usize)>,
    next_revision: usize,
    wiped: BTreeSet<Address>,
}

impl MemoryState {
    /// Opens the committed state at `root` of `db`.
    pub fn open(db: MemoryDatabase, root: B256) -> Result<Self, StateError> {
        let committed = db.load(root)?;
        Ok(Self { accounts: committed.as_ref().clone(), committed, db, ..Default::default() })
    }

    /// The backing database.
    pub const fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn account_mut(&mut self, address: Address) -> &mut GenesisAccount {
        if !self.accounts.contains_key(&address) {
            self.journal.push(JournalEntry::Created { address });
        }
        self.accounts.entry(address).or_default()
    }
}

impl StateDb for MemoryState {
    fn exists(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    fn balance(&self, address: Address) -> U256 {
        self.accounts.get(&address).map(|account| account.balance).unwrap_or_default()
    }

    fn nonce(&self, address: Address) -> u64 {
        self.accounts.get(&address).map(|account| account.nonce).unwrap_or_default()
    }

    fn code(&self, address: Address) -> Bytes {
        self.accounts.get(&address).map(|account| account.code.clone()).unwrap_or_default()
    }

    fn storage(&self, address: Address, key: U256) -> U256 {
        self.accounts
            .get(&address)
            .and_then(|account| account.storage.get(&key).copied())
            .unwrap_or_default()
    }

    fn create_account(&mut self, address: Address) {
        self.account_mut(address);
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        let prev = self.account_mut(address).balance;
        self.set_balance(address, prev.saturating_add(amount));
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        let prev = self.account_mut(address).balance;
        self.set_balance(address, prev.saturating_sub(amount));
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        let account = self.account_mut(address);
        let prev = core::mem::replace(&mut account.balance, balance);
        self.journal.push(JournalEntry::Balance { address, prev });
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        let account = self.account_mut(address);
        let prev = core::mem::replace(&mut account.nonce, nonce);
        self.journal.push(JournalEntry::Nonce { address, prev });
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        let account = self.account_mut(address);
        let prev = core::mem::replace(&mut account.code, code);
        self.journal.push(JournalEntry::Code { address, prev });
    }

    fn set_storage(&mut self, address: Address, key: U256, value: U256) {
        let account = self.account_mut(address);
        let prev = set_slot(&mut account.storage, key, value);
        self.journal.push(JournalEntry::Storage { address, key, prev });
    }

    fn self_destruct(&mut self, address: Address) {
        if let Some(prev) = self.accounts.remove(&address) {
            self.journal.push(JournalEntry::Destructed { address, prev });
        }
    }

    fn snapshot(&mut self) -> SnapshotId {
        let id = SnapshotId(self.next_revision);
        self.next_revision += 1;
        self.revisions.push((id, self.journal.len()));
        id
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) {
        let Ok(position) = self.revisions.binary_search_by_key(&id, |(revision, _)| *revision)
        else {
            panic!("revision id {id:?} cannot be reverted");
        };
        let (_, journal_len) = self.revisions[position];
        self.revisions.truncate(position);

        for entry in self.journal.split_off(journal_len).into_iter().rev() {
            entry.revert(&mut self.accounts);
        }
    }

    fn finalise(&mut self, delete_empty: bool) {
        let touched: BTreeSet<Address> = self.journal.iter().map(JournalEntry::address).collect();
        for entry in &self.journal {
            if let JournalEntry::Destructed { address, .. } = entry {
                if self.committed.get(address).is_some_and(|account| !account.storage.is_empty()) {
                    self.wiped.insert(*address);
                }
            }
        }
        if delete_empty {
            for address in &touched {
                if self.accounts.get(address).is_some_and(GenesisAccount::is_empty) {
                    trace!(target: "block_transition::state", %address, "deleting empty account");
                    self.accounts.remove(address);
                }
            }
        }
        self.journal.clear();
        self.revisions.clear();
    }

    fn intermediate_root(&mut self, delete_empty: bool) -> B256 {
        self.finalise(delete_empty);
        state_root(&self.accounts)
    }

    fn commit(
        &mut self,
        block_number: u64,
        delete_empty: bool,
        no_storage_wiping: bool,
    ) -> Result<B256, StateError> {
        self.finalise(delete_empty);
        if no_storage_wiping {
            if let Some(address) = self.wiped.first() {
                return Err(StateError::StorageWipe(*address));
            }
        }

        let root = state_root(&self.accounts);
        let committed = Arc::new(self.accounts.clone());
        self.db.store(root, committed.clone())?;
        self.committed = committed;
        self.wiped.clear();

        trace!(target: "block_transition::state", block_number, %root, "committed state");
        Ok(root)
    }

    fn reopen(&self, root: B256) -> Result<Self, StateError> {
        Self::open(self.db.clone(), root)
    }

    fn dump(&self) -> Alloc {
        self.accounts.clone()
    }
}

/// Writes a storage slot, returning the previous value. Zero values are removed.
fn set_slot(storage: &mut BTreeMap<U256, U256>, key: U256, value: U256) -> U256 {
    let prev = if value.is_zero() { storage.remove(&key) } else { storage.insert(key, value) };
    prev.unwrap_or_default()
}

/// Account leaf of the state trie.
#[derive(RlpEncodable)]
struct TrieAccount {
    nonce: u64,
    balance: U256,
    storage_root: B256,
    code_hash: B256,
}

/// Computes the state root of `accounts`.
pub fn state_root(accounts: &Accounts) -> B256 {
    trie_root(accounts.iter().map(|(address, account)| {
        let leaf = TrieAccount {
            nonce: account.nonce,
            balance: account.balance,
            storage_root: storage_root(&account.storage),
            code_hash: if account.code.is_empty() {
                KECCAK_EMPTY
            } else {
                keccak256(&account.code)
            },
        };
        (keccak256(address), alloy_rlp::encode(leaf))
    }))
}

/// Computes the storage root of an account.
pub fn storage_root(storage: &BTreeMap<U256, U256>) -> B256 {
    trie_root(
        storage
            .iter()
            .filter(|(_, value)| !value.is_zero())
            .map(|(key, value)| (keccak256(key.to_be_bytes::<32>()), alloy_rlp::encode(value))),
    )
}

fn trie_root(leaves: impl IntoIterator<Item = (B256, Vec<u8>)>) -> B256 {
    let mut leaves: Vec<_> = leaves.into_iter().collect();
    leaves.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

    let mut builder = HashBuilder::default();
    for (key, value) in &leaves {
        builder.add_leaf(Nibbles::unpack(key), value);
    }
    builder.root()
}

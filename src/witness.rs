//! Record of the state keys touched by a single EVM execution.

use alloy_primitives::{Address, U256};
use std::collections::HashMap;

/// A single state key observed during execution.
///
/// A key without a slot refers to the account itself (balance, nonce, code
/// hash); a key with a slot refers to one storage slot of that account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WitnessKey {
    /// The account the read went to.
    pub address: Address,
    /// The storage slot, if the read was a storage read.
    pub slot: Option<U256>,
}

impl WitnessKey {
    /// Key for an account-level read.
    pub const fn account(address: Address) -> Self {
        Self { address, slot: None }
    }

    /// Key for a storage slot read.
    pub const fn storage(address: Address, slot: U256) -> Self {
        Self { address, slot: Some(slot) }
    }
}

/// The set of state keys touched by one execution, in first-touch order.
///
/// Each account key additionally carries a `code_touched` flag recording
/// whether the account's bytecode was read. Insertion is idempotent: the
/// first insertion fixes a key's position and `code_touched` is OR-ed across
/// the run.
///
/// Equality is structural and order-insensitive: two witnesses are equal when
/// they contain the same keys with the same flags, regardless of touch order.
#[derive(Debug, Clone, Default, Eq)]
pub struct Witness {
    entries: Vec<(WitnessKey, bool)>,
    index: HashMap<WitnessKey, usize>,
}

impl Witness {
    /// Records an account-level read.
    pub fn touch_account(&mut self, address: Address) {
        self.insert(WitnessKey::account(address), false);
    }

    /// Records a storage read. Slot reads also touch the account.
    pub fn touch_storage(&mut self, address: Address, slot: U256) {
        self.insert(WitnessKey::account(address), false);
        self.insert(WitnessKey::storage(address, slot), false);
    }

    /// Records a bytecode read of the given account.
    pub fn touch_code(&mut self, address: Address) {
        self.insert(WitnessKey::account(address), true);
    }

    fn insert(&mut self, key: WitnessKey, code_touched: bool) {
        if let Some(&at) = self.index.get(&key) {
            self.entries[at].1 |= code_touched;
        } else {
            self.index.insert(key, self.entries.len());
            self.entries.push((key, code_touched));
        }
    }

    /// Iterates the recorded keys in first-touch order together with their
    /// `code_touched` flag.
    pub fn iter(&self) -> impl Iterator<Item = (&WitnessKey, bool)> {
        self.entries.iter().map(|(key, code_touched)| (key, *code_touched))
    }

    /// Whether the bytecode of `address` was read during the run.
    pub fn code_touched(&self, address: Address) -> bool {
        self.index
            .get(&WitnessKey::account(address))
            .is_some_and(|&at| self.entries[at].1)
    }

    /// Number of distinct keys recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets all recorded keys.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

impl PartialEq for Witness {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(key, code_touched)| {
                other
                    .index
                    .get(key)
                    .is_some_and(|&at| other.entries[at].1 == *code_touched)
            })
    }
}

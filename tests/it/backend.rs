//! Canned-state backend recording every lookup it answers.

use alloy_consensus::Header;
use alloy_primitives::{keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use portal_evm::{Account, BackendError, StateBackend};
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
};

/// Header all tests execute against unless they need their own.
pub(crate) fn test_header() -> Header {
    Header {
        number: 22_000_000,
        timestamp: 1_750_000_000,
        gas_limit: 30_000_000,
        ..Default::default()
    }
}

/// Every lookup a [`MockBackend`] answered, in call order.
#[derive(Debug, Default, Clone)]
pub(crate) struct CallLog {
    pub(crate) accounts: Vec<Address>,
    pub(crate) storage: Vec<(Address, U256)>,
    pub(crate) code: Vec<Address>,
}

/// In-memory backend serving canned state.
///
/// Storage lookups answer `Some(0)` for unknown slots (an authoritative
/// zero), account and code lookups answer `None` for unknown addresses.
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    accounts: HashMap<Address, Account>,
    storage: HashMap<(Address, U256), U256>,
    code: HashMap<Address, Bytes>,
    fail_storage: bool,
    log: Mutex<CallLog>,
}

impl MockBackend {
    pub(crate) fn with_account(mut self, address: Address, balance: U256, nonce: u64) -> Self {
        let entry = self.accounts.entry(address).or_default();
        entry.balance = balance;
        entry.nonce = nonce;
        self
    }

    pub(crate) fn with_code(mut self, address: Address, code: Bytes) -> Self {
        self.accounts.entry(address).or_default().code_hash = keccak256(&code);
        self.code.insert(address, code);
        self
    }

    pub(crate) fn with_storage(mut self, address: Address, slot: U256, value: U256) -> Self {
        self.storage.insert((address, slot), value);
        self
    }

    /// Makes every storage lookup fail in transit.
    pub(crate) fn failing_storage(mut self) -> Self {
        self.fail_storage = true;
        self
    }

    pub(crate) fn log(&self) -> CallLog {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateBackend for MockBackend {
    async fn basic_account(
        &self,
        _header: &Header,
        address: Address,
    ) -> Result<Option<Account>, BackendError> {
        self.log.lock().unwrap().accounts.push(address);
        Ok(self.accounts.get(&address).copied())
    }

    async fn storage(
        &self,
        _header: &Header,
        address: Address,
        slot: U256,
    ) -> Result<Option<U256>, BackendError> {
        self.log.lock().unwrap().storage.push((address, slot));
        if self.fail_storage {
            return Err(BackendError::Transport("peer unavailable".to_string()));
        }
        Ok(Some(self.storage.get(&(address, slot)).copied().unwrap_or_default()))
    }

    async fn account_code(
        &self,
        _header: &Header,
        address: Address,
    ) -> Result<Option<Bytes>, BackendError> {
        self.log.lock().unwrap().code.push(address);
        Ok(self.code.get(&address).cloned())
    }
}

/// Builds an engine around the backend, keeping a handle for log inspection.
pub(crate) fn engine(backend: MockBackend) -> (portal_evm::PortalEvm, Arc<MockBackend>) {
    let backend = Arc::new(backend);
    (portal_evm::PortalEvm::new(backend.clone()), backend)
}

pub(crate) fn has_duplicates<T: Eq + Hash>(items: &[T]) -> bool {
    let mut seen = std::collections::HashSet::new();
    items.iter().any(|item| !seen.insert(item))
}

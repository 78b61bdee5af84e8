//! Asynchronous lookup interface for remote block state.

use alloy_consensus::{constants::EMPTY_ROOT_HASH, Header};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use revm::primitives::KECCAK_EMPTY;

/// Account state as reported by a backend lookup.
///
/// The hash fields describe what the account commits to, they are carried for
/// callers that want them; the engine itself never verifies them against the
/// fetched code or storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    /// Account balance in wei.
    pub balance: U256,
    /// Account nonce.
    pub nonce: u64,
    /// Hash of the account's bytecode.
    pub code_hash: B256,
    /// Root of the account's storage trie.
    pub storage_root: B256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: U256::ZERO,
            nonce: 0,
            code_hash: KECCAK_EMPTY,
            storage_root: EMPTY_ROOT_HASH,
        }
    }
}

/// Failure of a backend lookup in transit.
///
/// Distinct from an authoritative miss: a lookup that completes and reports
/// the item does not exist returns `Ok(None)` from the [`StateBackend`]
/// methods instead.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The lookup did not complete: timeout, disconnect, malformed response.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Backend specific failure that is neither a miss nor a plain transport
    /// problem.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Remote state lookups keyed by `(header, address[, slot])`.
///
/// Implementations must be idempotent, read-only and safe to invoke
/// concurrently for distinct keys; the engine never issues two concurrent
/// queries for the same key. All methods are cancel-safe: dropping the
/// returned future must not leave the backend in a broken state.
///
/// `Ok(None)` is an authoritative "not found". Transport problems surface as
/// [`BackendError`] and abort the surrounding call.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Fetches the account at `address` in the state committed to by `header`.
    async fn basic_account(
        &self,
        header: &Header,
        address: Address,
    ) -> Result<Option<Account>, BackendError>;

    /// Fetches a single storage slot of `address`.
    async fn storage(
        &self,
        header: &Header,
        address: Address,
        slot: U256,
    ) -> Result<Option<U256>, BackendError>;

    /// Fetches the bytecode of `address`.
    async fn account_code(
        &self,
        header: &Header,
        address: Address,
    ) -> Result<Option<Bytes>, BackendError>;
}

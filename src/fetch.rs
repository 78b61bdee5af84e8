//! Scheduling of backend lookups for the keys a witness names.

use crate::{
    backend::{Account, StateBackend},
    error::{CallError, StateItemKind},
    ledger::WitnessDb,
    witness::Witness,
};
use alloy_consensus::Header;
use alloy_primitives::{Address, Bytes, U256};
use futures_util::future::try_join_all;
use revm::primitives::KECCAK_EMPTY;
use std::{collections::HashSet, sync::Arc};
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// How the prefetch loop schedules the lookups a witness names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Fetch every missing key concurrently and wait for all of them before
    /// re-executing. Fastest convergence, may fetch keys a better-informed
    /// execution would never have touched.
    #[default]
    Optimistic,
    /// Block on the first missing key only and let the rest resolve in the
    /// background. Minimises wasted lookups when the witness would otherwise
    /// explode, at the cost of more execution rounds.
    Conservative,
}

/// One backend lookup the scheduler decided to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FetchKey {
    Account(Address),
    Storage(Address, U256),
    Code(Address),
}

/// Resolved value for a [`FetchKey`]. `None` payloads are authoritative
/// misses and are recorded as such.
#[derive(Debug)]
enum FetchOutcome {
    Account(Address, Option<Account>),
    Storage(Address, U256, Option<U256>),
    Code(Address, Option<Bytes>),
}

/// The not-yet-fetched keys named by a witness, in touch order.
#[derive(Debug)]
pub(crate) struct FetchPlan {
    keys: Vec<FetchKey>,
}

impl FetchPlan {
    /// Whether the witness named no key that still needs fetching.
    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of keys that still need fetching.
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Issues backend lookups for missing witness keys and tracks what has
/// already been fetched, so no key is queried twice within one call.
///
/// Background lookups spawned in conservative mode live in a [`JoinSet`] and
/// are aborted when the fetcher is dropped at the end of the call.
pub(crate) struct StateFetcher {
    backend: Arc<dyn StateBackend>,
    header: Arc<Header>,
    fetched_accounts: HashSet<Address>,
    fetched_storage: HashSet<(Address, U256)>,
    fetched_code: HashSet<Address>,
    in_flight: HashSet<FetchKey>,
    background: JoinSet<Result<FetchOutcome, CallError>>,
}

impl StateFetcher {
    pub(crate) fn new(backend: Arc<dyn StateBackend>, header: Arc<Header>) -> Self {
        Self {
            backend,
            header,
            fetched_accounts: HashSet::new(),
            fetched_storage: HashSet::new(),
            fetched_code: HashSet::new(),
            in_flight: HashSet::new(),
            background: JoinSet::new(),
        }
    }

    /// Fetches and installs the bytecode of `address` up front. The call
    /// target's code is always seeded this way since the call cannot begin
    /// without it.
    pub(crate) async fn seed_code(
        &mut self,
        address: Address,
        db: &mut WitnessDb,
    ) -> Result<(), CallError> {
        let outcome = fetch_key(&*self.backend, &self.header, FetchKey::Code(address)).await?;
        self.apply(outcome, db);
        Ok(())
    }

    /// Walks `witness` in touch order and collects every key that has not
    /// been fetched yet.
    ///
    /// Account keys schedule an account lookup, and additionally a code
    /// lookup when the run read the account's code. Storage keys schedule a
    /// slot lookup. The zero address is skipped.
    pub(crate) fn plan(&self, witness: &Witness) -> FetchPlan {
        let mut keys = Vec::new();
        for (key, code_touched) in witness.iter() {
            if key.address == Address::ZERO {
                continue;
            }
            match key.slot {
                None => {
                    if !self.fetched_accounts.contains(&key.address) {
                        keys.push(FetchKey::Account(key.address));
                    }
                    if code_touched && !self.fetched_code.contains(&key.address) {
                        keys.push(FetchKey::Code(key.address));
                    }
                }
                Some(slot) => {
                    if !self.fetched_storage.contains(&(key.address, slot)) {
                        keys.push(FetchKey::Storage(key.address, slot));
                    }
                }
            }
        }
        FetchPlan { keys }
    }

    /// Optimistic mode: issues every planned key concurrently and waits for
    /// all of them. The futures never outlive this call.
    pub(crate) async fn fetch_all(
        &mut self,
        plan: FetchPlan,
        db: &mut WitnessDb,
    ) -> Result<(), CallError> {
        trace!(target: "portal::evm::fetch", keys = plan.len(), "fetching plan concurrently");
        let backend = &*self.backend;
        let header = &self.header;
        let outcomes =
            try_join_all(plan.keys.iter().map(|&key| fetch_key(backend, header, key))).await?;
        for outcome in outcomes {
            self.apply(outcome, db);
        }
        Ok(())
    }

    /// Conservative mode: waits for the first planned key only. The remaining
    /// keys are started as background lookups; whatever completes while
    /// waiting is applied as well, and unfinished lookups persist into later
    /// rounds instead of being issued again.
    pub(crate) async fn fetch_first(
        &mut self,
        plan: FetchPlan,
        db: &mut WitnessDb,
    ) -> Result<(), CallError> {
        let mut keys = plan.keys.into_iter();
        let Some(blocking) = keys.next() else { return Ok(()) };
        for key in keys {
            self.spawn_background(key);
        }

        if self.in_flight.contains(&blocking) {
            // issued in an earlier round; drain completions until it lands
            while self.in_flight.contains(&blocking) {
                let joined = self
                    .background
                    .join_next()
                    .await
                    .expect("in-flight lookup missing from task set");
                match joined {
                    Ok(outcome) => self.apply(outcome?, db),
                    Err(err) if err.is_panic() => {
                        std::panic::resume_unwind(err.into_panic())
                    }
                    Err(_) => {}
                }
            }
        } else {
            let outcome = fetch_key(&*self.backend, &self.header, blocking).await?;
            self.apply(outcome, db);
        }
        Ok(())
    }

    fn spawn_background(&mut self, key: FetchKey) {
        if !self.in_flight.insert(key) {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let header = Arc::clone(&self.header);
        self.background
            .spawn(async move { fetch_key(&*backend, &header, key).await });
    }

    /// Writes a resolved lookup into the frame and marks its key fetched.
    fn apply(&mut self, outcome: FetchOutcome, db: &mut WitnessDb) {
        match outcome {
            FetchOutcome::Account(address, account) => {
                self.in_flight.remove(&FetchKey::Account(address));
                self.fetched_accounts.insert(address);
                // an authoritative miss reads as the zero-valued account;
                // writing the zeroes must not disturb already-seeded code
                let account = account.unwrap_or_default();
                db.set_balance(address, account.balance);
                db.set_nonce(address, account.nonce);
                if account.code_hash != KECCAK_EMPTY {
                    db.set_code_hash(address, account.code_hash);
                }
            }
            FetchOutcome::Storage(address, slot, value) => {
                self.in_flight.remove(&FetchKey::Storage(address, slot));
                self.fetched_storage.insert((address, slot));
                db.set_storage(address, slot, value.unwrap_or_default());
            }
            FetchOutcome::Code(address, code) => {
                self.in_flight.remove(&FetchKey::Code(address));
                self.fetched_code.insert(address);
                db.set_code(address, code.unwrap_or_default());
            }
        }
    }
}

async fn fetch_key(
    backend: &dyn StateBackend,
    header: &Header,
    key: FetchKey,
) -> Result<FetchOutcome, CallError> {
    match key {
        FetchKey::Account(address) => {
            backend.basic_account(header, address).await.map_err(|err| {
                debug!(target: "portal::evm::fetch", %address, %err, "account lookup failed");
                CallError::state_unavailable(StateItemKind::Account, err)
            })
            .map(|account| FetchOutcome::Account(address, account))
        }
        FetchKey::Storage(address, slot) => {
            backend.storage(header, address, slot).await.map_err(|err| {
                debug!(target: "portal::evm::fetch", %address, %slot, %err, "storage lookup failed");
                CallError::state_unavailable(StateItemKind::Slot, err)
            })
            .map(|value| FetchOutcome::Storage(address, slot, value))
        }
        FetchKey::Code(address) => {
            backend.account_code(header, address).await.map_err(|err| {
                debug!(target: "portal::evm::fetch", %address, %err, "code lookup failed");
                CallError::state_unavailable(StateItemKind::Code, err)
            })
            .map(|code| FetchOutcome::Code(address, code))
        }
    }
}

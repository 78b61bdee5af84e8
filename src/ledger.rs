//! In-memory state frame backing one call, with witness recording and
//! savepoints.

use crate::witness::Witness;
use alloy_primitives::{
    map::{HashMap, HashSet},
    Address, Bytes, B256, U256,
};
use revm::{
    bytecode::Bytecode,
    database_interface::DBErrorMarker,
    primitives::KECCAK_EMPTY,
    state::{Account as EvmAccount, AccountInfo},
    Database, DatabaseCommit,
};

/// Error type of the [`Database`] impl. Reads against a [`WitnessDb`] are
/// infallible: missing state is zero-valued, never an error.
#[derive(Debug, thiserror::Error)]
#[error("witness db access failed")]
pub struct LedgerError;

impl DBErrorMarker for LedgerError {}

/// Account fields resident in the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AccountEntry {
    balance: U256,
    nonce: u64,
    code_hash: B256,
}

impl Default for AccountEntry {
    fn default() -> Self {
        Self { balance: U256::ZERO, nonce: 0, code_hash: KECCAK_EMPTY }
    }
}

/// The mutable state of the frame. Cloned wholesale by savepoints.
#[derive(Debug, Clone, Default)]
struct Frame {
    /// `None` marks an account destroyed during a committed execution.
    accounts: HashMap<Address, Option<AccountEntry>>,
    storage: HashMap<Address, HashMap<U256, U256>>,
    contracts: HashMap<B256, Bytecode>,
    /// Which addresses are known to carry a given code hash. The interpreter
    /// resolves bytecode by hash, this index maps the read back to addresses
    /// so the witness can attribute it.
    code_owners: HashMap<B256, HashSet<Address>>,
    /// Hook for ancestor hashes, e.g. the post-Pectra history contract.
    /// Unpopulated by default: `BLOCKHASH` resolves to the zero hash.
    block_hashes: HashMap<u64, B256>,
}

/// Handle onto an open savepoint. Consumed by [`WitnessDb::rollback`] or
/// [`WitnessDb::commit`].
#[derive(Debug)]
#[must_use = "an open savepoint must be rolled back or committed"]
pub struct Savepoint(usize);

/// Throwaway state frame consulted by the interpreter during one call.
///
/// Reads never fail: an account, slot or bytecode that was not populated from
/// the backend reads as zero-valued, which is what lets speculative execution
/// proceed against an incomplete frame. Every read is recorded in the witness
/// so the caller can learn which keys the execution actually needed.
///
/// Savepoints snapshot all mutable state. The witness is deliberately outside
/// the transactional boundary: rolling back discards state writes but keeps
/// the record of what was read, since that record is the input to the next
/// prefetch round.
#[derive(Debug, Default)]
pub struct WitnessDb {
    state: Frame,
    snapshots: Vec<Frame>,
    witness: Witness,
}

impl WitnessDb {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_mut(&mut self, address: Address) -> &mut AccountEntry {
        self.state
            .accounts
            .entry(address)
            .or_insert_with(|| Some(AccountEntry::default()))
            .get_or_insert_with(AccountEntry::default)
    }

    /// Sets the balance of `address`, creating the account if needed.
    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.entry_mut(address).balance = balance;
    }

    /// Sets the nonce of `address`, creating the account if needed.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.entry_mut(address).nonce = nonce;
    }

    /// Records the code hash an account commits to without storing the code
    /// itself. A later execution that needs the code will surface the read in
    /// the witness, which is what schedules the actual code fetch.
    pub fn set_code_hash(&mut self, address: Address, code_hash: B256) {
        self.entry_mut(address).code_hash = code_hash;
        if code_hash != KECCAK_EMPTY {
            self.state.code_owners.entry(code_hash).or_default().insert(address);
        }
    }

    /// Stores the bytecode of `address`. The account's code hash is derived
    /// from the stored bytes so the interpreter resolves exactly this code.
    pub fn set_code(&mut self, address: Address, code: Bytes) {
        let bytecode = Bytecode::new_raw(code);
        let code_hash = if bytecode.is_empty() { KECCAK_EMPTY } else { bytecode.hash_slow() };
        self.entry_mut(address).code_hash = code_hash;
        if code_hash != KECCAK_EMPTY {
            self.state.code_owners.entry(code_hash).or_default().insert(address);
            self.state.contracts.insert(code_hash, bytecode);
        }
    }

    /// Sets one storage slot of `address`.
    pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) {
        self.state.storage.entry(address).or_default().insert(slot, value);
    }

    /// Installs an ancestor block hash for `BLOCKHASH` resolution.
    pub fn set_block_hash(&mut self, number: u64, hash: B256) {
        self.state.block_hashes.insert(number, hash);
    }

    /// Whether non-empty bytecode is recorded for `address`. Does not touch
    /// the witness.
    pub fn has_code(&self, address: Address) -> bool {
        self.state
            .accounts
            .get(&address)
            .and_then(|entry| entry.as_ref())
            .is_some_and(|entry| entry.code_hash != KECCAK_EMPTY)
    }

    /// The keys touched since the witness was last cleared, in touch order.
    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    /// Resets the witness without clearing any stored state.
    pub fn clear_witness(&mut self) {
        self.witness.clear();
    }

    /// Opens a savepoint capturing the current state of the frame.
    pub fn begin_savepoint(&mut self) -> Savepoint {
        self.snapshots.push(self.state.clone());
        Savepoint(self.snapshots.len() - 1)
    }

    /// Restores the frame to the state captured by `savepoint`, discarding it
    /// and any savepoint opened after it. The witness is left untouched.
    pub fn rollback(&mut self, savepoint: Savepoint) {
        self.state = self
            .snapshots
            .drain(savepoint.0..)
            .next()
            .expect("savepoint handle does not match an open savepoint");
    }

    /// Discards `savepoint` (and any savepoint opened after it), keeping all
    /// state written since it was opened.
    pub fn commit(&mut self, savepoint: Savepoint) {
        self.snapshots.truncate(savepoint.0);
    }
}

impl Database for WitnessDb {
    type Error = LedgerError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.witness.touch_account(address);
        let info = self
            .state
            .accounts
            .get(&address)
            .and_then(|entry| entry.as_ref())
            .map(|entry| AccountInfo {
                balance: entry.balance,
                nonce: entry.nonce,
                code_hash: entry.code_hash,
                // resolved through `code_by_hash` so the read is observable
                code: None,
            });
        Ok(info)
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == KECCAK_EMPTY {
            return Ok(Bytecode::new());
        }
        if let Some(owners) = self.state.code_owners.get(&code_hash) {
            for owner in owners {
                self.witness.touch_code(*owner);
            }
        }
        Ok(self.state.contracts.get(&code_hash).cloned().unwrap_or_else(Bytecode::new))
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.witness.touch_storage(address, index);
        let value = self
            .state
            .storage
            .get(&address)
            .and_then(|slots| slots.get(&index))
            .copied()
            .unwrap_or(U256::ZERO);
        Ok(value)
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        Ok(self.state.block_hashes.get(&number).copied().unwrap_or(B256::ZERO))
    }
}

impl DatabaseCommit for WitnessDb {
    fn commit(&mut self, changes: HashMap<Address, EvmAccount>) {
        for (address, account) in changes {
            if !account.is_touched() {
                continue;
            }
            if account.is_selfdestructed() {
                self.state.accounts.insert(address, None);
                self.state.storage.remove(&address);
                continue;
            }

            if let Some(code) = account.info.code.as_ref().filter(|code| !code.is_empty()) {
                let code_hash = code.hash_slow();
                self.state.code_owners.entry(code_hash).or_default().insert(address);
                self.state.contracts.insert(code_hash, code.clone());
                self.entry_mut(address).code_hash = code_hash;
            }

            let entry = self.entry_mut(address);
            entry.balance = account.info.balance;
            entry.nonce = account.info.nonce;

            let storage = self.state.storage.entry(address).or_default();
            if account.is_created() {
                storage.clear();
            }
            for (slot, value) in account.storage {
                storage.insert(slot, value.present_value());
            }
        }
    }
}

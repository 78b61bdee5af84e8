//! The prefetch loop and the public call entry points.

use crate::{
    backend::StateBackend,
    chainspec::{ChainSpec, NetworkId},
    constants::{EVM_CALL_GAS_CAP, EVM_CALL_LIMIT},
    error::CallError,
    estimate,
    evm::{self, CallResult, EvmEnv},
    fetch::{FetchMode, StateFetcher},
    ledger::WitnessDb,
    witness::Witness,
};
use alloy_consensus::Header;
use alloy_eips::eip2930::{AccessList, AccessListItem};
use alloy_primitives::{Address, TxKind, B256, U256};
use alloy_rpc_types_eth::{AccessListResult, TransactionRequest};
use revm::context::TxEnv;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};
use tracing::{debug, trace};

/// Executes EVM calls against a block whose state lives behind an
/// asynchronous, high-latency lookup backend.
///
/// The engine holds only immutable chain configuration and the backend
/// handle; every call owns a throwaway state frame, so concurrent calls on
/// separate tasks never share mutable state and nothing persists between
/// calls.
///
/// Execution works by fixed-point search: the interpreter is run against
/// whatever state is resident (missing state reads as zero-valued), the set
/// of keys it touched is collected, the missing ones are fetched
/// concurrently, and the call is re-executed until an execution touches only
/// keys that are already resident. That final execution saw exactly the right
/// state and its result is authoritative.
#[derive(Clone)]
pub struct PortalEvm {
    backend: Arc<dyn StateBackend>,
    chain: ChainSpec,
}

impl fmt::Debug for PortalEvm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalEvm").field("chain", &self.chain).finish_non_exhaustive()
    }
}

impl PortalEvm {
    /// Creates an engine for mainnet.
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self::with_network(backend, NetworkId::Mainnet)
    }

    /// Creates an engine for the given network.
    pub fn with_network(backend: Arc<dyn StateBackend>, network: NetworkId) -> Self {
        Self { backend, chain: network.into() }
    }

    /// Executes `request` against the state committed to by `header` and
    /// returns its raw output, gas usage and error, if any.
    ///
    /// Application-level reverts are reported inside the returned
    /// [`CallResult`]; `Err` means the call itself could not be carried out
    /// (invalid input, unreachable state, interpreter rejection).
    pub async fn call(
        &self,
        header: &Header,
        request: &TransactionRequest,
        mode: FetchMode,
    ) -> Result<CallResult, CallError> {
        let (env, tx) = self.prepare(header, request)?;
        let mut db = WitnessDb::new();
        self.run_prefetch(header, &mut db, &env, &tx, mode).await
    }

    /// Produces the EIP-2930 access list of `request` together with the gas
    /// the call uses once the list is attached.
    ///
    /// The list covers every address and storage slot the converged execution
    /// touched, except `request.from`; addresses and storage keys are sorted
    /// ascending by their big-endian byte representation.
    pub async fn create_access_list(
        &self,
        header: &Header,
        request: &TransactionRequest,
        mode: FetchMode,
    ) -> Result<AccessListResult, CallError> {
        let (env, tx) = self.prepare(header, request)?;
        let mut db = WitnessDb::new();

        // The converged result's gas does not reflect the access list
        // discount, only the witness matters here.
        self.run_prefetch(header, &mut db, &env, &tx, mode).await?;
        let access_list =
            access_list_from_witness(db.witness(), request.from.unwrap_or_default());

        // Re-execute with the list attached against the populated frame.
        let mut tx = tx;
        tx.access_list = access_list.clone();
        if tx.tx_type == 0 {
            tx.tx_type = 1;
        }
        let result = evm::execute(&mut db, &env, tx)?;

        Ok(AccessListResult {
            access_list,
            gas_used: U256::from(result.gas_used),
            error: result.error,
        })
    }

    /// Estimates the gas needed for `request` to succeed.
    ///
    /// The prefetch loop first makes the call's witness state resident, then
    /// a binary search over repeated executions finds the lowest sufficient
    /// gas limit.
    pub async fn estimate_gas(
        &self,
        header: &Header,
        request: &TransactionRequest,
        mode: FetchMode,
    ) -> Result<u64, CallError> {
        let (env, tx) = self.prepare(header, request)?;
        let mut db = WitnessDb::new();
        self.run_prefetch(header, &mut db, &env, &tx, mode).await?;
        estimate::estimate_gas_with(&mut db, &env, tx)
    }

    /// Validates the request and derives the execution environment. The
    /// target address is checked before the gas cap.
    fn prepare(
        &self,
        header: &Header,
        request: &TransactionRequest,
    ) -> Result<(EvmEnv, TxEnv), CallError> {
        let gas_limit = request.gas.unwrap_or(EVM_CALL_GAS_CAP);
        let env = EvmEnv::new(&self.chain, header);
        let tx = evm::build_tx_env(request, gas_limit)?;
        if gas_limit > EVM_CALL_GAS_CAP {
            return Err(CallError::GasCapExceeded);
        }
        Ok((env, tx))
    }

    /// Alternates execution and fetching until the witness stabilises, then
    /// returns the result of the last execution.
    async fn run_prefetch(
        &self,
        header: &Header,
        db: &mut WitnessDb,
        env: &EvmEnv,
        tx: &TxEnv,
        mode: FetchMode,
    ) -> Result<CallResult, CallError> {
        let mut fetcher =
            StateFetcher::new(Arc::clone(&self.backend), Arc::new(header.clone()));

        // The call cannot begin without the target's code, install it first.
        let TxKind::Call(to) = tx.kind else {
            return Err(CallError::ToAddressRequired);
        };
        fetcher.seed_code(to, db).await?;

        let mut last_witness = Witness::default();
        let mut last_result = CallResult::default();

        for call_count in 0..EVM_CALL_LIMIT {
            db.clear_witness();

            // Execute speculatively; the writes are discarded, the reads are
            // what this round is for.
            let savepoint = db.begin_savepoint();
            last_result = evm::execute_and_commit(db, env, tx.clone())?;
            db.rollback(savepoint);

            let witness = db.witness().clone();
            let plan = fetcher.plan(&witness);
            trace!(
                target: "portal::evm",
                call_count,
                witness_keys = witness.len(),
                pending = plan.len(),
                "executed speculative call"
            );

            let converged = match mode {
                // an unchanged witness proves the execution saw exactly the
                // state it needed
                FetchMode::Optimistic => witness == last_witness,
                // nothing left to fetch proves the same
                FetchMode::Conservative => plan.is_empty(),
            };
            if converged {
                debug!(target: "portal::evm", call_count, "witness converged");
                break;
            }
            last_witness = witness;

            match mode {
                FetchMode::Optimistic => fetcher.fetch_all(plan, db).await?,
                FetchMode::Conservative => fetcher.fetch_first(plan, db).await?,
            }
        }

        Ok(last_result)
    }
}

/// Groups the witness into an EIP-2930 access list, dropping `from` and
/// sorting addresses and storage keys by their big-endian byte order.
fn access_list_from_witness(witness: &Witness, from: Address) -> AccessList {
    let mut grouped: BTreeMap<Address, BTreeSet<B256>> = BTreeMap::new();
    for (key, _) in witness.iter() {
        if key.address == from {
            continue;
        }
        let slots = grouped.entry(key.address).or_default();
        if let Some(slot) = key.slot {
            slots.insert(B256::from(slot));
        }
    }
    AccessList(
        grouped
            .into_iter()
            .map(|(address, storage_keys)| AccessListItem {
                address,
                storage_keys: storage_keys.into_iter().collect(),
            })
            .collect(),
    )
}

//! Gas estimation against an already-populated frame.

use crate::{
    constants::{CALL_STIPEND_GAS, ESTIMATE_GAS_ERROR_RATIO, MIN_TRANSACTION_GAS},
    error::CallError,
    evm::{self, EvmEnv},
    ledger::WitnessDb,
};
use alloy_primitives::TxKind;
use revm::context::TxEnv;
use revm::context_interface::result::{EVMError, ExecutionResult};
use tracing::trace;

/// Finds the lowest gas limit under which `tx` succeeds, by binary search
/// over repeated executions against `db`.
///
/// The frame is expected to already hold the call's witness state; probes
/// with a lower gas limit only ever touch a subset of it, so the search
/// cannot discover new keys. `tx.gas_limit` is the upper bound of the search.
pub(crate) fn estimate_gas_with(
    db: &mut WitnessDb,
    env: &EvmEnv,
    tx: TxEnv,
) -> Result<u64, CallError> {
    let mut highest_gas_limit = tx.gas_limit;

    // A call to an account without code and without input is a plain
    // transfer. Probing with the minimum gas first short-circuits the search,
    // but only a successful probe is trusted since other field combinations
    // can still bump the cost.
    let is_basic_transfer = tx.data.is_empty()
        && matches!(tx.kind, TxKind::Call(to) if !db.has_code(to));
    if is_basic_transfer {
        let mut probe = tx.clone();
        probe.gas_limit = MIN_TRANSACTION_GAS;
        if let Ok(outcome) = evm::transact(db, env, probe) {
            if outcome.result.is_success() {
                return Ok(MIN_TRANSACTION_GAS);
            }
        }
    }

    // Execute once with the full limit; failure here is failure of the call
    // itself, not of a probe.
    let outcome = evm::transact(db, env, tx.clone())?;
    let (mut gas_used, gas_refunded) = match outcome.result {
        ExecutionResult::Success { gas_used, gas_refunded, .. } => (gas_used, gas_refunded),
        ExecutionResult::Revert { output, .. } => {
            let reason = alloy_sol_types::decode_revert_reason(output.as_ref())
                .unwrap_or_else(|| "execution reverted".to_string());
            return Err(CallError::EvmFailed(reason));
        }
        ExecutionResult::Halt { reason, .. } => {
            return Err(CallError::EvmFailed(format!("{reason:?}")));
        }
    };
    let mut lowest_gas_limit = gas_used.saturating_sub(1);

    // There is a good chance the call passes with the gas it used plus the
    // refund, adjusted by 64/63 for gas forwarding, so probe that first.
    let optimistic_gas_limit = (gas_used + gas_refunded + CALL_STIPEND_GAS) * 64 / 63;
    if optimistic_gas_limit < highest_gas_limit {
        let mut probe = tx.clone();
        probe.gas_limit = optimistic_gas_limit;
        match probe_limit(db, env, probe)? {
            ProbeOutcome::Success { gas_used: used } => {
                gas_used = used;
                highest_gas_limit = optimistic_gas_limit;
            }
            ProbeOutcome::Failure => lowest_gas_limit = optimistic_gas_limit,
        }
    }

    // Start near the estimate rather than in the middle of the range.
    let mut mid_gas_limit = std::cmp::min(
        gas_used * 3,
        ((highest_gas_limit as u128 + lowest_gas_limit as u128) / 2) as u64,
    );

    trace!(
        target: "portal::evm::estimate",
        highest_gas_limit, lowest_gas_limit, mid_gas_limit,
        "starting gas estimation binary search"
    );

    while lowest_gas_limit + 1 < highest_gas_limit {
        // stop once the remaining range no longer moves the estimate
        if (highest_gas_limit - lowest_gas_limit) as f64 / (highest_gas_limit as f64)
            < ESTIMATE_GAS_ERROR_RATIO
        {
            break;
        }

        let mut probe = tx.clone();
        probe.gas_limit = mid_gas_limit;
        match probe_limit(db, env, probe)? {
            ProbeOutcome::Success { .. } => highest_gas_limit = mid_gas_limit,
            ProbeOutcome::Failure => lowest_gas_limit = mid_gas_limit,
        }

        mid_gas_limit = ((highest_gas_limit as u128 + lowest_gas_limit as u128) / 2) as u64;
    }

    Ok(highest_gas_limit)
}

enum ProbeOutcome {
    Success { gas_used: u64 },
    Failure,
}

/// Runs one probe. A revert or halt at a reduced limit only means the limit
/// is infeasible, as does an up-front rejection of the transaction (e.g. the
/// intrinsic gas already exceeds the probed limit).
fn probe_limit(db: &mut WitnessDb, env: &EvmEnv, tx: TxEnv) -> Result<ProbeOutcome, CallError> {
    match evm::transact_raw(db, env, tx) {
        Ok(outcome) => match outcome.result {
            ExecutionResult::Success { gas_used, .. } => Ok(ProbeOutcome::Success { gas_used }),
            ExecutionResult::Revert { .. } | ExecutionResult::Halt { .. } => {
                Ok(ProbeOutcome::Failure)
            }
        },
        Err(EVMError::Transaction(_)) => Ok(ProbeOutcome::Failure),
        Err(err) => Err(CallError::EvmFailed(err.to_string())),
    }
}

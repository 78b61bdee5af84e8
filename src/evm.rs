//! Synchronous invocation of the interpreter against a [`WitnessDb`].

use crate::{
    chainspec::ChainSpec,
    error::CallError,
    ledger::{LedgerError, WitnessDb},
};
use alloy_consensus::Header;
use alloy_primitives::{Bytes, TxKind};
use alloy_rpc_types_eth::TransactionRequest;
use revm::{
    context::{BlockEnv, CfgEnv, TxEnv},
    context_interface::{
        block::BlobExcessGasAndPrice,
        result::{EVMError, ExecutionResult, ResultAndState},
    },
    handler::MainnetContext,
    primitives::hardfork::SpecId,
    Context, DatabaseCommit, ExecuteEvm, MainBuilder,
};

/// Outcome of a single EVM execution.
///
/// Application-level reverts and halts are reported through `error` with the
/// raw output attached; they are legal outcomes, not failures of the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallResult {
    /// Raw return data of the call.
    pub output: Bytes,
    /// Gas consumed by the execution.
    pub gas_used: u64,
    /// Revert reason or interpreter halt, `None` on success.
    pub error: Option<String>,
}

impl CallResult {
    /// Whether the execution completed without revert or halt.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The fixed per-call execution environment: chain config plus block context.
#[derive(Debug, Clone)]
pub(crate) struct EvmEnv {
    pub(crate) cfg: CfgEnv,
    pub(crate) block: BlockEnv,
}

impl EvmEnv {
    /// Builds the environment for executing calls against `header`.
    ///
    /// Checks that belong to consensus transaction validation (nonce,
    /// balance, base fee, EIP-3607, the block gas limit) are disabled the way
    /// RPC call handling does, so an unsigned request executes against
    /// whatever state is resident.
    pub(crate) fn new(chain: &ChainSpec, header: &Header) -> Self {
        let spec = chain.spec_id_at(header.timestamp);

        let mut cfg = CfgEnv::default();
        cfg.chain_id = chain.chain_id;
        cfg.spec = spec;
        cfg.disable_eip3607 = true;
        cfg.disable_base_fee = true;
        cfg.disable_nonce_check = true;
        cfg.disable_balance_check = true;
        cfg.disable_block_gas_limit = true;

        let block = BlockEnv {
            number: header.number,
            beneficiary: header.beneficiary,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
            basefee: header.base_fee_per_gas.unwrap_or_default(),
            difficulty: header.difficulty,
            prevrandao: Some(header.mix_hash),
            blob_excess_gas_and_price: Some(BlobExcessGasAndPrice::new(
                header.excess_blob_gas.unwrap_or_default(),
                spec.is_enabled_in(SpecId::PRAGUE),
            )),
        };

        Self { cfg, block }
    }
}

/// Derives the transaction environment from an unsigned call request.
///
/// `to` is required; the caller defaults to the zero address. The transaction
/// type follows from the populated fields, newest capability first.
pub(crate) fn build_tx_env(
    request: &TransactionRequest,
    gas_limit: u64,
) -> Result<TxEnv, CallError> {
    let to = match request.to {
        Some(TxKind::Call(to)) => to,
        _ => return Err(CallError::ToAddressRequired),
    };

    let blob_hashes = request
        .blob_versioned_hashes
        .clone()
        .or_else(|| {
            request.sidecar.as_ref().map(|sidecar| sidecar.versioned_hashes().collect())
        })
        .unwrap_or_default();

    let tx_type = if !blob_hashes.is_empty() {
        3
    } else if request.max_fee_per_gas.is_some() || request.max_priority_fee_per_gas.is_some() {
        2
    } else if request.access_list.is_some() {
        1
    } else {
        0
    };

    Ok(TxEnv {
        caller: request.from.unwrap_or_default(),
        kind: TxKind::Call(to),
        nonce: request.nonce.unwrap_or_default(),
        gas_limit,
        value: request.value.unwrap_or_default(),
        data: request.input.input().cloned().unwrap_or_default(),
        gas_price: request.gas_price.or(request.max_fee_per_gas).unwrap_or_default(),
        gas_priority_fee: request.max_priority_fee_per_gas,
        chain_id: request.chain_id,
        access_list: request.access_list.clone().unwrap_or_default(),
        blob_hashes,
        max_fee_per_blob_gas: request.max_fee_per_blob_gas.unwrap_or_default(),
        tx_type,
        ..Default::default()
    })
}

/// Runs `tx` against the frame, surfacing interpreter-level rejections as-is.
///
/// Never suspends: every state read the interpreter performs is answered from
/// the frame, zero-valued where nothing is resident.
pub(crate) fn transact_raw(
    db: &mut WitnessDb,
    env: &EvmEnv,
    tx: TxEnv,
) -> Result<ResultAndState, EVMError<LedgerError>> {
    let spec = env.cfg.spec;
    let ctx: MainnetContext<&mut WitnessDb> = Context::new(db, spec);
    let mut evm = ctx.with_cfg(env.cfg.clone()).with_block(env.block.clone()).build_mainnet();
    evm.transact(tx)
}

/// Runs `tx` against the frame without folding state changes back into it.
pub(crate) fn transact(
    db: &mut WitnessDb,
    env: &EvmEnv,
    tx: TxEnv,
) -> Result<ResultAndState, CallError> {
    transact_raw(db, env, tx).map_err(|err| CallError::EvmFailed(err.to_string()))
}

/// Runs `tx` and folds the resulting state changes into the frame.
///
/// The prefetch loop wraps this in a savepoint so the speculative writes can
/// be discarded while the witness survives.
pub(crate) fn execute_and_commit(
    db: &mut WitnessDb,
    env: &EvmEnv,
    tx: TxEnv,
) -> Result<CallResult, CallError> {
    let outcome = transact(db, env, tx)?;
    DatabaseCommit::commit(db, outcome.state);
    Ok(into_call_result(outcome.result))
}

/// Runs `tx` and reports the outcome, leaving the frame untouched.
pub(crate) fn execute(
    db: &mut WitnessDb,
    env: &EvmEnv,
    tx: TxEnv,
) -> Result<CallResult, CallError> {
    transact(db, env, tx).map(|outcome| into_call_result(outcome.result))
}

/// Maps the interpreter result onto the wire-facing [`CallResult`].
pub(crate) fn into_call_result(result: ExecutionResult) -> CallResult {
    match result {
        ExecutionResult::Success { gas_used, output, .. } => {
            CallResult { output: output.into_data(), gas_used, error: None }
        }
        ExecutionResult::Revert { gas_used, output } => {
            let reason = alloy_sol_types::decode_revert_reason(output.as_ref())
                .unwrap_or_else(|| "execution reverted".to_string());
            CallResult { output, gas_used, error: Some(reason) }
        }
        ExecutionResult::Halt { reason, gas_used } => CallResult {
            output: Bytes::new(),
            gas_used,
            error: Some(format!("EVM execution failed: {reason:?}")),
        },
    }
}

//! Execution limits shared by the public entry points.

/// Upper bound on the number of speculative EVM executions a single call may
/// perform while searching for its witness fixed point.
///
/// Convergence normally takes on the order of the call's depth of novel state
/// accesses; the ceiling only guards against pathological interpreter cycles.
pub const EVM_CALL_LIMIT: usize = 10_000;

/// Gas cap applied to every call executed by the engine.
///
/// Mirrors the default RPC gas cap: requests may ask for less, never more.
pub const EVM_CALL_GAS_CAP: u64 = 50_000_000;

/// Gas cost of a plain value transfer.
pub const MIN_TRANSACTION_GAS: u64 = 21_000;

/// Gas stipend retained by `CALL` when transferring value, used when deriving
/// the optimistic gas limit during estimation.
pub const CALL_STIPEND_GAS: u64 = 2_300;

/// Error ratio accepted by the gas estimation binary search.
///
/// Once the remaining search range is below this fraction of the upper bound
/// the search stops early, mirroring geth's estimator.
pub const ESTIMATE_GAS_ERROR_RATIO: f64 = 0.015;

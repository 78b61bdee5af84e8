//! Error variants surfaced by the public entry points.

use crate::backend::BackendError;
use std::fmt;

/// Errors that can abort a call before it produces a [`CallResult`].
///
/// Application-level reverts are not errors: they are returned inside
/// [`CallResult::error`](crate::CallResult) with the raw output attached.
///
/// [`CallResult::error`]: crate::CallResult
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The request did not name a call target.
    #[error("to address is required")]
    ToAddressRequired,
    /// The requested gas limit exceeds the engine's gas cap.
    #[error("gas larger than max allowed")]
    GasCapExceeded,
    /// A backend lookup failed in transit, so the state needed by the call
    /// could not be made resident.
    #[error("Unable to get {kind}")]
    StateUnavailable {
        /// Which kind of state item the failed lookup was for.
        kind: StateItemKind,
        /// The transport failure reported by the backend.
        #[source]
        source: BackendError,
    },
    /// The interpreter rejected the transaction or halted outside an ordinary
    /// revert, e.g. out of gas during explicit estimation.
    #[error("EVM execution failed: {0}")]
    EvmFailed(String),
}

impl CallError {
    /// Wraps a backend transport failure for the given state item kind.
    pub(crate) const fn state_unavailable(kind: StateItemKind, source: BackendError) -> Self {
        Self::StateUnavailable { kind, source }
    }
}

/// The kind of state item a failed backend lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateItemKind {
    /// An account's balance and nonce.
    Account,
    /// A single storage slot.
    Slot,
    /// An account's bytecode.
    Code,
}

impl fmt::Display for StateItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Account => "account",
            Self::Slot => "slot",
            Self::Code => "code",
        };
        f.write_str(kind)
    }
}

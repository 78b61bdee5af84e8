//! EVM call execution against high-latency state backends.
//!
//! A regular node answers `eth_call` from a local database. A portal-style
//! light client has no such database: accounts, storage slots and bytecode
//! live behind asynchronous network lookups. This crate bridges the gap with
//! a fixed-point search over the call's *witness* — the set of state keys the
//! execution touches:
//!
//! 1. run the call against an in-memory frame where missing state reads as
//!    zero-valued,
//! 2. collect the keys the interpreter touched,
//! 3. fetch the missing ones from the [`StateBackend`] concurrently,
//! 4. repeat until an execution touches only resident keys.
//!
//! The entry points on [`PortalEvm`] are `eth_call`, `eth_createAccessList`
//! and `eth_estimateGas` shaped: they take an [`alloy_consensus::Header`] and
//! an [`alloy_rpc_types_eth::TransactionRequest`] and return the raw output,
//! a canonical EIP-2930 access list, or a gas estimate.
//!
//! `BLOCKHASH` resolves to the zero hash unless ancestor hashes are installed
//! through the ledger hook; the engine never verifies code hashes or storage
//! roots reported by the backend.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs, unreachable_pub, rustdoc::all)]

mod backend;
mod chainspec;
pub mod constants;
mod engine;
mod error;
mod estimate;
mod evm;
mod fetch;
mod ledger;
mod witness;

pub use backend::{Account, BackendError, StateBackend};
pub use chainspec::{ChainSpec, NetworkId};
pub use engine::PortalEvm;
pub use error::{CallError, StateItemKind};
pub use evm::CallResult;
pub use fetch::FetchMode;
pub use ledger::{LedgerError, Savepoint, WitnessDb};
pub use witness::{Witness, WitnessKey};

// The request and result shapes of the public API, re-exported for
// convenience.
pub use alloy_rpc_types_eth::{AccessListResult, TransactionRequest};

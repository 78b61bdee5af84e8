//! `estimate_gas` end to end against the converged frame.

use crate::backend::{engine, test_header, MockBackend};
use alloy_primitives::{address, bytes, Address, Bytes, TxKind, U256};
use portal_evm::{CallError, FetchMode, TransactionRequest};

const BOB: Address = address!("00000000000000000000000000000000000000bb");
const CONTRACT: Address = address!("00000000000000000000000000000000000000cc");

/// `PUSH32 0xaa; SLOAD; PUSH1 0; MSTORE; PUSH1 32; PUSH1 0; RETURN`
const ECHO_SLOT: Bytes =
    bytes!("7f00000000000000000000000000000000000000000000000000000000000000aa5460005260206000f3");

/// `PUSH1 0; PUSH1 0; REVERT`
const ALWAYS_REVERT: Bytes = bytes!("60006000fd");

#[tokio::test]
async fn plain_transfer_estimates_the_base_gas() {
    let (evm, _) = engine(MockBackend::default().with_account(BOB, U256::from(1_000), 0));

    let request = TransactionRequest {
        to: Some(TxKind::Call(BOB)),
        value: Some(U256::from(1)),
        ..Default::default()
    };
    let estimate =
        evm.estimate_gas(&test_header(), &request, FetchMode::Optimistic).await.unwrap();

    assert_eq!(estimate, 21_000);
}

#[tokio::test]
async fn contract_call_estimate_is_close_to_the_gas_used() {
    let backend = || {
        MockBackend::default()
            .with_account(CONTRACT, U256::ZERO, 1)
            .with_code(CONTRACT, ECHO_SLOT)
    };
    let request = TransactionRequest {
        to: Some(TxKind::Call(CONTRACT)),
        ..Default::default()
    };

    let (evm, _) = engine(backend());
    let gas_used = evm
        .call(&test_header(), &request, FetchMode::Optimistic)
        .await
        .unwrap()
        .gas_used;

    let (evm, _) = engine(backend());
    let estimate =
        evm.estimate_gas(&test_header(), &request, FetchMode::Optimistic).await.unwrap();

    // a feasible limit, within the estimator's error ratio of the true cost
    assert!(estimate >= gas_used);
    assert!(estimate <= gas_used + 1_000, "estimate {estimate} vs gas used {gas_used}");
}

#[tokio::test]
async fn reverting_call_fails_estimation() {
    let (evm, _) = engine(
        MockBackend::default()
            .with_account(CONTRACT, U256::ZERO, 1)
            .with_code(CONTRACT, ALWAYS_REVERT),
    );

    let request = TransactionRequest {
        to: Some(TxKind::Call(CONTRACT)),
        ..Default::default()
    };
    let err =
        evm.estimate_gas(&test_header(), &request, FetchMode::Optimistic).await.unwrap_err();

    assert!(matches!(err, CallError::EvmFailed(_)));
    assert_eq!(err.to_string(), "EVM execution failed: execution reverted");
}

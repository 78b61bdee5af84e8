//! `call` end to end: convergence, zero-valued state, failure surfacing.

use crate::backend::{engine, has_duplicates, test_header, MockBackend};
use alloy_primitives::{address, bytes, Address, Bytes, TxKind, B256, U256};
use portal_evm::{CallError, FetchMode, TransactionRequest};

const BOB: Address = address!("00000000000000000000000000000000000000bb");
const CONTRACT: Address = address!("00000000000000000000000000000000000000cc");

/// `PUSH32 0xaa; SLOAD; PUSH1 0; MSTORE; PUSH1 32; PUSH1 0; RETURN` —
/// returns the value of storage slot `0xaa` as a 32 byte word.
const ECHO_SLOT: Bytes =
    bytes!("7f00000000000000000000000000000000000000000000000000000000000000aa5460005260206000f3");

const ECHO_SLOT_KEY: U256 = U256::from_limbs([0xaa, 0, 0, 0]);

fn transfer_request(to: Address, value: u64) -> TransactionRequest {
    TransactionRequest {
        to: Some(TxKind::Call(to)),
        value: Some(U256::from(value)),
        ..Default::default()
    }
}

#[tokio::test]
async fn transfer_to_existing_account_costs_base_gas() {
    let (evm, backend) = engine(
        MockBackend::default().with_account(BOB, U256::from(10).pow(U256::from(18)), 5),
    );

    let result = evm
        .call(&test_header(), &transfer_request(BOB, 1), FetchMode::Optimistic)
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(result.output.is_empty());
    assert_eq!(result.gas_used, 21_000);

    // one account lookup, one code seed, no storage
    let log = backend.log();
    assert_eq!(log.accounts, vec![BOB]);
    assert_eq!(log.code, vec![BOB]);
    assert!(log.storage.is_empty());
}

#[tokio::test]
async fn call_to_missing_contract_is_a_plain_transfer() {
    let (evm, _) = engine(MockBackend::default());

    let result = evm
        .call(&test_header(), &transfer_request(CONTRACT, 0), FetchMode::Optimistic)
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(result.output.is_empty());
    assert_eq!(result.gas_used, 21_000);
}

#[tokio::test]
async fn storage_read_converges_and_echoes_the_slot() {
    let (evm, backend) = engine(
        MockBackend::default()
            .with_account(CONTRACT, U256::ZERO, 1)
            .with_code(CONTRACT, ECHO_SLOT)
            .with_storage(CONTRACT, ECHO_SLOT_KEY, U256::from(7)),
    );

    let request = TransactionRequest {
        to: Some(TxKind::Call(CONTRACT)),
        ..Default::default()
    };
    let result = evm.call(&test_header(), &request, FetchMode::Optimistic).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.output, Bytes::from(B256::from(U256::from(7)).0));

    let log = backend.log();
    assert_eq!(log.storage, vec![(CONTRACT, ECHO_SLOT_KEY)]);
    assert_eq!(log.code, vec![CONTRACT]);
}

#[tokio::test]
async fn uninitialised_slot_reads_as_zero() {
    let (evm, _) = engine(
        MockBackend::default()
            .with_account(CONTRACT, U256::ZERO, 1)
            .with_code(CONTRACT, ECHO_SLOT),
    );

    let request = TransactionRequest {
        to: Some(TxKind::Call(CONTRACT)),
        ..Default::default()
    };
    let result = evm.call(&test_header(), &request, FetchMode::Optimistic).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.output, Bytes::from([0u8; 32]));
}

#[tokio::test]
async fn conservative_mode_reaches_the_same_result() {
    for mode in [FetchMode::Optimistic, FetchMode::Conservative] {
        let (evm, backend) = engine(
            MockBackend::default()
                .with_account(CONTRACT, U256::ZERO, 1)
                .with_code(CONTRACT, ECHO_SLOT)
                .with_storage(CONTRACT, ECHO_SLOT_KEY, U256::from(42)),
        );

        let request = TransactionRequest {
            to: Some(TxKind::Call(CONTRACT)),
            ..Default::default()
        };
        let result = evm.call(&test_header(), &request, mode).await.unwrap();
        assert_eq!(result.output, Bytes::from(B256::from(U256::from(42)).0), "{mode:?}");

        let log = backend.log();
        assert!(!has_duplicates(&log.accounts), "{mode:?}");
        assert!(!has_duplicates(&log.storage), "{mode:?}");
        assert!(!has_duplicates(&log.code), "{mode:?}");
    }
}

#[tokio::test]
async fn backend_transport_failure_aborts_the_call() {
    let (evm, _) = engine(
        MockBackend::default()
            .with_account(CONTRACT, U256::ZERO, 1)
            .with_code(CONTRACT, ECHO_SLOT)
            .failing_storage(),
    );

    let request = TransactionRequest {
        to: Some(TxKind::Call(CONTRACT)),
        ..Default::default()
    };
    let err = evm.call(&test_header(), &request, FetchMode::Optimistic).await.unwrap_err();

    assert!(matches!(err, CallError::StateUnavailable { .. }));
    assert_eq!(err.to_string(), "Unable to get slot");
}

#[tokio::test]
async fn missing_to_address_is_rejected_before_any_lookup() {
    let (evm, backend) = engine(MockBackend::default());

    let err = evm
        .call(&test_header(), &TransactionRequest::default(), FetchMode::Optimistic)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "to address is required");
    assert!(backend.log().accounts.is_empty());
    assert!(backend.log().code.is_empty());
}

#[tokio::test]
async fn gas_above_the_cap_is_rejected() {
    let (evm, _) = engine(MockBackend::default());

    let request = TransactionRequest {
        to: Some(TxKind::Call(BOB)),
        gas: Some(portal_evm::constants::EVM_CALL_GAS_CAP + 1),
        ..Default::default()
    };
    let err = evm.call(&test_header(), &request, FetchMode::Optimistic).await.unwrap_err();

    assert_eq!(err.to_string(), "gas larger than max allowed");
}

#[tokio::test]
async fn missing_to_address_takes_precedence_over_the_gas_cap() {
    let (evm, _) = engine(MockBackend::default());

    let request = TransactionRequest {
        gas: Some(portal_evm::constants::EVM_CALL_GAS_CAP + 1),
        ..Default::default()
    };
    let err = evm.call(&test_header(), &request, FetchMode::Optimistic).await.unwrap_err();

    assert_eq!(err.to_string(), "to address is required");
}

#[tokio::test]
async fn nothing_persists_between_calls() {
    let (evm, backend) = engine(
        MockBackend::default().with_account(BOB, U256::from(1_000_000), 0),
    );
    let request = transfer_request(BOB, 1);

    evm.call(&test_header(), &request, FetchMode::Optimistic).await.unwrap();
    evm.call(&test_header(), &request, FetchMode::Optimistic).await.unwrap();

    // the second call re-fetches everything: no frame survives a call
    let log = backend.log();
    assert_eq!(log.accounts, vec![BOB, BOB]);
    assert_eq!(log.code, vec![BOB, BOB]);
}

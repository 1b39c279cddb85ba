//! Integration tests for gate failure classification.

use access_gate_core::{FailureClass, GateFailure, ResponseError, classify_failure};

#[test]
fn failure_classification_tests_only_transport_failures_retry() {
    assert_eq!(
        classify_failure(&GateFailure::TransportFailure("timeout".to_string())),
        FailureClass::Retriable
    );
    assert_eq!(
        classify_failure(&GateFailure::InvalidResponse(ResponseError::CodeMismatch)),
        FailureClass::Fatal
    );
    assert_eq!(
        classify_failure(&GateFailure::ConfigurationFault("bad url".to_string())),
        FailureClass::Fatal
    );
    assert_eq!(
        classify_failure(&GateFailure::PersistenceFailure("locked".to_string())),
        FailureClass::Ignorable
    );
}

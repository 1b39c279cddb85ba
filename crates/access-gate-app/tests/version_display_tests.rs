//! Integration tests for build-time version injection.

use access_gate_app::app_version;

#[test]
fn version_display_tests_exposes_non_empty_version() {
    let version = app_version();
    assert!(!version.is_empty());
    assert!(!version.contains('\n'));
}

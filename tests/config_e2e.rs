//! The process-wide instrumentation switch.
//!
//! The switch is global, so everything lives in one test function; this
//! suite owns its process and cannot race other binaries.

use promise_registry::test_utils::init_test_logging;
use promise_registry::{location, registry_enabled, set_registry_enabled, Registration};

#[test]
fn switch_controls_registration() {
    init_test_logging();

    // Default: enabled (no environment override in the test harness).
    assert!(registry_enabled());
    let attached = Registration::new(location!());
    assert!(attached.is_attached());

    set_registry_enabled(false);
    assert!(!registry_enabled());
    let detached = Registration::new(location!());
    assert!(!detached.is_attached());
    // Handles attached before the flip keep their record until dropped.
    assert!(attached.is_attached());

    set_registry_enabled(true);
    assert!(registry_enabled());
    let reattached = Registration::new(location!());
    assert!(reattached.is_attached());
}

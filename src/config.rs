//! Process-wide instrumentation switch.
//!
//! Registration can be disabled for the whole process, turning every
//! [`Registration`](crate::Registration) constructor into a no-op that
//! yields a detached handle. Inspection keeps working either way:
//! registries created before the switch was flipped drain normally.
//!
//! # Precedence
//!
//! 1. **Programmatic**: [`set_registry_enabled`]
//! 2. **Environment**: `PROMISE_REGISTRY_DISABLED=1` (or `true`)
//! 3. **Default**: enabled

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// Environment variable that disables registration when set to `1` or `true`.
pub const ENV_DISABLED: &str = "PROMISE_REGISTRY_DISABLED";

const OVERRIDE_UNSET: u8 = 0;
const OVERRIDE_ENABLED: u8 = 1;
const OVERRIDE_DISABLED: u8 = 2;

static OVERRIDE: AtomicU8 = AtomicU8::new(OVERRIDE_UNSET);
static FROM_ENV: OnceLock<bool> = OnceLock::new();

/// Returns true if new promises should be registered on construction.
#[must_use]
pub fn registry_enabled() -> bool {
    match OVERRIDE.load(Ordering::Relaxed) {
        OVERRIDE_ENABLED => true,
        OVERRIDE_DISABLED => false,
        _ => *FROM_ENV.get_or_init(enabled_from_env),
    }
}

/// Overrides the environment-derived switch for the rest of the process.
///
/// Takes effect for handles constructed after the call. Handles that are
/// already attached keep their records until dropped.
pub fn set_registry_enabled(enabled: bool) {
    let value = if enabled {
        OVERRIDE_ENABLED
    } else {
        OVERRIDE_DISABLED
    };
    OVERRIDE.store(value, Ordering::Relaxed);
}

fn enabled_from_env() -> bool {
    match std::env::var(ENV_DISABLED) {
        Ok(value) => !parse_bool(&value),
        Err(_) => true,
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    // The programmatic override is process-global, so flipping it here
    // would race sibling tests that register handles. It is covered by
    // the config integration suite, which owns its process.

    #[test]
    fn parse_bool_accepts_one_and_true() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool(" true "));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn enabled_by_default() {
        assert!(registry_enabled());
    }
}

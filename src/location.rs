//! Call-site provenance capture.
//!
//! A [`Location`] names the file, function, and line of the code that
//! registered a promise. File and function are stable for the record's
//! lifetime; the line is updated as the coroutine crosses suspension
//! points (see [`Registration::update_line`](crate::Registration::update_line)).
//!
//! Capture with the [`location!`](crate::location!) macro:
//!
//! ```
//! use promise_registry::Location;
//!
//! fn handler() -> Location {
//!     promise_registry::location!()
//! }
//!
//! let loc = handler();
//! assert!(loc.function.ends_with("handler"));
//! ```

/// A call site captured at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Source file, as produced by `file!()`.
    pub file: &'static str,
    /// Fully qualified enclosing function.
    pub function: &'static str,
    /// Line of the registration call.
    pub line: u32,
}

impl Location {
    /// Creates a location from its parts.
    #[must_use]
    pub const fn new(file: &'static str, function: &'static str, line: u32) -> Self {
        Self {
            file,
            function,
            line,
        }
    }
}

/// Expands to the fully qualified name of the enclosing function.
///
/// Works by probing `type_name` of a local item; the result is a
/// `&'static str` like `my_crate::server::accept_loop`.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn probe() {}
        fn name_of<T>(_: T) -> &'static str {
            core::any::type_name::<T>()
        }
        let name = name_of(probe);
        &name[..name.len() - "::probe".len()]
    }};
}

/// Captures the current call site as a [`Location`].
#[macro_export]
macro_rules! location {
    () => {
        $crate::Location::new(file!(), $crate::function_name!(), line!())
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn captures_enclosing_function() {
        let loc = crate::location!();
        assert!(loc.file.ends_with("location.rs"));
        assert!(
            loc.function.ends_with("tests::captures_enclosing_function"),
            "unexpected function name: {}",
            loc.function
        );
        assert!(loc.line > 0);
    }

    #[test]
    fn function_name_strips_probe() {
        let name = crate::function_name!();
        assert!(!name.contains("probe"), "probe leaked into {name}");
    }
}

#![forbid(unsafe_code)]

//! Error reporting.
//!
//! cmloop never escalates a failed registration or a misuse to a panic. The
//! operation that detects the problem reports it with [`report!`](crate::report!)
//! and returns the error. The event carries the operation name and the
//! rendered error, and is emitted at the caller's module path so log filters
//! keyed on crate names keep working.

/// Emit `error!` for `$err` on behalf of `$operation` and evaluate to `$err`.
///
/// ```
/// use cmloop_core::report;
///
/// #[derive(Debug)]
/// struct Oops;
/// impl std::fmt::Display for Oops {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("oops")
///     }
/// }
///
/// fn fallible() -> Result<(), Oops> {
///     Err(report!("fallible", Oops))
/// }
/// assert!(fallible().is_err());
/// ```
#[macro_export]
macro_rules! report {
    ($operation:expr, $err:expr $(,)?) => {{
        let err = $err;
        $crate::tracing::error!(operation = $operation, error = %err, "cmloop operation failed");
        err
    }};
}

#![forbid(unsafe_code)]

//! Core primitives for the cmloop event loop.
//!
//! - [`time`]: [`Timestamp`], the real monotonic clock and the manually
//!   advanced [`LabClock`] used for deterministic tests.
//! - [`env`]: `CMLOOP_*` environment overrides for configuration structs.
//! - [`report!`]: the diagnostic channel every fallible operation reports
//!   through before handing its error back to the caller.

pub mod env;
pub mod report;
pub mod time;

pub use time::{Clock, LabClock, MonotonicClock, TimeSource, Timestamp};

#[doc(hidden)]
pub use tracing;

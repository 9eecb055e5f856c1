//! Readiness polling backends.
//!
//! A [`Reactor`] performs the one blocking call of a dispatch cycle: wait until
//! a descriptor in the [`DescriptorSet`] is ready or the timeout elapses. The
//! dispatcher owns exactly one reactor, chosen at construction, and never
//! branches on which one it has.
//!
//! - [`PollReactor`] (unix): `poll(2)` through `nix`.
//! - [`LabReactor`]: scripted readiness over a [`LabClock`](cmloop_core::LabClock),
//!   for deterministic tests.

mod lab;
#[cfg(unix)]
mod poll;

use std::io;

use web_time::Duration;

use crate::descriptor_set::DescriptorSet;

pub use lab::{LabReactor, LabReadiness};
#[cfg(unix)]
pub use poll::PollReactor;

/// One blocking wait for descriptor readiness.
pub trait Reactor {
    /// Wait for readiness on `set`, for at most `timeout` (`None` waits
    /// indefinitely). Readiness is written back into `set`.
    ///
    /// Returns the number of ready descriptors. An interrupted wait is
    /// reported as [`io::ErrorKind::Interrupted`].
    fn poll(&mut self, set: &mut DescriptorSet, timeout: Option<Duration>) -> io::Result<usize>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

impl<R: Reactor + ?Sized> Reactor for Box<R> {
    fn poll(&mut self, set: &mut DescriptorSet, timeout: Option<Duration>) -> io::Result<usize> {
        (**self).poll(set, timeout)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

//! `poll(2)` reactor.

use std::io;
use std::os::fd::BorrowedFd;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::trace;
use web_time::Duration;

use super::Reactor;
use crate::descriptor_set::{Descriptor, DescriptorSet, Interest, Readiness};

/// Native reactor built on `poll(2)`.
///
/// Waits are rounded up to whole milliseconds so a sub-millisecond deadline
/// does not turn into a busy loop, and capped at `u16::MAX` milliseconds; the
/// dispatcher simply polls again after a capped wait.
#[derive(Debug, Default)]
pub struct PollReactor {
    _private: (),
}

impl PollReactor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reactor for PollReactor {
    fn poll(&mut self, set: &mut DescriptorSet, timeout: Option<Duration>) -> io::Result<usize> {
        let interests: Vec<(Descriptor, Interest)> =
            set.interests().filter(|(fd, _)| *fd >= 0).collect();

        let results: Vec<(Descriptor, Readiness)> = {
            let mut fds: Vec<PollFd<'_>> = interests
                .iter()
                .map(|(fd, interest)| PollFd::new(borrow(*fd), poll_flags(*interest)))
                .collect();
            let ready = poll(&mut fds, poll_timeout(timeout)).map_err(io::Error::from)?;
            trace!(descriptors = fds.len(), ready, "poll returned");
            interests
                .iter()
                .zip(fds.iter())
                .filter_map(|((fd, _), pfd)| {
                    let revents = pfd.revents()?;
                    let readiness = readiness(revents);
                    (!readiness.is_empty()).then_some((*fd, readiness))
                })
                .collect()
        };

        for (fd, readiness) in &results {
            set.mark_ready(*fd, *readiness);
        }
        Ok(results.len())
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

#[allow(unsafe_code)]
fn borrow<'fd>(fd: Descriptor) -> BorrowedFd<'fd> {
    // SAFETY: `fd` is non-negative (filtered by the caller) and the borrow
    // lives only for the duration of one `poll(2)` call. A descriptor closed
    // by its owner in the meantime is reported by the kernel as POLLNVAL.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

fn poll_flags(interest: Interest) -> PollFlags {
    let mut flags = PollFlags::empty();
    if interest.contains(Interest::READ) {
        flags |= PollFlags::POLLIN;
    }
    if interest.contains(Interest::WRITE) {
        flags |= PollFlags::POLLOUT;
    }
    if interest.contains(Interest::ERROR) {
        flags |= PollFlags::POLLPRI;
    }
    flags
}

/// Map `revents` onto readiness the way `select(2)` reports it: hang-up and
/// errors make a descriptor both readable and writable.
fn readiness(revents: PollFlags) -> Readiness {
    let mut ready = Readiness::empty();
    if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
        ready |= Interest::READ;
    }
    if revents.intersects(PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR) {
        ready |= Interest::WRITE;
    }
    if revents.intersects(PollFlags::POLLPRI | PollFlags::POLLERR | PollFlags::POLLNVAL) {
        ready |= Interest::ERROR;
    }
    ready
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout_millis(timeout) {
        None => PollTimeout::NONE,
        Some(ms) => PollTimeout::from(ms),
    }
}

fn timeout_millis(timeout: Option<Duration>) -> Option<u16> {
    timeout.map(|wait| {
        let ms = wait.as_nanos().div_ceil(1_000_000);
        u16::try_from(ms).unwrap_or(u16::MAX)
    })
}

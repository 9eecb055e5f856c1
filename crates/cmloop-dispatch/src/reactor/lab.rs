#![forbid(unsafe_code)]

//! Scripted reactor for deterministic tests.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use ahash::AHashMap;
use cmloop_core::LabClock;
use web_time::Duration;

use super::Reactor;
use crate::descriptor_set::{Descriptor, DescriptorSet, Readiness};

#[derive(Debug, Default)]
struct LabState {
    ready: AHashMap<Descriptor, Readiness>,
    auto_advance: bool,
    polls: u64,
    last_wait: Option<Option<Duration>>,
    fail_next: Option<io::ErrorKind>,
}

/// Reactor that never blocks.
///
/// Readiness comes from a [`LabReadiness`] script and is level-triggered: a
/// descriptor stays ready until the script clears it. With auto-advance on, a
/// poll that finds nothing ready moves the lab clock forward by the requested
/// wait, as if the process had slept.
#[derive(Debug)]
pub struct LabReactor {
    clock: LabClock,
    state: Rc<RefCell<LabState>>,
}

/// Test-side handle for scripting a [`LabReactor`].
#[derive(Debug, Clone)]
pub struct LabReadiness {
    state: Rc<RefCell<LabState>>,
}

impl LabReactor {
    /// Create a reactor over `clock` with auto-advance off.
    #[must_use]
    pub fn new(clock: &LabClock) -> (Self, LabReadiness) {
        let state = Rc::new(RefCell::new(LabState::default()));
        let reactor = Self {
            clock: clock.clone(),
            state: Rc::clone(&state),
        };
        (reactor, LabReadiness { state })
    }
}

impl Reactor for LabReactor {
    fn poll(&mut self, set: &mut DescriptorSet, timeout: Option<Duration>) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        state.polls += 1;
        state.last_wait = Some(timeout);
        if let Some(kind) = state.fail_next.take() {
            return Err(io::Error::from(kind));
        }

        let ready: Vec<(Descriptor, Readiness)> = set
            .interests()
            .filter_map(|(fd, _)| state.ready.get(&fd).map(|r| (fd, *r)))
            .collect();
        for (fd, readiness) in &ready {
            set.mark_ready(*fd, *readiness);
        }
        let count = set.ready_count();

        if count == 0
            && state.auto_advance
            && let Some(wait) = timeout
        {
            self.clock.advance(wait);
        }
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "lab"
    }
}

impl LabReadiness {
    /// Mark `fd` ready until cleared.
    pub fn set_ready(&self, fd: Descriptor, readiness: Readiness) {
        self.state.borrow_mut().ready.insert(fd, readiness);
    }

    pub fn clear_ready(&self, fd: Descriptor) {
        self.state.borrow_mut().ready.remove(&fd);
    }

    pub fn clear_all(&self) {
        self.state.borrow_mut().ready.clear();
    }

    /// Advance the lab clock by each idle poll's wait.
    pub fn set_auto_advance(&self, enabled: bool) {
        self.state.borrow_mut().auto_advance = enabled;
    }

    /// Make the next poll fail with `kind`.
    pub fn fail_next_poll(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().fail_next = Some(kind);
    }

    #[must_use]
    pub fn polls(&self) -> u64 {
        self.state.borrow().polls
    }

    /// Wait requested by the most recent poll: `None` if no poll happened
    /// yet, `Some(None)` for an indefinite wait.
    #[must_use]
    pub fn last_wait(&self) -> Option<Option<Duration>> {
        self.state.borrow().last_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_set::Interest;

    #[test]
    fn scripted_readiness_is_level_triggered() {
        let clock = LabClock::new();
        let (mut reactor, script) = LabReactor::new(&clock);
        script.set_ready(4, Interest::READ);

        for _ in 0..2 {
            let mut set = DescriptorSet::new();
            set.add_read(4);
            assert_eq!(reactor.poll(&mut set, None).expect("poll"), 1);
            assert!(set.is_readable(4));
        }

        script.clear_ready(4);
        let mut set = DescriptorSet::new();
        set.add_read(4);
        assert_eq!(reactor.poll(&mut set, None).expect("poll"), 0);
        assert_eq!(script.polls(), 3);
    }

    #[test]
    fn readiness_without_interest_is_ignored() {
        let clock = LabClock::new();
        let (mut reactor, script) = LabReactor::new(&clock);
        script.set_ready(4, Interest::READ);
        let mut set = DescriptorSet::new();
        set.add_read(5);
        assert_eq!(reactor.poll(&mut set, None).expect("poll"), 0);
    }

    #[test]
    fn auto_advance_consumes_the_wait() {
        let clock = LabClock::new();
        let (mut reactor, script) = LabReactor::new(&clock);
        let mut set = DescriptorSet::new();

        reactor
            .poll(&mut set, Some(Duration::from_millis(40)))
            .expect("poll");
        assert_eq!(clock.now().as_duration(), Duration::ZERO);

        script.set_auto_advance(true);
        reactor
            .poll(&mut set, Some(Duration::from_millis(40)))
            .expect("poll");
        assert_eq!(clock.now().as_duration(), Duration::from_millis(40));
        assert_eq!(script.last_wait(), Some(Some(Duration::from_millis(40))));
    }

    #[test]
    fn scripted_failure_fires_once() {
        let clock = LabClock::new();
        let (mut reactor, script) = LabReactor::new(&clock);
        script.fail_next_poll(io::ErrorKind::Interrupted);
        let mut set = DescriptorSet::new();
        let err = reactor.poll(&mut set, None).expect_err("scripted failure");
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(reactor.poll(&mut set, None).is_ok());
    }
}

#![forbid(unsafe_code)]

//! Pending one-shot timeouts, ordered by deadline.
//!
//! # Invariants
//!
//! - Records are ordered by `(deadline, id)`. Ids grow with registration, so
//!   equal deadlines fire in registration order on every run.
//! - A record leaves the registry exactly once: by [`take`](TimeoutRegistry::take)
//!   when it fires, or by [`remove`](TimeoutRegistry::remove) when cancelled.
//!   Afterwards its handle is stale.

use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashMap;
use cmloop_core::Timestamp;

use crate::handle::TimeoutHandle;

/// A one-shot timeout callback.
pub type TimeoutFn = Box<dyn FnOnce()>;

pub(crate) struct TimeoutRecord {
    pub(crate) deadline: Timestamp,
    pub(crate) callback: TimeoutFn,
}

impl fmt::Debug for TimeoutRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutRecord")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub(crate) struct TimeoutRegistry {
    queue: BTreeMap<(Timestamp, TimeoutHandle), TimeoutFn>,
    deadlines: AHashMap<TimeoutHandle, Timestamp>,
}

impl fmt::Debug for TimeoutRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutRegistry")
            .field("pending", &self.queue.len())
            .field("earliest", &self.earliest())
            .finish()
    }
}

impl TimeoutRegistry {
    pub(crate) fn insert(&mut self, handle: TimeoutHandle, deadline: Timestamp, callback: TimeoutFn) {
        self.queue.insert((deadline, handle), callback);
        self.deadlines.insert(handle, deadline);
    }

    /// Cancel `handle`. `None` means it is stale.
    pub(crate) fn remove(&mut self, handle: TimeoutHandle) -> Option<TimeoutRecord> {
        self.take(handle)
    }

    /// Detach `handle` for firing.
    pub(crate) fn take(&mut self, handle: TimeoutHandle) -> Option<TimeoutRecord> {
        let deadline = self.deadlines.remove(&handle)?;
        let callback = self.queue.remove(&(deadline, handle))?;
        Some(TimeoutRecord { deadline, callback })
    }

    #[must_use]
    pub(crate) fn earliest(&self) -> Option<Timestamp> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Handles due at `now`, in firing order.
    #[must_use]
    pub(crate) fn due(&self, now: Timestamp) -> Vec<TimeoutHandle> {
        self.queue
            .keys()
            .take_while(|(deadline, _)| *deadline <= now)
            .map(|(_, handle)| *handle)
            .collect()
    }

    #[must_use]
    pub(crate) fn deadline(&self, handle: TimeoutHandle) -> Option<Timestamp> {
        self.deadlines.get(&handle).copied()
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Detach every record without invoking any.
    pub(crate) fn drain(&mut self) -> Vec<TimeoutFn> {
        self.deadlines.clear();
        std::mem::take(&mut self.queue).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TimeoutFn {
        Box::new(|| {})
    }

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_parts(0, ms * 1_000_000)
    }

    #[test]
    fn due_lists_elapsed_deadlines_in_order() {
        let mut reg = TimeoutRegistry::default();
        reg.insert(TimeoutHandle(1), at(30), noop());
        reg.insert(TimeoutHandle(2), at(10), noop());
        reg.insert(TimeoutHandle(3), at(20), noop());
        reg.insert(TimeoutHandle(4), at(40), noop());

        assert_eq!(
            reg.due(at(30)),
            vec![TimeoutHandle(2), TimeoutHandle(3), TimeoutHandle(1)]
        );
        assert_eq!(reg.earliest(), Some(at(10)));
    }

    #[test]
    fn equal_deadlines_fire_in_registration_order() {
        let mut reg = TimeoutRegistry::default();
        reg.insert(TimeoutHandle(9), at(5), noop());
        reg.insert(TimeoutHandle(3), at(5), noop());
        reg.insert(TimeoutHandle(6), at(5), noop());
        assert_eq!(
            reg.due(at(5)),
            vec![TimeoutHandle(3), TimeoutHandle(6), TimeoutHandle(9)]
        );
    }

    #[test]
    fn take_detaches_exactly_once() {
        let mut reg = TimeoutRegistry::default();
        reg.insert(TimeoutHandle(1), at(1), noop());
        let record = reg.take(TimeoutHandle(1)).expect("registered");
        assert_eq!(record.deadline, at(1));
        assert!(reg.take(TimeoutHandle(1)).is_none());
        assert!(reg.remove(TimeoutHandle(1)).is_none());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn drain_empties_without_invoking() {
        use std::cell::Cell;
        use std::rc::Rc;

        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let mut reg = TimeoutRegistry::default();
        reg.insert(TimeoutHandle(1), at(1), Box::new(move || flag.set(true)));
        let drained = reg.drain();
        assert_eq!(drained.len(), 1);
        drop(drained);
        assert!(!fired.get());
        assert_eq!(reg.len(), 0);
        assert_eq!(reg.earliest(), None);
    }

    #[test]
    fn debug_summarizes_without_callbacks() {
        let mut reg = TimeoutRegistry::default();
        reg.insert(TimeoutHandle(1), at(7), noop());
        reg.insert(TimeoutHandle(2), at(3), noop());
        let debug = format!("{reg:?}");
        assert!(debug.starts_with("TimeoutRegistry"), "{debug}");
        assert!(debug.contains("pending: 2"), "{debug}");
    }
}

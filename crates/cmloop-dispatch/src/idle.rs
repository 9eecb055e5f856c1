#![forbid(unsafe_code)]

//! Recurring idle work, ordered by priority.
//!
//! # Design
//!
//! Ordinary idles are keyed by `(priority, sequence, id)`. The sequence is a
//! logical stamp taken from a counter at insertion and again at every
//! re-queue, so among equal priorities the longest-waiting callback runs next
//! and recurring callbacks take turns.
//!
//! A popped callback is *in flight*: it is out of the queue, but its handle is
//! still live. Removing it while in flight cancels the re-queue, and
//! [`finish`](IdleRegistry::finish) then drops it.
//!
//! The special idle is a single slot checked before the queue. It stays
//! pending while it reports more work.

use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashMap;

use crate::handle::IdleHandle;

/// Idle priorities, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdlePriority {
    /// Toolkit and window-system work.
    Ui,
    TrackingEditor,
    SceneViewerUpdate,
    SyncViewers,
    TumbleViewer,
}

impl IdlePriority {
    pub const ALL: [Self; 5] = [
        Self::Ui,
        Self::TrackingEditor,
        Self::SceneViewerUpdate,
        Self::SyncViewers,
        Self::TumbleViewer,
    ];
}

impl fmt::Display for IdlePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ui => "ui",
            Self::TrackingEditor => "tracking-editor",
            Self::SceneViewerUpdate => "scene-viewer-update",
            Self::SyncViewers => "sync-viewers",
            Self::TumbleViewer => "tumble-viewer",
        })
    }
}

/// What an idle callback reports after running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStatus {
    /// Call again later.
    MoreWork,
    /// Remove the callback.
    Done,
}

impl From<bool> for IdleStatus {
    fn from(more_work: bool) -> Self {
        if more_work { Self::MoreWork } else { Self::Done }
    }
}

/// A recurring idle callback.
pub type IdleFn = Box<dyn FnMut() -> IdleStatus>;

type IdleKey = (IdlePriority, u64, IdleHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Queued(IdleKey),
    InFlight,
}

/// A callback popped for invocation.
pub(crate) struct PoppedIdle {
    pub(crate) handle: IdleHandle,
    pub(crate) priority: IdlePriority,
    pub(crate) callback: IdleFn,
}

#[derive(Default)]
pub(crate) struct IdleRegistry {
    queue: BTreeMap<IdleKey, IdleFn>,
    slots: AHashMap<IdleHandle, Slot>,
    sequence: u64,
}

impl fmt::Debug for IdleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleRegistry")
            .field("queued", &self.queue.len())
            .field("live", &self.slots.len())
            .finish()
    }
}

impl IdleRegistry {
    pub(crate) fn insert(&mut self, handle: IdleHandle, priority: IdlePriority, callback: IdleFn) {
        let key = (priority, self.stamp(), handle);
        self.queue.insert(key, callback);
        self.slots.insert(handle, Slot::Queued(key));
    }

    /// Cancel `handle`. Returns the detached callback when it was queued, or
    /// `Some(None)` when it was in flight. `None` means stale.
    pub(crate) fn remove(&mut self, handle: IdleHandle) -> Option<Option<IdleFn>> {
        match self.slots.remove(&handle)? {
            Slot::Queued(key) => Some(self.queue.remove(&key)),
            Slot::InFlight => Some(None),
        }
    }

    /// Pop the highest-priority, longest-waiting callback.
    pub(crate) fn pop(&mut self) -> Option<PoppedIdle> {
        let ((priority, _, handle), callback) = self.queue.pop_first()?;
        self.slots.insert(handle, Slot::InFlight);
        Some(PoppedIdle {
            handle,
            priority,
            callback,
        })
    }

    /// Settle a popped callback. Re-queues it with a fresh stamp when it asked
    /// for more work and was not removed meanwhile. Otherwise the callback is
    /// returned to be dropped outside any registry borrow.
    pub(crate) fn finish(&mut self, popped: PoppedIdle, status: IdleStatus) -> Option<IdleFn> {
        let live = self.slots.get(&popped.handle) == Some(&Slot::InFlight);
        if live && status == IdleStatus::MoreWork {
            let key = (popped.priority, self.stamp(), popped.handle);
            self.queue.insert(key, popped.callback);
            self.slots.insert(popped.handle, Slot::Queued(key));
            return None;
        }
        if live {
            self.slots.remove(&popped.handle);
        }
        Some(popped.callback)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, handle: IdleHandle) -> bool {
        self.slots.contains_key(&handle)
    }

    /// Number of callbacks waiting in the queue.
    #[must_use]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of live handles, queued or in flight.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<IdleFn> {
        self.slots.clear();
        std::mem::take(&mut self.queue).into_values().collect()
    }

    fn stamp(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

// ─── Special idle ────────────────────────────────────────────────────────────

/// The single privileged idle slot.
pub(crate) struct SpecialIdle {
    pub(crate) handle: IdleHandle,
    pub(crate) priority: IdlePriority,
    pub(crate) pending: bool,
    /// `None` while the callback is running.
    pub(crate) callback: Option<IdleFn>,
}

impl fmt::Debug for SpecialIdle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecialIdle")
            .field("handle", &self.handle)
            .field("priority", &self.priority)
            .field("pending", &self.pending)
            .field("running", &self.callback.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> IdleFn {
        Box::new(|| IdleStatus::MoreWork)
    }

    #[test]
    fn priority_order_beats_insertion_order() {
        assert!(IdlePriority::Ui < IdlePriority::TrackingEditor);
        assert!(IdlePriority::SyncViewers < IdlePriority::TumbleViewer);

        let mut reg = IdleRegistry::default();
        reg.insert(IdleHandle(1), IdlePriority::TumbleViewer, idle());
        reg.insert(IdleHandle(2), IdlePriority::TrackingEditor, idle());
        let first = reg.pop().expect("queued");
        assert_eq!(first.handle, IdleHandle(2));
    }

    #[test]
    fn requeue_rotates_equal_priorities() {
        let mut reg = IdleRegistry::default();
        reg.insert(IdleHandle(1), IdlePriority::SyncViewers, idle());
        reg.insert(IdleHandle(2), IdlePriority::SyncViewers, idle());

        let mut order = Vec::new();
        for _ in 0..4 {
            let popped = reg.pop().expect("queued");
            order.push(popped.handle.id());
            assert!(reg.finish(popped, IdleStatus::MoreWork).is_none());
        }
        assert_eq!(order, vec![1, 2, 1, 2]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn done_releases_the_handle() {
        let mut reg = IdleRegistry::default();
        reg.insert(IdleHandle(1), IdlePriority::Ui, idle());
        let popped = reg.pop().expect("queued");
        assert!(reg.finish(popped, IdleStatus::Done).is_some());
        assert!(!reg.contains(IdleHandle(1)));
        assert!(reg.remove(IdleHandle(1)).is_none());
    }

    #[test]
    fn removal_in_flight_cancels_requeue() {
        let mut reg = IdleRegistry::default();
        reg.insert(IdleHandle(1), IdlePriority::Ui, idle());
        let popped = reg.pop().expect("queued");
        assert!(matches!(reg.remove(IdleHandle(1)), Some(None)));
        assert!(reg.finish(popped, IdleStatus::MoreWork).is_some());
        assert_eq!(reg.queued(), 0);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn status_from_bool() {
        assert_eq!(IdleStatus::from(true), IdleStatus::MoreWork);
        assert_eq!(IdleStatus::from(false), IdleStatus::Done);
    }
}

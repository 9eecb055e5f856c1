#![forbid(unsafe_code)]

//! Subscribers of a time keeper.
//!
//! A [`TimeObject`] samples keeper time at its own rate. By default its frames
//! fall on `offset + k / frequency` for integer `k`; a custom next-time
//! function can replace that grid entirely. The keeper pushes the current time
//! into the object and then notifies the object's clients.
//!
//! # Invariants
//!
//! - `update_frequency` is always finite and positive.
//! - An object is attached to at most one keeper at a time.
//! - A time within [`FRAME_TOLERANCE`] of a grid point counts as on the grid,
//!   so `next_callback_time` never returns its own input for a grid time.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use cmloop_core::report;
use tracing::{trace, warn};

use crate::error::{Result, TimeKeeperError};
use crate::play::PlayDirection;

/// Slack, in frames, for deciding that a time lies on the frame grid.
pub const FRAME_TOLERANCE: f64 = 1e-6;

/// Custom frame grid: the next frame strictly after (or before) a time.
pub type NextTimeFn = Rc<dyn Fn(f64, PlayDirection) -> f64>;

type ClientFn = Rc<RefCell<Box<dyn FnMut(&TimeObject, f64)>>>;

/// Identifies a client callback on one [`TimeObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectCallbackId(u64);

impl ObjectCallbackId {
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

struct Sampling {
    current_time: f64,
    update_frequency: f64,
    time_offset: f64,
}

struct ObjectInner {
    name: String,
    sampling: RefCell<Sampling>,
    next_time_fn: RefCell<Option<NextTimeFn>>,
    clients: RefCell<Vec<(ObjectCallbackId, ClientFn)>>,
    next_client_id: Cell<u64>,
    attached: Cell<bool>,
}

/// Shared handle to a time object. Clones refer to the same object.
#[derive(Clone)]
pub struct TimeObject {
    inner: Rc<ObjectInner>,
}

impl TimeObject {
    /// A 10 Hz object at time zero with no offset.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                name: name.into(),
                sampling: RefCell::new(Sampling {
                    current_time: 0.0,
                    update_frequency: 10.0,
                    time_offset: 0.0,
                }),
                next_time_fn: RefCell::new(None),
                clients: RefCell::new(Vec::new()),
                next_client_id: Cell::new(0),
                attached: Cell::new(false),
            }),
        }
    }

    /// [`new`](Self::new) with an update frequency.
    pub fn with_frequency(name: impl Into<String>, frequency: f64) -> Result<Self> {
        let object = Self::new(name);
        object.set_update_frequency(frequency)?;
        Ok(object)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Time last pushed by the keeper.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.inner.sampling.borrow().current_time
    }

    #[must_use]
    pub fn update_frequency(&self) -> f64 {
        self.inner.sampling.borrow().update_frequency
    }

    /// A playing keeper has already scheduled this object's next frame, so
    /// the new grid applies from the frame after it.
    pub fn set_update_frequency(&self, frequency: f64) -> Result<()> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(report!(
                "set_update_frequency",
                TimeKeeperError::InvalidFrequency(frequency)
            ));
        }
        self.inner.sampling.borrow_mut().update_frequency = frequency;
        Ok(())
    }

    #[must_use]
    pub fn time_offset(&self) -> f64 {
        self.inner.sampling.borrow().time_offset
    }

    /// Shift the frame grid by `offset` seconds. Like the frequency, this
    /// takes effect after the next scheduled frame.
    pub fn set_time_offset(&self, offset: f64) {
        self.inner.sampling.borrow_mut().time_offset = offset;
    }

    /// Replace the frame grid. `None` restores the frequency grid. Takes
    /// effect after the next scheduled frame.
    pub fn set_next_time_function(&self, next: Option<NextTimeFn>) {
        self.inner.next_time_fn.replace(next);
    }

    /// Whether this object belongs to a time keeper.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.attached.get()
    }

    /// The first frame strictly after `time` (forward) or strictly before it
    /// (backward).
    #[must_use]
    pub fn next_callback_time(&self, time: f64, direction: PlayDirection) -> f64 {
        let custom = self.inner.next_time_fn.borrow().clone();
        if let Some(next) = custom {
            return next(time, direction);
        }
        let sampling = self.inner.sampling.borrow();
        let (frequency, offset) = (sampling.update_frequency, sampling.time_offset);
        let frames = snap((time - offset) * frequency);
        let frame = match direction {
            PlayDirection::Forward => frames.floor() + 1.0,
            PlayDirection::Backward => frames.ceil() - 1.0,
        };
        frame / frequency + offset
    }

    /// Whether `time` is one of this object's frames.
    #[must_use]
    pub fn is_valid_callback_time(&self, time: f64) -> bool {
        let custom = self.inner.next_time_fn.borrow().clone();
        if let Some(next) = custom {
            return (next(time - FRAME_TOLERANCE, PlayDirection::Forward) - time).abs()
                < FRAME_TOLERANCE;
        }
        let sampling = self.inner.sampling.borrow();
        let frames = (time - sampling.time_offset) * sampling.update_frequency;
        (frames - frames.round()).abs() < FRAME_TOLERANCE
    }

    /// Subscribe to time changes. The callback receives the object and its
    /// new current time.
    pub fn add_callback(&self, callback: impl FnMut(&TimeObject, f64) + 'static) -> ObjectCallbackId {
        let id = ObjectCallbackId(self.inner.next_client_id.get() + 1);
        self.inner.next_client_id.set(id.0);
        self.inner
            .clients
            .borrow_mut()
            .push((id, Rc::new(RefCell::new(Box::new(callback)))));
        id
    }

    pub fn remove_callback(&self, id: ObjectCallbackId) -> Result<()> {
        let removed = {
            let mut clients = self.inner.clients.borrow_mut();
            clients
                .iter()
                .position(|(client, _)| *client == id)
                .map(|index| clients.remove(index))
        };
        match removed {
            Some(entry) => {
                drop(entry);
                Ok(())
            }
            None => Err(report!(
                "time_object_remove_callback",
                TimeKeeperError::CallbackNotFound { id: id.0 }
            )),
        }
    }

    /// Same object, not just equal settings.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Keeper side ──────────────────────────────────────────────────

    pub(crate) fn set_current_time(&self, time: f64) {
        self.inner.sampling.borrow_mut().current_time = time;
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        self.inner.attached.set(attached);
    }

    /// Call every client with the current time.
    pub(crate) fn notify_clients(&self) {
        let time = self.current_time();
        let clients: Vec<(ObjectCallbackId, ClientFn)> = self
            .inner
            .clients
            .borrow()
            .iter()
            .map(|(id, client)| (*id, Rc::clone(client)))
            .collect();
        trace!(object = %self.inner.name, time, clients = clients.len(), "time object update");
        for (id, client) in clients {
            // Removed by an earlier client in this round.
            if !self.inner.clients.borrow().iter().any(|(live, _)| *live == id) {
                continue;
            }
            match client.try_borrow_mut() {
                Ok(mut callback) => callback(self, time),
                Err(_) => warn!(
                    object = %self.inner.name,
                    callback = id.0,
                    "skipping re-entrant time object callback"
                ),
            }
        }
    }
}

/// Round values within tolerance of an integer onto it.
fn snap(frames: f64) -> f64 {
    let nearest = frames.round();
    if (frames - nearest).abs() < FRAME_TOLERANCE {
        nearest
    } else {
        frames
    }
}

impl fmt::Debug for TimeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sampling = self.inner.sampling.borrow();
        f.debug_struct("TimeObject")
            .field("name", &self.inner.name)
            .field("current_time", &sampling.current_time)
            .field("update_frequency", &sampling.update_frequency)
            .field("time_offset", &sampling.time_offset)
            .field("custom_grid", &self.inner.next_time_fn.borrow().is_some())
            .field("attached", &self.inner.attached.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_is_ten_hertz() {
        let object = TimeObject::new("t");
        assert_eq!(object.update_frequency(), 10.0);
        assert_eq!(object.next_callback_time(0.0, PlayDirection::Forward), 0.1);
        assert_eq!(object.next_callback_time(0.25, PlayDirection::Forward), 0.3);
        assert_eq!(object.next_callback_time(0.25, PlayDirection::Backward), 0.2);
    }

    #[test]
    fn grid_times_step_to_the_neighbouring_frame() {
        let object = TimeObject::with_frequency("t", 10.0).expect("frequency");
        // 0.1 + 0.2 lands just above 0.3.
        let time = 0.1 + 0.2;
        assert_eq!(object.next_callback_time(time, PlayDirection::Forward), 0.4);
        assert_eq!(object.next_callback_time(time, PlayDirection::Backward), 0.2);
    }

    #[test]
    fn offset_shifts_the_grid() {
        let object = TimeObject::with_frequency("t", 2.0).expect("frequency");
        object.set_time_offset(0.25);
        assert_eq!(object.next_callback_time(0.3, PlayDirection::Forward), 0.75);
        assert_eq!(object.next_callback_time(0.3, PlayDirection::Backward), 0.25);
        assert!(object.is_valid_callback_time(1.25));
        assert!(!object.is_valid_callback_time(1.0));
    }

    #[test]
    fn custom_grid_takes_precedence() {
        let object = TimeObject::new("t");
        let grid: NextTimeFn = Rc::new(|time, direction| match direction {
            PlayDirection::Forward => (time / 3.0).floor() * 3.0 + 3.0,
            PlayDirection::Backward => (time / 3.0).ceil() * 3.0 - 3.0,
        });
        object.set_next_time_function(Some(grid));
        assert_eq!(object.next_callback_time(1.0, PlayDirection::Forward), 3.0);
        assert!(object.is_valid_callback_time(6.0));
        assert!(!object.is_valid_callback_time(5.0));

        object.set_next_time_function(None);
        assert_eq!(object.next_callback_time(1.0, PlayDirection::Forward), 1.1);
    }

    #[test]
    fn rejects_bad_frequencies() {
        let object = TimeObject::new("t");
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                object.set_update_frequency(bad),
                Err(TimeKeeperError::InvalidFrequency(_))
            ));
        }
        assert_eq!(object.update_frequency(), 10.0);
    }

    #[test]
    fn clients_see_current_time_until_removed() {
        let object = TimeObject::new("t");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = object.add_callback(move |_, time| sink.borrow_mut().push(time));

        object.set_current_time(1.5);
        object.notify_clients();
        object.remove_callback(id).expect("registered");
        object.notify_clients();

        assert_eq!(*seen.borrow(), vec![1.5]);
        assert!(object.remove_callback(id).is_err());
    }

    #[test]
    fn client_removing_a_later_client_prevents_its_call() {
        let object = TimeObject::new("t");
        let calls = Rc::new(Cell::new(0));
        let victim = Rc::new(Cell::new(None));

        let target = Rc::clone(&victim);
        object.add_callback(move |object, _| {
            if let Some(id) = target.get() {
                object.remove_callback(id).expect("still registered");
            }
        });
        let counter = Rc::clone(&calls);
        victim.set(Some(object.add_callback(move |_, _| counter.set(counter.get() + 1))));

        object.notify_clients();
        assert_eq!(calls.get(), 0);
    }
}

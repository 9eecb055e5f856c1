#![forbid(unsafe_code)]

//! Narrow timer interface over a [`Dispatcher`].
//!
//! Timer clients depend on [`TimerPackage`] instead of the whole dispatcher.
//! It holds no state of its own beyond a strong reference to the dispatcher.

use cmloop_core::Timestamp;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::handle::TimeoutHandle;

/// Handle to a pending timer callback.
pub type TimerCallback = TimeoutHandle;

#[derive(Debug, Clone)]
pub struct TimerPackage {
    dispatcher: Dispatcher,
}

impl TimerPackage {
    #[must_use]
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
        }
    }

    /// Run `callback` once after `secs` seconds plus `nanos` nanoseconds.
    pub fn add_callback(
        &self,
        secs: u64,
        nanos: u64,
        callback: impl FnOnce() + 'static,
    ) -> Result<TimerCallback> {
        self.dispatcher.add_timeout(secs, nanos, callback)
    }

    /// Cancel the callback in `slot`, if any, and clear the slot.
    pub fn destroy_timer_callback(&self, slot: &mut Option<TimerCallback>) -> Result<()> {
        match slot.take() {
            Some(handle) => self.dispatcher.remove_timeout(handle),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.dispatcher.now()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

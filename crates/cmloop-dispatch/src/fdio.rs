#![forbid(unsafe_code)]

//! Persistent per-descriptor read and write callbacks.
//!
//! An [`Fdio`] wraps one descriptor in a descriptor source whose interest
//! follows the installed callbacks: read interest while a read callback is
//! set, write interest while a write callback is set. Callbacks are not one
//! shot; they run every cycle the descriptor is ready until cleared.
//!
//! A read callback also runs on hang-up and error conditions, so a closed
//! peer is observed as a final read.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use cmloop_core::report;
use tracing::debug;

use crate::descriptor_set::{Descriptor, DescriptorSet, Interest, Readiness};
use crate::dispatcher::{Dispatcher, WeakDispatcher};
use crate::error::{DispatchError, Result};
use crate::handle::DescriptorHandle;
use crate::source::DescriptorSource;

/// Callback run with the ready descriptor.
pub type FdioFn = Box<dyn FnMut(Descriptor)>;

#[derive(Default)]
struct Slot {
    armed: bool,
    /// `None` while running.
    callback: Option<FdioFn>,
    /// Bumped on every set or clear so a running callback knows it was replaced.
    version: u64,
}

impl Slot {
    fn set(&mut self, callback: Option<FdioFn>) -> Option<FdioFn> {
        self.version += 1;
        self.armed = callback.is_some();
        std::mem::replace(&mut self.callback, callback)
    }
}

#[derive(Default)]
struct FdioState {
    read: Slot,
    write: Slot,
}

fn read_slot(state: &mut FdioState) -> &mut Slot {
    &mut state.read
}

fn write_slot(state: &mut FdioState) -> &mut Slot {
    &mut state.write
}

struct FdioSource {
    fd: Descriptor,
    state: Rc<RefCell<FdioState>>,
    ready: Readiness,
}

impl FdioSource {
    fn invoke(&self, pick: fn(&mut FdioState) -> &mut Slot) {
        let (callback, version) = {
            let mut state = self.state.borrow_mut();
            let slot = pick(&mut state);
            (slot.callback.take(), slot.version)
        };
        let Some(mut callback) = callback else {
            return;
        };
        callback(self.fd);
        let orphan = {
            let mut state = self.state.borrow_mut();
            let slot = pick(&mut state);
            if slot.version == version {
                slot.callback = Some(callback);
                None
            } else {
                Some(callback)
            }
        };
        drop(orphan);
    }
}

impl DescriptorSource for FdioSource {
    fn query(&mut self, set: &mut DescriptorSet) -> bool {
        let state = self.state.borrow();
        let mut interest = Interest::empty();
        if state.read.armed {
            interest |= Interest::READ;
        }
        if state.write.armed {
            interest |= Interest::WRITE;
        }
        if !interest.is_empty() {
            set.add(self.fd, interest);
        }
        true
    }

    fn check(&mut self, set: &DescriptorSet) -> bool {
        self.ready = set.readiness(self.fd);
        !self.ready.is_empty()
    }

    fn dispatch(&mut self) -> bool {
        let ready = std::mem::take(&mut self.ready);
        if ready.intersects(Interest::READ | Interest::ERROR) {
            self.invoke(read_slot);
        }
        if ready.contains(Interest::WRITE) {
            self.invoke(write_slot);
        }
        true
    }
}

/// Read/write callbacks bound to one descriptor.
///
/// Dropping the `Fdio` unregisters it from the dispatcher.
pub struct Fdio {
    dispatcher: WeakDispatcher,
    handle: DescriptorHandle,
    fd: Descriptor,
    state: Rc<RefCell<FdioState>>,
}

impl Fdio {
    pub(crate) fn new(dispatcher: &Dispatcher, fd: Descriptor) -> Result<Self> {
        if fd < 0 {
            return Err(report!(
                "create_fdio",
                DispatchError::invalid(format!("negative descriptor {fd}"))
            ));
        }
        dispatcher.ensure_live("create_fdio")?;
        if !dispatcher.claim_fdio_descriptor(fd) {
            return Err(report!(
                "create_fdio",
                DispatchError::Registration {
                    message: format!("descriptor {fd} already has an fdio"),
                }
            ));
        }
        let state = Rc::new(RefCell::new(FdioState::default()));
        let handle = dispatcher
            .add_descriptor_source(FdioSource {
                fd,
                state: Rc::clone(&state),
                ready: Readiness::empty(),
            })
            .inspect_err(|_| dispatcher.release_fdio_descriptor(fd))?;
        debug!(fd, %handle, "fdio created");
        Ok(Self {
            dispatcher: dispatcher.downgrade(),
            handle,
            fd,
            state,
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> Descriptor {
        self.fd
    }

    #[must_use]
    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }

    /// Install the read callback, replacing any previous one.
    pub fn set_read_callback(&self, callback: impl FnMut(Descriptor) + 'static) {
        self.update(read_slot, Some(Box::new(callback)));
    }

    pub fn clear_read_callback(&self) {
        self.update(read_slot, None);
    }

    /// Install the write callback, replacing any previous one.
    pub fn set_write_callback(&self, callback: impl FnMut(Descriptor) + 'static) {
        self.update(write_slot, Some(Box::new(callback)));
    }

    pub fn clear_write_callback(&self) {
        self.update(write_slot, None);
    }

    #[must_use]
    pub fn has_read_callback(&self) -> bool {
        self.state.borrow().read.armed
    }

    #[must_use]
    pub fn has_write_callback(&self) -> bool {
        self.state.borrow().write.armed
    }

    /// Cancel both callbacks and unregister.
    pub fn destroy(self) {
        drop(self);
    }

    fn update(&self, pick: fn(&mut FdioState) -> &mut Slot, callback: Option<FdioFn>) {
        let previous = pick(&mut self.state.borrow_mut()).set(callback);
        drop(previous);
    }
}

impl Drop for Fdio {
    fn drop(&mut self) {
        let (read, write) = {
            let mut state = self.state.borrow_mut();
            (state.read.set(None), state.write.set(None))
        };
        drop((read, write));
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        if !dispatcher.is_destroyed() {
            dispatcher.release_fdio_descriptor(self.fd);
            // Already reported by the dispatcher if it fails.
            let _ = dispatcher.remove_descriptor_source(self.handle);
        }
    }
}

impl fmt::Debug for Fdio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fdio")
            .field("fd", &self.fd)
            .field("handle", &self.handle)
            .field("read", &self.has_read_callback())
            .field("write", &self.has_write_callback())
            .finish()
    }
}

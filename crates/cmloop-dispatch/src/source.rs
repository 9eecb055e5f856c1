#![forbid(unsafe_code)]

//! Foreign event sources integrated into the poll cycle.
//!
//! A [`DescriptorSource`] takes part in three phases of every dispatch cycle:
//!
//! 1. `query`: add descriptors of interest (and optionally a maximum wait)
//!    to the shared [`DescriptorSet`].
//! 2. `check`: after the poll, report whether the source has work pending.
//! 3. `dispatch`: do that work. Called once per cycle, only if `check` said so.
//!
//! Sources run in registration order. While a phase runs a source, that
//! source is detached from the registry, so it may register or remove any
//! source, itself included.

use std::fmt;

use crate::descriptor_set::{Descriptor, DescriptorSet};
use crate::handle::DescriptorHandle;

/// A foreign event provider driven by the dispatcher.
///
/// Returning `false` from any hook reports a failure for that hook; the
/// dispatcher logs it and carries on with the other sources.
pub trait DescriptorSource {
    fn query(&mut self, set: &mut DescriptorSet) -> bool;
    fn check(&mut self, set: &DescriptorSet) -> bool;
    fn dispatch(&mut self) -> bool;
}

/// A source assembled from three closures.
pub struct CallbackSource<Q, C, D> {
    query: Q,
    check: C,
    dispatch: D,
}

impl<Q, C, D> CallbackSource<Q, C, D>
where
    Q: FnMut(&mut DescriptorSet) -> bool,
    C: FnMut(&DescriptorSet) -> bool,
    D: FnMut() -> bool,
{
    pub fn new(query: Q, check: C, dispatch: D) -> Self {
        Self {
            query,
            check,
            dispatch,
        }
    }
}

impl<Q, C, D> DescriptorSource for CallbackSource<Q, C, D>
where
    Q: FnMut(&mut DescriptorSet) -> bool,
    C: FnMut(&DescriptorSet) -> bool,
    D: FnMut() -> bool,
{
    fn query(&mut self, set: &mut DescriptorSet) -> bool {
        (self.query)(set)
    }

    fn check(&mut self, set: &DescriptorSet) -> bool {
        (self.check)(set)
    }

    fn dispatch(&mut self) -> bool {
        (self.dispatch)()
    }
}

/// Read-interest source for one descriptor: calls back with the descriptor
/// whenever it polls readable (hang-up and error included).
pub struct SimpleSource<F> {
    fd: Descriptor,
    callback: F,
}

impl<F: FnMut(Descriptor) -> bool> SimpleSource<F> {
    pub fn new(fd: Descriptor, callback: F) -> Self {
        Self { fd, callback }
    }
}

impl<F: FnMut(Descriptor) -> bool> DescriptorSource for SimpleSource<F> {
    fn query(&mut self, set: &mut DescriptorSet) -> bool {
        set.add_read(self.fd);
        true
    }

    fn check(&mut self, set: &DescriptorSet) -> bool {
        set.is_readable(self.fd) || set.has_error(self.fd)
    }

    fn dispatch(&mut self) -> bool {
        (self.callback)(self.fd)
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

pub(crate) type BoxedSource = Box<dyn DescriptorSource>;

struct DescriptorEntry {
    handle: DescriptorHandle,
    /// `None` while a phase is running the source.
    source: Option<BoxedSource>,
    pending: bool,
}

#[derive(Default)]
pub(crate) struct DescriptorRegistry {
    entries: Vec<DescriptorEntry>,
}

impl fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorRegistry")
            .field("sources", &self.entries.len())
            .finish()
    }
}

impl DescriptorRegistry {
    pub(crate) fn insert(&mut self, handle: DescriptorHandle, source: BoxedSource) {
        self.entries.push(DescriptorEntry {
            handle,
            source: Some(source),
            pending: false,
        });
    }

    /// Unregister `handle`. `Some(None)` means the source is currently
    /// running and will be dropped when it returns; `None` means stale.
    pub(crate) fn remove(&mut self, handle: DescriptorHandle) -> Option<Option<BoxedSource>> {
        let index = self.index(handle)?;
        Some(self.entries.remove(index).source)
    }

    /// Registered handles, in registration order.
    #[must_use]
    pub(crate) fn handles(&self) -> Vec<DescriptorHandle> {
        self.entries.iter().map(|entry| entry.handle).collect()
    }

    /// Detach a source to run one of its hooks.
    pub(crate) fn take(&mut self, handle: DescriptorHandle) -> Option<BoxedSource> {
        let index = self.index(handle)?;
        self.entries[index].source.take()
    }

    /// Re-attach a source after a hook. A source removed meanwhile is handed
    /// back so it can be dropped outside the registry borrow.
    pub(crate) fn restore(
        &mut self,
        handle: DescriptorHandle,
        source: BoxedSource,
    ) -> Option<BoxedSource> {
        match self.index(handle) {
            Some(index) => {
                self.entries[index].source = Some(source);
                None
            }
            None => Some(source),
        }
    }

    pub(crate) fn set_pending(&mut self, handle: DescriptorHandle, pending: bool) {
        if let Some(index) = self.index(handle) {
            self.entries[index].pending = pending;
        }
    }

    /// Read and clear the pending flag.
    pub(crate) fn take_pending(&mut self, handle: DescriptorHandle) -> bool {
        self.index(handle)
            .is_some_and(|index| std::mem::take(&mut self.entries[index].pending))
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<BoxedSource> {
        self.entries
            .drain(..)
            .filter_map(|entry| entry.source)
            .collect()
    }

    fn index(&self, handle: DescriptorHandle) -> Option<usize> {
        self.entries.iter().position(|entry| entry.handle == handle)
    }
}

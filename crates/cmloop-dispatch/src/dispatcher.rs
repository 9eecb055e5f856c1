#![forbid(unsafe_code)]

//! The event dispatcher.
//!
//! One [`Dispatcher`] multiplexes descriptor readiness, one-shot timeouts and
//! prioritized idle work for a single thread. Every call to
//! [`do_one_event`](Dispatcher::do_one_event) runs one dispatch cycle:
//!
//! 1. **Query**: every descriptor source adds its descriptors (and optionally
//!    a maximum wait) to one [`DescriptorSet`].
//! 2. **Wait bound**: zero if idle work is queued; otherwise the time to the
//!    earliest deadline, the smallest suggested wait, or both (whichever is
//!    shorter). With no bound at all the poll waits indefinitely.
//! 3. **Poll**: the single blocking call, made by the [`Reactor`].
//! 4. **Check**: every source reports whether it has work pending.
//! 5. **Dispatch**: pending sources run, in registration order.
//! 6. **Timeouts**: every timeout due at the start of this phase fires, in
//!    `(deadline, id)` order. Each record is destroyed before the next fires.
//! 7. **Idle**: a pending special idle runs; otherwise, if nothing fired in
//!    phases 5 and 6, exactly one ordinary idle runs.
//!
//! # Design
//!
//! `Dispatcher` is a cheap `Rc` handle so callbacks can reach the dispatcher
//! that runs them. Callbacks stored in the dispatcher should capture a
//! [`WeakDispatcher`] to avoid keeping it alive through a cycle.
//!
//! No registry borrow is ever held while user code runs. Each phase first
//! takes a snapshot of the handles it will visit, then detaches one record at
//! a time. Callbacks may therefore register or cancel anything, and may even
//! run a nested [`do_one_event`](Dispatcher::do_one_event).
//!
//! # Invariants
//!
//! - A timeout fires at most once. Its handle is stale as soon as it fires.
//! - A timeout registered during the timeout phase fires no earlier than the
//!   next cycle.
//! - At most one ordinary idle runs per cycle, and none runs in a cycle where
//!   a descriptor was dispatched or a timeout fired.
//! - A pending special idle runs before any ordinary idle is considered.
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Cancel a fired, removed or unknown handle | `StaleHandle`, reported |
//! | Registry at `max_registrations` | `CapacityExceeded`, reported |
//! | Any call after [`destroy`](Dispatcher::destroy) | `Destroyed`, reported |
//! | Poll interrupted (`EINTR`) | treated as "nothing ready", cycle continues |
//! | Other poll failure | `Poll`, reported, cycle abandoned |
//! | Nothing could ever wake the poll | warning, `do_one_event` returns `Ok(false)` |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::rc::{Rc, Weak};

use ahash::AHashSet;
use cmloop_core::{LabClock, TimeSource, Timestamp, report};
use tracing::{debug, info, trace, warn};
use web_time::Duration;

use crate::config::DispatcherConfig;
use crate::descriptor_set::{Descriptor, DescriptorSet};
use crate::error::{DispatchError, Result};
use crate::fdio::Fdio;
use crate::handle::{DescriptorHandle, HandleKind, IdAllocator, IdleHandle, TimeoutHandle};
use crate::idle::{IdlePriority, IdleRegistry, IdleStatus, SpecialIdle};
use crate::reactor::{LabReactor, LabReadiness, Reactor};
use crate::source::{CallbackSource, DescriptorRegistry, DescriptorSource, SimpleSource};
use crate::timeout::TimeoutRegistry;

/// Counters describing the work a dispatcher has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Dispatch cycles started.
    pub cycles: u64,
    /// Reactor polls performed.
    pub polls: u64,
    pub descriptor_dispatches: u64,
    pub timeouts_fired: u64,
    pub idle_runs: u64,
    pub special_idle_runs: u64,
}

struct Inner {
    clock: TimeSource,
    config: DispatcherConfig,
    reactor: RefCell<Box<dyn Reactor>>,
    reactor_name: &'static str,
    ids: IdAllocator,
    timeouts: RefCell<TimeoutRegistry>,
    idles: RefCell<IdleRegistry>,
    special: RefCell<Option<SpecialIdle>>,
    sources: RefCell<DescriptorRegistry>,
    /// Descriptors currently wrapped by an [`Fdio`].
    fdio_descriptors: RefCell<AHashSet<Descriptor>>,
    continue_flag: Cell<bool>,
    destroyed: Cell<bool>,
    depth: Cell<u32>,
    stats: Cell<DispatcherStats>,
}

/// Handle to a single-threaded event dispatcher.
///
/// Clones share the same dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<Inner>,
}

/// Non-owning handle to a [`Dispatcher`].
#[derive(Clone, Default)]
pub struct WeakDispatcher {
    inner: Weak<Inner>,
}

impl WeakDispatcher {
    /// The dispatcher, if any strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.inner.upgrade().map(|inner| Dispatcher { inner })
    }
}

impl fmt::Debug for WeakDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDispatcher")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

struct DepthGuard<'a>(&'a Cell<u32>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

fn shorter(current: Option<Duration>, candidate: Option<Duration>) -> Option<Duration> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl Dispatcher {
    // ── Constructors ─────────────────────────────────────────────────

    /// Dispatcher over `poll(2)` and the real monotonic clock.
    #[cfg(unix)]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    #[cfg(unix)]
    #[must_use]
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self::with_reactor(crate::reactor::PollReactor::new(), TimeSource::real(), config)
    }

    /// Dispatcher over an arbitrary reactor and time source.
    #[must_use]
    pub fn with_reactor(
        reactor: impl Reactor + 'static,
        clock: TimeSource,
        config: DispatcherConfig,
    ) -> Self {
        let reactor_name = reactor.name();
        debug!(reactor = reactor_name, lab = clock.is_lab(), "dispatcher created");
        Self {
            inner: Rc::new(Inner {
                clock,
                config,
                reactor: RefCell::new(Box::new(reactor)),
                reactor_name,
                ids: IdAllocator::default(),
                timeouts: RefCell::new(TimeoutRegistry::default()),
                idles: RefCell::new(IdleRegistry::default()),
                special: RefCell::new(None),
                sources: RefCell::new(DescriptorRegistry::default()),
                fdio_descriptors: RefCell::new(AHashSet::new()),
                continue_flag: Cell::new(true),
                destroyed: Cell::new(false),
                depth: Cell::new(0),
                stats: Cell::new(DispatcherStats::default()),
            }),
        }
    }

    /// Deterministic dispatcher over a [`LabClock`] and a scripted reactor.
    #[must_use]
    pub fn lab(clock: &LabClock) -> (Self, LabReadiness) {
        Self::lab_with_config(clock, DispatcherConfig::default())
    }

    #[must_use]
    pub fn lab_with_config(clock: &LabClock, config: DispatcherConfig) -> (Self, LabReadiness) {
        let (reactor, readiness) = LabReactor::new(clock);
        (
            Self::with_reactor(reactor, TimeSource::lab(clock), config),
            readiness,
        )
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same dispatcher.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Current time on the dispatcher's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    #[must_use]
    pub fn clock(&self) -> &TimeSource {
        &self.inner.clock
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn reactor_name(&self) -> &'static str {
        self.inner.reactor_name
    }

    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        self.inner.stats.get()
    }

    #[must_use]
    pub fn pending_timeouts(&self) -> usize {
        self.inner.timeouts.borrow().len()
    }

    /// Deadline of a pending timeout.
    #[must_use]
    pub fn timeout_deadline(&self, handle: TimeoutHandle) -> Option<Timestamp> {
        self.inner.timeouts.borrow().deadline(handle)
    }

    /// Live ordinary idle registrations (queued or running).
    #[must_use]
    pub fn pending_idles(&self) -> usize {
        self.inner.idles.borrow().len()
    }

    #[must_use]
    pub fn has_special_idle(&self) -> bool {
        self.inner.special.borrow().is_some()
    }

    #[must_use]
    pub fn descriptor_sources(&self) -> usize {
        self.inner.sources.borrow().len()
    }

    /// Whether the main loop will keep running.
    #[must_use]
    pub fn should_continue(&self) -> bool {
        self.inner.continue_flag.get()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Nesting depth of `do_one_event` calls in progress.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.inner.depth.get()
    }

    // ── Timeouts ─────────────────────────────────────────────────────

    /// Run `callback` once, `delay_secs` seconds plus `delay_nanos`
    /// nanoseconds from now. Nanoseconds may exceed one second.
    pub fn add_timeout(
        &self,
        delay_secs: u64,
        delay_nanos: u64,
        callback: impl FnOnce() + 'static,
    ) -> Result<TimeoutHandle> {
        let delay = Timestamp::from_parts(delay_secs, delay_nanos).as_duration();
        self.insert_timeout("add_timeout", self.now().saturating_add(delay), Box::new(callback))
    }

    /// [`add_timeout`](Self::add_timeout) with a [`Duration`].
    pub fn add_timeout_after(
        &self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> Result<TimeoutHandle> {
        self.insert_timeout("add_timeout", self.now().saturating_add(delay), Box::new(callback))
    }

    /// Run `callback` once the clock reaches the absolute time
    /// `abs_secs`/`abs_nanos` (measured from the clock epoch). A deadline in
    /// the past fires on the next cycle.
    pub fn add_timeout_at(
        &self,
        abs_secs: u64,
        abs_nanos: u64,
        callback: impl FnOnce() + 'static,
    ) -> Result<TimeoutHandle> {
        let deadline = Timestamp::from_parts(abs_secs, abs_nanos);
        self.insert_timeout("add_timeout_at", deadline, Box::new(callback))
    }

    fn insert_timeout(
        &self,
        operation: &'static str,
        deadline: Timestamp,
        callback: Box<dyn FnOnce()>,
    ) -> Result<TimeoutHandle> {
        self.ensure_live(operation)?;
        let len = self.inner.timeouts.borrow().len();
        self.ensure_capacity(operation, HandleKind::Timeout, len)?;
        let handle = TimeoutHandle(self.inner.ids.next());
        self.inner
            .timeouts
            .borrow_mut()
            .insert(handle, deadline, callback);
        trace!(%handle, %deadline, "timeout registered");
        Ok(handle)
    }

    /// Cancel a pending timeout. The callback is dropped without running.
    pub fn remove_timeout(&self, handle: TimeoutHandle) -> Result<()> {
        let removed = self.inner.timeouts.borrow_mut().remove(handle);
        match removed {
            Some(record) => {
                trace!(%handle, deadline = %record.deadline, "timeout cancelled");
                drop(record);
                Ok(())
            }
            None => Err(report!(
                "remove_timeout",
                DispatchError::stale(HandleKind::Timeout, handle.id())
            )),
        }
    }

    // ── Idle callbacks ───────────────────────────────────────────────

    /// Register recurring idle work. The callback runs again for as long as
    /// it returns [`IdleStatus::MoreWork`].
    pub fn add_idle(
        &self,
        callback: impl FnMut() -> IdleStatus + 'static,
        priority: IdlePriority,
    ) -> Result<IdleHandle> {
        self.ensure_live("add_idle")?;
        let len = self.inner.idles.borrow().len();
        self.ensure_capacity("add_idle", HandleKind::Idle, len)?;
        let handle = IdleHandle(self.inner.ids.next());
        self.inner
            .idles
            .borrow_mut()
            .insert(handle, priority, Box::new(callback));
        trace!(%handle, %priority, "idle registered");
        Ok(handle)
    }

    /// Remove an ordinary or special idle callback. A callback that is
    /// running when removed finishes its current call and is then dropped.
    pub fn remove_idle(&self, handle: IdleHandle) -> Result<()> {
        let special = {
            let mut slot = self.inner.special.borrow_mut();
            if slot.as_ref().is_some_and(|special| special.handle == handle) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(special) = special {
            trace!(%handle, "special idle removed");
            drop(special);
            return Ok(());
        }

        let removed = self.inner.idles.borrow_mut().remove(handle);
        match removed {
            Some(callback) => {
                trace!(%handle, running = callback.is_none(), "idle removed");
                drop(callback);
                Ok(())
            }
            None => Err(report!(
                "remove_idle",
                DispatchError::stale(HandleKind::Idle, handle.id())
            )),
        }
    }

    /// Install the special idle callback, replacing any previous one, and
    /// mark it pending.
    ///
    /// The special idle runs before the ordinary queue is consulted and stays
    /// pending while it returns [`IdleStatus::MoreWork`]. Any cycle that
    /// dispatches a descriptor, fires a timeout or runs an ordinary idle marks
    /// it pending again.
    pub fn set_special_idle(
        &self,
        callback: impl FnMut() -> IdleStatus + 'static,
        priority: IdlePriority,
    ) -> Result<IdleHandle> {
        self.ensure_live("set_special_idle")?;
        let handle = IdleHandle(self.inner.ids.next());
        let previous = self.inner.special.replace(Some(SpecialIdle {
            handle,
            priority,
            pending: true,
            callback: Some(Box::new(callback)),
        }));
        debug!(
            %handle,
            %priority,
            replaced = previous.as_ref().map(|special| special.handle.id()),
            "special idle installed"
        );
        drop(previous);
        Ok(handle)
    }

    /// Run exactly one ordinary idle callback, bypassing the poll.
    ///
    /// For hosts whose own main loop hands out idle time. Returns whether
    /// idle work remains queued.
    pub fn process_idle_event(&self) -> bool {
        if self.inner.destroyed.get() {
            return false;
        }
        self.run_one_idle();
        self.inner.idles.borrow().queued() > 0
    }

    // ── Descriptor sources ───────────────────────────────────────────

    /// Integrate a foreign event source into the poll cycle.
    pub fn add_descriptor_source(
        &self,
        source: impl DescriptorSource + 'static,
    ) -> Result<DescriptorHandle> {
        self.ensure_live("add_descriptor_source")?;
        let len = self.inner.sources.borrow().len();
        self.ensure_capacity("add_descriptor_source", HandleKind::Descriptor, len)?;
        let handle = DescriptorHandle(self.inner.ids.next());
        self.inner
            .sources
            .borrow_mut()
            .insert(handle, Box::new(source));
        trace!(%handle, "descriptor source registered");
        Ok(handle)
    }

    /// [`add_descriptor_source`](Self::add_descriptor_source) from three closures.
    pub fn add_descriptor_callback(
        &self,
        query: impl FnMut(&mut DescriptorSet) -> bool + 'static,
        check: impl FnMut(&DescriptorSet) -> bool + 'static,
        dispatch: impl FnMut() -> bool + 'static,
    ) -> Result<DescriptorHandle> {
        self.add_descriptor_source(CallbackSource::new(query, check, dispatch))
    }

    /// Call `callback(fd)` whenever `fd` is readable.
    pub fn add_simple_descriptor_callback(
        &self,
        fd: Descriptor,
        callback: impl FnMut(Descriptor) -> bool + 'static,
    ) -> Result<DescriptorHandle> {
        if fd < 0 {
            return Err(report!(
                "add_simple_descriptor_callback",
                DispatchError::invalid(format!("negative descriptor {fd}"))
            ));
        }
        self.add_descriptor_source(SimpleSource::new(fd, callback))
    }

    pub fn remove_descriptor_source(&self, handle: DescriptorHandle) -> Result<()> {
        let removed = self.inner.sources.borrow_mut().remove(handle);
        match removed {
            Some(source) => {
                trace!(%handle, running = source.is_none(), "descriptor source removed");
                drop(source);
                Ok(())
            }
            None => Err(report!(
                "remove_descriptor_source",
                DispatchError::stale(HandleKind::Descriptor, handle.id())
            )),
        }
    }

    /// Persistent read/write callbacks for `fd`. See [`Fdio`].
    ///
    /// A descriptor can be wrapped by one `Fdio` at a time.
    pub fn create_fdio(&self, fd: Descriptor) -> Result<Fdio> {
        Fdio::new(self, fd)
    }

    pub(crate) fn claim_fdio_descriptor(&self, fd: Descriptor) -> bool {
        self.inner.fdio_descriptors.borrow_mut().insert(fd)
    }

    pub(crate) fn release_fdio_descriptor(&self, fd: Descriptor) {
        self.inner.fdio_descriptors.borrow_mut().remove(&fd);
    }

    // ── Main loop ────────────────────────────────────────────────────

    /// Run one dispatch cycle. Returns whether the caller should keep looping.
    pub fn do_one_event(&self) -> Result<bool> {
        self.ensure_live("do_one_event")?;
        let _depth = DepthGuard::enter(&self.inner.depth);
        self.bump(|stats| stats.cycles += 1);

        let mut set = DescriptorSet::new();
        self.query_phase(&mut set);

        let wait = self.poll_wait(&set);
        if wait.is_none() && set.is_empty() {
            warn!("nothing can wake the dispatcher; not blocking");
            return Ok(false);
        }

        trace!(
            depth = self.inner.depth.get(),
            descriptors = set.len(),
            wait_us = wait.map(|w| w.as_micros().min(u128::from(u64::MAX)) as u64),
            "polling"
        );
        let polled = self.inner.reactor.borrow_mut().poll(&mut set, wait);
        self.bump(|stats| stats.polls += 1);
        match polled {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                debug!("poll interrupted");
                set.clear_readiness();
            }
            Err(err) => return Err(report!("do_one_event", DispatchError::Poll(err))),
        }

        self.check_phase(&set);
        let dispatched = self.dispatch_phase();
        let fired = self.timeout_phase();
        self.idle_phase(dispatched + fired > 0);
        Ok(self.inner.continue_flag.get())
    }

    /// Run dispatch cycles until [`stop_main_loop`](Self::stop_main_loop) is
    /// called or a cycle reports there is nothing left to wait for.
    pub fn run_main_loop(&self) -> Result<()> {
        info!(reactor = self.inner.reactor_name, "main loop started");
        while self.inner.continue_flag.get() {
            if !self.do_one_event()? {
                break;
            }
        }
        info!(cycles = self.stats().cycles, "main loop finished");
        Ok(())
    }

    /// Ask the main loop to stop. Observed at the top of the next cycle; a
    /// poll in progress is not interrupted.
    pub fn stop_main_loop(&self) {
        debug!("main loop stop requested");
        self.inner.continue_flag.set(false);
    }

    /// Release every registration without invoking it. Later registrations
    /// and cycles fail with [`DispatchError::Destroyed`].
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.inner.continue_flag.set(false);
        let timeouts = self.inner.timeouts.borrow_mut().drain();
        let idles = self.inner.idles.borrow_mut().drain();
        let special = self.inner.special.borrow_mut().take();
        let sources = self.inner.sources.borrow_mut().drain();
        self.inner.fdio_descriptors.borrow_mut().clear();
        info!(
            timeouts = timeouts.len(),
            idles = idles.len() + usize::from(special.is_some()),
            sources = sources.len(),
            "dispatcher destroyed, registrations released"
        );
        drop((timeouts, idles, special, sources));
    }

    // ── Cycle phases ─────────────────────────────────────────────────

    fn query_phase(&self, set: &mut DescriptorSet) {
        let handles = self.inner.sources.borrow().handles();
        for handle in handles {
            let Some(mut source) = self.inner.sources.borrow_mut().take(handle) else {
                continue;
            };
            if !source.query(set) {
                warn!(%handle, "descriptor source query failed");
            }
            self.restore_source(handle, source);
        }
    }

    fn poll_wait(&self, set: &DescriptorSet) -> Option<Duration> {
        if self.special_pending() || self.inner.idles.borrow().queued() > 0 {
            return Some(Duration::ZERO);
        }
        let now = self.now();
        let until_deadline = self
            .inner
            .timeouts
            .borrow()
            .earliest()
            .map(|deadline| deadline.saturating_duration_since(now));
        let wait = shorter(until_deadline, set.max_timeout());
        shorter(wait, self.inner.config.max_poll_wait)
    }

    fn check_phase(&self, set: &DescriptorSet) {
        let handles = self.inner.sources.borrow().handles();
        for handle in handles {
            let Some(mut source) = self.inner.sources.borrow_mut().take(handle) else {
                continue;
            };
            let pending = source.check(set);
            self.restore_source(handle, source);
            self.inner.sources.borrow_mut().set_pending(handle, pending);
        }
    }

    fn dispatch_phase(&self) -> usize {
        let handles = self.inner.sources.borrow().handles();
        let mut dispatched = 0;
        for handle in handles {
            if !self.inner.sources.borrow_mut().take_pending(handle) {
                continue;
            }
            let Some(mut source) = self.inner.sources.borrow_mut().take(handle) else {
                continue;
            };
            trace!(%handle, "dispatching descriptor source");
            if !source.dispatch() {
                warn!(%handle, "descriptor source dispatch failed");
            }
            self.restore_source(handle, source);
            self.bump(|stats| stats.descriptor_dispatches += 1);
            dispatched += 1;
        }
        dispatched
    }

    fn timeout_phase(&self) -> usize {
        let now = self.now();
        let due = self.inner.timeouts.borrow().due(now);
        let mut fired = 0;
        for handle in due {
            // An earlier callback in this phase may have cancelled it.
            let record = self.inner.timeouts.borrow_mut().take(handle);
            let Some(record) = record else {
                continue;
            };
            trace!(%handle, deadline = %record.deadline, %now, "timeout firing");
            (record.callback)();
            self.bump(|stats| stats.timeouts_fired += 1);
            fired += 1;
        }
        fired
    }

    fn idle_phase(&self, busy: bool) {
        if busy {
            self.rearm_special();
        }
        if self.run_special_idle() || busy {
            return;
        }
        if self.run_one_idle() {
            self.rearm_special();
        }
    }

    fn run_special_idle(&self) -> bool {
        let (handle, mut callback) = {
            let mut slot = self.inner.special.borrow_mut();
            let Some(special) = slot.as_mut().filter(|special| special.pending) else {
                return false;
            };
            // Already running in an outer cycle.
            let Some(callback) = special.callback.take() else {
                return false;
            };
            (special.handle, callback)
        };

        trace!(%handle, "running special idle");
        let status = callback();
        self.bump(|stats| stats.special_idle_runs += 1);

        let orphan = {
            let mut slot = self.inner.special.borrow_mut();
            match slot.as_mut() {
                Some(special) if special.handle == handle => {
                    special.callback = Some(callback);
                    if status == IdleStatus::Done {
                        special.pending = false;
                    }
                    None
                }
                // Replaced or removed while running.
                _ => Some(callback),
            }
        };
        drop(orphan);
        true
    }

    fn run_one_idle(&self) -> bool {
        let popped = self.inner.idles.borrow_mut().pop();
        let Some(mut popped) = popped else {
            return false;
        };
        trace!(handle = %popped.handle, priority = %popped.priority, "running idle");
        let status = (popped.callback)();
        self.bump(|stats| stats.idle_runs += 1);
        let finished = self.inner.idles.borrow_mut().finish(popped, status);
        drop(finished);
        true
    }

    fn special_pending(&self) -> bool {
        self.inner
            .special
            .borrow()
            .as_ref()
            .is_some_and(|special| special.pending && special.callback.is_some())
    }

    fn rearm_special(&self) {
        if let Some(special) = self.inner.special.borrow_mut().as_mut() {
            special.pending = true;
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn restore_source(&self, handle: DescriptorHandle, source: Box<dyn DescriptorSource>) {
        let orphan = self.inner.sources.borrow_mut().restore(handle, source);
        drop(orphan);
    }

    pub(crate) fn ensure_live(&self, operation: &'static str) -> Result<()> {
        if self.inner.destroyed.get() {
            return Err(report!(operation, DispatchError::Destroyed));
        }
        Ok(())
    }

    fn ensure_capacity(&self, operation: &'static str, kind: HandleKind, len: usize) -> Result<()> {
        let limit = self.inner.config.max_registrations;
        if len >= limit {
            return Err(report!(operation, DispatchError::CapacityExceeded { kind, limit }));
        }
        Ok(())
    }

    fn bump(&self, update: impl FnOnce(&mut DispatcherStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }
}

#[cfg(unix)]
impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("reactor", &self.inner.reactor_name)
            .field("timeouts", &self.pending_timeouts())
            .field("idles", &self.pending_idles())
            .field("special_idle", &self.has_special_idle())
            .field("sources", &self.descriptor_sources())
            .field("continue", &self.should_continue())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

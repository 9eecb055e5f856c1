#![deny(unsafe_code)]

//! Single-threaded event dispatcher.
//!
//! [`Dispatcher`] unifies three kinds of work behind one poll cycle:
//!
//! - **Descriptor sources** ([`DescriptorSource`], [`Fdio`], simple read
//!   callbacks) integrate foreign event providers through query, check and
//!   dispatch hooks.
//! - **Timeouts** fire once, in deadline order, at or after their deadline.
//! - **Idle callbacks** run one per quiet cycle, by [`IdlePriority`], with a
//!   special idle slot that preempts the queue.
//!
//! [`TimerPackage`] is the narrow facade timer clients depend on.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use cmloop_core::LabClock;
//! use cmloop_dispatch::{Dispatcher, IdlePriority, IdleStatus};
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let (dispatcher, _readiness) = Dispatcher::lab(&clock);
//!
//! let fired = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&fired);
//! dispatcher.add_timeout(0, 500_000_000, move || seen.set(seen.get() + 1))?;
//! dispatcher.add_idle(|| IdleStatus::Done, IdlePriority::SyncViewers)?;
//!
//! clock.advance(Duration::from_secs(1));
//! dispatcher.do_one_event()?;
//! assert_eq!(fired.get(), 1);
//! # Ok::<(), cmloop_dispatch::DispatchError>(())
//! ```

pub mod config;
pub mod descriptor_set;
pub mod dispatcher;
pub mod error;
pub mod fdio;
pub mod handle;
pub mod idle;
pub mod reactor;
pub mod source;
pub mod timeout;
pub mod timer_package;

pub use config::DispatcherConfig;
pub use descriptor_set::{Descriptor, DescriptorSet, Interest, Readiness};
pub use dispatcher::{Dispatcher, DispatcherStats, WeakDispatcher};
pub use error::{DispatchError, Result};
pub use fdio::Fdio;
pub use handle::{DescriptorHandle, HandleKind, IdleHandle, TimeoutHandle};
pub use idle::{IdlePriority, IdleStatus};
#[cfg(unix)]
pub use reactor::PollReactor;
pub use reactor::{LabReactor, LabReadiness, Reactor};
pub use source::{CallbackSource, DescriptorSource, SimpleSource};
pub use timer_package::{TimerCallback, TimerPackage};

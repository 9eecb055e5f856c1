#![forbid(unsafe_code)]

//! Simulation time on top of the cmloop dispatcher.
//!
//! A [`TimeKeeper`] plays a logical time forward or backward between optional
//! bounds. [`TimeObject`]s attached to it are sampled at their own update
//! frequency and call their clients whenever a frame of theirs comes due.
//! The keeper schedules its frames through a
//! [`TimerPackage`](cmloop_dispatch::TimerPackage), so the whole thing runs
//! on one thread inside the dispatcher loop.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use cmloop_core::LabClock;
//! use cmloop_dispatch::{Dispatcher, TimerPackage};
//! use cmloop_time::{PlayDirection, TimeKeeper, TimeKeeperConfig, TimeObject};
//!
//! let clock = LabClock::new();
//! let (dispatcher, readiness) = Dispatcher::lab(&clock);
//! readiness.set_auto_advance(true);
//!
//! let keeper = TimeKeeper::new("scene", &TimerPackage::new(&dispatcher), TimeKeeperConfig::default())?;
//! let object = TimeObject::with_frequency("sampler", 1.0)?;
//! let frames = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&frames);
//! object.add_callback(move |_, time| sink.borrow_mut().push(time));
//! keeper.add_time_object(&object)?;
//!
//! keeper.play(PlayDirection::Forward)?;
//! for _ in 0..3 {
//!     dispatcher.do_one_event()?;
//! }
//! assert_eq!(*frames.borrow(), vec![0.0, 1.0, 2.0, 3.0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod play;
pub mod time_keeper;
pub mod time_object;

pub use config::TimeKeeperConfig;
pub use error::{Result, TimeKeeperError};
pub use play::{KeeperEvent, PlayDirection, PlayMode};
pub use time_keeper::{KeeperCallbackId, TimeKeeper};
pub use time_object::{FRAME_TOLERANCE, NextTimeFn, ObjectCallbackId, TimeObject};

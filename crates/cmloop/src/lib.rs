#![forbid(unsafe_code)]

//! cmloop public facade crate.
//!
//! Re-exports the dispatcher, its timer package and, with the `time`
//! feature, the simulation clock.

pub use cmloop_core as core;
pub use cmloop_dispatch as dispatch;
#[cfg(feature = "time")]
pub use cmloop_time as time;

pub mod prelude {
    pub use cmloop_core::{LabClock, TimeSource, Timestamp};
    pub use cmloop_dispatch::{
        CallbackSource, Descriptor, DescriptorSet, DescriptorSource, DispatchError, Dispatcher,
        DispatcherConfig, Fdio, IdlePriority, IdleStatus, Interest, LabReadiness, TimerCallback,
        TimerPackage,
    };
    #[cfg(feature = "time")]
    pub use cmloop_time::{
        KeeperEvent, PlayDirection, PlayMode, TimeKeeper, TimeKeeperConfig, TimeKeeperError,
        TimeObject,
    };
}

#![forbid(unsafe_code)]

//! Opaque registration handles.
//!
//! A handle is a per-dispatcher id drawn from a counter that only moves
//! forward, so an id is never reissued. Cancelling with a handle whose record
//! already fired or was removed is detected as stale instead of touching a
//! different registration.

use std::cell::Cell;
use std::fmt;

/// Which registry a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Timeout,
    Idle,
    Descriptor,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Idle => "idle",
            Self::Descriptor => "descriptor",
        })
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw id, for logging.
            #[inline]
            #[must_use]
            pub const fn id(self) -> u64 {
                self.0
            }

            pub(crate) const KIND: HandleKind = $kind;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", Self::KIND, self.0)
            }
        }
    };
}

define_handle!(
    /// Cancellation handle for a pending one-shot timeout.
    TimeoutHandle,
    HandleKind::Timeout
);
define_handle!(
    /// Handle for an ordinary or special idle callback.
    IdleHandle,
    HandleKind::Idle
);
define_handle!(
    /// Handle for a registered descriptor source.
    DescriptorHandle,
    HandleKind::Descriptor
);

/// Source of fresh ids. One per dispatcher, shared by all registries.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    last: Cell<u64>,
}

impl IdAllocator {
    pub(crate) fn next(&self) -> u64 {
        let id = self.last.get() + 1;
        self.last.set(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_never_repeat() {
        let ids = IdAllocator::default();
        let a = ids.next();
        let b = ids.next();
        assert_eq!(a, 1);
        assert!(b > a);
    }

    #[test]
    fn handles_display_with_kind() {
        assert_eq!(TimeoutHandle(3).to_string(), "timeout#3");
        assert_eq!(IdleHandle(4).to_string(), "idle#4");
        assert_eq!(DescriptorHandle(5).to_string(), "descriptor#5");
    }
}

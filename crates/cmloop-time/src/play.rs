#![forbid(unsafe_code)]

//! Play direction, play mode and keeper events.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlayDirection {
    #[default]
    Forward,
    Backward,
}

impl PlayDirection {
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }

    /// `+1.0` forward, `-1.0` backward.
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Forward => 1.0,
            Self::Backward => -1.0,
        }
    }

    /// Whether `a` lies strictly past `b` when travelling this way.
    #[must_use]
    pub fn is_past(self, a: f64, b: f64) -> bool {
        match self {
            Self::Forward => a > b,
            Self::Backward => a < b,
        }
    }

    /// The later of two times when travelling this way.
    #[must_use]
    pub fn later(self, a: f64, b: f64) -> f64 {
        if self.is_past(b, a) { b } else { a }
    }

    /// The earlier of two times when travelling this way.
    #[must_use]
    pub fn earlier(self, a: f64, b: f64) -> f64 {
        if self.is_past(b, a) { a } else { b }
    }
}

impl fmt::Display for PlayDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        })
    }
}

/// What happens when playback reaches a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlayMode {
    /// Restart from the opposite bound.
    #[default]
    Loop,
    /// Stop at the bound.
    Once,
    /// Reverse direction at the bound.
    Swing,
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loop => "loop",
            Self::Once => "once",
            Self::Swing => "swing",
        })
    }
}

impl FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loop" => Ok(Self::Loop),
            "once" => Ok(Self::Once),
            "swing" => Ok(Self::Swing),
            other => Err(format!("unknown play mode {other:?}")),
        }
    }
}

bitflags! {
    /// Changes a time keeper announces to its subscribers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeeperEvent: u8 {
        const NEW_TIME = 1 << 0;
        const STARTED = 1 << 1;
        const STOPPED = 1 << 2;
        const CHANGED_DIRECTION = 1 << 3;
        const NEW_MINIMUM = 1 << 4;
        const NEW_MAXIMUM = 1 << 5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_ordering_helpers() {
        let fwd = PlayDirection::Forward;
        let back = PlayDirection::Backward;
        assert!(fwd.is_past(2.0, 1.0));
        assert!(back.is_past(1.0, 2.0));
        assert_eq!(fwd.later(1.0, 2.0), 2.0);
        assert_eq!(back.later(1.0, 2.0), 1.0);
        assert_eq!(fwd.earlier(1.0, 2.0), 1.0);
        assert_eq!(fwd.reversed(), back);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Swing".parse::<PlayMode>(), Ok(PlayMode::Swing));
        assert!("bounce".parse::<PlayMode>().is_err());
    }
}

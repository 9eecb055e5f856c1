#![forbid(unsafe_code)]

use cmloop_dispatch::DispatchError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TimeKeeperError>;

/// Failures reported by time keepers and time objects.
#[derive(Debug, Error)]
pub enum TimeKeeperError {
    #[error("time keeper is already playing in that direction")]
    AlreadyPlaying,

    /// `request_new_time` was called from a callback it triggered.
    #[error("request_new_time called re-entrantly")]
    ReentrantRequest,

    #[error("a frame timeout is already scheduled")]
    TimeoutAlreadyArmed,

    #[error("time keeper has no time objects to play")]
    NoTimeObjects,

    #[error("next frame {next} is behind the current time {current}")]
    NextTimeInPast { next: f64, current: f64 },

    #[error("time object {name:?} already belongs to a time keeper")]
    TimeObjectAttached { name: String },

    #[error("time object {name:?} is not attached to this time keeper")]
    TimeObjectNotFound { name: String },

    #[error("no callback with id {id}")]
    CallbackNotFound { id: u64 },

    #[error("play speed must be finite and positive, got {0}")]
    InvalidSpeed(f64),

    #[error("requested time must be finite, got {0}")]
    InvalidTime(f64),

    #[error("update frequency must be finite and positive, got {0}")]
    InvalidFrequency(f64),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#![forbid(unsafe_code)]

use cmloop_core::env;
use web_time::Duration;

/// Environment variable overriding [`TimeKeeperConfig::speed`].
pub const ENV_PLAY_SPEED: &str = "CMLOOP_PLAY_SPEED";
/// Environment variable overriding [`TimeKeeperConfig::play_every_frame`].
pub const ENV_PLAY_EVERY_FRAME: &str = "CMLOOP_PLAY_EVERY_FRAME";

/// Time keeper playback settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeKeeperConfig {
    /// Logical seconds played per real second.
    /// Default: 1.0.
    pub speed: f64,

    /// Step through every frame instead of following the real clock.
    /// Default: false.
    pub play_every_frame: bool,

    /// Shortest sleep between two frames, so every event of one frame is
    /// handled before the next frame starts.
    /// Default: 3 ms.
    pub min_timer_sleep: Duration,

    /// Logical seconds ahead of the current time within which pending frames
    /// are handled in the same wake-up, before scaling by speed.
    /// Default: 0.01.
    pub event_window: f64,

    /// [`event_window`](Self::event_window) in every-frame mode.
    /// Default: 1e-5.
    pub every_frame_window: f64,
}

impl Default for TimeKeeperConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            play_every_frame: false,
            min_timer_sleep: Duration::from_millis(3),
            event_window: 0.01,
            every_frame_window: 1e-5,
        }
    }
}

impl TimeKeeperConfig {
    /// Defaults overridden by `CMLOOP_PLAY_SPEED` and `CMLOOP_PLAY_EVERY_FRAME`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(speed) = env::read::<f64>(ENV_PLAY_SPEED) {
            config.speed = speed;
        }
        if let Some(every_frame) = env::read_flag(ENV_PLAY_EVERY_FRAME) {
            config.play_every_frame = every_frame;
        }
        config
    }

    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_play_every_frame(mut self, every_frame: bool) -> Self {
        self.play_every_frame = every_frame;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TimeKeeperConfig::default();
        assert_eq!(config.speed, 1.0);
        assert!(!config.play_every_frame);
        assert_eq!(config.min_timer_sleep, Duration::from_millis(3));
        assert_eq!(config.event_window, 0.01);
    }

    #[test]
    fn builders() {
        let config = TimeKeeperConfig::default()
            .with_speed(2.5)
            .with_play_every_frame(true);
        assert_eq!(config.speed, 2.5);
        assert!(config.play_every_frame);
    }
}

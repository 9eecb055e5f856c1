use clap::{Parser, ValueEnum};
use cmloop_time::{PlayDirection, PlayMode, TimeKeeperConfig};

use crate::error::{DemoError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "cmloop-demo",
    about = "Play a time keeper on a real dispatcher",
    version
)]
pub struct Cli {
    /// Update frequency of the demo time object, in Hz.
    #[arg(long, default_value_t = 10.0)]
    pub frequency: f64,

    /// Play speed, logical seconds per real second.
    #[arg(long, env = "CMLOOP_PLAY_SPEED")]
    pub speed: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    pub minimum: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    pub maximum: Option<f64>,

    /// What to do on reaching a bound.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Start playing backward.
    #[arg(long)]
    pub backward: bool,

    /// Deliver every frame even when the loop falls behind.
    #[arg(long, env = "CMLOOP_PLAY_EVERY_FRAME")]
    pub every_frame: bool,

    /// Stop the main loop after this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub exit_after_ms: Option<u64>,

    /// Read `play`, `reverse`, `stop`, `time <t>`, `mode <m>` and `quit` from stdin.
    #[arg(long)]
    pub stdin_control: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Print a JSON run summary on exit.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Loop,
    Once,
    Swing,
}

impl From<ModeArg> for PlayMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Loop => Self::Loop,
            ModeArg::Once => Self::Once,
            ModeArg::Swing => Self::Swing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    #[must_use]
    pub fn direction(&self) -> PlayDirection {
        if self.backward {
            PlayDirection::Backward
        } else {
            PlayDirection::Forward
        }
    }

    /// Keeper settings: environment first, then flags.
    #[must_use]
    pub fn keeper_config(&self) -> TimeKeeperConfig {
        let mut config = TimeKeeperConfig::from_env();
        if let Some(speed) = self.speed {
            config = config.with_speed(speed);
        }
        if self.every_frame {
            config = config.with_play_every_frame(true);
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(DemoError::invalid(format!(
                "--frequency must be positive, got {}",
                self.frequency
            )));
        }
        if let Some(speed) = self.speed
            && (!speed.is_finite() || speed <= 0.0)
        {
            return Err(DemoError::invalid(format!(
                "--speed must be positive, got {speed}"
            )));
        }
        if let (Some(minimum), Some(maximum)) = (self.minimum, self.maximum)
            && minimum > maximum
        {
            return Err(DemoError::invalid(format!(
                "--minimum {minimum} is above --maximum {maximum}"
            )));
        }
        Ok(())
    }
}

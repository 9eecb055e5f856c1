//! Line commands read from stdin while the loop runs.
//!
//! Commands: `play`, `reverse`, `stop`, `time <t>`, `mode <loop|once|swing>`
//! and `quit`. Unknown lines are logged and ignored.

use std::str::FromStr;

use cmloop_dispatch::Dispatcher;
use cmloop_time::{PlayMode, TimeKeeper};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Play in the current direction.
    Play,
    /// Play the other way, starting if stopped.
    Reverse,
    Stop,
    Time(f64),
    Mode(PlayMode),
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or_else(|| "empty command".to_owned())?;
        let argument = words.next();
        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument {extra:?}"));
        }
        match (command.to_ascii_lowercase().as_str(), argument) {
            ("play", None) => Ok(Self::Play),
            ("reverse", None) => Ok(Self::Reverse),
            ("stop", None) => Ok(Self::Stop),
            ("quit" | "exit", None) => Ok(Self::Quit),
            ("time", Some(value)) => value
                .parse::<f64>()
                .ok()
                .filter(|time| time.is_finite())
                .map(Self::Time)
                .ok_or_else(|| format!("invalid time {value:?}")),
            ("time", None) => Err("time needs a value".to_owned()),
            ("mode", Some(value)) => value.parse().map(Self::Mode),
            ("mode", None) => Err("mode needs loop, once or swing".to_owned()),
            (other, _) => Err(format!("unknown command {other:?}")),
        }
    }
}

/// Splits a byte stream into complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Append `bytes` and return every line completed by them, trimmed and
    /// non-empty.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let Some(end) = self.pending.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(end + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Whatever is left after the last newline.
    #[must_use]
    pub fn remainder(&self) -> &str {
        self.pending.trim()
    }
}

/// Carry out one command. Keeper failures are already reported by the keeper,
/// so they are only traced here.
pub fn apply(command: Command, keeper: &TimeKeeper, dispatcher: &Dispatcher) {
    info!(?command, "control command");
    let outcome = match command {
        Command::Play => keeper.play(keeper.play_direction()),
        Command::Reverse => keeper.play(keeper.play_direction().reversed()),
        Command::Stop => {
            keeper.stop();
            Ok(())
        }
        Command::Time(time) => keeper.request_new_time(time),
        Command::Mode(mode) => {
            keeper.set_play_mode(mode);
            Ok(())
        }
        Command::Quit => {
            dispatcher.stop_main_loop();
            Ok(())
        }
    };
    if let Err(err) = outcome {
        debug!(?command, error = %err, "control command failed");
    }
}

/// Watch stdin with a simple descriptor callback and apply every command line.
/// The source removes itself when stdin reaches end of file.
#[cfg(unix)]
pub fn install(
    dispatcher: &Dispatcher,
    keeper: &TimeKeeper,
) -> crate::error::Result<cmloop_dispatch::DescriptorHandle> {
    use std::cell::Cell;
    use std::io::Read;
    use std::os::fd::AsRawFd;
    use std::rc::Rc;

    use tracing::warn;

    let fd = std::io::stdin().as_raw_fd();
    let weak = dispatcher.downgrade();
    let keeper = keeper.clone();
    let registered = Rc::new(Cell::new(None));
    let slot = Rc::clone(&registered);
    let mut lines = LineBuffer::default();

    let handle = dispatcher.add_simple_descriptor_callback(fd, move |_| {
        let Some(dispatcher) = weak.upgrade() else {
            return true;
        };
        let mut buf = [0u8; 1024];
        let read = match std::io::stdin().lock().read(&mut buf) {
            Ok(read) => read,
            Err(err) => {
                warn!(error = %err, "stdin read failed");
                return false;
            }
        };
        if read == 0 {
            info!("stdin closed, control disabled");
            if let Some(handle) = slot.take()
                && let Err(err) = dispatcher.remove_descriptor_source(handle)
            {
                debug!(error = %err, "stdin source already gone");
            }
            return true;
        }
        for line in lines.push(&buf[..read]) {
            match line.parse::<Command>() {
                Ok(command) => apply(command, &keeper, &dispatcher),
                Err(message) => warn!(line = %line, %message, "ignoring control line"),
            }
        }
        true
    })?;
    registered.set(Some(handle));
    debug!(fd, "stdin control installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmloop_core::LabClock;
    use cmloop_dispatch::TimerPackage;
    use cmloop_time::{PlayDirection, TimeKeeperConfig, TimeObject};
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_every_command() {
        assert_eq!("play".parse(), Ok(Command::Play));
        assert_eq!(" Reverse ".parse(), Ok(Command::Reverse));
        assert_eq!("stop".parse(), Ok(Command::Stop));
        assert_eq!("quit".parse(), Ok(Command::Quit));
        assert_eq!("time -2.5".parse(), Ok(Command::Time(-2.5)));
        assert_eq!("mode swing".parse(), Ok(Command::Mode(PlayMode::Swing)));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!("".parse::<Command>().is_err());
        assert!("time".parse::<Command>().is_err());
        assert!("time soon".parse::<Command>().is_err());
        assert!("time inf".parse::<Command>().is_err());
        assert!("play now".parse::<Command>().is_err());
        assert!("mode bounce".parse::<Command>().is_err());
        assert!("rewind".parse::<Command>().is_err());
    }

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"pl").is_empty());
        assert_eq!(buffer.push(b"ay\n\ntime 3\nsto"), vec!["play", "time 3"]);
        assert_eq!(buffer.remainder(), "sto");
        assert_eq!(buffer.push(b"p\r\n"), vec!["stop"]);
        assert_eq!(buffer.remainder(), "");
    }

    #[test]
    fn commands_drive_the_keeper() {
        let clock = LabClock::new();
        let (dispatcher, _readiness) = Dispatcher::lab(&clock);
        let keeper = TimeKeeper::new(
            "control",
            &TimerPackage::new(&dispatcher),
            TimeKeeperConfig::default(),
        )
        .expect("keeper");
        let object = TimeObject::new("o");
        keeper.add_time_object(&object).expect("attach");

        apply(Command::Play, &keeper, &dispatcher);
        assert!(keeper.is_playing());
        apply(Command::Reverse, &keeper, &dispatcher);
        assert_eq!(keeper.play_direction(), PlayDirection::Backward);
        apply(Command::Time(4.0), &keeper, &dispatcher);
        assert_eq!(object.current_time(), 4.0);
        assert!(keeper.is_playing());
        apply(Command::Mode(PlayMode::Once), &keeper, &dispatcher);
        assert_eq!(keeper.play_mode(), PlayMode::Once);
        apply(Command::Stop, &keeper, &dispatcher);
        assert!(!keeper.is_playing());

        apply(Command::Quit, &keeper, &dispatcher);
        assert!(!dispatcher.should_continue());
    }
}

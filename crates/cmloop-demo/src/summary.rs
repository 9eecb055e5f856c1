//! End-of-run report.

use std::fmt;

use cmloop_dispatch::{Dispatcher, DispatcherStats};
use cmloop_time::TimeKeeper;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Frame deliveries seen by the demo time object.
    pub frames: u64,
    pub final_time: f64,
    pub playing: bool,
    pub direction: String,
    pub mode: String,
    pub reactor: &'static str,
    pub dispatcher: StatsSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub cycles: u64,
    pub polls: u64,
    pub descriptor_dispatches: u64,
    pub timeouts_fired: u64,
    pub idle_runs: u64,
    pub special_idle_runs: u64,
}

impl From<DispatcherStats> for StatsSummary {
    fn from(stats: DispatcherStats) -> Self {
        Self {
            cycles: stats.cycles,
            polls: stats.polls,
            descriptor_dispatches: stats.descriptor_dispatches,
            timeouts_fired: stats.timeouts_fired,
            idle_runs: stats.idle_runs,
            special_idle_runs: stats.special_idle_runs,
        }
    }
}

impl RunSummary {
    #[must_use]
    pub fn collect(frames: u64, keeper: &TimeKeeper, dispatcher: &Dispatcher) -> Self {
        Self {
            frames,
            final_time: keeper.time(),
            playing: keeper.is_playing(),
            direction: keeper.play_direction().to_string(),
            mode: keeper.play_mode().to_string(),
            reactor: dispatcher.reactor_name(),
            dispatcher: dispatcher.stats().into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, final time {:.3} ({}, {}), {} cycles, {} timeouts fired",
            self.frames,
            self.final_time,
            self.direction,
            self.mode,
            self.dispatcher.cycles,
            self.dispatcher.timeouts_fired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmloop_core::LabClock;
    use cmloop_dispatch::TimerPackage;
    use cmloop_time::{PlayDirection, TimeKeeperConfig, TimeObject};
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_reflects_a_lab_run() {
        let clock = LabClock::new();
        let (dispatcher, readiness) = Dispatcher::lab(&clock);
        readiness.set_auto_advance(true);
        let keeper = TimeKeeper::new(
            "summary",
            &TimerPackage::new(&dispatcher),
            TimeKeeperConfig::default(),
        )
        .expect("keeper");
        let object = TimeObject::with_frequency("o", 2.0).expect("object");
        keeper.add_time_object(&object).expect("attach");
        keeper.play(PlayDirection::Forward).expect("play");
        for _ in 0..4 {
            dispatcher.do_one_event().expect("cycle");
        }

        let summary = RunSummary::collect(5, &keeper, &dispatcher);
        assert_eq!(summary.final_time, 2.0);
        assert!(summary.playing);
        assert_eq!(summary.direction, "forward");
        assert_eq!(summary.mode, "loop");
        assert_eq!(summary.reactor, "lab");
        assert_eq!(summary.dispatcher.timeouts_fired, 4);

        let json: serde_json::Value =
            serde_json::from_str(&summary.to_json().expect("json")).expect("parse");
        assert_eq!(json["frames"], 5);
        assert_eq!(json["dispatcher"]["timeouts_fired"], 4);
        assert!(summary.to_string().starts_with("5 frames, final time 2.000"));
    }
}

#![no_main]

use arbitrary::Arbitrary;
use cmloop_core::LabClock;
use cmloop_dispatch::{Dispatcher, TimerPackage};
use cmloop_time::{PlayDirection, PlayMode, TimeKeeper, TimeKeeperConfig, TimeObject};
use libfuzzer_sys::fuzz_target;
use web_time::Duration;

#[derive(Arbitrary, Debug)]
enum Op {
    Play { backward: bool },
    Stop,
    Request { quarters: i16 },
    Minimum { quarters: i16 },
    Maximum { quarters: i16 },
    ClearBounds,
    Mode(u8),
    Speed { tenths: u8 },
    EveryFrame(bool),
    AddObject { hz: u8 },
    RemoveObject { index: u8 },
    Advance { millis: u16 },
    Cycle,
}

fn quarters(value: i16) -> f64 {
    f64::from(value) / 4.0
}

fuzz_target!(|ops: Vec<Op>| {
    let clock = LabClock::new();
    let (dispatcher, readiness) = Dispatcher::lab(&clock);
    readiness.set_auto_advance(true);
    let Ok(keeper) = TimeKeeper::new(
        "fuzz",
        &TimerPackage::new(&dispatcher),
        TimeKeeperConfig::default(),
    ) else {
        return;
    };
    let mut objects: Vec<TimeObject> = Vec::new();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Play { backward } => {
                let direction = if backward {
                    PlayDirection::Backward
                } else {
                    PlayDirection::Forward
                };
                let _ = keeper.play(direction);
            }
            Op::Stop => keeper.stop(),
            Op::Request { quarters: q } => {
                let _ = keeper.request_new_time(quarters(q));
            }
            Op::Minimum { quarters: q } => keeper.set_minimum(quarters(q)),
            Op::Maximum { quarters: q } => keeper.set_maximum(quarters(q)),
            Op::ClearBounds => keeper.clear_bounds(),
            Op::Mode(mode) => keeper.set_play_mode(match mode % 3 {
                0 => PlayMode::Loop,
                1 => PlayMode::Once,
                _ => PlayMode::Swing,
            }),
            Op::Speed { tenths } => {
                let _ = keeper.set_speed(f64::from(tenths) / 10.0);
            }
            Op::EveryFrame(enabled) => keeper.set_play_every_frame(enabled),
            Op::AddObject { hz } => {
                if let Ok(object) = TimeObject::with_frequency("o", f64::from(hz % 32)) {
                    if keeper.add_time_object(&object).is_ok() {
                        objects.push(object);
                    }
                }
            }
            Op::RemoveObject { index } => {
                if !objects.is_empty() {
                    let object = objects.swap_remove(usize::from(index) % objects.len());
                    let _ = keeper.remove_time_object(&object);
                    assert!(!object.is_attached());
                }
            }
            Op::Advance { millis } => clock.advance(Duration::from_millis(u64::from(millis))),
            Op::Cycle => {
                if keeper.has_scheduled_frame() {
                    let _ = dispatcher.do_one_event();
                }
            }
        }

        assert_eq!(keeper.is_playing(), keeper.has_scheduled_frame());
        assert!(dispatcher.pending_timeouts() <= 1);
        assert!(keeper.time().is_finite());
    }
});

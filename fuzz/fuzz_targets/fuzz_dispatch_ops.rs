#![no_main]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbitrary::Arbitrary;
use cmloop_core::LabClock;
use cmloop_dispatch::{
    DescriptorHandle, Dispatcher, IdleHandle, IdlePriority, IdleStatus, Interest, TimeoutHandle,
};
use libfuzzer_sys::fuzz_target;
use web_time::Duration;

#[derive(Arbitrary, Debug)]
enum Op {
    AddTimeout { millis: u16 },
    RemoveTimeout { index: u8 },
    AddIdle { priority: u8, runs: u8 },
    RemoveIdle { index: u8 },
    SpecialIdle { runs: u8 },
    AddSource { fd: u8 },
    RemoveSource { index: u8 },
    SetReady { fd: u8 },
    ClearReady { fd: u8 },
    Advance { millis: u16 },
    AutoAdvance(bool),
    Cycle,
    ProcessIdle,
}

#[derive(Default)]
struct Ledger {
    /// Per timeout: fired count and whether it was cancelled first.
    timeouts: Vec<(TimeoutHandle, Rc<Cell<u32>>, bool)>,
    idles: Vec<IdleHandle>,
    sources: Vec<DescriptorHandle>,
}

fn counting_idle(runs: u8) -> impl FnMut() -> IdleStatus {
    let mut left = u32::from(runs);
    move || {
        left = left.saturating_sub(1);
        IdleStatus::from(left > 0)
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let clock = LabClock::new();
    let (dispatcher, readiness) = Dispatcher::lab(&clock);
    let mut ledger = Ledger::default();
    let special_runs = Rc::new(RefCell::new(0u32));

    for op in ops.into_iter().take(512) {
        match op {
            Op::AddTimeout { millis } => {
                let fired = Rc::new(Cell::new(0));
                let counter = Rc::clone(&fired);
                if let Ok(handle) = dispatcher
                    .add_timeout_after(Duration::from_millis(u64::from(millis)), move || {
                        counter.set(counter.get() + 1)
                    })
                {
                    ledger.timeouts.push((handle, fired, false));
                }
            }
            Op::RemoveTimeout { index } => {
                if let Some(entry) = ledger
                    .timeouts
                    .get_mut(usize::from(index) % ledger.timeouts.len().max(1))
                {
                    let removed = dispatcher.remove_timeout(entry.0).is_ok();
                    // A live handle can only be removed before it fired.
                    assert!(!removed || entry.1.get() == 0);
                    entry.2 |= removed;
                }
            }
            Op::AddIdle { priority, runs } => {
                let priority = IdlePriority::ALL[usize::from(priority) % IdlePriority::ALL.len()];
                if let Ok(handle) = dispatcher.add_idle(counting_idle(runs), priority) {
                    ledger.idles.push(handle);
                }
            }
            Op::RemoveIdle { index } => {
                if let Some(handle) = ledger
                    .idles
                    .get(usize::from(index) % ledger.idles.len().max(1))
                {
                    let _ = dispatcher.remove_idle(*handle);
                }
            }
            Op::SpecialIdle { runs } => {
                let counter = Rc::clone(&special_runs);
                let mut idle = counting_idle(runs);
                let _ = dispatcher.set_special_idle(
                    move || {
                        *counter.borrow_mut() += 1;
                        idle()
                    },
                    IdlePriority::Ui,
                );
            }
            Op::AddSource { fd } => {
                let fd = i32::from(fd % 16);
                if let Ok(handle) = dispatcher.add_simple_descriptor_callback(fd, |_| true) {
                    ledger.sources.push(handle);
                }
            }
            Op::RemoveSource { index } => {
                if let Some(handle) = ledger
                    .sources
                    .get(usize::from(index) % ledger.sources.len().max(1))
                {
                    let _ = dispatcher.remove_descriptor_source(*handle);
                }
            }
            Op::SetReady { fd } => readiness.set_ready(i32::from(fd % 16), Interest::READ),
            Op::ClearReady { fd } => readiness.clear_ready(i32::from(fd % 16)),
            Op::Advance { millis } => clock.advance(Duration::from_millis(u64::from(millis))),
            Op::AutoAdvance(enabled) => readiness.set_auto_advance(enabled),
            Op::Cycle => {
                let _ = dispatcher.do_one_event();
            }
            Op::ProcessIdle => {
                let _ = dispatcher.process_idle_event();
            }
        }

        for (_, fired, cancelled) in &ledger.timeouts {
            assert!(fired.get() <= 1, "timeout fired twice");
            assert!(!(*cancelled && fired.get() > 0), "cancelled timeout fired");
        }
    }

    dispatcher.destroy();
    assert_eq!(dispatcher.pending_timeouts(), 0);
    assert_eq!(dispatcher.pending_idles(), 0);
    assert_eq!(dispatcher.descriptor_sources(), 0);
});

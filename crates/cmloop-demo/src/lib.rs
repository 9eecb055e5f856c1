#![forbid(unsafe_code)]

//! Plays a [`TimeKeeper`] on a real dispatcher.
//!
//! One time object at `--frequency` is attached to a keeper configured from
//! the environment and the command line. The main loop runs until an exit
//! timer fires, a `quit` command arrives on stdin, or nothing is left that
//! could wake the loop.

pub mod cli;
pub mod control;
pub mod error;
pub mod logging;
pub mod summary;

use std::cell::Cell;
use std::rc::Rc;

use clap::Parser;
use cmloop_dispatch::{Dispatcher, DispatcherConfig, TimerPackage};
use cmloop_time::{KeeperEvent, TimeKeeper, TimeObject};
use tracing::{debug, info};
use web_time::Duration;

use crate::cli::Cli;
pub use crate::error::{DemoError, Result};
use crate::summary::RunSummary;

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    cli.validate()?;
    logging::init(cli.log_format)?;

    let dispatcher = real_dispatcher(DispatcherConfig::from_env())?;
    let keeper = TimeKeeper::new("demo", &TimerPackage::new(&dispatcher), cli.keeper_config())?;
    if let Some(minimum) = cli.minimum {
        keeper.set_minimum(minimum);
    }
    if let Some(maximum) = cli.maximum {
        keeper.set_maximum(maximum);
    }
    if let Some(mode) = cli.mode {
        keeper.set_play_mode(mode.into());
    }
    keeper.add_callback(
        KeeperEvent::STARTED | KeeperEvent::STOPPED | KeeperEvent::CHANGED_DIRECTION,
        |keeper, event| {
            info!(
                ?event,
                time = keeper.time(),
                direction = %keeper.play_direction(),
                "keeper"
            );
        },
    );

    let object = TimeObject::with_frequency("demo", cli.frequency)?;
    let frames = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&frames);
    object.add_callback(move |object, time| {
        counter.set(counter.get() + 1);
        debug!(object = object.name(), time, "frame");
    });
    keeper.add_time_object(&object)?;

    if let Some(ms) = cli.exit_after_ms {
        let weak = dispatcher.downgrade();
        dispatcher.add_timeout_after(Duration::from_millis(ms), move || {
            if let Some(dispatcher) = weak.upgrade() {
                info!(ms, "exit timer fired");
                dispatcher.stop_main_loop();
            }
        })?;
    }
    if cli.stdin_control {
        install_control(&dispatcher, &keeper)?;
    }

    keeper.play(cli.direction())?;
    info!(
        frequency = cli.frequency,
        speed = keeper.speed(),
        mode = %keeper.play_mode(),
        reactor = dispatcher.reactor_name(),
        "demo running"
    );
    let outcome = dispatcher.run_main_loop();

    let summary = RunSummary::collect(frames.get(), &keeper, &dispatcher);
    keeper.stop();
    dispatcher.destroy();
    outcome?;

    if cli.json {
        println!("{}", summary.to_json()?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

#[cfg(unix)]
fn real_dispatcher(config: DispatcherConfig) -> Result<Dispatcher> {
    Ok(Dispatcher::with_config(config))
}

#[cfg(not(unix))]
fn real_dispatcher(_config: DispatcherConfig) -> Result<Dispatcher> {
    Err(DemoError::Unsupported {
        message: "the demo needs the poll(2) reactor".to_owned(),
    })
}

#[cfg(unix)]
fn install_control(dispatcher: &Dispatcher, keeper: &TimeKeeper) -> Result<()> {
    control::install(dispatcher, keeper).map(|_| ())
}

#[cfg(not(unix))]
fn install_control(_dispatcher: &Dispatcher, _keeper: &TimeKeeper) -> Result<()> {
    Err(DemoError::Unsupported {
        message: "--stdin-control needs a pollable stdin".to_owned(),
    })
}

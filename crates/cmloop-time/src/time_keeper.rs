#![forbid(unsafe_code)]

//! A playable, directional, boundable simulation clock.
//!
//! A [`TimeKeeper`] owns a logical time and a set of [`TimeObject`]s. While
//! playing it keeps exactly one dispatcher timeout armed, aimed at the nearest
//! frame due across all of its objects. When that timeout fires the keeper
//! advances its time, delivers every frame that has come due, announces
//! `NEW_TIME` and arms the next timeout.
//!
//! # Design
//!
//! Frame times are logical; the sleep between frames is the logical step
//! divided by the play speed, minus the real time already spent since the
//! last wake-up, and never shorter than
//! [`min_timer_sleep`](TimeKeeperConfig::min_timer_sleep). Real time comes from
//! the dispatcher clock, so a lab clock drives playback exactly.
//!
//! Without every-frame mode a late wake-up jumps straight to the most recent
//! due frame of each object. In every-frame mode the keeper advances by the
//! scheduled step regardless of how much real time went by.
//!
//! At a bound the keeper follows its [`PlayMode`]. Loop and swing need the
//! opposite bound as well; without it the keeper stops.
//!
//! # Invariants
//!
//! - At most one frame timeout is armed per keeper. Attempting a second is
//!   reported as [`TimeKeeperError::TimeoutAlreadyArmed`].
//! - A keeper that is playing has a timeout armed once control returns to the
//!   dispatcher. If it cannot arm one it stops and announces `STOPPED`.
//! - `request_new_time` never nests. A nested call fails with
//!   [`TimeKeeperError::ReentrantRequest`].
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | `play` in the current direction | `AlreadyPlaying`, reported, no change |
//! | `play` with no time objects | `STARTED` then `STOPPED`, `NoTimeObjects` |
//! | `request_new_time` with NaN or infinity | `InvalidTime`, reported, no change |
//! | Next frame behind the clock | `NextTimeInPast`, reported, keeper stops |
//! | Dispatcher rejects the timeout | `Dispatch`, keeper stops |

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use cmloop_core::{Timestamp, report};
use cmloop_dispatch::{TimerCallback, TimerPackage};
use tracing::{debug, trace, warn};
use web_time::Duration;

use crate::config::TimeKeeperConfig;
use crate::error::{Result, TimeKeeperError};
use crate::play::{KeeperEvent, PlayDirection, PlayMode};
use crate::time_object::TimeObject;

type KeeperFn = Rc<RefCell<Box<dyn FnMut(&TimeKeeper, KeeperEvent)>>>;

/// Identifies a subscriber on one [`TimeKeeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeeperCallbackId(u64);

impl KeeperCallbackId {
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

struct Subscriber {
    id: KeeperCallbackId,
    mask: KeeperEvent,
    callback: KeeperFn,
}

struct ObjectInfo {
    object: TimeObject,
    next_due: f64,
}

struct Playback {
    /// Time announced to subscribers; snapped to the last delivered frame.
    time: f64,
    /// Unsnapped time reached by following the real clock.
    real_time: f64,
    /// Logical distance to the frame the armed timeout aims at.
    step: f64,
    play_start: Timestamp,
    /// The armed timeout aims at the bound rather than at a frame.
    play_remaining: bool,
    playing: bool,
    direction: PlayDirection,
    mode: PlayMode,
    minimum: Option<f64>,
    maximum: Option<f64>,
    speed: f64,
    every_frame: bool,
    timeout: Option<TimerCallback>,
}

impl Playback {
    /// The bound playback is heading for, then the one it leaves from.
    fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match self.direction {
            PlayDirection::Forward => (self.maximum, self.minimum),
            PlayDirection::Backward => (self.minimum, self.maximum),
        }
    }
}

struct KeeperInner {
    name: String,
    timers: TimerPackage,
    config: TimeKeeperConfig,
    playback: RefCell<Playback>,
    objects: RefCell<Vec<ObjectInfo>>,
    subscribers: RefCell<Vec<Subscriber>>,
    next_subscriber_id: Cell<u64>,
    in_request: Cell<bool>,
    /// Bumped by every `request_new_time`.
    generation: Cell<u64>,
}

/// Shared handle to a time keeper. Clones refer to the same keeper.
///
/// Subscribers receive the keeper as an argument; capturing a clone of it in
/// a subscriber keeps the keeper alive forever.
///
/// The keeper holds its dispatcher strongly through the [`TimerPackage`]. A
/// clone captured by a dispatcher callback therefore lives until that
/// callback is dropped or [`Dispatcher::destroy`](cmloop_dispatch::Dispatcher::destroy)
/// releases it.
#[derive(Clone)]
pub struct TimeKeeper {
    inner: Rc<KeeperInner>,
}

struct RequestGuard<'a>(&'a Cell<bool>);

impl<'a> RequestGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn check_speed(operation: &'static str, speed: f64) -> Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(report!(operation, TimeKeeperError::InvalidSpeed(speed)));
    }
    Ok(())
}

fn sleep_for(secs: f64, floor: Duration) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0))
        .unwrap_or(Duration::MAX)
        .max(floor)
}

/// Whether a frame at `due` is delivered to time objects, given the bound
/// playback is heading for. In loop mode the frame on the bound is delivered
/// once, as the wrapped frame on the opposite bound.
fn delivers(bound: Option<f64>, due: f64, direction: PlayDirection, mode: PlayMode) -> bool {
    bound.is_none_or(|bound| match mode {
        PlayMode::Loop => direction.is_past(bound, due),
        PlayMode::Once | PlayMode::Swing => !direction.is_past(due, bound),
    })
}

impl TimeKeeper {
    /// A stopped keeper at time zero, playing forward in loop mode.
    pub fn new(
        name: impl Into<String>,
        timers: &TimerPackage,
        config: TimeKeeperConfig,
    ) -> Result<Self> {
        check_speed("time_keeper_new", config.speed)?;
        let name = name.into();
        debug!(keeper = %name, speed = config.speed, every_frame = config.play_every_frame, "time keeper created");
        Ok(Self {
            inner: Rc::new(KeeperInner {
                playback: RefCell::new(Playback {
                    time: 0.0,
                    real_time: 0.0,
                    step: 0.0,
                    play_start: timers.now(),
                    play_remaining: false,
                    playing: false,
                    direction: PlayDirection::Forward,
                    mode: PlayMode::Loop,
                    minimum: None,
                    maximum: None,
                    speed: config.speed,
                    every_frame: config.play_every_frame,
                    timeout: None,
                }),
                name,
                timers: timers.clone(),
                config,
                objects: RefCell::new(Vec::new()),
                subscribers: RefCell::new(Vec::new()),
                next_subscriber_id: Cell::new(0),
                in_request: Cell::new(false),
                generation: Cell::new(0),
            }),
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn time(&self) -> f64 {
        self.playback().time
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playback().playing
    }

    #[must_use]
    pub fn play_direction(&self) -> PlayDirection {
        self.playback().direction
    }

    #[must_use]
    pub fn play_mode(&self) -> PlayMode {
        self.playback().mode
    }

    #[must_use]
    pub fn speed(&self) -> f64 {
        self.playback().speed
    }

    #[must_use]
    pub fn minimum(&self) -> Option<f64> {
        self.playback().minimum
    }

    #[must_use]
    pub fn maximum(&self) -> Option<f64> {
        self.playback().maximum
    }

    #[must_use]
    pub fn play_every_frame(&self) -> bool {
        self.playback().every_frame
    }

    /// Whether any time object is attached.
    #[must_use]
    pub fn has_time_object(&self) -> bool {
        !self.inner.objects.borrow().is_empty()
    }

    /// Attached time objects, in attachment order.
    #[must_use]
    pub fn time_objects(&self) -> Vec<TimeObject> {
        self.object_snapshot()
    }

    /// Whether a frame timeout is currently armed.
    #[must_use]
    pub fn has_scheduled_frame(&self) -> bool {
        self.playback().timeout.is_some()
    }

    #[must_use]
    pub fn timer_package(&self) -> &TimerPackage {
        &self.inner.timers
    }

    #[must_use]
    pub fn config(&self) -> &TimeKeeperConfig {
        &self.inner.config
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn set_minimum(&self, minimum: f64) {
        self.playback_mut().minimum = Some(minimum);
        debug!(keeper = %self.inner.name, minimum, "minimum set");
        self.notify(KeeperEvent::NEW_MINIMUM);
    }

    pub fn set_maximum(&self, maximum: f64) {
        self.playback_mut().maximum = Some(maximum);
        debug!(keeper = %self.inner.name, maximum, "maximum set");
        self.notify(KeeperEvent::NEW_MAXIMUM);
    }

    /// Remove both bounds.
    pub fn clear_bounds(&self) {
        {
            let mut playback = self.playback_mut();
            playback.minimum = None;
            playback.maximum = None;
        }
        self.notify(KeeperEvent::NEW_MINIMUM);
        self.notify(KeeperEvent::NEW_MAXIMUM);
    }

    pub fn set_speed(&self, speed: f64) -> Result<()> {
        check_speed("set_speed", speed)?;
        self.playback_mut().speed = speed;
        Ok(())
    }

    pub fn set_play_mode(&self, mode: PlayMode) {
        self.playback_mut().mode = mode;
    }

    pub fn set_play_every_frame(&self, every_frame: bool) {
        self.playback_mut().every_frame = every_frame;
    }

    // ── Time objects ─────────────────────────────────────────────────

    /// Attach `object`, push the current time into it and notify its clients.
    pub fn add_time_object(&self, object: &TimeObject) -> Result<()> {
        if object.is_attached() {
            return Err(report!(
                "add_time_object",
                TimeKeeperError::TimeObjectAttached {
                    name: object.name().to_owned(),
                }
            ));
        }
        object.set_attached(true);
        let (time, probe, direction) = {
            let playback = self.playback();
            let probe = if playback.playing {
                playback.time + playback.direction.sign() * self.window(&playback)
            } else {
                playback.time
            };
            (playback.time, probe, playback.direction)
        };
        object.set_current_time(time);
        let next_due = object.next_callback_time(probe, direction);
        self.inner.objects.borrow_mut().push(ObjectInfo {
            object: object.clone(),
            next_due,
        });
        debug!(keeper = %self.inner.name, object = object.name(), next_due, "time object added");
        object.notify_clients();
        Ok(())
    }

    pub fn remove_time_object(&self, object: &TimeObject) -> Result<()> {
        let removed = {
            let mut objects = self.inner.objects.borrow_mut();
            objects
                .iter()
                .position(|info| info.object.ptr_eq(object))
                .map(|index| objects.remove(index))
        };
        match removed {
            Some(info) => {
                info.object.set_attached(false);
                debug!(keeper = %self.inner.name, object = object.name(), "time object removed");
                Ok(())
            }
            None => Err(report!(
                "remove_time_object",
                TimeKeeperError::TimeObjectNotFound {
                    name: object.name().to_owned(),
                }
            )),
        }
    }

    // ── Subscribers ──────────────────────────────────────────────────

    /// Call `callback` once for every announced event in `mask`.
    pub fn add_callback(
        &self,
        mask: KeeperEvent,
        callback: impl FnMut(&TimeKeeper, KeeperEvent) + 'static,
    ) -> KeeperCallbackId {
        let id = KeeperCallbackId(self.inner.next_subscriber_id.get() + 1);
        self.inner.next_subscriber_id.set(id.0);
        self.inner.subscribers.borrow_mut().push(Subscriber {
            id,
            mask,
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        id
    }

    pub fn remove_callback(&self, id: KeeperCallbackId) -> Result<()> {
        let removed = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            subscribers
                .iter()
                .position(|subscriber| subscriber.id == id)
                .map(|index| subscribers.remove(index))
        };
        match removed {
            Some(subscriber) => {
                drop(subscriber);
                Ok(())
            }
            None => Err(report!(
                "time_keeper_remove_callback",
                TimeKeeperError::CallbackNotFound { id: id.0 }
            )),
        }
    }

    // ── Playback ─────────────────────────────────────────────────────

    /// Start playing in `direction`, or reverse if already playing the other
    /// way.
    pub fn play(&self, direction: PlayDirection) -> Result<()> {
        let (playing, current) = {
            let playback = self.playback();
            (playback.playing, playback.direction)
        };

        if !playing {
            {
                let mut playback = self.playback_mut();
                playback.direction = direction;
                playback.playing = true;
            }
            debug!(keeper = %self.inner.name, %direction, "play");
            self.notify(KeeperEvent::STARTED);
            if !self.is_playing() {
                return Ok(());
            }
            let started = self.begin_playback(true);
            self.settle();
            return started;
        }

        if direction == current {
            return Err(report!("play", TimeKeeperError::AlreadyPlaying));
        }
        debug!(keeper = %self.inner.name, %direction, "reversing");
        self.cancel_timeout();
        self.playback_mut().direction = direction;
        let restarted = self.begin_playback(true);
        self.notify(KeeperEvent::CHANGED_DIRECTION);
        self.settle();
        restarted
    }

    pub fn stop(&self) {
        if !self.is_playing() {
            return;
        }
        self.cancel_timeout();
        self.playback_mut().playing = false;
        debug!(keeper = %self.inner.name, time = self.time(), "stopped");
        self.notify(KeeperEvent::STOPPED);
    }

    /// Jump to `time`, updating every time object and announcing a single
    /// `NEW_TIME`. A playing keeper keeps playing from the new time without
    /// announcing a stop or a start.
    pub fn request_new_time(&self, time: f64) -> Result<()> {
        if self.inner.in_request.get() {
            return Err(report!(
                "request_new_time",
                TimeKeeperError::ReentrantRequest
            ));
        }
        if !time.is_finite() {
            return Err(report!("request_new_time", TimeKeeperError::InvalidTime(time)));
        }
        let _guard = RequestGuard::enter(&self.inner.in_request);

        let was_playing = {
            let mut playback = self.playback_mut();
            playback.time = time;
            playback.timeout.is_some()
        };
        self.inner.generation.set(self.inner.generation.get() + 1);
        self.cancel_timeout();
        trace!(keeper = %self.inner.name, time, was_playing, "new time requested");

        let objects = self.object_snapshot();
        for object in &objects {
            object.set_current_time(time);
        }
        for object in &objects {
            object.notify_clients();
        }
        self.notify(KeeperEvent::NEW_TIME);

        if was_playing && self.is_playing() && !self.has_scheduled_frame() {
            let restarted = self.begin_playback(false);
            self.settle();
            restarted?;
        }
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn playback(&self) -> Ref<'_, Playback> {
        self.inner.playback.borrow()
    }

    fn playback_mut(&self) -> RefMut<'_, Playback> {
        self.inner.playback.borrow_mut()
    }

    fn window(&self, playback: &Playback) -> f64 {
        let window = if playback.every_frame {
            self.inner.config.every_frame_window
        } else {
            self.inner.config.event_window
        };
        window * playback.speed
    }

    fn object_snapshot(&self) -> Vec<TimeObject> {
        self.inner
            .objects
            .borrow()
            .iter()
            .map(|info| info.object.clone())
            .collect()
    }

    fn next_due(&self, object: &TimeObject) -> Option<f64> {
        self.inner
            .objects
            .borrow()
            .iter()
            .find(|info| info.object.ptr_eq(object))
            .map(|info| info.next_due)
    }

    fn set_next_due(&self, object: &TimeObject, next_due: f64) {
        if let Some(info) = self
            .inner
            .objects
            .borrow_mut()
            .iter_mut()
            .find(|info| info.object.ptr_eq(object))
        {
            info.next_due = next_due;
        }
    }

    fn take_play_remaining(&self) -> bool {
        std::mem::take(&mut self.playback_mut().play_remaining)
    }

    fn notify(&self, event: KeeperEvent) {
        let targets: Vec<(KeeperCallbackId, KeeperFn)> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .filter(|subscriber| subscriber.mask.intersects(event))
            .map(|subscriber| (subscriber.id, Rc::clone(&subscriber.callback)))
            .collect();
        trace!(keeper = %self.inner.name, ?event, subscribers = targets.len(), "notify");
        for (id, callback) in targets {
            let live = self
                .inner
                .subscribers
                .borrow()
                .iter()
                .any(|subscriber| subscriber.id == id);
            if !live {
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut callback) => callback(self, event),
                Err(_) => warn!(
                    keeper = %self.inner.name,
                    callback = id.0,
                    ?event,
                    "skipping re-entrant keeper callback"
                ),
            }
        }
    }

    fn cancel_timeout(&self) {
        let mut slot = self.playback_mut().timeout.take();
        if slot.is_none() || self.inner.timers.dispatcher().is_destroyed() {
            return;
        }
        if let Err(err) = self.inner.timers.destroy_timer_callback(&mut slot) {
            debug!(keeper = %self.inner.name, error = %err, "frame timeout already gone");
        }
    }

    /// A keeper left playing without a timeout has nothing to wake it.
    fn settle(&self) {
        let stalled = {
            let playback = self.playback();
            playback.playing && playback.timeout.is_none()
        };
        if stalled {
            self.playback_mut().playing = false;
            debug!(keeper = %self.inner.name, "no frame scheduled, stopping");
            self.notify(KeeperEvent::STOPPED);
        }
    }

    /// Clamp or wrap the time into the bounds, restart the real-time mark and
    /// schedule the first frame.
    fn begin_playback(&self, announce: bool) -> Result<()> {
        if self.has_scheduled_frame() {
            return Err(report!(
                "begin_playback",
                TimeKeeperError::TimeoutAlreadyArmed
            ));
        }
        let now = self.inner.timers.now();
        let (time, direction, looping) = {
            let mut playback = self.playback_mut();
            let (ahead, behind) = playback.bounds();
            let direction = playback.direction;
            let mut looping = false;
            if let Some(behind) = behind
                && direction.is_past(behind, playback.time)
            {
                playback.time = behind;
            }
            if let Some(ahead) = ahead
                && !direction.is_past(ahead, playback.time)
                && let Some(behind) = behind
            {
                playback.time = behind;
                looping = true;
            }
            playback.play_start = now;
            playback.real_time = playback.time;
            playback.play_remaining = false;
            (playback.time, direction, looping)
        };
        trace!(keeper = %self.inner.name, time, %direction, looping, "playback begins");

        for object in self.object_snapshot() {
            object.set_current_time(time);
            if looping && object.is_valid_callback_time(time) {
                object.notify_clients();
            }
            self.set_next_due(&object, object.next_callback_time(time, direction));
        }
        if announce {
            self.notify(KeeperEvent::NEW_TIME);
        }
        self.set_play_timeout()
    }

    /// Arm the timeout for the nearest due frame, or apply the play mode when
    /// every frame lies past the bound.
    fn set_play_timeout(&self) -> Result<()> {
        let (playing, armed, time, real_time, direction, mode, ahead, behind) = {
            let playback = self.playback();
            let (ahead, behind) = playback.bounds();
            (
                playback.playing,
                playback.timeout.is_some(),
                playback.time,
                playback.real_time,
                playback.direction,
                playback.mode,
                ahead,
                behind,
            )
        };
        if !playing {
            return Ok(());
        }
        if armed {
            return Err(report!(
                "set_play_timeout",
                TimeKeeperError::TimeoutAlreadyArmed
            ));
        }

        let nearest = self
            .inner
            .objects
            .borrow()
            .iter()
            .map(|info| info.next_due)
            .reduce(|a, b| direction.earlier(a, b));
        let Some(mut next) = nearest else {
            return Err(report!("set_play_timeout", TimeKeeperError::NoTimeObjects));
        };

        if let Some(bound) = ahead
            && direction.is_past(next, bound)
        {
            if !direction.is_past(bound, time) {
                return self.reach_bound(bound, behind, time, direction, mode);
            }
            next = bound;
            self.playback_mut().play_remaining = true;
        }

        if direction.is_past(real_time, next) {
            return Err(report!(
                "set_play_timeout",
                TimeKeeperError::NextTimeInPast {
                    next,
                    current: real_time,
                }
            ));
        }
        self.arm(next, real_time)
    }

    fn reach_bound(
        &self,
        bound: f64,
        behind: Option<f64>,
        time: f64,
        direction: PlayDirection,
        mode: PlayMode,
    ) -> Result<()> {
        let can_turn = behind.is_some_and(|behind| direction.is_past(time, behind));
        match mode {
            PlayMode::Loop if can_turn => {
                trace!(keeper = %self.inner.name, bound, "looping");
                self.begin_playback(true)
            }
            PlayMode::Swing if can_turn => {
                {
                    let mut playback = self.playback_mut();
                    playback.time = bound;
                    playback.direction = direction.reversed();
                }
                trace!(keeper = %self.inner.name, bound, "swinging");
                self.notify(KeeperEvent::CHANGED_DIRECTION);
                self.begin_playback(true)
            }
            _ => {
                debug!(keeper = %self.inner.name, bound, %mode, "bound reached");
                self.stop();
                Ok(())
            }
        }
    }

    fn arm(&self, next: f64, real_time: f64) -> Result<()> {
        let (step, sleep) = {
            let mut playback = self.playback_mut();
            playback.step = (next - real_time).abs();
            let elapsed = self
                .inner
                .timers
                .now()
                .saturating_duration_since(playback.play_start)
                .as_secs_f64();
            let secs = playback.step / playback.speed - elapsed;
            (
                playback.step,
                sleep_for(secs, self.inner.config.min_timer_sleep),
            )
        };
        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.timers.add_callback(
            sleep.as_secs(),
            u64::from(sleep.subsec_nanos()),
            move || Self::on_frame_timeout(&weak),
        )?;
        self.playback_mut().timeout = Some(handle);
        trace!(
            keeper = %self.inner.name,
            next,
            step,
            sleep_us = sleep.as_micros().min(u128::from(u64::MAX)) as u64,
            "frame scheduled"
        );
        Ok(())
    }

    fn on_frame_timeout(inner: &Weak<KeeperInner>) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let keeper = Self { inner };
        if let Err(err) = keeper.advance_frame() {
            debug!(keeper = %keeper.inner.name, error = %err, "frame failed");
        }
        keeper.settle();
    }

    fn advance_frame(&self) -> Result<()> {
        let now = self.inner.timers.now();
        let (time, direction, every_frame, window, mode, ahead) = {
            let mut playback = self.playback_mut();
            playback.timeout = None;
            let elapsed = now
                .saturating_duration_since(playback.play_start)
                .as_secs_f64()
                * playback.speed;
            playback.play_start = now;
            let advance = if playback.every_frame {
                playback.step
            } else {
                elapsed
            };
            playback.real_time += playback.direction.sign() * advance;
            playback.time = playback.real_time;
            (
                playback.time,
                playback.direction,
                playback.every_frame,
                self.window(&playback),
                playback.mode,
                playback.bounds().0,
            )
        };
        let generation = self.inner.generation.get();
        let horizon = time + direction.sign() * window;
        let mut event_time: Option<f64> = None;

        for object in self.object_snapshot() {
            // A client jumped the time or restarted playback; the rest of this
            // frame is stale.
            if self.inner.generation.get() != generation || self.has_scheduled_frame() {
                break;
            }
            // Removed by an earlier callback in this frame.
            let Some(mut due) = self.next_due(&object) else {
                continue;
            };
            if direction.is_past(horizon, due) {
                if !every_frame {
                    let latest = object.next_callback_time(horizon, direction.reversed());
                    if direction.is_past(due, latest) {
                        warn!(
                            keeper = %self.inner.name,
                            object = object.name(),
                            latest,
                            due,
                            "most recent frame precedes the due frame"
                        );
                    } else {
                        due = latest;
                    }
                }
                event_time = Some(event_time.map_or(due, |t| direction.later(t, due)));
                if delivers(ahead, due, direction, mode) {
                    object.set_current_time(due);
                    object.notify_clients();
                }
                self.set_next_due(&object, object.next_callback_time(horizon, direction));
            } else if let Some(bound) = ahead
                && direction.is_past(horizon, bound)
                && self.take_play_remaining()
            {
                event_time = Some(bound);
            }
        }

        if self.inner.generation.get() == generation {
            if let Some(event_time) = event_time {
                self.playback_mut().time = event_time;
                self.notify(KeeperEvent::NEW_TIME);
            }
        }
        if self.has_scheduled_frame() || !self.is_playing() {
            return Ok(());
        }
        if self.inner.generation.get() == generation {
            self.set_play_timeout()
        } else {
            // The request already announced its NEW_TIME.
            self.begin_playback(false)
        }
    }
}

impl Drop for KeeperInner {
    fn drop(&mut self) {
        let timeout = self.playback.get_mut().timeout.take();
        if timeout.is_some() && !self.timers.dispatcher().is_destroyed() {
            let mut slot = timeout;
            if let Err(err) = self.timers.destroy_timer_callback(&mut slot) {
                debug!(keeper = %self.name, error = %err, "frame timeout already gone");
            }
        }
        for info in self.objects.get_mut().drain(..) {
            info.object.set_attached(false);
        }
        debug!(keeper = %self.name, "time keeper dropped");
    }
}

impl fmt::Debug for TimeKeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let playback = self.playback();
        f.debug_struct("TimeKeeper")
            .field("name", &self.inner.name)
            .field("time", &playback.time)
            .field("playing", &playback.playing)
            .field("direction", &playback.direction)
            .field("mode", &playback.mode)
            .field("minimum", &playback.minimum)
            .field("maximum", &playback.maximum)
            .field("speed", &playback.speed)
            .field("objects", &self.inner.objects.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmloop_core::LabClock;
    use cmloop_dispatch::{Dispatcher, LabReadiness};
    use tracing_test::traced_test;

    struct Rig {
        clock: LabClock,
        dispatcher: Dispatcher,
        readiness: LabReadiness,
        keeper: TimeKeeper,
    }

    fn rig() -> Rig {
        let clock = LabClock::new();
        let (dispatcher, readiness) = Dispatcher::lab(&clock);
        readiness.set_auto_advance(true);
        let timers = TimerPackage::new(&dispatcher);
        let keeper =
            TimeKeeper::new("test", &timers, TimeKeeperConfig::default()).expect("keeper");
        Rig {
            clock,
            dispatcher,
            readiness,
            keeper,
        }
    }

    fn events(keeper: &TimeKeeper) -> Rc<RefCell<Vec<KeeperEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        keeper.add_callback(KeeperEvent::all(), move |_, event| sink.borrow_mut().push(event));
        seen
    }

    #[test]
    fn sleep_never_drops_below_floor() {
        let floor = Duration::from_millis(3);
        assert_eq!(sleep_for(-1.0, floor), floor);
        assert_eq!(sleep_for(f64::NAN, floor), floor);
        assert_eq!(sleep_for(0.5, floor), Duration::from_millis(500));
        assert_eq!(sleep_for(f64::INFINITY, floor), Duration::MAX);
    }

    #[test]
    fn loop_mode_withholds_the_bound_frame() {
        let fwd = PlayDirection::Forward;
        assert!(!delivers(Some(10.0), 10.0, fwd, PlayMode::Loop));
        assert!(delivers(Some(10.0), 10.0, fwd, PlayMode::Once));
        assert!(delivers(Some(10.0), 9.0, fwd, PlayMode::Loop));
        assert!(delivers(None, 1e9, fwd, PlayMode::Loop));
        assert!(delivers(Some(0.0), 0.0, PlayDirection::Backward, PlayMode::Swing));
        assert!(!delivers(Some(0.0), -1.0, PlayDirection::Backward, PlayMode::Swing));
    }

    #[test]
    fn rejects_invalid_speed() {
        let clock = LabClock::new();
        let (dispatcher, _) = Dispatcher::lab(&clock);
        let timers = TimerPackage::new(&dispatcher);
        let config = TimeKeeperConfig::default().with_speed(0.0);
        assert!(matches!(
            TimeKeeper::new("bad", &timers, config),
            Err(TimeKeeperError::InvalidSpeed(_))
        ));
        let keeper =
            TimeKeeper::new("ok", &timers, TimeKeeperConfig::default()).expect("keeper");
        assert!(keeper.set_speed(f64::NAN).is_err());
        assert_eq!(keeper.speed(), 1.0);
    }

    #[test]
    fn playing_without_objects_starts_then_stops() {
        let rig = rig();
        let seen = events(&rig.keeper);
        let err = rig.keeper.play(PlayDirection::Forward).expect_err("no objects");
        assert!(matches!(err, TimeKeeperError::NoTimeObjects));
        assert!(!rig.keeper.is_playing());
        assert_eq!(
            *seen.borrow(),
            vec![
                KeeperEvent::STARTED,
                KeeperEvent::NEW_TIME,
                KeeperEvent::STOPPED
            ]
        );
    }

    #[test]
    fn one_timeout_per_keeper() {
        let rig = rig();
        let object = TimeObject::with_frequency("o", 1.0).expect("object");
        rig.keeper.add_time_object(&object).expect("attach");
        rig.keeper.play(PlayDirection::Forward).expect("play");
        assert_eq!(rig.dispatcher.pending_timeouts(), 1);
        rig.keeper.request_new_time(0.5).expect("jump");
        assert_eq!(rig.dispatcher.pending_timeouts(), 1);
        rig.keeper.play(PlayDirection::Backward).expect("reverse");
        assert_eq!(rig.dispatcher.pending_timeouts(), 1);
        rig.keeper.stop();
        assert_eq!(rig.dispatcher.pending_timeouts(), 0);
    }

    #[test]
    #[traced_test]
    fn playing_twice_in_one_direction_is_reported() {
        let rig = rig();
        let object = TimeObject::with_frequency("o", 1.0).expect("object");
        rig.keeper.add_time_object(&object).expect("attach");
        rig.keeper.play(PlayDirection::Forward).expect("play");
        let err = rig.keeper.play(PlayDirection::Forward).expect_err("again");
        assert!(matches!(err, TimeKeeperError::AlreadyPlaying));
        assert!(rig.keeper.is_playing());
        assert!(logs_contain("already playing"));
    }

    #[test]
    fn frames_follow_the_clock_and_speed() {
        let rig = rig();
        let object = TimeObject::with_frequency("o", 1.0).expect("object");
        rig.keeper.add_time_object(&object).expect("attach");
        rig.keeper.set_speed(2.0).expect("speed");
        rig.keeper.play(PlayDirection::Forward).expect("play");

        rig.dispatcher.do_one_event().expect("cycle");
        assert_eq!(rig.clock.now(), Timestamp::from_parts(0, 500_000_000));
        assert_eq!(rig.keeper.time(), 1.0);
        assert_eq!(object.current_time(), 1.0);
    }

    #[test]
    fn late_wake_up_skips_to_latest_frame() {
        let rig = rig();
        rig.readiness.set_auto_advance(false);
        let object = TimeObject::with_frequency("o", 1.0).expect("object");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        object.add_callback(move |_, time| sink.borrow_mut().push(time));
        rig.keeper.add_time_object(&object).expect("attach");
        rig.keeper.play(PlayDirection::Forward).expect("play");

        rig.clock.advance(Duration::from_millis(3_500));
        rig.dispatcher.do_one_event().expect("cycle");
        assert_eq!(*seen.borrow(), vec![0.0, 3.0]);
        assert_eq!(rig.keeper.time(), 3.0);
    }

    #[test]
    fn every_frame_mode_steps_through_each_frame() {
        let rig = rig();
        rig.readiness.set_auto_advance(false);
        rig.keeper.set_play_every_frame(true);
        let object = TimeObject::with_frequency("o", 1.0).expect("object");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        object.add_callback(move |_, time| sink.borrow_mut().push(time));
        rig.keeper.add_time_object(&object).expect("attach");
        rig.keeper.play(PlayDirection::Forward).expect("play");

        rig.clock.advance(Duration::from_millis(3_500));
        rig.dispatcher.do_one_event().expect("cycle");
        assert_eq!(*seen.borrow(), vec![0.0, 1.0]);
    }

    #[test]
    fn dropping_the_keeper_cancels_and_detaches() {
        let rig = rig();
        let object = TimeObject::with_frequency("o", 1.0).expect("object");
        rig.keeper.add_time_object(&object).expect("attach");
        rig.keeper.play(PlayDirection::Forward).expect("play");
        assert!(object.is_attached());

        let Rig {
            dispatcher, keeper, ..
        } = rig;
        drop(keeper);
        assert_eq!(dispatcher.pending_timeouts(), 0);
        assert!(!object.is_attached());
    }

    #[test]
    fn object_belongs_to_one_keeper() {
        let rig = rig();
        let other = TimeKeeper::new("other", rig.keeper.timer_package(), TimeKeeperConfig::default())
            .expect("keeper");
        let object = TimeObject::new("o");
        rig.keeper.add_time_object(&object).expect("attach");
        assert!(matches!(
            other.add_time_object(&object),
            Err(TimeKeeperError::TimeObjectAttached { .. })
        ));
        assert!(matches!(
            other.remove_time_object(&object),
            Err(TimeKeeperError::TimeObjectNotFound { .. })
        ));
        rig.keeper.remove_time_object(&object).expect("detach");
        other.add_time_object(&object).expect("now free");
    }

    #[test]
    fn removing_the_last_object_while_playing_stops() {
        let rig = rig();
        let seen = events(&rig.keeper);
        let object = TimeObject::with_frequency("o", 1.0).expect("object");
        rig.keeper.add_time_object(&object).expect("attach");
        rig.keeper.play(PlayDirection::Forward).expect("play");
        rig.keeper.remove_time_object(&object).expect("detach");

        rig.dispatcher.do_one_event().expect("cycle");
        assert!(!rig.keeper.is_playing());
        assert_eq!(seen.borrow().last(), Some(&KeeperEvent::STOPPED));
    }
}

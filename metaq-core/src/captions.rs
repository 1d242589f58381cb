//! Captions controller: keeps the on-screen caption in step with playback.
//!
//! The controller polls a [`PlaybackClock`] on every ticker interval while
//! the media plays and renders the active cue's text whenever the
//! activation state changes. Seeks bypass the ticker and force an immediate
//! rescan. Pausing fully resets the ticker, so resuming restarts its count.

use crate::cue::{Cue, Declaration, Payload};
use crate::dispatcher::{Dispatcher, ListenerId};
use crate::engine::{CueEngine, Transition};
use crate::ticker::Ticker;
use crate::{events, Result};
use log::{debug, warn};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Read access to the media element's playback state
pub trait PlaybackClock: Send {
    /// Current playback position in seconds
    fn current_time(&self) -> f64;
    fn is_playing(&self) -> bool;
}

/// Displays caption text; an empty string clears the display
pub trait CaptionRenderer: Send {
    fn render(&mut self, text: &str) -> Result<()>;
}

impl<F> CaptionRenderer for F
where
    F: FnMut(&str) -> Result<()> + Send,
{
    fn render(&mut self, text: &str) -> Result<()> {
        self(text)
    }
}

#[derive(Debug, Default)]
struct ClockState {
    time: f64,
    playing: bool,
}

/// Playback clock moved by hand. Clones share the same position.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, time: f64) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).time = time;
    }

    pub fn advance(&self, seconds: f64) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).time += seconds;
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).playing = playing;
    }
}

impl PlaybackClock for ManualClock {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).time
    }

    fn is_playing(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).playing
    }
}

/// Cue store, ticker and clock, guarded together
#[derive(Debug)]
struct CueState<C> {
    engine: CueEngine,
    ticker: Ticker,
    clock: C,
}

impl<C: PlaybackClock> CueState<C> {
    fn evaluate(&mut self) -> Option<Shown> {
        let time = self.clock.current_time();
        let transition = self.engine.update(time)?;
        Some(Shown::from_transition(&self.engine, transition))
    }
}

/// Display state captured under the lock, rendered after it is released
#[derive(Debug, Clone, PartialEq)]
struct Shown {
    text: String,
    start: Option<f64>,
    end: Option<f64>,
}

impl Shown {
    fn cleared() -> Self {
        Self {
            text: String::new(),
            start: None,
            end: None,
        }
    }

    fn from_transition(engine: &CueEngine, transition: Transition) -> Self {
        match transition {
            Transition::Active(index) => {
                let cue = &engine.cues()[index];
                Self {
                    text: cue.text().to_string(),
                    start: Some(cue.start),
                    // Open-ended cues carry no `end`
                    end: cue.end.is_finite().then_some(cue.end),
                }
            }
            Transition::Cleared => Self::cleared(),
        }
    }

    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        if let Some(start) = self.start {
            payload.insert("start".to_string(), json!(start));
        }
        if let Some(end) = self.end {
            payload.insert("end".to_string(), json!(end));
        }
        payload.insert("text".to_string(), json!(self.text));
        payload
    }
}

/// Drives one cue store from a playback clock.
///
/// The controller is shared behind an `Arc` and synchronizes itself. Cue
/// state is locked only while it is read or changed; the renderer and the
/// [`events::CUE`] listeners always run with that lock released, so a `cue`
/// handler may dispatch `seek` or `playback` back into the controller. The
/// renderer must not call back into the controller.
pub struct CaptionsController<C, R> {
    state: Mutex<CueState<C>>,
    renderer: Mutex<R>,
    dispatcher: Dispatcher,
}

impl<C, R> std::fmt::Debug for CaptionsController<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptionsController")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<C: PlaybackClock, R: CaptionRenderer> CaptionsController<C, R> {
    /// Creates a controller polling `clock` every `tick_delay`
    pub fn new(clock: C, renderer: R, tick_delay: Duration) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(CueState {
                engine: CueEngine::new(),
                ticker: Ticker::new(tick_delay, None)?,
                clock,
            }),
            renderer: Mutex::new(renderer),
            dispatcher: Dispatcher::new("captions"),
        })
    }

    fn state(&self) -> MutexGuard<'_, CueState<C>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dispatcher carrying [`events::CUE`]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The cue on screen, if any
    pub fn current(&self) -> Option<Cue> {
        self.state().engine.current().cloned()
    }

    pub fn cue_count(&self) -> usize {
        self.state().engine.cues().len()
    }

    /// True while the ticker is polling the clock
    pub fn is_polling(&self) -> bool {
        self.state().ticker.is_running()
    }

    /// Ticks since playback last started
    pub fn ticks(&self) -> u64 {
        self.state().ticker.count()
    }

    pub fn is_playing(&self) -> bool {
        self.state().clock.is_playing()
    }

    /// Replaces the cue list from declarations, skipping unusable ones.
    ///
    /// Returns the number of cues loaded.
    pub fn load(&self, declarations: &[Declaration]) -> Result<usize> {
        let mut cues = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            match Cue::from_declaration(declaration) {
                Ok(cue) => cues.push(cue),
                Err(e) => warn!("skipping caption {:?}: {}", declaration.options(), e),
            }
        }
        let loaded = cues.len();
        self.load_cues(cues)?;
        Ok(loaded)
    }

    /// Swaps in a new cue list, clearing whatever was displayed
    pub fn load_cues(&self, cues: Vec<Cue>) -> Result<()> {
        let pending = {
            let mut state = self.state();
            let was_active = state.engine.current().is_some();
            state.engine.load(cues);
            let mut pending = Vec::with_capacity(2);
            if was_active {
                pending.push(Shown::cleared());
            }
            pending.extend(state.evaluate());
            pending
        };
        for shown in pending {
            self.show(shown)?;
        }
        Ok(())
    }

    /// Re-evaluates immediately after the position jumped
    pub fn on_seek(&self) -> Result<()> {
        let shown = {
            let mut state = self.state();
            let time = state.clock.current_time();
            let transition = state.engine.seek(time);
            Shown::from_transition(&state.engine, transition)
        };
        self.show(shown)
    }

    /// Starts polling while playing, fully resets the ticker while paused
    pub fn on_playback(&self, playing: bool) {
        debug!("captions playback {}", if playing { "started" } else { "paused" });
        let mut state = self.state();
        if playing {
            state.ticker.start();
        } else {
            state.ticker.reset();
        }
    }

    /// Advances the ticker to `now` and re-evaluates if any tick fired
    pub fn poll(&self, now: Instant) -> Result<()> {
        let shown = {
            let mut state = self.state();
            if state.ticker.poll(now)? > 0 {
                state.evaluate()
            } else {
                None
            }
        };
        match shown {
            Some(shown) => self.show(shown),
            None => Ok(()),
        }
    }

    /// Evaluates the clock once, rendering only on a state change
    pub fn update(&self) -> Result<()> {
        let shown = self.state().evaluate();
        match shown {
            Some(shown) => self.show(shown),
            None => Ok(()),
        }
    }

    fn show(&self, shown: Shown) -> Result<()> {
        self.renderer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .render(&shown.text)?;
        self.dispatcher.dispatch(events::CUE, Some(shown.into_payload()))
    }
}

/// Subscribes `controller` to the player's `seek` and `playback` events.
///
/// The returned ids detach the controller when the media session ends.
pub fn attach<C, R>(controller: &Arc<CaptionsController<C, R>>, player: &Dispatcher) -> Vec<ListenerId>
where
    C: PlaybackClock + 'static,
    R: CaptionRenderer + 'static,
{
    let on_seek = Arc::clone(controller);
    let seek = player.listen(events::SEEK, move |_, _| on_seek.on_seek());

    let on_playback = Arc::clone(controller);
    let playback = player.listen(events::PLAYBACK, move |event, _| {
        let playing = event
            .get_bool("playing")
            .unwrap_or_else(|| on_playback.is_playing());
        on_playback.on_playback(playing);
        Ok(())
    });

    vec![seek, playback]
}

//! Cue store and activation state machine.
//!
//! The engine is either idle (no cue) or active on one cue of its list. Each
//! evaluation against a playback time either keeps the state (the active cue
//! still contains the time) or rescans the list from the beginning and takes
//! the first cue whose `[start, end)` range contains the time. On overlapping
//! cues the earliest one in list order wins, not the nearest.

use crate::cue::Cue;
use log::debug;

/// A change of activation state that must be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The cue at this index became current
    Active(usize),
    /// No cue is current any more
    Cleared,
}

/// Ordered cue list plus the current-cue cursor
#[derive(Debug, Default)]
pub struct CueEngine {
    cues: Vec<Cue>,
    current: Option<usize>,
}

impl CueEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole cue list and clears the cursor
    pub fn load(&mut self, cues: Vec<Cue>) {
        debug!("cue store loaded with {} cues", cues.len());
        self.cues = cues;
        self.current = None;
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    /// The cue active at the last evaluated time
    pub fn current(&self) -> Option<&Cue> {
        self.current.map(|index| &self.cues[index])
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Evaluates the playback clock on a regular poll.
    ///
    /// Returns `None` when nothing changed since the previous evaluation.
    pub fn update(&mut self, time: f64) -> Option<Transition> {
        if let Some(index) = self.current {
            if self.cues[index].is_active(time) {
                return None;
            }
        }
        let found = self.find(time);
        if found.is_none() && self.current.is_none() {
            return None;
        }
        Some(self.enter(found, time))
    }

    /// Evaluates after a seek: always rescans and always reports the state
    pub fn seek(&mut self, time: f64) -> Transition {
        let found = self.find(time);
        self.enter(found, time)
    }

    fn find(&self, time: f64) -> Option<usize> {
        self.cues.iter().position(|cue| cue.is_active(time))
    }

    fn enter(&mut self, found: Option<usize>, time: f64) -> Transition {
        self.current = found;
        match found {
            Some(index) => {
                debug!(
                    "cue {} active at {:.3}s [{:.3}, {:.3})",
                    index, time, self.cues[index].start, self.cues[index].end
                );
                Transition::Active(index)
            }
            None => {
                debug!("no cue at {:.3}s", time);
                Transition::Cleared
            }
        }
    }
}

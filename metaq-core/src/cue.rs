//! Cue data structures: raw declarations and resolved time-ranged cues

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form option map carried by a declaration or cue
pub type Payload = Map<String, Value>;

/// A raw timed-event declaration as delivered in `captions` or `metaq`.
///
/// The only fields the pipeline understands are `start` and `end` (seconds);
/// every other key is passed through untouched to whichever backend or
/// renderer ends up consuming the declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Declaration(Payload);

impl Declaration {
    /// Creates a declaration from an option map
    pub fn new(options: Payload) -> Self {
        Self(options)
    }

    /// Start offset in seconds, if present and numeric
    pub fn start(&self) -> Option<f64> {
        self.0.get("start").and_then(Value::as_f64)
    }

    /// End offset in seconds, if present and numeric
    pub fn end(&self) -> Option<f64> {
        self.0.get("end").and_then(Value::as_f64)
    }

    /// Overwrites the end offset
    pub fn set_end(&mut self, end: f64) {
        self.0.insert("end".to_string(), Value::from(end));
    }

    /// Merges `overrides` over this declaration; override wins on key conflict
    pub fn merge(&mut self, overrides: &Payload) {
        for (key, value) in overrides {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Looks up an arbitrary option
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Caption text, or the empty string when the declaration has none
    pub fn text(&self) -> &str {
        self.0.get("text").and_then(Value::as_str).unwrap_or("")
    }

    pub fn options(&self) -> &Payload {
        &self.0
    }

    pub fn into_options(self) -> Payload {
        self.0
    }
}

impl From<Payload> for Declaration {
    fn from(options: Payload) -> Self {
        Self(options)
    }
}

/// A resolved cue bound to the half-open range `[start, end)`
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds (exclusive)
    pub end: f64,
    /// Options the cue was declared with
    pub payload: Payload,
}

impl Cue {
    /// Creates a new cue, rejecting ranges whose end precedes their start
    pub fn new(start: f64, end: f64, payload: Payload) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self {
            start,
            end,
            payload,
        })
    }

    /// Builds a cue from a resolved declaration.
    ///
    /// A declaration without an `end` stays active until the end of the media.
    pub fn from_declaration(declaration: &Declaration) -> Result<Self> {
        let start = declaration.start().ok_or(Error::MissingStart)?;
        let end = declaration.end().unwrap_or(f64::INFINITY);
        Self::new(start, end, declaration.options().clone())
    }

    /// Checks if this cue is active at the given playback time
    pub fn is_active(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    /// Returns the duration of this cue in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Caption text carried by the cue, or the empty string
    pub fn text(&self) -> &str {
        self.payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

//! Session and per-type pipeline configuration

use crate::cue::Payload;
use crate::Result;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;
use std::time::Duration;

/// Configuration governing one cue type in the metaq pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeConfig {
    /// Options merged over every declaration of this type (override wins)
    pub overrides: Option<Payload>,
    /// Fixed duration in seconds; replaces any supplied `end`
    pub duration: Option<f64>,
    /// Sequence id chaining this type's cues end-to-start
    pub sequence: Option<String>,
    /// Types that receive a copy of every declaration of this type.
    /// Accepts `"a b"` or `["a", "b"]`.
    #[serde(deserialize_with = "deserialize_clone")]
    pub clone: IndexSet<String>,
}

impl TypeConfig {
    pub fn with_overrides(mut self, overrides: Payload) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_sequence(mut self, sequence: &str) -> Self {
        self.sequence = Some(sequence.to_string());
        self
    }

    /// Adds clone targets from a whitespace-separated list
    pub fn with_clone(mut self, targets: &str) -> Self {
        self.clone.extend(targets.split_whitespace().map(str::to_string));
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CloneTargets {
    Words(String),
    List(Vec<String>),
}

fn deserialize_clone<'de, D>(deserializer: D) -> std::result::Result<IndexSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let targets = Option::<CloneTargets>::deserialize(deserializer)?;
    Ok(match targets {
        None => IndexSet::new(),
        Some(CloneTargets::Words(words)) => words.split_whitespace().map(str::to_string).collect(),
        Some(CloneTargets::List(list)) => list.into_iter().collect(),
    })
}

/// Media session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Playback clock poll interval in milliseconds
    pub tick_ms: u64,
    /// Metaq types whose resolved cues feed the caption cue store
    pub caption_types: Vec<String>,
    /// Per-type pipeline configuration, in declaration order
    pub types: IndexMap<String, TypeConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            caption_types: vec!["caption".to_string()],
            types: IndexMap::new(),
        }
    }
}

impl SessionConfig {
    /// Parses a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn tick_delay(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn type_config(&self, cue_type: &str) -> Option<&TypeConfig> {
        self.types.get(cue_type)
    }

    pub fn is_caption_type(&self, cue_type: &str) -> bool {
        self.caption_types.iter().any(|t| t == cue_type)
    }
}

//! Metaq Core Library
//!
//! This library provides the temporal cue pipeline of the player: the event
//! dispatcher every component talks through, the interval ticker that polls
//! the playback clock, the cue store that decides which caption is current,
//! and the metaq transform pipeline that resolves a raw delivery of timed
//! declarations into schedulable cues.

pub mod captions;
pub mod config;
pub mod cue;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod metaq;
pub mod scheduler;
pub mod session;
pub mod ticker;

pub use captions::{attach, CaptionRenderer, CaptionsController, ManualClock, PlaybackClock};
pub use config::{SessionConfig, TypeConfig};
pub use cue::{Cue, Declaration, Payload};
pub use dispatcher::{Dispatcher, Event, ListenerId};
pub use engine::{CueEngine, Transition};
pub use metaq::{Metaq, Pipeline};
pub use scheduler::{BackendRegistry, CueBackend};
pub use session::{DeliveryTicket, MediaSession, Metadata};
pub use ticker::Ticker;

/// Result type for metaq-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for metaq-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ticker delay must be greater than zero")]
    InvalidDelay,

    #[error("Invalid cue range: end {end} precedes start {start}")]
    InvalidRange { start: f64, end: f64 },

    #[error("Declaration has no numeric start")]
    MissingStart,

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Backend '{cue_type}' failed: {message}")]
    Backend { cue_type: String, message: String },
}

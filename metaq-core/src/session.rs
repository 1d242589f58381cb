//! Media session: applies metadata deliveries to the cue pipeline.
//!
//! One session exists per media element. It owns the player-side
//! [`Dispatcher`], the backend registry and the captions controller. Every
//! load is identified by a [`DeliveryTicket`]; only the most recent ticket
//! may complete, so a slow delivery for a previous media item is dropped
//! instead of overwriting the current one.

use crate::captions::{attach, CaptionRenderer, CaptionsController, PlaybackClock};
use crate::config::SessionConfig;
use crate::cue::{Declaration, Payload};
use crate::dispatcher::{Dispatcher, ListenerId};
use crate::metaq::{Metaq, Pipeline};
use crate::scheduler::BackendRegistry;
use crate::{events, Result};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

/// Timed metadata delivered alongside a media item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Caption declarations fed straight into the cue store
    pub captions: Vec<Declaration>,
    /// Raw metaq declarations, by cue type
    pub metaq: Metaq,
}

impl Metadata {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Identifies one pending metadata load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTicket(u64);

/// Cue pipeline state for one media element
pub struct MediaSession<C, R> {
    config: SessionConfig,
    pipeline: Pipeline,
    backends: BackendRegistry,
    captions: Arc<CaptionsController<C, R>>,
    dispatcher: Dispatcher,
    listeners: Vec<ListenerId>,
    generation: u64,
}

impl<C, R> std::fmt::Debug for MediaSession<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("config", &self.config)
            .field("backends", &self.backends)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<C, R> MediaSession<C, R>
where
    C: PlaybackClock + 'static,
    R: CaptionRenderer + 'static,
{
    /// Creates a session and subscribes its captions to the player's events
    pub fn new(config: SessionConfig, backends: BackendRegistry, clock: C, renderer: R) -> Result<Self> {
        let captions = Arc::new(CaptionsController::new(clock, renderer, config.tick_delay())?);
        let dispatcher = Dispatcher::new("player");
        let listeners = attach(&captions, &dispatcher);

        Ok(Self {
            pipeline: Pipeline::new(config.types.clone()),
            config,
            backends,
            captions,
            dispatcher,
            listeners,
            generation: 0,
        })
    }

    /// The player-side dispatcher (`load`, `seek`, `playback`, `mediaChange`)
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn captions(&self) -> &Arc<CaptionsController<C, R>> {
        &self.captions
    }

    pub fn backends_mut(&mut self) -> &mut BackendRegistry {
        &mut self.backends
    }

    /// Starts a new load; any earlier ticket becomes stale
    pub fn begin_load(&mut self) -> DeliveryTicket {
        self.generation += 1;
        DeliveryTicket(self.generation)
    }

    /// Switches to a related media item and returns the ticket for its metadata
    pub fn media_change(&mut self) -> Result<DeliveryTicket> {
        let ticket = self.begin_load();
        self.dispatcher.dispatch(events::MEDIA_CHANGE, None)?;
        Ok(ticket)
    }

    /// Applies a delivery: resolves metaq, swaps the caption cues and hands
    /// every other type to its backend.
    ///
    /// Returns `None` when the ticket is stale and the delivery was dropped.
    ///
    /// The steps run in order and are not rolled back. When this returns
    /// `Err`, every step before the failing one has taken effect:
    ///
    /// - renderer or `cue` listener failure: the caption cues are already
    ///   swapped, no backend has been scheduled and `load` is not dispatched;
    /// - backend failure: the caption cues are swapped and the backends
    ///   before the failing declaration have scheduled their cues; `load` is
    ///   not dispatched;
    /// - `load` listener failure: everything is applied.
    pub fn deliver(&mut self, ticket: DeliveryTicket, metadata: Metadata) -> Result<Option<Metaq>> {
        if ticket.0 != self.generation {
            info!(
                "dropping stale delivery {} (current load is {})",
                ticket.0, self.generation
            );
            return Ok(None);
        }

        let resolved = self.pipeline.resolve(metadata.metaq);

        let mut captions = metadata.captions;
        for (cue_type, declarations) in &resolved {
            if self.config.is_caption_type(cue_type) {
                captions.extend(declarations.iter().cloned());
            }
        }
        let loaded = self.captions.load(&captions)?;

        let config = &self.config;
        let scheduled = self
            .backends
            .schedule(&resolved, |cue_type| !config.is_caption_type(cue_type))?;

        info!(
            "delivery {}: {} caption cues, {} scheduled across {} types",
            ticket.0,
            loaded,
            scheduled,
            resolved.len()
        );

        let mut payload = Payload::new();
        payload.insert("captions".to_string(), json!(loaded));
        payload.insert("scheduled".to_string(), json!(scheduled));
        payload.insert("types".to_string(), json!(resolved.keys().collect::<Vec<_>>()));
        self.dispatcher.dispatch(events::LOAD, Some(payload))?;

        Ok(Some(resolved))
    }

    /// Notifies the session that the playback position jumped
    pub fn notify_seek(&self) -> Result<()> {
        self.dispatcher.dispatch(events::SEEK, None)
    }

    /// Notifies the session that playback started or paused
    pub fn notify_playback(&self, playing: bool) -> Result<()> {
        let mut payload = Payload::new();
        payload.insert("playing".to_string(), json!(playing));
        self.dispatcher.dispatch(events::PLAYBACK, Some(payload))
    }

    /// Drives the captions ticker from the host loop
    pub fn poll(&self, now: Instant) -> Result<()> {
        self.captions.poll(now)
    }
}

impl<C, R> Drop for MediaSession<C, R> {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.dispatcher.unlisten(id);
        }
    }
}

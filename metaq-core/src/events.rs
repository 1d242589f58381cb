//! Event type names carried by dispatchers

/// Metadata for the current media item has been applied
pub const LOAD: &str = "load";

/// The playback position jumped
pub const SEEK: &str = "seek";

/// Play/pause state changed; payload carries `playing: bool`
pub const PLAYBACK: &str = "playback";

/// A ticker fired; payload carries `count` and `remain`
pub const TIME: &str = "time";

/// A bounded ticker reached its count
pub const COMPLETE: &str = "complete";

/// The player switched to a related media item
pub const MEDIA_CHANGE: &str = "mediaChange";

/// The active caption cue changed; payload carries `text` and the cue range
pub const CUE: &str = "cue";

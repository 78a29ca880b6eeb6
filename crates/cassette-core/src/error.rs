//! Error types for the playback core.

use thiserror::Error;

use crate::track::BackendTag;


/// Errors raised by queue mutations.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum QueueError {
    #[error( "Index {index} is out of bounds for a queue of {len} tracks" )]
    InvalidIndex { index: usize, len: usize },
}


/// Terminal failures reported by a backend adapter.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum AdapterError {
    #[error( "Track {track_id} is not playable: {reason}" )]
    NotPlayable { track_id: String, reason: String },

    #[error( "No track prepared" )]
    NoTrack,

    #[error( "Backend error: {0}" )]
    Backend( String ),
}


/// Errors from the exclusive audio session.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum SessionError {
    /// A single activation attempt failed at the OS layer.
    #[error( "Audio session activation failed: {0}" )]
    ActivationFailed( String ),

    /// Every activation attempt failed.
    #[error( "Playback unavailable: could not acquire audio output for {tag} after {attempts} attempts" )]
    Unavailable { tag: BackendTag, attempts: u32 },
}


/// Errors surfaced by the playback coordinator.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum PlaybackError {
    #[error( transparent )]
    Queue( #[from] QueueError ),

    #[error( transparent )]
    Adapter( #[from] AdapterError ),

    #[error( transparent )]
    Session( #[from] SessionError ),

    #[error( "Gave up after {skipped} consecutive unplayable tracks" )]
    SkipLimitReached { skipped: u32 },

    #[error( "Queue is empty" )]
    NoQueue,

    #[error( "Coordinator is no longer running" )]
    Closed,
}


impl PlaybackError {
    /// True when the error is the arbiter's `SessionUnavailable`.
    pub fn is_session_unavailable( &self ) -> bool {
        matches!( self, PlaybackError::Session( SessionError::Unavailable { .. } ) )
    }
}

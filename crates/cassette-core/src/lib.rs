//! Cassette Core - Playback coordination
//!
//! This crate provides the parts of the player that sit between the UI and
//! the individual music backends: the shared queue, arbitration of the
//! exclusive audio session, the now-playing projection, and the coordinator
//! that ties them together.

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod projector;
pub mod queue;
pub mod session;
pub mod snapshot;
pub mod track;

pub use adapter::{ AdapterEvent, AdapterMessage, AdapterSet, AdapterSink, BackendAdapter, SkipOutcome };
pub use config::CoreConfig;
pub use coordinator::{ Coordinator, CoordinatorEvent, CoordinatorHandle, Intent, Notice, PlaybackState };
pub use error::{ AdapterError, PlaybackError, QueueError, SessionError };
pub use projector::{
    ArtworkCache, ArtworkDisplay, NowPlayingInfo, NowPlayingProjector, NowPlayingSink,
    PassthroughArtwork, RemoteCommand, RemoteCommandSender, ResolvedArtwork,
};
pub use queue::{ Advance, QueueState, RepeatMode, Retreat };
pub use session::{ ArbiterSignal, AudioSession, RouteChangeReason, SessionArbiter, SessionEvent };
pub use snapshot::PlaybackSnapshot;
pub use track::{ Artwork, BackendTag, Track };

//! Backend adapter contract
//!
//! Every music source (catalog service, streaming servers, local files)
//! implements [`BackendAdapter`]. The coordinator only ever talks to the
//! active adapter, and only through this trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AdapterError;
use crate::track::{ BackendTag, Track };


/// Progress and completion reports pushed by an adapter.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum AdapterEvent {
    /// Periodic position report, in seconds.
    Position { elapsed: f64, total: f64, is_playing: bool },
    /// The prepared track played to its end. Sent once per track.
    Finished,
}


/// An [`AdapterEvent`] stamped with the activation it came from.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct AdapterMessage {
    pub tag: BackendTag,
    pub generation: u64,
    pub event: AdapterEvent,
}


/// Result of asking an adapter to skip within its own mirrored queue.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SkipOutcome {
    /// The adapter already loaded the neighbouring track; no prepare needed.
    NextTrackLoaded,
    /// The adapter's own queue has nothing further in that direction.
    QueueExhausted,
    /// The adapter has no queue of its own; the coordinator must prepare.
    Unsupported,
}


/// Channel an active adapter reports through.
///
/// Handed to the adapter on activation. Once the adapter is deactivated the
/// token is cancelled and anything still sent is discarded by the
/// coordinator.
#[derive( Clone )]
pub struct AdapterSink {
    tag: BackendTag,
    generation: u64,
    tx: mpsc::UnboundedSender<AdapterMessage>,
    token: CancellationToken,
}


impl fmt::Debug for AdapterSink {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.debug_struct( "AdapterSink" )
            .field( "tag", &self.tag )
            .field( "generation", &self.generation )
            .field( "cancelled", &self.token.is_cancelled() )
            .finish()
    }
}


impl AdapterSink {
    /// Builds a sink. The coordinator makes one per activation; hosts only
    /// need this to drive an adapter on their own.
    pub fn new(
        tag: BackendTag,
        generation: u64,
        tx: mpsc::UnboundedSender<AdapterMessage>,
        token: CancellationToken,
    ) -> Self {
        Self { tag, generation, tx, token }
    }


    /// Reports the current position. Returns false once the sink is closed.
    pub fn position( &self, elapsed: f64, total: f64, is_playing: bool ) -> bool {
        self.send( AdapterEvent::Position { elapsed, total, is_playing } )
    }


    /// Reports that the prepared track finished playing.
    pub fn finished( &self ) -> bool {
        self.send( AdapterEvent::Finished )
    }


    /// True once the adapter has been deactivated.
    pub fn is_closed( &self ) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }


    /// Resolves when the adapter is deactivated; position loops select on this.
    pub async fn closed( &self ) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }


    pub fn tag( &self ) -> BackendTag {
        self.tag
    }


    fn send( &self, event: AdapterEvent ) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send( AdapterMessage { tag: self.tag, generation: self.generation, event } ).is_ok()
    }
}


/// Uniform control surface for one audio source.
///
/// Adapters perform their own I/O and retry transient failures internally;
/// every method reports only terminal success or failure.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which source this adapter plays.
    fn tag( &self ) -> BackendTag;

    /// Makes the adapter active. Position reports go to `sink` until deactivation.
    async fn activate( &self, sink: AdapterSink ) -> Result<(), AdapterError>;

    /// Stops output and releases backend resources. Must be idempotent.
    async fn deactivate( &self );

    /// Loads a track so that `play` can start it.
    async fn prepare( &self, track: &Track ) -> Result<(), AdapterError>;

    async fn play( &self ) -> Result<(), AdapterError>;

    async fn pause( &self ) -> Result<(), AdapterError>;

    /// Seeks within the prepared track, in seconds.
    async fn seek( &self, to: f64 ) -> Result<(), AdapterError>;

    /// Mirrors the coordinator's queue order for adapters that keep one.
    async fn set_queue( &self, _tracks: &[Track], _index: usize ) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn skip_next( &self ) -> Result<SkipOutcome, AdapterError> {
        Ok( SkipOutcome::Unsupported )
    }

    async fn skip_previous( &self ) -> Result<SkipOutcome, AdapterError> {
        Ok( SkipOutcome::Unsupported )
    }
}


/// The fixed set of adapters, one per backend, created at startup.
#[derive( Clone, Default )]
pub struct AdapterSet {
    adapters: HashMap<BackendTag, Arc<dyn BackendAdapter>>,
}


impl fmt::Debug for AdapterSet {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.debug_set().entries( self.adapters.keys() ).finish()
    }
}


impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }


    /// Registers an adapter under its own tag, replacing any previous one.
    pub fn with( mut self, adapter: Arc<dyn BackendAdapter> ) -> Self {
        self.adapters.insert( adapter.tag(), adapter );
        self
    }


    pub fn get( &self, tag: BackendTag ) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get( &tag ).cloned()
    }


    pub fn contains( &self, tag: BackendTag ) -> bool {
        self.adapters.contains_key( &tag )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[tokio::test]
    async fn test_sink_stamps_and_stops_after_cancel() {
        let ( tx, mut rx ) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let sink = AdapterSink::new( BackendTag::Subsonic, 4, tx, token.clone() );

        assert!( sink.position( 1.0, 10.0, true ) );
        let message = rx.recv().await.unwrap();
        assert_eq!( message.generation, 4 );
        assert_eq!( message.tag, BackendTag::Subsonic );

        token.cancel();
        assert!( sink.is_closed() );
        assert!( !sink.finished() );
        sink.closed().await;
        assert!( rx.try_recv().is_err() );
    }
}

//! Now-playing projection
//!
//! Mirrors the coordinator's playback snapshot onto the system media-control
//! surface and to in-process observers, and forwards remote transport
//! commands from that surface back to the coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{ mpsc, watch };
use tokio::task::JoinHandle;

use crate::snapshot::PlaybackSnapshot;
use crate::track::Artwork;


/// Transport commands received from the system media controls.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum RemoteCommand {
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
    /// Absolute position in seconds.
    SeekTo( f64 ),
}


/// Sender handed to sinks so they can forward remote commands.
pub type RemoteCommandSender = mpsc::UnboundedSender<RemoteCommand>;


/// Artwork in a form the display surface can show.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum ResolvedArtwork {
    Url( String ),
    Bytes( Arc<[u8]> ),
}


/// What the artwork slot currently shows.
#[derive( Debug, Clone, PartialEq, Eq, Default )]
pub enum ArtworkDisplay {
    #[default]
    Placeholder,
    Image( ResolvedArtwork ),
}


/// Fields shown by the system media-control surface.
#[derive( Debug, Clone, PartialEq )]
pub struct NowPlayingInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: f64,
    pub elapsed: f64,
    /// 1.0 while playing, 0.0 while paused.
    pub rate: f64,
}


impl From<&PlaybackSnapshot> for NowPlayingInfo {
    fn from( snapshot: &PlaybackSnapshot ) -> Self {
        Self {
            title: snapshot.title.clone(),
            artist: snapshot.artist.clone(),
            album: snapshot.album.clone(),
            duration: snapshot.total,
            elapsed: snapshot.elapsed,
            rate: if snapshot.is_playing { 1.0 } else { 0.0 },
        }
    }
}


/// The OS now-playing display.
pub trait NowPlayingSink: Send {
    /// Connects the sink's remote command callbacks. Called once at startup.
    fn attach( &mut self, _commands: RemoteCommandSender ) {}

    /// Replaces the text and timing fields.
    fn set_info( &mut self, info: &NowPlayingInfo );

    /// Replaces only the artwork.
    fn set_artwork( &mut self, artwork: &ArtworkDisplay );

    /// Removes everything from the display.
    fn clear( &mut self );
}


/// Resolves artwork references to displayable images.
#[async_trait]
pub trait ArtworkCache: Send + Sync {
    async fn resolve( &self, track_id: &str, artwork: &Artwork ) -> Option<ResolvedArtwork>;
}


/// Cache that displays URLs and embedded bytes as they are.
#[derive( Debug, Default, Clone, Copy )]
pub struct PassthroughArtwork;


#[async_trait]
impl ArtworkCache for PassthroughArtwork {
    async fn resolve( &self, _track_id: &str, artwork: &Artwork ) -> Option<ResolvedArtwork> {
        Some( match artwork {
            Artwork::Url( url ) => ResolvedArtwork::Url( url.clone() ),
            Artwork::Bytes( bytes ) => ResolvedArtwork::Bytes( Arc::clone( bytes ) ),
        })
    }
}


/// Artwork that finished resolving in the background.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct ArtworkReady {
    pub track_id: String,
    pub artwork: ResolvedArtwork,
}


/// Publishes snapshots to the system surface and to observers.
pub struct NowPlayingProjector {
    sink: Box<dyn NowPlayingSink>,
    artwork_cache: Arc<dyn ArtworkCache>,
    last: Option<PlaybackSnapshot>,
    /// Track whose artwork is shown or being resolved.
    artwork_track: Option<String>,
    artwork_task: Option<JoinHandle<()>>,
    artwork_tx: Option<mpsc::UnboundedSender<ArtworkReady>>,
    observers: watch::Sender<Option<PlaybackSnapshot>>,
}


impl std::fmt::Debug for NowPlayingProjector {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "NowPlayingProjector" )
            .field( "last", &self.last )
            .field( "artwork_track", &self.artwork_track )
            .finish()
    }
}


impl NowPlayingProjector {
    pub fn new( sink: Box<dyn NowPlayingSink>, artwork_cache: Arc<dyn ArtworkCache> ) -> Self {
        let ( observers, _ ) = watch::channel( None );
        Self {
            sink,
            artwork_cache,
            last: None,
            artwork_track: None,
            artwork_task: None,
            artwork_tx: None,
            observers,
        }
    }


    /// Wires the projector to the coordinator's inbound channels.
    pub( crate ) fn connect(
        &mut self,
        commands: RemoteCommandSender,
        artwork_tx: mpsc::UnboundedSender<ArtworkReady>,
    ) {
        self.sink.attach( commands );
        self.artwork_tx = Some( artwork_tx );
    }


    /// Receives every published snapshot; `None` after a clear.
    pub fn subscribe( &self ) -> watch::Receiver<Option<PlaybackSnapshot>> {
        self.observers.subscribe()
    }


    /// The last published snapshot.
    pub fn last( &self ) -> Option<&PlaybackSnapshot> {
        self.last.as_ref()
    }


    /// Publishes a snapshot. Unchanged values are a no-op.
    ///
    /// A new track shows the placeholder until its artwork resolves.
    ///
    /// @returns true if anything was pushed to the sink
    pub fn publish( &mut self, snapshot: PlaybackSnapshot, artwork: Option<&Artwork> ) -> bool {
        if self.last.as_ref().is_some_and( |last| last.same_as( &snapshot ) ) {
            return false;
        }

        if self.artwork_track.as_deref() != Some( snapshot.track_id.as_str() ) {
            self.begin_artwork( &snapshot.track_id, artwork );
        }

        self.push( snapshot );
        true
    }


    /// Moves elapsed time forward while playing, without a new snapshot
    /// from the coordinator.
    pub fn tick( &mut self, delta: f64 ) -> bool {
        let next = match &self.last {
            Some( last ) if last.is_playing => last.advanced_by( delta ),
            _ => return false,
        };
        if self.last.as_ref().is_some_and( |last| last.same_as( &next ) ) {
            return false;
        }
        self.push( next );
        true
    }


    /// Removes all now-playing information.
    pub fn clear( &mut self ) {
        if let Some( task ) = self.artwork_task.take() {
            task.abort();
        }
        self.artwork_track = None;
        self.last = None;
        self.sink.clear();
        self.observers.send_replace( None );
        tracing::debug!( "Now playing cleared" );
    }


    /// Swaps in resolved artwork if it still belongs to the displayed track.
    pub fn apply_artwork( &mut self, ready: ArtworkReady ) -> bool {
        if self.artwork_track.as_deref() != Some( ready.track_id.as_str() ) {
            tracing::debug!( "Dropping stale artwork for {}", ready.track_id );
            return false;
        }
        self.artwork_task = None;
        self.sink.set_artwork( &ArtworkDisplay::Image( ready.artwork ) );
        true
    }


    fn push( &mut self, snapshot: PlaybackSnapshot ) {
        self.sink.set_info( &NowPlayingInfo::from( &snapshot ) );
        self.observers.send_replace( Some( snapshot.clone() ) );
        self.last = Some( snapshot );
    }


    fn begin_artwork( &mut self, track_id: &str, artwork: Option<&Artwork> ) {
        if let Some( task ) = self.artwork_task.take() {
            task.abort();
        }
        self.artwork_track = Some( track_id.to_string() );
        self.sink.set_artwork( &ArtworkDisplay::Placeholder );

        let ( Some( artwork ), Some( tx ) ) = ( artwork.cloned(), self.artwork_tx.clone() ) else {
            return;
        };

        let cache = Arc::clone( &self.artwork_cache );
        let track_id = track_id.to_string();
        self.artwork_task = Some( tokio::spawn( async move {
            match cache.resolve( &track_id, &artwork ).await {
                Some( artwork ) => {
                    let _ = tx.send( ArtworkReady { track_id, artwork } );
                }
                None => tracing::debug!( "No artwork resolved for {}", track_id ),
            }
        }));
    }
}


#[cfg( test )]
pub( crate ) mod tests {
    use super::*;

    use std::sync::Mutex;


    /// Sink that records every call.
    #[derive( Clone, Default )]
    pub( crate ) struct RecordingSink {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub info: Arc<Mutex<Option<NowPlayingInfo>>>,
        pub artwork: Arc<Mutex<ArtworkDisplay>>,
    }


    impl RecordingSink {
        pub fn count( &self, prefix: &str ) -> usize {
            self.calls.lock().unwrap().iter().filter( |c| c.starts_with( prefix ) ).count()
        }
    }


    impl NowPlayingSink for RecordingSink {
        fn set_info( &mut self, info: &NowPlayingInfo ) {
            self.calls.lock().unwrap().push( format!( "info:{}", info.title ) );
            *self.info.lock().unwrap() = Some( info.clone() );
        }


        fn set_artwork( &mut self, artwork: &ArtworkDisplay ) {
            self.calls.lock().unwrap().push( format!( "artwork:{:?}", artwork ) );
            *self.artwork.lock().unwrap() = artwork.clone();
        }


        fn clear( &mut self ) {
            self.calls.lock().unwrap().push( "clear".into() );
            *self.info.lock().unwrap() = None;
        }
    }


    fn snapshot( id: &str, elapsed: f64, is_playing: bool ) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_id: id.into(),
            title: id.to_uppercase(),
            artist: "Artist".into(),
            album: "Album".into(),
            elapsed,
            total: 100.0,
            is_playing,
            track_index: 1,
            track_count: 1,
            queue_elapsed: elapsed,
            queue_total: 100.0,
        }
    }


    fn projector() -> ( NowPlayingProjector, RecordingSink, mpsc::UnboundedReceiver<ArtworkReady> ) {
        let sink = RecordingSink::default();
        let mut projector = NowPlayingProjector::new( Box::new( sink.clone() ), Arc::new( PassthroughArtwork ) );
        let ( commands, _ ) = mpsc::unbounded_channel();
        let ( artwork_tx, artwork_rx ) = mpsc::unbounded_channel();
        projector.connect( commands, artwork_tx );
        ( projector, sink, artwork_rx )
    }


    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let ( mut projector, sink, _rx ) = projector();

        assert!( projector.publish( snapshot( "a", 1.0, true ), None ) );
        assert!( !projector.publish( snapshot( "a", 1.0, true ), None ) );
        assert!( projector.publish( snapshot( "a", 2.0, true ), None ) );

        assert_eq!( sink.count( "info:" ), 2 );
        assert_eq!( sink.count( "artwork:" ), 1 );
    }


    #[tokio::test]
    async fn test_artwork_swapped_in_without_touching_info() {
        let ( mut projector, sink, mut rx ) = projector();
        let art = Artwork::Url( "file:///cover.png".into() );

        projector.publish( snapshot( "a", 0.0, true ), Some( &art ) );
        assert_eq!( *sink.artwork.lock().unwrap(), ArtworkDisplay::Placeholder );

        let ready = rx.recv().await.unwrap();
        let infos_before = sink.count( "info:" );
        assert!( projector.apply_artwork( ready ) );

        assert_eq!( sink.count( "info:" ), infos_before );
        assert_eq!(
            *sink.artwork.lock().unwrap(),
            ArtworkDisplay::Image( ResolvedArtwork::Url( "file:///cover.png".into() ) ),
        );
    }


    #[tokio::test]
    async fn test_stale_artwork_dropped() {
        let ( mut projector, sink, _rx ) = projector();
        projector.publish( snapshot( "a", 0.0, true ), None );
        projector.publish( snapshot( "b", 0.0, true ), None );

        let stale = ArtworkReady { track_id: "a".into(), artwork: ResolvedArtwork::Url( "x".into() ) };
        assert!( !projector.apply_artwork( stale ) );
        assert_eq!( *sink.artwork.lock().unwrap(), ArtworkDisplay::Placeholder );
    }


    #[tokio::test]
    async fn test_tick_advances_only_while_playing() {
        let ( mut projector, sink, _rx ) = projector();
        let observer = projector.subscribe();

        projector.publish( snapshot( "a", 10.0, true ), None );
        assert!( projector.tick( 1.0 ) );
        assert_eq!( sink.info.lock().unwrap().as_ref().unwrap().elapsed, 11.0 );
        assert_eq!( observer.borrow().as_ref().unwrap().elapsed, 11.0 );

        projector.publish( snapshot( "a", 11.0, false ), None );
        assert!( !projector.tick( 1.0 ) );
        assert_eq!( sink.info.lock().unwrap().as_ref().unwrap().rate, 0.0 );
    }


    #[tokio::test]
    async fn test_clear_resets_observers() {
        let ( mut projector, sink, _rx ) = projector();
        let observer = projector.subscribe();

        projector.publish( snapshot( "a", 0.0, true ), None );
        projector.clear();

        assert!( observer.borrow().is_none() );
        assert!( sink.info.lock().unwrap().is_none() );
        assert!( projector.last().is_none() );

        // Same values after a clear are published again
        assert!( projector.publish( snapshot( "a", 0.0, true ), None ) );
    }
}

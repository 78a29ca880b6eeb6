//! Playback coordinator
//!
//! Owns the queue, selects the active backend adapter, requests and releases
//! the audio session, and feeds the now-playing projector. Every mutation
//! happens on the coordinator's own task: UI intents, OS session events,
//! remote commands, adapter reports and refresh ticks are all marshaled onto
//! its event loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{ broadcast, mpsc, oneshot, watch };
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ AdapterEvent, AdapterMessage, AdapterSet, AdapterSink, BackendAdapter, SkipOutcome };
use crate::config::CoreConfig;
use crate::error::{ AdapterError, PlaybackError };
use crate::projector::{ ArtworkReady, NowPlayingProjector, RemoteCommand };
use crate::queue::{ Advance, QueueState, RepeatMode, Retreat };
use crate::session::{ ArbiterSignal, RouteChangeReason, SessionArbiter, SessionEvent };
use crate::snapshot::PlaybackSnapshot;
use crate::track::{ BackendTag, Track };


/// `previous` restarts the current track instead of retreating past this point.
const RESTART_THRESHOLD_SECS: f64 = 3.0;


/// Coordinator state.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PlaybackState {
    /// Nothing loaded.
    Idle,
    /// An adapter is preparing a track.
    Loading,
    Playing,
    Paused,
    /// An interruption began while loading; the track is held until it ends.
    Interrupted,
}


/// Requests from the UI.
#[derive( Debug, Clone, PartialEq )]
pub enum Intent {
    /// Replace the queue. With `play` the track starts once ready,
    /// otherwise it is prepared and left paused.
    SetQueue { tracks: Vec<Track>, start_index: usize, play: bool },
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
    /// Absolute position in seconds.
    Seek( f64 ),
    JumpTo( usize ),
    SetShuffle( bool ),
    SetRepeat( RepeatMode ),
    /// Make another backend the active source. Empties the queue.
    SwitchSource( BackendTag ),
}


/// Everything that can arrive on the coordinator's inbound channel.
#[derive( Debug )]
pub enum CoordinatorEvent {
    Intent {
        intent: Intent,
        reply: Option<oneshot::Sender<Result<(), PlaybackError>>>,
    },
    Session( SessionEvent ),
    Remote( RemoteCommand ),
}


/// Broadcast to in-process observers.
#[derive( Debug, Clone, PartialEq )]
pub enum Notice {
    StateChanged( PlaybackState ),
    TrackChanged { index: usize, track: Track },
    SourceChanged( BackendTag ),
    QueueChanged { len: usize, shuffle: bool, repeat: RepeatMode },
    RouteChanged( RouteChangeReason ),
    Error( PlaybackError ),
}


/// Cloneable front door to a running coordinator.
#[derive( Debug, Clone )]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorEvent>,
    remote_tx: mpsc::UnboundedSender<RemoteCommand>,
    notices: broadcast::Sender<Notice>,
    snapshots: watch::Receiver<Option<PlaybackSnapshot>>,
    shutdown: CancellationToken,
}


impl CoordinatorHandle {
    /// Sends an intent and waits for it to be applied.
    pub async fn request( &self, intent: Intent ) -> Result<(), PlaybackError> {
        let ( reply, rx ) = oneshot::channel();
        self.tx.send( CoordinatorEvent::Intent { intent, reply: Some( reply ) } ).await
            .map_err( |_| PlaybackError::Closed )?;
        rx.await.map_err( |_| PlaybackError::Closed )?
    }


    /// Sends an intent without waiting; failures arrive as [`Notice::Error`].
    pub async fn send( &self, intent: Intent ) -> Result<(), PlaybackError> {
        self.tx.send( CoordinatorEvent::Intent { intent, reply: None } ).await
            .map_err( |_| PlaybackError::Closed )
    }


    /// Delivers an OS audio session notification.
    pub async fn session_event( &self, event: SessionEvent ) -> Result<(), PlaybackError> {
        self.tx.send( CoordinatorEvent::Session( event ) ).await
            .map_err( |_| PlaybackError::Closed )
    }


    /// Sender for remote transport commands, usable from sync callbacks.
    pub fn remote_commands( &self ) -> mpsc::UnboundedSender<RemoteCommand> {
        self.remote_tx.clone()
    }


    pub fn subscribe( &self ) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }


    pub fn snapshots( &self ) -> watch::Receiver<Option<PlaybackSnapshot>> {
        self.snapshots.clone()
    }


    /// Stops playback and ends the event loop.
    pub fn shutdown( &self ) {
        self.shutdown.cancel();
    }
}


/// The adapter currently selected, with the activation it was given.
struct ActiveAdapter {
    tag: BackendTag,
    adapter: Arc<dyn BackendAdapter>,
    generation: u64,
    token: CancellationToken,
}


/// An in-flight `prepare`.
struct PendingLoad {
    id: u64,
    play: bool,
    task: JoinHandle<()>,
}


/// Completion of a spawned `prepare`.
#[derive( Debug )]
struct LoadResult {
    generation: u64,
    id: u64,
    result: Result<(), AdapterError>,
}


#[derive( Debug, Clone, Copy, Default )]
struct Position {
    elapsed: f64,
    total: f64,
}


/// Playback coordinator. Build one, take a [`CoordinatorHandle`], then
/// drive it with [`run`](Coordinator::run).
pub struct Coordinator {
    config: CoreConfig,
    adapters: AdapterSet,
    arbiter: SessionArbiter,
    projector: NowPlayingProjector,
    queue: QueueState,
    state: PlaybackState,
    source: BackendTag,
    active: Option<ActiveAdapter>,
    generation: u64,
    pending: Option<PendingLoad>,
    load_seq: u64,
    /// True between a successful load and its first `Finished`.
    finished_armed: bool,
    position: Position,
    consecutive_skips: u32,
    resume_after_interruption: bool,

    tx: mpsc::Sender<CoordinatorEvent>,
    rx: mpsc::Receiver<CoordinatorEvent>,
    remote_tx: mpsc::UnboundedSender<RemoteCommand>,
    remote_rx: mpsc::UnboundedReceiver<RemoteCommand>,
    adapter_tx: mpsc::UnboundedSender<AdapterMessage>,
    adapter_rx: mpsc::UnboundedReceiver<AdapterMessage>,
    loaded_tx: mpsc::UnboundedSender<LoadResult>,
    loaded_rx: mpsc::UnboundedReceiver<LoadResult>,
    artwork_rx: mpsc::UnboundedReceiver<ArtworkReady>,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
}


impl std::fmt::Debug for Coordinator {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "Coordinator" )
            .field( "state", &self.state )
            .field( "source", &self.source )
            .field( "queue", &self.queue )
            .field( "arbiter", &self.arbiter )
            .finish()
    }
}


impl Coordinator {
    /// Creates a coordinator with `source` selected and nothing loaded.
    pub fn new(
        config: CoreConfig,
        adapters: AdapterSet,
        arbiter: SessionArbiter,
        mut projector: NowPlayingProjector,
        source: BackendTag,
    ) -> Self {
        let ( tx, rx ) = mpsc::channel( config.event_buffer.max( 1 ) );
        let ( remote_tx, remote_rx ) = mpsc::unbounded_channel();
        let ( adapter_tx, adapter_rx ) = mpsc::unbounded_channel();
        let ( loaded_tx, loaded_rx ) = mpsc::unbounded_channel();
        let ( artwork_tx, artwork_rx ) = mpsc::unbounded_channel();
        let ( notices, _ ) = broadcast::channel( 128 );

        projector.connect( remote_tx.clone(), artwork_tx );

        Self {
            config,
            adapters,
            arbiter,
            projector,
            queue: QueueState::new(),
            state: PlaybackState::Idle,
            source,
            active: None,
            generation: 0,
            pending: None,
            load_seq: 0,
            finished_armed: false,
            position: Position::default(),
            consecutive_skips: 0,
            resume_after_interruption: false,
            tx,
            rx,
            remote_tx,
            remote_rx,
            adapter_tx,
            adapter_rx,
            loaded_tx,
            loaded_rx,
            artwork_rx,
            notices,
            shutdown: CancellationToken::new(),
        }
    }


    pub fn handle( &self ) -> CoordinatorHandle {
        CoordinatorHandle {
            tx: self.tx.clone(),
            remote_tx: self.remote_tx.clone(),
            notices: self.notices.clone(),
            snapshots: self.projector.subscribe(),
            shutdown: self.shutdown.clone(),
        }
    }


    pub fn state( &self ) -> PlaybackState {
        self.state
    }


    pub fn source( &self ) -> BackendTag {
        self.source
    }


    pub fn queue( &self ) -> &QueueState {
        &self.queue
    }


    pub fn session_owner( &self ) -> Option<BackendTag> {
        self.arbiter.owner()
    }


    pub fn snapshot( &self ) -> Option<&PlaybackSnapshot> {
        self.projector.last()
    }


    /// Runs the event loop until [`CoordinatorHandle::shutdown`].
    pub async fn run( mut self ) {
        let period = self.config.refresh_interval();
        let mut refresh = tokio::time::interval( period );
        refresh.set_missed_tick_behavior( MissedTickBehavior::Delay );

        tracing::info!( "Coordinator started on {}", self.source );

        // Adapter reports are drained before load completions so a `Finished`
        // for the previous track is seen while the next load is still unarmed.
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some( message ) = self.adapter_rx.recv() => self.on_adapter_message( message ).await,
                Some( loaded ) = self.loaded_rx.recv() => self.on_loaded( loaded ).await,
                Some( event ) = self.rx.recv() => self.handle_event( event ).await,
                Some( command ) = self.remote_rx.recv() => self.on_remote( command ).await,
                Some( ready ) = self.artwork_rx.recv() => {
                    self.projector.apply_artwork( ready );
                }
                _ = refresh.tick() => self.on_refresh( period ),
            }
        }

        self.go_idle().await;
        self.deactivate_adapter().await;
        tracing::info!( "Coordinator stopped" );
    }


    /// Applies one inbound event.
    pub async fn handle_event( &mut self, event: CoordinatorEvent ) {
        match event {
            CoordinatorEvent::Intent { intent, reply } => {
                let result = self.apply( intent ).await;
                if let Err( e ) = &result {
                    self.notify( Notice::Error( e.clone() ) );
                }
                if let Some( reply ) = reply {
                    let _ = reply.send( result );
                }
            }
            CoordinatorEvent::Session( event ) => self.on_session_event( event ).await,
            CoordinatorEvent::Remote( command ) => self.on_remote( command ).await,
        }
    }


    /// Applies an intent directly.
    pub async fn apply( &mut self, intent: Intent ) -> Result<(), PlaybackError> {
        tracing::debug!( "Intent {:?} in {:?}", intent, self.state );

        match intent {
            Intent::SetQueue { tracks, start_index, play } => self.set_queue( tracks, start_index, play ).await,
            Intent::Play => self.play().await,
            Intent::Pause => {
                self.pause().await;
                Ok(())
            }
            Intent::Toggle => {
                let playing = self.state == PlaybackState::Playing
                    || self.pending.as_ref().is_some_and( |p| p.play );
                if playing {
                    self.pause().await;
                    Ok(())
                } else {
                    self.play().await
                }
            }
            Intent::Stop => {
                self.go_idle().await;
                Ok(())
            }
            Intent::Next => self.next().await,
            Intent::Previous => self.previous().await,
            Intent::Seek( to ) => self.seek( to ).await,
            Intent::JumpTo( index ) => {
                self.queue.jump_to( index )?;
                self.consecutive_skips = 0;
                self.load_current( true ).await
            }
            Intent::SetShuffle( enabled ) => {
                self.queue.set_shuffle( enabled );
                self.after_reorder().await;
                Ok(())
            }
            Intent::SetRepeat( mode ) => {
                self.queue.set_repeat_mode( mode );
                self.notify_queue();
                Ok(())
            }
            Intent::SwitchSource( tag ) => self.switch_source( tag ).await,
        }
    }


    async fn set_queue( &mut self, tracks: Vec<Track>, start_index: usize, play: bool ) -> Result<(), PlaybackError> {
        self.queue.set_queue( tracks, start_index )?;
        self.consecutive_skips = 0;
        tracing::info!( "Queue set: {} tracks, starting at {}", self.queue.len(), start_index );

        if self.queue.is_empty() {
            self.go_idle().await;
            self.notify_queue();
            return Ok(());
        }

        self.ensure_active().await?;
        self.mirror_queue().await;
        self.notify_queue();
        self.load_current( play ).await
    }


    async fn play( &mut self ) -> Result<(), PlaybackError> {
        self.resume_after_interruption = false;

        match self.state {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Loading => {
                if let Some( pending ) = self.pending.as_mut() {
                    pending.play = true;
                }
                Ok(())
            }
            PlaybackState::Interrupted if self.pending.is_some() => {
                if let Some( pending ) = self.pending.as_mut() {
                    pending.play = true;
                }
                self.set_state( PlaybackState::Loading );
                Ok(())
            }
            PlaybackState::Paused | PlaybackState::Interrupted => self.start_playback().await,
            PlaybackState::Idle => {
                if self.queue.is_empty() {
                    return Err( PlaybackError::NoQueue );
                }
                self.load_current( true ).await
            }
        }
    }


    async fn pause( &mut self ) {
        self.resume_after_interruption = false;

        match self.state {
            PlaybackState::Playing => {
                self.pause_adapter().await;
                self.set_state( PlaybackState::Paused );
                self.publish();
            }
            PlaybackState::Loading => {
                if let Some( pending ) = self.pending.as_mut() {
                    pending.play = false;
                }
            }
            PlaybackState::Paused | PlaybackState::Interrupted | PlaybackState::Idle => {}
        }
    }


    async fn next( &mut self ) -> Result<(), PlaybackError> {
        if self.queue.is_empty() {
            return Err( PlaybackError::NoQueue );
        }
        let play = self.wants_play();
        let loaded = self.is_loaded();

        match self.queue.advance() {
            Advance::Next( _ ) => {
                self.consecutive_skips = 0;
                if loaded && self.adapter_skip( true ).await {
                    return self.complete_load( play ).await;
                }
                self.load_current( play ).await
            }
            Advance::Exhausted => {
                tracing::info!( "Skipped past the end of the queue" );
                self.go_idle().await;
                Ok(())
            }
        }
    }


    async fn previous( &mut self ) -> Result<(), PlaybackError> {
        if self.queue.is_empty() {
            return Err( PlaybackError::NoQueue );
        }
        let play = self.wants_play();
        let loaded = self.is_loaded();

        if loaded && self.position.elapsed > RESTART_THRESHOLD_SECS {
            return self.seek( 0.0 ).await;
        }

        match self.queue.retreat() {
            Retreat::Previous( _ ) => {
                self.consecutive_skips = 0;
                if loaded && self.adapter_skip( false ).await {
                    return self.complete_load( play ).await;
                }
                self.load_current( play ).await
            }
            Retreat::AtStart if loaded => self.seek( 0.0 ).await,
            Retreat::AtStart => self.load_current( play ).await,
        }
    }


    async fn seek( &mut self, to: f64 ) -> Result<(), PlaybackError> {
        if !self.is_loaded() {
            return Err( AdapterError::NoTrack.into() );
        }
        let adapter = self.active_adapter().ok_or( AdapterError::NoTrack )?;
        let total = self.total();
        let to = if total > 0.0 { to.clamp( 0.0, total ) } else { to.max( 0.0 ) };

        adapter.seek( to ).await?;
        self.position.elapsed = to;
        self.publish();
        Ok(())
    }


    /// Tears down the current backend and selects `tag`. The session is not
    /// requested until playback is.
    async fn switch_source( &mut self, tag: BackendTag ) -> Result<(), PlaybackError> {
        if !self.adapters.contains( tag ) {
            return Err( AdapterError::Backend( format!( "No adapter registered for {}", tag ) ).into() );
        }
        if tag == self.source && self.active.is_some() {
            return Ok(());
        }

        tracing::info!( "Switching source {} -> {}", self.source, tag );
        let previous = self.source;
        self.cancel_load();
        self.pause_adapter().await;
        self.deactivate_adapter().await;
        self.projector.clear();
        self.queue.clear();
        self.arbiter.release( previous ).await;
        self.position = Position::default();
        self.finished_armed = false;
        self.resume_after_interruption = false;
        self.source = tag;
        self.set_state( PlaybackState::Idle );
        self.notify( Notice::SourceChanged( tag ) );
        self.notify_queue();
        Ok(())
    }


    /// Starts preparing the current track on the active adapter.
    async fn load_current( &mut self, play: bool ) -> Result<(), PlaybackError> {
        let Some( track ) = self.queue.current().cloned() else {
            self.go_idle().await;
            return Err( PlaybackError::NoQueue );
        };
        let adapter = self.ensure_active().await?;

        self.cancel_load();
        self.finished_armed = false;
        self.position = Position { elapsed: 0.0, total: track.duration() };
        if self.state != PlaybackState::Interrupted {
            self.set_state( PlaybackState::Loading );
        }
        if let Some( index ) = self.queue.current_index() {
            self.notify( Notice::TrackChanged { index, track: track.clone() } );
        }
        self.publish();

        self.load_seq += 1;
        let id = self.load_seq;
        let generation = self.generation;
        let tx = self.loaded_tx.clone();
        tracing::info!( "Loading {} ({}) on {}", track.title(), track.id(), self.source );

        let task = tokio::spawn( async move {
            let result = adapter.prepare( &track ).await;
            let _ = tx.send( LoadResult { generation, id, result } );
        });
        self.pending = Some( PendingLoad { id, play, task } );
        Ok(())
    }


    async fn on_loaded( &mut self, loaded: LoadResult ) {
        let current = self.pending.as_ref().is_some_and( |p| p.id == loaded.id );
        if loaded.generation != self.generation || !current {
            tracing::debug!( "Ignoring superseded load {}", loaded.id );
            return;
        }
        let Some( pending ) = self.pending.take() else {
            return;
        };

        let result = match loaded.result {
            Ok(()) => {
                self.consecutive_skips = 0;
                if self.state == PlaybackState::Interrupted {
                    self.finished_armed = true;
                    self.publish();
                    Ok(())
                } else {
                    self.complete_load( pending.play ).await
                }
            }
            Err( e ) => self.skip_unplayable( e, pending.play ).await,
        };

        if let Err( e ) = result {
            self.notify( Notice::Error( e ) );
        }
    }


    /// The adapter has the current track ready.
    async fn complete_load( &mut self, play: bool ) -> Result<(), PlaybackError> {
        self.finished_armed = true;
        if !play {
            self.set_state( PlaybackState::Paused );
            self.publish();
            return Ok(());
        }

        match self.start_playback().await {
            Ok(()) => Ok(()),
            Err( PlaybackError::Adapter( e ) ) => self.skip_unplayable( e, true ).await,
            Err( e ) => {
                self.go_idle().await;
                Err( e )
            }
        }
    }


    /// Requests the session and starts the prepared track.
    async fn start_playback( &mut self ) -> Result<(), PlaybackError> {
        let adapter = self.active_adapter().ok_or( AdapterError::NoTrack )?;
        self.arbiter.request( self.source ).await?;
        adapter.play().await?;
        self.resume_after_interruption = false;
        self.set_state( PlaybackState::Playing );
        self.publish();
        Ok(())
    }


    /// Moves past a track the adapter could not prepare, up to the skip limit.
    async fn skip_unplayable( &mut self, error: AdapterError, play: bool ) -> Result<(), PlaybackError> {
        self.consecutive_skips += 1;
        tracing::warn!( "Skipping unplayable track ({}/{}): {}", self.consecutive_skips, self.config.max_consecutive_skips, error );

        if self.consecutive_skips >= self.config.max_consecutive_skips {
            let skipped = self.consecutive_skips;
            self.consecutive_skips = 0;
            tracing::error!( "Giving up after {} unplayable tracks", skipped );
            self.go_idle().await;
            return Err( PlaybackError::SkipLimitReached { skipped } );
        }

        match self.queue.advance() {
            Advance::Next( _ ) => self.load_current( play ).await,
            Advance::Exhausted => {
                self.consecutive_skips = 0;
                self.go_idle().await;
                Err( error.into() )
            }
        }
    }


    async fn on_adapter_message( &mut self, message: AdapterMessage ) {
        let current = self.active.as_ref()
            .is_some_and( |a| a.tag == message.tag && a.generation == message.generation );
        if !current {
            tracing::debug!( "Ignoring {:?} from superseded {} adapter", message.event, message.tag );
            return;
        }

        match message.event {
            AdapterEvent::Position { elapsed, total, is_playing } => {
                if !matches!( self.state, PlaybackState::Playing | PlaybackState::Paused ) {
                    return;
                }
                self.position.elapsed = elapsed.max( 0.0 );
                if total > 0.0 {
                    self.position.total = total;
                }
                self.publish_with( is_playing );
            }
            AdapterEvent::Finished => {
                if !self.finished_armed {
                    tracing::debug!( "Ignoring repeated finish signal" );
                    return;
                }
                self.finished_armed = false;
                if let Err( e ) = self.on_track_finished().await {
                    self.notify( Notice::Error( e ) );
                }
            }
        }
    }


    async fn on_track_finished( &mut self ) -> Result<(), PlaybackError> {
        match self.queue.repeat_mode() {
            RepeatMode::One => {
                tracing::debug!( "Repeating current track" );
                self.load_current( true ).await
            }
            RepeatMode::All | RepeatMode::Off => match self.queue.advance() {
                Advance::Next( _ ) => self.load_current( true ).await,
                Advance::Exhausted => {
                    tracing::info!( "Queue finished" );
                    self.go_idle().await;
                    Ok(())
                }
            },
        }
    }


    async fn on_session_event( &mut self, event: SessionEvent ) {
        let interrupted = self.state == PlaybackState::Interrupted;

        match self.arbiter.handle_event( event ).await {
            ArbiterSignal::Pause => self.interrupt().await,
            ArbiterSignal::Resume => {
                if let Err( e ) = self.resume_from_interruption().await {
                    self.notify( Notice::Error( e ) );
                }
            }
            // Nothing owned the session yet: the interruption hit the first load
            ArbiterSignal::Ignore if interrupted && event == ( SessionEvent::InterruptionEnded { should_resume: true } ) => {
                if let Err( e ) = self.resume_from_interruption().await {
                    self.notify( Notice::Error( e ) );
                }
            }
            ArbiterSignal::Ignore if interrupted && event == ( SessionEvent::InterruptionEnded { should_resume: false } ) => {
                self.resume_after_interruption = false;
                self.end_hold();
            }
            ArbiterSignal::ResumeFailed( e ) => {
                tracing::warn!( "Could not resume after interruption: {}", e );
                self.resume_after_interruption = false;
                self.end_hold();
                self.notify( Notice::Error( e.into() ) );
            }
            ArbiterSignal::RouteChanged( reason ) => {
                tracing::info!( "Audio route changed: {:?}", reason );
                self.notify( Notice::RouteChanged( reason ) );
            }
            ArbiterSignal::Ignore => {}
        }
    }


    /// Pauses for an interruption. Repeated interruptions are no-ops.
    async fn interrupt( &mut self ) {
        match self.state {
            PlaybackState::Playing => {
                self.pause_adapter().await;
                self.resume_after_interruption = true;
                self.set_state( PlaybackState::Paused );
                self.publish();
            }
            PlaybackState::Loading => {
                if let Some( pending ) = self.pending.as_mut() {
                    self.resume_after_interruption = pending.play;
                    pending.play = false;
                }
                self.set_state( PlaybackState::Interrupted );
            }
            PlaybackState::Paused | PlaybackState::Interrupted | PlaybackState::Idle => {}
        }
    }


    /// The arbiter already holds the session again; restart the adapter if
    /// the interruption is what paused it.
    async fn resume_from_interruption( &mut self ) -> Result<(), PlaybackError> {
        if !std::mem::take( &mut self.resume_after_interruption ) {
            self.end_hold();
            return Ok(());
        }

        match self.state {
            PlaybackState::Interrupted if self.pending.is_some() => {
                if let Some( pending ) = self.pending.as_mut() {
                    pending.play = true;
                }
                self.set_state( PlaybackState::Loading );
                Ok(())
            }
            PlaybackState::Interrupted => self.start_playback().await,
            PlaybackState::Paused => {
                let adapter = self.active_adapter().ok_or( AdapterError::NoTrack )?;
                adapter.play().await?;
                self.set_state( PlaybackState::Playing );
                self.publish();
                Ok(())
            }
            PlaybackState::Idle | PlaybackState::Loading | PlaybackState::Playing => Ok(()),
        }
    }


    /// Leaves `Interrupted` without starting playback. A load still in
    /// flight carries on and ends paused.
    fn end_hold( &mut self ) {
        if self.state != PlaybackState::Interrupted {
            return;
        }
        if self.pending.is_some() {
            self.set_state( PlaybackState::Loading );
        } else {
            self.set_state( PlaybackState::Paused );
            self.publish();
        }
    }


    async fn on_remote( &mut self, command: RemoteCommand ) {
        let intent = match command {
            RemoteCommand::Play => Intent::Play,
            RemoteCommand::Pause => Intent::Pause,
            RemoteCommand::Toggle => Intent::Toggle,
            RemoteCommand::Stop => Intent::Stop,
            RemoteCommand::Next => Intent::Next,
            RemoteCommand::Previous => Intent::Previous,
            RemoteCommand::SeekTo( position ) => Intent::Seek( position ),
        };
        if let Err( e ) = self.apply( intent ).await {
            self.notify( Notice::Error( e ) );
        }
    }


    fn on_refresh( &mut self, period: Duration ) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let delta = period.as_secs_f64();
        let total = self.total();
        self.position.elapsed = if total > 0.0 {
            ( self.position.elapsed + delta ).min( total )
        } else {
            self.position.elapsed + delta
        };
        self.projector.tick( delta );
    }


    /// Stops everything and releases the session. The queue is kept so a
    /// later play starts from the current track.
    async fn go_idle( &mut self ) {
        self.cancel_load();
        self.pause_adapter().await;
        self.arbiter.release( self.source ).await;
        self.projector.clear();
        self.position = Position::default();
        self.finished_armed = false;
        self.resume_after_interruption = false;
        self.set_state( PlaybackState::Idle );
    }


    async fn after_reorder( &mut self ) {
        self.mirror_queue().await;
        self.notify_queue();
        if self.state != PlaybackState::Idle {
            self.publish();
        }
    }


    /// Asks the adapter to skip inside its own queue.
    ///
    /// @returns true if the adapter already loaded the neighbouring track
    async fn adapter_skip( &mut self, forward: bool ) -> bool {
        let Some( adapter ) = self.active_adapter() else {
            return false;
        };
        let outcome = if forward { adapter.skip_next().await } else { adapter.skip_previous().await };

        match outcome {
            Ok( SkipOutcome::NextTrackLoaded ) => {
                self.cancel_load();
                self.position = Position {
                    elapsed: 0.0,
                    total: self.queue.current().map( Track::duration ).unwrap_or_default(),
                };
                if let ( Some( index ), Some( track ) ) = ( self.queue.current_index(), self.queue.current().cloned() ) {
                    self.notify( Notice::TrackChanged { index, track } );
                }
                true
            }
            Ok( SkipOutcome::QueueExhausted | SkipOutcome::Unsupported ) => false,
            Err( e ) => {
                tracing::debug!( "Adapter skip failed, preparing instead: {}", e );
                false
            }
        }
    }


    async fn mirror_queue( &mut self ) {
        let ( Some( adapter ), Some( index ) ) = ( self.active_adapter(), self.queue.current_index() ) else {
            return;
        };
        if let Err( e ) = adapter.set_queue( self.queue.tracks(), index ).await {
            tracing::warn!( "Adapter rejected queue update: {}", e );
        }
    }


    /// Activates the adapter for the current source if it is not already.
    async fn ensure_active( &mut self ) -> Result<Arc<dyn BackendAdapter>, PlaybackError> {
        if let Some( active ) = self.active.as_ref().filter( |a| a.tag == self.source ) {
            return Ok( Arc::clone( &active.adapter ) );
        }
        self.deactivate_adapter().await;

        let adapter = self.adapters.get( self.source ).ok_or_else( || {
            AdapterError::Backend( format!( "No adapter registered for {}", self.source ) )
        })?;

        self.generation += 1;
        let token = CancellationToken::new();
        let sink = AdapterSink::new( self.source, self.generation, self.adapter_tx.clone(), token.clone() );
        adapter.activate( sink ).await?;
        tracing::debug!( "Activated {} adapter (generation {})", self.source, self.generation );

        self.active = Some( ActiveAdapter {
            tag: self.source,
            adapter: Arc::clone( &adapter ),
            generation: self.generation,
            token,
        });
        Ok( adapter )
    }


    async fn deactivate_adapter( &mut self ) {
        if let Some( active ) = self.active.take() {
            active.token.cancel();
            active.adapter.deactivate().await;
            tracing::debug!( "Deactivated {} adapter", active.tag );
        }
        self.generation += 1;
    }


    async fn pause_adapter( &mut self ) {
        if let Some( adapter ) = self.active_adapter() {
            if let Err( e ) = adapter.pause().await {
                tracing::warn!( "Adapter pause failed: {}", e );
            }
        }
    }


    fn cancel_load( &mut self ) {
        if let Some( pending ) = self.pending.take() {
            pending.task.abort();
            tracing::debug!( "Cancelled load {}", pending.id );
        }
    }


    fn active_adapter( &self ) -> Option<Arc<dyn BackendAdapter>> {
        self.active.as_ref().map( |a| Arc::clone( &a.adapter ) )
    }


    /// A track is prepared and can be played, paused or seeked.
    fn is_loaded( &self ) -> bool {
        self.pending.is_none() && self.finished_armed
            && matches!( self.state, PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Interrupted )
    }


    fn wants_play( &self ) -> bool {
        self.state == PlaybackState::Playing || self.pending.as_ref().is_some_and( |p| p.play )
    }


    fn total( &self ) -> f64 {
        if self.position.total > 0.0 {
            self.position.total
        } else {
            self.queue.current().map( Track::duration ).unwrap_or_default()
        }
    }


    fn publish( &mut self ) {
        self.publish_with( true );
    }


    fn publish_with( &mut self, adapter_playing: bool ) {
        let is_playing = adapter_playing && self.state == PlaybackState::Playing;
        let Some( snapshot ) = PlaybackSnapshot::derive( &self.queue, self.position.elapsed, self.total(), is_playing ) else {
            return;
        };
        let artwork = self.queue.current().and_then( |t| t.artwork().cloned() );
        self.projector.publish( snapshot, artwork.as_ref() );
    }


    fn set_state( &mut self, state: PlaybackState ) {
        if self.state != state {
            tracing::info!( "Playback state {:?} -> {:?}", self.state, state );
            self.state = state;
            self.notify( Notice::StateChanged( state ) );
        }
    }


    fn notify_queue( &self ) {
        self.notify( Notice::QueueChanged {
            len: self.queue.len(),
            shuffle: self.queue.shuffle(),
            repeat: self.queue.repeat_mode(),
        });
    }


    fn notify( &self, notice: Notice ) {
        let _ = self.notices.send( notice );
    }


    /// Processes internal events until nothing arrives for a short while.
    #[cfg( test )]
    async fn settle( &mut self ) {
        loop {
            tokio::select! {
                biased;
                Some( message ) = self.adapter_rx.recv() => self.on_adapter_message( message ).await,
                Some( loaded ) = self.loaded_rx.recv() => self.on_loaded( loaded ).await,
                Some( command ) = self.remote_rx.recv() => self.on_remote( command ).await,
                Some( ready ) = self.artwork_rx.recv() => {
                    self.projector.apply_artwork( ready );
                }
                _ = tokio::time::sleep( Duration::from_millis( 25 ) ) => break,
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::atomic::{ AtomicU32, Ordering };
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::SessionError;
    use crate::projector::tests::RecordingSink;
    use crate::projector::PassthroughArtwork;
    use crate::session::AudioSession;


    #[derive( Default )]
    struct FakeAdapter {
        tag: Option<BackendTag>,
        calls: Mutex<Vec<String>>,
        unplayable: Mutex<HashSet<String>>,
        sink: Mutex<Option<AdapterSink>>,
        skip: Mutex<Option<SkipOutcome>>,
    }


    impl FakeAdapter {
        fn new( tag: BackendTag ) -> Arc<Self> {
            Arc::new( Self { tag: Some( tag ), ..Default::default() } )
        }


        fn count( &self, call: &str ) -> usize {
            self.calls.lock().unwrap().iter().filter( |c| c.as_str() == call ).count()
        }


        fn sink( &self ) -> AdapterSink {
            self.sink.lock().unwrap().clone().unwrap()
        }


        fn refuse( &self, id: &str ) {
            self.unplayable.lock().unwrap().insert( id.to_string() );
        }


        fn record( &self, call: impl Into<String> ) {
            self.calls.lock().unwrap().push( call.into() );
        }
    }


    #[async_trait]
    impl BackendAdapter for FakeAdapter {
        fn tag( &self ) -> BackendTag {
            self.tag.unwrap_or_default()
        }


        async fn activate( &self, sink: AdapterSink ) -> Result<(), AdapterError> {
            self.record( "activate" );
            *self.sink.lock().unwrap() = Some( sink );
            Ok(())
        }


        async fn deactivate( &self ) {
            self.record( "deactivate" );
        }


        async fn prepare( &self, track: &Track ) -> Result<(), AdapterError> {
            self.record( format!( "prepare:{}", track.id() ) );
            if self.unplayable.lock().unwrap().contains( track.id() ) {
                return Err( AdapterError::NotPlayable { track_id: track.id().into(), reason: "gone".into() } );
            }
            Ok(())
        }


        async fn play( &self ) -> Result<(), AdapterError> {
            self.record( "play" );
            Ok(())
        }


        async fn pause( &self ) -> Result<(), AdapterError> {
            self.record( "pause" );
            Ok(())
        }


        async fn seek( &self, to: f64 ) -> Result<(), AdapterError> {
            self.record( format!( "seek:{}", to ) );
            Ok(())
        }


        async fn set_queue( &self, tracks: &[Track], index: usize ) -> Result<(), AdapterError> {
            self.record( format!( "set_queue:{}@{}", tracks.len(), index ) );
            Ok(())
        }


        async fn skip_next( &self ) -> Result<SkipOutcome, AdapterError> {
            self.record( "skip_next" );
            let outcome = *self.skip.lock().unwrap();
            Ok( outcome.unwrap_or( SkipOutcome::Unsupported ) )
        }
    }


    #[derive( Default )]
    struct FakeSession {
        failures: AtomicU32,
    }


    #[async_trait]
    impl AudioSession for FakeSession {
        async fn activate_exclusive( &self ) -> Result<(), SessionError> {
            if self.failures.load( Ordering::SeqCst ) > 0 {
                self.failures.fetch_sub( 1, Ordering::SeqCst );
                return Err( SessionError::ActivationFailed( "in use".into() ) );
            }
            Ok(())
        }


        async fn deactivate( &self ) -> Result<(), SessionError> {
            Ok(())
        }
    }


    struct Harness {
        coordinator: Coordinator,
        local: Arc<FakeAdapter>,
        subsonic: Arc<FakeAdapter>,
        session: Arc<FakeSession>,
        sink: RecordingSink,
        notices: broadcast::Receiver<Notice>,
    }


    fn harness() -> Harness {
        let local = FakeAdapter::new( BackendTag::Local );
        let subsonic = FakeAdapter::new( BackendTag::Subsonic );
        let session = Arc::new( FakeSession::default() );
        let sink = RecordingSink::default();
        let config = CoreConfig { session_retry_backoff_ms: 1, ..CoreConfig::default() };

        let adapters = AdapterSet::new()
            .with( local.clone() )
            .with( subsonic.clone() );
        let arbiter = SessionArbiter::new( session.clone(), &config );
        let projector = NowPlayingProjector::new( Box::new( sink.clone() ), Arc::new( PassthroughArtwork ) );
        let coordinator = Coordinator::new( config, adapters, arbiter, projector, BackendTag::Local );
        let notices = coordinator.handle().subscribe();

        Harness { coordinator, local, subsonic, session, sink, notices }
    }


    fn tracks( ids: &[&str] ) -> Vec<Track> {
        ids.iter()
            .map( |id| Track::new( *id, id.to_uppercase(), "Artist", "Album", 120.0, BackendTag::Local ) )
            .collect()
    }


    impl Harness {
        async fn apply( &mut self, intent: Intent ) -> Result<(), PlaybackError> {
            let result = self.coordinator.apply( intent ).await;
            self.coordinator.settle().await;
            result
        }


        async fn start( &mut self, ids: &[&str], start_index: usize ) {
            self.apply( Intent::SetQueue { tracks: tracks( ids ), start_index, play: true } ).await.unwrap();
            assert_eq!( self.coordinator.state(), PlaybackState::Playing );
        }


        async fn finish_track( &mut self ) {
            assert!( self.local.sink().finished() );
            self.coordinator.settle().await;
        }


        async fn session( &mut self, event: SessionEvent ) {
            self.coordinator.handle_event( CoordinatorEvent::Session( event ) ).await;
            self.coordinator.settle().await;
        }


        fn index( &self ) -> Option<usize> {
            self.coordinator.queue().current_index()
        }


        fn errors( &mut self ) -> Vec<PlaybackError> {
            let mut errors = Vec::new();
            while let Ok( notice ) = self.notices.try_recv() {
                if let Notice::Error( e ) = notice {
                    errors.push( e );
                }
            }
            errors
        }
    }


    #[tokio::test]
    async fn test_set_queue_and_play() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 1 ).await;

        assert_eq!( h.index(), Some( 1 ) );
        assert_eq!( h.coordinator.session_owner(), Some( BackendTag::Local ) );
        assert_eq!( h.local.count( "prepare:b" ), 1 );
        assert_eq!( h.local.count( "set_queue:2@1" ), 1 );

        let snapshot = h.coordinator.snapshot().unwrap();
        assert_eq!( snapshot.title, "B" );
        assert!( snapshot.is_playing );
    }


    #[tokio::test]
    async fn test_set_queue_without_play_is_paused() {
        let mut h = harness();
        h.apply( Intent::SetQueue { tracks: tracks( &[ "a" ] ), start_index: 0, play: false } ).await.unwrap();

        assert_eq!( h.coordinator.state(), PlaybackState::Paused );
        assert_eq!( h.coordinator.session_owner(), None );
        assert_eq!( h.local.count( "play" ), 0 );

        h.apply( Intent::Play ).await.unwrap();
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
        assert_eq!( h.coordinator.session_owner(), Some( BackendTag::Local ) );
    }


    #[tokio::test]
    async fn test_invalid_index_leaves_queue() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 0 ).await;

        let result = h.apply( Intent::SetQueue { tracks: tracks( &[ "x" ] ), start_index: 5, play: true } ).await;
        assert!( matches!( result, Err( PlaybackError::Queue( _ ) ) ) );
        assert_eq!( h.coordinator.queue().len(), 2 );
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
    }


    #[tokio::test]
    async fn test_repeat_all_wraps_after_completion() {
        let mut h = harness();
        h.apply( Intent::SetRepeat( RepeatMode::All ) ).await.unwrap();
        h.start( &[ "a", "b", "c" ], 0 ).await;

        h.apply( Intent::Next ).await.unwrap();
        h.apply( Intent::Next ).await.unwrap();
        assert_eq!( h.index(), Some( 2 ) );

        h.finish_track().await;
        assert_eq!( h.index(), Some( 0 ) );
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );

        let snapshot = h.coordinator.snapshot().unwrap();
        assert_eq!( snapshot.track_index, 1 );
        assert_eq!( snapshot.title, "A" );
    }


    #[tokio::test]
    async fn test_repeat_one_never_moves() {
        let mut h = harness();
        h.apply( Intent::SetRepeat( RepeatMode::One ) ).await.unwrap();
        h.start( &[ "a", "b", "c" ], 1 ).await;

        for _ in 0..4 {
            h.finish_track().await;
            assert_eq!( h.index(), Some( 1 ) );
            assert_eq!( h.coordinator.state(), PlaybackState::Playing );
        }
        assert_eq!( h.local.count( "prepare:b" ), 5 );
    }


    #[tokio::test]
    async fn test_repeat_off_last_track_goes_idle() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 1 ).await;

        h.finish_track().await;
        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert_eq!( h.coordinator.session_owner(), None );
        assert!( h.coordinator.snapshot().is_none() );
        assert!( h.sink.info.lock().unwrap().is_none() );
    }


    #[tokio::test]
    async fn test_duplicate_finish_ignored() {
        let mut h = harness();
        h.start( &[ "a", "b", "c" ], 0 ).await;

        let sink = h.local.sink();
        sink.finished();
        sink.finished();
        h.coordinator.settle().await;

        assert_eq!( h.index(), Some( 1 ) );
    }


    #[tokio::test]
    async fn test_interruption_pauses_idempotently() {
        let mut h = harness();
        h.start( &[ "a" ], 0 ).await;

        h.session( SessionEvent::InterruptionBegan ).await;
        h.session( SessionEvent::InterruptionBegan ).await;
        h.session( SessionEvent::SecondaryAudioHint { begin: true } ).await;

        assert_eq!( h.coordinator.state(), PlaybackState::Paused );
        assert_eq!( h.local.count( "pause" ), 1 );
        assert!( !h.coordinator.snapshot().unwrap().is_playing );

        h.session( SessionEvent::InterruptionEnded { should_resume: true } ).await;
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
    }


    #[tokio::test]
    async fn test_interruption_end_without_hint_stays_paused() {
        let mut h = harness();
        h.start( &[ "a" ], 0 ).await;

        h.session( SessionEvent::MediaServicesReset ).await;
        h.session( SessionEvent::InterruptionEnded { should_resume: false } ).await;
        assert_eq!( h.coordinator.state(), PlaybackState::Paused );
    }


    #[tokio::test]
    async fn test_user_pause_during_interruption_wins() {
        let mut h = harness();
        h.start( &[ "a" ], 0 ).await;

        h.session( SessionEvent::InterruptionBegan ).await;
        h.apply( Intent::Pause ).await.unwrap();
        h.session( SessionEvent::InterruptionEnded { should_resume: true } ).await;

        assert_eq!( h.coordinator.state(), PlaybackState::Paused );
    }


    #[tokio::test]
    async fn test_interruption_while_loading_holds_track() {
        let mut h = harness();
        h.coordinator.apply( Intent::SetQueue { tracks: tracks( &[ "a" ] ), start_index: 0, play: true } ).await.unwrap();
        assert_eq!( h.coordinator.state(), PlaybackState::Loading );

        h.coordinator.handle_event( CoordinatorEvent::Session( SessionEvent::InterruptionBegan ) ).await;
        h.coordinator.settle().await;
        assert_eq!( h.coordinator.state(), PlaybackState::Interrupted );
        assert_eq!( h.local.count( "play" ), 0 );

        h.session( SessionEvent::InterruptionEnded { should_resume: true } ).await;
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
    }


    #[tokio::test]
    async fn test_interruption_end_releases_held_paused_load() {
        let mut h = harness();
        h.coordinator.apply( Intent::SetQueue { tracks: tracks( &[ "a" ] ), start_index: 0, play: false } ).await.unwrap();
        h.coordinator.handle_event( CoordinatorEvent::Session( SessionEvent::InterruptionBegan ) ).await;
        h.coordinator.settle().await;
        assert_eq!( h.coordinator.state(), PlaybackState::Interrupted );

        h.session( SessionEvent::InterruptionEnded { should_resume: true } ).await;
        assert_eq!( h.coordinator.state(), PlaybackState::Paused );
        assert_eq!( h.local.count( "play" ), 0 );
        assert!( !h.coordinator.snapshot().unwrap().is_playing );
    }


    #[tokio::test]
    async fn test_interruption_end_mid_load_finishes_paused() {
        let mut h = harness();
        h.coordinator.apply( Intent::SetQueue { tracks: tracks( &[ "a" ] ), start_index: 0, play: true } ).await.unwrap();
        h.coordinator.handle_event( CoordinatorEvent::Session( SessionEvent::InterruptionBegan ) ).await;
        h.coordinator.handle_event(
            CoordinatorEvent::Session( SessionEvent::InterruptionEnded { should_resume: false } )
        ).await;
        assert_eq!( h.coordinator.state(), PlaybackState::Loading );

        h.coordinator.settle().await;
        assert_eq!( h.coordinator.state(), PlaybackState::Paused );
        assert_eq!( h.local.count( "play" ), 0 );
    }


    #[tokio::test]
    async fn test_stale_finish_does_not_skip_next_track() {
        let mut h = harness();
        h.start( &[ "a", "b", "c" ], 0 ).await;
        let sink = h.local.sink();

        h.coordinator.apply( Intent::Next ).await.unwrap();
        // "a" ends on the engine while "b" is being prepared
        sink.finished();
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        h.coordinator.settle().await;

        assert_eq!( h.index(), Some( 1 ) );
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
        assert_eq!( h.local.count( "prepare:c" ), 0 );
    }


    #[tokio::test]
    async fn test_unplayable_tracks_are_skipped() {
        let mut h = harness();
        h.local.refuse( "a" );
        h.local.refuse( "b" );
        h.start( &[ "a", "b", "c" ], 0 ).await;

        assert_eq!( h.index(), Some( 2 ) );
        assert!( h.errors().is_empty() );
    }


    #[tokio::test]
    async fn test_skip_limit_goes_idle() {
        let mut h = harness();
        let ids = [ "a", "b", "c", "d", "e", "f", "g" ];
        for id in ids {
            h.local.refuse( id );
        }

        h.apply( Intent::SetQueue { tracks: tracks( &ids ), start_index: 0, play: true } ).await.unwrap();

        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert_eq!( h.coordinator.session_owner(), None );
        assert_eq!( h.local.count( "prepare:e" ), 1 );
        assert_eq!( h.local.count( "prepare:f" ), 0 );
        assert_eq!( h.errors(), vec![ PlaybackError::SkipLimitReached { skipped: 5 } ] );
    }


    #[tokio::test]
    async fn test_unplayable_last_track_goes_idle() {
        let mut h = harness();
        h.local.refuse( "b" );
        h.start( &[ "a", "b" ], 0 ).await;

        h.finish_track().await;
        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert!( matches!( h.errors().as_slice(), [ PlaybackError::Adapter( AdapterError::NotPlayable { .. } ) ] ) );
    }


    #[tokio::test]
    async fn test_session_unavailable_goes_idle() {
        let mut h = harness();
        h.session.failures.store( 3, Ordering::SeqCst );

        h.apply( Intent::SetQueue { tracks: tracks( &[ "a", "b" ], ), start_index: 1, play: true } ).await.unwrap();

        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert_eq!( h.coordinator.session_owner(), None );
        assert_eq!( h.index(), Some( 1 ) );
        assert!( h.errors().iter().any( PlaybackError::is_session_unavailable ) );
        assert_eq!( h.local.count( "play" ), 0 );
    }


    #[tokio::test]
    async fn test_switch_source_tears_down() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 0 ).await;
        let old_sink = h.local.sink();

        h.apply( Intent::SwitchSource( BackendTag::Subsonic ) ).await.unwrap();

        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert_eq!( h.coordinator.source(), BackendTag::Subsonic );
        assert!( h.coordinator.queue().is_empty() );
        assert_eq!( h.coordinator.session_owner(), None );
        assert!( h.coordinator.snapshot().is_none() );
        assert_eq!( h.local.count( "deactivate" ), 1 );
        assert_eq!( h.subsonic.count( "activate" ), 0 );

        // Reports from the old adapter are discarded
        assert!( !old_sink.finished() );
        assert!( !old_sink.position( 5.0, 120.0, true ) );
    }


    #[tokio::test]
    async fn test_switch_source_while_loading_drops_late_load() {
        let mut h = harness();
        h.coordinator.apply( Intent::SetQueue { tracks: tracks( &[ "a", "b" ] ), start_index: 0, play: true } ).await.unwrap();
        assert_eq!( h.coordinator.state(), PlaybackState::Loading );
        let ( id, generation ) = ( h.coordinator.load_seq, h.coordinator.generation );
        let old_sink = h.local.sink();

        h.coordinator.apply( Intent::SwitchSource( BackendTag::Subsonic ) ).await.unwrap();
        h.coordinator.loaded_tx.send( LoadResult { generation, id, result: Ok(()) } ).unwrap();
        assert!( !old_sink.finished() );
        assert!( !old_sink.position( 1.0, 120.0, true ) );
        h.coordinator.settle().await;

        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert_eq!( h.coordinator.session_owner(), None );
        assert_eq!( h.local.count( "play" ), 0 );
        assert_eq!( h.subsonic.count( "play" ), 0 );
        assert!( h.coordinator.snapshot().is_none() );
    }


    #[tokio::test]
    async fn test_stop_while_loading_drops_late_load() {
        let mut h = harness();
        h.coordinator.apply( Intent::SetQueue { tracks: tracks( &[ "a", "b" ] ), start_index: 0, play: true } ).await.unwrap();
        assert_eq!( h.coordinator.state(), PlaybackState::Loading );
        let ( id, generation ) = ( h.coordinator.load_seq, h.coordinator.generation );

        h.coordinator.apply( Intent::Stop ).await.unwrap();
        h.coordinator.loaded_tx.send( LoadResult { generation, id, result: Ok(()) } ).unwrap();
        h.coordinator.settle().await;

        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert_eq!( h.coordinator.session_owner(), None );
        assert_eq!( h.local.count( "play" ), 0 );
        assert_eq!( h.coordinator.queue().len(), 2 );
    }


    #[tokio::test]
    async fn test_switch_then_play_requests_new_owner() {
        let mut h = harness();
        h.start( &[ "a" ], 0 ).await;
        h.apply( Intent::SwitchSource( BackendTag::Subsonic ) ).await.unwrap();
        h.start( &[ "s1", "s2" ], 0 ).await;

        assert_eq!( h.coordinator.session_owner(), Some( BackendTag::Subsonic ) );
        assert_eq!( h.subsonic.count( "prepare:s1" ), 1 );
        assert_eq!( h.subsonic.count( "activate" ), 1 );
    }


    #[tokio::test]
    async fn test_switch_to_unknown_backend_fails() {
        let mut h = harness();
        let result = h.apply( Intent::SwitchSource( BackendTag::Jellyfin ) ).await;
        assert!( matches!( result, Err( PlaybackError::Adapter( AdapterError::Backend( _ ) ) ) ) );
        assert_eq!( h.coordinator.source(), BackendTag::Local );
    }


    #[tokio::test]
    async fn test_shuffle_round_trip_through_coordinator() {
        let mut h = harness();
        h.start( &[ "a", "b", "c" ], 1 ).await;

        h.apply( Intent::SetShuffle( true ) ).await.unwrap();
        assert_eq!( h.index(), Some( 0 ) );
        assert_eq!( h.coordinator.queue().current().map( Track::id ), Some( "b" ) );
        assert_eq!( h.local.count( "set_queue:3@0" ), 1 );

        h.apply( Intent::SetShuffle( false ) ).await.unwrap();
        let ids: Vec<&str> = h.coordinator.queue().tracks().iter().map( Track::id ).collect();
        assert_eq!( ids, vec![ "a", "b", "c" ] );
        assert_eq!( h.index(), Some( 1 ) );
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
    }


    #[tokio::test]
    async fn test_adapter_skip_avoids_prepare() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 0 ).await;
        *h.local.skip.lock().unwrap() = Some( SkipOutcome::NextTrackLoaded );

        h.apply( Intent::Next ).await.unwrap();

        assert_eq!( h.index(), Some( 1 ) );
        assert_eq!( h.local.count( "prepare:b" ), 0 );
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
    }


    #[tokio::test]
    async fn test_previous_restarts_then_retreats() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 1 ).await;

        h.local.sink().position( 42.0, 120.0, true );
        h.coordinator.settle().await;
        h.apply( Intent::Previous ).await.unwrap();
        assert_eq!( h.index(), Some( 1 ) );
        assert_eq!( h.local.count( "seek:0" ), 1 );

        h.apply( Intent::Previous ).await.unwrap();
        assert_eq!( h.index(), Some( 0 ) );

        h.apply( Intent::Previous ).await.unwrap();
        assert_eq!( h.index(), Some( 0 ) );
        assert_eq!( h.local.count( "seek:0" ), 2 );
    }


    #[tokio::test]
    async fn test_seek_clamps_and_publishes() {
        let mut h = harness();
        h.start( &[ "a" ], 0 ).await;

        h.apply( Intent::Seek( 500.0 ) ).await.unwrap();
        assert_eq!( h.local.count( "seek:120" ), 1 );
        assert_eq!( h.coordinator.snapshot().unwrap().elapsed, 120.0 );
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
    }


    #[tokio::test]
    async fn test_position_reports_update_snapshot() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 1 ).await;

        h.local.sink().position( 30.0, 0.0, true );
        h.coordinator.settle().await;

        let snapshot = h.coordinator.snapshot().unwrap();
        assert_eq!( snapshot.elapsed, 30.0 );
        assert_eq!( snapshot.queue_elapsed, 150.0 );
    }


    #[tokio::test]
    async fn test_remote_commands_forwarded() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 0 ).await;
        let remote = h.coordinator.handle().remote_commands();

        remote.send( RemoteCommand::Pause ).unwrap();
        h.coordinator.settle().await;
        assert_eq!( h.coordinator.state(), PlaybackState::Paused );

        remote.send( RemoteCommand::Toggle ).unwrap();
        remote.send( RemoteCommand::Next ).unwrap();
        h.coordinator.settle().await;
        assert_eq!( h.index(), Some( 1 ) );
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
    }


    #[tokio::test]
    async fn test_stop_releases_and_keeps_queue() {
        let mut h = harness();
        h.start( &[ "a", "b" ], 1 ).await;

        h.apply( Intent::Stop ).await.unwrap();
        assert_eq!( h.coordinator.state(), PlaybackState::Idle );
        assert_eq!( h.coordinator.session_owner(), None );

        h.apply( Intent::Play ).await.unwrap();
        assert_eq!( h.coordinator.state(), PlaybackState::Playing );
        assert_eq!( h.local.count( "prepare:b" ), 2 );
    }


    #[tokio::test]
    async fn test_play_without_queue() {
        let mut h = harness();
        assert_eq!( h.apply( Intent::Play ).await, Err( PlaybackError::NoQueue ) );
    }


    #[tokio::test]
    async fn test_run_loop_through_handle() {
        let h = harness();
        let handle = h.coordinator.handle();
        let mut snapshots = handle.snapshots();
        let task = tokio::spawn( h.coordinator.run() );

        handle.request( Intent::SetQueue { tracks: tracks( &[ "a", "b" ] ), start_index: 0, play: true } ).await.unwrap();
        let snapshot = loop {
            snapshots.changed().await.unwrap();
            let current = snapshots.borrow().clone();
            if let Some( snapshot ) = current.filter( |s| s.is_playing ) {
                break snapshot;
            }
        };
        assert_eq!( snapshot.title, "A" );

        handle.session_event( SessionEvent::InterruptionBegan ).await.unwrap();
        assert_eq!( handle.request( Intent::Seek( 10.0 ) ).await, Ok(()) );

        handle.shutdown();
        task.await.unwrap();
        assert_eq!( h.local.count( "deactivate" ), 1 );
        assert_eq!( handle.request( Intent::Play ).await, Err( PlaybackError::Closed ) );
    }
}

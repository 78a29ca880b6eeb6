//! Simulated playback engines.
//!
//! The shell has no real backends, so every source is served by a
//! [`ClockAdapter`]: it "plays" a track by advancing a clock and reports
//! position and completion through the adapter sink like a real engine
//! would. Track ids starting with `!` are treated as unplayable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use cassette_core::{ AdapterError, AdapterSink, BackendAdapter, BackendTag, Track };


/// How often the clock reports position.
const TICK: Duration = Duration::from_millis( 250 );


#[derive( Debug, Default )]
struct ClockState {
    track: Option<Track>,
    elapsed: f64,
    playing: bool,
    finished: bool,
}


/// Backend adapter driven by a timer instead of an audio device.
pub struct ClockAdapter {
    tag: BackendTag,
    speed: f64,
    load_delay: Duration,
    state: Arc<Mutex<ClockState>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}


impl ClockAdapter {
    /// Creates an engine for `tag` running at `speed` times real time.
    ///
    /// Remote sources take a little longer to prepare than local files.
    pub fn new( tag: BackendTag, speed: f64 ) -> Self {
        let load_delay = match tag {
            BackendTag::Local => Duration::from_millis( 20 ),
            _ => Duration::from_millis( 200 ),
        };

        Self {
            tag,
            speed: if speed.is_finite() && speed > 0.0 { speed } else { 1.0 },
            load_delay,
            state: Arc::new( Mutex::new( ClockState::default() ) ),
            ticker: Mutex::new( None ),
        }
    }


    async fn stop_ticker( &self ) {
        if let Some( task ) = self.ticker.lock().await.take() {
            task.abort();
        }
    }
}


#[async_trait]
impl BackendAdapter for ClockAdapter {
    fn tag( &self ) -> BackendTag {
        self.tag
    }


    async fn activate( &self, sink: AdapterSink ) -> Result<(), AdapterError> {
        self.stop_ticker().await;
        tracing::debug!( "{} engine activated", self.tag );

        let task = tokio::spawn( run_clock( Arc::clone( &self.state ), sink, self.speed ) );
        *self.ticker.lock().await = Some( task );
        Ok(())
    }


    async fn deactivate( &self ) {
        self.stop_ticker().await;
        let mut clock = self.state.lock().await;
        clock.playing = false;
        clock.track = None;
        tracing::debug!( "{} engine deactivated", self.tag );
    }


    async fn prepare( &self, track: &Track ) -> Result<(), AdapterError> {
        {
            let mut clock = self.state.lock().await;
            clock.playing = false;
        }

        tokio::time::sleep( self.load_delay ).await;

        if track.id().starts_with( '!' ) {
            return Err( AdapterError::NotPlayable {
                track_id: track.id().to_string(),
                reason: "not available on this source".to_string(),
            });
        }

        let mut clock = self.state.lock().await;
        clock.track = Some( track.clone() );
        clock.elapsed = 0.0;
        clock.finished = false;
        tracing::debug!( "{} engine prepared {}", self.tag, track.id() );
        Ok(())
    }


    async fn play( &self ) -> Result<(), AdapterError> {
        let mut clock = self.state.lock().await;
        if clock.track.is_none() {
            return Err( AdapterError::NoTrack );
        }
        if clock.finished {
            clock.elapsed = 0.0;
            clock.finished = false;
        }
        clock.playing = true;
        Ok(())
    }


    async fn pause( &self ) -> Result<(), AdapterError> {
        self.state.lock().await.playing = false;
        Ok(())
    }


    async fn seek( &self, to: f64 ) -> Result<(), AdapterError> {
        let mut clock = self.state.lock().await;
        let Some( track ) = &clock.track else {
            return Err( AdapterError::NoTrack );
        };
        let duration = track.duration();
        clock.elapsed = if duration > 0.0 { to.clamp( 0.0, duration ) } else { to.max( 0.0 ) };
        clock.finished = false;
        Ok(())
    }
}


/// Advances the clock and reports through `sink` until it is closed.
async fn run_clock( state: Arc<Mutex<ClockState>>, sink: AdapterSink, speed: f64 ) {
    let mut interval = tokio::time::interval( TICK );
    interval.set_missed_tick_behavior( MissedTickBehavior::Delay );
    let step = TICK.as_secs_f64() * speed;

    loop {
        tokio::select! {
            _ = sink.closed() => break,
            _ = interval.tick() => {}
        }

        let mut clock = state.lock().await;
        if !clock.playing {
            continue;
        }
        let Some( total ) = clock.track.as_ref().map( Track::duration ) else {
            continue;
        };

        clock.elapsed += step;
        if total > 0.0 && clock.elapsed >= total {
            clock.elapsed = total;
            clock.playing = false;
            clock.finished = true;
            sink.position( total, total, false );
            sink.finished();
        } else if !sink.position( clock.elapsed, total, true ) {
            break;
        }
    }

    tracing::debug!( "{} clock stopped", sink.tag() );
}


#[cfg( test )]
mod tests {
    use super::*;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use cassette_core::{ AdapterEvent, AdapterMessage };


    fn sink( tag: BackendTag ) -> ( AdapterSink, mpsc::UnboundedReceiver<AdapterMessage>, CancellationToken ) {
        let ( tx, rx ) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        ( AdapterSink::new( tag, 1, tx, token.clone() ), rx, token )
    }


    #[tokio::test( start_paused = true )]
    async fn test_plays_to_the_end_once() {
        let engine = ClockAdapter::new( BackendTag::Local, 1.0 );
        let ( sink, mut rx, _token ) = sink( BackendTag::Local );
        engine.activate( sink ).await.unwrap();

        engine.prepare( &Track::new( "a", "A", "X", "R", 1.0, BackendTag::Local ) ).await.unwrap();
        engine.play().await.unwrap();
        tokio::time::sleep( Duration::from_secs( 3 ) ).await;

        let mut finished = 0;
        let mut last_elapsed = 0.0;
        while let Ok( message ) = rx.try_recv() {
            match message.event {
                AdapterEvent::Position { elapsed, .. } => last_elapsed = elapsed,
                AdapterEvent::Finished => finished += 1,
            }
        }
        assert_eq!( finished, 1 );
        assert_eq!( last_elapsed, 1.0 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_unplayable_track() {
        let engine = ClockAdapter::new( BackendTag::Subsonic, 1.0 );
        let result = engine.prepare( &Track::new( "!gone", "Gone", "X", "R", 10.0, BackendTag::Subsonic ) ).await;
        assert!( matches!( result, Err( AdapterError::NotPlayable { .. } ) ) );
        assert_eq!( engine.play().await, Err( AdapterError::NoTrack ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_seek_clamps_to_length() {
        let engine = ClockAdapter::new( BackendTag::Local, 1.0 );
        engine.prepare( &Track::new( "a", "A", "X", "R", 30.0, BackendTag::Local ) ).await.unwrap();
        engine.seek( 99.0 ).await.unwrap();
        assert_eq!( engine.state.lock().await.elapsed, 30.0 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_silent_after_deactivate() {
        let engine = ClockAdapter::new( BackendTag::Local, 1.0 );
        let ( sink, mut rx, token ) = sink( BackendTag::Local );
        engine.activate( sink ).await.unwrap();
        engine.prepare( &Track::new( "a", "A", "X", "R", 60.0, BackendTag::Local ) ).await.unwrap();
        engine.play().await.unwrap();

        token.cancel();
        engine.deactivate().await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep( Duration::from_secs( 2 ) ).await;
        assert!( rx.try_recv().is_err() );
    }
}

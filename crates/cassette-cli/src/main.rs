//! Cassette CLI - Headless multi-source music player shell

mod artwork;
mod cli;
mod command;
mod engine;
mod media_controls;
mod queue_file;
mod session;
mod settings;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use cassette_core::{
    AdapterSet, BackendTag, Coordinator, CoordinatorHandle, Intent, Notice, NowPlayingProjector,
    PlaybackSnapshot, PlaybackState, RepeatMode, RouteChangeReason, SessionArbiter, SessionEvent,
};

use artwork::FileArtworkCache;
use cli::Args;
use command::{ format_time, help_text, Command };
use engine::ClockAdapter;
use session::DesktopSession;
use settings::Settings;


/// What the shell remembers between commands.
struct Shell {
    handle: CoordinatorHandle,
    session: Arc<DesktopSession>,
    settings: Settings,
    source: BackendTag,
    shuffle: bool,
    repeat: RepeatMode,
    state: PlaybackState,
}


impl Shell {
    /// Replaces the queue from a file, switching to the source its tracks name.
    async fn load_queue( &mut self, path: &Path, start: usize, play: bool ) -> Result<()> {
        let tracks = queue_file::load( path ).await?;

        if let Some( preferred ) = queue_file::preferred_source( &tracks ) {
            if preferred != self.source {
                self.switch_source( preferred ).await?;
            }
        }

        let tracks = queue_file::for_source( tracks, self.source );
        let start_index = start.saturating_sub( 1 ).min( tracks.len().saturating_sub( 1 ) );
        let count = tracks.len();

        self.handle.request( Intent::SetQueue { tracks, start_index, play } ).await?;
        println!( "Loaded {} tracks from {}", count, path.display() );
        Ok(())
    }


    async fn switch_source( &mut self, tag: BackendTag ) -> Result<()> {
        self.handle.request( Intent::SwitchSource( tag ) ).await?;
        self.source = tag;
        self.settings.last_source = tag;
        self.settings.save();
        Ok(())
    }


    /// Runs one command.
    ///
    /// @returns false when the shell should exit
    async fn execute( &mut self, cmd: Command ) -> Result<bool> {
        match cmd {
            Command::Load { path } => self.load_queue( &path, 1, false ).await?,
            Command::Goto { position } => self.handle.request( Intent::JumpTo( position - 1 ) ).await?,
            Command::Shuffle { enabled } => {
                let enabled = enabled.unwrap_or( !self.shuffle );
                self.handle.request( Intent::SetShuffle( enabled ) ).await?;
            }
            Command::Repeat { mode } => {
                let mode = mode.unwrap_or_else( || self.repeat.cycle() );
                self.handle.request( Intent::SetRepeat( mode ) ).await?;
            }
            Command::Source { tag } => self.switch_source( tag ).await?,

            Command::Play => self.handle.request( Intent::Play ).await?,
            Command::Pause => self.handle.request( Intent::Pause ).await?,
            Command::Toggle => self.handle.request( Intent::Toggle ).await?,
            Command::Stop => self.handle.request( Intent::Stop ).await?,
            Command::Next => self.handle.request( Intent::Next ).await?,
            Command::Prev => self.handle.request( Intent::Previous ).await?,
            Command::Seek { position } => self.handle.request( Intent::Seek( position.as_secs_f64() ) ).await?,

            Command::Interrupt => self.handle.session_event( SessionEvent::InterruptionBegan ).await?,
            Command::Resume => {
                self.handle.session_event( SessionEvent::InterruptionEnded { should_resume: true } ).await?
            }
            Command::Unplug => {
                self.handle.session_event( SessionEvent::RouteChanged( RouteChangeReason::DeviceRemoved ) ).await?
            }

            Command::Status => self.print_status(),
            Command::Help => println!( "{}", help_text() ),
            Command::Quit => return Ok( false ),
        }
        Ok( true )
    }


    fn print_status( &self ) {
        let snapshot = self.handle.snapshots().borrow().clone();
        println!(
            "[{}] {:?}  shuffle {}  repeat {:?}  audio {}",
            self.source,
            self.state,
            if self.shuffle { "on" } else { "off" },
            self.repeat,
            if self.session.is_active() { "active" } else { "released" },
        );
        match snapshot {
            Some( snapshot ) => println!( "{}", describe( &snapshot ) ),
            None => println!( "Nothing loaded" ),
        }
    }


    /// Keeps local state in step with the coordinator and reports changes.
    fn on_notice( &mut self, notice: Notice ) {
        match notice {
            Notice::StateChanged( state ) => {
                self.state = state;
                tracing::debug!( "State: {:?}", state );
            }
            Notice::TrackChanged { index, track } => {
                println!( "> {}. {} - {} ({})", index + 1, track.artist(), track.title(), format_time( track.duration() ) );
            }
            Notice::SourceChanged( tag ) => {
                self.source = tag;
                println!( "Source: {}", tag );
            }
            Notice::QueueChanged { shuffle, repeat, .. } => {
                self.shuffle = shuffle;
                self.repeat = repeat;
            }
            Notice::RouteChanged( reason ) => println!( "Audio route changed: {:?}", reason ),
            Notice::Error( e ) => println!( "Error: {}", e ),
        }
    }
}


/// One-line summary of a snapshot.
fn describe( snapshot: &PlaybackSnapshot ) -> String {
    format!(
        "{}/{}  {} - {}  {} / {}  (queue {} / {}){}",
        snapshot.track_index,
        snapshot.track_count,
        snapshot.artist,
        snapshot.title,
        format_time( snapshot.elapsed ),
        format_time( snapshot.total ),
        format_time( snapshot.queue_elapsed ),
        format_time( snapshot.queue_total ),
        if snapshot.is_playing { "" } else { "  [paused]" },
    )
}


fn init_tracing( verbose: u8 ) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else( |_| EnvFilter::new( format!( "cassette_core={0},cassette={0}", default_level ) ) );

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( std::io::stderr )
        .init();
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing( args.verbose );

    let settings = Settings::load();
    let source = args.source.unwrap_or( settings.last_source );

    let adapters = BackendTag::ALL
        .iter()
        .fold( AdapterSet::new(), |set, tag| set.with( Arc::new( ClockAdapter::new( *tag, args.speed ) ) ) );
    let session = Arc::new( DesktopSession::default() );
    let arbiter = SessionArbiter::new( session.clone(), &settings.core );
    let projector = NowPlayingProjector::new(
        media_controls::create_sink( settings.smtc_enabled ),
        Arc::new( FileArtworkCache::new() ),
    );

    let coordinator = Coordinator::new( settings.core.clone(), adapters, arbiter, projector, source );
    let handle = coordinator.handle();
    let mut notices = handle.subscribe();
    let runner = tokio::spawn( coordinator.run() );

    let mut shell = Shell {
        handle: handle.clone(),
        session,
        settings,
        source,
        shuffle: false,
        repeat: RepeatMode::Off,
        state: PlaybackState::Idle,
    };

    if let Some( path ) = &args.queue {
        if let Err( e ) = shell.load_queue( path, args.start, args.autoplay ).await {
            eprintln!( "{:#}", e );
        }
    }

    println!( "cassette on {} - type 'help' for commands", shell.source );

    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some( line ) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Command::parse( line ) {
                    Ok( cmd ) => match shell.execute( cmd ).await {
                        Ok( true ) => {}
                        Ok( false ) => break,
                        Err( e ) => eprintln!( "{:#}", e ),
                    },
                    Err( e ) => eprintln!( "{}", e ),
                }
            }
            notice = notices.recv() => match notice {
                Ok( notice ) => shell.on_notice( notice ),
                Err( broadcast::error::RecvError::Lagged( n ) ) => {
                    tracing::debug!( "Skipped {} notices", n );
                }
                Err( broadcast::error::RecvError::Closed ) => break,
            },
        }
    }

    shell.settings.last_source = shell.source;
    shell.settings.save();

    handle.shutdown();
    runner.await?;
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_describe_snapshot() {
        let snapshot = PlaybackSnapshot {
            track_id: "b".into(),
            title: "B".into(),
            artist: "X".into(),
            album: "R".into(),
            elapsed: 30.0,
            total: 90.0,
            is_playing: false,
            track_index: 2,
            track_count: 3,
            queue_elapsed: 90.0,
            queue_total: 240.0,
        };
        assert_eq!( describe( &snapshot ), "2/3  X - B  0:30 / 1:30  (queue 1:30 / 4:00)  [paused]" );
    }
}

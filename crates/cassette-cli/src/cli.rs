//! Command-line argument parsing for Cassette.

use std::path::PathBuf;

use clap::Parser;

use cassette_core::BackendTag;


/// Cassette - A multi-source music player shell.
#[derive( Parser, Debug )]
#[command( name = "cassette" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// JSON file with the queue to load on startup.
    #[arg( short, long )]
    pub queue: Option<PathBuf>,

    /// Source to activate (catalog, subsonic, jellyfin, local).
    /// Defaults to the last source used.
    #[arg( short, long )]
    pub source: Option<BackendTag>,

    /// Queue position to start at (1-based).
    #[arg( long, default_value_t = 1 )]
    pub start: usize,

    /// Start playing as soon as the queue is loaded.
    #[arg( short, long )]
    pub autoplay: bool,

    /// Playback speed of the simulated engines.
    #[arg( long, default_value_t = 1.0 )]
    pub speed: f64,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg( short, long, action = clap::ArgAction::Count )]
    pub verbose: u8,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([ "cassette", "--queue", "q.json", "-s", "navidrome", "--start", "2", "-a", "-vv" ]);
        assert_eq!( args.queue, Some( PathBuf::from( "q.json" ) ) );
        assert_eq!( args.source, Some( BackendTag::Subsonic ) );
        assert_eq!( args.start, 2 );
        assert!( args.autoplay );
        assert_eq!( args.verbose, 2 );
    }


    #[test]
    fn test_defaults() {
        let args = Args::parse_from([ "cassette" ]);
        assert!( args.queue.is_none() );
        assert!( args.source.is_none() );
        assert_eq!( args.start, 1 );
        assert_eq!( args.speed, 1.0 );
    }
}

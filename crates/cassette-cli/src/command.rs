//! Line command parsing.
//!
//! The shell reads one command per line from stdin. Commands are parsed here
//! and dispatched against the coordinator by `main`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use cassette_core::{ BackendTag, RepeatMode };


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed shell command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Queue commands
    Load { path: PathBuf },
    Goto { position: usize },
    Shuffle { enabled: Option<bool> },
    Repeat { mode: Option<RepeatMode> },
    Source { tag: BackendTag },

    // Playback commands
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Prev,
    Seek { position: Duration },

    // Session simulation
    Interrupt,
    Resume,
    Unplug,

    Status,
    Help,
    Quit,
}


impl Command {
    /// Parses one input line.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim().trim_start_matches( '/' );
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "load" | "l" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "queue file".into() ) )?;
                Ok( Command::Load { path: PathBuf::from( path ) } )
            }
            "goto" | "go" | "g" => {
                let raw = args
                    .ok_or_else( || CommandError::MissingArgument( "track number".into() ) )?;
                let position: usize = raw.parse()
                    .map_err( |_| CommandError::InvalidArgument( format!( "Invalid track number: {}", raw ) ) )?;
                if position == 0 {
                    return Err( CommandError::InvalidArgument( "Track numbers start at 1".into() ) );
                }
                Ok( Command::Goto { position } )
            }
            "shuffle" | "sh" => {
                let enabled = args.map( parse_switch ).transpose()?;
                Ok( Command::Shuffle { enabled } )
            }
            "repeat" | "rep" => {
                let mode = args
                    .map( |s| s.parse().map_err( CommandError::InvalidArgument ) )
                    .transpose()?;
                Ok( Command::Repeat { mode } )
            }
            "source" | "src" => {
                let tag = args
                    .ok_or_else( || CommandError::MissingArgument( "source name".into() ) )?
                    .parse()
                    .map_err( CommandError::InvalidArgument )?;
                Ok( Command::Source { tag } )
            }

            "play" | "p" => Ok( Command::Play ),
            "pause" | "pa" => Ok( Command::Pause ),
            "toggle" | "t" => Ok( Command::Toggle ),
            "stop" | "st" => Ok( Command::Stop ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                let position = parse_time( time_str )?;
                Ok( Command::Seek { position } )
            }

            "interrupt" | "int" => Ok( Command::Interrupt ),
            "resume" | "res" => Ok( Command::Resume ),
            "unplug" => Ok( Command::Unplug ),

            "status" | "s" => Ok( Command::Status ),
            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


/// Parses "on"/"off" style switches.
fn parse_switch( s: &str ) -> Result<bool, CommandError> {
    match s.to_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Ok( true ),
        "off" | "0" | "false" | "no" => Ok( false ),
        _ => Err( CommandError::InvalidArgument( format!( "Expected on or off, got '{}'", s ) ) ),
    }
}


/// Parses a time string like "1:30" or "90" into a Duration.
///
/// @param s - Time string in format "MM:SS", "M:SS", or just seconds
///
/// @returns Duration or error
fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();
    let out_of_range = || CommandError::InvalidArgument( format!( "Time out of range: {}", s ) );

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: u64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        let total = minutes.checked_mul( 60 )
            .and_then( |m| m.checked_add( seconds ) )
            .ok_or_else( out_of_range )?;
        Ok( Duration::from_secs( total ) )
    } else {
        let seconds: f64 = s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        if seconds < 0.0 {
            return Err( CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) );
        }
        Duration::try_from_secs_f64( seconds ).map_err( |_| out_of_range() )
    }
}


/// Formats seconds as "M:SS".
pub fn format_time( seconds: f64 ) -> String {
    let total = seconds.max( 0.0 ) as u64;
    format!( "{}:{:02}", total / 60, total % 60 )
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Queue Commands:
  load <file>       Replace the queue from a JSON file
  goto <n>          Jump to track n
  shuffle [on|off]  Toggle or set shuffle
  repeat [mode]     Cycle or set repeat (off/one/all)
  source <name>     Switch source (catalog/subsonic/jellyfin/local)

Playback Commands:
  play              Play or resume
  pause             Pause playback
  toggle            Play/pause
  stop              Stop playback
  next              Next track
  prev              Previous track (restarts after 3s)
  seek <time>       Seek to position (e.g., 1:30)

Session Commands:
  interrupt         Simulate an incoming call
  resume            End the interruption
  unplug            Simulate headphones being removed

Other Commands:
  status            Show what is playing
  help              Show this help
  quit              Exit cassette"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_load() {
        let cmd = Command::parse( "load /tmp/queue.json" ).unwrap();
        assert_eq!( cmd, Command::Load { path: PathBuf::from( "/tmp/queue.json" ) } );
    }


    #[test]
    fn test_parse_leading_slash() {
        assert_eq!( Command::parse( "/next" ).unwrap(), Command::Next );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 90 ) } );
    }


    #[test]
    fn test_parse_seek_seconds() {
        let cmd = Command::parse( "seek 45.5" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_millis( 45_500 ) } );
        assert!( matches!( Command::parse( "seek -3" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_seek_out_of_range() {
        assert!( matches!( Command::parse( "seek 1e30" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "seek inf" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "seek NaN" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!(
            Command::parse( "seek 18446744073709551615:00" ),
            Err( CommandError::InvalidArgument( _ ) )
        ));
    }


    #[test]
    fn test_parse_repeat_with_mode() {
        let cmd = Command::parse( "repeat all" ).unwrap();
        assert_eq!( cmd, Command::Repeat { mode: Some( RepeatMode::All ) } );
        assert_eq!( Command::parse( "repeat" ).unwrap(), Command::Repeat { mode: None } );
    }


    #[test]
    fn test_parse_shuffle_switch() {
        assert_eq!( Command::parse( "shuffle on" ).unwrap(), Command::Shuffle { enabled: Some( true ) } );
        assert_eq!( Command::parse( "sh" ).unwrap(), Command::Shuffle { enabled: None } );
        assert!( Command::parse( "shuffle maybe" ).is_err() );
    }


    #[test]
    fn test_parse_source() {
        assert_eq!( Command::parse( "source jellyfin" ).unwrap(), Command::Source { tag: BackendTag::Jellyfin } );
        assert!( matches!( Command::parse( "source tape" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_goto_is_one_based() {
        assert_eq!( Command::parse( "goto 3" ).unwrap(), Command::Goto { position: 3 } );
        assert!( Command::parse( "goto 0" ).is_err() );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "load" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( 0.0 ), "0:00" );
        assert_eq!( format_time( 95.7 ), "1:35" );
        assert_eq!( format_time( -4.0 ), "0:00" );
    }
}

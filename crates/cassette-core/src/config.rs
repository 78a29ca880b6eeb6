//! Tunables for the playback core.

use std::time::Duration;

use serde::{ Deserialize, Serialize };


/// Playback core configuration.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct CoreConfig {
    /// Audio session activation attempts before reporting `SessionUnavailable`.
    pub session_retry_attempts: u32,

    /// Base backoff between activation attempts; attempt n waits n times this.
    pub session_retry_backoff_ms: u64,

    /// Consecutive unplayable tracks skipped before giving up.
    pub max_consecutive_skips: u32,

    /// How often elapsed time is republished while playing.
    pub refresh_interval_ms: u64,

    /// Capacity of the coordinator's inbound event channel.
    pub event_buffer: usize,
}


impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            session_retry_attempts: 3,
            session_retry_backoff_ms: 150,
            max_consecutive_skips: 5,
            refresh_interval_ms: 1000,
            event_buffer: 64,
        }
    }
}


impl CoreConfig {
    /// Delay before the given retry (1-based).
    pub fn retry_backoff( &self, attempt: u32 ) -> Duration {
        Duration::from_millis( self.session_retry_backoff_ms.saturating_mul( attempt as u64 ) )
    }


    pub fn refresh_interval( &self ) -> Duration {
        Duration::from_millis( self.refresh_interval_ms.max( 1 ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CoreConfig = serde_json::from_str( r#"{ "max_consecutive_skips": 2 }"# ).unwrap();
        assert_eq!( config.max_consecutive_skips, 2 );
        assert_eq!( config.session_retry_attempts, 3 );
        assert_eq!( config.refresh_interval(), Duration::from_secs( 1 ) );
    }


    #[test]
    fn test_linear_backoff() {
        let config = CoreConfig::default();
        assert_eq!( config.retry_backoff( 1 ), Duration::from_millis( 150 ) );
        assert_eq!( config.retry_backoff( 3 ), Duration::from_millis( 450 ) );
    }
}

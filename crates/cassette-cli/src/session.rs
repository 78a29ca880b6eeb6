//! Desktop audio session.
//!
//! Desktop platforms have no exclusive-session API comparable to a phone's,
//! so activation only records the state. Interruptions and route changes are
//! simulated from the command line.

use std::sync::atomic::{ AtomicBool, Ordering };

use async_trait::async_trait;

use cassette_core::{ AudioSession, SessionError };


/// Session that always grants activation.
#[derive( Debug, Default )]
pub struct DesktopSession {
    active: AtomicBool,
}


impl DesktopSession {
    /// True while some source holds the session.
    pub fn is_active( &self ) -> bool {
        self.active.load( Ordering::SeqCst )
    }
}


#[async_trait]
impl AudioSession for DesktopSession {
    async fn activate_exclusive( &self ) -> Result<(), SessionError> {
        if !self.active.swap( true, Ordering::SeqCst ) {
            tracing::debug!( "Desktop audio session activated" );
        }
        Ok(())
    }


    async fn deactivate( &self ) -> Result<(), SessionError> {
        if self.active.swap( false, Ordering::SeqCst ) {
            tracing::debug!( "Desktop audio session deactivated" );
        }
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let session = DesktopSession::default();
        session.activate_exclusive().await.unwrap();
        session.activate_exclusive().await.unwrap();
        assert!( session.is_active() );

        session.deactivate().await.unwrap();
        assert!( !session.is_active() );
    }
}

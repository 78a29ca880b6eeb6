//! Exclusive audio session arbitration
//!
//! The device's audio output is a single exclusive resource. The
//! [`SessionArbiter`] is the only component that activates or deactivates it,
//! and it records which backend currently owns it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CoreConfig;
use crate::error::SessionError;
use crate::track::BackendTag;


/// OS audio session, as consumed by the arbiter.
#[async_trait]
pub trait AudioSession: Send + Sync {
    /// Switches the route to exclusive, non-mixing playback and activates it.
    ///
    /// Activating is what interrupts other applications, so this is called
    /// on every request even when the caller already owns the session.
    async fn activate_exclusive( &self ) -> Result<(), SessionError>;

    /// Deactivates the session, letting other applications resume.
    async fn deactivate( &self ) -> Result<(), SessionError>;
}


/// Why the output route changed.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum RouteChangeReason {
    /// Headphones unplugged, Bluetooth device lost, ...
    DeviceRemoved,
    DeviceAdded,
    Other,
}


/// Notifications pushed by the OS about the audio session.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SessionEvent {
    /// A call or another app took audio focus.
    InterruptionBegan,
    /// The interruption ended; `should_resume` is the OS resume hint.
    InterruptionEnded { should_resume: bool },
    RouteChanged( RouteChangeReason ),
    /// Another app started (`true`) or stopped (`false`) primary audio.
    SecondaryAudioHint { begin: bool },
    /// The OS audio subsystem restarted.
    MediaServicesReset,
}


/// What the coordinator should do in response to a session event.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum ArbiterSignal {
    /// Pause the active adapter now.
    Pause,
    /// The session was re-acquired for the owner; resume playback.
    Resume,
    /// The resume hint arrived but the session could not be re-acquired.
    ResumeFailed( SessionError ),
    /// Informational only; playback is left as-is.
    RouteChanged( RouteChangeReason ),
    Ignore,
}


/// Grants exclusive audio output to one backend at a time.
pub struct SessionArbiter {
    session: Arc<dyn AudioSession>,
    owner: Option<BackendTag>,
    attempts: u32,
    config: CoreConfig,
}


impl std::fmt::Debug for SessionArbiter {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "SessionArbiter" )
            .field( "owner", &self.owner )
            .field( "attempts", &self.attempts )
            .finish()
    }
}


impl SessionArbiter {
    /// Creates an arbiter with no owner.
    pub fn new( session: Arc<dyn AudioSession>, config: &CoreConfig ) -> Self {
        Self {
            session,
            owner: None,
            attempts: config.session_retry_attempts.max( 1 ),
            config: config.clone(),
        }
    }


    /// The backend currently holding the session, if any.
    pub fn owner( &self ) -> Option<BackendTag> {
        self.owner
    }


    /// Takes exclusive ownership on behalf of `tag`.
    ///
    /// Retries transient activation failures with a linear backoff. If every
    /// attempt fails the previous owner is kept and `Unavailable` is returned.
    pub async fn request( &mut self, tag: BackendTag ) -> Result<(), SessionError> {
        for attempt in 1..=self.attempts {
            match self.session.activate_exclusive().await {
                Ok(()) => {
                    if self.owner != Some( tag ) {
                        tracing::info!( "Audio session granted to {} (was {:?})", tag, self.owner );
                    }
                    self.owner = Some( tag );
                    return Ok(());
                }
                Err( e ) => {
                    tracing::warn!( "Audio session activation for {} failed (attempt {}/{}): {}", tag, attempt, self.attempts, e );
                    if attempt < self.attempts {
                        tokio::time::sleep( self.config.retry_backoff( attempt ) ).await;
                    }
                }
            }
        }

        tracing::error!( "Audio session unavailable for {}, owner stays {:?}", tag, self.owner );
        Err( SessionError::Unavailable { tag, attempts: self.attempts } )
    }


    /// Gives up ownership. A no-op unless `tag` is the current owner.
    ///
    /// @returns true if the session was released
    pub async fn release( &mut self, tag: BackendTag ) -> bool {
        if self.owner != Some( tag ) {
            tracing::debug!( "Ignoring session release from {} (owner is {:?})", tag, self.owner );
            return false;
        }

        if let Err( e ) = self.session.deactivate().await {
            tracing::warn!( "Audio session deactivation failed: {}", e );
        }
        self.owner = None;
        tracing::info!( "Audio session released by {}", tag );
        true
    }


    /// Reacts to an OS notification. Never changes the owner on its own
    /// except by re-requesting for the current owner.
    pub async fn handle_event( &mut self, event: SessionEvent ) -> ArbiterSignal {
        tracing::debug!( "Session event: {:?} (owner {:?})", event, self.owner );

        match event {
            SessionEvent::InterruptionBegan
            | SessionEvent::SecondaryAudioHint { begin: true }
            | SessionEvent::MediaServicesReset => ArbiterSignal::Pause,

            SessionEvent::InterruptionEnded { should_resume: true } => {
                let Some( owner ) = self.owner else {
                    return ArbiterSignal::Ignore;
                };
                match self.request( owner ).await {
                    Ok(()) => ArbiterSignal::Resume,
                    Err( e ) => ArbiterSignal::ResumeFailed( e ),
                }
            }

            SessionEvent::InterruptionEnded { should_resume: false }
            | SessionEvent::SecondaryAudioHint { begin: false } => ArbiterSignal::Ignore,

            SessionEvent::RouteChanged( reason ) => ArbiterSignal::RouteChanged( reason ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::sync::atomic::{ AtomicU32, Ordering };


    /// Fails the first `failures` activations, then succeeds.
    #[derive( Default )]
    struct FlakySession {
        failures: AtomicU32,
        activations: AtomicU32,
        deactivations: AtomicU32,
    }


    impl FlakySession {
        fn failing( failures: u32 ) -> Arc<Self> {
            Arc::new( Self { failures: AtomicU32::new( failures ), ..Default::default() } )
        }
    }


    #[async_trait]
    impl AudioSession for FlakySession {
        async fn activate_exclusive( &self ) -> Result<(), SessionError> {
            self.activations.fetch_add( 1, Ordering::SeqCst );
            let remaining = self.failures.load( Ordering::SeqCst );
            if remaining > 0 {
                self.failures.store( remaining - 1, Ordering::SeqCst );
                return Err( SessionError::ActivationFailed( "busy".into() ) );
            }
            Ok(())
        }


        async fn deactivate( &self ) -> Result<(), SessionError> {
            self.deactivations.fetch_add( 1, Ordering::SeqCst );
            Ok(())
        }
    }


    #[tokio::test]
    async fn test_request_transfers_ownership() {
        let session = FlakySession::failing( 0 );
        let mut arbiter = SessionArbiter::new( session.clone(), &CoreConfig::default() );

        arbiter.request( BackendTag::Catalog ).await.unwrap();
        arbiter.request( BackendTag::Subsonic ).await.unwrap();
        assert_eq!( arbiter.owner(), Some( BackendTag::Subsonic ) );

        assert!( !arbiter.release( BackendTag::Catalog ).await );
        assert_eq!( arbiter.owner(), Some( BackendTag::Subsonic ) );
        assert_eq!( session.deactivations.load( Ordering::SeqCst ), 0 );

        assert!( arbiter.release( BackendTag::Subsonic ).await );
        assert_eq!( arbiter.owner(), None );
        assert_eq!( session.deactivations.load( Ordering::SeqCst ), 1 );
    }


    #[tokio::test]
    async fn test_request_reactivates_for_same_owner() {
        let session = FlakySession::failing( 0 );
        let mut arbiter = SessionArbiter::new( session.clone(), &CoreConfig::default() );

        arbiter.request( BackendTag::Local ).await.unwrap();
        arbiter.request( BackendTag::Local ).await.unwrap();
        assert_eq!( session.activations.load( Ordering::SeqCst ), 2 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_request_unavailable_after_retries() {
        let session = FlakySession::failing( 3 );
        let mut arbiter = SessionArbiter::new( session.clone(), &CoreConfig::default() );

        let result = arbiter.request( BackendTag::Subsonic ).await;
        assert_eq!( result, Err( SessionError::Unavailable { tag: BackendTag::Subsonic, attempts: 3 } ) );
        assert_eq!( arbiter.owner(), None );
        assert_eq!( session.activations.load( Ordering::SeqCst ), 3 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_failed_request_keeps_previous_owner() {
        let session = FlakySession::failing( 0 );
        let mut arbiter = SessionArbiter::new( session.clone(), &CoreConfig::default() );
        arbiter.request( BackendTag::Jellyfin ).await.unwrap();

        session.failures.store( 10, Ordering::SeqCst );
        assert!( arbiter.request( BackendTag::Local ).await.is_err() );
        assert_eq!( arbiter.owner(), Some( BackendTag::Jellyfin ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_transient_failure_recovers() {
        let session = FlakySession::failing( 2 );
        let mut arbiter = SessionArbiter::new( session.clone(), &CoreConfig::default() );

        arbiter.request( BackendTag::Catalog ).await.unwrap();
        assert_eq!( arbiter.owner(), Some( BackendTag::Catalog ) );
    }


    #[tokio::test]
    async fn test_event_reactions() {
        let session = FlakySession::failing( 0 );
        let mut arbiter = SessionArbiter::new( session.clone(), &CoreConfig::default() );

        assert_eq!( arbiter.handle_event( SessionEvent::InterruptionBegan ).await, ArbiterSignal::Pause );
        assert_eq!( arbiter.handle_event( SessionEvent::MediaServicesReset ).await, ArbiterSignal::Pause );
        assert_eq!(
            arbiter.handle_event( SessionEvent::SecondaryAudioHint { begin: true } ).await,
            ArbiterSignal::Pause,
        );
        assert_eq!(
            arbiter.handle_event( SessionEvent::InterruptionEnded { should_resume: false } ).await,
            ArbiterSignal::Ignore,
        );

        // No owner yet, so nothing to resume
        assert_eq!(
            arbiter.handle_event( SessionEvent::InterruptionEnded { should_resume: true } ).await,
            ArbiterSignal::Ignore,
        );

        arbiter.request( BackendTag::Local ).await.unwrap();
        assert_eq!(
            arbiter.handle_event( SessionEvent::InterruptionEnded { should_resume: true } ).await,
            ArbiterSignal::Resume,
        );
        assert_eq!(
            arbiter.handle_event( SessionEvent::RouteChanged( RouteChangeReason::DeviceRemoved ) ).await,
            ArbiterSignal::RouteChanged( RouteChangeReason::DeviceRemoved ),
        );
        assert_eq!( arbiter.owner(), Some( BackendTag::Local ) );
    }
}

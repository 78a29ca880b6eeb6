//! System media transport controls integration
//!
//! Provides the now-playing sink for the coordinator:
//! - Windows: System Media Transport Controls (SMTC)
//! - Elsewhere: a sink that logs what would be shown

use cassette_core::{ ArtworkDisplay, NowPlayingInfo, NowPlayingSink, RemoteCommandSender };


#[cfg( target_os = "windows" )]
mod platform {
    use std::ffi::c_void;
    use std::sync::mpsc;
    use std::time::Duration;

    use souvlaki::{ MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, MediaPosition, PlatformConfig };
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ GetLastError, HWND, LPARAM, LRESULT, WPARAM };
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, RegisterClassW,
        CS_HREDRAW, CS_VREDRAW, CW_USEDEFAULT, WNDCLASSW, WS_OVERLAPPEDWINDOW,
    };

    use cassette_core::{
        ArtworkDisplay, NowPlayingInfo, NowPlayingSink, RemoteCommand, RemoteCommandSender, ResolvedArtwork,
    };

    // ERROR_CLASS_ALREADY_EXISTS = 1410
    const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;


    /// Window procedure for the hidden SMTC window.
    unsafe extern "system" fn wnd_proc( hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM ) -> LRESULT {
        DefWindowProcW( hwnd, msg, wparam, lparam )
    }


    /// Changes forwarded to the SMTC thread.
    enum Update {
        Attach( RemoteCommandSender ),
        Info( NowPlayingInfo ),
        Artwork( ArtworkDisplay ),
        Clear,
    }


    /// Now-playing sink backed by souvlaki's SMTC binding.
    ///
    /// The controls and their hidden window live on a dedicated thread; the
    /// sink only forwards updates to it.
    pub struct SystemMediaControls {
        tx: mpsc::Sender<Update>,
    }


    impl SystemMediaControls {
        /// Starts the SMTC thread.
        ///
        /// Returns None if SMTC is not available.
        pub fn new() -> Option<Self> {
            let ( tx, rx ) = mpsc::channel::<Update>();
            let ( ready_tx, ready_rx ) = mpsc::channel();

            let spawned = std::thread::Builder::new()
                .name( "smtc".into() )
                .spawn( move || {
                    let Some( mut handler ) = MediaControlsHandler::new() else {
                        let _ = ready_tx.send( false );
                        return;
                    };
                    let _ = ready_tx.send( true );
                    for update in rx {
                        handler.apply( update );
                    }
                    tracing::debug!( "SMTC thread stopped" );
                });

            if let Err( e ) = spawned {
                tracing::warn!( "Failed to start SMTC thread: {}", e );
                return None;
            }

            match ready_rx.recv() {
                Ok( true ) => Some( Self { tx } ),
                _ => None,
            }
        }


        fn send( &self, update: Update ) {
            if self.tx.send( update ).is_err() {
                tracing::debug!( "SMTC thread is gone, dropping update" );
            }
        }
    }


    impl NowPlayingSink for SystemMediaControls {
        fn attach( &mut self, commands: RemoteCommandSender ) {
            self.send( Update::Attach( commands ) );
        }


        fn set_info( &mut self, info: &NowPlayingInfo ) {
            self.send( Update::Info( info.clone() ) );
        }


        fn set_artwork( &mut self, artwork: &ArtworkDisplay ) {
            self.send( Update::Artwork( artwork.clone() ) );
        }


        fn clear( &mut self ) {
            self.send( Update::Clear );
        }
    }


    /// Wrapper around souvlaki MediaControls. Owned by the SMTC thread.
    struct MediaControlsHandler {
        controls: MediaControls,
        #[allow( dead_code )]
        hwnd: HWND, // Keep the window alive
        info: Option<NowPlayingInfo>,
        cover_url: Option<String>,
    }


    impl MediaControlsHandler {
        fn new() -> Option<Self> {
            // Console windows cannot own SMTC, so bind it to a hidden one
            let hwnd = Self::create_hidden_window()?;

            let config = PlatformConfig {
                dbus_name: "cassette",
                display_name: "Cassette",
                hwnd: Some( hwnd.0 as *mut c_void ),
            };

            match MediaControls::new( config ) {
                Ok( controls ) => {
                    tracing::info!( "SMTC initialized with hidden window" );
                    Some( Self { controls, hwnd, info: None, cover_url: None } )
                }
                Err( e ) => {
                    tracing::warn!( "Failed to create media controls: {:?}", e );
                    None
                }
            }
        }


        /// Creates a hidden window for SMTC binding.
        fn create_hidden_window() -> Option<HWND> {
            unsafe {
                use windows::Win32::UI::Shell::SetCurrentProcessExplicitAppUserModelID;
                use windows::core::HSTRING;

                let app_id = HSTRING::from( "Cassette.Player" );
                let _ = SetCurrentProcessExplicitAppUserModelID( &app_id );

                let class_name: Vec<u16> = "CassetteSMTC\0".encode_utf16().collect();

                let wc = WNDCLASSW {
                    style: CS_HREDRAW | CS_VREDRAW,
                    lpfnWndProc: Some( wnd_proc ),
                    hInstance: windows::Win32::Foundation::HINSTANCE::default(),
                    lpszClassName: PCWSTR( class_name.as_ptr() ),
                    ..Default::default()
                };

                if RegisterClassW( &wc ) == 0 {
                    let error = GetLastError();
                    if error.0 != ERROR_CLASS_ALREADY_EXISTS {
                        tracing::warn!( "Failed to register SMTC window class: {:?}", error );
                        return None;
                    }
                    tracing::debug!( "SMTC window class already registered, reusing" );
                }

                let window_name: Vec<u16> = "Cassette\0".encode_utf16().collect();

                let hwnd = match CreateWindowExW(
                    windows::Win32::UI::WindowsAndMessaging::WINDOW_EX_STYLE::default(),
                    PCWSTR( class_name.as_ptr() ),
                    PCWSTR( window_name.as_ptr() ),
                    WS_OVERLAPPEDWINDOW, // no WS_VISIBLE
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    HWND::default(),
                    None,
                    None,
                    None,
                ) {
                    Ok( hwnd ) => hwnd,
                    Err( e ) => {
                        tracing::warn!( "Failed to create SMTC hidden window: {:?}", e );
                        return None;
                    }
                };

                if hwnd.0.is_null() {
                    tracing::warn!( "SMTC hidden window handle is null" );
                    return None;
                }

                Some( hwnd )
            }
        }


        fn push_metadata( &mut self ) {
            let Some( info ) = &self.info else {
                return;
            };
            let metadata = MediaMetadata {
                title: Some( info.title.as_str() ),
                artist: Some( info.artist.as_str() ),
                album: Some( info.album.as_str() ),
                cover_url: self.cover_url.as_deref(),
                duration: Duration::try_from_secs_f64( info.duration ).ok().filter( |d| !d.is_zero() ),
            };
            if let Err( e ) = self.controls.set_metadata( metadata ) {
                tracing::warn!( "SMTC metadata error: {:?}", e );
            }
        }


        fn push_playback( &mut self, playback: MediaPlayback ) {
            if let Err( e ) = self.controls.set_playback( playback ) {
                tracing::debug!( "Failed to set playback state: {:?}", e );
            }
        }
    }


    impl MediaControlsHandler {
        fn apply( &mut self, update: Update ) {
            match update {
                Update::Attach( commands ) => self.attach( commands ),
                Update::Info( info ) => self.set_info( &info ),
                Update::Artwork( artwork ) => self.set_artwork( &artwork ),
                Update::Clear => self.clear(),
            }
        }


        fn attach( &mut self, commands: RemoteCommandSender ) {
            let result = self.controls.attach( move |event: MediaControlEvent| {
                let cmd = match event {
                    MediaControlEvent::Play => Some( RemoteCommand::Play ),
                    MediaControlEvent::Pause => Some( RemoteCommand::Pause ),
                    MediaControlEvent::Toggle => Some( RemoteCommand::Toggle ),
                    MediaControlEvent::Stop => Some( RemoteCommand::Stop ),
                    MediaControlEvent::Next => Some( RemoteCommand::Next ),
                    MediaControlEvent::Previous => Some( RemoteCommand::Previous ),
                    MediaControlEvent::SetPosition( MediaPosition( position ) ) => {
                        Some( RemoteCommand::SeekTo( position.as_secs_f64() ) )
                    }
                    _ => None,
                };
                if let Some( cmd ) = cmd {
                    let _ = commands.send( cmd );
                }
            });

            if let Err( e ) = result {
                tracing::warn!( "Failed to attach media control handler: {:?}", e );
            }
        }


        fn set_info( &mut self, info: &NowPlayingInfo ) {
            let changed = self.info.as_ref().map_or( true, |last| {
                last.title != info.title || last.artist != info.artist || last.album != info.album
                    || last.duration != info.duration
            });
            self.info = Some( info.clone() );
            if changed {
                self.push_metadata();
            }

            let progress = Duration::try_from_secs_f64( info.elapsed.max( 0.0 ) ).ok().map( MediaPosition );
            let playback = if info.rate > 0.0 {
                MediaPlayback::Playing { progress }
            } else {
                MediaPlayback::Paused { progress }
            };
            self.push_playback( playback );
        }


        fn set_artwork( &mut self, artwork: &ArtworkDisplay ) {
            self.cover_url = match artwork {
                ArtworkDisplay::Image( ResolvedArtwork::Url( url ) ) => Some( url.clone() ),
                _ => None,
            };
            self.push_metadata();
        }


        fn clear( &mut self ) {
            self.info = None;
            self.cover_url = None;
            self.push_playback( MediaPlayback::Stopped );
            if let Err( e ) = self.controls.set_metadata( MediaMetadata::default() ) {
                tracing::debug!( "Failed to clear SMTC metadata: {:?}", e );
            }
        }
    }
}


/// Sink for platforms without media controls. Logs track changes.
#[derive( Debug, Default )]
pub struct LogSink {
    current: Option<( String, String )>,
    playing: bool,
}


impl NowPlayingSink for LogSink {
    fn attach( &mut self, _commands: RemoteCommandSender ) {
        tracing::debug!( "No system media controls on this platform" );
    }


    fn set_info( &mut self, info: &NowPlayingInfo ) {
        let key = ( info.title.clone(), info.artist.clone() );
        let playing = info.rate > 0.0;
        if self.current.as_ref() != Some( &key ) {
            tracing::info!( "Now playing: {} - {}", info.artist, info.title );
        } else if self.playing != playing {
            tracing::debug!( "Now playing rate {}", info.rate );
        }
        self.current = Some( key );
        self.playing = playing;
    }


    fn set_artwork( &mut self, artwork: &ArtworkDisplay ) {
        tracing::debug!( "Now playing artwork: {:?}", artwork );
    }


    fn clear( &mut self ) {
        if self.current.take().is_some() {
            tracing::debug!( "Now playing cleared" );
        }
        self.playing = false;
    }
}


/// Returns the best now-playing sink for this platform.
///
/// @param enabled - false forces the logging sink even where SMTC exists
pub fn create_sink( enabled: bool ) -> Box<dyn NowPlayingSink> {
    match enabled.then( system_sink ).flatten() {
        Some( sink ) => sink,
        None => Box::new( LogSink::default() ),
    }
}


#[cfg( target_os = "windows" )]
fn system_sink() -> Option<Box<dyn NowPlayingSink>> {
    platform::SystemMediaControls::new().map( |c| Box::new( c ) as Box<dyn NowPlayingSink> )
}


#[cfg( not( target_os = "windows" ) )]
fn system_sink() -> Option<Box<dyn NowPlayingSink>> {
    None
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_log_sink_tracks_current() {
        let mut sink = LogSink::default();
        let info = NowPlayingInfo {
            title: "A".into(),
            artist: "X".into(),
            album: "R".into(),
            duration: 60.0,
            elapsed: 1.0,
            rate: 1.0,
        };
        sink.set_info( &info );
        assert_eq!( sink.current, Some(( "A".to_string(), "X".to_string() )) );
        assert!( sink.playing );

        sink.clear();
        assert!( sink.current.is_none() );
        assert!( !sink.playing );
    }


    fn assert_send<T: Send>() {}


    #[test]
    fn test_log_sink_is_send() {
        assert_send::<LogSink>();
    }


    #[cfg( target_os = "windows" )]
    #[test]
    fn test_system_controls_are_send() {
        assert_send::<platform::SystemMediaControls>();
    }


    #[test]
    fn test_create_sink_disabled() {
        let mut sink = create_sink( false );
        sink.set_artwork( &ArtworkDisplay::Placeholder );
        sink.clear();
    }
}

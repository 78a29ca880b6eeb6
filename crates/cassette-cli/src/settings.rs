//! Application settings management
//!
//! Persists the last active source, UI preferences and the core tuning
//! knobs between runs.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };

use cassette_core::{ BackendTag, CoreConfig };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Source that was active when the app last switched or quit
    pub last_source: BackendTag,

    /// Output volume (0.0 to 1.0)
    pub volume: f32,

    /// Name of the UI skin
    pub skin: String,

    /// Enable System Media Transport Controls (Windows)
    pub smtc_enabled: bool,

    /// Coordinator tuning
    pub core: CoreConfig,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            last_source: BackendTag::default(),
            volume: 1.0,
            skin: "classic".to_string(),
            smtc_enabled: true,
            core: CoreConfig::default(),
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "cassette" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from `path`. Missing or unreadable files give defaults.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => {
                serde_json::from_str( &contents ).unwrap_or_else( |e| {
                    tracing::warn!( "Ignoring malformed settings {}: {}", path.display(), e );
                    Self::default()
                })
            }
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to disk.
    pub fn save( &self ) {
        if let Some( path ) = Self::settings_path() {
            self.save_to( &path );
        }
    }


    /// Saves settings to `path`, creating its directory if needed.
    pub fn save_to( &self, path: &Path ) {
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn scratch_path( name: &str ) -> PathBuf {
        std::env::temp_dir()
            .join( format!( "cassette-settings-{}-{}", name, std::process::id() ) )
            .join( "settings.json" )
    }


    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load_from( &scratch_path( "missing" ) );
        assert_eq!( settings, Settings::default() );
    }


    #[test]
    fn test_save_and_load() {
        let path = scratch_path( "roundtrip" );
        let mut settings = Settings::default();
        settings.last_source = BackendTag::Jellyfin;
        settings.volume = 0.4;
        settings.core.max_consecutive_skips = 9;

        settings.save_to( &path );
        assert_eq!( Settings::load_from( &path ), settings );

        let _ = fs::remove_dir_all( path.parent().unwrap() );
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings = serde_json::from_str( r#"{ "last_source": "subsonic" }"# ).unwrap();
        assert_eq!( settings.last_source, BackendTag::Subsonic );
        assert_eq!( settings.skin, "classic" );
        assert_eq!( settings.core, CoreConfig::default() );
    }
}

//! Track references shared by every backend.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{ Deserialize, Serialize };


/// Identifies one playable audio source.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum BackendTag {
    /// Managed-subscription catalog service.
    Catalog,
    /// Self-hosted Subsonic-compatible server.
    Subsonic,
    /// Self-hosted Jellyfin server.
    Jellyfin,
    /// Files on the local disk.
    Local,
}


impl BackendTag {
    /// Every backend, in display order.
    pub const ALL: [BackendTag; 4] = [
        BackendTag::Catalog,
        BackendTag::Subsonic,
        BackendTag::Jellyfin,
        BackendTag::Local,
    ];


    pub fn as_str( &self ) -> &'static str {
        match self {
            BackendTag::Catalog => "catalog",
            BackendTag::Subsonic => "subsonic",
            BackendTag::Jellyfin => "jellyfin",
            BackendTag::Local => "local",
        }
    }
}


impl Default for BackendTag {
    fn default() -> Self {
        BackendTag::Local
    }
}


impl fmt::Display for BackendTag {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.as_str() )
    }
}


impl FromStr for BackendTag {
    type Err = String;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "catalog" | "apple" | "music" => Ok( BackendTag::Catalog ),
            "subsonic" | "navidrome" => Ok( BackendTag::Subsonic ),
            "jellyfin" => Ok( BackendTag::Jellyfin ),
            "local" | "files" => Ok( BackendTag::Local ),
            other => Err( format!( "Unknown source: '{}'", other ) ),
        }
    }
}


/// Artwork reference attached to a track.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum Artwork {
    /// Remote or file URL, fetched lazily by the artwork cache.
    Url( String ),
    /// Embedded image data.
    Bytes( Arc<[u8]> ),
}


/// An immutable reference to one playable track.
///
/// Cloning is cheap; the strings are shared.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( from = "TrackRecord" )]
pub struct Track {
    id: Arc<str>,
    title: Arc<str>,
    artist: Arc<str>,
    album: Arc<str>,
    /// Duration in seconds, never negative.
    duration: f64,
    artwork: Option<Artwork>,
    source: BackendTag,
}


/// Serialized form of a [`Track`]; deserialization goes through [`Track::new`].
#[derive( Deserialize )]
struct TrackRecord {
    id: Arc<str>,
    title: Arc<str>,
    artist: Arc<str>,
    album: Arc<str>,
    duration: f64,
    #[serde( default )]
    artwork: Option<Artwork>,
    source: BackendTag,
}


impl From<TrackRecord> for Track {
    fn from( record: TrackRecord ) -> Self {
        let track = Track::new( record.id, record.title, record.artist, record.album, record.duration, record.source );
        match record.artwork {
            Some( artwork ) => track.with_artwork( artwork ),
            None => track,
        }
    }
}


impl Track {
    /// Creates a track. Negative or non-finite durations are stored as zero.
    pub fn new(
        id: impl Into<Arc<str>>,
        title: impl Into<Arc<str>>,
        artist: impl Into<Arc<str>>,
        album: impl Into<Arc<str>>,
        duration: f64,
        source: BackendTag,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            duration: if duration.is_finite() { duration.max( 0.0 ) } else { 0.0 },
            artwork: None,
            source,
        }
    }


    /// Returns the same track with artwork attached.
    pub fn with_artwork( mut self, artwork: Artwork ) -> Self {
        self.artwork = Some( artwork );
        self
    }


    pub fn id( &self ) -> &str {
        &self.id
    }


    pub fn title( &self ) -> &str {
        &self.title
    }


    pub fn artist( &self ) -> &str {
        &self.artist
    }


    pub fn album( &self ) -> &str {
        &self.album
    }


    pub fn duration( &self ) -> f64 {
        self.duration
    }


    pub fn artwork( &self ) -> Option<&Artwork> {
        self.artwork.as_ref()
    }


    pub fn source( &self ) -> BackendTag {
        self.source
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_negative_duration_clamped() {
        let track = Track::new( "a", "A", "Artist", "Album", -4.0, BackendTag::Local );
        assert_eq!( track.duration(), 0.0 );

        let track = Track::new( "b", "B", "Artist", "Album", f64::NAN, BackendTag::Local );
        assert_eq!( track.duration(), 0.0 );
    }


    #[test]
    fn test_backend_tag_parse() {
        assert_eq!( "Subsonic".parse::<BackendTag>(), Ok( BackendTag::Subsonic ) );
        assert_eq!( "files".parse::<BackendTag>(), Ok( BackendTag::Local ) );
        assert!( "cassette".parse::<BackendTag>().is_err() );
    }


    #[test]
    fn test_track_json() {
        let json = r#"{
            "id": "42",
            "title": "Song",
            "artist": "Band",
            "album": "Record",
            "duration": 183.5,
            "source": "jellyfin",
            "artwork": { "url": "https://example.invalid/42.jpg" }
        }"#;
        let track: Track = serde_json::from_str( json ).unwrap();
        assert_eq!( track.id(), "42" );
        assert_eq!( track.source(), BackendTag::Jellyfin );
        assert_eq!( track.artwork(), Some( &Artwork::Url( "https://example.invalid/42.jpg".into() ) ) );

        let tracks: Vec<Track> = serde_json::from_str( r#"[
            { "id": "1", "title": "T", "artist": "A", "album": "R", "duration": -30, "source": "local" }
        ]"# ).unwrap();
        assert_eq!( tracks[ 0 ].duration(), 0.0 );
        assert!( tracks[ 0 ].artwork().is_none() );
    }
}

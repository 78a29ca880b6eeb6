//! Queue files.
//!
//! A queue file is a JSON array of tracks, each naming the source it
//! belongs to.

use std::path::Path;

use anyhow::{ Context, Result };

use cassette_core::{ BackendTag, Track };


/// Reads a queue file.
pub async fn load( path: &Path ) -> Result<Vec<Track>> {
    let contents = tokio::fs::read_to_string( path ).await
        .with_context( || format!( "Failed to read queue file {}", path.display() ) )?;
    let tracks: Vec<Track> = serde_json::from_str( &contents )
        .with_context( || format!( "Malformed queue file {}", path.display() ) )?;
    tracing::debug!( "Read {} tracks from {}", tracks.len(), path.display() );
    Ok( tracks )
}


/// Source the queue should play on: the one its first track names.
pub fn preferred_source( tracks: &[Track] ) -> Option<BackendTag> {
    tracks.first().map( Track::source )
}


/// Keeps only the tracks belonging to `source`.
pub fn for_source( tracks: Vec<Track>, source: BackendTag ) -> Vec<Track> {
    let total = tracks.len();
    let kept: Vec<Track> = tracks.into_iter().filter( |t| t.source() == source ).collect();
    if kept.len() < total {
        tracing::warn!( "Dropped {} tracks not available on {}", total - kept.len(), source );
    }
    kept
}


#[cfg( test )]
mod tests {
    use super::*;


    #[tokio::test]
    async fn test_load_and_filter() {
        let path = std::env::temp_dir().join( format!( "cassette-queue-{}.json", std::process::id() ) );
        std::fs::write( &path, r#"[
            { "id": "1", "title": "One", "artist": "X", "album": "R", "duration": 60, "source": "subsonic" },
            { "id": "2", "title": "Two", "artist": "X", "album": "R", "duration": 61, "source": "local" },
            { "id": "3", "title": "Three", "artist": "X", "album": "R", "duration": 62, "source": "subsonic" }
        ]"# ).unwrap();

        let tracks = load( &path ).await.unwrap();
        assert_eq!( preferred_source( &tracks ), Some( BackendTag::Subsonic ) );

        let kept = for_source( tracks, BackendTag::Subsonic );
        let ids: Vec<&str> = kept.iter().map( Track::id ).collect();
        assert_eq!( ids, vec![ "1", "3" ] );

        let _ = std::fs::remove_file( &path );
    }


    #[tokio::test]
    async fn test_missing_file() {
        let err = load( Path::new( "/nonexistent/cassette/queue.json" ) ).await.unwrap_err();
        assert!( err.to_string().contains( "Failed to read queue file" ) );
    }
}

//! On-disk artwork cache.
//!
//! The media-control surface can only load images from a URL, so embedded
//! artwork bytes are written to the user's cache directory and handed over
//! as `file://` URLs. Remote URLs pass through untouched.

use std::path::{ Path, PathBuf };

use async_trait::async_trait;

use cassette_core::{ ArtworkCache, Artwork, ResolvedArtwork };


/// Artwork cache rooted in a directory.
#[derive( Debug, Clone )]
pub struct FileArtworkCache {
    dir: Option<PathBuf>,
}


impl FileArtworkCache {
    /// Cache under the platform cache directory, e.g. `~/.cache/cassette/artwork`.
    pub fn new() -> Self {
        Self { dir: dirs::cache_dir().map( |p| p.join( "cassette" ).join( "artwork" ) ) }
    }


    /// Cache under an explicit directory.
    pub fn in_dir( dir: impl Into<PathBuf> ) -> Self {
        Self { dir: Some( dir.into() ) }
    }


    /// Where the image for `track_id` is stored.
    fn path_for( dir: &Path, track_id: &str ) -> PathBuf {
        let name: String = track_id
            .chars()
            .map( |c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' } )
            .collect();
        dir.join( format!( "{}.img", name ) )
    }
}


impl Default for FileArtworkCache {
    fn default() -> Self {
        Self::new()
    }
}


/// Converts a file path to a file:// URL.
fn path_to_file_url( path: &Path ) -> String {
    let path_str = path.to_string_lossy();
    let clean_path = path_str.strip_prefix( r"\\?\" ).unwrap_or( &path_str );
    format!( "file://{}", clean_path )
}


#[async_trait]
impl ArtworkCache for FileArtworkCache {
    async fn resolve( &self, track_id: &str, artwork: &Artwork ) -> Option<ResolvedArtwork> {
        let bytes = match artwork {
            Artwork::Url( url ) => return Some( ResolvedArtwork::Url( url.clone() ) ),
            Artwork::Bytes( bytes ) => bytes,
        };

        let Some( dir ) = &self.dir else {
            return Some( ResolvedArtwork::Bytes( bytes.clone() ) );
        };
        let path = Self::path_for( dir, track_id );

        if tokio::fs::metadata( &path ).await.is_err() {
            if let Err( e ) = tokio::fs::create_dir_all( dir ).await {
                tracing::warn!( "Failed to create artwork cache {}: {}", dir.display(), e );
                return None;
            }
            if let Err( e ) = tokio::fs::write( &path, &bytes[ .. ] ).await {
                tracing::warn!( "Failed to cache artwork for {}: {}", track_id, e );
                return None;
            }
            tracing::debug!( "Cached artwork for {} at {}", track_id, path.display() );
        }

        Some( ResolvedArtwork::Url( path_to_file_url( &path ) ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::sync::Arc;


    #[tokio::test]
    async fn test_urls_pass_through() {
        let cache = FileArtworkCache::in_dir( std::env::temp_dir().join( "cassette-art-unused" ) );
        let resolved = cache.resolve( "a", &Artwork::Url( "https://example.org/a.jpg".into() ) ).await;
        assert_eq!( resolved, Some( ResolvedArtwork::Url( "https://example.org/a.jpg".into() ) ) );
    }


    #[tokio::test]
    async fn test_bytes_written_once() {
        let dir = std::env::temp_dir().join( format!( "cassette-art-{}", std::process::id() ) );
        let cache = FileArtworkCache::in_dir( &dir );
        let artwork = Artwork::Bytes( Arc::from( vec![ 1u8, 2, 3 ] ) );

        let first = cache.resolve( "lib/track 1", &artwork ).await.unwrap();
        let second = cache.resolve( "lib/track 1", &artwork ).await.unwrap();
        assert_eq!( first, second );

        let path = FileArtworkCache::path_for( &dir, "lib/track 1" );
        assert_eq!( path.file_name().unwrap(), "lib_track_1.img" );
        assert_eq!( std::fs::read( &path ).unwrap(), vec![ 1, 2, 3 ] );
        assert_eq!( first, ResolvedArtwork::Url( path_to_file_url( &path ) ) );

        let _ = std::fs::remove_dir_all( &dir );
    }
}

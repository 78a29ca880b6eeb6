//! Derived "now playing" values.

use crate::queue::QueueState;


/// Read-only view of playback, recomputed on every tick or event.
#[derive( Debug, Clone, PartialEq, Default )]
pub struct PlaybackSnapshot {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Seconds into the current track.
    pub elapsed: f64,
    /// Length of the current track in seconds.
    pub total: f64,
    pub is_playing: bool,
    /// 1-based position for display.
    pub track_index: usize,
    pub track_count: usize,
    /// Seconds into the whole queue.
    pub queue_elapsed: f64,
    pub queue_total: f64,
}


impl PlaybackSnapshot {
    /// Builds a snapshot from the queue and the latest adapter position.
    ///
    /// Returns None when nothing is current. A zero `total` from the adapter
    /// falls back to the track's own duration; `elapsed` is clamped to it.
    pub fn derive( queue: &QueueState, elapsed: f64, total: f64, is_playing: bool ) -> Option<Self> {
        let track = queue.current()?;
        let index = queue.current_index()?;

        let total = if total > 0.0 { total } else { track.duration() };
        let elapsed = if total > 0.0 { elapsed.clamp( 0.0, total ) } else { elapsed.max( 0.0 ) };

        Some( Self {
            track_id: track.id().to_string(),
            title: track.title().to_string(),
            artist: track.artist().to_string(),
            album: track.album().to_string(),
            elapsed,
            total,
            is_playing,
            track_index: index + 1,
            track_count: queue.len(),
            queue_elapsed: queue.elapsed_before_current() + elapsed,
            queue_total: queue.total_duration(),
        })
    }


    /// Copy with elapsed moved forward by `delta` seconds, bounded by `total`.
    pub fn advanced_by( &self, delta: f64 ) -> Self {
        let mut next = self.clone();
        let room = if self.total > 0.0 { ( self.total - self.elapsed ).max( 0.0 ) } else { delta };
        let step = delta.max( 0.0 ).min( room );
        next.elapsed += step;
        next.queue_elapsed += step;
        next
    }


    /// Same track, same displayed values. Times compare at 10 ms resolution.
    pub fn same_as( &self, other: &Self ) -> bool {
        let close = |a: f64, b: f64| ( a - b ).abs() < 0.01;

        self.track_id == other.track_id
            && self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.is_playing == other.is_playing
            && self.track_index == other.track_index
            && self.track_count == other.track_count
            && close( self.elapsed, other.elapsed )
            && close( self.total, other.total )
            && close( self.queue_elapsed, other.queue_elapsed )
            && close( self.queue_total, other.queue_total )
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use crate::track::{ BackendTag, Track };


    fn queue() -> QueueState {
        let mut queue = QueueState::new();
        queue.set_queue(
            vec![
                Track::new( "a", "A", "X", "R", 60.0, BackendTag::Local ),
                Track::new( "b", "B", "X", "R", 90.0, BackendTag::Local ),
            ],
            1,
        ).unwrap();
        queue
    }


    #[test]
    fn test_derive_one_based_and_totals() {
        let snapshot = PlaybackSnapshot::derive( &queue(), 30.0, 0.0, true ).unwrap();
        assert_eq!( snapshot.title, "B" );
        assert_eq!( snapshot.track_index, 2 );
        assert_eq!( snapshot.track_count, 2 );
        assert_eq!( snapshot.total, 90.0 );
        assert_eq!( snapshot.queue_elapsed, 90.0 );
        assert_eq!( snapshot.queue_total, 150.0 );
    }


    #[test]
    fn test_derive_empty_queue() {
        assert!( PlaybackSnapshot::derive( &QueueState::new(), 0.0, 0.0, false ).is_none() );
    }


    #[test]
    fn test_same_as_sees_queue_changes() {
        let before = PlaybackSnapshot::derive( &queue(), 10.0, 0.0, true ).unwrap();
        assert!( before.same_as( &before.clone() ) );

        // Same current track at the same position, different track ahead of it
        let mut other = QueueState::new();
        other.set_queue(
            vec![
                Track::new( "z", "Z", "X", "R", 30.0, BackendTag::Local ),
                Track::new( "b", "B", "X", "R", 90.0, BackendTag::Local ),
            ],
            1,
        ).unwrap();
        let after = PlaybackSnapshot::derive( &other, 10.0, 0.0, true ).unwrap();
        assert!( !before.same_as( &after ) );

        let mut retagged = before.clone();
        retagged.album = "Other".into();
        assert!( !before.same_as( &retagged ) );
    }


    #[test]
    fn test_advanced_by_stops_at_total() {
        let snapshot = PlaybackSnapshot::derive( &queue(), 89.5, 90.0, true ).unwrap();
        let next = snapshot.advanced_by( 1.0 );
        assert_eq!( next.elapsed, 90.0 );
        assert_eq!( next.queue_elapsed, 150.0 );
    }
}

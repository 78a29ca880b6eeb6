//! Queue state shared by every backend
//!
//! Handles track ordering, shuffle with a restorable original order, and
//! repeat modes. The coordinator owns the only instance.

use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{ Deserialize, Serialize };

use crate::error::QueueError;
use crate::track::Track;


/// Repeat mode for the queue.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum RepeatMode {
    /// Stop after the last track.
    #[default]
    Off,
    /// Replay the current track when it finishes.
    One,
    /// Wrap to the first track after the last.
    All,
}


impl RepeatMode {
    /// Cycles off → all → one → off.
    pub fn cycle( self ) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}


impl FromStr for RepeatMode {
    type Err = String;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Ok( RepeatMode::Off ),
            "one" | "1" => Ok( RepeatMode::One ),
            "all" | "2" => Ok( RepeatMode::All ),
            _ => Err( format!( "Invalid repeat mode: '{}'. Use 'off', 'one', or 'all'", s ) ),
        }
    }
}


/// Outcome of moving forward in the queue.
#[derive( Debug, Clone, PartialEq )]
pub enum Advance {
    /// The queue moved; this is the new current track.
    Next( Track ),
    /// Already at the last track with repeat off, or the queue is empty.
    Exhausted,
}


/// Outcome of moving backward in the queue.
#[derive( Debug, Clone, PartialEq )]
pub enum Retreat {
    Previous( Track ),
    /// Already at index 0 (or empty). Never wraps.
    AtStart,
}


/// The pre-shuffle order, captured when shuffle turns on.
#[derive( Debug, Clone, Default )]
struct ShadowOrder {
    tracks: Vec<Track>,
    /// Index of the track that was current when the snapshot was taken.
    index: Option<usize>,
}


/// Ordered track list with a current position, shuffle and repeat.
///
/// Invariant: `current_index` is `Some(i)` with `i < tracks.len()` whenever
/// the queue is non-empty, and `None` when it is empty.
#[derive( Debug, Default )]
pub struct QueueState {
    tracks: Vec<Track>,
    current_index: Option<usize>,
    shuffle: bool,
    repeat: RepeatMode,
    shadow: ShadowOrder,
    // Position in `shadow.tracks` of each entry of `tracks`, valid while shuffled
    origin: Vec<usize>,
}


impl QueueState {
    /// Creates an empty queue with shuffle off and repeat off.
    pub fn new() -> Self {
        Self::default()
    }


    /// Replaces the queue and its position.
    ///
    /// @param tracks - New track list
    /// @param start_index - Index of the track to make current
    ///
    /// @returns `InvalidIndex` if `start_index` is out of bounds for a
    /// non-empty list; the previous queue is kept in that case.
    pub fn set_queue( &mut self, tracks: Vec<Track>, start_index: usize ) -> Result<(), QueueError> {
        self.set_queue_with( tracks, start_index, &mut rand::thread_rng() )
    }


    /// Same as [`set_queue`](Self::set_queue) with an explicit source of randomness
    /// for the shuffled order.
    pub fn set_queue_with<R: Rng + ?Sized>(
        &mut self,
        tracks: Vec<Track>,
        start_index: usize,
        rng: &mut R,
    ) -> Result<(), QueueError> {
        if !tracks.is_empty() && start_index >= tracks.len() {
            return Err( QueueError::InvalidIndex { index: start_index, len: tracks.len() } );
        }

        let index = if tracks.is_empty() { None } else { Some( start_index ) };
        self.shadow = ShadowOrder { tracks: tracks.clone(), index };
        self.tracks = tracks;
        self.current_index = index;
        self.origin.clear();

        if self.shuffle {
            self.apply_shuffle( rng );
        }

        Ok(())
    }


    /// Empties the queue. Shuffle and repeat settings are kept.
    pub fn clear( &mut self ) {
        self.tracks.clear();
        self.current_index = None;
        self.shadow = ShadowOrder::default();
        self.origin.clear();
    }


    /// Gets the current track.
    pub fn current( &self ) -> Option<&Track> {
        self.current_index.and_then( |i| self.tracks.get( i ) )
    }


    /// Moves to the next track.
    ///
    /// `RepeatMode::All` wraps to the first track. `RepeatMode::One` is not
    /// consulted here: replaying the same track is the caller's job, so an
    /// explicit advance under `One` stops at the end like `Off`.
    pub fn advance( &mut self ) -> Advance {
        let Some( current ) = self.current_index else {
            return Advance::Exhausted;
        };

        let next = current + 1;
        let next = if next < self.tracks.len() {
            next
        } else {
            match self.repeat {
                RepeatMode::All => 0,
                RepeatMode::Off | RepeatMode::One => return Advance::Exhausted,
            }
        };

        self.current_index = Some( next );
        Advance::Next( self.tracks[ next ].clone() )
    }


    /// Moves to the previous track. Never wraps backward.
    pub fn retreat( &mut self ) -> Retreat {
        match self.current_index {
            Some( current ) if current > 0 => {
                self.current_index = Some( current - 1 );
                Retreat::Previous( self.tracks[ current - 1 ].clone() )
            }
            _ => Retreat::AtStart,
        }
    }


    /// Jumps to a specific track by index.
    pub fn jump_to( &mut self, index: usize ) -> Result<Track, QueueError> {
        let track = self.tracks.get( index )
            .cloned()
            .ok_or( QueueError::InvalidIndex { index, len: self.tracks.len() } )?;
        self.current_index = Some( index );
        Ok( track )
    }


    /// Sets shuffle mode.
    ///
    /// Turning shuffle on snapshots the current order, then permutes the
    /// queue with the current track pinned to index 0. Turning it off
    /// restores the snapshot and relocates the current track within it.
    pub fn set_shuffle( &mut self, enabled: bool ) {
        self.set_shuffle_with( enabled, &mut rand::thread_rng() );
    }


    /// Same as [`set_shuffle`](Self::set_shuffle) with an explicit source of randomness.
    pub fn set_shuffle_with<R: Rng + ?Sized>( &mut self, enabled: bool, rng: &mut R ) {
        if enabled == self.shuffle {
            return;
        }
        self.shuffle = enabled;

        if enabled {
            self.shadow = ShadowOrder {
                tracks: self.tracks.clone(),
                index: self.current_index,
            };
            self.apply_shuffle( rng );
        } else {
            self.restore_order();
        }
    }


    /// Gets shuffle mode.
    pub fn shuffle( &self ) -> bool {
        self.shuffle
    }


    /// Sets repeat mode. Queue contents are untouched.
    pub fn set_repeat_mode( &mut self, repeat: RepeatMode ) {
        self.repeat = repeat;
    }


    /// Gets repeat mode.
    pub fn repeat_mode( &self ) -> RepeatMode {
        self.repeat
    }


    /// Gets all tracks in play order.
    pub fn tracks( &self ) -> &[Track] {
        &self.tracks
    }


    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }


    pub fn current_index( &self ) -> Option<usize> {
        self.current_index
    }


    /// Sum of the durations of the tracks before the current one, in seconds.
    pub fn elapsed_before_current( &self ) -> f64 {
        match self.current_index {
            Some( i ) => self.tracks[ ..i ].iter().map( Track::duration ).sum(),
            None => 0.0,
        }
    }


    /// Sum of every track duration, in seconds.
    pub fn total_duration( &self ) -> f64 {
        self.tracks.iter().map( Track::duration ).sum()
    }


    /// Permutes `shadow.tracks` into `tracks`, current track first.
    fn apply_shuffle<R: Rng + ?Sized>( &mut self, rng: &mut R ) {
        let mut order: Vec<usize> = ( 0..self.shadow.tracks.len() ).collect();

        match self.shadow.index {
            Some( pinned ) => {
                order.remove( pinned );
                order.shuffle( rng );
                order.insert( 0, pinned );
            }
            None => order.shuffle( rng ),
        }

        self.tracks = order.iter().map( |&i| self.shadow.tracks[ i ].clone() ).collect();
        self.current_index = if self.tracks.is_empty() { None } else { Some( 0 ) };
        self.origin = order;
    }


    fn restore_order( &mut self ) {
        let current = self.current_index;
        let playing = self.current().cloned();
        let shadow = std::mem::take( &mut self.shadow );
        let origin = std::mem::take( &mut self.origin );

        self.tracks = shadow.tracks;
        if self.tracks.is_empty() {
            self.current_index = None;
            return;
        }

        let by_origin = current
            .and_then( |i| origin.get( i ).copied() )
            .filter( |&i| self.tracks.get( i ) == playing.as_ref() );
        let by_identity = || {
            let playing = playing.as_ref()?;
            self.tracks.iter().position( |t| t.id() == playing.id() )
        };
        let fallback = shadow.index.unwrap_or( 0 ).min( self.tracks.len() - 1 );

        self.current_index = Some( by_origin.or_else( by_identity ).unwrap_or( fallback ) );
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::track::BackendTag;


    fn track( id: &str ) -> Track {
        Track::new( id, id.to_uppercase(), "Artist", "Album", 100.0, BackendTag::Local )
    }


    fn queue_of( ids: &[&str], start: usize ) -> QueueState {
        let mut queue = QueueState::new();
        queue.set_queue( ids.iter().map( |id| track( id ) ).collect(), start ).unwrap();
        queue
    }


    fn ids( queue: &QueueState ) -> Vec<&str> {
        queue.tracks().iter().map( Track::id ).collect()
    }


    #[test]
    fn test_set_queue_invalid_index_keeps_previous() {
        let mut queue = queue_of( &[ "a", "b" ], 1 );
        let result = queue.set_queue( vec![ track( "x" ) ], 3 );

        assert_eq!( result, Err( QueueError::InvalidIndex { index: 3, len: 1 } ) );
        assert_eq!( ids( &queue ), vec![ "a", "b" ] );
        assert_eq!( queue.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_set_queue_empty_has_no_index() {
        let mut queue = queue_of( &[ "a" ], 0 );
        queue.set_queue( Vec::new(), 7 ).unwrap();

        assert!( queue.is_empty() );
        assert_eq!( queue.current_index(), None );
        assert_eq!( queue.advance(), Advance::Exhausted );
        assert_eq!( queue.retreat(), Retreat::AtStart );
    }


    #[test]
    fn test_advance_repeat_off_stops_at_end() {
        let mut queue = queue_of( &[ "a", "b" ], 0 );
        assert_eq!( queue.advance(), Advance::Next( track( "b" ) ) );
        assert_eq!( queue.advance(), Advance::Exhausted );
        assert_eq!( queue.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_advance_repeat_all_wraps() {
        let mut queue = queue_of( &[ "a", "b", "c" ], 2 );
        queue.set_repeat_mode( RepeatMode::All );
        assert_eq!( queue.advance(), Advance::Next( track( "a" ) ) );
        assert_eq!( queue.current_index(), Some( 0 ) );
    }


    #[test]
    fn test_retreat_never_wraps() {
        let mut queue = queue_of( &[ "a", "b" ], 1 );
        queue.set_repeat_mode( RepeatMode::All );
        assert_eq!( queue.retreat(), Retreat::Previous( track( "a" ) ) );
        assert_eq!( queue.retreat(), Retreat::AtStart );
        assert_eq!( queue.current_index(), Some( 0 ) );
    }


    #[test]
    fn test_shuffle_pins_current_track_first() {
        let mut rng = StdRng::seed_from_u64( 7 );
        let mut queue = queue_of( &[ "a", "b", "c" ], 1 );

        queue.set_shuffle_with( true, &mut rng );
        assert_eq!( queue.current_index(), Some( 0 ) );
        assert_eq!( queue.current().map( Track::id ), Some( "b" ) );

        queue.set_shuffle_with( false, &mut rng );
        assert_eq!( ids( &queue ), vec![ "a", "b", "c" ] );
        assert_eq!( queue.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_shuffle_round_trip_after_advancing() {
        let original = [ "a", "b", "c", "d", "e", "f", "g" ];

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64( seed );
            let mut queue = queue_of( &original, 3 );
            queue.set_repeat_mode( RepeatMode::All );

            queue.set_shuffle_with( true, &mut rng );
            for _ in 0..( seed as usize % 9 ) {
                queue.advance();
            }
            let playing = queue.current().cloned().unwrap();

            queue.set_shuffle_with( false, &mut rng );
            assert_eq!( ids( &queue ), original.to_vec() );
            assert_eq!( queue.current(), Some( &playing ) );
        }
    }


    #[test]
    fn test_shuffle_restore_with_duplicate_ids() {
        let mut rng = StdRng::seed_from_u64( 3 );
        let mut queue = queue_of( &[ "a", "b", "a", "c" ], 2 );

        queue.set_shuffle_with( true, &mut rng );
        queue.set_shuffle_with( false, &mut rng );

        assert_eq!( queue.current_index(), Some( 2 ) );
    }


    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64( 11 );
        let mut queue = queue_of( &[ "a", "b", "c", "d", "e" ], 4 );
        queue.set_shuffle_with( true, &mut rng );

        let mut shuffled: Vec<&str> = ids( &queue );
        shuffled.sort_unstable();
        assert_eq!( shuffled, vec![ "a", "b", "c", "d", "e" ] );
        assert_eq!( queue.tracks()[ 0 ].id(), "e" );
    }


    #[test]
    fn test_set_queue_while_shuffled_restores_new_order() {
        let mut rng = StdRng::seed_from_u64( 5 );
        let mut queue = queue_of( &[ "a", "b" ], 0 );
        queue.set_shuffle_with( true, &mut rng );

        queue.set_queue_with( vec![ track( "x" ), track( "y" ), track( "z" ) ], 2, &mut rng ).unwrap();
        assert_eq!( queue.current().map( Track::id ), Some( "z" ) );

        queue.set_shuffle_with( false, &mut rng );
        assert_eq!( ids( &queue ), vec![ "x", "y", "z" ] );
        assert_eq!( queue.current_index(), Some( 2 ) );
    }


    #[test]
    fn test_index_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64( 42 );
        let mut queue = queue_of( &[ "a", "b", "c", "d" ], 0 );

        for step in 0..400u32 {
            match rng.gen_range( 0..5 ) {
                0 | 1 => { queue.advance(); }
                2 => { queue.retreat(); }
                3 => {
                    let enabled = !queue.shuffle();
                    queue.set_shuffle_with( enabled, &mut rng );
                }
                _ => queue.set_repeat_mode( if step % 2 == 0 { RepeatMode::All } else { RepeatMode::Off } ),
            }
            let index = queue.current_index().unwrap();
            assert!( index < queue.len() );
        }
    }


    #[test]
    fn test_repeat_mode_does_not_touch_contents() {
        let mut queue = queue_of( &[ "a", "b" ], 1 );
        queue.set_repeat_mode( RepeatMode::One );
        assert_eq!( ids( &queue ), vec![ "a", "b" ] );
        assert_eq!( queue.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_elapsed_totals() {
        let queue = queue_of( &[ "a", "b", "c" ], 2 );
        assert_eq!( queue.elapsed_before_current(), 200.0 );
        assert_eq!( queue.total_duration(), 300.0 );
    }


    #[test]
    fn test_parse_repeat_mode() {
        assert_eq!( "none".parse::<RepeatMode>(), Ok( RepeatMode::Off ) );
        assert_eq!( "ALL".parse::<RepeatMode>(), Ok( RepeatMode::All ) );
        assert!( "sometimes".parse::<RepeatMode>().is_err() );
    }
}

//! Page replacement policy for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clock replacement algorithm.
///
/// Reference bits are atomic, so access recording is lock-free; only the
/// clock hand is behind a mutex. Victim selection is driven by a caller
/// predicate, which lets the pool restrict eviction to unpinned frames
/// without the replacer tracking pin state itself.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits: Vec<AtomicBool> =
            (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    /// Records that the given frame was accessed (sets its reference bit).
    #[inline]
    pub fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    /// Forgets a frame (clears its reference bit).
    #[inline]
    pub fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }

    /// Selects a victim frame for eviction.
    ///
    /// Only frames for which `can_evict` returns true are considered.
    /// Sweeps at most two full rotations giving referenced frames a second
    /// chance, then falls back to the first candidate regardless of its
    /// reference bit. Returns None if no frame passes the predicate.
    pub fn evict<F>(&self, can_evict: F) -> Option<FrameId>
    where
        F: Fn(FrameId) -> bool,
    {
        let mut hand = self.clock_hand.lock();
        let num_frames = self.num_frames;

        for _ in 0..(2 * num_frames) {
            let frame_id = FrameId(*hand as u32);

            if can_evict(frame_id) {
                if !self.reference_bits[*hand].load(Ordering::Relaxed) {
                    // Found victim: candidate and reference bit is 0
                    *hand = (*hand + 1) % num_frames;
                    return Some(frame_id);
                }
                // Clear reference bit and continue
                self.reference_bits[*hand].store(false, Ordering::Relaxed);
            }

            *hand = (*hand + 1) % num_frames;
        }

        // Everything referenced faster than we could sweep; take any candidate
        for _ in 0..num_frames {
            let frame_id = FrameId(*hand as u32);
            *hand = (*hand + 1) % num_frames;
            if can_evict(frame_id) {
                self.reference_bits[frame_id.0 as usize].store(false, Ordering::Relaxed);
                return Some(frame_id);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_clock_replacer_new() {
        let replacer = ClockReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
    }

    #[test]
    fn test_clock_replacer_evict_none_eligible() {
        let replacer = ClockReplacer::new(10);
        assert!(replacer.evict(|_| false).is_none());
    }

    #[test]
    fn test_clock_replacer_evict_single() {
        let replacer = ClockReplacer::new(10);

        let victim = replacer.evict(|fid| fid == FrameId(5));
        assert_eq!(victim, Some(FrameId(5)));
    }

    #[test]
    fn test_clock_replacer_second_chance() {
        let replacer = ClockReplacer::new(3);

        // Reference frames 0 and 1
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        // Frame 2 should be evicted first (no reference bit)
        let victim = replacer.evict(|_| true);
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_clock_replacer_evict_all_referenced() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));

        // Should still be able to evict after clearing reference bits
        let victim = replacer.evict(|_| true);
        assert!(victim.is_some());
    }

    #[test]
    fn test_clock_replacer_remove_clears_reference() {
        let replacer = ClockReplacer::new(2);

        replacer.record_access(FrameId(0));
        replacer.remove(FrameId(0));

        // Frame 0 lost its second chance
        let victim = replacer.evict(|_| true);
        assert_eq!(victim, Some(FrameId(0)));
    }

    #[test]
    fn test_clock_replacer_respects_predicate() {
        let replacer = ClockReplacer::new(5);

        // Only frames 2 and 4 are eligible
        let eligible: HashSet<FrameId> = [FrameId(2), FrameId(4)].into_iter().collect();

        let v1 = replacer.evict(|fid| eligible.contains(&fid));
        assert!(matches!(v1, Some(f) if eligible.contains(&f)));

        let v2 = replacer.evict(|fid| eligible.contains(&fid) && Some(fid) != v1);
        assert!(matches!(v2, Some(f) if eligible.contains(&f)));
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_clock_replacer_out_of_bounds() {
        let replacer = ClockReplacer::new(5);

        // These should not panic
        replacer.record_access(FrameId(100));
        replacer.remove(FrameId(100));
    }

    #[test]
    fn test_clock_replacer_rotation() {
        let replacer = ClockReplacer::new(4);

        // Evict repeatedly with everything eligible; all frames get their turn
        let mut seen = HashSet::new();
        for _ in 0..4 {
            seen.insert(replacer.evict(|_| true).unwrap());
        }
        assert_eq!(seen.len(), 4);
    }
}

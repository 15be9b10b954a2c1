//! Stream ID allocation for multiplexed proxied requests

use std::sync::atomic::{AtomicU32, Ordering};

/// Stream identifier. ID 0 is reserved and never allocated.
pub type StreamId = u32;

/// Allocator for per-session stream IDs.
///
/// IDs wrap around on overflow; a session would need four billion
/// concurrent in-flight requests before a collision, so wraparound is
/// treated as fresh.
#[derive(Debug)]
pub struct StreamIds {
    next: AtomicU32,
}

impl StreamIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next stream ID, skipping the reserved 0.
    pub fn next(&self) -> StreamId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for StreamIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let ids = StreamIds::new();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wraparound_skips_zero() {
        let ids = StreamIds {
            next: AtomicU32::new(u32::MAX),
        };
        assert_eq!(ids.next(), u32::MAX);
        // fetch_add wraps to 0, which must be skipped
        assert_eq!(ids.next(), 1);
    }
}

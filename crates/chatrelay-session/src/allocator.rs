//! Session id allocation.
//!
//! The allocator is the one piece of truly global mutable state in the
//! relay. Rather than a process-wide static, it is an ordinary value that
//! the builder of sessions owns (usually behind an `Arc`) and injects into
//! its [`Authenticator`](crate::Authenticator).

use std::sync::{Mutex, PoisonError};

use chatrelay_protocol::SessionId;

/// Issues unique, non-zero session ids.
///
/// Ids increase monotonically. When the counter wraps it skips
/// [`SessionId::INVALID`], so the sentinel is never returned.
#[derive(Debug)]
pub struct IdentityAllocator {
    /// The last id handed out.
    last: Mutex<u32>,
}

impl IdentityAllocator {
    /// Creates an allocator whose first id is `1`.
    pub fn new() -> Self {
        Self::starting_after(SessionId::INVALID.into_inner())
    }

    /// Creates an allocator whose first id is `last + 1` (skipping the
    /// sentinel). Mostly useful for exercising wraparound.
    pub fn starting_after(last: u32) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    /// Returns the next id.
    ///
    /// Callers are serialized by a single mutex; the critical section is
    /// two additions, so contention stays negligible.
    pub fn next(&self) -> SessionId {
        // A panic while holding this lock can't leave the counter in a
        // torn state, so a poisoned lock is safe to keep using.
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = last.wrapping_add(1);
        if *last == SessionId::INVALID.into_inner() {
            *last = last.wrapping_add(1);
        }
        SessionId(*last)
    }
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_next_starts_at_one_and_increments() {
        let alloc = IdentityAllocator::new();
        assert_eq!(alloc.next(), SessionId(1));
        assert_eq!(alloc.next(), SessionId(2));
        assert_eq!(alloc.next(), SessionId(3));
    }

    #[test]
    fn test_next_wraparound_skips_invalid() {
        let alloc = IdentityAllocator::starting_after(u32::MAX - 1);

        assert_eq!(alloc.next(), SessionId(u32::MAX));
        // Counter wraps to 0, which is the sentinel, so 1 comes next.
        assert_eq!(alloc.next(), SessionId(1));
    }

    #[test]
    fn test_next_concurrent_callers_get_distinct_valid_ids() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2_000;

        let alloc = Arc::new(IdentityAllocator::new());

        let ids: Vec<SessionId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let alloc = Arc::clone(&alloc);
                    scope.spawn(move || {
                        (0..PER_THREAD).map(|_| alloc.next()).collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("thread panicked"))
                .collect()
        });

        assert_eq!(ids.len(), THREADS * PER_THREAD);
        assert!(ids.iter().all(|id| id.is_valid()));
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len(), "ids must be pairwise distinct");
    }

    #[test]
    fn test_next_concurrent_across_wraparound_never_returns_sentinel() {
        let alloc = Arc::new(IdentityAllocator::starting_after(u32::MAX - 50));

        let ids: Vec<SessionId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let alloc = Arc::clone(&alloc);
                    scope.spawn(move || (0..25).map(|_| alloc.next()).collect::<Vec<_>>())
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("thread panicked"))
                .collect()
        });

        assert!(!ids.contains(&SessionId::INVALID));
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 100);
    }
}

//! Reusable `f64` scratch buffers for the EM inner loop.
//!
//! A pool lives for one training call and is owned by that
//! call's stack, so it is never shared between threads. Buffers are keyed by
//! exact length and zeroed when they are given back; the algorithm writes
//! every cell it reads, so a freshly taken buffer is not cleared again.

use std::collections::HashMap;

/// Counters describing how a pool has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchStats {
    /// `take` calls served from a free-list.
    pub hits: usize,
    /// `take` calls that had to allocate.
    pub misses: usize,
    /// Buffers dropped on `give` because their free-list was full.
    pub dropped: usize,
}

/// Free-lists of zeroed buffers keyed by exact length.
#[derive(Debug)]
pub struct ScratchPool {
    free: HashMap<usize, Vec<Vec<f64>>>,
    max_per_size: usize,
    stats: ScratchStats,
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new(4)
    }
}

impl ScratchPool {
    /// Pool keeping at most `max_per_size` idle buffers of any one length.
    pub fn new(max_per_size: usize) -> Self {
        Self {
            free: HashMap::new(),
            max_per_size,
            stats: ScratchStats::default(),
        }
    }

    /// A buffer of exactly `len` cells.
    pub fn take(&mut self, len: usize) -> Vec<f64> {
        match self.free.get_mut(&len).and_then(Vec::pop) {
            Some(buf) => {
                self.stats.hits += 1;
                buf
            }
            None => {
                self.stats.misses += 1;
                vec![0.0; len]
            }
        }
    }

    /// Return a buffer for reuse.
    pub fn give(&mut self, mut buf: Vec<f64>) {
        let list = self.free.entry(buf.len()).or_default();
        if list.len() >= self.max_per_size {
            self.stats.dropped += 1;
            return;
        }
        buf.fill(0.0);
        list.push(buf);
    }

    /// Idle buffers currently held for `len`.
    pub fn idle(&self, len: usize) -> usize {
        self.free.get(&len).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> ScratchStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_allocates_zeroed() {
        let mut pool = ScratchPool::new(2);
        let buf = pool.take(5);
        assert_eq!(buf, vec![0.0; 5]);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_give_zeroes_and_reuses() {
        let mut pool = ScratchPool::new(2);
        let mut buf = pool.take(3);
        buf.copy_from_slice(&[1.0, 2.0, 3.0]);
        pool.give(buf);
        assert_eq!(pool.idle(3), 1);

        let again = pool.take(3);
        assert_eq!(again, vec![0.0; 3]);
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.idle(3), 0);
    }

    #[test]
    fn test_sizes_are_exact() {
        let mut pool = ScratchPool::new(2);
        let buf = pool.take(4);
        pool.give(buf);
        let other = pool.take(3);
        assert_eq!(other.len(), 3);
        assert_eq!(pool.idle(4), 1);
        assert_eq!(pool.stats().misses, 2);
    }

    #[test]
    fn test_depth_is_capped() {
        let mut pool = ScratchPool::new(1);
        let a = pool.take(2);
        let b = pool.take(2);
        pool.give(a);
        pool.give(b);
        assert_eq!(pool.idle(2), 1);
        assert_eq!(pool.stats().dropped, 1);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reusable frame-buffer pool bucketed by size class.
//!
//! Frames are small and frequent; recycling their buffers keeps the reader
//! and send paths off the allocator in steady state. A buffer's ownership
//! moves pool -> producer (reader or sender) -> consumer (worker or writer)
//! -> pool; while checked out, exactly one component touches it.
//!
//! Returned buffers keep their size-class length, which may exceed the
//! frame they carry; the frame's embedded length prefix is authoritative.
//! A cold bucket allocates fresh rather than stalling, retention per class
//! is bounded, and the outstanding count is tracked so leaks and
//! over-subscription surface in logs instead of as silent stalls.

use parking_lot::Mutex;

use crate::{Error, Result};

/// Size-class ladder, capped by the pool's `max_buffer_size`.
const SIZE_CLASS_LADDER: &[usize] = &[64, 256, 1024, 4096];

struct Shared {
    /// One LIFO bucket per size class (warm buffers first).
    buckets: Vec<Vec<Vec<u8>>>,
    /// Buffers currently checked out.
    outstanding: usize,
    /// High-water mark already warned about.
    warned_at: usize,
}

/// Thread-safe pool of reusable byte buffers.
///
/// All access is serialized behind a single mutex; contention is bounded by
/// frame rate, not buffer size.
pub struct BufferPool {
    classes: Vec<usize>,
    retain_per_class: usize,
    warn_watermark: usize,
    shared: Mutex<Shared>,
}

impl BufferPool {
    /// Pool serving buffers up to `max_buffer_size`, retaining at most
    /// `retain_per_class` idle buffers per size class.
    pub fn new(max_buffer_size: usize, retain_per_class: usize) -> Self {
        let mut classes: Vec<usize> = SIZE_CLASS_LADDER
            .iter()
            .copied()
            .filter(|&c| c < max_buffer_size)
            .collect();
        classes.push(max_buffer_size);

        let buckets = classes.iter().map(|_| Vec::new()).collect();
        Self {
            warn_watermark: retain_per_class * classes.len(),
            classes,
            retain_per_class,
            shared: Mutex::new(Shared {
                buckets,
                outstanding: 0,
                warned_at: 0,
            }),
        }
    }

    /// Largest buffer this pool serves.
    pub fn max_buffer_size(&self) -> usize {
        *self.classes.last().unwrap_or(&0)
    }

    /// Take a buffer with length of the smallest size class >= `size`.
    pub fn take(&self, size: usize) -> Result<Vec<u8>> {
        let class_idx = match self.classes.iter().position(|&c| c >= size) {
            Some(idx) => idx,
            None => {
                return Err(Error::FrameTooLarge {
                    frame: size,
                    max: self.max_buffer_size(),
                })
            }
        };
        let class_size = self.classes[class_idx];

        let mut shared = self.shared.lock();
        shared.outstanding += 1;
        if shared.outstanding > self.warn_watermark && shared.outstanding > shared.warned_at {
            shared.warned_at = shared.outstanding;
            log::warn!(
                "buffer pool outstanding count {} exceeds watermark {}",
                shared.outstanding,
                self.warn_watermark
            );
        }
        if let Some(buf) = shared.buckets[class_idx].pop() {
            return Ok(buf);
        }
        drop(shared);

        Ok(vec![0u8; class_size])
    }

    /// Return a buffer taken from this pool.
    pub fn give(&self, buf: Vec<u8>) {
        let mut shared = self.shared.lock();
        debug_assert!(shared.outstanding > 0, "buffer returned to an empty pool");
        shared.outstanding = shared.outstanding.saturating_sub(1);

        // Buffers keep their class length for their whole checkout, so an
        // exact match identifies the home bucket.
        if let Some(class_idx) = self.classes.iter().position(|&c| c == buf.len()) {
            if shared.buckets[class_idx].len() < self.retain_per_class {
                shared.buckets[class_idx].push(buf);
            }
        } else {
            debug_assert!(false, "buffer of foreign length {} returned", buf.len());
        }
    }

    /// Buffers currently checked out. Diagnostic; used by leak checks.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    /// Idle buffers currently retained across all classes.
    pub fn retained(&self) -> usize {
        self.shared.lock().buckets.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("classes", &self.classes)
            .field("retain_per_class", &self.retain_per_class)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_rounds_up_to_class() {
        let pool = BufferPool::new(20_000, 8);
        assert_eq!(pool.take(10).unwrap().len(), 64);
        assert_eq!(pool.take(64).unwrap().len(), 64);
        assert_eq!(pool.take(65).unwrap().len(), 256);
        assert_eq!(pool.take(5_000).unwrap().len(), 20_000);
    }

    #[test]
    fn test_oversize_take_is_an_error() {
        let pool = BufferPool::new(20_000, 8);
        assert!(matches!(
            pool.take(20_001),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_buffers_are_recycled() {
        let pool = BufferPool::new(20_000, 8);
        let buf = pool.take(100).unwrap();
        let ptr = buf.as_ptr();
        pool.give(buf);
        assert_eq!(pool.retained(), 1);
        let again = pool.take(200).unwrap();
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(pool.retained(), 0);
    }

    #[test]
    fn test_outstanding_accounting() {
        let pool = BufferPool::new(20_000, 8);
        assert_eq!(pool.outstanding(), 0);
        let a = pool.take(10).unwrap();
        let b = pool.take(10).unwrap();
        assert_eq!(pool.outstanding(), 2);
        pool.give(a);
        pool.give(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_retention_is_bounded() {
        let pool = BufferPool::new(20_000, 2);
        let bufs: Vec<_> = (0..5).map(|_| pool.take(10).unwrap()).collect();
        for buf in bufs {
            pool.give(buf);
        }
        assert_eq!(pool.retained(), 2);
    }

    #[test]
    fn test_small_max_collapses_ladder() {
        let pool = BufferPool::new(32, 4);
        assert_eq!(pool.take(1).unwrap().len(), 32);
        assert_eq!(pool.max_buffer_size(), 32);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node and session configuration.

use std::time::Duration;

use crate::protocol::MAX_FRAME_SIZE;

/// Per-session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frame-processor workers per session. `0` means one per available
    /// processor.
    pub worker_threads: usize,

    /// How long blocked queue waits sleep before re-checking liveness.
    pub poll_timeout: Duration,

    /// Maximum total frame size accepted on send and receive.
    pub max_frame_size: usize,

    /// Idle buffers the frame-buffer pool retains per size class.
    pub pool_retain_per_class: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            poll_timeout: Duration::from_millis(100),
            max_frame_size: MAX_FRAME_SIZE,
            pool_retain_per_class: 16,
        }
    }
}

impl SessionConfig {
    /// Worker count with the `0 = auto` default resolved.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(2)
    }
}

/// Node-level configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Applied to every session this node creates.
    pub session: SessionConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
        assert!(config.effective_worker_threads() >= 1);
    }

    #[test]
    fn test_explicit_worker_count_wins() {
        let config = SessionConfig {
            worker_threads: 3,
            ..Default::default()
        };
        assert_eq!(config.effective_worker_threads(), 3);
    }
}

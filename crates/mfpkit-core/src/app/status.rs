//! Status - ワーカーホストの状態

use serde::{Deserialize, Serialize};

/// Snapshot of a worker host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCounts {
    /// Entries waiting in the queue.
    pub queued: usize,
    /// Entries a worker is executing right now.
    pub running: usize,
    pub workers: usize,
}

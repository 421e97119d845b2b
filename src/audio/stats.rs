use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the real-time block handler and the session pump
#[derive(Debug, Default)]
pub(crate) struct CaptureCounters {
    pub blocks_captured: AtomicU64,
    pub blocks_gated: AtomicU64,
    pub chunks_delivered: AtomicU64,
    pub bytes_delivered: AtomicU64,
    pub overflow_flushes: AtomicU64,
    pub delivery_failures: AtomicU64,
}

impl CaptureCounters {
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_gated: self.blocks_gated.load(Ordering::Relaxed),
            chunks_delivered: self.chunks_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            overflow_flushes: self.overflow_flushes.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Capture statistics accumulated over the recorder's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Blocks that passed the silence gate
    pub blocks_captured: u64,

    /// Blocks dropped as silence
    pub blocks_gated: u64,

    /// Chunks handed to a sink (including ones the sink rejected)
    pub chunks_delivered: u64,

    /// PCM bytes handed to a sink, before base64 encoding
    pub bytes_delivered: u64,

    /// Flushes forced by the buffer size limit
    pub overflow_flushes: u64,

    /// Flushes whose encoding or delivery failed
    pub delivery_failures: u64,
}

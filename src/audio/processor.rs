use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::backend::BlockHandler;
use super::pcm;
use super::stats::CaptureCounters;

/// Real-time frame processor: converts float blocks to 16-bit PCM and drops silence.
///
/// Runs on the host's audio thread. It performs no I/O, takes no locks and
/// never logs; accepted blocks are posted to the session pump over an
/// unbounded channel.
pub struct FrameProcessor {
    silence_threshold: f32,
    tx: mpsc::UnboundedSender<Vec<i16>>,
    counters: Arc<CaptureCounters>,
}

impl FrameProcessor {
    pub(crate) fn new(
        silence_threshold: f32,
        tx: mpsc::UnboundedSender<Vec<i16>>,
        counters: Arc<CaptureCounters>,
    ) -> Self {
        Self {
            silence_threshold,
            tx,
            counters,
        }
    }

    /// Convert one block, returning `None` when its peak is at or below the threshold.
    pub fn process(&self, block: &[f32]) -> Option<Vec<i16>> {
        gate_block(block, self.silence_threshold)
    }

    /// Handle one block from the audio thread
    pub fn on_block(&self, block: &[f32]) {
        if block.is_empty() {
            return;
        }

        match self.process(block) {
            Some(pcm) => {
                self.counters.blocks_captured.fetch_add(1, Ordering::Relaxed);
                // A closed channel means the session is tearing down
                let _ = self.tx.send(pcm);
            }
            None => {
                self.counters.blocks_gated.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn into_handler(self) -> BlockHandler {
        Box::new(move |block: &[f32]| self.on_block(block))
    }
}

/// Silence gate shared by the processor and tests: peak > threshold keeps the block.
pub fn gate_block(block: &[f32], silence_threshold: f32) -> Option<Vec<i16>> {
    if pcm::peak_amplitude(block) > silence_threshold {
        Some(pcm::convert_block(block))
    } else {
        None
    }
}

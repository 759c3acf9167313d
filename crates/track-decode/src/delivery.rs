//! Delivery bridge: applies the session gain and hands blocks to the mixer.
//!
//! The bridge is the producer end of a bounded [`BlockQueue`]; [`BlockReceiver`] is the
//! consumer end held by the mixer. A full queue suspends the decode loop (backpressure); a
//! closed receiver ends the session without an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::frame::{AudioFormat, AudioFrame, SampleBlock};
use crate::queue::{BlockQueue, PopStrategy, PushOutcome, calc_max_buffered_samples};

/// Gain/fade factor written by one external controller and read once per delivered block.
///
/// Stores the `f32` bit pattern in an [`AtomicU32`] so reads never tear.
#[derive(Debug)]
pub struct GainCell(AtomicU32);

impl GainCell {
    pub fn new(gain: f32) -> Self {
        Self(AtomicU32::new(gain.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store a new factor. Non-finite and negative values are clamped to `0.0`.
    pub fn store(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 0.0 };
        self.0.store(gain.to_bits(), Ordering::Relaxed);
    }
}

impl Default for GainCell {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Why a block could not be delivered.
#[derive(Debug)]
pub enum DeliverError {
    ConsumerClosed,
    /// The session's interrupt flag was raised while waiting for room.
    Interrupted(SampleBlock),
}

/// Build a connected bridge/receiver pair sized for `buffer_seconds` of `format` audio.
pub fn delivery_channel(
    format: AudioFormat,
    buffer_seconds: f32,
) -> (DeliveryBridge, BlockReceiver) {
    let max_samples =
        calc_max_buffered_samples(format.sample_rate, format.channels, buffer_seconds);
    let queue = Arc::new(BlockQueue::new(max_samples));
    let bridge = DeliveryBridge {
        queue: queue.clone(),
        gain: Arc::new(GainCell::default()),
        interrupt: Arc::new(AtomicBool::new(false)),
        format,
        delivered_blocks: 0,
    };
    (bridge, BlockReceiver { queue, format })
}

/// Producer end owned by a decode session. Dropping it marks the stream finished.
pub struct DeliveryBridge {
    queue: Arc<BlockQueue>,
    gain: Arc<GainCell>,
    interrupt: Arc<AtomicBool>,
    format: AudioFormat,
    delivered_blocks: u64,
}

impl DeliveryBridge {
    /// Format every delivered block must carry.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn gain_cell(&self) -> Arc<GainCell> {
        self.gain.clone()
    }

    /// Flag that makes a blocked push give up so pending commands can run.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }

    pub fn delivered_blocks(&self) -> u64 {
        self.delivered_blocks
    }

    /// Scale `frame` by the current gain and push it, blocking while the mixer is behind.
    pub fn deliver(&mut self, frame: AudioFrame) -> Result<(), DeliverError> {
        debug_assert_eq!(frame.format, self.format, "filter stage must normalize format");
        let gain = self.gain.load();
        let mut samples = frame.samples;
        if gain != 1.0 {
            for s in samples.iter_mut() {
                *s *= gain;
            }
        }
        self.push(SampleBlock {
            format: frame.format,
            start: frame.start,
            gain,
            samples,
        })
    }

    /// Push a block handed back by [`DeliverError::Interrupted`] again, without rescaling.
    pub fn retry(&mut self, block: SampleBlock) -> Result<(), DeliverError> {
        self.push(block)
    }

    fn push(&mut self, block: SampleBlock) -> Result<(), DeliverError> {
        match self.queue.push_blocking(block, &self.interrupt) {
            PushOutcome::Queued => {
                self.delivered_blocks += 1;
                Ok(())
            }
            PushOutcome::ConsumerClosed => Err(DeliverError::ConsumerClosed),
            PushOutcome::Interrupted(block) => Err(DeliverError::Interrupted(block)),
        }
    }

    /// Drop blocks the mixer has not taken yet; used when a seek truncates the stream.
    pub fn truncate(&self) -> usize {
        self.queue.truncate()
    }
}

impl Drop for DeliveryBridge {
    fn drop(&mut self) {
        self.queue.close_producer();
    }
}

/// Consumer end held by the mixer. Dropping it signals shutdown to the session.
pub struct BlockReceiver {
    queue: Arc<BlockQueue>,
    format: AudioFormat,
}

impl BlockReceiver {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Wait for the next block; `None` once the session has finished and the queue is empty.
    pub fn recv(&self) -> Option<SampleBlock> {
        self.queue.pop(PopStrategy::Blocking)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SampleBlock> {
        self.queue.pop(PopStrategy::Timeout(timeout))
    }

    pub fn try_recv(&self) -> Option<SampleBlock> {
        self.queue.pop(PopStrategy::NonBlocking)
    }

    /// Queued frames not yet taken (best-effort snapshot).
    pub fn buffered_frames(&self) -> usize {
        self.queue.buffered_samples() / self.format.channels.max(1)
    }

    /// Whether the session finished and every block was taken.
    pub fn is_finished(&self) -> bool {
        self.queue.is_drained()
    }

    /// Stop accepting blocks. The session observes this as `ConsumerClosed`.
    pub fn close(&self) {
        self.queue.close_consumer();
    }
}

impl Drop for BlockReceiver {
    fn drop(&mut self) {
        self.queue.close_consumer();
    }
}

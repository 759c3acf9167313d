//! Thread-safe bounded queue of finished sample blocks.
//!
//! This is the single hand-off point between a session's decode thread and the mixer:
//! - the decode thread pushes blocks in decode order, blocking while the queue is full
//! - the mixer pops blocks, blocking or not, from its own thread
//!
//! Either side can close its end. Shutdown is deterministic: a closed consumer makes pushes
//! fail with [`PushOutcome::ConsumerClosed`], a closed producer lets pops drain what is left
//! and then return `None`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::frame::SampleBlock;

/// How often a blocked push re-checks its interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Bounded FIFO of [`SampleBlock`]s.
///
/// ## Design
/// - Bounded by `max_buffered_samples` to cap memory and latency. A block larger than the
///   whole capacity is still accepted once the queue is empty, so nothing is ever dropped.
/// - Uses a single [`Condvar`] as a general "state changed" signal.
/// - Both close flags live under the same mutex as the queue to avoid races.
pub struct BlockQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct QueueInner {
    blocks: VecDeque<SampleBlock>,
    buffered_samples: usize,
    producer_done: bool,
    consumer_closed: bool,
}

/// Result of a blocking push.
#[derive(Debug)]
pub enum PushOutcome {
    Queued,
    /// The consumer closed its end; the block was not queued.
    ConsumerClosed,
    /// The interrupt flag was raised while waiting for room; the block is handed back.
    Interrupted(SampleBlock),
}

/// Strategy for popping a block.
#[derive(Clone, Copy, Debug)]
pub enum PopStrategy {
    /// Block until a block is available, or return `None` once the producer is done and the
    /// queue is drained.
    Blocking,
    /// Like `Blocking`, but give up after the timeout.
    Timeout(Duration),
    /// Return immediately.
    NonBlocking,
}

/// Compute a queue capacity in **samples** for a `(rate, channels, seconds)` target.
///
/// - If `buffer_seconds` is non-finite or `<= 0.0`, a safe fallback is used.
/// - The returned value is `ceil(rate_hz * buffer_seconds) * channels` (saturating).
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl BlockQueue {
    pub fn new(max_buffered_samples: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                blocks: VecDeque::new(),
                buffered_samples: 0,
                producer_done: false,
                consumer_closed: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(1),
        }
    }

    pub fn max_buffered_samples(&self) -> usize {
        self.max_buffered_samples
    }

    /// Samples currently queued (best-effort snapshot).
    pub fn buffered_samples(&self) -> usize {
        self.inner.lock().unwrap().buffered_samples
    }

    pub fn len_blocks(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }

    /// Whether the producer finished and every block has been taken.
    pub fn is_drained(&self) -> bool {
        let g = self.inner.lock().unwrap();
        g.producer_done && g.blocks.is_empty()
    }

    pub fn is_consumer_closed(&self) -> bool {
        self.inner.lock().unwrap().consumer_closed
    }

    /// Mark the producer side finished and wake all waiters. Idempotent.
    pub fn close_producer(&self) {
        let mut g = self.inner.lock().unwrap();
        g.producer_done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Mark the consumer side gone, discard queued blocks and wake all waiters. Idempotent.
    pub fn close_consumer(&self) {
        let mut g = self.inner.lock().unwrap();
        g.consumer_closed = true;
        g.blocks.clear();
        g.buffered_samples = 0;
        drop(g);
        self.cv.notify_all();
    }

    /// Push `block`, blocking while the queue is full.
    ///
    /// Returns early with the block handed back when `interrupt` is raised, checked every
    /// 50 ms while waiting.
    pub fn push_blocking(&self, block: SampleBlock, interrupt: &AtomicBool) -> PushOutcome {
        let len = block.samples.len();
        let mut g = self.inner.lock().unwrap();

        loop {
            if g.consumer_closed {
                return PushOutcome::ConsumerClosed;
            }
            let fits = g.buffered_samples + len <= self.max_buffered_samples;
            if fits || g.blocks.is_empty() {
                g.buffered_samples += len;
                g.blocks.push_back(block);
                drop(g);
                self.cv.notify_all();
                return PushOutcome::Queued;
            }
            if interrupt.load(Ordering::Acquire) {
                return PushOutcome::Interrupted(block);
            }
            let (ng, _timeout) = self.cv.wait_timeout(g, INTERRUPT_POLL).unwrap();
            g = ng;
        }
    }

    /// Pop the oldest block using the requested strategy.
    pub fn pop(&self, strategy: PopStrategy) -> Option<SampleBlock> {
        let deadline = match strategy {
            PopStrategy::Timeout(t) => Some(Instant::now() + t),
            _ => None,
        };
        let mut g = self.inner.lock().unwrap();

        loop {
            if let Some(block) = g.blocks.pop_front() {
                g.buffered_samples -= block.samples.len();
                drop(g);
                self.cv.notify_all();
                return Some(block);
            }
            if g.producer_done || g.consumer_closed {
                return None;
            }
            match strategy {
                PopStrategy::NonBlocking => return None,
                PopStrategy::Blocking => {
                    g = self.cv.wait(g).unwrap();
                }
                PopStrategy::Timeout(_) => {
                    let now = Instant::now();
                    let Some(deadline) = deadline.filter(|d| *d > now) else {
                        return None;
                    };
                    let (ng, _timeout) = self.cv.wait_timeout(g, deadline - now).unwrap();
                    g = ng;
                }
            }
        }
    }

    /// Discard every queued block not yet taken by the consumer. Returns how many were dropped.
    pub fn truncate(&self) -> usize {
        let mut g = self.inner.lock().unwrap();
        let dropped = g.blocks.len();
        g.blocks.clear();
        g.buffered_samples = 0;
        drop(g);
        self.cv.notify_all();
        dropped
    }
}

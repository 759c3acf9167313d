//! Decode session: the per-track state machine driving read → decode → filter → deliver.
//!
//! ```text
//! OPENING → STREAM_SELECT → (FILTER_SETUP) → DECODING ⇄ SEEKING → EOF | ERROR → CLOSED
//! ```
//!
//! [`DecodeSession::open`] runs the states up to filter setup synchronously so open failures
//! surface as plain errors. [`DecodeSession::run`] drives the loop on the calling thread until
//! end of stream, a stop command, consumer shutdown or a terminal error, then releases the
//! source, decoder and filter (in that order) before emitting [`SessionEvent::Closed`].
//!
//! Commands are drained at the top of every iteration and after every delivery returns, so a
//! command waits at most one iteration. A delivery blocked on a full buffer gives up when the
//! handle raises the interrupt flag, which keeps stop/seek latency bounded even when the mixer
//! stalls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use track_decode_types::{EndReason, ErrorKind, ProbeResult};

use crate::backend::{BackendError, Demuxer, MediaBackend, SourceRef, StreamDecoder};
use crate::chapters::{ChapterController, ChapterList, SeekTarget};
use crate::config::DecoderConfig;
use crate::delivery::{DeliverError, DeliveryBridge, GainCell};
use crate::error::{DecodeError, Result};
use crate::filter::FilterStage;
use crate::frame::{AudioFormat, AudioFrame};
use crate::probe::{describe, select_audio_stream};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    StreamSelect,
    FilterSetup,
    Decoding,
    Seeking,
    Eof,
    Error,
    Closed,
}

/// Per-session choices made by the player when a track starts.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Explicit stream to decode; defaults to the first audio stream.
    pub stream_index: Option<usize>,
    /// Position to seek to before the first packet is read.
    pub start: Option<SeekTarget>,
    /// Start with chapter confinement enabled.
    pub confine_to_chapter: bool,
}

/// Commands accepted by a running session.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Stop,
    Seek(SeekTarget),
    ConfineToChapter(bool),
}

/// Signals emitted upward while a session runs.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Source opened and stream selected. `resampling` tells whether a filter graph is active.
    Opened { info: ProbeResult, resampling: bool },
    /// The decoder switched native format mid-stream and the filter stage was rebuilt.
    FormatChanged {
        from: AudioFormat,
        to: AudioFormat,
        resampling: bool,
    },
    Seeked {
        position: Duration,
        chapter: Option<usize>,
    },
    ChapterChanged { chapter: Option<usize> },
    EndOfTrack,
    /// `terminal == false` for seek and chapter errors; playback continues.
    Error {
        kind: ErrorKind,
        message: String,
        terminal: bool,
    },
    Closed { reason: EndReason },
}

/// Outcome of one loop step.
enum Flow {
    Continue,
    /// A seek ran; frames decoded before it must not be delivered.
    Seeked,
    End(EndReason),
}

/// One track's decode pipeline.
///
/// Field order matters: dropping the session releases the source, then the decoder, then the
/// filter graph, then the delivery bridge (which marks the stream finished for the mixer).
pub struct DecodeSession {
    source: Box<dyn Demuxer>,
    decoder: Box<dyn StreamDecoder>,
    filter: FilterStage,
    delivery: DeliveryBridge,
    stream: usize,
    native: Option<AudioFormat>,
    target: AudioFormat,
    chunk_frames: usize,
    max_consecutive_errors: u32,
    chapters: ChapterController,
    info: ProbeResult,
    events: Sender<SessionEvent>,
    state: SessionState,
    start: Option<SeekTarget>,
    /// Frames ending before this position are discarded after a seek.
    skip_until: Option<Duration>,
    decode_failures: u32,
    filter_failures: u32,
}

impl DecodeSession {
    /// Open `source`, select its audio stream and build the filter stage.
    ///
    /// `delivery` must take blocks in the config's target format; a mismatch is a
    /// `FilterSetup` error. Emits [`SessionEvent::Opened`] on success.
    pub fn open(
        backend: &dyn MediaBackend,
        source: &SourceRef,
        options: SessionOptions,
        config: &DecoderConfig,
        delivery: DeliveryBridge,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        let target = delivery.format();
        if target != config.target_format() {
            return Err(DecodeError::FilterSetup(format!(
                "delivery bridge takes {target} but the decoder targets {}",
                config.target_format()
            )));
        }

        tracing::info!(source = %source, "opening source");
        let demuxer = backend.open(source)?;

        let stream = select_audio_stream(demuxer.info(), options.stream_index)?.clone();
        tracing::info!(
            stream = stream.index,
            codec = stream.codec.as_deref().unwrap_or("unknown"),
            "selected audio stream"
        );
        let decoder = demuxer.open_decoder(stream.index)?;

        let native = stream.format;
        let filter = match native {
            Some(format) => FilterStage::build(format, target, config.chunk_frames)?,
            None => FilterStage::NoFilter,
        };

        let list = ChapterList::from_raw(demuxer.info().chapters.clone(), demuxer.info().duration);
        let info = describe(demuxer.info(), &stream, &list);
        let mut chapters = ChapterController::new(list);
        chapters.set_confine(options.confine_to_chapter);

        let state = if filter.is_active() {
            SessionState::FilterSetup
        } else {
            SessionState::StreamSelect
        };
        let resampling = filter.is_active();
        if let Some(native) = native {
            tracing::info!(
                from = %native,
                to = %target,
                resampling,
                "filter stage ready"
            );
        }

        let session = Self {
            source: demuxer,
            decoder,
            filter,
            delivery,
            stream: stream.index,
            native,
            target,
            chunk_frames: config.chunk_frames,
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            chapters,
            info: info.clone(),
            events,
            state,
            start: options.start,
            skip_until: None,
            decode_failures: 0,
            filter_failures: 0,
        };
        session.emit(SessionEvent::Opened { info, resampling });
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Metadata captured at open time.
    pub fn info(&self) -> &ProbeResult {
        &self.info
    }

    pub fn current_chapter(&self) -> Option<usize> {
        self.chapters.current()
    }

    /// Whether a filter graph is converting frames.
    pub fn is_resampling(&self) -> bool {
        self.filter.is_active()
    }

    /// Shared gain cell read once per delivered block.
    pub fn gain_cell(&self) -> Arc<GainCell> {
        self.delivery.gain_cell()
    }

    /// Drive the session to completion, consuming it.
    ///
    /// Returns how the session ended; a terminal failure is returned as the error after it has
    /// been reported through [`SessionEvent::Error`].
    pub fn run(mut self, commands: &Receiver<Command>) -> Result<EndReason> {
        let result = match self.run_loop(commands) {
            Err(DecodeError::ConsumerClosed) => {
                tracing::info!("consumer closed, ending session");
                Ok(EndReason::ConsumerClosed)
            }
            other => other,
        };

        let reason = match &result {
            Ok(EndReason::Eof) => {
                self.set_state(SessionState::Eof);
                self.emit(SessionEvent::EndOfTrack);
                EndReason::Eof
            }
            Ok(reason) => *reason,
            Err(e) => {
                self.set_state(SessionState::Error);
                tracing::error!(kind = %e.kind(), "session failed: {e}");
                self.emit(SessionEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                    terminal: true,
                });
                EndReason::Error
            }
        };

        let events = self.events.clone();
        let delivered = self.delivery.delivered_blocks();
        self.set_state(SessionState::Closed);
        drop(self);
        tracing::info!(?reason, delivered_blocks = delivered, "session closed");
        let _ = events.send(SessionEvent::Closed { reason });

        result.map(|_| reason)
    }

    fn run_loop(&mut self, commands: &Receiver<Command>) -> Result<EndReason> {
        if let Some(start) = self.start.take() {
            self.seek(start)?;
        }
        self.set_state(SessionState::Decoding);

        loop {
            match self.checkpoint(commands)? {
                Flow::End(reason) => return Ok(reason),
                Flow::Continue | Flow::Seeked => {}
            }
            match self.step(commands)? {
                Flow::End(reason) => return Ok(reason),
                Flow::Continue | Flow::Seeked => {}
            }
        }
    }

    /// Drain every pending command.
    fn checkpoint(&mut self, commands: &Receiver<Command>) -> Result<Flow> {
        self.delivery.clear_interrupt();
        let mut flow = Flow::Continue;
        loop {
            match commands.try_recv() {
                Ok(Command::Stop) => {
                    tracing::info!("stop requested");
                    return Ok(Flow::End(EndReason::Stopped));
                }
                Ok(Command::Seek(target)) => {
                    if self.seek(target)? {
                        flow = Flow::Seeked;
                    }
                }
                Ok(Command::ConfineToChapter(confine)) => {
                    tracing::debug!(confine, "chapter confinement");
                    self.chapters.set_confine(confine);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(flow),
            }
        }
    }

    /// Read one packet and push whatever it decodes to.
    fn step(&mut self, commands: &Receiver<Command>) -> Result<Flow> {
        let packet = match self.source.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => return self.finish_stream(commands),
            Err(BackendError::Corrupt(msg)) => {
                self.note_decode_failure(&msg)?;
                return Ok(Flow::Continue);
            }
            Err(BackendError::Fatal(msg)) => return Err(DecodeError::Decode(msg)),
        };
        if packet.stream != self.stream {
            return Ok(Flow::Continue);
        }

        let frame = match self.decoder.decode(packet) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Flow::Continue),
            Err(BackendError::Corrupt(msg)) => {
                self.note_decode_failure(&msg)?;
                return Ok(Flow::Continue);
            }
            Err(BackendError::Fatal(msg)) => return Err(DecodeError::Decode(msg)),
        };
        self.decode_failures = 0;
        self.handle_frame(frame, commands)
    }

    /// End of packets: flush decoder and filter, then report EOF.
    fn finish_stream(&mut self, commands: &Receiver<Command>) -> Result<Flow> {
        tracing::debug!("end of packets, flushing");
        for frame in self.decoder.flush() {
            match self.handle_frame(frame, commands)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }
        let tail = self.filter.flush()?;
        match self.deliver_all(tail, commands)? {
            Flow::Continue => Ok(Flow::End(EndReason::Eof)),
            other => Ok(other),
        }
    }

    fn handle_frame(&mut self, frame: AudioFrame, commands: &Receiver<Command>) -> Result<Flow> {
        if self.native != Some(frame.format) {
            let tail = self.rebuild_filter(frame.format)?;
            match self.deliver_all(tail, commands)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }

        let output = match self.filter.process(frame) {
            Ok(output) => {
                self.filter_failures = 0;
                output
            }
            Err(e) => {
                self.note_filter_failure(e)?;
                return Ok(Flow::Continue);
            }
        };
        self.deliver_all(output, commands)
    }

    /// Swap in a filter stage for `format`. Returns the old stage's buffered tail.
    fn rebuild_filter(&mut self, format: AudioFormat) -> Result<Vec<AudioFrame>> {
        let previous = self.native.replace(format);
        self.set_state(SessionState::FilterSetup);
        let stage = FilterStage::build(format, self.target, self.chunk_frames)?;
        let mut old = std::mem::replace(&mut self.filter, stage);
        let tail = old.flush().unwrap_or_else(|e| {
            tracing::warn!("dropping filter tail on rebuild: {e}");
            Vec::new()
        });
        drop(old);

        let resampling = self.filter.is_active();
        match previous {
            Some(from) => {
                tracing::info!(from = %from, to = %format, resampling, "decoder format changed");
                self.emit(SessionEvent::FormatChanged {
                    from,
                    to: format,
                    resampling,
                });
            }
            None => tracing::debug!(format = %format, resampling, "native format learned"),
        }
        self.set_state(SessionState::Decoding);
        Ok(tail)
    }

    /// Position, confine and deliver target-format frames in order.
    fn deliver_all(
        &mut self,
        frames: Vec<AudioFrame>,
        commands: &Receiver<Command>,
    ) -> Result<Flow> {
        for mut frame in frames {
            if let Some(target) = self.skip_until {
                if frame.end() <= target {
                    continue;
                }
                frame.trim_front_to(target);
                self.skip_until = None;
            }

            let mut boundary_reached = false;
            if let Some(end) = self.chapters.confine_end() {
                if frame.start >= end {
                    tracing::info!(end = ?end, "confined chapter finished");
                    return Ok(Flow::End(EndReason::Eof));
                }
                if frame.end() > end {
                    frame.trim_back_to(end);
                    boundary_reached = true;
                }
            }

            if frame.frames() > 0 {
                if let Some(chapter) = self.chapters.track(frame.start) {
                    tracing::debug!(?chapter, "chapter changed");
                    self.emit(SessionEvent::ChapterChanged { chapter });
                }
                match self.push(frame, commands)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            }

            if boundary_reached {
                tracing::info!("confined chapter finished");
                return Ok(Flow::End(EndReason::Eof));
            }
        }
        Ok(Flow::Continue)
    }

    /// Hand one frame to the bridge, serving commands whenever the push returns.
    fn push(&mut self, frame: AudioFrame, commands: &Receiver<Command>) -> Result<Flow> {
        let mut result = self.delivery.deliver(frame);
        loop {
            match result {
                Ok(()) => return self.checkpoint(commands),
                Err(DeliverError::ConsumerClosed) => return Err(DecodeError::ConsumerClosed),
                Err(DeliverError::Interrupted(block)) => match self.checkpoint(commands)? {
                    Flow::Continue => result = self.delivery.retry(block),
                    other => return Ok(other),
                },
            }
        }
    }

    /// Run a seek request. Returns whether the source was repositioned.
    ///
    /// Chapter and seek failures are reported as non-terminal errors and playback continues
    /// from where it was; only a failed filter rebuild is terminal.
    fn seek(&mut self, target: SeekTarget) -> Result<bool> {
        let position = match self.chapters.resolve(target) {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!("rejected seek: {e}");
                self.report(&e);
                return Ok(false);
            }
        };

        self.set_state(SessionState::Seeking);
        tracing::info!(request = ?target, position = ?position, "seeking");
        self.decoder.reset();
        if let Some(native) = self.native {
            self.filter = FilterStage::build(native, self.target, self.chunk_frames)?;
        }

        let repositioned = match self.source.seek(self.stream, position) {
            Ok(landed) => {
                let dropped = self.delivery.truncate();
                self.skip_until = Some(position);
                self.decode_failures = 0;
                let chapter = self.chapters.after_seek(position);
                tracing::debug!(landed = ?landed, dropped_blocks = dropped, ?chapter, "seek done");
                self.emit(SessionEvent::Seeked { position, chapter });
                true
            }
            Err(e) => {
                tracing::warn!("seek failed, continuing from current position: {e}");
                self.report(&e);
                false
            }
        };
        self.set_state(SessionState::Decoding);
        Ok(repositioned)
    }

    fn note_decode_failure(&mut self, msg: &str) -> Result<()> {
        self.decode_failures += 1;
        tracing::warn!(
            failures = self.decode_failures,
            limit = self.max_consecutive_errors,
            "skipping corrupt packet: {msg}"
        );
        if self.decode_failures >= self.max_consecutive_errors {
            return Err(DecodeError::Decode(format!(
                "{} consecutive corrupt packets, last: {msg}",
                self.decode_failures
            )));
        }
        Ok(())
    }

    fn note_filter_failure(&mut self, e: DecodeError) -> Result<()> {
        self.filter_failures += 1;
        tracing::warn!(
            failures = self.filter_failures,
            limit = self.max_consecutive_errors,
            "dropping frame: {e}"
        );
        if self.filter_failures >= self.max_consecutive_errors {
            return Err(DecodeError::FilterRuntime(format!(
                "{} consecutive filter failures, last: {e}",
                self.filter_failures
            )));
        }
        Ok(())
    }

    fn report(&self, e: &DecodeError) {
        self.emit(SessionEvent::Error {
            kind: e.kind(),
            message: e.to_string(),
            terminal: false,
        });
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "session state");
            self.state = state;
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event receiver gone");
        }
    }
}

/// Control surface for a session running on its own thread.
///
/// Dropping the handle stops the session without waiting for it.
pub struct SessionHandle {
    commands: Sender<Command>,
    interrupt: Arc<AtomicBool>,
    gain: Arc<GainCell>,
    join: Option<JoinHandle<EndReason>>,
}

impl SessionHandle {
    /// Returns `false` once the session has ended.
    pub fn stop(&self) -> bool {
        self.send(Command::Stop, true)
    }

    pub fn seek(&self, position: Duration) -> bool {
        self.send(Command::Seek(SeekTarget::Offset(position)), true)
    }

    pub fn seek_chapter(&self, index: usize) -> bool {
        self.send(Command::Seek(SeekTarget::Chapter(index)), true)
    }

    pub fn confine_to_chapter(&self, confine: bool) -> bool {
        self.send(Command::ConfineToChapter(confine), false)
    }

    /// Set the gain/fade factor applied to every following block.
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Wait for the session thread. A panicked session reports [`EndReason::Error`].
    pub fn join(mut self) -> EndReason {
        match self.join.take() {
            Some(join) => join.join().unwrap_or(EndReason::Error),
            None => EndReason::Error,
        }
    }

    fn send(&self, command: Command, interrupt: bool) -> bool {
        if self.commands.send(command).is_err() {
            return false;
        }
        if interrupt {
            self.interrupt.store(true, Ordering::Release);
        }
        true
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            let _ = self.commands.send(Command::Stop);
            self.interrupt.store(true, Ordering::Release);
        }
    }
}

/// Open and run a session on a dedicated worker thread.
///
/// Open failures are reported through `events` (terminal `Error`, then `Closed`) like any other
/// session failure.
pub fn spawn_session(
    backend: Arc<dyn MediaBackend>,
    source: SourceRef,
    options: SessionOptions,
    config: DecoderConfig,
    delivery: DeliveryBridge,
    events: Sender<SessionEvent>,
) -> Result<SessionHandle> {
    let (commands, command_rx) = crossbeam_channel::unbounded();
    let interrupt = delivery.interrupt_flag();
    let gain = delivery.gain_cell();

    let join = thread::Builder::new()
        .name("decode-session".to_string())
        .spawn(move || {
            let opened = DecodeSession::open(
                backend.as_ref(),
                &source,
                options,
                &config,
                delivery,
                events.clone(),
            );
            match opened {
                Ok(session) => session.run(&command_rx).unwrap_or(EndReason::Error),
                Err(e) => {
                    tracing::error!(source = %source, kind = %e.kind(), "open failed: {e}");
                    let _ = events.send(SessionEvent::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                        terminal: true,
                    });
                    let _ = events.send(SessionEvent::Closed {
                        reason: EndReason::Error,
                    });
                    EndReason::Error
                }
            }
        })
        .map_err(|e| DecodeError::Open(format!("spawn session thread: {e}")))?;

    Ok(SessionHandle {
        commands,
        interrupt,
        gain,
        join: Some(join),
    })
}

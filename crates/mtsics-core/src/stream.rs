//! Continuous weight acquisition
//!
//! Starts continuous transmission (`ST 1`), collects measurement frames until
//! a count or a deadline is reached, and always stops transmission (`ST 0`)
//! again, whichever way the session ends.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::catalog::{CommandCatalog, Operation};
use crate::protocol::{
    Command, CommandChannel, Measurement, ProtocolError, ResponsePattern, Result, Transport,
    MAX_OBSERVED_BYTES,
};

/// Longest partial line kept while waiting for its terminator
const MAX_LINE_BYTES: usize = MAX_OBSERVED_BYTES;

/// Limits of a streaming session; at least one must be set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBounds {
    /// Stop after this many measurements
    pub target_count: Option<usize>,
    /// Stop once this much time has passed after the start was acknowledged;
    /// a duration too large for a deadline counts as no limit
    pub timeout: Option<Duration>,
}

impl StreamBounds {
    pub fn new(target_count: Option<usize>, timeout: Option<Duration>) -> Self {
        Self {
            target_count,
            timeout,
        }
    }

    /// Collect exactly `count` measurements
    pub fn count(count: usize) -> Self {
        Self::new(Some(count), None)
    }

    /// Collect whatever arrives within `timeout`
    pub fn within(timeout: Duration) -> Self {
        Self::new(None, Some(timeout))
    }

    fn validate(&self) -> Result<()> {
        if self.target_count.is_none() && self.timeout.is_none() {
            return Err(ProtocolError::Configuration(
                "streaming needs a measurement count or a timeout".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

/// Bookkeeping of one streaming session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    state: SessionState,
    collected: usize,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    target_count: Option<usize>,
}

impl StreamSession {
    /// Create an idle session, rejecting unbounded limits
    pub fn new(bounds: StreamBounds) -> Result<Self> {
        bounds.validate()?;
        Ok(Self {
            state: SessionState::Idle,
            collected: 0,
            timeout: bounds.timeout,
            deadline: None,
            target_count: bounds.target_count,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Measurements collected so far
    pub fn collected(&self) -> usize {
        self.collected
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn target_count(&self) -> Option<usize> {
        self.target_count
    }

    fn activate(&mut self) {
        debug_assert_eq!(self.state, SessionState::Idle);
        self.state = SessionState::Active;
    }

    /// Start the clock once the device acknowledged the start
    fn arm_deadline(&mut self, now: Instant) {
        self.deadline = self.timeout.and_then(|t| now.checked_add(t));
    }

    fn record(&mut self) {
        self.collected += 1;
    }

    /// True if this call moved the session to `Stopped`
    fn stop(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.state = SessionState::Stopped;
        true
    }

    fn target_reached(&self) -> bool {
        self.target_count.is_some_and(|n| self.collected >= n)
    }

    fn is_complete(&self, now: Instant) -> bool {
        self.target_reached() || self.deadline.is_some_and(|d| now >= d)
    }
}

/// Session guard: sends the stop command when finished or dropped
struct ActiveSession<'s, T: Transport> {
    channel: &'s mut CommandChannel<T>,
    stop: &'s Command,
    ack: &'s ResponsePattern,
    reject: &'s ResponsePattern,
    session: &'s mut StreamSession,
}

impl<T: Transport> ActiveSession<'_, T> {
    fn stop(&mut self) {
        if !self.session.stop() {
            return;
        }
        match self
            .channel
            .send_and_await_uncancellable(self.stop, self.ack, Some(self.reject))
        {
            Ok(_) => tracing::info!(collected = self.session.collected(), "stream stopped"),
            Err(e) => tracing::warn!(error = %e, "failed to stop continuous transmission"),
        }
    }
}

impl<T: Transport> Drop for ActiveSession<'_, T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads continuous-mode measurements through a borrowed channel
pub struct StreamingReader<'c, T: Transport> {
    channel: &'c mut CommandChannel<T>,
    start: Command,
    stop: Command,
    start_ack: ResponsePattern,
    start_reject: ResponsePattern,
    stop_ack: ResponsePattern,
    stop_reject: ResponsePattern,
    frame: ResponsePattern,
    session: Option<StreamSession>,
}

impl<'c, T: Transport> StreamingReader<'c, T> {
    /// Take the channel for the reader's lifetime
    pub fn new(channel: &'c mut CommandChannel<T>, catalog: &CommandCatalog) -> Result<Self> {
        let start = catalog.prepare(Operation::StartStreaming, &[])?;
        let stop = catalog.prepare(Operation::StopStreaming, &[])?;
        Ok(Self {
            start_ack: start.entry.pattern.clone(),
            start_reject: start.entry.rejection.clone(),
            stop_ack: stop.entry.pattern.clone(),
            stop_reject: stop.entry.rejection.clone(),
            start: start.command,
            stop: stop.command,
            frame: catalog.frame_pattern().clone(),
            channel,
            session: None,
        })
    }

    /// The most recent session, if any
    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    /// Collect measurements until `bounds` is reached
    pub fn stream(&mut self, bounds: StreamBounds) -> Result<Vec<Measurement>> {
        let session = self.session.insert(StreamSession::new(bounds)?);

        session.activate();
        let mut active = ActiveSession {
            channel: &mut *self.channel,
            stop: &self.stop,
            ack: &self.stop_ack,
            reject: &self.stop_reject,
            session,
        };

        active
            .channel
            .send_and_await_or_reject(&self.start, &self.start_ack, &self.start_reject)?;
        active.session.arm_deadline(Instant::now());
        tracing::info!(
            target_count = ?bounds.target_count,
            timeout_ms = ?bounds.timeout.map(|t| t.as_millis()),
            "stream started"
        );

        let measurements = collect_frames(&mut active, &self.frame, &self.start)?;
        active.stop();
        Ok(measurements)
    }
}

fn collect_frames<T: Transport>(
    active: &mut ActiveSession<'_, T>,
    frame: &ResponsePattern,
    start: &Command,
) -> Result<Vec<Measurement>> {
    let mut measurements = Vec::new();
    let mut lines = LineBuffer::default();
    let mut chunk = vec![0u8; active.channel.config().read_chunk.max(1)];

    while !active.session.is_complete(Instant::now()) {
        if active.channel.is_cancelled() {
            return Err(ProtocolError::Cancelled {
                command: start.to_string(),
            });
        }

        let n = active.channel.read_available(&mut chunk)?;
        lines.push(&chunk[..n]);

        while let Some(line) = lines.next_line() {
            let text = String::from_utf8_lossy(&line);
            let Some(fields) = frame.parse_line(&text) else {
                tracing::trace!(line = %text.trim_end(), "ignored line");
                continue;
            };
            let measurement = Measurement::from_fields(&fields[0], &fields[1])?;
            tracing::debug!(%measurement, "frame");
            measurements.push(measurement);
            active.session.record();
            if active.session.target_reached() {
                break;
            }
        }
    }

    Ok(measurements)
}

/// Splits raw reads into lines, dropping lines that grow too long
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    /// The rest of the current line belongs to one that was discarded
    overflowed: bool,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if !std::mem::take(&mut self.overflowed) {
                return Some(line);
            }
        }
        if self.pending.len() > MAX_LINE_BYTES {
            tracing::warn!(bytes = self.pending.len(), "discarding unterminated line");
            self.pending.clear();
            self.overflowed = true;
        }
        None
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }
}

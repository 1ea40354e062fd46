//! Command channel
//!
//! Sends one command line and blocks until the accumulated reply matches a
//! [`ResponsePattern`], the deadline elapses, or the caller cancels.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{
    Command, ProtocolError, ResponsePattern, Result, Transport, DEFAULT_TIMEOUT_MS,
    MAX_OBSERVED_BYTES,
};

/// Back-off used when a transport reports `WouldBlock` instead of blocking
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Default reply timeout in milliseconds
    pub timeout_ms: u64,
    /// Size of a single read from the transport
    pub read_chunk: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            read_chunk: 128,
        }
    }
}

impl ChannelConfig {
    /// Default reply timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub commands_sent: u64,
    pub replies_matched: u64,
}

/// Synchronous command/response engine over an exclusively owned transport
pub struct CommandChannel<T: Transport> {
    transport: T,
    config: ChannelConfig,
    cancel: CancellationToken,
    counters: TrafficCounters,
}

impl<T: Transport> CommandChannel<T> {
    /// Create a channel over `transport`
    pub fn new(transport: T, config: ChannelConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
            counters: TrafficCounters::default(),
        }
    }

    /// Channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Token that aborts the current and all later waits when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace a cancelled token so the channel can be used again
    pub fn reset_cancellation(&mut self) -> CancellationToken {
        self.cancel = CancellationToken::new();
        self.cancel.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get cumulative traffic counters
    pub fn counters(&self) -> TrafficCounters {
        self.counters
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Close the underlying transport
    pub fn close(&mut self) -> Result<()> {
        tracing::debug!("closing transport");
        self.transport.close()?;
        Ok(())
    }

    /// Send `command` and wait for `pattern` using the configured timeout
    pub fn send_and_await(
        &mut self,
        command: &Command,
        pattern: &ResponsePattern,
    ) -> Result<Vec<u8>> {
        let timeout = self.config.timeout();
        self.exchange(command, pattern, None, timeout, true)
    }

    /// Send `command` and wait at most `timeout` for `pattern`
    ///
    /// A timeout too large to represent as a deadline waits without one.
    pub fn send_and_await_within(
        &mut self,
        command: &Command,
        pattern: &ResponsePattern,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.exchange(command, pattern, None, timeout, true)
    }

    /// Like [`Self::send_and_await`], but fail with
    /// [`ProtocolError::Rejected`] as soon as a line matching `reject` arrives
    pub fn send_and_await_or_reject(
        &mut self,
        command: &Command,
        pattern: &ResponsePattern,
        reject: &ResponsePattern,
    ) -> Result<Vec<u8>> {
        let timeout = self.config.timeout();
        self.exchange(command, pattern, Some(reject), timeout, true)
    }

    /// Like [`Self::send_and_await_or_reject`] but ignores cancellation, for cleanup
    pub(crate) fn send_and_await_uncancellable(
        &mut self,
        command: &Command,
        pattern: &ResponsePattern,
        reject: Option<&ResponsePattern>,
    ) -> Result<Vec<u8>> {
        let timeout = self.config.timeout();
        self.exchange(command, pattern, reject, timeout, false)
    }

    /// Write a command line without waiting for a reply
    pub fn send(&mut self, command: &Command) -> Result<()> {
        let bytes = command.to_bytes();
        self.transport.clear_input()?;
        self.transport.write_all(&bytes)?;
        self.transport.flush()?;
        self.counters.tx_bytes = self.counters.tx_bytes.saturating_add(bytes.len() as u64);
        self.counters.commands_sent = self.counters.commands_sent.saturating_add(1);
        tracing::debug!(command = %command, "sent");
        Ok(())
    }

    /// Read whatever the transport has, returning 0 when nothing arrived
    /// within the transport's read timeout
    pub(crate) fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.transport.read(buf) {
            Ok(0) => Err(ProtocolError::Transport(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "transport closed by peer",
            ))),
            Ok(n) => {
                self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(n as u64);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exchange(
        &mut self,
        command: &Command,
        pattern: &ResponsePattern,
        reject: Option<&ResponsePattern>,
        timeout: Duration,
        honour_cancel: bool,
    ) -> Result<Vec<u8>> {
        let cancelled = || ProtocolError::Cancelled {
            command: command.to_string(),
        };
        if honour_cancel && self.is_cancelled() {
            return Err(cancelled());
        }

        self.send(command)?;

        // None when the timeout does not fit in an Instant
        let deadline = Instant::now().checked_add(timeout);
        let mut response = Vec::new();
        let mut chunk = vec![0u8; self.config.read_chunk.max(1)];

        while deadline.map_or(true, |d| Instant::now() < d) {
            if honour_cancel && self.is_cancelled() {
                tracing::debug!(command = %command, "wait cancelled");
                return Err(cancelled());
            }

            let n = self.read_available(&mut chunk)?;
            if n == 0 {
                continue;
            }
            response.extend_from_slice(&chunk[..n]);

            if pattern.is_match(&response) {
                self.counters.replies_matched = self.counters.replies_matched.saturating_add(1);
                tracing::debug!(
                    command = %command,
                    reply = %String::from_utf8_lossy(&response).trim_end(),
                    "matched"
                );
                return Ok(response);
            }

            if let Some(line) = reject.and_then(|r| r.matched_line(&response)) {
                tracing::debug!(command = %command, reply = %line, "rejected");
                return Err(ProtocolError::Rejected {
                    command: command.to_string(),
                    reply: line,
                });
            }
        }

        let tail_start = response.len().saturating_sub(MAX_OBSERVED_BYTES);
        let observed = String::from_utf8_lossy(&response[tail_start..]).into_owned();
        tracing::debug!(command = %command, expected = %pattern, observed = %observed, "timed out");
        Err(ProtocolError::Timeout {
            command: command.to_string(),
            expected: pattern.to_string(),
            observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Transport replaying scripted read chunks
    struct ScriptedTransport {
        chunks: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl ScriptedTransport {
        fn new(chunks: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                chunks: chunks.into(),
                written: Vec::new(),
            }
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(2));
                    Err(io::Error::new(ErrorKind::TimedOut, "no data"))
                }
            }
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedTransport {
        fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn channel(chunks: Vec<io::Result<Vec<u8>>>) -> CommandChannel<ScriptedTransport> {
        CommandChannel::new(ScriptedTransport::new(chunks), ChannelConfig::default())
    }

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.read_chunk, 128);
    }

    #[test]
    fn test_writes_command_with_crlf() {
        let mut ch = channel(vec![Ok(b"Z A\r\n".to_vec())]);
        let pattern = ResponsePattern::new("Z A").unwrap();
        let reply = ch
            .send_and_await(&Command::raw("Z").unwrap(), &pattern)
            .unwrap();
        assert_eq!(reply, b"Z A\r\n".to_vec());
        assert_eq!(ch.transport().written, b"Z\r\n".to_vec());
        assert_eq!(ch.counters().commands_sent, 1);
        assert_eq!(ch.counters().replies_matched, 1);
    }

    #[test]
    fn test_split_reply_is_accumulated() {
        let mut ch = channel(vec![
            Ok(b"S S   ".to_vec()),
            Ok(b" 12.3".to_vec()),
            Ok(b"4 g\r\n".to_vec()),
        ]);
        let pattern = ResponsePattern::new(r"S S +(\S+) (\S+)").unwrap();
        let reply = ch
            .send_and_await(&Command::raw("S").unwrap(), &pattern)
            .unwrap();
        assert_eq!(
            pattern.fields(&reply),
            Some(vec!["12.34".to_string(), "g".to_string()])
        );
    }

    #[test]
    fn test_timeout_reports_command_pattern_and_observed() {
        let mut ch = channel(vec![Ok(b"ES\r\n".to_vec())]);
        let pattern = ResponsePattern::new("Z A").unwrap();
        let start = Instant::now();
        let err = ch
            .send_and_await_within(
                &Command::raw("Z").unwrap(),
                &pattern,
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(1));
        match err {
            ProtocolError::Timeout {
                command,
                expected,
                observed,
            } => {
                assert_eq!(command, "Z");
                assert_eq!(expected, "Z A");
                assert_eq!(observed, "ES\r\n");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_aborts_wait() {
        let mut ch = channel(vec![Err(io::Error::new(
            ErrorKind::BrokenPipe,
            "unplugged",
        ))]);
        let pattern = ResponsePattern::new("Z A").unwrap();
        let err = ch
            .send_and_await(&Command::raw("Z").unwrap(), &pattern)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }

    #[test]
    fn test_eof_is_transport_error() {
        let mut ch = channel(vec![Ok(Vec::new())]);
        let pattern = ResponsePattern::new("Z A").unwrap();
        let err = ch
            .send_and_await(&Command::raw("Z").unwrap(), &pattern)
            .unwrap_err();
        match err {
            ProtocolError::Transport(e) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_before_send_writes_nothing() {
        let mut ch = channel(vec![Ok(b"Z A\r\n".to_vec())]);
        ch.cancel_token().cancel();
        let pattern = ResponsePattern::new("Z A").unwrap();
        let err = ch
            .send_and_await(&Command::raw("Z").unwrap(), &pattern)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Cancelled { .. }));
        assert!(ch.transport().written.is_empty());

        ch.reset_cancellation();
        assert!(ch
            .send_and_await(&Command::raw("Z").unwrap(), &pattern)
            .is_ok());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let mut ch = channel(Vec::new());
        let token = ch.cancel_token();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            token.cancel();
        });
        let pattern = ResponsePattern::new("Z A").unwrap();
        let start = Instant::now();
        let err = ch
            .send_and_await(&Command::raw("Z").unwrap(), &pattern)
            .unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, ProtocolError::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_uncancellable_ignores_token() {
        let mut ch = channel(vec![Ok(b"ST A\r\n".to_vec())]);
        ch.cancel_token().cancel();
        let pattern = ResponsePattern::new("ST [AL]").unwrap();
        assert!(ch
            .send_and_await_uncancellable(&Command::raw("ST 0").unwrap(), &pattern, None)
            .is_ok());
    }

    #[test]
    fn test_rejection_fails_before_timeout() {
        let mut ch = channel(vec![Ok(b"PWR I\r\n".to_vec())]);
        let pattern = ResponsePattern::new("PWR ([AL])").unwrap();
        let reject = ResponsePattern::new("ES|ET|EL|PWR [I+-]").unwrap();
        let start = Instant::now();
        let err = ch
            .send_and_await_or_reject(&Command::raw("PWR 1").unwrap(), &pattern, &reject)
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(1));
        match err {
            ProtocolError::Rejected { command, reply } => {
                assert_eq!(command, "PWR 1");
                assert_eq!(reply, "PWR I");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_unrepresentable_timeout_waits_without_deadline() {
        let mut ch = channel(vec![
            Err(io::Error::new(ErrorKind::TimedOut, "quiet")),
            Ok(b"Z A\r\n".to_vec()),
        ]);
        let pattern = ResponsePattern::new("Z A").unwrap();
        let reply = ch
            .send_and_await_within(&Command::raw("Z").unwrap(), &pattern, Duration::MAX)
            .unwrap();
        assert_eq!(reply, b"Z A\r\n".to_vec());
    }
}

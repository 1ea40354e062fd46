//! Scripted transport shared by the integration tests

#![allow(dead_code)]

use mtsics_core::protocol::Transport;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted read result
#[derive(Debug, Clone)]
pub enum MockRead {
    Data(Vec<u8>),
    Error(io::ErrorKind),
    Eof,
}

impl MockRead {
    pub fn data(bytes: &[u8]) -> Self {
        MockRead::Data(bytes.to_vec())
    }
}

#[derive(Default)]
struct MockState {
    reads: VecDeque<MockRead>,
    replies: HashMap<String, Vec<MockRead>>,
    inbox: Vec<u8>,
    written: Vec<String>,
    fail_writes: bool,
    closed: bool,
}

/// Mock serial port: replies are queued when a matching line is written,
/// and `clear_input` drops whatever is still pending like a real port
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reads` every time `command` is written
    pub fn on(&self, command: &str, reads: Vec<MockRead>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.to_string(), reads);
        self
    }

    /// Reply to `command` with a single line
    pub fn reply(&self, command: &str, line: &str) -> &Self {
        self.on(command, vec![MockRead::data(format!("{}\r\n", line).as_bytes())])
    }

    /// Make every write fail
    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    /// Lines written so far, without terminators
    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let next = self.state.lock().unwrap().reads.pop_front();
        match next {
            Some(MockRead::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.state
                        .lock()
                        .unwrap()
                        .reads
                        .push_front(MockRead::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
            Some(MockRead::Error(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Some(MockRead::Eof) => Ok(0),
            None => {
                // Quiet line: behave like a port with a short read timeout
                std::thread::sleep(Duration::from_millis(5));
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            }
        }
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        state.inbox.extend_from_slice(buf);
        while let Some(end) = state.inbox.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = state.inbox.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&line[..end]).into_owned();
            if let Some(reads) = state.replies.get(&text).cloned() {
                state.reads.extend(reads);
            }
            state.written.push(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().reads.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Frame line as emitted during continuous transmission
pub fn frame(value: &str) -> MockRead {
    MockRead::data(format!("ST {:>10} g\r\n", value).as_bytes())
}

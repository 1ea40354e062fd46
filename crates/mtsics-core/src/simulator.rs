//! Demo Mode - simulated MT-SICS balance
//!
//! An in-memory [`Transport`] that answers the catalog's commands the way a
//! balance would: noisy weights around a configurable load, `A`/`L`
//! acknowledgements that depend on simulated power, door and streaming state,
//! and continuous frames while `ST 1` is active.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crate::protocol::{DoorStatus, Transport};

/// Longest a read blocks when nothing is pending
const IDLE_READ: Duration = Duration::from_millis(5);

/// Simulated balance
pub struct SimulatedBalance {
    rng: StdRng,
    /// Gross load on the pan in grams
    load_g: f64,
    /// Peak-to-peak noise in grams
    noise_g: f64,
    zero_g: f64,
    tare_g: f64,
    powered: bool,
    streaming: bool,
    doors: DoorStatus,
    /// Units for host, display and info channels
    units: [String; 3],
    message: Option<String>,
    labels: Vec<(String, String)>,
    target: Vec<String>,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    frame_interval: Duration,
    last_frame: Option<Instant>,
    max_chunk: usize,
    read_timeout: Duration,
    closed: bool,
}

impl SimulatedBalance {
    /// Create a powered-on balance with a fixed seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            load_g: 0.0,
            noise_g: 0.0,
            zero_g: 0.0,
            tare_g: 0.0,
            powered: true,
            streaming: false,
            doors: DoorStatus::AllClosed,
            units: ["g".to_string(), "g".to_string(), "g".to_string()],
            message: None,
            labels: Vec::new(),
            target: Vec::new(),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            frame_interval: Duration::ZERO,
            last_frame: None,
            max_chunk: usize::MAX,
            read_timeout: IDLE_READ,
            closed: false,
        }
    }

    /// Put `grams` on the pan
    pub fn with_load(mut self, grams: f64) -> Self {
        self.load_g = grams;
        self
    }

    /// Add peak-to-peak noise of `grams` to every reading
    pub fn with_noise(mut self, grams: f64) -> Self {
        self.noise_g = grams.abs();
        self
    }

    /// Pause between continuous-mode frames
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Deliver output in reads of at most `bytes`, splitting replies
    pub fn with_max_chunk(mut self, bytes: usize) -> Self {
        self.max_chunk = bytes.max(1);
        self
    }

    /// Change the load while connected
    pub fn set_load(&mut self, grams: f64) {
        self.load_g = grams;
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Message currently overlaid on the display
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Result and task labels received, in order
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// Raw `A10` lines received, in order
    pub fn target_commands(&self) -> &[String] {
        &self.target
    }

    fn unit_factor(unit: &str) -> f64 {
        match unit {
            "mg" => 1000.0,
            "kg" => 0.001,
            "ct" => 5.0,
            _ => 1.0,
        }
    }

    fn sample(&mut self) -> f64 {
        let noise = if self.noise_g > 0.0 {
            self.rng.gen_range(-self.noise_g / 2.0..=self.noise_g / 2.0)
        } else {
            0.0
        };
        self.load_g + noise
    }

    fn host_value(&self, grams: f64) -> (f64, &str) {
        let unit = &self.units[0];
        (grams * Self::unit_factor(unit), unit.as_str())
    }

    fn net_reading(&mut self) -> String {
        let gross = self.sample();
        let (value, unit) = self.host_value(gross - self.zero_g - self.tare_g);
        format!("{:>10.2} {}", value, unit)
    }

    fn toggle(state: &mut bool, wanted: bool) -> &'static str {
        if *state == wanted {
            "L"
        } else {
            *state = wanted;
            "A"
        }
    }

    fn door(&mut self, wanted: DoorStatus) -> &'static str {
        if self.doors == wanted {
            "L"
        } else {
            self.doors = wanted;
            "A"
        }
    }

    fn respond(&mut self, line: &str) -> String {
        let mut parts = line.splitn(2, ' ');
        let verb = parts.next().unwrap_or_default();
        let args = parts.next().unwrap_or_default().trim();

        if !self.powered && verb != "PWR" {
            // Weight replies always carry the `S` verb
            let reply_verb = if verb == "SI" { "S" } else { verb };
            return format!("{} I", reply_verb);
        }

        match (verb, args) {
            ("S", "") => format!("S S {}", self.net_reading()),
            ("SI", "") => {
                let status = if self.noise_g > 0.0 && self.rng.gen_bool(0.3) {
                    "D"
                } else {
                    "S"
                };
                format!("S {} {}", status, self.net_reading())
            }
            ("T", "") => {
                self.tare_g = self.sample() - self.zero_g;
                let (value, unit) = self.host_value(self.tare_g);
                format!("T S {:>10.2} {}", value, unit)
            }
            ("Z", "") => {
                self.zero_g = self.load_g;
                self.tare_g = 0.0;
                "Z A".to_string()
            }
            ("PWR", "1") => format!("PWR {}", Self::toggle(&mut self.powered, true)),
            ("PWR", "0") => format!("PWR {}", Self::toggle(&mut self.powered, false)),
            ("A10", _) => {
                self.target.push(line.to_string());
                "A10 A".to_string()
            }
            ("A36", _) | ("A37", _) => match parse_label_pair(args) {
                Some(pair) => {
                    self.labels.push(pair);
                    format!("{} A", verb)
                }
                None => "ES".to_string(),
            },
            ("D", _) => {
                let text = args.trim_matches('"').to_string();
                self.message = (!text.is_empty()).then_some(text);
                "D A".to_string()
            }
            ("DW", "") => {
                self.message = None;
                "DW A".to_string()
            }
            ("M21", _) => self.unit_command(args),
            ("WS", "") => format!("WS A {}", self.doors.code()),
            ("WS", "0") => format!("WS {}", self.door(DoorStatus::AllClosed)),
            ("WS", "1") => format!("WS {}", self.door(DoorStatus::RightOpen)),
            ("WS", "2") => format!("WS {}", self.door(DoorStatus::LeftOpen)),
            ("ST", "1") => {
                self.last_frame = None;
                format!("ST {}", Self::toggle(&mut self.streaming, true))
            }
            ("ST", "0") => format!("ST {}", Self::toggle(&mut self.streaming, false)),
            _ => "ES".to_string(),
        }
    }

    fn unit_command(&mut self, args: &str) -> String {
        let mut parts = args.split_whitespace();
        let channel = match parts.next().and_then(|c| c.parse::<usize>().ok()) {
            Some(c) if c < self.units.len() => c,
            _ => return "M21 L".to_string(),
        };
        match parts.next() {
            None => format!("M21 A {} {}", channel, self.units[channel]),
            Some(unit) if unit.chars().all(|c| c.is_ascii_alphabetic()) => {
                self.units[channel] = unit.to_string();
                "M21 A".to_string()
            }
            Some(_) => "M21 L".to_string(),
        }
    }

    fn push_line(&mut self, line: &str) {
        self.outbox.extend(line.as_bytes());
        self.outbox.extend(b"\r\n");
    }

    fn maybe_emit_frame(&mut self) {
        if !self.streaming || !self.outbox.is_empty() {
            return;
        }
        let due = self
            .last_frame
            .map_or(true, |t| t.elapsed() >= self.frame_interval);
        if due {
            let frame = format!("ST {}", self.net_reading());
            self.push_line(&frame);
            self.last_frame = Some(Instant::now());
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "simulator closed"));
        }
        Ok(())
    }
}

fn parse_label_pair(args: &str) -> Option<(String, String)> {
    let rest = args.strip_prefix("1 ")?;
    let quoted: Vec<&str> = rest.split('"').collect();
    // ["", label, " ", value, ""]
    if quoted.len() != 5 {
        return None;
    }
    Some((quoted[1].to_string(), quoted[3].to_string()))
}

impl Read for SimulatedBalance {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.maybe_emit_frame();
        if self.outbox.is_empty() {
            std::thread::sleep(self.read_timeout.min(IDLE_READ));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.max_chunk).min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedBalance {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.inbox.extend_from_slice(buf);
        while let Some(end) = self.inbox.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.inbox.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&line[..end]).into_owned();
            let reply = self.respond(&text);
            tracing::trace!(command = %text, reply = %reply, "simulator");
            self.push_line(&reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedBalance {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.outbox.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.streaming = false;
        Ok(())
    }
}

//! Byte-stream transports
//!
//! The protocol core only needs blocking reads and writes with a bounded read
//! timeout. Framing is handled by [`super::CommandChannel`].

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use super::{open_port, Result, SerialConfig};

/// Duplex byte stream connected to a balance
pub trait Transport: Read + Write + Send {
    /// Bound how long a single `read` may block
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any bytes received but not yet read
    fn clear_input(&mut self) -> io::Result<()>;

    /// Release the underlying connection
    fn close(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port: Some(port) }
    }

    /// Open and configure the port named in `config`
    pub fn open(config: &SerialConfig) -> Result<Self> {
        Ok(Self::new(open_port(config)?))
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port()?.flush()
    }
}

impl Transport for SerialTransport {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port()?.set_timeout(timeout).map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the handle closes the device
        self.port.take();
        Ok(())
    }
}

/// TCP stream wrapper implementing [`Transport`], for balances on Ethernet
/// or behind a serial-to-TCP bridge
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Connect to `addr` with the given read timeout
    pub fn connect(addr: &str, read_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout))?;
        Ok(Self::new(stream))
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        // No flush syscall for a socket's receive queue: drain it non-blocking
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

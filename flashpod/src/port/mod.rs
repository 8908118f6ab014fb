//! Transport abstraction for the pod's byte stream.
//!
//! The protocol engine is written against the [`Port`] trait so the
//! command/response logic stays independent of the actual serial driver:
//!
//! ```text
//! +--------------------+
//! |  Protocol Engine   |
//! | (engine, catalog)  |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     Port Trait     |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |  Native SerialPort |
//! |    (serialport)    |
//! +--------------------+
//! ```
//!
//! Native platforms (Linux, macOS, Windows) use the `serialport` crate via
//! [`NativePort`]; tests substitute an in-memory implementation.

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Flow control. The pod uses hardware (RTS/CTS) flow control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 500_000,
            timeout: Duration::from_millis(1000),
            flow_control: FlowControl::Hardware,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    None,
    /// Hardware flow control (RTS/CTS).
    #[default]
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Which transport buffer to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearDirection {
    /// Discard unread input bytes.
    Input,
    /// Discard unsent output bytes.
    Output,
    /// Discard both directions.
    All,
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Unified port trait for the pod's duplex byte stream.
///
/// Besides plain reads and writes the engine needs exactly four things from
/// a transport: a read timeout, the count of already-buffered input bytes,
/// buffer discarding, and an explicit close.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Number of bytes currently buffered and readable without blocking.
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Discard buffered bytes in the given direction.
    fn clear(&mut self, direction: ClearDirection) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;

    /// Find ports matching the given VID/PID.
    fn find_by_vid_pid(vid: u16, pid: u16) -> Result<Vec<PortInfo>> {
        let ports = Self::list_ports()?;
        Ok(ports
            .into_iter()
            .filter(|p| p.vid == Some(vid) && p.pid == Some(pid))
            .collect())
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

/// In-memory port used by the protocol tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::{ClearDirection, Port};
    use crate::error::Result;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock transport with independent read/write buffers.
    ///
    /// The read buffer is a script of future device output; an empty script
    /// yields `TimedOut`, matching the serial driver's behavior. Written
    /// bytes and poll counts are observable through shared handles because
    /// attaching the port to a session consumes it.
    pub(crate) struct MockPort {
        read_buf: Arc<Mutex<VecDeque<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
        polls: Arc<AtomicUsize>,
        timeout: Duration,
    }

    impl MockPort {
        pub(crate) fn new(script: &[u8]) -> Self {
            Self {
                read_buf: Arc::new(Mutex::new(script.iter().copied().collect())),
                written: Arc::new(Mutex::new(Vec::new())),
                polls: Arc::new(AtomicUsize::new(0)),
                timeout: Duration::from_millis(10),
            }
        }

        /// Handle to everything the engine has written so far.
        pub(crate) fn written_handle(&self) -> Arc<Mutex<Vec<u8>>> {
            Arc::clone(&self.written)
        }

        /// Handle to the number of `bytes_to_read` probes performed.
        pub(crate) fn polls_handle(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.polls)
        }

        /// Handle allowing a test to feed more device output later.
        pub(crate) fn script_handle(&self) -> Arc<Mutex<VecDeque<u8>>> {
            Arc::clone(&self.read_buf)
        }
    }

    impl std::io::Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut script = self.read_buf.lock().expect("mock script lock");
            if script.is_empty() {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(script.len());
            for b in buf.iter_mut().take(n) {
                *b = script.pop_front().expect("script length checked");
            }
            Ok(n)
        }
    }

    impl std::io::Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().expect("mock write lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn bytes_to_read(&mut self) -> Result<u32> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let len = self.read_buf.lock().expect("mock script lock").len();
            Ok(u32::try_from(len).unwrap_or(u32::MAX))
        }

        // Scripted bytes model FUTURE device output, not stale input, so a
        // buffer clear is recorded but leaves the script intact.
        fn clear(&mut self, _direction: ClearDirection) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }
}

//! Command transaction engine.
//!
//! A [`Session`] owns the transport and executes one command transaction at
//! a time. Each transaction claims exclusive access to the byte stream for
//! its full duration (command write plus every retried reply read), which
//! locks out the background log poller until the guard drops. The poller
//! side uses a non-blocking probe ([`Session::drain_available`]) so the
//! host stays responsive while a transaction is in flight.
//!
//! ## Retry discipline
//!
//! The pod shares one stream between command replies and asynchronous log
//! output, so the line after a command is not always the reply. For tagged
//! exchanges the engine re-reads (never re-sends) up to a fixed bound of
//! lines until the expected tag shows up. Commands with side effects
//! (delete, format) are therefore never duplicated by the retry path.

use crate::error::{Error, Result};
use crate::port::{ClearDirection, Port};
use crate::protocol::frame::{Command, TaggedReply, matches_tag};
use log::{debug, trace, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

/// Total line reads attempted before a tagged exchange gives up.
pub const MAX_TAG_ATTEMPTS: u32 = 3;

/// Cap on a single reply line; a stray binary flood is returned as-is
/// rather than growing without bound.
const MAX_LINE_LEN: usize = 4096;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Baud rate used when opening the transport.
    pub baud_rate: u32,
    /// Reply-read timeout, fixed per connection. The upload acknowledgement
    /// is the one exception; it scales with payload size.
    pub read_timeout: Duration,
    /// Tick interval for the log poller.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: 500_000,
            read_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl SessionConfig {
    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the reply-read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Set the log poller tick interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// A connection to the pod.
///
/// Generic over the transport type `P` so the protocol logic can run
/// against any [`Port`] implementation. State is Disconnected (no port
/// attached) or Connected; exactly one session exists per device link.
/// Cloning is cheap and shares the underlying transport slot, which is how
/// the log poller observes the same connection.
pub struct Session<P: Port> {
    transport: Arc<Mutex<Option<P>>>,
    config: SessionConfig,
}

impl<P: Port> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

impl<P: Port> Default for Session<P> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl<P: Port> Session<P> {
    /// Create a disconnected session with the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            transport: Arc::new(Mutex::new(None)),
            config,
        }
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<P>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach an already-open transport, moving the session to Connected.
    pub fn attach(&self, port: P) -> Result<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(Error::AlreadyConnected);
        }
        debug!("Attached transport {}", port.name());
        *slot = Some(port);
        Ok(())
    }

    /// Whether a transport is currently attached.
    ///
    /// Non-blocking: a contended slot is reported as connected, since only
    /// an in-flight transaction can hold it for longer than a poller probe.
    pub fn is_connected(&self) -> bool {
        match self.transport.try_lock() {
            Ok(slot) => slot.is_some(),
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(e)) => e.into_inner().is_some(),
        }
    }

    /// Close and detach the transport.
    ///
    /// A no-op when already disconnected. Fails with [`Error::Busy`] while
    /// a command transaction holds the transport; transactions always run
    /// to completion and are never aborted mid-exchange.
    pub fn disconnect(&self) -> Result<()> {
        let mut slot = match self.transport.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::WouldBlock) => return Err(Error::Busy),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        match slot.take() {
            Some(mut port) => {
                debug!("Disconnecting from {}", port.name());
                port.close()
            },
            None => Ok(()),
        }
    }

    /// Begin a command transaction, claiming exclusive transport access.
    ///
    /// The claim is held until the returned [`Transaction`] drops. The log
    /// poller backs off without blocking for the whole window.
    pub fn transaction(&self) -> Result<Transaction<'_, P>> {
        let guard = self.slot();
        if guard.is_none() {
            return Err(Error::NotConnected);
        }
        Ok(Transaction {
            guard,
            config: &self.config,
        })
    }

    /// Execute a command with an opaque one-line reply.
    ///
    /// A missing reply is a [`Error::Timeout`]; opaque exchanges are never
    /// retried.
    pub fn execute_opaque(&self, command: &Command) -> Result<Vec<u8>> {
        let mut tx = self.transaction()?;
        tx.send(command)?;
        tx.read_line()
    }

    /// Execute a command whose structured reply carries the given tag.
    pub fn execute_tagged(&self, command: &Command, tag: &'static str) -> Result<TaggedReply> {
        let mut tx = self.transaction()?;
        tx.send(command)?;
        tx.read_tagged(tag)
    }

    /// Non-blocking drain of whatever input bytes are currently buffered.
    ///
    /// Returns `Ok(None)` when the transport is claimed by a transaction,
    /// disconnected, or simply has nothing buffered. This is the log
    /// poller's per-tick probe: it must never wait on the lock or on the
    /// stream.
    pub fn drain_available(&self) -> Result<Option<Vec<u8>>> {
        let mut slot = match self.transport.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        let Some(port) = slot.as_mut() else {
            return Ok(None);
        };

        let available = port.bytes_to_read()?;
        if available == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; available as usize];
        port.read_exact(&mut buf)?;
        trace!("Drained {} unsolicited bytes", buf.len());
        Ok(Some(buf))
    }
}

/// An in-flight command transaction holding exclusive transport access.
pub struct Transaction<'a, P: Port> {
    guard: MutexGuard<'a, Option<P>>,
    config: &'a SessionConfig,
}

impl<P: Port> Transaction<'_, P> {
    fn port(&mut self) -> &mut P {
        self.guard
            .as_mut()
            .expect("transaction is only created while a transport is attached")
    }

    /// Discard stale bytes and write an encoded command.
    ///
    /// Both buffer directions are cleared first so unsolicited output queued
    /// before the transaction cannot be mistaken for this command's reply.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        let data = command.encode();
        trace!("Sending {:?}: {} bytes", command.opcode(), data.len());

        let port = self.port();
        port.clear(ClearDirection::All)?;
        port.write_all(&data)?;
        port.flush()?;
        Ok(())
    }

    /// Write raw bytes with no framing (upload content path).
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.port().write_all(data)?;
        Ok(())
    }

    /// Flush pending output.
    pub fn flush(&mut self) -> Result<()> {
        self.port().flush()?;
        Ok(())
    }

    /// Read one reply line with the session's configured timeout.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        self.read_line_with(self.config.read_timeout)
    }

    /// Read one reply line with an explicit timeout.
    ///
    /// The returned bytes have the trailing newline (and a preceding CR, if
    /// any) stripped. This is the engine's only suspension point.
    pub fn read_line_with(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();
        let port = self.port();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "no reply line within {}ms",
                    timeout.as_millis()
                )));
            }
            port.set_timeout(deadline - now)?;

            let mut byte = [0u8; 1];
            match port.read(&mut byte) {
                Ok(0) => {},
                Ok(_) => {
                    if byte[0] == b'\n' {
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        return Ok(line);
                    }
                    line.push(byte[0]);
                    if line.len() >= MAX_LINE_LEN {
                        warn!("Reply line exceeded {MAX_LINE_LEN} bytes; treating as complete");
                        return Ok(line);
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "no reply line within {}ms",
                        timeout.as_millis()
                    )));
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Read lines until one carries the expected tag, bounded by
    /// [`MAX_TAG_ATTEMPTS`] total reads.
    ///
    /// Stray lines and read timeouts both consume an attempt; the command
    /// itself is never re-sent. Exhausting the bound yields
    /// [`Error::ProtocolMismatch`].
    pub fn read_tagged(&mut self, tag: &'static str) -> Result<TaggedReply> {
        for attempt in 1..=MAX_TAG_ATTEMPTS {
            match self.read_line() {
                Ok(line) if matches_tag(&line, tag) => {
                    trace!("Got \"{tag}\" reply on attempt {attempt}");
                    return TaggedReply::parse(tag, &line);
                },
                Ok(line) => {
                    debug!(
                        "Skipping stray line while waiting for \"{tag}\" \
                         (attempt {attempt}/{MAX_TAG_ATTEMPTS}): {:?}",
                        String::from_utf8_lossy(&line)
                    );
                },
                Err(Error::Timeout(_)) => {
                    debug!(
                        "No line before timeout while waiting for \"{tag}\" \
                         (attempt {attempt}/{MAX_TAG_ATTEMPTS})"
                    );
                },
                Err(e) => return Err(e),
            }
        }

        warn!("No \"{tag}\" reply within {MAX_TAG_ATTEMPTS} read attempts");
        Err(Error::ProtocolMismatch {
            expected: tag,
            attempts: MAX_TAG_ATTEMPTS,
        })
    }
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{Result, Session};
    use crate::port::{NativePort, SerialConfig};
    use log::info;
    use std::thread;
    use std::time::Duration;

    /// Delay after opening the port before the first command, giving the
    /// device time to notice the host.
    const SETTLE_DELAY: Duration = Duration::from_millis(250);

    impl Session<NativePort> {
        /// Open a serial port and move the session to Connected.
        pub fn connect(&self, port_name: &str) -> Result<()> {
            let serial = SerialConfig::new(port_name, self.config().baud_rate)
                .with_timeout(self.config().read_timeout);
            let port = NativePort::open(&serial)?;
            self.attach(port)?;
            info!("Connected to {port_name}");

            // Boot chatter queued during the settle window is left for the
            // log poller; transactions discard it themselves.
            thread::sleep(SETTLE_DELAY);
            Ok(())
        }
    }
}

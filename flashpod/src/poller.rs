//! Background log poller.
//!
//! The pod emits asynchronous log text on the same stream that carries
//! command replies. The poller is a recurring task that drains whatever
//! bytes are buffered whenever no command transaction holds the transport.
//! The contract:
//!
//! - Each tick uses a non-blocking probe. If a transaction holds the
//!   transport the tick is skipped entirely; the poller never waits for
//!   the lock and performs zero reads while a transaction is in flight.
//! - Drained bytes are forwarded verbatim, in order, with no line
//!   buffering across ticks. Display-side text reassembly is the
//!   consumer's job ([`drain_utf8_lossy`] helps with split UTF-8).
//! - While the session is disconnected the poller idles without reading;
//!   it resumes on its own once a transport is attached again.

use crate::port::Port;
use crate::protocol::engine::Session;
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Handle to the background log-polling thread.
///
/// Dropping the handle stops the thread. Receivers hang up implicitly when
/// dropped, which also ends the thread at its next forwarded chunk.
pub struct LogPoller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LogPoller {
    /// Start polling the session's transport at its configured interval.
    ///
    /// Returns the handle plus the receiving end of the log stream. Chunks
    /// are raw bytes exactly as drained from the device.
    pub fn spawn<P>(session: Session<P>) -> (Self, mpsc::Receiver<Vec<u8>>)
    where
        P: Port + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let interval = session.config().poll_interval;

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                match session.drain_available() {
                    Ok(Some(chunk)) => {
                        if tx.send(chunk).is_err() {
                            break;
                        }
                    },
                    Ok(None) => {},
                    Err(e) => {
                        // Transport hiccups are the transaction path's
                        // problem to surface; the poller just keeps ticking.
                        trace!("Log poll failed: {e}");
                    },
                }
                thread::sleep(interval);
            }
        });

        (
            Self {
                stop,
                handle: Some(handle),
            },
            rx,
        )
    }

    /// Stop the polling thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drain buffered bytes into displayable UTF-8 text without stalling on
/// invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - An incomplete UTF-8 suffix is kept in `buffer` for the next chunk.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('\u{FFFD}');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::testing::MockPort;
    use crate::protocol::engine::SessionConfig;
    use std::time::Duration;

    #[test]
    fn test_poller_backs_off_while_transaction_holds_transport() {
        let port = MockPort::new(b"queued log output");
        let polls = port.polls_handle();
        let session = Session::new(
            SessionConfig::default().with_poll_interval(Duration::from_millis(2)),
        );
        session.attach(port).unwrap();

        // Claim the transport before the poller starts so the whole window
        // is covered; every tick in it must skip without touching the port.
        let guard = session.transaction().unwrap();
        let (poller, rx) = LogPoller::spawn(session.clone());
        thread::sleep(Duration::from_millis(60));
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        drop(guard);

        // Claim released: the poller resumes and forwards the buffered
        // bytes verbatim.
        let chunk = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("poller should resume after release");
        assert_eq!(chunk, b"queued log output");
        assert!(polls.load(Ordering::SeqCst) > 0);

        poller.stop();
    }

    #[test]
    fn test_poller_forwards_chunks_in_order() {
        let port = MockPort::new(b"first");
        let script = port.script_handle();
        let session = Session::new(
            SessionConfig::default().with_poll_interval(Duration::from_millis(2)),
        );
        session.attach(port).unwrap();

        let (poller, rx) = LogPoller::spawn(session);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, b"first");

        script.lock().unwrap().extend(b"second".iter().copied());
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(second, b"second");

        poller.stop();
    }

    #[test]
    fn test_poller_idles_when_disconnected() {
        let session: Session<MockPort> = Session::new(
            SessionConfig::default().with_poll_interval(Duration::from_millis(2)),
        );
        let (poller, rx) = LogPoller::spawn(session);

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        poller.stop();
    }

    #[test]
    fn test_drain_utf8_lossy_replaces_invalid_bytes_and_continues() {
        let mut buf = vec![0xFF, b'A', 0xFE, b'B'];
        let out = drain_utf8_lossy(&mut buf);
        assert_eq!(out, "\u{FFFD}A\u{FFFD}B");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_utf8_lossy_keeps_incomplete_suffix() {
        let mut buf = vec![0xE4, 0xBD]; // incomplete UTF-8 for '你'
        let out = drain_utf8_lossy(&mut buf);
        assert_eq!(out, "");
        assert_eq!(buf, vec![0xE4, 0xBD]);

        buf.push(0xA0);
        let out2 = drain_utf8_lossy(&mut buf);
        assert_eq!(out2, "你");
        assert!(buf.is_empty());
    }
}

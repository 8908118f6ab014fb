//! Device log monitor command implementation.

use anyhow::Result;
use console::style;
use flashpod::{LogPoller, NativePort, Session, drain_utf8_lossy};
use std::io::{self, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

/// Stream the device log until Ctrl-C.
///
/// The background poller drains device bytes whenever no command
/// transaction is active and hands them over a channel; this loop
/// reassembles the chunks into displayable UTF-8 and prints them. Split
/// multi-byte sequences at chunk boundaries are held back until the rest
/// arrives.
pub(crate) fn cmd_monitor(session: &Session<NativePort>, quiet: bool) -> Result<()> {
    if !quiet {
        eprintln!(
            "{} Streaming device log (Ctrl-C to exit)",
            style("📡").cyan()
        );
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))?;
    flashpod::set_interrupt_checker(move || interrupted.load(Ordering::SeqCst));

    let (poller, log_rx) = LogPoller::spawn(session.clone());

    let mut pending: Vec<u8> = Vec::new();
    let mut stdout = io::stdout();
    while !flashpod::is_interrupt_requested() {
        match log_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => {
                pending.extend_from_slice(&chunk);
                let text = drain_utf8_lossy(&mut pending);
                if !text.is_empty() {
                    stdout.write_all(text.as_bytes())?;
                    stdout.flush()?;
                }
            },
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Stop the poller before disconnecting so the transport is free.
    poller.stop();

    if !quiet {
        eprintln!();
        eprintln!("{} Monitor stopped", style("✓").green());
    }
    Ok(())
}

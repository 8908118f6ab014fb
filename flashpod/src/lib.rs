//! # flashpod
//!
//! A library for managing serial-attached flash storage pods.
//!
//! This crate provides the host side of the pod protocol: a small
//! opcode-framed command set over a serial link, with an always-on
//! asynchronous log stream sharing the same bytes. It includes:
//!
//! - Transport abstraction over the serial link
//! - Command framing and structured-reply parsing
//! - A transaction engine with bounded tag-retry
//! - File catalog operations (list, upload, download, delete)
//! - Device telemetry (identity, flash capacity, format)
//! - A background log poller that cooperates with command transactions
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use flashpod::{LogPoller, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(SessionConfig::default());
//!     session.connect("/dev/ttyACM0")?;
//!
//!     println!("Device: {}", session.identity()?);
//!     if let Some(pct) = session.flash_info()?.used_percent() {
//!         println!("Flash {pct:.1}% used");
//!     }
//!     for entry in session.list_files()? {
//!         println!("  {}", entry.display_name());
//!     }
//!
//!     // Stream asynchronous device log output between commands.
//!     let (_poller, log_rx) = LogPoller::spawn(session.clone());
//!     if let Ok(chunk) = log_rx.recv() {
//!         print!("{}", String::from_utf8_lossy(&chunk));
//!     }
//!
//!     session.disconnect()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod catalog;
pub mod device;
pub mod error;
pub mod poller;
pub mod port;
pub mod protocol;
pub mod telemetry;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    catalog::FileEntry,
    device::{
        DetectedPort, DeviceKind, TransportKind, auto_detect_port, detect_ports,
        format_port_list, list_port_names,
    },
    error::{Error, Result},
    poller::{LogPoller, drain_utf8_lossy},
    port::{ClearDirection, FlowControl, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::engine::{MAX_TAG_ATTEMPTS, Session, SessionConfig, Transaction},
    protocol::frame::{Command, Opcode, PAYLOAD_TERMINATOR, TaggedReply},
    telemetry::FlashInfo,
};

//! Device telemetry: identity, flash capacity, and flash format.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::engine::Session;
use crate::protocol::frame::{Command, Opcode};
use log::debug;

/// Flash capacity as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashInfo {
    /// Total flash size in bytes.
    pub total_bytes: u64,
    /// Remaining free space in bytes.
    pub free_bytes: u64,
}

impl FlashInfo {
    /// Bytes currently in use.
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    /// Used capacity as a percentage, `None` for a zero-size flash.
    #[allow(clippy::cast_precision_loss)]
    pub fn used_percent(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some(self.used_bytes() as f64 / self.total_bytes as f64 * 100.0)
    }
}

impl<P: Port> Session<P> {
    /// Query the device's identity/welcome line.
    pub fn identity(&self) -> Result<String> {
        let line = self.execute_opaque(&Command::bare(Opcode::Identity))?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Query flash capacity.
    ///
    /// The tagged reply carries two numeric fields, total then free. A free
    /// count above the total is rejected as malformed rather than producing
    /// a nonsense capacity figure.
    pub fn flash_info(&self) -> Result<FlashInfo> {
        let reply = self.execute_tagged(&Command::bare(Opcode::FlashInfo), "A5")?;
        if reply.field_count() > 2 {
            debug!(
                "Flash info reply has {} fields; using the first two",
                reply.field_count()
            );
        }

        let total_bytes = reply.field_u64(0)?;
        let free_bytes = reply.field_u64(1)?;
        if free_bytes > total_bytes {
            return Err(Error::Format(format!(
                "free bytes {free_bytes} exceed total {total_bytes}"
            )));
        }

        Ok(FlashInfo {
            total_bytes,
            free_bytes,
        })
    }

    /// Erase the entire flash chip.
    ///
    /// Returns the device's acknowledgement text. Any catalog or capacity
    /// data held by the caller is stale afterwards.
    pub fn format_flash(&self) -> Result<String> {
        let ack = self.execute_opaque(&Command::bare(Opcode::FormatFlash))?;
        Ok(String::from_utf8_lossy(&ack).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::testing::MockPort;
    use crate::protocol::engine::SessionConfig;
    use std::time::Duration;

    fn session_with_script(script: &[u8]) -> Session<MockPort> {
        let session = Session::new(
            SessionConfig::default().with_read_timeout(Duration::from_millis(50)),
        );
        session.attach(MockPort::new(script)).unwrap();
        session
    }

    #[test]
    fn test_identity_returns_text() {
        let session = session_with_script(b"flashpod fw 1.4 (256MB)\r\n");
        assert_eq!(session.identity().unwrap(), "flashpod fw 1.4 (256MB)");
    }

    #[test]
    fn test_flash_info_scenario() {
        let session = session_with_script(b"A5,1048576,262144\n");
        let info = session.flash_info().unwrap();
        assert_eq!(info.total_bytes, 1048576);
        assert_eq!(info.free_bytes, 262144);
        assert_eq!(info.used_bytes(), 786432);
        let pct = info.used_percent().unwrap();
        assert!((pct - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_used_percent_bounds() {
        let empty = FlashInfo {
            total_bytes: 4096,
            free_bytes: 4096,
        };
        assert!((empty.used_percent().unwrap() - 0.0).abs() < f64::EPSILON);

        let full = FlashInfo {
            total_bytes: 4096,
            free_bytes: 0,
        };
        assert!((full.used_percent().unwrap() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_used_percent_undefined_for_zero_total() {
        let info = FlashInfo {
            total_bytes: 0,
            free_bytes: 0,
        };
        assert!(info.used_percent().is_none());
    }

    #[test]
    fn test_flash_info_rejects_garbage_fields() {
        let session = session_with_script(b"A5,lots,little\n");
        assert!(matches!(session.flash_info(), Err(Error::Format(_))));
    }

    #[test]
    fn test_flash_info_rejects_free_above_total() {
        let session = session_with_script(b"A5,100,200\n");
        assert!(matches!(session.flash_info(), Err(Error::Format(_))));
    }

    #[test]
    fn test_flash_info_missing_field() {
        let session = session_with_script(b"A5,100\n");
        assert!(matches!(session.flash_info(), Err(Error::Format(_))));
    }

    #[test]
    fn test_flash_info_mismatch_after_three_reads() {
        let session = session_with_script(b"log\nlog\nlog\n");
        assert!(matches!(
            session.flash_info(),
            Err(Error::ProtocolMismatch { expected: "A5", .. })
        ));
    }

    #[test]
    fn test_format_flash_returns_ack_text() {
        let session = session_with_script(b"format complete\n");
        assert_eq!(session.format_flash().unwrap(), "format complete");
    }
}

//! File catalog operations: list, upload, download, delete.
//!
//! Each operation is a short sequence of framed transactions on top of the
//! engine. The device is the source of truth for the catalog: entries come
//! back in device order, are not deduplicated, and nothing is cached here.
//! After a mutating operation (upload, delete, format) the caller refreshes
//! the catalog and flash info itself.

use crate::error::Result;
use crate::port::Port;
use crate::protocol::engine::{Session, SessionConfig};
use crate::protocol::frame::{Command, Opcode};
use log::{debug, trace};
use std::borrow::Cow;
use std::time::Duration;

/// Chunk size for streaming upload content to the transport.
const UPLOAD_CHUNK: usize = 4096;

/// One file reported by the device.
///
/// Names are byte strings: the device stores whatever the uploader sent,
/// so no character-set assumption is made here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    name: Vec<u8>,
}

impl FileEntry {
    /// Wrap a raw name as reported by the device.
    pub fn new(name: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into() }
    }

    /// The raw name bytes.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// The name as display text (lossy).
    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Acknowledgement timeout for an upload, scaled to the payload.
///
/// 10 bits per byte on the wire (8N1 plus start bit), plus headroom for the
/// device to commit the data to flash before it acknowledges.
fn upload_ack_timeout(config: &SessionConfig, content_len: usize) -> Duration {
    let wire_ms =
        (content_len as u64).saturating_mul(10_000) / u64::from(config.baud_rate.max(1));
    config.read_timeout + Duration::from_millis(wire_ms + 500)
}

impl<P: Port> Session<P> {
    /// Fetch the catalog of files currently stored on the device.
    ///
    /// The tagged header supplies a count `n`; exactly `n` raw lines follow,
    /// one per entry, taken as-is. An empty catalog is a success, not an
    /// error. The listing ends with one status line which is consumed and
    /// logged.
    pub fn list_files(&self) -> Result<Vec<FileEntry>> {
        let mut tx = self.transaction()?;
        tx.send(&Command::bare(Opcode::ListFiles))?;

        let header = tx.read_tagged("A1")?;
        let count = header.field_u64(0)?;

        let mut entries = Vec::with_capacity(usize::try_from(count.min(1024)).unwrap_or(0));
        for _ in 0..count {
            entries.push(FileEntry::new(tx.read_line()?));
        }

        match tx.read_line() {
            Ok(line) => debug!(
                "File list terminator: {:?}",
                String::from_utf8_lossy(&line)
            ),
            Err(e) => trace!("File list terminator missing: {e}"),
        }

        Ok(entries)
    }

    /// Delete a file by name.
    ///
    /// The name payload is sent without the `0x00` terminator that upload
    /// uses. Success is the device's acknowledgement line arriving before
    /// the timeout; the catalog is not refreshed automatically.
    pub fn delete_file(&self, name: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let ack = self.execute_opaque(&Command::with_unterminated_payload(
            Opcode::DeleteFile,
            name.as_ref().to_vec(),
        ))?;
        debug!("Delete ack: {:?}", String::from_utf8_lossy(&ack));
        Ok(ack)
    }

    /// Request a file download.
    ///
    /// The device acknowledges the request with one line, which is returned.
    /// The bulk payload transfer that should follow is not specified by the
    /// device protocol; until the firmware defines it, this operation only
    /// performs the request/acknowledge exchange.
    pub fn download_file(&self) -> Result<Vec<u8>> {
        let ack = self.execute_opaque(&Command::bare(Opcode::DownloadFile))?;
        debug!("Download ack: {:?}", String::from_utf8_lossy(&ack));
        Ok(ack)
    }

    /// Upload a file.
    ///
    /// The filename goes out through the normal encode path (terminated),
    /// then the raw content bytes follow with no further framing or
    /// chunk headers. The acknowledgement timeout scales with content size.
    /// `progress` is called with (bytes sent, total) as content streams out.
    ///
    /// Content size is not limited here; the device reports exhaustion
    /// through a later flash-info query.
    pub fn upload_file<F>(&self, name: &str, content: &[u8], mut progress: F) -> Result<Vec<u8>>
    where
        F: FnMut(usize, usize),
    {
        let mut tx = self.transaction()?;
        tx.send(&Command::with_payload(
            Opcode::UploadFile,
            name.as_bytes().to_vec(),
        ))?;

        let total = content.len();
        let mut sent = 0;
        for chunk in content.chunks(UPLOAD_CHUNK) {
            tx.write_raw(chunk)?;
            sent += chunk.len();
            progress(sent, total);
        }
        tx.flush()?;

        let ack = tx.read_line_with(upload_ack_timeout(self.config(), total))?;
        debug!("Upload ack: {:?}", String::from_utf8_lossy(&ack));
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::testing::MockPort;

    fn session_with_script(
        script: &[u8],
    ) -> (Session<MockPort>, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let port = MockPort::new(script);
        let written = port.written_handle();
        let session = Session::new(
            SessionConfig::default().with_read_timeout(Duration::from_millis(50)),
        );
        session.attach(port).unwrap();
        (session, written)
    }

    #[test]
    fn test_list_files_empty() {
        let (session, written) = session_with_script(b"A1,0\r\nlist done\r\n");
        let entries = session.list_files().unwrap();
        assert!(entries.is_empty());
        assert_eq!(*written.lock().unwrap(), vec![0xA1]);
    }

    #[test]
    fn test_list_files_single() {
        let (session, _) = session_with_script(b"A1,1\nsave1.dat\nlist done\n");
        let entries = session.list_files().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), b"save1.dat");
        assert_eq!(entries[0].display_name(), "save1.dat");
    }

    #[test]
    fn test_list_files_many_preserves_device_order() {
        let (session, _) =
            session_with_script(b"A1,3\nzelda.sav\nmario.sav\nzelda.sav\nlist done\n");
        let entries = session.list_files().unwrap();
        let names: Vec<&[u8]> = entries.iter().map(FileEntry::name).collect();
        // Duplicates stay: the device is the source of truth.
        assert_eq!(
            names,
            vec![&b"zelda.sav"[..], &b"mario.sav"[..], &b"zelda.sav"[..]]
        );
    }

    #[test]
    fn test_list_files_reads_exactly_count_entries() {
        // Count says 1; the second name-looking line is the terminator slot
        // and must not become an entry.
        let (session, _) = session_with_script(b"A1,1\nfirst.bin\nsecond.bin\n");
        let entries = session.list_files().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), b"first.bin");
    }

    #[test]
    fn test_list_files_skips_stray_line_before_header() {
        let (session, _) = session_with_script(b"mount: ok\nA1,1\na.bin\ndone\n");
        let entries = session.list_files().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_list_files_tolerates_missing_terminator() {
        let (session, _) = session_with_script(b"A1,1\nonly.bin\n");
        let entries = session.list_files().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_delete_sends_name_without_terminator() {
        let (session, written) = session_with_script(b"deleted\n");
        let ack = session.delete_file("save.dat").unwrap();
        assert_eq!(ack, b"deleted");
        assert_eq!(*written.lock().unwrap(), b"\xA4save.dat".to_vec());
    }

    #[test]
    fn test_download_returns_ack() {
        let (session, written) = session_with_script(b"ready\n");
        let ack = session.download_file().unwrap();
        assert_eq!(ack, b"ready");
        assert_eq!(*written.lock().unwrap(), vec![0xA2]);
    }

    #[test]
    fn test_upload_wire_format() {
        // Opcode, name, single 0x00, then the raw content with no framing.
        let (session, written) = session_with_script(b"stored\n");
        let ack = session
            .upload_file("a.bin", &[0x01, 0x02], |_, _| {})
            .unwrap();
        assert_eq!(ack, b"stored");
        assert_eq!(*written.lock().unwrap(), b"\xA3a.bin\x00\x01\x02".to_vec());
    }

    #[test]
    fn test_upload_reports_progress() {
        let (session, _) = session_with_script(b"stored\n");
        let content = vec![0xAB; UPLOAD_CHUNK + 16];
        let mut calls = Vec::new();
        session
            .upload_file("big.bin", &content, |sent, total| calls.push((sent, total)))
            .unwrap();
        assert_eq!(
            calls,
            vec![
                (UPLOAD_CHUNK, UPLOAD_CHUNK + 16),
                (UPLOAD_CHUNK + 16, UPLOAD_CHUNK + 16)
            ]
        );
    }

    #[test]
    fn test_upload_empty_content_still_waits_for_ack() {
        let (session, written) = session_with_script(b"stored\n");
        let ack = session.upload_file("empty.bin", &[], |_, _| {}).unwrap();
        assert_eq!(ack, b"stored");
        assert_eq!(*written.lock().unwrap(), b"\xA3empty.bin\x00".to_vec());
    }

    #[test]
    fn test_upload_ack_timeout_scales_with_size() {
        let config = SessionConfig::default();
        let small = upload_ack_timeout(&config, 0);
        let large = upload_ack_timeout(&config, 10 * 1024 * 1024);
        assert!(large > small);
        assert!(small >= config.read_timeout);
    }
}

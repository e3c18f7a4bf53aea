//! .swbd snapshot file format for the session ledger.

use std::io::{Read, Write};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{Message, Session, SwitchboardError, SwitchboardResult, Task};

/// Magic bytes: "SWBD"
const SWBD_MAGIC: u32 = 0x53574244;

/// Current format version.
const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
const HEADER_SIZE: usize = 64;

/// Upper bound on the payload a reader will allocate for.
const MAX_PAYLOAD: u64 = 1 << 32;

/// Everything persisted in one snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub sessions: Vec<Session>,
    pub messages: Vec<Message>,
    pub tasks: Vec<Task>,
}

/// Counts and timestamps read from a snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u16,
    pub flags: u16,
    pub session_count: u64,
    pub message_count: u64,
    pub task_count: u64,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
    pub payload_len: u64,
}

/// Writer for .swbd files.
pub struct SnapshotWriter;

/// Reader for .swbd files.
pub struct SnapshotReader;

impl SnapshotWriter {
    /// Write a snapshot to a file, replacing it atomically.
    pub fn write_to_file(snapshot: &StoreSnapshot, path: &Path) -> SwitchboardResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("swbd.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            Self::write_to(snapshot, &mut file)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Write a snapshot to any writer.
    pub fn write_to<W: Write>(snapshot: &StoreSnapshot, writer: &mut W) -> SwitchboardResult<()> {
        let payload = serde_json::to_vec(snapshot)
            .map_err(|e| SwitchboardError::Storage(format!("Serialization failed: {e}")))?;

        let mut header = [0u8; HEADER_SIZE];
        write_u32(&mut header[0..4], SWBD_MAGIC);
        write_u16(&mut header[4..6], FORMAT_VERSION);
        write_u16(&mut header[6..8], 0); // flags
        write_u64(&mut header[8..16], snapshot.sessions.len() as u64);
        write_u64(&mut header[16..24], snapshot.messages.len() as u64);
        write_u64(&mut header[24..32], snapshot.tasks.len() as u64);
        write_u64(&mut header[32..40], Utc::now().timestamp_millis().max(0) as u64);
        write_u64(&mut header[40..48], payload.len() as u64);

        writer.write_all(&header)?;
        writer.write_all(&payload)?;

        Ok(())
    }
}

impl SnapshotReader {
    /// Read a snapshot from a file.
    pub fn read_from_file(path: &Path) -> SwitchboardResult<StoreSnapshot> {
        let mut file = std::fs::File::open(path)?;
        Self::read_from(&mut file)
    }

    /// Read only the header of a snapshot file.
    pub fn read_header_from_file(path: &Path) -> SwitchboardResult<SnapshotHeader> {
        let mut file = std::fs::File::open(path)?;
        Self::read_header(&mut file)
    }

    pub fn read_header<R: Read>(reader: &mut R) -> SwitchboardResult<SnapshotHeader> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let magic = read_u32(&header[0..4]);
        if magic != SWBD_MAGIC {
            return Err(SwitchboardError::Storage(format!(
                "Invalid magic: expected 0x{SWBD_MAGIC:08X}, got 0x{magic:08X}"
            )));
        }

        let version = read_u16(&header[4..6]);
        if version != FORMAT_VERSION {
            return Err(SwitchboardError::Storage(format!(
                "Unsupported version: {version}"
            )));
        }

        let header = SnapshotHeader {
            version,
            flags: read_u16(&header[6..8]),
            session_count: read_u64(&header[8..16]),
            message_count: read_u64(&header[16..24]),
            task_count: read_u64(&header[24..32]),
            updated_at: read_u64(&header[32..40]),
            payload_len: read_u64(&header[40..48]),
        };

        if header.payload_len > MAX_PAYLOAD {
            return Err(SwitchboardError::Storage(format!(
                "Payload too large: {} bytes",
                header.payload_len
            )));
        }
        Ok(header)
    }

    /// Read a snapshot from any reader.
    pub fn read_from<R: Read>(reader: &mut R) -> SwitchboardResult<StoreSnapshot> {
        let header = Self::read_header(reader)?;

        let mut payload = vec![0u8; header.payload_len as usize];
        reader.read_exact(&mut payload)?;

        let snapshot: StoreSnapshot = serde_json::from_slice(&payload)
            .map_err(|e| SwitchboardError::Storage(format!("Deserialization failed: {e}")))?;

        let counts = (
            snapshot.sessions.len() as u64,
            snapshot.messages.len() as u64,
            snapshot.tasks.len() as u64,
        );
        if counts != (header.session_count, header.message_count, header.task_count) {
            return Err(SwitchboardError::Storage(format!(
                "Header counts {}/{}/{} do not match payload {}/{}/{}",
                header.session_count,
                header.message_count,
                header.task_count,
                counts.0,
                counts.1,
                counts.2
            )));
        }

        Ok(snapshot)
    }
}

// Little-endian byte helpers
fn write_u16(buf: &mut [u8], val: u16) {
    buf[..2].copy_from_slice(&val.to_le_bytes());
}
fn write_u32(buf: &mut [u8], val: u32) {
    buf[..4].copy_from_slice(&val.to_le_bytes());
}
fn write_u64(buf: &mut [u8], val: u64) {
    buf[..8].copy_from_slice(&val.to_le_bytes());
}
fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}
fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}
fn read_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use crate::types::{NewMessage, SessionRole};
    use serde_json::json;

    async fn populated() -> StoreSnapshot {
        let store = SessionStore::new();
        let session = store.create_session(SessionRole::Server).await;
        store
            .record_message(&session.id, NewMessage::request("1", json!({"method": "ping"})))
            .await
            .unwrap();
        store
            .record_message(&session.id, NewMessage::response("1", json!({})))
            .await
            .unwrap();
        let (sessions, messages) = store.snapshot().await;
        StoreSnapshot {
            sessions,
            messages,
            tasks: Vec::new(),
        }
    }

    #[test]
    fn test_empty_snapshot_header() {
        let mut buf = Vec::new();
        SnapshotWriter::write_to(&StoreSnapshot::default(), &mut buf).unwrap();

        let header = SnapshotReader::read_header(&mut &buf[..]).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.session_count, 0);
        assert_eq!(header.payload_len as usize, buf.len() - HEADER_SIZE);
    }

    #[tokio::test]
    async fn test_snapshot_keeps_message_flags() {
        let snapshot = populated().await;
        let mut buf = Vec::new();
        SnapshotWriter::write_to(&snapshot, &mut buf).unwrap();

        let loaded = SnapshotReader::read_from(&mut &buf[..]).unwrap();
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.messages.len(), 2);
        assert!(loaded.messages[0].request_acknowledged);
        assert_eq!(loaded.sessions[0].messages_count, 2);
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = [0u8; HEADER_SIZE + 10];
        buf[0..4].copy_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        let result = SnapshotReader::read_from(&mut &buf[..]);
        assert!(matches!(result, Err(SwitchboardError::Storage(_))));
    }

    #[tokio::test]
    async fn test_count_mismatch_rejected() {
        let snapshot = populated().await;
        let mut buf = Vec::new();
        SnapshotWriter::write_to(&snapshot, &mut buf).unwrap();
        write_u64(&mut buf[16..24], 99);

        let result = SnapshotReader::read_from(&mut &buf[..]);
        assert!(matches!(result, Err(SwitchboardError::Storage(_))));
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.swbd");

        let snapshot = populated().await;
        SnapshotWriter::write_to_file(&snapshot, &path).unwrap();
        let loaded = SnapshotReader::read_from_file(&path).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert!(!path.with_extension("swbd.tmp").exists());
    }
}

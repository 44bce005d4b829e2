//! Crash-recoverable binary journal (§4.3, C3).
//!
//! Frame layout: `payload_len:u32 | schema_version:u8 | records... | crc32:u32`.
//! A record is `record_type:u8 | name\0 | [status:u64 if SERVER]`. The CRC32
//! trailer covers the schema-version byte and every record, not the length
//! prefix; a mismatch or a short read is reported as
//! [`MonitorError::JournalCorruption`] rather than panicking, since the file
//! is produced outside process lifetime and a crash mid-write is exactly
//! the case this format exists to survive.

use crate::error::{MonitorError, Result};
use crate::status::StatusBits;
use crc::{Crc, CRC_32_ISO_HDLC};
use sha1::{Digest, Sha1};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Current on-disk schema version. Bumped whenever the record layout changes;
/// a journal written by a newer version than this binary understands is
/// treated as corrupt rather than guessed at.
pub const SCHEMA_VERSION: u8 = 2;

const RECORD_TYPE_SERVER: u8 = 1;
const RECORD_TYPE_PRIMARY: u8 = 2;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One entry in a decoded journal: either a backend's last known status, or a
/// marker recording which backend held the primary role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    Server { name: String, status: StatusBits },
    Primary { name: String },
}

/// Serializes `records` into the on-disk frame format described above.
pub fn encode(records: &[JournalRecord]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(SCHEMA_VERSION);
    for record in records {
        match record {
            JournalRecord::Server { name, status } => {
                payload.push(RECORD_TYPE_SERVER);
                payload.extend_from_slice(name.as_bytes());
                payload.push(0);
                payload.extend_from_slice(&status.bits().to_le_bytes());
            }
            JournalRecord::Primary { name } => {
                payload.push(RECORD_TYPE_PRIMARY);
                payload.extend_from_slice(name.as_bytes());
                payload.push(0);
            }
        }
    }

    let crc = CASTAGNOLI.checksum(&payload);

    let mut frame = Vec::with_capacity(4 + payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Parses a frame produced by [`encode`]. Any length mismatch, trailing
/// garbage, bad CRC, unknown schema version, or truncated record is reported
/// as [`MonitorError::JournalCorruption`].
pub fn decode(bytes: &[u8]) -> Result<Vec<JournalRecord>> {
    if bytes.len() < 4 {
        return Err(MonitorError::JournalCorruption("frame shorter than length prefix".into()));
    }
    let payload_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let rest = &bytes[4..];
    if rest.len() != payload_len + 4 {
        return Err(MonitorError::JournalCorruption(format!(
            "declared payload length {} does not match frame size",
            payload_len
        )));
    }
    let payload = &rest[..payload_len];
    let trailer = &rest[payload_len..];

    if payload.is_empty() {
        return Err(MonitorError::JournalCorruption("missing schema version byte".into()));
    }
    let schema_version = payload[0];
    if schema_version != SCHEMA_VERSION {
        return Err(MonitorError::JournalCorruption(format!(
            "unsupported schema version {schema_version}"
        )));
    }

    let stored_crc = u32::from_le_bytes(trailer.try_into().unwrap());
    let actual_crc = CASTAGNOLI.checksum(payload);
    if stored_crc != actual_crc {
        return Err(MonitorError::JournalCorruption("CRC32 mismatch".into()));
    }

    let mut records = Vec::new();
    let mut cursor = &payload[1..];
    while !cursor.is_empty() {
        let record_type = cursor[0];
        cursor = &cursor[1..];
        let nul = cursor
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| MonitorError::JournalCorruption("unterminated server name".into()))?;
        let name = std::str::from_utf8(&cursor[..nul])
            .map_err(|_| MonitorError::JournalCorruption("server name is not valid UTF-8".into()))?
            .to_owned();
        cursor = &cursor[nul + 1..];

        match record_type {
            RECORD_TYPE_SERVER => {
                if cursor.len() < 8 {
                    return Err(MonitorError::JournalCorruption("truncated status bitmap".into()));
                }
                let bits = u64::from_le_bytes(cursor[..8].try_into().unwrap());
                cursor = &cursor[8..];
                records.push(JournalRecord::Server {
                    name,
                    status: StatusBits::from_bits_truncate(bits),
                });
            }
            RECORD_TYPE_PRIMARY => records.push(JournalRecord::Primary { name }),
            other => return Err(MonitorError::JournalCorruption(format!("unknown record type {other}"))),
        }
    }

    Ok(records)
}

/// SHA1 digest of the encoded records, used to detect "nothing changed since
/// the last write" so a monitor idling with a stable cluster doesn't rewrite
/// its journal file every tick (§4.3 "skip unchanged write").
pub fn content_hash(records: &[JournalRecord]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(encode(records));
    hasher.finalize().into()
}

/// Writes `records` to `path` via temp-file-then-rename, unless `prev_hash`
/// already matches the current content, in which case nothing touches disk.
/// Returns the hash that should be remembered for the next call.
pub fn store(path: &Path, records: &[JournalRecord], prev_hash: Option<[u8; 20]>) -> Result<[u8; 20]> {
    let hash = content_hash(records);
    if prev_hash == Some(hash) {
        return Ok(hash);
    }

    let frame = encode(records);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(&frame)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(hash)
}

/// True iff the journal at `path` is older than `max_age` and should be
/// discarded unread rather than used to seed backend status on monitor start
/// (§4.3 staleness check).
pub fn is_stale(path: &Path, max_age: Duration) -> Result<bool> {
    let modified = fs::metadata(path)?.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Ok(age > max_age)
}

/// Deletes the journal at `path` if [`is_stale`] says it's too old to seed
/// from. A missing file is not an error and is reported as "not removed".
pub fn remove_if_stale(path: &Path, max_age: Duration) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    if is_stale(path, max_age)? {
        fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Loads and decodes the journal at `path`, or returns `Ok(None)` if the file
/// doesn't exist (a fresh monitor with no prior run) or if it's older than
/// `max_age`.
pub fn load(path: &Path, max_age: Duration) -> Result<Option<Vec<JournalRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    if is_stale(path, max_age)? {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(decode(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Vec<JournalRecord> {
        vec![
            JournalRecord::Server {
                name: "db1".into(),
                status: StatusBits::RUNNING | StatusBits::MASTER,
            },
            JournalRecord::Server {
                name: "db2".into(),
                status: StatusBits::RUNNING | StatusBits::SLAVE,
            },
            JournalRecord::Primary { name: "db1".into() },
        ]
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let records = sample();
        let frame = encode(&records);
        let decoded = decode(&frame).expect("valid frame decodes");
        assert_eq!(decoded, records);
    }

    #[test]
    fn detects_flipped_crc_byte() {
        let mut frame = encode(&sample());
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(decode(&frame), Err(MonitorError::JournalCorruption(_))));
    }

    #[test]
    fn flipped_schema_version_is_reported_before_crc() {
        let mut frame = encode(&sample());
        // Byte 4 is the length-prefix-delimited payload's first byte: the
        // schema version. This must surface as an unsupported-version error,
        // not a CRC mismatch, even though the byte is CRC-covered.
        frame[4] = SCHEMA_VERSION + 1;
        let err = decode(&frame).unwrap_err();
        match err {
            MonitorError::JournalCorruption(msg) => assert!(msg.contains("schema version"), "{msg}"),
            other => panic!("expected JournalCorruption, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = encode(&sample());
        let err = decode(&frame[..frame.len() - 3]).unwrap_err();
        assert!(matches!(err, MonitorError::JournalCorruption(_)));
    }

    #[test]
    fn store_skips_rewrite_when_content_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.journal");
        let records = sample();

        let hash1 = store(&path, &records, None).unwrap();
        let written_at = fs::metadata(&path).unwrap().modified().unwrap();

        let hash2 = store(&path, &records, Some(hash1)).unwrap();
        assert_eq!(hash1, hash2);
        let still_same = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(written_at, still_same);
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.journal");
        let records = sample();
        store(&path, &records, None).unwrap();

        let loaded = load(&path, Duration::from_secs(3600)).unwrap().unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn load_returns_none_for_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.journal");
        assert!(load(&path, Duration::from_secs(60)).unwrap().is_none());
    }

    #[test]
    fn remove_if_stale_deletes_old_file_and_ignores_missing_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.journal");

        assert!(!remove_if_stale(&path, Duration::from_secs(60)).unwrap());

        store(&path, &sample(), None).unwrap();
        assert!(!remove_if_stale(&path, Duration::from_secs(3600)).unwrap());
        assert!(path.exists());

        assert!(remove_if_stale(&path, Duration::from_secs(0)).unwrap());
        assert!(!path.exists());
    }
}

//! Record framing for the durable store log.
//!
//! Each record is framed as
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! and every log file starts with `MAGIC` followed by the version byte.

use std::io::{ErrorKind, Read, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::storage::traits::StorageError;

/// Current record version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes that open every log file.
pub const MAGIC: [u8; 4] = *b"EPSD";

/// Length of the file header.
pub const HEADER_LEN: u64 = 5;

/// Upper bound on a single payload; larger lengths indicate a damaged frame.
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Frames `value` as one record.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let payload = serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| (n as usize) <= MAX_PAYLOAD)
        .ok_or_else(|| {
            StorageError::Serialization(format!("record of {} bytes exceeds {MAX_PAYLOAD}", payload.len()))
        })?;

    let mut out = Vec::with_capacity(payload.len() + 9);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(out)
}

/// Reads one record.
///
/// A frame cut short by a crash surfaces as [`StorageError::Io`] with
/// `UnexpectedEof`; a frame whose contents fail verification surfaces as
/// [`StorageError::Corrupted`].
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, StorageError> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported record version {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_PAYLOAD {
        return Err(StorageError::Corrupted(format!(
            "record length {len} exceeds maximum {MAX_PAYLOAD}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let mut stored = [0u8; 4];
    reader.read_exact(&mut stored)?;
    let stored = u32::from_le_bytes(stored);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(StorageError::Corrupted(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&payload).map_err(|e| StorageError::Corrupted(format!("undecodable record: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> Result<(), StorageError> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Reads and checks the file header.
pub fn read_header(reader: &mut impl Read) -> Result<(), StorageError> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(StorageError::Corrupted(format!(
            "not a store log: magic {:?}",
            &header[..4]
        )));
    }
    if header[4] != CODEC_VERSION {
        return Err(StorageError::Corrupted(format!("unsupported log version {}", header[4])));
    }
    Ok(())
}

/// Returns true if `err` marks a record cut short at the end of a file.
pub fn is_torn(err: &StorageError) -> bool {
    matches!(err, StorageError::Io(e) if e.kind() == ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_record_roundtrip() {
        let encoded = encode(&("key", vec![1u8, 2, 3])).unwrap();
        let decoded: (String, Vec<u8>) = decode(&mut Cursor::new(encoded)).unwrap();
        assert_eq!(decoded, ("key".to_string(), vec![1, 2, 3]));
    }

    #[test]
    fn test_flipped_payload_byte_is_corruption() {
        let mut encoded = encode(&"some payload").unwrap();
        encoded[7] ^= 0xFF;
        let err = decode::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted(_)));
    }

    #[test]
    fn test_truncated_frame_is_torn() {
        let encoded = encode(&"some payload").unwrap();
        let cut = &encoded[..encoded.len() - 2];
        let err = decode::<String>(&mut Cursor::new(cut)).unwrap_err();
        assert!(is_torn(&err));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut frame = vec![CODEC_VERSION];
        frame.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = decode::<String>(&mut Cursor::new(frame)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_checks_magic() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        read_header(&mut Cursor::new(&buf)).unwrap();

        buf[0] = b'X';
        assert!(matches!(read_header(&mut Cursor::new(&buf)), Err(StorageError::Corrupted(_))));
    }
}

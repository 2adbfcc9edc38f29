//! On-disk index snapshot format.
//!
//! Layout: an 8-byte magic, a little-endian `u32` format version, a 32-byte
//! SHA-256 of the payload, then the JSON payload. The file is replaced
//! wholesale by writing a sibling temp file and renaming it into place, so
//! readers holding the previous file see a complete older snapshot, never a
//! torn write.
//!
//! Corruption is detected here — magic, version, or checksum mismatch — and
//! reported as `RecollectError::IndexCorrupt`. Reads during queries never
//! touch this file; only open and flush do.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::RecollectError;

const MAGIC: [u8; 8] = *b"RCOLIDX\0";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 32;

/// Write `payload` to `path` atomically.
pub fn save<T: Serialize>(path: &Path, payload: &T) -> Result<(), RecollectError> {
    let body = serde_json::to_vec(payload)?;
    let checksum = Sha256::digest(&body);

    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&checksum);
    bytes.extend_from_slice(&body);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a snapshot from `path`.
///
/// Returns `Ok(None)` when the file does not exist (a fresh index, not an
/// error). Magic, version, or checksum mismatch yields `IndexCorrupt`; the
/// caller recovers by wiping and re-ingesting.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RecollectError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: &str| RecollectError::IndexCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if bytes.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if bytes[..8] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != VERSION {
        return Err(corrupt("unsupported version"));
    }
    let stored_checksum = &bytes[12..HEADER_LEN];
    let body = &bytes[HEADER_LEN..];
    let computed = Sha256::digest(body);
    if stored_checksum != computed.as_slice() {
        return Err(corrupt("checksum mismatch"));
    }

    let payload = serde_json::from_slice(body).map_err(|e| RecollectError::IndexCorrupt {
        path: path.to_path_buf(),
        reason: format!("payload decode: {e}"),
    })?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let mut payload = BTreeMap::new();
        payload.insert("term".to_string(), 3u64);
        save(&path, &payload).unwrap();

        let loaded: Option<BTreeMap<String, u64>> = load(&path).unwrap();
        assert_eq!(loaded, Some(payload));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<u8>> = load(&dir.path().join("absent.bin")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        std::fs::write(&path, b"NOTMAGIC\x01\x00\x00\x00").unwrap();
        let result: Result<Option<Vec<u8>>, _> = load(&path);
        assert!(matches!(result, Err(RecollectError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save(&path, &vec![1u64, 2, 3]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let result: Result<Option<Vec<u64>>, _> = load(&path);
        assert!(matches!(result, Err(RecollectError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        std::fs::write(&path, b"RC").unwrap();
        let result: Result<Option<Vec<u8>>, _> = load(&path);
        assert!(matches!(result, Err(RecollectError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_save_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save(&path, &"first".to_string()).unwrap();
        save(&path, &"second".to_string()).unwrap();
        let loaded: Option<String> = load(&path).unwrap();
        assert_eq!(loaded.as_deref(), Some("second"));
        assert!(!path.with_extension("tmp").exists());
    }
}

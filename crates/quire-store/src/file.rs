//! Directory-backed update store.
//!
//! Each document gets one file, named after the hex encoding of its id so
//! any id (colons, slashes) maps to a safe, reversible file name:
//!
//! ```text
//! ┌──────────────┬──────────────────────┬────────────────────────────────┐
//! │ "QYS" + ver  │ var-string session   │ record* (append-only)          │
//! └──────────────┴──────────────────────┴────────────────────────────────┘
//! record = var-bytes update, var-bytes metadata, f64 timestamp
//! ```
//!
//! A torn final record (the process died mid-append) is dropped with a
//! warning and cut off the file, so the next append lands right after the
//! last intact record. Fields are lib0-encoded through `yrs`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use yrs::encoding::read::{self, Cursor, Read};
use yrs::encoding::write::Write;

use crate::{StoreError, StoredUpdate, UpdateStore, now_timestamp};

const MAGIC: &[u8; 3] = b"QYS";
const VERSION: u8 = 1;
const EXTENSION: &str = "ylog";

/// An [`UpdateStore`] keeping one append-only file per document.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    // Serializes appends and header rewrites. Maps every log this store
    // last wrote to the length it left behind; any other length gets the
    // log checked for a torn tail before the next append.
    lock: Mutex<HashMap<String, u64>>,
}

impl FileStore {
    /// Opens (creating if necessary) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "file store opened");
        Ok(Self {
            dir,
            lock: Mutex::new(HashMap::new()),
        })
    }

    /// The directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let name: String = id.bytes().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.{EXTENSION}"))
    }

    async fn read_file(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn decode_id(stem: &str) -> Option<String> {
    if stem.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..stem.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(stem.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

fn corrupt(id: &str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn encode_header(session_id: &str) -> Vec<u8> {
    let mut buf = MAGIC.to_vec();
    Write::write_u8(&mut buf, VERSION);
    buf.write_string(session_id);
    buf
}

fn encode_record(update: &[u8], metadata: &[u8], timestamp: f64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(update.len() + metadata.len() + 16);
    Write::write_buf(&mut buf, update);
    Write::write_buf(&mut buf, metadata);
    Write::write_f64(&mut buf, timestamp);
    buf
}

fn read_record(cursor: &mut Cursor<'_>) -> Result<StoredUpdate, read::Error> {
    Ok(StoredUpdate {
        update: cursor.read_buf()?.to_vec(),
        metadata: cursor.read_buf()?.to_vec(),
        timestamp: cursor.read_f64()?,
    })
}

/// A decoded log file.
struct Log {
    session: String,
    records: Vec<StoredUpdate>,
    // Byte length of the header plus every intact record.
    intact: usize,
}

fn parse_log(id: &str, bytes: &[u8]) -> Result<Log, StoreError> {
    if bytes.len() < 4 || &bytes[..3] != MAGIC {
        return Err(corrupt(id, "bad magic"));
    }
    if bytes[3] != VERSION {
        return Err(corrupt(id, format!("unsupported version {}", bytes[3])));
    }
    let mut cursor = Cursor::new(&bytes[4..]);
    let session = cursor
        .read_string()
        .map_err(|e| corrupt(id, e))?
        .to_owned();

    let mut intact = encode_header(&session).len();
    let mut records = Vec::new();
    while intact < bytes.len() {
        match read_record(&mut cursor) {
            Ok(record) => {
                intact += encode_record(&record.update, &record.metadata, record.timestamp).len();
                records.push(record);
            }
            Err(e) => {
                tracing::warn!(
                    doc = id,
                    error = %e,
                    kept = records.len(),
                    dropped_bytes = bytes.len() - intact,
                    "dropping torn record"
                );
                break;
            }
        }
    }
    Ok(Log {
        session,
        records,
        intact,
    })
}

impl UpdateStore for FileStore {
    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.path_for(id)).await?)
    }

    async fn session_id(&self, id: &str) -> Result<Option<String>, StoreError> {
        let Some(bytes) = self.read_file(id).await? else {
            return Ok(None);
        };
        Ok(Some(parse_log(id, &bytes)?.session))
    }

    async fn create(&self, id: &str, session_id: &str) -> Result<(), StoreError> {
        let mut lengths = self.lock.lock().await;
        let bytes = encode_header(session_id);

        let path = self.path_for(id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        lengths.insert(id.to_string(), bytes.len() as u64);
        tracing::debug!(doc = id, session_id, "update log created");
        Ok(())
    }

    async fn write(&self, id: &str, update: &[u8], metadata: &[u8]) -> Result<(), StoreError> {
        let mut lengths = self.lock.lock().await;
        let path = self.path_for(id);
        let mut file = match fs::OpenOptions::new().append(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                lengths.remove(id);
                return Err(StoreError::DocumentNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut len = file.metadata().await?.len();
        if lengths.get(id) != Some(&len) {
            let intact = parse_log(id, &fs::read(&path).await?)?.intact as u64;
            if intact < len {
                tracing::warn!(doc = id, from = len, to = intact, "truncating torn tail");
                file.set_len(intact).await?;
                len = intact;
            }
        }

        let record = encode_record(update, metadata, now_timestamp());
        let appended = match file.write_all(&record).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = appended {
            lengths.remove(id);
            return Err(e.into());
        }
        lengths.insert(id.to_string(), len + record.len() as u64);
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Vec<StoredUpdate>, StoreError> {
        let mut lengths = self.lock.lock().await;
        let bytes = self
            .read_file(id)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))?;
        let log = parse_log(id, &bytes)?;

        if log.intact < bytes.len() {
            let file = fs::OpenOptions::new()
                .write(true)
                .open(self.path_for(id))
                .await?;
            file.set_len(log.intact as u64).await?;
            tracing::warn!(doc = id, to = log.intact, "truncated torn tail");
        }
        lengths.insert(id.to_string(), log.intact as u64);
        Ok(log.records)
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut lengths = self.lock.lock().await;
        lengths.remove(id);
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(decode_id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names_round_trip_ids() {
        let store_dir = PathBuf::from("/tmp/x");
        let store = FileStore {
            dir: store_dir,
            lock: Mutex::new(HashMap::new()),
        };
        let path = store.path_for("text:file:a/b");
        let stem = path.file_stem().unwrap().to_str().unwrap();
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(decode_id(stem).as_deref(), Some("text:file:a/b"));
    }

    #[test]
    fn test_decode_id_rejects_garbage() {
        assert_eq!(decode_id("abc"), None);
        assert_eq!(decode_id("zz"), None);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        assert!(matches!(
            parse_log("d", b"NOPE"),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            parse_log("d", b"QYS\x09\x00"),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_parse_log_reports_intact_prefix() {
        let mut bytes = encode_header("s");
        bytes.extend(encode_record(b"a", b"", 1.0));
        let whole = bytes.len();
        bytes.extend_from_slice(&[10, 1, 2]);

        let log = parse_log("d", &bytes).unwrap();
        assert_eq!(log.session, "s");
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.records[0].timestamp, 1.0);
        assert_eq!(log.intact, whole);
    }
}

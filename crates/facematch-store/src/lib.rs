//! facematch-store: SQLite-backed identity records.
//!
//! One row per enrolled name. Descriptors are stored as little-endian `f32`
//! blobs together with their dimension and model version.

use facematch_core::store::{ensure_finite, IdentityStore, StoreError};
use facematch_core::types::{Descriptor, IdentityRecord, ProfileMetadata};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS identities (
    name          TEXT PRIMARY KEY NOT NULL,
    descriptor    BLOB NOT NULL,
    dimension     INTEGER NOT NULL,
    model_version TEXT,
    handle        TEXT NOT NULL,
    profile_link  TEXT NOT NULL,
    enrolled_at   TEXT NOT NULL
);
";

const SELECT_COLUMNS: &str =
    "SELECT name, descriptor, dimension, model_version, handle, profile_link, enrolled_at FROM identities";

/// Persistent identity store.
///
/// The connection is shared behind a mutex; every operation is a single
/// statement, so each key is updated atomically.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path).map_err(backend)?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "identity store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL).map_err(backend)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))
            .map_err(backend)?;
        usize::try_from(count).map_err(|_| StoreError::Backend(format!("negative row count {count}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl IdentityStore for SqliteStore {
    fn get(&self, name: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let row = self
            .lock()?
            .query_row(&format!("{SELECT_COLUMNS} WHERE name = ?1"), params![name], read_row)
            .optional()
            .map_err(backend)?;
        row.map(decode_row).transpose()
    }

    fn all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY name"))
            .map_err(backend)?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(decode_row).collect()
    }

    fn set(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        ensure_finite(record)?;
        let descriptor = &record.descriptor;
        self.lock()?
            .execute(
                "INSERT INTO identities (
                    name, descriptor, dimension, model_version, handle, profile_link, enrolled_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(name) DO UPDATE SET
                    descriptor = excluded.descriptor,
                    dimension = excluded.dimension,
                    model_version = excluded.model_version,
                    handle = excluded.handle,
                    profile_link = excluded.profile_link,
                    enrolled_at = excluded.enrolled_at",
                params![
                    record.name,
                    encode_descriptor_blob(&descriptor.values),
                    descriptor.dimension() as i64,
                    descriptor.model_version,
                    record.metadata.handle,
                    record.metadata.profile_link,
                    record.metadata.enrolled_at,
                ],
            )
            .map_err(backend)?;
        tracing::debug!(name = %record.name, dimension = descriptor.dimension(), "record written");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let removed = self
            .lock()?
            .execute("DELETE FROM identities WHERE name = ?1", params![name])
            .map_err(backend)?;
        tracing::debug!(name, removed, "record delete");
        Ok(())
    }
}

/// Columns of one row before the descriptor blob is decoded.
struct RawRow {
    name: String,
    blob: Vec<u8>,
    dimension: i64,
    model_version: Option<String>,
    handle: String,
    profile_link: String,
    enrolled_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        name: row.get(0)?,
        blob: row.get(1)?,
        dimension: row.get(2)?,
        model_version: row.get(3)?,
        handle: row.get(4)?,
        profile_link: row.get(5)?,
        enrolled_at: row.get(6)?,
    })
}

fn decode_row(raw: RawRow) -> Result<IdentityRecord, StoreError> {
    let values = decode_descriptor_blob(&raw.blob, raw.dimension)
        .map_err(|reason| StoreError::Corrupt { name: raw.name.clone(), reason })?;
    Ok(IdentityRecord {
        name: raw.name,
        descriptor: Descriptor { values, model_version: raw.model_version },
        metadata: ProfileMetadata {
            handle: raw.handle,
            profile_link: raw.profile_link,
            enrolled_at: raw.enrolled_at,
        },
    })
}

fn encode_descriptor_blob(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_descriptor_blob(blob: &[u8], dimension: i64) -> Result<Vec<f32>, String> {
    let expected_len = usize::try_from(dimension)
        .ok()
        .and_then(|d| d.checked_mul(std::mem::size_of::<f32>()))
        .ok_or_else(|| format!("invalid dimension {dimension}"))?;
    if blob.len() != expected_len {
        return Err(format!(
            "descriptor byte length: expected {expected_len}, got {}",
            blob.len()
        ));
    }

    blob.chunks_exact(4)
        .map(|chunk| {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if value.is_finite() {
                Ok(value)
            } else {
                Err("descriptor contains non-finite values".to_string())
            }
        })
        .collect()
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(format!("sqlite: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, values: Vec<f32>, handle: &str) -> IdentityRecord {
        IdentityRecord {
            name: name.to_string(),
            descriptor: Descriptor { values, model_version: Some("w600k_r50".into()) },
            metadata: ProfileMetadata {
                handle: handle.to_string(),
                profile_link: format!("https://www.instagram.com/{handle}/"),
                enrolled_at: "2026-03-01T12:00:00Z".into(),
            },
        }
    }

    #[test]
    fn test_set_get_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = record("Alice", vec![0.25, -1.5, 3.0e-7], "alice_h");
        store.set(&alice).unwrap();
        assert_eq!(store.get("Alice").unwrap(), Some(alice));
        assert_eq!(store.get("Bob").unwrap(), None);
    }

    #[test]
    fn test_set_overwrites_last_write_wins() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(&record("Alice", vec![1.0, 0.0], "old")).unwrap();
        store.set(&record("Alice", vec![0.0, 1.0], "new")).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let stored = store.get("Alice").unwrap().unwrap();
        assert_eq!(stored.descriptor.values, vec![0.0, 1.0]);
        assert_eq!(stored.metadata.handle, "new");
    }

    #[test]
    fn test_delete_missing_then_existing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.delete("Ghost").unwrap();
        store.set(&record("Alice", vec![1.0], "alice_h")).unwrap();
        store.delete("Alice").unwrap();
        assert_eq!(store.get("Alice").unwrap(), None);
        store.delete("Alice").unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_all_in_name_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for name in ["Carol", "Alice", "Bob"] {
            store.set(&record(name, vec![0.5], "h")).unwrap();
        }
        let names: Vec<String> = store.all().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("identities.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(&record("Alice", vec![0.1, 0.2, 0.3], "alice_h")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let alice = store.get("Alice").unwrap().unwrap();
        assert_eq!(alice.descriptor.values, vec![0.1, 0.2, 0.3]);
        assert_eq!(alice.metadata.profile_link, "https://www.instagram.com/alice_h/");
    }

    #[test]
    fn test_unversioned_descriptor_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut legacy = record("Legacy", vec![0.0; 128], "legacy_h");
        legacy.descriptor.model_version = None;
        store.set(&legacy).unwrap();
        assert_eq!(store.get("Legacy").unwrap().unwrap().descriptor.model_version, None);
    }

    #[test]
    fn test_non_finite_descriptor_never_written() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(&record("Alice", vec![0.5, 0.5], "alice_h")).unwrap();

        let err = store.set(&record("Bad", vec![f32::NAN, 0.0], "bad_h")).unwrap_err();
        assert!(matches!(err, StoreError::NonFiniteDescriptor { ref name } if name == "Bad"));
        assert!(store.set(&record("Alice", vec![f32::NEG_INFINITY, 0.0], "alice_h")).is_err());

        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].descriptor.values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(&record("Alice", vec![1.0, 2.0], "alice_h")).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE identities SET descriptor = x'0000' WHERE name = 'Alice'", [])
            .unwrap();

        assert!(matches!(store.get("Alice"), Err(StoreError::Corrupt { .. })));
        assert!(matches!(store.all(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_blob_codec() {
        let values = [1.0f32, -0.5, 0.0];
        let blob = encode_descriptor_blob(&values);
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_descriptor_blob(&blob, 3).unwrap(), values);
        assert!(decode_descriptor_blob(&blob, 4).is_err());
        assert!(decode_descriptor_blob(&f32::NAN.to_le_bytes(), 1).is_err());
    }
}

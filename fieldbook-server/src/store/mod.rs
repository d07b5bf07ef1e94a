//! Artifact store: durable, immutable, paged-access blobs
//!
//! One directory per study holds one file per artifact, keyed by id.
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! never observes a partially written artifact. Artifacts are never mutated:
//! replacing a card's data writes a new artifact under a fresh id, which is
//! also why concurrent artifact writes from separate pushes never conflict.

pub mod tabular;

use fieldbook_common::model::{ArtifactFormat, ArtifactMeta};
use fieldbook_common::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub use tabular::{ColumnStats, TableData, TableFile};

/// Extension for tabular container files
const TABLE_EXT: &str = "fbt";
/// Extension for opaque blobs (images, generic downloads)
const BLOB_EXT: &str = "bin";

/// Store rooted at one study's `artifacts/` directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn open(dir: &Path) -> Result<ArtifactStore> {
        std::fs::create_dir_all(dir)?;
        Ok(ArtifactStore {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", id, TABLE_EXT))
    }

    fn blob_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", id, BLOB_EXT))
    }

    /// Locate an artifact file by id, whichever format it was stored as
    fn find(&self, id: Uuid) -> Result<PathBuf> {
        let table = self.table_path(id);
        if table.exists() {
            return Ok(table);
        }
        let blob = self.blob_path(id);
        if blob.exists() {
            return Ok(blob);
        }
        Err(Error::NotFound(format!("artifact {}", id)))
    }

    /// Persist a table under a fresh id
    pub fn write_table(&self, table: &TableData) -> Result<ArtifactMeta> {
        let id = Uuid::new_v4();
        let path = self.table_path(id);
        let byte_size = tabular::write(&path, table)?;
        debug!(
            "Stored tabular artifact {} ({} rows, {} bytes)",
            id,
            table.row_count(),
            byte_size
        );
        Ok(ArtifactMeta {
            id,
            format: ArtifactFormat::Tabular,
            byte_size,
            schema: Some(table.schema.clone()),
            row_count: Some(table.row_count() as u64),
            media_type: None,
        })
    }

    /// Persist an opaque blob (image or generic bytes) under a fresh id
    pub fn write_blob(
        &self,
        bytes: &[u8],
        format: ArtifactFormat,
        media_type: Option<String>,
    ) -> Result<ArtifactMeta> {
        let id = Uuid::new_v4();
        let path = self.blob_path(id);
        let tmp = path.with_file_name(format!(".tmp-{}.{}", id, BLOB_EXT));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_data()?;
        }
        std::fs::rename(&tmp, &path)?;
        debug!("Stored {} byte blob artifact {}", bytes.len(), id);
        Ok(ArtifactMeta {
            id,
            format,
            byte_size: bytes.len() as u64,
            schema: None,
            row_count: None,
            media_type,
        })
    }

    /// Open a stored tabular artifact for paged access
    pub fn open_table(&self, id: Uuid) -> Result<TableFile> {
        let path = self.table_path(id);
        if !path.exists() {
            return Err(Error::NotFound(format!("tabular artifact {}", id)));
        }
        TableFile::open(&path)
    }

    /// Deterministic page of a tabular artifact
    pub fn read_page(
        &self,
        id: Uuid,
        offset: usize,
        limit: usize,
        sort: Option<&str>,
        ascending: bool,
    ) -> Result<Vec<serde_json::Value>> {
        self.open_table(id)?.page(offset, limit, sort, ascending)
    }

    /// Per-column statistics of a tabular artifact
    pub fn read_stats(&self, id: Uuid) -> Result<Vec<ColumnStats>> {
        self.open_table(id)?.stats()
    }

    /// Full CSV rendering of a tabular artifact
    pub fn read_csv(&self, id: Uuid) -> Result<String> {
        self.open_table(id)?.to_csv()
    }

    /// Full raw bytes of any artifact, for export and downloads
    pub fn read_raw(&self, id: Uuid) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.find(id)?)?)
    }

    /// Relative file name of a stored artifact, for export bundles
    pub fn file_name(&self, id: Uuid) -> Result<String> {
        let path = self.find(id)?;
        Ok(path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blob_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let bytes = b"\x89PNG\r\n\x1a\nfake";
        let meta = store
            .write_blob(bytes, ArtifactFormat::Image, Some("image/png".into()))
            .unwrap();
        assert_eq!(meta.byte_size, bytes.len() as u64);
        assert_eq!(store.read_raw(meta.id).unwrap(), bytes);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.read_raw(missing),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.read_page(missing, 0, 10, None, true),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_table_write_then_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let table = TableData::from_records(&[
            json!({"k": "a"}),
            json!({"k": "b"}),
        ])
        .unwrap();
        let meta = store.write_table(&table).unwrap();
        assert_eq!(meta.row_count, Some(2));

        let page = store.read_page(meta.id, 1, 5, None, true).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["k"], json!("b"));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let table = TableData::from_records(&[json!({"k": 1})]).unwrap();
        store.write_table(&table).unwrap();
        store
            .write_blob(b"bytes", ArtifactFormat::Json, None)
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}

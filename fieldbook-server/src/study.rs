//! Study manager: lifecycle of persisted studies
//!
//! One directory per study under `<data_dir>/studies/<label>/`:
//!
//! ```text
//! cards.jsonl    ordered card index (journal)
//! study.json     label, timestamps, registered output directory
//! artifacts/     one file per artifact, keyed by id
//! ```
//!
//! Studies are created implicitly on first push with a new label and
//! reloaded from disk at startup. Each study's registry sits behind its own
//! async mutex, which is the per-study write serialization the card index
//! relies on.

use crate::registry::CardRegistry;
use crate::store::ArtifactStore;
use chrono::{DateTime, Utc};
use fieldbook_common::model::StudyInfo;
use fieldbook_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

const INDEX_FILE: &str = "cards.jsonl";
const META_FILE: &str = "study.json";
const ARTIFACTS_DIR: &str = "artifacts";

/// Persisted study metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyMeta {
    pub label: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

/// Mutable per-study location state, swapped on rename
#[derive(Debug)]
struct StudyPaths {
    dir: PathBuf,
    store: ArtifactStore,
    meta: StudyMeta,
}

/// One loaded study
#[derive(Debug)]
pub struct StudyHandle {
    /// Per-study write lock: all index mutations serialize here
    pub registry: Mutex<CardRegistry>,
    paths: std::sync::RwLock<StudyPaths>,
}

impl StudyHandle {
    fn open(dir: &Path, meta: StudyMeta) -> Result<StudyHandle> {
        let registry = CardRegistry::load(&dir.join(INDEX_FILE))?;
        let store = ArtifactStore::open(&dir.join(ARTIFACTS_DIR))?;
        Ok(StudyHandle {
            registry: Mutex::new(registry),
            paths: std::sync::RwLock::new(StudyPaths {
                dir: dir.to_path_buf(),
                store,
                meta,
            }),
        })
    }

    fn paths(&self) -> std::sync::RwLockReadGuard<'_, StudyPaths> {
        self.paths.read().unwrap_or_else(|e| e.into_inner())
    }

    fn paths_mut(&self) -> std::sync::RwLockWriteGuard<'_, StudyPaths> {
        self.paths.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn label(&self) -> String {
        self.paths().meta.label.clone()
    }

    pub fn dir(&self) -> PathBuf {
        self.paths().dir.clone()
    }

    pub fn store(&self) -> ArtifactStore {
        self.paths().store.clone()
    }

    pub fn meta(&self) -> StudyMeta {
        self.paths().meta.clone()
    }

    fn save_meta(&self) -> Result<()> {
        let (dir, meta) = {
            let paths = self.paths();
            (paths.dir.clone(), paths.meta.clone())
        };
        write_meta(&dir, &meta)
    }

    pub fn set_output_dir(&self, path: PathBuf) -> Result<()> {
        self.paths_mut().meta.output_dir = Some(path);
        self.save_meta()
    }
}

fn write_meta(dir: &Path, meta: &StudyMeta) -> Result<()> {
    let path = dir.join(META_FILE);
    let tmp = dir.join(".tmp-study.json");
    std::fs::write(&tmp, serde_json::to_vec_pretty(meta)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Validate a study label as a safe directory name
pub fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() || label.len() > 120 {
        return Err(Error::InvalidInput(
            "study label must be 1-120 characters".to_string(),
        ));
    }
    if label.starts_with('.') {
        return Err(Error::InvalidInput(
            "study label must not start with '.'".to_string(),
        ));
    }
    let ok = label
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'));
    if !ok {
        return Err(Error::InvalidInput(format!(
            "study label '{}' contains unsupported characters",
            label
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct StudyManager {
    root: PathBuf,
    studies: RwLock<HashMap<String, Arc<StudyHandle>>>,
    /// card id -> owning study label, for inbound event routing
    card_index: std::sync::RwLock<HashMap<Uuid, String>>,
}

impl StudyManager {
    /// Open the studies root, reloading every persisted study
    pub fn open(root: &Path) -> Result<StudyManager> {
        std::fs::create_dir_all(root)?;
        let mut studies = HashMap::new();
        let mut card_index = HashMap::new();

        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let dir = entry.path();
            let meta = match read_meta(&dir) {
                Ok(meta) => meta,
                Err(e) => {
                    // Torn creation: rebuild minimal metadata from the name
                    warn!(
                        "Rebuilding metadata for study dir {}: {}",
                        dir.display(),
                        e
                    );
                    let label = entry.file_name().to_string_lossy().into_owned();
                    let meta = StudyMeta {
                        label,
                        created_at: Utc::now(),
                        output_dir: None,
                    };
                    write_meta(&dir, &meta)?;
                    meta
                }
            };
            let label = meta.label.clone();
            let handle = Arc::new(StudyHandle::open(&dir, meta)?);
            {
                let registry = handle.registry.try_lock().map_err(|_| {
                    Error::Internal("registry locked during startup".to_string())
                })?;
                for id in registry.card_ids() {
                    card_index.insert(id, label.clone());
                }
            }
            studies.insert(label, handle);
        }

        if !studies.is_empty() {
            info!("Loaded {} persisted studies", studies.len());
        }
        Ok(StudyManager {
            root: root.to_path_buf(),
            studies: RwLock::new(studies),
            card_index: std::sync::RwLock::new(card_index),
        })
    }

    pub async fn get(&self, label: &str) -> Option<Arc<StudyHandle>> {
        self.studies.read().await.get(label).cloned()
    }

    /// Fetch a study, creating and persisting it when the label is new
    pub async fn create_or_get(&self, label: &str) -> Result<Arc<StudyHandle>> {
        if let Some(handle) = self.get(label).await {
            return Ok(handle);
        }
        validate_label(label)?;

        let mut studies = self.studies.write().await;
        // Re-check under the write lock: another push may have won the race
        if let Some(handle) = studies.get(label) {
            return Ok(handle.clone());
        }

        let dir = self.root.join(label);
        std::fs::create_dir_all(dir.join(ARTIFACTS_DIR))?;
        let meta = StudyMeta {
            label: label.to_string(),
            created_at: Utc::now(),
            output_dir: None,
        };
        write_meta(&dir, &meta)?;
        let handle = Arc::new(StudyHandle::open(&dir, meta)?);
        studies.insert(label.to_string(), handle.clone());
        info!("Created study '{}'", label);
        Ok(handle)
    }

    /// Studies with card counts and timestamps, sorted by creation time
    pub async fn list(&self) -> Vec<StudyInfo> {
        let handles: Vec<Arc<StudyHandle>> =
            self.studies.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            let card_count = handle.registry.lock().await.len();
            let meta = handle.meta();
            out.push(StudyInfo {
                label: meta.label,
                created_at: meta.created_at,
                card_count,
                output_dir: meta.output_dir,
            });
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub async fn labels(&self) -> Vec<String> {
        self.studies.read().await.keys().cloned().collect()
    }

    /// All loaded study handles, for cross-study artifact lookup
    pub async fn handles(&self) -> Vec<Arc<StudyHandle>> {
        self.studies.read().await.values().cloned().collect()
    }

    /// Rename a study, rejecting duplicate target labels
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        validate_label(to)?;
        let mut studies = self.studies.write().await;
        if studies.contains_key(to) {
            return Err(Error::Conflict(format!("study '{}' already exists", to)));
        }
        let handle = studies
            .remove(from)
            .ok_or_else(|| Error::NotFound(format!("study '{}'", from)))?;

        // Hold the registry lock so no append lands in the old directory
        let mut registry = handle.registry.lock().await;
        let new_dir = self.root.join(to);
        std::fs::rename(handle.dir(), &new_dir)?;
        {
            let mut paths = handle.paths_mut();
            paths.dir = new_dir.clone();
            paths.store = ArtifactStore::open(&new_dir.join(ARTIFACTS_DIR))?;
            paths.meta.label = to.to_string();
        }
        registry.set_path(new_dir.join(INDEX_FILE));
        registry.relabel(to);
        registry.persist()?;
        drop(registry);
        handle.save_meta()?;

        {
            let mut index = self.card_index.write().unwrap_or_else(|e| e.into_inner());
            for owner in index.values_mut() {
                if owner == from {
                    *owner = to.to_string();
                }
            }
        }
        studies.insert(to.to_string(), handle);
        info!("Renamed study '{}' to '{}'", from, to);
        Ok(())
    }

    /// Delete a study's directory and in-memory state, returning the ids of
    /// the removed cards
    pub async fn delete(&self, label: &str) -> Result<Vec<Uuid>> {
        let mut studies = self.studies.write().await;
        let handle = studies
            .remove(label)
            .ok_or_else(|| Error::NotFound(format!("study '{}'", label)))?;

        let registry = handle.registry.lock().await;
        let card_ids = registry.card_ids();
        drop(registry);

        std::fs::remove_dir_all(handle.dir())?;
        {
            let mut index = self.card_index.write().unwrap_or_else(|e| e.into_inner());
            for id in &card_ids {
                index.remove(id);
            }
        }
        info!("Deleted study '{}' ({} cards)", label, card_ids.len());
        Ok(card_ids)
    }

    pub async fn register_output_dir(&self, label: &str, path: PathBuf) -> Result<()> {
        let handle = self
            .get(label)
            .await
            .ok_or_else(|| Error::NotFound(format!("study '{}'", label)))?;
        handle.set_output_dir(path)
    }

    /// Record which study owns a freshly appended card
    pub fn note_card(&self, card_id: Uuid, label: &str) {
        self.card_index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(card_id, label.to_string());
    }

    /// The study that owns a card, for inbound event routing
    pub async fn study_of_card(&self, card_id: Uuid) -> Option<Arc<StudyHandle>> {
        let label = self
            .card_index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&card_id)
            .cloned()?;
        self.get(&label).await
    }
}

fn read_meta(dir: &Path) -> Result<StudyMeta> {
    let text = std::fs::read_to_string(dir.join(META_FILE))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_list_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StudyManager::open(dir.path()).unwrap();
        manager.create_or_get("s1").await.unwrap();
        manager.create_or_get("s2").await.unwrap();
        // create_or_get is idempotent
        manager.create_or_get("s1").await.unwrap();

        let listed = manager.list().await;
        assert_eq!(listed.len(), 2);

        let reopened = StudyManager::open(dir.path()).unwrap();
        let mut labels = reopened.labels().await;
        labels.sort();
        assert_eq!(labels, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_rename_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StudyManager::open(dir.path()).unwrap();
        manager.create_or_get("a").await.unwrap();
        manager.create_or_get("b").await.unwrap();

        assert!(matches!(
            manager.rename("a", "b").await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            manager.rename("missing", "c").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_moves_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StudyManager::open(dir.path()).unwrap();
        manager.create_or_get("old").await.unwrap();
        manager.rename("old", "new").await.unwrap();

        assert!(manager.get("old").await.is_none());
        let handle = manager.get("new").await.unwrap();
        assert_eq!(handle.label(), "new");
        assert!(dir.path().join("new").join(META_FILE).exists());
        assert!(!dir.path().join("old").exists());
    }

    #[tokio::test]
    async fn test_delete_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StudyManager::open(dir.path()).unwrap();
        manager.create_or_get("doomed").await.unwrap();
        manager.delete("doomed").await.unwrap();

        assert!(manager.get("doomed").await.is_none());
        assert!(!dir.path().join("doomed").exists());
        assert!(matches!(
            manager.delete("doomed").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_output_dir_persists() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StudyManager::open(dir.path()).unwrap();
        manager.create_or_get("s1").await.unwrap();
        manager
            .register_output_dir("s1", PathBuf::from("/tmp/figures"))
            .await
            .unwrap();

        let reopened = StudyManager::open(dir.path()).unwrap();
        let handle = reopened.get("s1").await.unwrap();
        assert_eq!(
            handle.meta().output_dir,
            Some(PathBuf::from("/tmp/figures"))
        );
    }

    #[test]
    fn test_label_validation() {
        assert!(validate_label("cohort study 2").is_ok());
        assert!(validate_label("a-b_c.d").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label(".hidden").is_err());
        assert!(validate_label("../escape").is_err());
        assert!(validate_label("with/slash").is_err());
    }
}

//! Storage seam for entity progression state.
//!
//! Two implementations ship with the runtime: [`MemoryPersistence`] and
//! [`FilePersistence`], which keeps one bitcode snapshot per entity under a
//! directory. Both have upsert semantics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ladder_core::id::EntityId;
use ladder_core::state::EntityProgressionState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed for {entity}: {source}")]
    Io {
        entity: EntityId,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot for {entity}: {detail}")]
    Corrupt { entity: EntityId, detail: String },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// `Ok(None)` for an entity that was never saved.
    async fn load(&self, entity: EntityId) -> Result<Option<EntityProgressionState>, StorageError>;

    async fn save(&self, state: &EntityProgressionState) -> Result<(), StorageError>;

    async fn load_claimed_rewards(&self, entity: EntityId) -> Result<BTreeSet<String>, StorageError>;

    async fn save_claimed_reward(&self, entity: EntityId, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    states: Mutex<HashMap<EntityId, EntityProgressionState>>,
    claimed: Mutex<HashMap<EntityId, BTreeSet<String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored state, bypassing the async seam.
    pub fn stored(&self, entity: EntityId) -> Option<EntityProgressionState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity)
            .cloned()
    }

    /// Upsert a state, bypassing the async seam.
    pub fn insert(&self, state: EntityProgressionState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.entity, state);
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self, entity: EntityId) -> Result<Option<EntityProgressionState>, StorageError> {
        Ok(self.stored(entity))
    }

    async fn save(&self, state: &EntityProgressionState) -> Result<(), StorageError> {
        self.insert(state.clone());
        Ok(())
    }

    async fn load_claimed_rewards(&self, entity: EntityId) -> Result<BTreeSet<String>, StorageError> {
        Ok(self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_claimed_reward(&self, entity: EntityId, key: &str) -> Result<(), StorageError> {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity)
            .or_default()
            .insert(key.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed
// ---------------------------------------------------------------------------

/// Magic number at the head of every state file.
pub const STATE_MAGIC: u32 = 0x1ADD_0001;

/// Current state file version. Increment when breaking the format.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHeader {
    pub magic: u32,
    pub version: u32,
}

impl StateHeader {
    pub fn current() -> Self {
        Self {
            magic: STATE_MAGIC,
            version: STATE_FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.magic != STATE_MAGIC {
            return Err(format!(
                "invalid magic number: expected 0x{STATE_MAGIC:08X}, got 0x{:08X}",
                self.magic
            ));
        }
        if self.version != STATE_FORMAT_VERSION {
            return Err(format!(
                "unsupported format version: expected {STATE_FORMAT_VERSION}, got {}",
                self.version
            ));
        }
        Ok(())
    }
}

/// On-disk layout. The entity id is stored as raw bytes.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    header: StateHeader,
    entity: [u8; 16],
    levels: BTreeMap<String, u64>,
    auto_enabled: BTreeSet<String>,
    claimed_rewards: BTreeSet<String>,
}

impl StateFile {
    fn from_state(state: &EntityProgressionState) -> Self {
        Self {
            header: StateHeader::current(),
            entity: *state.entity.0.as_bytes(),
            levels: state.levels().clone(),
            auto_enabled: state.auto_enabled().clone(),
            claimed_rewards: state.claimed_rewards().clone(),
        }
    }

    fn into_state(self) -> EntityProgressionState {
        EntityProgressionState::from_parts(
            EntityId(Uuid::from_bytes(self.entity)),
            self.levels,
            self.auto_enabled,
            self.claimed_rewards,
        )
    }
}

/// One `<entity>.state` bitcode file per entity under `dir`.
///
/// Claimed reward keys live inside the state file, so
/// `save_claimed_reward` is a read-modify-write of that file. Writes go to
/// a temporary file first and are renamed into place.
#[derive(Debug)]
pub struct FilePersistence {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the same directory.
    write_lock: tokio::sync::Mutex<()>,
}

impl FilePersistence {
    /// Create the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, entity: EntityId) -> PathBuf {
        self.dir.join(format!("{entity}.state"))
    }

    async fn read(&self, entity: EntityId) -> Result<Option<EntityProgressionState>, StorageError> {
        let bytes = match tokio::fs::read(self.path_for(entity)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { entity, source }),
        };
        let file: StateFile = bitcode::deserialize(&bytes).map_err(|e| StorageError::Corrupt {
            entity,
            detail: e.to_string(),
        })?;
        file.header
            .validate()
            .map_err(|detail| StorageError::Corrupt { entity, detail })?;
        let state = file.into_state();
        if state.entity != entity {
            return Err(StorageError::Corrupt {
                entity,
                detail: format!("file holds state for {}", state.entity),
            });
        }
        Ok(Some(state))
    }

    async fn write(&self, state: &EntityProgressionState) -> Result<(), StorageError> {
        let entity = state.entity;
        let file = StateFile::from_state(state);
        let bytes = bitcode::serialize(&file).map_err(|e| StorageError::Corrupt {
            entity,
            detail: e.to_string(),
        })?;
        let path = self.path_for(entity);
        let tmp = path.with_extension("state.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| StorageError::Io { entity, source })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StorageError::Io { entity, source })
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn load(&self, entity: EntityId) -> Result<Option<EntityProgressionState>, StorageError> {
        self.read(entity).await
    }

    async fn save(&self, state: &EntityProgressionState) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        // Claimed keys recorded through save_claimed_reward must survive a
        // save of a state that has not seen them yet.
        let mut merged = state.clone();
        if let Some(existing) = self.read(state.entity).await? {
            for key in existing.claimed_rewards() {
                merged.claim(key.clone());
            }
        }
        self.write(&merged).await
    }

    async fn load_claimed_rewards(&self, entity: EntityId) -> Result<BTreeSet<String>, StorageError> {
        Ok(self
            .read(entity)
            .await?
            .map(|s| s.claimed_rewards().clone())
            .unwrap_or_default())
    }

    async fn save_claimed_reward(&self, entity: EntityId, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self
            .read(entity)
            .await?
            .unwrap_or_else(|| EntityProgressionState::new(entity));
        if state.claim(key) {
            self.write(&state).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ladder_persist_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn memory_round_trip() {
        let p = MemoryPersistence::new();
        let e = EntityId::from_u128(1);
        assert!(p.load(e).await.unwrap().is_none());

        let mut state = EntityProgressionState::new(e);
        state.set_level_clamped("rankup", 3, 5);
        p.save(&state).await.unwrap();
        assert_eq!(p.load(e).await.unwrap(), Some(state));

        p.save_claimed_reward(e, "rankup:3").await.unwrap();
        assert!(p.load_claimed_rewards(e).await.unwrap().contains("rankup:3"));
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = make_test_dir("round_trip");
        let p = FilePersistence::open(&dir).await.unwrap();
        let e = EntityId::from_u128(7);

        assert!(p.load(e).await.unwrap().is_none());

        let mut state = EntityProgressionState::new(e);
        state.set_level_clamped("prestige", 2, 3);
        state.set_auto_enabled("rankup", true);
        p.save(&state).await.unwrap();

        let loaded = p.load(e).await.unwrap().unwrap();
        assert_eq!(loaded.level("prestige"), 2);
        assert!(loaded.is_auto_enabled("rankup"));

        cleanup(&dir);
    }

    #[tokio::test]
    async fn file_claims_survive_later_save() {
        let dir = make_test_dir("claims");
        let p = FilePersistence::open(&dir).await.unwrap();
        let e = EntityId::from_u128(8);

        p.save_claimed_reward(e, "rankup:5").await.unwrap();
        // A state that never saw the claim.
        p.save(&EntityProgressionState::new(e)).await.unwrap();

        let claimed = p.load_claimed_rewards(e).await.unwrap();
        assert!(claimed.contains("rankup:5"));

        cleanup(&dir);
    }

    #[tokio::test]
    async fn file_rejects_garbage() {
        let dir = make_test_dir("garbage");
        let p = FilePersistence::open(&dir).await.unwrap();
        let e = EntityId::from_u128(9);
        std::fs::write(dir.join(format!("{e}.state")), b"not a snapshot").unwrap();

        assert!(matches!(
            p.load(e).await,
            Err(StorageError::Corrupt { .. })
        ));

        cleanup(&dir);
    }

    #[test]
    fn header_validation() {
        assert!(StateHeader::current().validate().is_ok());
        let bad = StateHeader {
            magic: 0,
            version: STATE_FORMAT_VERSION,
        };
        assert!(bad.validate().is_err());
        let future = StateHeader {
            magic: STATE_MAGIC,
            version: STATE_FORMAT_VERSION + 1,
        };
        assert!(future.validate().is_err());
    }
}

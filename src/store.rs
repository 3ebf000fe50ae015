//! The branch store (C3): the authoritative key-value set over `Branch`,
//! keyed by `BranchId`, with secondary lookups by type and a substring
//! match over name/address. The spatial index and the caches are always
//! derivable from this store — it is the source of truth.

use crate::error::{GeoBankError, Result};
use crate::model::{Branch, BranchId, BranchType};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

/// Capability seam for the branch store, passed into the query and
/// registration engines at construction.
pub trait BranchStore: Send + Sync {
    /// Insert or replace a branch. Within a single id, the most recent
    /// save wins.
    fn save(&self, branch: Branch) -> Result<Branch>;

    /// Save a batch of branches atomically with respect to concurrent
    /// readers: either all become visible or none do.
    fn save_all(&self, branches: Vec<Branch>) -> Result<Vec<Branch>>;

    fn find_by_id(&self, id: &BranchId) -> Result<Option<Branch>>;

    /// Reserved for administrative tooling; the core registration engine
    /// never calls this.
    fn delete_by_id(&self, id: &BranchId) -> Result<Option<Branch>>;

    fn find_all(&self) -> Result<Vec<Branch>>;

    fn find_by_types(&self, types: &[BranchType]) -> Result<Vec<Branch>>;

    fn find_matching(&self, needle: &str) -> Result<Vec<Branch>>;

    fn count(&self) -> Result<usize>;

    fn count_by_type(&self, branch_type: BranchType) -> Result<usize>;
}

#[derive(Default)]
struct Index {
    records: BTreeMap<BranchId, Branch>,
    by_type: HashMap<BranchType, HashSet<BranchId>>,
}

impl Index {
    fn insert(&mut self, branch: Branch) {
        if let Some(previous) = self.records.get(&branch.id) {
            if previous.branch_type != branch.branch_type {
                if let Some(set) = self.by_type.get_mut(&previous.branch_type) {
                    set.remove(&branch.id);
                }
            }
        }
        self.by_type
            .entry(branch.branch_type)
            .or_default()
            .insert(branch.id.clone());
        self.records.insert(branch.id.clone(), branch);
    }

    fn remove(&mut self, id: &BranchId) -> Option<Branch> {
        let removed = self.records.remove(id);
        if let Some(branch) = &removed {
            if let Some(set) = self.by_type.get_mut(&branch.branch_type) {
                set.remove(id);
            }
        }
        removed
    }
}

/// In-memory implementation backing both the plain and AOF-persisted
/// stores.
pub struct MemoryBranchStore {
    index: RwLock<Index>,
}

impl MemoryBranchStore {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(Index::default()),
        }
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Index>> {
        self.index
            .read()
            .map_err(|_| GeoBankError::StoreUnavailable("store read lock poisoned".into()))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Index>> {
        self.index
            .write()
            .map_err(|_| GeoBankError::StoreUnavailable("store write lock poisoned".into()))
    }
}

impl Default for MemoryBranchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchStore for MemoryBranchStore {
    fn save(&self, branch: Branch) -> Result<Branch> {
        let mut index = self.lock_write()?;
        index.insert(branch.clone());
        Ok(branch)
    }

    fn save_all(&self, branches: Vec<Branch>) -> Result<Vec<Branch>> {
        let mut index = self.lock_write()?;
        for branch in &branches {
            index.insert(branch.clone());
        }
        Ok(branches)
    }

    fn find_by_id(&self, id: &BranchId) -> Result<Option<Branch>> {
        Ok(self.lock_read()?.records.get(id).cloned())
    }

    fn delete_by_id(&self, id: &BranchId) -> Result<Option<Branch>> {
        Ok(self.lock_write()?.remove(id))
    }

    fn find_all(&self) -> Result<Vec<Branch>> {
        Ok(self.lock_read()?.records.values().cloned().collect())
    }

    fn find_by_types(&self, types: &[BranchType]) -> Result<Vec<Branch>> {
        let index = self.lock_read()?;
        let mut ids: HashSet<&BranchId> = HashSet::new();
        for t in types {
            if let Some(set) = index.by_type.get(t) {
                ids.extend(set.iter());
            }
        }
        Ok(ids
            .into_iter()
            .filter_map(|id| index.records.get(id).cloned())
            .collect())
    }

    fn find_matching(&self, needle: &str) -> Result<Vec<Branch>> {
        let needle = needle.to_lowercase();
        let index = self.lock_read()?;
        Ok(index
            .records
            .values()
            .filter(|b| {
                b.name.to_lowercase().contains(&needle) || b.address.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.lock_read()?.records.len())
    }

    fn count_by_type(&self, branch_type: BranchType) -> Result<usize> {
        Ok(self
            .lock_read()?
            .by_type
            .get(&branch_type)
            .map(|set| set.len())
            .unwrap_or(0))
    }
}

/// AOF-persisted store: every `save`/`delete_by_id` is appended to an
/// append-only file before the in-memory index is updated, and the file
/// is replayed on open to repopulate the index.
#[cfg(feature = "aof")]
pub struct AofBranchStore {
    memory: MemoryBranchStore,
    aof: std::sync::Mutex<crate::persistence::AOFFile>,
}

#[cfg(feature = "aof")]
impl AofBranchStore {
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let mut aof = crate::persistence::AOFFile::open(path)?;
        let memory = MemoryBranchStore::new();

        let mut replayed = Vec::new();
        aof.replay(|cmd| {
            match cmd {
                crate::persistence::AOFCommand::Set { value, .. } => {
                    let branch: Branch = bincode::deserialize(&value)
                        .map_err(|e| GeoBankError::Serialization(e.to_string()))?;
                    replayed.push(branch);
                }
                crate::persistence::AOFCommand::Delete { key } => {
                    let id = BranchId::new(String::from_utf8_lossy(&key).into_owned())?;
                    replayed.retain(|b: &Branch| b.id != id);
                }
            }
            Ok(())
        })?;

        for branch in replayed {
            memory.save(branch)?;
        }

        Ok(Self {
            memory,
            aof: std::sync::Mutex::new(aof),
        })
    }

    fn append_set(&self, branch: &Branch) -> Result<()> {
        let value = bincode::serialize(branch).map_err(|e| GeoBankError::Serialization(e.to_string()))?;
        let mut aof = self
            .aof
            .lock()
            .map_err(|_| GeoBankError::StoreUnavailable("AOF lock poisoned".into()))?;
        aof.write_set(
            &bytes::Bytes::copy_from_slice(branch.id.as_str().as_bytes()),
            &bytes::Bytes::from(value),
        )?;
        aof.sync()
    }

    fn append_delete(&self, id: &BranchId) -> Result<()> {
        let mut aof = self
            .aof
            .lock()
            .map_err(|_| GeoBankError::StoreUnavailable("AOF lock poisoned".into()))?;
        aof.write_delete(&bytes::Bytes::copy_from_slice(id.as_str().as_bytes()))?;
        aof.sync()
    }
}

#[cfg(feature = "aof")]
impl BranchStore for AofBranchStore {
    fn save(&self, branch: Branch) -> Result<Branch> {
        self.append_set(&branch)?;
        self.memory.save(branch)
    }

    fn save_all(&self, branches: Vec<Branch>) -> Result<Vec<Branch>> {
        for branch in &branches {
            self.append_set(branch)?;
        }
        self.memory.save_all(branches)
    }

    fn find_by_id(&self, id: &BranchId) -> Result<Option<Branch>> {
        self.memory.find_by_id(id)
    }

    fn delete_by_id(&self, id: &BranchId) -> Result<Option<Branch>> {
        self.append_delete(id)?;
        self.memory.delete_by_id(id)
    }

    fn find_all(&self) -> Result<Vec<Branch>> {
        self.memory.find_all()
    }

    fn find_by_types(&self, types: &[BranchType]) -> Result<Vec<Branch>> {
        self.memory.find_by_types(types)
    }

    fn find_matching(&self, needle: &str) -> Result<Vec<Branch>> {
        self.memory.find_matching(needle)
    }

    fn count(&self) -> Result<usize> {
        self.memory.count()
    }

    fn count_by_type(&self, branch_type: BranchType) -> Result<usize> {
        self.memory.count_by_type(branch_type)
    }
}

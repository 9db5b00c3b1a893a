//! The `Transaction`/`Store` boundary standing in for the ordered,
//! transactional key-value store the specification treats as an external
//! collaborator, referenced only through its interface (§1). Everything
//! above this crate talks to the KV exclusively through these two traits,
//! so swapping `MemoryStore` for a real cluster client is a one-crate
//! change.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use common::error::Error;
use common::value::Value;
use common::CResult;

use crate::subspace::Subspace;
use crate::tuple;

/// One row returned by [`Transaction::range`].
pub type KvPair = (Vec<u8>, Vec<u8>);

/// A single serializable unit of work against the store. Mirrors the
/// shape of an FDB transaction: reads and writes are buffered against a
/// consistent snapshot and become visible atomically when the closure
/// passed to [`Store::transact`] returns `Ok`.
///
/// Kept object-safe (`&mut dyn Transaction`) since it's the type actually
/// threaded through call sites in `catalog`/`executor`.
pub trait Transaction {
    fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>>;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn clear(&mut self, key: &[u8]);
    fn clear_range(&mut self, begin: &[u8], end: &[u8]);
    /// Inclusive-begin, exclusive-end scan. `reverse` walks from `end`
    /// backwards; `limit` caps the number of pairs returned either way.
    fn range(&mut self, begin: &[u8], end: &[u8], limit: Option<usize>, reverse: bool) -> CResult<Vec<KvPair>>;

    /// Create the directory at `path` if it doesn't exist, or open it if
    /// it does; either way returns the subspace backing its contents.
    fn dir_create_or_open(&mut self, path: &[String]) -> CResult<Subspace>;
    /// Open an existing directory, or `None` if `path` hasn't been created.
    fn dir_open(&mut self, path: &[String]) -> CResult<Option<Subspace>>;
    fn dir_exists(&mut self, path: &[String]) -> CResult<bool>;
    /// Immediate child names of `path` (one path segment past it).
    fn dir_list(&mut self, path: &[String]) -> CResult<Vec<String>>;
    /// Remove `path` and everything nested under it, including its row
    /// data. Returns whether `path` existed.
    fn dir_remove(&mut self, path: &[String]) -> CResult<bool>;
}

/// The store itself: a source of fresh, independently-serializable
/// transactions. Not object-safe (the closure is generic over its
/// return type) -- that's fine, only `Transaction` needs to cross trait
/// object boundaries.
pub trait Store: Send + Sync {
    fn transact<T>(&self, f: impl FnOnce(&mut dyn Transaction) -> CResult<T>) -> CResult<T>;
}

const DIR_MARKER: u8 = 0x00;
const DATA_PREFIX: u8 = 0x01;

struct Inner {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    next_dir_id: u64,
}

/// An in-memory stand-in for the external KV, used in tests and as the
/// default backend when no cluster file is configured. A single
/// process-wide lock per transaction approximates FDB's serializable
/// isolation: real conflict detection isn't needed for a backend nothing
/// else ever talks to concurrently.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: RwLock::new(Inner {
                data: BTreeMap::new(),
                next_dir_id: 1,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn transact<T>(&self, f: impl FnOnce(&mut dyn Transaction) -> CResult<T>) -> CResult<T> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::internal("memory store lock poisoned"))?;
        let mut tx = MemoryTransaction { inner: &mut guard };
        f(&mut tx)
    }
}

struct MemoryTransaction<'a> {
    inner: &'a mut Inner,
}

fn marker_key(path: &[String]) -> Vec<u8> {
    let values: Vec<Value> = path.iter().cloned().map(Value::Text).collect();
    let mut key = vec![DIR_MARKER];
    key.extend_from_slice(&tuple::pack(&values));
    key
}

fn data_subspace(id: u64) -> Subspace {
    let mut prefix = vec![DATA_PREFIX];
    prefix.extend_from_slice(&id.to_be_bytes());
    Subspace::new(prefix)
}

impl<'a> Transaction for MemoryTransaction<'a> {
    fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        Ok(self.inner.data.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.inner.data.insert(key.to_vec(), value.to_vec());
    }

    fn clear(&mut self, key: &[u8]) {
        self.inner.data.remove(key);
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        let keys: Vec<Vec<u8>> = self
            .inner
            .data
            .range((Bound::Included(begin.to_vec()), Bound::Excluded(end.to_vec())))
            .map(|(k, _)| k.clone())
            .collect();
        for k in keys {
            self.inner.data.remove(&k);
        }
    }

    fn range(&mut self, begin: &[u8], end: &[u8], limit: Option<usize>, reverse: bool) -> CResult<Vec<KvPair>> {
        let iter = self
            .inner
            .data
            .range((Bound::Included(begin.to_vec()), Bound::Excluded(end.to_vec())));
        let mut pairs: Vec<KvPair> = if reverse {
            iter.rev().map(|(k, v)| (k.clone(), v.clone())).collect()
        } else {
            iter.map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if let Some(n) = limit {
            pairs.truncate(n);
        }
        Ok(pairs)
    }

    fn dir_create_or_open(&mut self, path: &[String]) -> CResult<Subspace> {
        let key = marker_key(path);
        if let Some(existing) = self.inner.data.get(&key) {
            let id = u64::from_be_bytes(existing.as_slice().try_into().map_err(|_| {
                Error::internal("corrupt directory marker")
            })?);
            return Ok(data_subspace(id));
        }
        let id = self.inner.next_dir_id;
        self.inner.next_dir_id += 1;
        self.inner.data.insert(key, id.to_be_bytes().to_vec());
        Ok(data_subspace(id))
    }

    fn dir_open(&mut self, path: &[String]) -> CResult<Option<Subspace>> {
        let key = marker_key(path);
        match self.inner.data.get(&key) {
            Some(bytes) => {
                let id = u64::from_be_bytes(
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| Error::internal("corrupt directory marker"))?,
                );
                Ok(Some(data_subspace(id)))
            }
            None => Ok(None),
        }
    }

    fn dir_exists(&mut self, path: &[String]) -> CResult<bool> {
        Ok(self.inner.data.contains_key(&marker_key(path)))
    }

    fn dir_list(&mut self, path: &[String]) -> CResult<Vec<String>> {
        let prefix_values: Vec<Value> = path.iter().cloned().map(Value::Text).collect();
        let mut prefix = vec![DIR_MARKER];
        prefix.extend_from_slice(&tuple::pack(&prefix_values));
        let end = tuple::strinc(&prefix);

        let mut names = Vec::new();
        for (key, _) in self
            .inner
            .data
            .range((Bound::Included(prefix.clone()), Bound::Excluded(end)))
        {
            let rest = &key[prefix.len()..];
            let tuple = tuple::unpack(rest)?;
            if let Some(Value::Text(child)) = tuple.into_iter().next() {
                if !names.contains(&child) {
                    names.push(child);
                }
            }
        }
        Ok(names)
    }

    fn dir_remove(&mut self, path: &[String]) -> CResult<bool> {
        let existed = self.dir_exists(path)?;
        if !existed {
            return Ok(false);
        }

        // Clear this directory's own row data.
        if let Some(sub) = self.dir_open(path)? {
            let (begin, end) = sub.range(&[]);
            self.clear_range(&begin, &end);
        }

        // Remove this directory's marker plus every descendant's marker
        // and row data, mirroring a recursive directory-layer removal.
        let prefix_values: Vec<Value> = path.iter().cloned().map(Value::Text).collect();
        let mut marker_prefix = vec![DIR_MARKER];
        marker_prefix.extend_from_slice(&tuple::pack(&prefix_values));
        let marker_end = tuple::strinc(&marker_prefix);

        let descendant_markers: Vec<Vec<u8>> = self
            .inner
            .data
            .range((Bound::Included(marker_prefix.clone()), Bound::Excluded(marker_end.clone())))
            .map(|(k, _)| k.clone())
            .collect();

        for marker in &descendant_markers {
            if let Some(bytes) = self.inner.data.get(marker) {
                if let Ok(id_bytes) = <[u8; 8]>::try_from(bytes.as_slice()) {
                    let id = u64::from_be_bytes(id_bytes);
                    let sub = data_subspace(id);
                    let (begin, end) = sub.range(&[]);
                    self.clear_range(&begin, &end);
                }
            }
        }

        self.inner.data.remove(&marker_key(path));
        for marker in descendant_markers {
            self.inner.data.remove(&marker);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_or_open_is_idempotent() {
        let store = MemoryStore::new();
        let (a, b) = store
            .transact(|tx| {
                let a = tx.dir_create_or_open(&path(&["db", "tbl"]))?;
                let b = tx.dir_create_or_open(&path(&["db", "tbl"]))?;
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_paths_get_distinct_subspaces() {
        let store = MemoryStore::new();
        let (a, b) = store
            .transact(|tx| {
                let a = tx.dir_create_or_open(&path(&["db", "t1"]))?;
                let b = tx.dir_create_or_open(&path(&["db", "t2"]))?;
                Ok((a, b))
            })
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn row_data_does_not_collide_with_marker_keys() {
        let store = MemoryStore::new();
        store
            .transact(|tx| {
                let sub = tx.dir_create_or_open(&path(&["db", "t1"]))?;
                let key = sub.pack(&[Value::Int(1)]);
                tx.set(&key, b"row");
                let (begin, end) = sub.range(&[]);
                let rows = tx.range(&begin, &end, None, false)?;
                assert_eq!(rows.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn list_returns_immediate_children_only() {
        let store = MemoryStore::new();
        let names = store
            .transact(|tx| {
                tx.dir_create_or_open(&path(&["db", "t1"]))?;
                tx.dir_create_or_open(&path(&["db", "t2"]))?;
                tx.dir_list(&path(&["db"]))
            })
            .unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"t1".to_string()));
        assert!(names.contains(&"t2".to_string()));
    }

    #[test]
    fn remove_drops_data_and_descendants() {
        let store = MemoryStore::new();
        store
            .transact(|tx| {
                let sub = tx.dir_create_or_open(&path(&["db", "t1"]))?;
                tx.set(&sub.pack(&[Value::Int(1)]), b"row");
                Ok(())
            })
            .unwrap();

        let removed = store.transact(|tx| tx.dir_remove(&path(&["db", "t1"]))).unwrap();
        assert!(removed);

        let still_exists = store.transact(|tx| tx.dir_exists(&path(&["db", "t1"]))).unwrap();
        assert!(!still_exists);

        let again = store.transact(|tx| tx.dir_remove(&path(&["db", "t1"]))).unwrap();
        assert!(!again);
    }
}

//! Directory subspaces: each catalog object (a database, a table, its row
//! space) owns a disjoint byte-prefixed region of the keyspace, the way
//! the directory layer partitions an FDB cluster (§1, §4.2).

use common::value::Value;

use crate::tuple;

/// A byte-prefixed region of the keyspace. Every key this crate hands out
/// to callers above it is relative to some `Subspace`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    pub fn new(prefix: Vec<u8>) -> Self {
        Subspace { prefix }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Pack a tuple of values into an absolute key within this subspace.
    pub fn pack(&self, values: &[Value]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(&tuple::pack(values));
        key
    }

    /// Unpack an absolute key back into the tuple of values relative to
    /// this subspace. Returns `None` if `key` doesn't fall under it.
    pub fn unpack<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
        key.strip_prefix(self.prefix.as_slice())
    }

    /// The `[begin, end)` byte range covering every key in this subspace
    /// whose tuple begins with `values`. An empty `values` covers the
    /// whole subspace.
    pub fn range(&self, values: &[Value]) -> (Vec<u8>, Vec<u8>) {
        let mut begin = self.prefix.clone();
        begin.extend_from_slice(&tuple::pack(values));
        let end = tuple::strinc(&begin);
        (begin, end)
    }

    /// A child subspace nested under this one by a fixed sub-prefix.
    pub fn child(&self, sub: &[u8]) -> Subspace {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(sub);
        Subspace::new(prefix)
    }
}

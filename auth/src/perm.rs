//! The permission lattice (§4.6): `none < read < write`, resolved per
//! request against a user's `{scope -> perm}` map.

use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    None,
    Read,
    Write,
}

impl Perm {
    fn rank(self) -> u8 {
        match self {
            Perm::None => 0,
            Perm::Read => 1,
            Perm::Write => 2,
        }
    }

    pub fn from_str(s: &str) -> Option<Perm> {
        match s {
            "read" => Some(Perm::Read),
            "write" => Some(Perm::Write),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Perm::None => "none",
            Perm::Read => "read",
            Perm::Write => "write",
        }
    }
}

impl PartialOrd for Perm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

impl Ord for Perm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Resolve the effective permission for `(db, table)` against a user's
/// scope map (§4.6 rule 3): `max(perm[db], perm[db.table])`.
pub fn resolve(perm: &HashMap<String, Perm>, db: &str, table: &str) -> Perm {
    let db_perm = perm.get(db).copied().unwrap_or(Perm::None);
    let table_scope = format!("{db}.{table}");
    let table_perm = perm.get(&table_scope).copied().unwrap_or(Perm::None);
    db_perm.max(table_perm)
}

/// Serialize a perm map as semicolon-separated `scope=read|write` pairs.
/// Entries at `Perm::None` carry no information and are omitted.
pub fn serialize(perm: &HashMap<String, Perm>) -> String {
    let mut entries: Vec<(&String, &Perm)> = perm.iter().filter(|(_, p)| **p != Perm::None).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(scope, p)| format!("{scope}={}", p.as_str()))
        .collect::<Vec<_>>()
        .join(";")
}

pub fn deserialize(s: &str) -> HashMap<String, Perm> {
    let mut map = HashMap::new();
    for entry in s.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some((scope, value)) = entry.split_once('=') {
            if let Some(p) = Perm::from_str(value) {
                map.insert(scope.to_string(), p);
            }
        }
    }
    map
}

//! Per-connection prepared-statement table (§4.7, §9): append-only,
//! indexed by position -- the integer handed back to the client is the
//! index into this list, so it must only grow for the life of the
//! connection.

use std::sync::Mutex;

use resolver::{DeletePlan, InsertPlan, SelectPlan};

#[derive(Debug, Clone)]
pub enum Plan {
    Select(SelectPlan),
    Insert(InsertPlan),
    Delete(DeletePlan),
}

impl Plan {
    pub fn num_placeholders(&self) -> usize {
        match self {
            Plan::Select(p) => p.num_placeholders,
            Plan::Insert(p) => p.num_placeholders,
            Plan::Delete(p) => p.num_placeholders,
        }
    }
}

/// A prepared plan plus the SQL text it was parsed from -- kept around so
/// the response cache can key on the original text (§4.7) even when a
/// request addresses the plan by its prepared id rather than by text.
#[derive(Debug, Clone)]
pub struct PreparedEntry {
    pub plan: Plan,
    pub sql: String,
}

#[derive(Default)]
pub struct PreparedTable {
    entries: Mutex<Vec<PreparedEntry>>,
}

impl PreparedTable {
    pub fn new() -> Self {
        PreparedTable { entries: Mutex::new(Vec::new()) }
    }

    /// Append `entry`, returning its position -- the handle the client
    /// will use in subsequent `run`/`batch` commands.
    pub fn add(&self, entry: PreparedEntry) -> usize {
        let mut entries = self.entries.lock().unwrap();
        entries.push(entry);
        entries.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<PreparedEntry> {
        self.entries.lock().unwrap().get(id).cloned()
    }
}

//! Query execution: turns resolved plans (`resolver`) into key-value
//! operations against a `Store`, and owns the process-wide adjustment
//! cache alongside the schema cache it's built beside (§4.5, §4.5.6).

pub mod adj;
pub mod delete;
pub mod insert;
pub mod range;
pub mod select;

pub use adj::AdjustmentCache;
pub use delete::execute_delete;
pub use insert::{execute_batch_insert, execute_insert};
pub use select::{execute_select, Row};

pub(crate) fn table_path(db: &str, table: &str) -> Vec<String> {
    vec!["db".to_string(), db.to_string(), table.to_string()]
}

/// A database's two process-wide caches, reloaded independently but
/// invalidated together on DDL that touches the whole database.
#[derive(Default)]
pub struct Engine {
    pub schemas: catalog::SchemaCache,
    pub adjustments: AdjustmentCache,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            schemas: catalog::SchemaCache::new(),
            adjustments: AdjustmentCache::new(),
        }
    }

    pub fn create_database<S: kv::Store>(&self, store: &S, db: &str) -> common::CResult<()> {
        catalog::create_database(store, db)
    }

    pub fn drop_database<S: kv::Store>(&self, store: &S, db: &str) -> common::CResult<()> {
        catalog::drop_database(store, &self.schemas, db)?;
        self.adjustments.invalidate_database(db);
        Ok(())
    }

    pub fn create_table<S: kv::Store>(
        &self,
        store: &S,
        db: &str,
        table: &str,
        columns: &[(String, common::value::DataType)],
        primary_key: &[String],
        if_not_exists: bool,
    ) -> common::CResult<()> {
        catalog::create_table(store, db, table, columns, primary_key, if_not_exists)
    }

    pub fn drop_table<S: kv::Store>(&self, store: &S, db: &str, table: &str) -> common::CResult<()> {
        catalog::drop_table(store, &self.schemas, db, table)?;
        if adj::table_invalidates_adjustments(table) {
            self.adjustments.invalidate_database(db);
        }
        Ok(())
    }

    pub fn rename_column<S: kv::Store>(&self, store: &S, db: &str, table: &str, from: &str, to: &str) -> common::CResult<()> {
        catalog::rename_column(store, &self.schemas, db, table, from, to)
    }
}

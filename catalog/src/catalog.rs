//! Directory-layer catalog operations (§4.2) plus the process-wide schema
//! cache (§4.5.6, §3 invariant 5).

use std::sync::Arc;

use dashmap::DashMap;

use common::error::Error;
use common::value::DataType;
use common::CResult;
use kv::{Store, Transaction};

use crate::codec;
use crate::schema::Schema;

pub const ADJ_TABLE: &str = "_adj_";

fn db_path(db: &str) -> Vec<String> {
    vec!["db".to_string(), db.to_string()]
}

fn table_path(db: &str, table: &str) -> Vec<String> {
    vec!["db".to_string(), db.to_string(), table.to_string()]
}

fn schema_path(db: &str, table: &str) -> Vec<String> {
    let mut path = table_path(db, table);
    path.push("schema".to_string());
    path
}

pub fn has_database<S: Store>(store: &S, db: &str) -> CResult<bool> {
    store.transact(|tx| tx.dir_exists(&db_path(db)))
}

pub fn has_table<S: Store>(store: &S, db: &str, table: &str) -> CResult<bool> {
    store.transact(|tx| tx.dir_exists(&table_path(db, table)))
}

pub fn list_databases<S: Store>(store: &S) -> CResult<Vec<String>> {
    store.transact(|tx| tx.dir_list(&["db".to_string()]))
}

pub fn list_tables<S: Store>(store: &S, db: &str) -> CResult<Vec<String>> {
    if !has_database(store, db)? {
        return Err(Error::schema(format!("database {db} does not exist")));
    }
    store.transact(|tx| tx.dir_list(&db_path(db)))
}

fn adj_columns() -> Vec<(String, DataType)> {
    vec![
        ("sec".to_string(), DataType::Int),
        ("tm".to_string(), DataType::Timestamp),
        ("px".to_string(), DataType::Double),
        ("vol".to_string(), DataType::Double),
    ]
}

fn adj_primary_key() -> Vec<String> {
    vec!["sec".to_string(), "tm".to_string()]
}

/// Create `db`'s directory and its `_adj_` table. Fails if the database
/// already exists.
pub fn create_database<S: Store>(store: &S, db: &str) -> CResult<()> {
    if has_database(store, db)? {
        return Err(Error::schema(format!("database {db} already exists")));
    }
    store.transact(|tx| {
        tx.dir_create_or_open(&db_path(db))?;
        Ok(())
    })?;
    create_table(store, db, ADJ_TABLE, &adj_columns(), &adj_primary_key(), false)
}

/// Validate the column/PK list, then create the table directory and write
/// its schema key atomically under one transaction.
pub fn create_table<S: Store>(
    store: &S,
    db: &str,
    table: &str,
    column_defs: &[(String, DataType)],
    primary_key: &[String],
    if_not_exists: bool,
) -> CResult<()> {
    if !has_database(store, db)? {
        return Err(Error::schema(format!("database {db} does not exist")));
    }
    if has_table(store, db, table)? {
        if if_not_exists {
            return Ok(());
        }
        return Err(Error::schema(format!("table {db}.{table} already exists")));
    }

    let schema = Schema::build(column_defs, primary_key)?;
    let encoded = codec::encode(&schema);

    store.transact(|tx| {
        tx.dir_create_or_open(&table_path(db, table))?;
        let schema_subspace = tx.dir_create_or_open(&schema_path(db, table))?;
        tx.set(schema_subspace.prefix(), &encoded);
        Ok(())
    })
}

/// Recursively drop every table (invalidating their schema-cache entries),
/// then the database directory itself.
pub fn drop_database<S: Store>(store: &S, cache: &SchemaCache, db: &str) -> CResult<()> {
    if !has_database(store, db)? {
        return Err(Error::schema(format!("database {db} does not exist")));
    }
    for table in list_tables(store, db)? {
        drop_table(store, cache, db, &table)?;
    }
    store.transact(|tx| {
        tx.dir_remove(&db_path(db))?;
        Ok(())
    })
}

/// Remove the schema key and the table's entire key range in one
/// transaction; invalidate the schema cache entry.
pub fn drop_table<S: Store>(store: &S, cache: &SchemaCache, db: &str, table: &str) -> CResult<()> {
    if !has_table(store, db, table)? {
        return Err(Error::schema(format!("table {db}.{table} does not exist")));
    }
    store.transact(|tx| {
        tx.dir_remove(&table_path(db, table))?;
        Ok(())
    })?;
    cache.invalidate(db, table);
    Ok(())
}

/// Rewrite the schema key with `from` renamed to `to`; invalidate the
/// schema cache entry.
pub fn rename_column<S: Store>(store: &S, cache: &SchemaCache, db: &str, table: &str, from: &str, to: &str) -> CResult<()> {
    let schema = cache.get_or_load(store, db, table)?;
    if schema.column(from).is_none() {
        return Err(Error::schema(format!("column {from} does not exist")));
    }
    if schema.column(to).is_some() {
        return Err(Error::schema(format!("column {to} already exists")));
    }

    let primary_key: Vec<String> = schema.keys.iter().map(|c| c.name.clone()).collect();
    let column_defs: Vec<(String, DataType)> = schema
        .columns
        .iter()
        .map(|c| {
            let name = if c.name == from { to.to_string() } else { c.name.clone() };
            (name, c.data_type)
        })
        .collect();
    let renamed = Schema::build(&column_defs, &primary_key)?;
    let encoded = codec::encode(&renamed);

    store.transact(|tx| {
        let schema_subspace = tx
            .dir_open(&schema_path(db, table))?
            .ok_or_else(|| Error::internal("schema directory vanished"))?;
        tx.set(schema_subspace.prefix(), &encoded);
        Ok(())
    })?;
    cache.invalidate(db, table);
    Ok(())
}

/// Process-wide `(db, table) -> schema` cache (§4.5.6). Read-through: a
/// miss costs one transaction, a hit is lock-free.
#[derive(Default)]
pub struct SchemaCache {
    entries: DashMap<(String, String), Arc<Schema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        SchemaCache { entries: DashMap::new() }
    }

    pub fn get_or_load<S: Store>(&self, store: &S, db: &str, table: &str) -> CResult<Arc<Schema>> {
        let key = (db.to_string(), table.to_string());
        if let Some(schema) = self.entries.get(&key) {
            return Ok(schema.clone());
        }
        if !has_table(store, db, table)? {
            return Err(Error::schema(format!("table {db}.{table} does not exist")));
        }
        let schema = store.transact(|tx| {
            let schema_subspace = tx
                .dir_open(&schema_path(db, table))?
                .ok_or_else(|| Error::internal("schema directory missing"))?;
            let bytes = tx
                .get(schema_subspace.prefix())?
                .ok_or_else(|| Error::internal("schema key missing"))?;
            codec::decode(&bytes)
        })?;
        let schema = Arc::new(schema);
        self.entries.insert(key, schema.clone());
        Ok(schema)
    }

    pub fn invalidate(&self, db: &str, table: &str) {
        self.entries.remove(&(db.to_string(), table.to_string()));
    }

    pub fn invalidate_database(&self, db: &str) {
        self.entries.retain(|(d, _), _| d != db);
    }
}

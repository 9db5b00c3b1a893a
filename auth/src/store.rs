//! User loading, login, and password changes against the `_meta_.user`
//! table (§3, §4.6). The user map is loaded wholesale at startup and on
//! `reload_users`; `login`/`chgpasswd` never trigger an implicit load.

use std::sync::Arc;

use dashmap::DashMap;

use common::error::Error;
use common::value::{DataType, Value};
use common::CResult;
use kv::{tuple, Store, Transaction};

use crate::perm::{self, Perm};
use crate::user::{hash_password, User};

pub const META_DB: &str = "_meta_";
pub const USER_TABLE: &str = "user";

fn user_columns() -> Vec<(String, DataType)> {
    vec![
        ("name".to_string(), DataType::Text),
        ("password_hash".to_string(), DataType::Text),
        ("is_admin".to_string(), DataType::Boolean),
        ("perm".to_string(), DataType::Text),
    ]
}

fn table_path() -> Vec<String> {
    vec!["db".to_string(), META_DB.to_string(), USER_TABLE.to_string()]
}

/// Create `_meta_` and its `user` table if they don't already exist.
pub fn bootstrap<S: Store>(store: &S) -> CResult<()> {
    if !catalog::has_database(store, META_DB)? {
        catalog::create_database(store, META_DB)?;
    }
    catalog::create_table(store, META_DB, USER_TABLE, &user_columns(), &["name".to_string()], true)
}

/// Insert or update `name`'s row in `_meta_.user`, independent of the
/// in-memory cache -- callers reload afterwards if they want it visible.
fn put_user_row<S: Store>(store: &S, user: &User) -> CResult<()> {
    store.transact(|tx| {
        let subspace = tx
            .dir_open(&table_path())?
            .ok_or_else(|| Error::internal("_meta_.user table missing"))?;
        let key = subspace.pack(&[Value::Text(user.name.clone())]);
        let value = tuple::pack(&[
            Value::Text(user.password_hash.clone()),
            Value::Boolean(user.is_admin),
            Value::Text(perm::serialize(&user.perm)),
        ]);
        tx.set(&key, &value);
        Ok(())
    })
}

/// Process-wide, concurrently-readable user map (§5 "global user map").
#[derive(Default)]
pub struct UserStore {
    users: DashMap<String, Arc<User>>,
}

impl UserStore {
    pub fn new() -> Self {
        UserStore { users: DashMap::new() }
    }

    /// Create a user with an initial password and permission set, both in
    /// the KV and in the in-memory map.
    pub fn create_user<S: Store>(&self, store: &S, name: &str, password: &str, is_admin: bool, perm: std::collections::HashMap<String, Perm>) -> CResult<()> {
        let user = User {
            name: name.to_string(),
            password_hash: hash_password(password),
            is_admin,
            perm,
        };
        put_user_row(store, &user)?;
        self.users.insert(name.to_string(), Arc::new(user));
        Ok(())
    }

    /// Full reload from `_meta_.user` (§4.6 "loaded at startup and on the
    /// `reload_users` meta command"). Replaces the map wholesale.
    pub fn load_users<S: Store>(&self, store: &S) -> CResult<()> {
        let rows = store.transact(|tx| {
            let subspace = match tx.dir_open(&table_path())? {
                Some(s) => s,
                None => return Ok(Vec::new()),
            };
            let (begin, end) = subspace.range(&[]);
            let pairs = tx.range(&begin, &end, None, false)?;
            let mut rows = Vec::with_capacity(pairs.len());
            for (raw_key, raw_value) in pairs {
                let key_tail = subspace
                    .unpack(&raw_key)
                    .ok_or_else(|| Error::internal("user row key outside table subspace"))?;
                let key_tuple = tuple::unpack(key_tail)?;
                let value_tuple = tuple::unpack(&raw_value)?;
                rows.push((key_tuple, value_tuple));
            }
            Ok(rows)
        })?;

        let mut loaded = Vec::with_capacity(rows.len());
        for (key_tuple, value_tuple) in rows {
            let name = match key_tuple.first() {
                Some(Value::Text(s)) => s.clone(),
                _ => return Err(Error::internal("corrupt user row: missing name")),
            };
            let password_hash = match value_tuple.first() {
                Some(Value::Text(s)) => s.clone(),
                _ => return Err(Error::internal("corrupt user row: missing password_hash")),
            };
            let is_admin = match value_tuple.get(1) {
                Some(Value::Boolean(b)) => *b,
                _ => return Err(Error::internal("corrupt user row: missing is_admin")),
            };
            let perm_map = match value_tuple.get(2) {
                Some(Value::Text(s)) => perm::deserialize(s),
                _ => return Err(Error::internal("corrupt user row: missing perm")),
            };
            loaded.push(User { name, password_hash, is_admin, perm: perm_map });
        }

        self.users.clear();
        for user in loaded {
            self.users.insert(user.name.clone(), Arc::new(user));
        }
        Ok(())
    }

    /// Verify `name`/`password` against the loaded map.
    pub fn login(&self, name: &str, password: &str) -> CResult<Arc<User>> {
        let user = self.users.get(name).ok_or_else(|| Error::auth(format!("unknown user {name}")))?;
        if !user.check_password(password) {
            return Err(Error::auth("password mismatch"));
        }
        Ok(user.clone())
    }

    /// Rewrite `name`'s hash in the KV and the in-memory map.
    pub fn chgpasswd<S: Store>(&self, store: &S, name: &str, new_password: &str) -> CResult<()> {
        let existing = self.users.get(name).ok_or_else(|| Error::auth(format!("unknown user {name}")))?.clone();
        let updated = User {
            name: existing.name.clone(),
            password_hash: hash_password(new_password),
            is_admin: existing.is_admin,
            perm: existing.perm.clone(),
        };
        put_user_row(store, &updated)?;
        self.users.insert(name.to_string(), Arc::new(updated));
        Ok(())
    }

    /// §4.6 rule 1: with no authenticated user (the feature disabled),
    /// every request is granted write.
    pub fn effective_perm(user: Option<&User>, db: &str, table: &str) -> Perm {
        match user {
            None => Perm::Write,
            Some(u) => u.effective_perm(db, table),
        }
    }
}

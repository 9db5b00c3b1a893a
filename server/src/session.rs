//! Per-connection dispatch (§4.7, §6): owns the connection's selected
//! database, authenticated user, protocol flag, and prepared-statement
//! table, and turns a decoded [`Request`] into a [`Reply`]. Kept free of
//! any I/O so it can run on a blocking-pool thread per the KV's
//! synchronous contract (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use auth::{Perm, User};
use catalog::Column;
use common::error::Error;
use common::value::{DataType, RawValue};
use common::CResult;
use kv::Store;
use resolver::SelectPlan;
use sql::Stmt;

use crate::prepared::{Plan, PreparedEntry, PreparedTable};
use crate::shared::Shared;
use crate::wire::{rows_to_wire, Reply, ReplyBody, Request, WireValue};

struct ConnState {
    database: Option<String>,
    user: Option<Arc<User>>,
}

pub struct Session<S: Store> {
    shared: Arc<Shared<S>>,
    state: Mutex<ConnState>,
    prepared: PreparedTable,
    use_json: AtomicBool,
}

impl<S: Store> Session<S> {
    pub fn new(shared: Arc<Shared<S>>) -> Self {
        Session {
            shared,
            state: Mutex::new(ConnState { database: None, user: None }),
            prepared: PreparedTable::new(),
            use_json: AtomicBool::new(false),
        }
    }

    pub fn is_json(&self) -> bool {
        self.use_json.load(Ordering::Relaxed)
    }

    pub fn set_json(&self) {
        self.use_json.store(true, Ordering::Relaxed);
    }

    /// Decode, dispatch, and envelope one request -- never returns an
    /// `Err` itself, since every failure becomes a reply carrying an
    /// error string (§7).
    pub fn dispatch(&self, req: Request) -> Reply {
        let id = req.id;
        let body = match self.handle(&req) {
            Ok(v) => ReplyBody::Result(v),
            Err(e) => ReplyBody::Error(e.to_string()),
        };
        Reply { id, body }
    }

    fn handle(&self, req: &Request) -> CResult<WireValue> {
        match req.cmd.as_str() {
            "use" => self.cmd_use(req),
            "login" => self.cmd_login(req),
            "prepare" => self.cmd_prepare(req),
            "run" => self.cmd_run(req),
            "batch" => self.cmd_batch(req),
            "meta" => self.cmd_meta(req),
            other => Err(Error::plan(format!("unknown command {other}"))),
        }
    }

    fn text_arg2(&self, req: &Request) -> CResult<String> {
        match &req.arg2 {
            Some(WireValue::Text(s)) => Ok(s.clone()),
            _ => Err(Error::plan("this command requires a text argument in field \"2\"")),
        }
    }

    fn int_arg2(&self, req: &Request) -> CResult<i64> {
        match &req.arg2 {
            Some(WireValue::Int(v)) => Ok(*v),
            _ => Err(Error::plan("this command requires an integer argument in field \"2\"")),
        }
    }

    fn current_db(&self) -> CResult<String> {
        self.state.lock().unwrap().database.clone().ok_or_else(|| Error::plan("no database selected"))
    }

    fn resolve_db(&self, explicit: &Option<String>) -> CResult<String> {
        match explicit {
            Some(db) => Ok(db.clone()),
            None => self.current_db(),
        }
    }

    fn current_user(&self) -> Option<Arc<User>> {
        self.state.lock().unwrap().user.clone()
    }

    fn require_perm(&self, db: &str, table: &str, needed: Perm) -> CResult<()> {
        let user = self.current_user();
        let perm = auth::UserStore::effective_perm(user.as_deref(), db, table);
        if perm < needed {
            return Err(Error::auth(format!("insufficient permission for {db}.{table}")));
        }
        Ok(())
    }

    /// §6 `use`: fails if the database doesn't exist or the connection's
    /// user has no access at all to it.
    fn select_database(&self, db: &str) -> CResult<()> {
        if !catalog::has_database(&self.shared.store, db)? {
            return Err(Error::schema(format!("database {db} does not exist")));
        }
        self.require_perm(db, "", Perm::Read)?;
        self.state.lock().unwrap().database = Some(db.to_string());
        Ok(())
    }

    fn cmd_use(&self, req: &Request) -> CResult<WireValue> {
        let db = self.text_arg2(req)?;
        self.select_database(&db)?;
        Ok(WireValue::Null)
    }

    fn cmd_login(&self, req: &Request) -> CResult<WireValue> {
        let name = self.text_arg2(req)?;
        let password = match req.arg3.first() {
            Some(WireValue::Text(s)) => s.clone(),
            _ => return Err(Error::auth("login requires a password as its first argument")),
        };
        let user = self.shared.users.login(&name, &password)?;
        self.state.lock().unwrap().user = Some(user);
        if let Some(WireValue::Text(db)) = req.arg3.get(1) {
            self.select_database(db)?;
        }
        Ok(WireValue::Null)
    }

    fn resolve_for_prepare(&self, stmt: Stmt) -> CResult<Plan> {
        match stmt {
            Stmt::Select(s) => {
                let db = self.resolve_db(&s.table.database)?;
                let schema = self.shared.engine.schemas.get_or_load(&self.shared.store, &db, &s.table.table)?;
                Ok(Plan::Select(resolver::resolve_select(&db, schema, &s)?))
            }
            Stmt::Insert(s) => {
                let db = self.resolve_db(&s.table.database)?;
                let schema = self.shared.engine.schemas.get_or_load(&self.shared.store, &db, &s.table.table)?;
                Ok(Plan::Insert(resolver::resolve_insert(&db, schema, &s)?))
            }
            Stmt::Delete(s) => {
                let db = self.resolve_db(&s.table.database)?;
                let schema = self.shared.engine.schemas.get_or_load(&self.shared.store, &db, &s.table.table)?;
                Ok(Plan::Delete(resolver::resolve_delete(&db, schema, &s)?))
            }
            _ => Err(Error::plan("only SELECT, INSERT, and DELETE statements can be prepared")),
        }
    }

    fn cmd_prepare(&self, req: &Request) -> CResult<WireValue> {
        let sql = self.text_arg2(req)?;
        let stmt = sql::parse(&sql)?;
        let plan = self.resolve_for_prepare(stmt)?;
        let id = self.prepared.add(PreparedEntry { plan, sql });
        Ok(WireValue::Int(id as i64))
    }

    fn run_select(&self, plan: &SelectPlan, sql_text: &str, args: &[RawValue], use_cache: bool) -> CResult<WireValue> {
        if use_cache {
            if let Some(cache) = &self.shared.cache {
                if let Some(hit) = cache.get(sql_text, args, self.is_json()) {
                    return Ok(hit);
                }
            }
        }
        let rows = executor::execute_select(&self.shared.store, &self.shared.engine.adjustments, plan, args)?;
        let wire = rows_to_wire(&rows);
        if use_cache {
            if let Some(cache) = &self.shared.cache {
                cache.put(sql_text, args, self.is_json(), wire.clone());
            }
        }
        Ok(wire)
    }

    fn execute_plan(&self, plan: &Plan, sql_text: &str, args: &[RawValue], use_cache: bool) -> CResult<WireValue> {
        match plan {
            Plan::Select(p) => {
                self.require_perm(&p.database, &p.table, Perm::Read)?;
                self.run_select(p, sql_text, args, use_cache)
            }
            Plan::Insert(p) => {
                self.require_perm(&p.database, &p.table, Perm::Write)?;
                executor::execute_insert(&self.shared.store, &self.shared.engine.adjustments, p, args)?;
                Ok(WireValue::Null)
            }
            Plan::Delete(p) => {
                self.require_perm(&p.database, &p.table, Perm::Write)?;
                executor::execute_delete(&self.shared.store, &self.shared.engine.adjustments, p, args)?;
                Ok(WireValue::Null)
            }
        }
    }

    fn execute_parsed(&self, stmt: Stmt, sql_text: &str, args: &[RawValue], use_cache: bool) -> CResult<WireValue> {
        match stmt {
            Stmt::Select(s) => {
                let db = self.resolve_db(&s.table.database)?;
                self.require_perm(&db, &s.table.table, Perm::Read)?;
                let schema = self.shared.engine.schemas.get_or_load(&self.shared.store, &db, &s.table.table)?;
                let plan = resolver::resolve_select(&db, schema, &s)?;
                self.run_select(&plan, sql_text, args, use_cache)
            }
            Stmt::Insert(s) => {
                let db = self.resolve_db(&s.table.database)?;
                self.require_perm(&db, &s.table.table, Perm::Write)?;
                let schema = self.shared.engine.schemas.get_or_load(&self.shared.store, &db, &s.table.table)?;
                let plan = resolver::resolve_insert(&db, schema, &s)?;
                executor::execute_insert(&self.shared.store, &self.shared.engine.adjustments, &plan, args)?;
                Ok(WireValue::Null)
            }
            Stmt::Delete(s) => {
                let db = self.resolve_db(&s.table.database)?;
                self.require_perm(&db, &s.table.table, Perm::Write)?;
                let schema = self.shared.engine.schemas.get_or_load(&self.shared.store, &db, &s.table.table)?;
                let plan = resolver::resolve_delete(&db, schema, &s)?;
                executor::execute_delete(&self.shared.store, &self.shared.engine.adjustments, &plan, args)?;
                Ok(WireValue::Null)
            }
            Stmt::CreateDatabase { name, if_not_exists } => {
                self.require_perm(&name, "", Perm::Write)?;
                if if_not_exists && catalog::has_database(&self.shared.store, &name)? {
                    return Ok(WireValue::Null);
                }
                self.shared.engine.create_database(&self.shared.store, &name)?;
                Ok(WireValue::Null)
            }
            Stmt::CreateTable(stmt) => {
                let db = self.resolve_db(&stmt.table.database)?;
                self.require_perm(&db, &stmt.table.table, Perm::Write)?;
                let columns: Vec<(String, DataType)> = stmt.columns.iter().map(|c| (c.name.clone(), c.type_name)).collect();
                self.shared.engine.create_table(
                    &self.shared.store,
                    &db,
                    &stmt.table.table,
                    &columns,
                    &stmt.primary_key,
                    stmt.if_not_exists,
                )?;
                Ok(WireValue::Null)
            }
            Stmt::DropDatabase { name } => {
                self.require_perm(&name, "", Perm::Write)?;
                self.shared.engine.drop_database(&self.shared.store, &name)?;
                Ok(WireValue::Null)
            }
            Stmt::DropTable { table } => {
                let db = self.resolve_db(&table.database)?;
                self.require_perm(&db, &table.table, Perm::Write)?;
                self.shared.engine.drop_table(&self.shared.store, &db, &table.table)?;
                Ok(WireValue::Null)
            }
            Stmt::AlterTableRenameColumn { table, from, to } => {
                let db = self.resolve_db(&table.database)?;
                self.require_perm(&db, &table.table, Perm::Write)?;
                self.shared.engine.rename_column(&self.shared.store, &db, &table.table, &from, &to)?;
                Ok(WireValue::Null)
            }
        }
    }

    fn cmd_run(&self, req: &Request) -> CResult<WireValue> {
        let args: Vec<RawValue> = req.arg3.iter().cloned().map(WireValue::into_raw).collect::<CResult<_>>()?;
        match &req.arg2 {
            Some(WireValue::Text(sql)) => {
                let stmt = sql::parse(sql)?;
                self.execute_parsed(stmt, sql, &args, req.use_cache)
            }
            Some(WireValue::Int(id)) => {
                let entry = self
                    .prepared
                    .get(*id as usize)
                    .ok_or_else(|| Error::plan(format!("no prepared statement at position {id}")))?;
                if args.len() != entry.plan.num_placeholders() {
                    return Err(Error::plan(format!(
                        "expected {} arguments, got {}",
                        entry.plan.num_placeholders(),
                        args.len()
                    )));
                }
                self.execute_plan(&entry.plan, &entry.sql, &args, req.use_cache)
            }
            _ => Err(Error::plan("run requires sql text or a prepared id in field \"2\"")),
        }
    }

    fn cmd_batch(&self, req: &Request) -> CResult<WireValue> {
        let id = self.int_arg2(req)? as usize;
        let entry = self.prepared.get(id).ok_or_else(|| Error::plan(format!("no prepared statement at position {id}")))?;
        let plan = match &entry.plan {
            Plan::Insert(p) => p,
            _ => return Err(Error::plan("batch only supports prepared INSERT plans")),
        };
        self.require_perm(&plan.database, &plan.table, Perm::Write)?;

        let rows: Vec<Vec<RawValue>> = req
            .arg3
            .iter()
            .map(|row| match row {
                WireValue::Array(items) => items.iter().cloned().map(WireValue::into_raw).collect::<CResult<Vec<_>>>(),
                _ => Err(Error::plan("batch arguments must be an array of arrays")),
            })
            .collect::<CResult<_>>()?;

        let expected = plan.num_placeholders;
        if rows.iter().any(|row| row.len() != expected) {
            return Err(Error::plan(format!("every batch row must have {expected} arguments")));
        }

        executor::execute_batch_insert(&self.shared.store, &self.shared.engine.adjustments, plan, &rows)?;
        Ok(WireValue::Null)
    }

    fn column_pair(c: &Column) -> WireValue {
        WireValue::Array(vec![WireValue::Text(c.name.clone()), WireValue::Text(c.data_type.name().to_string())])
    }

    fn cmd_meta(&self, req: &Request) -> CResult<WireValue> {
        let subcmd = self.text_arg2(req)?;
        match subcmd.as_str() {
            "list_databases" => {
                let dbs = catalog::list_databases(&self.shared.store)?;
                Ok(WireValue::Array(dbs.into_iter().map(WireValue::Text).collect()))
            }
            "list_tables" => {
                let db = self.current_db()?;
                let tables = catalog::list_tables(&self.shared.store, &db)?;
                Ok(WireValue::Array(tables.into_iter().map(WireValue::Text).collect()))
            }
            "schema" => {
                let table = match req.arg3.first() {
                    Some(WireValue::Text(s)) => s.clone(),
                    _ => return Err(Error::plan("schema requires a table name argument")),
                };
                let db = self.current_db()?;
                let schema = self.shared.engine.schemas.get_or_load(&self.shared.store, &db, &table)?;
                let keys = WireValue::Array(schema.keys.iter().map(Self::column_pair).collect());
                let values = WireValue::Array(schema.values.iter().map(Self::column_pair).collect());
                Ok(WireValue::Array(vec![keys, values]))
            }
            "chgpasswd" => {
                let new_password = match req.arg3.first() {
                    Some(WireValue::Text(s)) => s.clone(),
                    _ => return Err(Error::plan("chgpasswd requires a new password argument")),
                };
                let user = self.current_user().ok_or_else(|| Error::auth("chgpasswd requires an authenticated connection"))?;
                self.shared.users.chgpasswd(&self.shared.store, &user.name, &new_password)?;
                Ok(WireValue::Null)
            }
            "reload_users" => {
                let is_admin = self.current_user().map(|u| u.is_admin).unwrap_or(false);
                if !is_admin {
                    return Err(Error::auth("reload_users is admin-only"));
                }
                self.shared.users.load_users(&self.shared.store)?;
                Ok(WireValue::Null)
            }
            other => Err(Error::plan(format!("unknown meta subcommand {other}"))),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use kv::MemoryStore;

    use super::*;
    use crate::wire::WireValue;

    fn session() -> Session<MemoryStore> {
        let shared = Shared::new(MemoryStore::new(), Some(60), 4).unwrap();
        Session::new(Arc::new(shared))
    }

    fn run(session: &Session<MemoryStore>, cmd: &str, arg2: Option<WireValue>, arg3: Vec<WireValue>) -> Reply {
        session.dispatch(Request { id: 1, cmd: cmd.to_string(), arg2, arg3, use_cache: false })
    }

    #[test]
    fn end_to_end_create_insert_select() {
        let session = session();
        assert!(matches!(
            run(&session, "run", Some(WireValue::Text("CREATE DATABASE t".to_string())), vec![]).body,
            ReplyBody::Result(_)
        ));
        assert!(matches!(
            run(
                &session,
                "run",
                Some(WireValue::Text("CREATE TABLE x(a Int, b Timestamp, c Double, PRIMARY KEY(a, b))".to_string())),
                vec![]
            )
            .body,
            ReplyBody::Result(_)
        ));
        let reply = run(
            &session,
            "run",
            Some(WireValue::Text("INSERT INTO x(a,b,c) VALUES(1, 100, 2.5)".to_string())),
            vec![],
        );
        assert!(matches!(reply.body, ReplyBody::Result(_)));

        let reply = run(
            &session,
            "run",
            Some(WireValue::Text("SELECT * FROM x WHERE a=1 AND b=100".to_string())),
            vec![],
        );
        match reply.body {
            ReplyBody::Result(WireValue::Array(rows)) => {
                assert_eq!(rows.len(), 1);
                match &rows[0] {
                    WireValue::Array(cols) => assert_eq!(cols.len(), 3),
                    _ => panic!("expected a row array"),
                }
            }
            _ => panic!("expected a result"),
        }
    }

    #[test]
    fn read_only_user_cannot_insert() {
        let session = session();
        run(&session, "run", Some(WireValue::Text("CREATE DATABASE t".to_string())), vec![]);
        run(
            &session,
            "run",
            Some(WireValue::Text("CREATE TABLE x(a Int, b Int, PRIMARY KEY(a))".to_string())),
            vec![],
        );

        let mut perm = HashMap::new();
        perm.insert("t".to_string(), Perm::Read);
        session.shared.users.create_user(&session.shared.store, "reader", "pw", false, perm).unwrap();
        run(&session, "login", Some(WireValue::Text("reader".to_string())), vec![WireValue::Text("pw".to_string())]);

        let reply = run(&session, "run", Some(WireValue::Text("SELECT * FROM t.x WHERE a=1".to_string())), vec![]);
        assert!(matches!(reply.body, ReplyBody::Result(_)));

        let reply = run(
            &session,
            "run",
            Some(WireValue::Text("INSERT INTO t.x(a,b) VALUES(1,1)".to_string())),
            vec![],
        );
        assert!(matches!(reply.body, ReplyBody::Error(_)));
    }

    #[test]
    fn prepare_then_batch_insert() {
        let session = session();
        run(&session, "run", Some(WireValue::Text("CREATE DATABASE t".to_string())), vec![]);
        run(&session, "use", Some(WireValue::Text("t".to_string())), vec![]);
        run(
            &session,
            "run",
            Some(WireValue::Text("CREATE TABLE x(a Int, b Int, PRIMARY KEY(a))".to_string())),
            vec![],
        );
        let reply = run(
            &session,
            "prepare",
            Some(WireValue::Text("INSERT INTO x(a,b) VALUES(?,?)".to_string())),
            vec![],
        );
        let id = match reply.body {
            ReplyBody::Result(WireValue::Int(id)) => id,
            _ => panic!("expected prepared id"),
        };

        let reply = run(
            &session,
            "batch",
            Some(WireValue::Int(id)),
            vec![
                WireValue::Array(vec![WireValue::Int(1), WireValue::Int(10)]),
                WireValue::Array(vec![WireValue::Int(2), WireValue::Int(20)]),
            ],
        );
        assert!(matches!(reply.body, ReplyBody::Result(_)));

        let reply = run(&session, "run", Some(WireValue::Text("SELECT * FROM x WHERE a=1".to_string())), vec![]);
        match reply.body {
            ReplyBody::Result(WireValue::Array(rows)) => assert_eq!(rows.len(), 1),
            _ => panic!("expected a result"),
        }
    }

    #[test]
    fn meta_schema_reports_key_and_value_columns() {
        let session = session();
        run(&session, "run", Some(WireValue::Text("CREATE DATABASE t".to_string())), vec![]);
        run(&session, "use", Some(WireValue::Text("t".to_string())), vec![]);
        run(
            &session,
            "run",
            Some(WireValue::Text("CREATE TABLE x(a Int, b Double, PRIMARY KEY(a))".to_string())),
            vec![],
        );

        let reply = run(&session, "meta", Some(WireValue::Text("schema".to_string())), vec![WireValue::Text("x".to_string())]);
        match reply.body {
            ReplyBody::Result(WireValue::Array(parts)) => {
                assert_eq!(parts.len(), 2);
            }
            _ => panic!("expected a result"),
        }
    }
}

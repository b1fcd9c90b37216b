//! SQLite-backed storage adapter. One row per object, keyed by
//! (namespace, name), plus a single-row revision counter.
//! Simple and synchronous; every mutation is one transaction.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use dualwrite_core::prelude::*;
use dualwrite_core::{rules, Capabilities, LabelSelector};
use metrics::{counter, histogram};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

pub struct SqliteStore {
    db: Mutex<Connection>,
    caps: Capabilities,
}

impl SqliteStore {
    /// Open the database at `$<env_var>` or `~/.dualwrite/<file>`.
    pub fn open_default(env_var: &str, file: &str) -> Result<Self> {
        let path = std::env::var(env_var).unwrap_or_else(|_| default_db_path(file));
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        let me = Self::init(db)?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path, "sqlite store opened");
        Ok(me)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("opening in-memory sqlite db")?;
        Self::init(db)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS resources (
                namespace TEXT NOT NULL,
                name      TEXT NOT NULL,
                rv        INTEGER NOT NULL,
                body      TEXT NOT NULL,
                PRIMARY KEY (namespace, name)
            );
            CREATE TABLE IF NOT EXISTS revision (
                id    INTEGER PRIMARY KEY CHECK (id = 0),
                value INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO revision(id, value) VALUES (0, 0);",
        )
        .context("creating resources schema")?;
        Ok(Self { db: Mutex::new(db), caps: Capabilities::ALL })
    }

    /// Restrict the operations this instance serves; others return `Unsupported`.
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    fn require(&self, op: Operation) -> StorageResult<()> {
        if self.caps.supports(op) {
            Ok(())
        } else {
            Err(StorageError::Unsupported { operation: op })
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StorageError::Fatal("sqlite connection lock poisoned".into()))
    }

    /// Run `f` in a transaction; rolled back unless `commit` is set.
    fn with_tx<T>(&self, commit: bool, f: impl FnOnce(&Transaction<'_>) -> StorageResult<T>) -> StorageResult<T> {
        let started = std::time::Instant::now();
        let mut db = self.lock()?;
        let tx = db.transaction().map_err(db_err)?;
        let out = f(&tx)?;
        if commit {
            tx.commit().map_err(db_err)?;
            counter!("persist_commits_total", 1u64);
        }
        histogram!("persist_tx_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn remove_one(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&Validator>,
        opts: &DeleteOptions,
    ) -> StorageResult<Resource> {
        self.with_tx(!opts.dry_run, |tx| {
            let existing = load(tx, &ctx.namespace, name)?.ok_or_else(|| StorageError::not_found(name))?;
            rules::check_preconditions(&existing, opts.preconditions.as_ref())?;
            if let Some(v) = validate {
                v(&existing, None)?;
            }
            tx.execute("DELETE FROM resources WHERE namespace = ?1 AND name = ?2", (&ctx.namespace, name))
                .map_err(db_err)?;
            next_version(tx)?;
            Ok(existing)
        })
    }
}

fn db_err(e: rusqlite::Error) -> StorageError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StorageError::Transient(e.to_string()),
        _ => StorageError::Fatal(e.to_string()),
    }
}

fn decode(body: &str) -> StorageResult<Resource> {
    serde_json::from_str(body).map_err(|e| StorageError::Fatal(format!("corrupt resource row: {e}")))
}

fn load(conn: &Connection, ns: &str, name: &str) -> StorageResult<Option<Resource>> {
    let body: Option<String> = conn
        .query_row("SELECT body FROM resources WHERE namespace = ?1 AND name = ?2", (ns, name), |row| row.get(0))
        .optional()
        .map_err(db_err)?;
    body.as_deref().map(decode).transpose()
}

fn save(conn: &Connection, obj: &Resource) -> StorageResult<()> {
    let body = serde_json::to_string(obj).map_err(|e| StorageError::Invalid(format!("encoding resource: {e}")))?;
    let rv: i64 = obj.resource_version().and_then(|v| v.parse().ok()).unwrap_or(0);
    conn.execute(
        "INSERT OR REPLACE INTO resources(namespace, name, rv, body) VALUES (?1, ?2, ?3, ?4)",
        (&obj.metadata.namespace, &obj.metadata.name, rv, &body),
    )
    .map_err(db_err)?;
    Ok(())
}

fn next_version(conn: &Connection) -> StorageResult<String> {
    conn.execute("UPDATE revision SET value = value + 1 WHERE id = 0", []).map_err(db_err)?;
    current_revision(conn).map(|v| v.to_string())
}

fn current_revision(conn: &Connection) -> StorageResult<i64> {
    conn.query_row("SELECT value FROM revision WHERE id = 0", [], |row| row.get(0)).map_err(db_err)
}

fn load_namespace(conn: &Connection, ns: &str, sel: &LabelSelector) -> StorageResult<Vec<Resource>> {
    let mut stmt = conn.prepare("SELECT body FROM resources WHERE namespace = ?1 ORDER BY name").map_err(db_err)?;
    let mut rows = stmt.query([ns]).map_err(db_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(db_err)? {
        let body: String = row.get(0).map_err(db_err)?;
        let obj = decode(&body)?;
        if sel.matches(&obj.metadata) {
            out.push(obj);
        }
    }
    Ok(out)
}

#[async_trait::async_trait]
impl StorageAdapter for SqliteStore {
    fn capabilities(&self) -> Capabilities { self.caps }

    async fn create(
        &self,
        ctx: &RequestContext,
        obj: Resource,
        validate: Option<Validator>,
        opts: &CreateOptions,
    ) -> StorageResult<Resource> {
        ctx.check()?;
        self.require(Operation::Create)?;
        rules::check_name(obj.name())?;
        if let Some(v) = &validate {
            v(&obj, None)?;
        }
        let created = self.with_tx(!opts.dry_run, |tx| {
            if load(tx, &ctx.namespace, obj.name())?.is_some() {
                return Err(StorageError::Conflict(format!("{} already exists", obj.name())));
            }
            let mut obj = obj;
            obj.metadata.namespace = ctx.namespace.clone();
            obj.metadata.uid = Some(Uuid::new_v4().to_string());
            obj.metadata.resource_version = Some(next_version(tx)?);
            obj.metadata.generation = 1;
            obj.metadata.creation_ts = chrono::Utc::now().timestamp();
            save(tx, &obj)?;
            Ok(obj)
        })?;
        debug!(ns = %ctx.namespace, name = %created.name(), dry_run = opts.dry_run, "sqlite: created");
        Ok(created)
    }

    async fn get(&self, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StorageResult<Resource> {
        ctx.check()?;
        self.require(Operation::Get)?;
        let db = self.lock()?;
        let found = load(&db, &ctx.namespace, name)?.ok_or_else(|| StorageError::not_found(name))?;
        rules::check_version(name, found.resource_version(), opts.resource_version.as_deref())?;
        Ok(found)
    }

    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StorageResult<ResourceList> {
        ctx.check()?;
        self.require(Operation::List)?;
        let sel = LabelSelector::from_option(opts.label_selector.as_deref())?;
        let db = self.lock()?;
        let items = load_namespace(&db, &ctx.namespace, &sel)?;
        let revision = current_revision(&db)?;
        Ok(rules::paginate(items, opts, Some(revision.to_string())))
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        obj: Resource,
        validate: Option<Validator>,
        opts: &UpdateOptions,
    ) -> StorageResult<UpdateOutcome> {
        ctx.check()?;
        self.require(Operation::Update)?;
        rules::check_name(name)?;
        let mut obj = obj;
        if obj.metadata.name.is_empty() {
            obj.metadata.name = name.to_string();
        } else if obj.metadata.name != name {
            return Err(StorageError::Invalid(format!("name {:?} does not match {name:?}", obj.metadata.name)));
        }
        self.with_tx(!opts.dry_run, |tx| {
            let existing = load(tx, &ctx.namespace, name)?;
            let created = existing.is_none();
            match &existing {
                None if !opts.force_allow_create => return Err(StorageError::not_found(name)),
                None => {
                    if let Some(v) = &validate {
                        v(&obj, None)?;
                    }
                    obj.metadata.uid = Some(Uuid::new_v4().to_string());
                    obj.metadata.generation = 1;
                    obj.metadata.creation_ts = chrono::Utc::now().timestamp();
                }
                Some(old) => {
                    rules::check_version(name, old.resource_version(), obj.resource_version())?;
                    if let Some(v) = &validate {
                        v(&obj, Some(old))?;
                    }
                    obj.metadata.uid = old.metadata.uid.clone();
                    obj.metadata.generation = old.metadata.generation + 1;
                    obj.metadata.creation_ts = old.metadata.creation_ts;
                }
            }
            obj.metadata.namespace = ctx.namespace.clone();
            obj.metadata.resource_version = Some(next_version(tx)?);
            save(tx, &obj)?;
            Ok(UpdateOutcome { object: obj, created })
        })
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<Validator>,
        opts: &DeleteOptions,
    ) -> StorageResult<DeleteOutcome> {
        ctx.check()?;
        self.require(Operation::Delete)?;
        let object = self.remove_one(ctx, name, validate.as_ref(), opts)?;
        Ok(DeleteOutcome { object, immediate: true })
    }

    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<Validator>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StorageResult<ResourceList> {
        ctx.check()?;
        self.require(Operation::DeleteCollection)?;
        let sel = LabelSelector::from_option(list_opts.label_selector.as_deref())?;
        let names: Vec<String> = {
            let db = self.lock()?;
            load_namespace(&db, &ctx.namespace, &sel)?.into_iter().map(|r| r.metadata.name).collect()
        };

        let mut deleted = Vec::with_capacity(names.len());
        for name in names {
            let res = ctx.check().and_then(|_| self.remove_one(ctx, &name, validate.as_ref(), opts));
            match res {
                Ok(obj) => deleted.push(obj),
                Err(StorageError::NotFound { .. }) => continue,
                Err(cause) if deleted.is_empty() => return Err(cause),
                Err(cause) => {
                    return Err(StorageError::PartialDeletion { deleted: deleted.len(), cause: Box::new(cause) })
                }
            }
        }
        let revision = current_revision(&*self.lock()?)?;
        debug!(ns = %ctx.namespace, count = deleted.len(), "sqlite: collection deleted");
        Ok(ResourceList { items: deleted, continue_token: None, resource_version: Some(revision.to_string()) })
    }
}

pub fn default_db_path(file: &str) -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".dualwrite");
        let _ = std::fs::create_dir_all(&p);
        p.push(file);
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    file.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("dualwrite-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    fn ctx() -> RequestContext { RequestContext::new("org-1") }

    fn obj(name: &str) -> Resource { Resource::new(name, serde_json::json!({ "title": name })) }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let path = temp_db();
        {
            let s = SqliteStore::open(&path).unwrap();
            s.create(&ctx(), obj("a").with_label("team", "core"), None, &CreateOptions::default()).await.unwrap();
        }
        let s = SqliteStore::open(&path).unwrap();
        let got = s.get(&ctx(), "a", &GetOptions::default()).await.unwrap();
        assert_eq!(got.spec["title"], "a");
        assert_eq!(got.metadata.label("team"), Some("core"));
        assert_eq!(got.resource_version(), Some("1"));
    }

    #[tokio::test]
    async fn create_conflicts_and_versions_increase() {
        let s = SqliteStore::open_in_memory().unwrap();
        let a = s.create(&ctx(), obj("a"), None, &CreateOptions::default()).await.unwrap();
        let b = s.create(&ctx(), obj("b"), None, &CreateOptions::default()).await.unwrap();
        assert_eq!(a.resource_version(), Some("1"));
        assert_eq!(b.resource_version(), Some("2"));
        let err = s.create(&ctx(), obj("a"), None, &CreateOptions::default()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn dry_run_rolls_back() {
        let s = SqliteStore::open_in_memory().unwrap();
        let opts = CreateOptions { dry_run: true, ..Default::default() };
        s.create(&ctx(), obj("a"), None, &opts).await.unwrap();
        assert!(s.get(&ctx(), "a", &GetOptions::default()).await.unwrap_err().is_not_found());
        let created = s.create(&ctx(), obj("a"), None, &CreateOptions::default()).await.unwrap();
        assert_eq!(created.resource_version(), Some("1"));
    }

    #[tokio::test]
    async fn update_and_stale_update() {
        let s = SqliteStore::open_in_memory().unwrap();
        let created = s.create(&ctx(), obj("a"), None, &CreateOptions::default()).await.unwrap();
        let out = s.update(&ctx(), "a", created.clone(), None, &UpdateOptions::default()).await.unwrap();
        assert_eq!(out.object.metadata.generation, 2);
        // `created` still carries the old version
        let err = s.update(&ctx(), "a", created, None, &UpdateOptions::default()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let s = SqliteStore::open_in_memory().unwrap();
        for (n, team) in [("a", "core"), ("b", "edge"), ("c", "core"), ("d", "core")] {
            s.create(&ctx(), obj(n).with_label("team", team), None, &CreateOptions::default()).await.unwrap();
        }
        let opts = ListOptions { label_selector: Some("team=core".into()), limit: Some(2), ..Default::default() };
        let page = s.list(&ctx(), &opts).await.unwrap();
        assert_eq!(page.items.iter().map(|r| r.name()).collect::<Vec<_>>(), vec!["a", "c"]);
        let opts = ListOptions { continue_token: page.continue_token, ..opts };
        let page = s.list(&ctx(), &opts).await.unwrap();
        assert_eq!(page.items.iter().map(|r| r.name()).collect::<Vec<_>>(), vec!["d"]);
        assert!(page.continue_token.is_none());
    }

    #[tokio::test]
    async fn delete_collection_by_selector() {
        let s = SqliteStore::open_in_memory().unwrap();
        for (n, team) in [("a", "core"), ("b", "edge"), ("c", "core")] {
            s.create(&ctx(), obj(n).with_label("team", team), None, &CreateOptions::default()).await.unwrap();
        }
        let list_opts = ListOptions { label_selector: Some("team=core".into()), ..Default::default() };
        let deleted = s.delete_collection(&ctx(), None, &DeleteOptions::default(), &list_opts).await.unwrap();
        assert_eq!(deleted.len(), 2);
        let left = s.list(&ctx(), &ListOptions::default()).await.unwrap();
        assert_eq!(left.items.iter().map(|r| r.name()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn delete_validator_sees_stored_object() {
        let s = SqliteStore::open_in_memory().unwrap();
        s.create(&ctx(), obj("a").with_label("locked", "yes"), None, &CreateOptions::default()).await.unwrap();
        let unlocked_only: Validator = Arc::new(|obj: &Resource, _old: Option<&Resource>| match obj.metadata.label("locked") {
            Some(_) => Err(StorageError::Invalid("locked".into())),
            None => Ok(()),
        });
        let err = s.delete(&ctx(), "a", Some(unlocked_only), &DeleteOptions::default()).await.unwrap_err();
        assert_eq!(err, StorageError::Invalid("locked".into()));
        assert!(s.get(&ctx(), "a", &GetOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn restricted_capabilities() {
        let s = SqliteStore::open_in_memory().unwrap().with_capabilities(Capabilities::of(&[Operation::Get, Operation::List]));
        let err = s.create(&ctx(), obj("a"), None, &CreateOptions::default()).await.unwrap_err();
        assert_eq!(err, StorageError::Unsupported { operation: Operation::Create });
    }
}

//! In-RAM storage adapter.
//!
//! Readers load an immutable snapshot through `ArcSwap` and never block.
//! Writers serialize on a mutex, build the next snapshot, swap it in and
//! publish the new revision on a watch channel.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use dualwrite_core::prelude::*;
use dualwrite_core::{rules, Capabilities, LabelSelector};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

type Key = (String, String);

fn key(ns: &str, name: &str) -> Key { (ns.to_string(), name.to_string()) }

#[derive(Debug, Clone, Default)]
struct Snapshot {
    /// Monotonic store revision; every committed mutation bumps it.
    revision: u64,
    items: FxHashMap<Key, Arc<Resource>>,
}

impl Snapshot {
    fn next_version(&mut self) -> String {
        self.revision = self.revision.saturating_add(1);
        self.revision.to_string()
    }

    fn in_namespace<'a>(&'a self, ns: &'a str, sel: &'a LabelSelector) -> impl Iterator<Item = &'a Arc<Resource>> + 'a {
        self.items.iter().filter(move |((n, _), r)| n == ns && sel.matches(&r.metadata)).map(|(_, r)| r)
    }
}

pub struct MemoryStore {
    snap: ArcSwap<Snapshot>,
    write: Mutex<()>,
    caps: Capabilities,
    revision_tx: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision_tx, _) = watch::channel(0u64);
        Self { snap: ArcSwap::from_pointee(Snapshot::default()), write: Mutex::new(()), caps: Capabilities::ALL, revision_tx }
    }

    /// Restrict the operations this instance serves; others return `Unsupported`.
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn len(&self) -> usize { self.snap.load().items.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn revision(&self) -> u64 { self.snap.load().revision }

    pub fn subscribe_revision(&self) -> watch::Receiver<u64> { self.revision_tx.subscribe() }

    fn require(&self, op: Operation) -> StorageResult<()> {
        if self.caps.supports(op) {
            Ok(())
        } else {
            Err(StorageError::Unsupported { operation: op })
        }
    }

    /// Run `f` on a private copy of the current snapshot and publish it when
    /// `commit` is set and `f` succeeded.
    fn mutate<T>(&self, commit: bool, f: impl FnOnce(&mut Snapshot) -> StorageResult<T>) -> StorageResult<T> {
        let _guard = self.write.lock().map_err(|_| StorageError::Fatal("memory store writer lock poisoned".into()))?;
        let mut next = Snapshot::clone(&self.snap.load());
        let out = f(&mut next)?;
        if commit {
            let revision = next.revision;
            self.snap.store(Arc::new(next));
            self.revision_tx.send_replace(revision);
            counter!("memstore_commits_total", 1u64);
        }
        Ok(out)
    }

    fn remove_one(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&Validator>,
        opts: &DeleteOptions,
    ) -> StorageResult<Resource> {
        self.mutate(!opts.dry_run, |snap| {
            let k = key(&ctx.namespace, name);
            let existing = snap.items.get(&k).cloned().ok_or_else(|| StorageError::not_found(name))?;
            rules::check_preconditions(&existing, opts.preconditions.as_ref())?;
            if let Some(v) = validate {
                v(&existing, None)?;
            }
            snap.items.remove(&k);
            snap.next_version();
            Ok(Resource::clone(&existing))
        })
    }
}

#[async_trait::async_trait]
impl StorageAdapter for MemoryStore {
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
        let created = self.mutate(!opts.dry_run, |snap| {
            let k = key(&ctx.namespace, obj.name());
            if snap.items.contains_key(&k) {
                return Err(StorageError::Conflict(format!("{} already exists", obj.name())));
            }
            let mut obj = obj;
            obj.metadata.namespace = ctx.namespace.clone();
            obj.metadata.uid = Some(Uuid::new_v4().to_string());
            obj.metadata.resource_version = Some(snap.next_version());
            obj.metadata.generation = 1;
            obj.metadata.creation_ts = chrono::Utc::now().timestamp();
            snap.items.insert(k, Arc::new(obj.clone()));
            Ok(obj)
        })?;
        debug!(ns = %ctx.namespace, name = %created.name(), dry_run = opts.dry_run, "memstore: created");
        Ok(created)
    }

    async fn get(&self, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StorageResult<Resource> {
        ctx.check()?;
        self.require(Operation::Get)?;
        let snap = self.snap.load();
        let found = snap.items.get(&key(&ctx.namespace, name)).ok_or_else(|| StorageError::not_found(name))?;
        rules::check_version(name, found.resource_version(), opts.resource_version.as_deref())?;
        Ok(Resource::clone(found))
    }

    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StorageResult<ResourceList> {
        ctx.check()?;
        self.require(Operation::List)?;
        let sel = LabelSelector::from_option(opts.label_selector.as_deref())?;
        let snap = self.snap.load();
        let items = snap.in_namespace(&ctx.namespace, &sel).map(|r| Resource::clone(r)).collect();
        Ok(rules::paginate(items, opts, Some(snap.revision.to_string())))
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
        self.mutate(!opts.dry_run, |snap| {
            let k = key(&ctx.namespace, name);
            let existing = snap.items.get(&k).cloned();
            let created = existing.is_none();
            match existing.as_deref() {
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
            obj.metadata.resource_version = Some(snap.next_version());
            snap.items.insert(k, Arc::new(obj.clone()));
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
        let mut names: Vec<String> =
            self.snap.load().in_namespace(&ctx.namespace, &sel).map(|r| r.metadata.name.clone()).collect();
        names.sort();

        let mut deleted = Vec::with_capacity(names.len());
        for name in names {
            let res = ctx.check().and_then(|_| self.remove_one(ctx, &name, validate.as_ref(), opts));
            match res {
                Ok(obj) => deleted.push(obj),
                // raced with a concurrent delete
                Err(StorageError::NotFound { .. }) => continue,
                Err(cause) if deleted.is_empty() => return Err(cause),
                Err(cause) => {
                    return Err(StorageError::PartialDeletion { deleted: deleted.len(), cause: Box::new(cause) })
                }
            }
        }
        debug!(ns = %ctx.namespace, count = deleted.len(), "memstore: collection deleted");
        Ok(ResourceList { items: deleted, continue_token: None, resource_version: Some(self.revision().to_string()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use dualwrite_core::Preconditions;

    fn ctx() -> RequestContext { RequestContext::new("org-1") }

    #[tokio::test]
    async fn create_assigns_metadata_and_rejects_duplicates() {
        let s = MemoryStore::new();
        let created = s.create(&ctx(), Resource::new("a", json!({"v": 1})), None, &CreateOptions::default()).await.unwrap();
        assert_eq!(created.metadata.namespace, "org-1");
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.resource_version(), Some("1"));

        let dup = s.create(&ctx(), Resource::new("a", json!({})), None, &CreateOptions::default()).await;
        assert!(dup.unwrap_err().is_conflict());
        assert_eq!(s.len(), 1);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let s = MemoryStore::new();
        s.create(&ctx(), Resource::new("a", json!({})), None, &CreateOptions::default()).await.unwrap();
        let other = RequestContext::new("org-2");
        assert!(s.get(&other, "a", &GetOptions::default()).await.unwrap_err().is_not_found());
        assert!(s.list(&other, &ListOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_checks_version_and_bumps_generation() {
        let s = MemoryStore::new();
        let created = s.create(&ctx(), Resource::new("a", json!({"v": 1})), None, &CreateOptions::default()).await.unwrap();

        let mut stale = created.clone();
        stale.metadata.resource_version = Some("999".into());
        let err = s.update(&ctx(), "a", stale, None, &UpdateOptions::default()).await.unwrap_err();
        assert!(err.is_conflict());

        let mut next = created.clone();
        next.spec = json!({"v": 2});
        let out = s.update(&ctx(), "a", next, None, &UpdateOptions::default()).await.unwrap();
        assert!(!out.created);
        assert_eq!(out.object.metadata.generation, 2);
        assert_eq!(out.object.metadata.uid, created.metadata.uid);
        assert_ne!(out.object.resource_version(), created.resource_version());
    }

    #[tokio::test]
    async fn update_missing_needs_force_allow_create() {
        let s = MemoryStore::new();
        let err = s.update(&ctx(), "a", Resource::default(), None, &UpdateOptions::default()).await.unwrap_err();
        assert!(err.is_not_found());
        let opts = UpdateOptions { force_allow_create: true, ..Default::default() };
        let out = s.update(&ctx(), "a", Resource::default(), None, &opts).await.unwrap();
        assert!(out.created);
        assert_eq!(out.object.name(), "a");
    }

    #[tokio::test]
    async fn validator_blocks_mutation() {
        let s = MemoryStore::new();
        let deny: Validator = Arc::new(|_new: &Resource, _old: Option<&Resource>| Err(StorageError::Invalid("nope".into())));
        let err = s.create(&ctx(), Resource::new("a", json!({})), Some(deny), &CreateOptions::default()).await;
        assert_eq!(err, Err(StorageError::Invalid("nope".into())));
        assert!(s.is_empty());
        assert_eq!(s.revision(), 0);
    }

    #[tokio::test]
    async fn dry_run_does_not_persist() {
        let s = MemoryStore::new();
        let opts = CreateOptions { dry_run: true, ..Default::default() };
        let out = s.create(&ctx(), Resource::new("a", json!({})), None, &opts).await.unwrap();
        assert_eq!(out.name(), "a");
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn delete_honors_preconditions() {
        let s = MemoryStore::new();
        s.create(&ctx(), Resource::new("a", json!({})), None, &CreateOptions::default()).await.unwrap();
        let opts = DeleteOptions {
            preconditions: Some(Preconditions { uid: Some("other".into()), resource_version: None }),
            ..Default::default()
        };
        assert!(s.delete(&ctx(), "a", None, &opts).await.unwrap_err().is_conflict());
        let out = s.delete(&ctx(), "a", None, &DeleteOptions::default()).await.unwrap();
        assert!(out.immediate);
        assert!(s.delete(&ctx(), "a", None, &DeleteOptions::default()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_collection_reports_partial_failure() {
        let s = MemoryStore::new();
        for n in ["a", "b", "c"] {
            s.create(&ctx(), Resource::new(n, json!({})), None, &CreateOptions::default()).await.unwrap();
        }
        let only_a: Validator = Arc::new(|obj: &Resource, _old: Option<&Resource>| {
            if obj.name() == "a" {
                Ok(())
            } else {
                Err(StorageError::Invalid(format!("{} is protected", obj.name())))
            }
        });
        let err = s
            .delete_collection(&ctx(), Some(only_a), &DeleteOptions::default(), &ListOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.deleted_before_failure(), 1);
        assert_eq!(s.len(), 2);
    }

    #[tokio::test]
    async fn disabled_capability_is_unsupported() {
        let s = MemoryStore::new().with_capabilities(Capabilities::ALL.without(Operation::DeleteCollection));
        assert!(!s.capabilities().supports(Operation::DeleteCollection));
        let err = s
            .delete_collection(&ctx(), None, &DeleteOptions::default(), &ListOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Unsupported { operation: Operation::DeleteCollection });
    }

    #[tokio::test]
    async fn revisions_are_published() {
        let s = MemoryStore::new();
        let mut rx = s.subscribe_revision();
        s.create(&ctx(), Resource::new("a", json!({})), None, &CreateOptions::default()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}

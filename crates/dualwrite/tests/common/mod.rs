#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dualwrite::core::prelude::*;
use dualwrite::{DualWriter, Mode, RecordingSink};
use dualwrite_store::MemoryStore;
use serde_json::json;

/// Memory-backed adapter that counts calls per operation and can be scripted
/// to fail chosen operations.
#[derive(Default)]
pub struct ScriptedAdapter {
    inner: MemoryStore,
    caps: Option<Capabilities>,
    calls: Mutex<HashMap<Operation, usize>>,
    failures: Mutex<HashMap<Operation, StorageError>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self { Self::default() }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Every subsequent call of `op` fails with `err`.
    pub fn fail(&self, op: Operation, err: StorageError) { self.failures.lock().unwrap().insert(op, err); }

    pub fn heal(&self, op: Operation) { self.failures.lock().unwrap().remove(&op); }

    pub fn calls(&self, op: Operation) -> usize { self.calls.lock().unwrap().get(&op).copied().unwrap_or(0) }

    pub fn total_calls(&self) -> usize { self.calls.lock().unwrap().values().sum() }

    pub fn reset_calls(&self) { self.calls.lock().unwrap().clear(); }

    pub fn store(&self) -> &MemoryStore { &self.inner }

    fn enter(&self, op: Operation) -> StorageResult<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        match self.failures.lock().unwrap().get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl StorageAdapter for ScriptedAdapter {
    fn capabilities(&self) -> Capabilities { self.caps.unwrap_or(Capabilities::ALL) }

    async fn create(
        &self,
        ctx: &RequestContext,
        obj: Resource,
        validate: Option<Validator>,
        opts: &CreateOptions,
    ) -> StorageResult<Resource> {
        self.enter(Operation::Create)?;
        self.inner.create(ctx, obj, validate, opts).await
    }

    async fn get(&self, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StorageResult<Resource> {
        self.enter(Operation::Get)?;
        self.inner.get(ctx, name, opts).await
    }

    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StorageResult<ResourceList> {
        self.enter(Operation::List)?;
        self.inner.list(ctx, opts).await
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        obj: Resource,
        validate: Option<Validator>,
        opts: &UpdateOptions,
    ) -> StorageResult<UpdateOutcome> {
        self.enter(Operation::Update)?;
        self.inner.update(ctx, name, obj, validate, opts).await
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<Validator>,
        opts: &DeleteOptions,
    ) -> StorageResult<DeleteOutcome> {
        self.enter(Operation::Delete)?;
        self.inner.delete(ctx, name, validate, opts).await
    }

    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<Validator>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StorageResult<ResourceList> {
        self.enter(Operation::DeleteCollection)?;
        self.inner.delete_collection(ctx, validate, opts, list_opts).await
    }
}

pub struct Harness {
    pub source: Arc<ScriptedAdapter>,
    pub target: Arc<ScriptedAdapter>,
    pub sink: Arc<RecordingSink>,
    pub writer: DualWriter,
}

impl Harness {
    pub fn new(mode: Mode) -> Self { Self::with_adapters(mode, ScriptedAdapter::new(), ScriptedAdapter::new()) }

    pub fn with_adapters(mode: Mode, source: ScriptedAdapter, target: ScriptedAdapter) -> Self {
        let source = Arc::new(source);
        let target = Arc::new(target);
        let sink = Arc::new(RecordingSink::new());
        let writer = DualWriter::new(mode, source.clone(), target.clone())
            .with_resource("dashboards")
            .with_sink(sink.clone());
        Self { source, target, sink, writer }
    }

    pub fn adapter(&self, role: Role) -> &ScriptedAdapter {
        match role {
            Role::Source => &self.source,
            Role::Target => &self.target,
        }
    }

    /// Put `name` straight into one backing store, bypassing the controller.
    pub async fn seed(&self, role: Role, name: &str) {
        self.adapter(role)
            .store()
            .create(&ctx(), dashboard(name), None, &CreateOptions::default())
            .await
            .unwrap();
    }

    pub fn reset_calls(&self) {
        self.source.reset_calls();
        self.target.reset_calls();
    }
}

pub fn ctx() -> RequestContext { RequestContext::new("org-1") }

pub fn dashboard(name: &str) -> Resource {
    Resource::new(name, json!({ "title": name, "panels": [] })).with_label("kind", "dashboard")
}

pub fn transient() -> StorageError { StorageError::Transient("backend unavailable".into()) }

//! The dual-write controller.
//!
//! Writes go to the authoritative adapter first. Only when it succeeds is the
//! mirror attempted, and a mirror failure is reported through the drift sink
//! without failing the request. Reads are served by the read adapter alone.
//! Calls are strictly sequential; the controller keeps no per-request state.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dualwrite_core::{
    Capabilities, CreateOptions, DeleteOptions, DeleteOutcome, ErrorKind, GetOptions, ListOptions, Operation,
    RequestContext, Resource, ResourceList, Role, StorageAdapter, StorageError, StorageResult, UpdateOptions,
    UpdateOutcome, Validator,
};
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::observe::{CollectionDeletion, DriftSink, MirrorFailure, TracingSink};
use crate::{Mode, ModeStrategy};

pub const DEFAULT_RESOURCE: &str = "resource";

/// Drop-in [`StorageAdapter`] that routes each operation to the legacy
/// (`Source`) and unified (`Target`) adapters according to a [`Mode`].
pub struct DualWriter {
    strategy: &'static dyn ModeStrategy,
    source: Arc<dyn StorageAdapter>,
    target: Arc<dyn StorageAdapter>,
    resource: String,
    sink: Arc<dyn DriftSink>,
    /// Per operation: the first required adapter lacking it, resolved once.
    missing: [Option<Role>; 6],
}

impl DualWriter {
    pub fn new(mode: Mode, source: Arc<dyn StorageAdapter>, target: Arc<dyn StorageAdapter>) -> Self {
        let strategy = mode.strategy();
        let (source_caps, target_caps) = (source.capabilities(), target.capabilities());
        let mut missing = [None; 6];
        for (i, op) in Operation::ALL.into_iter().enumerate() {
            missing[i] = strategy.required_roles(op).into_iter().find(|role| {
                let caps = match role {
                    Role::Source => source_caps,
                    Role::Target => target_caps,
                };
                !caps.supports(op)
            });
        }
        for (i, role) in missing.iter().enumerate() {
            if let Some(role) = role {
                warn!(mode = mode.number(), op = %Operation::ALL[i], role = %role, "adapter lacks capability required by mode; requests will fail");
            }
        }
        Self { strategy, source, target, resource: DEFAULT_RESOURCE.to_string(), sink: Arc::new(TracingSink), missing }
    }

    /// Resource type name attached to logs and drift events.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DriftSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn mode(&self) -> Mode { self.strategy.mode() }

    pub fn resource(&self) -> &str { &self.resource }

    pub fn adapter(&self, role: Role) -> &Arc<dyn StorageAdapter> {
        match role {
            Role::Source => &self.source,
            Role::Target => &self.target,
        }
    }

    fn ensure_capable(&self, op: Operation) -> StorageResult<()> {
        match self.missing[index(op)] {
            Some(role) => Err(StorageError::CapabilityMissing { operation: op, role }),
            None => Ok(()),
        }
    }

    fn observe(&self, op: Operation, role: Role, started: Instant) {
        histogram!("dualwrite_op_ms", started.elapsed().as_secs_f64() * 1000.0, "mode" => self.mode().label(), "op" => op.as_str(), "role" => role.as_str());
    }

    /// `name` is set for single-object writes, `selector` for collection
    /// deletes; absent fields are left out of the event.
    fn authoritative_failed(
        &self,
        op: Operation,
        role: Role,
        name: Option<&str>,
        selector: Option<&str>,
        err: &StorageError,
    ) {
        counter!("dualwrite_authoritative_failures_total", 1u64, "mode" => self.mode().label(), "op" => op.as_str());
        match err.kind() {
            ErrorKind::Transient | ErrorKind::Fatal => {
                warn!(mode = self.mode().number(), op = %op, resource = %self.resource, role = %role, name, selector, error = %err, "authoritative storage failed")
            }
            _ => debug!(mode = self.mode().number(), op = %op, resource = %self.resource, role = %role, name, selector, error = %err, "authoritative storage rejected request"),
        }
    }

    async fn read<T, F, Fut>(&self, op: Operation, call: F) -> StorageResult<T>
    where
        F: FnOnce(Arc<dyn StorageAdapter>) -> Fut + Send,
        Fut: Future<Output = StorageResult<T>> + Send,
        T: Send,
    {
        self.ensure_capable(op)?;
        let role = self.strategy.read_adapter();
        let started = Instant::now();
        let res = call(self.adapter(role).clone()).await;
        self.observe(op, role, started);
        res
    }

    /// Authoritative write, then best-effort mirror writes. `call` receives
    /// the adapter and whether it is being called as a mirror.
    async fn write<T, F, Fut>(&self, op: Operation, name: &str, call: F) -> StorageResult<T>
    where
        F: Fn(Arc<dyn StorageAdapter>, bool) -> Fut + Send + Sync,
        Fut: Future<Output = StorageResult<T>> + Send,
        T: Send,
    {
        self.ensure_capable(op)?;
        let Some((&primary, mirrors)) = self.strategy.write_order().split_first() else {
            return Err(StorageError::Fatal(format!("mode {} has no write order", self.mode())));
        };

        let started = Instant::now();
        let res = call(self.adapter(primary).clone(), false).await;
        self.observe(op, primary, started);
        let value = match res {
            Ok(v) => v,
            Err(err) => {
                self.authoritative_failed(op, primary, Some(name), None, &err);
                return Err(err);
            }
        };

        for &role in mirrors {
            let started = Instant::now();
            let res = call(self.adapter(role).clone(), true).await;
            self.observe(op, role, started);
            if let Err(err) = res {
                self.sink.mirror_failed(&MirrorFailure {
                    mode: self.mode(),
                    op,
                    resource: self.resource.clone(),
                    role,
                    name: name.to_string(),
                    error: err.clone(),
                });
                if self.strategy.is_mirror_failure_fatal(role) {
                    return Err(err);
                }
            }
        }
        Ok(value)
    }
}

fn index(op: Operation) -> usize {
    match op {
        Operation::Create => 0,
        Operation::Get => 1,
        Operation::List => 2,
        Operation::Update => 3,
        Operation::Delete => 4,
        Operation::DeleteCollection => 5,
    }
}

/// Resource versions are store-local; the mirror gets the payload without one.
fn mirror_payload(obj: &Resource, mirror: bool) -> Resource {
    let mut obj = obj.clone();
    if mirror {
        obj.metadata.resource_version = None;
    }
    obj
}

/// Preconditions name store-local uids and versions; dropped for the mirror.
fn mirror_delete_options(opts: &DeleteOptions, mirror: bool) -> DeleteOptions {
    let mut opts = opts.clone();
    if mirror {
        opts.preconditions = None;
    }
    opts
}

#[async_trait::async_trait]
impl StorageAdapter for DualWriter {
    fn capabilities(&self) -> Capabilities {
        Operation::ALL
            .into_iter()
            .filter(|op| self.missing[index(*op)].is_none())
            .fold(Capabilities::NONE, Capabilities::with)
    }

    async fn create(
        &self,
        ctx: &RequestContext,
        obj: Resource,
        validate: Option<Validator>,
        opts: &CreateOptions,
    ) -> StorageResult<Resource> {
        let name = obj.metadata.name.clone();
        self.write(Operation::Create, &name, |adapter, mirror| {
            let obj = mirror_payload(&obj, mirror);
            let validate = validate.clone();
            async move { adapter.create(ctx, obj, validate, opts).await }
        })
        .await
    }

    async fn get(&self, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StorageResult<Resource> {
        self.read(Operation::Get, |adapter| async move { adapter.get(ctx, name, opts).await }).await
    }

    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StorageResult<ResourceList> {
        self.read(Operation::List, |adapter| async move { adapter.list(ctx, opts).await }).await
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        obj: Resource,
        validate: Option<Validator>,
        opts: &UpdateOptions,
    ) -> StorageResult<UpdateOutcome> {
        self.write(Operation::Update, name, |adapter, mirror| {
            let obj = mirror_payload(&obj, mirror);
            let validate = validate.clone();
            async move { adapter.update(ctx, name, obj, validate, opts).await }
        })
        .await
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<Validator>,
        opts: &DeleteOptions,
    ) -> StorageResult<DeleteOutcome> {
        self.write(Operation::Delete, name, |adapter, mirror| {
            let opts = mirror_delete_options(opts, mirror);
            let validate = validate.clone();
            async move { adapter.delete(ctx, name, validate, &opts).await }
        })
        .await
    }

    /// Unlike other writes, the mirror deletion is attempted even when the
    /// authoritative one fails; both outcomes go to the drift sink and only
    /// the authoritative one is returned.
    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<Validator>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StorageResult<ResourceList> {
        let op = Operation::DeleteCollection;
        self.ensure_capable(op)?;
        let order = self.strategy.write_order();
        let Some((&primary, mirrors)) = order.split_first() else {
            return Err(StorageError::Fatal(format!("mode {} has no write order", self.mode())));
        };

        let started = Instant::now();
        let res = self.adapter(primary).delete_collection(ctx, validate.clone(), opts, list_opts).await;
        self.observe(op, primary, started);
        if let Err(err) = &res {
            self.authoritative_failed(op, primary, None, list_opts.label_selector.as_deref(), err);
        }

        // TODO: partial deletions are only reported; decide on a compensation
        // contract before returning per-store counts to callers.
        for &role in mirrors {
            let mirror_opts = mirror_delete_options(opts, true);
            let started = Instant::now();
            let mirrored = self.adapter(role).delete_collection(ctx, validate.clone(), &mirror_opts, list_opts).await;
            self.observe(op, role, started);
            let report = CollectionDeletion {
                mode: self.mode(),
                resource: self.resource.clone(),
                authoritative: primary,
                authoritative_deleted: deleted_count(&res),
                authoritative_error: res.as_ref().err().cloned(),
                mirror: role,
                mirror_deleted: deleted_count(&mirrored),
                mirror_error: mirrored.as_ref().err().cloned(),
            };
            self.sink.collection_deleted(&report);
        }
        res
    }
}

fn deleted_count(res: &StorageResult<ResourceList>) -> usize {
    match res {
        Ok(list) => list.len(),
        Err(err) => err.deleted_before_failure(),
    }
}

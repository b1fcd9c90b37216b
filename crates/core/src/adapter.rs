use std::sync::Arc;

use crate::{
    Capabilities, CreateOptions, DeleteOptions, DeleteOutcome, GetOptions, ListOptions, Operation, RequestContext,
    Resource, ResourceList, StorageError, StorageResult, UpdateOptions, UpdateOutcome,
};

/// Validation callback invoked by adapters before any mutation, with the new
/// object and the currently stored one (if any).
pub type Validator = Arc<dyn Fn(&Resource, Option<&Resource>) -> StorageResult<()> + Send + Sync>;

/// Uniform resource operations every backend exposes.
///
/// Operations an adapter does not implement fall back to
/// [`StorageError::Unsupported`]; `capabilities()` must report exactly the
/// operations that are overridden. Retry policy, if any, lives in the adapter.
#[allow(unused_variables)]
#[async_trait::async_trait]
pub trait StorageAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn create(
        &self,
        ctx: &RequestContext,
        obj: Resource,
        validate: Option<Validator>,
        opts: &CreateOptions,
    ) -> StorageResult<Resource> {
        Err(StorageError::Unsupported { operation: Operation::Create })
    }

    async fn get(&self, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StorageResult<Resource> {
        Err(StorageError::Unsupported { operation: Operation::Get })
    }

    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StorageResult<ResourceList> {
        Err(StorageError::Unsupported { operation: Operation::List })
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        obj: Resource,
        validate: Option<Validator>,
        opts: &UpdateOptions,
    ) -> StorageResult<UpdateOutcome> {
        Err(StorageError::Unsupported { operation: Operation::Update })
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<Validator>,
        opts: &DeleteOptions,
    ) -> StorageResult<DeleteOutcome> {
        Err(StorageError::Unsupported { operation: Operation::Delete })
    }

    /// Delete every object matching `list_opts`. A failure partway through is
    /// reported as [`StorageError::PartialDeletion`].
    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<Validator>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StorageResult<ResourceList> {
        Err(StorageError::Unsupported { operation: Operation::DeleteCollection })
    }
}

//! Dual-write core types: the storage adapter contract both backends implement,
//! the opaque resource model, and the shared error taxonomy.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

mod adapter;
mod context;
mod error;
mod options;
mod resource;
pub mod rules;
pub mod selector;

pub use adapter::{StorageAdapter, Validator};
pub use context::RequestContext;
pub use error::{ErrorKind, StorageError, StorageResult};
pub use options::{CreateOptions, DeleteOptions, GetOptions, ListOptions, Preconditions, UpdateOptions};
pub use resource::{DeleteOutcome, ObjectMeta, Resource, ResourceList, UpdateOutcome};
pub use selector::LabelSelector;

pub mod prelude {
    pub use super::{
        Capabilities, CreateOptions, DeleteOptions, DeleteOutcome, GetOptions, ListOptions, Operation, RequestContext,
        Resource, ResourceList, Role, StorageAdapter, StorageError, StorageResult, UpdateOptions, UpdateOutcome,
        Validator,
    };
}

/// A resource operation as exposed by every storage backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Get,
    List,
    Update,
    Delete,
    DeleteCollection,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Create,
        Operation::Get,
        Operation::List,
        Operation::Update,
        Operation::Delete,
        Operation::DeleteCollection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::DeleteCollection => "delete_collection",
        }
    }

    /// Reads are served by a single adapter; everything else mutates.
    pub fn is_read(self) -> bool { matches!(self, Operation::Get | Operation::List) }

    fn bit(self) -> u8 {
        match self {
            Operation::Create => 1 << 0,
            Operation::Get => 1 << 1,
            Operation::List => 1 << 2,
            Operation::Update => 1 << 3,
            Operation::Delete => 1 << 4,
            Operation::DeleteCollection => 1 << 5,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Which of the two backends an adapter plays during a migration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The legacy store being migrated away from.
    Source,
    /// The new unified store being migrated to.
    Target,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Target => "target",
        }
    }

    pub fn other(self) -> Role {
        match self {
            Role::Source => Role::Target,
            Role::Target => Role::Source,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Set of operations an adapter instance supports, fixed when the adapter is built.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const ALL: Capabilities = Capabilities(0b0011_1111);

    pub fn of(ops: &[Operation]) -> Self {
        ops.iter().fold(Self::NONE, |caps, op| caps.with(*op))
    }

    pub fn with(self, op: Operation) -> Self { Self(self.0 | op.bit()) }

    pub fn without(self, op: Operation) -> Self { Self(self.0 & !op.bit()) }

    pub fn supports(self, op: Operation) -> bool { self.0 & op.bit() != 0 }

    pub fn iter(self) -> impl Iterator<Item = Operation> {
        Operation::ALL.into_iter().filter(move |op| self.supports(*op))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_set().entries(self.iter()).finish() }
}

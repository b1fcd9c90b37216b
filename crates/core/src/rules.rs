//! Shared single-store semantics used by the bundled adapters.

use crate::{ListOptions, Preconditions, Resource, ResourceList, StorageError, StorageResult};

/// Names must be non-empty and free of `/` and whitespace.
pub fn check_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::Invalid("metadata.name is required".into()));
    }
    if name.contains('/') || name.contains(char::is_whitespace) {
        return Err(StorageError::Invalid(format!("invalid name {name:?}")));
    }
    Ok(())
}

/// Optimistic concurrency: a non-empty `expected` must equal the stored version.
pub fn check_version(name: &str, stored: Option<&str>, expected: Option<&str>) -> StorageResult<()> {
    match expected {
        Some(want) if !want.is_empty() && stored != Some(want) => Err(StorageError::Conflict(format!(
            "{name}: resource version {want} does not match stored {}",
            stored.unwrap_or("<none>")
        ))),
        _ => Ok(()),
    }
}

pub fn check_preconditions(existing: &Resource, pre: Option<&Preconditions>) -> StorageResult<()> {
    let Some(pre) = pre else { return Ok(()) };
    if let Some(uid) = pre.uid.as_deref() {
        if existing.metadata.uid.as_deref() != Some(uid) {
            return Err(StorageError::Conflict(format!("{}: uid precondition failed", existing.name())));
        }
    }
    check_version(existing.name(), existing.resource_version(), pre.resource_version.as_deref())
}

/// Page name-sorted `items` per `opts`. The continue token is the last name
/// returned; the next page starts strictly after it.
pub fn paginate(mut items: Vec<Resource>, opts: &ListOptions, resource_version: Option<String>) -> ResourceList {
    items.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    if let Some(after) = opts.continue_token.as_deref() {
        items.retain(|r| r.metadata.name.as_str() > after);
    }
    let mut continue_token = None;
    if let Some(limit) = opts.limit.filter(|l| *l > 0) {
        if items.len() > limit {
            items.truncate(limit);
            continue_token = items.last().map(|r| r.metadata.name.clone());
        }
    }
    ResourceList { items, continue_token, resource_version }
}

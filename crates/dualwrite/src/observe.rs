//! Drift observability: every mirror failure and every mirrored collection
//! deletion is reported through a [`DriftSink`] so operators can spot
//! divergence between the two stores.

use std::sync::Mutex;

use dualwrite_core::{Operation, Role, StorageError};
use metrics::counter;
use tracing::{debug, error, warn};

use crate::Mode;

/// A write reached the authoritative store but the mirror rejected it.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorFailure {
    pub mode: Mode,
    pub op: Operation,
    pub resource: String,
    pub role: Role,
    pub name: String,
    pub error: StorageError,
}

/// Outcome of a collection deletion applied to both stores.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDeletion {
    pub mode: Mode,
    pub resource: String,
    pub authoritative: Role,
    pub authoritative_deleted: usize,
    pub authoritative_error: Option<StorageError>,
    pub mirror: Role,
    pub mirror_deleted: usize,
    pub mirror_error: Option<StorageError>,
}

impl CollectionDeletion {
    /// True when the two stores did not end up deleting the same set cleanly.
    pub fn is_discrepancy(&self) -> bool {
        self.authoritative_deleted != self.mirror_deleted
            || self.authoritative_error.is_some()
            || self.mirror_error.is_some()
    }
}

pub trait DriftSink: Send + Sync {
    fn mirror_failed(&self, event: &MirrorFailure);
    fn collection_deleted(&self, report: &CollectionDeletion);
}

/// Default sink: structured `tracing` events plus `metrics` counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DriftSink for TracingSink {
    fn mirror_failed(&self, ev: &MirrorFailure) {
        counter!("dualwrite_mirror_failures_total", 1u64, "mode" => ev.mode.label(), "op" => ev.op.as_str());
        error!(
            mode = ev.mode.number(),
            op = %ev.op,
            resource = %ev.resource,
            role = %ev.role,
            name = %ev.name,
            error = %ev.error,
            "mirror write failed; stores diverge until reconciled"
        );
    }

    fn collection_deleted(&self, r: &CollectionDeletion) {
        if !r.is_discrepancy() {
            debug!(mode = r.mode.number(), resource = %r.resource, deleted = r.authoritative_deleted, "collection deleted on both stores");
            return;
        }
        counter!("dualwrite_collection_discrepancies_total", 1u64, "mode" => r.mode.label());
        warn!(
            mode = r.mode.number(),
            op = %Operation::DeleteCollection,
            resource = %r.resource,
            authoritative = %r.authoritative,
            authoritative_deleted = r.authoritative_deleted,
            authoritative_error = ?r.authoritative_error.as_ref().map(|e| e.to_string()),
            mirror = %r.mirror,
            mirror_deleted = r.mirror_deleted,
            mirror_error = ?r.mirror_error.as_ref().map(|e| e.to_string()),
            "collection deletion diverged between stores"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriftEvent {
    MirrorFailed(MirrorFailure),
    CollectionDeleted(CollectionDeletion),
}

/// In-memory sink that keeps every event; forwards to `TracingSink` too.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DriftEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self { Self::default() }

    pub fn events(&self) -> Vec<DriftEvent> { self.lock().clone() }

    pub fn mirror_failures(&self) -> Vec<MirrorFailure> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                DriftEvent::MirrorFailed(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn collection_reports(&self) -> Vec<CollectionDeletion> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                DriftEvent::CollectionDeleted(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DriftEvent>> {
        // a poisoned log is still a readable log
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl DriftSink for RecordingSink {
    fn mirror_failed(&self, event: &MirrorFailure) {
        TracingSink.mirror_failed(event);
        self.lock().push(DriftEvent::MirrorFailed(event.clone()));
    }

    fn collection_deleted(&self, report: &CollectionDeletion) {
        TracingSink.collection_deleted(report);
        self.lock().push(DriftEvent::CollectionDeleted(report.clone()));
    }
}

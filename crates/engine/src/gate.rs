//! The single in-flight snapshot gate
//!
//! At most one save or restore runs in a cluster at a time. A save for a
//! different nonce arriving while one is running is parked as the single
//! queued request, which the retry task starts once the gate opens. Holding a
//! [`GateGuard`] means holding the gate; dropping it opens the gate.

use std::sync::Arc;

use tracing::debug;

use crate::cluster::ClusterInner;
use crate::request::SaveRequest;

/// Gate state owned by the cluster
#[derive(Debug, Default)]
pub(crate) struct GateState {
    in_flight: Option<String>,
    queued: Option<SaveRequest>,
}

impl GateState {
    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queued.is_none()
    }

    pub(crate) fn clear_queue(&mut self) -> Option<SaveRequest> {
        self.queued.take()
    }
}

/// How the gate answered a save request
pub(crate) enum SaveAdmission {
    /// The caller holds the gate and may run
    Run(GateGuard),
    /// A save for the same nonce is running or queued, or the queue is full
    InProgress,
    /// The request was parked; the caller must make sure a retry task runs
    Queued,
}

/// Proof of holding the gate
pub(crate) struct GateGuard {
    inner: Arc<ClusterInner>,
    label: String,
}

impl GateGuard {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let mut gate = self.inner.gate.lock();
        gate.in_flight = None;
        debug!(target: "strata::snapshot", operation = %self.label, "Snapshot gate released");
        self.inner.gate_idle.notify_all();
    }
}

/// Ask to run a save
pub(crate) fn admit_save(inner: &Arc<ClusterInner>, request: &SaveRequest) -> SaveAdmission {
    let mut gate = inner.gate.lock();
    let same_nonce = gate.in_flight.as_deref() == Some(request.nonce.as_str())
        || gate.queued.as_ref().map(|q| q.nonce.as_str()) == Some(request.nonce.as_str());
    if same_nonce {
        return SaveAdmission::InProgress;
    }
    match (&gate.in_flight, &gate.queued) {
        (None, _) => {
            gate.in_flight = Some(request.nonce.clone());
            SaveAdmission::Run(GateGuard {
                inner: Arc::clone(inner),
                label: request.nonce.clone(),
            })
        }
        (Some(_), None) => {
            gate.queued = Some(request.clone());
            SaveAdmission::Queued
        }
        (Some(_), Some(_)) => SaveAdmission::InProgress,
    }
}

/// Take the gate for an operation that must not queue (restore)
pub(crate) fn try_acquire(inner: &Arc<ClusterInner>, label: &str) -> Result<GateGuard, String> {
    let mut gate = inner.gate.lock();
    if let Some(running) = &gate.in_flight {
        return Err(running.clone());
    }
    gate.in_flight = Some(label.to_string());
    Ok(GateGuard {
        inner: Arc::clone(inner),
        label: label.to_string(),
    })
}

/// Outcome of polling the queue
pub(crate) enum QueuePoll {
    /// The queued request now holds the gate
    Ready(SaveRequest, GateGuard),
    /// Something is still running
    Blocked,
    /// Nothing is queued
    Empty,
}

/// Start the queued request if the gate is open
pub(crate) fn poll_queue(inner: &Arc<ClusterInner>) -> QueuePoll {
    let mut gate = inner.gate.lock();
    if gate.queued.is_none() {
        return QueuePoll::Empty;
    }
    if gate.in_flight.is_some() {
        return QueuePoll::Blocked;
    }
    match gate.queued.take() {
        Some(request) => {
            gate.in_flight = Some(request.nonce.clone());
            let guard = GateGuard {
                inner: Arc::clone(inner),
                label: request.nonce.clone(),
            };
            QueuePoll::Ready(request, guard)
        }
        None => QueuePoll::Empty,
    }
}

/// Block until nothing runs and nothing is queued
pub(crate) fn wait_idle(inner: &ClusterInner) {
    let mut gate = inner.gate.lock();
    while !gate.is_idle() {
        inner.gate_idle.wait(&mut gate);
    }
}

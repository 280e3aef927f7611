//! Queued-save retry task
//!
//! A cancellable timer thread owned by the cluster. Every `interval` it checks
//! whether the gate opened and, if so, runs the queued save on its own thread
//! so client calls never block on it. It exits after running the request, when
//! the queue empties, when cancelled, or when the cluster is gone.

use std::io;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::cluster::ClusterInner;
use crate::gate::{poll_queue, QueuePoll};
use crate::save::run_admitted;
use crate::status::SnapshotKind;

struct RetrySignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a running retry thread
pub(crate) struct RetryTask {
    signal: Arc<RetrySignal>,
    handle: JoinHandle<()>,
}

impl RetryTask {
    /// Start polling the queue every `interval`
    pub(crate) fn spawn(inner: Weak<ClusterInner>, interval: Duration) -> io::Result<Self> {
        let signal = Arc::new(RetrySignal {
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("strata-snapshot-retry".to_string())
            .spawn(move || retry_loop(&inner, &thread_signal, interval))?;
        Ok(RetryTask { signal, handle })
    }

    /// Ask the thread to stop at its next wake-up
    pub(crate) fn cancel(&self) {
        let mut cancelled = self.signal.cancelled.lock();
        *cancelled = true;
        self.signal.wake.notify_all();
    }

    /// Give up the join handle
    pub(crate) fn into_handle(self) -> JoinHandle<()> {
        self.handle
    }
}

fn retry_loop(inner: &Weak<ClusterInner>, signal: &RetrySignal, interval: Duration) {
    loop {
        {
            let mut cancelled = signal.cancelled.lock();
            if !*cancelled {
                signal.wake.wait_for(&mut cancelled, interval);
            }
            if *cancelled {
                return;
            }
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        match poll_queue(&inner) {
            QueuePoll::Empty => return,
            QueuePoll::Blocked => continue,
            QueuePoll::Ready(mut request, guard) => {
                info!(target: "strata::snapshot", nonce = %request.nonce, "Running queued snapshot request");
                request.block = true;
                if let Err(e) = run_admitted(&inner, request, guard, SnapshotKind::Manual) {
                    warn!(target: "strata::snapshot", error = %e, "Queued snapshot request failed");
                }
                return;
            }
        }
    }
}

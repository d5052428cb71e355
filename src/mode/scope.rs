//! Resource scope of one check run
//!
//! Everything a run acquires (endpoint locks, channels, bridges, helper
//! tasks) is registered here. [`RunScope::close`] tears it down in reverse:
//! helpers are aborted, bridges destroyed, channels hung up, and only then
//! are the endpoint locks released. A scope that is dropped without being
//! closed (the run future itself was dropped) spawns the same teardown as a
//! detached task. Teardown started by `close` is never cut short by
//! dropping the closing future.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::controller::{tolerate_gone, Bridge, Channel};
use crate::error::TestError;
use crate::lock::LockSet;

/// Handle for helper tasks to abort the run with an error. The first
/// reported fault wins.
#[derive(Clone)]
pub struct FaultReporter {
    tx: Arc<watch::Sender<Option<TestError>>>,
}

impl FaultReporter {
    pub fn raise(&self, err: TestError) {
        self.tx.send_if_modified(|cur| {
            if cur.is_some() {
                return false;
            }
            *cur = Some(err);
            true
        });
    }
}

#[derive(Default)]
struct Held {
    tasks: Vec<JoinHandle<()>>,
    bridges: Vec<Arc<dyn Bridge>>,
    channels: Vec<Arc<dyn Channel>>,
    locks: Vec<LockSet>,
}

impl Held {
    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.bridges.is_empty()
            && self.channels.is_empty()
            && self.locks.is_empty()
    }

    async fn release(self, name: String) {
        for task in &self.tasks {
            task.abort();
        }
        for bridge in self.bridges.iter().rev() {
            if let Err(e) = tolerate_gone(bridge.destroy().await) {
                warn!("{}: destroying bridge {} failed: {}", name, bridge.id(), e);
            }
        }
        for chan in self.channels.iter().rev() {
            if let Err(e) = tolerate_gone(chan.hangup().await) {
                warn!("{}: hanging up {} failed: {}", name, chan.id(), e);
            }
        }
        // Locks last, after every leg is gone
        drop(self.locks);
        debug!("{}: run scope released", name);
    }
}

pub struct RunScope {
    name: String,
    token: CancellationToken,
    fault: FaultReporter,
    held: Mutex<Held>,
}

impl RunScope {
    pub fn new(name: &str, token: CancellationToken) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            name: name.to_string(),
            token,
            fault: FaultReporter { tx: Arc::new(tx) },
            held: Mutex::new(Held::default()),
        }
    }

    fn held(&self) -> MutexGuard<'_, Held> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Keep endpoint locks until the scope is closed
    pub fn hold(&self, locks: LockSet) {
        self.held().locks.push(locks);
    }

    pub fn track_channel(&self, channel: Arc<dyn Channel>) {
        self.held().channels.push(channel);
    }

    pub fn track_bridge(&self, bridge: Arc<dyn Bridge>) {
        self.held().bridges.push(bridge);
    }

    /// Run a helper for the lifetime of the scope
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.held().tasks.push(handle);
    }

    pub fn faults(&self) -> FaultReporter {
        self.fault.clone()
    }

    /// Resolves with the first fault raised by a helper; pending otherwise
    pub async fn fault(&self) -> TestError {
        let mut rx = self.fault.tx.subscribe();
        let found = rx.wait_for(|f| f.is_some()).await.ok().and_then(|f| f.clone());
        match found {
            Some(err) => err,
            None => std::future::pending().await,
        }
    }

    /// Number of channels registered so far
    pub fn channel_count(&self) -> usize {
        self.held().channels.len()
    }

    /// Tear everything down and wait for it.
    ///
    /// The teardown runs on its own task and completes even if this
    /// future is dropped half way.
    pub async fn close(&self) {
        let held = std::mem::take(&mut *self.held());
        if held.is_empty() {
            return;
        }
        let teardown = tokio::spawn(held.release(self.name.clone()));
        if let Err(e) = teardown.await {
            warn!("{}: run scope teardown failed: {}", self.name, e);
        }
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        let held = std::mem::take(&mut *self.held());
        if held.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                debug!("{}: run dropped, cleaning up in background", self.name);
                rt.spawn(held.release(self.name.clone()));
            }
            Err(_) => {
                warn!("{}: run dropped outside a runtime, legs not hung up", self.name);
            }
        }
    }
}

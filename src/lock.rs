//! Deadlock-free acquisition of several endpoint locks
//!
//! Every caller that needs more than one lock goes through [`acquire`],
//! which always locks in ascending `(priority, name)` order. Two runs that
//! share endpoints therefore never wait on each other in a cycle.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Something with a mutual-exclusion lock and a position in the global
/// lock order
pub trait Lockable: Send + Sync {
    /// Sort key: lower priority first, name breaks ties
    fn lock_key(&self) -> (i32, &str);

    fn mutex(&self) -> &Arc<Mutex<()>>;
}

/// Locks held together. Released in reverse acquisition order on drop.
#[derive(Default)]
pub struct LockSet {
    guards: Vec<(String, OwnedMutexGuard<()>)>,
}

impl LockSet {
    /// Names in the order they were locked
    pub fn names(&self) -> Vec<&str> {
        self.guards.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some((name, guard)) = self.guards.pop() {
            drop(guard);
            trace!("Released lock {}", name);
        }
    }
}

impl std::fmt::Debug for LockSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LockSet").field(&self.names()).finish()
    }
}

/// Lock all `resources` in global order.
///
/// The same resource listed twice is locked once. If the returned future
/// is dropped while waiting, the locks taken so far are released.
pub async fn acquire<L: Lockable + ?Sized>(resources: &[&L]) -> LockSet {
    let mut order: Vec<&L> = resources.to_vec();
    order.sort_by(|a, b| a.lock_key().cmp(&b.lock_key()));
    order.dedup_by(|a, b| a.lock_key().1 == b.lock_key().1);

    let mut set = LockSet::default();
    for res in order {
        let name = res.lock_key().1.to_string();
        trace!("Waiting for lock {}", name);
        let guard = res.mutex().clone().lock_owned().await;
        set.guards.push((name, guard));
    }
    set
}

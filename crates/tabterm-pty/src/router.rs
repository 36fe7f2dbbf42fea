use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::host::{HostEvent, ProcessHandle};

/// Output held for a handle nobody has subscribed to yet.
const EARLY_OUTPUT_LIMIT: usize = 64 * 1024;

/// Receives output for one process handle.
///
/// Both methods are called with the router's table locked, so implementations
/// must not call back into the router.
pub trait Subscriber: Send + Sync {
    fn on_output(&self, data: &[u8]);

    /// The process exited. The subscription has already been removed.
    fn on_exit(&self, code: Option<u32>);
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("handle {0} already has a live subscription")]
    DuplicateSubscription(ProcessHandle),
}

/// Events that reached the router before the handle's subscriber did.
#[derive(Default)]
struct Early {
    output: Vec<u8>,
    exit: Option<Option<u32>>,
}

#[derive(Default)]
struct Table {
    live: HashMap<ProcessHandle, Arc<dyn Subscriber>>,
    early: HashMap<ProcessHandle, Early>,
    /// Unsubscribed handles whose process has not reported its exit yet.
    retired: HashSet<ProcessHandle>,
}

/// Demultiplexes host events to per-handle subscribers.
///
/// One lock covers subscribe, unsubscribe and delivery: once
/// [`unsubscribe`](Self::unsubscribe) returns, no delivery for that handle is
/// in flight and none will start.
///
/// A shell can produce output, or even exit, before its session has
/// subscribed. Those events are held per handle and replayed by
/// [`subscribe`](Self::subscribe). Events for unsubscribed handles are dropped.
#[derive(Clone, Default)]
pub struct OutputRouter {
    table: Arc<Mutex<Table>>,
}

impl OutputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        // Entries are inserted and removed whole, so a poisoned table is still consistent.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Route output for `handle` to `subscriber`.
    ///
    /// Output that arrived earlier is delivered first. If the process has
    /// already exited, the subscriber is told so and no subscription is kept.
    /// A second subscription for a live handle is refused and logged.
    pub fn subscribe(
        &self,
        handle: ProcessHandle,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), RouterError> {
        let mut table = self.table();
        if table.live.contains_key(&handle) {
            log::warn!("Refusing duplicate output subscription for {handle}");
            return Err(RouterError::DuplicateSubscription(handle));
        }

        if let Some(early) = table.early.remove(&handle) {
            if !early.output.is_empty() {
                log::debug!("Replaying {} early bytes for {handle}", early.output.len());
                subscriber.on_output(&early.output);
            }
            if let Some(code) = early.exit {
                log::debug!("{handle} exited before it was subscribed");
                subscriber.on_exit(code);
                return Ok(());
            }
        }

        table.live.insert(handle, subscriber);
        log::debug!("Subscribed {handle} ({} live)", table.live.len());
        Ok(())
    }

    /// Remove the subscription for `handle`. Returns whether one existed.
    pub fn unsubscribe(&self, handle: ProcessHandle) -> bool {
        let mut table = self.table();
        let removed = table.live.remove(&handle).is_some();
        if removed {
            table.retired.insert(handle);
            log::debug!("Unsubscribed {handle}");
        }
        removed
    }

    /// Deliver `data` to the subscriber for `handle`. Returns whether it was
    /// delivered now; output for a handle not yet subscribed is held.
    pub fn dispatch(&self, handle: ProcessHandle, data: &[u8]) -> bool {
        let mut table = self.table();
        if let Some(subscriber) = table.live.get(&handle) {
            subscriber.on_output(data);
            return true;
        }
        if table.retired.contains(&handle) {
            log::debug!("Dropping {} bytes for unsubscribed {handle}", data.len());
            return false;
        }

        let early = table.early.entry(handle).or_default();
        if early.exit.is_some() || early.output.len() + data.len() > EARLY_OUTPUT_LIMIT {
            log::debug!("Dropping {} early bytes for {handle}", data.len());
        } else {
            early.output.extend_from_slice(data);
        }
        false
    }

    /// Remove the subscription for an exited process and notify its subscriber.
    /// Returns whether a subscriber was notified now.
    pub fn dispatch_exit(&self, handle: ProcessHandle, code: Option<u32>) -> bool {
        let mut table = self.table();
        if let Some(subscriber) = table.live.remove(&handle) {
            subscriber.on_exit(code);
            return true;
        }
        // Nothing follows an exit, so a retired handle can be forgotten.
        if !table.retired.remove(&handle) {
            table.early.entry(handle).or_default().exit = Some(code);
        }
        false
    }

    /// Route one event from the host's event channel.
    pub fn handle_event(&self, event: HostEvent) -> bool {
        match event {
            HostEvent::Output { handle, data } => self.dispatch(handle, &data),
            HostEvent::Exited { handle, code } => self.dispatch_exit(handle, code),
        }
    }

    pub fn is_subscribed(&self, handle: ProcessHandle) -> bool {
        self.table().live.contains_key(&handle)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.table().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().live.is_empty()
    }
}

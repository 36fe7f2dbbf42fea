//! Scripted doubles for the shell host and display surfaces.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::config::TabConfig;
use crate::host::{HostError, ProcessHandle, ShellHost};
use crate::registry::{TabId, TabRegistry};
use crate::router::OutputRouter;
use crate::surface::{DisplaySurface, SurfaceFactory, SurfaceFeedback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostRecord {
    Spawn(String, u16, u16),
    Write(ProcessHandle, Vec<u8>),
    Resize(ProcessHandle, u16, u16),
    Close(ProcessHandle),
}

#[derive(Default)]
struct FakeState {
    records: Vec<HostRecord>,
    next: u64,
    live: HashSet<ProcessHandle>,
}

/// In-memory [`ShellHost`] that records every call.
#[derive(Default)]
pub(crate) struct FakeHost {
    state: Mutex<FakeState>,
    fail_spawn: AtomicBool,
    fail_io: AtomicBool,
    hold_spawn: AtomicBool,
    release: Notify,
}

impl FakeHost {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_io(&self, fail: bool) {
        self.fail_io.store(fail, Ordering::SeqCst);
    }

    /// Make `spawn` wait for [`release_spawn`](Self::release_spawn).
    pub(crate) fn hold_spawns(&self, hold: bool) {
        self.hold_spawn.store(hold, Ordering::SeqCst);
    }

    pub(crate) fn release_spawn(&self) {
        self.release.notify_one();
    }

    pub(crate) fn records(&self) -> Vec<HostRecord> {
        self.state().records.clone()
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.state()
            .records
            .iter()
            .filter(|r| matches!(r, HostRecord::Spawn(..)))
            .count()
    }

    /// Everything written to `handle`, concatenated.
    pub(crate) fn written(&self, handle: ProcessHandle) -> Vec<u8> {
        self.state()
            .records
            .iter()
            .filter_map(|r| match r {
                HostRecord::Write(h, data) if *h == handle => Some(data.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub(crate) fn resizes(&self, handle: ProcessHandle) -> Vec<(u16, u16)> {
        self.state()
            .records
            .iter()
            .filter_map(|r| match r {
                HostRecord::Resize(h, cols, rows) if *h == handle => Some((*cols, *rows)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn closed(&self, handle: ProcessHandle) -> bool {
        self.state().records.contains(&HostRecord::Close(handle))
    }

    /// The handle the next successful spawn will return.
    pub(crate) fn next_handle(&self) -> ProcessHandle {
        ProcessHandle(self.state().next + 1)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.state().live.len()
    }

    fn io_result(&self, handle: ProcessHandle) -> Result<(), HostError> {
        if self.fail_io.load(Ordering::SeqCst) {
            return Err(HostError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted failure",
            )));
        }
        if !self.state().live.contains(&handle) {
            return Err(HostError::UnknownHandle(handle));
        }
        Ok(())
    }
}

#[async_trait]
impl ShellHost for FakeHost {
    async fn spawn(&self, shell: &str, cols: u16, rows: u16) -> Result<ProcessHandle, HostError> {
        self.state()
            .records
            .push(HostRecord::Spawn(shell.to_string(), cols, rows));
        if self.hold_spawn.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(HostError::SpawnFailed("scripted failure".to_string()));
        }

        let mut state = self.state();
        state.next += 1;
        let handle = ProcessHandle(state.next);
        state.live.insert(handle);
        Ok(handle)
    }

    async fn write(&self, handle: ProcessHandle, data: &[u8]) -> Result<(), HostError> {
        self.state()
            .records
            .push(HostRecord::Write(handle, data.to_vec()));
        self.io_result(handle)
    }

    async fn resize(&self, handle: ProcessHandle, cols: u16, rows: u16) -> Result<(), HostError> {
        self.state()
            .records
            .push(HostRecord::Resize(handle, cols, rows));
        self.io_result(handle)
    }

    async fn close(&self, handle: ProcessHandle) -> Result<(), HostError> {
        self.state().records.push(HostRecord::Close(handle));
        let result = self.io_result(handle);
        self.state().live.remove(&handle);
        result
    }
}

/// What a [`RecordingSurface`] saw.
#[derive(Debug, Default)]
pub(crate) struct SurfaceLog {
    pub(crate) fed: Vec<u8>,
    pub(crate) fed_after_dispose: usize,
    pub(crate) disposed: bool,
    pub(crate) visible: bool,
    pub(crate) dims: (u16, u16),
}

impl SurfaceLog {
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.fed).into_owned()
    }
}

pub(crate) type SharedSurfaceLog = Arc<Mutex<SurfaceLog>>;

pub(crate) struct RecordingSurface {
    log: SharedSurfaceLog,
}

impl DisplaySurface for RecordingSurface {
    fn feed(&mut self, bytes: &[u8]) -> SurfaceFeedback {
        let mut log = self.log.lock().unwrap();
        if log.disposed {
            log.fed_after_dispose += 1;
        } else {
            log.fed.extend_from_slice(bytes);
        }
        SurfaceFeedback::default()
    }

    fn dimensions(&self) -> (u16, u16) {
        self.log.lock().unwrap().dims
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.log.lock().unwrap().dims = (cols, rows);
    }

    fn set_visible(&mut self, visible: bool) {
        self.log.lock().unwrap().visible = visible;
    }

    fn is_visible(&self) -> bool {
        self.log.lock().unwrap().visible
    }

    fn dispose(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.disposed = true;
        log.visible = false;
    }
}

pub(crate) fn recording_surface(cols: u16, rows: u16) -> (Box<dyn DisplaySurface>, SharedSurfaceLog) {
    let log = Arc::new(Mutex::new(SurfaceLog {
        dims: (cols, rows),
        ..SurfaceLog::default()
    }));
    (Box::new(RecordingSurface { log: log.clone() }), log)
}

/// Hands out [`RecordingSurface`]s and keeps their logs by tab.
#[derive(Clone, Default)]
pub(crate) struct RecordingFactory {
    logs: Arc<Mutex<HashMap<TabId, SharedSurfaceLog>>>,
}

impl RecordingFactory {
    pub(crate) fn log(&self, tab: TabId) -> SharedSurfaceLog {
        self.logs.lock().unwrap()[&tab].clone()
    }

    pub(crate) fn created(&self) -> usize {
        self.logs.lock().unwrap().len()
    }
}

impl SurfaceFactory for RecordingFactory {
    fn create(&mut self, tab: TabId, cols: u16, rows: u16) -> Box<dyn DisplaySurface> {
        let (surface, log) = recording_surface(cols, rows);
        self.logs.lock().unwrap().insert(tab, log);
        surface
    }
}

pub(crate) fn test_config(max_tabs: usize) -> TabConfig {
    TabConfig {
        max_tabs,
        shell: Some("/bin/sh".to_string()),
        ..TabConfig::default()
    }
}

/// Registry over `host` with recording surfaces, on the current runtime.
pub(crate) fn test_registry(host: &Arc<FakeHost>, max_tabs: usize) -> TabRegistry {
    test_registry_with_surfaces(host, max_tabs).0
}

pub(crate) fn test_registry_with_surfaces(
    host: &Arc<FakeHost>,
    max_tabs: usize,
) -> (TabRegistry, RecordingFactory, OutputRouter) {
    let surfaces = RecordingFactory::default();
    let router = OutputRouter::new();
    let registry = TabRegistry::new(
        test_config(max_tabs),
        host.clone(),
        router.clone(),
        Box::new(surfaces.clone()),
        Handle::current(),
    );
    (registry, surfaces, router)
}

/// Yield to background tasks until `cond` holds.
pub(crate) async fn settle(cond: impl Fn() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::host::{HostError, HostEvent, ProcessHandle, ShellHost};

/// How long the reader thread waits for a child to report its exit status
/// after the PTY hit EOF.
const REAP_ATTEMPTS: u32 = 40;
const REAP_INTERVAL: Duration = Duration::from_millis(25);

struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Box<dyn Child + Send + Sync>,
}

struct PtyInner {
    processes: Mutex<HashMap<ProcessHandle, PtyProcess>>,
    next_handle: AtomicU64,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl PtyInner {
    fn processes(&self) -> MutexGuard<'_, HashMap<ProcessHandle, PtyProcess>> {
        self.processes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_wait(&self, handle: ProcessHandle) -> Option<u32> {
        let mut processes = self.processes();
        let process = processes.get_mut(&handle)?;
        match process.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }
}

impl Drop for PtyInner {
    fn drop(&mut self) {
        for (handle, mut process) in self.processes().drain() {
            log::debug!("Killing shell {handle} on host shutdown");
            let _ = process.child.kill();
        }
    }
}

/// Shell host backed by native pseudo-terminals.
///
/// Every spawned shell gets a dedicated reader thread that forwards output to
/// the host's event channel and reports the exit status once the PTY closes.
/// Dropping the last clone of the host kills any shells still running.
#[derive(Clone)]
pub struct PtyHost {
    inner: Arc<PtyInner>,
}

impl PtyHost {
    /// Create a host and the receiving end of its event channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let host = Self {
            inner: Arc::new(PtyInner {
                processes: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                events,
            }),
        };
        (host, rx)
    }

    /// Number of shells currently owned by this host.
    pub fn process_count(&self) -> usize {
        self.inner.processes().len()
    }

    /// Open a PTY, spawn `shell` into it, and start its reader thread.
    pub fn spawn_blocking(&self, shell: &str, cols: u16, rows: u16) -> Result<ProcessHandle, HostError> {
        let pair = native_pty_system()
            .openpty(pty_size(cols, rows))
            .map_err(|e| HostError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| HostError::SpawnFailed(format!("failed to spawn {shell}: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| HostError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| HostError::SpawnFailed(format!("failed to take writer: {e}")))?;

        let handle = ProcessHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        self.inner.processes().insert(
            handle,
            PtyProcess {
                master: pair.master,
                writer: Arc::new(Mutex::new(writer)),
                child,
            },
        );

        if let Err(e) = start_reader_thread(Arc::downgrade(&self.inner), handle, reader) {
            if let Some(mut process) = self.inner.processes().remove(&handle) {
                let _ = process.child.kill();
            }
            return Err(HostError::SpawnFailed(format!("failed to start reader thread: {e}")));
        }

        log::info!("Spawned {shell} as {handle} ({cols}x{rows})");
        Ok(handle)
    }

    pub fn write_blocking(&self, handle: ProcessHandle, data: &[u8]) -> Result<(), HostError> {
        // Clone the writer out so a full PTY buffer never stalls other shells.
        let writer = self
            .inner
            .processes()
            .get(&handle)
            .map(|process| Arc::clone(&process.writer))
            .ok_or(HostError::UnknownHandle(handle))?;

        let mut writer = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    pub fn resize_blocking(&self, handle: ProcessHandle, cols: u16, rows: u16) -> Result<(), HostError> {
        let processes = self.inner.processes();
        let process = processes.get(&handle).ok_or(HostError::UnknownHandle(handle))?;
        process
            .master
            .resize(pty_size(cols, rows))
            .map_err(|e| HostError::ResizeFailed(format!("{e}")))
    }

    /// Kill the shell and release its PTY.
    pub fn close_blocking(&self, handle: ProcessHandle) -> Result<(), HostError> {
        let mut process = self
            .inner
            .processes()
            .remove(&handle)
            .ok_or(HostError::UnknownHandle(handle))?;

        if let Err(e) = process.child.kill() {
            log::debug!("Shell {handle} already exited: {e}");
        }
        process.child.wait()?;
        log::info!("Closed shell {handle}");
        Ok(())
    }
}

#[async_trait]
impl ShellHost for PtyHost {
    async fn spawn(&self, shell: &str, cols: u16, rows: u16) -> Result<ProcessHandle, HostError> {
        let host = self.clone();
        let shell = shell.to_string();
        run_blocking(move || host.spawn_blocking(&shell, cols, rows)).await
    }

    async fn write(&self, handle: ProcessHandle, data: &[u8]) -> Result<(), HostError> {
        let host = self.clone();
        let data = data.to_vec();
        run_blocking(move || host.write_blocking(handle, &data)).await
    }

    async fn resize(&self, handle: ProcessHandle, cols: u16, rows: u16) -> Result<(), HostError> {
        let host = self.clone();
        run_blocking(move || host.resize_blocking(handle, cols, rows)).await
    }

    async fn close(&self, handle: ProcessHandle) -> Result<(), HostError> {
        let host = self.clone();
        run_blocking(move || host.close_blocking(handle)).await
    }
}

/// PTY calls block, so they run on tokio's blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, HostError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HostError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HostError::Io(std::io::Error::other(e)))?
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Read PTY output on a dedicated OS thread until EOF, then report the exit.
///
/// The thread only holds a weak reference to the host so that dropping the
/// host still kills the remaining shells.
fn start_reader_thread(
    inner: Weak<PtyInner>,
    handle: ProcessHandle,
    mut reader: Box<dyn Read + Send>,
) -> std::io::Result<()> {
    let events = match inner.upgrade() {
        Some(inner) => inner.events.clone(),
        None => return Ok(()),
    };

    std::thread::Builder::new()
        .name(format!("pty-io-{}", handle.0))
        .spawn(move || {
            let mut buf = [0u8; 65536];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = HostEvent::Output {
                            handle,
                            data: buf[..n].to_vec(),
                        };
                        if events.send(event).is_err() {
                            // Nobody is listening any more.
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        log::debug!("PTY read for {handle} ended: {e}");
                        break;
                    }
                }
            }

            let code = reap_exit_code(&inner, handle);
            log::info!("Shell {handle} exited with code {code:?}");
            let _ = events.send(HostEvent::Exited { handle, code });
        })?;

    Ok(())
}

fn reap_exit_code(inner: &Weak<PtyInner>, handle: ProcessHandle) -> Option<u32> {
    for _ in 0..REAP_ATTEMPTS {
        let inner = inner.upgrade()?;
        if let Some(code) = inner.try_wait(handle) {
            return Some(code);
        }
        if !inner.processes().contains_key(&handle) {
            // Closed through the host; the exit status was consumed there.
            return None;
        }
        drop(inner);
        std::thread::sleep(REAP_INTERVAL);
    }
    None
}

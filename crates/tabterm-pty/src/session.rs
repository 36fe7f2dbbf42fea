use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::host::{HostError, ProcessHandle, ShellHost};
use crate::input::{InputMode, KeyEvent, KeyInput};
use crate::registry::TabId;
use crate::router::{OutputRouter, Subscriber};
use crate::surface::{DisplaySurface, SurfaceFeedback};

/// Lifecycle of a session.
///
/// `Spawning → Attached → Closing → Closed`, or `Spawning → Failed` when the
/// host rejects the spawn. A shell exiting on its own moves an attached
/// session to `Closing` until the tab is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Spawning,
    Attached,
    Failed,
    Closing,
    Closed,
}

/// Sent from sessions to the tab registry on the control thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    TitleChanged { tab: TabId, title: String },
    Bell { tab: TabId },
    Exited { tab: TabId, code: Option<u32> },
}

type Reply = oneshot::Sender<Result<(), HostError>>;

/// Host calls a session's worker performs, in submission order.
enum Command {
    Write(Vec<u8>, Reply),
    Resize { cols: u16, rows: u16, reply: Reply },
    Close(Reply),
}

/// Completion of a best-effort host call.
///
/// Failures are logged by the session either way. Await
/// [`outcome`](Self::outcome) to surface the error, or drop the call to
/// ignore it.
#[derive(Debug)]
pub struct HostCall {
    rx: Option<oneshot::Receiver<Result<(), HostError>>>,
}

impl HostCall {
    fn skipped() -> Self {
        Self { rx: None }
    }

    fn pending(rx: oneshot::Receiver<Result<(), HostError>>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Whether the call was handed to the shell host at all. Calls made in
    /// the wrong state are dropped without reaching the host.
    pub fn was_forwarded(&self) -> bool {
        self.rx.is_some()
    }

    pub async fn outcome(self) -> Result<(), HostError> {
        match self.rx {
            None => Ok(()),
            Some(rx) => rx.await.unwrap_or(Err(HostError::Dropped)),
        }
    }
}

/// Everything a session needs from its surroundings.
#[derive(Clone)]
pub struct SessionContext {
    pub host: Arc<dyn ShellHost>,
    pub router: OutputRouter,
    pub runtime: Handle,
    pub notices: mpsc::UnboundedSender<SessionNotice>,
}

struct Inner {
    state: SessionState,
    handle: Option<ProcessHandle>,
    /// Last dimensions the host knows about.
    host_size: Option<(u16, u16)>,
    close_requested: bool,
    /// Resolved by the worker when a close arrives mid-spawn.
    pending_close: Option<Reply>,
    surface: Box<dyn DisplaySurface>,
    keys: KeyInput,
    exit_code: Option<u32>,
    /// Present until `start` hands it to the worker.
    worker_rx: Option<mpsc::UnboundedReceiver<Command>>,
}

struct Shared {
    tab: TabId,
    shell: String,
    context: SessionContext,
    commands: mpsc::UnboundedSender<Command>,
    inner: Mutex<Inner>,
}

/// One shell process bound to one tab and one display surface.
///
/// Cloning is cheap and yields another reference to the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tab", &self.shared.tab)
            .field("state", &self.state())
            .field("handle", &self.handle())
            .finish()
    }
}

impl Session {
    pub fn new(
        tab: TabId,
        shell: impl Into<String>,
        surface: Box<dyn DisplaySurface>,
        input_mode: InputMode,
        context: &SessionContext,
    ) -> Self {
        let (commands, worker_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                tab,
                shell: shell.into(),
                context: context.clone(),
                commands,
                inner: Mutex::new(Inner {
                    state: SessionState::Spawning,
                    handle: None,
                    host_size: None,
                    close_requested: false,
                    pending_close: None,
                    surface,
                    keys: KeyInput::new(input_mode),
                    exit_code: None,
                    worker_rx: Some(worker_rx),
                }),
            }),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.shared.tab
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn handle(&self) -> Option<ProcessHandle> {
        self.shared.lock().handle
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.shared.lock().exit_code
    }

    pub fn input_mode(&self) -> InputMode {
        self.shared.lock().keys.mode()
    }

    /// Dimensions last forwarded to (or spawned with on) the host.
    pub fn host_size(&self) -> Option<(u16, u16)> {
        self.shared.lock().host_size
    }

    /// Spawn the shell without blocking the caller.
    ///
    /// The session becomes `Attached` once the host returns a handle and the
    /// output subscription is in place, or `Failed` with a diagnostic written
    /// to its surface. Spawning is never retried.
    pub fn start(&self, cols: u16, rows: u16) {
        let Some(rx) = self.shared.lock().worker_rx.take() else {
            log::warn!("Session for tab {} was already started or closed", self.shared.tab);
            return;
        };
        let shared = Arc::clone(&self.shared);
        self.shared.context.runtime.spawn(run_worker(shared, rx, cols, rows));
    }

    /// Forward raw input to the shell. Dropped unless attached.
    pub fn send_input(&self, data: &[u8]) -> HostCall {
        self.shared.send_input(data)
    }

    /// Encode a keystroke with this session's input mode and forward it.
    pub fn on_keystroke(&self, event: &KeyEvent) -> HostCall {
        let mut inner = self.shared.lock();
        if inner.state != SessionState::Attached {
            return HostCall::skipped();
        }

        let out = inner.keys.translate(event);
        if !out.echo.is_empty() {
            inner.surface.feed(&out.echo);
        }
        if out.send.is_empty() {
            return HostCall::skipped();
        }
        self.shared
            .enqueue(|reply| Command::Write(out.send, reply))
    }

    /// Tell the host about new dimensions.
    ///
    /// Only forwarded while attached, and only when they differ from the
    /// last forwarded value.
    pub fn resize(&self, cols: u16, rows: u16) -> HostCall {
        let mut inner = self.shared.lock();
        self.shared.resize_locked(&mut inner, cols, rows)
    }

    /// Resize the surface, then forward its new dimensions.
    pub fn resize_surface(&self, cols: u16, rows: u16) -> HostCall {
        let mut inner = self.shared.lock();
        if inner.close_requested {
            return HostCall::skipped();
        }
        inner.surface.resize(cols, rows);
        let (cols, rows) = inner.surface.dimensions();
        self.shared.resize_locked(&mut inner, cols, rows)
    }

    /// Forward whatever dimensions the surface currently has.
    pub fn fit(&self) -> HostCall {
        let mut inner = self.shared.lock();
        let (cols, rows) = inner.surface.dimensions();
        self.shared.resize_locked(&mut inner, cols, rows)
    }

    /// The display engine reported a new window title.
    pub fn on_title_changed(&self, title: impl Into<String>) {
        self.shared.notify(SessionNotice::TitleChanged {
            tab: self.shared.tab,
            title: title.into(),
        });
    }

    pub fn set_visible(&self, visible: bool) {
        let mut inner = self.shared.lock();
        if !inner.close_requested {
            inner.surface.set_visible(visible);
        }
    }

    pub fn is_visible(&self) -> bool {
        self.shared.lock().surface.is_visible()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.shared.lock().surface.snapshot()
    }

    /// Tear the session down. Idempotent.
    ///
    /// Unsubscribes from the router first so no output can race the
    /// teardown, then asks the host to close the process, then disposes the
    /// surface. A close issued mid-spawn is carried out by the worker as soon
    /// as the spawn resolves.
    pub fn close(&self) -> HostCall {
        let shared = &self.shared;
        let handle = {
            let mut inner = shared.lock();
            if inner.close_requested {
                return HostCall::skipped();
            }
            inner.close_requested = true;
            let previous = std::mem::replace(&mut inner.state, SessionState::Closing);
            log::info!("Closing session for tab {} ({previous:?})", shared.tab);

            match previous {
                // Spawn in flight, or the shell exited before attaching.
                SessionState::Spawning | SessionState::Closing
                    if inner.handle.is_none() && inner.worker_rx.is_none() =>
                {
                    inner.surface.dispose();
                    let (reply, rx) = oneshot::channel();
                    inner.pending_close = Some(reply);
                    return HostCall::pending(rx);
                }
                SessionState::Spawning | SessionState::Failed | SessionState::Closed => {
                    // Never started: a later `start` must not spawn.
                    inner.worker_rx = None;
                    inner.surface.dispose();
                    inner.state = SessionState::Closed;
                    return HostCall::skipped();
                }
                SessionState::Attached | SessionState::Closing => inner.handle,
            }
        };

        if let Some(handle) = handle {
            shared.context.router.unsubscribe(handle);
        }

        let mut inner = shared.lock();
        let call = shared.enqueue(Command::Close);
        inner.surface.dispose();
        inner.state = SessionState::Closed;
        call
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every transition is a single assignment under the lock, so a
        // poisoned guard still holds a coherent state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enqueue(&self, make: impl FnOnce(Reply) -> Command) -> HostCall {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(make(reply)).is_err() {
            log::warn!("Session worker for tab {} is gone", self.tab);
        }
        HostCall::pending(rx)
    }

    fn notify(&self, notice: SessionNotice) {
        if self.context.notices.send(notice).is_err() {
            log::debug!("Tab registry gone; dropping notice from tab {}", self.tab);
        }
    }

    fn send_input(&self, data: &[u8]) -> HostCall {
        let inner = self.lock();
        if inner.state != SessionState::Attached || data.is_empty() {
            log::debug!("Dropping {} input bytes for tab {} ({:?})", data.len(), self.tab, inner.state);
            return HostCall::skipped();
        }
        // Enqueued under the lock so no write can follow a close.
        self.enqueue(|reply| Command::Write(data.to_vec(), reply))
    }

    fn resize_locked(&self, inner: &mut Inner, cols: u16, rows: u16) -> HostCall {
        if inner.state != SessionState::Attached || inner.host_size == Some((cols, rows)) {
            return HostCall::skipped();
        }
        inner.host_size = Some((cols, rows));
        self.enqueue(|reply| Command::Resize { cols, rows, reply })
    }

    fn report(&self, feedback: SurfaceFeedback) {
        if let Some(title) = feedback.title {
            self.notify(SessionNotice::TitleChanged {
                tab: self.tab,
                title,
            });
        }
        if feedback.bell {
            self.notify(SessionNotice::Bell { tab: self.tab });
        }
        if !feedback.replies.is_empty() {
            let _ = self.send_input(&feedback.replies);
        }
    }

    /// Record a successful spawn. Returns `false` if the session was closed
    /// while the spawn was in flight.
    fn attach(&self, handle: ProcessHandle, cols: u16, rows: u16) -> bool {
        let mut inner = self.lock();
        inner.handle = Some(handle);
        if inner.close_requested {
            return false;
        }
        if inner.state == SessionState::Spawning {
            inner.state = SessionState::Attached;
            inner.host_size = Some((cols, rows));
            log::info!("Tab {} attached to shell {handle}", self.tab);
        }
        true
    }

    fn spawn_failed(&self, error: &HostError) {
        let mut inner = self.lock();
        if inner.close_requested {
            inner.state = SessionState::Closed;
            if let Some(reply) = inner.pending_close.take() {
                let _ = reply.send(Ok(()));
            }
            return;
        }

        log::warn!("Shell for tab {} failed to start: {error}", self.tab);
        let message = format!(
            "\r\n\x1b[31mFailed to start shell {}: {error}\x1b[0m\r\n",
            self.shell
        );
        inner.surface.feed(message.as_bytes());
        inner.state = SessionState::Failed;
    }

    fn finish_pending_close(&self, result: Result<(), HostError>) {
        let mut inner = self.lock();
        inner.state = SessionState::Closed;
        match inner.pending_close.take() {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => log_failure("close", self.tab, &result),
        }
    }
}

impl Subscriber for Shared {
    fn on_output(&self, data: &[u8]) {
        let feedback = {
            let mut inner = self.lock();
            let live = matches!(inner.state, SessionState::Spawning | SessionState::Attached);
            if !live || inner.close_requested {
                return;
            }
            inner.surface.feed(data)
        };
        self.report(feedback);
    }

    fn on_exit(&self, code: Option<u32>) {
        {
            let mut inner = self.lock();
            inner.exit_code = code;
            if matches!(inner.state, SessionState::Spawning | SessionState::Attached) {
                inner.state = SessionState::Closing;
            }
        }
        log::info!("Shell for tab {} exited with code {code:?}", self.tab);
        self.notify(SessionNotice::Exited {
            tab: self.tab,
            code,
        });
    }
}

fn log_failure(call: &str, tab: TabId, result: &Result<(), HostError>) {
    if let Err(e) = result {
        log::warn!("Shell {call} for tab {tab} failed: {e}");
    }
}

/// Spawns the shell, then performs the session's host calls one at a time.
async fn run_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    cols: u16,
    rows: u16,
) {
    let host = Arc::clone(&shared.context.host);
    let handle = match host.spawn(&shared.shell, cols, rows).await {
        Ok(handle) => handle,
        Err(e) => {
            shared.spawn_failed(&e);
            return;
        }
    };

    // Subscribing replays anything the shell produced while the spawn was
    // returning, including an exit.
    let subscriber: Arc<dyn Subscriber> = shared.clone();
    if let Err(e) = shared.context.router.subscribe(handle, subscriber) {
        let _ = host.close(handle).await;
        shared.spawn_failed(&HostError::SpawnFailed(e.to_string()));
        return;
    }

    if !shared.attach(handle, cols, rows) {
        log::info!("Tab {} closed mid-spawn; closing shell {handle}", shared.tab);
        shared.context.router.unsubscribe(handle);
        let result = host.close(handle).await;
        shared.finish_pending_close(result);
        return;
    }

    while let Some(command) = rx.recv().await {
        match command {
            Command::Write(data, reply) => {
                let result = host.write(handle, &data).await;
                log_failure("write", shared.tab, &result);
                let _ = reply.send(result);
            }
            Command::Resize { cols, rows, reply } => {
                let result = host.resize(handle, cols, rows).await;
                log_failure("resize", shared.tab, &result);
                let _ = reply.send(result);
            }
            Command::Close(reply) => {
                let result = host.close(handle).await;
                log_failure("close", shared.tab, &result);
                let _ = reply.send(result);
                break;
            }
        }
    }
}

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::TabConfig;
use crate::host::ShellHost;
use crate::router::OutputRouter;
use crate::session::{Session, SessionContext, SessionNotice};
use crate::surface::SurfaceFactory;

/// Tab identifier. Unique for the life of a registry, never reused.
pub type TabId = u64;

/// One open tab and the session it owns.
pub struct Tab {
    id: TabId,
    title: String,
    session: Session,
    bell: bool,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// A bell rang while this tab was in the background.
    pub fn has_bell(&self) -> bool {
        self.bell
    }
}

/// Ordered set of tabs with at most one active.
///
/// Only the control thread touches the registry. Sessions report back
/// through a notice channel drained by [`process_notices`](Self::process_notices).
pub struct TabRegistry {
    tabs: Vec<Tab>,
    active: Option<TabId>,
    next_id: TabId,
    config: TabConfig,
    context: SessionContext,
    surfaces: Box<dyn SurfaceFactory>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
}

impl TabRegistry {
    pub fn new(
        config: TabConfig,
        host: Arc<dyn ShellHost>,
        router: OutputRouter,
        surfaces: Box<dyn SurfaceFactory>,
        runtime: Handle,
    ) -> Self {
        let (notices_tx, notices) = mpsc::unbounded_channel();
        Self {
            tabs: Vec::new(),
            active: None,
            next_id: 1,
            config,
            context: SessionContext {
                host,
                router,
                runtime,
                notices: notices_tx,
            },
            surfaces,
            notices,
        }
    }

    pub fn config(&self) -> &TabConfig {
        &self.config
    }

    pub fn router(&self) -> &OutputRouter {
        &self.context.router
    }

    /// Open a tab with the default title and make it active.
    ///
    /// Returns `None` without side effects once `max_tabs` are open.
    pub fn create_tab(&mut self) -> Option<TabId> {
        let title = self.config.default_title.clone();
        self.create_tab_with_title(title)
    }

    pub fn create_tab_with_title(&mut self, title: impl Into<String>) -> Option<TabId> {
        if self.tabs.len() >= self.config.max_tabs {
            log::warn!("Maximum of {} tabs reached", self.config.max_tabs);
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        let (cols, rows) = (self.config.cols, self.config.rows);
        let surface = self.surfaces.create(id, cols, rows);
        let session = Session::new(
            id,
            self.config.shell_command(),
            surface,
            self.config.input_mode,
            &self.context,
        );
        session.start(cols, rows);

        self.tabs.push(Tab {
            id,
            title: title.into(),
            session,
            bell: false,
        });
        self.set_active_tab(id);
        log::info!("Created tab {id} (total: {})", self.tabs.len());
        Some(id)
    }

    /// Close a tab and its session. Unknown ids are a no-op.
    ///
    /// Closing the active tab activates the last remaining tab.
    pub fn close_tab(&mut self, id: TabId) -> bool {
        let Some(index) = self.tabs.iter().position(|t| t.id == id) else {
            log::debug!("close_tab: no tab {id}");
            return false;
        };

        let tab = self.tabs.remove(index);
        // Failures are logged by the session.
        let _ = tab.session.close();

        if self.active == Some(id) {
            self.active = None;
            if let Some(last) = self.tabs.last().map(Tab::id) {
                self.set_active_tab(last);
            }
        }
        log::info!("Closed tab {id} (remaining: {})", self.tabs.len());
        true
    }

    /// Make `id` the only visible tab. Unknown ids are a no-op.
    pub fn set_active_tab(&mut self, id: TabId) -> bool {
        if self.get(id).is_none() {
            log::debug!("set_active_tab: no tab {id}");
            return false;
        }

        self.active = Some(id);
        for tab in &mut self.tabs {
            let active = tab.id == id;
            tab.session.set_visible(active);
            if active {
                tab.bell = false;
            }
        }
        true
    }

    pub fn rename_tab(&mut self, id: TabId, title: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(tab) => {
                tab.title = title.into();
                true
            }
            None => false,
        }
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.active
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_tab().map(Tab::session)
    }

    pub fn get(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    /// Tabs in creation order.
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Apply every notice sessions have queued. Returns how many were handled.
    pub fn process_notices(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(notice) = self.notices.try_recv() {
            self.handle_notice(notice);
            handled += 1;
        }
        handled
    }

    pub fn handle_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::TitleChanged { tab, title } => {
                // Late notices for closed tabs are dropped.
                self.rename_tab(tab, title);
            }
            SessionNotice::Bell { tab } => {
                if self.active != Some(tab) {
                    if let Some(tab) = self.get_mut(tab) {
                        tab.bell = true;
                    }
                }
            }
            SessionNotice::Exited { tab, .. } => {
                self.close_tab(tab);
            }
        }
    }

    /// Close every tab. Used at shutdown.
    pub fn close_all(&mut self) {
        if self.tabs.is_empty() {
            return;
        }
        log::info!("Closing all {} tabs", self.tabs.len());
        self.active = None;
        for tab in self.tabs.drain(..) {
            let _ = tab.session.close();
        }
    }
}

impl Drop for TabRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

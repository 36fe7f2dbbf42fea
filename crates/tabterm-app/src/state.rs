//! Application state owned by the control loop.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use tabterm_pty::{
    HostEvent, InputDispatcher, OutputRouter, PtyHost, ShellHost, TabConfig, TabRegistry,
    VtSurfaceFactory,
};

use crate::event_pump::{start_event_pump, EventPump};

pub struct AppState {
    pub registry: TabRegistry,
    pub dispatcher: InputDispatcher,
    pump: Option<EventPump>,
}

impl AppState {
    /// Start on real PTYs.
    pub fn start(config: TabConfig, runtime: Handle) -> Result<Self, String> {
        let (host, events) = PtyHost::new();
        Self::with_host(config, Arc::new(host), events, runtime)
    }

    /// Wire up router, event pump, registry and dispatcher, then open the
    /// startup tab.
    pub fn with_host(
        config: TabConfig,
        host: Arc<dyn ShellHost>,
        events: mpsc::UnboundedReceiver<HostEvent>,
        runtime: Handle,
    ) -> Result<Self, String> {
        let router = OutputRouter::new();
        let pump = start_event_pump(&runtime, router.clone(), events)
            .map_err(|e| format!("Failed to start event pump: {e}"))?;

        let surfaces = Box::new(VtSurfaceFactory::new(config.scrollback));
        let initial_title = config.initial_title.clone();
        let mut registry = TabRegistry::new(config, host, router, surfaces, runtime);

        let mut dispatcher = InputDispatcher::new();
        dispatcher.install();

        if registry.create_tab_with_title(initial_title).is_none() {
            log::warn!("Could not open the startup tab");
        }

        Ok(Self {
            registry,
            dispatcher,
            pump: Some(pump),
        })
    }

    /// Close every tab, release the keyboard and stop routing output.
    pub fn shutdown(&mut self) {
        self.registry.close_all();
        self.dispatcher.uninstall();
        if let Some(pump) = self.pump.take() {
            pump.stop();
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.shutdown();
    }
}

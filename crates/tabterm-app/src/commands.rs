//! Commands a front end invokes against the tab set.
//!
//! Each returns `Result<_, String>` so errors can cross an IPC boundary as
//! plain messages.

use tabterm_pty::{KeyDisposition, KeyEvent, Session, TabId};

use crate::ipc::{summarize, ScreenSnapshot, TabSummary};
use crate::state::AppState;

fn session(state: &AppState, id: TabId) -> Result<Session, String> {
    state
        .registry
        .get(id)
        .map(|tab| tab.session().clone())
        .ok_or_else(|| format!("Tab {id} not found"))
}

/// Open a tab with the default title and make it active.
pub fn new_terminal(state: &mut AppState) -> Result<TabId, String> {
    state.registry.create_tab().ok_or_else(|| {
        format!(
            "Maximum of {} tabs reached",
            state.registry.config().max_tabs
        )
    })
}

pub fn close_terminal(state: &mut AppState, id: TabId) -> Result<(), String> {
    if state.registry.close_tab(id) {
        Ok(())
    } else {
        Err(format!("Tab {id} not found"))
    }
}

pub fn select_terminal(state: &mut AppState, id: TabId) -> Result<(), String> {
    if state.registry.set_active_tab(id) {
        Ok(())
    } else {
        Err(format!("Tab {id} not found"))
    }
}

/// Feed one key event through the global dispatcher.
pub fn key_down(state: &mut AppState, event: &KeyEvent) -> Result<(), String> {
    match state.dispatcher.handle_key(&mut state.registry, event) {
        // Write failures are logged by the session.
        KeyDisposition::Shortcut(_) | KeyDisposition::Forwarded(_) => Ok(()),
        KeyDisposition::NoActiveTab => Err("No tab is open".to_string()),
        KeyDisposition::Ignored => Err("Keyboard input is not installed".to_string()),
    }
}

/// Write raw bytes to a tab's shell and wait for the host to accept them.
pub async fn write_input(state: &AppState, id: TabId, data: Vec<u8>) -> Result<(), String> {
    let call = session(state, id)?.send_input(&data);
    if !call.was_forwarded() {
        return Err(format!("Tab {id} is not attached to a shell"));
    }
    call.outcome()
        .await
        .map_err(|e| format!("Write error: {e}"))
}

/// Resize a tab's surface and tell its shell.
pub async fn resize_terminal(
    state: &AppState,
    id: TabId,
    cols: u16,
    rows: u16,
) -> Result<(), String> {
    session(state, id)?
        .resize_surface(cols, rows)
        .outcome()
        .await
        .map_err(|e| format!("Resize error: {e}"))
}

pub fn list_terminals(state: &AppState) -> Vec<TabSummary> {
    summarize(&state.registry)
}

/// Visible text of a tab, or of the active tab when `id` is `None`.
pub fn screen(state: &AppState, id: Option<TabId>) -> Result<ScreenSnapshot, String> {
    let id = id
        .or_else(|| state.registry.active_tab_id())
        .ok_or_else(|| "No tab is open".to_string())?;
    Ok(ScreenSnapshot {
        id,
        lines: session(state, id)?.snapshot(),
    })
}

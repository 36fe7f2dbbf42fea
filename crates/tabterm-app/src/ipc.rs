//! Serializable views of tab state handed to a front end.

use serde::Serialize;

use tabterm_pty::{SessionState, Tab, TabId, TabRegistry};

/// One entry of the tab strip.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TabSummary {
    pub id: TabId,
    pub title: String,
    pub active: bool,
    /// A bell rang while the tab was hidden.
    pub bell: bool,
    pub state: &'static str,
}

/// Visible rows of one tab's screen.
#[derive(Serialize, Clone, Debug)]
pub struct ScreenSnapshot {
    pub id: TabId,
    pub lines: Vec<String>,
}

pub fn state_str(state: SessionState) -> &'static str {
    match state {
        SessionState::Spawning => "spawning",
        SessionState::Attached => "attached",
        SessionState::Failed => "failed",
        SessionState::Closing => "closing",
        SessionState::Closed => "closed",
    }
}

impl TabSummary {
    pub fn new(tab: &Tab, active: bool) -> Self {
        Self {
            id: tab.id(),
            title: tab.title().to_string(),
            active,
            bell: tab.has_bell(),
            state: state_str(tab.session().state()),
        }
    }
}

/// The tab strip in display order.
pub fn summarize(registry: &TabRegistry) -> Vec<TabSummary> {
    let active = registry.active_tab_id();
    registry
        .tabs()
        .iter()
        .map(|tab| TabSummary::new(tab, active == Some(tab.id())))
        .collect()
}

//! Tab and session settings.

use serde::{Deserialize, Serialize};

use crate::input::InputMode;

/// Env var overriding [`TabConfig::max_tabs`].
pub const ENV_MAX_TABS: &str = "TABTERM_MAX_TABS";

/// Env var overriding [`TabConfig::shell`].
pub const ENV_SHELL: &str = "TABTERM_SHELL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabConfig {
    /// `create_tab` is refused once this many tabs are open.
    pub max_tabs: usize,
    /// Title given to tabs opened with the new-tab command.
    pub default_title: String,
    /// Title of the tab opened at startup.
    pub initial_title: String,
    /// Shell program. `None` uses the platform default.
    pub shell: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub input_mode: InputMode,
    pub scrollback: usize,
}

impl Default for TabConfig {
    fn default() -> Self {
        Self {
            max_tabs: 10,
            default_title: "Shell".to_string(),
            initial_title: "Terminal".to_string(),
            shell: None,
            cols: 80,
            rows: 24,
            input_mode: InputMode::Raw,
            scrollback: tabterm_vt::terminal::DEFAULT_SCROLLBACK,
        }
    }
}

impl TabConfig {
    /// Defaults with `TABTERM_MAX_TABS` / `TABTERM_SHELL` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(
            std::env::var(ENV_MAX_TABS).ok().as_deref(),
            std::env::var(ENV_SHELL).ok().as_deref(),
        );
        config
    }

    fn apply_overrides(&mut self, max_tabs: Option<&str>, shell: Option<&str>) {
        if let Some(raw) = max_tabs {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_tabs = n,
                _ => log::warn!("Ignoring invalid {ENV_MAX_TABS}={raw:?}"),
            }
        }
        if let Some(shell) = shell.map(str::trim).filter(|s| !s.is_empty()) {
            self.shell = Some(shell.to_string());
        }
    }

    /// The configured shell, or the platform default.
    pub fn shell_command(&self) -> String {
        self.shell.clone().unwrap_or_else(default_shell)
    }
}

/// The user's login shell (`$SHELL`), falling back to `/bin/sh`.
#[cfg(not(windows))]
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// The command interpreter (`%COMSPEC%`), falling back to `cmd.exe`.
#[cfg(windows)]
pub fn default_shell() -> String {
    std::env::var("COMSPEC")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "cmd.exe".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TabConfig::default();
        assert_eq!(config.max_tabs, 10);
        assert_eq!(config.default_title, "Shell");
        assert_eq!(config.initial_title, "Terminal");
        assert_eq!((config.cols, config.rows), (80, 24));
        assert_eq!(config.input_mode, InputMode::Raw);
    }

    #[test]
    fn test_overrides() {
        let mut config = TabConfig::default();
        config.apply_overrides(Some(" 3 "), Some("/bin/zsh"));
        assert_eq!(config.max_tabs, 3);
        assert_eq!(config.shell_command(), "/bin/zsh");
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let mut config = TabConfig::default();
        config.apply_overrides(Some("lots"), Some("  "));
        assert_eq!(config.max_tabs, 10);
        assert_eq!(config.shell, None);

        config.apply_overrides(Some("0"), None);
        assert_eq!(config.max_tabs, 10);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: TabConfig =
            serde_json::from_str(r#"{ "max_tabs": 4, "input_mode": "buffered" }"#).unwrap();
        assert_eq!(config.max_tabs, 4);
        assert_eq!(config.input_mode, InputMode::Buffered);
        assert_eq!(config.default_title, "Shell");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_default_shell_detection() {
        let shell = default_shell();
        assert!(!shell.is_empty(), "Default shell should not be empty");
        assert!(
            shell.starts_with('/'),
            "Default shell should be an absolute path, got: {shell}"
        );
    }
}

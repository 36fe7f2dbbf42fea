//! tabterm-vt: display engine adapter for tabterm.
//!
//! Wraps `alacritty_terminal` so the rest of the workspace can push raw shell
//! output into a grid and read back what the shell asked of the terminal
//! (window title, bell, device status replies) without touching escape
//! sequences itself.

pub mod terminal;

pub use terminal::VtTerminal;

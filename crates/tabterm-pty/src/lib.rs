//! tabterm-pty: shell sessions and tab orchestration for tabterm.
//!
//! This crate binds UI-level tabs to live shell processes. It spawns shells
//! through a [`ShellHost`], routes their output to the right display surface,
//! forwards keystrokes and resizes back, and tears everything down in a
//! fixed order when a tab closes.
//!
//! # Architecture
//!
//! - [`ShellHost`]: Boundary to whatever actually runs shells. [`PtyHost`] is
//!   the `portable-pty` implementation.
//! - [`OutputRouter`]: Demultiplexes host output events to subscribed sessions.
//! - [`Session`]: One shell process bound to one [`DisplaySurface`].
//! - [`TabRegistry`]: Ordered tabs, the active tab, and the tab limit.
//! - [`InputDispatcher`]: Global shortcuts and keystroke forwarding.

pub mod config;
pub mod host;
pub mod input;
pub mod pty;
pub mod registry;
pub mod router;
pub mod session;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

pub use config::TabConfig;
pub use host::{HostError, HostEvent, ProcessHandle, ShellHost};
pub use input::{InputDispatcher, InputMode, Key, KeyDisposition, KeyEvent, Modifiers, Shortcut};
pub use pty::PtyHost;
pub use registry::{Tab, TabId, TabRegistry};
pub use router::{OutputRouter, RouterError, Subscriber};
pub use session::{HostCall, Session, SessionContext, SessionNotice, SessionState};
pub use surface::{DisplaySurface, SurfaceFactory, SurfaceFeedback, VtSurface, VtSurfaceFactory};

//! Keyboard input: global tab shortcuts and per-session key encoding.
//!
//! A single [`InputDispatcher`] sees every key event. Shortcut chords (new tab,
//! close tab) are consumed and turned into [`TabRegistry`] calls; everything
//! else goes to the active tab's session, which encodes it according to the
//! [`InputMode`] it was created with.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::registry::TabRegistry;
use crate::session::HostCall;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
        /// Command on macOS, the Windows/Super key elsewhere.
        const SUPER = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Tab,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    pub fn plain(key: Key) -> Self {
        Self::new(key, Modifiers::empty())
    }
}

/// The modifier that guards tab shortcuts on this platform.
pub fn platform_modifier() -> Modifiers {
    if cfg!(target_os = "macos") {
        Modifiers::SUPER
    } else {
        Modifiers::CONTROL
    }
}

/// Encode a key as the bytes an xterm-compatible terminal would send.
///
/// Returns `None` for chords with no terminal representation.
pub fn encode_key(event: &KeyEvent) -> Option<Vec<u8>> {
    let modifiers = event.modifiers;
    match event.key {
        Key::Char(c) => encode_char(c, modifiers),
        Key::Enter => Some(vec![b'\r']),
        Key::Tab if modifiers.contains(Modifiers::SHIFT) => Some(b"\x1b[Z".to_vec()),
        Key::Tab => Some(vec![b'\t']),
        Key::Backspace if modifiers.contains(Modifiers::ALT) => Some(vec![0x1b, 0x7f]),
        Key::Backspace => Some(vec![0x7f]),
        Key::Escape => Some(vec![0x1b]),
        Key::Up => Some(encode_csi_letter('A', modifiers)),
        Key::Down => Some(encode_csi_letter('B', modifiers)),
        Key::Right => Some(encode_csi_letter('C', modifiers)),
        Key::Left => Some(encode_csi_letter('D', modifiers)),
        Key::Home => Some(encode_csi_letter('H', modifiers)),
        Key::End => Some(encode_csi_letter('F', modifiers)),
        Key::Insert => Some(encode_tilde(2, modifiers)),
        Key::Delete => Some(encode_tilde(3, modifiers)),
        Key::PageUp => Some(encode_tilde(5, modifiers)),
        Key::PageDown => Some(encode_tilde(6, modifiers)),
    }
}

fn encode_char(c: char, modifiers: Modifiers) -> Option<Vec<u8>> {
    if modifiers.contains(Modifiers::SUPER) {
        return None;
    }

    let mut bytes = Vec::with_capacity(5);
    if modifiers.contains(Modifiers::ALT) {
        bytes.push(0x1b);
    }

    if modifiers.contains(Modifiers::CONTROL) {
        let code = match c {
            'a'..='z' | 'A'..='Z' => c.to_ascii_lowercase() as u8 - b'a' + 1,
            '@' | ' ' => 0x00,
            '[' => 0x1b,
            '\\' => 0x1c,
            ']' => 0x1d,
            '^' => 0x1e,
            '_' => 0x1f,
            '?' => 0x7f,
            _ => return None,
        };
        bytes.push(code);
        return Some(bytes);
    }

    let mut buf = [0u8; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    Some(bytes)
}

/// xterm modifier parameter: 1 + shift(1) + alt(2) + control(4).
fn modifier_param(modifiers: Modifiers) -> u8 {
    let mut code = 1;
    if modifiers.contains(Modifiers::SHIFT) {
        code += 1;
    }
    if modifiers.contains(Modifiers::ALT) {
        code += 2;
    }
    if modifiers.contains(Modifiers::CONTROL) {
        code += 4;
    }
    code
}

fn encode_csi_letter(suffix: char, modifiers: Modifiers) -> Vec<u8> {
    match modifier_param(modifiers) {
        1 => format!("\x1b[{suffix}").into_bytes(),
        m => format!("\x1b[1;{m}{suffix}").into_bytes(),
    }
}

fn encode_tilde(code: u8, modifiers: Modifiers) -> Vec<u8> {
    match modifier_param(modifiers) {
        1 => format!("\x1b[{code}~").into_bytes(),
        m => format!("\x1b[{code};{m}~").into_bytes(),
    }
}

/// How a session turns keystrokes into shell input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Every key is forwarded immediately; the shell echoes and edits.
    #[default]
    Raw,
    /// Keys are collected into a locally echoed line sent on Enter.
    Buffered,
}

/// Bytes produced by one keystroke: `echo` goes to the session's surface,
/// `send` goes to the shell.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct KeyOutput {
    pub echo: Vec<u8>,
    pub send: Vec<u8>,
}

/// Per-session keystroke strategy, fixed at session construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    Raw,
    Buffered { line: String },
}

impl KeyInput {
    pub fn new(mode: InputMode) -> Self {
        match mode {
            InputMode::Raw => KeyInput::Raw,
            InputMode::Buffered => KeyInput::Buffered {
                line: String::new(),
            },
        }
    }

    pub fn mode(&self) -> InputMode {
        match self {
            KeyInput::Raw => InputMode::Raw,
            KeyInput::Buffered { .. } => InputMode::Buffered,
        }
    }

    pub fn translate(&mut self, event: &KeyEvent) -> KeyOutput {
        match self {
            KeyInput::Raw => KeyOutput {
                echo: Vec::new(),
                send: encode_key(event).unwrap_or_default(),
            },
            KeyInput::Buffered { line } => translate_buffered(line, event),
        }
    }
}

fn translate_buffered(line: &mut String, event: &KeyEvent) -> KeyOutput {
    let mut out = KeyOutput::default();
    if event
        .modifiers
        .intersects(Modifiers::CONTROL | Modifiers::ALT | Modifiers::SUPER)
    {
        return out;
    }

    match event.key {
        Key::Char(c) => {
            line.push(c);
            let mut buf = [0u8; 4];
            out.echo.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
        Key::Enter => {
            out.send = std::mem::take(line).into_bytes();
            out.send.extend_from_slice(b"\r\n");
            out.echo.extend_from_slice(b"\r\n");
        }
        Key::Backspace => {
            if line.pop().is_some() {
                out.echo.extend_from_slice(b"\x08 \x08");
            }
        }
        Key::Tab => {
            line.push('\t');
            out.echo.push(b'\t');
        }
        Key::Escape => out.send.push(0x1b),
        _ => {}
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    NewTab,
    CloseTab,
}

/// What the dispatcher did with a key event.
#[derive(Debug)]
pub enum KeyDisposition {
    /// A shortcut chord; the event must not reach any other handler.
    Shortcut(Shortcut),
    /// Passed to the active session.
    Forwarded(HostCall),
    /// No tab is open, so there was nowhere to send it.
    NoActiveTab,
    /// The dispatcher is not installed.
    Ignored,
}

/// The application-wide keyboard listener.
///
/// Exactly one instance should exist. Installing is explicit and revocable, so
/// remounting a front end never stacks duplicate listeners.
#[derive(Debug)]
pub struct InputDispatcher {
    modifier: Modifiers,
    installed: bool,
}

impl InputDispatcher {
    /// A dispatcher guarded by [`platform_modifier`].
    pub fn new() -> Self {
        Self::with_modifier(platform_modifier())
    }

    pub fn with_modifier(modifier: Modifiers) -> Self {
        Self {
            modifier,
            installed: false,
        }
    }

    pub fn modifier(&self) -> Modifiers {
        self.modifier
    }

    /// Start handling key events. Returns `false` if already installed.
    pub fn install(&mut self) -> bool {
        if self.installed {
            log::warn!("Input dispatcher is already installed");
            return false;
        }
        self.installed = true;
        log::debug!("Input dispatcher installed");
        true
    }

    /// Stop handling key events. Returns `false` if not installed.
    pub fn uninstall(&mut self) -> bool {
        let was_installed = std::mem::replace(&mut self.installed, false);
        if was_installed {
            log::debug!("Input dispatcher uninstalled");
        }
        was_installed
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// The shortcut `event` triggers, if any.
    pub fn shortcut_for(&self, event: &KeyEvent) -> Option<Shortcut> {
        if !event.modifiers.contains(self.modifier) {
            return None;
        }
        match event.key {
            Key::Char(c) if c.eq_ignore_ascii_case(&'t') => Some(Shortcut::NewTab),
            Key::Char(c) if c.eq_ignore_ascii_case(&'w') => Some(Shortcut::CloseTab),
            _ => None,
        }
    }

    pub fn handle_key(&self, registry: &mut TabRegistry, event: &KeyEvent) -> KeyDisposition {
        if !self.installed {
            return KeyDisposition::Ignored;
        }

        if let Some(shortcut) = self.shortcut_for(event) {
            match shortcut {
                Shortcut::NewTab => {
                    registry.create_tab();
                }
                Shortcut::CloseTab => {
                    if let Some(id) = registry.active_tab_id() {
                        registry.close_tab(id);
                    }
                }
            }
            return KeyDisposition::Shortcut(shortcut);
        }

        match registry.active_session() {
            Some(session) => KeyDisposition::Forwarded(session.on_keystroke(event)),
            None => KeyDisposition::NoActiveTab,
        }
    }
}

impl Default for InputDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settle, test_registry, FakeHost, HostRecord};
    use crate::session::SessionState;

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(Key::Char(c), Modifiers::CONTROL)
    }

    #[test]
    fn test_encode_printable_and_control_keys() {
        assert_eq!(encode_key(&KeyEvent::plain(Key::Char('a'))), Some(b"a".to_vec()));
        assert_eq!(encode_key(&KeyEvent::plain(Key::Char('é'))), Some("é".as_bytes().to_vec()));
        assert_eq!(encode_key(&KeyEvent::plain(Key::Enter)), Some(b"\r".to_vec()));
        assert_eq!(encode_key(&KeyEvent::plain(Key::Backspace)), Some(vec![0x7f]));
        assert_eq!(encode_key(&KeyEvent::plain(Key::Tab)), Some(b"\t".to_vec()));
        assert_eq!(encode_key(&KeyEvent::plain(Key::Escape)), Some(vec![0x1b]));
        assert_eq!(encode_key(&ctrl('c')), Some(vec![0x03]));
        assert_eq!(encode_key(&ctrl('C')), Some(vec![0x03]));
        assert_eq!(
            encode_key(&KeyEvent::new(Key::Char('x'), Modifiers::ALT)),
            Some(vec![0x1b, b'x'])
        );
        assert_eq!(
            encode_key(&KeyEvent::new(Key::Char('q'), Modifiers::SUPER)),
            None
        );
    }

    #[test]
    fn test_encode_navigation_keys() {
        assert_eq!(encode_key(&KeyEvent::plain(Key::Up)), Some(b"\x1b[A".to_vec()));
        assert_eq!(encode_key(&KeyEvent::plain(Key::Left)), Some(b"\x1b[D".to_vec()));
        assert_eq!(encode_key(&KeyEvent::plain(Key::Delete)), Some(b"\x1b[3~".to_vec()));
        assert_eq!(
            encode_key(&KeyEvent::new(Key::Right, Modifiers::CONTROL)),
            Some(b"\x1b[1;5C".to_vec())
        );
        assert_eq!(
            encode_key(&KeyEvent::new(Key::PageUp, Modifiers::SHIFT)),
            Some(b"\x1b[5;2~".to_vec())
        );
        assert_eq!(
            encode_key(&KeyEvent::new(Key::Tab, Modifiers::SHIFT)),
            Some(b"\x1b[Z".to_vec())
        );
    }

    #[test]
    fn test_raw_mode_never_echoes() {
        let mut input = KeyInput::new(InputMode::Raw);
        let out = input.translate(&KeyEvent::plain(Key::Char('l')));
        assert!(out.echo.is_empty());
        assert_eq!(out.send, b"l");
        assert_eq!(input, KeyInput::Raw);
    }

    #[test]
    fn test_buffered_mode_line_editing() {
        let mut input = KeyInput::new(InputMode::Buffered);
        assert_eq!(input.mode(), InputMode::Buffered);

        // Backspace on an empty line does nothing.
        assert_eq!(input.translate(&KeyEvent::plain(Key::Backspace)), KeyOutput::default());

        for c in "lss".chars() {
            let out = input.translate(&KeyEvent::plain(Key::Char(c)));
            assert!(out.send.is_empty());
            assert_eq!(out.echo, c.to_string().into_bytes());
        }

        let out = input.translate(&KeyEvent::plain(Key::Backspace));
        assert_eq!(out.echo, b"\x08 \x08");
        assert!(out.send.is_empty());

        let out = input.translate(&KeyEvent::plain(Key::Tab));
        assert_eq!(out.echo, b"\t");

        let out = input.translate(&KeyEvent::plain(Key::Enter));
        assert_eq!(out.send, b"ls\t\r\n");
        assert_eq!(out.echo, b"\r\n");

        // The line was consumed by Enter.
        assert_eq!(input, KeyInput::Buffered { line: String::new() });
    }

    #[test]
    fn test_buffered_mode_escape_sends_esc_byte() {
        let mut input = KeyInput::new(InputMode::Buffered);
        input.translate(&KeyEvent::plain(Key::Char('v')));
        let out = input.translate(&KeyEvent::plain(Key::Escape));
        assert_eq!(out.send, vec![0x1b]);
        assert!(out.echo.is_empty());
    }

    #[test]
    fn test_shortcut_recognition() {
        let dispatcher = InputDispatcher::with_modifier(Modifiers::CONTROL);
        assert_eq!(dispatcher.shortcut_for(&ctrl('t')), Some(Shortcut::NewTab));
        assert_eq!(dispatcher.shortcut_for(&ctrl('T')), Some(Shortcut::NewTab));
        assert_eq!(
            dispatcher.shortcut_for(&KeyEvent::new(
                Key::Char('W'),
                Modifiers::CONTROL | Modifiers::SHIFT
            )),
            Some(Shortcut::CloseTab)
        );
        assert_eq!(dispatcher.shortcut_for(&KeyEvent::plain(Key::Char('t'))), None);
        assert_eq!(dispatcher.shortcut_for(&ctrl('c')), None);
        assert_eq!(
            dispatcher.shortcut_for(&KeyEvent::new(Key::Char('t'), Modifiers::SUPER)),
            None
        );
    }

    #[test]
    fn test_install_is_not_stacked() {
        let mut dispatcher = InputDispatcher::new();
        assert!(!dispatcher.is_installed());
        assert!(dispatcher.install());
        assert!(!dispatcher.install());
        assert!(dispatcher.uninstall());
        assert!(!dispatcher.uninstall());
    }

    #[tokio::test]
    async fn test_uninstalled_dispatcher_ignores_keys() {
        let host = FakeHost::new();
        let mut registry = test_registry(&host, 5);
        let dispatcher = InputDispatcher::with_modifier(Modifiers::CONTROL);

        assert!(matches!(
            dispatcher.handle_key(&mut registry, &ctrl('t')),
            KeyDisposition::Ignored
        ));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_shortcuts_drive_registry() {
        let host = FakeHost::new();
        let mut registry = test_registry(&host, 5);
        let mut dispatcher = InputDispatcher::with_modifier(Modifiers::CONTROL);
        dispatcher.install();

        assert!(matches!(
            dispatcher.handle_key(&mut registry, &ctrl('t')),
            KeyDisposition::Shortcut(Shortcut::NewTab)
        ));
        assert!(matches!(
            dispatcher.handle_key(&mut registry, &ctrl('t')),
            KeyDisposition::Shortcut(Shortcut::NewTab)
        ));
        assert_eq!(registry.len(), 2);
        let second = registry.active_tab_id().unwrap();

        assert!(matches!(
            dispatcher.handle_key(&mut registry, &ctrl('w')),
            KeyDisposition::Shortcut(Shortcut::CloseTab)
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(second).is_none());

        dispatcher.handle_key(&mut registry, &ctrl('w'));
        assert!(registry.is_empty());
        assert!(matches!(
            dispatcher.handle_key(&mut registry, &KeyEvent::plain(Key::Char('a'))),
            KeyDisposition::NoActiveTab
        ));
        // Close with no tabs open is harmless.
        assert!(matches!(
            dispatcher.handle_key(&mut registry, &ctrl('w')),
            KeyDisposition::Shortcut(Shortcut::CloseTab)
        ));
    }

    #[tokio::test]
    async fn test_plain_keys_reach_active_session_only() {
        let host = FakeHost::new();
        let mut registry = test_registry(&host, 5);
        let mut dispatcher = InputDispatcher::with_modifier(Modifiers::CONTROL);
        dispatcher.install();

        let first = registry.create_tab().unwrap();
        let second = registry.create_tab().unwrap();
        for id in [first, second] {
            let session = registry.get(id).unwrap().session().clone();
            settle(|| session.state() == SessionState::Attached).await;
        }
        let first_handle = registry.get(first).unwrap().session().handle().unwrap();
        let second_handle = registry.get(second).unwrap().session().handle().unwrap();

        registry.set_active_tab(first);
        for key in [KeyEvent::plain(Key::Char('l')), KeyEvent::plain(Key::Enter), ctrl('c')] {
            match dispatcher.handle_key(&mut registry, &key) {
                KeyDisposition::Forwarded(call) => call.outcome().await.unwrap(),
                other => panic!("expected forwarded key, got {other:?}"),
            }
        }

        assert_eq!(host.written(first_handle), b"l\r\x03");
        assert!(host.written(second_handle).is_empty());
        assert!(host
            .records()
            .iter()
            .all(|r| !matches!(r, HostRecord::Write(h, _) if *h == second_handle)));
    }
}

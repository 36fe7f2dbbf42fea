use std::sync::{Arc, Mutex, MutexGuard};

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::{Config, Term};
use alacritty_terminal::vte::ansi;

/// Default number of scrollback lines kept per terminal.
pub const DEFAULT_SCROLLBACK: usize = 10_000;

/// Terminal events captured between two reads.
#[derive(Default)]
struct EventState {
    title: Option<String>,
    title_changed: bool,
    bell: bool,
    pty_writes: Vec<String>,
}

/// Event proxy handed to `Term`.
///
/// `Term` requires a `Clone` listener, so the captured state lives behind an
/// `Arc<Mutex<_>>` shared with the owning [`VtTerminal`].
#[derive(Clone)]
pub struct EventProxy {
    state: Arc<Mutex<EventState>>,
}

impl EventProxy {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EventState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        // The state holds plain data; a panic mid-update cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventListener for EventProxy {
    fn send_event(&self, event: Event) {
        let mut state = self.lock();
        match event {
            Event::Title(title) => {
                if state.title.as_deref() != Some(title.as_str()) {
                    state.title = Some(title);
                    state.title_changed = true;
                }
            }
            Event::ResetTitle => {
                if state.title.take().is_some() {
                    state.title_changed = true;
                }
            }
            Event::Bell => state.bell = true,
            Event::PtyWrite(data) => state.pty_writes.push(data),
            _ => {}
        }
    }
}

struct TermSize {
    columns: usize,
    screen_lines: usize,
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.screen_lines
    }

    fn screen_lines(&self) -> usize {
        self.screen_lines
    }

    fn columns(&self) -> usize {
        self.columns
    }
}

/// A terminal grid fed with raw shell output.
pub struct VtTerminal {
    term: Term<EventProxy>,
    parser: ansi::Processor,
    event_proxy: EventProxy,
}

impl VtTerminal {
    /// Create a terminal with the given dimensions and [`DEFAULT_SCROLLBACK`].
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_scrollback(cols, rows, DEFAULT_SCROLLBACK)
    }

    /// Create a terminal keeping `scrollback` lines of history.
    pub fn with_scrollback(cols: u16, rows: u16, scrollback: usize) -> Self {
        let config = Config {
            scrolling_history: scrollback,
            ..Config::default()
        };
        let size = TermSize {
            columns: usize::from(cols.max(1)),
            screen_lines: usize::from(rows.max(1)),
        };

        let event_proxy = EventProxy::new();
        let term = Term::new(config, &size, event_proxy.clone());

        Self {
            term,
            parser: ansi::Processor::new(),
            event_proxy,
        }
    }

    /// Feed raw shell output through the escape-sequence parser.
    pub fn write(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.term, bytes);
    }

    /// Resize the grid. Zero dimensions are clamped to one cell.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.term.resize(TermSize {
            columns: usize::from(cols.max(1)),
            screen_lines: usize::from(rows.max(1)),
        });
    }

    /// Current `(cols, rows)`.
    pub fn dimensions(&self) -> (u16, u16) {
        (
            self.term.columns() as u16,
            self.term.screen_lines() as u16,
        )
    }

    /// The title last set through OSC 0/2, if any.
    pub fn title(&self) -> Option<String> {
        self.event_proxy.lock().title.clone()
    }

    /// Returns the title if it changed since the previous call.
    ///
    /// A reset title is reported as `Some("")`.
    pub fn take_title_change(&mut self) -> Option<String> {
        let mut state = self.event_proxy.lock();
        if !state.title_changed {
            return None;
        }
        state.title_changed = false;
        Some(state.title.clone().unwrap_or_default())
    }

    /// Drain replies the terminal wants written back to the shell
    /// (device status reports, cursor position reports).
    pub fn take_pty_writes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.event_proxy.lock().pty_writes)
    }

    /// Check and clear the bell flag.
    pub fn has_bell(&mut self) -> bool {
        std::mem::take(&mut self.event_proxy.lock().bell)
    }

    /// Text of every visible row, trailing blanks trimmed.
    pub fn visible_text(&self) -> Vec<String> {
        let grid = self.term.grid();
        let cols = self.term.columns();
        (0..self.term.screen_lines())
            .map(|row| {
                let line = &grid[Line(row as i32)];
                let text: String = (0..cols).map(|col| line[Column(col)].c).collect();
                text.trim_end().to_string()
            })
            .collect()
    }
}

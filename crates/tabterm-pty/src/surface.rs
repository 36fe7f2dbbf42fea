//! The display side of a session: where shell output ends up.

use tabterm_vt::VtTerminal;

use crate::registry::TabId;

/// What the display engine wants to report after consuming output.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SurfaceFeedback {
    /// New window title, if the output changed it.
    pub title: Option<String>,
    /// Bytes the terminal must answer the shell with (status reports).
    pub replies: Vec<u8>,
    pub bell: bool,
}

/// A display engine instance bound to one session.
///
/// The session owns its surface for its whole life; hidden tabs keep feeding
/// their surface so switching back shows current state.
pub trait DisplaySurface: Send {
    /// Push shell output, byte-for-byte.
    fn feed(&mut self, bytes: &[u8]) -> SurfaceFeedback;

    /// Current `(cols, rows)`.
    fn dimensions(&self) -> (u16, u16);

    fn resize(&mut self, cols: u16, rows: u16);

    fn set_visible(&mut self, visible: bool);

    fn is_visible(&self) -> bool;

    /// Visible rows as text, for front ends without their own renderer.
    fn snapshot(&self) -> Vec<String> {
        Vec::new()
    }

    /// Release the surface. No further calls follow.
    fn dispose(&mut self);
}

/// Creates one surface per new tab.
pub trait SurfaceFactory: Send {
    fn create(&mut self, tab: TabId, cols: u16, rows: u16) -> Box<dyn DisplaySurface>;
}

/// [`DisplaySurface`] backed by a [`VtTerminal`] grid.
pub struct VtSurface {
    vt: Option<VtTerminal>,
    visible: bool,
}

impl VtSurface {
    pub fn new(cols: u16, rows: u16, scrollback: usize) -> Self {
        Self {
            vt: Some(VtTerminal::with_scrollback(cols, rows, scrollback)),
            visible: false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.vt.is_none()
    }
}

impl DisplaySurface for VtSurface {
    fn feed(&mut self, bytes: &[u8]) -> SurfaceFeedback {
        let Some(vt) = self.vt.as_mut() else {
            log::warn!("Dropping {} bytes fed to a disposed surface", bytes.len());
            return SurfaceFeedback::default();
        };

        vt.write(bytes);
        SurfaceFeedback {
            title: vt.take_title_change(),
            replies: vt.take_pty_writes().concat().into_bytes(),
            bell: vt.has_bell(),
        }
    }

    fn dimensions(&self) -> (u16, u16) {
        self.vt.as_ref().map_or((0, 0), VtTerminal::dimensions)
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        if let Some(vt) = self.vt.as_mut() {
            vt.resize(cols, rows);
        }
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn snapshot(&self) -> Vec<String> {
        self.vt.as_ref().map(VtTerminal::visible_text).unwrap_or_default()
    }

    fn dispose(&mut self) {
        self.vt = None;
        self.visible = false;
    }
}

/// Builds a [`VtSurface`] per tab with a fixed scrollback size.
pub struct VtSurfaceFactory {
    scrollback: usize,
}

impl VtSurfaceFactory {
    pub fn new(scrollback: usize) -> Self {
        Self { scrollback }
    }
}

impl SurfaceFactory for VtSurfaceFactory {
    fn create(&mut self, _tab: TabId, cols: u16, rows: u16) -> Box<dyn DisplaySurface> {
        Box::new(VtSurface::new(cols, rows, self.scrollback))
    }
}

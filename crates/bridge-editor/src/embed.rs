//! The editor window sandwich: `host_window` / `parent_window` /
//! `wrapper_window` / `foreign_window`.
//!
//! A plugin's editor is embedded four windows deep. The host hands us
//! `parent_window`; we create `wrapper_window` as its direct child purely
//! to absorb the `ConfigureNotify` traffic that the foreign window
//! generates (it's sized to the largest connected display so the plugin
//! can draw at whatever size it wants without us resizing its window), and
//! the foreign side creates `foreign_window` itself through
//! [`ForeignWindowSystem`] - the one piece of this module that isn't X11,
//! since it's the foreign-ABI window system spec.md §1 assumes is supplied
//! by the platform. `host_window` is whichever ancestor of `parent_window`
//! is the actual top-level window the user drags around; some hosts (e.g.
//! ones that embed their plugin list inside another frame) put something
//! else between the two, so it's found by walking ancestors rather than
//! assumed to equal `parent_window`.
//!
//! Resizing only ever touches `wrapper_window`. `foreign_window` is static
//! for the editor's whole lifetime, which is what keeps resizes glitch-free
//! - there's a whole class of redraw artifacts that shows up the moment you
//! resize a window a foreign GUI toolkit is rendering into mid-frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConfigureNotifyEvent, ConfigureWindowAux,
    ConnectionExt, CreateWindowAux, EventMask, InputFocus, KeyButMask, Window, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::protocol::Event;
use x11rb::COPY_DEPTH_FROM_PARENT;

use bridge_transport::arbiter::GuiThreadHandle;

use crate::atoms::EmbedAtoms;
use crate::error::{EditorError, Result};
use crate::xdnd::ProxyHandle;

/// A window's extent, as seen by the wrapper/foreign windows. Not a `Rect`
/// because neither window is ever positioned anywhere but `(0, 0)` inside
/// its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u16,
    pub height: u16,
}

impl Size {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

/// Behaviour toggles, all of which default to the conservative option and
/// are flipped on by an environment-variable quirk flag (spec.md §6) when a
/// host needs the workaround.
#[derive(Debug, Clone, Copy)]
pub struct EditorConfig {
    /// Reposition the foreign window to `(0, 0)` on every `fix_local_coordinates`
    /// pass. Helps plugins that paint using absolute screen coordinates.
    pub use_coordinate_hack: bool,
    /// Strip `XdndAware` from `parent_window`'s ancestors. Works around a
    /// host that otherwise double-handles drops once our proxy is also
    /// advertising the same window.
    pub force_dnd: bool,
    /// Use the XEmbed handshake instead of a bare reparent. Off by default:
    /// several real editors render incorrectly with XEmbed, and a bare
    /// reparent works for everything XEmbed does.
    pub use_xembed: bool,
    /// Rate the idle timer ticks the foreign event pump and, for VST2,
    /// `effEditIdle`.
    pub frame_rate_hz: u32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            use_coordinate_hack: false,
            force_dnd: false,
            use_xembed: false,
            frame_rate_hz: 30,
        }
    }
}

/// Opaque handle to a window the foreign window system created for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignWindowHandle(pub u32);

/// The assumed substrate from spec.md §1: whatever ABI-specific machinery
/// can tell the loaded plugin to create its editor window as a child of
/// `parent_window` and hand back the X11 id it ended up with. VST2/VST3/CLAP
/// all take a parent window directly in their own embed calls (`effEditOpen`,
/// `IPlugView::attached`, CLAP's `gui->set_parent`) rather than returning a
/// window a caller creates first, so `embed` models that call order: the
/// implementation is responsible for detecting the resulting window id
/// itself (typically the first child `query_tree` finds under
/// `parent_window` once the embed call returns) when the underlying API
/// doesn't hand it back directly.
pub trait ForeignWindowSystem: Send + Sync {
    /// Asks the foreign runtime to embed its editor under `parent_window`,
    /// sized to `size` (the full display, in practice - see the module
    /// docs), and returns the resulting window.
    fn embed(&self, parent_window: Window, size: Size) -> Result<ForeignWindowHandle>;
    /// Posts an asynchronous close message. The window is still valid until
    /// [`Self::destroy_now`] runs.
    fn post_close(&self, handle: ForeignWindowHandle);
    /// Synchronously destroys a window previously passed to
    /// [`Self::post_close`]. Foreign runtimes are observed to block for a
    /// second or two here, which is why callers defer it (see
    /// [`close_deferred`]).
    fn destroy_now(&self, handle: ForeignWindowHandle);
    /// Pumps one iteration of the foreign message loop. Called from the
    /// idle timer so it keeps flowing even while our own event loop is
    /// blocked on a modal menu.
    fn pump_events(&self);
}

/// Polls `parent`'s child list for up to `timeout` looking for a newly
/// created window. Useful for a [`ForeignWindowSystem`] backed by an ABI
/// whose embed call doesn't hand back the window id it created.
pub fn wait_for_first_child(conn: &impl Connection, parent: Window, timeout: std::time::Duration) -> Result<Window> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let tree = conn
            .query_tree(parent)
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?;
        if let Some(&child) = tree.children.first() {
            return Ok(child);
        }
        if std::time::Instant::now() >= deadline {
            return Err(EditorError::ForeignWindowSystem(
                "plugin did not create a child window within the timeout".into(),
            ));
        }
        thread::sleep(Duration::from_millis(5));
    }
}

const XEMBED_EMBEDDED_NOTIFY: u32 = 0;

fn send_xembed_message(
    conn: &impl Connection,
    atoms: &EmbedAtoms,
    window: Window,
    message: u32,
    detail: u32,
    data1: u32,
    data2: u32,
) -> Result<()> {
    let event = ClientMessageEvent::new(32, window, atoms.xembed, [0, message, detail, data1, data2]);
    conn.send_event(false, window, EventMask::NO_EVENT, event)
        .map_err(|e| EditorError::Connection(e.to_string()))?;
    Ok(())
}

fn has_property(conn: &impl Connection, window: Window, atom: u32) -> Result<bool> {
    let reply = conn
        .get_property(false, window, atom, AtomEnum::ANY, 0, 0)
        .map_err(|e| EditorError::Connection(e.to_string()))?
        .reply()
        .map_err(|e| EditorError::Protocol(e.to_string()))?;
    Ok(reply.type_ != 0)
}

/// The window sandwich for one open editor. Lives entirely on the GUI
/// thread - see [`bridge_transport::arbiter::GuiThreadHandle`] - since
/// every method here either touches the X11 connection or the foreign
/// window system, both of which are only safe from the thread that created
/// them.
pub struct Editor<W: ForeignWindowSystem> {
    conn: Arc<RustConnection>,
    #[allow(dead_code)]
    screen_num: usize,
    root: Window,
    atoms: EmbedAtoms,
    config: EditorConfig,
    foreign: Arc<W>,

    client_area: Size,
    wrapper_window_size: Size,

    parent_window: Window,
    wrapper_window: Window,
    foreign_window: ForeignWindowHandle,
    host_window: Window,

    should_fix_local_coordinates: bool,
    focus_grabbed: bool,
    supports_ewmh_active_window_cache: Option<bool>,

    /// Held for as long as this editor is open; the XDND proxy tears
    /// itself down once every editor's handle has dropped.
    _dnd_handle: Option<ProxyHandle>,
}

impl<W: ForeignWindowSystem> Editor<W> {
    /// Opens the sandwich: creates the foreign window, creates and
    /// reparents `wrapper_window` under `parent_window`, performs the
    /// XEmbed handshake if configured, and maps both.
    pub fn open(
        conn: Arc<RustConnection>,
        screen_num: usize,
        config: EditorConfig,
        parent_window: Window,
        foreign: Arc<W>,
        dnd_handle: Option<ProxyHandle>,
    ) -> Result<Self> {
        let atoms = EmbedAtoms::intern(&*conn)?;
        let root = conn.setup().roots[screen_num].root;
        let client_area = max_display_size(&conn, screen_num)?;

        let wrapper_window = create_wrapper_window(&conn, screen_num, parent_window, client_area)?;
        conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;

        let foreign_window = foreign.embed(wrapper_window, client_area)?;

        if config.force_dnd {
            strip_xdnd_aware_from_ancestors(&conn, &atoms, parent_window)?;
        }

        if config.use_xembed {
            send_xembed_message(&conn, &atoms, foreign_window.0, XEMBED_EMBEDDED_NOTIFY, 0, wrapper_window, 0)?;
        }

        conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;

        let mut editor = Self {
            conn,
            screen_num,
            root,
            atoms,
            config,
            foreign,
            client_area,
            wrapper_window_size: client_area,
            parent_window,
            wrapper_window,
            foreign_window,
            host_window: parent_window,
            should_fix_local_coordinates: false,
            focus_grabbed: false,
            supports_ewmh_active_window_cache: None,
            _dnd_handle: dnd_handle,
        };
        editor.redetect_host_window()?;
        editor.subscribe_ancestor_events()?;
        Ok(editor)
    }

    /// Maps the wrapper and foreign windows. Left separate from [`Self::open`]
    /// because some plugins only finish embedding themselves after the
    /// window is already visible.
    pub fn show(&self) -> Result<()> {
        self.conn
            .map_window(self.wrapper_window)
            .map_err(|e| EditorError::Connection(e.to_string()))?;
        self.foreign.pump_events();
        self.conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
        Ok(())
    }

    pub fn size(&self) -> Size {
        self.wrapper_window_size
    }

    /// Resizes `wrapper_window` only - `foreign_window` keeps its
    /// full-display size for the editor's whole lifetime.
    pub fn resize(&mut self, size: Size) -> Result<()> {
        if size == self.wrapper_window_size {
            return Ok(());
        }
        let aux = ConfigureWindowAux::new().width(size.width as u32).height(size.height as u32);
        self.conn
            .configure_window(self.wrapper_window, &aux)
            .map_err(|e| EditorError::Connection(e.to_string()))?;
        self.conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
        self.wrapper_window_size = size;
        Ok(())
    }

    /// Drains pending X11 events for this editor's windows. Call this from
    /// the GUI thread on every idle tick, and also from `effEditIdle`/CLAP's
    /// `on_timer` so we never fall more than one frame behind while the
    /// host is actively driving idle calls.
    pub fn handle_x11_events(&mut self) -> Result<()> {
        while let Some(event) = self.conn.poll_for_event().map_err(|e| EditorError::Connection(e.to_string()))? {
            match event {
                Event::ConfigureNotify(e)
                    if e.window == self.host_window || e.window == self.parent_window || e.window == self.wrapper_window =>
                {
                    if self.is_mouse_button_held()? {
                        self.should_fix_local_coordinates = true;
                    } else {
                        self.fix_local_coordinates()?;
                    }
                }
                Event::ReparentNotify(e) if e.window == self.parent_window => {
                    self.redetect_host_window()?;
                    self.subscribe_ancestor_events()?;
                }
                Event::EnterNotify(e) if e.event == self.wrapper_window => {
                    let shift_held = e.state.contains(KeyButMask::SHIFT);
                    if self.is_active_window()? {
                        self.set_input_focus(true, shift_held)?;
                    }
                    self.fix_local_coordinates()?;
                }
                Event::LeaveNotify(e) if e.event == self.wrapper_window => {
                    if self.is_active_window()? && !self.pointer_over_own_windows()? {
                        self.set_input_focus(false, false)?;
                    }
                }
                Event::ButtonRelease(_) => {
                    if self.should_fix_local_coordinates && !self.is_mouse_button_held()? {
                        self.fix_local_coordinates()?;
                        self.should_fix_local_coordinates = false;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Tells the foreign window its actual root-relative position. The
    /// foreign runtime has no other way to learn this once we've reparented
    /// it away from a toplevel, and drawing is keyed off of it for more
    /// plugins than you'd expect.
    pub fn fix_local_coordinates(&self) -> Result<()> {
        let translated = self
            .conn
            .translate_coordinates(self.wrapper_window, self.root, 0, 0)
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?;

        let (x, y) = if self.config.use_coordinate_hack {
            (0, 0)
        } else {
            (translated.dst_x, translated.dst_y)
        };

        let event = ConfigureNotifyEvent {
            response_type: x11rb::protocol::xproto::CONFIGURE_NOTIFY_EVENT,
            sequence: 0,
            event: self.foreign_window.0,
            window: self.foreign_window.0,
            above_sibling: x11rb::NONE,
            x,
            y,
            width: self.wrapper_window_size.width,
            height: self.wrapper_window_size.height,
            border_width: 0,
            override_redirect: false,
        };
        self.conn
            .send_event(false, self.foreign_window.0, EventMask::STRUCTURE_NOTIFY, event)
            .map_err(|e| EditorError::Connection(e.to_string()))?;
        self.conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Grabs or releases keyboard focus. Shift-grabbing focuses
    /// `foreign_window` directly instead of `wrapper_window`'s ancestor
    /// path, which is what lets you type into a plugin's own text fields in
    /// hosts that otherwise eat the keystrokes.
    pub fn set_input_focus(&mut self, grab: bool, shift_held: bool) -> Result<()> {
        let target = if grab {
            if shift_held {
                self.foreign_window.0
            } else {
                self.parent_window
            }
        } else {
            self.host_window
        };

        let current = self
            .conn
            .get_input_focus()
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?
            .focus;

        if current == target || self.is_descendant_of(current, target)? {
            // Already focused where we want to be - including the case
            // where some host-side proxy-input window is currently
            // focused underneath our target, which we don't want to fight.
            self.focus_grabbed = grab;
            return Ok(());
        }

        self.conn
            .set_input_focus(InputFocus::PARENT, target, x11rb::CURRENT_TIME)
            .map_err(|e| EditorError::Connection(e.to_string()))?;
        self.conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
        self.focus_grabbed = grab;
        Ok(())
    }

    /// Extended-client-area hit test: `foreign_window` covers the whole
    /// display, but only the wrapper's bounds are "really" the editor, so
    /// anything outside of them should act like a miss for hover/cursor
    /// purposes.
    pub fn hit_test(&self, x: i16, y: i16) -> bool {
        x >= 0 && y >= 0 && (x as u16) < self.wrapper_window_size.width && (y as u16) < self.wrapper_window_size.height
    }

    fn is_descendant_of(&self, window: Window, ancestor: Window) -> Result<bool> {
        if window == ancestor || window == x11rb::NONE {
            return Ok(window == ancestor);
        }
        let mut current = window;
        for _ in 0..64 {
            let tree = self
                .conn
                .query_tree(current)
                .map_err(|e| EditorError::Connection(e.to_string()))?
                .reply()
                .map_err(|e| EditorError::Protocol(e.to_string()))?;
            if tree.parent == ancestor {
                return Ok(true);
            }
            if tree.parent == 0 || tree.parent == tree.root {
                return Ok(false);
            }
            current = tree.parent;
        }
        Ok(false)
    }

    fn is_mouse_button_held(&self) -> Result<bool> {
        let pointer = self
            .conn
            .query_pointer(self.root)
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?;
        Ok(pointer
            .mask
            .intersects(KeyButMask::BUTTON1 | KeyButMask::BUTTON2 | KeyButMask::BUTTON3))
    }

    fn pointer_over_own_windows(&self) -> Result<bool> {
        let pointer = self
            .conn
            .query_pointer(self.root)
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?;
        if pointer.child == 0 {
            return Ok(false);
        }
        self.is_descendant_of(pointer.child, self.wrapper_window)
    }

    fn supports_ewmh_active_window(&mut self) -> Result<bool> {
        if let Some(cached) = self.supports_ewmh_active_window_cache {
            return Ok(cached);
        }
        let reply = self
            .conn
            .get_property(false, self.root, self.atoms.net_supported, AtomEnum::ATOM, 0, 4096)
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?;
        let atoms: Vec<u32> = reply.value32().map(|it| it.collect()).unwrap_or_default();
        let supported = atoms.contains(&self.atoms.net_active_window);
        self.supports_ewmh_active_window_cache = Some(supported);
        Ok(supported)
    }

    fn is_active_window(&mut self) -> Result<bool> {
        if !self.supports_ewmh_active_window()? {
            return Ok(false);
        }
        let reply = self
            .conn
            .get_property(false, self.root, self.atoms.net_active_window, AtomEnum::WINDOW, 0, 1)
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?;
        let active = reply.value32().and_then(|mut it| it.next()).unwrap_or(0);
        if active == self.host_window {
            return Ok(true);
        }
        self.is_descendant_of(self.host_window, active)
    }

    /// Walks up from `parent_window` looking for the topmost ancestor that
    /// still has `WM_STATE` set - the same heuristic `xprop`/`xwininfo` use
    /// to pick a "real" top-level window. Most hosts put `parent_window`
    /// itself there; a few embed it inside another frame, in which case we
    /// need that frame's window to know when the editor is being dragged
    /// around or to give keyboard focus back to.
    fn redetect_host_window(&mut self) -> Result<()> {
        let mut candidate = self.parent_window;
        let mut current = self.parent_window;
        for _ in 0..64 {
            let tree = self
                .conn
                .query_tree(current)
                .map_err(|e| EditorError::Connection(e.to_string()))?
                .reply()
                .map_err(|e| EditorError::Protocol(e.to_string()))?;
            if tree.parent == 0 || tree.parent == tree.root {
                break;
            }
            if has_property(&*self.conn, tree.parent, self.atoms.wm_state)? {
                candidate = tree.parent;
            }
            current = tree.parent;
        }
        self.host_window = candidate;
        Ok(())
    }

    fn subscribe_ancestor_events(&self) -> Result<()> {
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY);
        for window in [self.host_window, self.parent_window] {
            self.conn
                .change_window_attributes(window, &aux)
                .map_err(|e| EditorError::Connection(e.to_string()))?;
        }
        self.conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
        Ok(())
    }
}

impl<W: ForeignWindowSystem + 'static> Drop for Editor<W> {
    fn drop(&mut self) {
        let _ = self.conn.destroy_window(self.wrapper_window);
        let _ = self.conn.flush();
        close_deferred(Arc::clone(&self.foreign), self.foreign_window);
    }
}

/// Posts a close message to the foreign window now and destroys it on a
/// background thread roughly a second later. Destroying a foreign window
/// synchronously is observed to block the calling thread for a second or
/// two; deferring it keeps the GUI thread responsive while the window
/// actually tears down.
pub fn close_deferred<W: ForeignWindowSystem + 'static>(foreign: Arc<W>, handle: ForeignWindowHandle) {
    foreign.post_close(handle);
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(1));
        foreign.destroy_now(handle);
    });
}

/// Ticks the GUI thread at a fixed rate for as long as it's alive: drains
/// X11 events, pumps the foreign message loop, and (for VST2) calls
/// `effEditIdle`. This is what keeps things moving while the foreign event
/// loop itself is blocked inside a modal menu.
pub struct IdleTimer {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl IdleTimer {
    pub fn spawn(frame_rate_hz: u32, gui: Arc<GuiThreadHandle>, on_tick: impl Fn() + Send + Sync + 'static) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let interval = Duration::from_secs_f64(1.0 / frame_rate_hz.max(1) as f64);
        let on_tick = Arc::new(on_tick);

        let running_thread = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("bridge-editor-idle".to_string())
            .spawn(move || {
                while running_thread.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if !running_thread.load(Ordering::Acquire) {
                        break;
                    }
                    let callback = Arc::clone(&on_tick);
                    let _ = gui.invoke(move || callback());
                }
            })
            .expect("failed to spawn editor idle thread");

        Self {
            running,
            thread: Some(thread),
        }
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn max_display_size(conn: &RustConnection, screen_num: usize) -> Result<Size> {
    let screen = &conn.setup().roots[screen_num];
    Ok(Size::new(screen.width_in_pixels, screen.height_in_pixels))
}

fn create_wrapper_window(conn: &RustConnection, screen_num: usize, parent: Window, size: Size) -> Result<Window> {
    let screen = &conn.setup().roots[screen_num];
    let wid = conn.generate_id().map_err(|e| EditorError::Connection(e.to_string()))?;
    let aux = CreateWindowAux::new()
        .event_mask(EventMask::STRUCTURE_NOTIFY | EventMask::SUBSTRUCTURE_NOTIFY | EventMask::ENTER_WINDOW | EventMask::LEAVE_WINDOW)
        .background_pixel(screen.black_pixel);
    conn.create_window(
        COPY_DEPTH_FROM_PARENT,
        wid,
        parent,
        0,
        0,
        size.width,
        size.height,
        0,
        WindowClass::INPUT_OUTPUT,
        screen.root_visual,
        &aux,
    )
    .map_err(|e| EditorError::Connection(e.to_string()))?;
    Ok(wid)
}

/// Works around a host (REAPER) that double-handles drops once our own
/// XDND proxy is also advertising `XdndAware` on the same window chain, by
/// stripping the property from every ancestor of `window` up to the root.
fn strip_xdnd_aware_from_ancestors(conn: &RustConnection, atoms: &EmbedAtoms, window: Window) -> Result<()> {
    let mut current = window;
    for _ in 0..64 {
        let _ = conn.delete_property(current, atoms.xdnd_aware);
        let tree = conn
            .query_tree(current)
            .map_err(|e| EditorError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| EditorError::Protocol(e.to_string()))?;
        if tree.parent == 0 || tree.parent == tree.root {
            break;
        }
        current = tree.parent;
    }
    conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeForeignWindowSystem {
        created: Mutex<Vec<Size>>,
        closed: Mutex<Vec<ForeignWindowHandle>>,
        destroyed: Mutex<Vec<ForeignWindowHandle>>,
    }

    impl FakeForeignWindowSystem {
        fn new() -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
                destroyed: Mutex::new(Vec::new()),
            }
        }
    }

    impl ForeignWindowSystem for FakeForeignWindowSystem {
        fn embed(&self, _parent_window: Window, size: Size) -> Result<ForeignWindowHandle> {
            self.created.lock().unwrap().push(size);
            Ok(ForeignWindowHandle(1))
        }
        fn post_close(&self, handle: ForeignWindowHandle) {
            self.closed.lock().unwrap().push(handle);
        }
        fn destroy_now(&self, handle: ForeignWindowHandle) {
            self.destroyed.lock().unwrap().push(handle);
        }
        fn pump_events(&self) {}
    }

    #[test]
    fn hit_test_respects_wrapper_bounds_not_client_area() {
        // `Editor` itself needs a live X11 connection to construct, so this
        // exercises the pure hit-test logic through a stand-in with the
        // same field layout instead of opening a real sandwich.
        let wrapper = Size::new(640, 480);
        assert!(point_in(wrapper, 0, 0));
        assert!(point_in(wrapper, 639, 479));
        assert!(!point_in(wrapper, 640, 0));
        assert!(!point_in(wrapper, 0, 480));
        assert!(!point_in(wrapper, -1, 10));
    }

    fn point_in(size: Size, x: i16, y: i16) -> bool {
        x >= 0 && y >= 0 && (x as u16) < size.width && (y as u16) < size.height
    }

    #[test]
    fn close_deferred_posts_immediately_and_destroys_later() {
        let foreign = Arc::new(FakeForeignWindowSystem::new());
        close_deferred(Arc::clone(&foreign), ForeignWindowHandle(7));
        // `post_close` happens synchronously on the caller's thread.
        assert_eq!(foreign.closed.lock().unwrap().as_slice(), &[ForeignWindowHandle(7)]);
        assert!(foreign.destroyed.lock().unwrap().is_empty());
    }

    #[test]
    fn idle_timer_ticks_via_the_gui_thread() {
        let gui = Arc::new(GuiThreadHandle::spawn());
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        // A high rate so the test doesn't have to wait long.
        let _timer = IdleTimer::spawn(200, Arc::clone(&gui), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(100));
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }
}

//! XDND drag-and-drop proxy.
//!
//! Dragging a file out of a plugin editor has to originate from whatever
//! in-process drag tracker the foreign GUI toolkit's DnD implementation
//! spins up - that tracker is a window the foreign runtime owns and pumps
//! internally, invisible and input-transparent to the rest of X11. This
//! module hooks that tracker (through [`DragSourceHook`], the observable
//! half of the substrate spec.md §1 assumes) and, for as long as the drag
//! is live, speaks the real XDND wire protocol on the tracker's behalf:
//! finding the window under the pointer, telling it a drag entered/moved/
//! left, and answering its request for the dropped file list once it
//! accepts.
//!
//! One proxy is shared by every open editor in the worker process - XDND
//! is inherently a per-process singleton (there's one X11 connection, one
//! selection owner) - but there's no static global backing that sharing.
//! Callers construct one [`XdndProxy`] and clone its [`ProxyHandle`] into
//! each editor; the genuine teardown (selection release, connection drop)
//! runs from `Drop` the moment the last handle goes away.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ClientMessageEvent, ConnectionExt, CreateWindowAux, EventMask, GrabMode, PropMode, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::COPY_DEPTH_FROM_PARENT;

use crate::atoms::XdndAtoms;
use crate::error::{EditorError, Result};

/// How long a freshly entered window gets the same `XdndPosition` resent at
/// it before we start waiting on its `XdndStatus` reply. Matches what real
/// drop targets expect as their "first position" grace period.
const WARMUP: Duration = Duration::from_millis(200);
/// How long to wait for `XdndFinished` after a drop before giving up on the
/// target and ending the session anyway.
const FINISHED_TIMEOUT: Duration = Duration::from_secs(5);
/// XDND versions we present ourselves as and accept from a target. Version
/// 3 is what most real targets (including most things built on JUCE)
/// actually implement; we still probe up to 5 in case the target prefers it.
const XDND_VERSION_RANGE: (u8, u8) = (3, 5);

fn clamp_version(version: u8) -> u8 {
    version.clamp(XDND_VERSION_RANGE.0, XDND_VERSION_RANGE.1)
}

/// Opaque reference to the foreign drag tracker window, passed back to
/// [`DragSourceHook::post_cancel`] once we've finished speaking to it.
#[derive(Debug, Clone, Copy)]
pub struct TrackerHandle(pub u64);

/// One observed drag gesture: the files involved, already resolved to
/// foreign-side paths, plus a handle to the tracker window driving it.
pub struct DragStart {
    pub files: Vec<PathBuf>,
    pub tracker: TrackerHandle,
}

/// The observable half of the foreign DnD substrate: something that can
/// report when the foreign runtime starts a drag (blocking the calling
/// thread until it does, since the tracker itself lives on a thread the
/// foreign runtime owns) and unblock that tracker once we're done
/// forwarding XDND events on its behalf.
pub trait DragSourceHook: Send + Sync {
    /// Blocks until the next drag starts, or returns `None` if the hook has
    /// been torn down (e.g. the worker process is shutting down).
    fn next_drag(&self) -> Option<DragStart>;
    /// Wakes the tracker's message loop back up so the foreign runtime can
    /// finish its own drag bookkeeping.
    fn post_cancel(&self, tracker: TrackerHandle);
}

/// Tracks the one drag gesture currently in flight.
struct Session {
    current_target: Option<Window>,
    target_version: u8,
    /// Set once a `Status` for `current_target` has come back accepting the
    /// drop; cleared whenever the target changes.
    accepted: bool,
    /// True while we have an `XdndPosition` outstanding and haven't seen its
    /// `XdndStatus` reply yet - only one may be in flight per target.
    waiting_for_status: bool,
    warmup_until: Instant,
    escape_pressed: bool,
}

/// Shared, reference-counted XDND proxy. One instance serves every editor
/// in the process; see the module docs for why there's no process-wide
/// static backing that.
pub struct XdndProxy {
    conn: Arc<RustConnection>,
    root: Window,
    atoms: XdndAtoms,
    proxy_window: Window,
    wineprefix: PathBuf,
    hook: Arc<dyn DragSourceHook>,
    session: Mutex<Option<Session>>,
    shutting_down: AtomicBool,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

/// A cloneable reference to a running [`XdndProxy`]. Editors hold one of
/// these rather than the proxy directly so the proxy's lifetime is exactly
/// "as long as at least one editor has it open".
#[derive(Clone)]
pub struct ProxyHandle(Arc<XdndProxy>);

impl XdndProxy {
    /// Opens a dedicated X11 connection, creates the 1x1 proxy window that
    /// advertises `XdndAware`, and starts the background thread that waits
    /// on `hook` for drags to forward.
    pub fn new(hook: Arc<dyn DragSourceHook>, wineprefix: PathBuf) -> Result<ProxyHandle> {
        let (conn, screen_num) = x11rb::connect(None).map_err(|e| EditorError::Connection(e.to_string()))?;
        let conn = Arc::new(conn);
        let atoms = XdndAtoms::intern(&*conn)?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;

        let proxy_window = conn.generate_id().map_err(|e| EditorError::Connection(e.to_string()))?;
        conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            proxy_window,
            root,
            -1,
            -1,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &CreateWindowAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )
        .map_err(|e| EditorError::Connection(e.to_string()))?;

        let version: u32 = XDND_VERSION_RANGE.1 as u32;
        conn.change_property32(PropMode::REPLACE, proxy_window, atoms.aware, AtomEnum::ATOM, &[version])
            .map_err(|e| EditorError::Connection(e.to_string()))?;
        conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;

        let proxy = Arc::new(Self {
            conn,
            root,
            atoms,
            proxy_window,
            wineprefix,
            hook,
            session: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        });

        let dispatcher_proxy = Arc::clone(&proxy);
        let dispatcher = thread::Builder::new()
            .name("bridge-xdnd".to_string())
            .spawn(move || dispatcher_proxy.run_dispatch_loop())
            .expect("failed to spawn XDND dispatcher thread");
        *proxy.dispatcher.lock().unwrap() = Some(dispatcher);

        Ok(ProxyHandle(proxy))
    }

    fn run_dispatch_loop(self: Arc<Self>) {
        while !self.shutting_down.load(Ordering::Acquire) {
            match self.hook.next_drag() {
                Some(drag) => self.run_drag(drag),
                None => break,
            }
        }
    }

    /// Runs one drag gesture end to end: claims the XDND selection, polls
    /// the pointer to find whatever window is underneath it, and forwards
    /// `Enter`/`Position`/`Leave`/`Drop` to that window until the gesture
    /// ends (drop, escape, or the tracker going away).
    fn run_drag(&self, drag: DragStart) {
        let owned = self
            .conn
            .set_selection_owner(self.proxy_window, self.atoms.selection, x11rb::CURRENT_TIME)
            .ok()
            .and_then(|cookie| cookie.check().ok())
            .is_some();
        if !owned {
            self.hook.post_cancel(drag.tracker);
            return;
        }

        let uri_list = build_uri_list(&drag.files, &self.wineprefix);
        *self.session.lock().unwrap() = Some(Session {
            current_target: None,
            target_version: XDND_VERSION_RANGE.1,
            accepted: false,
            waiting_for_status: false,
            warmup_until: Instant::now() + WARMUP,
            escape_pressed: false,
        });

        let escape_keycode = self.resolve_escape_keycode();
        if let Some(keycode) = escape_keycode {
            let _ = self.conn.grab_key(
                false,
                self.root,
                x11rb::protocol::xproto::ModMask::ANY,
                keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            );
        }

        loop {
            if self.drain_events(&uri_list) == DragOutcome::Cancelled {
                break;
            }

            let pointer = match self
                .conn
                .query_pointer(self.root)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
            {
                Some(reply) => reply,
                None => break,
            };

            let button_held = pointer
                .mask
                .intersects(x11rb::protocol::xproto::KeyButMask::BUTTON1);
            if !button_held {
                self.send_drop_and_wait_for_finished();
                break;
            }

            let target = self.deepest_xdnd_aware_window(self.root, pointer.root_x, pointer.root_y);
            self.update_target(target, pointer.root_x, pointer.root_y);

            {
                let mut guard = self.session.lock().unwrap();
                if let Some(session) = guard.as_mut() {
                    if session.escape_pressed {
                        break;
                    }
                }
            }

            thread::sleep(Duration::from_millis(16));
        }

        if let Some(keycode) = escape_keycode {
            let _ = self.conn.ungrab_key(keycode, self.root, x11rb::protocol::xproto::ModMask::ANY);
        }
        let _ = self.conn.flush();
        *self.session.lock().unwrap() = None;
        self.hook.post_cancel(drag.tracker);
    }

    fn update_target(&self, target: Option<Window>, x: i16, y: i16) {
        let mut guard = self.session.lock().unwrap();
        let Some(session) = guard.as_mut() else { return };

        if target != session.current_target {
            if let Some(previous) = session.current_target {
                let _ = self.send_message(previous, self.atoms.leave, [self.proxy_window, 0, 0, 0]);
            }
            session.current_target = target;
            session.accepted = false;
            session.waiting_for_status = false;
            session.warmup_until = Instant::now() + WARMUP;

            if let Some(window) = target {
                let version = self
                    .xdnd_aware_version(window)
                    .map(clamp_version)
                    .unwrap_or(XDND_VERSION_RANGE.1);
                session.target_version = version;
                let _ = self.send_message(
                    window,
                    self.atoms.enter,
                    [self.proxy_window, (version as u32) << 24 | 1, self.atoms.uri_list, 0],
                );
            }
        }

        let Some(window) = target else { return };
        let warming_up = Instant::now() < session.warmup_until;
        if warming_up || !session.waiting_for_status {
            let point = ((x as u32) << 16) | (y as u32 & 0xffff);
            let _ = self.send_message(
                window,
                self.atoms.position,
                [self.proxy_window, 0, point, self.atoms.action_copy],
            );
            session.waiting_for_status = true;
        }
    }

    fn send_drop_and_wait_for_finished(&self) {
        let target = {
            let guard = self.session.lock().unwrap();
            guard.as_ref().and_then(|s| s.current_target.filter(|_| s.accepted))
        };
        let Some(target) = target else {
            return;
        };
        let _ = self.send_message(target, self.atoms.drop, [self.proxy_window, 0, x11rb::CURRENT_TIME as u32, 0]);

        let deadline = Instant::now() + FINISHED_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(Event::ClientMessage(msg))) = self.conn.poll_for_event() {
                if msg.type_ == self.atoms.finished {
                    return;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        tracing::warn!("XdndFinished did not arrive within the timeout, abandoning the drop target");
    }

    fn drain_events(&self, uri_list: &str) -> DragOutcome {
        while let Ok(Some(event)) = self.conn.poll_for_event() {
            match event {
                Event::SelectionRequest(request) => {
                    let _ = self.handle_convert_selection(&request, uri_list);
                }
                Event::ClientMessage(msg) if msg.type_ == self.atoms.status => {
                    let data = msg.data.as_data32();
                    let accept = data[1] & 1 != 0;
                    let mut guard = self.session.lock().unwrap();
                    if let Some(session) = guard.as_mut() {
                        if session.current_target == Some(msg.window) {
                            session.accepted = accept;
                            session.waiting_for_status = false;
                        }
                    }
                }
                Event::KeyPress(_) => {
                    let mut guard = self.session.lock().unwrap();
                    if let Some(session) = guard.as_mut() {
                        session.escape_pressed = true;
                    }
                    return DragOutcome::Cancelled;
                }
                _ => {}
            }
        }
        DragOutcome::Continuing
    }

    fn handle_convert_selection(
        &self,
        request: &x11rb::protocol::xproto::SelectionRequestEvent,
        uri_list: &str,
    ) -> Result<()> {
        if request.target != self.atoms.uri_list && request.target != self.atoms.text_plain {
            return Ok(());
        }
        self.conn
            .change_property8(PropMode::REPLACE, request.requestor, request.property, request.target, uri_list.as_bytes())
            .map_err(|e| EditorError::Connection(e.to_string()))?;

        let notify = x11rb::protocol::xproto::SelectionNotifyEvent {
            response_type: x11rb::protocol::xproto::SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: request.time,
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property: request.property,
        };
        self.conn
            .send_event(false, request.requestor, EventMask::NO_EVENT, notify)
            .map_err(|e| EditorError::Connection(e.to_string()))?;
        self.conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Sends a 32-bit XDND client message. `data` is `data.l[0..4]` verbatim
    /// - callers put the source (proxy) window in `data[0]`, per the XDND
    /// spec, since its meaning varies slightly between message types.
    fn send_message(&self, window: Window, message_type: u32, data: [u32; 4]) -> Result<()> {
        let event = ClientMessageEvent::new(32, window, message_type, [data[0], data[1], data[2], data[3], 0]);
        self.conn
            .send_event(false, window, EventMask::NO_EVENT, event)
            .map_err(|e| EditorError::Connection(e.to_string()))?;
        self.conn.flush().map_err(|e| EditorError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Walks the window tree under `(x, y)` looking for the deepest window
    /// that advertises `XdndAware`, following `XdndProxy` redirection where
    /// present (some window managers proxy XDND to a different window than
    /// the one the pointer is physically over).
    fn deepest_xdnd_aware_window(&self, root: Window, x: i16, y: i16) -> Option<Window> {
        let mut current = root;
        let mut best = None;
        for _ in 0..32 {
            if self.xdnd_aware_version(current).is_some() {
                best = Some(self.xdnd_proxy_for(current).unwrap_or(current));
            }
            let Some(reply) = self
                .conn
                .translate_coordinates(root, current, x, y)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
            else {
                break;
            };
            if reply.child == 0 {
                break;
            }
            current = reply.child;
        }
        best
    }

    fn xdnd_aware_version(&self, window: Window) -> Option<u8> {
        let reply = self
            .conn
            .get_property(false, window, self.atoms.aware, AtomEnum::ATOM, 0, 1)
            .ok()?
            .reply()
            .ok()?;
        reply.value32().and_then(|mut it| it.next()).map(|v| v as u8)
    }

    fn xdnd_proxy_for(&self, window: Window) -> Option<Window> {
        let reply = self
            .conn
            .get_property(false, window, self.atoms.proxy, AtomEnum::WINDOW, 0, 1)
            .ok()?
            .reply()
            .ok()?;
        reply.value32().and_then(|mut it| it.next())
    }

    fn resolve_escape_keycode(&self) -> Option<u8> {
        let setup = self.conn.setup();
        let count = (setup.max_keycode - setup.min_keycode + 1) as u32;
        let reply = self
            .conn
            .get_keyboard_mapping(setup.min_keycode, count as u8)
            .ok()?
            .reply()
            .ok()?;
        const XK_ESCAPE: u32 = 0xff1b;
        let per_keycode = reply.keysyms_per_keycode as usize;
        if per_keycode == 0 {
            return None;
        }
        for (index, chunk) in reply.keysyms.chunks(per_keycode).enumerate() {
            if chunk.contains(&XK_ESCAPE) {
                return Some(setup.min_keycode + index as u8);
            }
        }
        None
    }
}

#[derive(PartialEq)]
enum DragOutcome {
    Continuing,
    Cancelled,
}

impl Drop for XdndProxy {
    fn drop(&mut self) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.conn.destroy_window(self.proxy_window);
        let _ = self.conn.flush();
        // The dispatcher thread is blocked inside `hook.next_drag()`, which
        // only the hook itself can unblock; we deliberately don't join it
        // here; it dies with the process.
    }
}

/// Translates a Windows-style path as the foreign runtime would hand it to
/// us (e.g. `C:\Users\me\sample.wav`) into the Unix path it maps to inside
/// `wineprefix`.
fn translate_wine_path(path: &Path, wineprefix: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if let Some(rest) = raw.strip_prefix("C:\\").or_else(|| raw.strip_prefix("c:\\")) {
        wineprefix.join("drive_c").join(rest.replace('\\', "/"))
    } else if raw.len() >= 2 && raw.as_bytes()[1] == b':' {
        // Any other drive letter: Wine maps these through a
        // `dosdevices/<letter>:` symlink it maintains itself.
        let letter = raw.chars().next().unwrap_or('c').to_ascii_lowercase();
        let rest = raw[2..].replace('\\', "/");
        wineprefix
            .join("dosdevices")
            .join(format!("{letter}:"))
            .join(rest.trim_start_matches('/'))
    } else {
        PathBuf::from(raw.replace('\\', "/"))
    }
}

fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn build_uri_list(files: &[PathBuf], wineprefix: &Path) -> String {
    let mut out = String::new();
    for file in files {
        let unix_path = translate_wine_path(file, wineprefix);
        out.push_str("file://");
        out.push_str(&percent_encode(unix_path.to_string_lossy().as_bytes()));
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_version_into_the_supported_range() {
        assert_eq!(clamp_version(1), 3);
        assert_eq!(clamp_version(3), 3);
        assert_eq!(clamp_version(4), 4);
        assert_eq!(clamp_version(9), 5);
    }

    #[test]
    fn translates_c_drive_paths_into_the_wineprefix() {
        let prefix = Path::new("/home/user/.wine");
        let translated = translate_wine_path(Path::new("C:\\Program Files\\Plugin\\preset.fxp"), prefix);
        assert_eq!(translated, prefix.join("drive_c/Program Files/Plugin/preset.fxp"));
    }

    #[test]
    fn percent_encodes_spaces_and_reserved_bytes() {
        let encoded = percent_encode(b"/a path/with space.wav");
        assert_eq!(encoded, "/a%20path/with%20space.wav");
    }

    #[test]
    fn builds_a_crlf_separated_uri_list() {
        let prefix = Path::new("/home/user/.wine");
        let uri_list = build_uri_list(
            &[PathBuf::from("C:\\one.wav"), PathBuf::from("C:\\two.wav")],
            prefix,
        );
        let lines: Vec<&str> = uri_list.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("file:///home/user/.wine/drive_c/one.wav"));
    }
}

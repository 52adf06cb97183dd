//! Editor window embedding and drag-and-drop for bridged plugin GUIs.
//!
//! Everything in this crate runs on one dedicated GUI thread per plugin
//! instance (see [`bridge_transport::arbiter::GuiThreadHandle`]) - an X11
//! connection and the foreign window system it's paired with are both only
//! safe to drive from the thread that created them. `bridge-worker` owns
//! that thread and calls into [`embed::Editor`] from it in response to
//! `effEditOpen`/`IPlugView::attached`/CLAP's `gui` extension; [`xdnd`] runs
//! its own background thread independent of any single editor, since a
//! drag can outlive the editor it started from.

pub mod atoms;
pub mod embed;
pub mod error;
pub mod xdnd;

pub use embed::{Editor, EditorConfig, ForeignWindowHandle, ForeignWindowSystem, Size};
pub use error::{EditorError, Result};
pub use xdnd::{DragSourceHook, DragStart, ProxyHandle, TrackerHandle, XdndProxy};

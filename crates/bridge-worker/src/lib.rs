//! Foreign-side worker process: loads one Windows VST2/VST3/CLAP plugin and
//! drives it from the socket bundle `bridge-host` spawned it with.
//!
//! This crate is a library only so its pieces are independently testable;
//! the actual process entry point is the `bridge-worker` binary in
//! `main.rs`, which is the only thing `bridge-host::manager::ProcessManager`
//! ever spawns directly.

pub mod instance;
pub mod logging;
pub mod server;

#[cfg(feature = "vst2")]
pub mod vst2_loader;

#[cfg(feature = "vst3")]
pub mod vst3_loader;

#[cfg(feature = "clap")]
pub mod clap_loader;

pub use instance::LoadedPlugin;
pub use server::run;

// VST2's `vst` crate uses a global `LOAD_POINTER` static during plugin
// loading that is not thread-safe. All plugin loading tests must be
// serialized against this lock.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Mutex;
    pub static PLUGIN_LOAD_LOCK: Mutex<()> = Mutex::new(());
}

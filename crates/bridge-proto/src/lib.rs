//! Wire codec, message types, and shared data model for the plugin bridge.
//!
//! This crate defines everything that crosses a socket between the native
//! host library (`bridge-host`) and the foreign-process worker
//! (`bridge-worker`), but contains no socket, thread, or shared-memory code
//! itself - that lives in `bridge-transport`, which depends on this crate
//! for the message shapes it frames and dispatches.

pub mod audio;
pub mod clap;
pub mod control;
pub mod data;
pub mod error;
pub mod events;
pub mod instance;
pub mod metadata;
pub mod opaque;
pub mod parameters;
pub mod vst2;
pub mod vst3;
pub mod wire;

pub use error::{BridgeError, Result};
pub use metadata::PluginMetadata;

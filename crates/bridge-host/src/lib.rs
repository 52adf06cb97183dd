//! Native-side half of the plugin bridge: the code that runs inside the
//! Unix host process and is loaded directly by the VST2/VST3/CLAP entry
//! point that wraps this crate for a given ABI.
//!
//! This crate owns the control-plane view of a bridged plugin -
//! [`client::PluginClient`] talks to the worker over the transport in
//! `bridge-transport`, [`handle::PluginHandle`] is the cheaply-cloneable
//! handle the embedding entry point drives, and [`manager::ProcessManager`]
//! decides when a new worker process needs to be spawned.

pub mod bridge;
pub mod client;
pub mod handle;
pub mod logging;
pub mod manager;
pub mod scan;

pub use bridge::PluginBridge;
pub use client::{next_instance_id, PluginClient};
pub use handle::PluginHandle;
pub use manager::ProcessManager;

//! Main-thread control handle for a loaded plugin.

use std::sync::Arc;

use bridge_proto::metadata::ParameterInfo;
use bridge_proto::PluginMetadata;

use crate::bridge::PluginBridge;

/// Cheaply cloneable handle for controlling a loaded plugin from the host's
/// main thread: editor, state, and parameter queries. Never touches audio
/// processing directly - that happens through the separate RT-safe path
/// the embedding VST2/VST3/CLAP entry point owns.
///
/// Action methods return `&Self` so calls can be chained; query methods
/// return data.
#[derive(Clone)]
pub struct PluginHandle {
    bridge: Arc<dyn PluginBridge>,
    metadata: PluginMetadata,
}

impl PluginHandle {
    /// Builds a handle from a connected client, taking joint ownership of it
    /// through the `Arc` so the handle and the audio-thread-facing
    /// [`crate::bridge::PluginBridge`] reference can outlive each other
    /// independently.
    pub fn from_client(client: Arc<crate::client::PluginClient>) -> Self {
        let metadata = client.metadata().clone();
        Self {
            bridge: client,
            metadata,
        }
    }

    pub fn from_bridge_and_metadata(bridge: Arc<dyn PluginBridge>, metadata: PluginMetadata) -> Self {
        Self { bridge, metadata }
    }

    pub fn has_editor(&self) -> bool {
        self.metadata.has_editor
    }

    /// Opens the plugin editor GUI, embedding it under `parent_handle` (an
    /// X11 window ID on the platforms this bridge targets). Returns the
    /// negotiated editor size on success.
    pub fn open_editor(&self, parent_handle: u64) -> Option<(u32, u32)> {
        self.bridge.open_editor(parent_handle)
    }

    pub fn close_editor(&self) -> &Self {
        self.bridge.close_editor();
        self
    }

    /// Ticks the plugin's editor idle loop. VST2 plugins without a
    /// dedicated UI thread rely on the host calling this periodically
    /// (conventionally ~30Hz) while the editor is open.
    pub fn editor_idle(&self) -> &Self {
        self.bridge.editor_idle();
        self
    }

    pub fn save_state(&self) -> Option<Vec<u8>> {
        self.bridge.save_state()
    }

    pub fn load_state(&self, data: &[u8]) -> &Self {
        self.bridge.load_state(data);
        self
    }

    pub fn parameters(&self) -> Option<Vec<ParameterInfo>> {
        self.bridge.get_parameter_list()
    }

    pub fn get_parameter(&self, param_id: u32) -> Option<f64> {
        self.bridge.get_parameter(param_id)
    }

    pub fn set_parameter(&self, param_id: u32, value: f64) -> &Self {
        self.bridge.set_parameter_rt(param_id, value);
        self
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// True once the worker process has crashed or the watchdog has
    /// declared it unresponsive.
    pub fn is_crashed(&self) -> bool {
        self.bridge.is_crashed()
    }
}

//! Message shapes for CLAP's extension-interface method calls.
//!
//! CLAP structures a plugin as a core `clap_plugin` vtable plus a set of
//! optional extensions (`clap.params`, `clap.gui`, `clap.state`, ...)
//! obtained through `get_extension`. As with [`crate::vst3`], each
//! extension method that the worker forwards gets its own request/response
//! variant; extension support itself is probed once per instance and
//! cached, mirroring [`crate::vst3::InterfaceSupportRequest`].

use serde::{Deserialize, Serialize};

use crate::events::{EventList, InstanceId, ParameterChanges};

/// A CLAP extension the worker has probed support for via `get_extension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClapExtension {
    Params,
    Gui,
    State,
    NotePorts,
    Latency,
    Tail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionSupportRequest {
    pub instance: InstanceId,
    pub extension: ClapExtension,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExtensionSupportResponse {
    pub supported: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClapRequest {
    /// `clap_plugin_params.count` + `get_info` for every index.
    GetParameterList { instance: InstanceId },
    /// `clap_plugin_params.get_value`.
    GetParamValue { instance: InstanceId, param_id: u32 },
    /// Enqueue a `CLAP_EVENT_PARAM_VALUE` for the next `process` call.
    SetParamValue {
        instance: InstanceId,
        param_id: u32,
        value: f64,
    },
    /// `clap_plugin.activate`.
    Activate {
        instance: InstanceId,
        sample_rate: f64,
        min_frames: u32,
        max_frames: u32,
    },
    /// `clap_plugin.deactivate`.
    Deactivate { instance: InstanceId },
    /// `clap_plugin.start_processing` / `stop_processing`.
    SetProcessing { instance: InstanceId, processing: bool },
    /// `clap_plugin_state.save`.
    SaveState { instance: InstanceId },
    /// `clap_plugin_state.load`.
    LoadState { instance: InstanceId, data: Vec<u8> },
    /// `clap_plugin_gui.create` + `set_parent`.
    GuiCreate { instance: InstanceId, parent: u64 },
    GuiDestroy { instance: InstanceId },
    /// `clap_plugin_gui.get_size`.
    GuiGetSize { instance: InstanceId },
    /// Feed accumulated parameter automation plus MIDI events translated to
    /// CLAP note/MIDI events ahead of the next `process` call.
    QueueAutomation {
        instance: InstanceId,
        params: ParameterChanges,
        midi: EventList,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClapResponse {
    ParameterList(Vec<crate::metadata::ParameterInfo>),
    ParamValue(f64),
    Ack,
    StateData(Vec<u8>),
    GuiSize { width: u32, height: u32 },
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_state_round_trips_its_payload() {
        let req = ClapRequest::LoadState {
            instance: 9,
            data: vec![1, 2, 3, 4],
        };
        let encoded = bincode::serialize(&req).unwrap();
        let decoded: ClapRequest = bincode::deserialize(&encoded).unwrap();
        match decoded {
            ClapRequest::LoadState { data, .. } => assert_eq!(data, vec![1, 2, 3, 4]),
            _ => panic!("wrong variant"),
        }
    }
}

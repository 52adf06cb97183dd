//! Message shapes for VST2's opcode-dispatched ABI.
//!
//! VST2 funnels every plugin operation through one C function,
//! `AEffect::dispatcher(effect, opcode, index, value, ptr, opt)`, and every
//! host callback through the symmetric `audioMaster(effect, opcode, index,
//! value, ptr, opt)`. Rather than invent a typed request per opcode (as
//! [`crate::vst3`] and [`crate::clap`] do for their already-typed
//! interfaces), this module mirrors that one shape directly and leans on
//! [`crate::opaque::DataConverter`] to resolve the untyped `ptr` argument.
//! `effProcessEvents` is the one opcode pulled out onto its own request,
//! since it travels over the event-dispatch socket instead of main-dispatch
//! (see the concurrency notes on [`EventDispatchRequest`]).

use serde::{Deserialize, Serialize};

use crate::events::{EventList, InstanceId};
use crate::opaque::{OpaqueArg, OpaqueValue};

/// Dispatcher opcodes relevant to a bridged plugin.
///
/// This is not the full ~70-entry VST2 opcode table; it covers the calls a
/// host actually needs to make to load, configure, automate, and tear down
/// a plugin. Anything else falls back to `Other(raw_opcode)`, keeping the
/// wire format forward-compatible with opcodes this crate doesn't know the
/// name of yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vst2Opcode {
    Open,
    Close,
    SetProgram,
    GetProgram,
    SetProgramName,
    GetProgramName,
    GetParamLabel,
    GetParamDisplay,
    GetParamName,
    SetSampleRate,
    SetBlockSize,
    MainsChanged,
    EditGetRect,
    EditOpen,
    EditClose,
    EditIdle,
    Identify,
    GetChunk,
    SetChunk,
    CanBeAutomated,
    String2Parameter,
    GetProgramNameIndexed,
    GetInputProperties,
    GetOutputProperties,
    GetPlugCategory,
    SetSpeakerArrangement,
    SetBypass,
    GetEffectName,
    GetVendorString,
    GetProductString,
    GetVendorVersion,
    VendorSpecific,
    CanDo,
    GetTailSize,
    GetMidiKeyName,
    GetSpeakerArrangement,
    StartProcess,
    StopProcess,
    Other(i32),
}

/// One generic `effect->dispatcher()` call, serialized for the main-dispatch
/// socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainDispatchRequest {
    pub instance: InstanceId,
    pub opcode: Vst2Opcode,
    pub index: i32,
    pub value: i64,
    pub arg: OpaqueArg,
    pub opt: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainDispatchResponse {
    pub result: i64,
    pub arg_out: OpaqueValue,
}

/// `effProcessEvents` is split off main-dispatch onto its own socket: a
/// blocked GUI call (a plugin opening a native file picker from inside
/// `effEditOpen`, say) must never stall MIDI delivery into `process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDispatchRequest {
    pub instance: InstanceId,
    pub events: EventList,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventDispatchResponse;

/// `audioMaster` callback opcodes the worker issues back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioMasterOpcode {
    Automate,
    Version,
    CurrentId,
    Idle,
    IoChanged,
    SizeWindow,
    GetSampleRate,
    GetBlockSize,
    GetTime,
    ProcessEvents,
    GetVendorString,
    GetProductString,
    GetVendorVersion,
    VendorSpecific,
    CanDo,
    GetLanguage,
    Other(i32),
}

/// A host callback invoked by the plugin mid-call, carried over the
/// dedicated host-callback socket so it can be answered without blocking
/// whichever dispatch call triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCallbackRequest {
    pub instance: InstanceId,
    pub opcode: AudioMasterOpcode,
    pub index: i32,
    pub value: i64,
    pub arg: OpaqueArg,
    pub opt: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCallbackResponse {
    pub result: i64,
    pub arg_out: OpaqueValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_dispatch_round_trips_an_unknown_opcode() {
        let req = MainDispatchRequest {
            instance: 1,
            opcode: Vst2Opcode::Other(1234),
            index: 0,
            value: 0,
            arg: OpaqueArg::Null,
            opt: 0.0,
        };
        let encoded = bincode::serialize(&req).unwrap();
        let decoded: MainDispatchRequest = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.opcode, Vst2Opcode::Other(1234));
    }

    #[test]
    fn event_dispatch_request_preserves_event_order() {
        use crate::events::MidiEvent;
        let events = vec![
            MidiEvent::note_on_builder(60, 100).offset(0).build(),
            MidiEvent::note_on_builder(64, 100).offset(64).build(),
        ];
        let req = EventDispatchRequest {
            instance: 2,
            events,
        };
        let encoded = bincode::serialize(&req).unwrap();
        let decoded: EventDispatchRequest = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.events[0].frame_offset(), 0);
        assert_eq!(decoded.events[1].frame_offset(), 64);
    }
}

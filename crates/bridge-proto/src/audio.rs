//! Messages carried on the audio socket.
//!
//! The samples themselves never travel over this socket - they live in the
//! shared-memory region negotiated by [`crate::control`] and read/written
//! directly by both processes. What crosses here is the small per-block
//! envelope: how many frames to process, the transport snapshot, and
//! whatever MIDI/automation accumulated since the last call, followed by
//! whatever the plugin produced as output (MIDI-out, deferred automation).

use serde::{Deserialize, Serialize};

use crate::data::TransportInfo;
use crate::events::{EventList, InstanceId, NoteExpressionChanges, ParameterChanges};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub instance: InstanceId,
    pub num_frames: u32,
    pub midi_in: EventList,
    pub param_changes_in: ParameterChanges,
    pub note_expression_in: NoteExpressionChanges,
    pub transport: TransportInfo,
    /// Realtime scheduling priority the audio thread should be running at;
    /// `None` means unchanged since the last request. See
    /// `bridge-transport`'s realtime-priority syncer, which refreshes this
    /// periodically in case the host's thread priority was reset out from
    /// under it.
    pub realtime_priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    /// MIDI output generated during `process`, buffered by the worker and
    /// flushed here rather than sent as it's produced so that a single
    /// socket round trip covers the whole block.
    pub midi_out: EventList,
    pub param_changes_out: ParameterChanges,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MidiEvent;

    #[test]
    fn process_request_with_midi_round_trips() {
        let req = ProcessRequest {
            instance: 3,
            num_frames: 512,
            midi_in: vec![MidiEvent::note_on_builder(60, 100).offset(0).build()],
            param_changes_in: ParameterChanges::new(),
            note_expression_in: NoteExpressionChanges::new(),
            transport: TransportInfo::default(),
            realtime_priority: Some(80),
        };
        let encoded = bincode::serialize(&req).unwrap();
        let decoded: ProcessRequest = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.num_frames, 512);
        assert_eq!(decoded.midi_in.len(), 1);
        assert_eq!(decoded.realtime_priority, Some(80));
    }

    #[test]
    fn process_response_carries_midi_output_in_order() {
        let resp = ProcessResponse {
            midi_out: vec![
                MidiEvent::note_off_builder(60).offset(100).build(),
                MidiEvent::note_off_builder(64).offset(200).build(),
            ],
            param_changes_out: ParameterChanges::new(),
        };
        let encoded = bincode::serialize(&resp).unwrap();
        let decoded: ProcessResponse = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.midi_out[0].frame_offset(), 100);
        assert_eq!(decoded.midi_out[1].frame_offset(), 200);
    }
}

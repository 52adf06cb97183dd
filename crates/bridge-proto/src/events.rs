//! Sample-accurate event types carried alongside audio: MIDI, parameter
//! automation, and per-note expression.
//!
//! These are the payloads that ride on the event-dispatch and parameters
//! sockets (and, bundled together, on the audio socket's process request).
//! They are kept separate from raw VST2/VST3/CLAP wire shapes so the same
//! representation works for all three plugin APIs; per-format loaders
//! translate to and from it at the edges.

use serde::{Deserialize, Serialize};

/// Identifies one loaded plugin instance across every socket of a worker.
///
/// A single worker process can host more than one instance when running in
/// [`crate::control::Lifecycle::Group`] mode, so every request that isn't
/// already pinned to a socket carries this alongside its arguments.
pub type InstanceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiStatus {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

/// A single MIDI event with its sample-accurate offset into the current
/// processing block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MidiEvent {
    Short {
        frame_offset: i32,
        channel: u8,
        status: MidiStatus,
        data1: u8,
        data2: u8,
    },
    SysEx {
        frame_offset: i32,
        data: Vec<u8>,
    },
}

impl MidiEvent {
    pub fn frame_offset(&self) -> i32 {
        match self {
            MidiEvent::Short { frame_offset, .. } => *frame_offset,
            MidiEvent::SysEx { frame_offset, .. } => *frame_offset,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(
            self,
            MidiEvent::Short {
                status: MidiStatus::NoteOn,
                data2,
                ..
            } if *data2 > 0
        )
    }

    pub fn is_note_off(&self) -> bool {
        matches!(
            self,
            MidiEvent::Short {
                status: MidiStatus::NoteOff,
                ..
            }
        ) || matches!(
            self,
            MidiEvent::Short {
                status: MidiStatus::NoteOn,
                data2: 0,
                ..
            }
        )
    }

    pub fn note(&self) -> Option<u8> {
        match self {
            MidiEvent::Short {
                status: MidiStatus::NoteOn | MidiStatus::NoteOff,
                data1,
                ..
            } => Some(*data1),
            _ => None,
        }
    }

    pub fn note_on_builder(note: u8, velocity: u8) -> MidiEventBuilder {
        MidiEventBuilder::new(MidiStatus::NoteOn, note, velocity)
    }

    pub fn note_off_builder(note: u8) -> MidiEventBuilder {
        MidiEventBuilder::new(MidiStatus::NoteOff, note, 0)
    }

    pub fn cc_builder(controller: u8, value: u8) -> MidiEventBuilder {
        MidiEventBuilder::new(MidiStatus::ControlChange, controller, value)
    }
}

/// Fluent constructor for [`MidiEvent::Short`], mirroring the call style the
/// rest of the workspace uses for small value types.
pub struct MidiEventBuilder {
    channel: u8,
    status: MidiStatus,
    data1: u8,
    data2: u8,
    offset: i32,
}

impl MidiEventBuilder {
    fn new(status: MidiStatus, data1: u8, data2: u8) -> Self {
        Self {
            channel: 0,
            status,
            data1,
            data2,
            offset: 0,
        }
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn offset(mut self, frame_offset: i32) -> Self {
        self.offset = frame_offset;
        self
    }

    pub fn build(self) -> MidiEvent {
        MidiEvent::Short {
            frame_offset: self.offset,
            channel: self.channel,
            status: self.status,
            data1: self.data1,
            data2: self.data2,
        }
    }
}

/// An ordered batch of MIDI events for one processing block.
///
/// Order is significant: events must stay sorted by `frame_offset` the way
/// they were received, since both the VST2 `effProcessEvents` call and the
/// VST3/CLAP event list interfaces process them in delivery order.
pub type EventList = Vec<MidiEvent>;

/// Single parameter automation point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterPoint {
    /// Sample offset within the current buffer (0 = first sample).
    pub sample_offset: i32,
    /// Normalized parameter value (0.0 to 1.0).
    pub value: f64,
}

/// Parameter automation queue for a single parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterQueue {
    /// Parameter ID (VST3 calls this ParamID; VST2 uses the dispatch index).
    pub param_id: u32,
    /// Automation points sorted by `sample_offset`.
    pub points: Vec<ParameterPoint>,
}

impl ParameterQueue {
    pub fn new(param_id: u32) -> Self {
        Self {
            param_id,
            points: Vec::new(),
        }
    }

    pub fn add_point(&mut self, sample_offset: i32, value: f64) {
        self.points.push(ParameterPoint {
            sample_offset,
            value,
        });
    }
}

/// Collection of parameter changes for a processing block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterChanges {
    pub queues: Vec<ParameterQueue>,
}

impl ParameterChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_queue(&mut self, queue: ParameterQueue) {
        self.queues.push(queue);
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

/// Note expression type (VST3-style per-note modulation; CLAP maps its own
/// expression IDs onto the same set at the loader boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteExpressionType {
    Volume,
    Pan,
    Tuning,
    Vibrato,
    Brightness,
}

/// Single note expression value change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NoteExpressionValue {
    pub sample_offset: i32,
    /// Unique note identifier, as assigned by the host's note-on event.
    pub note_id: i32,
    pub expression_type: NoteExpressionType,
    pub value: f64,
}

/// Collection of note expression changes for a processing block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteExpressionChanges {
    pub changes: Vec<NoteExpressionValue>,
}

impl NoteExpressionChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_change(&mut self, change: NoteExpressionValue) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_builder_round_trips_through_bincode() {
        let event = MidiEvent::note_on_builder(60, 100).channel(2).offset(128).build();
        let encoded = bincode::serialize(&event).unwrap();
        let decoded: MidiEvent = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, event);
        assert!(decoded.is_note_on());
        assert_eq!(decoded.note(), Some(60));
        assert_eq!(decoded.frame_offset(), 128);
    }

    #[test]
    fn zero_velocity_note_on_counts_as_note_off() {
        let event = MidiEvent::note_on_builder(60, 0).build();
        assert!(event.is_note_off());
        assert!(!event.is_note_on());
    }

    #[test]
    fn parameter_changes_track_emptiness() {
        let mut changes = ParameterChanges::new();
        assert!(changes.is_empty());
        let mut queue = ParameterQueue::new(3);
        queue.add_point(0, 0.5);
        changes.add_queue(queue);
        assert!(!changes.is_empty());
    }
}

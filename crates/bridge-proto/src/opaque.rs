//! Marshaling for VST2's untyped `void*` dispatcher argument.
//!
//! VST2's `AEffect::dispatcher` and `audioMaster` callback both take an
//! opaque pointer argument whose meaning depends on the opcode: sometimes
//! it's unused, sometimes a C string, sometimes a small fixed-size struct
//! (`ERect`, `VstSpeakerArrangement`, `VstTimeInfo`, ...), sometimes a
//! caller-owned buffer the callee writes into. None of that is expressible
//! as a single serde type, so every opcode gets paired with a
//! [`DataConverter`] that knows how to turn the pointer into an
//! [`OpaqueArg`] on the way into the wire and back into a pointer write on
//! the way out.

use serde::{Deserialize, Serialize};

/// Tagged union standing in for a VST2 dispatcher `ptr` argument.
///
/// The sending side picks the variant that matches the opcode being called;
/// the receiving side's [`DataConverter`] reads it back into the real
/// pointee before invoking the plugin or host callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OpaqueArg {
    /// Opcode doesn't read the pointer argument at all.
    Null,
    /// A null-terminated C string was passed in (e.g. `effCanDo`).
    CString(String),
    /// A fixed-size byte buffer the plugin reads from (chunk data, MIDI
    /// program name tables, speaker arrangements encoded as raw bytes).
    Bytes(Vec<u8>),
    /// An `ERect*` describing the editor window bounds.
    Rect { x: i16, y: i16, width: i16, height: i16 },
    /// A `VstTimeInfo*` snapshot, requested via `audioMasterGetTime`.
    TimeInfo(Box<crate::data::TransportInfo>),
    /// A caller-allocated buffer of `capacity` bytes the callee is expected
    /// to fill and report back in the matching [`OpaqueValue`].
    WriteBuffer { capacity: usize },
}

/// The materialized result of resolving an [`OpaqueArg`] after a round trip.
///
/// Mirrors [`OpaqueArg`]'s shape but represents what actually came back:
/// for `WriteBuffer` requests this carries the bytes the plugin wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OpaqueValue {
    Null,
    CString(String),
    Bytes(Vec<u8>),
    Rect { x: i16, y: i16, width: i16, height: i16 },
}

impl Default for OpaqueArg {
    fn default() -> Self {
        OpaqueArg::Null
    }
}

impl Default for OpaqueValue {
    fn default() -> Self {
        OpaqueValue::Null
    }
}

/// Per-opcode knowledge of how to marshal a `void*` argument in both
/// directions.
///
/// One side (the native plugin-side library, or the worker acting as a
/// stand-in host) implements this against real pointers; the bridge never
/// needs to know the C layout, only that each opcode has exactly one
/// converter.
pub trait DataConverter {
    /// Reads the pointee pointed to by `ptr` for the given opcode and
    /// produces the value that will travel over the wire.
    ///
    /// # Safety
    /// `ptr` must be a valid pointer for whatever shape `opcode` implies, or
    /// null when the opcode ignores it.
    unsafe fn read(&self, opcode: i32, ptr: *const std::ffi::c_void) -> OpaqueArg;

    /// Writes `value` back into the buffer `ptr` points at, for opcodes
    /// whose argument is an out-parameter.
    ///
    /// # Safety
    /// `ptr` must point at a buffer large enough for the concrete shape
    /// implied by `opcode`, as established when [`Self::read`] produced the
    /// matching [`OpaqueArg::WriteBuffer`].
    unsafe fn write(&self, opcode: i32, ptr: *mut std::ffi::c_void, value: &OpaqueValue);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_arg_round_trips_through_bincode() {
        let arg = OpaqueArg::Rect {
            x: 0,
            y: 0,
            width: 400,
            height: 300,
        };
        let encoded = bincode::serialize(&arg).unwrap();
        let decoded: OpaqueArg = bincode::deserialize(&encoded).unwrap();
        match decoded {
            OpaqueArg::Rect { width, height, .. } => {
                assert_eq!(width, 400);
                assert_eq!(height, 300);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn default_is_null() {
        assert!(matches!(OpaqueArg::default(), OpaqueArg::Null));
        assert!(matches!(OpaqueValue::default(), OpaqueValue::Null));
    }
}

//! Length-prefixed binary framing shared by every socket in the bridge.
//!
//! Every message, regardless of which of the six sockets carries it, is
//! encoded as an 8-byte little-endian length prefix followed by a bincode
//! payload. Framing is deliberately symmetric: the same [`write_frame`] and
//! [`read_frame`] pair is used for host-to-worker requests, worker-to-host
//! responses, and the reverse-direction host-callback traffic.

use std::cell::RefCell;
use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Messages above this size almost certainly indicate a desynced stream
/// (a misparsed length prefix) rather than a legitimate payload - bail out
/// instead of trying to allocate gigabytes for it.
const MAX_FRAME_LEN: u64 = 256 * 1024 * 1024;

thread_local! {
    static SCRATCH: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(4096));
}

/// Serializes `value` and writes it to `writer` as a length-prefixed frame.
///
/// Uses a thread-local scratch buffer so the hot audio-socket path does not
/// allocate on every call once the buffer has grown to its steady-state size.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    SCRATCH.with(|cell| -> Result<()> {
        let mut buf = cell.borrow_mut();
        buf.clear();
        bincode::serialize_into(&mut *buf, value)?;
        writer.write_all(&(buf.len() as u64).to_le_bytes())?;
        writer.write_all(&buf)?;
        Ok(())
    })
}

/// Reads one length-prefixed frame from `reader` and deserializes it.
///
/// Returns `Err(BridgeError::Io)` with `ErrorKind::UnexpectedEof` if the
/// peer closed the connection before a new frame began - callers use this
/// to distinguish a clean shutdown from a mid-frame crash.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(BridgeError::Wire(format!(
            "frame length {len} exceeds {MAX_FRAME_LEN} byte sanity limit"
        )));
    }
    SCRATCH.with(|cell| -> Result<T> {
        let mut buf = cell.borrow_mut();
        buf.resize(len as usize, 0);
        reader.read_exact(&mut buf)?;
        Ok(bincode::deserialize(&buf)?)
    })
}

/// True if `err` represents the peer closing its end of the socket cleanly
/// (as opposed to a protocol desync or genuine I/O failure).
pub fn is_peer_closed(err: &BridgeError) -> bool {
    matches!(err, BridgeError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips_through_a_byte_buffer() {
        let mut buf = Vec::new();
        let value = Sample {
            a: 7,
            b: "plugin".into(),
        };
        write_frame(&mut buf, &value).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Sample = read_frame(&mut cursor).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn two_frames_back_to_back_decode_independently() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Sample { a: 1, b: "x".into() }).unwrap();
        write_frame(&mut buf, &Sample { a: 2, b: "y".into() }).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Sample = read_frame(&mut cursor).unwrap();
        let second: Sample = read_frame(&mut cursor).unwrap();
        assert_eq!(first.a, 1);
        assert_eq!(second.a, 2);
    }

    #[test]
    fn eof_before_length_prefix_reports_peer_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_frame::<_, Sample>(&mut cursor).unwrap_err();
        assert!(is_peer_closed(&err));
    }

    #[test]
    fn oversized_length_prefix_is_rejected_without_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let mut cursor = Cursor::new(buf);
        let err = read_frame::<_, Sample>(&mut cursor).unwrap_err();
        assert!(matches!(err, BridgeError::Wire(_)));
    }
}

//! Transport layer for the plugin bridge: the six-socket connection
//! between host and worker, the shared-memory audio path, and the
//! concurrency arbiter that keeps call families from blocking each other.

pub mod arbiter;
pub mod realtime;
pub mod shared_audio;
pub mod socket_set;

pub use shared_audio::SharedAudioBuffer;
pub use socket_set::{connect_all, Duplex, RawSocketSet, SocketReader, SocketSetListener, SocketWriter};

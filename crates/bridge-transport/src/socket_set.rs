//! The six-socket transport between the native host library and a worker
//! process.
//!
//! Every loaded plugin instance gets its own fixed set of Unix domain
//! sockets, one per call family, so unrelated calls never block behind each
//! other: a plugin opening a blocking file dialog from inside an editor
//! callback must not stall MIDI delivery or parameter automation, and a
//! host callback fired mid-dispatch must not deadlock against the call
//! that triggered it.
//!
//! Sockets are always accepted, and always connected, in the fixed order
//! below - the two ends never exchange a socket identifier, so staying in
//! lockstep is what lets the worker tell them apart.

use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use bridge_proto::error::Result;
use bridge_proto::wire::{read_frame, write_frame};

/// Socket roles, in the fixed accept/connect order both sides rely on.
pub const SOCKET_ROLES: [&str; 6] = [
    "main_dispatch",
    "event_dispatch",
    "host_callback",
    "parameters",
    "audio",
    "control",
];

fn socket_path(dir: &Path, role: &str, instance: u64) -> PathBuf {
    dir.join(format!("{instance}.{role}.sock"))
}

/// One direction of one socket: either the writer half (requests out) or
/// the reader half (responses in). Typed over the message it carries so a
/// caller can't accidentally write a `ProcessRequest` down the parameters
/// socket.
pub struct SocketWriter<T> {
    inner: Mutex<BufWriter<UnixStream>>,
    _marker: PhantomData<T>,
}

impl<T: Serialize> SocketWriter<T> {
    fn new(stream: UnixStream) -> Self {
        Self {
            inner: Mutex::new(BufWriter::new(stream)),
            _marker: PhantomData,
        }
    }

    /// Sends one frame. Calls from multiple threads serialize on the
    /// internal mutex rather than interleaving bytes on the wire.
    pub fn send(&self, value: &T) -> Result<()> {
        let mut writer = self.inner.lock().unwrap();
        write_frame(&mut *writer, value)?;
        std::io::Write::flush(&mut *writer)?;
        Ok(())
    }
}

pub struct SocketReader<T> {
    inner: Mutex<BufReader<UnixStream>>,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> SocketReader<T> {
    fn new(stream: UnixStream) -> Self {
        Self {
            inner: Mutex::new(BufReader::new(stream)),
            _marker: PhantomData,
        }
    }

    /// Blocks until the next frame is available. A single dedicated thread
    /// owns the read side of each socket in practice, but the lock still
    /// makes this sound if a caller ever needs to share it.
    pub fn recv(&self) -> Result<T> {
        let mut reader = self.inner.lock().unwrap();
        read_frame(&mut *reader)
    }
}

/// One end of a socket, split into independently lockable read/write
/// halves via `try_clone`, so a request-writer thread and a
/// response-reader thread never contend on the same mutex.
pub struct Duplex<Req, Resp> {
    pub writer: SocketWriter<Req>,
    pub reader: SocketReader<Resp>,
}

impl<Req: Serialize, Resp: DeserializeOwned> Duplex<Req, Resp> {
    /// Wraps one connected socket end as a typed duplex. Callers on both
    /// sides of the bridge use this to turn the raw streams out of
    /// [`RawSocketSet`] into the request/response shape that socket role
    /// actually carries.
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        let read_half = stream.try_clone()?;
        Ok(Self {
            writer: SocketWriter::new(stream),
            reader: SocketReader::new(read_half),
        })
    }
}

/// The worker side: binds and accepts all six sockets for one instance, in
/// the fixed role order, then hands back typed duplex handles.
pub struct SocketSetListener {
    listeners: Vec<(String, UnixListener)>,
}

impl SocketSetListener {
    pub fn bind(dir: &Path, instance: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut listeners = Vec::with_capacity(SOCKET_ROLES.len());
        for role in SOCKET_ROLES {
            let path = socket_path(dir, role, instance);
            let _ = std::fs::remove_file(&path);
            listeners.push((role.to_string(), UnixListener::bind(&path)?));
        }
        Ok(Self { listeners })
    }

    /// Accepts one connection per socket, in role order, blocking until the
    /// native side has connected to all six.
    pub fn accept_all(&self) -> Result<RawSocketSet> {
        let mut streams = Vec::with_capacity(self.listeners.len());
        for (_, listener) in &self.listeners {
            let (stream, _addr) = listener.accept()?;
            streams.push(stream);
        }
        Ok(RawSocketSet::from_vec(streams))
    }
}

/// The native-host side: connects all six sockets for one instance, in the
/// same fixed role order the worker accepts them in.
pub fn connect_all(dir: &Path, instance: u64) -> Result<RawSocketSet> {
    let mut streams = Vec::with_capacity(SOCKET_ROLES.len());
    for role in SOCKET_ROLES {
        let path = socket_path(dir, role, instance);
        streams.push(UnixStream::connect(&path)?);
    }
    Ok(RawSocketSet::from_vec(streams))
}

/// Six connected, not-yet-typed streams in role order. Call
/// [`RawSocketSet::into_typed`] to get the request/response shapes each
/// socket actually carries.
pub struct RawSocketSet {
    streams: [Option<UnixStream>; 6],
}

impl RawSocketSet {
    fn from_vec(mut streams: Vec<UnixStream>) -> Self {
        assert_eq!(streams.len(), 6, "socket set must have exactly six sockets");
        let mut out: [Option<UnixStream>; 6] = Default::default();
        for (slot, stream) in out.iter_mut().zip(streams.drain(..)) {
            *slot = Some(stream);
        }
        Self { streams: out }
    }

    fn take(&mut self, index: usize) -> UnixStream {
        self.streams[index]
            .take()
            .expect("socket already taken from this set")
    }

    pub fn main_dispatch(&mut self) -> UnixStream {
        self.take(0)
    }

    pub fn event_dispatch(&mut self) -> UnixStream {
        self.take(1)
    }

    pub fn host_callback(&mut self) -> UnixStream {
        self.take(2)
    }

    pub fn parameters(&mut self) -> UnixStream {
        self.take(3)
    }

    pub fn audio(&mut self) -> UnixStream {
        self.take(4)
    }

    pub fn control(&mut self) -> UnixStream {
        self.take(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::thread;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping(u32);

    #[test]
    fn connects_in_fixed_role_order() {
        let dir = std::env::temp_dir().join(format!("socket-set-test-{}", std::process::id()));
        let listener = SocketSetListener::bind(&dir, 1).unwrap();

        let accepted = thread::spawn(move || listener.accept_all().unwrap());
        let mut client = connect_all(&dir, 1).unwrap();
        let mut server = accepted.join().unwrap();

        let client_control = client.control();
        let server_control: Duplex<Ping, Ping> = Duplex::from_stream(server.control()).unwrap();
        let client_duplex: Duplex<Ping, Ping> = Duplex::from_stream(client_control).unwrap();

        client_duplex.writer.send(&Ping(42)).unwrap();
        let received = server_control.reader.recv().unwrap();
        assert_eq!(received, Ping(42));

        std::fs::remove_dir_all(&dir).ok();
    }
}

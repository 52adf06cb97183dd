//! Concurrency and recursion arbiter.
//!
//! Each of the six sockets gets its own OS thread on both ends, so a call
//! family never blocks behind another: the audio thread must never wait on
//! a GUI call, and a host callback fired from inside a dispatch call must
//! be answerable without that dispatch call itself completing first (mutual
//! recursion). This module owns that thread layout for the native-host
//! side; `bridge-worker` mirrors it for the foreign-process side.
//!
//! The audio path is the one genuinely RT-sensitive piece: the host's audio
//! thread must never block on a mutex contended by a non-RT thread, so it
//! hands its request to [`AudioArbiter`] through a lock-free queue instead
//! of calling the socket directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, Sender};

use bridge_proto::audio::{ProcessRequest, ProcessResponse};
use bridge_proto::error::{BridgeError, Result};

use crate::realtime::RealtimeTarget;
use crate::socket_set::Duplex;

const COMMAND_QUEUE_SIZE: usize = 4;
const RECYCLE_QUEUE_SIZE: usize = 4;

/// RT-safe handle to the audio socket's dedicated I/O thread.
///
/// `process` is the only method the audio thread calls; everything else
/// (parameters, dispatch, editor) goes through sockets the GUI/control
/// threads own directly, since only the audio path has a hard deadline.
pub struct AudioArbiter {
    command_queue: Arc<ArrayQueue<Box<ProcessRequest>>>,
    response_queue: Arc<ArrayQueue<Box<ProcessResponse>>>,
    recycle_queue: Arc<ArrayQueue<Box<ProcessRequest>>>,
    running: Arc<AtomicBool>,
    crashed: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioArbiter {
    pub fn spawn(duplex: Duplex<ProcessRequest, ProcessResponse>, realtime: RealtimeTarget) -> Self {
        let command_queue = Arc::new(ArrayQueue::new(COMMAND_QUEUE_SIZE));
        let response_queue = Arc::new(ArrayQueue::new(COMMAND_QUEUE_SIZE));
        let recycle_queue = Arc::new(ArrayQueue::new(RECYCLE_QUEUE_SIZE));
        let running = Arc::new(AtomicBool::new(true));
        let crashed = Arc::new(AtomicBool::new(false));

        let thread = {
            let commands = Arc::clone(&command_queue);
            let responses = Arc::clone(&response_queue);
            let recycle = Arc::clone(&recycle_queue);
            let running = Arc::clone(&running);
            let crashed = Arc::clone(&crashed);
            thread::Builder::new()
                .name("bridge-audio-io".to_string())
                .spawn(move || {
                    Self::run(duplex, commands, responses, recycle, running, crashed, realtime)
                })
                .expect("failed to spawn audio I/O thread")
        };

        Self {
            command_queue,
            response_queue,
            recycle_queue,
            running,
            crashed,
            thread: Some(thread),
        }
    }

    fn run(
        duplex: Duplex<ProcessRequest, ProcessResponse>,
        commands: Arc<ArrayQueue<Box<ProcessRequest>>>,
        responses: Arc<ArrayQueue<Box<ProcessResponse>>>,
        recycle: Arc<ArrayQueue<Box<ProcessRequest>>>,
        running: Arc<AtomicBool>,
        crashed: Arc<AtomicBool>,
        realtime: RealtimeTarget,
    ) {
        realtime.apply_to_current_thread();
        let mut last_resync = Instant::now();

        while running.load(Ordering::Acquire) {
            if should_resync(last_resync) {
                realtime.apply_to_current_thread();
                last_resync = Instant::now();
            }

            let Some(request) = commands.pop() else {
                thread::sleep(Duration::from_micros(100));
                continue;
            };

            let result = duplex
                .writer
                .send(&request)
                .and_then(|()| duplex.reader.recv());

            let _ = recycle.push(request);

            match result {
                Ok(response) => {
                    let _ = responses.push(Box::new(response));
                }
                Err(_) => {
                    crashed.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }

    /// Enqueues a process request from the audio thread. Never blocks on a
    /// contended lock: the queue is lock-free and sized so the I/O thread
    /// always has room during steady-state operation.
    pub fn submit(&self, request: Box<ProcessRequest>) -> std::result::Result<(), Box<ProcessRequest>> {
        self.command_queue.push(request)
    }

    /// Non-blocking poll for a completed response.
    pub fn try_recv(&self) -> Option<Box<ProcessResponse>> {
        self.response_queue.pop()
    }

    /// Reclaims a request Box the I/O thread is done with, so the audio
    /// thread can reuse its allocation for the next block instead of
    /// allocating fresh each time.
    pub fn try_reclaim(&self) -> Option<Box<ProcessRequest>> {
        self.recycle_queue.pop()
    }

    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::Acquire)
    }
}

impl Drop for AudioArbiter {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// A call dispatched onto the GUI thread and a handle to wait for its
/// result.
///
/// VST2's `effEditOpen`/`effEditIdle` and VST3's `IPlugView` methods are
/// only safe to call from the thread that owns the window system
/// connection. `GuiThreadHandle` lets any other thread (typically the
/// dispatch-socket reader) hand work to that one thread via a bounded
/// single-producer queue and get the result back through a future-like
/// receiver, rather than needing the window-system thread itself to poll
/// sockets.
pub struct GuiThreadHandle {
    sender: Sender<GuiTask>,
    _thread: thread::JoinHandle<()>,
}

type GuiTask = Box<dyn FnOnce() + Send>;

impl GuiThreadHandle {
    pub fn spawn() -> Self {
        let (sender, receiver): (Sender<GuiTask>, Receiver<GuiTask>) = bounded(16);
        let thread = thread::Builder::new()
            .name("bridge-gui".to_string())
            .spawn(move || {
                for task in receiver.iter() {
                    task();
                }
            })
            .expect("failed to spawn GUI thread");

        Self {
            sender,
            _thread: thread,
        }
    }

    /// Runs `f` on the GUI thread and blocks the caller until it completes.
    pub fn invoke<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> Result<T> {
        let (tx, rx) = bounded(1);
        let task: GuiTask = Box::new(move || {
            let _ = tx.send(f());
        });
        self.sender
            .send(task)
            .map_err(|_| BridgeError::EditorError("GUI thread is gone".into()))?;
        rx.recv()
            .map_err(|_| BridgeError::EditorError("GUI thread dropped its response".into()))
    }
}

/// Accumulates MIDI events a plugin emits from inside `process` (VST2's
/// `audioMasterProcessEvents`, CLAP's output event list) so they can be
/// flushed as one batch in the process response rather than trickling out
/// mid-call, which would require a socket round trip the caller can't
/// afford inside its RT deadline.
#[derive(Default)]
pub struct MidiOutBuffer {
    events: Vec<bridge_proto::events::MidiEvent>,
}

impl MidiOutBuffer {
    pub fn push(&mut self, event: bridge_proto::events::MidiEvent) {
        self.events.push(event);
    }

    pub fn take(&mut self) -> Vec<bridge_proto::events::MidiEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Polls the peer process's liveness and flags a crash the first time it
/// disappears, so that a blocked socket call can be abandoned with
/// [`BridgeError::ProcessCrashed`] instead of hanging forever.
pub struct Watchdog {
    crashed: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn spawn(peer_pid: u32, poll_interval: Duration) -> Self {
        let crashed = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let crashed = Arc::clone(&crashed);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("bridge-watchdog".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        if !process_is_alive(peer_pid) {
                            crashed.store(true, Ordering::Release);
                            break;
                        }
                        thread::sleep(poll_interval);
                    }
                })
                .expect("failed to spawn watchdog thread")
        };

        Self {
            crashed,
            thread: Some(thread),
            running,
        }
    }

    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::Acquire)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    // Signal 0 performs no-op permission/existence checks without actually
    // sending a signal (see kill(2)).
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

/// Smallest time slice between two realtime-priority resyncs, so a host
/// that keeps recreating its audio thread's priority doesn't fight with
/// the syncer inside one scheduling quantum.
pub const REALTIME_RESYNC_INTERVAL: Duration = Duration::from_secs(10);

pub fn should_resync(last: Instant) -> bool {
    last.elapsed() >= REALTIME_RESYNC_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gui_thread_handle_runs_work_and_returns_result() {
        let handle = GuiThreadHandle::spawn();
        let result = handle.invoke(|| 2 + 2).unwrap();
        assert_eq!(result, 4);
    }

    #[test]
    fn midi_out_buffer_preserves_order_and_drains_on_take() {
        let mut buf = MidiOutBuffer::default();
        buf.push(bridge_proto::events::MidiEvent::note_on_builder(60, 100).offset(0).build());
        buf.push(bridge_proto::events::MidiEvent::note_off_builder(60).offset(128).build());
        let drained = buf.take();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].frame_offset(), 0);
        assert!(buf.take().is_empty());
    }

    #[test]
    fn watchdog_detects_a_dead_process_quickly() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        // Let the child actually exit before watching it.
        let mut child = child;
        let _ = child.wait();
        let watchdog = Watchdog::spawn(pid, Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));
        assert!(watchdog.has_crashed());
    }

    #[test]
    fn should_resync_is_false_immediately_after_a_sync() {
        assert!(!should_resync(Instant::now()));
    }
}

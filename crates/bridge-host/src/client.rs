//! Native-side connection to one bridged plugin instance.
//!
//! [`PluginClient`] performs the handshake, owns the six-socket transport,
//! and implements [`PluginBridge`] against it. There is one `PluginClient`
//! per loaded plugin instance, created by [`crate::manager::ProcessManager`]
//! once it has a worker process listening on a socket directory.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bridge_proto::clap::{ClapRequest, ClapResponse};
use bridge_proto::control::{BridgeConfig, ControlRequest, ControlResponse};
use bridge_proto::data::{PluginKind, TransportInfo};
use bridge_proto::error::{BridgeError, LoadStage, Result};
use bridge_proto::events::{EventList, InstanceId, MidiEvent, NoteExpressionChanges, ParameterChanges};
use bridge_proto::metadata::ParameterInfo;
use bridge_proto::opaque::{OpaqueArg, OpaqueValue};
use bridge_proto::parameters::{ParameterRequest, ParameterResponse};
use bridge_proto::vst2::{MainDispatchRequest, MainDispatchResponse, Vst2Opcode};
use bridge_proto::vst3::{Vst3Request, Vst3Response};
use bridge_proto::PluginMetadata;

use bridge_transport::arbiter::{AudioArbiter, GuiThreadHandle, Watchdog};
use bridge_transport::realtime::RealtimeTarget;
use bridge_transport::{connect_all, Duplex, SharedAudioBuffer};

use crate::bridge::PluginBridge;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Allocates the next process-wide unique instance id. [`ProcessManager`][crate::manager::ProcessManager]
/// calls this once per plugin load and passes the result both to the
/// spawned worker (as a CLI argument) and to [`PluginClient::connect`].
pub fn next_instance_id() -> InstanceId {
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

fn load_failed(plugin_path: &Path, stage: LoadStage, reason: impl Into<String>) -> BridgeError {
    BridgeError::LoadFailed {
        path: plugin_path.to_path_buf(),
        stage,
        reason: reason.into(),
    }
}

/// The one per-format main-dispatch socket, typed according to which ABI
/// the loaded plugin uses.
enum ApiDispatch {
    Vst2(Duplex<MainDispatchRequest, MainDispatchResponse>),
    Vst3(Duplex<Vst3Request, Vst3Response>),
    Clap(Duplex<ClapRequest, ClapResponse>),
}

/// Drives one loaded plugin instance over the six-socket transport.
///
/// Audio calls go through [`AudioArbiter`] so the host's RT thread never
/// touches a socket directly; everything else goes through `dispatch`
/// under a plain mutex, since control-plane calls (open a dialog, save
/// state) are allowed to block.
pub struct PluginClient {
    instance: InstanceId,
    metadata: PluginMetadata,
    dispatch: Mutex<ApiDispatch>,
    parameters: Mutex<Duplex<ParameterRequest, ParameterResponse>>,
    arbiter: AudioArbiter,
    gui: GuiThreadHandle,
    watchdog: Watchdog,
    input_buffer: SharedAudioBuffer,
    output_buffer: SharedAudioBuffer,
    last_midi_out: Mutex<Vec<MidiEvent>>,
    /// Kept alive but not read from directly: the embedding VST2/VST3/CLAP
    /// entry point spins up its own reader threads around these once it
    /// wraps this client, for delivering MIDI events and answering host
    /// callbacks without blocking behind `dispatch`.
    _event_dispatch: std::os::unix::net::UnixStream,
    _host_callback: std::os::unix::net::UnixStream,
}

impl PluginClient {
    /// Connects all six sockets, performs the handshake, and negotiates the
    /// initial shared-memory audio geometry.
    ///
    /// `instance` must be the same id [`crate::manager::ProcessManager`]
    /// passed to the worker process it just spawned, since the worker binds
    /// its socket set by that id before it knows anything else about the
    /// plugin being loaded - see [`next_instance_id`] for how callers
    /// typically obtain one. `worker_pid` is that same worker's pid; the
    /// watchdog polls it independently of whether any socket call is in
    /// flight, so a crash during a blocked GUI call is still noticed
    /// promptly.
    pub fn connect(
        config: &BridgeConfig,
        instance: InstanceId,
        plugin_path: &Path,
        plugin_kind: PluginKind,
        sample_rate: f64,
        worker_pid: u32,
    ) -> Result<Self> {
        let mut sockets = connect_all(&config.socket_dir, instance)?;

        let control: Duplex<ControlRequest, ControlResponse> =
            Duplex::from_stream(sockets.control())?;

        control.writer.send(&ControlRequest::Handshake {
            instance,
            plugin_path: plugin_path.to_path_buf(),
            plugin_kind,
            sample_rate,
            parent_pid: std::process::id(),
        })?;

        let metadata = match control.reader.recv()? {
            ControlResponse::Ready { metadata } => *metadata,
            ControlResponse::Error { message } => {
                return Err(load_failed(plugin_path, LoadStage::Initialization, message))
            }
            other => {
                return Err(BridgeError::ProtocolError(format!(
                    "unexpected handshake response: {other:?}"
                )))
            }
        };

        control.writer.send(&ControlRequest::Activate {
            instance,
            num_inputs: metadata.audio_io.inputs as u16,
            num_outputs: metadata.audio_io.outputs as u16,
            max_frames: config.max_block_size as u32,
            format: config.preferred_format,
        })?;

        let (shm_name, channel_stride_bytes) = match control.reader.recv()? {
            ControlResponse::BufferGeometry {
                shm_name,
                channel_stride_bytes,
            } => (shm_name, channel_stride_bytes),
            ControlResponse::Error { message } => {
                return Err(load_failed(plugin_path, LoadStage::Setup, message))
            }
            other => {
                return Err(BridgeError::ProtocolError(format!(
                    "unexpected activate response: {other:?}"
                )))
            }
        };

        let sample_size = std::mem::size_of::<f32>();
        let samples_per_channel = (channel_stride_bytes / sample_size).max(config.max_block_size);

        let input_buffer = SharedAudioBuffer::create_with_format(
            format!("{shm_name}.in"),
            metadata.audio_io.inputs.max(1),
            samples_per_channel,
            config.preferred_format,
        )?;
        let output_buffer = SharedAudioBuffer::create_with_format(
            format!("{shm_name}.out"),
            metadata.audio_io.outputs.max(1),
            samples_per_channel,
            config.preferred_format,
        )?;

        let audio_duplex: Duplex<
            bridge_proto::audio::ProcessRequest,
            bridge_proto::audio::ProcessResponse,
        > = Duplex::from_stream(sockets.audio())?;
        let realtime = RealtimeTarget::new(0);
        let arbiter = AudioArbiter::spawn(audio_duplex, realtime);

        let dispatch = match plugin_kind {
            PluginKind::Vst2 => ApiDispatch::Vst2(Duplex::from_stream(sockets.main_dispatch())?),
            PluginKind::Vst3 => ApiDispatch::Vst3(Duplex::from_stream(sockets.main_dispatch())?),
            PluginKind::Clap => ApiDispatch::Clap(Duplex::from_stream(sockets.main_dispatch())?),
        };

        let parameters: Duplex<ParameterRequest, ParameterResponse> =
            Duplex::from_stream(sockets.parameters())?;

        // event_dispatch and host_callback are driven by reader threads the
        // embedding VST2/VST3/CLAP entry point spins up around this client,
        // not by PluginClient itself - it has no business routing MIDI
        // delivery or answering host callbacks on the caller's behalf. Kept
        // open here so the fds stay valid until that entry point claims
        // them.
        let event_dispatch = sockets.event_dispatch();
        let host_callback = sockets.host_callback();

        let gui = GuiThreadHandle::spawn();
        let watchdog = Watchdog::spawn(worker_pid, Duration::from_millis(250));

        Ok(Self {
            instance,
            metadata,
            dispatch: Mutex::new(dispatch),
            parameters: Mutex::new(parameters),
            arbiter,
            gui,
            watchdog,
            input_buffer,
            output_buffer,
            last_midi_out: Mutex::new(Vec::new()),
            _event_dispatch: event_dispatch,
            _host_callback: host_callback,
        })
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Runs `f` on the dedicated GUI thread this client spawned. Editor
    /// calls route through here rather than through `dispatch` directly so
    /// they always execute on the same OS thread the window-system
    /// connection was opened on.
    pub fn on_gui_thread<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> Result<T> {
        self.gui.invoke(f)
    }

    /// MIDI the plugin emitted during the most recently completed
    /// `process` call, drained by the caller once per block.
    pub fn take_midi_out(&self) -> Vec<MidiEvent> {
        std::mem::take(&mut self.last_midi_out.lock().unwrap())
    }
}

impl PluginBridge for PluginClient {
    fn process(
        &self,
        num_samples: usize,
        midi_events: EventList,
        param_changes: ParameterChanges,
        note_expression: NoteExpressionChanges,
        transport: TransportInfo,
    ) -> bool {
        let request = Box::new(bridge_proto::audio::ProcessRequest {
            instance: self.instance,
            num_frames: num_samples as u32,
            midi_in: midi_events,
            param_changes_in: param_changes,
            note_expression_in: note_expression,
            transport,
            realtime_priority: None,
        });

        if self.arbiter.submit(request).is_err() {
            return false;
        }

        // Busy-poll with a yield rather than a blocking recv: the caller is
        // the host's own audio thread, and spinning briefly here is cheaper
        // than adding a second cross-thread wakeup path for what's normally
        // a microsecond-scale round trip.
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        loop {
            if let Some(response) = self.arbiter.try_recv() {
                *self.last_midi_out.lock().unwrap() = response.midi_out;
                return true;
            }
            if self.arbiter.has_crashed() || std::time::Instant::now() > deadline {
                return false;
            }
            std::thread::yield_now();
        }
    }

    fn write_input_channel(&self, channel: usize, data: &[f32]) -> Result<()> {
        self.input_buffer.write_channel(channel, data)
    }

    fn read_output_channel_into(&self, channel: usize, output: &mut [f32]) -> Result<usize> {
        self.output_buffer.read_channel_into(channel, output)
    }

    fn write_input_channel_f64(&self, channel: usize, data: &[f64]) -> Result<()> {
        self.input_buffer.write_channel_f64(channel, data)
    }

    fn read_output_channel_into_f64(&self, channel: usize, output: &mut [f64]) -> Result<usize> {
        self.output_buffer.read_channel_into_f64(channel, output)
    }

    fn is_crashed(&self) -> bool {
        self.arbiter.has_crashed() || self.watchdog.has_crashed()
    }

    fn open_editor(&self, parent_handle: u64) -> Option<(u32, u32)> {
        let mut dispatch = self.dispatch.lock().unwrap();
        match &mut *dispatch {
            ApiDispatch::Vst2(duplex) => {
                duplex
                    .writer
                    .send(&MainDispatchRequest {
                        instance: self.instance,
                        opcode: Vst2Opcode::EditOpen,
                        index: 0,
                        value: parent_handle as i64,
                        arg: OpaqueArg::Null,
                        opt: 0.0,
                    })
                    .ok()?;
                let response = duplex.reader.recv().ok()?;
                if response.result == 0 {
                    return None;
                }
                self.metadata.editor_size
            }
            ApiDispatch::Vst3(duplex) => {
                duplex
                    .writer
                    .send(&Vst3Request::EditorAttached {
                        instance: self.instance,
                        parent: parent_handle,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    Vst3Response::EditorSize { width, height } => Some((width as u32, height as u32)),
                    _ => self.metadata.editor_size,
                }
            }
            ApiDispatch::Clap(duplex) => {
                duplex
                    .writer
                    .send(&ClapRequest::GuiCreate {
                        instance: self.instance,
                        parent: parent_handle,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    ClapResponse::GuiSize { width, height } => Some((width, height)),
                    _ => self.metadata.editor_size,
                }
            }
        }
    }

    fn close_editor(&self) -> bool {
        let mut dispatch = self.dispatch.lock().unwrap();
        let result = match &mut *dispatch {
            ApiDispatch::Vst2(duplex) => duplex
                .writer
                .send(&MainDispatchRequest {
                    instance: self.instance,
                    opcode: Vst2Opcode::EditClose,
                    index: 0,
                    value: 0,
                    arg: OpaqueArg::Null,
                    opt: 0.0,
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
            ApiDispatch::Vst3(duplex) => duplex
                .writer
                .send(&Vst3Request::EditorRemoved {
                    instance: self.instance,
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
            ApiDispatch::Clap(duplex) => duplex
                .writer
                .send(&ClapRequest::GuiDestroy {
                    instance: self.instance,
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
        };
        result.is_ok()
    }

    fn editor_idle(&self) {
        let mut dispatch = self.dispatch.lock().unwrap();
        if let ApiDispatch::Vst2(duplex) = &mut *dispatch {
            // VST3's IPlugView and CLAP's GUI extension pump their own event
            // loop once attached; only VST2 relies on a host-driven tick.
            let _ = duplex
                .writer
                .send(&MainDispatchRequest {
                    instance: self.instance,
                    opcode: Vst2Opcode::EditIdle,
                    index: 0,
                    value: 0,
                    arg: OpaqueArg::Null,
                    opt: 0.0,
                })
                .and_then(|()| duplex.reader.recv());
        }
    }

    fn save_state(&self) -> Option<Vec<u8>> {
        let mut dispatch = self.dispatch.lock().unwrap();
        match &mut *dispatch {
            ApiDispatch::Vst2(duplex) => {
                duplex
                    .writer
                    .send(&MainDispatchRequest {
                        instance: self.instance,
                        opcode: Vst2Opcode::GetChunk,
                        index: 0,
                        value: 0,
                        arg: OpaqueArg::WriteBuffer { capacity: 1 << 20 },
                        opt: 0.0,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()?.arg_out {
                    OpaqueValue::Bytes(data) => Some(data),
                    _ => None,
                }
            }
            ApiDispatch::Vst3(duplex) => {
                duplex
                    .writer
                    .send(&Vst3Request::GetState {
                        instance: self.instance,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    Vst3Response::StateData(data) => Some(data),
                    _ => None,
                }
            }
            ApiDispatch::Clap(duplex) => {
                duplex
                    .writer
                    .send(&ClapRequest::SaveState {
                        instance: self.instance,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    ClapResponse::StateData(data) => Some(data),
                    _ => None,
                }
            }
        }
    }

    fn load_state(&self, data: &[u8]) -> bool {
        let mut dispatch = self.dispatch.lock().unwrap();
        let result = match &mut *dispatch {
            ApiDispatch::Vst2(duplex) => duplex
                .writer
                .send(&MainDispatchRequest {
                    instance: self.instance,
                    opcode: Vst2Opcode::SetChunk,
                    index: 0,
                    value: data.len() as i64,
                    arg: OpaqueArg::Bytes(data.to_vec()),
                    opt: 0.0,
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
            ApiDispatch::Vst3(duplex) => duplex
                .writer
                .send(&Vst3Request::SetState {
                    instance: self.instance,
                    data: data.to_vec(),
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
            ApiDispatch::Clap(duplex) => duplex
                .writer
                .send(&ClapRequest::LoadState {
                    instance: self.instance,
                    data: data.to_vec(),
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
        };
        result.is_ok()
    }

    fn get_parameter_list(&self) -> Option<Vec<ParameterInfo>> {
        let mut dispatch = self.dispatch.lock().unwrap();
        match &mut *dispatch {
            // VST2 reports parameters via GetParamName/GetParamLabel called
            // once per index; there is no batched list call in its ABI.
            ApiDispatch::Vst2(_) => None,
            ApiDispatch::Vst3(duplex) => {
                duplex
                    .writer
                    .send(&Vst3Request::GetParameterList {
                        instance: self.instance,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    Vst3Response::ParameterList(list) => Some(list),
                    _ => None,
                }
            }
            ApiDispatch::Clap(duplex) => {
                duplex
                    .writer
                    .send(&ClapRequest::GetParameterList {
                        instance: self.instance,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    ClapResponse::ParameterList(list) => Some(list),
                    _ => None,
                }
            }
        }
    }

    fn get_parameter(&self, param_id: u32) -> Option<f64> {
        let mut dispatch = self.dispatch.lock().unwrap();
        match &mut *dispatch {
            ApiDispatch::Vst2(_) => {
                let parameters = self.parameters.lock().unwrap();
                parameters
                    .writer
                    .send(&ParameterRequest::GetVst2 {
                        instance: self.instance,
                        index: param_id as i32,
                    })
                    .ok()?;
                match parameters.reader.recv().ok()? {
                    ParameterResponse::Value(value) => Some(f64::from(value)),
                    ParameterResponse::Ack => None,
                }
            }
            ApiDispatch::Vst3(duplex) => {
                duplex
                    .writer
                    .send(&Vst3Request::GetParamNormalized {
                        instance: self.instance,
                        param_id,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    Vst3Response::ParamValue(value) => Some(value),
                    _ => None,
                }
            }
            ApiDispatch::Clap(duplex) => {
                duplex
                    .writer
                    .send(&ClapRequest::GetParamValue {
                        instance: self.instance,
                        param_id,
                    })
                    .ok()?;
                match duplex.reader.recv().ok()? {
                    ClapResponse::ParamValue(value) => Some(value),
                    _ => None,
                }
            }
        }
    }

    fn set_parameter_rt(&self, param_id: u32, value: f64) -> bool {
        let mut dispatch = self.dispatch.lock().unwrap();
        let result = match &mut *dispatch {
            ApiDispatch::Vst2(_) => {
                let parameters = self.parameters.lock().unwrap();
                parameters
                    .writer
                    .send(&ParameterRequest::SetVst2 {
                        instance: self.instance,
                        index: param_id as i32,
                        value: value as f32,
                    })
                    .and_then(|()| parameters.reader.recv())
                    .map(|_| ())
            }
            ApiDispatch::Vst3(duplex) => duplex
                .writer
                .send(&Vst3Request::SetParamNormalized {
                    instance: self.instance,
                    param_id,
                    value,
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
            ApiDispatch::Clap(duplex) => duplex
                .writer
                .send(&ClapRequest::SetParamValue {
                    instance: self.instance,
                    param_id,
                    value,
                })
                .and_then(|()| duplex.reader.recv())
                .map(|_| ()),
        };
        result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_instance_id_is_monotonic_and_nonzero() {
        let a = next_instance_id();
        let b = next_instance_id();
        assert!(a > 0);
        assert!(b > a);
    }
}

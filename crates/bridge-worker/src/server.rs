//! Worker process main loop.
//!
//! `run` binds the six-socket set for one instance, performs the control
//! handshake, loads the plugin through whichever ABI loader the handshake
//! named, and then spins up one thread per socket role so unrelated call
//! families never block behind each other - see
//! `bridge_transport::socket_set` for why the six sockets are split the
//! way they are.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use bridge_proto::control::{ControlRequest, ControlResponse};
use bridge_proto::data::{PluginKind, SampleFormat};
use bridge_proto::error::{BridgeError, LoadStage, Result};
use bridge_proto::events::{InstanceId, MidiEvent};
use bridge_proto::wire::is_peer_closed;
use bridge_transport::arbiter::{GuiThreadHandle, Watchdog};
use bridge_transport::realtime::RealtimeTarget;
use bridge_transport::{Duplex, SharedAudioBuffer, SocketSetListener};

use crate::instance::LoadedPlugin;

#[cfg(feature = "vst2")]
use crate::vst2_loader::Vst2Instance;

#[cfg(feature = "vst3")]
use crate::vst3_loader::Vst3Instance;

#[cfg(feature = "clap")]
use crate::clap_loader::ClapInstance;

/// Block size the VST2 loader initializes the plugin with before the host
/// has negotiated a real one via `ControlRequest::Activate`. A real value
/// follows as soon as the host calls `effSetBlockSize` over main-dispatch;
/// this one only has to be non-zero and plausible.
const INITIAL_VST2_BLOCK_SIZE: usize = 4096;

/// Binds the socket set for `instance`, loads the plugin the control
/// handshake names, and runs the per-socket dispatch threads until the
/// host asks for shutdown or every socket's peer goes away.
pub fn run(socket_dir: &Path, instance: InstanceId) -> Result<()> {
    let listener = SocketSetListener::bind(socket_dir, instance)?;
    let mut sockets = listener.accept_all()?;
    info!(instance, "accepted all six sockets");

    let control: Duplex<ControlResponse, ControlRequest> = Duplex::from_stream(sockets.control())?;

    let (plugin_path, plugin_kind, sample_rate, parent_pid) = match control.reader.recv()? {
        ControlRequest::Handshake {
            plugin_path,
            plugin_kind,
            sample_rate,
            parent_pid,
            ..
        } => (plugin_path, plugin_kind, sample_rate, parent_pid),
        other => {
            let message = format!("expected Handshake, got {other:?}");
            let _ = control.writer.send(&ControlResponse::Error { message: message.clone() });
            return Err(BridgeError::ProtocolError(message));
        }
    };

    // spec.md §4.5/§4.8: if the native-side process that spawned us is gone,
    // there is nobody left to answer any of the six sockets, so exit rather
    // than block forever inside a handler thread's blocking read/write.
    let parent_watchdog = Watchdog::spawn(parent_pid, Duration::from_millis(250));
    std::thread::Builder::new()
        .name("parent-watchdog".to_string())
        .spawn(move || loop {
            if parent_watchdog.has_crashed() {
                warn!(parent_pid, "native-side host process is gone, exiting worker");
                std::process::exit(0);
            }
            std::thread::sleep(Duration::from_millis(250));
        })
        .expect("failed to spawn parent watchdog thread");

    let host_callback_stream = sockets.host_callback();

    // Created before the plugin loads (rather than alongside the other
    // per-socket threads below) so the VST3/CLAP loaders can stash a clone
    // and spawn their own `embed::IdleTimer` once an editor opens - neither
    // ABI has an explicit host-driven idle opcode the way VST2's
    // `effEditIdle` is, so the editor sandwich has to tick itself.
    let gui = Arc::new(GuiThreadHandle::spawn());

    let plugin = match plugin_kind {
        #[cfg(feature = "vst2")]
        PluginKind::Vst2 => {
            let host_callback = Arc::new(Duplex::from_stream(host_callback_stream)?);
            Vst2Instance::load(&plugin_path, sample_rate, INITIAL_VST2_BLOCK_SIZE, host_callback)
                .map(LoadedPlugin::Vst2)
        }
        #[cfg(feature = "vst3")]
        PluginKind::Vst3 => {
            drop(host_callback_stream);
            Vst3Instance::load(&plugin_path, sample_rate as f32, Arc::clone(&gui)).map(LoadedPlugin::Vst3)
        }
        #[cfg(feature = "clap")]
        PluginKind::Clap => {
            drop(host_callback_stream);
            ClapInstance::load(&plugin_path, Arc::clone(&gui)).map(LoadedPlugin::Clap)
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(BridgeError::LoadFailed {
                path: plugin_path,
                stage: LoadStage::Opening,
                reason: format!("worker was not built with {other} support"),
            })
        }
    };

    let plugin = match plugin {
        Ok(plugin) => plugin,
        Err(err) => {
            let _ = control.writer.send(&ControlResponse::Error { message: err.to_string() });
            return Err(err);
        }
    };

    let metadata = plugin.metadata().clone();
    control.writer.send(&ControlResponse::Ready {
        metadata: Box::new(metadata.clone()),
    })?;
    info!(instance, plugin = %metadata.name, kind = %plugin_kind, "plugin loaded");

    let plugin = Arc::new(Mutex::new(plugin));

    let (num_inputs, num_outputs, max_frames, shm_name) = match control.reader.recv()? {
        ControlRequest::Activate {
            num_inputs,
            num_outputs,
            max_frames,
            format,
            ..
        } => {
            if format != SampleFormat::Float32 {
                let message = "worker only supports Float32 shared audio buffers".to_string();
                control.writer.send(&ControlResponse::Error { message: message.clone() })?;
                return Err(BridgeError::ProtocolError(message));
            }
            (
                num_inputs as usize,
                num_outputs as usize,
                max_frames as usize,
                format!("winplug-bridge-{instance}"),
            )
        }
        other => {
            let message = format!("expected Activate, got {other:?}");
            control.writer.send(&ControlResponse::Error { message: message.clone() })?;
            return Err(BridgeError::ProtocolError(message));
        }
    };

    let sample_size = std::mem::size_of::<f32>();
    let input_buffer = SharedAudioBuffer::create_with_format(
        format!("{shm_name}.in"),
        num_inputs.max(1),
        max_frames,
        SampleFormat::Float32,
    )?;
    let output_buffer = SharedAudioBuffer::create_with_format(
        format!("{shm_name}.out"),
        num_outputs.max(1),
        max_frames,
        SampleFormat::Float32,
    )?;

    control.writer.send(&ControlResponse::BufferGeometry {
        shm_name,
        channel_stride_bytes: max_frames * sample_size,
    })?;

    let pending_midi: Arc<Mutex<Vec<MidiEvent>>> = Arc::new(Mutex::new(Vec::new()));

    let mut threads = Vec::new();

    match plugin_kind {
        #[cfg(feature = "vst2")]
        PluginKind::Vst2 => {
            let main_dispatch = Duplex::from_stream(sockets.main_dispatch())?;
            let dispatch_plugin = Arc::clone(&plugin);
            let dispatch_gui = Arc::clone(&gui);
            threads.push(std::thread::spawn(move || {
                run_vst2_main_dispatch(main_dispatch, dispatch_plugin, dispatch_gui)
            }));

            let event_dispatch = Duplex::from_stream(sockets.event_dispatch())?;
            let event_pending_midi = Arc::clone(&pending_midi);
            threads.push(std::thread::spawn(move || {
                run_vst2_event_dispatch(event_dispatch, event_pending_midi)
            }));

            let parameters = Duplex::from_stream(sockets.parameters())?;
            let parameters_plugin = Arc::clone(&plugin);
            threads.push(std::thread::spawn(move || run_vst2_parameters(parameters, parameters_plugin)));
        }
        #[cfg(feature = "vst3")]
        PluginKind::Vst3 => {
            let main_dispatch = Duplex::from_stream(sockets.main_dispatch())?;
            let dispatch_plugin = Arc::clone(&plugin);
            let dispatch_gui = Arc::clone(&gui);
            threads.push(std::thread::spawn(move || {
                run_vst3_main_dispatch(main_dispatch, dispatch_plugin, dispatch_gui)
            }));
            // VST3 funnels MIDI and parameter automation through
            // `Vst3Request::QueueAutomation` on main-dispatch instead -
            // these two sockets are still accepted/connected (the fixed
            // six-socket order demands it) but never read.
            drop(sockets.event_dispatch());
            drop(sockets.parameters());
        }
        #[cfg(feature = "clap")]
        PluginKind::Clap => {
            let main_dispatch = Duplex::from_stream(sockets.main_dispatch())?;
            let dispatch_plugin = Arc::clone(&plugin);
            let dispatch_gui = Arc::clone(&gui);
            threads.push(std::thread::spawn(move || {
                run_clap_main_dispatch(main_dispatch, dispatch_plugin, dispatch_gui)
            }));
            drop(sockets.event_dispatch());
            drop(sockets.parameters());
        }
        #[allow(unreachable_patterns)]
        _ => unreachable!("plugin load above already rejected unsupported ABIs"),
    }

    let audio_duplex = Duplex::from_stream(sockets.audio())?;
    let audio_plugin = Arc::clone(&plugin);
    let audio_pending_midi = Arc::clone(&pending_midi);
    threads.push(std::thread::spawn(move || {
        run_audio_loop(
            audio_duplex,
            audio_plugin,
            audio_pending_midi,
            num_inputs,
            num_outputs,
            max_frames,
            input_buffer,
            output_buffer,
            sample_rate as f32,
            plugin_kind,
        )
    }));

    loop {
        match control.reader.recv() {
            Ok(ControlRequest::Shutdown { .. }) => {
                let _ = control.writer.send(&ControlResponse::ShuttingDown);
                info!(instance, "shutdown requested, exiting");
                return Ok(());
            }
            Ok(other) => {
                let message = format!("unexpected control request after setup: {other:?}");
                let _ = control.writer.send(&ControlResponse::Error { message });
            }
            Err(err) => {
                if !is_peer_closed(&err) {
                    warn!(instance, ?err, "control socket read failed");
                }
                return Ok(());
            }
        }
    }
}

#[cfg(feature = "vst2")]
fn run_vst2_main_dispatch(
    duplex: Duplex<bridge_proto::vst2::MainDispatchResponse, bridge_proto::vst2::MainDispatchRequest>,
    plugin: Arc<Mutex<LoadedPlugin>>,
    gui: Arc<GuiThreadHandle>,
) {
    loop {
        let request = match duplex.reader.recv() {
            Ok(request) => request,
            Err(err) => {
                if !is_peer_closed(&err) {
                    warn!(?err, "vst2 main dispatch socket read failed");
                }
                return;
            }
        };
        let plugin = Arc::clone(&plugin);
        let response = gui
            .invoke(move || {
                let mut plugin = plugin.lock().unwrap();
                match &mut *plugin {
                    LoadedPlugin::Vst2(instance) => instance.dispatch(&request),
                    #[allow(unreachable_patterns)]
                    _ => unreachable!("main dispatch socket is typed per negotiated ABI"),
                }
            })
            .unwrap_or(bridge_proto::vst2::MainDispatchResponse {
                result: 0,
                arg_out: bridge_proto::opaque::OpaqueValue::Null,
            });
        if duplex.writer.send(&response).is_err() {
            return;
        }
    }
}

#[cfg(feature = "vst2")]
fn run_vst2_event_dispatch(
    duplex: Duplex<bridge_proto::vst2::EventDispatchResponse, bridge_proto::vst2::EventDispatchRequest>,
    pending_midi: Arc<Mutex<Vec<MidiEvent>>>,
) {
    loop {
        let request = match duplex.reader.recv() {
            Ok(request) => request,
            Err(err) => {
                if !is_peer_closed(&err) {
                    warn!(?err, "event dispatch socket read failed");
                }
                return;
            }
        };
        pending_midi.lock().unwrap().extend(request.events);
        if duplex.writer.send(&bridge_proto::vst2::EventDispatchResponse).is_err() {
            return;
        }
    }
}

#[cfg(feature = "vst2")]
fn run_vst2_parameters(
    duplex: Duplex<bridge_proto::parameters::ParameterResponse, bridge_proto::parameters::ParameterRequest>,
    plugin: Arc<Mutex<LoadedPlugin>>,
) {
    use bridge_proto::parameters::{ParameterRequest, ParameterResponse};

    loop {
        let request = match duplex.reader.recv() {
            Ok(request) => request,
            Err(err) => {
                if !is_peer_closed(&err) {
                    warn!(?err, "parameters socket read failed");
                }
                return;
            }
        };
        let response = {
            let mut plugin = plugin.lock().unwrap();
            let LoadedPlugin::Vst2(instance) = &mut *plugin else {
                unreachable!("parameters socket only carries traffic for vst2 instances")
            };
            match request {
                ParameterRequest::GetVst2 { index, .. } => ParameterResponse::Value(instance.get_parameter(index)),
                ParameterRequest::SetVst2 { index, value, .. } => {
                    instance.set_parameter(index, value);
                    ParameterResponse::Ack
                }
            }
        };
        if duplex.writer.send(&response).is_err() {
            return;
        }
    }
}

#[cfg(feature = "vst3")]
fn run_vst3_main_dispatch(
    duplex: Duplex<bridge_proto::vst3::Vst3Response, bridge_proto::vst3::Vst3Request>,
    plugin: Arc<Mutex<LoadedPlugin>>,
    gui: Arc<GuiThreadHandle>,
) {
    loop {
        let request = match duplex.reader.recv() {
            Ok(request) => request,
            Err(err) => {
                if !is_peer_closed(&err) {
                    warn!(?err, "vst3 main dispatch socket read failed");
                }
                return;
            }
        };
        let plugin = Arc::clone(&plugin);
        let response = gui
            .invoke(move || {
                let mut plugin = plugin.lock().unwrap();
                match &mut *plugin {
                    LoadedPlugin::Vst3(instance) => instance.handle(&request),
                    #[allow(unreachable_patterns)]
                    _ => unreachable!("main dispatch socket is typed per negotiated ABI"),
                }
            })
            .unwrap_or_else(|_| bridge_proto::vst3::Vst3Response::Error("worker gui thread unavailable".into()));
        if duplex.writer.send(&response).is_err() {
            return;
        }
    }
}

#[cfg(feature = "clap")]
fn run_clap_main_dispatch(
    duplex: Duplex<bridge_proto::clap::ClapResponse, bridge_proto::clap::ClapRequest>,
    plugin: Arc<Mutex<LoadedPlugin>>,
    gui: Arc<GuiThreadHandle>,
) {
    loop {
        let request = match duplex.reader.recv() {
            Ok(request) => request,
            Err(err) => {
                if !is_peer_closed(&err) {
                    warn!(?err, "clap main dispatch socket read failed");
                }
                return;
            }
        };
        let plugin = Arc::clone(&plugin);
        let response = gui
            .invoke(move || {
                let mut plugin = plugin.lock().unwrap();
                match &mut *plugin {
                    LoadedPlugin::Clap(instance) => instance.handle(&request),
                    #[allow(unreachable_patterns)]
                    _ => unreachable!("main dispatch socket is typed per negotiated ABI"),
                }
            })
            .unwrap_or_else(|_| bridge_proto::clap::ClapResponse::Error("worker gui thread unavailable".into()));
        if duplex.writer.send(&response).is_err() {
            return;
        }
    }
}

/// RT audio loop. Reads one `ProcessRequest` per block, merges MIDI/
/// automation accumulated from whichever side channel the negotiated ABI
/// uses (event-dispatch's pending queue for VST2, `QueueAutomation` staged
/// on the VST3 instance for VST3 - CLAP's `QueueAutomation` is applied
/// inside `ClapInstance::process` itself via its own `pending_params`),
/// runs the plugin, and writes the result back.
#[allow(clippy::too_many_arguments)]
fn run_audio_loop(
    duplex: Duplex<bridge_proto::audio::ProcessResponse, bridge_proto::audio::ProcessRequest>,
    plugin: Arc<Mutex<LoadedPlugin>>,
    pending_midi: Arc<Mutex<Vec<MidiEvent>>>,
    num_inputs: usize,
    num_outputs: usize,
    max_frames: usize,
    input_buffer: SharedAudioBuffer,
    output_buffer: SharedAudioBuffer,
    sample_rate: f32,
    plugin_kind: PluginKind,
) {
    let realtime = RealtimeTarget::new(0);
    let mut input_scratch: Vec<Vec<f32>> = (0..num_inputs.max(1)).map(|_| vec![0.0; max_frames]).collect();
    let mut output_scratch: Vec<Vec<f32>> = (0..num_outputs.max(1)).map(|_| vec![0.0; max_frames]).collect();

    loop {
        let request = match duplex.reader.recv() {
            Ok(request) => request,
            Err(err) => {
                if !is_peer_closed(&err) {
                    warn!(?err, "audio socket read failed");
                }
                return;
            }
        };

        if let Some(priority) = request.realtime_priority {
            realtime.set(priority);
            realtime.apply_to_current_thread();
        }

        let num_frames = (request.num_frames as usize).min(max_frames);

        for (channel, scratch) in input_scratch.iter_mut().enumerate() {
            if let Err(err) = input_buffer.read_channel_into(channel, &mut scratch[..num_frames]) {
                warn!(?err, channel, "failed to read input channel from shared memory");
            }
        }

        let mut midi_in = request.midi_in.clone();
        if plugin_kind == PluginKind::Vst2 {
            midi_in.append(&mut pending_midi.lock().unwrap());
            midi_in.sort_by_key(|event| event.frame_offset());
        }

        let (midi_out, param_changes_out) = {
            let input_refs: Vec<&[f32]> = input_scratch.iter().map(|v| &v[..num_frames]).collect();
            let mut output_refs: Vec<&mut [f32]> =
                output_scratch.iter_mut().map(|v| &mut v[..num_frames]).collect();

            let mut plugin = plugin.lock().unwrap();
            match &mut *plugin {
                #[cfg(feature = "vst2")]
                LoadedPlugin::Vst2(instance) => {
                    let midi_out = instance.process(&input_refs, &mut output_refs, num_frames, &midi_in);
                    (midi_out, bridge_proto::events::ParameterChanges::new())
                }
                #[cfg(feature = "vst3")]
                LoadedPlugin::Vst3(instance) => {
                    let (queued_midi, queued_params, queued_note_expression) = instance.take_pending_automation();
                    midi_in.extend(queued_midi);

                    let mut params = request.param_changes_in.clone();
                    params.queues.extend(queued_params.queues);
                    let mut note_expression = request.note_expression_in.clone();
                    note_expression.changes.extend(queued_note_expression.changes);

                    let mut buffer = bridge_proto::data::AudioBuffer {
                        inputs: &input_refs,
                        outputs: &mut output_refs,
                        num_samples: num_frames,
                        sample_rate,
                    };
                    let (midi_out, param_changes_out, _note_expression_out) = instance.process_with_automation(
                        &mut buffer,
                        &midi_in,
                        &params,
                        &note_expression,
                        &request.transport,
                    );
                    (midi_out, param_changes_out)
                }
                #[cfg(feature = "clap")]
                LoadedPlugin::Clap(instance) => {
                    let midi_out = instance.process(&input_refs, &mut output_refs, num_frames, &midi_in);
                    (midi_out, bridge_proto::events::ParameterChanges::new())
                }
            }
        };

        for (channel, scratch) in output_scratch.iter().enumerate() {
            if let Err(err) = output_buffer.write_channel(channel, &scratch[..num_frames]) {
                warn!(?err, channel, "failed to write output channel to shared memory");
            }
        }

        let response = bridge_proto::audio::ProcessResponse { midi_out, param_changes_out };
        if duplex.writer.send(&response).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_transport::connect_all;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Exercises the handshake phase of `run` against a real connecting
    /// peer: drives the control socket directly and expects `run` to
    /// surface a load failure (there is no real plugin at the given path)
    /// through its return value rather than panicking or hanging.
    #[test]
    fn run_reports_load_failure_for_a_missing_plugin() {
        let _guard = crate::test_utils::PLUGIN_LOAD_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let socket_dir = dir.path().to_path_buf();
        let instance: InstanceId = 1;

        let worker = {
            let socket_dir = socket_dir.clone();
            thread::spawn(move || run(&socket_dir, instance))
        };

        // bind() creates the socket files synchronously, so a short retry
        // loop is enough to wait out the race against the worker thread
        // rather than a fixed sleep.
        let mut sockets = loop {
            if let Ok(sockets) = connect_all(&socket_dir, instance) {
                break sockets;
            }
            thread::sleep(Duration::from_millis(10));
        };

        let control: Duplex<ControlResponse, ControlRequest> = Duplex::from_stream(sockets.control()).unwrap();
        control
            .writer
            .send(&ControlRequest::Handshake {
                instance,
                plugin_path: dir.path().join("nonexistent.plugin"),
                plugin_kind: default_feature_kind(),
                sample_rate: 44100.0,
                parent_pid: std::process::id(),
            })
            .unwrap();

        match control.reader.recv().unwrap() {
            ControlResponse::Error { .. } => {}
            other => panic!("expected ControlResponse::Error, got {other:?}"),
        }

        let result = worker.join().unwrap();
        assert!(result.is_err());
    }

    #[cfg(feature = "clap")]
    fn default_feature_kind() -> PluginKind {
        PluginKind::Clap
    }

    #[cfg(all(feature = "vst2", not(feature = "clap")))]
    fn default_feature_kind() -> PluginKind {
        PluginKind::Vst2
    }

    #[cfg(all(feature = "vst3", not(feature = "clap"), not(feature = "vst2")))]
    fn default_feature_kind() -> PluginKind {
        PluginKind::Vst3
    }
}

//! VST2 plugin loader: loads a real VST2 binary via the `vst` crate's
//! host-side API and drives it from [`crate::server`]'s per-socket threads.
//!
//! The worker acts as the VST2 host as far as the loaded plugin is
//! concerned - [`BridgeHost`] implements `vst::host::Host` and forwards
//! whatever the plugin calls back into (`audioMasterAutomate`, mostly) onto
//! the host-callback socket so the real, native-side host finds out about
//! it too.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bridge_proto::error::{BridgeError, LoadStage, Result};
use bridge_proto::events::{EventList, MidiEvent, MidiStatus};
use bridge_proto::metadata::ParameterInfo;
use bridge_proto::opaque::{OpaqueArg, OpaqueValue};
use bridge_proto::vst2::{HostCallbackRequest, HostCallbackResponse, MainDispatchRequest, MainDispatchResponse, Vst2Opcode};
use bridge_proto::PluginMetadata;
use bridge_transport::arbiter::MidiOutBuffer;
use bridge_transport::Duplex;

#[cfg(all(feature = "vst2", unix))]
use bridge_editor::embed::{self, Editor as EditorSandwich, EditorConfig, ForeignWindowHandle, ForeignWindowSystem, Size};
#[cfg(all(feature = "vst2", unix))]
use x11rb::protocol::xproto::Window;

#[cfg(feature = "vst2")]
use vst::api;
#[cfg(feature = "vst2")]
use vst::buffer::AudioBuffer as VstBuffer;
#[cfg(feature = "vst2")]
use vst::host::{Host, PluginLoader};
#[cfg(feature = "vst2")]
use vst::plugin::Plugin as VstPlugin;

/// Wraps `Box<dyn Editor>`/`Arc<dyn PluginParameters>` as `Send`. Safety:
/// the worker only ever touches either from the single GUI thread
/// [`bridge_transport::arbiter::GuiThreadHandle`] owns, or (for parameters)
/// from whichever thread currently holds the instance's outer mutex.
#[cfg(feature = "vst2")]
struct SendEditor(Box<dyn vst::editor::Editor>);
#[cfg(feature = "vst2")]
unsafe impl Send for SendEditor {}

/// Adapts a VST2 `Editor` to [`ForeignWindowSystem`]. Holds a raw pointer
/// rather than a borrow because `bridge_editor::embed::Editor` needs to own
/// an `Arc` of this across the sandwich's lifetime, including the
/// deferred-close thread `embed::close_deferred` spawns; soundness relies
/// on `Vst2Instance::dispatch` only ever running on the single GUI thread
/// `bridge-worker`'s server loop funnels all editor calls through (see
/// `bridge_transport::arbiter::GuiThreadHandle`), so there's never a second
/// call in flight against the pointee while this is alive.
#[cfg(all(feature = "vst2", unix))]
struct Vst2ForeignWindowSystem {
    editor: *mut SendEditor,
    conn: Arc<x11rb::rust_connection::RustConnection>,
}

#[cfg(all(feature = "vst2", unix))]
unsafe impl Send for Vst2ForeignWindowSystem {}
#[cfg(all(feature = "vst2", unix))]
unsafe impl Sync for Vst2ForeignWindowSystem {}

#[cfg(all(feature = "vst2", unix))]
impl ForeignWindowSystem for Vst2ForeignWindowSystem {
    fn embed(&self, parent_window: Window, _size: Size) -> bridge_editor::Result<ForeignWindowHandle> {
        let editor = unsafe { &mut *self.editor };
        if !editor.0.open(parent_window as *mut std::ffi::c_void) {
            return Err(bridge_editor::EditorError::ForeignWindowSystem(
                "plugin declined to open its editor".into(),
            ));
        }
        let child = embed::wait_for_first_child(&*self.conn, parent_window, Duration::from_millis(500))?;
        Ok(ForeignWindowHandle(child))
    }

    fn post_close(&self, _handle: ForeignWindowHandle) {
        let editor = unsafe { &mut *self.editor };
        editor.0.close();
    }

    fn destroy_now(&self, _handle: ForeignWindowHandle) {}

    fn pump_events(&self) {
        let editor = unsafe { &mut *self.editor };
        editor.0.idle();
    }
}

pub struct Vst2Instance {
    #[cfg(feature = "vst2")]
    instance: vst::host::PluginInstance,
    #[cfg(feature = "vst2")]
    editor: Option<SendEditor>,
    #[cfg(feature = "vst2")]
    params: std::sync::Arc<dyn vst::plugin::PluginParameters>,
    /// Kept alive for as long as the instance: `vst::host::PluginLoader`
    /// only holds a weak reference to it.
    #[cfg(feature = "vst2")]
    #[allow(dead_code)]
    host: Arc<std::sync::Mutex<BridgeHost>>,
    /// The window sandwich for this instance's editor, opened lazily on the
    /// first `EditOpen` and torn down on `EditClose`. `None` whenever the
    /// editor isn't currently on screen.
    #[cfg(all(feature = "vst2", unix))]
    gui_sandwich: Option<EditorSandwich<Vst2ForeignWindowSystem>>,
    metadata: PluginMetadata,
}

#[cfg(feature = "vst2")]
unsafe impl Send for Vst2Instance {}

impl Vst2Instance {
    /// Resolves a macOS `.vst` bundle to its inner mach-o binary; on Linux a
    /// VST2 plugin is just a bare `.so` and this is a no-op.
    #[cfg(feature = "vst2")]
    fn resolve_bundle_path(path: &Path) -> std::path::PathBuf {
        if path.is_dir() && path.extension().and_then(|e| e.to_str()) == Some("vst") {
            let stem = path.file_stem().unwrap_or_default();
            let inner = path.join("Contents").join("MacOS").join(stem);
            if inner.exists() {
                return inner;
            }
        }
        path.to_path_buf()
    }

    #[cfg(feature = "vst2")]
    pub fn load(
        path: &Path,
        sample_rate: f64,
        block_size: usize,
        host_callback: Arc<Duplex<HostCallbackRequest, HostCallbackResponse>>,
    ) -> Result<Self> {
        let resolved = Self::resolve_bundle_path(path);
        let host = Arc::new(std::sync::Mutex::new(BridgeHost::new(host_callback)));

        let mut loader = PluginLoader::load(&resolved, Arc::clone(&host)).map_err(|e| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: format!("failed to load VST2 library: {e:?}"),
        })?;

        let mut instance = loader.instance().map_err(|e| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Instantiation,
            reason: format!("failed to create VST2 instance: {e:?}"),
        })?;

        instance.init();
        instance.set_sample_rate(sample_rate as f32);
        instance.set_block_size(block_size as i64);
        instance.resume();

        let info = instance.get_info();
        // `get_editor()` sets an internal "editor already taken" flag on
        // first call and returns `None` on every call after, so it has to
        // be claimed once, here, and stashed for later rather than
        // re-requested per `EditOpen`.
        let editor = instance.get_editor().map(SendEditor);
        let has_editor = editor.is_some();
        let metadata = PluginMetadata::new(format!("vst2.{:x}", info.unique_id), info.name.clone())
            .vendor(info.vendor.clone())
            .version(info.version.to_string())
            .audio_io(info.inputs as usize, info.outputs as usize)
            .midi(info.midi_inputs > 0 || info.midi_outputs > 0)
            .f64_support(false)
            .editor(has_editor, None)
            .latency(info.initial_delay as usize)
            .kind(bridge_proto::data::PluginKind::Vst2);

        let params = instance.get_parameter_object();

        Ok(Self {
            instance,
            editor,
            params,
            host,
            #[cfg(unix)]
            gui_sandwich: None,
            metadata,
        })
    }

    #[cfg(not(feature = "vst2"))]
    pub fn load(
        path: &Path,
        _sample_rate: f64,
        _block_size: usize,
        _host_callback: Arc<Duplex<HostCallbackRequest, HostCallbackResponse>>,
    ) -> Result<Self> {
        Err(BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: "VST2 support not compiled (enable the 'vst2' feature)".into(),
        })
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// One `effect->dispatcher()` call. `EditOpen`/`EditClose`/`EditIdle`
    /// must only ever be invoked from the caller's GUI thread - see
    /// [`bridge_transport::arbiter::GuiThreadHandle`].
    #[cfg(feature = "vst2")]
    pub fn dispatch(&mut self, req: &MainDispatchRequest) -> MainDispatchResponse {
        match req.opcode {
            Vst2Opcode::Open => {
                self.instance.init();
                ack(0)
            }
            Vst2Opcode::Close => ack(0),
            Vst2Opcode::SetProgram => {
                self.instance.set_program(req.value as i32);
                ack(0)
            }
            Vst2Opcode::GetProgram => ack(0),
            Vst2Opcode::MainsChanged => {
                if req.value != 0 {
                    self.instance.resume();
                } else {
                    self.instance.suspend();
                }
                ack(0)
            }
            Vst2Opcode::SetSampleRate => {
                self.instance.set_sample_rate(req.opt);
                ack(0)
            }
            Vst2Opcode::SetBlockSize => {
                self.instance.set_block_size(req.value);
                ack(0)
            }
            Vst2Opcode::EditGetRect => {
                let Some(editor) = self.editor.as_mut() else {
                    return ack(0);
                };
                let (width, height) = editor.0.size();
                MainDispatchResponse {
                    result: 1,
                    arg_out: OpaqueValue::Rect {
                        x: 0,
                        y: 0,
                        width: width as i16,
                        height: height as i16,
                    },
                }
            }
            #[cfg(unix)]
            Vst2Opcode::EditOpen => {
                if self.editor.is_none() {
                    return ack(0);
                }
                match self.open_editor_sandwich(req.value as Window) {
                    Ok(()) => ack(1),
                    Err(err) => {
                        tracing::warn!(?err, "failed to open the vst2 editor window sandwich");
                        ack(0)
                    }
                }
            }
            #[cfg(not(unix))]
            Vst2Opcode::EditOpen => {
                let Some(editor) = self.editor.as_mut() else {
                    return ack(0);
                };
                let opened = editor.0.open(req.value as *mut std::ffi::c_void);
                ack(opened as i64)
            }
            #[cfg(unix)]
            Vst2Opcode::EditClose => {
                // Dropping the sandwich posts the close message and tears
                // the wrapper window down; see `embed::close_deferred`.
                self.gui_sandwich = None;
                ack(0)
            }
            #[cfg(not(unix))]
            Vst2Opcode::EditClose => {
                if let Some(editor) = self.editor.as_mut() {
                    editor.0.close();
                }
                ack(0)
            }
            Vst2Opcode::EditIdle => {
                #[cfg(unix)]
                if let Some(sandwich) = self.gui_sandwich.as_mut() {
                    let _ = sandwich.handle_x11_events();
                }
                if let Some(editor) = self.editor.as_mut() {
                    editor.0.idle();
                }
                ack(0)
            }
            Vst2Opcode::GetChunk => {
                let data = if let OpaqueArg::WriteBuffer { .. } = &req.arg {
                    if self.instance.get_info().preset_chunks {
                        self.params.get_preset_data()
                    } else {
                        self.serialize_parameters()
                    }
                } else {
                    Vec::new()
                };
                MainDispatchResponse {
                    result: data.len() as i64,
                    arg_out: OpaqueValue::Bytes(data),
                }
            }
            Vst2Opcode::SetChunk => {
                if let OpaqueArg::Bytes(data) = &req.arg {
                    if self.instance.get_info().preset_chunks {
                        self.params.load_preset_data(data);
                    } else {
                        self.deserialize_parameters(data);
                    }
                }
                ack(1)
            }
            Vst2Opcode::GetParamName => string_out(self.params.get_parameter_name(req.index)),
            Vst2Opcode::GetParamLabel => string_out(self.params.get_parameter_label(req.index)),
            Vst2Opcode::GetParamDisplay => string_out(self.params.get_parameter_text(req.index)),
            Vst2Opcode::GetEffectName => string_out(self.metadata.name.clone()),
            Vst2Opcode::GetVendorString => string_out(self.metadata.vendor.clone()),
            Vst2Opcode::GetProductString => string_out(self.metadata.name.clone()),
            Vst2Opcode::CanDo => match &req.arg {
                OpaqueArg::CString(query) => ack(vst2_can_do(query)),
                _ => ack(0),
            },
            Vst2Opcode::GetTailSize => ack(0),
            Vst2Opcode::CanBeAutomated => ack(1),
            Vst2Opcode::StartProcess => {
                self.instance.resume();
                ack(0)
            }
            Vst2Opcode::StopProcess => {
                self.instance.suspend();
                ack(0)
            }
            // The remaining opcodes (GetPlugCategory, GetInputProperties,
            // GetOutputProperties, SetSpeakerArrangement, SetBypass,
            // VendorSpecific, GetMidiKeyName, GetSpeakerArrangement,
            // Identify, String2Parameter, GetProgramName,
            // GetProgramNameIndexed, SetProgramName, Other) aren't load- or
            // automation-critical for a bridged plugin and get a
            // conservative "unhandled" response rather than a bespoke one.
            _ => ack(0),
        }
    }

    #[cfg(not(feature = "vst2"))]
    pub fn dispatch(&mut self, _req: &MainDispatchRequest) -> MainDispatchResponse {
        ack(0)
    }

    /// Opens the window sandwich (see [`bridge_editor::embed`]) and tells
    /// the plugin to embed its editor into the wrapper window it creates.
    /// VST2 has no separate "create then reparent" step - `effEditOpen`
    /// both creates and embeds the plugin's window in one call - so the
    /// wrapper is detected as the first child X11 finds under the wrapper
    /// once that call returns, the same way yabridge detects a Wine
    /// plugin's window after asking it to open.
    #[cfg(all(feature = "vst2", unix))]
    fn open_editor_sandwich(&mut self, parent_window: Window) -> bridge_editor::Result<()> {
        self.gui_sandwich = None;

        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| bridge_editor::EditorError::Connection(e.to_string()))?;
        let conn = Arc::new(conn);

        let editor_ptr: *mut SendEditor = self
            .editor
            .as_mut()
            .expect("checked by the EditOpen dispatch arm before calling this")
            as *mut SendEditor;
        let foreign = Arc::new(Vst2ForeignWindowSystem {
            editor: editor_ptr,
            conn: Arc::clone(&conn),
        });

        let sandwich = EditorSandwich::open(conn, screen_num, EditorConfig::default(), parent_window, foreign, None)?;
        sandwich.show()?;
        self.gui_sandwich = Some(sandwich);
        Ok(())
    }

    #[cfg(feature = "vst2")]
    fn serialize_parameters(&self) -> Vec<u8> {
        let count = self.instance.get_info().parameters;
        let mut out = Vec::with_capacity(4 + count as usize * 4);
        out.extend_from_slice(&count.to_le_bytes());
        for i in 0..count {
            out.extend_from_slice(&self.params.get_parameter(i).to_le_bytes());
        }
        out
    }

    #[cfg(feature = "vst2")]
    fn deserialize_parameters(&self, data: &[u8]) {
        if data.len() < 4 {
            return;
        }
        let count = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        for i in 0..count {
            let offset = 4 + i as usize * 4;
            let Some(bytes) = data.get(offset..offset + 4) else {
                break;
            };
            let value = f32::from_le_bytes(bytes.try_into().unwrap());
            self.params.set_parameter(i, value.clamp(0.0, 1.0));
        }
    }

    pub fn get_parameter(&self, index: i32) -> f32 {
        #[cfg(feature = "vst2")]
        {
            self.params.get_parameter(index)
        }
        #[cfg(not(feature = "vst2"))]
        {
            let _ = index;
            0.0
        }
    }

    pub fn set_parameter(&self, index: i32, value: f32) {
        #[cfg(feature = "vst2")]
        self.params.set_parameter(index, value);
        #[cfg(not(feature = "vst2"))]
        let _ = (index, value);
    }

    pub fn parameter_list(&self) -> Vec<ParameterInfo> {
        #[cfg(feature = "vst2")]
        {
            let count = self.instance.get_info().parameters;
            (0..count)
                .map(|i| ParameterInfo {
                    id: i as u32,
                    name: self.params.get_parameter_name(i),
                    short_name: String::new(),
                    unit_label: self.params.get_parameter_label(i),
                    default_normalized: self.params.get_parameter(i) as f64,
                    can_automate: true,
                })
                .collect()
        }
        #[cfg(not(feature = "vst2"))]
        Vec::new()
    }

    /// Runs one processing block. Events are fed in first via
    /// `effProcessEvents` on this same call (VST2 has no separate
    /// parameter-automation queue the way VST3/CLAP do), then the audio
    /// itself is processed in place.
    #[cfg(feature = "vst2")]
    pub fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        num_frames: usize,
        midi_in: &EventList,
    ) -> EventList {
        self.send_midi_events(midi_in);

        let input_ptrs: Vec<*const f32> = inputs.iter().map(|ch| ch.as_ptr()).collect();
        let mut output_ptrs: Vec<*mut f32> = outputs.iter_mut().map(|ch| ch.as_mut_ptr()).collect();

        let mut buffer = unsafe {
            VstBuffer::from_raw(
                input_ptrs.len(),
                output_ptrs.len(),
                input_ptrs.as_ptr(),
                output_ptrs.as_mut_ptr(),
                num_frames,
            )
        };
        self.instance.process(&mut buffer);

        self.host.lock().unwrap().take_midi_out()
    }

    #[cfg(not(feature = "vst2"))]
    pub fn process(
        &mut self,
        _inputs: &[&[f32]],
        _outputs: &mut [&mut [f32]],
        _num_frames: usize,
        _midi_in: &EventList,
    ) -> EventList {
        EventList::new()
    }

    #[cfg(feature = "vst2")]
    fn send_midi_events(&mut self, midi_in: &EventList) {
        if midi_in.is_empty() {
            return;
        }
        let mut api_events: Vec<api::MidiEvent> = midi_in.iter().filter_map(midi_to_api_event).collect();
        if api_events.is_empty() {
            return;
        }

        let events_offset = std::mem::offset_of!(api::Events, events);
        let needed = events_offset + api_events.len() * std::mem::size_of::<*mut api::Event>();
        let alloc_size = needed.max(std::mem::size_of::<api::Events>());
        let mut buf = vec![0u64; alloc_size.div_ceil(8)];

        unsafe {
            let base_ptr = buf.as_mut_ptr() as *mut u8;
            let events = &mut *(base_ptr as *mut api::Events);
            events.num_events = api_events.len() as i32;
            events._reserved = 0;
            let slots = base_ptr.add(events_offset) as *mut *mut api::Event;
            for (i, event) in api_events.iter_mut().enumerate() {
                *slots.add(i) = event as *mut api::MidiEvent as *mut api::Event;
            }
            self.instance.process_events(events);
        }
    }
}

#[cfg(feature = "vst2")]
impl Drop for Vst2Instance {
    fn drop(&mut self) {
        // Must drop before `editor`: the sandwich's foreign-window adapter
        // holds a raw pointer into it.
        #[cfg(unix)]
        {
            self.gui_sandwich = None;
        }
        if let Some(editor) = self.editor.as_mut() {
            editor.0.close();
        }
        self.editor = None;
        self.instance.suspend();
    }
}

#[cfg(feature = "vst2")]
fn midi_to_api_event(event: &MidiEvent) -> Option<api::MidiEvent> {
    let MidiEvent::Short {
        frame_offset,
        channel,
        status,
        data1,
        data2,
    } = event
    else {
        return None;
    };

    let status_byte = match status {
        MidiStatus::NoteOff => 0x80,
        MidiStatus::NoteOn => 0x90,
        MidiStatus::PolyPressure => 0xA0,
        MidiStatus::ControlChange => 0xB0,
        MidiStatus::ProgramChange => 0xC0,
        MidiStatus::ChannelPressure => 0xD0,
        MidiStatus::PitchBend => 0xE0,
    } | (channel & 0x0F);

    Some(api::MidiEvent {
        event_type: api::EventType::Midi,
        byte_size: std::mem::size_of::<api::MidiEvent>() as i32,
        delta_frames: *frame_offset,
        flags: api::MidiEventFlags::REALTIME_EVENT.bits(),
        note_length: 0,
        note_offset: 0,
        midi_data: [status_byte, *data1, *data2],
        _midi_reserved: 0,
        detune: 0,
        note_off_velocity: 0,
        _reserved1: 0,
        _reserved2: 0,
    })
}

fn ack(result: i64) -> MainDispatchResponse {
    MainDispatchResponse {
        result,
        arg_out: OpaqueValue::Null,
    }
}

fn string_out(s: String) -> MainDispatchResponse {
    MainDispatchResponse {
        result: 1,
        arg_out: OpaqueValue::CString(s),
    }
}

/// Queries this bridge answers affirmatively for `effCanDo`/`canDo` without
/// needing a round trip: format negotiation the bridge itself handles, not
/// the wrapped plugin.
#[cfg(feature = "vst2")]
fn vst2_can_do(query: &str) -> i64 {
    match query {
        "sendVstEvents" | "sendVstMidiEvent" | "receiveVstEvents" | "receiveVstMidiEvent" => 1,
        _ => 0,
    }
}

/// Stands in as the VST2 host from the loaded plugin's point of view.
/// `audioMaster` calls the plugin makes land here and get forwarded to the
/// real host over the host-callback socket so it can react (e.g. update an
/// automated parameter's on-screen value).
#[cfg(feature = "vst2")]
struct BridgeHost {
    host_callback: Arc<Duplex<HostCallbackRequest, HostCallbackResponse>>,
    midi_out: std::sync::Mutex<MidiOutBuffer>,
}

#[cfg(feature = "vst2")]
impl BridgeHost {
    fn new(host_callback: Arc<Duplex<HostCallbackRequest, HostCallbackResponse>>) -> Self {
        Self {
            host_callback,
            midi_out: std::sync::Mutex::new(MidiOutBuffer::default()),
        }
    }

    fn forward(&self, opcode: bridge_proto::vst2::AudioMasterOpcode, index: i32, value: i64, opt: f32) -> i64 {
        let request = HostCallbackRequest {
            instance: 0,
            opcode,
            index,
            value,
            arg: OpaqueArg::Null,
            opt,
        };
        match self.host_callback.writer.send(&request).and_then(|()| self.host_callback.reader.recv()) {
            Ok(response) => response.result,
            Err(_) => 0,
        }
    }

    /// Drains whatever the plugin pushed through `audioMasterProcessEvents`
    /// during the most recent `process` call, so it can be attached to that
    /// call's `ProcessResponse` (spec.md §4.5, §8 testable property 4).
    fn take_midi_out(&self) -> EventList {
        self.midi_out.lock().unwrap().take()
    }
}

#[cfg(feature = "vst2")]
impl Host for BridgeHost {
    fn automate(&self, index: i32, value: f32) {
        self.forward(bridge_proto::vst2::AudioMasterOpcode::Automate, index, 0, value);
    }

    fn get_plugin_id(&self) -> i32 {
        0x5750_4247 // "WPBG" - this bridge's host id, distinct from any real DAW's.
    }

    fn idle(&self) {}

    fn process_events(&self, events: &api::Events) {
        let mut midi_out = self.midi_out.lock().unwrap();
        for &event in events.events_raw() {
            let event = unsafe { &*event };
            if !matches!(event.event_type, api::EventType::Midi) {
                continue;
            }
            let midi_event: &api::MidiEvent = unsafe { &*(event as *const api::Event as *const api::MidiEvent) };
            if let Some(converted) = api_event_to_midi(midi_event) {
                midi_out.push(converted);
            }
        }
    }

}

/// The reverse of [`midi_to_api_event`]: a raw `audioMasterProcessEvents`
/// event pushed by the plugin, translated back to the bridge's MIDI
/// representation so it can ride `ProcessResponse.midi_out`.
#[cfg(feature = "vst2")]
fn api_event_to_midi(event: &api::MidiEvent) -> Option<MidiEvent> {
    let [status_byte, data1, data2] = event.midi_data;
    let status = match status_byte & 0xF0 {
        0x80 => MidiStatus::NoteOff,
        0x90 => MidiStatus::NoteOn,
        0xA0 => MidiStatus::PolyPressure,
        0xB0 => MidiStatus::ControlChange,
        0xC0 => MidiStatus::ProgramChange,
        0xD0 => MidiStatus::ChannelPressure,
        0xE0 => MidiStatus::PitchBend,
        _ => return None,
    };
    Some(MidiEvent::Short {
        frame_offset: event.delta_frames,
        channel: status_byte & 0x0F,
        status,
        data1,
        data2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_do_recognizes_midi_event_support() {
        #[cfg(feature = "vst2")]
        {
            assert_eq!(vst2_can_do("sendVstMidiEvent"), 1);
            assert_eq!(vst2_can_do("somethingUnknown"), 0);
        }
    }

    #[test]
    fn ack_carries_no_payload() {
        let response = ack(42);
        assert_eq!(response.result, 42);
        assert!(matches!(response.arg_out, OpaqueValue::Null));
    }
}

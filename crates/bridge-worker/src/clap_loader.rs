//! CLAP plugin loader: dlopens the plugin directly and drives its raw
//! `clap_plugin` vtable plus whichever extensions it advertises, using the
//! real `clap-sys` FFI bindings rather than any higher-level wrapper - CLAP
//! doesn't have an established safe host-side crate the way `vst` does for
//! VST2, so this loader owns the raw calls itself, the same way the rest of
//! this workspace's native-side code reaches for `libloading` whenever a
//! plugin ABI has to be dlopen'd directly.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use bridge_proto::clap::{ClapExtension, ClapRequest, ClapResponse};
use bridge_transport::arbiter::MidiOutBuffer;
use bridge_proto::error::{BridgeError, LoadStage, Result};
use bridge_proto::events::{EventList, MidiEvent, MidiStatus};
use bridge_proto::metadata::ParameterInfo;
use bridge_proto::PluginMetadata;

#[cfg(feature = "clap")]
use clap_sys::audio_buffer::clap_audio_buffer;
#[cfg(feature = "clap")]
use clap_sys::entry::clap_plugin_entry;
#[cfg(feature = "clap")]
use clap_sys::events::{
    clap_event_header, clap_event_midi, clap_event_note, clap_event_param_value, clap_input_events,
    clap_output_events, CLAP_CORE_EVENT_SPACE_ID, CLAP_EVENT_MIDI, CLAP_EVENT_NOTE_OFF, CLAP_EVENT_NOTE_ON,
    CLAP_EVENT_PARAM_VALUE,
};
#[cfg(all(feature = "clap", target_os = "macos"))]
use clap_sys::ext::gui::CLAP_WINDOW_API_COCOA;
#[cfg(all(feature = "clap", target_os = "linux"))]
use clap_sys::ext::gui::CLAP_WINDOW_API_X11;
#[cfg(feature = "clap")]
use clap_sys::ext::gui::{clap_plugin_gui, clap_window, clap_window_handle, CLAP_EXT_GUI};
#[cfg(feature = "clap")]
use clap_sys::ext::params::{clap_plugin_params, CLAP_EXT_PARAMS};
#[cfg(feature = "clap")]
use clap_sys::ext::state::{clap_plugin_state, CLAP_EXT_STATE};
#[cfg(feature = "clap")]
use clap_sys::host::clap_host;
#[cfg(feature = "clap")]
use clap_sys::plugin::clap_plugin;
#[cfg(feature = "clap")]
use clap_sys::process::clap_process;
#[cfg(feature = "clap")]
use clap_sys::stream::{clap_istream, clap_ostream};
#[cfg(feature = "clap")]
use clap_sys::version::CLAP_VERSION;

use bridge_transport::arbiter::GuiThreadHandle;
use std::sync::Arc;

#[cfg(all(feature = "clap", target_os = "linux"))]
use bridge_editor::embed::{self, Editor as EditorSandwich, EditorConfig, ForeignWindowHandle, ForeignWindowSystem, IdleTimer, Size};
#[cfg(all(feature = "clap", target_os = "linux"))]
use std::time::Duration;
#[cfg(all(feature = "clap", target_os = "linux"))]
use x11rb::protocol::xproto::Window;

/// Adapts a CLAP plugin's `gui` extension to [`ForeignWindowSystem`].
/// Safety: identical to `vst2_loader::Vst2ForeignWindowSystem` - every call
/// happens on the single worker GUI thread, including the ones the
/// sandwich's deferred-close thread and idle timer make.
#[cfg(all(feature = "clap", target_os = "linux"))]
struct ClapForeignWindowSystem {
    plugin: *const clap_plugin,
    gui: *const clap_plugin_gui,
    conn: Arc<x11rb::rust_connection::RustConnection>,
}

#[cfg(all(feature = "clap", target_os = "linux"))]
unsafe impl Send for ClapForeignWindowSystem {}
#[cfg(all(feature = "clap", target_os = "linux"))]
unsafe impl Sync for ClapForeignWindowSystem {}

#[cfg(all(feature = "clap", target_os = "linux"))]
impl ForeignWindowSystem for ClapForeignWindowSystem {
    fn embed(&self, parent_window: Window, _size: Size) -> bridge_editor::Result<ForeignWindowHandle> {
        let gui = unsafe { &*self.gui };

        if let Some(create_fn) = gui.create {
            let api = c"x11".as_ptr();
            if !unsafe { create_fn(self.plugin, api, false) } {
                return Err(bridge_editor::EditorError::ForeignWindowSystem(
                    "clap_plugin_gui.create returned false".into(),
                ));
            }
        }

        if let Some(set_parent_fn) = gui.set_parent {
            let window = clap_window {
                api: CLAP_WINDOW_API_X11.as_ptr(),
                specific: clap_window_handle { x11: parent_window as u64 },
            };
            if !unsafe { set_parent_fn(self.plugin, &window) } {
                return Err(bridge_editor::EditorError::ForeignWindowSystem(
                    "clap_plugin_gui.set_parent returned false".into(),
                ));
            }
        }

        if let Some(show_fn) = gui.show {
            unsafe { show_fn(self.plugin) };
        }

        let child = embed::wait_for_first_child(&*self.conn, parent_window, Duration::from_millis(500))?;
        Ok(ForeignWindowHandle(child))
    }

    fn post_close(&self, _handle: ForeignWindowHandle) {
        let gui = unsafe { &*self.gui };
        if let Some(hide_fn) = gui.hide {
            unsafe { hide_fn(self.plugin) };
        }
    }

    fn destroy_now(&self, _handle: ForeignWindowHandle) {
        let gui = unsafe { &*self.gui };
        if let Some(destroy_fn) = gui.destroy {
            unsafe { destroy_fn(self.plugin) };
        }
    }

    fn pump_events(&self) {}
}

pub struct ClapInstance {
    #[cfg(feature = "clap")]
    plugin: *const clap_plugin,
    #[cfg(feature = "clap")]
    _library: libloading::Library,
    metadata: PluginMetadata,
    #[cfg(feature = "clap")]
    sample_rate: f64,
    #[cfg(feature = "clap")]
    is_processing: bool,
    #[cfg(feature = "clap")]
    pending_params: Vec<(u32, f64)>,
    /// Window sandwich (`bridge-editor::embed`) for the currently open
    /// editor, `None` whenever no `gui` extension window is attached.
    #[cfg(all(feature = "clap", target_os = "linux"))]
    gui_sandwich: Option<EditorSandwich<ClapForeignWindowSystem>>,
    /// Ticks `gui_sandwich`'s X11 event pump at a fixed rate - CLAP has no
    /// host-driven idle opcode the way VST2's `effEditIdle` is.
    #[cfg(all(feature = "clap", target_os = "linux"))]
    idle_timer: Option<IdleTimer>,
    #[cfg(feature = "clap")]
    gui: Arc<GuiThreadHandle>,
}

// Safety: the worker only ever calls into `plugin` from the single thread
// that owns this instance at a time (the audio thread for `process`, the
// control thread for everything else, serialized by `server`'s dispatch).
#[cfg(feature = "clap")]
unsafe impl Send for ClapInstance {}

impl ClapInstance {
    #[cfg(feature = "clap")]
    pub fn load(path: &Path, gui: Arc<GuiThreadHandle>) -> Result<Self> {
        let library = unsafe {
            libloading::Library::new(path).map_err(|e| BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Opening,
                reason: format!("failed to load library: {e}"),
            })?
        };

        let entry: libloading::Symbol<unsafe extern "C" fn() -> *const clap_plugin_entry> =
            unsafe {
                library.get(b"clap_entry\0").map_err(|e| BridgeError::LoadFailed {
                    path: path.to_path_buf(),
                    stage: LoadStage::Opening,
                    reason: format!("no clap_entry symbol: {e}"),
                })?
            };

        let entry_ptr = unsafe { entry() };
        if entry_ptr.is_null() {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Opening,
                reason: "clap_entry returned null".into(),
            });
        }
        let entry_struct = unsafe { &*entry_ptr };

        let init_fn = entry_struct.init.ok_or_else(|| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: "entry has no init function".into(),
        })?;
        let path_str = path.to_str().ok_or_else(|| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: "plugin path is not valid UTF-8".into(),
        })?;
        let path_cstring = CString::new(path_str).map_err(|_| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: "plugin path contains a null byte".into(),
        })?;
        if !unsafe { init_fn(path_cstring.as_ptr()) } {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Opening,
                reason: "entry init returned false".into(),
            });
        }

        let host = Box::into_raw(Box::new(create_clap_host()));

        let get_factory_fn = entry_struct.get_factory.ok_or_else(|| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Factory,
            reason: "entry has no get_factory function".into(),
        })?;
        let factory_ptr = unsafe { get_factory_fn(clap_sys::factory::plugin_factory::CLAP_PLUGIN_FACTORY_ID.as_ptr()) };
        if factory_ptr.is_null() {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Factory,
                reason: "no plugin factory".into(),
            });
        }
        let factory_typed = factory_ptr as *const clap_sys::factory::plugin_factory::clap_plugin_factory;
        let factory = unsafe { &*factory_typed };

        let get_count_fn = factory.get_plugin_count.ok_or_else(|| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Factory,
            reason: "factory has no get_plugin_count function".into(),
        })?;
        if unsafe { get_count_fn(factory_typed) } == 0 {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Factory,
                reason: "factory reports zero plugins".into(),
            });
        }

        let get_desc_fn = factory.get_plugin_descriptor.ok_or_else(|| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Factory,
            reason: "factory has no get_plugin_descriptor function".into(),
        })?;
        let desc_ptr = unsafe { get_desc_fn(factory_typed, 0) };
        if desc_ptr.is_null() {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Factory,
                reason: "no descriptor for plugin 0".into(),
            });
        }
        let descriptor = unsafe { &*desc_ptr };

        let plugin_id = unsafe { CStr::from_ptr(descriptor.id) }.to_string_lossy().into_owned();
        let plugin_id_cstr = CString::new(plugin_id.clone()).map_err(|e| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Instantiation,
            reason: format!("plugin id contains a null byte: {e}"),
        })?;

        let create_fn = factory.create_plugin.ok_or_else(|| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Instantiation,
            reason: "factory has no create_plugin function".into(),
        })?;
        let plugin = unsafe { create_fn(factory_typed, host, plugin_id_cstr.as_ptr()) };
        if plugin.is_null() {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Instantiation,
                reason: "create_plugin returned null".into(),
            });
        }

        let plugin_ref = unsafe { &*plugin };
        let plugin_init_fn = plugin_ref.init.ok_or_else(|| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Initialization,
            reason: "plugin has no init function".into(),
        })?;
        if !unsafe { plugin_init_fn(plugin) } {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Initialization,
                reason: "plugin init returned false".into(),
            });
        }

        let name = unsafe { CStr::from_ptr(descriptor.name) }.to_string_lossy().into_owned();
        let vendor = unsafe { CStr::from_ptr(descriptor.vendor) }.to_string_lossy().into_owned();
        let version = unsafe { CStr::from_ptr(descriptor.version) }.to_string_lossy().into_owned();

        let metadata = PluginMetadata::new(format!("clap.{plugin_id}"), name)
            .vendor(vendor)
            .version(version)
            .audio_io(2, 2)
            .f64_support(true)
            .kind(bridge_proto::data::PluginKind::Clap);

        Ok(Self {
            plugin,
            _library: library,
            metadata,
            sample_rate: 44100.0,
            is_processing: false,
            pending_params: Vec::new(),
            #[cfg(target_os = "linux")]
            gui_sandwich: None,
            #[cfg(target_os = "linux")]
            idle_timer: None,
            gui,
        })
    }

    #[cfg(not(feature = "clap"))]
    pub fn load(path: &Path) -> Result<Self> {
        Err(BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: "CLAP support not compiled (enable the 'clap' feature)".into(),
        })
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    #[cfg(feature = "clap")]
    fn get_extension<T>(&self, id: &CStr) -> Option<*const T> {
        let plugin_ref = unsafe { &*self.plugin };
        let get_ext = plugin_ref.get_extension?;
        let ext_ptr = unsafe { get_ext(self.plugin, id.as_ptr()) };
        if ext_ptr.is_null() {
            None
        } else {
            Some(ext_ptr as *const T)
        }
    }

    #[cfg(feature = "clap")]
    fn params_ext(&self) -> Option<&clap_plugin_params> {
        self.get_extension(CLAP_EXT_PARAMS).map(|p| unsafe { &*p })
    }

    #[cfg(feature = "clap")]
    fn state_ext(&self) -> Option<&clap_plugin_state> {
        self.get_extension(CLAP_EXT_STATE).map(|p| unsafe { &*p })
    }

    #[cfg(feature = "clap")]
    fn gui_ext(&self) -> Option<&clap_plugin_gui> {
        self.get_extension(CLAP_EXT_GUI).map(|p| unsafe { &*p })
    }

    pub fn supports(&self, extension: ClapExtension) -> bool {
        #[cfg(feature = "clap")]
        {
            match extension {
                ClapExtension::Params => self.params_ext().is_some(),
                ClapExtension::Gui => self.gui_ext().is_some(),
                ClapExtension::State => self.state_ext().is_some(),
                ClapExtension::NotePorts | ClapExtension::Latency | ClapExtension::Tail => false,
            }
        }
        #[cfg(not(feature = "clap"))]
        {
            let _ = extension;
            false
        }
    }

    #[cfg(feature = "clap")]
    pub fn handle(&mut self, req: &ClapRequest) -> ClapResponse {
        match req {
            ClapRequest::GetParameterList { .. } => ClapResponse::ParameterList(self.parameter_list()),
            ClapRequest::GetParamValue { param_id, .. } => ClapResponse::ParamValue(self.param_value(*param_id)),
            ClapRequest::SetParamValue { param_id, value, .. } => {
                self.pending_params.push((*param_id, *value));
                ClapResponse::Ack
            }
            ClapRequest::Activate {
                sample_rate,
                min_frames,
                max_frames,
                ..
            } => match self.activate(*sample_rate, *min_frames, *max_frames) {
                Ok(()) => ClapResponse::Ack,
                Err(e) => ClapResponse::Error(e.to_string()),
            },
            ClapRequest::Deactivate { .. } => {
                self.deactivate();
                ClapResponse::Ack
            }
            ClapRequest::SetProcessing { processing, .. } => {
                self.set_processing(*processing);
                ClapResponse::Ack
            }
            ClapRequest::SaveState { .. } => match self.save_state() {
                Ok(data) => ClapResponse::StateData(data),
                Err(e) => ClapResponse::Error(e.to_string()),
            },
            ClapRequest::LoadState { data, .. } => match self.load_state(data) {
                Ok(()) => ClapResponse::Ack,
                Err(e) => ClapResponse::Error(e.to_string()),
            },
            ClapRequest::GuiCreate { parent, .. } => match self.open_editor(*parent as *mut std::ffi::c_void) {
                Ok((width, height)) => ClapResponse::GuiSize { width, height },
                Err(e) => ClapResponse::Error(e.to_string()),
            },
            ClapRequest::GuiDestroy { .. } => {
                self.close_editor();
                ClapResponse::Ack
            }
            ClapRequest::GuiGetSize { .. } => match self.gui_size() {
                Some((width, height)) => ClapResponse::GuiSize { width, height },
                None => ClapResponse::Error("plugin has no GUI extension".into()),
            },
            ClapRequest::QueueAutomation { params, midi, .. } => {
                for queue in &params.queues {
                    for point in &queue.points {
                        self.pending_params.push((queue.param_id, point.value));
                    }
                }
                let _ = midi;
                ClapResponse::Ack
            }
        }
    }

    #[cfg(not(feature = "clap"))]
    pub fn handle(&mut self, _req: &ClapRequest) -> ClapResponse {
        ClapResponse::Error("CLAP support not compiled".into())
    }

    #[cfg(feature = "clap")]
    fn activate(&mut self, sample_rate: f64, min_frames: u32, max_frames: u32) -> Result<()> {
        let plugin_ref = unsafe { &*self.plugin };
        let activate_fn = plugin_ref.activate.ok_or_else(|| BridgeError::PluginError {
            stage: LoadStage::Activation,
            code: 0,
        })?;
        if !unsafe { activate_fn(self.plugin, sample_rate, min_frames as u64, max_frames as u64) } {
            return Err(BridgeError::LoadFailed {
                path: PathBuf::new(),
                stage: LoadStage::Activation,
                reason: "clap_plugin.activate returned false".into(),
            });
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    #[cfg(feature = "clap")]
    fn deactivate(&mut self) {
        self.set_processing(false);
        let plugin_ref = unsafe { &*self.plugin };
        if let Some(deactivate_fn) = plugin_ref.deactivate {
            unsafe { deactivate_fn(self.plugin) };
        }
    }

    #[cfg(feature = "clap")]
    fn set_processing(&mut self, processing: bool) {
        let plugin_ref = unsafe { &*self.plugin };
        if processing && !self.is_processing {
            if let Some(start_fn) = plugin_ref.start_processing {
                self.is_processing = unsafe { start_fn(self.plugin) };
            }
        } else if !processing && self.is_processing {
            if let Some(stop_fn) = plugin_ref.stop_processing {
                unsafe { stop_fn(self.plugin) };
            }
            self.is_processing = false;
        }
    }

    pub fn parameter_list(&self) -> Vec<ParameterInfo> {
        #[cfg(feature = "clap")]
        {
            let Some(params) = self.params_ext() else {
                return Vec::new();
            };
            let Some(count_fn) = params.count else {
                return Vec::new();
            };
            let count = unsafe { count_fn(self.plugin) };
            let Some(get_info_fn) = params.get_info else {
                return Vec::new();
            };
            (0..count)
                .filter_map(|index| {
                    let mut info: clap_sys::ext::params::clap_param_info = unsafe { std::mem::zeroed() };
                    if !unsafe { get_info_fn(self.plugin, index, &mut info) } {
                        return None;
                    }
                    let name = unsafe { CStr::from_ptr(info.name.as_ptr()) }.to_string_lossy().into_owned();
                    Some(ParameterInfo {
                        id: info.id,
                        name,
                        short_name: String::new(),
                        unit_label: String::new(),
                        default_normalized: info.default_value,
                        can_automate: info.flags & clap_sys::ext::params::CLAP_PARAM_IS_READONLY == 0,
                    })
                })
                .collect()
        }
        #[cfg(not(feature = "clap"))]
        Vec::new()
    }

    #[cfg(feature = "clap")]
    fn param_value(&self, param_id: u32) -> f64 {
        let Some(params) = self.params_ext() else {
            return 0.0;
        };
        let Some(get_value_fn) = params.get_value else {
            return 0.0;
        };
        let mut value = 0.0;
        if unsafe { get_value_fn(self.plugin, param_id, &mut value) } {
            value
        } else {
            0.0
        }
    }

    #[cfg(feature = "clap")]
    fn save_state(&self) -> Result<Vec<u8>> {
        let Some(state) = self.state_ext() else {
            return Ok(Vec::new());
        };
        let Some(save_fn) = state.save else {
            return Ok(Vec::new());
        };
        let mut buffer = Vec::new();
        let stream = create_output_stream(&mut buffer);
        if unsafe { save_fn(self.plugin, &stream) } {
            Ok(buffer)
        } else {
            Err(BridgeError::StateSaveError("clap_plugin_state.save returned false".into()))
        }
    }

    #[cfg(feature = "clap")]
    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let Some(state) = self.state_ext() else {
            return Err(BridgeError::StateRestoreError("plugin has no state extension".into()));
        };
        let Some(load_fn) = state.load else {
            return Err(BridgeError::StateRestoreError("state extension has no load function".into()));
        };
        let stream = create_input_stream(data);
        if unsafe { load_fn(self.plugin, &stream) } {
            Ok(())
        } else {
            Err(BridgeError::StateRestoreError("clap_plugin_state.load returned false".into()))
        }
    }

    #[cfg(all(feature = "clap", target_os = "linux"))]
    fn open_editor(&mut self, parent: *mut std::ffi::c_void) -> Result<(u32, u32)> {
        let gui_ptr = self
            .get_extension::<clap_plugin_gui>(CLAP_EXT_GUI)
            .ok_or_else(|| BridgeError::EditorError("plugin has no GUI extension".into()))?;

        self.gui_sandwich = None;
        self.idle_timer = None;

        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| bridge_editor::EditorError::Connection(e.to_string()))?;
        let conn = Arc::new(conn);

        let foreign = Arc::new(ClapForeignWindowSystem {
            plugin: self.plugin,
            gui: gui_ptr,
            conn: Arc::clone(&conn),
        });

        let config = EditorConfig::default();
        let sandwich = EditorSandwich::open(conn, screen_num, config, parent as Window, Arc::clone(&foreign), None)?;
        sandwich.show()?;

        let (width, height) = self
            .gui_size()
            .ok_or_else(|| BridgeError::EditorError("could not read GUI size".into()))?;

        let gui_thread = Arc::clone(&self.gui);
        self.idle_timer = Some(IdleTimer::spawn(config.frame_rate_hz, gui_thread, move || foreign.pump_events()));
        self.gui_sandwich = Some(sandwich);

        Ok((width, height))
    }

    #[cfg(all(feature = "clap", not(target_os = "linux")))]
    fn open_editor(&mut self, parent: *mut std::ffi::c_void) -> Result<(u32, u32)> {
        let gui = self
            .gui_ext()
            .ok_or_else(|| BridgeError::EditorError("plugin has no GUI extension".into()))?;

        if let Some(create_fn) = gui.create {
            #[cfg(target_os = "macos")]
            let api = c"cocoa".as_ptr();
            #[cfg(target_os = "windows")]
            let api = c"win32".as_ptr();
            if !unsafe { create_fn(self.plugin, api, false) } {
                return Err(BridgeError::EditorError("clap_plugin_gui.create returned false".into()));
            }
        }

        if let Some(set_parent_fn) = gui.set_parent {
            #[cfg(target_os = "macos")]
            let window = clap_window {
                api: CLAP_WINDOW_API_COCOA.as_ptr(),
                specific: clap_window_handle { cocoa: parent },
            };
            #[cfg(target_os = "windows")]
            let window = clap_window {
                api: c"win32".as_ptr(),
                specific: clap_window_handle { win32: parent },
            };
            if !unsafe { set_parent_fn(self.plugin, &window) } {
                return Err(BridgeError::EditorError("clap_plugin_gui.set_parent returned false".into()));
            }
        }

        let (width, height) = self
            .gui_size()
            .ok_or_else(|| BridgeError::EditorError("could not read GUI size".into()))?;
        if let Some(show_fn) = gui.show {
            unsafe { show_fn(self.plugin) };
        }
        Ok((width, height))
    }

    #[cfg(feature = "clap")]
    fn gui_size(&self) -> Option<(u32, u32)> {
        let gui = self.gui_ext()?;
        let get_size_fn = gui.get_size?;
        let mut width = 0;
        let mut height = 0;
        if unsafe { get_size_fn(self.plugin, &mut width, &mut height) } {
            Some((width, height))
        } else {
            None
        }
    }

    #[cfg(all(feature = "clap", target_os = "linux"))]
    fn close_editor(&mut self) {
        // Dropping the sandwich posts the close message (`hide`) and
        // schedules the deferred `destroy` via `embed::close_deferred`; the
        // idle timer joins its thread first.
        self.idle_timer = None;
        self.gui_sandwich = None;
    }

    #[cfg(all(feature = "clap", not(target_os = "linux")))]
    fn close_editor(&mut self) {
        let Some(gui) = self.gui_ext() else {
            return;
        };
        if let Some(hide_fn) = gui.hide {
            unsafe { hide_fn(self.plugin) };
        }
        if let Some(destroy_fn) = gui.destroy {
            unsafe { destroy_fn(self.plugin) };
        }
    }

    /// Runs one processing block, enqueuing any parameter changes
    /// accumulated since the last call as `CLAP_EVENT_PARAM_VALUE` input
    /// events alongside the MIDI translated from `midi_in`, and returning
    /// whatever MIDI the plugin pushed onto its output event list (spec.md
    /// §4.5/§8 property 4: MIDI the plugin emits during `process` must reach
    /// the host within that same call).
    #[cfg(feature = "clap")]
    pub fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        num_frames: usize,
        midi_in: &EventList,
    ) -> EventList {
        if !self.is_processing {
            self.set_processing(true);
        }

        let events: Vec<ClapInputEvent> = self
            .pending_params
            .drain(..)
            .map(|(param_id, value)| ClapInputEvent::Param { param_id, value })
            .chain(midi_in.iter().filter_map(midi_to_clap_event))
            .collect();
        let input_list = ClapInputEventList::new(events);

        let mut input_ptrs: Vec<*mut f32> = inputs.iter().map(|ch| ch.as_ptr() as *mut f32).collect();
        let mut output_ptrs: Vec<*mut f32> = outputs.iter_mut().map(|ch| ch.as_mut_ptr()).collect();

        let mut audio_in = clap_audio_buffer {
            data32: input_ptrs.as_mut_ptr(),
            data64: ptr::null_mut(),
            channel_count: inputs.len() as u32,
            latency: 0,
            constant_mask: 0,
        };
        let mut audio_out = clap_audio_buffer {
            data32: output_ptrs.as_mut_ptr(),
            data64: ptr::null_mut(),
            channel_count: outputs.len() as u32,
            latency: 0,
            constant_mask: 0,
        };

        let mut output_list = ClapOutputEventList::new();

        let process_data = clap_process {
            steady_time: -1,
            frames_count: num_frames as u32,
            transport: ptr::null(),
            audio_inputs: &mut audio_in,
            audio_outputs: &mut audio_out,
            audio_inputs_count: 1,
            audio_outputs_count: 1,
            in_events: &input_list.list,
            out_events: &mut output_list.list,
        };

        let plugin_ref = unsafe { &*self.plugin };
        if let Some(process_fn) = plugin_ref.process {
            unsafe { process_fn(self.plugin, &process_data) };
        }

        output_list.into_midi_events()
    }

    #[cfg(not(feature = "clap"))]
    pub fn process(
        &mut self,
        _inputs: &[&[f32]],
        _outputs: &mut [&mut [f32]],
        _num_frames: usize,
        _midi_in: &EventList,
    ) -> EventList {
        EventList::new()
    }
}

#[cfg(feature = "clap")]
enum ClapInputEvent {
    Note { header: clap_event_header, key: i16, channel: i16, velocity: f64 },
    Midi { header: clap_event_header, data: [u8; 3] },
    Param { param_id: u32, value: f64 },
}

#[cfg(feature = "clap")]
struct ClapInputEventList {
    list: clap_input_events,
    events: Vec<ClapEventStorage>,
}

#[cfg(feature = "clap")]
enum ClapEventStorage {
    Note(clap_event_note),
    Midi(clap_event_midi),
    Param(clap_event_param_value),
}

#[cfg(feature = "clap")]
impl ClapInputEventList {
    fn new(events: Vec<ClapInputEvent>) -> Self {
        let stored = events
            .into_iter()
            .map(|event| match event {
                ClapInputEvent::Note {
                    header,
                    key,
                    channel,
                    velocity,
                } => ClapEventStorage::Note(clap_event_note {
                    header,
                    note_id: -1,
                    port_index: 0,
                    channel,
                    key,
                    velocity,
                }),
                ClapInputEvent::Midi { header, data } => ClapEventStorage::Midi(clap_event_midi {
                    header,
                    port_index: 0,
                    data,
                }),
                ClapInputEvent::Param { param_id, value } => ClapEventStorage::Param(clap_event_param_value {
                    header: clap_event_header {
                        size: std::mem::size_of::<clap_event_param_value>() as u32,
                        time: 0,
                        space_id: CLAP_CORE_EVENT_SPACE_ID,
                        type_: CLAP_EVENT_PARAM_VALUE,
                        flags: 0,
                    },
                    param_id,
                    cookie: ptr::null_mut(),
                    note_id: -1,
                    port_index: -1,
                    channel: -1,
                    key: -1,
                    value,
                }),
            })
            .collect();
        let list = clap_input_events {
            ctx: ptr::null_mut(),
            size: Some(input_events_size),
            get: Some(input_events_get),
        };
        Self { list, events: stored }
    }
}

#[cfg(feature = "clap")]
unsafe extern "C" fn input_events_size(list: *const clap_input_events) -> u32 {
    let event_list = &*(list as *const ClapInputEventList);
    event_list.events.len() as u32
}

#[cfg(feature = "clap")]
unsafe extern "C" fn input_events_get(list: *const clap_input_events, index: u32) -> *const clap_event_header {
    let event_list = &*(list as *const ClapInputEventList);
    match event_list.events.get(index as usize) {
        Some(ClapEventStorage::Note(e)) => &e.header,
        Some(ClapEventStorage::Midi(e)) => &e.header,
        Some(ClapEventStorage::Param(e)) => &e.header,
        None => ptr::null(),
    }
}

/// Collects whatever the plugin pushes through `clap_output_events::try_push`
/// during a `process` call, so it can be translated to the bridge's MIDI
/// representation and returned to the host before `process` returns
/// (spec.md §4.5, §8 testable property 4). Only the MIDI-relevant event
/// types are kept; note-expression and output parameter changes have no
/// counterpart in `ProcessResponse` and are dropped.
#[cfg(feature = "clap")]
struct ClapOutputEventList {
    list: clap_output_events,
    events: Vec<ClapEventStorage>,
}

#[cfg(feature = "clap")]
impl ClapOutputEventList {
    fn new() -> Self {
        let list = clap_output_events {
            ctx: ptr::null_mut(),
            try_push: Some(output_events_try_push),
        };
        Self { list, events: Vec::new() }
    }

    fn into_midi_events(self) -> EventList {
        let mut buffer = MidiOutBuffer::default();
        for event in self.events.iter().filter_map(clap_event_to_midi) {
            buffer.push(event);
        }
        buffer.take()
    }
}

#[cfg(feature = "clap")]
unsafe extern "C" fn output_events_try_push(
    list: *const clap_output_events,
    event: *const clap_event_header,
) -> bool {
    if list.is_null() || event.is_null() {
        return false;
    }
    let output_list = &mut *(list as *mut ClapOutputEventList);
    let header = &*event;
    match header.type_ {
        CLAP_EVENT_NOTE_ON | CLAP_EVENT_NOTE_OFF => {
            let e = &*(event as *const clap_event_note);
            output_list.events.push(ClapEventStorage::Note(*e));
            true
        }
        CLAP_EVENT_MIDI => {
            let e = &*(event as *const clap_event_midi);
            output_list.events.push(ClapEventStorage::Midi(*e));
            true
        }
        _ => false,
    }
}

#[cfg(feature = "clap")]
fn clap_event_to_midi(event: &ClapEventStorage) -> Option<MidiEvent> {
    match event {
        ClapEventStorage::Note(e) => {
            let status = if e.header.type_ == CLAP_EVENT_NOTE_OFF || e.velocity <= 0.0 {
                MidiStatus::NoteOff
            } else {
                MidiStatus::NoteOn
            };
            Some(MidiEvent::Short {
                frame_offset: e.header.time as i32,
                channel: e.channel.max(0) as u8,
                status,
                data1: e.key.clamp(0, 127) as u8,
                data2: (e.velocity.clamp(0.0, 1.0) * 127.0).round() as u8,
            })
        }
        ClapEventStorage::Midi(e) => {
            let status_nibble = e.data[0] & 0xF0;
            let channel = e.data[0] & 0x0F;
            let status = match status_nibble {
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
                frame_offset: e.header.time as i32,
                channel,
                status,
                data1: e.data[1],
                data2: e.data[2],
            })
        }
        ClapEventStorage::Param(_) => None,
    }
}

#[cfg(feature = "clap")]
fn midi_to_clap_event(event: &MidiEvent) -> Option<ClapInputEvent> {
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

    let header = |event_type| clap_event_header {
        size: std::mem::size_of::<clap_event_note>() as u32,
        time: *frame_offset as u32,
        space_id: CLAP_CORE_EVENT_SPACE_ID,
        type_: event_type,
        flags: 0,
    };

    match status {
        MidiStatus::NoteOn | MidiStatus::NoteOff => Some(ClapInputEvent::Note {
            header: header(CLAP_EVENT_NOTE_ON),
            key: *data1 as i16,
            channel: *channel as i16,
            velocity: *data2 as f64 / 127.0,
        }),
        _ => Some(ClapInputEvent::Midi {
            header: clap_event_header {
                size: std::mem::size_of::<clap_event_midi>() as u32,
                time: *frame_offset as u32,
                space_id: CLAP_CORE_EVENT_SPACE_ID,
                type_: CLAP_EVENT_MIDI,
                flags: 0,
            },
            data: [
                match status {
                    MidiStatus::PolyPressure => 0xA0,
                    MidiStatus::ControlChange => 0xB0,
                    MidiStatus::ProgramChange => 0xC0,
                    MidiStatus::ChannelPressure => 0xD0,
                    MidiStatus::PitchBend => 0xE0,
                    _ => 0x80,
                } | (channel & 0x0F),
                *data1,
                *data2,
            ],
        }),
    }
}

#[cfg(feature = "clap")]
fn create_clap_host() -> clap_host {
    use std::os::raw::c_void;

    unsafe extern "C" fn get_extension(_host: *const clap_host, _extension_id: *const i8) -> *const c_void {
        ptr::null()
    }
    unsafe extern "C" fn request_restart(_host: *const clap_host) {}
    unsafe extern "C" fn request_process(_host: *const clap_host) {}
    unsafe extern "C" fn request_callback(_host: *const clap_host) {}

    clap_host {
        clap_version: CLAP_VERSION,
        host_data: ptr::null_mut(),
        name: c"bridge-worker".as_ptr(),
        vendor: c"".as_ptr(),
        url: c"".as_ptr(),
        version: c"0.1.0".as_ptr(),
        get_extension: Some(get_extension),
        request_restart: Some(request_restart),
        request_process: Some(request_process),
        request_callback: Some(request_callback),
    }
}

#[cfg(feature = "clap")]
fn create_output_stream(buffer: &mut Vec<u8>) -> clap_ostream {
    use std::os::raw::c_void;
    use std::slice;

    unsafe extern "C" fn write(stream: *const clap_ostream, buffer: *const c_void, size: u64) -> i64 {
        let out_buffer = &mut *((*stream).ctx as *mut Vec<u8>);
        let data = slice::from_raw_parts(buffer as *const u8, size as usize);
        out_buffer.extend_from_slice(data);
        size as i64
    }

    clap_ostream {
        ctx: buffer as *mut Vec<u8> as *mut c_void,
        write: Some(write),
    }
}

#[cfg(feature = "clap")]
struct StreamContext<'a> {
    data: &'a [u8],
    position: usize,
}

#[cfg(feature = "clap")]
fn create_input_stream(data: &[u8]) -> clap_istream {
    use std::os::raw::c_void;
    use std::slice;

    unsafe extern "C" fn read(stream: *const clap_istream, buffer: *mut c_void, size: u64) -> i64 {
        let ctx = (*stream).ctx as *mut StreamContext;
        let ctx_ref = &*ctx;
        let remaining = ctx_ref.data.len() - ctx_ref.position;
        let to_read = (size as usize).min(remaining);
        if to_read == 0 {
            return 0;
        }
        let source = &ctx_ref.data[ctx_ref.position..ctx_ref.position + to_read];
        let dest = slice::from_raw_parts_mut(buffer as *mut u8, to_read);
        dest.copy_from_slice(source);
        (*ctx).position += to_read;
        to_read as i64
    }

    // Leaked deliberately: lives exactly as long as the `set_state` call that
    // created it, which is short, and CLAP gives us no teardown hook to free
    // it from.
    let ctx = Box::into_raw(Box::new(StreamContext { data, position: 0 }));
    clap_istream {
        ctx: ctx as *mut c_void,
        read: Some(read),
    }
}

#[cfg(feature = "clap")]
impl Drop for ClapInstance {
    fn drop(&mut self) {
        let plugin_ref = unsafe { &*self.plugin };
        if self.is_processing {
            if let Some(stop_fn) = plugin_ref.stop_processing {
                unsafe { stop_fn(self.plugin) };
            }
        }
        if let Some(deactivate_fn) = plugin_ref.deactivate {
            unsafe { deactivate_fn(self.plugin) };
        }
        if let Some(destroy_fn) = plugin_ref.destroy {
            unsafe { destroy_fn(self.plugin) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_note_on_maps_to_a_clap_note_event() {
        #[cfg(feature = "clap")]
        {
            let event = MidiEvent::Short {
                frame_offset: 12,
                channel: 3,
                status: MidiStatus::NoteOn,
                data1: 60,
                data2: 100,
            };
            match midi_to_clap_event(&event) {
                Some(ClapInputEvent::Note { key, channel, velocity, .. }) => {
                    assert_eq!(key, 60);
                    assert_eq!(channel, 3);
                    assert!((velocity - 100.0 / 127.0).abs() < 1e-6);
                }
                _ => panic!("expected a note event"),
            }
        }
    }
}

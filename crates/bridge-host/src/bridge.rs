//! Native-side trait a loaded plugin instance is driven through.
//!
//! There is exactly one implementation, [`crate::client::PluginClient`],
//! which drives the instance over the six-socket transport in
//! `bridge-transport`. The trait boundary exists so the rest of the host
//! library - `PluginHandle`, the VST2/VST3/CLAP entry-point shims - depends
//! on a small, object-safe surface rather than the client's internals.

use bridge_proto::data::TransportInfo;
use bridge_proto::events::{EventList, NoteExpressionChanges, ParameterChanges};
use bridge_proto::metadata::ParameterInfo;
use bridge_proto::Result;

pub trait PluginBridge: Send + Sync {
    // RT-safe, called from the host's audio thread.
    fn process(
        &self,
        num_samples: usize,
        midi_events: EventList,
        param_changes: ParameterChanges,
        note_expression: NoteExpressionChanges,
        transport: TransportInfo,
    ) -> bool;

    fn write_input_channel(&self, channel: usize, data: &[f32]) -> Result<()>;
    fn read_output_channel_into(&self, channel: usize, output: &mut [f32]) -> Result<usize>;
    fn write_input_channel_f64(&self, channel: usize, data: &[f64]) -> Result<()>;
    fn read_output_channel_into_f64(&self, channel: usize, output: &mut [f64]) -> Result<usize>;

    // Non-RT control surface, called from the host's main/GUI thread.
    fn is_crashed(&self) -> bool;
    fn open_editor(&self, parent_handle: u64) -> Option<(u32, u32)>;
    fn close_editor(&self) -> bool;
    fn editor_idle(&self);
    fn save_state(&self) -> Option<Vec<u8>>;
    fn load_state(&self, data: &[u8]) -> bool;
    fn get_parameter_list(&self) -> Option<Vec<ParameterInfo>>;
    fn get_parameter(&self, param_id: u32) -> Option<f64>;
    fn set_parameter_rt(&self, param_id: u32, value: f64) -> bool;
}

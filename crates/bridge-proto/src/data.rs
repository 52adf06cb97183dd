//! Shared data model: sample formats, transport state, and the audio
//! buffer view used inside the worker process.

use serde::{Deserialize, Serialize};

/// Which of the three plugin ABIs an instance was loaded through.
///
/// Carried on the control socket's handshake so the worker's dispatcher can
/// pick the right loader, and on [`crate::metadata::PluginMetadata`] so the
/// native side can format format-specific diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    Vst2,
    Vst3,
    Clap,
}

impl Default for PluginKind {
    fn default() -> Self {
        PluginKind::Vst2
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Vst2 => write!(f, "VST2"),
            PluginKind::Vst3 => write!(f, "VST3"),
            PluginKind::Clap => write!(f, "CLAP"),
        }
    }
}

/// Audio sample format negotiated between host and worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 32-bit floating point (most common).
    Float32,
    /// 64-bit floating point, used when the plugin advertises
    /// `canDoubleReplacing` / VST3 `kSample64` / CLAP's 64-bit process port.
    Float64,
}

#[allow(clippy::derivable_impls)]
impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::Float32
    }
}

/// Transport and timing information for audio processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransportInfo {
    pub playing: bool,
    pub recording: bool,
    pub cycle_active: bool,
    pub tempo: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    /// Position in samples from project start.
    pub position_samples: i64,
    /// Musical position in quarter notes.
    pub position_quarters: f64,
    /// Last bar start position in quarter notes.
    pub bar_position_quarters: f64,
    pub cycle_start_quarters: f64,
    pub cycle_end_quarters: f64,
}

impl Default for TransportInfo {
    fn default() -> Self {
        Self {
            playing: false,
            recording: false,
            cycle_active: false,
            tempo: 120.0,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
            position_samples: 0,
            position_quarters: 0.0,
            bar_position_quarters: 0.0,
            cycle_start_quarters: 0.0,
            cycle_end_quarters: 0.0,
        }
    }
}

/// Non-owning view over a processing block's audio, generic over sample
/// type so the same worker-side code paths serve the f32 and f64 cases.
///
/// This is constructed over slices into the shared-memory region
/// ([`crate::shared_audio`][crate] in bridge-transport maps the region and
/// hands out these slices); it never owns the samples it points at.
pub struct AudioBuffer<'a, T = f32> {
    pub inputs: &'a [&'a [T]],
    pub outputs: &'a mut [&'a mut [T]],
    pub num_samples: usize,
    pub sample_rate: f32,
}

pub type AudioBuffer32<'a> = AudioBuffer<'a, f32>;
pub type AudioBuffer64<'a> = AudioBuffer<'a, f64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_format_defaults_to_f32() {
        assert_eq!(SampleFormat::default(), SampleFormat::Float32);
    }

    #[test]
    fn plugin_kind_displays_its_acronym() {
        assert_eq!(PluginKind::Vst3.to_string(), "VST3");
        assert_eq!(PluginKind::Clap.to_string(), "CLAP");
    }

    #[test]
    fn transport_info_round_trips_through_bincode() {
        let info = TransportInfo {
            playing: true,
            tempo: 128.0,
            ..Default::default()
        };
        let encoded = bincode::serialize(&info).unwrap();
        let decoded: TransportInfo = bincode::deserialize(&encoded).unwrap();
        assert!(decoded.playing);
        assert_eq!(decoded.tempo, 128.0);
    }
}

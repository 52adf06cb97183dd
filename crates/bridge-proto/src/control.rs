//! Handshake and lifecycle messages carried on the control socket, plus the
//! configuration shared by both sides of the bridge.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::{PluginKind, SampleFormat};
use crate::events::InstanceId;

/// Whether a worker process hosts exactly one plugin instance, or several
/// instances that share one process (and therefore one realtime-priority
/// thread group and one set of native-library handles per plugin path).
///
/// Group mode trades isolation (one crashing instance can take its
/// siblings down with it) for lower per-instance overhead; the native side
/// decides which to use per plugin path and records it so a later instance
/// of the same plugin can find the same worker via the rendezvous socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Individual,
    Group,
}

/// Configuration shared by the host library and the worker binary it
/// spawns. Constructed on the native side and sent as part of the initial
/// handshake rather than re-derived independently by the worker, so both
/// processes always agree on socket paths and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Directory the six per-instance Unix sockets are created in.
    pub socket_dir: PathBuf,
    /// Prefix applied to the POSIX shared-memory object name.
    pub shm_prefix: String,
    /// Largest block size (in frames) the shared audio buffer is sized for;
    /// renegotiated via [`ControlRequest::Activate`] if a host requests
    /// more.
    pub max_block_size: usize,
    /// How long the native side waits for the worker to complete the
    /// handshake before declaring the spawn a failure.
    pub handshake_timeout: Duration,
    pub preferred_format: SampleFormat,
    pub lifecycle: Lifecycle,
    /// Group rendezvous key: (group name, ABI, effective user), used to
    /// find or create the shared worker process when `lifecycle` is
    /// [`Lifecycle::Group`].
    pub group_key: Option<(String, PluginKind, String)>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir().join("winplug-bridge"),
            shm_prefix: "winplug-bridge-".to_string(),
            max_block_size: 8192,
            handshake_timeout: Duration::from_secs(10),
            preferred_format: SampleFormat::Float32,
            lifecycle: Lifecycle::Individual,
            group_key: None,
        }
    }
}

/// The first message sent over the control socket once all six sockets
/// have connected, establishing which plugin to load and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    Handshake {
        instance: InstanceId,
        plugin_path: PathBuf,
        plugin_kind: PluginKind,
        sample_rate: f64,
        /// The native-side process's pid, so the worker's own watchdog
        /// (spec.md §4.5/§4.8) can detect an orphaning host and terminate
        /// instead of waiting forever on a peer that is never coming back.
        parent_pid: u32,
    },
    /// Renegotiate the shared audio buffer geometry, issued whenever the
    /// host calls `setBlockSize`/`IAudioProcessor::setupProcessing`/
    /// `clap_plugin.activate` with a different frame count than last time.
    Activate {
        instance: InstanceId,
        num_inputs: u16,
        num_outputs: u16,
        max_frames: u32,
        format: SampleFormat,
    },
    Shutdown { instance: InstanceId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    Ready {
        metadata: Box<crate::metadata::PluginMetadata>,
    },
    /// The shared-memory segment name and per-channel byte stride the host
    /// should map, now that [`ControlRequest::Activate`] negotiated a
    /// geometry.
    BufferGeometry {
        shm_name: String,
        channel_stride_bytes: usize,
    },
    Error {
        message: String,
    },
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_individual_lifecycle() {
        let config = BridgeConfig::default();
        assert_eq!(config.lifecycle, Lifecycle::Individual);
        assert_eq!(config.max_block_size, 8192);
        assert!(config.group_key.is_none());
    }

    #[test]
    fn handshake_round_trips_through_bincode() {
        let req = ControlRequest::Handshake {
            instance: 1,
            plugin_path: PathBuf::from("/opt/plugins/Reverb.vst3"),
            plugin_kind: PluginKind::Vst3,
            sample_rate: 48000.0,
            parent_pid: std::process::id(),
        };
        let encoded = bincode::serialize(&req).unwrap();
        let decoded: ControlRequest = bincode::deserialize(&encoded).unwrap();
        match decoded {
            ControlRequest::Handshake {
                plugin_kind,
                sample_rate,
                ..
            } => {
                assert_eq!(plugin_kind, PluginKind::Vst3);
                assert_eq!(sample_rate, 48000.0);
            }
            _ => panic!("wrong variant"),
        }
    }
}

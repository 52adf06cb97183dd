//! The one loaded plugin this worker process hosts.
//!
//! Each ABI's loader (`vst2_loader`, `vst3_loader`, `clap_loader`) exposes
//! its own request/response wire types and its own dispatch method name -
//! `Vst2Instance::dispatch`, `Vst3Instance::handle`, `ClapInstance::handle` -
//! rather than a shared trait, because the three ABIs really don't agree on
//! what a "dispatch call" looks like (VST2's single opcode dispatcher vs.
//! VST3/CLAP's typed per-interface methods). [`LoadedPlugin`] is just the
//! enum that remembers which one this worker loaded, mirroring
//! `bridge-host::client`'s `ApiDispatch` on the other end of the socket set.

use bridge_proto::PluginMetadata;

#[cfg(feature = "vst2")]
use crate::vst2_loader::Vst2Instance;
#[cfg(feature = "vst3")]
use crate::vst3_loader::Vst3Instance;
#[cfg(feature = "clap")]
use crate::clap_loader::ClapInstance;

pub enum LoadedPlugin {
    #[cfg(feature = "vst2")]
    Vst2(Vst2Instance),
    #[cfg(feature = "vst3")]
    Vst3(Vst3Instance),
    #[cfg(feature = "clap")]
    Clap(ClapInstance),
}

impl LoadedPlugin {
    pub fn metadata(&self) -> &PluginMetadata {
        match self {
            #[cfg(feature = "vst2")]
            LoadedPlugin::Vst2(instance) => instance.metadata(),
            #[cfg(feature = "vst3")]
            LoadedPlugin::Vst3(instance) => instance.metadata(),
            #[cfg(feature = "clap")]
            LoadedPlugin::Clap(instance) => instance.metadata(),
        }
    }
}

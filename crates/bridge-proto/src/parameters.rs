//! Messages carried on the parameters socket.
//!
//! VST3 and CLAP expose parameter access as just another typed method on
//! their already-typed dispatch enums ([`crate::vst3::Vst3Request`],
//! [`crate::clap::ClapRequest`]), so this socket goes unused for them - it
//! still gets accepted and connected like every other role, since the
//! fixed six-socket order is what lets both sides identify a socket without
//! a handshake. VST2 is different: `AEffect::getParameter`/`setParameter`
//! are separate C function pointers, not dispatcher opcodes, and a host
//! calls them once per automated parameter per block. Routing them through
//! `main_dispatch` would serialize hot-path automation behind whatever
//! editor or configuration call happens to be in flight there, so VST2
//! gets its own lightweight request/response pair here instead.

use serde::{Deserialize, Serialize};

use crate::events::InstanceId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ParameterRequest {
    GetVst2 { instance: InstanceId, index: i32 },
    SetVst2 { instance: InstanceId, index: i32, value: f32 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ParameterResponse {
    Value(f32),
    Ack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_vst2_round_trips_through_bincode() {
        let req = ParameterRequest::GetVst2 { instance: 1, index: 3 };
        let encoded = bincode::serialize(&req).unwrap();
        let decoded: ParameterRequest = bincode::deserialize(&encoded).unwrap();
        match decoded {
            ParameterRequest::GetVst2 { index, .. } => assert_eq!(index, 3),
            _ => panic!("wrong variant"),
        }
    }
}

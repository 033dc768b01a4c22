//! Flow configuration repository: owns every flow definition on a test
//! port and rebuilds the derived playback state whenever one changes.

mod attack;

use crate::config::FlowSource;
use crate::structs::*;
use std::collections::HashMap;

pub struct FlowEngine {
    flows: HashMap<FlowHandle, FlowConfig>,
}

impl FlowEngine {
    pub fn new() -> Self {
        FlowEngine {
            flows: HashMap::new(),
        }
    }

    /// Create or replace the flow stored under `handle`. The previous
    /// definition, if any, is discarded wholesale; loop links and attack
    /// play sequences are rebuilt from scratch on every call.
    pub fn update_flow(&mut self, handle: FlowHandle, source: &dyn FlowSource) {
        let cfg = self.flows.entry(handle).or_default();
        source.copy_to(cfg);
        link_loops(cfg);
        if cfg.play_type == PlayType::Attack {
            attack::build_attack_streams(cfg);
        }
        log::debug!(
            "flow {handle} updated: {} packets, {} loops, {} play",
            cfg.pkt_list.len(),
            cfg.loop_map.len(),
            cfg.play_type
        );
    }

    /// Read-only view of a flow; `None` for handles never updated (or
    /// already deleted). Callers must not hold the reference across a
    /// later update of the same handle.
    pub fn get_flow(&self, handle: FlowHandle) -> Option<&FlowConfig> {
        self.flows.get(&handle)
    }

    /// Remove a flow. Deleting a handle that is not present is a contract
    /// violation: callers only ever delete flows they created.
    pub fn delete_flow(&mut self, handle: FlowHandle) {
        if self.flows.remove(&handle).is_none() {
            panic!("delete of unknown flow handle {handle}");
        }
        log::debug!("flow {handle} deleted");
    }
}

impl Default for FlowEngine {
    fn default() -> Self {
        FlowEngine::new()
    }
}

/// Attach each loop-map entry to the packet that terminates it, clearing
/// every stale link first. Idempotent; runs on every update, before any
/// attack derivation.
pub(crate) fn link_loops(cfg: &mut FlowConfig) {
    for pkt in cfg.pkt_list.iter_mut() {
        pkt.loop_key = None;
    }
    let ends: Vec<u16> = cfg.loop_map.keys().copied().collect();
    for end in ends {
        cfg.pkt_list[usize::from(end)].loop_key = Some(end);
    }
}

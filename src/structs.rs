use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// Opaque identifier of a flow definition, unique per test port.
pub type FlowHandle = u32;

// Flow script structures

/// How a flow's script is played back: turn-taking per the scripted
/// delays, or per-direction attack replay as fast as possible.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayType {
    #[default]
    Stream,
    Attack,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    #[default]
    Tcp,
    Udp,
}

/// Which side tears the connection down, and how.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloseType {
    #[default]
    ClientFin,
    ClientRst,
    ServerFin,
    ServerRst,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl Display for PlayType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayType::Stream => write!(f, "stream"),
            PlayType::Attack => write!(f, "attack"),
        }
    }
}

/// One repeated sub-range of a flow's packet sequence, keyed in the
/// owning `loop_map` by the index of the packet that ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopInfo {
    pub beg_idx: u16,
    pub count: u16, // total passes over the span; 1 means no repetition
}

/// A location in the packet script where a variable's value is spliced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarTarget {
    pub pkt_idx: u16,
    pub byte_idx: u32,
}

/// A named value substituted into one or more packets at play time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: Vec<u8>,
    pub targets: Vec<VarTarget>,
    pub fixed_len: bool,
    pub endian: Endian,
}

/// One element of a flow's ordered script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pkt_delay_msec: u32,
    pub client_tx: bool, // client-originated, as opposed to server-originated
    // byte offset -> indices into the flow's variable list; may be
    // non-empty even when data is empty
    pub var_map: BTreeMap<u32, Vec<u16>>,
    // key into the owning flow's loop_map, set only by loop linking
    pub loop_key: Option<u16>,
}

impl Packet {
    /// Blank packets carry no payload and no variables; attack play skips them.
    pub fn is_blank(&self) -> bool {
        self.data.is_empty() && self.var_map.is_empty()
    }
}

/// A complete flow definition plus the playback state derived from it.
/// Rebuilt wholesale on every update, never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowConfig {
    pub pkt_list: Vec<Packet>,
    // loop metadata keyed by the index of the packet ending each loop
    pub loop_map: BTreeMap<u16, LoopInfo>,
    pub var_list: Vec<Variable>,
    pub play_type: PlayType,
    pub layer: Layer,
    pub close_type: CloseType,
    // Derived attack-play state: per-direction packet indices in script
    // order, and play counts with loop repetitions included.
    pub client_play: Vec<u16>,
    pub server_play: Vec<u16>,
    pub client_play_count: usize,
    pub server_play_count: usize,
}

impl FlowConfig {
    /// Loop metadata attached to a packet, if that packet ends a loop.
    pub fn pkt_loop(&self, pkt_idx: usize) -> Option<&LoopInfo> {
        self.pkt_list[pkt_idx]
            .loop_key
            .and_then(|key| self.loop_map.get(&key))
    }
}

// Endpoint selection structures

/// The (source, destination) tuple chosen for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPair {
    pub src_if_name: String,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
}

/// Policy governing how successive endpoint pairs are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPattern {
    #[default]
    Pair, // lockstep cursors, synchronized wraparound
    BackboneSrcFirst, // all sources against each destination
    BackboneDstFirst, // all destinations against each source
    BackboneInterleaved, // independent cursors, independent wraparound
}

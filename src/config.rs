use crate::error::{Error, Result};
use crate::structs::*;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Capability through which the engine receives a flow definition. The
/// engine never sees where the definition came from (controller message,
/// script file, test fixture); it only asks for a copy.
pub trait FlowSource {
    /// Overwrite `cfg` with this source's flow definition. Whatever the
    /// target held before is discarded, derived playback state included.
    fn copy_to(&self, cfg: &mut FlowConfig);
}

/// External flow description, shaped like the controller's message: a flat
/// payload buffer plus parallel per-packet arrays, with loop and variable
/// declarations referring to packets by index.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FlowSpec {
    #[serde(default)]
    pub play_type: PlayType,
    #[serde(default)]
    pub layer: Layer,
    #[serde(default)]
    pub close_type: CloseType,
    /// All packet payloads concatenated; `pkt_len` slices it up.
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub pkt_len: Vec<u32>,
    #[serde(default)]
    pub pkt_delay: Vec<u32>,
    #[serde(default)]
    pub client_tx: Vec<bool>,
    #[serde(default)]
    pub loops: Vec<LoopSpec>,
    #[serde(default)]
    pub vars: Vec<VarSpec>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct LoopSpec {
    pub beg_idx: u16,
    pub end_idx: u16,
    pub count: u16,
}

#[derive(Deserialize, Debug, Clone)]
pub struct VarSpec {
    pub name: String,
    #[serde(default)]
    pub value: Vec<u8>,
    /// Insertion points, as parallel packet/byte index arrays.
    #[serde(default)]
    pub pkt_idx: Vec<u16>,
    #[serde(default)]
    pub byte_idx: Vec<u32>,
    #[serde(default)]
    pub fixed_len: bool,
    #[serde(default)]
    pub endian: Endian,
}

impl FlowSpec {
    pub fn from_toml(text: &str) -> Result<FlowSpec> {
        Ok(toml::from_str(text)?)
    }

    /// Check the spec against the script invariants and turn it into a
    /// usable flow source. Anything wrong here is the caller's
    /// configuration error, reported before the engine is touched.
    pub fn validate(self) -> Result<ValidFlowSpec> {
        let n_pkts = self.pkt_len.len();

        // packet indices are u16 everywhere downstream
        if n_pkts > usize::from(u16::MAX) + 1 {
            return Err(Error::BadConfig(format!(
                "{n_pkts} packets exceed the 65536-packet script limit"
            )));
        }
        if self.pkt_delay.len() != n_pkts {
            return Err(Error::BadConfig(format!(
                "pkt_delay holds {} entries for {} packets",
                self.pkt_delay.len(),
                n_pkts
            )));
        }
        if self.client_tx.len() != n_pkts {
            return Err(Error::BadConfig(format!(
                "client_tx holds {} entries for {} packets",
                self.client_tx.len(),
                n_pkts
            )));
        }

        let total_len: u64 = self.pkt_len.iter().map(|&l| u64::from(l)).sum();
        if total_len != self.data.len() as u64 {
            return Err(Error::BadConfig(format!(
                "pkt_len sums to {} but the data buffer holds {} bytes",
                total_len,
                self.data.len()
            )));
        }

        // Loops must be ascending, in range and non-overlapping. The
        // attack derivation relies on this.
        let mut prev_end: Option<u16> = None;
        for lp in &self.loops {
            if lp.count == 0 {
                return Err(Error::BadConfig(format!(
                    "loop ending at {} has a zero pass count",
                    lp.end_idx
                )));
            }
            if lp.beg_idx > lp.end_idx {
                return Err(Error::BadConfig(format!(
                    "loop begins at {} after its end {}",
                    lp.beg_idx, lp.end_idx
                )));
            }
            if usize::from(lp.end_idx) >= n_pkts {
                return Err(Error::BadConfig(format!(
                    "loop end {} out of range for {} packets",
                    lp.end_idx, n_pkts
                )));
            }
            if let Some(prev) = prev_end {
                if lp.beg_idx <= prev {
                    return Err(Error::BadConfig(format!(
                        "loop starting at {} overlaps the loop ending at {}",
                        lp.beg_idx, prev
                    )));
                }
            }
            prev_end = Some(lp.end_idx);
        }

        for var in &self.vars {
            if var.pkt_idx.len() != var.byte_idx.len() {
                return Err(Error::BadConfig(format!(
                    "variable {} has {} packet indices but {} byte indices",
                    var.name,
                    var.pkt_idx.len(),
                    var.byte_idx.len()
                )));
            }
            for (&pkt_idx, &byte_idx) in var.pkt_idx.iter().zip(var.byte_idx.iter()) {
                if usize::from(pkt_idx) >= n_pkts {
                    return Err(Error::BadConfig(format!(
                        "variable {} targets packet {} of {}",
                        var.name, pkt_idx, n_pkts
                    )));
                }
                // Insertion directly after the last payload byte is legal.
                if byte_idx > self.pkt_len[usize::from(pkt_idx)] {
                    return Err(Error::BadConfig(format!(
                        "variable {} targets byte {} of a {}-byte packet",
                        var.name,
                        byte_idx,
                        self.pkt_len[usize::from(pkt_idx)]
                    )));
                }
            }
        }

        Ok(ValidFlowSpec { spec: self })
    }
}

/// A `FlowSpec` that passed validation; the only spec the engine accepts.
#[derive(Debug, Clone)]
pub struct ValidFlowSpec {
    spec: FlowSpec,
}

impl FlowSource for ValidFlowSpec {
    fn copy_to(&self, cfg: &mut FlowConfig) {
        let spec = &self.spec;

        let mut pkt_list = Vec::with_capacity(spec.pkt_len.len());
        let mut offset = 0usize;
        for (idx, &len) in spec.pkt_len.iter().enumerate() {
            let len = len as usize;
            pkt_list.push(Packet {
                data: spec.data[offset..offset + len].to_vec(),
                pkt_delay_msec: spec.pkt_delay[idx],
                client_tx: spec.client_tx[idx],
                var_map: BTreeMap::new(),
                loop_key: None,
            });
            offset += len;
        }

        for (var_idx, var) in spec.vars.iter().enumerate() {
            for (&pkt_idx, &byte_idx) in var.pkt_idx.iter().zip(var.byte_idx.iter()) {
                pkt_list[usize::from(pkt_idx)]
                    .var_map
                    .entry(byte_idx)
                    .or_default()
                    .push(var_idx as u16);
            }
        }

        *cfg = FlowConfig {
            pkt_list,
            loop_map: spec
                .loops
                .iter()
                .map(|lp| {
                    (
                        lp.end_idx,
                        LoopInfo {
                            beg_idx: lp.beg_idx,
                            count: lp.count,
                        },
                    )
                })
                .collect(),
            var_list: spec
                .vars
                .iter()
                .map(|var| Variable {
                    name: var.name.clone(),
                    value: var.value.clone(),
                    targets: var
                        .pkt_idx
                        .iter()
                        .zip(var.byte_idx.iter())
                        .map(|(&pkt_idx, &byte_idx)| VarTarget { pkt_idx, byte_idx })
                        .collect(),
                    fixed_len: var.fixed_len,
                    endian: var.endian,
                })
                .collect(),
            play_type: spec.play_type,
            layer: spec.layer,
            close_type: spec.close_type,
            ..FlowConfig::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> FlowSpec {
        FlowSpec {
            data: (0u8..100).collect(),
            pkt_len: vec![22, 24, 26, 28],
            pkt_delay: vec![0, 1, 2, 3],
            client_tx: vec![false, true, false, true],
            ..FlowSpec::default()
        }
    }

    #[test]
    fn test_copy_basic() {
        let source = base_spec().validate().unwrap();

        let mut cfg = FlowConfig::default();
        // pre-fill with garbage to check the copy replaces everything
        cfg.pkt_list.resize(15, Packet::default());
        cfg.pkt_list[0].data.resize(123, 0);
        source.copy_to(&mut cfg);

        assert_eq!(cfg.pkt_list.len(), 4);
        assert_eq!(cfg.pkt_list[0].data, (0u8..22).collect::<Vec<u8>>());
        assert_eq!(cfg.pkt_list[1].data, (22u8..46).collect::<Vec<u8>>());
        assert_eq!(cfg.pkt_list[2].data, (46u8..72).collect::<Vec<u8>>());
        assert_eq!(cfg.pkt_list[3].data, (72u8..100).collect::<Vec<u8>>());
        assert_eq!(cfg.pkt_list[1].pkt_delay_msec, 1);
        assert!(!cfg.pkt_list[0].client_tx);
        assert!(cfg.pkt_list[1].client_tx);
        assert!(cfg.loop_map.is_empty());
        assert!(cfg.client_play.is_empty());
    }

    #[test]
    fn test_bad_lengths() {
        let mut spec = base_spec();
        spec.pkt_len[0] += 1;
        assert!(matches!(spec.validate(), Err(Error::BadConfig(_))));

        let mut spec = base_spec();
        spec.client_tx.push(true);
        assert!(matches!(spec.validate(), Err(Error::BadConfig(_))));

        let mut spec = base_spec();
        spec.pkt_delay.push(0);
        assert!(matches!(spec.validate(), Err(Error::BadConfig(_))));
    }

    #[test]
    fn test_loops() {
        let mut spec = base_spec();
        spec.loops = vec![
            LoopSpec {
                beg_idx: 0,
                end_idx: 1,
                count: 10,
            },
            LoopSpec {
                beg_idx: 3,
                end_idx: 3,
                count: 100,
            },
        ];
        let source = spec.clone().validate().unwrap();
        let mut cfg = FlowConfig::default();
        source.copy_to(&mut cfg);
        assert_eq!(cfg.loop_map.len(), 2);
        assert_eq!(
            cfg.loop_map[&1],
            LoopInfo {
                beg_idx: 0,
                count: 10
            }
        );
        assert_eq!(
            cfg.loop_map[&3],
            LoopInfo {
                beg_idx: 3,
                count: 100
            }
        );

        // overlapping
        spec.loops[1].beg_idx = 1;
        assert!(spec.clone().validate().is_err());
        spec.loops[1].beg_idx = 0;
        assert!(spec.clone().validate().is_err());

        // out of range
        spec.loops[1].beg_idx = 2;
        spec.loops[1].end_idx = 4;
        assert!(spec.clone().validate().is_err());

        // reversed
        spec.loops[1].beg_idx = 3;
        spec.loops[1].end_idx = 2;
        assert!(spec.clone().validate().is_err());

        // zero pass count
        spec.loops[1].beg_idx = 3;
        spec.loops[1].end_idx = 3;
        spec.loops[1].count = 0;
        assert!(spec.clone().validate().is_err());
        spec.loops[1].count = 100;
        assert!(spec.clone().validate().is_ok());

        // out of order
        spec.loops[0].beg_idx = 2;
        spec.loops[0].end_idx = 3;
        spec.loops[1].beg_idx = 0;
        spec.loops[1].end_idx = 1;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_variables() {
        let mut spec = base_spec();
        spec.vars = vec![
            VarSpec {
                name: "foo".into(),
                value: vec![0xff, 0xff],
                pkt_idx: vec![1],
                byte_idx: vec![12],
                fixed_len: true,
                endian: Endian::Big,
            },
            VarSpec {
                name: "bar".into(),
                value: vec![1, 1, 1, 1],
                pkt_idx: vec![3, 1],
                byte_idx: vec![25, 13],
                fixed_len: false,
                endian: Endian::Little,
            },
        ];

        let source = spec.clone().validate().unwrap();
        let mut cfg = FlowConfig::default();
        source.copy_to(&mut cfg);

        assert_eq!(cfg.var_list.len(), 2);
        assert_eq!(cfg.var_list[0].name, "foo");
        assert_eq!(
            cfg.var_list[1].targets,
            vec![
                VarTarget {
                    pkt_idx: 3,
                    byte_idx: 25
                },
                VarTarget {
                    pkt_idx: 1,
                    byte_idx: 13
                }
            ]
        );

        assert!(cfg.pkt_list[0].var_map.is_empty());
        assert_eq!(cfg.pkt_list[1].var_map.len(), 2);
        assert_eq!(cfg.pkt_list[1].var_map[&12], vec![0]);
        assert_eq!(cfg.pkt_list[1].var_map[&13], vec![1]);
        assert!(cfg.pkt_list[2].var_map.is_empty());
        assert_eq!(cfg.pkt_list[3].var_map[&25], vec![1]);

        // bad packet index
        spec.vars[1].pkt_idx[0] = 4;
        assert!(spec.clone().validate().is_err());
        spec.vars[1].pkt_idx[0] = 3;

        // byte index past the payload (insertion at the end is fine)
        spec.vars[0].byte_idx[0] = 26;
        assert!(spec.clone().validate().is_err());
        spec.vars[0].byte_idx[0] = 22;
        assert!(spec.clone().validate().is_ok());

        // index array length mismatch
        spec.vars[1].pkt_idx.push(2);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_script_size_limit() {
        let packets = |n: usize| FlowSpec {
            pkt_len: vec![0; n],
            pkt_delay: vec![0; n],
            client_tx: vec![true; n],
            ..FlowSpec::default()
        };

        // u16 packet indices cap a script at 65536 packets
        assert!(packets(usize::from(u16::MAX) + 1).validate().is_ok());
        assert!(matches!(
            packets(usize::from(u16::MAX) + 2).validate(),
            Err(Error::BadConfig(_))
        ));
    }

    #[test]
    fn test_no_data() {
        // all-variable packets carry no payload at all
        let spec = FlowSpec {
            pkt_len: vec![0, 0],
            pkt_delay: vec![1, 1],
            client_tx: vec![true, true],
            vars: vec![
                VarSpec {
                    name: "foo".into(),
                    value: vec![0xff, 0xff],
                    pkt_idx: vec![0],
                    byte_idx: vec![0],
                    fixed_len: true,
                    endian: Endian::Big,
                },
                VarSpec {
                    name: "bar".into(),
                    value: vec![1, 1, 1, 1],
                    pkt_idx: vec![0, 1],
                    byte_idx: vec![0, 0],
                    fixed_len: false,
                    endian: Endian::Big,
                },
            ],
            ..FlowSpec::default()
        };

        let source = spec.validate().unwrap();
        let mut cfg = FlowConfig::default();
        source.copy_to(&mut cfg);

        assert_eq!(cfg.pkt_list.len(), 2);
        assert!(cfg.pkt_list[0].data.is_empty());
        assert!(cfg.pkt_list[1].data.is_empty());
        assert!(!cfg.pkt_list[0].is_blank());
        assert_eq!(cfg.pkt_list[0].var_map[&0], vec![0, 1]);
        assert_eq!(cfg.pkt_list[1].var_map[&0], vec![1]);
    }

    #[test]
    fn test_from_toml() {
        let spec = FlowSpec::from_toml(
            r#"
play_type = "attack"
layer = "udp"
close_type = "server_rst"
data = [1, 2, 3, 4, 5]
pkt_len = [2, 3]
pkt_delay = [100, 101]
client_tx = [true, false]

[[loops]]
beg_idx = 0
end_idx = 1
count = 3

[[vars]]
name = "session-id"
value = [0, 0]
pkt_idx = [1]
byte_idx = [3]
fixed_len = true
endian = "little"
"#,
        )
        .unwrap();

        assert_eq!(spec.play_type, PlayType::Attack);
        assert_eq!(spec.layer, Layer::Udp);
        assert_eq!(spec.close_type, CloseType::ServerRst);

        let source = spec.validate().unwrap();
        let mut cfg = FlowConfig::default();
        source.copy_to(&mut cfg);
        assert_eq!(cfg.pkt_list[0].data, vec![1, 2]);
        assert_eq!(cfg.pkt_list[1].data, vec![3, 4, 5]);
        assert_eq!(cfg.var_list[0].endian, Endian::Little);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            FlowSpec::from_toml("pkt_len = \"oops\""),
            Err(Error::Parse(_))
        ));
    }
}

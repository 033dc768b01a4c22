//! Attack stream derivation.
//!
//! Attack play transmits each direction's payload-bearing packets back to
//! back, so a bidirectional script has to be split into two direction-pure
//! index sequences. Loop markers complicate the split: a loop is declared
//! in whole-script coordinates, but each side replays it on its own
//! sequence, so the marker's start index must be remapped into that side's
//! coordinate space, and a loop whose span covers both directions needs a
//! second marker synthesized for the opposite side.

use crate::structs::*;

/// Rebuild `client_play`/`server_play` and the matching play counts for an
/// attack-classified flow. Requires loop linking to have run on the
/// current `loop_map`. Primary loop entries are rewritten in place to
/// per-direction coordinates; malformed loop metadata (a start scan
/// running past the script) panics.
pub(crate) fn build_attack_streams(cfg: &mut FlowConfig) {
    cfg.client_play.clear();
    cfg.server_play.clear();
    cfg.client_play_count = 0;
    cfg.server_play_count = 0;

    // Inserting into loop_map mid-walk would shift the coordinates still
    // being computed; synthesized entries wait here until the walk is done.
    let mut synthetic: Vec<(u16, LoopInfo)> = Vec::new();

    for idx in 0..cfg.pkt_list.len() {
        let client = cfg.pkt_list[idx].client_tx;

        if !cfg.pkt_list[idx].is_blank() {
            if client {
                cfg.client_play.push(idx as u16);
                cfg.client_play_count += 1;
            } else {
                cfg.server_play.push(idx as u16);
                cfg.server_play_count += 1;
            }
        }

        let Some(key) = cfg.pkt_list[idx].loop_key else {
            continue;
        };
        let info = cfg.loop_map[&key];
        let reps = usize::from(info.count - 1);

        // Snap the loop start forward to the first packet transmitted in
        // this direction; off-direction starts are legal in the script.
        let mut beg = usize::from(info.beg_idx);
        while cfg.pkt_list[beg].client_tx != client {
            beg += 1;
        }

        let own = if client {
            &cfg.client_play
        } else {
            &cfg.server_play
        };
        // Position of the snapped start within this direction's sequence.
        let new_beg = own.iter().take_while(|&&p| usize::from(p) < beg).count();
        // Everything from the remapped start through the current packet
        // replays count-1 extra times.
        let extra = (own.len() - new_beg) * reps;
        if client {
            cfg.client_play_count += extra;
        } else {
            cfg.server_play_count += extra;
        }
        cfg.loop_map
            .get_mut(&key)
            .expect("linked loop entry")
            .beg_idx = new_beg as u16;

        // A span covering both directions replays independently on each
        // side; the opposite side gets its own marker, ending at its last
        // packet inside the span.
        let orig_beg = usize::from(info.beg_idx);
        let Some(other_side) = (orig_beg..idx)
            .rev()
            .find(|&p| cfg.pkt_list[p].client_tx != client)
        else {
            continue;
        };

        let mut opp_beg = orig_beg;
        while cfg.pkt_list[opp_beg].client_tx == client {
            opp_beg += 1;
        }
        let opp = if client {
            &cfg.server_play
        } else {
            &cfg.client_play
        };
        let opp_new_beg = opp
            .iter()
            .take_while(|&&p| usize::from(p) < opp_beg)
            .count();
        let other_offset = opp
            .iter()
            .take_while(|&&p| usize::from(p) < other_side)
            .count();

        synthetic.push((
            other_side as u16,
            LoopInfo {
                beg_idx: opp_new_beg as u16,
                count: info.count,
            },
        ));
        let opp_extra = (other_offset - opp_new_beg + 1) * reps;
        if client {
            cfg.server_play_count += opp_extra;
        } else {
            cfg.client_play_count += opp_extra;
        }
    }

    for (end, info) in synthetic {
        cfg.loop_map.insert(end, info);
        cfg.pkt_list[usize::from(end)].loop_key = Some(end);
    }

    log::trace!(
        "attack streams: {} client + {} server entries, {}+{} plays",
        cfg.client_play.len(),
        cfg.server_play.len(),
        cfg.client_play_count,
        cfg.server_play_count
    );
}

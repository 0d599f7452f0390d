//! Downlink planner: RX1/RX2 feasibility, gateway-selection policy, and the
//! ADR power step. `adr_power_step` is kept separable from gateway selection:
//! it takes only the node's SNR samples and ladder bounds, so it can be
//! tested without a live downlink planner.

use std::collections::VecDeque;

use rand::Rng;
use rand::rngs::StdRng;

use crate::config::GatewaySelectionPolicy;
use crate::gateway::Gateway;
use crate::node::GatewayId;
use crate::region::{Band, snr_required};

/// ADR request overhead added to a downlink payload.
pub const ADR_COMMAND_BYTES: usize = 4;
pub const ADR_MARGIN_DB: f64 = 5.0;

/// Filters `candidates` down to gateways that are feasible for a downlink
/// window `[window_start, window_end]` on `channel`: not downlink-busy, not
/// uplink-locked on that channel, and (EU868 only) not duty-cycle gated
/// past `window_start`.
pub fn feasible_gateways(gateways: &[Gateway], candidates: &[GatewayId], channel: usize, window_start: f64, window_end: f64, band: Band, duty_cycle_gated: bool) -> Vec<GatewayId> {
    candidates
        .iter()
        .copied()
        .filter(|gw_id| {
            let gw = &gateways[gw_id.0 as usize];
            let not_busy = !gw.is_downlink_busy_during(window_start, window_end);
            let not_locked = !gw.is_uplink_locked_during(channel, window_start, window_end, None);
            let duty_ok = if duty_cycle_gated { gw.next_allowed_downlink.get(&band).copied().unwrap_or(0.0) <= window_start } else { true };
            not_busy && not_locked && duty_ok
        })
        .collect()
}

/// One feasible candidate as seen by the selection policy: its id, a
/// ranking power (observed RSSI at the uplink if this gateway received it,
/// else the deterministic mean estimate) and its per-band duty-cycle
/// deadline (used only by the `Lb` policy).
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub gw: GatewayId,
    pub ranking_power_dbm: f64,
    pub duty_cycle_deadline: f64,
}

pub struct SelectionStats {
    pub reachable_count: usize,
    pub free_fraction_threshold: f64,
    pub node_no_gw_rate: f64,
    pub network_avg_no_gw_rate: f64,
    pub node_ack_fraction: f64,
    pub network_avg_ack_fraction: f64,
}

/// Picks the gateway to carry the downlink, or `None` if the policy
/// abstains (URCB/FBS) or there are no candidates.
pub fn select_gateway(policy: GatewaySelectionPolicy, candidates: &[Candidate], stats: &SelectionStats, rng: &mut StdRng) -> Option<GatewayId> {
    if candidates.is_empty() {
        return None;
    }
    let free_ratio = candidates.len() as f64 / stats.reachable_count.max(1) as f64;
    let best_by_rssi = || candidates.iter().max_by(|a, b| a.ranking_power_dbm.total_cmp(&b.ranking_power_dbm)).map(|c| c.gw);

    match policy {
        GatewaySelectionPolicy::Fcfs => {
            let idx = rng.gen_range(0..candidates.len());
            Some(candidates[idx].gw)
        }
        GatewaySelectionPolicy::Rssi => best_by_rssi(),
        GatewaySelectionPolicy::Lb => candidates.iter().min_by(|a, b| a.duty_cycle_deadline.total_cmp(&b.duty_cycle_deadline)).map(|c| c.gw),
        GatewaySelectionPolicy::Urcb => {
            if stats.node_no_gw_rate < stats.network_avg_no_gw_rate && free_ratio > stats.free_fraction_threshold {
                None
            } else {
                best_by_rssi()
            }
        }
        GatewaySelectionPolicy::Fbs => {
            if stats.node_ack_fraction > stats.network_avg_ack_fraction && free_ratio > stats.free_fraction_threshold {
                None
            } else {
                best_by_rssi()
            }
        }
    }
}

/// ADR power step: once ten best-SNR samples have been
/// collected, compute how many 3 dB steps of headroom exist beyond the
/// required SNR plus margin, and apply them to the power-ladder index
/// (lower transmit power = higher index), clamped to `[0, max_index]`.
/// Returns `Some(new_index)` only when it actually differs from `current_index`.
pub fn adr_power_step(snr_window: &VecDeque<f64>, window_capacity: usize, sf: u8, current_index: usize, max_index: usize) -> Option<usize> {
    if snr_window.len() < window_capacity {
        return None;
    }
    let max_snr = snr_window.iter().copied().fold(f64::MIN, f64::max);
    let gap = max_snr - snr_required(sf) - ADR_MARGIN_DB;
    let steps = (gap / 3.0).floor() as i64;
    let new_index = (current_index as i64 + steps).clamp(0, max_index as i64) as usize;
    if new_index != current_index { Some(new_index) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rssi_policy_picks_strongest_candidate() {
        let candidates = vec![
            Candidate { gw: GatewayId(0), ranking_power_dbm: -100.0, duty_cycle_deadline: 0.0 },
            Candidate { gw: GatewayId(1), ranking_power_dbm: -60.0, duty_cycle_deadline: 0.0 },
        ];
        let stats = SelectionStats {
            reachable_count: 2,
            free_fraction_threshold: 2.0 / 3.0,
            node_no_gw_rate: 0.0,
            network_avg_no_gw_rate: 0.0,
            node_ack_fraction: 0.0,
            network_avg_ack_fraction: 0.0,
        };
        let mut rng = test_rng();
        let chosen = select_gateway(GatewaySelectionPolicy::Rssi, &candidates, &stats, &mut rng);
        assert_eq!(chosen, Some(GatewayId(1)));
    }

    #[test]
    fn urcb_abstains_when_below_average_and_gateways_plentiful() {
        let candidates = vec![
            Candidate { gw: GatewayId(0), ranking_power_dbm: -60.0, duty_cycle_deadline: 0.0 },
            Candidate { gw: GatewayId(1), ranking_power_dbm: -70.0, duty_cycle_deadline: 0.0 },
            Candidate { gw: GatewayId(2), ranking_power_dbm: -80.0, duty_cycle_deadline: 0.0 },
        ];
        let stats = SelectionStats {
            reachable_count: 3,
            free_fraction_threshold: 2.0 / 3.0,
            node_no_gw_rate: 0.0,
            network_avg_no_gw_rate: 0.5,
            node_ack_fraction: 0.0,
            network_avg_ack_fraction: 0.0,
        };
        let mut rng = test_rng();
        assert_eq!(select_gateway(GatewaySelectionPolicy::Urcb, &candidates, &stats, &mut rng), None);
    }

    #[test]
    fn adr_requires_full_window() {
        let mut window = VecDeque::new();
        window.push_back(-5.0);
        assert_eq!(adr_power_step(&window, 10, 7, 0, 7), None);
    }

    #[test]
    fn adr_reduces_power_when_margin_is_ample() {
        let window: VecDeque<f64> = std::iter::repeat(0.0).take(10).collect();
        // snr_required(SF7) = -7.5; gap = 0 - (-7.5) - 5 = 2.5 -> 0 steps (floor(2.5/3)=0)
        assert_eq!(adr_power_step(&window, 10, 7, 0, 7), None);
        // with very high SNR, several steps should apply
        let window: VecDeque<f64> = std::iter::repeat(20.0).take(10).collect();
        let stepped = adr_power_step(&window, 10, 7, 0, 7).unwrap();
        assert!(stepped > 0);
    }

    fn test_rng() -> StdRng {
        use rand::SeedableRng;
        StdRng::seed_from_u64(7)
    }
}

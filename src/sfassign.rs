//! Spreading-factor assignment.
//!
//! Picks the smallest SF such that at least one gateway receives the node's
//! mean (shadowing=0) transmission above sensitivity by a 5 dB margin. The
//! same walk records, for the region's fixed RX2 SF, which gateways are
//! additionally reachable there — this broadens the RX2 downlink candidate
//! set when the device's uplink SF is lower than the RX2 SF.

use std::collections::HashSet;

use crate::error::SimError;
use crate::node::GatewayId;
use crate::pathloss::{PathLossParams, received_power_mean_dbm};
use crate::region::{RegionPlan, sensitivity};

pub const SF_MARGIN_DB: f64 = 5.0;

pub struct SfAssignment {
    pub sf: u8,
    pub reachable_at_sf: HashSet<GatewayId>,
    pub reachable_at_rx2_sf: HashSet<GatewayId>,
}

/// `gateways`: `(id, distance_to_node_m)` pairs.
pub fn assign_sf(
    node_id_for_error: u32,
    tx_power_dbm: f64,
    gateways: &[(GatewayId, f64)],
    path_loss: &PathLossParams,
    region: &RegionPlan,
) -> Result<SfAssignment, SimError> {
    for sf in 7..=12u8 {
        let reachable = reachable_gateways(sf, region.uplink_bandwidth_hz, tx_power_dbm, gateways, path_loss);
        if !reachable.is_empty() {
            let reachable_at_rx2_sf = reachable_gateways(region.rx2_sf, region.rx2_bandwidth_hz, tx_power_dbm, gateways, path_loss);
            return Ok(SfAssignment { sf, reachable_at_sf: reachable, reachable_at_rx2_sf });
        }
    }
    Err(SimError::NodeUnreachable { node_id: node_id_for_error })
}

fn reachable_gateways(sf: u8, bandwidth_hz: u32, tx_power_dbm: f64, gateways: &[(GatewayId, f64)], path_loss: &PathLossParams) -> HashSet<GatewayId> {
    let sens = sensitivity(sf, bandwidth_hz);
    gateways
        .iter()
        .filter_map(|&(gw, distance)| {
            let prx = received_power_mean_dbm(tx_power_dbm, distance, path_loss);
            if prx - sens >= SF_MARGIN_DB { Some(gw) } else { None }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_minimal_reachable_sf() {
        let region = RegionPlan::new(crate::region::FrequencyPlan::Eu868);
        let pl = PathLossParams::default();
        // A short link should be reachable at SF7 already.
        let gateways = vec![(GatewayId(0), 100.0)];
        let a = assign_sf(0, 14.0, &gateways, &pl, &region).unwrap();
        assert_eq!(a.sf, 7);
    }

    #[test]
    fn unreachable_node_errors() {
        let region = RegionPlan::new(crate::region::FrequencyPlan::Eu868);
        let pl = PathLossParams::default();
        // An absurdly low tx power / huge distance reaches nothing even at SF12.
        let gateways = vec![(GatewayId(0), 5_000_000.0)];
        let err = assign_sf(7, -40.0, &gateways, &pl, &region).unwrap_err();
        assert!(matches!(err, SimError::NodeUnreachable { node_id: 7 }));
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let region = RegionPlan::new(crate::region::FrequencyPlan::Eu868);
        let pl = PathLossParams::default();
        let gateways = vec![(GatewayId(0), 2000.0), (GatewayId(1), 500.0)];
        let a = assign_sf(0, 14.0, &gateways, &pl, &region).unwrap();
        let b = assign_sf(0, 14.0, &gateways, &pl, &region).unwrap();
        assert_eq!(a.sf, b.sf);
    }
}

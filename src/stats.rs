//! Statistics aggregator and the final stdout report.
//!
//! `Stats` accumulates the counters only the main loop can see as events are
//! dispatched (total transmissions, retransmissions, RF-layer receptions,
//! "no gateway available" counts); `Report` derives everything else from the
//! final node/gateway arenas and renders the stdout report's exact keys.

use crate::gateway::Gateway;
use crate::node::Node;
use crate::region::{Band, RegionPlan};

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub total_transmissions: u64,
    pub total_retransmissions: u64,
    /// Uplinks received by at least one gateway (RF-layer success, distinct
    /// from an ack being delivered back).
    pub total_received_by_any_gateway: u64,
    pub no_gw_in_rx1: u64,
    pub no_gw_in_rx1_or_rx2: u64,
}

impl Stats {
    /// Rolling PDR window for the optional auto-stop heuristic: `1` for a
    /// delivered/acked outcome, `0` for a drop, over the last 100 concluded
    /// packets.
    pub fn pdr_window_std_dev(window: &[f64]) -> f64 {
        if window.is_empty() {
            return f64::INFINITY;
        }
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window.len() as f64;
        var.sqrt()
    }
}

pub struct Report<'a> {
    pub stats: &'a Stats,
    pub nodes: &'a [Node],
    pub gateways: &'a [Gateway],
    pub region: &'a RegionPlan,
    pub simulation_time_hours: f64,
}

impl<'a> Report<'a> {
    fn node_consumption_mj(&self) -> (f64, f64, f64) {
        if self.nodes.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let sum: f64 = self.nodes.iter().map(|n| n.energy_mj).sum();
        let avg = sum / self.nodes.len() as f64;
        let min = self.nodes.iter().map(|n| n.energy_mj).fold(f64::INFINITY, f64::min);
        let max = self.nodes.iter().map(|n| n.energy_mj).fold(f64::NEG_INFINITY, f64::max);
        (avg, min, max)
    }

    fn unique_stdev(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let counts: Vec<f64> = self.nodes.iter().map(|n| n.unique as f64).collect();
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let var = counts.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        var.sqrt()
    }

    fn confirmed_pdr(&self) -> f64 {
        let confirmed: Vec<&Node> = self.nodes.iter().filter(|n| n.confirmed).collect();
        let unique: u32 = confirmed.iter().map(|n| n.unique).sum();
        let acked: u32 = confirmed.iter().map(|n| n.acked).sum();
        if unique == 0 { 1.0 } else { acked as f64 / unique as f64 }
    }

    fn overall_pdr(&self) -> f64 {
        let unique: u32 = self.nodes.iter().map(|n| n.unique).sum();
        let delivered: u32 = self.nodes.iter().map(|n| n.acked + n.delivered).sum();
        if unique == 0 { 1.0 } else { delivered as f64 / unique as f64 }
    }

    fn prr(&self) -> f64 {
        if self.stats.total_transmissions == 0 {
            1.0
        } else {
            self.stats.total_received_by_any_gateway as f64 / self.stats.total_transmissions as f64
        }
    }

    fn total_downlink_time_s(&self) -> f64 {
        self.gateways.iter().map(|g| g.downlink_airtime_total.values().sum::<f64>()).sum()
    }

    fn duty_cycle_percentages(&self) -> Vec<(Band, f64)> {
        let sim_duration_s = self.simulation_time_hours * 3600.0;
        let bands = match self.region.duty_cycle {
            Some(_) => vec![Band::Main, Band::Rx2],
            None => vec![Band::Main],
        };
        bands
            .into_iter()
            .map(|band| {
                let total: f64 = self.gateways.iter().map(|g| *g.downlink_airtime_total.get(&band).unwrap_or(&0.0)).sum();
                let denom = (self.gateways.len().max(1) as f64) * sim_duration_s.max(1e-9);
                (band, 100.0 * total / denom)
            })
            .collect()
    }

    fn sf_population(&self) -> [u32; 6] {
        let mut counts = [0u32; 6];
        for n in self.nodes {
            counts[(n.sf.clamp(7, 12) - 7) as usize] += 1;
        }
        counts
    }

    fn avg_sf(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.nodes.iter().map(|n| n.sf as f64).sum::<f64>() / self.nodes.len() as f64
    }

    pub fn print(&self) {
        let (avg, min, max) = self.node_consumption_mj();
        let unique: u32 = self.nodes.iter().map(|n| n.unique).sum();
        let acked: u32 = self.nodes.iter().map(|n| n.acked).sum();
        let dropped_confirmed: u32 = self.nodes.iter().map(|n| n.dropped_confirmed).sum();
        let dropped_unconfirmed: u32 = self.nodes.iter().map(|n| n.dropped_unconfirmed).sum();

        println!("Simulation time: {:.2} h", self.simulation_time_hours);
        println!("Avg/Min/Max node consumption: {avg:.3}/{min:.3}/{max:.3} mJ");
        println!("Total number of transmissions: {}", self.stats.total_transmissions);
        println!("Total number of re-transmissions: {}", self.stats.total_retransmissions);
        println!("Total number of unique transmissions: {unique}");
        println!("Stdv of unique transmissions: {:.4}", self.unique_stdev());
        println!("Total packets received: {}", self.stats.total_received_by_any_gateway);
        println!("Total unique packets acknowledged: {acked}");
        println!("Total confirmed packets dropped: {dropped_confirmed}");
        println!("Total unconfirmed packets dropped: {dropped_unconfirmed}");
        println!("Confirmed Packet Delivery Ratio (unique): {:.4}", self.confirmed_pdr());
        println!("Packet Delivery Ratio: {:.4}", self.overall_pdr());
        println!("Packet Reception Ratio: {:.4}", self.prr());
        println!("No GW available in RX1: {}", self.stats.no_gw_in_rx1);
        println!("No GW available in RX1 or RX2: {}", self.stats.no_gw_in_rx1_or_rx2);
        println!("Total downlink time: {:.4} s", self.total_downlink_time_s());

        for gw in self.gateways {
            println!("GW {} sent out {} acks and commands", gw.label, gw.acks_and_commands_sent);
        }

        for (band, pct) in self.duty_cycle_percentages() {
            println!("Duty cycle utilisation on band {band}: {pct:.4}%");
        }

        let sf_pop = self.sf_population();
        for (i, count) in sf_pop.iter().enumerate() {
            println!("SF{} population: {count}", 7 + i);
        }
        println!("Avg SF: {:.3}", self.avg_sf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdr_window_std_dev_of_constant_series_is_zero() {
        let window = vec![1.0; 100];
        assert_eq!(Stats::pdr_window_std_dev(&window), 0.0);
    }

    #[test]
    fn pdr_window_std_dev_of_empty_window_is_infinite() {
        assert!(Stats::pdr_window_std_dev(&[]).is_infinite());
    }
}

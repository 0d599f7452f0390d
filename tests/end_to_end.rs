//! Integration tests for the literal end-to-end scenarios.

use lorawan_sim::config::{Cli, GatewaySelectionPolicy, PacketSizeDistribution};
use lorawan_sim::region::FrequencyPlan;
use lorawan_sim::{terrain, Engine};

fn cli(packets_per_hour: f64, simulation_time_hours: f64, confirmed_perc: f64, policy: GatewaySelectionPolicy, max_retr: u32, fplan: FrequencyPlan) -> Cli {
    Cli {
        packets_per_hour,
        simulation_time_hours,
        terrain_file: String::new(),
        confirmed_perc,
        full_collision: false,
        max_retr,
        fixed_packet_rate: true,
        fixed_packet_size: true,
        packet_size: 20,
        packet_size_distr: PacketSizeDistribution::Uniform,
        adr_on: true,
        double_gws: true,
        policy,
        fplan,
        fbs_free_fraction: 2.0 / 3.0,
        seed: 1,
        auto_stop: false,
    }
}

/// Scenario 1: one node, one gateway, fully confirmed traffic at one packet
/// per second. Every uplink should be heard and acked, PDR near 1.0, no
/// RX1 failures.
#[test]
fn one_node_one_gateway_confirmed_nearly_perfect_pdr() {
    let text = "# stats: terrain=40000.0m^2\n# node coords: 1 [0.0 0.0]\n# gateway coords: A [100.0 100.0]\n";
    let terrain = terrain::parse(text).unwrap();
    let config = cli(3600.0, 1.0, 1.0, GatewaySelectionPolicy::Rssi, 1, FrequencyPlan::Eu868);
    let engine = Engine::build(config, terrain).unwrap();
    let report = engine.run();

    let unique: u32 = report.nodes.iter().map(|n| n.unique).sum();
    let acked: u32 = report.nodes.iter().map(|n| n.acked).sum();
    assert!(unique > 1000, "expected close to 3600 uniques, got {unique}");
    let pdr = acked as f64 / unique.max(1) as f64;
    assert!(pdr > 0.9, "expected near-perfect PDR, got {pdr}");
    assert_eq!(report.gateways.len(), 1);
    assert!(report.gateways[0].acks_and_commands_sent > 0);
}

/// Scenario 2: two nodes at equal distance from one gateway, both pinned to
/// SF7 on the same channel, both starting at time zero with a periodic rate.
/// Every round should collide at the gateway under the co-SF capture rule
/// when both received powers are close (same distance => near-identical
/// mean path loss), so acks stay rare and drops accumulate.
#[test]
fn two_equidistant_same_sf_nodes_mostly_collide() {
    let text = "# stats: terrain=10000.0m^2\n# node coords: 1 [90.0 100.0] 2 [110.0 100.0]\n# gateway coords: A [100.0 100.0]\n";
    let terrain = terrain::parse(text).unwrap();
    let config = cli(3600.0, 1.0, 1.0, GatewaySelectionPolicy::Rssi, 1, FrequencyPlan::Eu868);
    let engine = Engine::build(config, terrain).unwrap();
    let report = engine.run();

    assert_eq!(report.nodes.len(), 2);
    let total_unique: u32 = report.nodes.iter().map(|n| n.unique).sum();
    let total_acked: u32 = report.nodes.iter().map(|n| n.acked).sum();
    assert!(total_unique > 0);
    // Not every attempt can possibly succeed when both nodes share a gateway,
    // channel and SF and transmit at the same cadence.
    assert!(total_acked < total_unique);
}

/// Scenario 3: one node, one gateway, unconfirmed traffic. Most packets
/// should be delivered (no ack round-trip required), acked stays zero.
#[test]
fn unconfirmed_traffic_never_acks() {
    let text = "# stats: terrain=40000.0m^2\n# node coords: 1 [0.0 0.0]\n# gateway coords: A [50.0 50.0]\n";
    let terrain = terrain::parse(text).unwrap();
    let config = cli(600.0, 1.0, 0.0, GatewaySelectionPolicy::Rssi, 1, FrequencyPlan::Eu868);
    let engine = Engine::build(config, terrain).unwrap();
    let report = engine.run();

    let unique: u32 = report.nodes.iter().map(|n| n.unique).sum();
    let delivered: u32 = report.nodes.iter().map(|n| n.delivered).sum();
    let acked: u32 = report.nodes.iter().map(|n| n.acked).sum();
    assert_eq!(acked, 0);
    assert!(delivered > 0);
    assert!(delivered <= unique);
}

/// Scenario 4: five nodes, two gateways, least-busy policy. Per-band
/// downlink time across the two gateways should not be wildly skewed.
#[test]
fn least_busy_policy_balances_downlink_load_across_gateways() {
    let text = "# stats: terrain=1000000.0m^2\n\
                # node coords: 1 [200.0 500.0] 2 [300.0 500.0] 3 [500.0 500.0] 4 [700.0 500.0] 5 [800.0 500.0]\n\
                # gateway coords: A [250.0 500.0] B [750.0 500.0]\n";
    let terrain = terrain::parse(text).unwrap();
    let config = cli(60.0, 1.0, 1.0, GatewaySelectionPolicy::Lb, 8, FrequencyPlan::Eu868);
    let engine = Engine::build(config, terrain).unwrap();
    let report = engine.run();

    assert_eq!(report.gateways.len(), 2);
    let a: f64 = report.gateways[0].downlink_airtime_total.values().sum();
    let b: f64 = report.gateways[1].downlink_airtime_total.values().sum();
    assert!(a > 0.0 && b > 0.0, "both gateways should have carried some downlink traffic");
    let ratio = (a - b).abs() / a.max(b);
    assert!(ratio < 0.5, "least-busy policy should keep downlink load within range of each other, ratio={ratio}");
}

/// Scenario 6: US915, one node, one gateway. Downlink should be scheduled
/// on the RX1 channel derived from the uplink channel index, and the engine
/// should run without requiring per-band duty-cycle state (US915 has none).
#[test]
fn us915_single_node_runs_without_per_band_duty_cycle() {
    let text = "# stats: terrain=40000.0m^2\n# node coords: 1 [0.0 0.0]\n# gateway coords: A [100.0 100.0]\n";
    let terrain = terrain::parse(text).unwrap();
    let config = cli(600.0, 1.0, 1.0, GatewaySelectionPolicy::Rssi, 8, FrequencyPlan::Us915);
    let engine = Engine::build(config, terrain).unwrap();
    let report = engine.run();

    assert!(report.region.duty_cycle.is_none());
    let unique: u32 = report.nodes.iter().map(|n| n.unique).sum();
    assert!(unique > 0);
}

/// A node placed far enough away that no spreading factor up to SF12 reaches
/// the sole gateway with the required margin must fail to build, not panic
/// or silently drop the node.
#[test]
fn physically_unreachable_node_is_a_build_error() {
    let text = "# stats: terrain=4000000000000.0m^2\n# node coords: 1 [0.0 0.0]\n# gateway coords: A [2000000.0 2000000.0]\n";
    let terrain = terrain::parse(text).unwrap();
    let config = cli(60.0, 1.0, 1.0, GatewaySelectionPolicy::Rssi, 8, FrequencyPlan::Eu868);
    let err = Engine::build(config, terrain).unwrap_err();
    assert!(matches!(err, lorawan_sim::error::SimError::NodeUnreachable { node_id: 1 }));
}

/// Least-busy gateway selection under US915 is rejected at configuration
/// time since the model tracks no per-band duty cycle there.
#[test]
fn least_busy_under_us915_is_rejected_at_validation() {
    let config = cli(60.0, 1.0, 1.0, GatewaySelectionPolicy::Lb, 8, FrequencyPlan::Us915);
    assert!(config.validate().is_err());
}

/// Scenario 5: EU868, enough confirmed nodes clustered on one gateway that
/// the 1% RX1/uplink-band duty cycle saturates. Some acks must fall back to
/// RX2 on the 10% band, so `no_gw_rx1` rises above zero while the packets
/// still eventually ack through RX2.
#[test]
fn eu868_saturated_rx1_duty_cycle_falls_back_to_rx2() {
    let text = "# stats: terrain=40000.0m^2\n\
                # node coords: 1 [0.0 0.0] 2 [10.0 0.0] 3 [0.0 10.0] 4 [10.0 10.0] 5 [5.0 5.0]\n\
                # gateway coords: A [50.0 50.0]\n";
    let terrain = terrain::parse(text).unwrap();
    let config = cli(3600.0, 1.0, 1.0, GatewaySelectionPolicy::Rssi, 8, FrequencyPlan::Eu868);
    let engine = Engine::build(config, terrain).unwrap();
    let report = engine.run();

    let no_rx1: u32 = report.nodes.iter().map(|n| n.no_gw_rx1).sum();
    let no_rx1_or_rx2: u32 = report.nodes.iter().map(|n| n.no_gw_rx1_or_rx2).sum();
    assert!(no_rx1 > 0, "the 1% duty-cycle band should saturate under this much confirmed traffic");
    // RX2 (10% band) has ten times the budget, so it should absorb most of
    // the overflow that RX1 could not serve.
    assert!(no_rx1_or_rx2 < no_rx1);
}

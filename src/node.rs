//! End-device data model.
//!
//! `NodeId`/`GatewayId` are small integer handles into `Engine`'s arenas; the
//! free-form terrain identifiers (numeric node ids, letter-sequence gateway
//! ids) are kept only as display labels.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayId(pub u32);

/// Rolling window of the last ten best received-SNR observations across
/// gateways, used by the ADR power step.
pub const SNR_WINDOW_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Original numeric terrain identifier, kept for reporting only.
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub tx_power_idx: usize,
    pub sf: u8,
    pub confirmed: bool,
    pub payload_size: usize,

    /// Retransmission counter for the in-flight confirmed packet.
    pub retries: u32,
    /// Monotone unique-uplink counter (FCntUp analogue).
    pub seq: u32,
    /// Per-band (uplink/EU868 "48") next-allowed-transmission time.
    pub next_allowed_uplink: f64,
    pub last_channel: usize,

    pub snr_window: VecDeque<f64>,
    pub adr_pending: bool,

    /// Gateways that can hear this node at its assigned SF with the
    /// required margin (SF-assignment-time cache).
    pub reachable_at_sf: HashSet<GatewayId>,
    /// Gateways additionally reachable at the region's RX2 SF, used to
    /// broaden the RX2 downlink candidate set.
    pub reachable_at_rx2_sf: HashSet<GatewayId>,

    pub unique: u32,
    pub delivered: u32,
    pub acked: u32,
    pub dropped_confirmed: u32,
    pub dropped_unconfirmed: u32,
    /// Count of attempts for which no gateway was feasible in RX1.
    pub no_gw_rx1: u32,
    /// Count of attempts for which no gateway was feasible in RX1 or RX2.
    pub no_gw_rx1_or_rx2: u32,

    pub energy_mj: f64,
}

impl Node {
    pub fn new(id: NodeId, label: String, x: f64, y: f64, confirmed: bool, payload_size: usize, tx_power_idx: usize) -> Self {
        Self {
            id,
            label,
            x,
            y,
            tx_power_idx,
            sf: 7,
            confirmed,
            payload_size,
            retries: 0,
            seq: 0,
            next_allowed_uplink: 0.0,
            last_channel: 0,
            snr_window: VecDeque::with_capacity(SNR_WINDOW_LEN),
            adr_pending: false,
            reachable_at_sf: HashSet::new(),
            reachable_at_rx2_sf: HashSet::new(),
            unique: 0,
            delivered: 0,
            acked: 0,
            dropped_confirmed: 0,
            dropped_unconfirmed: 0,
            no_gw_rx1: 0,
            no_gw_rx1_or_rx2: 0,
            energy_mj: 0.0,
        }
    }

    /// Pushes a new best-SNR-at-any-gateway sample, keeping only the last
    /// `SNR_WINDOW_LEN` observations.
    pub fn push_snr_sample(&mut self, snr_db: f64) {
        if self.snr_window.len() == SNR_WINDOW_LEN {
            self.snr_window.pop_front();
        }
        self.snr_window.push_back(snr_db);
    }
}

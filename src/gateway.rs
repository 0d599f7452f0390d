//! Gateway data model.
//!
//! The half-duplex gateway state machine: one uplink-lock per
//! `(gateway, channel)`, a list of downlink-busy intervals purged lazily, and
//! per-band duty-cycle deadlines.

use std::collections::HashMap;

use crate::node::GatewayId;
use crate::region::Band;

/// The single transmission a gateway is currently demodulating on a given
/// channel. Pre-emption is not allowed: a new lock only replaces this one
/// once `end` has passed.
#[derive(Debug, Clone, Copy)]
pub struct UplinkLock {
    pub sta: f64,
    pub end: f64,
    pub sf: u8,
}

#[derive(Debug, Clone)]
pub struct Gateway {
    pub id: GatewayId,
    /// Letter-sequence terrain identifier (`A`, `B`, … `AA`, …).
    pub label: String,
    pub x: f64,
    pub y: f64,

    /// Downlink-busy intervals `(start, end)`. Purged lazily of anything
    /// that ended before "now" the next time this gateway transmits.
    pub downlink_busy: Vec<(f64, f64)>,
    /// Per-channel uplink-lock record, at most one per channel.
    pub uplink_lock: HashMap<usize, UplinkLock>,
    /// Per-band next-allowed-downlink time (EU868 only; always 0.0 and
    /// unused for US915).
    pub next_allowed_downlink: HashMap<Band, f64>,
    /// Per-band total downlink airtime, for duty-cycle utilisation reporting.
    pub downlink_airtime_total: HashMap<Band, f64>,
    pub acks_and_commands_sent: u32,
}

impl Gateway {
    pub fn new(id: GatewayId, label: String, x: f64, y: f64) -> Self {
        let mut next_allowed_downlink = HashMap::new();
        next_allowed_downlink.insert(Band::Main, 0.0);
        next_allowed_downlink.insert(Band::Rx2, 0.0);
        let mut downlink_airtime_total = HashMap::new();
        downlink_airtime_total.insert(Band::Main, 0.0);
        downlink_airtime_total.insert(Band::Rx2, 0.0);
        Self {
            id,
            label,
            x,
            y,
            downlink_busy: Vec::new(),
            uplink_lock: HashMap::new(),
            next_allowed_downlink,
            downlink_airtime_total,
            acks_and_commands_sent: 0,
        }
    }

    /// Drops downlink-busy intervals that ended before `now`. Called lazily
    /// before this gateway's state is consulted or mutated again.
    pub fn purge_busy(&mut self, now: f64) {
        self.downlink_busy.retain(|&(_, end)| end >= now);
    }

    pub fn is_downlink_busy_during(&self, sta: f64, end: f64) -> bool {
        self.downlink_busy.iter().any(|&(s, e)| s <= end && e >= sta)
    }

    pub fn is_uplink_locked_during(&self, channel: usize, sta: f64, end: f64, same_sf: Option<u8>) -> bool {
        match self.uplink_lock.get(&channel) {
            Some(lock) => {
                let overlaps = lock.sta <= end && lock.end >= sta;
                match same_sf {
                    Some(sf) => overlaps && lock.sf == sf,
                    None => overlaps,
                }
            }
            None => false,
        }
    }

    /// Installs an uplink-lock, overwriting only if the previous lock (if
    /// any) has already ended — pre-emption is never allowed.
    pub fn install_uplink_lock(&mut self, channel: usize, lock: UplinkLock, now: f64) {
        let can_install = match self.uplink_lock.get(&channel) {
            Some(existing) => existing.end <= now,
            None => true,
        };
        if can_install {
            self.uplink_lock.insert(channel, lock);
        }
    }

    pub fn register_downlink(&mut self, band: Band, sta: f64, end: f64, airtime: f64, duty_cycle_multiplier: Option<f64>) {
        self.downlink_busy.push((sta, end));
        *self.downlink_airtime_total.entry(band).or_insert(0.0) += airtime;
        if let Some(mult) = duty_cycle_multiplier {
            let next = end + mult * airtime;
            let entry = self.next_allowed_downlink.entry(band).or_insert(0.0);
            if next > *entry {
                *entry = next;
            }
        }
        self.acks_and_commands_sent += 1;
    }
}

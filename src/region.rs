//! Regional frequency plans: `EU868` and `US915`, each selecting a channel
//! table, RX2 SF, RX2 channel, and per-band duty-cycle rules, following the
//! common LoRaWAN regional-parameter tables for the two plans.

use std::fmt;

/// Uplink sub-band identity used for duty-cycle accounting.
///
/// EU868 tracks two bands: the uplink/RX1 band ("48", 1% duty cycle) and the
/// dedicated RX2 downlink band ("54"/rx2ch, 10% duty cycle). US915 has no
/// per-band duty cycle in this model, so `Main`
/// is the only band ever consulted there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Main,
    Rx2,
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Band::Main => write!(f, "48"),
            Band::Rx2 => write!(f, "rx2ch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyPlan {
    Eu868,
    Us915,
}

impl fmt::Display for FrequencyPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyPlan::Eu868 => write!(f, "EU868"),
            FrequencyPlan::Us915 => write!(f, "US915"),
        }
    }
}

impl std::str::FromStr for FrequencyPlan {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EU868" | "EU" => Ok(FrequencyPlan::Eu868),
            "US915" | "US" => Ok(FrequencyPlan::Us915),
            other => Err(format!("unknown frequency plan {other:?}, expected EU868 or US915")),
        }
    }
}

/// Duty-cycle multipliers for a band: a transmitter of airtime `a` on this
/// band must wait `multiplier * a` after `end` before transmitting again, so
/// that the band is occupied a `1/(multiplier+1)` fraction of the time.
#[derive(Debug, Clone, Copy)]
pub struct DutyCycle {
    pub uplink_band_multiplier: f64,
    pub rx2_band_multiplier: f64,
}

pub struct RegionPlan {
    pub plan: FrequencyPlan,
    /// Uplink channel centre frequencies in MHz; also the RX1 channel table
    /// for EU868 (RX1 echoes the uplink channel).
    pub uplink_channels: Vec<f64>,
    pub uplink_bandwidth_hz: u32,
    /// RX1 downlink channel per uplink channel index. EU868: identical to
    /// `uplink_channels`. US915: `channels_d[i]`, a distinct 500 kHz table.
    pub rx1_channels: Vec<f64>,
    pub rx1_bandwidth_hz: u32,
    pub rx2_channel_mhz: f64,
    pub rx2_bandwidth_hz: u32,
    pub rx2_sf: u8,
    /// `None` for US915: no per-band duty cycle is modeled.
    pub duty_cycle: Option<DutyCycle>,
    /// Fixed downlink EIRP used for gateway-to-node interference at the
    /// receiving node.
    pub gateway_tx_power_dbm: f64,
    /// Upper bound of the transmit-power ladder index (region dependent).
    pub max_power_index: usize,
}

impl RegionPlan {
    pub fn new(plan: FrequencyPlan) -> Self {
        match plan {
            FrequencyPlan::Eu868 => {
                let uplink_channels = vec![868.1, 868.3, 868.5];
                RegionPlan {
                    plan,
                    rx1_channels: uplink_channels.clone(),
                    uplink_channels,
                    uplink_bandwidth_hz: 125_000,
                    rx1_bandwidth_hz: 125_000,
                    rx2_channel_mhz: 869.525,
                    rx2_bandwidth_hz: 125_000,
                    rx2_sf: 9,
                    duty_cycle: Some(DutyCycle { uplink_band_multiplier: 99.0, rx2_band_multiplier: 9.0 }),
                    gateway_tx_power_dbm: 14.0,
                    max_power_index: POWER_LADDER_EU868.len() - 1,
                }
            }
            FrequencyPlan::Us915 => {
                let uplink_channels = vec![903.9, 904.1, 904.3, 904.5, 904.7, 904.9, 905.1, 905.3];
                let rx1_channels = (0..8).map(|i| 923.3 + 0.6 * i as f64).collect();
                RegionPlan {
                    plan,
                    uplink_channels,
                    uplink_bandwidth_hz: 125_000,
                    rx1_channels,
                    rx1_bandwidth_hz: 500_000,
                    rx2_channel_mhz: 923.3,
                    rx2_bandwidth_hz: 500_000,
                    rx2_sf: 12,
                    duty_cycle: None,
                    gateway_tx_power_dbm: 27.0,
                    max_power_index: POWER_LADDER_US915.len() - 1,
                }
            }
        }
    }

    pub fn num_channels(&self) -> usize {
        self.uplink_channels.len()
    }

    /// Dedicated event-queue channel slot for RX2 downlinks: one past the
    /// uplink channel range, so RX2 (a distinct fixed frequency,
    /// `rx2_channel_mhz`) never shares a queue bucket — and therefore never
    /// spuriously collides — with uplinks or RX1 acks on uplink channel 0.
    pub fn rx2_queue_channel(&self) -> usize {
        self.uplink_channels.len()
    }

    /// Total queue channel-bucket count: uplink channels plus the one
    /// dedicated RX2 slot.
    pub fn total_queue_channels(&self) -> usize {
        self.uplink_channels.len() + 1
    }

    pub fn rx1_channel_for(&self, uplink_channel: usize) -> usize {
        match self.plan {
            // EU868 uses the same channel index as the uplink.
            FrequencyPlan::Eu868 => uplink_channel,
            // US915: channels_d[uplink_ch_index].
            FrequencyPlan::Us915 => uplink_channel,
        }
    }

    pub fn power_ladder(&self) -> &'static [f64] {
        match self.plan {
            FrequencyPlan::Eu868 => &POWER_LADDER_EU868,
            FrequencyPlan::Us915 => &POWER_LADDER_US915,
        }
    }
}

/// Transmit-power ladder, index 0 = highest power, indexed by
/// `Node::tx_power_idx`. ADR steps the index up (lower power) or down
/// (higher power) in 3 dB increments, clamped to these bounds.
pub const POWER_LADDER_EU868: [f64; 8] = [14.0, 12.0, 10.0, 8.0, 6.0, 4.0, 2.0, 0.0];
pub const POWER_LADDER_US915: [f64; 11] = [30.0, 28.0, 26.0, 24.0, 22.0, 20.0, 18.0, 16.0, 14.0, 12.0, 10.0];

/// Receiver sensitivity (dBm) at 125 kHz bandwidth, indexed by SF (7..=12).
pub const SENSITIVITY_BW125: [f64; 6] = [-124.0, -127.0, -130.0, -133.0, -135.0, -137.0];

/// Sensitivity (dBm) at 500 kHz bandwidth (US915 RX2), indexed by SF (7..=12).
/// Doubling bandwidth costs roughly 3 dB of sensitivity relative to 125 kHz.
pub const SENSITIVITY_BW500: [f64; 6] = [-121.0, -124.0, -127.0, -130.0, -132.0, -134.0];

pub fn sensitivity(sf: u8, bandwidth_hz: u32) -> f64 {
    let idx = (sf.clamp(7, 12) - 7) as usize;
    if bandwidth_hz >= 500_000 { SENSITIVITY_BW500[idx] } else { SENSITIVITY_BW125[idx] }
}

/// Required SNR for the device's own spreading factor, used in the ADR
/// step: `gap = max(samples) − snr_required(sf) − margin`.
pub fn snr_required(sf: u8) -> f64 {
    match sf {
        7 => -7.5,
        8 => -10.0,
        9 => -12.5,
        10 => -15.0,
        11 => -17.5,
        _ => -20.0,
    }
}

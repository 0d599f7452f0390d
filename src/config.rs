//! CLI arguments and simulation configuration.
//!
//! `clap::Parser` derive style: three positional arguments (packet rate,
//! simulation horizon, terrain file) plus `#[arg(long)]` flags with defaults
//! for every named configuration constant.

use clap::{Parser, ValueEnum};

use crate::error::SimError;
use crate::region::FrequencyPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PacketSizeDistribution {
    Uniform,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GatewaySelectionPolicy {
    /// First feasible gateway, uniform tie-break.
    Fcfs,
    /// Highest received power at the uplink.
    Rssi,
    /// Smallest per-band duty-cycle deadline (EU868 only).
    Lb,
    /// RSSI with an abstention rule based on network-average "no gateway" rate.
    Urcb,
    /// RSSI with an abstention rule based on network-average ack fairness.
    Fbs,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "lorawan-sim", author, version, about = "LoRaWAN discrete-event network simulator", long_about = None)]
pub struct Cli {
    /// Uplink packets generated per device per hour.
    pub packets_per_hour: f64,

    /// Simulated duration, in hours.
    pub simulation_time_hours: f64,

    /// Path to the terrain file (node/gateway coordinates).
    pub terrain_file: String,

    /// Fraction of nodes that require confirmed (acked) traffic, 0..1.
    #[arg(long, default_value_t = 1.0)]
    pub confirmed_perc: f64,

    /// Enable the non-orthogonal SF capture model.
    #[arg(long, default_value_t = false)]
    pub full_collision: bool,

    /// Retry cap per confirmed packet.
    #[arg(long, default_value_t = 8)]
    pub max_retr: u32,

    /// Use a periodic inter-arrival instead of an exponential one.
    #[arg(long, default_value_t = false)]
    pub fixed_packet_rate: bool,

    /// Use a fixed payload size instead of drawing from a distribution.
    #[arg(long, default_value_t = true)]
    pub fixed_packet_size: bool,

    /// Payload size in bytes (fixed, or distribution mean).
    #[arg(long, default_value_t = 20)]
    pub packet_size: usize,

    /// Payload-size distribution when `fixed_packet_size` is false.
    #[arg(long, value_enum, default_value_t = PacketSizeDistribution::Uniform)]
    pub packet_size_distr: PacketSizeDistribution,

    /// Enable adaptive data-rate transmit-power adjustment.
    #[arg(long, default_value_t = true)]
    pub adr_on: bool,

    /// Allow RX2 gateway selection to broaden beyond the gateways that
    /// actually heard the uplink (to every gateway reachable at the RX2 SF)
    /// when the uplink SF is below the RX2 SF. When false, RX2 is always
    /// restricted to the received-list, the same as RX1.
    #[arg(long, default_value_t = true)]
    pub double_gws: bool,

    /// Gateway-selection policy for downlink acknowledgements.
    #[arg(long, value_enum, default_value_t = GatewaySelectionPolicy::Rssi)]
    pub policy: GatewaySelectionPolicy,

    /// Regional frequency plan.
    #[arg(long, default_value = "EU868")]
    pub fplan: FrequencyPlan,

    /// Fraction of reachable gateways that must be free before URCB/FBS
    /// abstain.
    #[arg(long, default_value_t = 2.0 / 3.0)]
    pub fbs_free_fraction: f64,

    /// RNG seed, for reproducible runs.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Enable the auto-stop heuristic on moving PDR standard deviation.
    #[arg(long, default_value_t = false)]
    pub auto_stop: bool,
}

impl Cli {
    /// Rejects inconsistent region/policy combinations: the least-busy
    /// policy ranks gateways by per-band duty-cycle deadline, a notion this
    /// model only tracks for EU868.
    pub fn validate(&self) -> Result<(), SimError> {
        if matches!(self.policy, GatewaySelectionPolicy::Lb) && matches!(self.fplan, FrequencyPlan::Us915) {
            return Err(SimError::Config("least-busy gateway-selection policy requires EU868 (US915 has no per-band duty cycle)".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confirmed_perc) {
            return Err(SimError::Config(format!("confirmed_perc must be within 0..1, got {}", self.confirmed_perc)));
        }
        if self.max_retr == 0 {
            return Err(SimError::Config("max_retr must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl clap::builder::ValueParserFactory for FrequencyPlan {
    type Parser = FrequencyPlanParser;
    fn value_parser() -> Self::Parser {
        FrequencyPlanParser
    }
}

#[derive(Clone)]
pub struct FrequencyPlanParser;

impl clap::builder::TypedValueParser for FrequencyPlanParser {
    type Value = FrequencyPlan;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let s = value.to_str().ok_or_else(|| clap::Error::new(clap::error::ErrorKind::InvalidUtf8))?;
        s.parse::<FrequencyPlan>().map_err(|e| {
            let mut err = clap::Error::new(clap::error::ErrorKind::InvalidValue).with_cmd(cmd);
            if let Some(arg) = arg {
                err.insert(clap::error::ContextKind::InvalidArg, clap::error::ContextValue::String(arg.to_string()));
            }
            err.insert(clap::error::ContextKind::InvalidValue, clap::error::ContextValue::String(e));
            err
        })
    }
}

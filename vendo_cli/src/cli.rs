//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "vendo", version, about = "Coin-operated dispenser controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/vendo.toml")]
    pub config: PathBuf,

    /// Calibration store file (persisted coin signatures and flow factor)
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Exit after this many ticks (0 = run until EOF/Ctrl-C); for smoke tests
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub max_ticks: u64,

    /// Simulated flow-meter pulse rate while the pump runs (sim build only)
    #[cfg_attr(feature = "hardware", allow(dead_code))]
    #[arg(long, value_name = "HZ", default_value_t = 40)]
    pub sim_flow_hz: u32,

    /// Coin acceptor pulse pin (BCM numbering, hardware build)
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    #[arg(long, value_name = "PIN", default_value_t = 17)]
    pub coin_pin: u8,

    /// Flow meter pulse pin
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    #[arg(long, value_name = "PIN", default_value_t = 27)]
    pub flow_pin: u8,

    /// HC-SR04 trigger pin
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    #[arg(long, value_name = "PIN", default_value_t = 23)]
    pub trig_pin: u8,

    /// HC-SR04 echo pin
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    #[arg(long, value_name = "PIN", default_value_t = 24)]
    pub echo_pin: u8,

    /// Pump relay pin
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    #[arg(long, value_name = "PIN", default_value_t = 5)]
    pub pump_pin: u8,

    /// Valve relay pin
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    #[arg(long, value_name = "PIN", default_value_t = 6)]
    pub valve_pin: u8,
}

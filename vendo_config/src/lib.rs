#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and the persisted calibration store for the vending
//! controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `ConfigStore` persists calibration results (coin-pulse signatures and
//!   flow pulses-per-liter) so they survive power loss; values outside the
//!   plausible ranges are rejected at load time in favor of the compiled-in
//!   defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One coin-acceptor signature: a denomination recognized by a pulse-count
/// band `[pulses - tolerance, pulses + tolerance]`, crediting `credit_ml`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct CoinSignatureCfg {
    pub denomination: u16,
    pub pulses: u32,
    pub tolerance: u32,
    pub credit_ml: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CoinsCfg {
    /// A pulse burst is closed once no new edge arrives for this long.
    pub quiet_ms: u64,
    /// Minimum spacing between accepted coin edges (acceptor contact bounce).
    pub debounce_ms: u64,
    /// Bursts above this count are electrical noise, rejected outright.
    pub max_burst_pulses: u32,
    /// Per-denomination wait bound during coin-signature learning.
    pub learn_timeout_ms: u64,
    pub signatures: Vec<CoinSignatureCfg>,
}

impl Default for CoinsCfg {
    fn default() -> Self {
        Self {
            quiet_ms: 800,
            debounce_ms: 50,
            max_burst_pulses: 12,
            learn_timeout_ms: 10_000,
            signatures: default_signatures(),
        }
    }
}

/// Compiled-in coin table: multi-coin acceptors commonly emit one pulse per
/// unit of denomination, so the bands sit at 1 / 5 / 10 pulses. Tolerance
/// bands must stay disjoint or validation rejects the set.
pub fn default_signatures() -> Vec<CoinSignatureCfg> {
    vec![
        CoinSignatureCfg {
            denomination: 1,
            pulses: 1,
            tolerance: 1,
            credit_ml: 50,
        },
        CoinSignatureCfg {
            denomination: 5,
            pulses: 5,
            tolerance: 1,
            credit_ml: 250,
        },
        CoinSignatureCfg {
            denomination: 10,
            pulses: 10,
            tolerance: 1,
            credit_ml: 500,
        },
    ]
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct FlowCfg {
    /// Flow-meter calibration constant.
    pub pulses_per_liter: f32,
    /// Plausible sensor range; calibration results outside it are rejected.
    pub min_pulses_per_liter: f32,
    pub max_pulses_per_liter: f32,
}

impl Default for FlowCfg {
    fn default() -> Self {
        Self {
            pulses_per_liter: 450.0,
            min_pulses_per_liter: 200.0,
            max_pulses_per_liter: 12_000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PresenceCfg {
    /// A container is present when 0 < distance < threshold_cm.
    pub threshold_cm: f32,
    /// A raw classification must hold this long before the stable state flips.
    pub stable_ms: u64,
    /// Max wait per distance read before the sample counts as "no reading".
    pub sensor_timeout_ms: u64,
}

impl Default for PresenceCfg {
    fn default() -> Self {
        Self {
            threshold_cm: 15.0,
            stable_ms: 750,
            sensor_timeout_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SessionCfg {
    /// Pre-dispense countdown, announced once per second.
    pub countdown_s: u32,
    /// Removal grace window while dispensing.
    pub grace_ms: u64,
    /// Minimum interval between DISPENSE_PROGRESS events.
    pub progress_interval_ms: u64,
    /// Defensive reset after this long with no coin/presence/host activity.
    pub inactivity_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            countdown_s: 3,
            grace_ms: 3_000,
            progress_interval_ms: 1_000,
            inactivity_ms: 300_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ControlCfg {
    /// Main control-loop tick rate.
    pub tick_hz: u32,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self { tick_hz: 20 }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub coins: CoinsCfg,
    pub flow: FlowCfg,
    pub presence: PresenceCfg,
    pub session: SessionCfg,
    pub control: ControlCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Return the first pair of denominations whose tolerance bands overlap,
/// if any. Overlapping bands make classification ambiguous and are a
/// configuration error, never resolved by guessing.
pub fn overlapping_signatures(sigs: &[CoinSignatureCfg]) -> Option<(u16, u16)> {
    for (i, a) in sigs.iter().enumerate() {
        for b in sigs.iter().skip(i + 1) {
            let (a_lo, a_hi) = band(a);
            let (b_lo, b_hi) = band(b);
            if a_lo <= b_hi && b_lo <= a_hi {
                return Some((a.denomination, b.denomination));
            }
        }
    }
    None
}

fn band(s: &CoinSignatureCfg) -> (i64, i64) {
    let c = i64::from(s.pulses);
    let t = i64::from(s.tolerance);
    (c - t, c + t)
}

fn validate_signature_set(sigs: &[CoinSignatureCfg]) -> eyre::Result<()> {
    if sigs.is_empty() {
        eyre::bail!("coins.signatures must not be empty");
    }
    for s in sigs {
        if s.pulses == 0 {
            eyre::bail!(
                "signature for denomination {} has a zero pulse center",
                s.denomination
            );
        }
        if s.credit_ml == 0 {
            eyre::bail!(
                "signature for denomination {} credits 0 mL",
                s.denomination
            );
        }
    }
    if let Some((a, b)) = overlapping_signatures(sigs) {
        eyre::bail!("signature tolerance bands overlap for denominations {a} and {b}");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.control.tick_hz == 0 {
            eyre::bail!("control.tick_hz must be > 0");
        }
        if self.coins.quiet_ms == 0 {
            eyre::bail!("coins.quiet_ms must be > 0");
        }
        if self.coins.max_burst_pulses == 0 {
            eyre::bail!("coins.max_burst_pulses must be > 0");
        }
        validate_signature_set(&self.coins.signatures)?;
        if !self.presence.threshold_cm.is_finite() || self.presence.threshold_cm <= 0.0 {
            eyre::bail!("presence.threshold_cm must be a positive finite distance");
        }
        if self.presence.stable_ms == 0 {
            eyre::bail!("presence.stable_ms must be > 0");
        }
        if self.session.countdown_s == 0 {
            eyre::bail!("session.countdown_s must be > 0");
        }
        if self.session.progress_interval_ms == 0 {
            eyre::bail!("session.progress_interval_ms must be > 0");
        }
        let f = &self.flow;
        if !(f.min_pulses_per_liter.is_finite()
            && f.max_pulses_per_liter.is_finite()
            && f.min_pulses_per_liter > 0.0
            && f.min_pulses_per_liter < f.max_pulses_per_liter)
        {
            eyre::bail!("flow pulses-per-liter range is degenerate");
        }
        if !plausible_ppl(f.pulses_per_liter, f) {
            eyre::bail!(
                "flow.pulses_per_liter {} outside plausible range [{}, {}]",
                f.pulses_per_liter,
                f.min_pulses_per_liter,
                f.max_pulses_per_liter
            );
        }
        Ok(())
    }

    /// Adopt a persisted calibration record, field by field. Implausible or
    /// internally inconsistent values are rejected with a warning and the
    /// compiled-in/config values kept.
    pub fn apply_calibration(&mut self, rec: &CalibrationRecord) {
        if plausible_ppl(rec.pulses_per_liter, &self.flow) {
            self.flow.pulses_per_liter = rec.pulses_per_liter;
        } else {
            tracing::warn!(
                pulses_per_liter = rec.pulses_per_liter,
                "persisted flow calibration out of range; keeping default"
            );
        }
        if rec.signatures.is_empty() {
            return;
        }
        match validate_signature_set(&rec.signatures) {
            Ok(()) => self.coins.signatures = rec.signatures.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "persisted coin signatures invalid; keeping default");
            }
        }
    }
}

fn plausible_ppl(v: f32, f: &FlowCfg) -> bool {
    v.is_finite() && v >= f.min_pulses_per_liter && v <= f.max_pulses_per_liter
}

/// Calibration results persisted across power cycles. Credit is deliberately
/// NOT part of this record; it resets to 0 on restart.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CalibrationRecord {
    pub pulses_per_liter: f32,
    #[serde(default)]
    pub signatures: Vec<CoinSignatureCfg>,
}

/// File-backed store for `CalibrationRecord`. An ephemeral store (no path)
/// accepts saves and returns nothing on load; tests and dry runs use it.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    /// Load the persisted record, if present and parseable. A missing or
    /// corrupt file is not fatal; the controller falls back to defaults.
    pub fn load(&self) -> Option<CalibrationRecord> {
        let path = self.path.as_ref()?;
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "calibration store unreadable");
                return None;
            }
        };
        match toml::from_str::<CalibrationRecord>(&text) {
            Ok(rec) => Some(rec),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "calibration store corrupt");
                None
            }
        }
    }

    pub fn save(&self, rec: &CalibrationRecord) -> eyre::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let text = toml::to_string_pretty(rec)
            .map_err(|e| eyre::eyre!("serializing calibration record: {e}"))?;
        // Write-then-rename so a power loss mid-save cannot corrupt the record.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| eyre::eyre!("writing {}: {e}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| eyre::eyre!("renaming into {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "calibration persisted");
        Ok(())
    }
}

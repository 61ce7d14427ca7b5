//! Coin burst classification.
//!
//! The acceptor signals a coin as a burst of pulses. A burst is closed once
//! no new pulse has arrived for the quiet interval; only then is its pulse
//! count compared against the configured signature bands. Exactly one match
//! credits the coin. Zero or multiple matches reject it: borderline pulse
//! counts must never be resolved by picking the nearest band.

use crate::pulse::PulseSnapshot;
use vendo_config::CoinSignatureCfg;

/// Runtime form of a coin signature; read-only during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinSignature {
    pub denomination: u16,
    pub pulses: u32,
    pub tolerance: u32,
    pub credit_ml: u32,
}

impl From<&CoinSignatureCfg> for CoinSignature {
    fn from(c: &CoinSignatureCfg) -> Self {
        Self {
            denomination: c.denomination,
            pulses: c.pulses,
            tolerance: c.tolerance,
            credit_ml: c.credit_ml,
        }
    }
}

impl From<&CoinSignature> for CoinSignatureCfg {
    fn from(s: &CoinSignature) -> Self {
        Self {
            denomination: s.denomination,
            pulses: s.pulses,
            tolerance: s.tolerance,
            credit_ml: s.credit_ml,
        }
    }
}

impl CoinSignature {
    fn matches(&self, pulses: u32) -> bool {
        let lo = self.pulses.saturating_sub(self.tolerance);
        let hi = self.pulses.saturating_add(self.tolerance);
        (lo..=hi).contains(&pulses)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Burst outside the electrically plausible range.
    Noise,
    /// No signature band contains the count.
    NoMatch,
    /// More than one band contains the count.
    Ambiguous,
}

impl core::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Noise => "noise",
            Self::NoMatch => "no-match",
            Self::Ambiguous => "ambiguous",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinOutcome {
    Accepted { denomination: u16, credit_ml: u32 },
    Rejected { pulses: u32, reason: RejectReason },
}

#[derive(Debug, Clone)]
pub struct CoinClassifier {
    signatures: Vec<CoinSignature>,
    quiet_ms: u64,
    max_burst_pulses: u32,
    /// Coin edges already consumed from the monotonic counter.
    taken: u32,
}

impl CoinClassifier {
    pub fn new(signatures: Vec<CoinSignature>, quiet_ms: u64, max_burst_pulses: u32) -> Self {
        Self {
            signatures,
            quiet_ms,
            max_burst_pulses,
            taken: 0,
        }
    }

    pub fn signatures(&self) -> &[CoinSignature] {
        &self.signatures
    }

    /// Adopt a freshly learned signature set. The caller is responsible for
    /// having checked the tolerance bands for overlap.
    pub fn set_signatures(&mut self, signatures: Vec<CoinSignature>) {
        self.signatures = signatures;
    }

    /// If a burst has gone quiet, consume it and return its pulse count.
    /// Returns None while no pulses are pending or the burst is still open.
    /// Also used by calibration learning, which wants raw counts.
    pub fn take_closed_burst(&mut self, snap: &PulseSnapshot, now_ms: u64) -> Option<u32> {
        let pending = snap.coin.saturating_sub(self.taken);
        if pending == 0 {
            return None;
        }
        if now_ms.saturating_sub(snap.last_coin_ms) < self.quiet_ms {
            return None;
        }
        self.taken = snap.coin;
        Some(pending)
    }

    /// Discard any pending (possibly still open) burst without crediting.
    /// Used on reset paths so a half-inserted coin cannot credit later.
    pub fn discard_pending(&mut self, snap: &PulseSnapshot) {
        let pending = snap.coin.saturating_sub(self.taken);
        if pending > 0 {
            tracing::debug!(pulses = pending, "discarding open coin burst");
        }
        self.taken = snap.coin;
    }

    pub fn classify(&self, pulses: u32) -> CoinOutcome {
        if pulses < 1 || pulses > self.max_burst_pulses {
            return CoinOutcome::Rejected {
                pulses,
                reason: RejectReason::Noise,
            };
        }
        let mut hit: Option<&CoinSignature> = None;
        let mut hits = 0u32;
        for sig in &self.signatures {
            if sig.matches(pulses) {
                hits += 1;
                hit = Some(sig);
            }
        }
        match (hits, hit) {
            (1, Some(sig)) => CoinOutcome::Accepted {
                denomination: sig.denomination,
                credit_ml: sig.credit_ml,
            },
            (0, _) => CoinOutcome::Rejected {
                pulses,
                reason: RejectReason::NoMatch,
            },
            _ => CoinOutcome::Rejected {
                pulses,
                reason: RejectReason::Ambiguous,
            },
        }
    }
}

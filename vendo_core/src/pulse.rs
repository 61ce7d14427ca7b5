//! Interrupt-safe pulse accumulation.
//!
//! Two independent monotonically increasing counters (coin-acceptor edges,
//! flow-meter edges) incremented only through cloneable producer handles.
//! The producers stand in for interrupt context: GPIO edge callbacks or
//! simulator threads call them, and they do nothing beyond incrementing.
//! All classification and business logic lives outside this module.
//!
//! Readers take a `PulseSnapshot` once per control-loop tick so the state
//! machine sees one consistent view for the whole tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use vendo_traits::Clock;

#[derive(Debug, Default)]
struct Counters {
    coin: AtomicU32,
    /// 64-bit: a flow meter runs for the life of the unit and must never
    /// wrap mid-pour.
    flow: AtomicU64,
    /// ms since the controller epoch of the last accepted coin edge.
    last_coin_ms: AtomicU64,
}

/// Owner of the two pulse streams. Lives in the controller; hands out
/// producer handles to whatever drives the physical edges.
pub struct PulseCounter {
    counters: Arc<Counters>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    coin_debounce_ms: u64,
}

impl core::fmt::Debug for PulseCounter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("PulseCounter")
            .field("coin", &snap.coin)
            .field("flow", &snap.flow)
            .field("last_coin_ms", &snap.last_coin_ms)
            .finish()
    }
}

/// Consistent per-tick view of both counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSnapshot {
    pub coin: u32,
    pub flow: u64,
    pub last_coin_ms: u64,
}

impl PulseCounter {
    /// `epoch` must be the same instant the controller measures tick time
    /// against, so `last_coin_ms` is directly comparable to tick timestamps.
    pub fn new(clock: Arc<dyn Clock + Send + Sync>, epoch: Instant, coin_debounce_ms: u64) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            clock,
            epoch,
            coin_debounce_ms,
        }
    }

    pub fn coin_input(&self) -> CoinPulseInput {
        CoinPulseInput {
            counters: self.counters.clone(),
            clock: self.clock.clone(),
            epoch: self.epoch,
            debounce_ms: self.coin_debounce_ms,
        }
    }

    pub fn flow_input(&self) -> FlowPulseInput {
        FlowPulseInput {
            counters: self.counters.clone(),
        }
    }

    pub fn snapshot(&self) -> PulseSnapshot {
        PulseSnapshot {
            coin: self.counters.coin.load(Ordering::Acquire),
            flow: self.counters.flow.load(Ordering::Acquire),
            last_coin_ms: self.counters.last_coin_ms.load(Ordering::Acquire),
        }
    }
}

/// Coin-acceptor edge producer. Contact bounce is suppressed here with a
/// minimum inter-edge spacing, matching the acceptor's electrical behavior;
/// burst grouping is the classifier's job.
#[derive(Clone)]
pub struct CoinPulseInput {
    counters: Arc<Counters>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    debounce_ms: u64,
}

impl CoinPulseInput {
    pub fn pulse(&self) {
        let now = self.clock.ms_since(self.epoch);
        let last = self.counters.last_coin_ms.load(Ordering::Relaxed);
        let seen = self.counters.coin.load(Ordering::Relaxed);
        if seen > 0 && now.saturating_sub(last) < self.debounce_ms {
            return;
        }
        self.counters.coin.fetch_add(1, Ordering::Release);
        self.counters.last_coin_ms.store(now, Ordering::Release);
    }
}

/// Flow-meter edge producer. No debounce: hall-effect flow meters produce
/// clean square edges and every pulse is volume.
#[derive(Clone)]
pub struct FlowPulseInput {
    counters: Arc<Counters>,
}

impl FlowPulseInput {
    pub fn pulse(&self) {
        self.counters.flow.fetch_add(1, Ordering::Release);
    }

    /// Batch increment for simulators feeding many pulses per tick.
    pub fn pulse_n(&self, n: u64) {
        self.counters.flow.fetch_add(n, Ordering::Release);
    }
}

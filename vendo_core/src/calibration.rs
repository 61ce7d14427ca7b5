//! Non-blocking calibration.
//!
//! Both procedures are ordinary states observed by the control loop, never
//! an inner loop of their own: presence sampling and host commands keep
//! running while calibration is in progress.
//!
//! Coin learning walks the configured denominations one at a time, adopting
//! the next closed burst as that coin's pulse signature. A denomination
//! that sees no coin before its deadline keeps its previous signature. The
//! learned set is adopted only if its tolerance bands stay disjoint.
//!
//! Flow calibration energizes the actuators while the operator captures
//! exactly one liter; the flow pulses counted over the run become the new
//! pulses-per-liter factor, subject to a plausibility range.

use crate::coin::{CoinSignature, RejectReason};
use crate::protocol::Event;
use vendo_config::{CoinSignatureCfg, ConfigStore, overlapping_signatures};

/// Learned tolerance band half-width. One pulse of slack absorbs acceptor
/// jitter without letting adjacent denominations collide.
const LEARNED_TOLERANCE: u32 = 1;

#[derive(Debug, Clone)]
struct PlanEntry {
    /// Previous signature, kept verbatim if this denomination is skipped.
    old: CoinSignature,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    CoinLearn {
        plan: Vec<PlanEntry>,
        idx: usize,
        deadline_ms: u64,
        learned: Vec<CoinSignature>,
    },
    FlowRun {
        start_pulses: u64,
    },
}

#[derive(Debug)]
pub struct CalibrationService {
    store: ConfigStore,
    learn_timeout_ms: u64,
    max_burst_pulses: u32,
    ppl_min: f32,
    ppl_max: f32,
    pulses_per_liter: f32,
    phase: Phase,
}

impl CalibrationService {
    pub fn new(
        store: ConfigStore,
        learn_timeout_ms: u64,
        max_burst_pulses: u32,
        pulses_per_liter: f32,
        ppl_min: f32,
        ppl_max: f32,
    ) -> Self {
        Self {
            store,
            learn_timeout_ms,
            max_burst_pulses,
            ppl_min,
            ppl_max,
            pulses_per_liter,
            phase: Phase::Idle,
        }
    }

    pub fn pulses_per_liter(&self) -> f32 {
        self.pulses_per_liter
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// True while coin bursts must be routed here instead of the classifier.
    pub fn is_learning(&self) -> bool {
        matches!(self.phase, Phase::CoinLearn { .. })
    }

    pub fn is_flow_running(&self) -> bool {
        matches!(self.phase, Phase::FlowRun { .. })
    }

    /// Start walking the denominations of `current`. No-op if `current` is
    /// empty or a procedure is already running.
    pub fn begin_coin_learn(
        &mut self,
        now_ms: u64,
        current: &[CoinSignature],
        events: &mut Vec<Event>,
    ) {
        if !self.is_idle() {
            events.push(Event::Error("calibration already in progress".into()));
            return;
        }
        if current.is_empty() {
            events.push(Event::Error("no coin signatures configured".into()));
            return;
        }
        let mut plan: Vec<PlanEntry> = current.iter().map(|s| PlanEntry { old: *s }).collect();
        plan.sort_by_key(|e| e.old.denomination);

        events.push(Event::CalStart);
        events.push(Event::CalInsert(plan[0].old.denomination));
        tracing::info!(denominations = plan.len(), "coin learning started");
        self.phase = Phase::CoinLearn {
            plan,
            idx: 0,
            deadline_ms: now_ms.saturating_add(self.learn_timeout_ms),
            learned: Vec::new(),
        };
    }

    /// Feed a closed coin burst observed while learning. Returns the new
    /// signature set when the walk completes and the set is adopted.
    ///
    /// Bursts outside the classifiable range would produce a center the
    /// classifier can never match; they are rejected and the walk keeps
    /// waiting for a clean coin.
    pub fn handle_burst(
        &mut self,
        now_ms: u64,
        pulses: u32,
        events: &mut Vec<Event>,
    ) -> Option<Vec<CoinSignature>> {
        let Phase::CoinLearn {
            plan,
            idx,
            learned,
            ..
        } = &mut self.phase
        else {
            return None;
        };
        if pulses == 0 || pulses > self.max_burst_pulses {
            events.push(Event::CoinRejected {
                pulses,
                reason: RejectReason::Noise,
            });
            tracing::warn!(pulses, "noise burst ignored during coin learning");
            return None;
        }
        let entry = &plan[*idx];
        let denomination = entry.old.denomination;
        learned.push(CoinSignature {
            denomination,
            pulses,
            tolerance: LEARNED_TOLERANCE,
            credit_ml: entry.old.credit_ml,
        });
        events.push(Event::CalCoin {
            denomination,
            pulses,
        });
        tracing::info!(denomination, pulses, "coin signature learned");
        self.advance(now_ms, events)
    }

    /// Deadline bookkeeping; also completes the walk when the last
    /// denomination times out. Returns an adopted set like `handle_burst`.
    pub fn tick(&mut self, now_ms: u64, events: &mut Vec<Event>) -> Option<Vec<CoinSignature>> {
        let Phase::CoinLearn {
            plan,
            idx,
            deadline_ms,
            learned,
        } = &mut self.phase
        else {
            return None;
        };
        if now_ms < *deadline_ms {
            return None;
        }
        let entry = &plan[*idx];
        let denomination = entry.old.denomination;
        learned.push(entry.old);
        events.push(Event::CalSkip(denomination));
        tracing::info!(denomination, "no coin seen, keeping previous signature");
        self.advance(now_ms, events)
    }

    fn advance(&mut self, now_ms: u64, events: &mut Vec<Event>) -> Option<Vec<CoinSignature>> {
        let Phase::CoinLearn {
            plan,
            idx,
            deadline_ms,
            learned,
        } = &mut self.phase
        else {
            return None;
        };
        *idx += 1;
        if *idx < plan.len() {
            events.push(Event::CalInsert(plan[*idx].old.denomination));
            *deadline_ms = now_ms.saturating_add(self.learn_timeout_ms);
            return None;
        }

        let learned = std::mem::take(learned);
        self.phase = Phase::Idle;

        let cfgs: Vec<CoinSignatureCfg> = learned.iter().map(CoinSignatureCfg::from).collect();
        if let Some((a, b)) = overlapping_signatures(&cfgs) {
            events.push(Event::Error(format!(
                "learned signatures for {a} and {b} overlap, set discarded"
            )));
            events.push(Event::CalDone);
            tracing::warn!(a, b, "learned signature bands overlap, discarding");
            return None;
        }

        events.push(Event::CalDone);
        self.persist(Some(&cfgs));
        Some(learned)
    }

    /// Start a flow run. The caller must already have energized the
    /// actuators via the session's calibration path.
    pub fn begin_flow(&mut self, flow_pulses: u64, events: &mut Vec<Event>) -> bool {
        if !self.is_idle() {
            events.push(Event::Error("calibration already in progress".into()));
            return false;
        }
        events.push(Event::FlowCalStart);
        tracing::info!("flow calibration started");
        self.phase = Phase::FlowRun {
            start_pulses: flow_pulses,
        };
        true
    }

    /// End the flow run and adopt the counted pulses as pulses-per-liter.
    /// Returns true if a run was actually in progress.
    pub fn finish_flow(&mut self, flow_pulses: u64, events: &mut Vec<Event>) -> bool {
        let Phase::FlowRun { start_pulses } = self.phase else {
            return false;
        };
        self.phase = Phase::Idle;
        let counted = flow_pulses.saturating_sub(start_pulses) as f32;
        if counted < self.ppl_min || counted > self.ppl_max {
            events.push(Event::Error(format!(
                "flow calibration counted {counted:.0} pulses, outside [{:.0}, {:.0}], keeping {:.0}",
                self.ppl_min, self.ppl_max, self.pulses_per_liter
            )));
            tracing::warn!(counted, "implausible flow calibration result discarded");
            return true;
        }
        self.pulses_per_liter = counted;
        events.push(Event::FlowCalDone(counted));
        tracing::info!(pulses_per_liter = counted, "flow factor adopted");
        self.persist(None);
        true
    }

    /// Abort whatever procedure is running, keeping previous values.
    pub fn abort(&mut self) {
        if !self.is_idle() {
            tracing::info!("calibration aborted");
        }
        self.phase = Phase::Idle;
    }

    /// Merge the new result into whatever is already on disk, so a flow run
    /// never discards previously learned signatures and vice versa.
    fn persist(&self, signatures: Option<&[CoinSignatureCfg]>) {
        let mut record = self.store.load().unwrap_or_default();
        record.pulses_per_liter = self.pulses_per_liter;
        if let Some(sigs) = signatures {
            record.signatures = sigs.to_vec();
        }
        if let Err(e) = self.store.save(&record) {
            tracing::warn!(error = %e, "failed to persist calibration");
        }
    }
}

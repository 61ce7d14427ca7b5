//! Dispense session state machine.
//!
//! `Idle → Armed(countdown) → Dispensing → Idle`. The session owns Credit
//! and the pump/valve actuators; nothing else touches either. Every wait is
//! a deadline timestamp compared against the tick time, so the machine has
//! no blocking paths.
//!
//! Removal during a pour starts a grace timer instead of cutting power:
//! instant cutoff false-stops on sensor flicker, and never stopping pours
//! unattended. If the container returns inside the window the pour resumes
//! untouched; if not, the pour ends and the undelivered volume is carried
//! back into Credit.

use crate::error::{Result, VendoError};
use crate::presence::PresenceEdge;
use crate::protocol::Event;
use crate::util::{pulses_to_ml, target_pulses};
use vendo_traits::Actuator;

#[derive(Debug, Clone, Copy)]
pub struct SessionCfg {
    pub countdown_s: u32,
    pub grace_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            countdown_s: 3,
            grace_ms: 3_000,
            progress_interval_ms: 1_000,
        }
    }
}

impl From<&vendo_config::SessionCfg> for SessionCfg {
    fn from(c: &vendo_config::SessionCfg) -> Self {
        Self {
            countdown_s: c.countdown_s,
            grace_ms: c.grace_ms,
            progress_interval_ms: c.progress_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Armed {
        started_ms: u64,
        /// Last countdown value sent; starts above countdown_s so the first
        /// tick announces the full value.
        announced_s: u32,
    },
    Dispensing {
        start_pulses: u64,
        target_pulses: u32,
        removed_at_ms: Option<u64>,
        last_progress_ms: u64,
    },
}

pub struct DispenseSession<P: Actuator, V: Actuator> {
    pump: P,
    valve: V,
    cfg: SessionCfg,
    state: State,
    credit_ml: u32,
}

impl<P: Actuator, V: Actuator> core::fmt::Debug for DispenseSession<P, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispenseSession")
            .field("state", &self.state_name())
            .field("credit_ml", &self.credit_ml)
            .finish()
    }
}

impl<P: Actuator, V: Actuator> DispenseSession<P, V> {
    pub fn new(pump: P, valve: V, cfg: SessionCfg) -> Self {
        Self {
            pump,
            valve,
            cfg,
            state: State::Idle,
            credit_ml: 0,
        }
    }

    pub fn credit_ml(&self) -> u32 {
        self.credit_ml
    }

    pub fn add_credit(&mut self, ml: u32) {
        self.credit_ml = self.credit_ml.saturating_add(ml);
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub fn is_dispensing(&self) -> bool {
        matches!(self.state, State::Dispensing { .. })
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            State::Idle => "IDLE",
            State::Armed { .. } => "ARMED",
            State::Dispensing { .. } => "DISPENSING",
        }
    }

    /// How long the container has been gone while the grace timer runs.
    pub fn removed_for(&self, now_ms: u64) -> Option<u64> {
        match self.state {
            State::Dispensing {
                removed_at_ms: Some(t),
                ..
            } => Some(now_ms.saturating_sub(t)),
            _ => None,
        }
    }

    /// One control-loop step. `edge` is this tick's presence transition, if
    /// any; `present` the debounced state after it.
    pub fn tick(
        &mut self,
        now_ms: u64,
        flow_pulses: u64,
        present: bool,
        edge: Option<PresenceEdge>,
        pulses_per_liter: f32,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        match self.state {
            State::Idle => {
                if matches!(edge, Some(PresenceEdge::Detected)) && self.credit_ml > 0 {
                    self.state = State::Armed {
                        started_ms: now_ms,
                        announced_s: self.cfg.countdown_s + 1,
                    };
                    tracing::info!(credit_ml = self.credit_ml, "session armed");
                }
            }
            State::Armed {
                started_ms,
                announced_s,
            } => {
                if !present {
                    self.state = State::Idle;
                    events.push(Event::CountdownCancelled);
                    tracing::info!("countdown cancelled: container removed");
                    return Ok(());
                }
                let elapsed = now_ms.saturating_sub(started_ms);
                if elapsed >= u64::from(self.cfg.countdown_s) * 1000 {
                    events.push(Event::CountdownEnd);
                    self.start_dispense(now_ms, flow_pulses, pulses_per_liter, events)?;
                } else {
                    let remaining = self.cfg.countdown_s - (elapsed / 1000) as u32;
                    if remaining < announced_s {
                        events.push(Event::Countdown(remaining));
                        self.state = State::Armed {
                            started_ms,
                            announced_s: remaining,
                        };
                    }
                }
            }
            State::Dispensing {
                start_pulses,
                target_pulses: target,
                removed_at_ms,
                last_progress_ms,
            } => {
                let delivered = flow_pulses.saturating_sub(start_pulses);

                // Grace bookkeeping: stamp removal, clear on return.
                let removed_at_ms = if present {
                    None
                } else {
                    Some(removed_at_ms.unwrap_or(now_ms))
                };

                if let Some(t) = removed_at_ms
                    && now_ms.saturating_sub(t) >= self.cfg.grace_ms
                {
                    tracing::info!(delivered, "grace period expired, stopping pour");
                    self.finish_early(delivered, pulses_per_liter, events);
                    return Ok(());
                }
                if delivered >= u64::from(target) {
                    self.finish_complete(delivered, pulses_per_liter, events);
                    return Ok(());
                }

                let mut last_progress_ms = last_progress_ms;
                if now_ms.saturating_sub(last_progress_ms) >= self.cfg.progress_interval_ms {
                    let ml = pulses_to_ml(delivered, pulses_per_liter);
                    let remaining_ml = (self.credit_ml as f32 - ml).max(0.0);
                    events.push(Event::DispenseProgress { ml, remaining_ml });
                    last_progress_ms = now_ms;
                }
                self.state = State::Dispensing {
                    start_pulses,
                    target_pulses: target,
                    removed_at_ms,
                    last_progress_ms,
                };
            }
        }
        Ok(())
    }

    /// Diagnostic override: begin a pour immediately from current credit.
    /// Returns false (and does nothing) unless idle with credit.
    pub fn force_start(
        &mut self,
        now_ms: u64,
        flow_pulses: u64,
        pulses_per_liter: f32,
        events: &mut Vec<Event>,
    ) -> Result<bool> {
        if !self.is_idle() || self.credit_ml == 0 {
            return Ok(false);
        }
        self.start_dispense(now_ms, flow_pulses, pulses_per_liter, events)?;
        Ok(true)
    }

    /// Host stop or abort: end a pour with proportional credit accounting,
    /// or cancel a pending countdown. No grace period on this path.
    pub fn stop(
        &mut self,
        flow_pulses: u64,
        pulses_per_liter: f32,
        events: &mut Vec<Event>,
    ) -> bool {
        match self.state {
            State::Dispensing { start_pulses, .. } => {
                let delivered = flow_pulses.saturating_sub(start_pulses);
                self.finish_early(delivered, pulses_per_liter, events);
                true
            }
            State::Armed { .. } => {
                self.state = State::Idle;
                events.push(Event::CountdownCancelled);
                true
            }
            State::Idle => false,
        }
    }

    /// Full reset: actuators off first, then credit cleared, state Idle.
    pub fn reset(&mut self) {
        self.actuators_off_best_effort();
        self.state = State::Idle;
        self.credit_ml = 0;
    }

    /// Run the actuators outside a session for flow calibration. Refused
    /// while a session is active; the pour owns the actuators then.
    pub fn calibration_run(&mut self, on: bool) -> Result<()> {
        if on {
            if !self.is_idle() {
                return Err(VendoError::State(format!(
                    "cannot run calibration while session is {}",
                    self.state_name()
                ))
                .into());
            }
            self.actuators_on()?;
        } else {
            self.actuators_off_best_effort();
        }
        Ok(())
    }

    fn start_dispense(
        &mut self,
        now_ms: u64,
        flow_pulses: u64,
        pulses_per_liter: f32,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let target = target_pulses(self.credit_ml, pulses_per_liter);
        self.actuators_on()?;
        self.state = State::Dispensing {
            start_pulses: flow_pulses,
            target_pulses: target,
            removed_at_ms: None,
            last_progress_ms: now_ms,
        };
        events.push(Event::DispenseStart);
        tracing::info!(
            credit_ml = self.credit_ml,
            target_pulses = target,
            "dispense start"
        );
        Ok(())
    }

    fn finish_complete(&mut self, delivered: u64, pulses_per_liter: f32, events: &mut Vec<Event>) {
        self.actuators_off_best_effort();
        let ml = pulses_to_ml(delivered, pulses_per_liter);
        events.push(Event::DispenseDone(ml));
        tracing::info!(delivered_ml = ml, "dispense complete");
        self.credit_ml = 0;
        self.state = State::Idle;
    }

    fn finish_early(&mut self, delivered: u64, pulses_per_liter: f32, events: &mut Vec<Event>) {
        self.actuators_off_best_effort();
        let delivered_ml = pulses_to_ml(delivered, pulses_per_liter);
        let remaining = self
            .credit_ml
            .saturating_sub(delivered_ml.round().max(0.0) as u32);
        events.push(Event::CreditLeft(remaining));
        tracing::info!(
            delivered_ml,
            remaining_ml = remaining,
            "dispense stopped early"
        );
        self.credit_ml = remaining;
        self.state = State::Idle;
    }

    fn actuators_on(&mut self) -> Result<()> {
        self.pump
            .energize()
            .map_err(|e| VendoError::Hardware(format!("pump energize: {e}")))?;
        if let Err(e) = self.valve.energize() {
            // Never leave the pump running against a closed valve.
            if let Err(p) = self.pump.deenergize() {
                tracing::warn!(error = %p, "pump deenergize failed during valve rollback");
            }
            return Err(VendoError::Hardware(format!("valve energize: {e}")).into());
        }
        Ok(())
    }

    /// Safety paths must switch actuators off before any other cleanup;
    /// a failure is logged but never blocks the cleanup itself.
    fn actuators_off_best_effort(&mut self) {
        if let Err(e) = self.pump.deenergize() {
            tracing::warn!(error = %e, "pump deenergize failed");
        }
        if let Err(e) = self.valve.deenergize() {
            tracing::warn!(error = %e, "valve deenergize failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockActuator;
    use vendo_traits::Actuator;

    const PPL: f32 = 450.0;

    fn session() -> (
        DispenseSession<MockActuator, MockActuator>,
        MockActuator,
        MockActuator,
    ) {
        let pump = MockActuator::new();
        let valve = MockActuator::new();
        let s = DispenseSession::new(pump.clone(), valve.clone(), SessionCfg::default());
        (s, pump, valve)
    }

    #[test]
    fn countdown_announces_each_second_then_starts() {
        let (mut s, pump, _valve) = session();
        s.add_credit(250);
        let mut ev = Vec::new();

        s.tick(0, 0, true, Some(PresenceEdge::Detected), PPL, &mut ev)
            .unwrap();
        s.tick(50, 0, true, None, PPL, &mut ev).unwrap();
        assert_eq!(ev, vec![Event::Countdown(3)]);
        assert!(!pump.is_on());

        ev.clear();
        s.tick(1_050, 0, true, None, PPL, &mut ev).unwrap();
        s.tick(2_050, 0, true, None, PPL, &mut ev).unwrap();
        assert_eq!(ev, vec![Event::Countdown(2), Event::Countdown(1)]);

        ev.clear();
        s.tick(3_050, 0, true, None, PPL, &mut ev).unwrap();
        assert_eq!(ev, vec![Event::CountdownEnd, Event::DispenseStart]);
        assert!(pump.is_on());
        assert!(s.is_dispensing());
    }

    #[test]
    fn presence_with_zero_credit_stays_idle() {
        let (mut s, pump, _valve) = session();
        let mut ev = Vec::new();
        s.tick(0, 0, true, Some(PresenceEdge::Detected), PPL, &mut ev)
            .unwrap();
        // Long past any countdown length: no arming, no announcements.
        s.tick(4_000, 0, true, None, PPL, &mut ev).unwrap();
        assert!(s.is_idle());
        assert!(ev.is_empty());
        assert!(!pump.is_on());
    }

    #[test]
    fn metering_crosses_the_u32_pulse_boundary() {
        let (mut s, pump, _valve) = session();
        s.add_credit(250); // target: 112 pulses at 450 ppl
        let mut ev = Vec::new();
        let start = u64::from(u32::MAX) - 10;
        s.force_start(0, start, PPL, &mut ev).unwrap();

        ev.clear();
        s.tick(500, start + 111, true, None, PPL, &mut ev).unwrap();
        assert!(s.is_dispensing());
        s.tick(600, start + 112, true, None, PPL, &mut ev).unwrap();
        assert!(s.is_idle());
        assert!(!pump.is_on());
        assert!(matches!(ev[0], Event::DispenseDone(ml) if (ml - 248.9).abs() < 1.0));
    }

    #[test]
    fn removal_during_countdown_cancels_and_keeps_credit() {
        let (mut s, pump, _valve) = session();
        s.add_credit(250);
        let mut ev = Vec::new();
        s.tick(0, 0, true, Some(PresenceEdge::Detected), PPL, &mut ev)
            .unwrap();

        ev.clear();
        s.tick(1_000, 0, false, Some(PresenceEdge::Removed), PPL, &mut ev)
            .unwrap();
        assert_eq!(ev, vec![Event::CountdownCancelled]);
        assert!(s.is_idle());
        assert_eq!(s.credit_ml(), 250);
        assert!(!pump.is_on());
    }

    #[test]
    fn completes_at_target_and_clears_credit() {
        let (mut s, pump, valve) = session();
        s.add_credit(250); // target: 112 pulses at 450 ppl
        let mut ev = Vec::new();
        s.force_start(0, 0, PPL, &mut ev).unwrap();

        ev.clear();
        s.tick(500, 111, true, None, PPL, &mut ev).unwrap();
        assert!(s.is_dispensing());

        ev.clear();
        s.tick(600, 112, true, None, PPL, &mut ev).unwrap();
        assert!(s.is_idle());
        assert_eq!(s.credit_ml(), 0);
        assert!(!pump.is_on());
        assert!(!valve.is_on());
        assert!(matches!(ev[0], Event::DispenseDone(ml) if (ml - 248.9).abs() < 1.0));
    }

    #[test]
    fn grace_expiry_refunds_undelivered_volume() {
        let (mut s, pump, _valve) = session();
        s.add_credit(250);
        let mut ev = Vec::new();
        s.force_start(0, 0, PPL, &mut ev).unwrap();

        // 45 pulses = 100 mL delivered, then the container disappears.
        ev.clear();
        s.tick(1_000, 45, false, Some(PresenceEdge::Removed), PPL, &mut ev)
            .unwrap();
        assert!(s.is_dispensing());
        assert!(pump.is_on());
        assert_eq!(s.removed_for(2_000), Some(1_000));

        // Within the 3 s window nothing changes.
        ev.clear();
        s.tick(3_900, 45, false, None, PPL, &mut ev).unwrap();
        assert!(s.is_dispensing());

        ev.clear();
        s.tick(4_000, 45, false, None, PPL, &mut ev).unwrap();
        assert!(s.is_idle());
        assert!(!pump.is_on());
        assert_eq!(ev, vec![Event::CreditLeft(150)]);
        assert_eq!(s.credit_ml(), 150);
    }

    #[test]
    fn container_back_within_grace_resumes_untouched() {
        let (mut s, pump, _valve) = session();
        s.add_credit(250);
        let mut ev = Vec::new();
        s.force_start(0, 0, PPL, &mut ev).unwrap();

        s.tick(1_000, 45, false, Some(PresenceEdge::Removed), PPL, &mut ev)
            .unwrap();
        s.tick(2_500, 45, true, Some(PresenceEdge::Detected), PPL, &mut ev)
            .unwrap();
        assert_eq!(s.removed_for(2_500), None);

        // Long after the original grace deadline the pour is still running.
        ev.clear();
        s.tick(10_000, 80, true, None, PPL, &mut ev).unwrap();
        assert!(s.is_dispensing());
        assert!(pump.is_on());
    }

    #[test]
    fn progress_is_throttled() {
        let (mut s, _pump, _valve) = session();
        s.add_credit(250);
        let mut ev = Vec::new();
        s.force_start(0, 0, PPL, &mut ev).unwrap();

        ev.clear();
        s.tick(500, 10, true, None, PPL, &mut ev).unwrap();
        assert!(ev.is_empty());
        s.tick(1_000, 20, true, None, PPL, &mut ev).unwrap();
        assert_eq!(ev.len(), 1);
        assert!(matches!(ev[0], Event::DispenseProgress { .. }));
        // Next one only a full interval later.
        ev.clear();
        s.tick(1_500, 30, true, None, PPL, &mut ev).unwrap();
        assert!(ev.is_empty());
    }

    #[test]
    fn stop_during_pour_accounts_like_grace_expiry() {
        let (mut s, pump, _valve) = session();
        s.add_credit(250);
        let mut ev = Vec::new();
        s.force_start(0, 0, PPL, &mut ev).unwrap();

        ev.clear();
        assert!(s.stop(45, PPL, &mut ev));
        assert_eq!(ev, vec![Event::CreditLeft(150)]);
        assert!(!pump.is_on());
        assert!(s.is_idle());
        // Nothing left to stop.
        assert!(!s.stop(45, PPL, &mut ev));
    }

    #[test]
    fn reset_clears_credit_and_actuators() {
        let (mut s, pump, valve) = session();
        s.add_credit(500);
        let mut ev = Vec::new();
        s.force_start(0, 0, PPL, &mut ev).unwrap();
        s.reset();
        assert!(s.is_idle());
        assert_eq!(s.credit_ml(), 0);
        assert!(!pump.is_on());
        assert!(!valve.is_on());
    }

    #[test]
    fn force_start_requires_credit() {
        let (mut s, _pump, _valve) = session();
        let mut ev = Vec::new();
        assert!(!s.force_start(0, 0, PPL, &mut ev).unwrap());
        assert!(ev.is_empty());
    }

    #[test]
    fn calibration_run_refused_while_dispensing() {
        let (mut s, _pump, _valve) = session();
        s.add_credit(100);
        let mut ev = Vec::new();
        s.force_start(0, 0, PPL, &mut ev).unwrap();
        assert!(s.calibration_run(true).is_err());
    }
}

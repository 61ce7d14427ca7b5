//! The controller: one object owning every subsystem, advanced by `tick`.
//!
//! Each tick runs a fixed pipeline over a single pulse snapshot and a single
//! timestamp, so every decision in the tick sees the same world:
//! coin burst → distance sample → presence edge → calibration → session →
//! inactivity. Host commands are applied between ticks and their responses
//! come out with the next tick's events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::calibration::CalibrationService;
use crate::coin::{CoinClassifier, CoinOutcome, CoinSignature};
use crate::error::{BuildError, Result};
use crate::presence::{PresenceDetector, PresenceEdge};
use crate::protocol::{Command, Event, OperatingMode, StatusSnapshot};
use crate::pulse::{CoinPulseInput, FlowPulseInput, PulseCounter};
use crate::session::DispenseSession;
use vendo_config::{Config, ConfigStore};
use vendo_traits::{Actuator, Clock, DistanceSensor, MonotonicClock};

pub struct Controller<S: DistanceSensor, P: Actuator, V: Actuator> {
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    pulses: PulseCounter,
    sensor: S,
    sensor_timeout: Duration,
    classifier: CoinClassifier,
    presence: PresenceDetector,
    session: DispenseSession<P, V>,
    calibration: CalibrationService,
    inactivity_ms: u64,
    last_activity_ms: u64,
    mode: OperatingMode,
    events: Vec<Event>,
}

impl<S: DistanceSensor, P: Actuator, V: Actuator> Controller<S, P, V> {
    pub fn builder() -> ControllerBuilder<S, P, V> {
        ControllerBuilder::new()
    }

    /// Producer handle for coin-acceptor edges (ISR / GPIO callback side).
    pub fn coin_input(&self) -> CoinPulseInput {
        self.pulses.coin_input()
    }

    /// Producer handle for flow-meter edges.
    pub fn flow_input(&self) -> FlowPulseInput {
        self.pulses.flow_input()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// One control-loop step. Returns every event produced since the last
    /// call, command responses included, in emission order.
    pub fn tick(&mut self) -> Result<Vec<Event>> {
        let now = self.now_ms();
        let snap = self.pulses.snapshot();
        let mut ev = std::mem::take(&mut self.events);

        if let Some(burst) = self.classifier.take_closed_burst(&snap, now) {
            self.last_activity_ms = now;
            if self.calibration.is_learning() {
                if let Some(set) = self.calibration.handle_burst(now, burst, &mut ev) {
                    self.classifier.set_signatures(set);
                }
            } else {
                match self.classifier.classify(burst) {
                    CoinOutcome::Accepted {
                        denomination,
                        credit_ml,
                    } => {
                        self.session.add_credit(credit_ml);
                        ev.push(Event::CoinInserted(denomination));
                        ev.push(Event::CreditMl(self.session.credit_ml()));
                    }
                    CoinOutcome::Rejected { pulses, reason } => {
                        tracing::warn!(pulses, %reason, "coin rejected");
                        ev.push(Event::CoinRejected { pulses, reason });
                    }
                }
            }
        }

        let distance = match self.sensor.read_cm(self.sensor_timeout) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "distance read failed");
                None
            }
        };
        let edge = self.presence.sample(now, distance);
        if let Some(edge) = edge {
            self.last_activity_ms = now;
            ev.push(match edge {
                PresenceEdge::Detected => Event::CupDetected,
                PresenceEdge::Removed => Event::CupRemoved,
            });
        }

        if let Some(set) = self.calibration.tick(now, &mut ev) {
            self.classifier.set_signatures(set);
        }

        // The flow run owns the actuators; arming a session under it would
        // fight over them.
        if !self.calibration.is_flow_running() {
            self.session.tick(
                now,
                snap.flow,
                self.presence.present(),
                edge,
                self.calibration.pulses_per_liter(),
                &mut ev,
            )?;
        }
        if !self.session.is_idle() {
            self.last_activity_ms = now;
        }

        if self.session.is_idle()
            && self.calibration.is_idle()
            && now.saturating_sub(self.last_activity_ms) >= self.inactivity_ms
        {
            tracing::info!(credit_ml = self.session.credit_ml(), "inactivity reset");
            self.full_reset(now, &mut ev);
        }

        Ok(ev)
    }

    /// Apply one host command. Responses are queued and come out with the
    /// next `tick`.
    pub fn handle_command(&mut self, cmd: Command) -> Result<()> {
        let now = self.now_ms();
        let snap = self.pulses.snapshot();
        self.last_activity_ms = now;
        let mut ev = std::mem::take(&mut self.events);
        let r = self.dispatch(cmd, now, snap.flow, &mut ev);
        self.events = ev;
        r
    }

    fn dispatch(
        &mut self,
        cmd: Command,
        now: u64,
        flow_pulses: u64,
        ev: &mut Vec<Event>,
    ) -> Result<()> {
        match cmd {
            Command::Reset => self.full_reset(now, ev),
            Command::Status => {
                let snap = self.pulses.snapshot();
                ev.push(Event::Status(StatusSnapshot {
                    mode: self.mode,
                    credit_ml: self.session.credit_ml(),
                    dispensing: self.session.is_dispensing(),
                    present: self.presence.present(),
                    coin_pulses: snap.coin,
                    flow_pulses: snap.flow,
                    removed_for_ms: self.session.removed_for(now),
                }));
            }
            Command::Cal => {
                if !self.session.is_idle() {
                    ev.push(Event::Error(format!(
                        "cannot calibrate while session is {}",
                        self.session.state_name()
                    )));
                    return Ok(());
                }
                let current = self.classifier.signatures().to_vec();
                self.calibration.begin_coin_learn(now, &current, ev);
            }
            Command::FlowCal => {
                if !self.calibration.is_idle() {
                    ev.push(Event::Error("calibration already in progress".into()));
                    return Ok(());
                }
                self.session.calibration_run(true)?;
                self.calibration.begin_flow(flow_pulses, ev);
            }
            Command::Done => {
                if self.calibration.finish_flow(flow_pulses, ev) {
                    self.session.calibration_run(false)?;
                } else {
                    ev.push(Event::Error("no flow calibration in progress".into()));
                }
            }
            Command::Start => {
                let started = self.session.force_start(
                    now,
                    flow_pulses,
                    self.calibration.pulses_per_liter(),
                    ev,
                )?;
                if !started {
                    ev.push(Event::Error(
                        "start requires credit and an idle session".into(),
                    ));
                }
            }
            Command::Stop => {
                // An explicit stop always de-energizes, a flow run included.
                // The partial count is discarded and the old factor kept.
                let flow_aborted = self.calibration.is_flow_running();
                if flow_aborted {
                    self.calibration.abort();
                    self.session.calibration_run(false)?;
                    ev.push(Event::Error("flow calibration aborted".into()));
                }
                let stopped =
                    self.session
                        .stop(flow_pulses, self.calibration.pulses_per_liter(), ev);
                if !stopped && !flow_aborted {
                    ev.push(Event::Error("nothing to stop".into()));
                }
            }
            Command::Unknown(s) => {
                tracing::debug!(command = %s, "unknown command");
                ev.push(Event::Error(format!("unknown command: {s}")));
            }
        }
        Ok(())
    }

    /// Actuators off, credit cleared, open coin burst discarded, calibration
    /// aborted. Safe to call in any state, any number of times.
    fn full_reset(&mut self, now: u64, ev: &mut Vec<Event>) {
        self.session.reset();
        self.calibration.abort();
        self.classifier.discard_pending(&self.pulses.snapshot());
        self.last_activity_ms = now;
        ev.push(Event::SystemReset);
    }
}

/// Assembles a `Controller` from its hardware and configuration. Missing
/// hardware or an invalid config fails at build time, before the loop runs.
pub struct ControllerBuilder<S: DistanceSensor, P: Actuator, V: Actuator> {
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    sensor: Option<S>,
    pump: Option<P>,
    valve: Option<V>,
    config: Config,
    store: Option<ConfigStore>,
}

impl<S: DistanceSensor, P: Actuator, V: Actuator> Default for ControllerBuilder<S, P, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DistanceSensor, P: Actuator, V: Actuator> ControllerBuilder<S, P, V> {
    pub fn new() -> Self {
        Self {
            clock: None,
            sensor: None,
            pump: None,
            valve: None,
            config: Config::default(),
            store: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_sensor(mut self, sensor: S) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_pump(mut self, pump: P) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn with_valve(mut self, valve: V) -> Self {
        self.valve = Some(valve);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Calibration persistence. Defaults to an ephemeral store.
    pub fn with_store(mut self, store: ConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> std::result::Result<Controller<S, P, V>, BuildError> {
        let sensor = self.sensor.ok_or(BuildError::MissingSensor)?;
        let pump = self.pump.ok_or(BuildError::MissingPump)?;
        let valve = self.valve.ok_or(BuildError::MissingValve)?;
        let mut config = self.config;
        config
            .validate()
            .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;

        let store = self.store.unwrap_or_else(ConfigStore::ephemeral);
        if let Some(rec) = store.load() {
            config.apply_calibration(&rec);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock));
        let epoch = clock.now();
        let pulses = PulseCounter::new(clock.clone(), epoch, config.coins.debounce_ms);
        let classifier = CoinClassifier::new(
            config.coins.signatures.iter().map(CoinSignature::from).collect(),
            config.coins.quiet_ms,
            config.coins.max_burst_pulses,
        );
        let presence = PresenceDetector::new(
            config.presence.threshold_cm,
            config.presence.stable_ms,
        );
        let session = DispenseSession::new(pump, valve, (&config.session).into());
        let calibration = CalibrationService::new(
            store,
            config.coins.learn_timeout_ms,
            config.coins.max_burst_pulses,
            config.flow.pulses_per_liter,
            config.flow.min_pulses_per_liter,
            config.flow.max_pulses_per_liter,
        );

        Ok(Controller {
            clock,
            epoch,
            pulses,
            sensor,
            sensor_timeout: Duration::from_millis(config.presence.sensor_timeout_ms),
            classifier,
            presence,
            session,
            calibration,
            inactivity_ms: config.session.inactivity_ms,
            last_activity_ms: 0,
            mode: OperatingMode::Water,
            // The host waits for this banner before sending commands.
            events: vec![Event::Ready],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockActuator, MockDistanceSensor};
    use vendo_traits::ManualClock;

    fn controller(
        clock: &ManualClock,
    ) -> (
        Controller<MockDistanceSensor, MockActuator, MockActuator>,
        MockDistanceSensor,
    ) {
        let sensor = MockDistanceSensor::new();
        let c = Controller::builder()
            .with_clock(Arc::new(clock.clone()))
            .with_sensor(sensor.clone())
            .with_pump(MockActuator::new())
            .with_valve(MockActuator::new())
            .build()
            .expect("build");
        (c, sensor)
    }

    #[test]
    fn first_tick_emits_ready() {
        let clock = ManualClock::new();
        let (mut c, _sensor) = controller(&clock);
        let ev = c.tick().unwrap();
        assert_eq!(ev, vec![Event::Ready]);
    }

    #[test]
    fn missing_hardware_fails_build() {
        let r = Controller::<MockDistanceSensor, MockActuator, MockActuator>::builder()
            .with_pump(MockActuator::new())
            .with_valve(MockActuator::new())
            .build();
        assert!(matches!(r, Err(BuildError::MissingSensor)));
    }

    #[test]
    fn status_reports_credit_after_coin() {
        let clock = ManualClock::new();
        let (mut c, _sensor) = controller(&clock);
        let coin = c.coin_input();
        c.tick().unwrap();

        // One clean 5-pulse burst, then the quiet interval.
        for _ in 0..5 {
            coin.pulse();
            clock.advance_ms(100);
        }
        clock.advance_ms(800);
        let ev = c.tick().unwrap();
        assert_eq!(
            ev,
            vec![Event::CoinInserted(5), Event::CreditMl(250)]
        );

        c.handle_command(Command::Status).unwrap();
        let ev = c.tick().unwrap();
        assert!(matches!(
            ev.first(),
            Some(Event::Status(s)) if s.credit_ml == 250 && !s.dispensing
        ));
    }

    #[test]
    fn unknown_command_answers_with_err_line() {
        let clock = ManualClock::new();
        let (mut c, _sensor) = controller(&clock);
        c.tick().unwrap();
        c.handle_command(Command::Unknown("ADD100".into())).unwrap();
        let ev = c.tick().unwrap();
        assert_eq!(ev, vec![Event::Error("unknown command: ADD100".into())]);
    }
}

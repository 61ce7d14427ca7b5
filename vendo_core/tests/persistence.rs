//! Calibration results must survive a controller restart; credit must not.

use std::sync::Arc;

use vendo_config::ConfigStore;
use vendo_core::mocks::{MockActuator, MockDistanceSensor};
use vendo_core::{Command, Controller, Event};
use vendo_traits::ManualClock;

type TestController = Controller<MockDistanceSensor, MockActuator, MockActuator>;

fn build(clock: &ManualClock, store: ConfigStore) -> TestController {
    let mut c = Controller::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_sensor(MockDistanceSensor::new())
        .with_pump(MockActuator::new())
        .with_valve(MockActuator::new())
        .with_store(store)
        .build()
        .expect("build");
    c.tick().expect("ready tick");
    c
}

fn insert_coin(clock: &ManualClock, c: &mut TestController, pulses: u32) -> Vec<Event> {
    let coin = c.coin_input();
    for _ in 0..pulses {
        coin.pulse();
        clock.advance_ms(60);
    }
    clock.advance_ms(800);
    c.tick().expect("tick")
}

#[test]
fn flow_factor_survives_restart_but_credit_does_not() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ConfigStore::new(dir.path().join("calibration.toml"));

    let clock = ManualClock::new();
    {
        let mut c = build(&clock, store.clone());
        // Calibrate the flow meter to 500 pulses per liter.
        c.handle_command(Command::FlowCal).unwrap();
        c.tick().unwrap();
        c.flow_input().pulse_n(500);
        c.handle_command(Command::Done).unwrap();
        let ev = c.tick().unwrap();
        assert!(ev.contains(&Event::FlowCalDone(500.0)));

        // Leave a coin's worth of credit stranded.
        let ev = insert_coin(&clock, &mut c, 5);
        assert!(ev.contains(&Event::CreditMl(250)));
    }

    // "Power cycle": a fresh controller on the same store.
    let mut c = build(&clock, store);

    // Credit is volatile.
    c.handle_command(Command::Status).unwrap();
    let ev = c.tick().unwrap();
    assert!(
        ev.iter()
            .any(|e| matches!(e, Event::Status(s) if s.credit_ml == 0)),
        "events: {ev:?}"
    );

    // The persisted factor drives the new pour: 250 mL is 125 pulses now.
    insert_coin(&clock, &mut c, 5);
    c.handle_command(Command::Start).unwrap();
    c.tick().unwrap();
    c.flow_input().pulse_n(125);
    clock.advance_ms(50);
    let ev = c.tick().unwrap();
    assert!(
        ev.iter()
            .any(|e| matches!(e, Event::DispenseDone(ml) if (*ml - 250.0).abs() < 0.1)),
        "events: {ev:?}"
    );
}

#[test]
fn learned_signatures_survive_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ConfigStore::new(dir.path().join("calibration.toml"));

    let clock = ManualClock::new();
    {
        let mut c = build(&clock, store.clone());
        c.handle_command(Command::Cal).unwrap();
        c.tick().unwrap();
        // This acceptor measures 2 / 6 / 12 pulses for the three coins.
        insert_coin(&clock, &mut c, 2);
        insert_coin(&clock, &mut c, 6);
        let ev = insert_coin(&clock, &mut c, 12);
        assert!(ev.contains(&Event::CalDone), "events: {ev:?}");
    }

    let mut c = build(&clock, store);
    // 12 pulses matched nothing under the default table; now it is the 10.
    let ev = insert_coin(&clock, &mut c, 12);
    assert_eq!(ev, vec![Event::CoinInserted(10), Event::CreditMl(500)]);
}

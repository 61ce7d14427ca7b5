use rstest::rstest;
use vendo_config::{Config, load_toml};

#[test]
fn parses_a_full_config() {
    let cfg = load_toml(
        r#"
        [coins]
        quiet_ms = 600
        debounce_ms = 40
        max_burst_pulses = 10
        learn_timeout_ms = 8000
        signatures = [
            { denomination = 1, pulses = 2, tolerance = 0, credit_ml = 50 },
            { denomination = 5, pulses = 6, tolerance = 1, credit_ml = 250 },
        ]

        [flow]
        pulses_per_liter = 480.0

        [presence]
        threshold_cm = 12.0
        stable_ms = 500

        [session]
        countdown_s = 5
        grace_ms = 2000

        [control]
        tick_hz = 50

        [logging]
        level = "debug"
        "#,
    )
    .expect("parse");
    cfg.validate().expect("validate");
    assert_eq!(cfg.coins.quiet_ms, 600);
    assert_eq!(cfg.coins.signatures.len(), 2);
    assert_eq!(cfg.session.countdown_s, 5);
    // Unspecified fields keep their defaults.
    assert_eq!(cfg.session.inactivity_ms, 300_000);
    assert_eq!(cfg.presence.sensor_timeout_ms, 50);
}

#[test]
fn empty_toml_is_the_default_config() {
    let cfg = load_toml("").expect("parse");
    cfg.validate().expect("defaults validate");
    assert_eq!(cfg.flow.pulses_per_liter, 450.0);
    assert_eq!(cfg.control.tick_hz, 20);
}

#[rstest]
#[case("[control]\ntick_hz = 0", "tick_hz")]
#[case("[coins]\nquiet_ms = 0", "quiet_ms")]
#[case("[coins]\nsignatures = []", "signatures")]
#[case("[presence]\nthreshold_cm = -3.0", "threshold_cm")]
#[case("[presence]\nthreshold_cm = inf", "threshold_cm")]
#[case("[session]\ncountdown_s = 0", "countdown_s")]
#[case("[flow]\npulses_per_liter = 50.0", "pulses_per_liter")]
fn invalid_values_are_rejected(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse");
    let err = cfg.validate().expect_err("must fail").to_string();
    assert!(err.contains(needle), "{err:?} should mention {needle}");
}

#[test]
fn overlapping_signature_bands_fail_validation() {
    let cfg = load_toml(
        r#"
        [coins]
        signatures = [
            { denomination = 1, pulses = 2, tolerance = 1, credit_ml = 50 },
            { denomination = 5, pulses = 3, tolerance = 1, credit_ml = 250 },
        ]
        "#,
    )
    .expect("parse");
    let err = cfg.validate().expect_err("overlap must fail").to_string();
    assert!(err.contains("overlap"), "{err}");
}

#[test]
fn zero_pulse_signature_fails_validation() {
    let cfg = load_toml(
        r#"
        [coins]
        signatures = [{ denomination = 1, pulses = 0, tolerance = 0, credit_ml = 50 }]
        "#,
    )
    .expect("parse");
    assert!(cfg.validate().is_err());
}

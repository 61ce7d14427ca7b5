use proptest::prelude::*;

use vendo_core::coin::{CoinClassifier, CoinOutcome, CoinSignature};
use vendo_core::mocks::MockActuator;
use vendo_core::presence::PresenceDetector;
use vendo_core::session::{DispenseSession, SessionCfg};
use vendo_core::util::{pulses_to_ml, target_pulses};

fn signature_strategy() -> impl Strategy<Value = CoinSignature> {
    (1u16..=50, 1u32..=12, 0u32..=2, 1u32..=1_000).prop_map(
        |(denomination, pulses, tolerance, credit_ml)| CoinSignature {
            denomination,
            pulses,
            tolerance,
            credit_ml,
        },
    )
}

proptest! {
    /// The classifier accepts exactly when one band matches; it never
    /// resolves a multi-band hit by picking a winner.
    #[test]
    fn classification_agrees_with_band_count(
        sigs in proptest::collection::vec(signature_strategy(), 1..5),
        pulses in 0u32..=16,
    ) {
        let hits = sigs
            .iter()
            .filter(|s| {
                let lo = s.pulses.saturating_sub(s.tolerance);
                let hi = s.pulses.saturating_add(s.tolerance);
                (lo..=hi).contains(&pulses)
            })
            .count();
        let c = CoinClassifier::new(sigs, 800, 12);
        match c.classify(pulses) {
            CoinOutcome::Accepted { .. } => {
                prop_assert!(pulses >= 1 && pulses <= 12);
                prop_assert_eq!(hits, 1);
            }
            CoinOutcome::Rejected { .. } => {
                prop_assert!(pulses < 1 || pulses > 12 || hits != 1);
            }
        }
    }

    /// Raw flicker strictly shorter than the stability window never
    /// produces a presence edge.
    #[test]
    fn presence_ignores_sub_window_flicker(
        flickers in proptest::collection::vec((1u64..750, 1u64..750), 1..20),
    ) {
        let mut d = PresenceDetector::new(15.0, 750);
        let mut now = 0u64;
        // Settle absent, then alternate sub-window blips.
        prop_assert_eq!(d.sample(now, None), None);
        for (present_ms, absent_ms) in flickers {
            // Present shorter than the window...
            let start = now;
            while now - start < present_ms {
                prop_assert_eq!(d.sample(now, Some(5.0)), None);
                now += 50;
            }
            // ...then absent again, which resets the candidate.
            let start = now;
            while now - start < absent_ms {
                prop_assert_eq!(d.sample(now, None), None);
                now += 50;
            }
        }
        prop_assert!(!d.present());
    }

    /// An early stop never loses volume: delivered + refunded covers the
    /// original credit to within one rounding step.
    #[test]
    fn early_stop_conserves_credit(
        credit in 1u32..=2_000,
        ppl in 200.0f32..=2_000.0,
        delivered_fraction in 0.0f32..1.0,
    ) {
        let target = target_pulses(credit, ppl);
        let delivered = (target as f32 * delivered_fraction) as u64;

        let mut s = DispenseSession::new(
            MockActuator::new(),
            MockActuator::new(),
            SessionCfg::default(),
        );
        s.add_credit(credit);
        let mut ev = Vec::new();
        prop_assert!(s.force_start(0, 0, ppl, &mut ev).unwrap());
        ev.clear();
        prop_assert!(s.stop(delivered, ppl, &mut ev));

        let delivered_ml = pulses_to_ml(delivered, ppl);
        let refunded = s.credit_ml();
        prop_assert!(refunded <= credit);
        let accounted = refunded as f32 + delivered_ml;
        prop_assert!((accounted - credit as f32).abs() <= 1.0,
            "credit {credit}, delivered {delivered_ml}, refunded {refunded}");
    }

    /// The pulse target for a credit never pours more than was paid for.
    #[test]
    fn target_never_overshoots_credit(credit in 0u32..=10_000, ppl in 200.0f32..=12_000.0) {
        let target = target_pulses(credit, ppl);
        let ml = pulses_to_ml(u64::from(target), ppl);
        // Up to one pulse-worth under, never over (plus float slack).
        prop_assert!(ml <= credit as f32 + 0.5);
        if target > 0 {
            prop_assert!(credit as f32 - ml <= 1000.0 / ppl + 0.5);
        }
    }
}

//! Container presence debouncing.
//!
//! Raw time-of-flight samples flicker near the threshold and drop out when
//! no echo returns. The detector accepts a state change only after the same
//! raw classification has held for a stability window. The window is
//! time-based rather than sample-count-based so it survives polling-rate
//! changes. A "no reading" sample counts as absent: a sensor fault must not
//! freeze a locked-in present state.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEdge {
    Detected,
    Removed,
}

#[derive(Debug, Clone)]
pub struct PresenceDetector {
    threshold_cm: f32,
    stable_ms: u64,
    stable: bool,
    /// Raw classification disagreeing with `stable`, and when it started.
    candidate: Option<(bool, u64)>,
}

impl PresenceDetector {
    pub fn new(threshold_cm: f32, stable_ms: u64) -> Self {
        Self {
            threshold_cm,
            stable_ms,
            stable: false,
            candidate: None,
        }
    }

    /// Current debounced state.
    pub fn present(&self) -> bool {
        self.stable
    }

    /// Feed one raw sample. Returns an edge exactly once per accepted
    /// transition.
    pub fn sample(&mut self, now_ms: u64, distance_cm: Option<f32>) -> Option<PresenceEdge> {
        let raw = matches!(distance_cm, Some(d) if d > 0.0 && d < self.threshold_cm);

        if raw == self.stable {
            self.candidate = None;
            return None;
        }
        match self.candidate {
            Some((c, since)) if c == raw => {
                if now_ms.saturating_sub(since) >= self.stable_ms {
                    self.stable = raw;
                    self.candidate = None;
                    tracing::debug!(present = raw, "presence transition");
                    Some(if raw {
                        PresenceEdge::Detected
                    } else {
                        PresenceEdge::Removed
                    })
                } else {
                    None
                }
            }
            _ => {
                self.candidate = Some((raw, now_ms));
                None
            }
        }
    }
}

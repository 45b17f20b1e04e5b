use skelcap_source::{frame_interval_ticks, Timestamp};

/// Per-stream throttle.
///
/// A candidate is accepted iff the stream has no accepted frame yet or the
/// candidate is more than one frame interval past the last accepted one.
/// Rejected frames are simply dropped.  The baseline only moves on
/// acceptance, so a long stretch of drops does not resynchronize it to the
/// sensor clock (at most N fps, drift allowed).
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Timestamp,
    accepted: Vec<Timestamp>,
}

impl RateGate {
    pub fn new(interval: Timestamp) -> Self {
        Self {
            interval,
            accepted: Vec::new(),
        }
    }

    pub fn for_fps(fps: f64) -> Self {
        Self::new(frame_interval_ticks(fps))
    }

    pub fn interval(&self) -> Timestamp {
        self.interval
    }

    pub fn last_accepted(&self) -> Option<Timestamp> {
        self.accepted.last().copied()
    }

    /// Would `candidate` pass?  No side effect.
    pub fn admits(&self, candidate: Timestamp) -> bool {
        match self.last_accepted() {
            None => true,
            Some(last) => candidate.saturating_sub(last) > self.interval,
        }
    }

    /// Log `candidate` as accepted.  Callers check [`admits`](Self::admits) first.
    pub fn accept(&mut self, candidate: Timestamp) {
        self.accepted.push(candidate);
    }

    /// Check and log in one step.
    pub fn offer(&mut self, candidate: Timestamp) -> bool {
        let ok = self.admits(candidate);
        if ok {
            self.accept(candidate);
        }
        ok
    }

    /// Timestamp log of every accepted frame, in acceptance order.
    pub fn accepted(&self) -> &[Timestamp] {
        &self.accepted
    }

    pub fn take_log(&mut self) -> Vec<Timestamp> {
        std::mem::take(&mut self.accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn five_fps_throttle() {
        let mut gate = RateGate::for_fps(5.0);
        assert_eq!(gate.interval(), 2_000_000);
        let decisions: Vec<bool> = [0, 10, 2_100_000, 2_200_000]
            .into_iter()
            .map(|ts| gate.offer(ts))
            .collect();
        assert_eq!(decisions, vec![true, false, true, false]);
        assert_eq!(gate.accepted(), &[0, 2_100_000]);
    }

    #[test]
    fn exact_interval_is_rejected() {
        let mut gate = RateGate::new(100);
        assert!(gate.offer(0));
        assert!(!gate.offer(100));
        assert!(gate.offer(101));
    }

    #[test]
    fn baseline_does_not_resync_after_drops() {
        let mut gate = RateGate::new(100);
        assert!(gate.offer(0));
        for ts in (10..100).step_by(10) {
            assert!(!gate.offer(ts));
        }
        // Next acceptance is measured from 0, not from the last dropped frame.
        assert!(gate.offer(101));
        assert_eq!(gate.last_accepted(), Some(101));
    }

    #[test]
    fn admits_has_no_side_effect() {
        let gate = RateGate::new(100);
        assert!(gate.admits(5));
        assert!(gate.admits(6));
        assert!(gate.accepted().is_empty());
    }

    proptest! {
        #[test]
        fn accepted_sequence_is_spaced(
            interval in 0i64..5_000_000,
            stamps in proptest::collection::vec(any::<i64>(), 0..200),
        ) {
            let mut gate = RateGate::new(interval);
            for ts in stamps {
                gate.offer(ts);
            }
            for pair in gate.accepted().windows(2) {
                prop_assert!(pair[1] > pair[0]);
                prop_assert!(pair[1].saturating_sub(pair[0]) > interval);
            }
        }
    }
}

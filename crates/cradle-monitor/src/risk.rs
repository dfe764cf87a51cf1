//! Debounced risk state machine.
//!
//! Converts the per-frame risk condition into SAFE/WARNING/DANGER. An episode
//! starts on the first risk frame and survives gaps shorter than the grace
//! period; DANGER is reached once the episode has lasted the hold duration.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use cradle_models::RiskStatus;

/// An in-progress risk episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskEpisode {
    pub started_at: Instant,
    /// Set on the first non-risk frame after risk was seen
    pub reset_timer_started_at: Option<Instant>,
}

impl RiskEpisode {
    fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            reset_timer_started_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskStateMachine {
    hold_duration: Duration,
    grace_period: Duration,
    episode: Option<RiskEpisode>,
}

impl RiskStateMachine {
    pub fn new(hold_duration: Duration, grace_period: Duration) -> Self {
        Self {
            hold_duration,
            grace_period,
            episode: None,
        }
    }

    /// Feed one observation and return the resulting status.
    pub fn update(&mut self, risk_condition: bool, now: Instant) -> RiskStatus {
        if risk_condition {
            let episode = self.episode.get_or_insert_with(|| {
                info!("Risk condition observed, episode started");
                RiskEpisode::new(now)
            });
            if episode.reset_timer_started_at.take().is_some() {
                debug!("Risk condition observed again, reset timer cancelled");
            }
        } else if let Some(episode) = self.episode.as_mut() {
            let reset_started = *episode.reset_timer_started_at.get_or_insert_with(|| {
                debug!("Risk condition cleared, reset timer started");
                now
            });
            if now.saturating_duration_since(reset_started) >= self.grace_period {
                info!(
                    episode_secs = now.saturating_duration_since(episode.started_at).as_secs(),
                    "Risk episode cleared after grace period"
                );
                self.episode = None;
            }
        }

        self.status_at(now)
    }

    /// Status implied by the current episode at `now`.
    pub fn status_at(&self, now: Instant) -> RiskStatus {
        match &self.episode {
            None => RiskStatus::Safe,
            Some(episode) if now.saturating_duration_since(episode.started_at) >= self.hold_duration => {
                RiskStatus::Danger
            }
            Some(_) => RiskStatus::Warning,
        }
    }

    pub fn episode(&self) -> Option<&RiskEpisode> {
        self.episode.as_ref()
    }

    pub fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(500);

    fn machine() -> RiskStateMachine {
        RiskStateMachine::new(Duration::from_secs(60), Duration::from_secs(3))
    }

    /// Feed samples every `STEP` from `from` (inclusive) to `to` (exclusive),
    /// returning the status after the last sample.
    fn feed(
        sm: &mut RiskStateMachine,
        base: Instant,
        from: Duration,
        to: Duration,
        risk: bool,
    ) -> RiskStatus {
        let mut t = from;
        let mut status = sm.status_at(base + from);
        while t < to {
            status = sm.update(risk, base + t);
            t += STEP;
        }
        status
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_starts_safe() {
        let sm = machine();
        assert_eq!(sm.status_at(Instant::now()), RiskStatus::Safe);
        assert!(sm.episode().is_none());
    }

    #[test]
    fn test_continuous_risk_escalates() {
        let mut sm = machine();
        let base = Instant::now();

        assert_eq!(sm.update(true, base), RiskStatus::Warning);
        feed(&mut sm, base, STEP, secs(30), true);
        assert_eq!(sm.update(true, base + secs(30)), RiskStatus::Warning);
        assert_eq!(feed(&mut sm, base, secs(30) + STEP, secs(60), true), RiskStatus::Warning);
        assert_eq!(sm.update(true, base + secs(60)), RiskStatus::Danger);
        feed(&mut sm, base, secs(60) + STEP, secs(120), true);
        assert_eq!(sm.update(true, base + secs(120)), RiskStatus::Danger);
    }

    #[test]
    fn test_short_gap_keeps_episode() {
        let mut sm = machine();
        let base = Instant::now();

        feed(&mut sm, base, secs(0), secs(50), true);
        let status = feed(&mut sm, base, secs(50), secs(52), false);
        assert_eq!(status, RiskStatus::Warning);
        assert_eq!(sm.episode().map(|e| e.started_at), Some(base));

        assert_eq!(feed(&mut sm, base, secs(52), secs(60), true), RiskStatus::Warning);
        assert_eq!(sm.update(true, base + secs(60)), RiskStatus::Danger);
        assert!(sm.episode().unwrap().reset_timer_started_at.is_none());
    }

    #[test]
    fn test_grace_gap_clears_episode_and_restarts_count() {
        let mut sm = machine();
        let base = Instant::now();

        feed(&mut sm, base, secs(0), secs(10), true);
        assert_eq!(sm.update(false, base + secs(10)), RiskStatus::Warning);
        assert_eq!(sm.update(false, base + secs(12)), RiskStatus::Warning);
        assert_eq!(sm.update(false, base + secs(13)), RiskStatus::Safe);
        assert!(sm.episode().is_none());

        // New episode counts from its own start
        assert_eq!(sm.update(true, base + secs(20)), RiskStatus::Warning);
        assert_eq!(sm.update(true, base + secs(70)), RiskStatus::Warning);
        assert_eq!(sm.update(true, base + secs(80)), RiskStatus::Danger);
    }

    #[test]
    fn test_danger_returns_to_safe_only_through_grace() {
        let mut sm = machine();
        let base = Instant::now();

        feed(&mut sm, base, secs(0), secs(61), true);
        assert_eq!(sm.status_at(base + secs(61)), RiskStatus::Danger);

        // Non-risk frames inside the grace period never drop back to WARNING
        assert_eq!(sm.update(false, base + secs(61)), RiskStatus::Danger);
        assert_eq!(sm.update(false, base + secs(63)), RiskStatus::Danger);
        assert_eq!(sm.update(false, base + secs(64)), RiskStatus::Safe);
    }

    #[test]
    fn test_non_risk_without_episode_stays_safe() {
        let mut sm = machine();
        let base = Instant::now();
        assert_eq!(feed(&mut sm, base, secs(0), secs(10), false), RiskStatus::Safe);
        assert!(sm.episode().is_none());
    }

    /// Reference: DANGER iff the risk samples since the last gap of at least
    /// the grace period span the hold duration.
    fn reference_status(samples: &[(Duration, bool)], hold: Duration, grace: Duration) -> RiskStatus {
        let mut run_start: Option<Duration> = None;
        let mut gap_start: Option<Duration> = None;
        for &(t, risk) in samples {
            if risk {
                if run_start.is_none() {
                    run_start = Some(t);
                }
                gap_start = None;
            } else if run_start.is_some() {
                let g = *gap_start.get_or_insert(t);
                if t - g >= grace {
                    run_start = None;
                    gap_start = None;
                }
            }
        }
        let now = samples.last().map(|s| s.0).unwrap_or_default();
        match run_start {
            None => RiskStatus::Safe,
            Some(start) if now - start >= hold => RiskStatus::Danger,
            Some(_) => RiskStatus::Warning,
        }
    }

    #[test]
    fn test_matches_reference_on_pseudo_random_sequences() {
        let hold = secs(6);
        let grace = secs(2);

        for seed in 1u64..=50 {
            let mut state = seed;
            let mut sm = RiskStateMachine::new(hold, grace);
            let base = Instant::now();
            let mut samples = Vec::new();
            let mut last = RiskStatus::Safe;

            for i in 0..400u64 {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                // Long runs of the same value so episodes actually reach the hold
                let risk = (state >> 33) % 10 < 7;
                let t = Duration::from_millis(i * 250);
                samples.push((t, risk));

                let status = sm.update(risk, base + t);
                assert_eq!(status, reference_status(&samples, hold, grace), "seed {seed} step {i}");
                assert!(
                    !(last == RiskStatus::Danger && status == RiskStatus::Warning),
                    "DANGER must not fall back to WARNING"
                );
                last = status;
            }
        }
    }
}

//! Decides when the bot is alone in the call.
//!
//! The participant count is read from the page with several independent
//! heuristics and the largest answer wins. A count of one has to persist for
//! the exit delay before the session is ended. Anything inconclusive starts
//! that wait over.

use crate::driver::PageDriver;
use meet_recorder_config::Timings;
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::HashSet,
    time::Duration,
};
use tokio::time::Instant;

const PRESENCE_SCRIPT: &str = include_str!("js/presence.js");

lazy_static::lazy_static! {
    static ref PARENTHESIZED_COUNT: Regex = Regex::new(r"\((\d+)\)").expect("valid regex");
    static ref PARTICIPANT_COUNT: Regex = Regex::new(r"(?i)\b(\d+)\s+participants?\b").expect("valid regex");
}

/// Raw participant signals gathered by the page.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSignals {
    /// Visible text of buttons, e.g. the badge on the people button.
    pub control_texts: Vec<String>,
    pub aria_labels: Vec<String>,
    /// Participant ids of the video tiles.
    pub tile_ids: Vec<String>,
}

impl PresenceSignals {
    /// Interprets the signals as a [`PresenceSample`] taken at `at`.
    pub fn sample(&self, at: Instant) -> PresenceSample {
        let mut observations = Vec::new();
        let mut count: Option<u32> = None;
        let mut observe = |value: u32, observation: String| {
            count = Some(count.map_or(value, |count| count.max(value)));
            observations.push(observation);
        };

        for text in &self.control_texts {
            let text = text.trim();
            if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(value) = text.parse() {
                    observe(value, format!("control text {text:?}"));
                }
            }
        }

        for label in &self.aria_labels {
            let captures = PARENTHESIZED_COUNT
                .captures(label)
                .or_else(|| PARTICIPANT_COUNT.captures(label));
            if let Some(value) = captures.and_then(|captures| captures[1].parse().ok()) {
                observe(value, format!("label {label:?}"));
            }
        }

        let tiles = self.tile_ids.iter().collect::<HashSet<_>>().len() as u32;
        if tiles > 0 {
            observe(tiles, format!("{tiles} participant tiles"));
        }

        PresenceSample {
            count,
            observations,
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSample {
    /// Largest participant count any heuristic produced.
    pub count: Option<u32>,
    pub observations: Vec<String>,
    pub at: Instant,
}

impl PresenceSample {
    pub fn inconclusive(at: Instant, observation: impl ToString) -> Self {
        Self {
            count: None,
            observations: vec![observation.to_string()],
            at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Unknown,
    Accompanied,
    AloneSince(Instant),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceDecision {
    Stay,
    Exit,
}

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    entered_at: Instant,
    grace: Duration,
    exit_delay: Duration,
    state: PresenceState,
}

impl PresenceTracker {
    pub fn new(entered_at: Instant, grace: Duration, exit_delay: Duration) -> Self {
        Self {
            entered_at,
            grace,
            exit_delay,
            state: PresenceState::Unknown,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn observe(&mut self, sample: &PresenceSample) -> PresenceDecision {
        if self.state == PresenceState::Exit {
            return PresenceDecision::Exit;
        }

        if sample.at.saturating_duration_since(self.entered_at) < self.grace {
            trace!(count = ?sample.count, "Ignoring presence sample inside grace window");
            return PresenceDecision::Stay;
        }

        self.state = match (sample.count, self.state) {
            (None | Some(0), _) => PresenceState::Unknown,
            (Some(count), _) if count > 1 => PresenceState::Accompanied,
            (Some(_), PresenceState::AloneSince(since))
                if sample.at.saturating_duration_since(since) >= self.exit_delay =>
            {
                PresenceState::Exit
            }
            (Some(_), PresenceState::AloneSince(since)) => PresenceState::AloneSince(since),
            (Some(_), _) => PresenceState::AloneSince(sample.at),
        };

        if self.state == PresenceState::Exit {
            PresenceDecision::Exit
        } else {
            PresenceDecision::Stay
        }
    }
}

/// Samples the page periodically until the tracker decides to leave.
pub struct PresenceMonitor<'a, D: ?Sized> {
    driver: &'a D,
    tracker: PresenceTracker,
    interval: Duration,
}

impl<'a, D: PageDriver + ?Sized> PresenceMonitor<'a, D> {
    pub fn new(driver: &'a D, entered_at: Instant, timings: &Timings) -> Self {
        Self {
            driver,
            tracker: PresenceTracker::new(entered_at, timings.presence_grace(), timings.presence_exit_delay()),
            interval: timings.presence_interval(),
        }
    }

    pub async fn sample(&self) -> PresenceSample {
        let value = match self.driver.evaluate(PRESENCE_SCRIPT).await {
            Ok(value) => value,
            Err(err) => return PresenceSample::inconclusive(Instant::now(), format!("evaluation failed: {err}")),
        };
        match serde_json::from_value::<PresenceSignals>(value) {
            Ok(signals) => signals.sample(Instant::now()),
            Err(err) => PresenceSample::inconclusive(Instant::now(), format!("unexpected signals: {err}")),
        }
    }

    /// Resolves with the sample that made the tracker decide to exit.
    pub async fn run(mut self) -> PresenceSample {
        info!("Watching participant count");
        let mut previous = self.tracker.state();
        loop {
            tokio::time::sleep(self.interval).await;

            let sample = self.sample().await;
            let decision = self.tracker.observe(&sample);
            let state = self.tracker.state();

            if state != previous {
                debug!(count = ?sample.count, observations = ?sample.observations, ?state, "Presence changed");
                previous = state;
            } else {
                trace!(count = ?sample.count, ?state, "Presence sample");
            }

            if decision == PresenceDecision::Exit {
                info!(count = ?sample.count, observations = ?sample.observations, "Alone in the meeting");
                return sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const GRACE: Duration = Duration::from_secs(10);
    const EXIT_DELAY: Duration = Duration::from_secs(15);

    fn sample(at: Instant, count: u32) -> PresenceSample {
        PresenceSample {
            count: (count > 0).then_some(count),
            observations: Vec::new(),
            at,
        }
    }

    /// Feeds `(seconds since entry, count)` pairs and returns the seconds at
    /// which the tracker decided to exit.
    fn exits(samples: &[(u64, u32)]) -> Vec<u64> {
        let entered = Instant::now();
        let mut tracker = PresenceTracker::new(entered, GRACE, EXIT_DELAY);
        samples
            .iter()
            .filter(|(secs, count)| {
                tracker.observe(&sample(entered + Duration::from_secs(*secs), *count)) == PresenceDecision::Exit
            })
            .map(|(secs, _)| *secs)
            .collect()
    }

    #[test]
    fn exits_only_after_debounce_from_first_post_grace_sample() {
        let samples = [(3, 0), (6, 0), (12, 1), (15, 1), (18, 1), (21, 1), (24, 1), (27, 1)];
        assert_eq!(exits(&samples), vec![27]);
    }

    #[test]
    fn grace_window_samples_do_not_start_the_timer() {
        // Alone the whole time, but the timer may only start at 10s.
        let samples = [(0, 1), (3, 1), (6, 1), (9, 1), (12, 1), (24, 1), (25, 1)];
        assert_eq!(exits(&samples), vec![25]);
    }

    #[test]
    fn company_resets_the_timer() {
        let samples = [(12, 1), (15, 3), (18, 1), (21, 1), (30, 1)];
        assert_eq!(exits(&samples), Vec::<u64>::new());
    }

    #[test]
    fn inconclusive_sample_resets_the_timer() {
        let entered = Instant::now();
        let at = |secs| entered + Duration::from_secs(secs);
        let mut tracker = PresenceTracker::new(entered, GRACE, EXIT_DELAY);

        assert_eq!(tracker.observe(&sample(at(12), 1)), PresenceDecision::Stay);
        assert_eq!(tracker.state(), PresenceState::AloneSince(at(12)));

        assert_eq!(tracker.observe(&sample(at(20), 0)), PresenceDecision::Stay);
        assert_eq!(tracker.state(), PresenceState::Unknown);

        assert_eq!(tracker.observe(&sample(at(28), 1)), PresenceDecision::Stay);
        assert_eq!(tracker.state(), PresenceState::AloneSince(at(28)));

        assert_eq!(tracker.observe(&sample(at(42), 1)), PresenceDecision::Stay);
        assert_eq!(tracker.observe(&sample(at(43), 1)), PresenceDecision::Exit);
        assert_eq!(tracker.observe(&sample(at(44), 5)), PresenceDecision::Exit);
    }

    #[test]
    fn takes_maximum_across_heuristics() {
        let signals = PresenceSignals {
            control_texts: vec!["2".to_string(), "Chat".to_string(), "".to_string()],
            aria_labels: vec![
                "Show everyone (4)".to_string(),
                "Leave call".to_string(),
                "3 participants".to_string(),
            ],
            tile_ids: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        let sample = signals.sample(Instant::now());
        assert_eq!(sample.count, Some(4));
        assert_eq!(
            sample.observations,
            vec![
                r#"control text "2""#.to_string(),
                r#"label "Show everyone (4)""#.to_string(),
                r#"label "3 participants""#.to_string(),
                "2 participant tiles".to_string(),
            ]
        );
    }

    #[test]
    fn no_signal_is_inconclusive() {
        let signals = PresenceSignals {
            control_texts: vec!["Chat".to_string()],
            aria_labels: vec!["Turn off microphone".to_string()],
            tile_ids: Vec::new(),
        };
        assert_eq!(signals.sample(Instant::now()).count, None);
        assert_eq!(PresenceSignals::default().sample(Instant::now()).count, None);
    }

    #[test]
    fn single_participant_labels() {
        let signals = PresenceSignals {
            aria_labels: vec!["1 participant".to_string()],
            ..Default::default()
        };
        assert_eq!(signals.sample(Instant::now()).count, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_exits_once_alone_long_enough() {
        let driver = MockDriver::default();
        driver.on_evaluate(
            "tileIds",
            [
                json!({ "tileIds": ["me", "host"] }),
                json!({ "tileIds": ["me", "host"] }),
                json!({ "tileIds": ["me", "host"] }),
                json!({ "tileIds": ["me", "host"] }),
                json!({ "tileIds": ["me"] }),
            ],
        );

        let entered = Instant::now();
        let timings = Timings::default();
        let sample = PresenceMonitor::new(&driver, entered, &timings).run().await;

        assert_eq!(sample.count, Some(1));
        // Alone from the 15s tick on, exit 15s later.
        assert_eq!(sample.at.duration_since(entered), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn evaluation_errors_never_exit() {
        let driver = MockDriver::default();
        driver.on_evaluate("tileIds", [json!("not an object")]);

        let timings = Timings::default();
        let monitor = PresenceMonitor::new(&driver, Instant::now(), &timings);
        let result = tokio::time::timeout(Duration::from_secs(120), monitor.run()).await;
        assert!(result.is_err());
    }
}

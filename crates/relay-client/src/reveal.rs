//! Paced reveal of streamed text.
//!
//! `arrived` holds everything received so far and `displayed` is always a
//! prefix of it. Each frame advances `displayed` by `elapsed * rate`
//! characters, where the rate speeds up once the undisplayed backlog grows
//! past a threshold. Fractional characters carry over to the next frame so
//! short frames still make progress.

use std::time::Duration;

pub const BASE_CHARS_PER_SECOND: f64 = 40.0;
pub const CATCH_UP_CHARS_PER_SECOND: f64 = 100.0;
pub const CATCH_UP_BACKLOG_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealStep {
    Advanced,
    Idle,
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct RevealState {
    arrived: String,
    displayed_len: usize,
    done: bool,
    cancelled: bool,
    carry: f64,
}

impl RevealState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arrived(&self) -> &str {
        &self.arrived
    }

    pub fn displayed(&self) -> &str {
        &self.arrived[..self.displayed_len]
    }

    pub fn backlog_chars(&self) -> usize {
        self.arrived[self.displayed_len..].chars().count()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_finished(&self) -> bool {
        self.done && self.displayed_len == self.arrived.len()
    }

    pub fn push(&mut self, increment: &str) {
        if self.done || self.cancelled {
            return;
        }
        self.arrived.push_str(increment);
    }

    /// Marks the upstream as complete. `full_text` replaces `arrived` only
    /// when it extends it, so `displayed` stays a prefix.
    pub fn finish(&mut self, full_text: Option<&str>) {
        if let Some(full_text) = full_text {
            if full_text.len() > self.arrived.len() && full_text.starts_with(&self.arrived) {
                self.arrived = full_text.to_string();
            }
        }
        self.done = true;
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn tick(&mut self, elapsed: Duration) -> RevealStep {
        if self.cancelled {
            return RevealStep::Cancelled;
        }

        let backlog = self.backlog_chars();
        if backlog == 0 {
            self.carry = 0.0;
            return if self.done {
                RevealStep::Finished
            } else {
                RevealStep::Idle
            };
        }

        let rate = if backlog > CATCH_UP_BACKLOG_CHARS {
            CATCH_UP_CHARS_PER_SECOND
        } else {
            BASE_CHARS_PER_SECOND
        };
        let budget = self.carry + elapsed.as_secs_f64() * rate;
        let whole = budget.floor() as usize;
        if whole == 0 {
            self.carry = budget;
            return RevealStep::Idle;
        }

        let reveal = whole.min(backlog);
        self.carry = if whole >= backlog {
            0.0
        } else {
            budget - whole as f64
        };

        let rest = &self.arrived[self.displayed_len..];
        let advance_bytes = rest
            .char_indices()
            .nth(reveal)
            .map(|(index, _)| index)
            .unwrap_or(rest.len());
        self.displayed_len += advance_bytes;

        RevealStep::Advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    fn drain(state: &mut RevealState, max_frames: usize) -> usize {
        for frame in 0..max_frames {
            if state.tick(FRAME) == RevealStep::Finished {
                return frame;
            }
        }
        panic!("reveal did not finish within {max_frames} frames");
    }

    #[test]
    fn reveals_at_base_rate_for_small_backlogs() {
        let mut state = RevealState::new();
        state.push("abcdefghij");

        assert_eq!(state.tick(Duration::from_millis(100)), RevealStep::Advanced);
        assert_eq!(state.displayed(), "abcd");
    }

    #[test]
    fn accelerates_when_backlog_exceeds_threshold() {
        let mut state = RevealState::new();
        state.push(&"x".repeat(CATCH_UP_BACKLOG_CHARS + 50));

        state.tick(Duration::from_millis(100));
        assert_eq!(state.displayed().len(), 10);
    }

    #[test]
    fn fractional_progress_carries_across_short_frames() {
        let mut state = RevealState::new();
        state.push("abc");

        // 40 cps * 16ms = 0.64 characters.
        assert_eq!(state.tick(FRAME), RevealStep::Idle);
        assert_eq!(state.displayed(), "");
        assert_eq!(state.tick(FRAME), RevealStep::Advanced);
        assert_eq!(state.displayed(), "a");
    }

    #[test]
    fn never_reveals_past_arrived_and_waits_until_done() {
        let mut state = RevealState::new();
        state.push("hi");

        assert_eq!(state.tick(Duration::from_secs(5)), RevealStep::Advanced);
        assert_eq!(state.displayed(), "hi");
        assert_eq!(state.tick(Duration::from_secs(5)), RevealStep::Idle);
        assert!(!state.is_finished());

        state.push(" there");
        state.finish(Some("hi there"));
        assert_eq!(state.tick(Duration::from_secs(5)), RevealStep::Advanced);
        assert_eq!(state.tick(FRAME), RevealStep::Finished);
        assert_eq!(state.displayed(), "hi there");
    }

    #[test]
    fn displayed_stays_a_prefix_of_arrived_for_bursty_input() {
        let chunks = ["Stre", "aming ", "", "t\u{e9}xt ", "with \u{1f680} bursts", "."];
        let mut state = RevealState::new();
        let mut received = String::new();

        for chunk in chunks {
            state.push(chunk);
            received.push_str(chunk);
            for _ in 0..3 {
                state.tick(FRAME);
                assert!(received.starts_with(state.displayed()));
            }
        }
        state.finish(None);
        drain(&mut state, 10_000);

        assert_eq!(state.displayed(), received);
    }

    #[test]
    fn full_text_is_adopted_only_when_it_extends_arrived() {
        let mut state = RevealState::new();
        state.push("partial");
        state.finish(Some("partial answer"));
        assert_eq!(state.arrived(), "partial answer");

        let mut diverged = RevealState::new();
        diverged.push("abc");
        diverged.finish(Some("xyz and more"));
        assert_eq!(diverged.arrived(), "abc");
    }

    #[test]
    fn cancel_keeps_partial_output() {
        let mut state = RevealState::new();
        state.push("abcdefgh");
        state.tick(Duration::from_millis(100));
        state.cancel();

        assert_eq!(state.tick(Duration::from_secs(1)), RevealStep::Cancelled);
        assert_eq!(state.displayed(), "abcd");
    }

    #[test]
    fn multibyte_characters_are_revealed_whole() {
        let mut state = RevealState::new();
        state.push("\u{e9}\u{e9}\u{e9}");

        state.tick(Duration::from_millis(50));
        assert_eq!(state.displayed(), "\u{e9}\u{e9}");
    }
}

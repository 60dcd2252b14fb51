use std::time::{Duration, Instant};

pub const NEAR_BOTTOM_THRESHOLD_PX: f64 = 150.0;
pub const REENABLE_AFTER: Duration = Duration::from_millis(1500);

/// Sticky-bottom policy for a scroll region that grows while text streams in.
///
/// Following starts enabled. Scrolling away from the bottom suspends it;
/// returning near the bottom and staying idle there re-enables it.
#[derive(Debug, Clone)]
pub struct AutoScroll {
    threshold_px: f64,
    reenable_after: Duration,
    following: bool,
    near_bottom: bool,
    last_user_scroll: Option<Instant>,
}

impl Default for AutoScroll {
    fn default() -> Self {
        Self::new(NEAR_BOTTOM_THRESHOLD_PX, REENABLE_AFTER)
    }
}

impl AutoScroll {
    pub fn new(threshold_px: f64, reenable_after: Duration) -> Self {
        Self {
            threshold_px,
            reenable_after,
            following: true,
            near_bottom: true,
            last_user_scroll: None,
        }
    }

    pub fn is_following(&self) -> bool {
        self.following
    }

    pub fn on_user_scroll(&mut self, distance_from_bottom: f64, now: Instant) {
        self.last_user_scroll = Some(now);
        self.near_bottom = distance_from_bottom <= self.threshold_px;
        if !self.near_bottom {
            self.following = false;
        }
    }

    pub fn should_follow(&mut self, now: Instant) -> bool {
        if self.following {
            return true;
        }

        let idle_at_bottom = self.near_bottom
            && self
                .last_user_scroll
                .is_none_or(|at| now.saturating_duration_since(at) >= self.reenable_after);
        if idle_at_bottom {
            self.following = true;
        }
        self.following
    }
}

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::UserId;

/// Client-triggered action categories. Only the critical ones count against
/// the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SlotSearch,
    Confirm,
    Cancel,
    AvailabilityToggle,
    Other,
}

impl ActionKind {
    pub fn is_critical(self) -> bool {
        !matches!(self, ActionKind::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter(pub Duration);

/// Per-user sliding window kept in memory. Each check drops timestamps older
/// than the window; a rejected attempt is not recorded.
pub struct RateLimiter {
    window: Duration,
    max_hits: usize,
    hits: DashMap<UserId, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_hits: usize) -> Self {
        Self {
            window,
            max_hits,
            hits: DashMap::new(),
        }
    }

    pub fn check(&self, user_id: UserId, action: ActionKind) -> Result<(), RetryAfter> {
        self.check_at(user_id, action, Instant::now())
    }

    pub fn check_at(
        &self,
        user_id: UserId,
        action: ActionKind,
        now: Instant,
    ) -> Result<(), RetryAfter> {
        if !action.is_critical() {
            return Ok(());
        }

        let mut hits = self.hits.entry(user_id).or_default();
        hits.retain(|t| now.saturating_duration_since(*t) < self.window);

        if hits.len() >= self.max_hits {
            let oldest = hits.first().copied().unwrap_or(now);
            let retry = self.window.saturating_sub(now.saturating_duration_since(oldest));
            tracing::warn!(user_id, ?action, "rate limit exceeded");
            return Err(RetryAfter(retry));
        }

        hits.push(now);
        Ok(())
    }

    /// Drop users with no hit inside the window.
    pub fn purge_idle(&self) {
        self.purge_idle_at(Instant::now());
    }

    pub fn purge_idle_at(&self, now: Instant) {
        self.hits.retain(|_, hits| {
            hits.last()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
        });
    }

    pub fn tracked_users(&self) -> usize {
        self.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 20);
        let start = Instant::now();

        for i in 0..20 {
            let at = start + Duration::from_millis(i);
            assert!(limiter.check_at(1, ActionKind::Confirm, at).is_ok());
        }
        let rejected = limiter.check_at(1, ActionKind::Cancel, start + Duration::from_secs(10));
        assert_eq!(rejected, Err(RetryAfter(Duration::from_secs(50))));

        // other users have their own window
        assert!(limiter.check_at(2, ActionKind::Confirm, start).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let start = Instant::now();

        limiter.check_at(1, ActionKind::SlotSearch, start).unwrap();
        limiter.check_at(1, ActionKind::SlotSearch, start + Duration::from_secs(30)).unwrap();
        let secs = |s| start + Duration::from_secs(s);
        assert!(limiter.check_at(1, ActionKind::SlotSearch, secs(59)).is_err());
        assert!(limiter.check_at(1, ActionKind::SlotSearch, secs(60)).is_ok());
    }

    #[test]
    fn test_non_critical_actions_are_free() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        limiter.check_at(1, ActionKind::AvailabilityToggle, now).unwrap();
        for _ in 0..50 {
            assert!(limiter.check_at(1, ActionKind::Other, now).is_ok());
        }
        assert!(limiter.check_at(1, ActionKind::AvailabilityToggle, now).is_err());
    }

    #[test]
    fn test_purge_idle() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 5);
        let start = Instant::now();
        limiter.check_at(1, ActionKind::Confirm, start).unwrap();
        limiter.check_at(2, ActionKind::Confirm, start + Duration::from_secs(50)).unwrap();

        limiter.purge_idle_at(start + Duration::from_secs(70));
        assert_eq!(limiter.tracked_users(), 1);
    }
}

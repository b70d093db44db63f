use parking_lot::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Cooldown gate in front of the external analysis service.
///
/// The clock starts when a job *finishes*, so a slow job never eats into the
/// quiet period the service expects between submissions.
pub struct RateLimiter {
    /// Completion time of the last job, `None` before the first one
    last_completion: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_completion: Mutex::new(None),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time left before the next submission is allowed.
    pub fn remaining(&self) -> Duration {
        match *self.last_completion.lock() {
            Some(last) => self.cooldown.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the cooldown has passed.
    pub async fn wait(&self) {
        // Lock is dropped before sleeping
        let delay = self.remaining();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    pub fn mark_completed(&self) {
        *self.last_completion.lock() = Some(Instant::now());
    }

    pub fn last_completion(&self) -> Option<Instant> {
        *self.last_completion.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_submission_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert_eq!(limiter.remaining(), Duration::ZERO);

        let start = Instant::now();
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_enforces_cooldown_from_completion() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.mark_completed();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.remaining(), Duration::from_secs(40));

        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(40));
        assert_eq!(limiter.remaining(), Duration::ZERO);
    }
}

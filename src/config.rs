use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for the analysis scheduler.
///
/// Every value can be overridden through the environment (see `from_env`);
/// anything missing or unparsable falls back to the default.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum gap between the completion of one external job and the next submission
    pub cooldown: Duration,
    /// Sleep between worker cycles when both queues are empty
    pub idle_interval: Duration,
    /// Number of candidates compared in one batch
    pub chunk_size: usize,
    /// A STARTED batch older than this is presumed abandoned
    pub zombie_threshold: Duration,
    /// Delay between two polls of the same external job
    pub poll_interval: Duration,
    /// Poll attempts before a job is declared timed out
    pub poll_max_attempts: u32,
    /// Cron expression (sec min hour day month weekday) for the recovery + batch formation pass
    pub scan_schedule: String,
    /// Cron expression for the queue monitor
    pub monitor_schedule: String,
    /// Root directory for archived job artifacts
    pub archive_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            idle_interval: Duration::from_millis(1000),
            chunk_size: 4,
            zombie_threshold: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(10),
            poll_max_attempts: 120,
            scan_schedule: "0 */5 * * * *".to_string(),
            monitor_schedule: "*/30 * * * * *".to_string(),
            archive_dir: PathBuf::from("./archive"),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cooldown: Duration::from_secs(env_or("COOLDOWN_SECONDS", defaults.cooldown.as_secs())),
            idle_interval: Duration::from_millis(env_or(
                "IDLE_INTERVAL_MS",
                defaults.idle_interval.as_millis() as u64,
            )),
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size),
            zombie_threshold: Duration::from_secs(
                env_or("ZOMBIE_THRESHOLD_MINUTES", defaults.zombie_threshold.as_secs() / 60) * 60,
            ),
            poll_interval: Duration::from_secs(env_or(
                "POLL_INTERVAL_SECONDS",
                defaults.poll_interval.as_secs(),
            )),
            poll_max_attempts: env_or("POLL_MAX_ATTEMPTS", defaults.poll_max_attempts),
            scan_schedule: std::env::var("SCAN_SCHEDULE").unwrap_or(defaults.scan_schedule),
            monitor_schedule: std::env::var("MONITOR_SCHEDULE").unwrap_or(defaults.monitor_schedule),
            archive_dir: std::env::var("ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size < 2 {
            return Err(format!("CHUNK_SIZE must be at least 2, got {}", self.chunk_size));
        }
        if self.poll_max_attempts == 0 {
            return Err("POLL_MAX_ATTEMPTS must be greater than 0".to_string());
        }
        if self.idle_interval.is_zero() {
            return Err("IDLE_INTERVAL_MS must be greater than 0".to_string());
        }
        if self.zombie_threshold <= self.max_poll_duration() {
            return Err(format!(
                "ZOMBIE_THRESHOLD_MINUTES ({:?}) must exceed the polling budget ({:?}), \
                 otherwise in-flight batches are re-queued as zombies",
                self.zombie_threshold,
                self.max_poll_duration()
            ));
        }
        Ok(())
    }

    /// Longest time a single external job can be polled before it times out.
    pub fn max_poll_duration(&self) -> Duration {
        self.poll_interval * self.poll_max_attempts
    }

    pub fn zombie_threshold_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.zombie_threshold).unwrap_or(chrono::Duration::minutes(30))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

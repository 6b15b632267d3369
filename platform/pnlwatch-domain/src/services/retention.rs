use chrono::{DateTime, Duration, Utc};

/// History samples older than `max_age` are dropped on every ingest cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.max_age
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(24),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RetentionPolicy;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn default_ceiling_is_24_hours() {
        assert_eq!(RetentionPolicy::default().max_age(), Duration::hours(24));
    }

    #[test]
    fn cutoff_subtracts_max_age_from_now() {
        let policy = RetentionPolicy::new(Duration::hours(6));
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            policy.cutoff(now),
            Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
        );
    }
}

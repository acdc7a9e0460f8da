use std::sync::{Mutex, PoisonError};

use chrono::{Datelike, NaiveDateTime, Utc};
use chrono_tz::Tz;

const MIN_SYNCED_YEAR: i32 = 2024;

pub trait Clock: Send + Sync {
    fn now(&self) -> Option<NaiveDateTime>;

    fn timezone(&self) -> String;
}

pub struct SystemClock {
    timezone: Mutex<Tz>,
}

impl SystemClock {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone: Mutex::new(timezone),
        }
    }

    pub fn set_timezone(&self, timezone: Tz) {
        *self.timezone.lock().unwrap_or_else(PoisonError::into_inner) = timezone;
    }

    pub fn epoch_secs(&self) -> i64 {
        Utc::now().timestamp()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Option<NaiveDateTime> {
        let utc = Utc::now();
        if utc.year() < MIN_SYNCED_YEAR {
            return None;
        }
        let tz = *self.timezone.lock().unwrap_or_else(PoisonError::into_inner);
        Some(utc.with_timezone(&tz).naive_local())
    }

    fn timezone(&self) -> String {
        self.timezone
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name()
            .to_string()
    }
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}

#[cfg(test)]
pub struct ManualClock {
    base: Option<NaiveDateTime>,
    started: tokio::time::Instant,
}

#[cfg(test)]
impl ManualClock {
    pub fn at(base: NaiveDateTime) -> Self {
        Self {
            base: Some(base),
            started: tokio::time::Instant::now(),
        }
    }

    pub fn unsynced() -> Self {
        Self {
            base: None,
            started: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Option<NaiveDateTime> {
        let base = self.base?;
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
        Some(base + elapsed)
    }

    fn timezone(&self) -> String {
        "UTC".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_follows_timezone_changes() {
        let clock = SystemClock::new(chrono_tz::UTC);
        assert_eq!(clock.timezone(), "UTC");

        clock.set_timezone(chrono_tz::Europe::Madrid);
        assert_eq!(clock.timezone(), "Europe/Madrid");
        assert!(clock.now().is_some());
    }

    #[test]
    fn rejects_unknown_timezone_names() {
        assert!(parse_timezone("Mars/Olympus").is_none());
        assert_eq!(parse_timezone("Asia/Tokyo"), Some(chrono_tz::Asia::Tokyo));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_clock_advances_with_tokio_time() {
        let base = chrono::NaiveDate::from_ymd_opt(2026, 1, 5)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let clock = ManualClock::at(base);

        tokio::time::sleep(std::time::Duration::from_secs(90)).await;

        assert_eq!(clock.now(), Some(base + chrono::Duration::seconds(90)));
        assert_eq!(ManualClock::unsynced().now(), None);
    }
}

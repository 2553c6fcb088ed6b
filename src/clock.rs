use std::sync::Mutex;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time and sleeping for the cycle supervisor.
///
/// The production implementation defers to the OS; tests substitute a manual
/// clock whose `sleep` only advances the reported time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep(&self, duration: Duration);

    fn now_millis(&self) -> i64 {
        to_millis(self.now())
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when told to. `sleep` advances it instantly and
/// records the requested duration.
///
/// Meant for driving a [`Supervisor`](crate::Supervisor) through cycles in
/// tests or simulated runs without waiting out real scan intervals, usually
/// together with the `memory://` store. The binary always uses [`SystemClock`].
pub struct ManualClock {
    state: Mutex<ManualState>,
}

struct ManualState {
    now: SystemTime,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.now += by;
        }
    }

    /// Durations passed to `sleep`, oldest first.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|state| state.sleeps.clone())
            .unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.state
            .lock()
            .map(|state| state.now)
            .unwrap_or(UNIX_EPOCH)
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.now += duration;
            state.sleeps.push(duration);
        }
    }
}

/// Milliseconds since the Unix epoch, negative for times before it.
pub fn to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

pub fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_millis_before_and_after_epoch() {
        assert_eq!(to_millis(UNIX_EPOCH + Duration::from_millis(1_500)), 1_500);
        assert_eq!(to_millis(UNIX_EPOCH - Duration::from_millis(250)), -250);
    }

    #[test]
    fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::new(UNIX_EPOCH);
        clock.sleep(Duration::from_secs(5));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_millis(), 6_000);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01 00:00:00.000 UTC");
    }
}

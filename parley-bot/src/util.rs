//! Small helpers shared across the crate.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Application directory name under the platform config/data roots.
const APP_DIR: &str = "parley";

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_ms() -> u64 {
    system_time_to_ms(SystemTime::now())
}

/// Convert a [`SystemTime`] into milliseconds since the Unix epoch.
///
/// Times before the epoch collapse to zero.
#[must_use]
pub fn system_time_to_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Convert milliseconds since the Unix epoch back into a [`SystemTime`].
#[must_use]
pub fn ms_to_system_time(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

/// Whether `time` lies within `window` of now.
///
/// Times in the future count as recent.
#[must_use]
pub fn is_recent(time: SystemTime, window: Duration) -> bool {
    SystemTime::now()
        .duration_since(time)
        .map_or(true, |elapsed| elapsed <= window)
}

/// Generate a unique identifier with the given prefix.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Platform configuration directory for parley.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Platform data directory for parley (sessions, users).
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default directory for persisted session snapshots.
#[must_use]
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

/// Default path of the known-users file.
#[must_use]
pub fn users_path() -> PathBuf {
    data_dir().join("users.json")
}

/// Truncate a string to at most `max_chars` characters, appending an ellipsis.
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_round_trip_is_stable() {
        let now = timestamp_ms();
        assert_eq!(system_time_to_ms(ms_to_system_time(now)), now);
    }

    #[test]
    fn test_is_recent() {
        let now = SystemTime::now();
        assert!(is_recent(now, Duration::from_secs(1)));

        let old = now - Duration::from_secs(3600);
        assert!(!is_recent(old, Duration::from_secs(60)));
        assert!(is_recent(now + Duration::from_secs(60), Duration::ZERO));
    }

    #[test]
    fn test_generate_id_is_unique() {
        let a = generate_id("int");
        let b = generate_id("int");
        assert!(a.starts_with("int_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 6), "hello…");
    }
}

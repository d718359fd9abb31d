//! Utility functions for Matrixon
//!
//! Timing helpers for operation logs and Matrix identifier helpers.

use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Log the start of an operation and return the start time
pub fn log_operation_start(operation: &str) -> Instant {
    debug!("🔧 Starting operation: {}", operation);
    Instant::now()
}

/// Log the end of an operation with duration
pub fn log_operation_end(operation: &str, start: Instant) -> Duration {
    let elapsed = start.elapsed();
    info!("✅ Completed {} in {}", operation, format_duration(elapsed));
    elapsed
}

/// Format a duration in a human-readable format
pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() < 60 {
        format!("{}ms", duration.as_millis())
    } else if duration.as_secs() < 3600 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}h {}m", duration.as_secs() / 3600, (duration.as_secs() % 3600) / 60)
    }
}

/// Server part of a Matrix identifier (`@user:server`, `!room:server`).
///
/// Works on the raw string so that it does not care which sigil or room id
/// format is used.
pub fn server_name_of(id: &str) -> Option<&str> {
    id.split_once(':').map(|(_, server)| server).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_operation_logging() {
        let start = log_operation_start("test_operation");
        let elapsed = log_operation_end("test_operation", start);
        assert!(elapsed <= start.elapsed());
    }

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(3660)), "1h 1m");
    }

    #[test]
    fn test_server_name_of() {
        assert_eq!(server_name_of("@alice:example.org"), Some("example.org"));
        assert_eq!(server_name_of("!room:matrix.org:8448"), Some("matrix.org:8448"));
        assert_eq!(server_name_of("$opaque"), None);
        assert_eq!(server_name_of("@broken:"), None);
    }
}

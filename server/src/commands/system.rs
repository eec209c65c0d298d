// System Commands
// Health reporting

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Service name reported by the health endpoint
pub const SERVICE_NAME: &str = "YouTube Stream Controller";

/// Current time as an RFC 3339 UTC timestamp with millisecond precision
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: String,
}

/// Static service identity plus the current time
pub fn health_status() -> HealthStatus {
    HealthStatus {
        status: "OK",
        service: SERVICE_NAME,
        timestamp: timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        let health = health_status();
        assert_eq!(health.status, "OK");
        assert_eq!(health.service, "YouTube Stream Controller");
        assert!(chrono::DateTime::parse_from_rfc3339(&health.timestamp).is_ok());
        assert!(health.timestamp.ends_with('Z'));
    }
}

//! Entries of the hub's in-memory log buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a log line originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Forwarded from an engine node on `game:log`.
    Engine,
    /// Produced by the hub itself.
    Hub,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_kind_is_lowercase() {
        assert_eq!(serde_json::to_string(&LogKind::Engine).unwrap(), "\"engine\"");
        let kind: LogKind = serde_json::from_str("\"hub\"").unwrap();
        assert_eq!(kind, LogKind::Hub);
    }
}

//! Error taxonomy for the acquisition run.
//!
//! Discovery strategies never return errors past their contract boundary —
//! they degrade to empty/zero results. The only error class that aborts the
//! outer loop is a lost browser session.

use thiserror::Error;

/// Errors that escape per-post processing.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The browser/transport session is gone. Halts the whole run.
    #[error("browser session lost: {0}")]
    SessionLost(String),

    /// Any other per-post failure. Logged, the loop advances.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Heuristic for connection-reset noise seen while shutting down.
///
/// During a requested stop, in-flight transport calls fail with reset/refused
/// errors that carry no signal. Those are suppressed instead of logged.
pub fn is_connection_noise(msg: &str) -> bool {
    msg.contains("Connection refused")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("channel closed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lost_display() {
        let err = HarvestError::SessionLost("ws closed".to_string());
        assert!(err.to_string().contains("session lost"));
    }

    #[test]
    fn test_anyhow_errors_classify_as_other() {
        // Per-item failures (a failed stream save, a record write error)
        // surface as `Other`: logged by the loop, never run-fatal.
        let err: HarvestError = anyhow::anyhow!("stream save failed").into();
        assert!(matches!(err, HarvestError::Other(_)));
        assert_eq!(err.to_string(), "stream save failed");
    }

    #[test]
    fn test_connection_noise_heuristic() {
        assert!(is_connection_noise("tcp connect error: Connection refused"));
        assert!(is_connection_noise("browser channel closed"));
        assert!(!is_connection_noise("404 not found"));
    }
}

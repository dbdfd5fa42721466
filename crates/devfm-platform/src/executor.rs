use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::PrivilegedCommand;

/// Captured result of one executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// stdout and stderr interleaved as the process wrote them, lossily
    /// decoded, trailing newlines removed
    pub output: String,
    /// Exit code, or -1 when the process was killed by a signal
    pub status: i32,
    /// The exact bytes captured, for callers that need binary content
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl CommandResult {
    pub fn new(output: impl Into<String>, status: i32) -> Self {
        let output = output.into();
        Self {
            raw: output.as_bytes().to_vec(),
            output,
            status,
        }
    }

    pub fn from_bytes(raw: Vec<u8>, status: i32) -> Self {
        let output = String::from_utf8_lossy(&raw).trim_end_matches('\n').to_string();
        Self { output, status, raw }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} did not finish within {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
    #[error("i/o error while running {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs allow-listed commands, optionally through the elevation helper.
///
/// A nonzero exit status is not an error: callers inspect
/// [`CommandResult::status`]. Only failures to run the command at all
/// (spawn, timeout, pipe I/O) surface as [`ExecError`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &PrivilegedCommand, elevate: bool) -> Result<CommandResult, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_trims_trailing_newlines_only() {
        let r = CommandResult::from_bytes(b"  a\nb\n\n".to_vec(), 0);
        assert_eq!(r.output, "  a\nb");
        assert_eq!(r.raw, b"  a\nb\n\n");
        assert!(r.success());
    }

    #[test]
    fn test_raw_is_not_serialized() {
        let r = CommandResult::new("done", 1);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!({"output": "done", "status": 1}));
        assert!(!r.success());
    }
}

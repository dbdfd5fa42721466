use std::io;

use thiserror::Error;

use devfm_platform::executor::ExecError;

use crate::upload::UploadFailure;

/// Every way a gateway operation can fail. The `Display` text is what the
/// caller sees in `{"error": ...}`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    MalformedInput(String),
    #[error("{context}: {output}")]
    SubprocessFailed {
        context: String,
        output: String,
        status: i32,
    },
    #[error("{0}")]
    Upload(UploadFailure),
    #[error("{context}: {source}")]
    Exec {
        context: String,
        #[source]
        source: ExecError,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl GatewayError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        GatewayError::NotFound(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        GatewayError::PermissionDenied(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        GatewayError::Conflict(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        GatewayError::MalformedInput(msg.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        GatewayError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn exec(context: impl Into<String>, source: ExecError) -> Self {
        GatewayError::Exec {
            context: context.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GatewayError::Exec {
                source: ExecError::Timeout { .. },
                ..
            }
        )
    }

    /// Failures caused by the request rather than by the host.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            GatewayError::NotFound(_)
                | GatewayError::Conflict(_)
                | GatewayError::MalformedInput(_)
                | GatewayError::Upload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_display_is_the_caller_message() {
        assert_eq!(
            GatewayError::not_found("File non trovato").to_string(),
            "File non trovato"
        );
        let err = GatewayError::SubprocessFailed {
            context: "Errore nella creazione del file".into(),
            output: "touch: cannot touch".into(),
            status: 1,
        };
        assert_eq!(
            err.to_string(),
            "Errore nella creazione del file: touch: cannot touch"
        );
        let err = GatewayError::Upload(UploadFailure::IniSize);
        assert_eq!(err.to_string(), "Il file supera la dimensione massima consentita");
        assert!(err.is_user_error());
    }

    #[test]
    fn test_timeout_classification() {
        let err = GatewayError::exec(
            "Errore nell'esecuzione del comando",
            ExecError::Timeout {
                command: "find /".into(),
                timeout: Duration::from_secs(1),
            },
        );
        assert!(err.is_timeout());
        assert!(!err.is_user_error());
        assert!(GatewayError::conflict("x").is_user_error());
    }
}

//! Provisioning errors and machine-readable error reports

use serde::Serialize;
use std::path::PathBuf;

/// Boxed source error for failures with more than one underlying cause
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error codes for provisioning failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Host configuration file missing or malformed
    ConfigurationLoad,
    /// Host configuration could not be persisted
    ConfigurationWrite,
    /// Required environment variable is not set
    EnvironmentNotConfigured,
    /// Application manager could not be fetched across the engine boundary
    DomainBridge,
    /// The OS refused to hand out an ephemeral port
    PortAllocation,
    /// The hosting engine could not be started
    EngineStart,
    /// A persisted site is not usable
    InvalidSite,
}

impl ErrorCode {
    /// Get the error code as a stable string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigurationLoad => "CONFIGURATION_LOAD",
            ErrorCode::ConfigurationWrite => "CONFIGURATION_WRITE",
            ErrorCode::EnvironmentNotConfigured => "ENVIRONMENT_NOT_CONFIGURED",
            ErrorCode::DomainBridge => "DOMAIN_BRIDGE",
            ErrorCode::PortAllocation => "PORT_ALLOCATION",
            ErrorCode::EngineStart => "ENGINE_START",
            ErrorCode::InvalidSite => "INVALID_SITE",
        }
    }
}

/// Errors raised while provisioning a site or starting a test application.
///
/// None of these are retried internally: each reflects an external
/// precondition (file presence, permissions, environment, running engine).
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to load host configuration '{}': {source}", .path.display())]
    ConfigurationLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to write host configuration '{}': {source}", .path.display())]
    ConfigurationWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable '{variable}' is required to resolve '{template}'")]
    EnvironmentNotConfigured { variable: String, template: String },

    #[error("cannot reach the application manager: {reason}")]
    DomainBridge { reason: String },

    #[error("failed to allocate a free port: {source}")]
    PortAllocation {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start hosting engine: {reason}")]
    EngineStart { reason: String },

    #[error("site '{site}' is not usable: {reason}")]
    InvalidSite { site: String, reason: String },
}

impl ProvisionError {
    /// Build a load error from any underlying failure
    pub fn load(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        ProvisionError::ConfigurationLoad {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ProvisionError::ConfigurationLoad { .. } => ErrorCode::ConfigurationLoad,
            ProvisionError::ConfigurationWrite { .. } => ErrorCode::ConfigurationWrite,
            ProvisionError::EnvironmentNotConfigured { .. } => ErrorCode::EnvironmentNotConfigured,
            ProvisionError::DomainBridge { .. } => ErrorCode::DomainBridge,
            ProvisionError::PortAllocation { .. } => ErrorCode::PortAllocation,
            ProvisionError::EngineStart { .. } => ErrorCode::EngineStart,
            ProvisionError::InvalidSite { .. } => ErrorCode::InvalidSite,
        }
    }

    /// Render this error as a report for an external test runner
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }
}

/// JSON error report body
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    /// The error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ProvisionError::DomainBridge {
            reason: "engine not started".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::DomainBridge);

        let err = ProvisionError::EnvironmentNotConfigured {
            variable: "IIS_BIN".to_string(),
            template: "%IIS_BIN%/app".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::EnvironmentNotConfigured);
        assert_eq!(err.code().as_str(), "ENVIRONMENT_NOT_CONFIGURED");
    }

    #[test]
    fn test_load_error_keeps_path_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ProvisionError::load("/tmp/missing.config", io);

        let message = err.to_string();
        assert!(message.contains("/tmp/missing.config"));
        assert!(message.contains("no such file"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_report_json() {
        let err = ProvisionError::InvalidSite {
            site: "orders".to_string(),
            reason: "no http binding".to_string(),
        };
        let json = err.report().to_json();

        assert!(json.contains("\"code\":\"INVALID_SITE\""));
        assert!(json.contains("no http binding"));
    }

    #[test]
    fn test_serialized_code_matches_as_str() {
        for code in [
            ErrorCode::ConfigurationLoad,
            ErrorCode::ConfigurationWrite,
            ErrorCode::PortAllocation,
            ErrorCode::EngineStart,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}

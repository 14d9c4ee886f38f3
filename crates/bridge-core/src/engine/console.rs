//! Page console output re-emitted through `tracing`.

use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};

/// Raw console severities reported by the rendering engine.
pub struct ConsoleSeverity;

impl ConsoleSeverity {
    pub const DEFAULT: i32 = 0;
    pub const VERBOSE: i32 = 1;
    pub const INFO: i32 = 2;
    pub const WARNING: i32 = 3;
    pub const ERROR: i32 = 4;
    pub const FATAL: i32 = 5;
}

/// Logger level a console severity maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    /// Map a raw severity. Unknown severities are a configuration error.
    pub fn from_severity(severity: i32) -> Result<Self> {
        match severity {
            ConsoleSeverity::DEFAULT | ConsoleSeverity::INFO => Ok(ConsoleLevel::Info),
            ConsoleSeverity::VERBOSE => Ok(ConsoleLevel::Debug),
            ConsoleSeverity::WARNING => Ok(ConsoleLevel::Warn),
            ConsoleSeverity::ERROR | ConsoleSeverity::FATAL => Ok(ConsoleLevel::Error),
            other => Err(BridgeError::Config {
                message: format!("unrecognized console severity {}", other),
            }),
        }
    }

    pub fn emit(self, message: &str, source: &str, line: u32) {
        match self {
            ConsoleLevel::Debug => debug!(target: "console", "{} ({}:{})", message, source, line),
            ConsoleLevel::Info => info!(target: "console", "{} ({}:{})", message, source, line),
            ConsoleLevel::Warn => warn!(target: "console", "{} ({}:{})", message, source, line),
            ConsoleLevel::Error => error!(target: "console", "{} ({}:{})", message, source, line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_severities_map() {
        assert_eq!(ConsoleLevel::from_severity(0).unwrap(), ConsoleLevel::Info);
        assert_eq!(ConsoleLevel::from_severity(1).unwrap(), ConsoleLevel::Debug);
        assert_eq!(ConsoleLevel::from_severity(2).unwrap(), ConsoleLevel::Info);
        assert_eq!(ConsoleLevel::from_severity(3).unwrap(), ConsoleLevel::Warn);
        assert_eq!(ConsoleLevel::from_severity(4).unwrap(), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from_severity(5).unwrap(), ConsoleLevel::Error);
    }

    #[test]
    fn test_unknown_severity_is_config_error() {
        let err = ConsoleLevel::from_severity(42).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
        assert!(ConsoleLevel::from_severity(-1).is_err());
    }
}

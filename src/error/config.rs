// Configuration errors. Fatal: caught at startup, maps to exit code 64.
//
// Error code range: 1401-1499

use std::fmt;

use crate::error::ErrorCode;

pub struct ConfigErrorCodes;

impl ConfigErrorCodes {
    pub const NOT_FOUND: i32 = 1401;
    pub const PARSE_FAILED: i32 = 1402;
    pub const INVALID_VALUE: i32 = 1403;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NotFound { path: String },
    ParseFailed { path: String, reason: String },
    InvalidValue { field: String, reason: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::NotFound { .. } => ConfigErrorCodes::NOT_FOUND,
            ConfigError::ParseFailed { .. } => ConfigErrorCodes::PARSE_FAILED,
            ConfigError::InvalidValue { .. } => ConfigErrorCodes::INVALID_VALUE,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::NotFound { path } => format!("config file not found: {path}"),
            ConfigError::ParseFailed { path, reason } => format!("failed to parse {path}: {reason}"),
            ConfigError::InvalidValue { field, reason } => format!("invalid value for {field}: {reason}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ConfigError {}

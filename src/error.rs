//! Error handling for the load-testing lab
//!
//! Only failures that abort something are modelled as error variants.
//! A non-zero remote exit status, a report without its completion marker,
//! a failed monitor sample or a failed store write are all *data* outcomes
//! handled at their call sites, not errors that propagate.

use thiserror::Error;

/// Custom error types for the load-testing lab
#[derive(Error, Debug)]
pub enum AppError {
    /// Transport or authentication failure while establishing a session
    #[error("Connection error: {0}")]
    Connection(String),

    /// Persistent-shell misuse (e.g. in-session command without a shell)
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration loading/validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (local files, artifacts)
    #[error("I/O error: {0}")]
    Io(String),

    /// External store errors surfaced to callers that want them
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Environment setup failure (hugepages, NIC bind, config write)
    #[error("Setup error: {0}")]
    Setup(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    /// Create a new session error
    pub fn session<S: Into<String>>(message: S) -> Self {
        Self::Session(message.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a new setup error
    pub fn setup<S: Into<String>>(message: S) -> Self {
        Self::Setup(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION",
            Self::Session(_) => "SESSION",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "IO",
            Self::Persistence(_) => "PERSISTENCE",
            Self::Setup(_) => "SETUP",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Connection(_) | Self::Session(_) => 2,
            Self::Setup(_) => 3,
            Self::Io(_) => 5,
            Self::Persistence(_) => 6,
            Self::Internal(_) => 99,
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self {
                Self::Config(_) => format!("[{}] {}", category.red().bold(), message.red()),
                Self::Connection(_) | Self::Session(_) => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
                Self::Setup(_) => format!("[{}] {}", category.cyan().bold(), message.cyan()),
                Self::Io(_) | Self::Persistence(_) => {
                    format!("[{}] {}", category.blue().bold(), message.blue())
                }
                Self::Internal(_) => {
                    format!("[{}] {}", category.bright_red().bold(), message.bright_red())
                }
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

// Standard library and crate error conversions
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<ssh2::Error> for AppError {
    fn from(error: ssh2::Error) -> Self {
        Self::connection(error.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::config(format!("YAML parse error: {}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::io(format!("JSON serialization error: {}", error))
    }
}

impl From<csv::Error> for AppError {
    fn from(error: csv::Error) -> Self {
        Self::io(format!("CSV error: {}", error))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(error: redis::RedisError) -> Self {
        Self::persistence(error.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}

/// Custom Result type for the application
pub type Result<T> = std::result::Result<T, AppError>;

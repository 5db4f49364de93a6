//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for input rejected before any cluster was contacted
pub const EXIT_INVALID_CONFIGURATION: u8 = 2;

/// Exit code for every other failure
pub const EXIT_FAILURE: u8 = 1;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Subctl(#[from] subctl_common::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    /// Whether the input was rejected without touching a cluster
    pub fn is_invalid_configuration(&self) -> bool {
        match self {
            Error::Validation { .. } => true,
            Error::Subctl(e) => e.is_invalid_configuration(),
            _ => false,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        if self.is_invalid_configuration() {
            EXIT_INVALID_CONFIGURATION
        } else {
            EXIT_FAILURE
        }
    }
}

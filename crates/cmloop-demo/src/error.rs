use cmloop_dispatch::DispatchError;
use cmloop_time::TimeKeeperError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DemoError>;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("time keeper error: {0}")]
    TimeKeeper(#[from] TimeKeeperError),

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("logging setup failed: {message}")]
    Logging { message: String },

    #[error("unsupported platform: {message}")]
    Unsupported { message: String },
}

impl DemoError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } => 2,
            Self::Logging { .. } => 3,
            Self::Dispatch(_) => 4,
            Self::TimeKeeper(_) => 5,
            Self::Unsupported { .. } => 6,
            Self::Io(_) | Self::Json(_) => 1,
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_failure_classes() {
        assert_eq!(DemoError::invalid("bad").exit_code(), 2);
        assert_eq!(DemoError::from(DispatchError::Destroyed).exit_code(), 4);
        assert_eq!(
            DemoError::from(TimeKeeperError::AlreadyPlaying).exit_code(),
            5
        );
        let io = std::io::Error::other("boom");
        assert_eq!(DemoError::from(io).exit_code(), 1);
    }

    #[test]
    fn invalid_argument_message() {
        assert_eq!(
            DemoError::invalid("minimum above maximum").to_string(),
            "invalid argument: minimum above maximum"
        );
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FstransError>;

#[derive(Error, Debug)]
pub enum FstransError {
    #[error("Mount busy: transaction not granted in current state")]
    Busy,

    #[error("Interrupted while waiting for state change")]
    Interrupted,

    #[error("Mount gone: {0}")]
    Gone(String),

    #[error("Copy-on-write handler not found")]
    NotFound,

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Operation would block")]
    WouldBlock,

    #[error("Operation not supported by mount")]
    Unsupported,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Copy-on-write error: {0}")]
    CopyOnWrite(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),
}

impl FstransError {
    /// Conventional errno name for errors bubbled up through a syscall surface.
    pub fn errno(&self) -> &'static str {
        match self {
            FstransError::Busy => "EBUSY",
            FstransError::Interrupted => "EINTR",
            FstransError::Gone(_) | FstransError::NotFound => "ENOENT",
            FstransError::OutOfMemory => "ENOMEM",
            FstransError::WouldBlock => "EWOULDBLOCK",
            FstransError::Unsupported => "EOPNOTSUPP",
            FstransError::InvalidArgument(_) | FstransError::Config(_) => "EINVAL",
            FstransError::Filesystem(_)
            | FstransError::CopyOnWrite(_)
            | FstransError::Io(_)
            | FstransError::Json(_) => "EIO",
        }
    }

    /// True for errors the caller may retry after the mount changes state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FstransError::Busy | FstransError::Interrupted | FstransError::WouldBlock
        )
    }
}

impl From<serde_json::Error> for FstransError {
    fn from(err: serde_json::Error) -> Self {
        FstransError::Json(err.to_string())
    }
}

impl From<std::io::Error> for FstransError {
    fn from(err: std::io::Error) -> Self {
        FstransError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FstransError::Busy.errno(), "EBUSY");
        assert_eq!(FstransError::Interrupted.errno(), "EINTR");
        assert_eq!(FstransError::Gone("m".to_string()).errno(), "ENOENT");
        assert_eq!(FstransError::WouldBlock.errno(), "EWOULDBLOCK");
        assert_eq!(FstransError::Unsupported.errno(), "EOPNOTSUPP");
    }

    #[test]
    fn test_transient_errors() {
        assert!(FstransError::Busy.is_transient());
        assert!(FstransError::Interrupted.is_transient());
        assert!(!FstransError::Gone("m".to_string()).is_transient());
        assert!(!FstransError::NotFound.is_transient());
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let converted: FstransError = err.into();
        assert!(matches!(converted, FstransError::Json(_)));
    }
}

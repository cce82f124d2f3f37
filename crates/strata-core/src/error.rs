use std::io::ErrorKind;

pub type Result<T> = std::result::Result<T, FsError>;

/// The error kinds every driver surfaces.
///
/// All of these are non-fatal to a caller: a command fails, reports, and
/// the on-disk state is unchanged except where a crash mid-write is
/// explicitly accepted.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Path resolution failed.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Invalid block index, malformed record, or a host I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// Mutation attempted on a driver that cannot write.
    #[error("read-only filesystem")]
    ReadOnlyFs,

    /// The free map, catalog or directory cannot fit the allocation.
    #[error("no space left on volume: {0}")]
    NoSpace(String),

    /// A path, filename or size that is syntactically invalid for the
    /// target filesystem; raised before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::PermissionDenied => FsError::ReadOnlyFs,
            ErrorKind::NotFound => FsError::NotFound(e.to_string()),
            _ => FsError::Io(e),
        }
    }
}

impl FsError {
    /// A malformed-metadata error with a descriptive message.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        FsError::Io(std::io::Error::new(ErrorKind::InvalidData, msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_maps_to_read_only() {
        let io = std::io::Error::new(ErrorKind::PermissionDenied, "image is read-only");
        assert!(matches!(FsError::from(io), FsError::ReadOnlyFs));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            FsError::NotFound("A.TXT".into()).to_string(),
            "file not found: A.TXT"
        );
    }
}

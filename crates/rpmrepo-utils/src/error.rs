use std::{error::Error, fmt, path::PathBuf};

#[derive(Debug)]
pub enum HashError {
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashError::ReadFailed { path, source } => {
                write!(f, "Failed to hash file `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for HashError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HashError::ReadFailed { source, .. } => Some(source),
        }
    }
}

#[derive(Debug)]
pub enum PathError {
    CurrentDir { source: std::io::Error },

    Empty,

    MissingEnvVar { var: String, input: String },

    UnclosedVariable { input: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Empty => write!(f, "Path is empty"),
            PathError::CurrentDir { source } => {
                write!(f, "Failed to get current directory: {source}")
            }
            PathError::UnclosedVariable { input } => {
                write!(f, "Unclosed variable expression starting at `{input}`")
            }
            PathError::MissingEnvVar { var, input } => {
                write!(f, "Environment variable `{var}` not set in `{input}`")
            }
        }
    }
}

impl Error for PathError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PathError::CurrentDir { source } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum FileSystemError {
    File {
        path: PathBuf,
        action: &'static str,
        source: std::io::Error,
    },

    Directory {
        path: PathBuf,
        action: &'static str,
        source: std::io::Error,
    },

    NotADirectory {
        path: PathBuf,
    },
}

impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSystemError::File {
                path,
                action,
                source,
            } => {
                write!(f, "Failed to {action} file `{}`: {source}", path.display())
            }
            FileSystemError::Directory {
                path,
                action,
                source,
            } => {
                write!(
                    f,
                    "Failed to {action} directory `{}`: {source}",
                    path.display()
                )
            }
            FileSystemError::NotADirectory { path } => {
                write!(f, "`{}` is not a directory", path.display())
            }
        }
    }
}

impl Error for FileSystemError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FileSystemError::File { source, .. } => Some(source),
            FileSystemError::Directory { source, .. } => Some(source),
            FileSystemError::NotADirectory { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum DurationError {
    Invalid { input: String },
}

impl fmt::Display for DurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationError::Invalid { input } => {
                write!(f, "Invalid duration `{input}`, expected a value like `1h30m`")
            }
        }
    }
}

impl Error for DurationError {}

#[derive(Debug)]
pub enum UtilsError {
    Duration(DurationError),
    Path(PathError),
    FileSystem(FileSystemError),
    Hash(HashError),
}

impl fmt::Display for UtilsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtilsError::Duration(err) => write!(f, "{err}"),
            UtilsError::Path(err) => write!(f, "{err}"),
            UtilsError::FileSystem(err) => write!(f, "{err}"),
            UtilsError::Hash(err) => write!(f, "{err}"),
        }
    }
}

impl Error for UtilsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UtilsError::Duration(err) => Some(err),
            UtilsError::Path(err) => Some(err),
            UtilsError::FileSystem(err) => Some(err),
            UtilsError::Hash(err) => Some(err),
        }
    }
}

impl From<DurationError> for UtilsError {
    fn from(err: DurationError) -> Self {
        UtilsError::Duration(err)
    }
}

impl From<PathError> for UtilsError {
    fn from(err: PathError) -> Self {
        UtilsError::Path(err)
    }
}

impl From<FileSystemError> for UtilsError {
    fn from(err: FileSystemError) -> Self {
        UtilsError::FileSystem(err)
    }
}

impl From<HashError> for UtilsError {
    fn from(err: HashError) -> Self {
        UtilsError::Hash(err)
    }
}

pub type DurationResult<T> = std::result::Result<T, DurationError>;
pub type FileSystemResult<T> = std::result::Result<T, FileSystemError>;
pub type HashResult<T> = std::result::Result<T, HashError>;
pub type PathResult<T> = std::result::Result<T, PathError>;

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_hash_error_display_and_source() {
        let error = HashError::ReadFailed {
            path: PathBuf::from("/srv/upload/demo.rpm"),
            source: io::Error::new(io::ErrorKind::NotFound, "file not found"),
        };
        assert_eq!(
            error.to_string(),
            "Failed to hash file `/srv/upload/demo.rpm`: file not found"
        );
        assert!(error.source().is_some());
    }

    #[test]
    fn test_path_error_display_and_source() {
        let current_dir_error = PathError::CurrentDir {
            source: io::Error::other("gone"),
        };
        assert_eq!(
            current_dir_error.to_string(),
            "Failed to get current directory: gone"
        );
        assert!(current_dir_error.source().is_some());

        assert_eq!(PathError::Empty.to_string(), "Path is empty");
        assert!(PathError::Empty.source().is_none());

        let missing = PathError::MissingEnvVar {
            var: "STORE".to_string(),
            input: "$STORE/repo".to_string(),
        };
        assert_eq!(
            missing.to_string(),
            "Environment variable `STORE` not set in `$STORE/repo`"
        );
    }

    #[test]
    fn test_file_system_error_display_and_source() {
        let file_error = FileSystemError::File {
            path: PathBuf::from("/store/el/8/demo.rpm"),
            action: "link",
            source: io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        };
        assert_eq!(
            file_error.to_string(),
            "Failed to link file `/store/el/8/demo.rpm`: exists"
        );
        assert!(file_error.source().is_some());

        let not_a_dir = FileSystemError::NotADirectory {
            path: PathBuf::from("/store"),
        };
        assert_eq!(not_a_dir.to_string(), "`/store` is not a directory");
        assert!(not_a_dir.source().is_none());
    }

    #[test]
    fn test_duration_error_display() {
        let error = DurationError::Invalid {
            input: "soon".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid duration `soon`, expected a value like `1h30m`"
        );
    }

    #[test]
    fn test_utils_error_from_and_source() {
        let err = UtilsError::from(PathError::Empty);
        assert_eq!(err.to_string(), "Path is empty");
        assert!(err.source().is_some());

        let err = UtilsError::from(DurationError::Invalid {
            input: "x".to_string(),
        });
        assert!(matches!(err, UtilsError::Duration(_)));
    }
}

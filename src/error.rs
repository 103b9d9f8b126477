//! Error kinds produced by the filesystem core.
//!
//! The core never formats a human-facing message; callers (the shell) map
//! each kind to the fixed token of their choice.

use std::fmt;
use std::io;

/// An error produced by a filesystem operation.
#[derive(Debug)]
pub enum Error {
	/// A path, directory item, or inode does not exist.
	NotFound,
	/// A path component that was expected to be a directory is a file.
	NotADirectory,
	/// A path that was expected to name a file names a directory.
	IsADirectory,
	/// A directory contains more than `.` and `..`.
	NotEmpty,
	/// A path that must not already exist does.
	Exists,
	/// A filename exceeds the maximum usable length (11 bytes).
	NameTooLong,
	/// The inode bitmap has no free id.
	NoFreeInode,
	/// The data bitmap has no free cluster.
	NoFreeCluster,
	/// A directory cannot hold another item (all direct and indirect links full).
	DirectoryFull,
	/// A path string could not be resolved (e.g. no leaf component).
	InvalidPath,
	/// A read or write against the backing file failed.
	Io(io::Error),
	/// The filesystem has not been formatted/mounted yet.
	Uninitialised,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NotFound => write!(f, "not found"),
			Self::NotADirectory => write!(f, "not a directory"),
			Self::IsADirectory => write!(f, "is a directory"),
			Self::NotEmpty => write!(f, "directory not empty"),
			Self::Exists => write!(f, "already exists"),
			Self::NameTooLong => write!(f, "name too long"),
			Self::NoFreeInode => write!(f, "no free inode"),
			Self::NoFreeCluster => write!(f, "no free cluster"),
			Self::DirectoryFull => write!(f, "directory full"),
			Self::InvalidPath => write!(f, "invalid path"),
			Self::Io(e) => write!(f, "I/O error: {e}"),
			Self::Uninitialised => write!(f, "filesystem not initialised"),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}

/// Shorthand for a `Result` whose error type is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

use std::path::PathBuf;

use crate::fsutil;

use super::port_range::PortRangeError;
use super::tcp::ParseError;

/// Errors that may occur while reading host state from procfs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),
    #[error("failed to read file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid local port range in file `{path}`: {source}")]
    PortRange {
        path: PathBuf,
        #[source]
        source: PortRangeError,
    },
    #[error("failed to parse line {line} in file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: ParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

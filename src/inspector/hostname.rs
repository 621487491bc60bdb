use std::io::Read;
use std::path::Path;

use crate::fsutil;

use super::{Error, Result};

/// Reads the host name from a `/proc/sys/kernel/hostname`-style file.
///
/// Surrounding whitespace (including the trailing newline) is stripped.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::Read`] if reading from the file fails.
pub fn read_hostname(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut reader = fsutil::open_file_reader(path)?;
    let mut hostname = String::with_capacity(64);
    reader
        .read_to_string(&mut hostname)
        .map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(hostname.trim().to_owned())
}

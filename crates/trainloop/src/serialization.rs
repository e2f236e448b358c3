//! Whole-object serialization to files.
//!
//! Values are written to a temporary file next to the destination and then
//! renamed over it, so a failed write never leaves a truncated file behind.

use crate::{Result, TrainLoopError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// On-disk encoding, chosen from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// `serde_json`, for `.json` files
    Json,
    /// `bincode`, for everything else
    Binary,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Binary,
        }
    }
}

/// Serialize `value` to `path`, replacing the file atomically.
pub fn secure_dump<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(directory)?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        match Format::from_path(path) {
            Format::Json => serde_json::to_writer_pretty(&mut writer, value)?,
            Format::Binary => bincode::serialize_into(&mut writer, value)?,
        }
        writer.flush()?;
    }
    file.as_file().sync_all()?;

    file.persist(path).map_err(|err| TrainLoopError::Persist {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    tracing::debug!(path = %path.display(), "Serialized object");
    Ok(())
}

/// Deserialize a value previously written with [`secure_dump`].
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let value = match Format::from_path(path) {
        Format::Json => serde_json::from_reader(reader)?,
        Format::Binary => bincode::deserialize_from(reader)?,
    };
    Ok(value)
}

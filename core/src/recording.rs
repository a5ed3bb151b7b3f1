//! Append-only capture of raw link bytes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::prelude::{RecordingError, RecordingResult};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

const FILE_PREFIX: &str = "ADCP";
const FILE_EXTENSION: &str = "ens";

/// Counters reported alongside the terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordingStatus {
    pub file_path: PathBuf,
    pub current_file_bytes: u64,
    pub total_bytes: u64,
}

/// Writes bytes into timestamped files under one folder, starting a new
/// file once the current one would exceed `max_file_size`.
pub struct BinaryRecorder {
    folder: PathBuf,
    max_file_size: u64,
    file: File,
    file_path: PathBuf,
    sequence: u32,
    current_file_bytes: u64,
    total_bytes: u64,
}

impl BinaryRecorder {
    pub fn create(folder: impl Into<PathBuf>) -> RecordingResult<Self> {
        Self::with_max_file_size(folder, DEFAULT_MAX_FILE_SIZE)
    }

    pub fn with_max_file_size(folder: impl Into<PathBuf>, max_file_size: u64) -> RecordingResult<Self> {
        let folder = folder.into();
        fs::create_dir_all(&folder).map_err(|source| RecordingError::Io {
            path: folder.clone(),
            source,
        })?;
        let (file, file_path) = open_next(&folder, 1)?;
        log::info!("recording to {}", file_path.display());
        Ok(Self {
            folder,
            max_file_size: max_file_size.max(1),
            file,
            file_path,
            sequence: 1,
            current_file_bytes: 0,
            total_bytes: 0,
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> RecordingResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.current_file_bytes > 0
            && self.current_file_bytes + bytes.len() as u64 > self.max_file_size
        {
            self.roll_over()?;
        }
        self.file
            .write_all(bytes)
            .map_err(|source| RecordingError::Io {
                path: self.file_path.clone(),
                source,
            })?;
        self.current_file_bytes += bytes.len() as u64;
        self.total_bytes += bytes.len() as u64;
        Ok(())
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn current_file_bytes(&self) -> u64 {
        self.current_file_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            file_path: self.file_path.clone(),
            current_file_bytes: self.current_file_bytes,
            total_bytes: self.total_bytes,
        }
    }

    pub fn close(mut self) -> RecordingResult<RecordingStatus> {
        self.file.flush().map_err(|source| RecordingError::Io {
            path: self.file_path.clone(),
            source,
        })?;
        log::info!(
            "closed {} after {} bytes",
            self.file_path.display(),
            self.total_bytes
        );
        Ok(self.status())
    }

    fn roll_over(&mut self) -> RecordingResult<()> {
        self.file.flush().map_err(|source| RecordingError::Io {
            path: self.file_path.clone(),
            source,
        })?;
        self.sequence += 1;
        let (file, file_path) = open_next(&self.folder, self.sequence)?;
        log::debug!("rolled recording over to {}", file_path.display());
        self.file = file;
        self.file_path = file_path;
        self.current_file_bytes = 0;
        Ok(())
    }
}

fn open_next(folder: &Path, sequence: u32) -> RecordingResult<(File, PathBuf)> {
    let name = format!(
        "{}_{}_{:03}.{}",
        FILE_PREFIX,
        Utc::now().format("%Y%m%d_%H%M%S"),
        sequence,
        FILE_EXTENSION
    );
    let path = folder.join(name);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| RecordingError::Io {
            path: path.clone(),
            source,
        })?;
    Ok((file, path))
}

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::ensemble::Ensemble;

/// Aggregator fed by the distributor. Implementations own their own lock so
/// `set_ens` never interleaves with a query or reset on the same projection.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Folds one ensemble into the projection. Missing data-sets are
    /// treated as "no update this cycle".
    fn set_ens(&self, ensemble: &Arc<Ensemble>);

    /// Returns the projection to its empty state.
    fn reset(&self);
}

/// Query side of a projection: returns an owned copy of the current state.
pub trait Queryable {
    type Query;
    type Snapshot: Serialize + Clone;

    fn get_data(&self, query: Self::Query) -> Self::Snapshot;
}

/// Frame validation and decoding errors.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("frame too short: have {have} bytes, need {need}")]
    TooShort { have: usize, need: usize },
    #[error("frame does not start with the ensemble delimiter")]
    MissingDelimiter,
    #[error("header field {0} does not match its inverse")]
    HeaderMismatch(&'static str),
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
    #[error("checksum mismatch: frame {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("payload encoding: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Distributor and replay lifecycle errors.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: io::Error,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Recording sink errors.
#[derive(thiserror::Error, Debug)]
pub enum RecordingError {
    #[error("recording to {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// Persisted settings errors. Callers fall back to defaults on load.
#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("settings file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("parsing settings {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("encoding settings: {0}")]
    Encode(#[from] serde_yaml::Error),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Live link errors.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("opening {port} at {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        source: io::Error,
    },
    #[error("serial port is not connected")]
    NotConnected,
    #[error("serial port I/O: {0}")]
    Io(#[from] io::Error),
    #[error("failed to spawn serial reader: {0}")]
    Spawn(io::Error),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

pub type SessionResult<T> = Result<T, SessionError>;

//! Error taxonomy surfaced by the history pipeline.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("order fetch failed: {0}")]
    Fetch(String),

    #[error("malformed record at `{field}`: {reason}")]
    MalformedRecord { field: String, reason: String },

    #[error("cache file {} is corrupt: {reason}", .path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("cannot write cache file {}: {reason}", .path.display())]
    CacheWrite { path: PathBuf, reason: String },

    #[error("invalid cache key {0:?}")]
    InvalidCacheKey(String),

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Fetch,
    MalformedRecord,
    CacheCorruption,
    CacheWrite,
    InvalidRequest,
}

impl HistoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HistoryError::Authentication(_) => ErrorKind::Authentication,
            HistoryError::Fetch(_) => ErrorKind::Fetch,
            HistoryError::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            HistoryError::CacheCorruption { .. } => ErrorKind::CacheCorruption,
            HistoryError::CacheWrite { .. } => ErrorKind::CacheWrite,
            HistoryError::InvalidCacheKey(_) | HistoryError::InvalidRange { .. } => {
                ErrorKind::InvalidRequest
            }
        }
    }

    pub(crate) fn malformed(field: impl Into<String>, reason: impl ToString) -> Self {
        HistoryError::MalformedRecord {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        HistoryError::CacheCorruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        HistoryError::CacheWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::Fetch => "FetchError",
            ErrorKind::MalformedRecord => "MalformedRecordError",
            ErrorKind::CacheCorruption => "CacheCorruptionError",
            ErrorKind::CacheWrite => "CacheWriteError",
            ErrorKind::InvalidRequest => "InvalidRequest",
        }
    }
}

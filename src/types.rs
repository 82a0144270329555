//! Persisted restore states, errors, and job names.
//!
//! Every enum here is stored as a plain integer in the preference store, so the integer values
//! are part of the on-disk format and must never be renumbered.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Cloud-to-device transfer stage, reported by the external download agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DataDownloadState {
    Unknown = 0,
    Started = 1,
    Retry = 2,
    Failed = 3,
    Complete = 4,
}

impl DataDownloadState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// `Failed` and `Complete` can only be left through a forced write (reset).
    pub fn is_terminal(self) -> bool {
        matches!(self, DataDownloadState::Failed | DataDownloadState::Complete)
    }

    /// Parse a CLI-style name (`started`, `retry`, ...).
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "started" => Some(Self::Started),
            "retry" => Some(Self::Retry),
            "failed" => Some(Self::Failed),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl TryFrom<i32> for DataDownloadState {
    type Error = StateError;

    fn try_from(v: i32) -> Result<Self, StateError> {
        match v {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Started),
            2 => Ok(Self::Retry),
            3 => Ok(Self::Failed),
            4 => Ok(Self::Complete),
            other => Err(StateError::UnknownValue {
                kind: "download state",
                value: other,
            }),
        }
    }
}

/// Progress of locally staging and merging restored data. Ordered: transitions only move
/// forward unless forced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum InternalRestoreState {
    Unknown = 0,
    WaitingForStaging = 1,
    StagingInProgress = 2,
    StagingDone = 3,
    MergingInProgress = 4,
    /// Legacy value written by older releases. Read, never written.
    MergingDoneOld = 5,
    MergingDone = 6,
}

impl InternalRestoreState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Successor check for an unforced transition.
    pub fn can_advance_to(self, next: InternalRestoreState) -> bool {
        next > self && next != InternalRestoreState::MergingDoneOld
    }
}

impl TryFrom<i32> for InternalRestoreState {
    type Error = StateError;

    fn try_from(v: i32) -> Result<Self, StateError> {
        match v {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::WaitingForStaging),
            2 => Ok(Self::StagingInProgress),
            3 => Ok(Self::StagingDone),
            4 => Ok(Self::MergingInProgress),
            5 => Ok(Self::MergingDoneOld),
            6 => Ok(Self::MergingDone),
            other => Err(StateError::UnknownValue {
                kind: "restore state",
                value: other,
            }),
        }
    }
}

/// Terminal failure reason, independent of the restore state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DataRestoreError {
    None = 0,
    Unknown = 1,
    FetchingData = 2,
    VersionDiff = 3,
}

impl DataRestoreError {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for DataRestoreError {
    type Error = StateError;

    fn try_from(v: i32) -> Result<Self, StateError> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Unknown),
            2 => Ok(Self::FetchingData),
            3 => Ok(Self::VersionDiff),
            other => Err(StateError::UnknownValue {
                kind: "restore error",
                value: other,
            }),
        }
    }
}

/// Coarse public restore status derived from [`InternalRestoreState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DataRestoreState {
    Idle = 0,
    Pending = 1,
    InProgress = 2,
}

/// The four durable timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RestoreJob {
    DownloadTimeout,
    StagingTimeout,
    MergingTimeout,
    MergingRetry,
}

impl RestoreJob {
    pub const ALL: [RestoreJob; 4] = [
        RestoreJob::DownloadTimeout,
        RestoreJob::StagingTimeout,
        RestoreJob::MergingTimeout,
        RestoreJob::MergingRetry,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RestoreJob::DownloadTimeout => "data_download_timeout_job",
            RestoreJob::StagingTimeout => "data_staging_timeout_job",
            RestoreJob::MergingTimeout => "data_merging_timeout_job",
            RestoreJob::MergingRetry => "data_merging_retry_job",
        }
    }
}

impl fmt::Display for RestoreJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of all persisted state for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RestoreStatus {
    pub download: DataDownloadState,
    pub internal: InternalRestoreState,
    pub error: DataRestoreError,
    pub public: DataRestoreState,
}

/// Errors decoding persisted state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: i32 },
}

/// Category of a per-file staging failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StagingErrorKind {
    Io,
    Security,
}

/// One file that could not be staged.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("{kind:?} error: {message}")]
pub struct StagingError {
    pub kind: StagingErrorKind,
    pub message: String,
}

impl StagingError {
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: StagingErrorKind::Io,
            message: message.into(),
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self {
            kind: StagingErrorKind::Security,
            message: message.into(),
        }
    }
}

/// Per-file staging failures, keyed by file name. Reported once through the staging callback.
#[derive(Clone, Debug, Default, PartialEq, Eq, thiserror::Error)]
#[error("failed to stage {} file(s)", .errors_by_file_name.len())]
pub struct StageRemoteDataError {
    pub errors_by_file_name: BTreeMap<String, StagingError>,
}

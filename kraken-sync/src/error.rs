//! Errors surfaced to the host of a synchronization run.

use std::fmt;

use kraken_core::KrakenError;
use thiserror::Error;

/// Stage of a run, recorded on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Connect,
    ResolveContainer,
    FetchMembers,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Connect => "connecting to the remote store",
            Self::ResolveContainer => "resolving the collection container",
            Self::FetchMembers => "fetching collection members",
        };
        f.write_str(phase)
    }
}

/// Umbrella error for a failed run.
///
/// The host decides how to recover: retry the whole run, or keep showing
/// whatever it displayed before.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Synchronization failed while {phase}: {source}")]
    Failed {
        phase: SyncPhase,
        #[source]
        source: KrakenError,
    },

    #[error("Synchronization task aborted: {reason}")]
    Aborted { reason: String },
}

impl SyncError {
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            Self::Failed { phase, .. } => Some(*phase),
            Self::Aborted { .. } => None,
        }
    }

    /// The underlying engine error, if the run itself failed.
    pub fn kraken_error(&self) -> Option<&KrakenError> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::Aborted { .. } => None,
        }
    }
}

/// Attach a [`SyncPhase`] to engine results.
pub(crate) trait InPhase<T> {
    fn in_phase(self, phase: SyncPhase) -> Result<T, SyncError>;
}

impl<T> InPhase<T> for Result<T, KrakenError> {
    fn in_phase(self, phase: SyncPhase) -> Result<T, SyncError> {
        self.map_err(|source| SyncError::Failed { phase, source })
    }
}

/// Failure to install the tracing subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to initialize tracing: {reason}")]
pub struct TelemetryError {
    pub reason: String,
}

use thiserror::Error;

use crate::types::TrackId;

/// Errors reported by a peer session or one of its tracks.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Writing to a local track that has no subscribers attached yet.
    #[error("closed pipe")]
    ClosedPipe,

    /// The underlying session or track has been torn down.
    #[error("session closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// True for the benign "no subscribers" write error.
    #[must_use]
    pub fn is_closed_pipe(&self) -> bool {
        matches!(self, Self::ClosedPipe)
    }
}

/// Errors returned by `TrackListener` operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to attach track {track_id}: {source}")]
    AttachFailed {
        track_id: TrackId,
        #[source]
        source: SessionError,
    },

    #[error("failed to detach track {track_id}: {source}")]
    DetachFailed {
        track_id: TrackId,
        #[source]
        source: SessionError,
    },

    #[error("no sender registered for track {track_id}")]
    UnknownTrack { track_id: TrackId },
}

pub type Result<T> = std::result::Result<T, Error>;

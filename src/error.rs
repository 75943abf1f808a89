//! Error types for stream resolution and server selection.

use thiserror::Error;

/// Failure to turn one server candidate into a playable manifest.
///
/// Every variant is local to a single candidate; the fallback controller
/// moves on to the next server instead of aborting the episode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("server descriptor is not an iframe (got '{kind}')")]
    NotIframe { kind: String },

    #[error("could not extract file id and nonce after {attempts} attempts")]
    ExtractionExhausted { attempts: u32 },

    #[error("failed to fetch stream sources: {0}")]
    SourceFetchFailed(String),

    #[error("stream is encrypted and not HLS, try another server")]
    Encrypted,
}

impl ResolveError {
    pub fn fetch(context: &str, err: impl std::fmt::Display) -> Self {
        ResolveError::SourceFetchFailed(format!("{context}: {err}"))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FallbackError {
    #[error("no server produced a playable stream")]
    Exhausted,

    #[error("server list is empty")]
    NoServers,

    #[error("server {name}: {source}")]
    Resolve {
        name: String,
        #[source]
        source: ResolveError,
    },
}

/// Invalid manual server choice; reported to the user, who is asked again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("server {index} is out of range (1-{len})")]
    OutOfRange { index: usize, len: usize },
}

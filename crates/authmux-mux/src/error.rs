//! Error types for the multiplexer backends.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    /// The multiplexer CLI is missing or its server is not reachable.
    #[error("{backend} backend unavailable: {detail}")]
    Unavailable { backend: &'static str, detail: String },

    #[error("{backend} command failed: {detail}")]
    CommandFailed { backend: &'static str, detail: String },

    #[error("failed to parse {backend} pane list line {line_num}: {detail}")]
    ParseError {
        backend: &'static str,
        line_num: usize,
        detail: String,
    },

    #[error("{backend} io error: {source}")]
    Io {
        backend: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl MuxError {
    /// Reclassify a listing failure: a listing that cannot run means the
    /// backend as a whole is unusable.
    pub(crate) fn into_unavailable(self) -> Self {
        match self {
            Self::CommandFailed { backend, detail } => Self::Unavailable { backend, detail },
            Self::Io { backend, source } => Self::Unavailable {
                backend,
                detail: source.to_string(),
            },
            other => other,
        }
    }
}

//! Error taxonomy for the bridge.

use camino::Utf8PathBuf;
use sablier_proto::{CompileFailure, SourceSpan};

/// Everything a [`compile`](crate::SassBridge::compile) call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SassBridgeError {
    /// The options carried custom sass functions. Raised synchronously,
    /// before any worker interaction.
    #[error(
        "custom sass functions cannot cross the worker boundary and are not \
         supported; resolve dynamic values before compiling or use importers"
    )]
    UnsupportedFunctions,

    /// The stylesheet is invalid or references an import nothing resolved.
    #[error("{message}")]
    Compile {
        message: String,
        /// Source location, when the engine attributed one.
        span: Option<SassSpan>,
    },

    /// The worker thread could not be spawned or died and could not be
    /// respawned.
    #[error("sass worker unavailable: {0}")]
    Worker(String),

    /// Anything else the worker reported, rethrown verbatim.
    #[error("{0}")]
    Unexpected(String),

    /// A worker payload failed reconstruction on the host side.
    #[error("malformed worker payload: {0}")]
    MalformedPayload(String),
}

/// Source location of a compile error, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SassSpan {
    pub url: Option<Utf8PathBuf>,
    pub line: u32,
    pub column: u32,
}

impl From<SourceSpan> for SassSpan {
    fn from(span: SourceSpan) -> Self {
        Self {
            url: span.url.map(Utf8PathBuf::from),
            line: span.line,
            column: span.column,
        }
    }
}

impl From<CompileFailure> for SassBridgeError {
    fn from(failure: CompileFailure) -> Self {
        match failure {
            CompileFailure::Compile { message, span } => Self::Compile {
                message,
                span: span.map(SassSpan::from),
            },
            CompileFailure::Unexpected { message } => Self::Unexpected(message),
        }
    }
}

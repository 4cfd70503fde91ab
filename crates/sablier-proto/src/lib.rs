//! Wire protocol between the sablier host and its sass worker thread.
//!
//! Every type here crosses the host/worker boundary, so everything is plain
//! data: no paths-as-`PathBuf`, no callbacks, no engine types. Importer and
//! custom-function values never appear on the wire — the host keeps them in
//! its pending-request table and the worker calls back by id.

use serde::{Deserialize, Serialize};

/// A compilation job sent from the host to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Correlation id, unique for the lifetime of the bridge.
    pub id: u64,
    /// The serializable subset of the caller's options.
    pub options: WireOptions,
}

/// Compile options with every non-transferable field stripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOptions {
    /// Logical url of the entry, used for error attribution and as the
    /// `containing_url` of importer callbacks.
    pub url: String,
    /// Inline source text. `None` means the entry is a file the worker
    /// reads from disk at `url`.
    pub source: Option<String>,
    /// Input syntax of the entry.
    pub syntax: Syntax,
    /// Output formatting.
    pub style: OutputStyle,
    /// Directories searched for imports before the importer chain is asked.
    pub load_paths: Vec<String>,
    /// Whether the worker should produce a source map payload.
    pub source_map: bool,
    /// Silence warnings coming from dependencies.
    pub quiet_deps: bool,
}

/// Input syntax of a stylesheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Syntax {
    #[default]
    Scss,
    /// The whitespace-sensitive `.sass` syntax.
    Indented,
    Css,
}

/// Output formatting for compiled css.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStyle {
    #[default]
    Expanded,
    Compressed,
}

/// The worker's answer to one [`CompileRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResponse {
    /// Correlates to [`CompileRequest::id`]. Delivered at most once per id.
    pub id: u64,
    pub outcome: CompileOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileOutcome {
    Success(CompileSuccess),
    Failure(CompileFailure),
}

/// Successful compilation payload.
///
/// Binary payloads stay `Vec<u8>` so they move through the channel by
/// ownership transfer; the host reconstructs them in place instead of
/// copying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileSuccess {
    /// Compiled css, utf-8 bytes.
    pub css: Vec<u8>,
    /// Source map as serialized json, present iff the request asked for one.
    pub source_map: Option<Vec<u8>>,
    /// Every file the compilation read, in load order, deduplicated.
    pub loaded_urls: Vec<String>,
    pub stats: CompileStats,
}

/// Timing information for one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileStats {
    /// Wall time spent inside the worker for this request.
    pub elapsed_ms: u64,
}

/// Why a compilation failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileFailure {
    /// The stylesheet itself is invalid or an import could not be resolved.
    /// This is the only failure the engine attributes to a source location.
    Compile {
        message: String,
        span: Option<SourceSpan>,
    },
    /// Anything else the worker reported. Rethrown verbatim by the host.
    Unexpected { message: String },
}

/// Source location of a compilation failure, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub url: Option<String>,
    pub line: u32,
    pub column: u32,
}

/// Sent by the worker when the engine hits an import no load path satisfies.
///
/// After sending this the worker blocks on its reply channel until the host
/// answers with an [`ImportResponse`] — the host must reply exactly once,
/// on success and failure paths alike, or the worker stays blocked forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Id of the compilation this import belongs to.
    pub request_id: u64,
    /// Logical specifier as written in the stylesheet, e.g. `theme` for
    /// `@use "theme";`.
    pub url: String,
    /// Url of the compilation entry the import was reached from.
    pub containing_url: Option<String>,
}

/// The host's answer to one [`ImportRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    /// Concrete file the specifier resolved to, or `None` when no importer
    /// claimed it.
    pub resolved: Option<String>,
}

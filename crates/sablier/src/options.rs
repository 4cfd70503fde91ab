//! Caller-facing compile options.
//!
//! [`SassOptions`] is the full options bag, including the two fields that can
//! never cross the worker boundary: the importer chain (kept host-side and
//! invoked by id when the worker calls back) and custom functions (rejected
//! up front, see [`crate::SassBridgeError::UnsupportedFunctions`]).

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use sablier_proto::{OutputStyle, Syntax, WireOptions};

/// Entry point of a compilation.
#[derive(Debug, Clone)]
pub enum SassSource {
    /// Source text handed to the worker directly. `url` is the logical name
    /// used for error attribution; no file is read for the entry itself.
    Inline { text: String, url: String },
    /// A stylesheet the worker reads from disk.
    File { path: Utf8PathBuf },
}

/// Options for one [`compile`](crate::SassBridge::compile) call.
///
/// Consuming builder, same shape as `grass::Options`.
#[derive(Debug)]
pub struct SassOptions {
    pub(crate) source: SassSource,
    pub(crate) syntax: Syntax,
    pub(crate) style: OutputStyle,
    pub(crate) load_paths: Vec<Utf8PathBuf>,
    pub(crate) source_map: bool,
    pub(crate) quiet_deps: bool,
    pub(crate) importers: Vec<SassImporter>,
    pub(crate) functions: Vec<CustomFunction>,
}

impl SassOptions {
    /// Compile inline scss text. `url` is the logical name of the entry.
    pub fn scss(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(SassSource::Inline {
            text: text.into(),
            url: url.into(),
        })
    }

    /// Compile a stylesheet from disk. Syntax defaults to scss; switch with
    /// [`syntax`](Self::syntax) for `.sass` or plain css entries.
    pub fn file(path: impl Into<Utf8PathBuf>) -> Self {
        Self::new(SassSource::File { path: path.into() })
    }

    fn new(source: SassSource) -> Self {
        Self {
            source,
            syntax: Syntax::default(),
            style: OutputStyle::default(),
            load_paths: Vec::new(),
            source_map: false,
            quiet_deps: false,
            importers: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn style(mut self, style: OutputStyle) -> Self {
        self.style = style;
        self
    }

    /// Add a directory searched for imports before the importer chain runs.
    pub fn load_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.load_paths.push(path.into());
        self
    }

    pub fn source_map(mut self, enabled: bool) -> Self {
        self.source_map = enabled;
        self
    }

    pub fn quiet_deps(mut self, enabled: bool) -> Self {
        self.quiet_deps = enabled;
        self
    }

    /// Append an importer. Importers run in registration order and the first
    /// one to return a path wins.
    pub fn importer(mut self, importer: SassImporter) -> Self {
        self.importers.push(importer);
        self
    }

    /// Declare a custom compile-time function.
    ///
    /// Unsupported: function values cannot be shipped to the worker thread,
    /// so any compile with a non-empty function list fails fast.
    pub fn function(mut self, function: CustomFunction) -> Self {
        self.functions.push(function);
        self
    }

    /// The serializable half of the options, with importer and function
    /// values stripped.
    pub(crate) fn to_wire(&self) -> WireOptions {
        let (url, source) = match &self.source {
            SassSource::Inline { text, url } => (url.clone(), Some(text.clone())),
            SassSource::File { path } => (path.to_string(), None),
        };
        WireOptions {
            url,
            source,
            syntax: self.syntax,
            style: self.style,
            load_paths: self.load_paths.iter().map(|p| p.to_string()).collect(),
            source_map: self.source_map,
            quiet_deps: self.quiet_deps,
        }
    }
}

/// Context handed to importers alongside the specifier.
#[derive(Debug, Clone)]
pub struct ImportContext {
    /// Url of the compilation entry the import was reached from.
    pub containing_url: Option<String>,
}

type SyncResolver =
    dyn Fn(&str, &ImportContext) -> eyre::Result<Option<Utf8PathBuf>> + Send + Sync;
type AsyncResolver = dyn Fn(String, ImportContext) -> BoxFuture<'static, eyre::Result<Option<Utf8PathBuf>>>
    + Send
    + Sync;

/// A caller-supplied import resolver.
///
/// Resolves a logical specifier (`theme`, `@scope/pkg/mixins`, …) to a
/// concrete file the worker then reads. Returning `Ok(None)` passes the
/// specifier on to the next importer in the chain.
pub struct SassImporter(ImporterKind);

enum ImporterKind {
    Sync(Box<SyncResolver>),
    Async(Box<AsyncResolver>),
}

impl SassImporter {
    /// Importer backed by a synchronous function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &ImportContext) -> eyre::Result<Option<Utf8PathBuf>> + Send + Sync + 'static,
    {
        Self(ImporterKind::Sync(Box::new(f)))
    }

    /// Importer backed by an async function, e.g. one delegating to a
    /// build tool's module resolution.
    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(String, ImportContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<Option<Utf8PathBuf>>> + Send + 'static,
    {
        Self(ImporterKind::Async(Box::new(move |url, cx| {
            Box::pin(f(url, cx))
        })))
    }

    /// Run this importer for one specifier, awaiting either form.
    pub(crate) async fn resolve(
        &self,
        url: &str,
        cx: &ImportContext,
    ) -> eyre::Result<Option<Utf8PathBuf>> {
        match &self.0 {
            ImporterKind::Sync(f) => f(url, cx),
            ImporterKind::Async(f) => f(url.to_owned(), cx.clone()).await,
        }
    }
}

impl fmt::Debug for SassImporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ImporterKind::Sync(_) => f.write_str("SassImporter(sync)"),
            ImporterKind::Async(_) => f.write_str("SassImporter(async)"),
        }
    }
}

/// A named custom sass function.
///
/// Exists so callers porting a full options bag get a descriptive failure
/// instead of silently losing behavior: closures cannot cross the worker
/// boundary, and the engine offers no registration seam for them anyway.
pub struct CustomFunction {
    signature: String,
    #[allow(dead_code)]
    callback: Arc<dyn Fn(&[String]) -> eyre::Result<String> + Send + Sync>,
}

impl CustomFunction {
    pub fn new<F>(signature: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&[String]) -> eyre::Result<String> + Send + Sync + 'static,
    {
        Self {
            signature: signature.into(),
            callback: Arc::new(callback),
        }
    }

    /// The declared signature, e.g. `invert($color)`.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl fmt::Debug for CustomFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFunction")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

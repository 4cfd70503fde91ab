//! The worker thread: owns the sass engine, one compilation at a time.
//!
//! Imports the engine cannot satisfy from disk are bounced back to the host
//! over the event channel, and the worker performs a blocking receive on a
//! dedicated reply channel until the host's importer chain settles. That
//! receive is the single synchronous blocking point in the system; it is safe
//! because the worker has nothing else to do mid-compilation and the host
//! guarantees a reply on every path.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use sablier_proto::{
    CompileFailure, CompileOutcome, CompileRequest, CompileResponse, CompileStats, CompileSuccess,
    ImportRequest, ImportResponse, OutputStyle, SourceSpan, Syntax,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

/// Everything the worker sends to the host, multiplexed on one channel.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Response(CompileResponse),
    Import(ImportRequest),
}

/// Worker thread entry point. Runs until the request channel closes.
pub(crate) fn run(
    requests: Receiver<CompileRequest>,
    events: UnboundedSender<WorkerEvent>,
    replies: Receiver<ImportResponse>,
) {
    debug!("sass worker thread started");
    let replies = Mutex::new(replies);
    while let Ok(request) = requests.recv() {
        trace!(id = request.id, url = %request.options.url, "compiling");
        let started = Instant::now();
        let fs = BridgeFs::new(&request, &events, &replies);
        let outcome = compile_one(&request, &fs, started);
        let response = CompileResponse {
            id: request.id,
            outcome,
        };
        if events.send(WorkerEvent::Response(response)).is_err() {
            // host side is gone, nobody is listening
            break;
        }
    }
    debug!("sass worker thread exiting");
}

fn compile_one(request: &CompileRequest, fs: &BridgeFs<'_>, started: Instant) -> CompileOutcome {
    let opts = &request.options;

    let mut engine = grass::Options::default()
        .fs(fs)
        .style(match opts.style {
            OutputStyle::Expanded => grass::OutputStyle::Expanded,
            OutputStyle::Compressed => grass::OutputStyle::Compressed,
        })
        .input_syntax(match opts.syntax {
            Syntax::Scss => grass::InputSyntax::Scss,
            Syntax::Indented => grass::InputSyntax::Sass,
            Syntax::Css => grass::InputSyntax::Css,
        })
        .quiet(opts.quiet_deps);
    for load_path in &opts.load_paths {
        engine = engine.load_path(load_path);
    }

    let compiled = match &opts.source {
        Some(text) => grass::from_string(text.clone(), &engine),
        None => grass::from_path(&opts.url, &engine),
    };

    match compiled {
        Ok(css) => {
            let loaded_urls = fs.loaded_snapshot();
            let source_map = if opts.source_map {
                synthesize_source_map(&opts.url, &loaded_urls)
            } else {
                None
            };
            CompileOutcome::Success(CompileSuccess {
                css: css.into_bytes(),
                source_map,
                loaded_urls,
                stats: CompileStats {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
            })
        }
        Err(err) => CompileOutcome::Failure(classify(err, &fs.unresolved_snapshot())),
    }
}

/// Split a compilation failure into "the stylesheet is wrong" (with a source
/// location) and everything else (rethrown verbatim by the host).
fn classify(err: Box<grass::Error>, unresolved: &[String]) -> CompileFailure {
    let rendered = err.to_string();
    match err.kind() {
        grass::ErrorKind::ParseError { message, loc, .. } => {
            let message = if unresolved.is_empty() {
                message
            } else {
                format!("{message} (unresolved imports: {})", unresolved.join(", "))
            };
            CompileFailure::Compile {
                message,
                span: Some(SourceSpan {
                    url: Some(loc.file.name().to_string()),
                    // codemap locations are 0-based, sass convention is 1-based
                    line: loc.begin.line as u32 + 1,
                    column: loc.begin.column as u32 + 1,
                }),
            }
        }
        _ => CompileFailure::Unexpected { message: rendered },
    }
}

/// The engine has no source map output; ship an empty v3 map naming the
/// sources so downstream tooling that expects the payload shape keeps
/// working.
fn synthesize_source_map(entry_url: &str, loaded_urls: &[String]) -> Option<Vec<u8>> {
    let mut sources: Vec<&str> = vec![entry_url];
    sources.extend(loaded_urls.iter().map(String::as_str));
    let map = serde_json::json!({
        "version": 3,
        "file": entry_url,
        "sources": sources,
        "names": [],
        "mappings": "",
    });
    serde_json::to_vec(&map).ok()
}

/// Filesystem seam handed to the engine.
///
/// Local paths are answered from disk and recorded as loaded urls. A path no
/// load path satisfies is mapped back to the logical specifier it was derived
/// from and sent to the host's importer chain, one blocking round-trip per
/// specifier per compilation (cached).
#[derive(Debug)]
struct BridgeFs<'a> {
    request_id: u64,
    containing_url: String,
    load_paths: Vec<PathBuf>,
    events: &'a UnboundedSender<WorkerEvent>,
    replies: &'a Mutex<Receiver<ImportResponse>>,
    loaded: Mutex<Vec<String>>,
    resolutions: Mutex<HashMap<String, Option<PathBuf>>>,
    unresolved: Mutex<Vec<String>>,
}

impl<'a> BridgeFs<'a> {
    fn new(
        request: &CompileRequest,
        events: &'a UnboundedSender<WorkerEvent>,
        replies: &'a Mutex<Receiver<ImportResponse>>,
    ) -> Self {
        Self {
            request_id: request.id,
            containing_url: request.options.url.clone(),
            load_paths: request.options.load_paths.iter().map(PathBuf::from).collect(),
            events,
            replies,
            loaded: Mutex::new(Vec::new()),
            resolutions: Mutex::new(HashMap::new()),
            unresolved: Mutex::new(Vec::new()),
        }
    }

    fn record_loaded(&self, path: &Path) {
        if let Ok(mut loaded) = self.loaded.lock() {
            let url = path.display().to_string();
            if !loaded.contains(&url) {
                loaded.push(url);
            }
        }
    }

    fn loaded_snapshot(&self) -> Vec<String> {
        self.loaded.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn unresolved_snapshot(&self) -> Vec<String> {
        self.unresolved.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Ask the host's importer chain about a candidate path the local
    /// filesystem could not satisfy. A resolution only claims candidates
    /// whose extension agrees with the resolved file; the engine infers the
    /// imported file's syntax from the candidate it committed to.
    fn resolve_remote(&self, candidate: &Path) -> Option<PathBuf> {
        let url = logical_url(candidate, &self.load_paths)?;
        let resolved = self.resolve_logical(&url)?;
        extension_agrees(candidate, &resolved).then_some(resolved)
    }

    fn resolve_logical(&self, url: &str) -> Option<PathBuf> {
        if let Ok(resolutions) = self.resolutions.lock() {
            if let Some(hit) = resolutions.get(url) {
                return hit.clone();
            }
        }
        let resolved = self.round_trip(url);
        if resolved.is_none() {
            if let Ok(mut unresolved) = self.unresolved.lock() {
                if !unresolved.iter().any(|u| u == url) {
                    unresolved.push(url.to_owned());
                }
            }
        }
        if let Ok(mut resolutions) = self.resolutions.lock() {
            resolutions.insert(url.to_owned(), resolved.clone());
        }
        resolved
    }

    fn round_trip(&self, url: &str) -> Option<PathBuf> {
        trace!(id = self.request_id, url, "delegating import to host");
        let request = ImportRequest {
            request_id: self.request_id,
            url: url.to_owned(),
            containing_url: Some(self.containing_url.clone()),
        };
        // if the host is already gone, don't block on a reply that will
        // never come
        self.events.send(WorkerEvent::Import(request)).ok()?;
        // blocks until the host's importer chain settles; the host replies
        // exactly once per request, on success and failure paths alike
        let reply = self.replies.lock().ok()?.recv().ok()?;
        reply.resolved.map(PathBuf::from)
    }
}

impl grass::Fs for BridgeFs<'_> {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        if path.is_file() {
            return true;
        }
        self.resolve_remote(path).is_some()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        if path.is_file() {
            let bytes = fs_err::read(path)?;
            self.record_loaded(path);
            return Ok(bytes);
        }
        match self.resolve_remote(path) {
            Some(resolved) => {
                let bytes = fs_err::read(&resolved)?;
                self.record_loaded(&resolved);
                Ok(bytes)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unresolved sass import: {}", path.display()),
            )),
        }
    }
}

/// A claimed candidate must point at a file whose syntax the engine will
/// infer correctly from the candidate's extension. Extensionless candidates
/// carry no syntax claim and always agree.
fn extension_agrees(candidate: &Path, resolved: &Path) -> bool {
    match candidate.extension() {
        None => true,
        Some(ext) => resolved.extension() == Some(ext),
    }
}

/// Map an engine candidate path back to the specifier it was derived from.
///
/// The engine probes `theme` as `<load path>/theme.scss`,
/// `<load path>/_theme.scss`, `<load path>/theme/index.scss` and so on;
/// importers want to see `theme` again. Strips the matching load-path
/// prefix, the partial underscore, sass extensions, and an `index` leaf.
/// The `name.import.*` variants the engine probes for `@import`-only
/// overload files are skipped outright; importers only ever see specifiers
/// as written in the stylesheet.
fn logical_url(candidate: &Path, load_paths: &[PathBuf]) -> Option<String> {
    let trimmed = load_paths
        .iter()
        .find_map(|load_path| candidate.strip_prefix(load_path).ok())
        .unwrap_or(candidate);

    let file_name = trimmed.file_name()?.to_str()?;
    let stem = file_name.strip_prefix('_').unwrap_or(file_name);
    let stem = stem
        .strip_suffix(".scss")
        .or_else(|| stem.strip_suffix(".sass"))
        .or_else(|| stem.strip_suffix(".css"))
        .unwrap_or(stem);
    if stem.is_empty() || stem.ends_with(".import") {
        return None;
    }

    let mut parts: Vec<String> = trimmed
        .parent()
        .into_iter()
        .flat_map(|parent| parent.components())
        .filter_map(|component| match component {
            Component::Normal(segment) => segment.to_str().map(str::to_owned),
            _ => None,
        })
        .collect();
    if stem != "index" {
        parts.push(stem.to_owned());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(load_paths: &[&str]) -> Vec<PathBuf> {
        load_paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn logical_url_strips_sass_decorations() {
        let lp = paths(&["styles"]);
        for candidate in [
            "styles/theme.scss",
            "styles/_theme.scss",
            "styles/theme.sass",
            "styles/theme/index.scss",
            "styles/theme/_index.scss",
        ] {
            assert_eq!(
                logical_url(Path::new(candidate), &lp).as_deref(),
                Some("theme"),
                "candidate {candidate}"
            );
        }
    }

    #[test]
    fn logical_url_keeps_nested_specifiers() {
        let lp = paths(&["/srv/site/styles"]);
        assert_eq!(
            logical_url(Path::new("/srv/site/styles/vendor/_grid.scss"), &lp).as_deref(),
            Some("vendor/grid")
        );
        // not under any load path: root is dropped, segments survive
        assert_eq!(
            logical_url(Path::new("./theme.scss"), &[]).as_deref(),
            Some("theme")
        );
    }

    #[test]
    fn logical_url_rejects_empty_specifiers() {
        assert_eq!(logical_url(Path::new("styles/_.scss"), &[]), None);
    }

    #[test]
    fn logical_url_skips_import_overload_probes() {
        let lp = paths(&["styles"]);
        for candidate in [
            "styles/theme.import.scss",
            "styles/_theme.import.scss",
            "styles/theme.import.sass",
        ] {
            assert_eq!(
                logical_url(Path::new(candidate), &lp),
                None,
                "candidate {candidate}"
            );
        }
        // a specifier literally named `import` still resolves
        assert_eq!(
            logical_url(Path::new("styles/import.scss"), &lp).as_deref(),
            Some("import")
        );
    }

    #[test]
    fn resolutions_only_claim_agreeing_extensions() {
        let resolved = Path::new("/resolved/theme-on-disk.scss");
        assert!(extension_agrees(Path::new("styles/theme.scss"), resolved));
        assert!(extension_agrees(Path::new("styles/theme"), resolved));
        // claiming a .sass candidate would make the engine parse scss
        // content as indented syntax
        assert!(!extension_agrees(Path::new("styles/theme.sass"), resolved));
        assert!(!extension_agrees(Path::new("styles/theme.css"), resolved));
    }

    #[test]
    fn classify_extracts_parse_spans() {
        let err = grass::from_string(".a {".to_string(), &grass::Options::default())
            .expect_err("unterminated block must not compile");
        match classify(err, &[]) {
            CompileFailure::Compile { message, span } => {
                assert!(!message.is_empty());
                let span = span.expect("parse errors carry a span");
                assert_eq!(span.line, 1);
            }
            other => panic!("expected a compile failure, got {other:?}"),
        }
    }

    #[test]
    fn classify_appends_unresolved_imports() {
        let err = grass::from_string(
            "@import \"missing-module\";".to_string(),
            &grass::Options::default(),
        )
        .expect_err("unresolvable import must not compile");
        match classify(err, &["missing-module".to_string()]) {
            CompileFailure::Compile { message, .. } => {
                assert!(message.contains("missing-module"), "message: {message}");
            }
            other => panic!("expected a compile failure, got {other:?}"),
        }
    }

    #[test]
    fn source_map_names_entry_and_sources() {
        let bytes =
            synthesize_source_map("main.scss", &["styles/_theme.scss".to_string()]).unwrap();
        let map: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["sources"][0], "main.scss");
        assert_eq!(map["sources"][1], "styles/_theme.scss");
    }
}

//! The host side of the bridge: request/response correlation, worker
//! lifecycle, importer dispatch.
//!
//! One [`SassBridge`] owns one worker thread, spawned lazily on the first
//! compile and reused until [`close`](SassBridge::close). Responses are
//! correlated by id, never by order — concurrent compiles may settle out of
//! submission order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use camino::Utf8PathBuf;
use sablier_proto::{
    CompileOutcome, CompileRequest, CompileStats, CompileSuccess, ImportRequest, ImportResponse,
    WireOptions,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::SassBridgeError;
use crate::options::{ImportContext, SassImporter, SassOptions};
use crate::worker::{self, WorkerEvent};

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub css: String,
    /// Source map object, present iff the options asked for one.
    pub source_map: Option<serde_json::Value>,
    /// Every file the compilation read, in load order.
    pub loaded_urls: Vec<Utf8PathBuf>,
    pub stats: CompileStats,
}

/// A registered compile call: where its outcome goes, and the importer
/// chain the worker may call back into. Importer values live only here —
/// they never cross the thread boundary.
struct PendingCompile {
    reply: oneshot::Sender<CompileOutcome>,
    importers: Arc<[SassImporter]>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingCompile>>>;

/// Channels and tasks tied to one live worker thread.
struct WorkerLink {
    req_tx: mpsc::Sender<CompileRequest>,
    pending: PendingMap,
    pump: tokio::task::JoinHandle<()>,
}

/// Offloads sass compilation to a dedicated worker thread while running
/// import resolution on the caller's side.
///
/// Explicit lifecycle: construct, `compile` any number of times (including
/// concurrently), `close`. Dropping the bridge closes it. Must be used from
/// within a tokio runtime.
pub struct SassBridge {
    link: Mutex<Option<WorkerLink>>,
    next_id: AtomicU64,
}

impl SassBridge {
    /// A bridge with no worker yet; the thread spawns on first compile.
    pub fn new() -> Self {
        Self {
            link: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Compile one stylesheet.
    ///
    /// Options carrying custom functions are rejected before any worker
    /// interaction. Calls that are in flight when [`close`](Self::close)
    /// runs are abandoned: their futures never settle.
    pub async fn compile(&self, options: SassOptions) -> Result<CompileOutput, SassBridgeError> {
        if !options.functions.is_empty() {
            return Err(SassBridgeError::UnsupportedFunctions);
        }

        let wire = options.to_wire();
        let importers: Arc<[SassImporter]> = options.importers.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, url = %wire.url, "dispatching sass compilation");

        let rx = self.submit(id, &wire, importers)?;
        let Ok(outcome) = rx.await else {
            // close() cleared the pending map under us: the request was
            // abandoned, not failed. The caller stopped caring the moment
            // the surrounding teardown invoked close(), so park instead of
            // surfacing a teardown race as a compile error.
            return std::future::pending().await;
        };
        match outcome {
            CompileOutcome::Success(success) => reconstruct(success),
            CompileOutcome::Failure(failure) => Err(failure.into()),
        }
    }

    /// Tear down the worker. Idempotent; a bridge without a worker is a
    /// no-op. Already-settled compiles are unaffected; in-flight ones are
    /// silently abandoned.
    pub fn close(&self) {
        let link = match self.link.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(link) = link else { return };
        // dropping req_tx ends the worker loop once its current job (if
        // any) finishes; clearing pending drops the reply senders
        if let Ok(mut pending) = link.pending.lock() {
            pending.clear();
        }
        link.pump.abort();
        debug!("sass bridge closed");
    }

    /// Register the request and hand it to the worker, respawning once if
    /// the worker thread turns out to be dead.
    fn submit(
        &self,
        id: u64,
        wire: &WireOptions,
        importers: Arc<[SassImporter]>,
    ) -> Result<oneshot::Receiver<CompileOutcome>, SassBridgeError> {
        let mut guard = self
            .link
            .lock()
            .map_err(|_| SassBridgeError::Worker("bridge state poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(spawn_worker()?);
        }

        let (tx, rx) = oneshot::channel();
        if let Some(link) = guard.as_ref() {
            // registered before the send so the response cannot race the
            // registration
            register(&link.pending, id, tx, importers);
            let request = CompileRequest {
                id,
                options: wire.clone(),
            };
            if link.req_tx.send(request).is_ok() {
                return Ok(rx);
            }
        }

        warn!("sass worker is gone; respawning");
        let recovered = match guard.take() {
            Some(dead) => {
                dead.pump.abort();
                take_entry(&dead.pending, id)
            }
            None => None,
        };
        let Some(entry) = recovered else {
            return Err(SassBridgeError::Worker(
                "request lost while replacing a dead worker".to_string(),
            ));
        };

        let fresh = spawn_worker()?;
        if let Ok(mut pending) = fresh.pending.lock() {
            pending.insert(id, entry);
        }
        let request = CompileRequest {
            id,
            options: wire.clone(),
        };
        let sent = fresh.req_tx.send(request).is_ok();
        let link = guard.insert(fresh);
        if !sent {
            take_entry(&link.pending, id);
            return Err(SassBridgeError::Worker(
                "sass worker exited immediately after respawn".to_string(),
            ));
        }
        Ok(rx)
    }
}

impl Default for SassBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SassBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn register(
    pending: &PendingMap,
    id: u64,
    reply: oneshot::Sender<CompileOutcome>,
    importers: Arc<[SassImporter]>,
) {
    if let Ok(mut map) = pending.lock() {
        map.insert(id, PendingCompile { reply, importers });
    }
}

fn take_entry(pending: &PendingMap, id: u64) -> Option<PendingCompile> {
    pending.lock().ok()?.remove(&id)
}

/// Spawn the worker thread plus the host-side event pump.
///
/// The thread handle is dropped deliberately: the worker must not keep the
/// host process alive, and it exits on its own once the request channel
/// closes.
fn spawn_worker() -> Result<WorkerLink, SassBridgeError> {
    let (req_tx, req_rx) = mpsc::channel();
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("sablier-sass".to_string())
        .spawn(move || worker::run(req_rx, event_tx, reply_rx))
        .map_err(|e| SassBridgeError::Worker(format!("failed to spawn worker thread: {e}")))?;
    debug!("sass worker spawned");

    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let pump = tokio::spawn(pump_events(event_rx, pending.clone(), reply_tx));
    Ok(WorkerLink {
        req_tx,
        pending,
        pump,
    })
}

/// Dispatch worker events: responses complete their pending entry exactly
/// once; import requests run the registered importer chain and always send
/// a reply, because the worker is parked on it.
async fn pump_events(
    mut events: UnboundedReceiver<WorkerEvent>,
    pending: PendingMap,
    reply_tx: mpsc::Sender<ImportResponse>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Response(response) => match take_entry(&pending, response.id) {
                Some(entry) => {
                    // the caller may have dropped its future; that's fine
                    let _ = entry.reply.send(response.outcome);
                }
                None => debug!(id = response.id, "dropping response for unknown request"),
            },
            WorkerEvent::Import(request) => {
                let importers = pending
                    .lock()
                    .ok()
                    .and_then(|map| map.get(&request.request_id).map(|e| e.importers.clone()));
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let resolved = match importers {
                        Some(importers) => run_importer_chain(&importers, &request).await,
                        // no registration for this id: reply immediately so
                        // the worker is never left blocked
                        None => None,
                    };
                    let _ = reply_tx.send(ImportResponse { resolved });
                });
            }
        }
    }
}

/// First importer to return a path wins; `Ok(None)` falls through to the
/// next one. A failing importer resolves the specifier to nothing — the
/// engine then reports it as an unresolvable import.
async fn run_importer_chain(importers: &[SassImporter], request: &ImportRequest) -> Option<String> {
    let cx = ImportContext {
        containing_url: request.containing_url.clone(),
    };
    for importer in importers {
        match importer.resolve(&request.url, &cx).await {
            Ok(Some(path)) => {
                debug!(url = %request.url, path = %path, "importer resolved");
                return Some(path.into_string());
            }
            Ok(None) => {}
            Err(error) => {
                warn!(url = %request.url, %error, "sass importer failed");
                return None;
            }
        }
    }
    None
}

/// Rebuild caller-facing values over the byte payloads the worker handed
/// off. Both reconstructions reuse the transferred buffers; nothing is
/// copied.
fn reconstruct(success: CompileSuccess) -> Result<CompileOutput, SassBridgeError> {
    let css = String::from_utf8(success.css)
        .map_err(|e| SassBridgeError::MalformedPayload(format!("css is not utf-8: {e}")))?;
    let source_map = success
        .source_map
        .map(|bytes| {
            serde_json::from_slice(&bytes)
                .map_err(|e| SassBridgeError::MalformedPayload(format!("source map is not json: {e}")))
        })
        .transpose()?;
    Ok(CompileOutput {
        css,
        source_map,
        loaded_urls: success
            .loaded_urls
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect(),
        stats: success.stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import_request(url: &str) -> ImportRequest {
        ImportRequest {
            request_id: 1,
            url: url.to_string(),
            containing_url: Some("entry.scss".to_string()),
        }
    }

    #[tokio::test]
    async fn chain_takes_first_non_null_result() {
        let importers = [
            SassImporter::from_fn(|_, _| Ok(None)),
            SassImporter::from_fn(|url, _| {
                Ok(Some(Utf8PathBuf::from(format!("/resolved/{url}.scss"))))
            }),
            SassImporter::from_fn(|_, _| {
                panic!("third importer must not be consulted");
            }),
        ];
        let resolved = run_importer_chain(&importers, &import_request("theme")).await;
        assert_eq!(resolved.as_deref(), Some("/resolved/theme.scss"));
    }

    #[tokio::test]
    async fn chain_maps_importer_errors_to_unresolved() {
        let importers = [
            SassImporter::from_fn(|_, _| eyre::bail!("resolver backend offline")),
            SassImporter::from_fn(|_, _| {
                panic!("chain must stop at the failing importer");
            }),
        ];
        let resolved = run_importer_chain(&importers, &import_request("theme")).await;
        assert_eq!(resolved, None);
    }

    #[test]
    fn reconstruction_is_layout_independent() {
        let map_bytes =
            serde_json::to_vec(&serde_json::json!({ "version": 3, "mappings": "" })).unwrap();
        let success = CompileSuccess {
            css: b".a {\n  color: red;\n}\n".to_vec(),
            source_map: Some(map_bytes.clone()),
            loaded_urls: vec![],
            stats: CompileStats { elapsed_ms: 1 },
        };

        let output = reconstruct(success).unwrap();
        // a plain copied-buffer parse must agree with the moved-buffer parse
        let copied: serde_json::Value =
            serde_json::from_str(&String::from_utf8(map_bytes).unwrap()).unwrap();
        assert_eq!(output.source_map.unwrap(), copied);
        assert!(output.css.contains("color: red"));
    }

    #[tokio::test]
    async fn submit_recovers_pending_entries_across_a_respawn() {
        let bridge = SassBridge::new();

        // plant a link whose worker is already gone: the request receiver
        // is dropped, so the first send fails and submit must respawn
        {
            let (req_tx, _) = mpsc::channel();
            let (_event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
            let (reply_tx, _reply_rx) = mpsc::channel();
            let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
            let pump = tokio::spawn(pump_events(event_rx, pending.clone(), reply_tx));
            *bridge.link.lock().unwrap() = Some(WorkerLink {
                req_tx,
                pending,
                pump,
            });
        }

        let out = bridge
            .compile(SassOptions::scss(".revived { color: red; }", "revived.scss"))
            .await
            .expect("the request must survive the worker replacement");
        assert!(out.css.contains(".revived"), "css: {}", out.css);
    }

    #[test]
    fn bad_utf8_css_is_a_malformed_payload() {
        let success = CompileSuccess {
            css: vec![0xff, 0xfe],
            source_map: None,
            loaded_urls: vec![],
            stats: CompileStats { elapsed_ms: 0 },
        };
        assert!(matches!(
            reconstruct(success),
            Err(SassBridgeError::MalformedPayload(_))
        ));
    }
}

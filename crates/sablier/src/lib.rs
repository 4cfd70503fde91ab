//! Worker-thread bridge for sass compilation.
//!
//! The sass engine wants synchronous import resolution, but the import logic
//! a build tool supplies is frequently async (module resolution, dev-server
//! plugins). [`SassBridge`] squares that: compilation runs on a dedicated
//! worker thread, and when the engine hits an import nothing on disk
//! satisfies, the worker posts the specifier back to the host and blocks on
//! a reply channel while the host runs the caller's importer chain — sync or
//! async — to completion. The host replies on every path, so the worker
//! never stays blocked.
//!
//! ```no_run
//! # async fn demo() -> Result<(), sablier::SassBridgeError> {
//! use sablier::{SassBridge, SassOptions};
//!
//! let bridge = SassBridge::new();
//! let out = bridge
//!     .compile(SassOptions::scss(".a { color: red; }", "inline.scss"))
//!     .await?;
//! assert!(out.css.contains("color: red"));
//! bridge.close();
//! # Ok(())
//! # }
//! ```

mod bridge;
mod error;
mod options;
mod worker;

pub use bridge::{CompileOutput, SassBridge};
pub use error::{SassBridgeError, SassSpan};
pub use options::{CustomFunction, ImportContext, SassImporter, SassOptions, SassSource};
pub use sablier_proto::{CompileStats, OutputStyle, Syntax};

// Library root
// -----------
// This crate exposes the job client for the audio service as a library;
// the binary (`main.rs`) puts a terminal front end on top of it.
//
// Module responsibilities:
// - `api`: HTTP calls to the service (info, submit, progress, download,
//   cancel), implementing the `backend::Backend` seam.
// - `backend`: the trait the job client drives, plus its stream and
//   download types.
// - `flow`: the job lifecycle (submit, follow progress, fetch results,
//   cancel, reset) for one convert or separate flow.
// - `sse`: decoding of the `text/event-stream` progress channel.
// - `blob`: in-process storage for downloaded results.
// - `picker`: turning browsed, typed or dropped paths into a file to upload.
// - `model`: flow kinds, stems, capabilities and progress events.
// - `config`, `error`: settings file and the library error type.
// - `ui`: interactive menu and one-shot runs for the terminal.
pub mod api;
pub mod backend;
pub mod blob;
pub mod config;
pub mod error;
pub mod flow;
pub mod model;
pub mod picker;
pub mod sse;
pub mod ui;

pub use api::ApiClient;
pub use backend::{Backend, Download, ProgressStream};
pub use blob::{BlobHandle, BlobStore};
pub use config::Settings;
pub use error::ClientError;
pub use flow::{Flow, FlowObserver, Phase, ResultArtifact, Status};
pub use model::{Capabilities, FlowKind, JobId, ProgressEvent, Stem};
pub use picker::SelectedFile;

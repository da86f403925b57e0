//! Pipeline orchestration on top of `rpmrepo-core`.
//!
//! Every entry point takes a [`RepoContext`] and reports progress through
//! its event sink.

mod context;
mod held;
pub mod gc;
pub mod process;
pub mod reconcile;
pub mod status;
pub mod trigger;
mod types;

pub use context::RepoContext;
pub use gc::collect_garbage;
pub use process::{process_upload, process_uploads};
pub use reconcile::{rebuild_index, reconcile};
pub use status::repository_status;
pub use trigger::{decode_triggers, Trigger, TriggerError, TriggerEvent};
pub use types::*;

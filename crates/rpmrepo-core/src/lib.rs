//! The indexing pipeline stages: classify uploads, generate per-package
//! metadata artifacts and merge them into repository indexes.
//!
//! Every stage coordinates only through the object store's conditional
//! primitives and can be re-run at any point.

pub mod artifact;
pub mod classify;
pub mod error;
pub mod generate;
pub mod layout;
pub mod merge;
pub mod tools;

pub use classify::{Classification, Classifier};
pub use error::{ErrorKind, RepoError, Result};
pub use generate::{MetadataGenerator, MetadataOutcome};
pub use layout::RepoLayout;
pub use merge::{list_repositories, needs_merge, MergeOutcome, MergeProgress, MetadataMerger};
pub use tools::{Createrepo, IndexTool, MergeTool, ToolError};

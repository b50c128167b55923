//! Prow external plugin that carries postsubmit automation over a default
//! branch rename.
//!
//! When GitHub reports that a repository's default branch was renamed, every
//! postsubmit job labelled `propagate-on-rename: "true"` is triggered again
//! against the new branch. The job's base ref is `<old>:<new>`, so the job can
//! re-apply the patch set that was carried on the old branch.
//!
//! This crate provides:
//! - GitHub webhook validation and `repository` event decoding
//! - Job selection and `Refs` derivation
//! - `ProwJob` construction and idempotent, retried creation
//! - The HTTP server hosting the plugin
//! - A reloadable view of the Prow job configuration

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod jobs;
pub mod prowjob;
pub mod refs;
pub mod retry;
pub mod selector;
pub mod server;
pub mod version;
pub mod webhooks;

pub use catalog::{ConfigAgent, JobCatalog, Postsubmit, ProwConfig};
pub use config::ServeArgs;
pub use dispatcher::Dispatcher;
pub use error::{ApiError, DecodeError, FormatError};
pub use event::RepositoryChangeEvent;
pub use jobs::{DryRunJobClient, JobClient, KubeJobClient};
pub use prowjob::{ProwJob, ProwJobSpec, Refs};
pub use retry::{create_with_retry, Backoff, Creation, RetryError};

/// Name the plugin registers under in Prow's plugin configuration.
pub const PLUGIN_NAME: &str = "patch-propagator";

//! Routes validated webhook events to job propagation.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::catalog::{JobCatalog, Postsubmit};
use crate::error::{ApiError, DecodeError, FormatError};
use crate::event::{RepositoryChangeEvent, REPOSITORY_EVENT};
use crate::jobs::{create_job_with_retry, prowjob_name, JobClient};
use crate::prowjob::{new_prow_job, postsubmit_spec};
use crate::refs::build_refs;
use crate::retry::{Backoff, Creation, RetryError};
use crate::selector::{select_labelled, PROPAGATE_ON_RENAME_LABEL};

/// Why a single job could not be propagated.
#[derive(Debug, Error)]
enum JobError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Create(#[from] RetryError<ApiError>),
}

/// Handles webhook events for the plugin.
///
/// The catalog and job client are injected so that the dispatcher holds no
/// mutable state of its own; concurrent events share only these read paths.
pub struct Dispatcher {
    catalog: Arc<dyn JobCatalog>,
    jobs: Arc<dyn JobClient>,
    backoff: Backoff,
    selection_label: String,
}

impl Dispatcher {
    #[must_use]
    pub fn new(catalog: Arc<dyn JobCatalog>, jobs: Arc<dyn JobClient>) -> Self {
        Self {
            catalog,
            jobs,
            backoff: Backoff::default(),
            selection_label: PROPAGATE_ON_RENAME_LABEL.to_string(),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_selection_label(mut self, label: impl Into<String>) -> Self {
        self.selection_label = label.into();
        self
    }

    /// Handle one event.
    ///
    /// Only a malformed `repository` payload is an error. Unknown event kinds,
    /// inert repository events and per-job failures are logged and swallowed.
    #[instrument(skip_all, fields(event_type = %event_kind, event_guid = %event_guid))]
    pub async fn handle(
        &self,
        event_kind: &str,
        event_guid: &str,
        payload: &[u8],
    ) -> Result<(), DecodeError> {
        match event_kind {
            REPOSITORY_EVENT => {
                let event = RepositoryChangeEvent::from_slice(payload)?;
                self.handle_repository_event(event_guid, &event).await;
            }
            _ => {
                debug!("skipping unhandled event of type {event_kind:?}");
            }
        }
        Ok(())
    }

    async fn handle_repository_event(&self, event_guid: &str, event: &RepositoryChangeEvent) {
        if !event.is_default_branch_rename() {
            info!(
                repo = %event.repository_full_name,
                action = event.action.as_deref().unwrap_or_default(),
                "unhandled repo event"
            );
            return;
        }

        let postsubmits = self.catalog.postsubmits(&event.repository_full_name).await;
        let selected = select_labelled(&postsubmits, &self.selection_label);
        info!(
            repo = %event.repository_full_name,
            configured = postsubmits.len(),
            selected = selected.len(),
            "Propagating postsubmits after default branch rename"
        );

        join_all(
            selected
                .into_iter()
                .map(|job| self.propagate(event_guid, event, job)),
        )
        .await;
    }

    async fn propagate(&self, event_guid: &str, event: &RepositoryChangeEvent, job: &Postsubmit) {
        info!(job = %job.name, "Starting {} build.", job.name);

        match self.submit(event_guid, event, job).await {
            Ok((name, Creation::Created)) => {
                info!(job = %job.name, prowjob = %name, "Created ProwJob");
            }
            Ok((name, Creation::AlreadyExisted)) => {
                info!(job = %job.name, prowjob = %name, "ProwJob already exists");
            }
            Err(e) => {
                error!(job = %job.name, error = %e, "Failed to create prowjob.");
            }
        }
    }

    async fn submit(
        &self,
        event_guid: &str,
        event: &RepositoryChangeEvent,
        job: &Postsubmit,
    ) -> Result<(String, Creation), JobError> {
        let refs = build_refs(event)?;
        let name = prowjob_name(event_guid, &event.repository_full_name, &job.name);
        let prow_job = new_prow_job(
            &name,
            postsubmit_spec(job, refs),
            &BTreeMap::new(),
            &job.annotations,
        );
        let creation = create_job_with_retry(self.jobs.as_ref(), &prow_job, &self.backoff).await?;
        Ok((name, creation))
    }
}

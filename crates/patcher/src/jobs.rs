//! Submitting `ProwJob` resources.

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use tracing::info;

use crate::error::ApiError;
use crate::prowjob::ProwJob;
use crate::retry::{create_with_retry, Backoff, Creation, RetryError};

/// Hex characters of the digest kept in a job name.
const NAME_DIGEST_LEN: usize = 32;

/// Creates `ProwJob` resources.
///
/// Implementations must report a name collision as [`ApiError::AlreadyExists`];
/// retry safety depends on it.
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn create(&self, job: &ProwJob) -> Result<(), ApiError>;
}

/// Creates jobs through the Kubernetes API.
#[derive(Clone)]
pub struct KubeJobClient {
    api: Api<ProwJob>,
}

impl KubeJobClient {
    #[must_use]
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl JobClient for KubeJobClient {
    async fn create(&self, job: &ProwJob) -> Result<(), ApiError> {
        self.api.create(&PostParams::default(), job).await?;
        Ok(())
    }
}

/// Logs jobs instead of creating them.
#[derive(Default)]
pub struct DryRunJobClient {
    created: Mutex<Vec<String>>,
}

impl DryRunJobClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the jobs that would have been created, in order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.created
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobClient for DryRunJobClient {
    async fn create(&self, job: &ProwJob) -> Result<(), ApiError> {
        let name = job.name_any();
        info!(
            prowjob = %name,
            job = %job.spec.job,
            base_ref = job.spec.refs.as_ref().map_or("", |r| r.base_ref.as_str()),
            "Dry run: not creating ProwJob"
        );
        if let Ok(mut created) = self.created.lock() {
            created.push(name);
        }
        Ok(())
    }
}

/// Stable name for the run of `job_name` triggered by one webhook delivery.
///
/// The same delivery always maps to the same name. A retried create, or a
/// redelivered webhook, therefore collides instead of duplicating the run.
#[must_use]
pub fn prowjob_name(event_guid: &str, repository_full_name: &str, job_name: &str) -> String {
    let digest = Sha256::digest(format!("{event_guid}/{repository_full_name}/{job_name}"));
    let mut name = hex::encode(digest);
    name.truncate(NAME_DIGEST_LEN);
    name
}

/// Create `job`, retrying transient failures.
///
/// A job without a name is rejected before any call: without a caller-chosen
/// name, retries could create duplicates.
pub async fn create_job_with_retry(
    client: &dyn JobClient,
    job: &ProwJob,
    backoff: &Backoff,
) -> Result<Creation, RetryError<ApiError>> {
    if job.metadata.name.as_deref().map_or(true, str::is_empty) {
        return Err(RetryError::Fatal(
            "prow job must have a name to be created safely".to_string(),
        ));
    }
    create_with_retry(backoff, || client.create(job)).await
}

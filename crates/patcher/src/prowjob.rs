//! `ProwJob` Custom Resource Definition and construction helpers
//!
//! Only the subset of the upstream `prow.k8s.io/v1` schema this plugin writes
//! is modelled. Field names follow the upstream JSON layout (snake case in
//! `spec`, camel case in `status`).

use chrono::{DateTime, Utc};
use kube::api::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::Postsubmit;

pub const CREATED_BY_PROW_LABEL: &str = "created-by-prow";
pub const PROW_JOB_TYPE_LABEL: &str = "prow.k8s.io/type";
pub const PROW_JOB_ANNOTATION: &str = "prow.k8s.io/job";
pub const ORG_LABEL: &str = "prow.k8s.io/refs.org";
pub const REPO_LABEL: &str = "prow.k8s.io/refs.repo";
pub const BASE_REF_LABEL: &str = "prow.k8s.io/refs.base_ref";

const LABEL_VALUE_MAX_LENGTH: usize = 63;

/// Kind of job Prow runs
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProwJobType {
    Presubmit,
    #[default]
    Postsubmit,
    Periodic,
    Batch,
}

impl std::fmt::Display for ProwJobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProwJobType::Presubmit => write!(f, "presubmit"),
            ProwJobType::Postsubmit => write!(f, "postsubmit"),
            ProwJobType::Periodic => write!(f, "periodic"),
            ProwJobType::Batch => write!(f, "batch"),
        }
    }
}

/// Lifecycle state of a job run
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProwJobState {
    /// Created, not yet picked up by an agent
    #[default]
    Triggered,
    Pending,
    Success,
    Failure,
    Aborted,
    Error,
}

/// Source-control reference the job checks out
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
pub struct Refs {
    /// Organization (GitHub owner)
    pub org: String,

    /// Repository name
    pub repo: String,

    /// Web link to the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_link: Option<String>,

    /// Base ref. For propagated jobs this is `<old branch>:<new branch>`.
    pub base_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,

    /// Alternative GOPATH-style checkout location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_alias: Option<String>,

    /// Clone URI overriding the default GitHub one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_uri: Option<String>,
}

/// `ProwJob` CRD spec
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(group = "prow.k8s.io", version = "v1", kind = "ProwJob")]
#[kube(namespaced)]
#[kube(status = "ProwJobStatus")]
#[kube(printcolumn = r#"{"name":"Job","type":"string","jsonPath":".spec.job"}"#)]
#[kube(printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#)]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
pub struct ProwJobSpec {
    #[serde(rename = "type")]
    pub job_type: ProwJobType,

    /// Controller that runs the job (e.g. "kubernetes")
    pub agent: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    /// Namespace the test pod runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the configured job
    pub job: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Refs>,

    /// Whether results are reported back to GitHub
    #[serde(default)]
    pub report: bool,

    /// Status context name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_concurrency: u32,

    /// Pod template, passed through untouched from the job config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<serde_json::Value>,
}

/// `ProwJob` CRD status
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProwJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub state: ProwJobState,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Build the spec of a postsubmit run of `job` against `refs`.
#[must_use]
pub fn postsubmit_spec(job: &Postsubmit, refs: Refs) -> ProwJobSpec {
    let mut refs = refs;
    if refs.path_alias.is_none() {
        refs.path_alias.clone_from(&job.path_alias);
    }
    if refs.clone_uri.is_none() {
        refs.clone_uri.clone_from(&job.clone_uri);
    }

    ProwJobSpec {
        job_type: ProwJobType::Postsubmit,
        agent: job.agent.clone(),
        cluster: job.cluster.clone(),
        namespace: job.namespace.clone(),
        job: job.name.clone(),
        refs: Some(refs),
        report: !job.skip_report,
        context: job.context.clone(),
        max_concurrency: job.max_concurrency,
        pod_spec: job.spec.clone(),
    }
}

/// Wrap a spec into a named `ProwJob` in the `triggered` state.
///
/// The standard Prow labels and the `prow.k8s.io/job` annotation take
/// precedence over `extra_labels` and `extra_annotations`. Label values
/// Kubernetes would reject are replaced by their last path segment, or
/// dropped.
#[must_use]
pub fn new_prow_job(
    name: &str,
    spec: ProwJobSpec,
    extra_labels: &BTreeMap<String, String>,
    extra_annotations: &BTreeMap<String, String>,
) -> ProwJob {
    let mut labels = extra_labels.clone();
    labels.extend(standard_labels(&spec));
    let labels = sanitize_labels(labels);

    let mut annotations = extra_annotations.clone();
    annotations.insert(PROW_JOB_ANNOTATION.to_string(), spec.job.clone());

    let mut job = ProwJob::new(name, spec);
    job.metadata = ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..ObjectMeta::default()
    };
    job.status = Some(ProwJobStatus {
        start_time: Some(Utc::now()),
        state: ProwJobState::Triggered,
    });
    job
}

fn standard_labels(spec: &ProwJobSpec) -> BTreeMap<String, String> {
    let job_label: String = spec.job.chars().take(LABEL_VALUE_MAX_LENGTH).collect();

    let mut labels = BTreeMap::from([
        (CREATED_BY_PROW_LABEL.to_string(), "true".to_string()),
        (PROW_JOB_TYPE_LABEL.to_string(), spec.job_type.to_string()),
        (PROW_JOB_ANNOTATION.to_string(), job_label),
    ]);
    if let Some(refs) = &spec.refs {
        labels.insert(ORG_LABEL.to_string(), refs.org.clone());
        labels.insert(REPO_LABEL.to_string(), refs.repo.clone());
        labels.insert(BASE_REF_LABEL.to_string(), refs.base_ref.clone());
    }
    labels
}

/// Replace invalid values by their last path segment if that is valid,
/// otherwise drop the label.
fn sanitize_labels(labels: BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .into_iter()
        .filter_map(|(key, value)| {
            if is_valid_label_value(&value) {
                return Some((key, value));
            }
            let base = value.rsplit('/').next().unwrap_or_default();
            if is_valid_label_value(base) {
                return Some((key, base.to_string()));
            }
            debug!(label = %key, value = %value, "Removing invalid label");
            None
        })
        .collect()
}

/// Kubernetes label value rules: at most 63 characters, alphanumerics with
/// `-`, `_` or `.` inside, alphanumeric at both ends. Empty is allowed.
#[must_use]
pub fn is_valid_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if value.len() > LABEL_VALUE_MAX_LENGTH {
        return false;
    }
    let bytes = value.as_bytes();
    let edges_ok =
        bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric();
    edges_ok
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

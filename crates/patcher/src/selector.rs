//! Picks the postsubmits that opted into propagation.

use crate::catalog::Postsubmit;

/// Label a job must carry, set to `"true"`, to be re-run on a rename.
pub const PROPAGATE_ON_RENAME_LABEL: &str = "propagate-on-rename";

/// Jobs labelled `propagate-on-rename: "true"`, in catalog order.
#[must_use]
pub fn select(jobs: &[Postsubmit]) -> Vec<&Postsubmit> {
    select_labelled(jobs, PROPAGATE_ON_RENAME_LABEL)
}

/// Jobs whose `label` is exactly `"true"`, in catalog order.
#[must_use]
pub fn select_labelled<'a>(jobs: &'a [Postsubmit], label: &str) -> Vec<&'a Postsubmit> {
    jobs.iter()
        .filter(|job| job.labels.get(label).is_some_and(|v| v == "true"))
        .collect()
}

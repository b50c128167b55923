//! Derives the `Refs` a propagated job checks out.

use crate::error::FormatError;
use crate::event::RepositoryChangeEvent;
use crate::prowjob::Refs;

/// Build refs for a rename event.
///
/// `base_ref` is `<old branch>:<new branch>` so the job can locate the patch
/// set applied to the old branch and replay it on the new one.
pub fn build_refs(event: &RepositoryChangeEvent) -> Result<Refs, FormatError> {
    let full_name = &event.repository_full_name;

    let (org, repo) = split_full_name(full_name)
        .ok_or_else(|| FormatError::RepositoryName(full_name.clone()))?;

    let from = event
        .default_branch_rename
        .as_ref()
        .map(|rename| rename.from.as_str())
        .filter(|from| !from.is_empty())
        .ok_or_else(|| FormatError::MissingRename(full_name.clone()))?;

    let to = event
        .default_branch
        .as_deref()
        .filter(|to| !to.is_empty())
        .ok_or_else(|| FormatError::MissingDefaultBranch(full_name.clone()))?;

    Ok(Refs {
        org: org.to_string(),
        repo: repo.to_string(),
        repo_link: event.html_url.clone(),
        base_ref: format!("{from}:{to}"),
        ..Refs::default()
    })
}

fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let mut parts = full_name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(org), Some(repo), None) if !org.is_empty() && !repo.is_empty() => Some((org, repo)),
        _ => None,
    }
}

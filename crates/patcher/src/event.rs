//! GitHub `repository` webhook payload.
//!
//! Only the parts needed to recognise a default branch rename are modelled.
//! Everything else GitHub sends is ignored.

use serde::Deserialize;

use crate::error::DecodeError;

/// Event kind GitHub sends in `X-GitHub-Event` for repository changes.
pub const REPOSITORY_EVENT: &str = "repository";

/// Raw `repository` event body (simplified)
#[derive(Debug, Clone, Deserialize)]
struct RepositoryEventPayload {
    /// Action type (edited, renamed, archived, ...)
    #[serde(default)]
    action: Option<String>,
    /// Field changes, present on `edited`
    #[serde(default)]
    changes: Option<Changes>,
    /// Repository the event is about
    repository: Repository,
}

#[derive(Debug, Clone, Deserialize)]
struct Changes {
    #[serde(default)]
    default_branch: Option<DefaultBranchChange>,
}

#[derive(Debug, Clone, Deserialize)]
struct DefaultBranchChange {
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Repository {
    /// Full name (org/repo)
    full_name: String,
    /// Current default branch, i.e. the new name after a rename
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
}

/// Previous name of a renamed default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRename {
    pub from: String,
}

/// A decoded `repository` event.
///
/// Inert unless [`default_branch_rename`](Self::default_branch_rename) is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryChangeEvent {
    pub repository_full_name: String,
    pub default_branch: Option<String>,
    pub default_branch_rename: Option<BranchRename>,
    pub action: Option<String>,
    pub html_url: Option<String>,
}

impl RepositoryChangeEvent {
    /// Decode a raw webhook body.
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        let raw: RepositoryEventPayload = serde_json::from_slice(payload)?;
        let default_branch_rename = raw
            .changes
            .and_then(|c| c.default_branch)
            .and_then(|d| d.from)
            .map(|from| BranchRename { from });

        Ok(Self {
            repository_full_name: raw.repository.full_name,
            default_branch: raw.repository.default_branch,
            default_branch_rename,
            action: raw.action,
            html_url: raw.repository.html_url,
        })
    }

    /// Whether this event should propagate jobs at all.
    #[must_use]
    pub const fn is_default_branch_rename(&self) -> bool {
        self.default_branch_rename.is_some()
    }
}

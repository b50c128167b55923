//! Build information and the latest-release check.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const RELEASE_OWNER: &str = "bartoszmajsak";
pub const RELEASE_REPO: &str = "prow-patcher";

/// How long the version command waits for the release lookup.
pub const RELEASE_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Release tag baked in by the release build, if any.
const RELEASE_TAG: Option<&str> = option_env!("PATCHER_RELEASE_TAG");

pub const COMMIT: &str = match option_env!("PATCHER_GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

pub const BUILD_TIME: &str = match option_env!("PATCHER_BUILD_TIME") {
    Some(time) => time,
    None => "unknown",
};

/// Version of the running binary.
#[must_use]
pub fn version() -> &'static str {
    RELEASE_TAG.unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Whether this binary was built from a tagged release.
#[must_use]
pub fn released() -> bool {
    RELEASE_TAG.is_some_and(|tag| !tag.is_empty())
}

/// Lines printed by the `version` command.
#[must_use]
pub fn version_info() -> Vec<String> {
    vec![
        format!("Binary Version: {}", version()),
        format!(
            "OS/Arch: {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
        format!("Build Commit: {COMMIT}"),
        format!("Build Time: {BUILD_TIME}"),
    ]
}

#[derive(Debug, Deserialize)]
struct Release {
    name: Option<String>,
    tag_name: String,
}

/// Name of the latest published release of `owner/repo`.
///
/// Falls back to the tag when the release has no name.
pub async fn latest_release(api_base: &str, owner: &str, repo: &str) -> Result<String> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("patch-propagator/", env!("CARGO_PKG_VERSION"))),
    );

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")?;

    let url = format!(
        "{}/repos/{owner}/{repo}/releases/latest",
        api_base.trim_end_matches('/')
    );
    let release: Release = client
        .get(&url)
        .send()
        .await
        .context("unable to determine latest released version")?
        .error_for_status()
        .context("unable to determine latest released version")?
        .json()
        .await
        .context("Failed to parse release response")?;

    Ok(release
        .name
        .filter(|name| !name.is_empty())
        .unwrap_or(release.tag_name))
}

#[must_use]
pub fn is_latest_release(latest: &str) -> bool {
    latest == version()
}

/// Warning to print when `latest` is newer than the running binary.
#[must_use]
pub fn outdated_warning(latest: &str) -> Option<String> {
    (!is_latest_release(latest)).then(|| {
        format!(
            "WARN: you are using {} which is not the latest release (newest is {latest}).\n\
             Follow release notes for update info \
             https://github.com/{RELEASE_OWNER}/{RELEASE_REPO}/releases",
            version()
        )
    })
}

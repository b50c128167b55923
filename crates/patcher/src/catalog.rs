//! Prow job configuration: the catalog of postsubmit jobs per repository.
//!
//! The catalog is owned by Prow's `config.yaml` and, optionally, a directory
//! of job config files. This module only reads them. [`ConfigAgent`] keeps
//! the latest good snapshot and can reload it from disk in the background.
//! Readers always see a complete, immutable snapshot.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn default_prowjob_namespace() -> String {
    "default".to_string()
}

fn default_pod_namespace() -> String {
    "default".to_string()
}

fn default_agent() -> String {
    "kubernetes".to_string()
}

/// Subset of Prow's `config.yaml` the plugin needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProwConfig {
    /// Namespace `ProwJob` resources are created in
    #[serde(default = "default_prowjob_namespace")]
    pub prowjob_namespace: String,

    /// Namespace test pods run in, unless a job overrides it
    #[serde(default = "default_pod_namespace")]
    pub pod_namespace: String,

    /// Postsubmit jobs keyed by `org/repo`
    #[serde(default)]
    pub postsubmits: HashMap<String, Vec<Postsubmit>>,
}

/// A configured postsubmit job.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Postsubmit {
    pub name: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Copied onto every `ProwJob` created for this job
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default = "default_agent")]
    pub agent: String,

    #[serde(default)]
    pub cluster: Option<String>,

    /// Pod namespace, filled from `pod_namespace` when unset
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub max_concurrency: u32,

    /// Status context reported to GitHub
    #[serde(default)]
    pub context: Option<String>,

    #[serde(default)]
    pub skip_report: bool,

    #[serde(default)]
    pub path_alias: Option<String>,

    #[serde(default)]
    pub clone_uri: Option<String>,

    /// Pod spec, kept untyped
    #[serde(default)]
    pub spec: Option<serde_json::Value>,
}

/// A file in the job config directory. Only postsubmits are read.
#[derive(Debug, Default, Deserialize)]
struct JobConfig {
    #[serde(default)]
    postsubmits: HashMap<String, Vec<Postsubmit>>,
}

impl ProwConfig {
    /// Parse YAML and apply defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: ProwConfig =
            serde_yaml::from_str(yaml).context("Failed to parse config YAML")?;
        config.apply_defaults();
        Ok(config)
    }

    /// Load `config.yaml`, then merge the postsubmits of every `*.yaml` or
    /// `*.yml` file under `job_config_path`.
    ///
    /// Hidden files and directories are skipped, so the `..data` links of a
    /// mounted `ConfigMap` are only read once.
    pub fn from_mounted_files(config_path: &Path, job_config_path: Option<&Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let mut config: ProwConfig =
            serde_yaml::from_str(&yaml).context("Failed to parse config YAML")?;

        if let Some(dir) = job_config_path {
            for file in job_config_files(dir)? {
                let yaml = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read job config {}", file.display()))?;
                let jobs: JobConfig = serde_yaml::from_str(&yaml)
                    .with_context(|| format!("Failed to parse job config {}", file.display()))?;
                config.merge_postsubmits(jobs.postsubmits);
            }
        }

        config.apply_defaults();
        Ok(config)
    }

    fn merge_postsubmits(&mut self, postsubmits: HashMap<String, Vec<Postsubmit>>) {
        for (repo, jobs) in postsubmits {
            self.postsubmits.entry(repo).or_default().extend(jobs);
        }
    }

    fn apply_defaults(&mut self) {
        for job in self.postsubmits.values_mut().flatten() {
            if job.namespace.is_none() {
                job.namespace = Some(self.pod_namespace.clone());
            }
            if job.cluster.is_none() {
                job.cluster = Some("default".to_string());
            }
        }
    }

    /// Postsubmits configured for `org/repo`, in config order.
    #[must_use]
    pub fn postsubmits_for(&self, repository_full_name: &str) -> &[Postsubmit] {
        self.postsubmits
            .get(repository_full_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Job config files under `dir`, in path order.
fn job_config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        });
    for entry in walker {
        let entry = entry
            .with_context(|| format!("Failed to walk job config directory {}", dir.display()))?;
        let is_yaml = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if entry.file_type().is_file() && is_yaml {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Read-only access to the job catalog.
#[async_trait]
pub trait JobCatalog: Send + Sync {
    /// Postsubmit jobs configured for `org/repo`, in catalog order.
    async fn postsubmits(&self, repository_full_name: &str) -> Vec<Postsubmit>;
}

/// Holds the current [`ProwConfig`] snapshot.
pub struct ConfigAgent {
    path: Option<PathBuf>,
    job_config_path: Option<PathBuf>,
    current: RwLock<Arc<ProwConfig>>,
}

impl ConfigAgent {
    /// Agent over a fixed config that is never reloaded.
    #[must_use]
    pub fn from_config(config: ProwConfig) -> Self {
        Self {
            path: None,
            job_config_path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Load the config at `path`, plus the job config directory if given.
    /// Fails if the first load fails.
    pub fn load(path: impl Into<PathBuf>, job_config_path: Option<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = ProwConfig::from_mounted_files(&path, job_config_path.as_deref())?;
        info!(
            path = %path.display(),
            job_config_path = ?job_config_path,
            repos = config.postsubmits.len(),
            "Loaded Prow configuration"
        );
        Ok(Self {
            path: Some(path),
            job_config_path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Current snapshot.
    pub async fn config(&self) -> Arc<ProwConfig> {
        Arc::clone(&*self.current.read().await)
    }

    /// Re-read the config sources. On failure the previous snapshot stays in place.
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let config = ProwConfig::from_mounted_files(path, self.job_config_path.as_deref())?;
        *self.current.write().await = Arc::new(config);
        debug!(path = %path.display(), "Reloaded Prow configuration");
        Ok(())
    }

    /// Reload on a fixed interval until the returned task is aborted.
    pub fn spawn_reload(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; the config was just loaded
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = agent.reload().await {
                    warn!(error = %e, "Failed to reload Prow configuration, keeping previous");
                }
            }
        })
    }
}

#[async_trait]
impl JobCatalog for ConfigAgent {
    async fn postsubmits(&self, repository_full_name: &str) -> Vec<Postsubmit> {
        self.config()
            .await
            .postsubmits_for(repository_full_name)
            .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
prowjob_namespace: prow
pod_namespace: ci-pods
postsubmits:
  acme/widgets:
  - name: build-widgets
    labels:
      propagate-on-rename: "true"
    spec:
      containers:
      - image: golang:1.22
        command: ["make", "test"]
  - name: publish-widgets
    namespace: publish
    cluster: build01
"#;

    #[test]
    fn test_config_deserialization() {
        let config = ProwConfig::from_yaml(CONFIG).unwrap();

        assert_eq!(config.prowjob_namespace, "prow");
        let jobs = config.postsubmits_for("acme/widgets");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "build-widgets");
        assert_eq!(jobs[0].labels["propagate-on-rename"], "true");
        assert_eq!(jobs[0].agent, "kubernetes");
        assert!(jobs[0].spec.is_some());
    }

    #[test]
    fn pod_namespace_and_cluster_are_defaulted() {
        let config = ProwConfig::from_yaml(CONFIG).unwrap();
        let jobs = config.postsubmits_for("acme/widgets");

        assert_eq!(jobs[0].namespace.as_deref(), Some("ci-pods"));
        assert_eq!(jobs[0].cluster.as_deref(), Some("default"));
        assert_eq!(jobs[1].namespace.as_deref(), Some("publish"));
        assert_eq!(jobs[1].cluster.as_deref(), Some("build01"));
    }

    #[test]
    fn test_default_config() {
        let config = ProwConfig::from_yaml("{}").unwrap();
        assert_eq!(config.prowjob_namespace, "default");
        assert_eq!(config.pod_namespace, "default");
        assert!(config.postsubmits_for("acme/widgets").is_empty());
    }

    #[tokio::test]
    async fn unknown_repository_has_no_jobs() {
        let agent = ConfigAgent::from_config(ProwConfig::from_yaml(CONFIG).unwrap());
        assert!(agent.postsubmits("acme/gadgets").await.is_empty());
        assert_eq!(agent.postsubmits("acme/widgets").await.len(), 2);
    }

    #[tokio::test]
    async fn reload_keeps_last_good_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let agent = ConfigAgent::load(file.path(), None).unwrap();

        std::fs::write(file.path(), "postsubmits: [not, a, map").unwrap();
        assert!(agent.reload().await.is_err());
        assert_eq!(agent.postsubmits("acme/widgets").await.len(), 2);

        std::fs::write(
            file.path(),
            "postsubmits:\n  acme/widgets:\n  - name: only-one\n",
        )
        .unwrap();
        agent.reload().await.unwrap();
        let jobs = agent.postsubmits("acme/widgets").await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "only-one");
    }

    #[test]
    fn load_fails_for_missing_file() {
        assert!(ConfigAgent::load("/nonexistent/config.yaml", None).is_err());
    }

    #[test]
    fn test_annotations_are_read() {
        let yaml = r#"
postsubmits:
  acme/widgets:
  - name: build
    annotations:
      testgrid-dashboards: sig-foo
"#;
        let config = ProwConfig::from_yaml(yaml).unwrap();

        let jobs = config.postsubmits_for("acme/widgets");
        assert_eq!(jobs[0].annotations["testgrid-dashboards"], "sig-foo");
    }

    #[test]
    fn test_job_config_directory_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            "pod_namespace: ci-pods\npostsubmits:\n  acme/widgets:\n  - name: from-config\n",
        )
        .unwrap();

        let jobs_dir = dir.path().join("jobs");
        std::fs::create_dir_all(jobs_dir.join("acme")).unwrap();
        std::fs::create_dir_all(jobs_dir.join(".hidden")).unwrap();
        std::fs::write(
            jobs_dir.join("acme/widgets-postsubmits.yaml"),
            "postsubmits:\n  acme/widgets:\n  - name: from-job-config\n",
        )
        .unwrap();
        std::fs::write(
            jobs_dir.join("gadgets.yml"),
            "presubmits: {}\npostsubmits:\n  acme/gadgets:\n  - name: gadgets-build\n",
        )
        .unwrap();
        std::fs::write(jobs_dir.join("README.md"), "not: [yaml").unwrap();
        std::fs::write(
            jobs_dir.join(".hidden/stale.yaml"),
            "postsubmits:\n  acme/widgets:\n  - name: stale\n",
        )
        .unwrap();

        let config = ProwConfig::from_mounted_files(&config_path, Some(&jobs_dir)).unwrap();

        let names: Vec<&str> = config
            .postsubmits_for("acme/widgets")
            .iter()
            .map(|j| j.name.as_str())
            .collect();
        assert_eq!(names, vec!["from-config", "from-job-config"]);
        let gadgets = config.postsubmits_for("acme/gadgets");
        assert_eq!(gadgets.len(), 1);
        assert_eq!(gadgets[0].namespace.as_deref(), Some("ci-pods"));
    }

    #[test]
    fn test_broken_job_config_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "{}").unwrap();
        let jobs_dir = dir.path().join("jobs");
        std::fs::create_dir_all(&jobs_dir).unwrap();
        std::fs::write(jobs_dir.join("broken.yaml"), "postsubmits: [not, a, map").unwrap();

        assert!(ConfigAgent::load(&config_path, Some(jobs_dir)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_reload_picks_up_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let agent = Arc::new(ConfigAgent::load(file.path(), None).unwrap());
        let reload = agent.spawn_reload(Duration::from_secs(60));

        std::fs::write(
            file.path(),
            "postsubmits:\n  acme/widgets:\n  - name: only-one\n",
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(agent.postsubmits("acme/widgets").await.len(), 2);

        let mut reloaded = false;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(31)).await;
            if agent.postsubmits("acme/widgets").await.len() == 1 {
                reloaded = true;
                break;
            }
        }
        reload.abort();

        assert!(reloaded, "config was not reloaded on the interval");
    }
}

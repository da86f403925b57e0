//! Consolidated repository indexes.

use std::{
    collections::{BTreeSet, HashSet},
    path::Path,
    time::Duration,
};

use chrono::Utc;
use quick_xml::{events::Event, reader::Reader};
use rayon::prelude::*;
use rpmrepo_store::{file_name, parent_prefix, BlobInfo, ObjectStore, StoreError};
use rpmrepo_utils::fs::walk_files;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::{
    artifact::PackageArtifact,
    error::{ErrorContext, RepoError, Result},
    layout::{unique_token, RepoLayout, ARTIFACT_SUFFIX, PACKAGE_SUFFIX, REPODATA_DIR, REPOMD_FILE},
    tools::{MergeTool, ToolError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new index was published; `pruned` lists data files removed afterwards.
    Published { packages: usize, pruned: Vec<String> },
    /// The repository has no artifacts; nothing was touched.
    Empty,
}

/// Reported while a merge runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeProgress {
    Collecting { artifacts: usize },
    Merging,
}

/// Merges of one invocation before it gives up chasing a changing artifact set.
const MAX_MERGE_PASSES: usize = 5;

pub struct MetadataMerger<'a> {
    store: &'a dyn ObjectStore,
    layout: &'a RepoLayout,
    tool: &'a dyn MergeTool,
    retention: Duration,
    progress: Option<&'a (dyn Fn(MergeProgress) + Sync)>,
}

impl<'a> MetadataMerger<'a> {
    /// `retention` is how long data files stay after they stop being referenced.
    pub fn new(
        store: &'a dyn ObjectStore,
        layout: &'a RepoLayout,
        tool: &'a dyn MergeTool,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            layout,
            tool,
            retention,
            progress: None,
        }
    }

    pub fn on_progress(mut self, progress: &'a (dyn Fn(MergeProgress) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, progress: MergeProgress) {
        if let Some(callback) = self.progress {
            callback(progress);
        }
    }

    /// Regenerates the index of the repository at `repository` from every
    /// artifact it currently holds.
    ///
    /// The new `repomd.xml` replaces the old one in a single rename after all
    /// files it references are in place, so readers see either index in full.
    /// A failing merge tool leaves the published index untouched.
    ///
    /// When the artifact set changed while the merge ran, it is merged again,
    /// so the last invocation to publish always leaves an index covering every
    /// artifact that existed when it finished.
    pub fn merge(&self, repository: &str) -> Result<MergeOutcome> {
        let mut children = self.store.list_children(repository)?;
        let mut pruned = Vec::new();
        let mut pass = 1;
        loop {
            let outcome = self.merge_children(repository, &children)?;
            let current = self.store.list_children(repository)?;
            let settled = artifact_set(&current) == artifact_set(&children);
            if settled || pass == MAX_MERGE_PASSES {
                if !settled {
                    warn!(repository, "artifact set still changing, leaving the rest to later merges");
                }
                return Ok(match outcome {
                    MergeOutcome::Published {
                        packages,
                        pruned: last,
                    } => {
                        pruned.extend(last);
                        MergeOutcome::Published {
                            packages,
                            pruned,
                        }
                    }
                    MergeOutcome::Empty => MergeOutcome::Empty,
                });
            }

            debug!(repository, pass, "artifact set changed during merge, merging again");
            if let MergeOutcome::Published {
                pruned: removed, ..
            } = outcome
            {
                pruned.extend(removed);
            }
            children = current;
            pass += 1;
        }
    }

    fn merge_children(&self, repository: &str, children: &[BlobInfo]) -> Result<MergeOutcome> {
        let packages: HashSet<&str> = children
            .iter()
            .filter(|blob| blob.key.ends_with(PACKAGE_SUFFIX))
            .map(|blob| blob.key.as_str())
            .collect();
        let artifacts: Vec<&BlobInfo> = children
            .iter()
            .filter(|blob| blob.key.ends_with(ARTIFACT_SUFFIX))
            .collect();

        if artifacts.is_empty() {
            debug!(repository, "no artifacts to merge");
            return Ok(MergeOutcome::Empty);
        }

        for artifact in &artifacts {
            let package = self.layout.package_key_for_artifact(&artifact.key);
            if !packages.contains(package.as_str()) {
                return Err(RepoError::InvariantViolation(format!(
                    "artifact `{}` has no package `{package}`",
                    artifact.key
                )));
            }
        }

        self.report(MergeProgress::Collecting {
            artifacts: artifacts.len(),
        });
        let decoded = artifacts
            .par_iter()
            .map(|blob| self.fetch_artifact(blob))
            .collect::<Result<Vec<_>>>()?;

        let workdir = TempDir::new().with_context(|| "creating a working directory".into())?;
        let inputs = workdir.path().join("in");
        let output = workdir.path().join("out");
        let mut repos = Vec::with_capacity(decoded.len());
        for (blob, artifact) in artifacts.iter().zip(&decoded) {
            let name = file_name(&blob.key);
            let dir = inputs.join(name.strip_suffix(ARTIFACT_SUFFIX).unwrap_or(name));
            artifact.unpack_into(&dir).map_err(|source| {
                RepoError::CorruptArtifact {
                    key: blob.key.clone(),
                    source,
                }
            })?;
            repos.push(dir);
        }
        std::fs::create_dir_all(&output)
            .with_context(|| format!("creating {}", output.display()))?;

        self.report(MergeProgress::Merging);
        self.tool.merge(&repos, &output)?;

        self.publish(repository, &output)?;
        info!(repository, packages = decoded.len(), "published repository index");

        let pruned = self.prune(repository)?;
        Ok(MergeOutcome::Published {
            packages: decoded.len(),
            pruned,
        })
    }

    fn fetch_artifact(&self, blob: &BlobInfo) -> Result<PackageArtifact> {
        let bytes = self.store.get(&blob.key)?;
        let artifact = PackageArtifact::decode(&bytes).map_err(|source| {
            RepoError::CorruptArtifact {
                key: blob.key.clone(),
                source,
            }
        })?;

        let expected = self.layout.package_key_for_artifact(&blob.key);
        if artifact.manifest().package != expected {
            return Err(RepoError::InvariantViolation(format!(
                "artifact `{}` describes `{}` instead of `{expected}`",
                blob.key,
                artifact.manifest().package
            )));
        }
        Ok(artifact)
    }

    /// Uploads data files, then swaps in `repomd.xml`.
    fn publish(&self, repository: &str, output: &Path) -> Result<()> {
        let repodata = output.join(REPODATA_DIR);
        let repomd_path = repodata.join(REPOMD_FILE);
        if !repomd_path.is_file() {
            return Err(ToolError::MissingOutput {
                tool: "merge tool".into(),
                path: repomd_path,
            }
            .into());
        }

        let prefix = self.layout.repodata_prefix(repository);
        for path in walk_files(&repodata)? {
            if path == repomd_path {
                continue;
            }
            let key = format!("{prefix}{}", relative_key(&repodata, &path));
            let data = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            // Rewritten even when unchanged so the retention clock restarts.
            self.store.put(&key, &data)?;
        }

        let repomd = std::fs::read(&repomd_path)
            .with_context(|| format!("reading {}", repomd_path.display()))?;
        let target = self.layout.repomd_key(repository);
        let staged = self.layout.staging_key(&target, &unique_token());
        self.store.put(&staged, &repomd)?;
        self.store.rename(&staged, &target)?;
        Ok(())
    }

    /// Deletes data files the published index does not reference and that are
    /// older than the retention period.
    fn prune(&self, repository: &str) -> Result<Vec<String>> {
        let Some(cutoff) = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Ok(Vec::new());
        };

        let repomd_key = self.layout.repomd_key(repository);
        let repomd = match self.store.get(&repomd_key) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let referenced: BTreeSet<String> = match referenced_files(&repomd) {
            Ok(hrefs) => {
                hrefs
                    .into_iter()
                    .map(|href| format!("{repository}{}", href.trim_start_matches("./")))
                    .collect()
            }
            Err(err) => {
                warn!(repository, error = %err, "published repomd.xml is unreadable, skipping prune");
                return Ok(Vec::new());
            }
        };

        let mut pruned = Vec::new();
        for blob in self.store.list(&self.layout.repodata_prefix(repository))? {
            if blob.key == repomd_key
                || referenced.contains(&blob.key)
                || blob.last_modified >= cutoff
            {
                continue;
            }
            if self.store.delete(&blob.key)? {
                debug!(key = %blob.key, "pruned unreferenced repodata file");
                pruned.push(blob.key);
            }
        }
        Ok(pruned)
    }
}

/// Artifact keys and etags among `children`.
fn artifact_set(children: &[BlobInfo]) -> BTreeSet<(&str, &str)> {
    children
        .iter()
        .filter(|blob| blob.key.ends_with(ARTIFACT_SUFFIX))
        .map(|blob| (blob.key.as_str(), blob.etag.as_str()))
        .collect()
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `href`s of every `<location>` in a `repomd.xml`.
pub fn referenced_files(repomd: &[u8]) -> std::result::Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_reader(repomd);
    let mut buf = Vec::new();
    let mut hrefs = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"location" =>
            {
                for attribute in element.attributes() {
                    let attribute = attribute?;
                    if attribute.key.local_name().as_ref() == b"href" {
                        hrefs.push(attribute.unescape_value()?.into_owned());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(hrefs)
}

/// Whether the index of `repository` may lag behind its artifacts: there are
/// artifacts and either no index or an artifact newer than it.
pub fn needs_merge(store: &dyn ObjectStore, layout: &RepoLayout, repository: &str) -> Result<bool> {
    let newest_artifact = store
        .list_children(repository)?
        .into_iter()
        .filter(|blob| blob.key.ends_with(ARTIFACT_SUFFIX))
        .map(|blob| blob.last_modified)
        .max();

    let Some(newest_artifact) = newest_artifact else {
        return Ok(false);
    };
    Ok(match store.head(&layout.repomd_key(repository))? {
        Some(repomd) => newest_artifact > repomd.last_modified,
        None => true,
    })
}

/// Repository prefixes holding at least one artifact, sorted.
pub fn list_repositories(store: &dyn ObjectStore, layout: &RepoLayout) -> Result<Vec<String>> {
    Ok(store
        .list("")?
        .iter()
        .filter(|blob| layout.is_managed_artifact(&blob.key))
        .map(|blob| parent_prefix(&blob.key).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

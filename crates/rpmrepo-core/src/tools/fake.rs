//! In-process stand-ins for `createrepo_c` and `mergerepo_c`.
//!
//! Both write a `repomd.xml` pointing at a content-addressed
//! `*-primary.xml` whose lines look like
//! `<package name="demo" nevra="demo-1.0.0-1.el8.x86_64" checksum="…" href="…"/>`.
//! Output depends only on the input bytes.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use rpmrepo_package::RpmPackage;
use rpmrepo_utils::hash::{hash_bytes, short_hash};

use super::{IndexTool, MergeTool, ToolError};
use crate::layout::{PACKAGE_SUFFIX, REPODATA_DIR, REPOMD_FILE};

const INDEXER: &str = "fake-createrepo";
const MERGER: &str = "fake-mergerepo";

fn io_failure(tool: &str, err: std::io::Error) -> ToolError {
    ToolError::Spawn {
        tool: tool.to_string(),
        source: err,
    }
}

fn rejected(tool: &str, reason: String) -> ToolError {
    ToolError::Rejected {
        tool: tool.to_string(),
        status: Some(1),
        stderr: reason,
    }
}

/// Writes `repodata/` with a primary listing of `lines` into `dir`.
fn write_repodata(dir: &Path, lines: &BTreeSet<String>) -> std::io::Result<()> {
    let repodata = dir.join(REPODATA_DIR);
    fs::create_dir_all(&repodata)?;

    let mut primary = format!("<metadata packages=\"{}\">\n", lines.len());
    for line in lines {
        primary.push_str(line);
        primary.push('\n');
    }
    primary.push_str("</metadata>\n");

    let checksum = hash_bytes(primary.as_bytes());
    let primary_name = format!("{}-primary.xml", short_hash(&checksum, 16));
    fs::write(repodata.join(&primary_name), &primary)?;

    let repomd = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <repomd xmlns=\"http://linux.duke.edu/metadata/repo\">\n  \
         <data type=\"primary\">\n    \
         <checksum type=\"blake3\">{checksum}</checksum>\n    \
         <location href=\"{REPODATA_DIR}/{primary_name}\"/>\n  \
         </data>\n\
         </repomd>\n"
    );
    fs::write(repodata.join(REPOMD_FILE), repomd)
}

/// Package lines listed by the `repodata/` inside `dir`.
pub fn listed_packages(dir: &Path) -> std::io::Result<Vec<String>> {
    let repodata = dir.join(REPODATA_DIR);
    let mut lines = Vec::new();
    for entry in fs::read_dir(&repodata)? {
        let path = entry?.path();
        if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with("-primary.xml"))
        {
            let content = fs::read_to_string(&path)?;
            lines.extend(
                content
                    .lines()
                    .filter(|line| line.starts_with("<package "))
                    .map(str::to_string),
            );
        }
    }
    lines.sort();
    Ok(lines)
}

/// Indexes the single RPM in a directory by reading its header.
#[derive(Debug, Default)]
pub struct FakeIndexer {
    calls: AtomicUsize,
    refused: Vec<String>,
}

impl FakeIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the indexer refuse packages called `name`, like a tool
    /// rejecting a corrupt payload.
    pub fn refuse(mut self, name: &str) -> Self {
        self.refused.push(name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IndexTool for FakeIndexer {
    fn index(&self, repo_dir: &Path) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut lines = BTreeSet::new();
        for entry in fs::read_dir(repo_dir).map_err(|err| io_failure(INDEXER, err))? {
            let path = entry.map_err(|err| io_failure(INDEXER, err))?.path();
            if !path.to_string_lossy().ends_with(PACKAGE_SUFFIX) {
                continue;
            }

            let package =
                RpmPackage::from_path(&path).map_err(|err| rejected(INDEXER, err.to_string()))?;
            if self.refused.contains(&package.name) {
                return Err(rejected(
                    INDEXER,
                    format!("{}: payload is corrupt", package.nevra()),
                ));
            }

            let href = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            lines.insert(format!(
                "<package name=\"{}\" nevra=\"{}\" checksum=\"{}\" href=\"{href}\"/>",
                package.name,
                package.nevra(),
                package.checksum
            ));
        }

        if lines.is_empty() {
            return Err(rejected(INDEXER, "no packages found".to_string()));
        }
        write_repodata(repo_dir, &lines).map_err(|err| io_failure(INDEXER, err))
    }
}

/// Unions the listings of every input repository.
#[derive(Debug, Default)]
pub struct FakeMerger {
    calls: AtomicUsize,
    failing: bool,
}

impl FakeMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A merger that refuses every input.
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MergeTool for FakeMerger {
    fn merge(&self, repos: &[PathBuf], output_dir: &Path) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(rejected(MERGER, "merge refused".to_string()));
        }

        let mut lines = BTreeSet::new();
        for repo in repos {
            lines.extend(listed_packages(repo).map_err(|err| io_failure(MERGER, err))?);
        }
        write_repodata(output_dir, &lines).map_err(|err| io_failure(MERGER, err))
    }
}

#[cfg(test)]
mod tests {
    use rpmrepo_package::fixtures::RpmBuilder;
    use tempfile::tempdir;

    use super::*;

    fn repo_with(dir: &Path, builder: &RpmBuilder) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(builder.file_name()), builder.build()).unwrap();
    }

    #[test]
    fn test_indexer_lists_package() {
        let dir = tempdir().unwrap();
        repo_with(dir.path(), &RpmBuilder::new("demo", "1.0.0", "1.el8"));

        let indexer = FakeIndexer::new();
        indexer.index(dir.path()).unwrap();

        assert_eq!(indexer.calls(), 1);
        assert!(dir.path().join("repodata/repomd.xml").is_file());
        let listed = listed_packages(dir.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].contains("name=\"demo\""));
    }

    #[test]
    fn test_indexer_refusals() {
        let dir = tempdir().unwrap();
        repo_with(dir.path(), &RpmBuilder::new("broken", "1.0.0", "1.el8"));

        let err = FakeIndexer::new().refuse("broken").index(dir.path()).unwrap_err();
        assert!(matches!(err, ToolError::Rejected { .. }));

        let garbage = tempdir().unwrap();
        fs::write(garbage.path().join("junk.rpm"), b"not an rpm").unwrap();
        let err = FakeIndexer::new().index(garbage.path()).unwrap_err();
        assert!(matches!(err, ToolError::Rejected { .. }));
    }

    #[test]
    fn test_merger_output_is_deterministic() {
        let root = tempdir().unwrap();
        let indexer = FakeIndexer::new();
        let mut repos = Vec::new();
        for name in ["a", "b"] {
            let dir = root.path().join(name);
            repo_with(&dir, &RpmBuilder::new(name, "1.0", "1.el8"));
            indexer.index(&dir).unwrap();
            repos.push(dir);
        }

        let merger = FakeMerger::new();
        let first = root.path().join("out1");
        let second = root.path().join("out2");
        merger.merge(&repos, &first).unwrap();
        repos.reverse();
        merger.merge(&repos, &second).unwrap();

        assert_eq!(
            fs::read(first.join("repodata/repomd.xml")).unwrap(),
            fs::read(second.join("repodata/repomd.xml")).unwrap()
        );
        assert_eq!(listed_packages(&first).unwrap().len(), 2);
        assert!(FakeMerger::failing().merge(&repos, &first).is_err());
    }
}

//! The `.package` sidecar: one package's `repodata/` plus a manifest, as a
//! reproducible gzip'd tarball.

use std::{
    collections::BTreeMap,
    fs,
    io::Read,
    path::{Component, Path},
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use miette::Diagnostic;
use rpmrepo_utils::{error::FileSystemError, fs::walk_files};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::REPODATA_DIR;

pub const ARTIFACT_FORMAT: &str = "rpmrepo-artifact/1";
const MANIFEST_ENTRY: &str = "artifact.json";
/// Leading bytes of an artifact that always cover its manifest entry.
pub const MANIFEST_READ_LEN: usize = 16 * 1024;

#[derive(Error, Diagnostic, Debug)]
pub enum ArtifactError {
    #[error("Archive I/O failed: {0}")]
    #[diagnostic(code(rpmrepo::artifact::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(rpmrepo::artifact::filesystem))]
    FileSystem(#[from] FileSystemError),

    #[error("Invalid artifact manifest: {0}")]
    #[diagnostic(code(rpmrepo::artifact::manifest))]
    Manifest(#[from] serde_json::Error),

    #[error("Unsupported artifact format `{0}`")]
    #[diagnostic(code(rpmrepo::artifact::format))]
    UnsupportedFormat(String),

    #[error("Unexpected archive entry `{0}`")]
    #[diagnostic(code(rpmrepo::artifact::entry))]
    UnexpectedEntry(String),

    #[error("Artifact has no manifest")]
    #[diagnostic(code(rpmrepo::artifact::no_manifest))]
    MissingManifest,

    #[error("Artifact has no repodata")]
    #[diagnostic(code(rpmrepo::artifact::no_repodata))]
    MissingRepodata,
}

/// What an artifact was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format: String,
    /// Store key of the source package.
    pub package: String,
    /// blake3 checksum of the source package when it was indexed.
    pub checksum: String,
    pub size: u64,
}

impl ArtifactManifest {
    pub fn new(package: &str, checksum: &str, size: u64) -> Self {
        Self {
            format: ARTIFACT_FORMAT.to_string(),
            package: package.to_string(),
            checksum: checksum.to_string(),
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    manifest: ArtifactManifest,
    /// Relative paths (`repodata/…`) to contents, kept sorted.
    files: BTreeMap<String, Vec<u8>>,
}

impl PackageArtifact {
    /// Collects `repo_dir/repodata/` as written by the indexing tool.
    pub fn from_repo_dir(manifest: ArtifactManifest, repo_dir: &Path) -> Result<Self, ArtifactError> {
        let mut files = BTreeMap::new();
        for path in walk_files(repo_dir.join(REPODATA_DIR))? {
            let Ok(relative) = path.strip_prefix(repo_dir) else {
                continue;
            };
            let name = entry_name(relative)
                .ok_or_else(|| ArtifactError::UnexpectedEntry(relative.display().to_string()))?;
            files.insert(name, fs::read(&path)?);
        }
        if files.is_empty() {
            return Err(ArtifactError::MissingRepodata);
        }
        Ok(Self { manifest, files })
    }

    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
    }

    /// Same input, same bytes: fixed entry order, timestamps, owners and modes.
    pub fn encode(&self) -> Result<Vec<u8>, ArtifactError> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        builder.mode(tar::HeaderMode::Deterministic);

        let manifest = serde_json::to_vec_pretty(&self.manifest)?;
        append_entry(&mut builder, MANIFEST_ENTRY, &manifest)?;
        for (name, data) in &self.files {
            append_entry(&mut builder, name, data)?;
        }

        Ok(builder.into_inner()?.finish()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut manifest = None;
        let mut files = BTreeMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let path = entry.path()?.into_owned();
            let name = entry_name(&path)
                .ok_or_else(|| ArtifactError::UnexpectedEntry(path.display().to_string()))?;

            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;

            if name == MANIFEST_ENTRY {
                manifest = Some(parse_manifest(&data)?);
            } else if name.starts_with(&format!("{REPODATA_DIR}/")) {
                files.insert(name, data);
            } else {
                return Err(ArtifactError::UnexpectedEntry(name));
            }
        }

        let manifest = manifest.ok_or(ArtifactError::MissingManifest)?;
        if files.is_empty() {
            return Err(ArtifactError::MissingRepodata);
        }
        Ok(Self { manifest, files })
    }

    /// Reads the manifest alone. [`encode`](Self::encode) writes it first, so
    /// `bytes` only has to cover the leading [`MANIFEST_READ_LEN`] bytes.
    pub fn read_manifest(bytes: &[u8]) -> Result<ArtifactManifest, ArtifactError> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut entries = archive.entries()?;
        let mut entry = entries.next().ok_or(ArtifactError::MissingManifest)??;
        let path = entry.path()?.into_owned();
        if entry_name(&path).as_deref() != Some(MANIFEST_ENTRY) {
            return Err(ArtifactError::MissingManifest);
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        parse_manifest(&data)
    }

    /// Recreates `repodata/` under `dir`.
    pub fn unpack_into(&self, dir: &Path) -> Result<(), ArtifactError> {
        for (name, data) in &self.files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, data)?;
        }
        Ok(())
    }
}

fn parse_manifest(data: &[u8]) -> Result<ArtifactManifest, ArtifactError> {
    let manifest: ArtifactManifest = serde_json::from_slice(data)?;
    if manifest.format != ARTIFACT_FORMAT {
        return Err(ArtifactError::UnsupportedFormat(manifest.format));
    }
    Ok(manifest)
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_data(&mut header, name, data)
}

/// `/`-joined relative name, `None` for absolute paths or `..`.
fn entry_name(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

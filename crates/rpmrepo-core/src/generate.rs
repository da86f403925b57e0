//! Per-package metadata artifacts.

use rpmrepo_store::{file_name, ObjectStore, PutOutcome, StoreError};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::{
    artifact::{ArtifactManifest, PackageArtifact, MANIFEST_READ_LEN},
    classify::move_to_rejected,
    error::{ErrorContext, RepoError, Result},
    layout::{unique_token, RepoLayout},
    tools::{IndexTool, ToolError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    /// A matching artifact already exists.
    AlreadyPresent,
    Created,
    /// A stale artifact (from a previous upload under the same name) was replaced.
    Refreshed,
    /// The indexing tool refused the package; it was moved to `destination`.
    Rejected { destination: String, reason: String },
    /// The package is not in the store (any more).
    PackageMissing,
}

enum Existing {
    Absent,
    Current,
    Stale,
}

pub struct MetadataGenerator<'a> {
    store: &'a dyn ObjectStore,
    layout: &'a RepoLayout,
    indexer: &'a dyn IndexTool,
}

impl<'a> MetadataGenerator<'a> {
    pub fn new(store: &'a dyn ObjectStore, layout: &'a RepoLayout, indexer: &'a dyn IndexTool) -> Self {
        Self {
            store,
            layout,
            indexer,
        }
    }

    /// Makes sure `package_key` has an up to date artifact next to it.
    ///
    /// Safe to call any number of times, also concurrently: new artifacts are
    /// published with a conditional create, so the first complete upload wins
    /// and later ones report [`MetadataOutcome::AlreadyPresent`].
    pub fn ensure_metadata(&self, package_key: &str) -> Result<MetadataOutcome> {
        let Some(package) = self.store.head(package_key)? else {
            return Ok(MetadataOutcome::PackageMissing);
        };
        let artifact_key = self.layout.artifact_key(package_key);

        let existing = self.existing(&artifact_key, &package.etag)?;
        if matches!(existing, Existing::Current) {
            debug!(package = package_key, "artifact already present");
            return Ok(MetadataOutcome::AlreadyPresent);
        }

        let workdir = TempDir::new().with_context(|| "creating a working directory".into())?;
        let repo_dir = workdir.path().join("repo");
        std::fs::create_dir_all(&repo_dir)
            .with_context(|| format!("creating {}", repo_dir.display()))?;
        match self
            .store
            .download_to(package_key, &repo_dir.join(file_name(package_key)))
        {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Ok(MetadataOutcome::PackageMissing),
            Err(err) => return Err(err.into()),
        }

        debug!(package = package_key, "indexing package");
        match self.indexer.index(&repo_dir) {
            Ok(()) => {}
            Err(err @ ToolError::Rejected { .. }) => {
                return self.reject(package_key, &artifact_key, &package.etag, err.to_string());
            }
            Err(err) => return Err(err.into()),
        }

        let manifest = ArtifactManifest::new(package_key, &package.etag, package.size);
        let bytes = PackageArtifact::from_repo_dir(manifest, &repo_dir)
            .and_then(|artifact| artifact.encode())
            .map_err(|source| {
                RepoError::CorruptArtifact {
                    key: artifact_key.clone(),
                    source,
                }
            })?;

        match existing {
            Existing::Absent => {
                match self.store.put_if_absent(&artifact_key, &bytes)? {
                    PutOutcome::Created(_) => {
                        info!(artifact = %artifact_key, "published metadata artifact");
                        Ok(MetadataOutcome::Created)
                    }
                    PutOutcome::AlreadyExists => {
                        debug!(artifact = %artifact_key, "another invocation published first");
                        Ok(MetadataOutcome::AlreadyPresent)
                    }
                }
            }
            Existing::Stale | Existing::Current => {
                let staged = self.layout.staging_key(&artifact_key, &unique_token());
                self.store.put(&staged, &bytes)?;
                self.store.rename(&staged, &artifact_key)?;
                info!(artifact = %artifact_key, "replaced stale metadata artifact");
                Ok(MetadataOutcome::Refreshed)
            }
        }
    }

    fn existing(&self, artifact_key: &str, package_etag: &str) -> Result<Existing> {
        let head = match self.store.get_prefix(artifact_key, MANIFEST_READ_LEN) {
            Ok(head) => head,
            Err(StoreError::NotFound(_)) => return Ok(Existing::Absent),
            Err(err) => return Err(err.into()),
        };

        match PackageArtifact::read_manifest(&head) {
            Ok(manifest) if manifest.checksum == package_etag => Ok(Existing::Current),
            Ok(_) => Ok(Existing::Stale),
            Err(err) => {
                warn!(artifact = artifact_key, error = %err, "unreadable artifact, regenerating");
                Ok(Existing::Stale)
            }
        }
    }

    fn reject(
        &self,
        package_key: &str,
        artifact_key: &str,
        etag: &str,
        reason: String,
    ) -> Result<MetadataOutcome> {
        // An artifact left over from a previous upload must never outlive its
        // package, so it goes first. An interrupted run leaves a package
        // without artifact, which the next run indexes and rejects again.
        self.store.delete(artifact_key)?;
        let Some(destination) = move_to_rejected(self.store, self.layout, package_key, etag)? else {
            return Ok(MetadataOutcome::PackageMissing);
        };
        warn!(package = package_key, %destination, %reason, "indexing tool refused package");
        Ok(MetadataOutcome::Rejected {
            destination,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use rpmrepo_config::policy::LayoutKind;
    use rpmrepo_package::fixtures::RpmBuilder;
    use rpmrepo_store::{MemoryStore, StoreOp};

    use super::*;
    use crate::tools::fake::FakeIndexer;

    const KEY: &str = "el/8/demo-1.0.0-1.el8.x86_64.rpm";
    const ARTIFACT: &str = "el/8/demo-1.0.0-1.el8.x86_64.package";

    fn layout() -> RepoLayout {
        RepoLayout::new(LayoutKind::Distribution, "upload", "rejected")
    }

    fn store_with(bytes: &[u8]) -> MemoryStore {
        let store = MemoryStore::new();
        store.put(KEY, bytes).unwrap();
        store
    }

    #[test]
    fn test_creates_artifact_once() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").build();
        let store = store_with(&bytes);
        let layout = layout();
        let indexer = FakeIndexer::new();
        let generator = MetadataGenerator::new(&store, &layout, &indexer);

        assert_eq!(generator.ensure_metadata(KEY).unwrap(), MetadataOutcome::Created);
        let first = store.get(ARTIFACT).unwrap();

        assert_eq!(
            generator.ensure_metadata(KEY).unwrap(),
            MetadataOutcome::AlreadyPresent
        );
        assert_eq!(indexer.calls(), 1);
        assert_eq!(store.get(ARTIFACT).unwrap(), first);

        let artifact = PackageArtifact::decode(&first).unwrap();
        assert_eq!(artifact.manifest().package, KEY);
        assert_eq!(artifact.manifest().checksum, rpmrepo_utils::hash::hash_bytes(&bytes));
        assert!(artifact.files().any(|(name, _)| name == "repodata/repomd.xml"));
    }

    #[test]
    fn test_regeneration_is_bit_identical() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").build();
        let layout = layout();
        let indexer = FakeIndexer::new();

        let first = store_with(&bytes);
        MetadataGenerator::new(&first, &layout, &indexer)
            .ensure_metadata(KEY)
            .unwrap();
        let second = store_with(&bytes);
        MetadataGenerator::new(&second, &layout, &indexer)
            .ensure_metadata(KEY)
            .unwrap();

        assert_eq!(first.get(ARTIFACT).unwrap(), second.get(ARTIFACT).unwrap());
    }

    #[test]
    fn test_stale_artifact_is_refreshed() {
        let layout = layout();
        let indexer = FakeIndexer::new();
        let store = store_with(&RpmBuilder::new("demo", "1.0.0", "1.el8").payload("old").build());
        let generator = MetadataGenerator::new(&store, &layout, &indexer);
        generator.ensure_metadata(KEY).unwrap();

        let replacement = RpmBuilder::new("demo", "1.0.0", "1.el8").payload("new").build();
        store.put(KEY, &replacement).unwrap();

        assert_eq!(generator.ensure_metadata(KEY).unwrap(), MetadataOutcome::Refreshed);
        let artifact = PackageArtifact::decode(&store.get(ARTIFACT).unwrap()).unwrap();
        assert_eq!(
            artifact.manifest().checksum,
            rpmrepo_utils::hash::hash_bytes(&replacement)
        );
        assert!(store.keys().iter().all(|key| !key.starts_with(".staging/")));
    }

    #[test]
    fn test_freshness_reads_only_the_manifest() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").build();
        let layout = layout();
        let indexer = FakeIndexer::new();
        let store = store_with(&bytes);

        let dir = tempfile::tempdir().unwrap();
        let repodata = dir.path().join("repodata");
        std::fs::create_dir_all(&repodata).unwrap();
        std::fs::write(repodata.join("repomd.xml"), "<repomd/>").unwrap();
        let mut state = 0x9e37_79b9_7f4a_7c15_u64;
        let noise: Vec<u8> = (0..256 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        std::fs::write(repodata.join("abc-other.xml.gz"), &noise).unwrap();
        let manifest = ArtifactManifest::new(
            KEY,
            &rpmrepo_utils::hash::hash_bytes(&bytes),
            bytes.len() as u64,
        );
        let encoded = PackageArtifact::from_repo_dir(manifest, dir.path())
            .unwrap()
            .encode()
            .unwrap();
        // Only the leading part is usable; the tail is never read.
        store.put(ARTIFACT, &encoded[..2 * MANIFEST_READ_LEN]).unwrap();

        assert_eq!(
            MetadataGenerator::new(&store, &layout, &indexer)
                .ensure_metadata(KEY)
                .unwrap(),
            MetadataOutcome::AlreadyPresent
        );
        assert_eq!(indexer.calls(), 0);
    }

    #[test]
    fn test_corrupt_artifact_is_replaced() {
        let layout = layout();
        let indexer = FakeIndexer::new();
        let store = store_with(&RpmBuilder::new("demo", "1.0.0", "1.el8").build());
        store.put(ARTIFACT, b"garbage").unwrap();

        let generator = MetadataGenerator::new(&store, &layout, &indexer);
        assert_eq!(generator.ensure_metadata(KEY).unwrap(), MetadataOutcome::Refreshed);
        assert!(PackageArtifact::decode(&store.get(ARTIFACT).unwrap()).is_ok());
    }

    #[test]
    fn test_refused_package_is_rejected() {
        let layout = layout();
        let indexer = FakeIndexer::new().refuse("demo");
        let store = store_with(&RpmBuilder::new("demo", "1.0.0", "1.el8").build());

        let outcome = MetadataGenerator::new(&store, &layout, &indexer)
            .ensure_metadata(KEY)
            .unwrap();

        assert!(matches!(outcome, MetadataOutcome::Rejected { .. }));
        assert_eq!(store.keys(), vec!["rejected/demo-1.0.0-1.el8.x86_64.rpm"]);
    }

    #[test]
    fn test_interrupted_rejection_leaves_no_orphan_artifact() {
        let layout = layout();
        let indexer = FakeIndexer::new().refuse("demo");
        let store = store_with(&RpmBuilder::new("demo", "1.0.0", "1.el8").build());
        store.put(ARTIFACT, b"left over from an earlier upload").unwrap();
        store.fail_next(StoreOp::MoveIfAbsent, KEY);

        let generator = MetadataGenerator::new(&store, &layout, &indexer);
        let err = generator.ensure_metadata(KEY).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.keys(), vec![KEY]);

        let outcome = generator.ensure_metadata(KEY).unwrap();
        assert!(matches!(outcome, MetadataOutcome::Rejected { .. }));
        assert_eq!(store.keys(), vec!["rejected/demo-1.0.0-1.el8.x86_64.rpm"]);
    }

    #[test]
    fn test_failed_artifact_removal_keeps_package() {
        let layout = layout();
        let indexer = FakeIndexer::new().refuse("demo");
        let store = store_with(&RpmBuilder::new("demo", "1.0.0", "1.el8").build());
        store.put(ARTIFACT, b"left over from an earlier upload").unwrap();
        store.fail_next(StoreOp::Delete, ARTIFACT);

        let generator = MetadataGenerator::new(&store, &layout, &indexer);
        assert!(generator.ensure_metadata(KEY).unwrap_err().is_retryable());
        assert_eq!(store.keys(), vec![ARTIFACT, KEY]);

        assert!(matches!(
            generator.ensure_metadata(KEY).unwrap(),
            MetadataOutcome::Rejected { .. }
        ));
        assert_eq!(store.keys(), vec!["rejected/demo-1.0.0-1.el8.x86_64.rpm"]);
    }

    #[test]
    fn test_missing_package() {
        let store = MemoryStore::new();
        let layout = layout();
        let indexer = FakeIndexer::new();
        assert_eq!(
            MetadataGenerator::new(&store, &layout, &indexer)
                .ensure_metadata(KEY)
                .unwrap(),
            MetadataOutcome::PackageMissing
        );
        assert_eq!(indexer.calls(), 0);
    }

    #[test]
    fn test_failed_upload_leaves_nothing() {
        let layout = layout();
        let indexer = FakeIndexer::new();
        let store = store_with(&RpmBuilder::new("demo", "1.0.0", "1.el8").build());
        store.fail_next(StoreOp::PutIfAbsent, ARTIFACT);

        let generator = MetadataGenerator::new(&store, &layout, &indexer);
        let err = generator.ensure_metadata(KEY).unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.exists(ARTIFACT).unwrap());

        assert_eq!(generator.ensure_metadata(KEY).unwrap(), MetadataOutcome::Created);
    }

    #[test]
    fn test_concurrent_generation_converges() {
        let layout = layout();
        let indexer = FakeIndexer::new();
        let store = store_with(&RpmBuilder::new("demo", "1.0.0", "1.el8").build());

        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        MetadataGenerator::new(&store, &layout, &indexer)
                            .ensure_metadata(KEY)
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let created = outcomes
            .iter()
            .filter(|outcome| **outcome == MetadataOutcome::Created)
            .count();
        assert_eq!(created, 1);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, MetadataOutcome::Created | MetadataOutcome::AlreadyPresent)));
        assert_eq!(
            store.keys(),
            vec![ARTIFACT, KEY]
        );
    }
}

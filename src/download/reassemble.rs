//! Ordered concatenation of segment artifacts into the final output.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::client::{remove_partial, with_suffix};
use super::segment::SegmentArtifact;

/// Errors that can occur while combining artifacts.
#[derive(Debug, Error)]
pub enum ReassemblyError {
    /// Nothing to combine.
    #[error("no segment artifacts to combine")]
    NoArtifacts,

    /// Two artifacts claim the same position.
    #[error("duplicate artifact for segment {index}")]
    DuplicateIndex {
        /// The repeated index.
        index: usize,
    },

    /// Reading an artifact or writing the output failed.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ReassemblyError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Streams artifacts into one output file in index order.
///
/// Output is written to `<output>.partial` and renamed into place after an
/// fsync, so the final path never holds a truncated file. Artifacts are
/// deleted only after the rename succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reassembler;

impl Reassembler {
    /// Combines `artifacts` into `output_path` and returns the bytes written.
    ///
    /// Input order does not matter. After a successful rename the artifact
    /// files are deleted and their directories removed if left empty.
    ///
    /// # Errors
    ///
    /// - [`ReassemblyError::NoArtifacts`] for an empty list
    /// - [`ReassemblyError::DuplicateIndex`] if an index repeats
    /// - [`ReassemblyError::Io`] if an artifact cannot be read or the output
    ///   cannot be written; the `.partial` file is removed and the artifacts
    ///   are left in place
    #[instrument(skip(artifacts), fields(count = artifacts.len(), output = %output_path.display()))]
    pub async fn combine(
        mut artifacts: Vec<SegmentArtifact>,
        output_path: &Path,
    ) -> Result<u64, ReassemblyError> {
        if artifacts.is_empty() {
            return Err(ReassemblyError::NoArtifacts);
        }

        artifacts.sort_by_key(|artifact| artifact.index);
        if let Some(pair) = artifacts.windows(2).find(|w| w[0].index == w[1].index) {
            return Err(ReassemblyError::DuplicateIndex {
                index: pair[0].index,
            });
        }

        let partial_path = with_suffix(output_path, ".partial");
        let result = match write_partial(&artifacts, &partial_path).await {
            Ok(bytes) => tokio::fs::rename(&partial_path, output_path)
                .await
                .map(|()| bytes)
                .map_err(|e| ReassemblyError::io(output_path, e)),
            Err(e) => Err(e),
        };

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %partial_path.display(), "removing partial output after error");
                remove_partial(&partial_path).await;
                return Err(e);
            }
        };

        remove_artifacts(&artifacts).await;
        info!(bytes, segments = artifacts.len(), "output assembled");
        Ok(bytes)
    }
}

async fn write_partial(
    artifacts: &[SegmentArtifact],
    partial_path: &Path,
) -> Result<u64, ReassemblyError> {
    let file = File::create(partial_path)
        .await
        .map_err(|e| ReassemblyError::io(partial_path, e))?;
    let mut writer = BufWriter::new(file);
    let mut total: u64 = 0;

    for artifact in artifacts {
        let mut source = File::open(&artifact.path)
            .await
            .map_err(|e| ReassemblyError::io(&artifact.path, e))?;
        let copied = tokio::io::copy(&mut source, &mut writer)
            .await
            .map_err(|e| ReassemblyError::io(partial_path, e))?;
        debug!(index = artifact.index, bytes = copied, "appended segment");
        total += copied;
    }

    writer
        .flush()
        .await
        .map_err(|e| ReassemblyError::io(partial_path, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| ReassemblyError::io(partial_path, e))?;

    Ok(total)
}

/// Best-effort removal of artifacts and their now-empty directories.
async fn remove_artifacts(artifacts: &[SegmentArtifact]) {
    let mut dirs = BTreeSet::new();
    for artifact in artifacts {
        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            warn!(path = %artifact.path.display(), error = %e, "failed to remove segment artifact");
        }
        if let Some(parent) = artifact.path.parent() {
            dirs.insert(parent.to_path_buf());
        }
    }

    for dir in dirs {
        // Fails harmlessly if other files remain.
        if tokio::fs::remove_dir(&dir).await.is_ok() {
            debug!(dir = %dir.display(), "removed artifact directory");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::segment::artifact_path;

    async fn write_artifact(dir: &Path, index: usize, bytes: &[u8]) -> SegmentArtifact {
        let path = artifact_path(dir, index);
        tokio::fs::write(&path, bytes).await.unwrap();
        SegmentArtifact { index, path }
    }

    #[tokio::test]
    async fn test_combine_orders_by_index_not_input_order() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact_dir = tmp.path().join(".out.ts.segments");
        tokio::fs::create_dir(&artifact_dir).await.unwrap();

        let artifacts = vec![
            write_artifact(&artifact_dir, 2, b"CC").await,
            write_artifact(&artifact_dir, 0, b"A").await,
            write_artifact(&artifact_dir, 1, b"BBB").await,
        ];
        let output = tmp.path().join("out.ts");

        let bytes = Reassembler::combine(artifacts, &output).await.unwrap();

        assert_eq!(bytes, 6);
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"ABBBCC");
    }

    #[tokio::test]
    async fn test_combine_removes_artifacts_and_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact_dir = tmp.path().join(".out.ts.segments");
        tokio::fs::create_dir(&artifact_dir).await.unwrap();
        let artifacts = vec![
            write_artifact(&artifact_dir, 0, b"x").await,
            write_artifact(&artifact_dir, 1, b"y").await,
        ];
        let output = tmp.path().join("out.ts");

        Reassembler::combine(artifacts, &output).await.unwrap();

        assert!(!artifact_dir.exists());
        assert!(!with_suffix(&output, ".partial").exists());
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_combine_keeps_dir_with_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        let artifacts = vec![write_artifact(tmp.path(), 0, b"x").await];
        tokio::fs::write(tmp.path().join("notes.txt"), b"keep")
            .await
            .unwrap();
        let output = tmp.path().join("out.ts");

        Reassembler::combine(artifacts, &output).await.unwrap();

        assert!(tmp.path().join("notes.txt").exists());
        assert!(!artifact_path(tmp.path(), 0).exists());
    }

    #[tokio::test]
    async fn test_combine_rejects_duplicate_index() {
        let tmp = tempfile::tempdir().unwrap();
        let first = write_artifact(tmp.path(), 4, b"a").await;
        let duplicate = SegmentArtifact {
            index: 4,
            path: first.path.clone(),
        };
        let output = tmp.path().join("out.ts");

        let result = Reassembler::combine(vec![first, duplicate], &output).await;

        assert!(matches!(
            result,
            Err(ReassemblyError::DuplicateIndex { index: 4 })
        ));
        assert!(!output.exists());
        assert!(artifact_path(tmp.path(), 4).exists());
    }

    #[tokio::test]
    async fn test_combine_empty_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Reassembler::combine(Vec::new(), &tmp.path().join("out.ts")).await;
        assert!(matches!(result, Err(ReassemblyError::NoArtifacts)));
    }

    #[tokio::test]
    async fn test_combine_missing_artifact_leaves_no_output() {
        let tmp = tempfile::tempdir().unwrap();
        let present = write_artifact(tmp.path(), 0, b"x").await;
        let missing = SegmentArtifact {
            index: 1,
            path: artifact_path(tmp.path(), 1),
        };
        let output = tmp.path().join("out.ts");

        let result = Reassembler::combine(vec![present, missing], &output).await;

        assert!(matches!(result, Err(ReassemblyError::Io { .. })));
        assert!(!output.exists());
        assert!(!with_suffix(&output, ".partial").exists());
        assert!(artifact_path(tmp.path(), 0).exists());
    }

    #[tokio::test]
    async fn test_combine_replaces_existing_output() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("out.ts");
        tokio::fs::write(&output, b"stale contents").await.unwrap();
        let artifacts = vec![write_artifact(tmp.path(), 0, b"fresh").await];

        Reassembler::combine(artifacts, &output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"fresh");
    }
}

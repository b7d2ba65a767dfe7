//! Result materializer.
//!
//! Fetches a provider-hosted artifact, writes it under
//! `<upload_root>/<kind dir>/<provider>-<uuid>.<ext>` and, when Cloudinary is
//! configured, mirrors it. A failed mirror does not fail the
//! materialization; it is recorded on the asset and can be retried with
//! [`Materializer::retry_mirror`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use manara_core::asset::{ArtifactDescriptor, MirrorOutcome, ResultAsset};
use manara_core::error::CoreError;
use manara_core::job::{GenerationJob, JobStatus};

use crate::cloudinary;
use crate::config::{CloudinaryConfig, StorageConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Materializer {
    client: reqwest::Client,
    config: StorageConfig,
}

impl Materializer {
    pub fn new(config: StorageConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    /// Download `descriptor`, persist it for `job`, and mirror it.
    ///
    /// `bearer` is sent only when the descriptor requires auth.
    pub async fn materialize(
        &self,
        job: &GenerationJob,
        descriptor: &ArtifactDescriptor,
        bearer: Option<&str>,
    ) -> Result<ResultAsset, CoreError> {
        if job.status != JobStatus::Succeeded {
            return Err(CoreError::Internal(format!(
                "Job {} is {:?}; only succeeded jobs are materialized",
                job.job_id, job.status
            )));
        }
        let cloudinary = self.config.cloudinary.resolve()?;
        let bytes = self.download(descriptor, bearer).await?;

        let kind = descriptor.kind;
        let file_name = format!(
            "{}-{}.{}",
            job.provider,
            uuid::Uuid::new_v4(),
            descriptor.extension
        );
        let dir = self.config.upload_root.join(kind.directory());
        let local_path = write_atomically(&dir, &file_name, &bytes).await?;
        let public_url = format!(
            "{}/uploads/{}/{file_name}",
            self.config.public_base_url.trim_end_matches('/'),
            kind.directory()
        );

        let mut asset = ResultAsset::from_job(
            job,
            descriptor,
            file_name,
            local_path,
            public_url,
            bytes.len() as u64,
        )?;
        tracing::info!(
            job_id = %job.job_id,
            path = %asset.local_path.display(),
            size_bytes = asset.size_bytes,
            "Artifact materialized",
        );

        if let Some(cloudinary) = cloudinary {
            let outcome = self.mirror(&cloudinary, &asset, bytes).await;
            asset.mirror = outcome;
        }
        Ok(asset)
    }

    /// Retry only the mirror step for an already materialized asset.
    ///
    /// Reads the local file back; the provider URL is not contacted.
    pub async fn retry_mirror(&self, asset: &mut ResultAsset) -> Result<(), CoreError> {
        let Some(cloudinary) = self.config.cloudinary.resolve()? else {
            asset.mirror = MirrorOutcome::Skipped;
            return Ok(());
        };
        let bytes = tokio::fs::read(&asset.local_path).await.map_err(|e| {
            CoreError::Storage(format!(
                "Failed to read {}: {e}",
                asset.local_path.display()
            ))
        })?;

        let outcome = self.mirror(&cloudinary, asset, Bytes::from(bytes)).await;
        asset.mirror = outcome;
        match &asset.mirror {
            MirrorOutcome::Failed { error } => Err(CoreError::Storage(error.clone())),
            _ => Ok(()),
        }
    }

    async fn download(
        &self,
        descriptor: &ArtifactDescriptor,
        bearer: Option<&str>,
    ) -> Result<Bytes, CoreError> {
        let timeout = self.config.download_timeout;
        let mut request = self.client.get(&descriptor.url).timeout(timeout);
        if descriptor.requires_auth {
            match bearer {
                Some(token) => request = request.bearer_auth(token),
                None => tracing::warn!(
                    url = %descriptor.url,
                    "Artifact requires auth but no credential is configured",
                ),
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| download_error(&descriptor.url, timeout, e))?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(url = %descriptor.url, %status, "Artifact download rejected");
            return Err(CoreError::Download(format!(
                "Artifact download returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(&descriptor.url, timeout, e))?;
        if bytes.is_empty() {
            tracing::error!(url = %descriptor.url, "Artifact download was empty");
            return Err(CoreError::Download("Artifact download was empty".into()));
        }
        Ok(bytes)
    }

    async fn mirror(
        &self,
        config: &CloudinaryConfig,
        asset: &ResultAsset,
        bytes: Bytes,
    ) -> MirrorOutcome {
        let public_id = cloudinary::public_id(asset.kind.directory(), &asset.file_name);
        let uploaded =
            cloudinary::upload_raw(&self.client, config, &public_id, &asset.file_name, bytes).await;
        match uploaded {
            Ok(url) => {
                tracing::info!(file = %asset.file_name, url = %url, "Artifact mirrored");
                MirrorOutcome::Mirrored { url }
            }
            Err(e) => {
                tracing::error!(file = %asset.file_name, error = %e, "Artifact mirror failed");
                MirrorOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

fn download_error(url: &str, timeout: Duration, err: reqwest::Error) -> CoreError {
    tracing::error!(url, error = %err, "Artifact download failed");
    if err.is_timeout() {
        CoreError::Timeout {
            operation: "downloading the artifact",
            after: timeout,
        }
    } else {
        CoreError::Download(format!("Artifact download failed: {err}"))
    }
}

/// Write `bytes` to `dir/file_name` via a `.part` sibling and a rename, so
/// the final name only ever holds a complete file.
async fn write_atomically(
    dir: &Path,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf, CoreError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CoreError::Storage(format!("Failed to create {}: {e}", dir.display())))?;

    let final_path = dir.join(file_name);
    let part_path = dir.join(format!("{file_name}.part"));

    let written = match tokio::fs::write(&part_path, bytes).await {
        Ok(()) => tokio::fs::rename(&part_path, &final_path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&part_path).await;
        tracing::error!(path = %final_path.display(), error = %e, "Failed to persist artifact");
        return Err(CoreError::Storage(format!(
            "Failed to write {}: {e}",
            final_path.display()
        )));
    }
    Ok(final_path)
}

//! Artifact descriptors and materialized result assets.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::CoreError;
use crate::job::{GenerationJob, JobStatus, ProviderKind};

/// Image extensions kept as-is on materialized files.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Model,
    Image,
}

impl AssetKind {
    /// Default file extension for materialized files of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Model => "glb",
            Self::Image => "png",
        }
    }

    /// Sub-directory of the upload root holding files of this kind.
    pub fn directory(self) -> &'static str {
        match self {
            Self::Model => "3d",
            Self::Image => "images",
        }
    }
}

/// Pointer to a provider-hosted result, prior to being downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    /// Absolute, time-limited URL of the artifact.
    pub url: String,
    /// Whether fetching requires the same bearer credential used to create the job.
    pub requires_auth: bool,
    pub kind: AssetKind,
    /// Extension the materialized file is written with.
    pub extension: &'static str,
}

impl ArtifactDescriptor {
    /// A GLB model at `url`.
    pub fn model(url: impl Into<String>, requires_auth: bool) -> Self {
        Self {
            url: url.into(),
            requires_auth,
            kind: AssetKind::Model,
            extension: AssetKind::Model.extension(),
        }
    }

    /// Classify `url` by the extension of its last path segment.
    ///
    /// Known image extensions yield an image with that extension; anything
    /// else is treated as a GLB model.
    pub fn from_url(url: impl Into<String>, requires_auth: bool) -> Self {
        let url = url.into();
        match image_extension(&url) {
            Some(extension) => Self {
                url,
                requires_auth,
                kind: AssetKind::Image,
                extension,
            },
            None => Self::model(url, requires_auth),
        }
    }
}

fn image_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Result of mirroring a materialized file to the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MirrorOutcome {
    /// No object store configured.
    Skipped,
    Mirrored { url: String },
    /// Local write succeeded but the remote copy did not.
    Failed { error: String },
}

impl MirrorOutcome {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Mirrored { url } => Some(url),
            _ => None,
        }
    }
}

/// A generated artifact persisted locally (and possibly mirrored).
#[derive(Debug, Clone, Serialize)]
pub struct ResultAsset {
    pub kind: AssetKind,
    pub provider: ProviderKind,
    /// Provider-hosted origin of the bytes.
    pub source_url: String,
    pub file_name: String,
    pub local_path: PathBuf,
    pub public_url: String,
    pub size_bytes: u64,
    pub mirror: MirrorOutcome,
}

impl ResultAsset {
    /// Build an asset for `job`. Only succeeded jobs may produce one.
    pub fn from_job(
        job: &GenerationJob,
        descriptor: &ArtifactDescriptor,
        file_name: String,
        local_path: PathBuf,
        public_url: String,
        size_bytes: u64,
    ) -> Result<Self, CoreError> {
        if job.status != JobStatus::Succeeded {
            return Err(CoreError::Internal(format!(
                "Job {} is {:?}; only succeeded jobs produce assets",
                job.job_id, job.status
            )));
        }
        Ok(Self {
            kind: descriptor.kind,
            provider: job.provider,
            source_url: descriptor.url.clone(),
            file_name,
            local_path,
            public_url,
            size_bytes,
            mirror: MirrorOutcome::Skipped,
        })
    }
}

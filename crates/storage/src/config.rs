//! Storage configuration: local upload root, public URL prefix, and the
//! optional Cloudinary mirror.

use std::path::PathBuf;
use std::time::Duration;

use manara_core::error::CoreError;

pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MIRROR_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CLOUDINARY_API_URL: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory served under `/uploads`.
    pub upload_root: PathBuf,
    /// Origin prefixed to `/uploads/...` in returned URLs.
    pub public_base_url: String,
    pub download_timeout: Duration,
    pub cloudinary: CloudinaryCredentials,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_root: PathBuf::from(DEFAULT_UPLOAD_DIR),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            cloudinary: CloudinaryCredentials::default(),
        }
    }
}

/// Cloudinary settings as read from the environment. Either all three
/// credentials are set or none are.
#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    /// `CLOUDINARY_CLOUD_NAME`.
    pub cloud_name: Option<String>,
    /// `CLOUDINARY_API_KEY`.
    pub api_key: Option<String>,
    /// `CLOUDINARY_API_SECRET`.
    pub api_secret: Option<String>,
    /// Upload API base, overridable for tests.
    pub api_url: String,
    pub timeout: Duration,
}

impl Default for CloudinaryCredentials {
    fn default() -> Self {
        Self {
            cloud_name: None,
            api_key: None,
            api_secret: None,
            api_url: DEFAULT_CLOUDINARY_API_URL.to_string(),
            timeout: DEFAULT_MIRROR_TIMEOUT,
        }
    }
}

/// Complete Cloudinary settings, ready to sign uploads.
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl CloudinaryCredentials {
    /// `Ok(None)` when mirroring is off, `Ok(Some)` when fully configured.
    ///
    /// A partial set is a configuration error naming the missing variables.
    pub fn resolve(&self) -> Result<Option<CloudinaryConfig>, CoreError> {
        let fields = [
            ("CLOUDINARY_CLOUD_NAME", present(&self.cloud_name)),
            ("CLOUDINARY_API_KEY", present(&self.api_key)),
            ("CLOUDINARY_API_SECRET", present(&self.api_secret)),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();

        match (fields[0].1, fields[1].1, fields[2].1) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Ok(Some(CloudinaryConfig {
                cloud_name: cloud_name.to_string(),
                api_key: api_key.to_string(),
                api_secret: api_secret.to_string(),
                api_url: self.api_url.trim_end_matches('/').to_string(),
                timeout: self.timeout,
            })),
            _ if missing.len() == fields.len() => Ok(None),
            _ => Err(CoreError::Configuration(format!(
                "Cloudinary is partially configured; missing {}",
                missing.join(", ")
            ))),
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

//! Signed raw uploads to Cloudinary.

use bytes::Bytes;
use manara_core::error::CoreError;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::CloudinaryConfig;

/// Folder prefix for mirrored public ids.
const PUBLIC_ID_PREFIX: &str = "manara";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Compute a SHA-256 hex digest of the given bytes.
fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Upload signature: SHA-256 over the sorted signed parameters followed by
/// the API secret.
pub fn sign(public_id: &str, timestamp: i64, api_secret: &str) -> String {
    sha256_hex(format!("public_id={public_id}&timestamp={timestamp}{api_secret}").as_bytes())
}

/// Public id for a materialized file: `manara/<dir>/<stem>`.
pub fn public_id(directory: &str, file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    format!("{PUBLIC_ID_PREFIX}/{directory}/{stem}")
}

/// Upload `bytes` as a raw asset and return its HTTPS URL.
pub async fn upload_raw(
    client: &reqwest::Client,
    config: &CloudinaryConfig,
    public_id: &str,
    file_name: &str,
    bytes: Bytes,
) -> Result<String, CoreError> {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign(public_id, timestamp, &config.api_secret);

    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(file_name.to_string()),
        )
        .text("api_key", config.api_key.clone())
        .text("public_id", public_id.to_string())
        .text("timestamp", timestamp.to_string())
        .text("signature", signature)
        .text("signature_algorithm", "sha256");

    let response = client
        .post(format!("{}/{}/raw/upload", config.api_url, config.cloud_name))
        .multipart(form)
        .timeout(config.timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                CoreError::Timeout {
                    operation: "mirroring to Cloudinary",
                    after: config.timeout,
                }
            } else {
                CoreError::Storage(format!("Cloudinary upload failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(CoreError::Storage(format!(
            "Cloudinary upload returned {status}: {body}"
        )));
    }

    let uploaded: UploadResponse = response
        .json()
        .await
        .map_err(|e| CoreError::Storage(format!("Cloudinary returned an unexpected body: {e}")))?;
    uploaded
        .secure_url
        .or(uploaded.url)
        .ok_or_else(|| CoreError::Storage("Cloudinary response carried no URL".into()))
}

//! Generation inputs: accepted image types, input validation, and the
//! independently defaulted parameter record sent to providers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Accepted inputs
// ---------------------------------------------------------------------------

/// MIME types accepted as generation input.
pub const ACCEPTED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/webp"];

/// An uploaded image, validated before any network I/O.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Bytes,
    pub mime_type: String,
    /// Client-supplied name, used only for the multipart upload label.
    pub file_name: String,
}

impl ImageInput {
    /// Build and validate an input image.
    pub fn new(
        bytes: impl Into<Bytes>,
        mime_type: &str,
        file_name: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let bytes = bytes.into();
        let mime_type = validate_image_input(&bytes, mime_type)?;
        Ok(Self {
            bytes,
            mime_type,
            file_name: file_name.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Validate an image buffer and MIME type, returning the normalized MIME type.
///
/// Parameters such as `; charset=` are stripped before matching.
pub fn validate_image_input(bytes: &[u8], mime_type: &str) -> Result<String, CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::Validation("Image must not be empty".into()));
    }
    let normalized = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if !ACCEPTED_IMAGE_TYPES.contains(&normalized.as_str()) {
        return Err(CoreError::Validation(format!(
            "Unsupported image type '{mime_type}'. Must be one of: {}",
            ACCEPTED_IMAGE_TYPES.join(", ")
        )));
    }
    Ok(normalized)
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

pub const DEFAULT_SS_GUIDANCE_STRENGTH: f64 = 7.5;
pub const DEFAULT_SS_SAMPLING_STEPS: u32 = 12;
pub const DEFAULT_SLAT_GUIDANCE_STRENGTH: f64 = 3.0;
pub const DEFAULT_SLAT_SAMPLING_STEPS: u32 = 12;
pub const DEFAULT_MESH_SIMPLIFY: f64 = 0.95;
pub const DEFAULT_TEXTURE_SIZE: u32 = 1024;

/// Multi-image conditioning strategies understood by TRELLIS.
pub const VALID_MULTIIMAGE_ALGOS: &[&str] = &["stochastic", "multidiffusion"];

/// Upper bound on sampling steps for either stage.
pub const MAX_SAMPLING_STEPS: u32 = 50;

/// Generation parameters. Every field has its own default, so callers may
/// supply any subset (e.g. `{"seed": 42}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub seed: u64,
    pub randomize_seed: bool,
    pub ss_guidance_strength: f64,
    pub ss_sampling_steps: u32,
    pub slat_guidance_strength: f64,
    pub slat_sampling_steps: u32,
    pub multiimage_algo: String,
    pub mesh_simplify: f64,
    pub texture_size: u32,
    pub enable_pbr: bool,
    pub should_remesh: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            seed: 0,
            randomize_seed: true,
            ss_guidance_strength: DEFAULT_SS_GUIDANCE_STRENGTH,
            ss_sampling_steps: DEFAULT_SS_SAMPLING_STEPS,
            slat_guidance_strength: DEFAULT_SLAT_GUIDANCE_STRENGTH,
            slat_sampling_steps: DEFAULT_SLAT_SAMPLING_STEPS,
            multiimage_algo: "stochastic".into(),
            mesh_simplify: DEFAULT_MESH_SIMPLIFY,
            texture_size: DEFAULT_TEXTURE_SIZE,
            enable_pbr: true,
            should_remesh: true,
        }
    }
}

impl GenerationParams {
    /// Parse from a JSON string, treating an empty string as all defaults.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let params: Self = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Invalid generation parameters: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_guidance("ss_guidance_strength", self.ss_guidance_strength)?;
        validate_guidance("slat_guidance_strength", self.slat_guidance_strength)?;
        validate_steps("ss_sampling_steps", self.ss_sampling_steps)?;
        validate_steps("slat_sampling_steps", self.slat_sampling_steps)?;

        if !(0.0..=1.0).contains(&self.mesh_simplify) {
            return Err(CoreError::Validation(format!(
                "mesh_simplify must be between 0 and 1, got {}",
                self.mesh_simplify
            )));
        }
        if !(512..=2048).contains(&self.texture_size) {
            return Err(CoreError::Validation(format!(
                "texture_size must be between 512 and 2048, got {}",
                self.texture_size
            )));
        }
        if !VALID_MULTIIMAGE_ALGOS.contains(&self.multiimage_algo.as_str()) {
            return Err(CoreError::Validation(format!(
                "Invalid multiimage_algo '{}'. Must be one of: {}",
                self.multiimage_algo,
                VALID_MULTIIMAGE_ALGOS.join(", ")
            )));
        }
        Ok(())
    }
}

fn validate_guidance(field: &str, value: f64) -> Result<(), CoreError> {
    if value.is_finite() && (0.0..=10.0).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{field} must be between 0 and 10, got {value}"
        )))
    }
}

fn validate_steps(field: &str, value: u32) -> Result<(), CoreError> {
    if (1..=MAX_SAMPLING_STEPS).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{field} must be between 1 and {MAX_SAMPLING_STEPS}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_image_rejected() {
        assert_matches!(
            validate_image_input(&[], "image/png"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn unsupported_mime_rejected() {
        assert_matches!(
            validate_image_input(&[1, 2, 3], "application/pdf"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn mime_is_normalized() {
        let mime = validate_image_input(&[1], "Image/JPEG; charset=binary").unwrap();
        assert_eq!(mime, "image/jpeg");
    }

    #[test]
    fn image_input_keeps_bytes() {
        let input = ImageInput::new(vec![9u8, 8, 7], "image/webp", "room.webp").unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input.mime_type, "image/webp");
    }

    #[test]
    fn partial_params_use_defaults() {
        let params =
            GenerationParams::from_json(r#"{"seed": 42, "randomize_seed": false}"#).unwrap();
        assert_eq!(params.seed, 42);
        assert!(!params.randomize_seed);
        assert_eq!(params.ss_sampling_steps, DEFAULT_SS_SAMPLING_STEPS);
        assert!(params.enable_pbr);
    }

    #[test]
    fn blank_params_are_defaults() {
        assert_eq!(GenerationParams::from_json("  ").unwrap(), GenerationParams::default());
    }

    #[test]
    fn out_of_range_params_rejected() {
        assert!(GenerationParams::from_json(r#"{"ss_sampling_steps": 0}"#).is_err());
        assert!(GenerationParams::from_json(r#"{"mesh_simplify": 1.5}"#).is_err());
        assert!(GenerationParams::from_json(r#"{"texture_size": 4096}"#).is_err());
        assert!(GenerationParams::from_json(r#"{"slat_guidance_strength": -1}"#).is_err());
        assert!(GenerationParams::from_json(r#"{"multiimage_algo": "average"}"#).is_err());
    }

    #[test]
    fn malformed_params_rejected() {
        assert_matches!(
            GenerationParams::from_json("{not json"),
            Err(CoreError::Validation(_))
        );
    }
}

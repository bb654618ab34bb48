use serde::{Deserialize, Serialize};

use crate::aead::AeadAlgorithm;
use crate::error::Result;
use crate::params::{AssetClass, CipherParams};

/// What to do when a caller-supplied key does not re-derive from the asset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Log and continue with the re-derived (or a fresh) key.
    #[default]
    Regenerate,
    Strict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistortionLevel {
    Light,
    Standard,
    Heavy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherConfig {
    pub meshes_params: CipherParams,
    pub images_params: CipherParams,
    pub encrypt_images: bool,
    pub algorithm: AeadAlgorithm,
    pub key_policy: KeyPolicy,
    /// Freshness window in seconds applied on decryption.
    pub ttl: Option<u64>,
}

impl CipherConfig {
    pub fn new(meshes_params: CipherParams, images_params: CipherParams) -> Self {
        Self {
            meshes_params,
            images_params,
            ..Self::default()
        }
    }

    pub fn with_images(mut self, encrypt_images: bool) -> Self {
        self.encrypt_images = encrypt_images;
        self
    }

    pub fn with_algorithm(mut self, algorithm: AeadAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_key_policy(mut self, key_policy: KeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<u64>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replaces the mesh tier widths, validating them.
    pub fn with_mesh_widths(mut self, p: u32, q: u32, r: u32) -> Result<Self> {
        self.meshes_params = CipherParams::mesh(p, q, r)?;
        Ok(self)
    }

    pub fn with_image_widths(mut self, p: u32, q: u32, r: u32) -> Result<Self> {
        self.images_params = CipherParams::image(p, q, r)?;
        Ok(self)
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        cipher_preset(DistortionLevel::Standard)
    }
}

pub fn cipher_preset(level: DistortionLevel) -> CipherConfig {
    let (meshes_params, images_params, encrypt_images) = match level {
        DistortionLevel::Light => (
            CipherParams::layout(AssetClass::Mesh, 1, 2, 5),
            CipherParams::layout(AssetClass::Image, 1, 2, 5),
            false,
        ),
        DistortionLevel::Standard => (
            CipherParams::layout(AssetClass::Mesh, 2, 2, 10),
            CipherParams::layout(AssetClass::Image, 1, 1, 6),
            false,
        ),
        DistortionLevel::Heavy => (
            CipherParams::layout(AssetClass::Mesh, 4, 6, 13),
            CipherParams::layout(AssetClass::Image, 2, 3, 3),
            true,
        ),
    };
    CipherConfig {
        meshes_params,
        images_params,
        encrypt_images,
        algorithm: AeadAlgorithm::default(),
        key_policy: KeyPolicy::default(),
        ttl: None,
    }
}

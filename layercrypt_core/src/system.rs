//! Adaptive cipher system: the top-level encrypt/decrypt protocol over a
//! plaintext bundle.

use std::fmt;
use std::time::Instant;

use log::{debug, info};
use rand_core::{CryptoRng, RngCore};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::aead::AeadAlgorithm;
use crate::array::{MeshArray, NdArray, Plaintext};
use crate::bits::TierArray;
use crate::engine::{AadTable, CipherTarget, decrypt_block, encrypt_blocks};
use crate::error::{CipherError, Result};
use crate::keys::{Key, generate_keys, get_subkey, verify_or_regenerate};
use crate::params::{AssetClass, BlockSelection, CipherParams, Tier};
use crate::preset::CipherConfig;
use crate::versioning::{AAD_DATA_VERSION, expect_version};

/// Cipher scheme tag recorded in the metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    #[default]
    Adaptive,
}

/// Fidelity a key holder gets back, from fully distorted to exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VisualLevel {
    High,
    Mid,
    Low,
    Clear,
}

impl VisualLevel {
    pub fn for_key(key: &Key) -> Self {
        match key.deepest_tier() {
            Some(Tier::R) => VisualLevel::Clear,
            Some(Tier::Q) => VisualLevel::Low,
            Some(Tier::P) => VisualLevel::Mid,
            None => VisualLevel::High,
        }
    }
}

impl fmt::Display for VisualLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VisualLevel::High => "high",
            VisualLevel::Mid => "mid",
            VisualLevel::Low => "low",
            VisualLevel::Clear => "clear",
        };
        f.write_str(label)
    }
}

/// Everything decryption needs besides the key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AadData {
    pub table: AadTable,
    pub encrypt_images: bool,
    pub meshes_params: CipherParams,
    pub images_params: CipherParams,
    pub algorithm: AeadAlgorithm,
    pub system: SystemKind,
}

impl Serialize for AadData {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Helper<'a> {
            version: u16,
            system: SystemKind,
            algorithm: AeadAlgorithm,
            encrypt_images: bool,
            meshes_params: &'a CipherParams,
            images_params: &'a CipherParams,
            aad: &'a AadTable,
        }
        Helper {
            version: AAD_DATA_VERSION,
            system: self.system,
            algorithm: self.algorithm,
            encrypt_images: self.encrypt_images,
            meshes_params: &self.meshes_params,
            images_params: &self.images_params,
            aad: &self.table,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AadData {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            #[serde(default)]
            system: SystemKind,
            #[serde(default)]
            algorithm: AeadAlgorithm,
            encrypt_images: bool,
            meshes_params: CipherParams,
            images_params: CipherParams,
            aad: AadTable,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, AAD_DATA_VERSION, "AadData")?;
        if helper.meshes_params.class() != AssetClass::Mesh
            || helper.images_params.class() != AssetClass::Image
        {
            return Err(D::Error::custom("AadData parameters have the wrong asset class"));
        }
        Ok(AadData {
            table: helper.aad,
            encrypt_images: helper.encrypt_images,
            meshes_params: helper.meshes_params,
            images_params: helper.images_params,
            algorithm: helper.algorithm,
            system: helper.system,
        })
    }
}

#[derive(Clone, Debug)]
pub struct EncryptionResponse {
    pub ciphertext: Plaintext,
    pub aad: AadData,
    pub key: Key,
}

#[derive(Clone, Debug)]
pub struct DecryptionResponse {
    pub plaintext: Plaintext,
    /// The key after the chain walk, with every derived subkey filled in.
    pub key: Key,
    pub level: VisualLevel,
}

/// A cipher scheme selected by its `SystemKind` tag.
pub trait CryptoSystem {
    fn kind(&self) -> SystemKind;

    fn encrypt<R: RngCore + CryptoRng>(
        &self,
        plaintext: &Plaintext,
        key: Option<&Key>,
        rng: &mut R,
    ) -> Result<EncryptionResponse>;

    fn decrypt(
        &self,
        ciphertext: &Plaintext,
        key: Key,
        aad: &AadData,
    ) -> Result<DecryptionResponse>;
}

impl SystemKind {
    pub fn system(self, config: CipherConfig) -> AdaptiveSystem {
        match self {
            SystemKind::Adaptive => AdaptiveSystem::new(config),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AdaptiveSystem {
    config: CipherConfig,
}

impl AdaptiveSystem {
    pub fn new(config: CipherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CipherConfig {
        &self.config
    }
}

fn cipher_meshes(plaintext: &Plaintext) -> (Vec<usize>, Vec<NdArray<f32>>) {
    let indices = plaintext.cipher_mesh_indices();
    let arrays = indices
        .iter()
        .filter_map(|idx| plaintext.meshes[*idx].to_f32())
        .collect();
    (indices, arrays)
}

fn float_targets<'a>(targets: &'a [CipherTarget], count: usize) -> Vec<&'a NdArray<f32>> {
    targets
        .iter()
        .take(count)
        .filter_map(|target| match &target.array {
            TierArray::Float(arr) => Some(arr),
            TierArray::Byte(_) => None,
        })
        .collect()
}

/// Writes cipher-engine output back into the mesh and image positions it
/// was taken from. Ciphered float meshes become float32.
fn scatter(
    bundle: &mut Plaintext,
    mesh_indices: &[usize],
    arrays: impl IntoIterator<Item = TierArray>,
    with_images: bool,
) -> Result<()> {
    let mut arrays = arrays.into_iter();
    for idx in mesh_indices {
        match arrays.next() {
            Some(TierArray::Float(arr)) => bundle.meshes[*idx] = MeshArray::Float32(arr),
            _ => return Err(CipherError::MalformedMetadata("mesh output out of order")),
        }
    }
    if with_images {
        for image in bundle.images.iter_mut() {
            match arrays.next() {
                Some(TierArray::Byte(arr)) => *image = arr,
                _ => return Err(CipherError::MalformedMetadata("image output out of order")),
            }
        }
    }
    Ok(())
}

impl CryptoSystem for AdaptiveSystem {
    fn kind(&self) -> SystemKind {
        SystemKind::Adaptive
    }

    fn encrypt<R: RngCore + CryptoRng>(
        &self,
        plaintext: &Plaintext,
        key: Option<&Key>,
        rng: &mut R,
    ) -> Result<EncryptionResponse> {
        let started = Instant::now();
        let config = &self.config;
        let (indices, floats) = cipher_meshes(plaintext);
        if floats.is_empty() {
            return Err(CipherError::NoCipherData);
        }

        let key = match key {
            None => generate_keys(&floats, &config.meshes_params, None, rng)?,
            Some(supplied) => verify_or_regenerate(
                &floats,
                &config.meshes_params,
                supplied,
                config.key_policy,
                rng,
            )?,
        };

        let mut targets = Vec::with_capacity(floats.len() + plaintext.images.len());
        for arr in floats {
            targets.push(CipherTarget::mesh(arr, config.meshes_params)?);
        }
        if config.encrypt_images {
            for image in &plaintext.images {
                targets.push(CipherTarget::image(image.clone(), config.images_params)?);
            }
        }

        let (arrays, table) = encrypt_blocks(&targets, &key, config.algorithm, rng)?;
        let mut ciphertext = plaintext.clone();
        scatter(&mut ciphertext, &indices, arrays, config.encrypt_images)?;

        debug!(
            "encrypted {} arrays in {:?}",
            targets.len(),
            started.elapsed()
        );
        Ok(EncryptionResponse {
            ciphertext,
            aad: AadData {
                table,
                encrypt_images: config.encrypt_images,
                meshes_params: config.meshes_params,
                images_params: config.images_params,
                algorithm: config.algorithm,
                system: self.kind(),
            },
            key,
        })
    }

    fn decrypt(
        &self,
        ciphertext: &Plaintext,
        key: Key,
        aad: &AadData,
    ) -> Result<DecryptionResponse> {
        let started = Instant::now();
        let indices = ciphertext.cipher_mesh_indices();
        let context = DecryptionContext::new(ciphertext, key, aad, self.config.ttl)?;
        let level = context.level();
        let (arrays, key) = context.run()?;

        let mut plaintext = ciphertext.clone();
        scatter(&mut plaintext, &indices, arrays, aad.encrypt_images)?;
        debug!("decryption took {:?}", started.elapsed());
        info!("asset decrypted to visual level {}", level);
        Ok(DecryptionResponse {
            plaintext,
            key,
            level,
        })
    }
}

/// Progress of a tiered decryption: the tier to open next, or done.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Pending(Tier),
    Done,
}

/// Exclusive working state for one decryption: the key being completed, the
/// arrays being restored and which tier comes next.
///
/// Tiers open strictly in the order `r`, `q`, `p`; each step after `r` and
/// `q` derives the next subkey from the tier it just recovered.
pub struct DecryptionContext<'a> {
    aad: &'a AadData,
    key: Key,
    targets: Vec<CipherTarget>,
    mesh_count: usize,
    ttl: Option<u64>,
    level: VisualLevel,
    progress: Progress,
}

impl<'a> DecryptionContext<'a> {
    pub fn new(
        ciphertext: &Plaintext,
        key: Key,
        aad: &'a AadData,
        ttl: Option<u64>,
    ) -> Result<Self> {
        let start = key.deepest_tier().ok_or(CipherError::EmptyKey)?;
        let (_, floats) = cipher_meshes(ciphertext);
        if floats.is_empty() {
            return Err(CipherError::NoCipherData);
        }
        let mesh_count = floats.len();
        let mut targets = Vec::with_capacity(mesh_count + ciphertext.images.len());
        for arr in floats {
            targets.push(CipherTarget::mesh(arr, aad.meshes_params)?);
        }
        if aad.encrypt_images {
            for image in &ciphertext.images {
                targets.push(CipherTarget::image(image.clone(), aad.images_params)?);
            }
        }
        Ok(Self {
            aad,
            level: VisualLevel::for_key(&key),
            key,
            targets,
            mesh_count,
            ttl,
            progress: Progress::Pending(start),
        })
    }

    pub fn level(&self) -> VisualLevel {
        self.level
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Opens the pending tier and, unless it was `p`, derives the subkey for
    /// the next one.
    pub fn step(&mut self) -> Result<Progress> {
        let Progress::Pending(tier) = self.progress else {
            return Ok(Progress::Done);
        };
        decrypt_block(
            &mut self.targets,
            &self.key,
            &self.aad.table,
            BlockSelection::only(tier),
            self.aad.algorithm,
            self.ttl,
        )?;

        let next = match tier {
            Tier::R => Some(Tier::Q),
            Tier::Q => Some(Tier::P),
            Tier::P => None,
        };
        self.progress = match next {
            Some(next) => {
                let ki = self
                    .key
                    .subkey(tier)
                    .copied()
                    .ok_or(CipherError::MissingSubkey(tier))?;
                let meshes = float_targets(&self.targets, self.mesh_count);
                let derived = get_subkey(
                    &meshes,
                    &self.aad.meshes_params,
                    &ki,
                    BlockSelection::only(tier),
                )?;
                self.key.set_subkey(next, derived);
                debug!("derived {:?} tier subkey", next);
                Progress::Pending(next)
            }
            None => {
                if !self.key.filled() {
                    return Err(CipherError::IncompleteKey);
                }
                Progress::Done
            }
        };
        Ok(self.progress)
    }

    /// Runs the remaining steps and returns the restored arrays with the
    /// completed key.
    pub fn run(mut self) -> Result<(Vec<TierArray>, Key)> {
        while self.step()? != Progress::Done {}
        let arrays = self.targets.into_iter().map(|target| target.array).collect();
        Ok((arrays, self.key))
    }
}

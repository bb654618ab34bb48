use std::fmt;
use std::path::Path;

use log::info;
use rand_core::{CryptoRng, RngCore};

use crate::container::{AssetContainer, OffContainer};
use crate::error::CipherError;
use crate::keys::Key;
use crate::preset::CipherConfig;
use crate::rng::secure_rng;
use crate::system::{AdaptiveSystem, CryptoSystem, EncryptionResponse, VisualLevel};

#[derive(Debug)]
pub enum AssetError {
    Crypto(CipherError),
    Io(std::io::Error),
    Serde(serde_json::Error),
    Parse { line: usize, reason: String },
    Layout(&'static str),
    MissingMetadata,
    AlreadyEncrypted,
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::Crypto(err) => write!(f, "{err}"),
            AssetError::Io(err) => write!(f, "i/o error: {err}"),
            AssetError::Serde(err) => write!(f, "metadata encoding error: {err}"),
            AssetError::Parse { line, reason } => {
                write!(f, "parse error on line {line}: {reason}")
            }
            AssetError::Layout(reason) => write!(f, "container layout mismatch: {reason}"),
            AssetError::MissingMetadata => f.write_str("asset carries no encryption metadata"),
            AssetError::AlreadyEncrypted => f.write_str("asset is already encrypted"),
        }
    }
}

impl std::error::Error for AssetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetError::Crypto(err) => Some(err),
            AssetError::Io(err) => Some(err),
            AssetError::Serde(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CipherError> for AssetError {
    fn from(value: CipherError) -> Self {
        Self::Crypto(value)
    }
}

impl From<std::io::Error> for AssetError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for AssetError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// A container together with the cipher configuration used to encrypt it.
#[derive(Debug)]
pub struct Asset<C> {
    container: C,
    config: CipherConfig,
}

impl<C: AssetContainer> Asset<C> {
    pub fn new(container: C, config: CipherConfig) -> Self {
        Self { container, config }
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn into_container(self) -> C {
        self.container
    }

    pub fn config(&self) -> &CipherConfig {
        &self.config
    }

    pub fn is_encrypted(&self) -> bool {
        self.container.has_metadata()
    }

    /// Encrypts the container in place. Without a key a fresh chain is
    /// derived; the key actually used is returned either way.
    pub fn encrypt(&mut self, key: Option<&Key>) -> Result<EncryptionResponse, AssetError> {
        let mut rng = secure_rng();
        self.encrypt_with_rng(key, &mut rng)
    }

    pub fn encrypt_with_rng<R: RngCore + CryptoRng>(
        &mut self,
        key: Option<&Key>,
        rng: &mut R,
    ) -> Result<EncryptionResponse, AssetError> {
        if self.container.has_metadata() {
            return Err(AssetError::AlreadyEncrypted);
        }
        let plaintext = self.container.plaintext()?;
        let system = AdaptiveSystem::new(self.config);
        let response = system.encrypt(&plaintext, key, rng)?;
        self.container.insert(response.ciphertext.clone())?;
        self.container.embed_metadata(&response.aad)?;
        info!("asset encrypted");
        Ok(response)
    }

    /// Decrypts the container in place as far as `key` allows.
    pub fn decrypt(&mut self, key: Key) -> Result<bool, AssetError> {
        self.decrypt_to_level(key).map(|_| true)
    }

    /// Like `decrypt`, reporting the disclosure level reached. On failure
    /// the metadata is embedded again so another key can be tried.
    pub fn decrypt_to_level(&mut self, key: Key) -> Result<VisualLevel, AssetError> {
        let aad = self.container.retrieve_metadata()?;
        let outcome = self
            .container
            .plaintext()
            .and_then(|ciphertext| {
                let system = aad.system.system(self.config);
                Ok(system.decrypt(&ciphertext, key, &aad)?)
            })
            .and_then(|response| {
                self.container.insert(response.plaintext)?;
                Ok(response.level)
            });
        if outcome.is_err() {
            self.container.embed_metadata(&aad)?;
        }
        outcome
    }
}

impl Asset<OffContainer> {
    pub fn load(path: &Path, config: CipherConfig) -> Result<Self, AssetError> {
        Ok(Self::new(OffContainer::load(path)?, config))
    }

    pub fn save(&self, path: &Path) -> Result<(), AssetError> {
        self.container.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{MeshArray, NdArray, Plaintext};
    use crate::container::MemoryContainer;
    use crate::params::Tier;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn memory_asset() -> Asset<MemoryContainer> {
        let verts = NdArray::new(
            vec![150, 3],
            (0..450).map(|i| (i as f32 * 0.07).cos() * 3.0).collect(),
        )
        .unwrap();
        let plaintext = Plaintext::new(vec![MeshArray::Float32(verts)], vec![]);
        let container = MemoryContainer::new(plaintext);
        Asset::new(container, CipherConfig::default())
    }

    #[test]
    fn encrypt_then_decrypt_in_place() {
        let mut asset = memory_asset();
        let original = asset.container().bundle().clone();
        let mut rng = ChaCha20Rng::from_seed([7u8; 32]);
        let response = asset.encrypt_with_rng(None, &mut rng).unwrap();
        assert!(asset.is_encrypted());
        assert_ne!(asset.container().bundle(), &original);
        assert!(matches!(
            asset.encrypt_with_rng(None, &mut rng),
            Err(AssetError::AlreadyEncrypted)
        ));
        assert!(asset.decrypt(response.key).unwrap());
        assert!(!asset.is_encrypted());
        assert_eq!(asset.container().bundle(), &original);
    }

    #[test]
    fn failed_decrypt_keeps_metadata() {
        let mut asset = memory_asset();
        let mut rng = ChaCha20Rng::from_seed([8u8; 32]);
        let response = asset.encrypt_with_rng(None, &mut rng).unwrap();
        let wrong = Key::from_master([0xEE; 32]);
        let err = asset.decrypt(wrong).unwrap_err();
        assert!(matches!(err, AssetError::Crypto(CipherError::InvalidKey)));
        assert!(asset.is_encrypted());
        let level = asset
            .decrypt_to_level(response.key.disclose(Tier::R).unwrap())
            .unwrap();
        assert_eq!(level, VisualLevel::Clear);
    }

    #[test]
    fn decrypt_without_metadata_fails() {
        let mut asset = memory_asset();
        let err = asset.decrypt(Key::from_master([1u8; 32])).unwrap_err();
        assert!(matches!(err, AssetError::MissingMetadata));
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{CipherError, Result};
use crate::keys::SubKey;

pub const AEAD_NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;
pub const TIMESTAMP_BYTES: usize = 8;
pub const METADATA_BYTES: usize = TIMESTAMP_BYTES + AEAD_NONCE_BYTES + AEAD_TAG_BYTES;
/// Metadata rows each tier contributes to the authentication table.
pub const META_WORDS: usize = METADATA_BYTES / 4;
/// Tolerated clock skew for timestamps from the future.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

/// Timestamp, nonce and detached tag of one sealed buffer. The timestamp is
/// bound to the ciphertext as associated data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AeadMetadata {
    pub timestamp: u64,
    pub nonce: [u8; AEAD_NONCE_BYTES],
    pub tag: [u8; AEAD_TAG_BYTES],
}

impl AeadMetadata {
    pub fn to_bytes(&self) -> [u8; METADATA_BYTES] {
        let mut out = [0u8; METADATA_BYTES];
        out[..TIMESTAMP_BYTES].copy_from_slice(&self.timestamp.to_be_bytes());
        out[TIMESTAMP_BYTES..TIMESTAMP_BYTES + AEAD_NONCE_BYTES].copy_from_slice(&self.nonce);
        out[TIMESTAMP_BYTES + AEAD_NONCE_BYTES..].copy_from_slice(&self.tag);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != METADATA_BYTES {
            return Err(CipherError::MalformedMetadata("AEAD metadata has wrong length"));
        }
        let mut timestamp = [0u8; TIMESTAMP_BYTES];
        let mut nonce = [0u8; AEAD_NONCE_BYTES];
        let mut tag = [0u8; AEAD_TAG_BYTES];
        timestamp.copy_from_slice(&bytes[..TIMESTAMP_BYTES]);
        nonce.copy_from_slice(&bytes[TIMESTAMP_BYTES..TIMESTAMP_BYTES + AEAD_NONCE_BYTES]);
        tag.copy_from_slice(&bytes[TIMESTAMP_BYTES + AEAD_NONCE_BYTES..]);
        Ok(Self {
            timestamp: u64::from_be_bytes(timestamp),
            nonce,
            tag,
        })
    }

    /// Little-endian word view used by the authentication table.
    pub fn to_words(&self) -> [u32; META_WORDS] {
        let bytes = self.to_bytes();
        let mut words = [0u32; META_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    pub fn from_words(words: &[u32]) -> Result<Self> {
        let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        Self::from_bytes(&bytes)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn seal_with<A: AeadInPlace + KeyInit>(
    key: &SubKey,
    nonce: &[u8; AEAD_NONCE_BYTES],
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<[u8; AEAD_TAG_BYTES]> {
    let cipher = A::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buffer)
        .map_err(|_| CipherError::InvalidKey)?;
    let mut out = [0u8; AEAD_TAG_BYTES];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

fn open_with<A: AeadInPlace + KeyInit>(
    key: &SubKey,
    nonce: &[u8; AEAD_NONCE_BYTES],
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8; AEAD_TAG_BYTES],
) -> Result<()> {
    let cipher = A::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CipherError::InvalidKey)
}

/// Encrypts `buffer` in place, stamping it with the current time.
pub fn seal<R: RngCore + CryptoRng>(
    algorithm: AeadAlgorithm,
    key: &SubKey,
    buffer: &mut [u8],
    rng: &mut R,
) -> Result<AeadMetadata> {
    seal_at(algorithm, key, buffer, unix_now(), rng)
}

pub fn seal_at<R: RngCore + CryptoRng>(
    algorithm: AeadAlgorithm,
    key: &SubKey,
    buffer: &mut [u8],
    timestamp: u64,
    rng: &mut R,
) -> Result<AeadMetadata> {
    let mut nonce = [0u8; AEAD_NONCE_BYTES];
    rng.fill_bytes(&mut nonce);
    let aad = timestamp.to_be_bytes();
    let tag = match algorithm {
        AeadAlgorithm::Aes256Gcm => seal_with::<Aes256Gcm>(key, &nonce, &aad, buffer)?,
        AeadAlgorithm::ChaCha20Poly1305 => {
            seal_with::<ChaCha20Poly1305>(key, &nonce, &aad, buffer)?
        }
    };
    Ok(AeadMetadata {
        timestamp,
        nonce,
        tag,
    })
}

/// Decrypts `buffer` in place. With `ttl` set, metadata older than `ttl`
/// seconds or stamped too far in the future is rejected before any
/// decryption is attempted.
pub fn open(
    algorithm: AeadAlgorithm,
    key: &SubKey,
    buffer: &mut [u8],
    metadata: &AeadMetadata,
    ttl: Option<u64>,
) -> Result<()> {
    open_at(algorithm, key, buffer, metadata, ttl, unix_now())
}

pub fn open_at(
    algorithm: AeadAlgorithm,
    key: &SubKey,
    buffer: &mut [u8],
    metadata: &AeadMetadata,
    ttl: Option<u64>,
    now: u64,
) -> Result<()> {
    if let Some(ttl) = ttl {
        let stale = metadata.timestamp.saturating_add(ttl) < now;
        let early = now.saturating_add(MAX_CLOCK_SKEW_SECS) < metadata.timestamp;
        if stale || early {
            return Err(CipherError::Expired);
        }
    }
    let aad = metadata.timestamp.to_be_bytes();
    match algorithm {
        AeadAlgorithm::Aes256Gcm => {
            open_with::<Aes256Gcm>(key, &metadata.nonce, &aad, buffer, &metadata.tag)
        }
        AeadAlgorithm::ChaCha20Poly1305 => {
            open_with::<ChaCha20Poly1305>(key, &metadata.nonce, &aad, buffer, &metadata.tag)
        }
    }
}

//! Subkey chain `k3 -> k2 -> k1` and its derivation from plaintext samples.
//!
//! `k3` is the master seed. `k2` compresses the leading bytes of the packed
//! `r` tier under `k3`, and `k1` compresses the leading bytes of the packed
//! `q` tier under `k2`. A holder of `k3` can therefore walk down the chain
//! once the corresponding tier has been decrypted, never up.

use aes::Aes256;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use log::{debug, info};
use rand_core::{CryptoRng, RngCore};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::array::NdArray;
use crate::bits::{extract, words_to_bytes};
use crate::error::{CipherError, Result};
use crate::params::{BlockSelection, CipherParams, Tier};
use crate::preset::KeyPolicy;
use crate::versioning::{KEY_VERSION, expect_version};

pub const SUBKEY_BYTES: usize = 32;
/// Key material needed from each sampled tier.
pub const SAMPLE_BITS: u32 = 256;
/// Float arrays sampled when re-deriving a caller-supplied key.
pub const VERIFY_SAMPLE_ARRAYS: usize = 50;

pub type SubKey = [u8; SUBKEY_BYTES];

/// Up to three subkeys; `k1` unlocks the `p` tier, `k2` the `q` tier and
/// `k3` the `r` tier.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    k1: Option<SubKey>,
    k2: Option<SubKey>,
    k3: Option<SubKey>,
}

impl Key {
    pub fn new(k1: Option<SubKey>, k2: Option<SubKey>, k3: Option<SubKey>) -> Result<Self> {
        let key = Self { k1, k2, k3 };
        if key.size() == 0 {
            return Err(CipherError::EmptyKey);
        }
        Ok(key)
    }

    /// Key holding only the master seed.
    pub fn from_master(k3: SubKey) -> Self {
        Self {
            k1: None,
            k2: None,
            k3: Some(k3),
        }
    }

    pub fn subkey(&self, tier: Tier) -> Option<&SubKey> {
        match tier {
            Tier::P => self.k1.as_ref(),
            Tier::Q => self.k2.as_ref(),
            Tier::R => self.k3.as_ref(),
        }
    }

    pub(crate) fn set_subkey(&mut self, tier: Tier, subkey: SubKey) {
        match tier {
            Tier::P => self.k1 = Some(subkey),
            Tier::Q => self.k2 = Some(subkey),
            Tier::R => self.k3 = Some(subkey),
        }
    }

    pub fn k1(&self) -> Option<&SubKey> {
        self.k1.as_ref()
    }

    pub fn k2(&self) -> Option<&SubKey> {
        self.k2.as_ref()
    }

    pub fn k3(&self) -> Option<&SubKey> {
        self.k3.as_ref()
    }

    /// Number of subkeys present.
    pub fn size(&self) -> usize {
        [self.k1.is_some(), self.k2.is_some(), self.k3.is_some()]
            .into_iter()
            .filter(|present| *present)
            .count()
    }

    /// Every subkey at or below the deepest present one is also present.
    pub fn filled(&self) -> bool {
        match (self.k1.is_some(), self.k2.is_some(), self.k3.is_some()) {
            (_, _, true) => self.k1.is_some() && self.k2.is_some(),
            (_, true, false) => self.k1.is_some(),
            (true, false, false) => true,
            (false, false, false) => false,
        }
    }

    /// The deepest tier this key can open directly.
    pub fn deepest_tier(&self) -> Option<Tier> {
        [Tier::R, Tier::Q, Tier::P]
            .into_iter()
            .find(|tier| self.subkey(*tier).is_some())
    }

    /// A key carrying only the subkey for `tier`, for handing out a single
    /// disclosure level.
    pub fn disclose(&self, tier: Tier) -> Option<Key> {
        let subkey = *self.subkey(tier)?;
        let mut key = Key {
            k1: None,
            k2: None,
            k3: None,
        };
        key.set_subkey(tier, subkey);
        Some(key)
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("k1", &self.k1.is_some())
            .field("k2", &self.k2.is_some())
            .field("k3", &self.k3.is_some())
            .finish()
    }
}

fn encode_subkey(subkey: &Option<SubKey>) -> Option<String> {
    subkey.as_ref().map(hex::encode)
}

fn decode_subkey<E: DeError>(
    value: Option<String>,
    label: &'static str,
) -> std::result::Result<Option<SubKey>, E> {
    value
        .map(|text| -> std::result::Result<SubKey, E> {
            let mut out = [0u8; SUBKEY_BYTES];
            hex::decode_to_slice(text.as_bytes(), &mut out)
                .map_err(|err| E::custom(format!("{label}: {err}")))?;
            Ok(out)
        })
        .transpose()
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Helper {
            version: u16,
            #[serde(skip_serializing_if = "Option::is_none")]
            k1: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            k2: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            k3: Option<String>,
        }
        Helper {
            version: KEY_VERSION,
            k1: encode_subkey(&self.k1),
            k2: encode_subkey(&self.k2),
            k3: encode_subkey(&self.k3),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            #[serde(default)]
            k1: Option<String>,
            #[serde(default)]
            k2: Option<String>,
            #[serde(default)]
            k3: Option<String>,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, KEY_VERSION, "Key")?;
        Key::new(
            decode_subkey(helper.k1, "k1")?,
            decode_subkey(helper.k2, "k2")?,
            decode_subkey(helper.k3, "k3")?,
        )
        .map_err(D::Error::custom)
    }
}

/// `SHA256(block || AES256-ECB(key, block))`.
pub fn compress(block: &[u8; SUBKEY_BYTES], key: &SubKey) -> SubKey {
    let cipher = Aes256::new(GenericArray::from_slice(key.as_slice()));
    let mut encrypted = *block;
    for chunk in encrypted.chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    let mut hasher = Sha256::new();
    hasher.update(block);
    hasher.update(encrypted);
    hasher.finalize().into()
}

/// Elements needed so the narrowest selected tier yields 256 bits.
pub fn min_sample_len(params: &CipherParams, selection: BlockSelection) -> Result<usize> {
    let width = params
        .min_selected_width(selection)
        .ok_or(CipherError::InvalidSelection)?;
    Ok((SAMPLE_BITS / width) as usize + 1)
}

/// Shortest prefix of `arrays` whose element count exceeds `required`.
fn sample_prefix<A: AsRef<NdArray<f32>>>(arrays: &[A], required: usize) -> Result<&[A]> {
    let mut total = 0;
    for (idx, arr) in arrays.iter().enumerate() {
        total += arr.as_ref().len();
        if total > required {
            return Ok(&arrays[..=idx]);
        }
    }
    if total < required {
        return Err(CipherError::InsufficientPlaintext {
            required,
            available: total,
        });
    }
    Ok(arrays)
}

/// Leading 32 bytes of `tier` packed across `arrays` with zero fill.
fn sample_block<A: AsRef<NdArray<f32>>>(
    arrays: &[A],
    params: &CipherParams,
    tier: Tier,
) -> Result<[u8; SUBKEY_BYTES]> {
    let mut stream = Vec::new();
    for arr in arrays {
        let words = extract(arr.as_ref(), params.range(tier), 0)?;
        stream.extend(words_to_bytes(&words));
        if stream.len() >= SUBKEY_BYTES {
            break;
        }
    }
    let head = stream
        .get(..SUBKEY_BYTES)
        .ok_or(CipherError::InsufficientPlaintext {
            required: SUBKEY_BYTES * 8 / params.width(tier) as usize + 1,
            available: arrays.iter().map(|arr| arr.as_ref().len()).sum(),
        })?;
    let mut block = [0u8; SUBKEY_BYTES];
    block.copy_from_slice(head);
    Ok(block)
}

/// Fresh 32-byte master seed.
pub fn random_subkey<R: RngCore + CryptoRng>(rng: &mut R) -> SubKey {
    let mut subkey = [0u8; SUBKEY_BYTES];
    rng.fill_bytes(&mut subkey);
    subkey
}

/// Derives the full chain from plaintext mesh arrays. `seed` becomes `k3`
/// when supplied, otherwise `k3` is drawn from `rng`.
pub fn generate_keys<A, R>(
    arrays: &[A],
    params: &CipherParams,
    seed: Option<SubKey>,
    rng: &mut R,
) -> Result<Key>
where
    A: AsRef<NdArray<f32>>,
    R: RngCore + CryptoRng,
{
    let selection = BlockSelection {
        q: true,
        r: true,
        ..Default::default()
    };
    let required = min_sample_len(params, selection)?;
    let source = sample_prefix(arrays, required)?;
    debug!(
        "sampling {} of {} arrays for key derivation (min {} elements)",
        source.len(),
        arrays.len(),
        required
    );

    let s2 = sample_block(source, params, Tier::Q)?;
    let s3 = sample_block(source, params, Tier::R)?;
    let k3 = match seed {
        Some(k3) => k3,
        None => random_subkey(rng),
    };
    let k2 = compress(&s3, &k3);
    let k1 = compress(&s2, &k2);
    Ok(Key {
        k1: Some(k1),
        k2: Some(k2),
        k3: Some(k3),
    })
}

/// Derives the next weaker subkey from `ki` and the already decrypted tier
/// named by `selection` (`r` yields `k2`, `q` yields `k1`).
pub fn get_subkey<A: AsRef<NdArray<f32>>>(
    arrays: &[A],
    params: &CipherParams,
    ki: &SubKey,
    selection: BlockSelection,
) -> Result<SubKey> {
    let tier = selection.single_block()?;
    let required = min_sample_len(params, selection)?;
    let source = sample_prefix(arrays, required)?;
    let block = sample_block(source, params, tier)?;
    Ok(compress(&block, ki))
}

/// Re-derives the chain from the supplied key's `k3` over the first
/// `VERIFY_SAMPLE_ARRAYS` arrays and compares every level.
///
/// Under `KeyPolicy::Regenerate` a mismatch falls back to a usable key: the
/// re-derived chain when `k3` is present, otherwise a fresh one. Under
/// `KeyPolicy::Strict` it is an error.
pub fn verify_or_regenerate<A, R>(
    arrays: &[A],
    params: &CipherParams,
    supplied: &Key,
    policy: KeyPolicy,
    rng: &mut R,
) -> Result<Key>
where
    A: AsRef<NdArray<f32>>,
    R: RngCore + CryptoRng,
{
    let sample = &arrays[..arrays.len().min(VERIFY_SAMPLE_ARRAYS)];
    let Some(k3) = supplied.k3 else {
        if policy == KeyPolicy::Strict {
            return Err(CipherError::MissingSubkey(Tier::R));
        }
        info!("supplied key has no master subkey, generating a new key");
        return generate_keys(arrays, params, None, rng);
    };

    let derived = generate_keys(sample, params, Some(k3), rng)?;
    let consistent = [Tier::P, Tier::Q]
        .into_iter()
        .all(|tier| {
            supplied
                .subkey(tier)
                .map_or(true, |sub| Some(sub) == derived.subkey(tier))
        });
    if !consistent {
        if policy == KeyPolicy::Strict {
            return Err(CipherError::KeyMismatch);
        }
        info!("supplied key does not match this asset, using the key re-derived from k3");
    }
    Ok(derived)
}
